// 全局内存分配器：使用 jemalloc 提升性能
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// 将所有模块声明为公共的，这样二进制文件、测试和基准测试都能访问它们
pub mod cli;
pub mod codec;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod orderbook;
pub mod partitioned_engine;
pub mod protocol;
pub mod rbtree;
pub mod slab;
pub mod validation;

pub use engine::{EngineConfig, EngineStats, MatchingEngine};
pub use error::{BookError, EngineError};
pub use orderbook::OrderBook;
pub use partitioned_engine::{PartitionConfig, PartitionedEngine, ShutdownReport};
pub use protocol::{guid, Guid, Order, OrderKind, Side};
