/// 分区并行引擎
///
/// 核心设计：
/// 1. 按 stock_id 取模分区，同一股票始终落在同一分区，订单簿单线程独占
/// 2. 有界 crossbeam channel 传输，发送阻塞即背压
/// 3. 所有分区共享一个输出通道
/// 4. 可选 CPU 亲和性绑定（`cpu-affinity` feature）
use crate::engine::{EngineConfig, EngineStats, MatchingEngine};
use crate::error::EngineError;
use crate::protocol::{Order, OrderKind};
use crate::validation::ValidationConfig;
use crossbeam::channel::{bounded, select, Receiver, Sender};
use serde::Serialize;
use std::thread;
use tracing::{debug, info, warn};

/// 分区配置
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// 分区数量（推荐设置为CPU核心数）
    pub partition_count: usize,

    /// 每个分区输入队列以及共享输出队列的容量
    pub queue_capacity: usize,

    /// 每个订单簿 slab 的预分配容量
    pub book_capacity: usize,

    /// 是否绑定CPU核心
    pub enable_cpu_affinity: bool,

    pub validation: ValidationConfig,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_count: num_cpus::get(),
            queue_capacity: 10_000,
            book_capacity: 1024,
            enable_cpu_affinity: false,
            validation: ValidationConfig::default(),
        }
    }
}

/// What `PartitionedEngine::shutdown` hands back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Responses still in the output channel when shutdown began.
    pub drained: Vec<Order>,
    /// Per-partition statistics, indexed by partition id.
    pub stats: Vec<EngineStats>,
}

impl ShutdownReport {
    pub fn total(&self) -> EngineStats {
        let mut total = EngineStats::default();
        for stats in &self.stats {
            total.merge(stats);
        }
        total
    }
}

/// 单个分区worker
struct PartitionWorker {
    partition_id: usize,
    engine: MatchingEngine,
    rx: Receiver<Order>,
    tx: Sender<Order>,
    enable_cpu_affinity: bool,
}

impl PartitionWorker {
    /// 运行分区处理循环
    fn run(self) -> EngineStats {
        if self.enable_cpu_affinity {
            pin_to_core(self.partition_id);
        }
        self.engine.run(self.rx, self.tx)
    }
}

#[cfg(feature = "cpu-affinity")]
fn pin_to_core(partition_id: usize) {
    match core_affinity::get_core_ids() {
        Some(core_ids) if !core_ids.is_empty() => {
            let core = core_ids[partition_id % core_ids.len()];
            if !core_affinity::set_for_current(core) {
                warn!(partition = partition_id, "failed to pin to core {:?}", core);
            }
        }
        _ => warn!(partition = partition_id, "core ids unavailable, not pinning"),
    }
}

#[cfg(not(feature = "cpu-affinity"))]
fn pin_to_core(partition_id: usize) {
    debug!(
        partition = partition_id,
        "cpu affinity requested but the cpu-affinity feature is disabled"
    );
}

/// 分区并行引擎
pub struct PartitionedEngine {
    /// 每个分区的发送通道
    partitions: Vec<Sender<Order>>,

    /// 所有分区共享的输出
    output: Receiver<Order>,

    /// Worker线程句柄
    workers: Vec<thread::JoinHandle<EngineStats>>,
}

impl PartitionedEngine {
    /// 创建并启动所有分区
    ///
    /// `partition_count == 0` falls back to the number of CPUs.
    pub fn new(config: PartitionConfig) -> Result<Self, EngineError> {
        let partition_count = if config.partition_count == 0 {
            num_cpus::get()
        } else {
            config.partition_count
        };

        let (out_tx, out_rx) = bounded(config.queue_capacity);
        let mut partitions = Vec::with_capacity(partition_count);
        let mut workers = Vec::with_capacity(partition_count);

        for partition_id in 0..partition_count {
            let (tx, rx) = bounded(config.queue_capacity);
            partitions.push(tx);

            let engine_config = EngineConfig {
                book_capacity: config.book_capacity,
                validation: config.validation.clone(),
            };
            let worker = PartitionWorker {
                partition_id,
                engine: MatchingEngine::for_partition(partition_id, engine_config),
                rx,
                tx: out_tx.clone(),
                enable_cpu_affinity: config.enable_cpu_affinity,
            };

            let handle = thread::Builder::new()
                .name(format!("partition-{}", partition_id))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        info!(
            partitions = partition_count,
            queue_capacity = config.queue_capacity,
            "partitioned engine started"
        );

        Ok(Self {
            partitions,
            output: out_rx,
            workers,
        })
    }

    /// 提交一条请求
    ///
    /// Blocks while the target partition's queue is full.
    pub fn submit(&self, order: Order) -> Result<(), EngineError> {
        if order.kind == OrderKind::Shutdown {
            return Err(EngineError::UnexpectedShutdown);
        }
        let partition_id = self.route(order.stock_id);
        self.partitions[partition_id]
            .send(order)
            .map_err(|_| EngineError::Disconnected)
    }

    /// Shared response stream. Clone it to consume on another thread.
    pub fn responses(&self) -> &Receiver<Order> {
        &self.output
    }

    /// 将股票路由到对应分区
    #[inline]
    pub fn route(&self, stock_id: u32) -> usize {
        stock_id as usize % self.partitions.len()
    }

    /// 获取分区数量
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Stops every partition and waits for the threads to exit.
    ///
    /// `Shutdown` is sent to each partition behind the requests already
    /// queued, so those are still processed. Responses are drained while
    /// waiting; other receivers cloned from `responses()` may take a share of
    /// them. Each partition's `Shutdown` echo is consumed here.
    pub fn shutdown(self) -> Result<ShutdownReport, EngineError> {
        let PartitionedEngine {
            partitions,
            output,
            workers,
        } = self;
        let mut drained = Vec::new();
        let mut sentinels = 0usize;
        let mut keep = |order: Order| {
            if order.kind == OrderKind::Shutdown {
                sentinels += 1;
            } else {
                drained.push(order);
            }
        };

        for (partition_id, tx) in partitions.iter().enumerate() {
            // 输出满时 worker 会阻塞，发送的同时必须继续接收
            loop {
                let done = select! {
                    send(tx, Order::shutdown()) -> res => {
                        if res.is_err() {
                            warn!(partition = partition_id, "partition already gone");
                        }
                        true
                    }
                    recv(output) -> msg => match msg {
                        Ok(order) => {
                            keep(order);
                            false
                        }
                        Err(_) => true,
                    }
                };
                if done {
                    break;
                }
            }
        }
        drop(partitions);

        // 所有 worker 退出后输出通道断开
        for order in output.iter() {
            keep(order);
        }

        let mut stats = Vec::with_capacity(workers.len());
        for (partition_id, handle) in workers.into_iter().enumerate() {
            let worker_stats = handle
                .join()
                .map_err(|_| EngineError::WorkerPanicked(partition_id))?;
            stats.push(worker_stats);
        }

        debug!(sentinels, drained = drained.len(), "shutdown drained output");
        info!(partitions = stats.len(), "partitioned engine stopped");
        Ok(ShutdownReport { drained, stats })
    }
}
