/// CLI Interface Module
///
/// Command-line entry point. Starts a `PartitionedEngine`, drives it with a
/// seeded synthetic stream of buys, sells and cancels, and prints a JSON
/// summary once every partition has shut down.
///
/// ## Responsibilities
/// - Parse command-line arguments
/// - Initialize logging
/// - Generate load, consume responses, shut down cleanly
use crate::engine::EngineStats;
use crate::error::EngineError;
use crate::metrics;
use crate::partitioned_engine::{PartitionConfig, PartitionedEngine};
use crate::protocol::{Order, OrderKind};
use crate::validation::ValidationConfig;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// 撮合引擎命令行配置
#[derive(Parser, Debug, Clone)]
#[command(name = "toy-exchange")]
#[command(version = "0.1.0")]
#[command(about = "股票撮合引擎压测入口", long_about = None)]
pub struct CliConfig {
    /// 分区数量（0表示自动检测CPU核心数）
    #[arg(short = 'n', long, default_value_t = 0)]
    pub partitions: usize,

    /// 分区输入队列与输出队列容量
    #[arg(short = 'q', long, default_value_t = 10_000)]
    pub queue_capacity: usize,

    /// 每个订单簿预分配的订单数
    #[arg(long, default_value_t = 1024)]
    pub book_capacity: usize,

    /// 生成的请求总数
    #[arg(short, long, default_value_t = 100_000)]
    pub orders: u64,

    /// 股票数量
    #[arg(short, long, default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..))]
    pub stocks: u32,

    /// 交易员数量
    #[arg(short, long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub traders: u32,

    /// 撤单占比 [0, 1]
    #[arg(long, default_value_t = 0.1)]
    pub cancel_ratio: f64,

    /// 随机种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// 启用CPU亲和性绑定
    #[arg(long, default_value_t = false)]
    pub cpu_affinity: bool,

    /// 日志级别
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// 仅显示配置不运行
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// 结束后输出 Prometheus 指标
    #[arg(long, default_value_t = false)]
    pub print_metrics: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to render summary: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response consumer panicked")]
    ConsumerPanicked,
}

impl CliConfig {
    pub fn partition_count(&self) -> usize {
        if self.partitions == 0 {
            num_cpus::get()
        } else {
            self.partitions
        }
    }

    pub fn validate(&self) -> Result<(), CliError> {
        if !(0.0..=1.0).contains(&self.cancel_ratio) {
            return Err(CliError::InvalidArgument(format!(
                "cancel ratio {} is outside [0, 1]",
                self.cancel_ratio
            )));
        }
        Ok(())
    }

    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            partition_count: self.partition_count(),
            queue_capacity: self.queue_capacity,
            book_capacity: self.book_capacity,
            enable_cpu_affinity: self.cpu_affinity,
            validation: ValidationConfig::default(),
        }
    }
}

/// Summary printed at the end of a load run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub partitions: usize,
    pub submitted: u64,
    pub cancels_submitted: u64,
    pub elapsed_ms: f64,
    pub orders_per_sec: f64,
    /// Responses received, by kind.
    pub responses: BTreeMap<&'static str, u64>,
    pub totals: EngineStats,
    pub per_partition: Vec<EngineStats>,
}

/// Seeded generator of synthetic requests.
///
/// Trade ids are allocated per trader so no two generated orders share a
/// GUID. Cancels pick a previously generated order, which may already be
/// filled or cancelled.
pub struct LoadGenerator {
    rng: StdRng,
    stocks: u32,
    cancel_ratio: f64,
    next_trade: Vec<u32>,
    placed: Vec<(u32, u32, u32)>,
}

impl LoadGenerator {
    pub fn new(seed: u64, stocks: u32, traders: u32, cancel_ratio: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            stocks: stocks.max(1),
            cancel_ratio,
            next_trade: vec![0; traders.max(1) as usize],
            placed: Vec::new(),
        }
    }

    pub fn next_order(&mut self) -> Order {
        if !self.placed.is_empty() && self.rng.gen_bool(self.cancel_ratio) {
            let i = self.rng.gen_range(0..self.placed.len());
            let (trader, trade, stock) = self.placed.swap_remove(i);
            return Order::cancel(trader, trade, stock);
        }

        let trader_index = self.rng.gen_range(0..self.next_trade.len());
        self.next_trade[trader_index] += 1;
        let trader = trader_index as u32 + 1;
        let trade = self.next_trade[trader_index];
        let stock = self.rng.gen_range(0..self.stocks);
        let amount = self.rng.gen_range(1..=100);
        let price = self.rng.gen_range(90..=110);
        self.placed.push((trader, trade, stock));

        if self.rng.gen_bool(0.5) {
            Order::buy(trader, trade, stock, price, amount)
        } else if self.rng.gen_bool(0.05) {
            Order::sell(trader, trade, stock, 0, amount)
        } else {
            Order::sell(trader, trade, stock, price, amount)
        }
    }
}

/// Tallies responses by kind; forwarded `Shutdown` markers are skipped.
fn count_kinds(counts: &mut BTreeMap<&'static str, u64>, orders: impl Iterator<Item = Order>) {
    for order in orders.filter(|o| o.kind.is_response()) {
        *counts.entry(order.kind.as_str()).or_default() += 1;
    }
}

/// Runs the CLI application
pub fn run() -> Result<(), CliError> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);
    run_with(&config)
}

/// Runs a load test with an already parsed configuration.
pub fn run_with(config: &CliConfig) -> Result<(), CliError> {
    config.validate()?;
    info!("配置: {:?}", config);

    let partition_count = config.partition_count();
    if config.dry_run {
        println!("========================================");
        println!("  toy-exchange v0.1.0");
        println!("========================================");
        println!("分区数量:     {}", partition_count);
        println!("队列容量:     {}", config.queue_capacity);
        println!("订单簿容量:   {}", config.book_capacity);
        println!("请求数:       {}", config.orders);
        println!("股票/交易员:  {}/{}", config.stocks, config.traders);
        println!("撤单比例:     {}", config.cancel_ratio);
        println!("随机种子:     {}", config.seed);
        println!("========================================");
        println!("\nDry-run 模式 - 不启动引擎");
        return Ok(());
    }

    let summary = load_run(config)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if config.print_metrics {
        print!("{}", metrics::gather());
    }
    Ok(())
}

/// Feeds `config.orders` synthetic requests through a fresh engine.
pub fn load_run(config: &CliConfig) -> Result<RunSummary, CliError> {
    config.validate()?;
    let engine = PartitionedEngine::new(config.partition_config())?;

    let responses = engine.responses().clone();
    let consumer = thread::Builder::new()
        .name("response-consumer".to_string())
        .spawn(move || {
            let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
            count_kinds(&mut counts, responses.iter());
            counts
        })
        .map_err(EngineError::from)?;

    let mut generator =
        LoadGenerator::new(config.seed, config.stocks, config.traders, config.cancel_ratio);
    let mut cancels_submitted = 0;
    let start = Instant::now();
    for _ in 0..config.orders {
        let order = generator.next_order();
        if order.kind == OrderKind::Cancel {
            cancels_submitted += 1;
        }
        engine.submit(order)?;
    }

    let partitions = engine.partition_count();
    let report = engine.shutdown()?;
    let elapsed = start.elapsed();

    let mut counts = consumer.join().map_err(|_| CliError::ConsumerPanicked)?;
    count_kinds(&mut counts, report.drained.iter().copied());

    let elapsed_secs = elapsed.as_secs_f64();
    let summary = RunSummary {
        partitions,
        submitted: config.orders,
        cancels_submitted,
        elapsed_ms: elapsed_secs * 1000.0,
        orders_per_sec: if elapsed_secs > 0.0 {
            config.orders as f64 / elapsed_secs
        } else {
            0.0
        },
        responses: counts,
        totals: report.total(),
        per_partition: report.stats,
    };
    info!(
        submitted = summary.submitted,
        elapsed_ms = summary.elapsed_ms,
        "load run finished"
    );
    Ok(summary)
}

/// 初始化日志系统
///
/// `RUST_LOG` overrides `level`. Safe to call more than once.
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
