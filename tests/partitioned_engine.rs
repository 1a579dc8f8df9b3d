//! Sharded engine behaviour across partitions.

use std::time::Duration;
use toy_exchange::{Order, OrderKind, PartitionConfig, PartitionedEngine};

fn config(partition_count: usize) -> PartitionConfig {
    PartitionConfig {
        partition_count,
        queue_capacity: 256,
        ..Default::default()
    }
}

#[test]
fn test_stocks_do_not_interact() {
    let engine = PartitionedEngine::new(config(2)).unwrap();

    // 价格交叉但股票不同，不应成交
    engine.submit(Order::buy(1, 1, 0, 10, 1)).unwrap();
    engine.submit(Order::sell(2, 1, 1, 5, 1)).unwrap();
    engine.submit(Order::sell(2, 2, 2, 5, 1)).unwrap();

    let report = engine.shutdown().unwrap();
    assert!(report.drained.is_empty());
    assert_eq!(report.total().resting, 3);
}

#[test]
fn test_per_stock_order_is_preserved() {
    let engine = PartitionedEngine::new(config(4)).unwrap();

    for trader in 1..=3 {
        engine.submit(Order::buy(trader, 1, 11, 7, 1)).unwrap();
    }
    engine.submit(Order::sell(9, 1, 11, 7, 3)).unwrap();

    let timeout = Duration::from_secs(5);
    let fills: Vec<_> = (0..6)
        .map(|_| engine.responses().recv_timeout(timeout).unwrap())
        .filter(|o| o.trader_id != 9)
        .map(|o| o.trader_id)
        .collect();
    assert_eq!(fills, vec![1, 2, 3]);

    engine.shutdown().unwrap();
}

#[test]
fn test_shutdown_reports_every_partition() {
    let engine = PartitionedEngine::new(config(3)).unwrap();
    for stock in 0..30u32 {
        engine.submit(Order::sell(1, stock, stock, 10, 2)).unwrap();
        engine.submit(Order::buy(2, stock, stock, 12, 1)).unwrap();
        engine.submit(Order::cancel(1, stock, stock)).unwrap();
    }

    let report = engine.shutdown().unwrap();
    assert_eq!(report.stats.len(), 3);
    for stats in &report.stats {
        assert_eq!(stats.processed, 30);
        assert_eq!(stats.cancelled, 10);
    }

    let kinds = |kind: OrderKind| report.drained.iter().filter(|o| o.kind == kind).count();
    assert_eq!(kinds(OrderKind::Partial), 30);
    assert_eq!(kinds(OrderKind::Full), 30);
    assert_eq!(kinds(OrderKind::Cancelled), 30);
    assert_eq!(kinds(OrderKind::Shutdown), 0);
    assert_eq!(report.total().resting, 0);
}

#[test]
fn test_rejections_do_not_stop_the_partition() {
    let engine = PartitionedEngine::new(config(1)).unwrap();
    engine.submit(Order::buy(1, 1, 0, 0, 1)).unwrap();
    engine.submit(Order::buy(1, 2, 0, 5, 0)).unwrap();
    engine.submit(Order::buy(1, 3, 0, 5, 1)).unwrap();
    engine.submit(Order::buy(1, 3, 0, 5, 1)).unwrap();
    engine.submit(Order::sell(2, 1, 0, 5, 1)).unwrap();

    let report = engine.shutdown().unwrap();
    let total = report.total();
    assert_eq!(total.rejected, 3);
    assert_eq!(total.processed, 2);
    assert_eq!(report.drained.len(), 2);
}
