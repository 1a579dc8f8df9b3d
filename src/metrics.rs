//! Prometheus Metrics Module
//!
//! 撮合引擎的核心指标
//!
//! ## 指标类型
//! - **Counter**: 按类型统计的请求数、回报数、拒单数
//! - **Histogram**: 单条消息的撮合延迟
//! - **Gauge**: 每个股票的订单簿深度
//!
//! ## 使用示例
//! ```rust,ignore
//! use toy_exchange::metrics::METRICS;
//!
//! METRICS.orders_total.with_label_values(&["buy"]).inc();
//!
//! let timer = METRICS.matching_duration.with_label_values(&["0"]).start_timer();
//! // ... 执行撮合 ...
//! timer.observe_duration();
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    /// 全局Metrics实例
    pub static ref METRICS: Metrics = Metrics::new();
}

/// 撮合引擎核心指标
pub struct Metrics {
    /// 收到的请求数 (buy/sell/cancel)
    pub orders_total: IntCounterVec,

    /// 发出的回报数 (partial/full/cancelled/not_cancelled)
    pub responses_total: IntCounterVec,

    /// 拒单数 (按原因)
    pub rejected_total: IntCounterVec,

    /// 撮合延迟分布 (秒), 按分区
    pub matching_duration: HistogramVec,

    /// 订单簿深度 (按股票和方向)
    pub orderbook_depth: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            orders_total: register_int_counter_vec!(
                "toy_exchange_orders_total",
                "Total number of requests received",
                &["kind"]
            )
            .unwrap(),

            responses_total: register_int_counter_vec!(
                "toy_exchange_responses_total",
                "Total number of responses emitted",
                &["kind"]
            )
            .unwrap(),

            rejected_total: register_int_counter_vec!(
                "toy_exchange_rejected_total",
                "Total number of rejected requests",
                &["reason"]
            )
            .unwrap(),

            matching_duration: register_histogram_vec!(
                "toy_exchange_matching_duration_seconds",
                "Time to process one request",
                &["partition"],
                vec![1e-7, 5e-7, 1e-6, 5e-6, 1e-5, 5e-5, 1e-4, 1e-3]
            )
            .unwrap(),

            orderbook_depth: register_int_gauge_vec!(
                "toy_exchange_orderbook_depth",
                "Resting orders per stock and side",
                &["stock", "side"]
            )
            .unwrap(),
        }
    }

    /// 导出Prometheus文本格式
    pub fn export(&self) -> String {
        gather()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("metrics encode failed: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_exported() {
        METRICS.orders_total.with_label_values(&["buy"]).inc();
        METRICS.responses_total.with_label_values(&["full"]).inc_by(2);

        let output = METRICS.export();
        assert!(output.contains("toy_exchange_orders_total"));
        assert!(output.contains("toy_exchange_responses_total"));
    }

    #[test]
    fn test_histogram_exported() {
        METRICS
            .matching_duration
            .with_label_values(&["test"])
            .observe(2e-6);

        assert!(gather().contains("toy_exchange_matching_duration_seconds"));
    }

    #[test]
    fn test_depth_gauge() {
        let gauge = METRICS.orderbook_depth.with_label_values(&["424242", "buy"]);
        gauge.set(7);
        assert_eq!(gauge.get(), 7);
        assert!(gather().contains("toy_exchange_orderbook_depth"));
    }
}
