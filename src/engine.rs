use crate::error::{BookError, EngineError};
use crate::matcher::{self, Responses};
use crate::metrics::METRICS;
use crate::orderbook::OrderBook;
use crate::protocol::{Order, OrderKind};
use crate::validation::{OrderValidator, ValidationConfig};
use crossbeam::channel::{Receiver, Sender};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// 单个撮合引擎的配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 每个订单簿 slab 的预分配容量
    pub book_capacity: usize,
    pub validation: ValidationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            book_capacity: 1024,
            validation: ValidationConfig::default(),
        }
    }
}

/// Counters kept by one engine over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Requests that reached a book.
    pub processed: u64,
    /// Requests rejected by validation or by the book.
    pub rejected: u64,
    pub responses: u64,
    /// Completed matches; each one produced two responses.
    pub matches: u64,
    pub cancelled: u64,
    pub not_cancelled: u64,
    /// Orders still resting when the stats were taken.
    pub resting: u64,
}

impl EngineStats {
    pub fn merge(&mut self, other: &EngineStats) {
        self.processed += other.processed;
        self.rejected += other.rejected;
        self.responses += other.responses;
        self.matches += other.matches;
        self.cancelled += other.cancelled;
        self.not_cancelled += other.not_cancelled;
        self.resting += other.resting;
    }
}

// 撮合引擎：持有一个分区内的所有订单簿
pub struct MatchingEngine {
    partition: usize,
    label: String,
    books: HashMap<u32, OrderBook>,
    validator: OrderValidator,
    config: EngineConfig,
    stats: EngineStats,
}

impl MatchingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::for_partition(0, config)
    }

    pub fn for_partition(partition: usize, config: EngineConfig) -> Self {
        MatchingEngine {
            partition,
            label: partition.to_string(),
            books: HashMap::new(),
            validator: OrderValidator::with_config(config.validation.clone()),
            config,
            stats: EngineStats::default(),
        }
    }

    pub fn book(&self, stock_id: u32) -> Option<&OrderBook> {
        self.books.get(&stock_id)
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats;
        stats.resting = self.books.values().map(|b| b.size() as u64).sum();
        stats
    }

    /// Validates and processes one request, returning its responses.
    ///
    /// The book for `order.stock_id` is created on the first BUY or SELL.
    /// A CANCEL for a stock without a book never allocates one. A rejected
    /// request leaves every book untouched.
    pub fn process(&mut self, order: Order) -> Result<Responses, EngineError> {
        METRICS.orders_total.with_label_values(&[order.kind.as_str()]).inc();

        if let Err(e) = self.validator.validate(&order) {
            self.reject(e.to_string(), "invalid");
            return Err(e.into());
        }

        let bookless_cancel =
            order.kind == OrderKind::Cancel && !self.books.contains_key(&order.stock_id);
        let responses = if bookless_cancel {
            // 没有订单簿的股票不可能有挂单
            let mut out = Responses::new();
            out.push(matcher::not_cancelled(&order));
            out
        } else {
            self.process_in_book(order)?
        };

        self.stats.processed += 1;
        self.stats.responses += responses.len() as u64;
        for response in &responses {
            METRICS
                .responses_total
                .with_label_values(&[response.kind.as_str()])
                .inc();
            match response.kind {
                OrderKind::Cancelled => self.stats.cancelled += 1,
                OrderKind::NotCancelled => self.stats.not_cancelled += 1,
                _ => {}
            }
        }
        if order.kind != OrderKind::Cancel {
            self.stats.matches += responses.len() as u64 / 2;
        }

        debug!(
            partition = self.partition,
            kind = order.kind.as_str(),
            stock = order.stock_id,
            responses = responses.len(),
            "processed {:#018x}",
            order.guid()
        );
        Ok(responses)
    }

    fn process_in_book(&mut self, order: Order) -> Result<Responses, EngineError> {
        let capacity = self.config.book_capacity;
        let book = self
            .books
            .entry(order.stock_id)
            .or_insert_with(|| OrderBook::with_capacity(order.stock_id, capacity));

        let responses = match matcher::process(book, order) {
            Ok(responses) => responses,
            Err(e @ BookError::DuplicateOrder(_)) => {
                self.reject(e.to_string(), "duplicate");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let stock = book.stock_id().to_string();
        METRICS
            .orderbook_depth
            .with_label_values(&[stock.as_str(), "buy"])
            .set(book.buy_len() as i64);
        METRICS
            .orderbook_depth
            .with_label_values(&[stock.as_str(), "sell"])
            .set(book.sell_len() as i64);
        Ok(responses)
    }

    fn reject(&mut self, reason: String, label: &str) {
        self.stats.rejected += 1;
        METRICS.rejected_total.with_label_values(&[label]).inc();
        warn!(partition = self.partition, "rejected: {}", reason);
    }

    /// 引擎的主事件循环
    ///
    /// Blocks on `input` until `Shutdown` arrives or every sender is gone.
    /// `Shutdown` is forwarded to `output` before the loop exits. Returns the
    /// final statistics.
    pub fn run(mut self, input: Receiver<Order>, output: Sender<Order>) -> EngineStats {
        info!(partition = self.partition, "matching engine started");

        while let Ok(order) = input.recv() {
            if order.kind == OrderKind::Shutdown {
                if output.send(order).is_err() {
                    warn!(partition = self.partition, "output closed before shutdown was forwarded");
                }
                break;
            }

            let timer = METRICS
                .matching_duration
                .with_label_values(&[self.label.as_str()])
                .start_timer();
            let result = self.process(order);
            timer.observe_duration();

            let responses = match result {
                Ok(responses) => responses,
                Err(EngineError::Book(BookError::Corrupted(violation))) => {
                    panic!("order book corrupted: {}", violation)
                }
                // 已记录日志
                Err(_) => continue,
            };

            for response in responses {
                if output.send(response).is_err() {
                    warn!(partition = self.partition, "output channel closed, stopping");
                    return self.stats();
                }
            }
        }

        let stats = self.stats();
        info!(
            partition = self.partition,
            processed = stats.processed,
            rejected = stats.rejected,
            resting = stats.resting,
            "matching engine stopped"
        );
        stats
    }
}
