/// Order Validator - Application Message Validation
///
/// Rejects malformed application messages before they reach a book, so the
/// matcher never inserts an order it could not legally match.
///
/// ## Validation Rules
/// - Only BUY, SELL and CANCEL reach the matcher
/// - BUY/SELL amount must be positive
/// - Prices must not be negative; a BUY must not be at market (price 0)
/// - Price and amount must not exceed the configured limits
use crate::protocol::{Order, OrderKind, Side};
use thiserror::Error;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Buy-side market orders are not supported
    #[error("buy order {0:#018x} has market price 0")]
    MarketBuy(u64),

    #[error("order {guid:#018x} has negative price {price}")]
    NegativePrice { guid: u64, price: i64 },

    #[error("order {0:#018x} has zero amount")]
    ZeroAmount(u64),

    #[error("price {price} exceeds maximum {max}")]
    PriceOutOfRange { price: i64, max: i64 },

    #[error("amount {amount} exceeds maximum {max}")]
    AmountOutOfRange { amount: u32, max: u32 },

    /// Responses and control messages are not requests
    #[error("{0:?} is not an order request")]
    UnexpectedKind(OrderKind),
}

/// Order validation configuration
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum price (inclusive)
    pub max_price: i64,

    /// Maximum amount (inclusive)
    pub max_amount: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_price: i64::MAX,
            max_amount: u32::MAX,
        }
    }
}

/// Order validator
#[derive(Debug, Clone, Default)]
pub struct OrderValidator {
    config: ValidationConfig,
}

impl OrderValidator {
    /// Creates a new validator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new validator with custom configuration
    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validates an inbound request
    ///
    /// CANCEL only needs its identity, so price and amount are not checked.
    pub fn validate(&self, order: &Order) -> Result<(), ValidationError> {
        if !order.kind.is_request() {
            return Err(ValidationError::UnexpectedKind(order.kind));
        }
        match order.side() {
            Some(side) => {
                self.validate_price(order, side)?;
                self.validate_amount(order)
            }
            None => Ok(()),
        }
    }

    fn validate_price(&self, order: &Order, side: Side) -> Result<(), ValidationError> {
        if order.price < 0 {
            return Err(ValidationError::NegativePrice {
                guid: order.guid(),
                price: order.price,
            });
        }

        if side == Side::Buy && order.price == 0 {
            return Err(ValidationError::MarketBuy(order.guid()));
        }

        if order.price > self.config.max_price {
            return Err(ValidationError::PriceOutOfRange {
                price: order.price,
                max: self.config.max_price,
            });
        }

        Ok(())
    }

    fn validate_amount(&self, order: &Order) -> Result<(), ValidationError> {
        if order.amount == 0 {
            return Err(ValidationError::ZeroAmount(order.guid()));
        }

        if order.amount > self.config.max_amount {
            return Err(ValidationError::AmountOutOfRange {
                amount: order.amount,
                max: self.config.max_amount,
            });
        }

        Ok(())
    }
}
