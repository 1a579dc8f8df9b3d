use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// 64-bit order identity: trader id in the high half, trade id in the low half.
pub type Guid = u64;

/// Combines a trader id and a trade id into the order's GUID.
#[inline]
pub const fn guid(trader_id: u32, trade_id: u32) -> Guid {
    ((trader_id as u64) << 32) | trade_id as u64
}

/// Message kind.
///
/// `Buy`, `Sell` and `Cancel` arrive from upstream, `Shutdown` is the control
/// sentinel, the rest are responses. The variant order is the wire
/// discriminant and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum OrderKind {
    Shutdown,
    Buy,
    Sell,
    Cancel,
    Partial,
    Full,
    Cancelled,
    NotCancelled,
}

impl OrderKind {
    /// Inbound request kinds the matcher accepts.
    pub fn is_request(self) -> bool {
        matches!(self, OrderKind::Buy | OrderKind::Sell | OrderKind::Cancel)
    }

    pub fn is_response(self) -> bool {
        matches!(
            self,
            OrderKind::Partial | OrderKind::Full | OrderKind::Cancelled | OrderKind::NotCancelled
        )
    }

    /// Lower-case label, used for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderKind::Shutdown => "shutdown",
            OrderKind::Buy => "buy",
            OrderKind::Sell => "sell",
            OrderKind::Cancel => "cancel",
            OrderKind::Partial => "partial",
            OrderKind::Full => "full",
            OrderKind::Cancelled => "cancelled",
            OrderKind::NotCancelled => "not_cancelled",
        }
    }
}

/// Book side of a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// A single order, cancel, control or response record.
///
/// `price` is signed; a sell at price 0 is a market order. `amount` is the
/// outstanding amount and only ever decreases while the order rests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Order {
    pub kind: OrderKind,
    pub price: i64,
    pub amount: u32,
    pub stock_id: u32,
    pub trader_id: u32,
    pub trade_id: u32,
}

impl Order {
    pub fn buy(trader_id: u32, trade_id: u32, stock_id: u32, price: i64, amount: u32) -> Self {
        Self {
            kind: OrderKind::Buy,
            price,
            amount,
            stock_id,
            trader_id,
            trade_id,
        }
    }

    pub fn sell(trader_id: u32, trade_id: u32, stock_id: u32, price: i64, amount: u32) -> Self {
        Self {
            kind: OrderKind::Sell,
            price,
            amount,
            stock_id,
            trader_id,
            trade_id,
        }
    }

    /// Cancel request for the order identified by `(trader_id, trade_id)`.
    pub fn cancel(trader_id: u32, trade_id: u32, stock_id: u32) -> Self {
        Self {
            kind: OrderKind::Cancel,
            price: 0,
            amount: 0,
            stock_id,
            trader_id,
            trade_id,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            kind: OrderKind::Shutdown,
            price: 0,
            amount: 0,
            stock_id: 0,
            trader_id: 0,
            trade_id: 0,
        }
    }

    #[inline]
    pub fn guid(&self) -> Guid {
        guid(self.trader_id, self.trade_id)
    }

    /// Book side for a BUY/SELL, `None` for any other kind.
    pub fn side(&self) -> Option<Side> {
        match self.kind {
            OrderKind::Buy => Some(Side::Buy),
            OrderKind::Sell => Some(Side::Sell),
            _ => None,
        }
    }

    /// A sell with price 0 executes at the counter-party buy's price.
    #[inline]
    pub fn is_market(&self) -> bool {
        self.kind == OrderKind::Sell && self.price == 0
    }

    /// Copy of this order re-tagged as a response of `kind`.
    pub fn respond(&self, kind: OrderKind, price: i64, amount: u32) -> Self {
        Self {
            kind,
            price,
            amount,
            ..*self
        }
    }
}
