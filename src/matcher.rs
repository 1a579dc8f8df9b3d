//! Price-time priority matching over one `OrderBook`.
//!
//! Stateless: everything it needs lives in the book it is handed. Each call
//! resolves one inbound message completely before returning; the loop is
//! bounded because every iteration consumes outstanding amount.
//!
//! Every completed match yields exactly two responses, the resting side first
//! and the incoming side second. Responses are never merged, even when two in
//! a row look identical.

use crate::error::BookError;
use crate::orderbook::OrderBook;
use crate::protocol::{Order, OrderKind, Side};
use smallvec::SmallVec;
use tracing::trace;

/// Responses produced by one inbound message.
pub type Responses = SmallVec<[Order; 8]>;

/// Price a crossing buy and sell trade at.
///
/// A market sell (price 0) takes the buyer's price. Otherwise the midpoint,
/// floored toward the seller.
#[inline]
pub fn execution_price(buy: &Order, sell: &Order) -> i64 {
    if sell.is_market() {
        buy.price
    } else {
        sell.price + ((buy.price - sell.price) >> 1)
    }
}

#[inline]
fn crosses(buy_price: i64, sell_price: i64) -> bool {
    buy_price >= sell_price
}

#[inline]
fn fill_kind(remaining: u32) -> OrderKind {
    if remaining == 0 {
        OrderKind::Full
    } else {
        OrderKind::Partial
    }
}

/// Processes one BUY, SELL or CANCEL against `book`.
///
/// The order must already be validated. Other kinds produce no responses.
pub fn process(book: &mut OrderBook, order: Order) -> Result<Responses, BookError> {
    let mut out = Responses::new();
    match order.side() {
        Some(side) => match_order(book, side, order, &mut out)?,
        None if order.kind == OrderKind::Cancel => cancel(book, order, &mut out),
        None => {}
    }
    Ok(out)
}

/// Matches `incoming` against the opposite side, then rests any leftover.
pub fn match_order(
    book: &mut OrderBook,
    side: Side,
    mut incoming: Order,
    out: &mut Responses,
) -> Result<(), BookError> {
    // 重复的 GUID 在撮合前拒绝，避免先成交后插入失败
    if book.contains(incoming.guid()) {
        return Err(BookError::DuplicateOrder(incoming.guid()));
    }

    let opposite = side.opposite();
    while incoming.amount > 0 {
        let Some(resting) = book.peek(opposite).copied() else {
            break;
        };
        let (buy, sell) = match side {
            Side::Buy => (incoming, resting),
            Side::Sell => (resting, incoming),
        };
        if !crosses(buy.price, sell.price) {
            break;
        }

        let price = execution_price(&buy, &sell);
        let amount = incoming.amount.min(resting.amount);
        incoming.amount -= amount;
        let resting_after = match book.fill_best(opposite, amount) {
            Some(after) => after,
            None => unreachable!("peeked order vanished from book {}", book.stock_id()),
        };

        trace!(
            stock = book.stock_id(),
            buy_price = buy.price,
            sell_price = sell.price,
            price,
            amount,
            "matched {:#018x} against {:#018x}",
            incoming.guid(),
            resting.guid()
        );

        out.push(resting.respond(fill_kind(resting_after.amount), price, amount));
        out.push(incoming.respond(fill_kind(incoming.amount), price, amount));
    }

    if incoming.amount > 0 {
        book.push(side, incoming)?;
    }
    Ok(())
}

/// Removes the order named by a CANCEL request.
///
/// Found: `Cancelled` with the resting price and remaining amount.
/// Absent (never placed, already filled or cancelled): `NotCancelled`
/// echoing the request.
pub fn cancel(book: &mut OrderBook, request: Order, out: &mut Responses) {
    match book.cancel(request.guid()) {
        Some(resting) => {
            out.push(resting.respond(OrderKind::Cancelled, resting.price, resting.amount));
        }
        None => out.push(not_cancelled(&request)),
    }
}

/// `NotCancelled` answer echoing a CANCEL request.
#[inline]
pub fn not_cancelled(request: &Order) -> Order {
    request.respond(OrderKind::NotCancelled, request.price, request.amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(book: &mut OrderBook, order: Order) -> Responses {
        let out = process(book, order).unwrap();
        book.validate().unwrap();
        out
    }

    #[test]
    fn test_execution_price() {
        let price = |buy: i64, sell: i64| {
            execution_price(&Order::buy(1, 1, 1, buy, 1), &Order::sell(2, 1, 1, sell, 1))
        };
        assert_eq!(price(7, 7), 7);
        assert_eq!(price(9, 6), 7);
        // 向卖方取整
        assert_eq!(price(10, 7), 8);
        assert_eq!(price(8, 7), 7);
        assert_eq!(price(42, 0), 42);
    }

    #[test]
    fn test_no_cross_rests() {
        let mut book = OrderBook::new(1);
        assert!(run(&mut book, Order::buy(1, 1, 1, 5, 3)).is_empty());
        assert!(run(&mut book, Order::sell(2, 1, 1, 6, 3)).is_empty());
        assert_eq!(book.size(), 2);
    }

    #[test]
    fn test_incoming_buy_sweeps_levels() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::sell(2, 1, 1, 10, 2));
        run(&mut book, Order::sell(2, 2, 1, 11, 2));
        run(&mut book, Order::sell(2, 3, 1, 13, 2));

        let out = run(&mut book, Order::buy(1, 1, 1, 12, 5));
        let kinds: Vec<_> = out.iter().map(|o| (o.kind, o.trade_id, o.price, o.amount)).collect();
        assert_eq!(
            kinds,
            vec![
                (OrderKind::Full, 1, 11, 2),
                (OrderKind::Partial, 1, 11, 2),
                (OrderKind::Full, 2, 11, 2),
                (OrderKind::Partial, 1, 11, 2),
            ]
        );
        // 剩余 1 以 12 挂买单，13 的卖单不交叉
        assert_eq!(book.peek_buy().map(|o| (o.price, o.amount)), Some((12, 1)));
        assert_eq!(book.best_sell_price(), Some(13));
    }

    #[test]
    fn test_incoming_sell_takes_highest_buy_first() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::buy(1, 1, 1, 8, 1));
        run(&mut book, Order::buy(1, 2, 1, 10, 1));

        let out = run(&mut book, Order::sell(2, 1, 1, 8, 1));
        assert_eq!(out[0].trade_id, 2);
        assert_eq!(out[0].price, 9);
        assert_eq!(book.best_buy_price(), Some(8));
    }

    #[test]
    fn test_resting_market_sell_executes_at_buy_price() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::sell(2, 1, 1, 0, 4));

        let out = run(&mut book, Order::buy(1, 1, 1, 15, 3));
        assert_eq!(out[0].kind, OrderKind::Partial);
        assert_eq!(out[0].price, 15);
        assert_eq!(out[1].kind, OrderKind::Full);
        assert_eq!(book.peek_sell().map(|o| o.amount), Some(1));
    }

    #[test]
    fn test_incoming_market_sell_rests_at_zero() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::buy(1, 1, 1, 20, 1));

        let out = run(&mut book, Order::sell(2, 1, 1, 0, 3));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].price, 20);
        assert_eq!(out[1].kind, OrderKind::Partial);
        assert_eq!(book.peek_sell().map(|o| (o.price, o.amount)), Some((0, 2)));
    }

    #[test]
    fn test_cancel_found_reports_remaining() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::buy(1, 1, 1, 9, 10));
        run(&mut book, Order::sell(2, 1, 1, 9, 4));

        let out = run(&mut book, Order::cancel(1, 1, 1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, OrderKind::Cancelled);
        assert_eq!((out[0].price, out[0].amount), (9, 6));
        assert!(book.is_empty());
    }

    #[test]
    fn test_cancel_after_full_fill_is_not_cancelled() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::buy(1, 1, 1, 9, 1));
        run(&mut book, Order::sell(2, 1, 1, 9, 1));

        let out = run(&mut book, Order::cancel(1, 1, 1));
        assert_eq!(out[0].kind, OrderKind::NotCancelled);
        assert_eq!(out[0].guid(), Order::cancel(1, 1, 1).guid());
    }

    #[test]
    fn test_duplicate_guid_rejected_before_matching() {
        let mut book = OrderBook::new(1);
        run(&mut book, Order::buy(1, 1, 1, 5, 1));
        run(&mut book, Order::sell(2, 1, 1, 9, 1));

        let dup = Order::buy(1, 1, 1, 9, 1);
        assert_eq!(process(&mut book, dup), Err(BookError::DuplicateOrder(dup.guid())));
        // 卖单没有被动过
        assert_eq!(book.peek_sell().map(|o| o.amount), Some(1));
    }

    #[test]
    fn test_every_match_yields_two_responses() {
        let mut book = OrderBook::new(1);
        for t in 1..=5 {
            run(&mut book, Order::sell(2, t, 1, 10 + t as i64, 1));
        }
        let out = run(&mut book, Order::buy(1, 1, 1, 100, 3));
        assert_eq!(out.len(), 6);
        for pair in out.chunks(2) {
            assert_eq!(pair[0].trader_id, 2);
            assert_eq!(pair[1].trader_id, 1);
            assert_eq!(pair[0].price, pair[1].price);
            assert_eq!(pair[0].amount, pair[1].amount);
        }
    }
}
