use crate::error::BookError;
use crate::protocol::{Guid, Order, OrderKind, Side};
use crate::rbtree::{Node, RbTree, TreeIndex};
use crate::slab::{Handle, Slab};

// 订单簿中的一个订单：同时挂在价格树和ID树上
#[derive(Debug, Clone)]
pub struct RestingOrder {
    order: Order,
    // 价格树节点，同价位按到达顺序排队
    by_price: Node<i64>,
    // ID树节点，用于按 GUID 撤单
    by_guid: Node<Guid>,
}

impl RestingOrder {
    pub fn order(&self) -> &Order {
        &self.order
    }
}

/// Price index (one tree per side).
pub struct ByPrice;

impl TreeIndex<RestingOrder> for ByPrice {
    type Key = i64;

    #[inline]
    fn node(item: &RestingOrder) -> &Node<i64> {
        &item.by_price
    }

    #[inline]
    fn node_mut(item: &mut RestingOrder) -> &mut Node<i64> {
        &mut item.by_price
    }
}

/// Identity index shared by both sides.
pub struct ByGuid;

impl TreeIndex<RestingOrder> for ByGuid {
    type Key = Guid;

    #[inline]
    fn node(item: &RestingOrder) -> &Node<Guid> {
        &item.by_guid
    }

    #[inline]
    fn node_mut(item: &mut RestingOrder) -> &mut Node<Guid> {
        &mut item.by_guid
    }
}

// 订单簿核心结构
#[derive(Clone)]
pub struct OrderBook {
    stock_id: u32,
    // 订单池，所有订单实体都存放在这里
    orders: Slab<RestingOrder>,
    // 买单侧，最优价为最高价
    buys: RbTree<RestingOrder, ByPrice>,
    // 卖单侧，最优价为最低价（市价卖单价格为0，总是最优）
    sells: RbTree<RestingOrder, ByPrice>,
    // 两侧共用的 GUID 索引
    ids: RbTree<RestingOrder, ByGuid>,
}

impl OrderBook {
    pub fn new(stock_id: u32) -> Self {
        Self::with_capacity(stock_id, 0)
    }

    /// Book whose order pool is pre-sized for `capacity` resting orders.
    pub fn with_capacity(stock_id: u32, capacity: usize) -> Self {
        OrderBook {
            stock_id,
            orders: Slab::with_capacity(capacity),
            buys: RbTree::new(),
            sells: RbTree::new(),
            ids: RbTree::new(),
        }
    }

    pub fn stock_id(&self) -> u32 {
        self.stock_id
    }

    /// Resting orders on both sides.
    #[inline]
    pub fn size(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn buy_len(&self) -> usize {
        self.buys.len()
    }

    pub fn sell_len(&self) -> usize {
        self.sells.len()
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.ids.find(&self.orders, guid).is_some()
    }

    pub fn get(&self, guid: Guid) -> Option<&Order> {
        self.ids.find(&self.orders, guid).map(|h| &self.orders[h].order)
    }

    pub fn push_buy(&mut self, order: Order) -> Result<(), BookError> {
        self.push(Side::Buy, order)
    }

    pub fn push_sell(&mut self, order: Order) -> Result<(), BookError> {
        self.push(Side::Sell, order)
    }

    /// Rests `order` on `side`, behind any order already at its price.
    pub fn push(&mut self, side: Side, mut order: Order) -> Result<(), BookError> {
        let guid = order.guid();
        if self.contains(guid) {
            return Err(BookError::DuplicateOrder(guid));
        }
        order.kind = match side {
            Side::Buy => OrderKind::Buy,
            Side::Sell => OrderKind::Sell,
        };

        let handle = self.orders.insert_with(|h| RestingOrder {
            order,
            by_price: Node::new(order.price, h),
            by_guid: Node::new(guid, h),
        });
        match side {
            Side::Buy => self.buys.push(&mut self.orders, handle),
            Side::Sell => self.sells.push(&mut self.orders, handle),
        }
        self.ids.push(&mut self.orders, handle);
        Ok(())
    }

    pub fn peek_buy(&self) -> Option<&Order> {
        self.best(Side::Buy).map(|h| &self.orders[h].order)
    }

    pub fn peek_sell(&self) -> Option<&Order> {
        self.best(Side::Sell).map(|h| &self.orders[h].order)
    }

    pub fn peek(&self, side: Side) -> Option<&Order> {
        self.best(side).map(|h| &self.orders[h].order)
    }

    pub fn best_buy_price(&self) -> Option<i64> {
        self.peek_buy().map(|o| o.price)
    }

    pub fn best_sell_price(&self) -> Option<i64> {
        self.peek_sell().map(|o| o.price)
    }

    pub fn pop_buy(&mut self) -> Option<Order> {
        self.pop(Side::Buy)
    }

    pub fn pop_sell(&mut self) -> Option<Order> {
        self.pop(Side::Sell)
    }

    /// Removes the best order on `side`.
    pub fn pop(&mut self, side: Side) -> Option<Order> {
        let handle = self.best(side)?;
        Some(self.detach(side, handle))
    }

    /// Removes the order with `guid` from whichever side holds it.
    pub fn cancel(&mut self, guid: Guid) -> Option<Order> {
        let handle = self.ids.find(&self.orders, guid)?;
        let side = self.side_of(handle);
        Some(self.detach(side, handle))
    }

    /// Takes `amount` off the best order on `side` and returns that order as
    /// it stands afterwards. An order reaching zero leaves the book.
    ///
    /// Panics if `amount` exceeds what rests: amounts never go negative.
    pub fn fill_best(&mut self, side: Side, amount: u32) -> Option<Order> {
        let handle = self.best(side)?;
        let order = &mut self.orders[handle].order;
        assert!(
            amount <= order.amount,
            "fill of {} exceeds resting amount {} of order {:#018x}",
            amount,
            order.amount,
            order.guid()
        );
        order.amount -= amount;
        let after = *order;
        if after.amount == 0 {
            self.detach(side, handle);
        }
        Some(after)
    }

    /// Orders on `side`, best first.
    pub fn orders(&self, side: Side) -> Vec<Order> {
        let tree = self.side(side);
        let mut heads = tree.heads(&self.orders);
        if side == Side::Buy {
            heads.reverse();
        }
        heads
            .into_iter()
            .flat_map(|head| tree.fifo(&self.orders, head))
            .map(|h| self.orders[h].order)
            .collect()
    }

    /// Full structural check of all three trees and their agreement.
    pub fn validate(&self) -> Result<(), BookError> {
        self.buys.verify(&self.orders)?;
        self.sells.verify(&self.orders)?;
        self.ids.verify(&self.orders)?;

        if self.ids.len() != self.orders.len() || self.buys.len() + self.sells.len() != self.orders.len() {
            return Err(BookError::Inconsistent(format!(
                "{} orders, {} buys, {} sells, {} ids",
                self.orders.len(),
                self.buys.len(),
                self.sells.len(),
                self.ids.len()
            )));
        }

        let mut buys = 0;
        for (handle, resting) in self.orders.iter() {
            let order = &resting.order;
            if !resting.by_price.is_linked() || !resting.by_guid.is_linked() {
                return Err(BookError::Inconsistent(format!("{:?} is missing an index", handle)));
            }
            if resting.by_price.key() != order.price || resting.by_guid.key() != order.guid() {
                return Err(BookError::Inconsistent(format!("{:?} keys disagree with its order", handle)));
            }
            if order.amount == 0 {
                return Err(BookError::Inconsistent(format!("{:?} rests with zero amount", handle)));
            }
            match order.kind {
                OrderKind::Buy => buys += 1,
                OrderKind::Sell => {}
                other => {
                    return Err(BookError::Inconsistent(format!("{:?} rests as {:?}", handle, other)));
                }
            }
        }
        if buys != self.buys.len() {
            return Err(BookError::Inconsistent(format!(
                "{} resting buys but buy tree holds {}",
                buys,
                self.buys.len()
            )));
        }
        Ok(())
    }

    fn side(&self, side: Side) -> &RbTree<RestingOrder, ByPrice> {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    fn best(&self, side: Side) -> Option<Handle> {
        match side {
            Side::Buy => self.buys.peek_max(&self.orders),
            Side::Sell => self.sells.peek_min(&self.orders),
        }
    }

    fn side_of(&self, handle: Handle) -> Side {
        match self.orders[handle].order.kind {
            OrderKind::Buy => Side::Buy,
            OrderKind::Sell => Side::Sell,
            other => panic!("order book corrupted: {:?} rests as {:?}", handle, other),
        }
    }

    // 从两棵树中同时摘除，再释放订单池槽位
    fn detach(&mut self, side: Side, handle: Handle) -> Order {
        match side {
            Side::Buy => self.buys.remove(&mut self.orders, handle),
            Side::Sell => self.sells.remove(&mut self.orders, handle),
        }
        self.ids.remove(&mut self.orders, handle);
        self.orders.remove(handle).order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::guid;
    use proptest::prelude::*;

    fn buy(trade: u32, price: i64, amount: u32) -> Order {
        Order::buy(1, trade, 1, price, amount)
    }

    fn sell(trade: u32, price: i64, amount: u32) -> Order {
        Order::sell(2, trade, 1, price, amount)
    }

    #[test]
    fn test_empty_book() {
        let mut book = OrderBook::new(1);
        assert_eq!(book.size(), 0);
        assert!(book.peek_buy().is_none());
        assert!(book.peek_sell().is_none());
        assert!(book.pop_buy().is_none());
        assert!(book.cancel(guid(1, 1)).is_none());
        book.validate().unwrap();
    }

    #[test]
    fn test_best_buy_is_highest_best_sell_is_lowest() {
        let mut book = OrderBook::with_capacity(1, 16);
        for (t, p) in [(1, 7), (2, 9), (3, 8)] {
            book.push_buy(buy(t, p, 1)).unwrap();
        }
        for (t, p) in [(1, 12), (2, 10), (3, 11)] {
            book.push_sell(sell(t, p, 1)).unwrap();
        }

        assert_eq!(book.best_buy_price(), Some(9));
        assert_eq!(book.best_sell_price(), Some(10));
        assert_eq!(book.size(), 6);
        assert_eq!((book.buy_len(), book.sell_len()), (3, 3));
        book.validate().unwrap();
    }

    #[test]
    fn test_market_sell_sorts_first() {
        let mut book = OrderBook::new(1);
        book.push_sell(sell(1, 5, 1)).unwrap();
        book.push_sell(sell(2, 0, 1)).unwrap();
        assert_eq!(book.peek_sell().unwrap().trade_id, 2);
    }

    #[test]
    fn test_same_price_is_fifo() {
        let mut book = OrderBook::new(1);
        for t in 1..=3 {
            book.push_buy(buy(t, 7, 1)).unwrap();
        }
        let order: Vec<u32> = std::iter::from_fn(|| book.pop_buy()).map(|o| o.trade_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(book.is_empty());
        book.validate().unwrap();
    }

    #[test]
    fn test_cancel_twice() {
        let mut book = OrderBook::new(1);
        let order = sell(1, 7, 1);
        book.push_sell(order).unwrap();

        assert_eq!(book.cancel(order.guid()), Some(order));
        assert_eq!(book.cancel(order.guid()), None);
        assert!(book.is_empty());
        book.validate().unwrap();
    }

    #[test]
    fn test_cancel_from_middle_of_price_level() {
        let mut book = OrderBook::new(1);
        for t in 1..=3 {
            book.push_buy(buy(t, 7, 1)).unwrap();
        }
        assert!(book.cancel(guid(1, 2)).is_some());
        book.validate().unwrap();

        let left: Vec<u32> = book.orders(Side::Buy).iter().map(|o| o.trade_id).collect();
        assert_eq!(left, vec![1, 3]);
    }

    #[test]
    fn test_cancel_head_keeps_time_priority() {
        let mut book = OrderBook::new(1);
        for t in 1..=3 {
            book.push_sell(sell(t, 7, 1)).unwrap();
        }
        book.push_sell(sell(4, 6, 1)).unwrap();
        book.push_sell(sell(5, 8, 1)).unwrap();

        book.cancel(guid(2, 1)).unwrap();
        book.validate().unwrap();
        let left: Vec<u32> = book.orders(Side::Sell).iter().map(|o| o.trade_id).collect();
        assert_eq!(left, vec![4, 2, 3, 5]);
    }

    #[test]
    fn test_push_then_cancel_restores_book() {
        let mut book = OrderBook::new(1);
        book.push_buy(buy(1, 5, 3)).unwrap();
        book.push_sell(sell(1, 9, 3)).unwrap();
        let before_buys = book.orders(Side::Buy);
        let before_sells = book.orders(Side::Sell);

        let extra = buy(2, 5, 4);
        book.push_buy(extra).unwrap();
        assert_eq!(book.cancel(extra.guid()), Some(extra));

        assert_eq!(book.size(), 2);
        assert_eq!(book.orders(Side::Buy), before_buys);
        assert_eq!(book.orders(Side::Sell), before_sells);
        book.validate().unwrap();
    }

    #[test]
    fn test_duplicate_guid_rejected() {
        let mut book = OrderBook::new(1);
        book.push_buy(buy(1, 5, 1)).unwrap();
        let dup = Order::sell(1, 1, 1, 9, 1);
        assert_eq!(book.push_sell(dup), Err(BookError::DuplicateOrder(dup.guid())));
        assert_eq!(book.size(), 1);
    }

    #[test]
    fn test_fill_best_partial_then_full() {
        let mut book = OrderBook::new(1);
        book.push_buy(buy(1, 7, 5)).unwrap();
        book.push_buy(buy(2, 7, 5)).unwrap();

        let after = book.fill_best(Side::Buy, 2).unwrap();
        assert_eq!((after.trade_id, after.amount), (1, 3));
        assert_eq!(book.peek_buy().unwrap().amount, 3);

        let after = book.fill_best(Side::Buy, 3).unwrap();
        assert_eq!(after.amount, 0);
        assert!(!book.contains(guid(1, 1)));
        assert_eq!(book.peek_buy().unwrap().trade_id, 2);
        book.validate().unwrap();
    }

    #[test]
    #[should_panic(expected = "exceeds resting amount")]
    fn test_overfill_panics() {
        let mut book = OrderBook::new(1);
        book.push_sell(sell(1, 7, 1)).unwrap();
        book.fill_best(Side::Sell, 2);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut book = OrderBook::with_capacity(1, 4);
        book.push_buy(buy(0, 5, 1)).unwrap();
        let first: Vec<_> = book.orders.iter().map(|(h, _)| h).collect();
        book.pop_buy().unwrap();
        for round in 1..100u32 {
            book.push_buy(buy(round, 5, 1)).unwrap();
            let slots: Vec<_> = book.orders.iter().map(|(h, _)| h).collect();
            assert_eq!(slots, first);
            book.pop_buy().unwrap();
        }
        assert!(book.orders.is_empty());
    }

    #[test]
    fn test_every_order_has_both_nodes() {
        let mut book = OrderBook::new(1);
        for t in 0..20 {
            book.push_buy(buy(t, (t % 4) as i64, 1)).unwrap();
            book.push_sell(sell(t, 10 + (t % 3) as i64, 1)).unwrap();
        }
        for (h, resting) in book.orders.iter() {
            assert!(resting.by_price.is_linked());
            assert!(resting.by_guid.is_linked());
            // GUID 唯一，所以 ID 树查到的一定是同一个槽位
            assert_eq!(book.ids.find(&book.orders, resting.order.guid()), Some(h));
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Buy(u8, u8),
        Sell(u8, u8),
        PopBuy,
        PopSell,
        Cancel(u8),
        Fill(bool, u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u8..10, 1u8..5).prop_map(|(p, a)| Op::Buy(p, a)),
            3 => (0u8..10, 1u8..5).prop_map(|(p, a)| Op::Sell(p, a)),
            1 => Just(Op::PopBuy),
            1 => Just(Op::PopSell),
            2 => any::<u8>().prop_map(Op::Cancel),
            2 => (any::<bool>(), 1u8..5).prop_map(|(b, a)| Op::Fill(b, a)),
        ]
    }

    proptest! {
        #[test]
        fn prop_book_stays_consistent(ops in prop::collection::vec(op(), 1..150)) {
            let mut book = OrderBook::new(1);
            let mut next_trade = 0u32;

            for op in ops {
                match op {
                    Op::Buy(p, a) => {
                        next_trade += 1;
                        book.push_buy(buy(next_trade, p as i64, a as u32)).unwrap();
                    }
                    Op::Sell(p, a) => {
                        next_trade += 1;
                        book.push_sell(sell(next_trade, p as i64, a as u32)).unwrap();
                    }
                    Op::PopBuy => {
                        let best = book.best_buy_price();
                        prop_assert_eq!(book.pop_buy().map(|o| o.price), best);
                    }
                    Op::PopSell => {
                        let best = book.best_sell_price();
                        prop_assert_eq!(book.pop_sell().map(|o| o.price), best);
                    }
                    Op::Cancel(t) => {
                        let t = t as u32 % (next_trade + 1);
                        let before = book.size();
                        let hit = book.cancel(guid(1, t)).is_some();
                        prop_assert_eq!(book.size(), before - usize::from(hit));
                        prop_assert!(book.cancel(guid(1, t)).is_none());
                    }
                    Op::Fill(is_buy, a) => {
                        let side = if is_buy { Side::Buy } else { Side::Sell };
                        if let Some(best) = book.peek(side).copied() {
                            let amount = (a as u32).min(best.amount);
                            let after = book.fill_best(side, amount).unwrap();
                            prop_assert_eq!(after.amount, best.amount - amount);
                        }
                    }
                }
                prop_assert!(book.validate().is_ok());
                let buys = book.orders(Side::Buy);
                let sells = book.orders(Side::Sell);
                prop_assert!(buys.windows(2).all(|w| w[0].price >= w[1].price));
                prop_assert!(sells.windows(2).all(|w| w[0].price <= w[1].price));
                prop_assert_eq!(buys.len() + sells.len(), book.size());
            }
        }
    }
}
