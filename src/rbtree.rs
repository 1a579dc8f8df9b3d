//! Red-black tree threaded through slab slots
//!
//! Every element lives in a `Slab<T>` slot and embeds one `Node` per index
//! it belongs to; `TreeIndex` tells a tree which embedded node is its own.
//! That lets two trees (by price, by identity) share the same order records
//! while each keeps its own links.
//!
//! Elements with an equal key do not get their own tree slot: the first one
//! sits in the tree and the rest queue behind it on a circular doubly-linked
//! list in arrival order. Peeks return the head of that list, which gives
//! time priority within a key.
//!
//! Callers keep handles to nodes, so deletion never copies keys between
//! nodes; it splices the successor node itself into place. A parent that does
//! not point back at its child means the book is corrupted and we panic.

use crate::slab::{Handle, Slab};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Detached,
    /// Occupies a tree slot and heads its key's FIFO.
    Tree,
    /// Waits behind the tree node holding the same key.
    Queued,
}

/// Tree links embedded in an element.
#[derive(Debug, Clone)]
pub struct Node<K> {
    key: K,
    color: Color,
    parent: Option<Handle>,
    left: Option<Handle>,
    right: Option<Handle>,
    // 同价位订单的循环双向链表
    next: Handle,
    prev: Handle,
    placement: Placement,
}

impl<K: Copy> Node<K> {
    /// Detached node for the element stored at `home`.
    pub fn new(key: K, home: Handle) -> Self {
        Self {
            key,
            color: Color::Red,
            parent: None,
            left: None,
            right: None,
            next: home,
            prev: home,
            placement: Placement::Detached,
        }
    }

    #[inline]
    pub fn key(&self) -> K {
        self.key
    }

    pub fn is_linked(&self) -> bool {
        self.placement != Placement::Detached
    }

    /// True when this node owns a tree slot rather than queueing behind one.
    pub fn in_tree(&self) -> bool {
        self.placement == Placement::Tree
    }

    fn reset(&mut self, home: Handle) {
        self.color = Color::Red;
        self.parent = None;
        self.left = None;
        self.right = None;
        self.next = home;
        self.prev = home;
        self.placement = Placement::Detached;
    }
}

/// Selects which embedded `Node` of `T` a tree operates on.
pub trait TreeIndex<T> {
    type Key: Ord + Copy + fmt::Debug;

    fn node(item: &T) -> &Node<Self::Key>;
    fn node_mut(item: &mut T) -> &mut Node<Self::Key>;
}

/// Structural defect found by `RbTree::verify`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeViolation {
    #[error("root {0:?} is red")]
    RedRoot(Handle),
    #[error("root {0:?} has a parent")]
    RootHasParent(Handle),
    #[error("red node {0:?} has a red child")]
    RedRed(Handle),
    #[error("black height differs below {node:?}: {left} vs {right}")]
    BlackHeight { node: Handle, left: usize, right: usize },
    #[error("child {child:?} does not point back at parent {parent:?}")]
    BrokenParent { parent: Handle, child: Handle },
    #[error("key order violated at {0:?}")]
    KeyOrder(Handle),
    #[error("node {0:?} is reachable but not marked as a tree node")]
    Placement(Handle),
    #[error("FIFO list through {0:?} is corrupted")]
    Fifo(Handle),
    #[error("tree holds {found} elements but records {recorded}")]
    Length { found: usize, recorded: usize },
}

/// One red-black index over elements stored in a `Slab<T>`.
pub struct RbTree<T, I> {
    root: Option<Handle>,
    len: usize,
    _index: PhantomData<fn(&T) -> I>,
}

impl<T, I> Clone for RbTree<T, I> {
    fn clone(&self) -> Self {
        Self {
            root: self.root,
            len: self.len,
            _index: PhantomData,
        }
    }
}

impl<T, I: TreeIndex<T>> Default for RbTree<T, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, I: TreeIndex<T>> RbTree<T, I> {
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            _index: PhantomData,
        }
    }

    /// Elements indexed, queued ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<Handle> {
        self.root
    }

    // ---- node access ----

    #[inline]
    fn node<'a>(arena: &'a Slab<T>, h: Handle) -> &'a Node<I::Key> {
        I::node(&arena[h])
    }

    #[inline]
    fn node_mut(arena: &mut Slab<T>, h: Handle) -> &mut Node<I::Key> {
        I::node_mut(&mut arena[h])
    }

    #[inline]
    fn parent(arena: &Slab<T>, h: Handle) -> Option<Handle> {
        Self::node(arena, h).parent
    }

    #[inline]
    fn left(arena: &Slab<T>, h: Handle) -> Option<Handle> {
        Self::node(arena, h).left
    }

    #[inline]
    fn right(arena: &Slab<T>, h: Handle) -> Option<Handle> {
        Self::node(arena, h).right
    }

    #[inline]
    fn is_red(arena: &Slab<T>, h: Option<Handle>) -> bool {
        h.is_some_and(|h| Self::node(arena, h).color == Color::Red)
    }

    #[inline]
    fn set_color(arena: &mut Slab<T>, h: Option<Handle>, color: Color) {
        if let Some(h) = h {
            Self::node_mut(arena, h).color = color;
        }
    }

    #[inline]
    fn set_parent(arena: &mut Slab<T>, h: Option<Handle>, parent: Option<Handle>) {
        if let Some(h) = h {
            Self::node_mut(arena, h).parent = parent;
        }
    }

    /// Points whichever slot held `old` (root or a child slot of `parent`)
    /// at `new`.
    fn replace_child(
        &mut self,
        arena: &mut Slab<T>,
        parent: Option<Handle>,
        old: Handle,
        new: Option<Handle>,
    ) {
        match parent {
            None => {
                if self.root != Some(old) {
                    panic!("order book corrupted: {:?} has no parent but is not the root", old);
                }
                self.root = new;
            }
            Some(p) => {
                let pn = Self::node_mut(arena, p);
                if pn.left == Some(old) {
                    pn.left = new;
                } else if pn.right == Some(old) {
                    pn.right = new;
                } else {
                    panic!("order book corrupted: dangling back-pointer from {:?} to parent {:?}", old, p);
                }
            }
        }
    }

    fn rotate_left(&mut self, arena: &mut Slab<T>, x: Handle) {
        let Some(y) = Self::right(arena, x) else {
            panic!("order book corrupted: rotate_left at {:?} without right child", x);
        };
        let y_left = Self::left(arena, y);
        Self::node_mut(arena, x).right = y_left;
        Self::set_parent(arena, y_left, Some(x));

        let x_parent = Self::parent(arena, x);
        self.replace_child(arena, x_parent, x, Some(y));
        Self::node_mut(arena, y).parent = x_parent;

        Self::node_mut(arena, y).left = Some(x);
        Self::node_mut(arena, x).parent = Some(y);
    }

    fn rotate_right(&mut self, arena: &mut Slab<T>, x: Handle) {
        let Some(y) = Self::left(arena, x) else {
            panic!("order book corrupted: rotate_right at {:?} without left child", x);
        };
        let y_right = Self::right(arena, y);
        Self::node_mut(arena, x).left = y_right;
        Self::set_parent(arena, y_right, Some(x));

        let x_parent = Self::parent(arena, x);
        self.replace_child(arena, x_parent, x, Some(y));
        Self::node_mut(arena, y).parent = x_parent;

        Self::node_mut(arena, y).right = Some(x);
        Self::node_mut(arena, x).parent = Some(y);
    }

    // ---- queries ----

    fn minimum(arena: &Slab<T>, mut h: Handle) -> Handle {
        while let Some(l) = Self::left(arena, h) {
            h = l;
        }
        h
    }

    fn maximum(arena: &Slab<T>, mut h: Handle) -> Handle {
        while let Some(r) = Self::right(arena, h) {
            h = r;
        }
        h
    }

    /// FIFO head at the smallest key.
    pub fn peek_min(&self, arena: &Slab<T>) -> Option<Handle> {
        self.root.map(|r| Self::minimum(arena, r))
    }

    /// FIFO head at the largest key.
    pub fn peek_max(&self, arena: &Slab<T>) -> Option<Handle> {
        self.root.map(|r| Self::maximum(arena, r))
    }

    /// FIFO head holding `key`.
    pub fn find(&self, arena: &Slab<T>, key: I::Key) -> Option<Handle> {
        let mut cur = self.root;
        while let Some(c) = cur {
            let node = Self::node(arena, c);
            cur = match key.cmp(&node.key) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(c),
            };
        }
        None
    }

    /// All elements sharing `head`'s key in arrival order. `head` must be a
    /// tree node.
    pub fn fifo(&self, arena: &Slab<T>, head: Handle) -> Vec<Handle> {
        let mut out = vec![head];
        let mut cur = Self::node(arena, head).next;
        while cur != head {
            out.push(cur);
            cur = Self::node(arena, cur).next;
        }
        out
    }

    /// Tree nodes (FIFO heads) in ascending key order.
    pub fn heads(&self, arena: &Slab<T>) -> Vec<Handle> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut cur = self.root;
        while cur.is_some() || !stack.is_empty() {
            while let Some(c) = cur {
                stack.push(c);
                cur = Self::left(arena, c);
            }
            if let Some(c) = stack.pop() {
                out.push(c);
                cur = Self::right(arena, c);
            }
        }
        out
    }

    // ---- insertion ----

    /// Indexes the element at `h`. An equal key joins that key's FIFO tail.
    pub fn push(&mut self, arena: &mut Slab<T>, h: Handle) {
        if Self::node(arena, h).is_linked() {
            panic!("order book corrupted: {:?} pushed while already indexed", h);
        }
        let key = Self::node(arena, h).key;

        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            let node = Self::node(arena, c);
            match key.cmp(&node.key) {
                Ordering::Less => {
                    parent = Some(c);
                    go_left = true;
                    cur = node.left;
                }
                Ordering::Greater => {
                    parent = Some(c);
                    go_left = false;
                    cur = node.right;
                }
                Ordering::Equal => {
                    Self::enqueue(arena, c, h);
                    self.len += 1;
                    return;
                }
            }
        }

        {
            let node = Self::node_mut(arena, h);
            node.reset(h);
            node.parent = parent;
            node.placement = Placement::Tree;
        }
        match parent {
            None => self.root = Some(h),
            Some(p) if go_left => Self::node_mut(arena, p).left = Some(h),
            Some(p) => Self::node_mut(arena, p).right = Some(h),
        }
        self.insert_fixup(arena, h);
        self.len += 1;
    }

    fn enqueue(arena: &mut Slab<T>, head: Handle, h: Handle) {
        let tail = Self::node(arena, head).prev;
        {
            let node = Self::node_mut(arena, h);
            node.reset(h);
            node.prev = tail;
            node.next = head;
            node.placement = Placement::Queued;
        }
        Self::node_mut(arena, tail).next = h;
        Self::node_mut(arena, head).prev = h;
    }

    fn insert_fixup(&mut self, arena: &mut Slab<T>, mut z: Handle) {
        loop {
            let Some(p) = Self::parent(arena, z) else { break };
            if !Self::is_red(arena, Some(p)) {
                break;
            }
            // 红色节点不可能是根，所以祖父节点一定存在
            let Some(g) = Self::parent(arena, p) else {
                panic!("order book corrupted: red node {:?} is the root", p);
            };
            if Self::left(arena, g) == Some(p) {
                let uncle = Self::right(arena, g);
                if Self::is_red(arena, uncle) {
                    Self::set_color(arena, Some(p), Color::Black);
                    Self::set_color(arena, uncle, Color::Black);
                    Self::set_color(arena, Some(g), Color::Red);
                    z = g;
                } else {
                    let mut p = p;
                    if Self::right(arena, p) == Some(z) {
                        z = p;
                        self.rotate_left(arena, z);
                        p = Self::parent(arena, z).unwrap_or(z);
                    }
                    Self::set_color(arena, Some(p), Color::Black);
                    Self::set_color(arena, Some(g), Color::Red);
                    self.rotate_right(arena, g);
                }
            } else {
                let uncle = Self::left(arena, g);
                if Self::is_red(arena, uncle) {
                    Self::set_color(arena, Some(p), Color::Black);
                    Self::set_color(arena, uncle, Color::Black);
                    Self::set_color(arena, Some(g), Color::Red);
                    z = g;
                } else {
                    let mut p = p;
                    if Self::left(arena, p) == Some(z) {
                        z = p;
                        self.rotate_right(arena, z);
                        p = Self::parent(arena, z).unwrap_or(z);
                    }
                    Self::set_color(arena, Some(p), Color::Black);
                    Self::set_color(arena, Some(g), Color::Red);
                    self.rotate_left(arena, g);
                }
            }
        }
        Self::set_color(arena, self.root, Color::Black);
    }

    // ---- removal ----

    /// Removes and returns the FIFO head at the smallest key.
    pub fn pop_min(&mut self, arena: &mut Slab<T>) -> Option<Handle> {
        let h = self.peek_min(arena)?;
        self.remove(arena, h);
        Some(h)
    }

    /// Removes and returns the FIFO head at the largest key.
    pub fn pop_max(&mut self, arena: &mut Slab<T>) -> Option<Handle> {
        let h = self.peek_max(arena)?;
        self.remove(arena, h);
        Some(h)
    }

    /// Unindexes `h`, whether it holds a tree slot or queues behind one.
    /// The slab slot itself is left to the caller.
    pub fn remove(&mut self, arena: &mut Slab<T>, h: Handle) {
        match Self::node(arena, h).placement {
            Placement::Detached => {
                panic!("order book corrupted: removing {:?} which is not indexed", h);
            }
            Placement::Queued => Self::unlink(arena, h),
            Placement::Tree => {
                let next = Self::node(arena, h).next;
                if next == h {
                    self.delete_node(arena, h);
                } else {
                    Self::unlink(arena, h);
                    self.promote(arena, h, next);
                }
            }
        }
        Self::node_mut(arena, h).reset(h);
        self.len -= 1;
    }

    fn unlink(arena: &mut Slab<T>, h: Handle) {
        let (prev, next) = {
            let node = Self::node(arena, h);
            (node.prev, node.next)
        };
        if Self::node(arena, prev).next != h || Self::node(arena, next).prev != h {
            panic!("order book corrupted: FIFO links around {:?} disagree", h);
        }
        Self::node_mut(arena, prev).next = next;
        Self::node_mut(arena, next).prev = prev;
    }

    /// Moves `successor` into the tree slot held by `old`.
    fn promote(&mut self, arena: &mut Slab<T>, old: Handle, successor: Handle) {
        let (color, parent, left, right) = {
            let node = Self::node(arena, old);
            (node.color, node.parent, node.left, node.right)
        };
        self.replace_child(arena, parent, old, Some(successor));
        Self::set_parent(arena, left, Some(successor));
        Self::set_parent(arena, right, Some(successor));

        let node = Self::node_mut(arena, successor);
        node.color = color;
        node.parent = parent;
        node.left = left;
        node.right = right;
        node.placement = Placement::Tree;
    }

    fn delete_node(&mut self, arena: &mut Slab<T>, z: Handle) {
        let (z_parent, z_left, z_right, z_color) = {
            let node = Self::node(arena, z);
            (node.parent, node.left, node.right, node.color)
        };

        let x;
        let x_parent;
        let removed_color;

        match (z_left, z_right) {
            (None, _) => {
                x = z_right;
                x_parent = z_parent;
                removed_color = z_color;
                self.replace_child(arena, z_parent, z, x);
                Self::set_parent(arena, x, z_parent);
            }
            (Some(_), None) => {
                x = z_left;
                x_parent = z_parent;
                removed_color = z_color;
                self.replace_child(arena, z_parent, z, x);
                Self::set_parent(arena, x, z_parent);
            }
            (Some(zl), Some(zr)) => {
                let y = Self::minimum(arena, zr);
                removed_color = Self::node(arena, y).color;
                x = Self::right(arena, y);

                if Self::parent(arena, y) == Some(z) {
                    x_parent = Some(y);
                } else {
                    let y_parent = Self::parent(arena, y);
                    x_parent = y_parent;
                    self.replace_child(arena, y_parent, y, x);
                    Self::set_parent(arena, x, y_parent);
                    Self::node_mut(arena, y).right = Some(zr);
                    Self::node_mut(arena, zr).parent = Some(y);
                }

                self.replace_child(arena, z_parent, z, Some(y));
                {
                    let node = Self::node_mut(arena, y);
                    node.parent = z_parent;
                    node.left = Some(zl);
                    node.color = z_color;
                }
                Self::node_mut(arena, zl).parent = Some(y);
            }
        }

        if removed_color == Color::Black {
            self.delete_fixup(arena, x, x_parent);
        }
    }

    fn delete_fixup(&mut self, arena: &mut Slab<T>, mut x: Option<Handle>, mut parent: Option<Handle>) {
        while x != self.root && !Self::is_red(arena, x) {
            let Some(p) = parent else { break };

            if Self::left(arena, p) == x {
                let mut w = Self::sibling(p, Self::right(arena, p));
                if Self::is_red(arena, Some(w)) {
                    Self::set_color(arena, Some(w), Color::Black);
                    Self::set_color(arena, Some(p), Color::Red);
                    self.rotate_left(arena, p);
                    w = Self::sibling(p, Self::right(arena, p));
                }
                if !Self::is_red(arena, Self::left(arena, w)) && !Self::is_red(arena, Self::right(arena, w)) {
                    Self::set_color(arena, Some(w), Color::Red);
                    x = Some(p);
                    parent = Self::parent(arena, p);
                } else {
                    if !Self::is_red(arena, Self::right(arena, w)) {
                        Self::set_color(arena, Self::left(arena, w), Color::Black);
                        Self::set_color(arena, Some(w), Color::Red);
                        self.rotate_right(arena, w);
                        w = Self::sibling(p, Self::right(arena, p));
                    }
                    let p_color = Self::node(arena, p).color;
                    Self::set_color(arena, Some(w), p_color);
                    Self::set_color(arena, Some(p), Color::Black);
                    Self::set_color(arena, Self::right(arena, w), Color::Black);
                    self.rotate_left(arena, p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut w = Self::sibling(p, Self::left(arena, p));
                if Self::is_red(arena, Some(w)) {
                    Self::set_color(arena, Some(w), Color::Black);
                    Self::set_color(arena, Some(p), Color::Red);
                    self.rotate_right(arena, p);
                    w = Self::sibling(p, Self::left(arena, p));
                }
                if !Self::is_red(arena, Self::left(arena, w)) && !Self::is_red(arena, Self::right(arena, w)) {
                    Self::set_color(arena, Some(w), Color::Red);
                    x = Some(p);
                    parent = Self::parent(arena, p);
                } else {
                    if !Self::is_red(arena, Self::left(arena, w)) {
                        Self::set_color(arena, Self::right(arena, w), Color::Black);
                        Self::set_color(arena, Some(w), Color::Red);
                        self.rotate_left(arena, w);
                        w = Self::sibling(p, Self::left(arena, p));
                    }
                    let p_color = Self::node(arena, p).color;
                    Self::set_color(arena, Some(w), p_color);
                    Self::set_color(arena, Some(p), Color::Black);
                    Self::set_color(arena, Self::left(arena, w), Color::Black);
                    self.rotate_right(arena, p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        Self::set_color(arena, x, Color::Black);
    }

    /// A doubly-black position always has a sibling; a missing one means the
    /// black heights were already unequal.
    fn sibling(parent: Handle, w: Option<Handle>) -> Handle {
        match w {
            Some(w) => w,
            None => panic!("order book corrupted: missing sibling under {:?} during delete", parent),
        }
    }

    // ---- verification ----

    /// Checks every red-black, ordering, link and FIFO invariant.
    /// Returns the black height of the tree.
    pub fn verify(&self, arena: &Slab<T>) -> Result<usize, TreeViolation> {
        let Some(root) = self.root else {
            return if self.len == 0 {
                Ok(0)
            } else {
                Err(TreeViolation::Length {
                    found: 0,
                    recorded: self.len,
                })
            };
        };
        if Self::node(arena, root).color == Color::Red {
            return Err(TreeViolation::RedRoot(root));
        }
        if Self::node(arena, root).parent.is_some() {
            return Err(TreeViolation::RootHasParent(root));
        }

        let mut found = 0;
        let height = self.verify_subtree(arena, root, None, None, &mut found)?;
        if found != self.len {
            return Err(TreeViolation::Length {
                found,
                recorded: self.len,
            });
        }
        Ok(height)
    }

    fn verify_subtree(
        &self,
        arena: &Slab<T>,
        h: Handle,
        lower: Option<I::Key>,
        upper: Option<I::Key>,
        found: &mut usize,
    ) -> Result<usize, TreeViolation> {
        let node = Self::node(arena, h);
        if node.placement != Placement::Tree {
            return Err(TreeViolation::Placement(h));
        }
        if lower.is_some_and(|lo| node.key <= lo) || upper.is_some_and(|hi| node.key >= hi) {
            return Err(TreeViolation::KeyOrder(h));
        }

        // FIFO: circular, consistent both ways, same key, queued members only
        let mut count = 1;
        let mut prev = h;
        let mut cur = node.next;
        while cur != h {
            let member = Self::node(arena, cur);
            if member.prev != prev || member.placement != Placement::Queued || member.key != node.key {
                return Err(TreeViolation::Fifo(h));
            }
            count += 1;
            if count > self.len {
                return Err(TreeViolation::Fifo(h));
            }
            prev = cur;
            cur = member.next;
        }
        if node.prev != prev {
            return Err(TreeViolation::Fifo(h));
        }
        *found += count;

        for child in [node.left, node.right].into_iter().flatten() {
            if Self::node(arena, child).parent != Some(h) {
                return Err(TreeViolation::BrokenParent { parent: h, child });
            }
            if node.color == Color::Red && Self::node(arena, child).color == Color::Red {
                return Err(TreeViolation::RedRed(h));
            }
        }

        let left = match node.left {
            Some(l) => self.verify_subtree(arena, l, lower, Some(node.key), found)?,
            None => 0,
        };
        let right = match node.right {
            Some(r) => self.verify_subtree(arena, r, Some(node.key), upper, found)?,
            None => 0,
        };
        if left != right {
            return Err(TreeViolation::BlackHeight { node: h, left, right });
        }
        Ok(left + usize::from(node.color == Color::Black))
    }
}
