/// Slab allocator for resting orders
///
/// Thin layer over `slab::Slab` that hands out `u32` handles and fails fast
/// on a dangling or double-freed handle. Freed slots are recycled before the
/// pool grows, so a book in steady state does no heap allocation on the hot
/// path.
///
/// A slab belongs to the single thread that owns its book.
use std::fmt;
use std::ops::{Index, IndexMut};

/// Index of an occupied slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn from_key(key: usize) -> Self {
        match u32::try_from(key) {
            Ok(idx) => Handle(idx),
            Err(_) => panic!("slab exhausted u32 handle space at key {}", key),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Object pool handing out `Handle`s.
#[derive(Clone)]
pub struct Slab<T> {
    inner: slab::Slab<T>,
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a slab with room for `capacity` values before it has to grow.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: slab::Slab::with_capacity(capacity),
        }
    }

    /// Stores `value`, reusing a freed slot when one is available.
    #[inline]
    pub fn insert(&mut self, value: T) -> Handle {
        self.insert_with(|_| value)
    }

    /// Stores the value built by `make`, which receives the slot's handle.
    pub fn insert_with<F>(&mut self, make: F) -> Handle
    where
        F: FnOnce(Handle) -> T,
    {
        let entry = self.inner.vacant_entry();
        let handle = Handle::from_key(entry.key());
        entry.insert(make(handle));
        handle
    }

    /// Frees the slot behind `handle`, returning its value.
    pub fn try_remove(&mut self, handle: Handle) -> Option<T> {
        if self.inner.contains(handle.index()) {
            Some(self.inner.remove(handle.index()))
        } else {
            None
        }
    }

    /// Frees the slot behind `handle`. Panics on a vacant handle.
    pub fn remove(&mut self, handle: Handle) -> T {
        match self.try_remove(handle) {
            Some(value) => value,
            None => panic!("double free of slab handle {:?}", handle),
        }
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.inner.get(handle.index())
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.inner.get_mut(handle.index())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.inner.contains(handle.index())
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.inner.iter().map(|(key, value)| (Handle::from_key(key), value))
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Handle> for Slab<T> {
    type Output = T;

    #[inline]
    fn index(&self, handle: Handle) -> &T {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("dangling slab handle {:?}", handle),
        }
    }
}

impl<T> IndexMut<Handle> for Slab<T> {
    #[inline]
    fn index_mut(&mut self, handle: Handle) -> &mut T {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("dangling slab handle {:?}", handle),
        }
    }
}
