//! Arena-indexed intrusive LRU list.
//!
//! The buffer cache keeps its recency order in this structure: `SLOTS-1`
//! real entries plus a dedicated sentinel index, linked through a pair of
//! index arrays instead of self-referential pointers. `next` of the
//! sentinel is the most-recently-used entry, `prev` the least.

pub struct LruList<const SLOTS: usize> {
    next: [usize; SLOTS],
    prev: [usize; SLOTS],
}

impl<const SLOTS: usize> LruList<SLOTS> {
    /// The sentinel occupies the last index.
    pub const SENTINEL: usize = SLOTS - 1;

    /// An empty list: the sentinel linked to itself, entries detached.
    pub const fn new() -> Self {
        let mut list = Self {
            next: [usize::MAX; SLOTS],
            prev: [usize::MAX; SLOTS],
        };
        list.next[Self::SENTINEL] = Self::SENTINEL;
        list.prev[Self::SENTINEL] = Self::SENTINEL;
        list
    }

    /// Most-recently-used entry, or `None` if empty.
    pub fn head(&self) -> Option<usize> {
        let n = self.next[Self::SENTINEL];
        (n != Self::SENTINEL).then_some(n)
    }

    /// Entry after `i` toward the LRU end, or `None` at the tail.
    pub fn after(&self, i: usize) -> Option<usize> {
        let n = self.next[i];
        (n != Self::SENTINEL).then_some(n)
    }

    /// Least-recently-used entry, or `None` if empty.
    pub fn tail(&self) -> Option<usize> {
        let p = self.prev[Self::SENTINEL];
        (p != Self::SENTINEL).then_some(p)
    }

    /// Entry before `i` toward the MRU end, or `None` at the head.
    pub fn before(&self, i: usize) -> Option<usize> {
        let p = self.prev[i];
        (p != Self::SENTINEL).then_some(p)
    }

    /// Link `i` directly after the sentinel (most-recently-used).
    pub fn push_front(&mut self, i: usize) {
        debug_assert!(i < Self::SENTINEL);
        let old = self.next[Self::SENTINEL];
        self.next[i] = old;
        self.prev[i] = Self::SENTINEL;
        self.prev[old] = i;
        self.next[Self::SENTINEL] = i;
    }

    /// Unlink `i` from wherever it is.
    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < Self::SENTINEL);
        let (p, n) = (self.prev[i], self.next[i]);
        self.next[p] = n;
        self.prev[n] = p;
        self.next[i] = usize::MAX;
        self.prev[i] = usize::MAX;
    }

    /// Splice `i` out and relink it at the MRU end.
    pub fn move_to_front(&mut self, i: usize) {
        self.remove(i);
        self.push_front(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type List = LruList<5>; // 4 entries + sentinel

    fn mru_order(list: &List) -> std::vec::Vec<usize> {
        let mut out = std::vec::Vec::new();
        let mut cur = list.head();
        while let Some(i) = cur {
            out.push(i);
            cur = list.after(i);
        }
        out
    }

    #[test]
    fn push_front_orders_most_recent_first() {
        let mut list = List::new();
        for i in 0..4 {
            list.push_front(i);
        }
        assert_eq!(mru_order(&list), [3, 2, 1, 0]);
        assert_eq!(list.tail(), Some(0));
    }

    #[test]
    fn move_to_front_reorders() {
        let mut list = List::new();
        for i in 0..4 {
            list.push_front(i);
        }
        list.move_to_front(0);
        assert_eq!(mru_order(&list), [0, 3, 2, 1]);
        assert_eq!(list.tail(), Some(1));
    }

    #[test]
    fn remove_detaches() {
        let mut list = List::new();
        for i in 0..3 {
            list.push_front(i);
        }
        list.remove(1);
        assert_eq!(mru_order(&list), [2, 0]);
        list.push_front(1);
        assert_eq!(mru_order(&list), [1, 2, 0]);
    }

    #[test]
    fn lru_walk_from_tail() {
        let mut list = List::new();
        for i in 0..4 {
            list.push_front(i);
        }
        let mut out = std::vec::Vec::new();
        let mut cur = list.tail();
        while let Some(i) = cur {
            out.push(i);
            cur = list.before(i);
        }
        assert_eq!(out, [0, 1, 2, 3]);
    }
}
