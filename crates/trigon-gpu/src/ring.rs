//! Fixed-capacity ring with a cursor.

/// A fixed set of entries visited in order, wrapping after the last one.
///
/// The capacity is chosen at construction and never changes; the cursor always points at
/// a valid entry.
#[derive(Debug)]
pub struct Ring<T> {
    entries: Vec<T>,
    cursor: usize,
}

impl<T> Ring<T> {
    /// Build a ring from its entries. Returns `None` when `entries` is empty.
    pub fn new(entries: Vec<T>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        Some(Self { entries, cursor: 0 })
    }

    /// Number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Index of the current entry.
    pub const fn index(&self) -> usize {
        self.cursor
    }

    /// The current entry.
    pub fn current(&self) -> &T {
        &self.entries[self.cursor]
    }

    /// The current entry, mutably.
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.entries[self.cursor]
    }

    /// Move the cursor to the next entry, wrapping to the first.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.entries.len();
    }

    /// Entry at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    /// All entries in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_is_rejected() {
        assert!(Ring::<u32>::new(Vec::new()).is_none());
    }

    #[test]
    fn cursor_wraps() {
        let mut ring = Ring::new(vec!['a', 'b', 'c']).unwrap();
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(*ring.current());
            ring.advance();
        }
        assert_eq!(seen, ['a', 'b', 'c', 'a', 'b', 'c', 'a']);
        assert_eq!(ring.index(), 1);
    }

    #[test]
    fn current_mut_touches_only_current() {
        let mut ring = Ring::new(vec![0u32; 3]).unwrap();
        ring.advance();
        *ring.current_mut() += 5;
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), [0, 5, 0]);
    }
}
