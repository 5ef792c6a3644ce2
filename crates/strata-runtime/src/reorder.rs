//! Bounded reorder buffer.
//!
//! Workers finish frames in any order; the smoother must see them in
//! ascending frame order.  [`ReorderBuffer`] holds early arrivals and
//! releases the contiguous run starting at the next expected index.

use std::collections::BTreeMap;

use strata_types::StrataError;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next_index: u64,
    capacity: usize,
}

impl<T> ReorderBuffer<T> {
    /// `capacity` bounds how far ahead of the next expected index an item
    /// may land.  Clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_index: 0,
            capacity: capacity.max(1),
        }
    }

    /// Index the buffer releases next.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hold `item` for frame `index`.
    ///
    /// # Errors
    ///
    /// [`StrataError::Assembly`] for an index already released, already
    /// pending, or beyond the reorder window.
    pub fn insert(&mut self, index: u64, item: T) -> Result<(), StrataError> {
        if index < self.next_index {
            return Err(StrataError::Assembly {
                frame_index: index,
                reason: format!("frame already released (next is {})", self.next_index),
            });
        }
        if index - self.next_index >= self.capacity as u64 {
            return Err(StrataError::Assembly {
                frame_index: index,
                reason: format!(
                    "frame outside reorder window [{}, {})",
                    self.next_index,
                    self.next_index + self.capacity as u64
                ),
            });
        }
        if self.pending.contains_key(&index) {
            return Err(StrataError::Assembly {
                frame_index: index,
                reason: "duplicate frame".to_string(),
            });
        }
        self.pending.insert(index, item);
        Ok(())
    }

    /// Release the next item if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let item = self.pending.remove(&self.next_index)?;
        let index = self.next_index;
        self.next_index += 1;
        Some((index, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_ascending_order() {
        let mut buffer = ReorderBuffer::new(8);
        buffer.insert(2, 'c').unwrap();
        buffer.insert(0, 'a').unwrap();
        assert_eq!(buffer.pop_ready(), Some((0, 'a')));
        assert_eq!(buffer.pop_ready(), None);
        buffer.insert(1, 'b').unwrap();
        assert_eq!(buffer.pop_ready(), Some((1, 'b')));
        assert_eq!(buffer.pop_ready(), Some((2, 'c')));
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_index(), 3);
    }

    #[test]
    fn rejects_duplicates_and_released_frames() {
        let mut buffer = ReorderBuffer::new(4);
        buffer.insert(1, ()).unwrap();
        assert!(buffer.insert(1, ()).is_err());
        buffer.insert(0, ()).unwrap();
        buffer.pop_ready();
        assert!(buffer.insert(0, ()).is_err());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn rejects_frames_beyond_window() {
        let mut buffer = ReorderBuffer::new(2);
        buffer.insert(1, ()).unwrap();
        assert!(matches!(
            buffer.insert(2, ()),
            Err(StrataError::Assembly { frame_index: 2, .. })
        ));
    }
}
