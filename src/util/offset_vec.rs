use std::fmt::{Debug, Error, Formatter};
use std::iter::{DoubleEndedIterator, Enumerate, Extend, FromIterator};
use std::result::Result;
use std::slice::Iter;
use std::vec::IntoIter as VecIntoIter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// Class files use this sort of addressing in a couple of places:
///
///   - the constant pool starts at offset 1, and `long`/`double` entries take two slots (the
///     second of which is unusable)
///   - the operand stack, where `long`/`double` values count as two towards `max_stack`
///
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,

    /// Offset for the first element (usually 0, but 1 for constant pools)
    initial_offset: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: Offset(0),
            initial_offset: Offset(0),
        }
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
            initial_offset,
        }
    }

    /// Length of the `OffsetVec` (aka. number of entries)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current offset size of the `OffsetVec` (aka. offset of the next element
    /// to be added)
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Sum of the widths of all entries
    pub fn total_width(&self) -> usize {
        self.offset_len.0 - self.initial_offset.0
    }

    /// Add an entry to the back
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));

        offset
    }

    /// Remove an entry from the back
    pub fn pop(&mut self) -> Option<(Offset, usize, T)> {
        self.entries.pop().map(|(off, elem)| {
            self.offset_len = off;
            (off, self.entries.len(), elem)
        })
    }

    /// Peek at the entry at the back
    pub fn last(&self) -> Option<&T> {
        self.entries.last().map(|(_, elem)| elem)
    }

    /// Empty the vector
    pub fn clear(&mut self) {
        self.entries.clear();
        self.offset_len = self.initial_offset;
    }

    /// Get an entry (and its index) by its offset in the vector
    ///
    /// Note: this uses binary search to find the offset
    pub fn get_offset(&self, offset: Offset) -> OffsetResult<T> {
        if offset < self.initial_offset {
            return OffsetResult::TooSmall;
        }
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Err(insert_at) if insert_at == self.entries.len() => {
                if offset < self.offset_len {
                    OffsetResult::InvalidOffset(insert_at)
                } else {
                    OffsetResult::TooLarge
                }
            }
            Err(insert_at) => OffsetResult::InvalidOffset(insert_at),
            Ok(found_idx) => OffsetResult::Ok(found_idx, &self.entries[found_idx].1),
        }
    }

    /// Update every entry in place, keeping offsets
    ///
    /// The new value must have the same width as the one it replaces.
    pub fn map_in_place(&mut self, mut update: impl FnMut(&T) -> Option<T>) {
        for (_, elem) in &mut self.entries {
            if let Some(updated) = update(elem) {
                debug_assert_eq!(updated.width(), elem.width());
                *elem = updated;
            }
        }
    }

    pub fn iter<'a>(&'a self) -> OffsetVecIter<'a, T> {
        self.into_iter()
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.initial_offset == other.initial_offset && self.entries == other.entries
    }
}

impl<A: Eq> Eq for OffsetVec<A> {}

impl<A: Width> Default for OffsetVec<A> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

#[derive(Debug)]
pub enum OffsetResult<'a, T> {
    /// Element was accessed
    Ok(usize, &'a T),

    /// Offset was invalid, and falls in the middle of the element before this index
    InvalidOffset(usize),

    /// Offset is before the first element
    TooSmall,

    /// Offset is too big
    TooLarge,
}

impl<'a, T> OffsetResult<'a, T> {
    /// Convert to an `Option` and keep only the value found
    pub fn ok(&self) -> Option<&'a T> {
        match self {
            OffsetResult::Ok(_, found) => Some(found),
            OffsetResult::InvalidOffset(_) | OffsetResult::TooSmall | OffsetResult::TooLarge => {
                None
            }
        }
    }
}

/// Iterator for owned `OffsetVec`
pub struct OffsetVecIntoIter<T>(Enumerate<VecIntoIter<(Offset, T)>>);

impl<T> Iterator for OffsetVecIntoIter<T> {
    type Item = (Offset, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> DoubleEndedIterator for OffsetVecIntoIter<T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> IntoIterator for OffsetVec<T> {
    type Item = (Offset, usize, T);
    type IntoIter = OffsetVecIntoIter<T>;

    fn into_iter(self) -> OffsetVecIntoIter<T> {
        OffsetVecIntoIter(self.entries.into_iter().enumerate())
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> DoubleEndedIterator for OffsetVecIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in elems {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<U: IntoIterator<Item = T>>(&mut self, iter: U) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Width, const N: usize> From<[T; N]> for OffsetVec<T> {
    fn from(elems: [T; N]) -> Self {
        elems.into_iter().collect()
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Slot {
        Narrow(u8),
        Wide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::Narrow(_) => 1,
                Slot::Wide(_) => 2,
            }
        }
    }

    #[test]
    fn mixed_width_offsets() {
        let slots: OffsetVec<Slot> = vec![
            Slot::Narrow(1),
            Slot::Wide(2),
            Slot::Narrow(3),
            Slot::Wide(4),
        ]
        .into_iter()
        .collect();
        assert_eq!(slots.total_width(), 6);
        assert_eq!(
            slots.into_iter().collect::<Vec<_>>(),
            vec![
                (Offset(0), 0, Slot::Narrow(1)),
                (Offset(1), 1, Slot::Wide(2)),
                (Offset(3), 2, Slot::Narrow(3)),
                (Offset(4), 3, Slot::Wide(4)),
            ]
        );
    }

    #[test]
    fn pool_style_lookups() {
        let mut pool: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        pool.push(Slot::Narrow(1));
        pool.push(Slot::Wide(2));
        pool.push(Slot::Narrow(3));

        assert_eq!(pool.offset_len(), Offset(5));
        assert!(matches!(pool.get_offset(Offset(0)), OffsetResult::TooSmall));
        assert!(matches!(
            pool.get_offset(Offset(1)),
            OffsetResult::Ok(0, Slot::Narrow(1))
        ));
        assert!(matches!(
            pool.get_offset(Offset(2)),
            OffsetResult::Ok(1, Slot::Wide(2))
        ));
        assert!(matches!(
            pool.get_offset(Offset(3)),
            OffsetResult::InvalidOffset(2)
        ));
        assert!(matches!(
            pool.get_offset(Offset(4)),
            OffsetResult::Ok(2, Slot::Narrow(3))
        ));
        assert!(matches!(pool.get_offset(Offset(5)), OffsetResult::TooLarge));
    }

    #[test]
    fn trailing_wide_slot_is_invalid_not_too_large() {
        let mut pool: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        pool.push(Slot::Wide(1));
        assert!(matches!(
            pool.get_offset(Offset(2)),
            OffsetResult::InvalidOffset(1)
        ));
        assert!(matches!(pool.get_offset(Offset(3)), OffsetResult::TooLarge));
    }

    #[test]
    fn pop_restores_offset() {
        let mut stack: OffsetVec<Slot> = OffsetVec::from([Slot::Wide(1), Slot::Narrow(2)]);
        assert_eq!(stack.offset_len(), Offset(3));
        assert_eq!(stack.pop(), Some((Offset(2), 1, Slot::Narrow(2))));
        assert_eq!(stack.offset_len(), Offset(2));
        assert_eq!(stack.last(), Some(&Slot::Wide(1)));
        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(stack.offset_len(), Offset(0));
    }
}
