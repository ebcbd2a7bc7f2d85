//! Bitfield over code offsets.
//!
//! [`OffsetMap`] marks individual byte offsets of a method's code, for example the offsets
//! at which instructions start or the offsets that begin a basic block. It backs the
//! boundary checks of the decoder and the leader queries the opcode mapper relies on.

/// One bit per code offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMap {
    data: Vec<usize>,
    elements: usize,
}

const BITFIELD_SIZE: usize = usize::BITS as usize;

impl OffsetMap {
    /// Create a map tracking `elements` offsets, all unset.
    #[must_use]
    pub fn new(elements: usize) -> OffsetMap {
        OffsetMap {
            data: vec![0_usize; elements.div_ceil(BITFIELD_SIZE)],
            elements,
        }
    }

    /// Number of offsets this map can track.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements
    }

    /// Returns `true` if the map tracks no offsets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Returns `true` if `offset` is marked. Offsets outside the map are never marked.
    #[must_use]
    pub fn get(&self, offset: usize) -> bool {
        if offset >= self.elements {
            return false;
        }

        self.data
            .get(offset / BITFIELD_SIZE)
            .is_some_and(|bitfield| (bitfield >> (offset % BITFIELD_SIZE)) & 1 != 0)
    }

    /// Mark or unmark `offset`. Offsets outside the map are ignored.
    pub fn set(&mut self, offset: usize, state: bool) {
        if offset >= self.elements {
            return;
        }

        if let Some(bitfield) = self.data.get_mut(offset / BITFIELD_SIZE) {
            let mask = 1_usize << (offset % BITFIELD_SIZE);
            if state {
                *bitfield |= mask;
            } else {
                *bitfield &= !mask;
            }
        }
    }

    /// Number of marked offsets.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data
            .iter()
            .map(|bitfield| bitfield.count_ones() as usize)
            .sum()
    }

    /// Iterate over all marked offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.elements).filter(|&offset| self.get(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let mut map = OffsetMap::new(4096);
        assert_eq!(map.len(), 4096);

        map.set(1, true);
        assert!(map.get(1));
        assert!(!map.get(2));

        map.set(1, false);
        assert!(!map.get(1));
    }

    #[test]
    fn out_of_range_is_ignored() {
        let mut map = OffsetMap::new(10);
        map.set(10, true);
        map.set(5000, true);
        assert!(!map.get(10));
        assert_eq!(map.count(), 0);

        let empty = OffsetMap::new(0);
        assert!(empty.is_empty());
        assert!(!empty.get(0));
    }

    #[test]
    fn iter_ascending() {
        let mut map = OffsetMap::new(300);
        for offset in [299, 0, 64, 63, 128] {
            map.set(offset, true);
        }
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![0, 63, 64, 128, 299]);
        assert_eq!(map.count(), 5);
    }

    #[test]
    fn bitfield_boundary() {
        for offset in 1..8 {
            let elements = BITFIELD_SIZE + offset;
            let mut map = OffsetMap::new(elements);

            for i in 0..elements {
                map.set(i, true);
                assert!(map.get(i), "Element {} should be set", i);
            }

            let last_element = elements - 1;
            map.set(last_element, false);
            assert!(!map.get(last_element));
            assert_eq!(map.count(), elements - 1);
        }
    }
}
