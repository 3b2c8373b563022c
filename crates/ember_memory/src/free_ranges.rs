//! Address-ordered set of free byte ranges with coalescing.
//!
//! Shared by the free-list allocator and the arena. Ranges never overlap and
//! never touch: inserting a range adjacent to an existing one merges them.

/// A free byte range `[offset, offset + len)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FreeRange {
    pub offset: usize,
    pub len: usize,
}

impl FreeRange {
    #[inline]
    pub const fn end(self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug, Default)]
pub(crate) struct FreeRanges {
    ranges: Vec<FreeRange>,
}

impl FreeRanges {
    /// A set holding the single range `[0, capacity)`.
    pub fn whole(capacity: usize) -> Self {
        Self {
            ranges: vec![FreeRange {
                offset: 0,
                len: capacity,
            }],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn get(&self, index: usize) -> FreeRange {
        self.ranges[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = FreeRange> + '_ {
        self.ranges.iter().copied()
    }

    /// Sum of all free bytes.
    pub fn total(&self) -> usize {
        self.iter().map(|r| r.len).sum()
    }

    /// Length of the largest range, zero when empty.
    pub fn largest(&self) -> usize {
        self.iter().map(|r| r.len).max().unwrap_or(0)
    }

    /// Returns the range to the set, merging with neighbours.
    ///
    /// Returns `false` and leaves the set untouched if any byte of the range
    /// is already free.
    pub fn insert(&mut self, offset: usize, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let end = offset + len;
        let index = self.ranges.partition_point(|r| r.offset < offset);

        let prev = index.checked_sub(1).map(|i| self.ranges[i]);
        let next = self.ranges.get(index).copied();

        if prev.is_some_and(|p| p.end() > offset) || next.is_some_and(|n| n.offset < end) {
            return false;
        }

        let joins_prev = prev.is_some_and(|p| p.end() == offset);
        let joins_next = next.is_some_and(|n| n.offset == end);

        match (joins_prev, joins_next) {
            (true, true) => {
                let next_len = self.ranges[index].len;
                self.ranges[index - 1].len += len + next_len;
                self.ranges.remove(index);
            }
            (true, false) => self.ranges[index - 1].len += len,
            (false, true) => {
                let next = &mut self.ranges[index];
                next.offset = offset;
                next.len += len;
            }
            (false, false) => self.ranges.insert(index, FreeRange { offset, len }),
        }
        true
    }

    /// First range (lowest address) for which `fit` returns a placement.
    pub fn first_fit<R>(&self, mut fit: impl FnMut(FreeRange) -> Option<R>) -> Option<(usize, R)> {
        self.ranges
            .iter()
            .enumerate()
            .find_map(|(index, &range)| fit(range).map(|placed| (index, placed)))
    }

    /// Removes `[start, end)` from the range at `index`, keeping any prefix
    /// and suffix as separate free ranges.
    pub fn carve(&mut self, index: usize, start: usize, end: usize) {
        let range = self.ranges[index];
        debug_assert!(range.offset <= start && start <= end && end <= range.end());

        let prefix = start - range.offset;
        let suffix = range.end() - end;

        match (prefix > 0, suffix > 0) {
            (false, false) => {
                self.ranges.remove(index);
            }
            (true, false) => self.ranges[index].len = prefix,
            (false, true) => {
                self.ranges[index] = FreeRange {
                    offset: end,
                    len: suffix,
                };
            }
            (true, true) => {
                self.ranges[index].len = prefix;
                self.ranges.insert(
                    index + 1,
                    FreeRange {
                        offset: end,
                        len: suffix,
                    },
                );
            }
        }
    }

    /// The range beginning exactly at `offset`, if any.
    pub fn starting_at(&self, offset: usize) -> Option<(usize, FreeRange)> {
        self.ranges
            .binary_search_by_key(&offset, |r| r.offset)
            .ok()
            .map(|index| (index, self.ranges[index]))
    }

    /// Replaces the whole set. `ranges` must be address-ordered and disjoint.
    pub fn reset(&mut self, ranges: impl IntoIterator<Item = FreeRange>) {
        self.ranges.clear();
        self.ranges.extend(ranges.into_iter().filter(|r| r.len > 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(set: &FreeRanges) -> Vec<(usize, usize)> {
        set.iter().map(|r| (r.offset, r.len)).collect()
    }

    #[test]
    fn test_insert_coalesces_both_sides() {
        let mut set = FreeRanges::default();
        assert!(set.insert(0, 16));
        assert!(set.insert(32, 16));
        assert_eq!(set.len(), 2);

        assert!(set.insert(16, 16));
        assert_eq!(offsets(&set), vec![(0, 48)]);
    }

    #[test]
    fn test_insert_rejects_overlap() {
        let mut set = FreeRanges::default();
        assert!(set.insert(16, 16));
        assert!(!set.insert(24, 4));
        assert!(!set.insert(8, 16));
        assert_eq!(offsets(&set), vec![(16, 16)]);
    }

    #[test]
    fn test_carve_keeps_prefix_and_suffix() {
        let mut set = FreeRanges::whole(100);
        set.carve(0, 10, 20);
        assert_eq!(offsets(&set), vec![(0, 10), (20, 80)]);
        assert_eq!(set.total(), 90);
        assert_eq!(set.largest(), 80);

        set.carve(1, 20, 100);
        assert_eq!(offsets(&set), vec![(0, 10)]);
    }

    #[test]
    fn test_first_fit_picks_lowest_address() {
        let mut set = FreeRanges::default();
        set.insert(100, 50);
        set.insert(0, 10);
        set.insert(300, 50);

        let hit = set.first_fit(|r| (r.len >= 40).then_some(r.offset));
        assert_eq!(hit, Some((1, 100)));
    }

    #[test]
    fn test_starting_at() {
        let mut set = FreeRanges::default();
        set.insert(64, 8);
        assert_eq!(set.starting_at(64).map(|(_, r)| r.len), Some(8));
        assert!(set.starting_at(65).is_none());
    }
}
