#![forbid(unsafe_code)]

/// A fixed-length set of row indices backed by a bit vector.
///
/// Bits are stored little-endian within each `u64` word: row 0 is the LSB of word 0. All set
/// operations require both operands to cover the same number of rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowBitmap {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl RowBitmap {
    /// A bitmap over `len` rows with no row selected.
    pub fn empty(len: usize) -> Self {
        Self {
            words: vec![0u64; word_count(len)],
            len,
            ones: 0,
        }
    }

    /// A bitmap over `len` rows with every row selected.
    pub fn full(len: usize) -> Self {
        let mut words = vec![u64::MAX; word_count(len)];
        if let Some(last) = words.last_mut() {
            *last &= tail_mask(len);
        }
        Self {
            words,
            len,
            ones: len,
        }
    }

    /// Build a bitmap over `len` rows selecting `rows`. Out-of-range rows are ignored.
    pub fn from_rows(len: usize, rows: impl IntoIterator<Item = usize>) -> Self {
        let mut bitmap = Self::empty(len);
        for row in rows {
            if row < len {
                bitmap.insert(row);
            }
        }
        bitmap
    }

    /// Number of rows covered (selected or not).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of selected rows.
    pub fn count(&self) -> usize {
        self.ones
    }

    /// `true` when no row is selected.
    pub fn is_empty(&self) -> bool {
        self.ones == 0
    }

    pub fn contains(&self, row: usize) -> bool {
        if row >= self.len {
            return false;
        }
        (self.words[row / 64] >> (row % 64)) & 1 == 1
    }

    pub fn insert(&mut self, row: usize) {
        debug_assert!(row < self.len, "RowBitmap row out of bounds");
        let mask = 1u64 << (row % 64);
        let word = &mut self.words[row / 64];
        if *word & mask == 0 {
            *word |= mask;
            self.ones += 1;
        }
    }

    /// Keep only rows selected in both bitmaps.
    pub fn intersect_with(&mut self, other: &RowBitmap) {
        debug_assert_eq!(self.len, other.len, "RowBitmap length mismatch");
        let mut ones = 0usize;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    /// Select every row selected in either bitmap.
    pub fn union_with(&mut self, other: &RowBitmap) {
        debug_assert_eq!(self.len, other.len, "RowBitmap length mismatch");
        let mut ones = 0usize;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    /// Selected rows in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(word_idx * 64 + bit)
            })
        })
    }
}

fn word_count(len: usize) -> usize {
    (len + 63) / 64
}

fn tail_mask(len: usize) -> u64 {
    match len % 64 {
        0 => u64::MAX,
        rem => (1u64 << rem) - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_bitmap_masks_tail_bits() {
        let bitmap = RowBitmap::full(70);
        assert_eq!(bitmap.count(), 70);
        assert!(bitmap.contains(69));
        assert!(!bitmap.contains(70));
        assert_eq!(bitmap.iter().count(), 70);
    }

    #[test]
    fn intersect_and_union_track_counts() {
        let mut a = RowBitmap::from_rows(130, [1, 5, 64, 129]);
        let b = RowBitmap::from_rows(130, [5, 64, 100]);

        let mut union = a.clone();
        union.union_with(&b);
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![1, 5, 64, 100, 129]);
        assert_eq!(union.count(), 5);

        a.intersect_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![5, 64]);
        assert_eq!(a.count(), 2);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut bitmap = RowBitmap::empty(8);
        bitmap.insert(3);
        bitmap.insert(3);
        assert_eq!(bitmap.count(), 1);
        assert!(!bitmap.is_empty());
    }
}
