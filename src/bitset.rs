//! Dense, dynamically-growable bitset keyed by `PeerIndex`, with
//! set-algebra operations and ascending-order iteration. Backed by
//! `bit_vec::BitVec`, the same crate the teacher already reaches for in
//! `isis::srmpls::LabelPool` for tracking allocated label slots.

use bit_vec::BitVec;

/// Sentinel returned by [`PeerBitSet::find_next`] / [`find_first`] when
/// no set bit exists at or after the given position.
pub const NPOS: usize = usize::MAX;

/// A growable bitset over `PeerIndex` values.
///
/// Two bitsets of differing length compare and combine as though the
/// shorter one were zero-extended: `union_with`, `intersect_with`, and
/// `difference_with` never fail on a length mismatch, and equality
/// ignores trailing zero bits past the shorter set's length.
#[derive(Debug, Clone, Default)]
pub struct PeerBitSet {
    bits: BitVec,
}

impl PeerBitSet {
    pub fn new() -> Self {
        Self { bits: BitVec::new() }
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bits: BitVec::from_elem(bits, false),
        }
    }

    fn ensure_len(&mut self, len: usize) {
        if self.bits.len() < len {
            self.bits.grow(len - self.bits.len(), false);
        }
    }

    pub fn set(&mut self, index: usize) {
        self.ensure_len(index + 1);
        self.bits.set(index, true);
    }

    pub fn reset(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, false);
        }
    }

    pub fn test(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| b)
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Index of the first set bit, or [`NPOS`] if none.
    pub fn find_first(&self) -> usize {
        self.find_next_from(0)
    }

    /// Index of the first set bit strictly after `index`, or [`NPOS`].
    /// `find_next(NPOS)` returns `NPOS`, matching the original source's
    /// `BitSet::find_next(npos) == npos` convention so callers can chain
    /// iteration without a special-case check on the first call.
    pub fn find_next(&self, index: usize) -> usize {
        if index == NPOS {
            return NPOS;
        }
        self.find_next_from(index + 1)
    }

    fn find_next_from(&self, start: usize) -> usize {
        if start >= self.bits.len() {
            return NPOS;
        }
        for i in start..self.bits.len() {
            if self.bits.get(i) == Some(true) {
                return i;
            }
        }
        NPOS
    }

    pub fn iter(&self) -> PeerBitSetIter<'_> {
        PeerBitSetIter {
            set: self,
            cursor: NPOS,
            started: false,
        }
    }

    pub fn union_with(&mut self, other: &PeerBitSet) {
        self.ensure_len(other.bits.len());
        self.bits.or(&pad(other, self.bits.len()));
    }

    pub fn intersect_with(&mut self, other: &PeerBitSet) {
        let len = self.bits.len().max(other.bits.len());
        self.ensure_len(len);
        self.bits.and(&pad(other, len));
    }

    /// In-place set difference: `self = self - other`.
    pub fn difference_with(&mut self, other: &PeerBitSet) {
        let len = self.bits.len();
        let padded = pad(other, len);
        for i in 0..len {
            if padded.get(i) == Some(true) {
                self.bits.set(i, false);
            }
        }
    }

    /// True iff every bit set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &PeerBitSet) -> bool {
        self.iter().all(|i| other.test(i))
    }
}

fn pad(set: &PeerBitSet, len: usize) -> BitVec {
    if set.bits.len() >= len {
        return set.bits.clone();
    }
    let mut padded = set.bits.clone();
    padded.grow(len - padded.len(), false);
    padded
}

impl PartialEq for PeerBitSet {
    fn eq(&self, other: &Self) -> bool {
        let len = self.bits.len().max(other.bits.len());
        let a = pad(self, len);
        let b = pad(other, len);
        a == b
    }
}
impl Eq for PeerBitSet {}

impl FromIterator<usize> for PeerBitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = PeerBitSet::new();
        for i in iter {
            set.set(i);
        }
        set
    }
}

pub struct PeerBitSetIter<'a> {
    set: &'a PeerBitSet,
    cursor: usize,
    started: bool,
}

impl<'a> Iterator for PeerBitSetIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.cursor = if self.started {
            self.set.find_next(self.cursor)
        } else {
            self.started = true;
            self.set.find_first()
        };
        if self.cursor == NPOS {
            None
        } else {
            Some(self.cursor)
        }
    }
}

impl<'a> IntoIterator for &'a PeerBitSet {
    type Item = usize;
    type IntoIter = PeerBitSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
