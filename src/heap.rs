//! Indexed binary min-heap over a fixed universe of edge slots.
//!
//! # Overview
//! The refinement loop needs to update or evict entries by *edge identity*
//! after every swap, not merely pop the minimum, so a plain binary heap is
//! not enough. This heap keeps two parallel permutation arrays:
//!
//! - `p`: heap position → slot (the heap order, 1-based),
//! - `q`: slot → heap position (the inverse),
//!
//! together with a score array indexed by slot. The arrays always hold a full
//! permutation of the universe; the live heap is the prefix `p[1..=len]`, and
//! a slot is a member exactly when its position lies inside that prefix. This
//! keeps remove-by-identity and rescore-by-identity at O(log n).
//!
//! Positions and slots are distinct newtypes so the two index spaces cannot
//! be swapped accidentally.

/// Identity of a heap element: the edge's dense head index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot(pub usize);

/// 1-based position inside the heap array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd)]
pub struct HeapPos(usize);

/// Min-heap keyed by improvement score, addressable by slot.
///
/// Membership rule: only strictly negative scores (improving swaps) are ever
/// inside the heap.
pub struct ScoredHeap {
    /// Heap position -> slot. `p[0]` is unused padding.
    p: Vec<Slot>,
    /// Slot -> heap position.
    q: Vec<HeapPos>,
    /// Slot -> score. Valid for members; stale for non-members.
    scores: Vec<f64>,
    len: usize,
}

impl ScoredHeap {
    /// An empty heap over `universe` slots, all absent.
    pub fn new(universe: usize) -> Self {
        ScoredHeap {
            p: (0..=universe).map(|i| Slot(i.saturating_sub(1))).collect(),
            q: (0..universe).map(|s| HeapPos(s + 1)).collect(),
            scores: vec![0.0; universe],
            len: 0,
        }
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn contains(&self, s: Slot) -> bool {
        self.q[s.0].0 <= self.len
    }

    /// Score of a member slot.
    #[inline]
    pub fn score(&self, s: Slot) -> f64 {
        self.scores[s.0]
    }

    /// The member with the minimum score, with its score.
    pub fn min(&self) -> Option<(Slot, f64)> {
        if self.len == 0 {
            None
        } else {
            let s = self.p[1];
            Some((s, self.scores[s.0]))
        }
    }

    /// Build the heap from an initial score array, admitting only entries
    /// strictly below `thresh`.
    pub fn build_thresh(&mut self, scores: &[f64], thresh: f64) {
        debug_assert_eq!(scores.len(), self.scores.len());
        self.scores.copy_from_slice(scores);
        self.len = 0;
        for s in 0..self.scores.len() {
            if self.scores[s] < thresh {
                self.admit(Slot(s));
            }
        }
    }

    /// Remove and return the minimum member.
    pub fn pop_min(&mut self) -> Option<(Slot, f64)> {
        let (s, score) = self.min()?;
        self.swap(HeapPos(1), HeapPos(self.len));
        self.len -= 1;
        self.sift_down(HeapPos(1));
        Some((s, score))
    }

    /// Remove an arbitrary member by identity.
    pub fn remove(&mut self, s: Slot) {
        debug_assert!(self.contains(s));
        let pos = self.q[s.0];
        self.swap(pos, HeapPos(self.len));
        self.len -= 1;
        if pos.0 <= self.len {
            self.reheap(pos);
        }
    }

    /// Re-score a slot: insert it if previously absent and now improving,
    /// remove it if previously present and no longer improving, otherwise
    /// re-heapify it in place.
    pub fn rescore(&mut self, s: Slot, score: f64) {
        let was_member = self.contains(s);
        self.scores[s.0] = score;
        match (was_member, score < 0.0) {
            (false, true) => self.admit(s),
            (true, false) => self.remove(s),
            (true, true) => self.reheap(self.q[s.0]),
            (false, false) => {}
        }
    }

    /// Move a currently-absent slot into the heap prefix and sift it up.
    fn admit(&mut self, s: Slot) {
        debug_assert!(!self.contains(s));
        let pos = self.q[s.0];
        self.len += 1;
        self.swap(pos, HeapPos(self.len));
        self.sift_up(HeapPos(self.len));
    }

    /// Restore heap order at `pos` after its key changed either way.
    fn reheap(&mut self, pos: HeapPos) {
        let s = self.p[pos.0];
        self.sift_up(pos);
        self.sift_down(self.q[s.0]);
    }

    #[inline]
    fn key(&self, pos: HeapPos) -> f64 {
        self.scores[self.p[pos.0].0]
    }

    fn swap(&mut self, i: HeapPos, j: HeapPos) {
        self.p.swap(i.0, j.0);
        self.q[self.p[i.0].0] = i;
        self.q[self.p[j.0].0] = j;
    }

    fn sift_up(&mut self, mut pos: HeapPos) {
        while pos.0 > 1 {
            let parent = HeapPos(pos.0 / 2);
            if self.key(pos) < self.key(parent) {
                self.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: HeapPos) {
        loop {
            let left = pos.0 * 2;
            let right = left + 1;
            let mut smallest = pos;
            if left <= self.len && self.key(HeapPos(left)) < self.key(smallest) {
                smallest = HeapPos(left);
            }
            if right <= self.len && self.key(HeapPos(right)) < self.key(smallest) {
                smallest = HeapPos(right);
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Check the structural invariants: `q[p[i]] == i` for every position and
    /// the min-heap order over the member prefix. Test support.
    #[cfg(test)]
    fn check_invariants(&self) {
        for i in 1..self.p.len() {
            assert_eq!(self.q[self.p[i].0], HeapPos(i), "q is not p's inverse");
        }
        for i in 2..=self.len {
            assert!(
                self.key(HeapPos(i / 2)) <= self.key(HeapPos(i)),
                "heap order violated at position {i}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn build_thresh_admits_only_improving() {
        let mut h = ScoredHeap::new(6);
        h.build_thresh(&[-0.5, 0.0, -0.1, 3.0, -2.0, 0.2], 0.0);
        assert_eq!(h.len(), 3);
        assert_eq!(h.min(), Some((Slot(4), -2.0)));
        h.check_invariants();
    }

    #[test]
    fn pop_returns_ascending_scores() {
        let mut h = ScoredHeap::new(5);
        h.build_thresh(&[-0.5, -0.3, -0.1, -2.0, -0.8], 0.0);
        let mut out = Vec::new();
        while let Some((_, score)) = h.pop_min() {
            h.check_invariants();
            out.push(score);
        }
        assert_eq!(out, vec![-2.0, -0.8, -0.5, -0.3, -0.1]);
    }

    #[test]
    fn remove_by_identity() {
        let mut h = ScoredHeap::new(4);
        h.build_thresh(&[-4.0, -3.0, -2.0, -1.0], 0.0);
        h.remove(Slot(0));
        h.check_invariants();
        assert!(!h.contains(Slot(0)));
        assert_eq!(h.min(), Some((Slot(1), -3.0)));
    }

    #[test]
    fn rescore_moves_across_membership_boundary() {
        let mut h = ScoredHeap::new(3);
        h.build_thresh(&[-1.0, 0.5, -0.2], 0.0);
        // Member worsens past the threshold: evicted.
        h.rescore(Slot(0), 0.1);
        assert!(!h.contains(Slot(0)));
        // Absent slot improves: admitted.
        h.rescore(Slot(1), -3.0);
        assert!(h.contains(Slot(1)));
        assert_eq!(h.min(), Some((Slot(1), -3.0)));
        // Member re-scored in place.
        h.rescore(Slot(2), -5.0);
        assert_eq!(h.min(), Some((Slot(2), -5.0)));
        h.check_invariants();
    }

    /// Random push/pop/rescore sequences keep `q[p[i]] == i` and the
    /// min-at-top property.
    #[test]
    fn fuzz_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = 24;
        let mut h = ScoredHeap::new(m);
        let init: Vec<f64> = (0..m).map(|_| rng.random_range(-1.0..1.0)).collect();
        h.build_thresh(&init, 0.0);
        h.check_invariants();
        for _ in 0..500 {
            match rng.random_range(0..3) {
                0 => {
                    h.pop_min();
                }
                1 => {
                    let s = Slot(rng.random_range(0..m));
                    h.rescore(s, rng.random_range(-1.0..1.0));
                }
                _ => {
                    if let Some((s, _)) = h.min() {
                        if rng.random_range(0..2) == 0 {
                            h.remove(s);
                        }
                    }
                }
            }
            h.check_invariants();
            if let Some((_, score)) = h.min() {
                // Every member has a score >= the top.
                for slot in 0..m {
                    if h.contains(Slot(slot)) {
                        assert!(h.score(Slot(slot)) >= score);
                    }
                }
            }
        }
    }
}
