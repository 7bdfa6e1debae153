//! Topology refinement by nearest-neighbor interchange (NNI for OLS,
//! balanced NNI for BME).
//!
//! # Overview
//! Every internal edge admits three configurations: the current topology and
//! the two swaps of a child subtree with the sibling subtree across the
//! edge. Each is scored with a six-term weighted quartet formula over
//! average-table entries; an edge with a strictly negative best score is an
//! improving move.
//!
//! A pass seeds the indexed heap with all improving edges, then loops:
//! pop the globally best edge, swap, patch the subtree sizes of exactly the
//! one edge whose boundary moved, update the table entries the swap
//! invalidates, and re-score:
//!
//! - **NNI** re-tests just the 4 edges newly adjacent to the swap point;
//! - **bNNI** conservatively re-tests every edge in the tree.
//!
//! The asymmetry between the variants is deliberate and kept. The pass ends
//! when the heap's minimum is no longer improving; the total tree weight is
//! non-increasing across the pass.

use crate::avgdist::{AverageTable, Scheme};
use crate::heap::{ScoredHeap, Slot};
use crate::traverse::postorder;
use crate::tree::{EdgeId, Tree, TreeBuildError};

/// Stop threshold for balanced NNI: scores at or above this are treated as
/// non-improving. Round-off on the balanced quartet sums can otherwise
/// re-propose the same swap pair forever. Not a tunable constant.
const BNNI_EPSILON: f64 = 1e-8;

/// Which child of the edge's head is exchanged with the sibling subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SwapDirection {
    Left,
    Right,
}

/// OLS middle-edge length estimate for the quartet `(A,B | C,D)`.
///
/// `lambda` weighs the `(AC, BD)` cross pairing against `(AD, BC)`.
pub(crate) fn wf2(
    lambda: f64,
    d_ad: f64,
    d_bc: f64,
    d_ac: f64,
    d_bd: f64,
    d_ab: f64,
    d_cd: f64,
) -> f64 {
    0.5 * (lambda * (d_ac + d_bd) + (1.0 - lambda) * (d_ad + d_bc) - d_ab - d_cd)
}

/// The six table entries around an internal edge: the two child subtrees
/// (`L`, `R`), the sibling subtree (`D`), and the leaf set above the tail
/// (`U`), in all pairings.
pub(crate) struct Quartet {
    pub(crate) d_lr: f64,
    pub(crate) d_lu: f64,
    pub(crate) d_ld: f64,
    pub(crate) d_ru: f64,
    pub(crate) d_rd: f64,
    pub(crate) d_du: f64,
    pub(crate) a: usize,
    pub(crate) b: usize,
    pub(crate) c: usize,
    pub(crate) d: usize,
}

/// Collect the quartet around `e`, or `None` when `e` is not internal.
pub(crate) fn quartet(tree: &Tree, table: &AverageTable, e: EdgeId) -> Option<Quartet> {
    let u = tree.edge(e).tail;
    if tree.is_leaf(u) || tree.is_leaf(e.head()) {
        return None;
    }
    let parent = tree.parent_edge(u).expect("internal tail has a parent");
    let down = tree.sibling_edge(e).expect("internal edge has a sibling");
    let (l, r) = tree.children(e.head()).expect("internal head has children");
    Some(Quartet {
        d_lr: table.at(l.head(), r.head()),
        d_lu: table.at(l.head(), u),
        d_ld: table.at(l.head(), down.head()),
        d_ru: table.at(r.head(), u),
        d_rd: table.at(r.head(), down.head()),
        d_du: table.at(down.head(), u),
        a: tree.edge(parent).topsize,
        b: tree.edge(down).bottomsize,
        c: tree.edge(l).bottomsize,
        d: tree.edge(r).bottomsize,
    })
}

/// Score the three configurations of `e`; `Some` only for an improving swap,
/// with its strictly negative length change.
fn edge_test(
    tree: &Tree,
    table: &AverageTable,
    scheme: Scheme,
    e: EdgeId,
) -> Option<(SwapDirection, f64)> {
    let q = quartet(tree, table, e)?;
    match scheme {
        Scheme::Ols => {
            let (a, b, c, d) = (q.a as f64, q.b as f64, q.c as f64, q.d as f64);
            let lam0 = (b * c + a * d) / ((a + b) * (c + d));
            let lam1 = (b * c + a * d) / ((a + c) * (b + d));
            let lam2 = (c * d + a * b) / ((a + d) * (b + c));
            let w0 = wf2(lam0, q.d_ru, q.d_ld, q.d_lu, q.d_rd, q.d_du, q.d_lr);
            let w1 = wf2(lam1, q.d_ru, q.d_ld, q.d_du, q.d_lr, q.d_lu, q.d_rd);
            let w2 = wf2(lam2, q.d_du, q.d_lr, q.d_lu, q.d_rd, q.d_ru, q.d_ld);
            if w0 <= w1 && w0 <= w2 {
                None
            } else if w1 <= w0 && w1 <= w2 {
                Some((SwapDirection::Left, w1 - w0))
            } else {
                Some((SwapDirection::Right, w2 - w0))
            }
        }
        Scheme::Balanced => {
            let w1 = 0.25 * ((q.d_du + q.d_lr) - (q.d_lu + q.d_rd));
            let w2 = 0.25 * ((q.d_du + q.d_lr) - (q.d_ru + q.d_ld));
            if w1 >= 0.0 && w2 >= 0.0 {
                None
            } else if w1 <= w2 {
                Some((SwapDirection::Left, w1))
            } else {
                Some((SwapDirection::Right, w2))
            }
        }
    }
}

/// Re-point the four edges around `e` for the chosen swap and patch the one
/// edge whose subtree boundary moved.
///
/// Returns `(kept, gained, lost)`: the child that stayed below `e`, the
/// subtree that moved in, and the subtree that moved out.
fn topology_swap(
    tree: &mut Tree,
    e: EdgeId,
    dir: SwapDirection,
) -> Result<(EdgeId, EdgeId, EdgeId), TreeBuildError> {
    let m = e.head();
    let (l, r) = tree.children(m).expect("swap on an internal edge");
    let (swap, kept) = match dir {
        SwapDirection::Left => (l, r),
        SwapDirection::Right => (r, l),
    };
    let down = tree.sibling_edge(e).expect("internal edge has a sibling");
    let (swap, _) = tree.detach(swap.head())?;
    let (down, u) = tree.detach(down.head())?;
    tree.attach(swap, u, down);
    tree.attach(down, m, swap);
    let b_swap = tree.edge(swap).bottomsize;
    let b_down = tree.edge(down).bottomsize;
    let edge = tree.edge_mut(e);
    edge.bottomsize = edge.bottomsize + b_down - b_swap;
    edge.topsize = edge.topsize + b_swap - b_down;
    Ok((kept, down, swap))
}

/// One refinement pass. Pops improving edges until the minimum is no longer
/// below the stop threshold, counting the swaps performed.
fn refine(
    tree: &mut Tree,
    table: &mut AverageTable,
    scheme: Scheme,
    stop: f64,
) -> Result<usize, TreeBuildError> {
    let m = tree.size();
    let mut scores = vec![0.0; m];
    let mut dirs: Vec<Option<SwapDirection>> = vec![None; m];
    let edges: Vec<EdgeId> = postorder(tree).collect();
    for &e in &edges {
        if let Some((dir, w)) = edge_test(tree, table, scheme, e) {
            scores[e.0] = w;
            dirs[e.0] = Some(dir);
        }
    }
    let mut heap = ScoredHeap::new(m);
    heap.build_thresh(&scores, 0.0);

    let mut swaps = 0;
    while let Some((slot, score)) = heap.min() {
        if score >= stop {
            break;
        }
        let e = EdgeId(slot.0);
        let dir = dirs[slot.0].take().expect("heap member has a direction");
        let (kept, gained, lost) = topology_swap(tree, e, dir)?;
        tree.weight += score;
        swaps += 1;
        heap.pop_min();
        table.update_after_swap(tree, e, kept, gained, lost);

        match scheme {
            Scheme::Ols => {
                // Only the four edges newly adjacent to the swap point can
                // change their best configuration.
                let parent = tree.parent_edge(tree.edge(e).tail);
                let sibling = tree.sibling_edge(e);
                for f in [Some(kept), Some(gained), sibling, parent].into_iter().flatten() {
                    retest(tree, table, scheme, f, &mut heap, &mut dirs);
                }
            }
            Scheme::Balanced => {
                // Balanced averages shift under every re-weighting, so every
                // edge is conservatively re-tested.
                let all: Vec<EdgeId> = postorder(tree).collect();
                for f in all {
                    if f == e {
                        continue;
                    }
                    retest(tree, table, scheme, f, &mut heap, &mut dirs);
                }
            }
        }
    }
    Ok(swaps)
}

/// Re-score one edge and update its heap membership accordingly.
fn retest(
    tree: &Tree,
    table: &AverageTable,
    scheme: Scheme,
    e: EdgeId,
    heap: &mut ScoredHeap,
    dirs: &mut [Option<SwapDirection>],
) {
    match edge_test(tree, table, scheme, e) {
        Some((dir, w)) => {
            dirs[e.0] = Some(dir);
            heap.rescore(Slot(e.0), w);
        }
        None => {
            dirs[e.0] = None;
            heap.rescore(Slot(e.0), 0.0);
        }
    }
}

/// OLS nearest-neighbor interchange pass.
pub fn refine_nni(tree: &mut Tree, table: &mut AverageTable) -> Result<usize, TreeBuildError> {
    debug_assert_eq!(table.scheme(), Scheme::Ols);
    refine(tree, table, Scheme::Ols, 0.0)
}

/// Balanced nearest-neighbor interchange pass.
pub fn refine_bnni(tree: &mut Tree, table: &mut AverageTable) -> Result<usize, TreeBuildError> {
    debug_assert_eq!(table.scheme(), Scheme::Balanced);
    refine(tree, table, Scheme::Balanced, -BNNI_EPSILON)
}
