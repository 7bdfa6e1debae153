//! Incrementally-maintained table of average distances between subtrees.
//!
//! # Overview
//! `A` is a dense `(2n-2) x (2n-2)` matrix indexed by node index. Every edge
//! is identified by its head node, and each entry relates the leaf sets on
//! two sides of the topology:
//!
//! - subtrees below `i` and below `j` are disjoint: `A[i][j]` is the average
//!   distance between the two subtrees;
//! - `j` is an ancestor of `i`: `A[i][j] = A[j][i]` is the average between
//!   the subtree below `i` and the leaf set **above** `j`;
//! - diagonal: `A[i][i]` is subtree-below-`i` against everything above it.
//!
//! Two weighting schemes share the table layout:
//!
//! - **OLS**: size-weighted averages. Merging two child subtrees weights
//!   them by leaf count, so every entry is the plain mean over leaf pairs.
//! - **Balanced**: topology-only averages. Each child contributes 1/2
//!   regardless of size, so a leaf's influence decays with its depth.
//!
//! The table is built once in O(n²) and then kept exactly consistent by
//! localized updates after every insertion and every NNI swap: after any
//! sequence of operations, each entry equals what a from-scratch rebuild
//! would produce on the resulting topology. The differential tests in the
//! builder and refinement modules check precisely that.
//!
//! # Transient asymmetry
//! While a new taxon `v` is being placed, row and column `v` temporarily hold
//! two different sweeps: `A[i][v]` is the average from `v` to the subtree
//! below `i`, while `A[v][i]` is the average from `v` to the leaf set above
//! `i`. [`AverageTable::update_after_insertion`] consumes both and restores
//! symmetry.

use crate::matrix::DistanceMatrix;
use crate::traverse::{postorder, preorder};
use crate::tree::{EdgeId, NodeId, Tree};

/// Weighting scheme for averages, branch lengths and refinement scores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// Ordinary least squares: subtree-size-weighted averages.
    Ols,
    /// Balanced: fixed 1/2 weights per topology level.
    Balanced,
}

/// Post-order bookkeeping for O(1) ancestor tests.
///
/// In post-order an edge's subtree occupies the contiguous run of positions
/// ending at the edge itself, so "is `i` strictly below `j`" is an interval
/// check.
pub(crate) struct EdgeOrder {
    /// Edge id -> post-order position.
    pos: Vec<usize>,
    /// Post-order position -> edge id.
    pub(crate) order: Vec<EdgeId>,
    /// Edge id -> number of edges in its subtree, itself included.
    count: Vec<usize>,
}

impl EdgeOrder {
    pub(crate) fn new(tree: &Tree) -> Self {
        let mut pos = vec![usize::MAX; tree.size()];
        let mut count = vec![0usize; tree.size()];
        let order: Vec<EdgeId> = postorder(tree).collect();
        for (p, &e) in order.iter().enumerate() {
            pos[e.0] = p;
            count[e.0] = match tree.children(e.head()) {
                None => 1,
                Some((l, r)) => 1 + count[l.0] + count[r.0],
            };
        }
        EdgeOrder { pos, order, count }
    }

    /// True when `i` lies strictly below `j`.
    #[inline]
    pub(crate) fn is_below(&self, i: EdgeId, j: EdgeId) -> bool {
        let pj = self.pos[j.0];
        let pi = self.pos[i.0];
        pi < pj && pi + self.count[j.0] > pj
    }

    /// Edges strictly below `j`, in post-order.
    pub(crate) fn below(&self, j: EdgeId) -> impl Iterator<Item = EdgeId> + '_ {
        let pj = self.pos[j.0];
        let start = pj + 1 - self.count[j.0];
        self.order[start..pj].iter().copied()
    }
}

/// The average-distance table. Allocated once at `2n - 2`, zero-initialized,
/// populated by a full build, then maintained incrementally.
pub struct AverageTable {
    side: usize,
    a: Vec<f64>,
    scheme: Scheme,
}

/// Scheme-directed merge of two averages with their set sizes.
#[inline]
fn blend(scheme: Scheme, va: f64, wa: usize, vb: f64, wb: usize) -> f64 {
    match scheme {
        Scheme::Ols => (wa as f64 * va + wb as f64 * vb) / (wa + wb) as f64,
        Scheme::Balanced => 0.5 * (va + vb),
    }
}

impl AverageTable {
    /// Zeroed table for a tree of `n_taxa` leaves (side `2*n_taxa - 2`).
    pub fn new(n_taxa: usize, scheme: Scheme) -> Self {
        let side = if n_taxa < 2 { 2 } else { 2 * n_taxa - 2 };
        AverageTable {
            side,
            a: vec![0.0; side * side],
            scheme,
        }
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Raw cell read; respects the transient row/column-`v` asymmetry.
    #[inline]
    pub fn at(&self, i: NodeId, j: NodeId) -> f64 {
        self.a[i.0 * self.side + j.0]
    }

    #[inline]
    fn set_raw(&mut self, i: NodeId, j: NodeId, value: f64) {
        self.a[i.0 * self.side + j.0] = value;
    }

    #[inline]
    fn set_sym(&mut self, i: NodeId, j: NodeId, value: f64) {
        self.a[i.0 * self.side + j.0] = value;
        self.a[j.0 * self.side + i.0] = value;
    }

    #[inline]
    fn add_sym(&mut self, i: NodeId, j: NodeId, delta: f64) {
        let v = self.a[i.0 * self.side + j.0] + delta;
        self.set_sym(i, j, v);
    }

    /// Average between `v` and the subtree below edge `e` (bottom sweep cell).
    #[inline]
    fn down(&self, e: EdgeId, v: NodeId) -> f64 {
        self.at(e.head(), v)
    }

    /// Average between `v` and the leaf set above edge `e` (top sweep cell).
    #[inline]
    fn up(&self, v: NodeId, e: EdgeId) -> f64 {
        self.at(v, e.head())
    }

    /// Seed for the 2-taxon tree: the second leaf's diagonal is its distance
    /// to the root taxon.
    pub fn seed_pair(&mut self, second: NodeId, dist: f64) {
        self.set_sym(second, second, dist);
    }

    // ------------------------------------------------------------------
    // Full build
    // ------------------------------------------------------------------

    /// Rebuild every entry from scratch for `scheme` on the current topology.
    ///
    /// O(n²): one bottom-up pass over ordered disjoint pairs, then one
    /// traversal per reference edge for the above-side entries.
    pub fn rebuild(&mut self, scheme: Scheme, tree: &Tree, d: &DistanceMatrix) {
        self.scheme = scheme;
        let ord = EdgeOrder::new(tree);
        self.fill_disjoint(tree, d, &ord);
        self.fill_above(tree, d, &ord);
    }

    /// Disjoint-pair entries. Pairs are processed in increasing post-order of
    /// the later edge, so every merge reads already-computed cells.
    fn fill_disjoint(&mut self, tree: &Tree, d: &DistanceMatrix, ord: &EdgeOrder) {
        for (pj, &j) in ord.order.iter().enumerate() {
            for &i in &ord.order[..pj] {
                if ord.is_below(i, j) {
                    continue;
                }
                let value = match tree.children(j.head()) {
                    Some((jl, jr)) => blend(
                        self.scheme,
                        self.at(i.head(), jl.head()),
                        tree.edge(jl).bottomsize,
                        self.at(i.head(), jr.head()),
                        tree.edge(jr).bottomsize,
                    ),
                    None => match tree.children(i.head()) {
                        Some((il, ir)) => blend(
                            self.scheme,
                            self.at(il.head(), j.head()),
                            tree.edge(il).bottomsize,
                            self.at(ir.head(), j.head()),
                            tree.edge(ir).bottomsize,
                        ),
                        None => {
                            let ti = tree.node(i.head()).index2.expect("leaf");
                            let tj = tree.node(j.head()).index2.expect("leaf");
                            d.get(ti, tj)
                        }
                    },
                };
                self.set_sym(i.head(), j.head(), value);
            }
        }
    }

    /// Ancestor entries and diagonals: one descent per reference edge `k`,
    /// reading the sibling (disjoint) and parent (above) entries.
    fn fill_above(&mut self, tree: &Tree, d: &DistanceMatrix, ord: &EdgeOrder) {
        let root_taxon = tree.node(tree.root()).index2.expect("root is a leaf");
        for k in preorder(tree) {
            let parent = tree.parent_edge(tree.edge(k).tail);
            // Below-k edges in post-order, then k itself for the diagonal.
            let members: Vec<EdgeId> = ord.below(k).chain(std::iter::once(k)).collect();
            for i in members {
                let value = match parent {
                    // Top edge: the above set is exactly the root leaf.
                    None => match tree.children(i.head()) {
                        None => {
                            let ti = tree.node(i.head()).index2.expect("leaf");
                            d.get(ti, root_taxon)
                        }
                        Some((il, ir)) => blend(
                            self.scheme,
                            self.at(il.head(), k.head()),
                            tree.edge(il).bottomsize,
                            self.at(ir.head(), k.head()),
                            tree.edge(ir).bottomsize,
                        ),
                    },
                    Some(p) => {
                        let s = tree.sibling_edge(k).expect("internal tail has sibling");
                        blend(
                            self.scheme,
                            self.at(i.head(), s.head()),
                            tree.edge(s).bottomsize,
                            self.at(i.head(), p.head()),
                            tree.edge(p).topsize,
                        )
                    }
                };
                if i == k {
                    self.set_sym(k.head(), k.head(), value);
                } else {
                    self.set_sym(i.head(), k.head(), value);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // New-leaf sweeps (insertion step 1)
    // ------------------------------------------------------------------

    /// Compute `v`'s average distance to every subtree of the current tree in
    /// two O(n) sweeps: bottom-up for subtrees below each edge (stored at
    /// `A[i][v]`), then top-down for the set above each edge (`A[v][i]`).
    pub fn new_leaf_averages(&mut self, tree: &Tree, d: &DistanceMatrix, v: NodeId) {
        let vt = tree_taxon(tree, v);
        for e in postorder(tree) {
            let value = match tree.children(e.head()) {
                None => d.get(tree_taxon(tree, e.head()), vt),
                Some((l, r)) => blend(
                    self.scheme,
                    self.down(l, v),
                    tree.edge(l).bottomsize,
                    self.down(r, v),
                    tree.edge(r).bottomsize,
                ),
            };
            self.set_raw(e.head(), v, value);
        }
        let root_taxon = tree.node(tree.root()).index2.expect("root is a leaf");
        for e in preorder(tree) {
            let value = match tree.parent_edge(tree.edge(e).tail) {
                None => d.get(vt, root_taxon),
                Some(p) => {
                    let s = tree.sibling_edge(e).expect("internal tail has sibling");
                    blend(
                        self.scheme,
                        self.up(v, p),
                        tree.edge(p).topsize,
                        self.down(s, v),
                        tree.edge(s).bottomsize,
                    )
                }
            };
            self.set_raw(v, e.head(), value);
        }
    }

    // ------------------------------------------------------------------
    // Incremental update after an insertion
    // ------------------------------------------------------------------

    /// Restore full consistency after `v` was inserted by splitting the edge
    /// whose head was `x` (its row identity is preserved; `w` is the new
    /// internal node that took the split edge's place).
    ///
    /// Must run after [`Tree::split_edge`] but *before* subtree sizes are
    /// bumped: the OLS blends need the pre-insertion sizes still stored on
    /// the edges, and the balanced walks only use the topology.
    ///
    /// Touches exactly the entries whose referenced side gained `v`:
    /// the bottom sides of root-path edges, the above sides of everything
    /// else, and the fresh rows of `w` and `v`.
    pub fn update_after_insertion(&mut self, tree: &Tree, w: NodeId, x: NodeId, v: NodeId) {
        let ord = EdgeOrder::new(tree);
        let w_edge = EdgeId(w.0);
        let pendant = EdgeId(v.0);
        // Old subtree-below-x row, captured before any write.
        let old_row_x: Vec<f64> = (0..self.side).map(|i| self.at(NodeId(i), x)).collect();
        let up_x = self.up(v, EdgeId(x.0));
        let down_x = self.down(EdgeId(x.0), v);
        // Pre-insertion sizes, still stored on the split edge's row.
        let b_old = tree.edge(EdgeId(x.0)).bottomsize;
        let a_old = tree.edge(EdgeId(x.0)).topsize;
        // Root path above the new node, nearest first.
        let path = root_path(tree, w_edge);

        // Bottom sides of path edges gained v.
        for (t, &j) in path.iter().enumerate() {
            let c = 0.5f64.powi(t as i32 + 1);
            let b_j = tree.edge(j).bottomsize;
            for &i in &ord.order {
                if i == j || ord.is_below(i, j) {
                    continue;
                }
                let av = if ord.is_below(j, i) {
                    self.up(v, i)
                } else {
                    self.down(i, v)
                };
                let new = match self.scheme {
                    Scheme::Ols => {
                        (b_j as f64 * self.at(j.head(), i.head()) + av) / (b_j as f64 + 1.0)
                    }
                    Scheme::Balanced => {
                        self.at(j.head(), i.head()) + 0.5 * c * (av - old_row_x[i.0])
                    }
                };
                self.set_sym(j.head(), i.head(), new);
            }
            // Diagonal: above_j is unchanged, the bottom side gained v.
            let av = self.up(v, j);
            let new = match self.scheme {
                Scheme::Ols => (b_j as f64 * self.at(j.head(), j.head()) + av) / (b_j as f64 + 1.0),
                Scheme::Balanced => {
                    self.at(j.head(), j.head()) + 0.5 * c * (av - old_row_x[j.0])
                }
            };
            self.set_sym(j.head(), j.head(), new);
        }

        // Above sides of every off-path edge gained v. The walk starts at the
        // split edge itself (factor 1: v now hangs directly off its tail) and
        // at each path node's sibling subtree, halving per level descended.
        let mut stack: Vec<(EdgeId, f64)> = vec![(EdgeId(x.0), 1.0)];
        for t in 0..path.len() {
            let inner = if t == 0 { w_edge } else { path[t - 1] };
            if let Some(s) = tree.sibling_edge(inner) {
                stack.push((s, 0.5f64.powi(t as i32 + 1)));
            }
        }
        while let Some((k, c)) = stack.pop() {
            let a_k = tree.edge(k).topsize;
            for i in ord.below(k) {
                let new = match self.scheme {
                    Scheme::Ols => {
                        (a_k as f64 * self.at(i.head(), k.head()) + self.down(i, v))
                            / (a_k as f64 + 1.0)
                    }
                    Scheme::Balanced => {
                        self.at(i.head(), k.head())
                            + 0.5 * c * (self.down(i, v) - old_row_x[i.0])
                    }
                };
                self.set_sym(i.head(), k.head(), new);
            }
            let new = match self.scheme {
                Scheme::Ols => {
                    (a_k as f64 * self.at(k.head(), k.head()) + self.down(k, v))
                        / (a_k as f64 + 1.0)
                }
                Scheme::Balanced => {
                    self.at(k.head(), k.head()) + 0.5 * c * (self.down(k, v) - old_row_x[k.0])
                }
            };
            self.set_sym(k.head(), k.head(), new);
            if let Some((l, r)) = tree.children(k.head()) {
                stack.push((l, 0.5 * c));
                stack.push((r, 0.5 * c));
            }
        }

        // Fresh row for the new internal node w.
        for &i in &ord.order {
            if i == w_edge || i == pendant {
                continue;
            }
            if ord.is_below(i, w_edge) {
                // above_w equals the old above side of the split edge.
                self.set_sym(i.head(), w, old_row_x[i.0]);
            } else if ord.is_below(w_edge, i) {
                let new = blend(self.scheme, old_row_x[i.0], b_old, self.up(v, i), 1);
                self.set_sym(w, i.head(), new);
            } else {
                let new = blend(self.scheme, old_row_x[i.0], b_old, self.down(i, v), 1);
                self.set_sym(w, i.head(), new);
            }
        }
        let w_diag = blend(self.scheme, old_row_x[x.0], b_old, up_x, 1);
        self.set_sym(w, w, w_diag);

        // Finalize the pendant row: symmetrize the sweep values under the
        // post-split topology.
        let v_diag = blend(self.scheme, down_x, b_old, up_x, a_old);
        for &i in &ord.order {
            if i == pendant {
                continue;
            }
            if i == w_edge {
                self.set_sym(v, w, up_x);
            } else if ord.is_below(pendant, i) {
                let u = self.up(v, i);
                self.set_sym(v, i.head(), u);
            } else {
                let dn = self.down(i, v);
                self.set_sym(v, i.head(), dn);
            }
        }
        self.set_sym(v, v, v_diag);
    }

    // ------------------------------------------------------------------
    // Incremental update after an NNI swap
    // ------------------------------------------------------------------

    /// Restore full consistency after the topology swap around `center`.
    ///
    /// Post-swap roles: `kept` is the child of `center`'s head that did not
    /// move, `gained` is the subtree newly below `center` (the former sibling
    /// of `center`), `lost` is the subtree that moved up beside `center`.
    ///
    /// OLS averages depend only on leaf sets, so only `center`'s own row and
    /// column change. Balanced averages also depend on the internal topology
    /// of each side, so every side containing the swap point is re-weighted
    /// with factors decaying by half per level of distance.
    pub fn update_after_swap(
        &mut self,
        tree: &Tree,
        center: EdgeId,
        kept: EdgeId,
        gained: EdgeId,
        lost: EdgeId,
    ) {
        let ord = EdgeOrder::new(tree);
        let m = center.head();
        let u = tree.edge(center).tail;
        let q = tree
            .parent_edge(u)
            .expect("center edge of a swap is internal");
        let b_kept = tree.edge(kept).bottomsize;
        let b_gained = tree.edge(gained).bottomsize;
        let a_q = tree.edge(q).topsize;
        let b_lost = tree.edge(lost).bottomsize;

        // Center row: rebuilt from the two (unchanged) child rows and, below,
        // from the parent-above and moved-subtree rows.
        for &i in &ord.order {
            if i == center {
                continue;
            }
            if ord.is_below(i, center) {
                let new = blend(
                    self.scheme,
                    self.at(i.head(), u),
                    a_q,
                    self.at(i.head(), lost.head()),
                    b_lost,
                );
                self.set_sym(i.head(), m, new);
            } else {
                let new = blend(
                    self.scheme,
                    self.at(kept.head(), i.head()),
                    b_kept,
                    self.at(gained.head(), i.head()),
                    b_gained,
                );
                self.set_sym(m, i.head(), new);
            }
        }
        let diag = blend(
            self.scheme,
            self.at(kept.head(), m),
            b_kept,
            self.at(gained.head(), m),
            b_gained,
        );
        self.set_sym(m, m, diag);

        if self.scheme == Scheme::Ols {
            return;
        }

        // Balanced: re-weight every other side that contains the swap point.
        //
        // Sides reached by descending into the swap node from above (root
        // path bottoms, and above sides outside the swap subtree) exchanged
        // the weights of `lost` and `gained`.
        let w_minus_z = |table: &Self, partner: NodeId| {
            table.at(lost.head(), partner) - table.at(gained.head(), partner)
        };
        let path = root_path(tree, center);
        for (t, &j) in path.iter().enumerate() {
            let quarter_c = 0.25 * 0.5f64.powi(t as i32);
            for &i in &ord.order {
                if i == j || ord.is_below(i, j) {
                    continue;
                }
                let delta = quarter_c * w_minus_z(self, i.head());
                self.add_sym(j.head(), i.head(), delta);
            }
            let delta = quarter_c * w_minus_z(self, j.head());
            self.add_sym(j.head(), j.head(), delta);
            // Sibling subtrees hanging off this path node see the swap from
            // above with one extra halving. The swap node's own sibling is
            // the moved subtree itself and is handled below.
            if t > 0 {
                if let Some(s) = tree.sibling_edge(path[t - 1]) {
                    self.reweight_above(tree, &ord, s, 0.5 * 0.5f64.powi(t as i32 - 1), |tb, p| {
                        tb.at(lost.head(), p) - tb.at(gained.head(), p)
                    });
                }
            }
        }
        // The three subtrees at the swap point each see a different exchange.
        self.reweight_above(tree, &ord, kept, 1.0, |tb, p| {
            tb.at(gained.head(), p) - tb.at(lost.head(), p)
        });
        self.reweight_above(tree, &ord, gained, 1.0, |tb, p| {
            tb.at(kept.head(), p) - tb.at(p, u)
        });
        self.reweight_above(tree, &ord, lost, 1.0, |tb, p| {
            tb.at(p, u) - tb.at(kept.head(), p)
        });
    }

    /// Apply `delta(partner) * c / 4`, halving `c` per level, to the above
    /// sides of `top` and everything below it.
    fn reweight_above<F>(&mut self, tree: &Tree, ord: &EdgeOrder, top: EdgeId, c0: f64, diff: F)
    where
        F: Fn(&Self, NodeId) -> f64,
    {
        let mut stack = vec![(top, c0)];
        while let Some((k, c)) = stack.pop() {
            for i in ord.below(k) {
                let delta = 0.25 * c * diff(self, i.head());
                self.add_sym(i.head(), k.head(), delta);
            }
            let delta = 0.25 * c * diff(self, k.head());
            self.add_sym(k.head(), k.head(), delta);
            if let Some((l, r)) = tree.children(k.head()) {
                stack.push((l, 0.5 * c));
                stack.push((r, 0.5 * c));
            }
        }
    }
}

#[inline]
fn tree_taxon(tree: &Tree, v: NodeId) -> usize {
    tree.node(v).index2.expect("taxon node")
}

/// Edges strictly above `e`, nearest first, ending at the top edge.
pub(crate) fn root_path(tree: &Tree, e: EdgeId) -> Vec<EdgeId> {
    let mut path = Vec::new();
    let mut tail = tree.edge(e).tail;
    while let Some(p) = tree.parent_edge(tail) {
        path.push(p);
        tail = tree.edge(p).tail;
    }
    path
}
