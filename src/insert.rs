//! Sequential minimum-evolution insertion builders (OLS "GME" and balanced
//! "BME").
//!
//! # Overview
//! Taxa are inserted one at a time, in input order. For each new taxon the
//! builder:
//!
//! 1. computes the taxon's average distance to every subtree of the current
//!    tree in two O(n) sweeps ([`AverageTable::new_leaf_averages`]);
//! 2. scans every edge in pre-order, accumulating the change in total tree
//!    length that splitting this edge (instead of its parent) would cause,
//!    a closed-form O(1) step per edge given the table;
//! 3. splits the minimizing edge, fixes the subtree sizes along the root
//!    path, and incrementally updates the table.
//!
//! The scan keeps the *first* edge encountered at the minimal delta: the
//! comparison is a strict `<`, so later equal-score edges never win. This
//! bias is kept exactly for output compatibility with existing pipelines.

use crate::avgdist::{AverageTable, Scheme};
use crate::matrix::DistanceMatrix;
use crate::traverse::preorder;
use crate::tree::{EdgeId, NodeId, Tree};

/// Build a tree by sequential insertion under `scheme`, leaving `table`
/// consistent with the final topology (so a same-scheme refinement pass can
/// use it without a rebuild).
pub fn build_me(d: &DistanceMatrix, scheme: Scheme, table: &mut AverageTable) -> Tree {
    let n = d.n();
    let mut tree = Tree::with_capacity(2 * n.max(2) - 2);
    for taxon in 0..n {
        add_taxon(&mut tree, d, scheme, table, taxon);
    }
    tree
}

/// One step of the insertion state machine: empty tree, single pair, or the
/// general scan-and-split case.
fn add_taxon(
    tree: &mut Tree,
    d: &DistanceMatrix,
    scheme: Scheme,
    table: &mut AverageTable,
    taxon: usize,
) {
    let label = d.label(taxon);
    if tree.size() == 0 {
        let root = tree.add_leaf(label, taxon);
        tree.set_root(root, None);
        return;
    }
    if tree.size() == 1 {
        let second = tree.add_leaf(label, taxon);
        let root = tree.root();
        let top = tree.link(root, second, 0.0);
        {
            let e = tree.edge_mut(top);
            e.bottomsize = 1;
            e.topsize = 1;
        }
        tree.set_root(root, Some(top));
        let root_taxon = tree.node(root).index2.expect("root is a taxon");
        table.seed_pair(second, d.get(root_taxon, taxon));
        return;
    }

    let v = tree.add_leaf(label, taxon);
    table.new_leaf_averages(tree, d, v);

    // Pre-order scan: every edge's delta is relative to its parent, with the
    // top edge as the zero baseline, so `totalweight` accumulates the length
    // change of the whole hypothetical split.
    let edges: Vec<EdgeId> = preorder(tree).collect();
    let top = tree.top_edge().expect("tree with >= 2 taxa");
    let mut best = top;
    let mut best_weight = 0.0;
    for &e in &edges {
        let weight = if e == top {
            0.0
        } else {
            let parent = EdgeId(tree.edge(e).tail.0);
            tree.edge(parent).totalweight + insertion_delta(tree, table, scheme, e, v)
        };
        tree.edge_mut(e).totalweight = weight;
        if weight < best_weight {
            best_weight = weight;
            best = e;
        }
    }

    let x = tree.edge(best).head;
    let (w, _internal, pendant) = tree.split_edge(best, v);
    table.update_after_insertion(tree, w, x, v);
    bump_sizes(tree, pendant);
}

/// Length change of inserting `v` on `e` minus inserting it on `e`'s parent.
///
/// The two placements differ by one nearest-neighbor interchange of `v` with
/// the sibling subtree, so the difference reduces to the quartet formulas
/// over the four surrounding leaf sets: `A` above the parent edge, sibling
/// `B`, the subtree `C` below `e`, and `v` itself.
fn insertion_delta(
    tree: &Tree,
    table: &AverageTable,
    scheme: Scheme,
    e: EdgeId,
    v: NodeId,
) -> f64 {
    let parent = EdgeId(tree.edge(e).tail.0);
    let u = parent.head();
    let sib = tree.sibling_edge(e).expect("non-top edge has a sibling");
    let x = e.head();
    let s = sib.head();

    let d_ab = table.at(s, u); // A-B: sibling vs above-parent
    let d_ac = table.at(x, u); // A-C
    let d_av = table.at(v, u); // A-v (top sweep)
    let d_bc = table.at(s, x); // B-C
    let d_bv = table.at(s, v); // B-v (bottom sweep)
    let d_cv = table.at(x, v); // C-v (bottom sweep)

    match scheme {
        Scheme::Balanced => 0.25 * ((d_av + d_bc) - (d_ab + d_cv)),
        Scheme::Ols => {
            let a = tree.edge(parent).topsize as f64;
            let b = tree.edge(sib).bottomsize as f64;
            let c = tree.edge(e).bottomsize as f64;
            // Middle-edge OLS estimates of the two placements; their other
            // edge estimates agree, so the difference is the length change.
            let lam_parent = (b + a * c) / ((a + 1.0) * (b + c));
            let lam_e = (b + a * c) / ((a + b) * (1.0 + c));
            let w_parent = 0.5
                * (lam_parent * (d_ab + d_cv) + (1.0 - lam_parent) * (d_ac + d_bv)
                    - d_av
                    - d_bc);
            let w_e = 0.5
                * (lam_e * (d_av + d_bc) + (1.0 - lam_e) * (d_ac + d_bv) - d_ab - d_cv);
            w_e - w_parent
        }
    }
}

/// Fix every edge's leaf counts after a split: the new pendant holds one
/// leaf, its ancestors gained one below, everything else gained one above.
fn bump_sizes(tree: &mut Tree, pendant: EdgeId) {
    tree.edge_mut(pendant).bottomsize = 1;
    let mut node = tree.edge(pendant).tail;
    while let Some(p) = tree.parent_edge(node) {
        tree.edge_mut(p).bottomsize += 1;
        node = tree.edge(p).tail;
    }
    let n = tree.n_leaves();
    let ids: Vec<EdgeId> = tree.edge_ids().collect();
    for e in ids {
        let bottom = tree.edge(e).bottomsize;
        tree.edge_mut(e).topsize = n - bottom;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rng: &mut StdRng, n: usize) -> DistanceMatrix {
        let mut rows = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let v = rng.random_range(0.5..10.0);
                rows[i][j] = v;
                rows[j][i] = v;
            }
        }
        let labels = (0..n).map(|i| format!("t{i}")).collect();
        DistanceMatrix::from_rows(rows, labels).unwrap()
    }

    fn assert_shape(tree: &Tree, n: usize) {
        assert_eq!(tree.n_leaves(), n);
        assert_eq!(tree.size(), 2 * n - 2);
        let internals = (0..tree.size())
            .filter(|&i| matches!(tree.node(NodeId(i)).kind, NodeKind::Binary { .. }))
            .count();
        assert_eq!(internals, n - 2);
        assert!(tree.is_leaf(tree.root()));
        for e in tree.edge_ids() {
            let edge = tree.edge(e);
            assert_eq!(edge.topsize + edge.bottomsize, n);
        }
    }

    #[test]
    fn gme_builds_binary_leaf_rooted_trees() {
        let mut rng = StdRng::seed_from_u64(11);
        for n in 3..=9 {
            let d = random_matrix(&mut rng, n);
            let mut table = AverageTable::new(n, Scheme::Ols);
            let tree = build_me(&d, Scheme::Ols, &mut table);
            assert_shape(&tree, n);
        }
    }

    #[test]
    fn bme_builds_binary_leaf_rooted_trees() {
        let mut rng = StdRng::seed_from_u64(12);
        for n in 3..=9 {
            let d = random_matrix(&mut rng, n);
            let mut table = AverageTable::new(n, Scheme::Balanced);
            let tree = build_me(&d, Scheme::Balanced, &mut table);
            assert_shape(&tree, n);
        }
    }

    /// The incremental table must equal a from-scratch rebuild after every
    /// single insertion, for both schemes.
    #[test]
    fn incremental_table_matches_full_rebuild() {
        for scheme in [Scheme::Ols, Scheme::Balanced] {
            let mut rng = StdRng::seed_from_u64(23);
            for n in 3..=8 {
                let d = random_matrix(&mut rng, n);
                let mut table = AverageTable::new(n, scheme);
                let mut tree = Tree::with_capacity(2 * n - 2);
                for taxon in 0..n {
                    add_taxon(&mut tree, &d, scheme, &mut table, taxon);
                    if taxon < 2 {
                        continue;
                    }
                    let mut fresh = AverageTable::new(n, scheme);
                    fresh.rebuild(scheme, &tree, &d);
                    for i in tree.edge_ids() {
                        for j in tree.edge_ids() {
                            let inc = table.at(i.head(), j.head());
                            let full = fresh.at(i.head(), j.head());
                            assert!(
                                (inc - full).abs() < 1e-9,
                                "{scheme:?} n={n} taxon={taxon} A[{}][{}]: {inc} vs {full}",
                                i.0,
                                j.0
                            );
                        }
                    }
                }
            }
        }
    }
}
