//! Final branch-length assignment from a populated average table.
//!
//! One pass over the edges, no search: pendant edges (leaf-adjacent, and the
//! top edge at the root leaf) use the three-point closed form, internal
//! edges the weighted quartet estimate of their current configuration. OLS
//! and balanced each supply their own lambda; everything else is shared.

use crate::avgdist::{AverageTable, Scheme};
use crate::nni::{quartet, wf2};
use crate::traverse::postorder;
use crate::tree::{EdgeId, Tree};

/// Compute every edge's branch length for the table's scheme and refresh the
/// tree's total weight.
pub fn assign_weights(tree: &mut Tree, table: &AverageTable) {
    let edges: Vec<EdgeId> = postorder(tree).collect();
    for &e in &edges {
        let length = edge_length(tree, table, e);
        tree.edge_mut(e).length = length;
    }
    tree.weight = tree.total_weight();
}

fn edge_length(tree: &Tree, table: &AverageTable, e: EdgeId) -> f64 {
    let tail = tree.edge(e).tail;
    let head = e.head();
    if tree.parent_edge(tail).is_none() {
        // Top edge: the pendant of the root leaf. Its "sibling" sets are the
        // two subtrees hanging below the head.
        return match tree.children(head) {
            // Two-taxon tree: the seeded diagonal is the full distance.
            None => table.at(head, head),
            Some((l, r)) => {
                0.5 * (table.at(l.head(), head) + table.at(r.head(), head)
                    - table.at(l.head(), r.head()))
            }
        };
    }
    match tree.children(head) {
        // Pendant edge: three-point formula against the sibling subtree and
        // the leaf set above the parent.
        None => {
            let sib = tree.sibling_edge(e).expect("non-top edge has a sibling");
            let u = tree.edge(e).tail;
            0.5 * (table.at(head, sib.head()) + table.at(head, u)
                - table.at(sib.head(), u))
        }
        // Internal edge: quartet estimate of the current configuration.
        Some(_) => {
            let q = quartet(tree, table, e).expect("internal edge has a quartet");
            let lambda = match table.scheme() {
                Scheme::Ols => {
                    let (a, b, c, d) = (q.a as f64, q.b as f64, q.c as f64, q.d as f64);
                    (b * c + a * d) / ((a + b) * (c + d))
                }
                Scheme::Balanced => 0.5,
            };
            wf2(lambda, q.d_ru, q.d_ld, q.d_lu, q.d_rd, q.d_du, q.d_lr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avgdist::AverageTable;
    use crate::insert::build_me;
    use crate::matrix::DistanceMatrix;

    /// The unique unrooted 3-leaf tree solves the star equations exactly.
    #[test]
    fn three_taxa_pendants_are_exact() {
        let d = DistanceMatrix::from_rows(
            vec![
                vec![0.0, 5.0, 9.0],
                vec![5.0, 0.0, 10.0],
                vec![9.0, 10.0, 0.0],
            ],
            ["A", "B", "C"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        for scheme in [Scheme::Ols, Scheme::Balanced] {
            let mut table = AverageTable::new(3, scheme);
            let mut tree = build_me(&d, scheme, &mut table);
            assign_weights(&mut tree, &table);
            let mut pendants: Vec<(String, f64)> = tree
                .edge_ids()
                .filter(|&e| tree.children(e.head()).is_none())
                .map(|e| (tree.node(e.head()).label.clone(), tree.edge(e).length))
                .collect();
            // The root leaf's pendant is the top edge.
            let top = tree.top_edge().unwrap();
            pendants.push((
                tree.node(tree.root()).label.clone(),
                tree.edge(top).length,
            ));
            pendants.sort_by(|a, b| a.0.cmp(&b.0));
            let lengths: Vec<f64> = pendants.iter().map(|p| p.1).collect();
            assert!((lengths[0] - 2.0).abs() < 1e-12, "{scheme:?}: {lengths:?}");
            assert!((lengths[1] - 3.0).abs() < 1e-12, "{scheme:?}: {lengths:?}");
            assert!((lengths[2] - 7.0).abs() < 1e-12, "{scheme:?}: {lengths:?}");
        }
    }

    #[test]
    fn two_taxa_edge_is_the_input_distance() {
        let d = DistanceMatrix::from_rows(
            vec![vec![0.0, 4.25], vec![4.25, 0.0]],
            ["A", "B"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let mut table = AverageTable::new(2, Scheme::Ols);
        let mut tree = build_me(&d, Scheme::Ols, &mut table);
        assign_weights(&mut tree, &table);
        let top = tree.top_edge().unwrap();
        assert_eq!(tree.edge(top).length, 4.25);
        assert_eq!(tree.weight, 4.25);
    }
}
