//! Agglomerative Neighbor-Joining builder.
//!
//! Shares the tree model with the minimum-evolution builders but not the
//! average table: each iteration works from per-cluster separation sums
//! maintained in O(n), joins the Q-criterion minimizing pair, and contracts
//! the distance matrix. The final three clusters close a transient
//! trifurcation that [`Tree::detrifurcate`] resolves back to the canonical
//! leaf-rooted binary form.

use crate::matrix::DistanceMatrix;
use crate::tree::{NodeId, NodeKind, Tree, TreeBuildError};

/// Build a tree by neighbor joining. Branch lengths are assigned during
/// agglomeration; no average table is involved.
pub fn build_nj(d: &DistanceMatrix) -> Result<Tree, TreeBuildError> {
    let n = d.n();
    let mut tree = Tree::with_capacity(2 * n.max(2) - 2);
    for i in 0..n {
        tree.add_leaf(d.label(i), i);
    }
    match n {
        0 => return Ok(tree),
        1 => {
            tree.set_root(NodeId(0), None);
            return Ok(tree);
        }
        2 => {
            let top = tree.link(NodeId(0), NodeId(1), d.get(0, 1));
            {
                let e = tree.edge_mut(top);
                e.topsize = 1;
                e.bottomsize = 1;
            }
            tree.set_root(NodeId(0), Some(top));
            tree.weight = tree.total_weight();
            return Ok(tree);
        }
        _ => {}
    }

    // Active clusters: arena node plus a dense working row of distances to
    // every other active cluster.
    let mut nodes: Vec<NodeId> = (0..n).map(NodeId).collect();
    let mut dist: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| d.get(i, j)).collect())
        .collect();
    let mut sep: Vec<f64> = dist.iter().map(|row| row.iter().sum()).collect();

    while nodes.len() > 3 {
        let k = nodes.len();
        // Q-criterion scan; strict < keeps the first minimal pair.
        let (mut bi, mut bj) = (0, 1);
        let mut best = f64::INFINITY;
        for i in 0..k {
            for j in (i + 1)..k {
                let q = (k as f64 - 2.0) * dist[i][j] - sep[i] - sep[j];
                if q < best {
                    best = q;
                    bi = i;
                    bj = j;
                }
            }
        }
        let dij = dist[bi][bj];
        let li = 0.5 * dij + (sep[bi] - sep[bj]) / (2.0 * (k as f64 - 2.0));
        let lj = dij - li;
        let u = tree.add_internal("");
        let ei = tree.link(u, nodes[bi], li);
        let ej = tree.link(u, nodes[bj], lj);
        tree.node_mut(u).kind = NodeKind::Binary { left: ei, right: ej };

        // Contract: the joined pair's slot becomes the new cluster, the
        // second slot swap-removes with the tail. Separation sums are
        // maintained incrementally.
        let mut new_row = vec![0.0; k];
        for m in 0..k {
            if m == bi || m == bj {
                continue;
            }
            let dm = 0.5 * (dist[bi][m] + dist[bj][m] - dij);
            new_row[m] = dm;
            sep[m] += dm - dist[bi][m] - dist[bj][m];
        }
        nodes[bi] = u;
        for m in 0..k {
            dist[bi][m] = new_row[m];
            dist[m][bi] = new_row[m];
        }
        dist[bi][bi] = 0.0;
        sep[bi] = new_row.iter().sum();
        // Swap-remove cluster bj.
        let last = k - 1;
        nodes.swap(bj, last);
        sep.swap(bj, last);
        dist.swap(bj, last);
        for row in dist.iter_mut() {
            row.swap(bj, last);
        }
        nodes.pop();
        sep.pop();
        dist.pop();
        for row in dist.iter_mut() {
            row.pop();
        }
    }

    // Close the star on the last three clusters.
    let (a, b, c) = (nodes[0], nodes[1], nodes[2]);
    let (dab, dac, dbc) = (dist[0][1], dist[0][2], dist[1][2]);
    let la = 0.5 * (dab + dac - dbc);
    let lb = 0.5 * (dab + dbc - dac);
    let lc = 0.5 * (dac + dbc - dab);
    let center = tree.add_internal("");
    let ea = tree.link(center, a, la);
    let eb = tree.link(center, b, lb);
    let ec = tree.link(center, c, lc);
    tree.node_mut(center).kind = NodeKind::Trifurcation { a: ea, b: eb, c: ec };
    tree.set_root(center, None);
    tree.detrifurcate()?;
    tree.weight = tree.total_weight();
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Path length between two leaves in the finished tree.
    fn leaf_distance(tree: &Tree, x: NodeId, y: NodeId) -> f64 {
        let chain = |mut v: NodeId| {
            let mut path = vec![(v, 0.0)];
            let mut acc = 0.0;
            while let Some(p) = tree.parent_edge(v) {
                acc += tree.edge(p).length;
                v = tree.edge(p).tail;
                path.push((v, acc));
            }
            path
        };
        let cx = chain(x);
        let cy = chain(y);
        for &(vx, ax) in &cx {
            for &(vy, ay) in &cy {
                if vx == vy {
                    return ax + ay;
                }
            }
        }
        unreachable!("two leaves always share an ancestor");
    }

    #[test]
    fn three_taxa_solve_the_star_equations() {
        let d = DistanceMatrix::from_rows(
            vec![
                vec![0.0, 5.0, 9.0],
                vec![5.0, 0.0, 10.0],
                vec![9.0, 10.0, 0.0],
            ],
            labels(&["A", "B", "C"]),
        )
        .unwrap();
        let tree = build_nj(&d).unwrap();
        assert_eq!(tree.n_leaves(), 3);
        // Pendant lengths (2, 3, 7) reproduce every pairwise distance.
        assert!((leaf_distance(&tree, NodeId(0), NodeId(1)) - 5.0).abs() < 1e-12);
        assert!((leaf_distance(&tree, NodeId(0), NodeId(2)) - 9.0).abs() < 1e-12);
        assert!((leaf_distance(&tree, NodeId(1), NodeId(2)) - 10.0).abs() < 1e-12);
    }

    /// NJ recovers additive (tree-realizable) distances exactly.
    #[test]
    fn additive_five_taxa_distances_are_recovered() {
        // Distances generated from ((A:1,B:2):1,(C:3,(D:2,E:1):1):1) read as
        // an unrooted tree.
        let d = DistanceMatrix::from_rows(
            vec![
                vec![0.0, 3.0, 6.0, 6.0, 5.0],
                vec![3.0, 0.0, 7.0, 7.0, 6.0],
                vec![6.0, 7.0, 0.0, 6.0, 5.0],
                vec![6.0, 7.0, 6.0, 0.0, 3.0],
                vec![5.0, 6.0, 5.0, 3.0, 0.0],
            ],
            labels(&["A", "B", "C", "D", "E"]),
        )
        .unwrap();
        let tree = build_nj(&d).unwrap();
        assert_eq!(tree.n_leaves(), 5);
        assert!(tree.is_leaf(tree.root()));
        for pair in (0..5).combinations(2) {
            let (i, j) = (pair[0], pair[1]);
            let got = leaf_distance(&tree, NodeId(i), NodeId(j));
            assert!(
                (got - d.get(i, j)).abs() < 1e-9,
                "d({i},{j}) = {got}, want {}",
                d.get(i, j)
            );
        }
        for e in tree.edge_ids() {
            let edge = tree.edge(e);
            assert_eq!(edge.topsize + edge.bottomsize, 5);
        }
    }

    #[test]
    fn two_taxa_tree_is_a_single_edge() {
        let d = DistanceMatrix::from_rows(
            vec![vec![0.0, 1.5], vec![1.5, 0.0]],
            labels(&["A", "B"]),
        )
        .unwrap();
        let tree = build_nj(&d).unwrap();
        assert_eq!(tree.weight, 1.5);
        assert_eq!(tree.n_leaves(), 2);
    }
}
