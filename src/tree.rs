//! Arena-based binary tree model for distance-tree construction.
//!
//! # Overview
//! Nodes and edges live in flat `Vec` arenas owned by a [`Tree`] and are
//! addressed by small integer indices ([`NodeId`], [`EdgeId`]). Every non-root
//! node has exactly one parent edge, so an edge is identified by the index of
//! its *head* node: `EdgeId(i)` is the edge whose head is `NodeId(i)`. This is
//! the dense index used to address the average-distance table.
//!
//! The tree is always rooted at a *leaf* for bookkeeping purposes (never a
//! phylogenetic root). The root's single child edge is stored on the tree as
//! [`Tree::top_edge`], so node kinds stay strictly
//! `Leaf | Binary | Trifurcation`:
//!
//! ```text
//!   root (leaf taxon)
//!    |            <- top_edge
//!   internal
//!   /    \
//! ...    ...
//! ```
//!
//! The `Trifurcation` variant is transient: it only exists between parsing an
//! unrooted Newick string (or closing the final Neighbor-Joining join) and the
//! call to [`Tree::detrifurcate`] that restores the leaf-rooted binary form.
//!
//! # Ownership
//! A `Tree` exclusively owns every node and edge in its arenas. Moving a
//! subtree is index reparenting ([`Tree::detach`] / [`Tree::attach`]); there
//! is no shared ownership and no manual recursive free: dropping the tree
//! drops everything.

use thiserror::Error;

/// Errors produced by the tree engine.
///
/// Two families per the error design:
/// - `InvalidInput*`: malformed caller data, checked up front, reported once.
/// - `InternalInvariant`: programming-contract violations (detaching the
///   root, malformed heap state). These are defects and should be unreachable;
///   they are surfaced as errors instead of aborting the process.
#[derive(Error, Debug)]
pub enum TreeBuildError {
    /// The distance matrix contains a NaN or infinite entry.
    #[error("distance matrix entry D[{row}][{col}] is not finite")]
    NonFiniteDistance { row: usize, col: usize },
    /// The distance matrix is not symmetric.
    #[error("distance matrix is asymmetric at D[{row}][{col}]")]
    AsymmetricMatrix { row: usize, col: usize },
    /// The distance matrix has a nonzero diagonal entry.
    #[error("distance matrix diagonal D[{0}][{0}] is nonzero")]
    NonzeroDiagonal(usize),
    /// Matrix size and label count disagree, or the matrix is too small.
    #[error("matrix of size {size} cannot be used with {labels} labels")]
    SizeMismatch { size: usize, labels: usize },
    /// A divergence value is outside the domain of the requested transform.
    #[error("divergence {value} at [{row}][{col}] outside domain of {transform}")]
    DivergenceOutOfRange {
        transform: &'static str,
        value: f64,
        row: usize,
        col: usize,
    },
    /// A Newick string could not be parsed.
    #[error("newick parse error at byte {position}: {message}")]
    NewickSyntax { position: usize, message: String },
    /// An internal invariant was violated. Never expected to trigger.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
}

/// Index of a node in a tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of an edge, equal to the index of the edge's head node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

impl EdgeId {
    /// The head node of this edge (same index by construction).
    #[inline]
    pub fn head(self) -> NodeId {
        NodeId(self.0)
    }
}

/// Downward structure of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// No children. All taxa are leaves; the bookkeeping root is also a leaf
    /// (its single child edge lives on the tree, not the node).
    Leaf,
    /// Exactly two child edges.
    Binary { left: EdgeId, right: EdgeId },
    /// Three child edges. Transient: unrooted-Newick parse or the closing
    /// Neighbor-Joining join, always removed by [`Tree::detrifurcate`].
    Trifurcation { a: EdgeId, b: EdgeId, c: EdgeId },
}

/// A tree node: display label, original taxon order for leaves, and children.
#[derive(Clone, Debug)]
pub struct Node {
    pub label: String,
    /// Position of this taxon in the input matrix/label order. `None` for
    /// internal nodes.
    pub index2: Option<usize>,
    pub kind: NodeKind,
}

/// A directed tail→head edge with its branch length and subtree leaf counts.
///
/// Invariant: `topsize + bottomsize == total leaf count`, for every edge,
/// at every point outside the span of a single insertion or swap.
#[derive(Clone, Debug)]
pub struct Edge {
    pub tail: NodeId,
    pub head: NodeId,
    /// Branch length.
    pub length: f64,
    /// Leaves NOT in the subtree below `head`.
    pub topsize: usize,
    /// Leaves in the subtree below `head`.
    pub bottomsize: usize,
    /// Scratch accumulator for the candidate-insertion scan.
    pub totalweight: f64,
}

/// An owning, leaf-rooted binary tree.
#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    /// `edges[i]` is the parent edge of node `i`; `None` only for the root.
    edges: Vec<Option<Edge>>,
    root: NodeId,
    /// The root leaf's single child edge. `None` only for 1-node trees or
    /// while the root is a transient trifurcation.
    top_edge: Option<EdgeId>,
    n_leaves: usize,
    /// Total branch length, maintained by weight assignment and refinement.
    pub weight: f64,
}

impl Tree {
    /// Create an empty tree. `capacity` is the expected node count (`2n-2`
    /// for `n` taxa), used to size the arenas once.
    pub fn with_capacity(capacity: usize) -> Self {
        Tree {
            nodes: Vec::with_capacity(capacity),
            edges: Vec::with_capacity(capacity),
            root: NodeId(0),
            top_edge: None,
            n_leaves: 0,
            weight: 0.0,
        }
    }

    /// Number of nodes in the arena.
    #[inline]
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf taxa.
    #[inline]
    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn top_edge(&self) -> Option<EdgeId> {
        self.top_edge
    }

    pub fn set_root(&mut self, root: NodeId, top_edge: Option<EdgeId>) {
        self.root = root;
        self.top_edge = top_edge;
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// The parent edge of `id.head()`. Panics on the root's id, which has no
    /// parent edge; callers guard with [`Tree::parent_edge`] where the root
    /// can occur.
    #[inline]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges[id.0].as_ref().expect("edge id addresses the root")
    }

    #[inline]
    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges[id.0].as_mut().expect("edge id addresses the root")
    }

    /// Parent edge of a node, `None` for the root.
    #[inline]
    pub fn parent_edge(&self, id: NodeId) -> Option<EdgeId> {
        self.edges[id.0].as_ref().map(|_| EdgeId(id.0))
    }

    #[inline]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Leaf)
    }

    /// Add a leaf node carrying taxon `index2` of the input order.
    pub fn add_leaf(&mut self, label: impl Into<String>, index2: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            label: label.into(),
            index2: Some(index2),
            kind: NodeKind::Leaf,
        });
        self.edges.push(None);
        self.n_leaves += 1;
        id
    }

    /// Add an unconnected internal node.
    pub fn add_internal(&mut self, label: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            label: label.into(),
            index2: None,
            kind: NodeKind::Leaf,
        });
        self.edges.push(None);
        id
    }

    /// Create the parent edge of `head`, running from `tail`. The caller is
    /// responsible for recording the edge in `tail`'s child slots.
    pub fn link(&mut self, tail: NodeId, head: NodeId, length: f64) -> EdgeId {
        debug_assert!(self.edges[head.0].is_none(), "head already has a parent");
        self.edges[head.0] = Some(Edge {
            tail,
            head,
            length,
            topsize: 0,
            bottomsize: 0,
            totalweight: 0.0,
        });
        EdgeId(head.0)
    }

    /// The other child edge of `e`'s tail, `None` when the tail is the root
    /// (whose only child is the top edge).
    pub fn sibling_edge(&self, e: EdgeId) -> Option<EdgeId> {
        let tail = self.edge(e).tail;
        match self.nodes[tail.0].kind {
            NodeKind::Binary { left, right } => {
                if left == e {
                    Some(right)
                } else {
                    Some(left)
                }
            }
            _ => None,
        }
    }

    /// Replace child edge `old` with `new` in `parent`'s slots, preserving
    /// left/right position.
    pub fn replace_child(&mut self, parent: NodeId, old: EdgeId, new: EdgeId) {
        match &mut self.nodes[parent.0].kind {
            NodeKind::Binary { left, right } => {
                if *left == old {
                    *left = new;
                } else {
                    debug_assert_eq!(*right, old);
                    *right = new;
                }
            }
            NodeKind::Trifurcation { a, b, c } => {
                if *a == old {
                    *a = new;
                } else if *b == old {
                    *b = new;
                } else {
                    debug_assert_eq!(*c, old);
                    *c = new;
                }
            }
            NodeKind::Leaf => unreachable!("leaf has no child slots"),
        }
    }

    /// Unlink `node`'s subtree from its parent, returning the parent edge id
    /// together with the former tail. The tail is left with a single child
    /// slot until [`Tree::attach`] fills it again.
    ///
    /// Detaching the tree's own root is a contract violation, surfaced as
    /// [`TreeBuildError::InternalInvariant`] rather than a recoverable state.
    pub fn detach(&mut self, node: NodeId) -> Result<(EdgeId, NodeId), TreeBuildError> {
        if node == self.root {
            return Err(TreeBuildError::InternalInvariant(
                "attempted to detach the tree root",
            ));
        }
        let e = EdgeId(node.0);
        let tail = self.edge(e).tail;
        // The tail's child slot keeps naming `e` until attach() repoints it;
        // no traversal may run in between.
        Ok((e, tail))
    }

    /// Reattach a detached edge under `new_tail`, taking over the slot that
    /// currently holds `slot_edge`.
    pub fn attach(&mut self, e: EdgeId, new_tail: NodeId, slot_edge: EdgeId) {
        self.edge_mut(e).tail = new_tail;
        self.replace_child(new_tail, slot_edge, e);
    }

    /// Split edge `e` to insert `leaf`: a new internal node takes over `e`'s
    /// head position, with the old subtree on its left and the new pendant
    /// edge on its right.
    ///
    /// ```text
    ///    tail            tail
    ///     |               |     <- edge id moves to w
    ///     x      ==>      w
    ///    ...            /   \
    ///                  x     leaf
    ///                 ...
    /// ```
    ///
    /// Returns `(new_node, internal_edge_to_x, pendant_edge)`. All subtree
    /// sizes are left at their pre-split values: the insertion builder's
    /// average-table update reads the old sizes, then fixes every edge in one
    /// pass.
    pub fn split_edge(&mut self, e: EdgeId, leaf: NodeId) -> (NodeId, EdgeId, EdgeId) {
        let old = self.edges[e.0].take().expect("split target is a real edge");
        let w = self.add_internal("");
        // Edge from old tail down to w inherits e's identity fields.
        self.edges[w.0] = Some(Edge {
            tail: old.tail,
            head: w,
            length: old.length,
            topsize: old.topsize,
            bottomsize: old.bottomsize,
            totalweight: 0.0,
        });
        let new_top = EdgeId(w.0);
        // w -> x keeps the old head's row identity.
        self.edges[e.0] = Some(Edge {
            tail: w,
            head: old.head,
            length: 0.0,
            topsize: old.topsize,
            bottomsize: old.bottomsize,
            totalweight: 0.0,
        });
        let internal = e;
        let pendant = self.link(w, leaf, 0.0);
        self.nodes[w.0].kind = NodeKind::Binary {
            left: internal,
            right: pendant,
        };
        if self.top_edge == Some(e) {
            self.top_edge = Some(new_top);
        } else {
            self.replace_child(old.tail, e, new_top);
        }
        (w, internal, pendant)
    }

    /// Child edges of a node's head, `None` for leaves. Trifurcations are
    /// rejected: the engine only ever walks strictly-binary trees.
    #[inline]
    pub fn children(&self, id: NodeId) -> Option<(EdgeId, EdgeId)> {
        match self.nodes[id.0].kind {
            NodeKind::Binary { left, right } => Some((left, right)),
            _ => None,
        }
    }

    /// Sum of all branch lengths.
    pub fn total_weight(&self) -> f64 {
        self.edges
            .iter()
            .flatten()
            .map(|e| e.length)
            .sum()
    }

    /// Zero out negative branch lengths. Idempotent.
    pub fn clamp_negative_lengths(&mut self) {
        for e in self.edges.iter_mut().flatten() {
            if e.length < 0.0 {
                e.length = 0.0;
            }
        }
    }

    /// Recompute `topsize`/`bottomsize` for every edge from the topology.
    /// Used after wholesale rearrangements (detrifurcation, parsing).
    pub fn recompute_sizes(&mut self) {
        let n = self.n_leaves;
        if let Some(top) = self.top_edge {
            self.fill_bottomsize(top);
            for opt in self.edges.iter_mut().flatten() {
                opt.topsize = n - opt.bottomsize;
            }
        }
    }

    fn fill_bottomsize(&mut self, e: EdgeId) -> usize {
        let head = self.edge(e).head;
        let size = match self.children(head) {
            None => 1,
            Some((l, r)) => self.fill_bottomsize(l) + self.fill_bottomsize(r),
        };
        self.edge_mut(e).bottomsize = size;
        size
    }

    /// Restore the leaf-rooted strictly-binary form after a transient
    /// trifurcated root (unrooted Newick input, the final NJ join).
    ///
    /// Walks from the trifurcated center along first-child edges to the
    /// nearest leaf, reverses every edge on that path, makes the leaf the new
    /// root, and collapses the center to a binary node. Branch lengths ride
    /// along with their (re-oriented) edges. A tree that is already
    /// leaf-rooted is returned unchanged.
    pub fn detrifurcate(&mut self) -> Result<(), TreeBuildError> {
        let (a, b, c) = match self.nodes[self.root.0].kind {
            NodeKind::Trifurcation { a, b, c } => (a, b, c),
            NodeKind::Leaf => return Ok(()),
            NodeKind::Binary { .. } => {
                return Err(TreeBuildError::InternalInvariant(
                    "detrifurcate called on a binary-rooted tree",
                ));
            }
        };
        let center = self.root;
        self.nodes[center.0].kind = NodeKind::Binary { left: b, right: c };
        self.reroot_through(center, a);
        self.recompute_sizes();
        Ok(())
    }

    /// Reverse the path from `from` down through `first` to the nearest leaf
    /// and make that leaf the root.
    fn reroot_through(&mut self, from: NodeId, first: EdgeId) {
        // Collect the first-child descent to a leaf: nodes[0] = from,
        // path[i] = edge nodes[i] -> nodes[i+1].
        let mut nodes = vec![from];
        let mut path = vec![first];
        let mut head = self.edge(first).head;
        nodes.push(head);
        while let Some((l, _)) = self.children(head) {
            path.push(l);
            head = self.edge(l).head;
            nodes.push(head);
        }
        let k = path.len();
        let new_root = nodes[k];
        let lengths: Vec<f64> = path.iter().map(|&e| self.edge(e).length).collect();
        // Interior path nodes: the slot that held the continuation edge now
        // points back at the previous path node.
        for i in 1..k {
            let cont = path[i];
            let back = EdgeId(nodes[i - 1].0);
            self.replace_child(nodes[i], cont, back);
        }
        // Rewrite the records in reversed orientation. All lengths were read
        // up front, so slot reuse between old and new ids is safe.
        self.edges[new_root.0] = None;
        for i in 0..k {
            self.edges[nodes[i].0] = Some(Edge {
                tail: nodes[i + 1],
                head: nodes[i],
                length: lengths[i],
                topsize: 0,
                bottomsize: 0,
                totalweight: 0.0,
            });
        }
        self.root = new_root;
        self.top_edge = Some(EdgeId(nodes[k - 1].0));
    }

    /// Iterate over all edge ids (every node except the root).
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| EdgeId(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build the 3-leaf tree used across the module tests:
    ///
    /// ```text
    ///   A (root)
    ///   |          top edge, length 1.0
    ///   u
    ///  / \
    /// B   C       lengths 2.0, 3.0
    /// ```
    fn three_leaf_tree() -> (Tree, NodeId, NodeId, NodeId, NodeId) {
        let mut t = Tree::with_capacity(4);
        let a = t.add_leaf("A", 0);
        let b = t.add_leaf("B", 1);
        let c = t.add_leaf("C", 2);
        let u = t.add_internal("");
        let top = t.link(a, u, 1.0);
        let eb = t.link(u, b, 2.0);
        let ec = t.link(u, c, 3.0);
        t.node_mut(u).kind = NodeKind::Binary { left: eb, right: ec };
        t.set_root(a, Some(top));
        t.recompute_sizes();
        (t, a, b, c, u)
    }

    #[test]
    fn sizes_satisfy_top_plus_bottom() {
        let (t, _, _, _, _) = three_leaf_tree();
        for e in t.edge_ids() {
            let edge = t.edge(e);
            assert_eq!(edge.topsize + edge.bottomsize, t.n_leaves());
        }
    }

    #[test]
    fn sibling_of_left_is_right() {
        let (t, _, b, c, _) = three_leaf_tree();
        assert_eq!(t.sibling_edge(EdgeId(b.0)), Some(EdgeId(c.0)));
        assert_eq!(t.sibling_edge(EdgeId(c.0)), Some(EdgeId(b.0)));
        // Top edge has no sibling.
        assert_eq!(t.sibling_edge(t.top_edge().unwrap()), None);
    }

    #[test]
    fn detach_root_is_contract_violation() {
        let (mut t, a, _, _, _) = three_leaf_tree();
        assert!(matches!(
            t.detach(a),
            Err(TreeBuildError::InternalInvariant(_))
        ));
    }

    #[test]
    fn split_edge_keeps_row_identity() {
        let (mut t, _, b, _, _) = three_leaf_tree();
        let d = t.add_leaf("D", 3);
        let (w, internal, pendant) = t.split_edge(EdgeId(b.0), d);
        // The old head keeps its edge row; the new node takes over the split
        // edge's position under the old tail.
        assert_eq!(t.edge(internal).head, b);
        assert_eq!(t.edge(internal).tail, w);
        assert_eq!(t.edge(pendant).head, d);
        assert_eq!(t.edge(EdgeId(w.0)).head, w);
        t.recompute_sizes();
        for e in t.edge_ids() {
            let edge = t.edge(e);
            assert_eq!(edge.topsize + edge.bottomsize, 4);
        }
    }

    #[test]
    fn clamp_negative_lengths_is_idempotent() {
        let (mut t, _, b, _, _) = three_leaf_tree();
        t.edge_mut(EdgeId(b.0)).length = -0.5;
        t.clamp_negative_lengths();
        let once: Vec<f64> = t.edge_ids().map(|e| t.edge(e).length).collect();
        t.clamp_negative_lengths();
        let twice: Vec<f64> = t.edge_ids().map(|e| t.edge(e).length).collect();
        assert_eq!(once, twice);
        assert_eq!(t.edge(EdgeId(b.0)).length, 0.0);
    }

    #[test]
    fn detrifurcate_reroots_at_a_leaf() {
        // Star tree with a trifurcated center, as the NJ builder leaves it.
        let mut t = Tree::with_capacity(4);
        let center = t.add_internal("");
        let a = t.add_leaf("A", 0);
        let b = t.add_leaf("B", 1);
        let c = t.add_leaf("C", 2);
        let ea = t.link(center, a, 2.0);
        let eb = t.link(center, b, 3.0);
        let ec = t.link(center, c, 7.0);
        t.node_mut(center).kind = NodeKind::Trifurcation { a: ea, b: eb, c: ec };
        t.set_root(center, None);
        t.detrifurcate().unwrap();

        assert_eq!(t.root(), a);
        assert!(t.is_leaf(t.root()));
        let top = t.top_edge().unwrap();
        assert_eq!(t.edge(top).head, center);
        assert_eq!(t.edge(top).length, 2.0);
        // Center keeps the two remaining children.
        assert_eq!(t.children(center), Some((eb, ec)));
        for e in t.edge_ids() {
            let edge = t.edge(e);
            assert_eq!(edge.topsize + edge.bottomsize, 3);
        }
    }
}
