//! Restartable post-order and pre-order edge cursors.
//!
//! # Overview
//! Both traversals are expressed as "next edge after X" functions with O(1)
//! auxiliary state: the successor is found by chasing parent/sibling slots,
//! not by keeping an explicit stack. This is what lets the refinement loop
//! resume scanning from an arbitrary edge after a localized topology change
//! without revisiting finished subtrees.
//!
//! - **post-order** ([`next_postorder`]): children before their parent.
//!   Used for bottom-up average propagation. The top edge comes last.
//! - **pre-order** ([`next_preorder`]): parent before children, left before
//!   right. Used for top-down propagation; the top edge comes first.

use crate::tree::{EdgeId, Tree};

/// Descend along left children to the lowest-leftmost edge below `e`.
fn bottom_left(tree: &Tree, mut e: EdgeId) -> EdgeId {
    while let Some((left, _)) = tree.children(e.head()) {
        e = left;
    }
    e
}

/// First edge of a post-order traversal, `None` for trees without edges.
pub fn first_postorder(tree: &Tree) -> Option<EdgeId> {
    tree.top_edge().map(|top| bottom_left(tree, top))
}

/// Post-order successor of `e`.
///
/// A left edge has not had its sibling's subtree visited yet, so the
/// successor is the bottom-left of the sibling. A right edge completes its
/// parent's subtree, so the successor is the parent edge itself. The top
/// edge (whose tail is the root leaf) is last.
pub fn next_postorder(tree: &Tree, e: EdgeId) -> Option<EdgeId> {
    let tail = tree.edge(e).tail;
    match tree.children(tail) {
        // Tail is the root leaf: e was the top edge, traversal is complete.
        None => None,
        Some((left, _)) => {
            if e == left {
                Some(bottom_left(tree, tree.sibling_edge(e).expect("left edge has sibling")))
            } else {
                Some(EdgeId(tail.0))
            }
        }
    }
}

/// First edge of a pre-order traversal: the top edge.
pub fn first_preorder(tree: &Tree) -> Option<EdgeId> {
    tree.top_edge()
}

/// Pre-order successor of `e`: descend left if possible, otherwise climb
/// until a left edge is found and take its sibling.
pub fn next_preorder(tree: &Tree, e: EdgeId) -> Option<EdgeId> {
    if let Some((left, _)) = tree.children(e.head()) {
        return Some(left);
    }
    let mut f = e;
    loop {
        let tail = tree.edge(f).tail;
        match tree.children(tail) {
            // Climbed to the top edge: every subtree is visited.
            None => return None,
            Some((left, right)) => {
                if f == left {
                    return Some(right);
                }
                f = EdgeId(tail.0);
            }
        }
    }
}

/// Iterator over all edges in post-order.
pub fn postorder(tree: &Tree) -> EdgeIter<'_> {
    EdgeIter {
        tree,
        next: first_postorder(tree),
        advance: next_postorder,
    }
}

/// Iterator over all edges in pre-order.
pub fn preorder(tree: &Tree) -> EdgeIter<'_> {
    EdgeIter {
        tree,
        next: first_preorder(tree),
        advance: next_preorder,
    }
}

/// Finite cursor-backed edge iterator.
pub struct EdgeIter<'a> {
    tree: &'a Tree,
    next: Option<EdgeId>,
    advance: fn(&Tree, EdgeId) -> Option<EdgeId>,
}

impl Iterator for EdgeIter<'_> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        let current = self.next?;
        self.next = (self.advance)(self.tree, current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, Tree};

    /// ```text
    ///   A (root)
    ///   |
    ///   u
    ///  / \
    /// v   D
    /// /\
    /// B C
    /// ```
    fn four_leaf_tree() -> (Tree, Vec<EdgeId>) {
        let mut t = Tree::with_capacity(6);
        let a = t.add_leaf("A", 0);
        let b = t.add_leaf("B", 1);
        let c = t.add_leaf("C", 2);
        let d = t.add_leaf("D", 3);
        let u = t.add_internal("");
        let v = t.add_internal("");
        let top = t.link(a, u, 1.0);
        let ev = t.link(u, v, 1.0);
        let ed = t.link(u, d, 1.0);
        let eb = t.link(v, b, 1.0);
        let ec = t.link(v, c, 1.0);
        t.node_mut(u).kind = NodeKind::Binary { left: ev, right: ed };
        t.node_mut(v).kind = NodeKind::Binary { left: eb, right: ec };
        t.set_root(a, Some(top));
        t.recompute_sizes();
        (t, vec![top, ev, ed, eb, ec])
    }

    #[test]
    fn postorder_visits_children_first() {
        let (t, e) = four_leaf_tree();
        let [top, ev, ed, eb, ec] = e[..] else { unreachable!() };
        let order: Vec<EdgeId> = postorder(&t).collect();
        assert_eq!(order, vec![eb, ec, ev, ed, top]);
    }

    #[test]
    fn preorder_visits_parent_first() {
        let (t, e) = four_leaf_tree();
        let [top, ev, ed, eb, ec] = e[..] else { unreachable!() };
        let order: Vec<EdgeId> = preorder(&t).collect();
        assert_eq!(order, vec![top, ev, eb, ec, ed]);
    }

    #[test]
    fn cursors_restart_from_arbitrary_edge() {
        let (t, e) = four_leaf_tree();
        let [_, ev, ed, _, ec] = e[..] else { unreachable!() };
        // Post-order after the inner node's edge resumes at its sibling.
        assert_eq!(next_postorder(&t, ev), Some(ed));
        // Pre-order after the last left leaf climbs to the sibling.
        assert_eq!(next_preorder(&t, ec), Some(ed));
    }

    #[test]
    fn traversals_cover_every_edge_once() {
        let (t, _) = four_leaf_tree();
        let post: Vec<EdgeId> = postorder(&t).collect();
        let pre: Vec<EdgeId> = preorder(&t).collect();
        assert_eq!(post.len(), t.size() - 1);
        assert_eq!(pre.len(), t.size() - 1);
        let mut sorted_post = post.clone();
        sorted_post.sort();
        let mut sorted_pre = pre.clone();
        sorted_pre.sort();
        assert_eq!(sorted_post, sorted_pre);
    }
}
