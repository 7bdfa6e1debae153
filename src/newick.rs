//! Newick text for engine trees, and conversion to the generic
//! `phylotree` container.
//!
//! # Overview
//! The writer emits the standard unrooted form: the internal node below the
//! bookkeeping root becomes the print hub, so an `n`-taxon tree renders as a
//! trifurcation `(left, right, root_leaf:length);`. The parser accepts both
//! that form and rooted (binary-top) strings; either way the result is
//! normalized back to the canonical leaf-rooted binary tree, using the
//! transient trifurcation variant and [`Tree::detrifurcate`].

use crate::tree::{EdgeId, NodeId, NodeKind, Tree, TreeBuildError};
use phylotree::tree::{Node as PhyloNode, Tree as PhyloTree};

// ---------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------

/// Render the tree as an unrooted Newick string.
pub fn to_newick(tree: &Tree) -> String {
    let mut out = String::new();
    match tree.top_edge() {
        None => {
            // Single taxon.
            out.push_str(&tree.node(tree.root()).label);
        }
        Some(top) => {
            let hub = tree.edge(top).head;
            let root_label = &tree.node(tree.root()).label;
            let top_len = tree.edge(top).length;
            out.push('(');
            match tree.children(hub) {
                None => {
                    // Two taxa: the whole length rides on the non-root side.
                    out.push_str(&tree.node(hub).label);
                    out.push_str(&format!(":{top_len}"));
                    out.push(',');
                    out.push_str(root_label);
                    out.push_str(":0");
                }
                Some((l, r)) => {
                    write_subtree(tree, l, &mut out);
                    out.push(',');
                    write_subtree(tree, r, &mut out);
                    out.push(',');
                    out.push_str(root_label);
                    out.push_str(&format!(":{top_len}"));
                }
            }
            out.push(')');
        }
    }
    out.push(';');
    out
}

fn write_subtree(tree: &Tree, e: EdgeId, out: &mut String) {
    let head = e.head();
    match tree.children(head) {
        None => out.push_str(&tree.node(head).label),
        Some((l, r)) => {
            out.push('(');
            write_subtree(tree, l, out);
            out.push(',');
            write_subtree(tree, r, out);
            out.push(')');
            out.push_str(&tree.node(head).label);
        }
    }
    out.push_str(&format!(":{}", tree.edge(e).length));
}

// ---------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------

/// Parsed subtree before arena assembly.
struct Parsed {
    label: String,
    length: f64,
    children: Vec<Parsed>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> TreeBuildError {
        TreeBuildError::NewickSyntax {
            position: self.pos,
            message: message.to_string(),
        }
    }
}

/// Parse a Newick string into a canonical leaf-rooted binary tree.
///
/// The top-level node may be bifurcated (rooted input) or trifurcated
/// (unrooted input); inner nodes must be strictly binary. Leaf `index2`
/// values follow appearance order.
pub fn from_newick(text: &str) -> Result<Tree, TreeBuildError> {
    let mut cur = Cursor {
        bytes: text.as_bytes(),
        pos: 0,
    };
    cur.skip_ws();
    let parsed = parse_subtree(&mut cur)?;
    cur.skip_ws();
    if cur.bump() != Some(b';') {
        return Err(cur.error("expected ';'"));
    }
    assemble(parsed, &mut cur)
}

fn parse_subtree(cur: &mut Cursor<'_>) -> Result<Parsed, TreeBuildError> {
    cur.skip_ws();
    let mut children = Vec::new();
    if cur.peek() == Some(b'(') {
        cur.bump();
        loop {
            children.push(parse_subtree(cur)?);
            cur.skip_ws();
            match cur.bump() {
                Some(b',') => continue,
                Some(b')') => break,
                _ => return Err(cur.error("expected ',' or ')'")),
            }
        }
    }
    let label = parse_label(cur);
    if children.is_empty() && label.is_empty() {
        return Err(cur.error("expected a taxon label"));
    }
    let length = parse_length(cur)?;
    Ok(Parsed {
        label,
        length,
        children,
    })
}

fn parse_label(cur: &mut Cursor<'_>) -> String {
    let start = cur.pos;
    while let Some(b) = cur.peek() {
        if matches!(b, b'(' | b')' | b',' | b':' | b';') || b.is_ascii_whitespace() {
            break;
        }
        cur.pos += 1;
    }
    String::from_utf8_lossy(&cur.bytes[start..cur.pos]).into_owned()
}

fn parse_length(cur: &mut Cursor<'_>) -> Result<f64, TreeBuildError> {
    cur.skip_ws();
    if cur.peek() != Some(b':') {
        return Ok(0.0);
    }
    cur.bump();
    cur.skip_ws();
    let start = cur.pos;
    while let Some(b) = cur.peek() {
        if matches!(b, b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E') {
            cur.pos += 1;
        } else {
            break;
        }
    }
    let text = std::str::from_utf8(&cur.bytes[start..cur.pos]).unwrap_or("");
    text.parse::<f64>()
        .map_err(|_| cur.error("invalid branch length"))
}

/// Build the arena from the parse, normalizing the root.
fn assemble(parsed: Parsed, cur: &mut Cursor<'_>) -> Result<Tree, TreeBuildError> {
    let mut tree = Tree::with_capacity(16);
    let mut next_taxon = 0usize;
    if parsed.children.is_empty() {
        let root = tree.add_leaf(parsed.label, 0);
        tree.set_root(root, None);
        return Ok(tree);
    }
    match parsed.children.len() {
        1 => {
            // Already leaf-rooted (e.g. phylotree output): `(subtree)root;`.
            let root = tree.add_leaf(parsed.label, next_taxon);
            next_taxon += 1;
            tree.set_root(root, None);
            let child = parsed.children.into_iter().next().expect("one child");
            let length = child.length;
            let head = build_node(&mut tree, child, &mut next_taxon, cur)?;
            let top = tree.link(root, head, length);
            tree.set_root(root, Some(top));
        }
        2 => {
            let mut it = parsed.children.into_iter();
            let x = it.next().expect("two children");
            let y = it.next().expect("two children");
            let joined = x.length + y.length;
            if x.children.is_empty() {
                // Rooted input with a leaf on one side: that leaf is the
                // bookkeeping root.
                let root = tree.add_leaf(x.label, next_taxon);
                next_taxon += 1;
                tree.set_root(root, None);
                let head = build_node(&mut tree, y, &mut next_taxon, cur)?;
                let top = tree.link(root, head, joined);
                tree.set_root(root, Some(top));
            } else if y.children.is_empty() {
                let hub = build_node(&mut tree, x, &mut next_taxon, cur)?;
                let root = tree.add_leaf(y.label, next_taxon);
                tree.set_root(root, None);
                let top = tree.link(root, hub, joined);
                tree.set_root(root, Some(top));
            } else {
                // Both sides internal: suppress the artificial root by
                // hanging one side off the other as a third child, then
                // detrifurcate.
                let hub = build_node(&mut tree, x, &mut next_taxon, cur)?;
                let other = build_node(&mut tree, y, &mut next_taxon, cur)?;
                let third = tree.link(hub, other, joined);
                let (a, b) = tree.children(hub).expect("internal hub");
                tree.node_mut(hub).kind = NodeKind::Trifurcation { a, b, c: third };
                tree.set_root(hub, None);
                tree.detrifurcate()?;
            }
        }
        3 => {
            let hub = tree.add_internal(parsed.label);
            let mut edges = Vec::with_capacity(3);
            for child in parsed.children {
                let length = child.length;
                let head = build_node(&mut tree, child, &mut next_taxon, cur)?;
                edges.push(tree.link(hub, head, length));
            }
            tree.node_mut(hub).kind = NodeKind::Trifurcation {
                a: edges[0],
                b: edges[1],
                c: edges[2],
            };
            tree.set_root(hub, None);
            tree.detrifurcate()?;
        }
        _ => return Err(cur.error("root must have two or three subtrees")),
    }
    tree.recompute_sizes();
    tree.weight = tree.total_weight();
    Ok(tree)
}

fn build_node(
    tree: &mut Tree,
    parsed: Parsed,
    next_taxon: &mut usize,
    cur: &mut Cursor<'_>,
) -> Result<NodeId, TreeBuildError> {
    if parsed.children.is_empty() {
        let id = tree.add_leaf(parsed.label, *next_taxon);
        *next_taxon += 1;
        return Ok(id);
    }
    if parsed.children.len() != 2 {
        return Err(cur.error("inner nodes must be binary"));
    }
    let id = tree.add_internal(parsed.label);
    let mut it = parsed.children.into_iter();
    let l = it.next().expect("two children");
    let r = it.next().expect("two children");
    let (ll, rl) = (l.length, r.length);
    let lh = build_node(tree, l, next_taxon, cur)?;
    let rh = build_node(tree, r, next_taxon, cur)?;
    let le = tree.link(id, lh, ll);
    let re = tree.link(id, rh, rl);
    tree.node_mut(id).kind = NodeKind::Binary { left: le, right: re };
    Ok(id)
}

// ---------------------------------------------------------------------
// Generic container conversion
// ---------------------------------------------------------------------

/// Convert an engine tree into the generic `phylotree` container for
/// downstream serialization and comparison tooling.
pub fn to_phylo(tree: &Tree) -> Result<PhyloTree, phylotree::tree::TreeError> {
    let mut out = PhyloTree::new();
    let root = out.add(PhyloNode::new_named(&tree.node(tree.root()).label));
    if let Some(top) = tree.top_edge() {
        copy_subtree(tree, top, root, &mut out)?;
    }
    Ok(out)
}

fn copy_subtree(
    tree: &Tree,
    e: EdgeId,
    parent: usize,
    out: &mut PhyloTree,
) -> Result<(), phylotree::tree::TreeError> {
    let head = e.head();
    let id = out.add_child(
        PhyloNode::new_named(&tree.node(head).label),
        parent,
        Some(tree.edge(e).length),
    )?;
    if let Some((l, r)) = tree.children(head) {
        copy_subtree(tree, l, id, out)?;
        copy_subtree(tree, r, id, out)?;
    }
    Ok(())
}
