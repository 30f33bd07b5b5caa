//! Copy-on-write rewriting primitives over the immutable tree.
//!
//! Every operation here returns a new root and reuses all untouched
//! subtrees: only the spine from the changed child up to the returned node
//! is re-allocated. Callers compare tree versions with [`Arc::ptr_eq`] -
//! an operation that changes nothing hands back the original `Arc`.

use std::sync::Arc;

use crate::ast::Node;

/// The outcome a [`rewrite_children`] visitor reports for one child.
#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Keep the child as-is.
    Keep,
    /// Substitute the child with another subtree.
    Replace(Arc<Node>),
    /// Remove the child; later siblings shift down.
    Delete,
}

/// Shallow-copy `parent` with child `index` replaced.
///
/// The new parent shares every other child with the original.
pub fn replace_child(parent: &Arc<Node>, index: usize, replacement: Arc<Node>) -> Arc<Node> {
    let mut children = parent.children().to_vec();
    children[index] = replacement;
    copy_with_children(parent, children)
}

/// Shallow-copy `parent` with child `index` removed; the remaining
/// children keep their order with indices shifted down.
pub fn delete_child(parent: &Arc<Node>, index: usize) -> Arc<Node> {
    let mut children = parent.children().to_vec();
    children.remove(index);
    copy_with_children(parent, children)
}

/// Shallow-copy `parent` with `child` inserted at `index`.
pub fn insert_child(parent: &Arc<Node>, index: usize, child: Arc<Node>) -> Arc<Node> {
    let mut children = parent.children().to_vec();
    children.insert(index, child);
    copy_with_children(parent, children)
}

/// Shallow-copy `parent` with `child` appended.
pub fn append_child(parent: &Arc<Node>, child: Arc<Node>) -> Arc<Node> {
    let index = parent.children().len();
    insert_child(parent, index, child)
}

/// Visit each child of `node` and apply the visitor's verdicts.
///
/// When every verdict is [`Rewrite::Keep`] the original `Arc` is returned
/// unchanged (identity-preserved); otherwise `node` is copied exactly once
/// with all replacements and deletions applied.
pub fn rewrite_children<F>(node: &Arc<Node>, mut visitor: F) -> Arc<Node>
where
    F: FnMut(usize, &Arc<Node>) -> Rewrite,
{
    let mut changed = false;
    let mut children = Vec::with_capacity(node.children().len());
    for (index, child) in node.children().iter().enumerate() {
        match visitor(index, child) {
            Rewrite::Keep => children.push(Arc::clone(child)),
            Rewrite::Replace(replacement) => {
                changed = changed || !Arc::ptr_eq(child, &replacement);
                children.push(replacement);
            }
            Rewrite::Delete => changed = true,
        }
    }
    if changed {
        copy_with_children(node, children)
    } else {
        Arc::clone(node)
    }
}

/// Replace `old` inside `parent` (located by identity) with `new`.
///
/// Returns `None` when `old` is not a direct child of `parent`; the caller
/// is responsible for knowing whether the node being replaced is the tree
/// root.
pub fn replace_in_parent(
    parent: &Arc<Node>,
    old: &Arc<Node>,
    new: Arc<Node>,
) -> Option<Arc<Node>> {
    let index = parent
        .children()
        .iter()
        .position(|child| Arc::ptr_eq(child, old))?;
    Some(replace_child(parent, index, new))
}

/// Replace the descendant `target` (located by identity) anywhere under
/// `root`, rebuilding only the spine of ancestors above it.
///
/// Returns `None` when `target` does not occur under `root`.
pub fn replace_descendant(
    root: &Arc<Node>,
    target: &Arc<Node>,
    replacement: Arc<Node>,
) -> Option<Arc<Node>> {
    if Arc::ptr_eq(root, target) {
        return Some(replacement);
    }
    for (index, child) in root.children().iter().enumerate() {
        if let Some(rebuilt) = replace_descendant(child, target, replacement.clone()) {
            return Some(replace_child(root, index, rebuilt));
        }
    }
    None
}

/// Rewrite the whole tree depth-first: children are rewritten before the
/// visitor sees their parent, and a node whose children all came back
/// identical is handed to the visitor as the original `Arc`.
pub fn rewrite<F>(root: &Arc<Node>, visitor: &mut F) -> Rewrite
where
    F: FnMut(&Arc<Node>) -> Rewrite,
{
    let with_new_children =
        rewrite_children(root, |_, child| match rewrite(child, visitor) {
            Rewrite::Keep => Rewrite::Keep,
            other => other,
        });
    match visitor(&with_new_children) {
        Rewrite::Keep if Arc::ptr_eq(&with_new_children, root) => Rewrite::Keep,
        Rewrite::Keep => Rewrite::Replace(with_new_children),
        other => other,
    }
}

/// Convenience wrapper over [`rewrite`] for visitors that never delete:
/// always hands back a root (the original when nothing changed).
pub fn rewrite_tree<F>(root: &Arc<Node>, mut visitor: F) -> Arc<Node>
where
    F: FnMut(&Arc<Node>) -> Rewrite,
{
    match rewrite(root, &mut visitor) {
        Rewrite::Keep => Arc::clone(root),
        Rewrite::Replace(new_root) => new_root,
        Rewrite::Delete => Arc::clone(root),
    }
}

fn copy_with_children(node: &Arc<Node>, children: Vec<Arc<Node>>) -> Arc<Node> {
    match node.value() {
        Some(value) => Node::branch_with_value(node.kind(), value, children),
        None => Node::branch(node.kind(), children),
    }
}
