// Copy-on-write rewriting tests
//
// The tree is immutable and shared through Arc: a rewrite must copy only
// the spine from the changed node to the root and keep every untouched
// subtree identical (pointer-equal), and an all-Keep pass must return the
// original root unchanged.

use std::sync::Arc;

use warden_ql::ast::{node, Node, NodeKind};
use warden_ql::rewrite::{self, Rewrite};
use warden_ql::{parse_statement, render};

fn path(text: &str) -> Arc<Node> {
    node::path(text)
}

// ============================================================================
// Section: Spine copying and sharing
// ============================================================================

#[test]
fn replace_descendant_copies_only_the_spine() {
    let root = parse_statement("SELECT c FROM Contact c WHERE c.text = 'a'").unwrap();
    let select_clause = Arc::clone(root.child(0).unwrap());
    let from_clause = Arc::clone(root.child(1).unwrap());
    let where_clause = Arc::clone(root.child(2).unwrap());
    let predicate = Arc::clone(where_clause.child(0).unwrap());

    let rewritten =
        rewrite::replace_descendant(&root, &predicate, node::always_false()).unwrap();

    // Untouched clauses are shared, the spine is new.
    assert!(Arc::ptr_eq(rewritten.child(0).unwrap(), &select_clause));
    assert!(Arc::ptr_eq(rewritten.child(1).unwrap(), &from_clause));
    assert!(!Arc::ptr_eq(rewritten.child(2).unwrap(), &where_clause));
    assert!(!Arc::ptr_eq(&rewritten, &root));
    assert_eq!(render(&rewritten), "SELECT c FROM Contact c WHERE 1 <> 1");
    // The original is untouched.
    assert_eq!(render(&root), "SELECT c FROM Contact c WHERE c.text = 'a'");
}

#[test]
fn unshared_siblings_survive_a_deep_replacement() {
    let left = path("a.x");
    let deep = path("b.y");
    let inner = node::group(node::or(Arc::clone(&deep), path("b.z")));
    let root = node::and(Arc::clone(&left), Arc::clone(&inner));

    let rewritten = rewrite::replace_descendant(&root, &deep, path("b.w")).unwrap();

    assert!(Arc::ptr_eq(rewritten.child(0).unwrap(), &left));
    assert!(!Arc::ptr_eq(rewritten.child(1).unwrap(), &inner));
    assert_eq!(render(&rewritten), "a.x AND (b.w OR b.z)");
}

#[test]
fn replace_descendant_returns_none_for_foreign_nodes() {
    let root = node::and(path("a"), path("b"));
    let foreign = path("c");
    assert!(rewrite::replace_descendant(&root, &foreign, path("d")).is_none());
}

#[test]
fn all_keep_pass_preserves_identity() {
    let root = parse_statement("SELECT c FROM Contact c WHERE c.text = 'a'").unwrap();
    let rewritten = rewrite::rewrite_tree(&root, |_| Rewrite::Keep);
    assert!(Arc::ptr_eq(&rewritten, &root));
}

#[test]
fn structural_equality_is_not_identity() {
    let first = parse_statement("SELECT c FROM Contact c").unwrap();
    let second = parse_statement("SELECT c FROM Contact c").unwrap();
    assert_eq!(first, second);
    assert!(!Arc::ptr_eq(&first, &second));
}

// ============================================================================
// Section: Child-level edits
// ============================================================================

#[test]
fn delete_child_shifts_later_siblings() {
    let root = Node::branch(NodeKind::In, vec![path("x"), path("a"), path("b")]);
    let rewritten = rewrite::delete_child(&root, 1);
    assert_eq!(rewritten.children().len(), 2);
    assert!(Arc::ptr_eq(rewritten.child(0).unwrap(), root.child(0).unwrap()));
    assert!(Arc::ptr_eq(rewritten.child(1).unwrap(), root.child(2).unwrap()));
}

#[test]
fn insert_and_append_child() {
    let root = parse_statement("SELECT c FROM Contact c").unwrap();
    let clause = node::where_clause(node::always_true());
    let with_where = rewrite::insert_child(&root, 2, Arc::clone(&clause));
    assert_eq!(render(&with_where), "SELECT c FROM Contact c WHERE 1 = 1");

    let appended = rewrite::append_child(&root, clause);
    assert_eq!(appended.children().len(), 3);
}

#[test]
fn replace_in_parent_locates_by_identity() {
    let twin_a = path("c.text");
    let twin_b = path("c.text");
    let root = Node::branch(NodeKind::In, vec![Arc::clone(&twin_a), Arc::clone(&twin_b)]);

    // Equal but distinct nodes: only the identical child is replaced.
    let rewritten = rewrite::replace_in_parent(&root, &twin_b, path("c.body")).unwrap();
    assert!(Arc::ptr_eq(rewritten.child(0).unwrap(), &twin_a));
    assert_eq!(rewritten.child(1).unwrap().value(), Some("c.body"));

    let foreign = path("c.text");
    assert!(rewrite::replace_in_parent(&root, &foreign, path("x")).is_none());
}

#[test]
fn rewrite_children_keeps_identity_without_changes() {
    let root = node::and(path("a"), path("b"));
    let unchanged = rewrite::rewrite_children(&root, |_, _| Rewrite::Keep);
    assert!(Arc::ptr_eq(&unchanged, &root));
}

// ============================================================================
// Section: Bottom-up rewriting
// ============================================================================

#[test]
fn rewrite_tree_visits_bottom_up() {
    let root = parse_statement("SELECT c FROM Contact c WHERE c.text = 'a' AND c.age > 1")
        .unwrap();
    let rewritten = rewrite::rewrite_tree(&root, |current| {
        if current.kind() == NodeKind::Path && current.value() == Some("c.text") {
            Rewrite::Replace(path("c.body"))
        } else {
            Rewrite::Keep
        }
    });
    assert_eq!(
        render(&rewritten),
        "SELECT c FROM Contact c WHERE c.body = 'a' AND c.age > 1"
    );
    // The FROM clause contains no match and is shared.
    assert!(Arc::ptr_eq(rewritten.child(1).unwrap(), root.child(1).unwrap()));
}

#[test]
fn rewrite_tree_delete_removes_children() {
    let root = Node::branch(NodeKind::In, vec![path("x"), path("a"), path("b")]);
    let rewritten = rewrite::rewrite_tree(&root, |current| {
        if current.value() == Some("a") {
            Rewrite::Delete
        } else {
            Rewrite::Keep
        }
    });
    assert_eq!(rewritten.children().len(), 2);
    assert_eq!(rewritten.child(1).unwrap().value(), Some("b"));
}
