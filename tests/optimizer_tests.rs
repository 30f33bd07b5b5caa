// Query optimizer tests
//
// The optimizer partially evaluates the WHERE clause with whatever is
// bound: decided-true clauses disappear, decided-false clauses collapse
// to a contradiction, and undecidable subtrees are left alone.

use std::sync::Arc;

use warden_ql::evaluator::EvaluationContext;
use warden_ql::metamodel::{Attribute, EntityType, Metamodel};
use warden_ql::optimize::QueryOptimizer;
use warden_ql::{render, StatementCompiler, Value};

fn metamodel() -> Metamodel {
    Metamodel::new().with_entity(
        EntityType::new("Contact")
            .with_attribute(Attribute::basic("text"))
            .with_attribute(Attribute::association("owner", "User")),
    )
}

fn optimized(metamodel: &Metamodel, context: EvaluationContext, text: &str) -> String {
    let mut statement = StatementCompiler::new(metamodel).compile_text(text).unwrap();
    QueryOptimizer::new(context).optimize(&mut statement);
    render(statement.root())
}

// ============================================================================
// Section: Folding decided subtrees
// ============================================================================

#[test]
fn true_conjunct_is_dropped() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE 1 = 1 AND c.text = 'a'"
        ),
        "SELECT c FROM Contact c WHERE c.text = 'a'"
    );
}

#[test]
fn false_disjunct_is_dropped() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE 1 <> 1 OR c.text = 'a'"
        ),
        "SELECT c FROM Contact c WHERE c.text = 'a'"
    );
}

#[test]
fn always_true_where_clause_is_removed() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(&metamodel, context, "SELECT c FROM Contact c WHERE 1 = 1"),
        "SELECT c FROM Contact c"
    );
}

#[test]
fn always_false_where_clause_becomes_a_contradiction() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(&metamodel, context, "SELECT c FROM Contact c WHERE 1 = 2"),
        "SELECT c FROM Contact c WHERE 1 <> 1"
    );
}

#[test]
fn true_disjunct_swallows_the_undecidable_side() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE c.text = 'a' OR 1 = 1"
        ),
        "SELECT c FROM Contact c"
    );
}

#[test]
fn false_conjunct_collapses_the_conjunction() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE c.text = 'a' AND 1 <> 1"
        ),
        "SELECT c FROM Contact c WHERE 1 <> 1"
    );
}

// ============================================================================
// Section: Bound parameters
// ============================================================================

#[test]
fn bound_parameters_are_folded_in() {
    let metamodel = metamodel();
    let context =
        EvaluationContext::new(&metamodel).bind_parameter("minimum", Value::Integer(18));
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE :minimum > 20 OR c.text = 'a'"
        ),
        "SELECT c FROM Contact c WHERE c.text = 'a'"
    );
}

#[test]
fn unbound_parameters_keep_the_predicate() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE :minimum > 20 OR c.text = 'a'"
        ),
        "SELECT c FROM Contact c WHERE :minimum > 20 OR c.text = 'a'"
    );
}

// ============================================================================
// Section: Hints and identity
// ============================================================================

#[test]
fn skip_optimize_hint_shields_its_subtree() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    let text = "SELECT c FROM Contact c WHERE /* skip_optimize */ 1 = 1";
    let mut statement = StatementCompiler::new(&metamodel).compile_text(text).unwrap();
    let before = Arc::clone(statement.root());
    QueryOptimizer::new(context).optimize(&mut statement);
    assert!(Arc::ptr_eq(statement.root(), &before));
    assert_eq!(render(statement.root()), text);
}

#[test]
fn undecidable_predicate_keeps_the_original_tree() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    let text = "SELECT c FROM Contact c WHERE c.text = 'a'";
    let mut statement = StatementCompiler::new(&metamodel).compile_text(text).unwrap();
    let before = Arc::clone(statement.root());
    QueryOptimizer::new(context).optimize(&mut statement);
    assert!(Arc::ptr_eq(statement.root(), &before));
}

#[test]
fn optimization_is_idempotent() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    let text = "SELECT c FROM Contact c WHERE 1 = 1 AND c.text = 'a'";
    let mut statement = StatementCompiler::new(&metamodel).compile_text(text).unwrap();
    let optimizer = QueryOptimizer::new(context);
    optimizer.optimize(&mut statement);
    let once = Arc::clone(statement.root());
    optimizer.optimize(&mut statement);
    assert!(Arc::ptr_eq(statement.root(), &once));
}

#[test]
fn redundant_grouping_is_flattened() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        optimized(
            &metamodel,
            context,
            "SELECT c FROM Contact c WHERE ((c.text = 'a'))"
        ),
        "SELECT c FROM Contact c WHERE (c.text = 'a')"
    );
}
