// Partial evaluator tests
//
// The evaluator is three-valued: every predicate is true, false or
// Undefined ("cannot be decided with what is bound"). Undefined is a
// value, not an error, and the logic operators follow Kleene semantics.

use std::collections::HashMap;

use serde_json::json;
use warden_ql::evaluator::{
    EvaluationContext, EvaluationMode, PartialEvaluator, Undefined,
};
use warden_ql::metamodel::{Attribute, EntityType, Metamodel};
use warden_ql::{parse_predicate, Value};

fn metamodel() -> Metamodel {
    Metamodel::new()
        .with_entity(
            EntityType::new("Contact")
                .with_attribute(Attribute::basic("text"))
                .with_attribute(Attribute::association("owner", "User")),
        )
        .with_entity(EntityType::new("User").with_attribute(Attribute::basic("name")))
}

fn object(pairs: Vec<(&str, Value)>) -> Value {
    let mut attributes = HashMap::new();
    for (name, value) in pairs {
        attributes.insert(name.to_string(), value);
    }
    Value::Object(attributes)
}

fn eval(text: &str, context: &EvaluationContext) -> Result<Value, Undefined> {
    let predicate = parse_predicate(text).unwrap();
    PartialEvaluator::new().evaluate(&predicate, context)
}

fn eval_bool(text: &str, context: &EvaluationContext) -> Result<bool, Undefined> {
    let predicate = parse_predicate(text).unwrap();
    PartialEvaluator::new().evaluate_boolean(&predicate, context)
}

// ============================================================================
// Section: Three-valued logic
// ============================================================================

#[test]
fn and_or_not_follow_kleene_semantics() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);

    // :p is unbound, so `1 = :p` is Undefined.
    assert_eq!(eval_bool("1 = 1 AND 1 = :p", &context), Err(Undefined));
    assert_eq!(eval_bool("1 <> 1 AND 1 = :p", &context), Ok(false));
    assert_eq!(eval_bool("1 = :p AND 1 <> 1", &context), Ok(false));
    assert_eq!(eval_bool("1 = 1 OR 1 = :p", &context), Ok(true));
    assert_eq!(eval_bool("1 = :p OR 1 = 1", &context), Ok(true));
    assert_eq!(eval_bool("1 <> 1 OR 1 = :p", &context), Err(Undefined));
    assert_eq!(eval_bool("NOT 1 = :p", &context), Err(Undefined));
    assert_eq!(eval_bool("NOT 1 = 1", &context), Ok(false));
}

#[test]
fn null_comparisons_are_undefined_but_is_null_is_not() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel)
        .bind_alias("c", object(vec![("text", Value::Null)]));

    assert_eq!(eval_bool("c.text = 'a'", &context), Err(Undefined));
    assert_eq!(eval_bool("c.text <> 'a'", &context), Err(Undefined));
    assert_eq!(eval_bool("c.text IS NULL", &context), Ok(true));
    assert_eq!(eval_bool("c.text IS NOT NULL", &context), Ok(false));
}

// ============================================================================
// Section: Comparisons and arithmetic
// ============================================================================

#[test]
fn numeric_widening_in_equality() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("1 = 1.0", &context), Ok(true));
    assert_eq!(eval_bool("1 < 1.5", &context), Ok(true));
}

#[test]
fn arithmetic_precedence_and_exactness() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("2 + 3 * 4 = 14", &context), Ok(true));
    assert_eq!(eval_bool("10 / 4 = 2.5", &context), Ok(true));
    assert_eq!(eval_bool("6 / 2 = 3", &context), Ok(true));
    assert_eq!(eval_bool("10 / 3 > 3.33", &context), Ok(true));
    assert_eq!(eval_bool("-(2 + 3) = -5", &context), Ok(true));
}

#[test]
fn division_by_zero_is_undefined() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("1 / 0 = 1", &context), Err(Undefined));
}

#[test]
fn between_is_inclusive() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("5 BETWEEN 1 AND 10", &context), Ok(true));
    assert_eq!(eval_bool("1 BETWEEN 1 AND 10", &context), Ok(true));
    assert_eq!(eval_bool("11 BETWEEN 1 AND 10", &context), Ok(false));
    assert_eq!(eval_bool("5 NOT BETWEEN 1 AND 10", &context), Ok(false));
}

// ============================================================================
// Section: Strings
// ============================================================================

#[test]
fn string_functions() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("CONCAT('a', 'b') = 'ab'", &context), Ok(true));
    assert_eq!(eval_bool("SUBSTRING('hello', 2, 3) = 'ell'", &context), Ok(true));
    assert_eq!(eval_bool("SUBSTRING('hello', 2) = 'ello'", &context), Ok(true));
    assert_eq!(eval_bool("UPPER('ab') = 'AB'", &context), Ok(true));
    assert_eq!(eval_bool("LOWER('AB') = 'ab'", &context), Ok(true));
    assert_eq!(eval_bool("LENGTH('abc') = 3", &context), Ok(true));
    assert_eq!(eval_bool("TRIM('  x  ') = 'x'", &context), Ok(true));
    assert_eq!(
        eval_bool("TRIM(LEADING 'x' FROM 'xxay') = 'ay'", &context),
        Ok(true)
    );
    assert_eq!(
        eval_bool("TRIM(TRAILING 'x' FROM 'ayxx') = 'ay'", &context),
        Ok(true)
    );
}

#[test]
fn locate_is_one_based_and_zero_when_absent() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("LOCATE('ll', 'hello') = 3", &context), Ok(true));
    assert_eq!(eval_bool("LOCATE('z', 'hello') = 0", &context), Ok(true));
    assert_eq!(eval_bool("LOCATE('l', 'hello', 4) = 4", &context), Ok(true));
}

#[test]
fn like_patterns() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(eval_bool("'hello' LIKE 'h_llo'", &context), Ok(true));
    assert_eq!(eval_bool("'hello' LIKE 'h%'", &context), Ok(true));
    assert_eq!(eval_bool("'hello' LIKE 'H%'", &context), Ok(false));
    assert_eq!(eval_bool("'hello' LIKE 'hello'", &context), Ok(true));
    assert_eq!(eval_bool("'h.llo' LIKE 'h.llo'", &context), Ok(true));
    assert_eq!(eval_bool("'hxllo' LIKE 'h.llo'", &context), Ok(false));
    assert_eq!(eval_bool("'50%' LIKE '50!%' ESCAPE '!'", &context), Ok(true));
    assert_eq!(eval_bool("'50x' LIKE '50!%' ESCAPE '!'", &context), Ok(false));
}

// ============================================================================
// Section: Collections
// ============================================================================

#[test]
fn in_over_literals_and_bound_collections() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel).bind_parameter(
        "roles",
        Value::Collection(vec![Value::from("admin"), Value::from("user")]),
    );

    assert_eq!(eval_bool("'a' IN ('a', 'b')", &context), Ok(true));
    assert_eq!(eval_bool("'c' IN ('a', 'b')", &context), Ok(false));
    assert_eq!(eval_bool("'admin' IN (:roles)", &context), Ok(true));
    assert_eq!(eval_bool("'guest' IN (:roles)", &context), Ok(false));
    assert_eq!(eval_bool("'a' IN (:unbound)", &context), Err(Undefined));
}

#[test]
fn member_of_and_emptiness() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel).bind_alias(
        "c",
        object(vec![
            ("tags", Value::Collection(vec![Value::from("a"), Value::from("b")])),
            ("empty", Value::Collection(vec![])),
        ]),
    );

    assert_eq!(eval_bool("'a' MEMBER OF c.tags", &context), Ok(true));
    assert_eq!(eval_bool("'z' MEMBER OF c.tags", &context), Ok(false));
    assert_eq!(eval_bool("'a' NOT MEMBER OF c.tags", &context), Ok(false));
    assert_eq!(eval_bool("c.tags IS EMPTY", &context), Ok(false));
    assert_eq!(eval_bool("c.empty IS EMPTY", &context), Ok(true));
    assert_eq!(eval_bool("c.tags IS NOT EMPTY", &context), Ok(true));
}

#[test]
fn aggregates_over_bound_collections() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel).bind_alias(
        "c",
        object(vec![
            (
                "scores",
                Value::Collection(vec![
                    Value::Integer(1),
                    Value::Integer(2),
                    Value::Integer(3),
                ]),
            ),
            ("empty", Value::Collection(vec![])),
        ]),
    );

    assert_eq!(eval_bool("SUM(c.scores) = 6", &context), Ok(true));
    assert_eq!(eval_bool("AVG(c.scores) = 2", &context), Ok(true));
    assert_eq!(eval_bool("MIN(c.scores) = 1", &context), Ok(true));
    assert_eq!(eval_bool("MAX(c.scores) = 3", &context), Ok(true));
    assert_eq!(eval_bool("COUNT(c.scores) = 3", &context), Ok(true));
    assert_eq!(eval_bool("SUM(c.empty) IS NULL", &context), Ok(true));
}

// ============================================================================
// Section: Paths
// ============================================================================

#[test]
fn path_navigation() {
    let metamodel = metamodel();
    let owner = object(vec![("name", Value::from("Alice"))]);
    let context = EvaluationContext::new(&metamodel)
        .bind_alias("c", object(vec![("owner", owner), ("text", Value::from("hi"))]));

    assert_eq!(eval_bool("c.owner.name = 'Alice'", &context), Ok(true));
    assert_eq!(eval_bool("c.text = 'hi'", &context), Ok(true));
}

#[test]
fn null_propagates_through_navigation() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel)
        .bind_alias("c", object(vec![("owner", Value::Null)]));
    assert_eq!(eval_bool("c.owner.name IS NULL", &context), Ok(true));
}

#[test]
fn unbound_alias_and_absent_attribute_are_undefined() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel)
        .bind_alias("c", object(vec![("text", Value::from("hi"))]));

    assert_eq!(eval_bool("x.name = 'a'", &context), Err(Undefined));
    assert_eq!(eval_bool("c.missing = 'a'", &context), Err(Undefined));
}

#[test]
fn key_and_value_projections_over_bound_maps() {
    let metamodel = metamodel();
    let phones = Value::Map(vec![
        (Value::from("home"), Value::from("111")),
        (Value::from("work"), Value::from("222")),
    ]);
    let context = EvaluationContext::new(&metamodel)
        .bind_alias("u", object(vec![("phones", phones)]));

    assert_eq!(eval_bool("'home' IN (KEY(u.phones))", &context), Ok(true));
    assert_eq!(eval_bool("'111' IN (VALUE(u.phones))", &context), Ok(true));
    assert_eq!(eval_bool("'333' IN (VALUE(u.phones))", &context), Ok(false));
}

// ============================================================================
// Section: Subselects
// ============================================================================

#[test]
fn collection_subselect_evaluates_in_memory() {
    let metamodel = metamodel();
    let items = Value::Collection(vec![
        object(vec![("name", Value::from("pen")), ("price", Value::Integer(5))]),
        object(vec![("name", Value::from("ink")), ("price", Value::Integer(20))]),
    ]);
    let context =
        EvaluationContext::new(&metamodel).bind_alias("e", object(vec![("items", items)]));

    assert_eq!(
        eval_bool("'pen' IN (SELECT i.name FROM e.items i)", &context),
        Ok(true)
    );
    assert_eq!(
        eval_bool("'nib' IN (SELECT i.name FROM e.items i)", &context),
        Ok(false)
    );
    assert_eq!(
        eval_bool("EXISTS (SELECT i FROM e.items i WHERE i.price > 10)", &context),
        Ok(true)
    );
    assert_eq!(
        eval_bool("EXISTS (SELECT i FROM e.items i WHERE i.price > 100)", &context),
        Ok(false)
    );
}

#[test]
fn entity_rooted_subselects_are_undefined() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        eval_bool("EXISTS (SELECT u FROM User u)", &context),
        Err(Undefined)
    );
}

// ============================================================================
// Section: Hints and modes
// ============================================================================

#[test]
fn skip_access_check_short_circuits_access_checks() {
    let metamodel = metamodel();
    let access = EvaluationContext::new(&metamodel).with_mode(EvaluationMode::AccessCheck);
    assert_eq!(
        eval_bool("/* skip_access_check */ 1 = :unbound", &access),
        Ok(true)
    );

    let always =
        EvaluationContext::new(&metamodel).with_mode(EvaluationMode::AlwaysEvaluatable);
    assert_eq!(
        eval_bool("/* skip_access_check */ 1 = :unbound", &always),
        Err(Undefined)
    );
}

#[test]
fn skip_optimize_blinds_the_optimizer_mode() {
    let metamodel = metamodel();
    let optimize = EvaluationContext::new(&metamodel).with_mode(EvaluationMode::OptimizeQuery);
    assert_eq!(eval_bool("/* skip_optimize */ 1 = 1", &optimize), Err(Undefined));

    let access = EvaluationContext::new(&metamodel).with_mode(EvaluationMode::AccessCheck);
    assert_eq!(eval_bool("/* skip_optimize */ 1 = 1", &access), Ok(true));
}

// ============================================================================
// Section: Conditional expressions
// ============================================================================

#[test]
fn case_coalesce_nullif() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel)
        .bind_alias("c", object(vec![("text", Value::Null)]));

    assert_eq!(
        eval("CASE WHEN 1 = 1 THEN 'a' ELSE 'b' END", &context),
        Ok(Value::from("a"))
    );
    assert_eq!(
        eval("CASE WHEN 1 <> 1 THEN 'a' ELSE 'b' END", &context),
        Ok(Value::from("b"))
    );
    assert_eq!(
        eval("CASE 2 WHEN 1 THEN 'a' WHEN 2 THEN 'b' ELSE 'c' END", &context),
        Ok(Value::from("b"))
    );
    assert_eq!(eval("COALESCE(c.text, 'd')", &context), Ok(Value::from("d")));
    assert_eq!(eval("COALESCE('x', 'd')", &context), Ok(Value::from("x")));
    assert_eq!(eval("NULLIF('a', 'a')", &context), Ok(Value::Null));
    assert_eq!(eval("NULLIF('a', 'b')", &context), Ok(Value::from("a")));
}

#[test]
fn undecidable_case_branch_poisons_the_case() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel);
    assert_eq!(
        eval("CASE WHEN 1 = :p THEN 'a' ELSE 'b' END", &context),
        Err(Undefined)
    );
}

#[test]
fn json_values_bind_as_aliases_and_parameters() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel)
        .bind_alias(
            "c",
            Value::from(json!({
                "text": "hi",
                "owner": { "name": "Alice" },
                "scores": [1, 2, 3],
            })),
        )
        .bind_parameter("limit", Value::from(json!(2.5)));

    assert_eq!(eval_bool("c.text = 'hi'", &context), Ok(true));
    assert_eq!(eval_bool("c.owner.name = 'Alice'", &context), Ok(true));
    assert_eq!(eval_bool("2 MEMBER OF c.scores", &context), Ok(true));
    assert_eq!(eval_bool("SUM(c.scores) = 6", &context), Ok(true));
    assert_eq!(eval_bool(":limit = 2.5", &context), Ok(true));
    assert_eq!(eval_bool(":limit > 2", &context), Ok(true));
}

#[test]
fn positional_parameters_bind_by_index() {
    let metamodel = metamodel();
    let context = EvaluationContext::new(&metamodel).bind_positional(1, Value::Integer(7));
    assert_eq!(eval_bool("?1 = 7", &context), Ok(true));
    assert_eq!(eval_bool("?2 = 7", &context), Err(Undefined));
}
