// Statement compiler tests
//
// Compilation derives selected paths (with branch guards), typed alias
// bindings resolved against the metamodel, and the parameter sets.

use warden_ql::ast::node;
use warden_ql::compile::{CompileError, QueryError, StatementCache, StatementCompiler};
use warden_ql::metamodel::{Attribute, EntityType, Metamodel};
use warden_ql::render;

fn metamodel() -> Metamodel {
    Metamodel::new()
        .with_entity(
            EntityType::new("User")
                .with_class("com.example.User")
                .with_attribute(Attribute::basic("name"))
                .with_attribute(Attribute::collection("contacts", "Contact"))
                .with_attribute(Attribute::map("phones", "PhoneType", "Phone")),
        )
        .with_entity(
            EntityType::new("Contact")
                .with_class("com.example.Contact")
                .with_attribute(Attribute::basic("text"))
                .with_attribute(Attribute::association("owner", "User"))
                .with_attribute(Attribute::association("backup", "User"))
                .with_attribute(Attribute::collection("tags", "Tag")),
        )
        .with_entity(EntityType::new("Phone").with_attribute(Attribute::basic("code")))
}

// ============================================================================
// Section: Bindings
// ============================================================================

#[test]
fn range_declaration_binds_alias_to_entity() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT c FROM Contact c WHERE c.owner = :user")
        .unwrap();

    let binding = compiled.binding_for_alias("c").unwrap();
    assert_eq!(binding.declared_type(), "Contact");
    assert!(binding.join_path().is_none());
    assert_eq!(compiled.type_bindings().len(), 1);
}

#[test]
fn entity_resolves_by_class_name() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT c FROM com.example.Contact c")
        .unwrap();
    assert_eq!(compiled.binding_for_alias("c").unwrap().declared_type(), "Contact");
}

#[test]
fn join_resolves_through_association() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT o FROM Contact c JOIN c.owner o")
        .unwrap();

    let binding = compiled.binding_for_alias("o").unwrap();
    assert_eq!(binding.declared_type(), "User");
    assert!(binding.is_inner_join());
    assert!(!binding.is_fetch_join());
    assert_eq!(binding.join_path().unwrap().to_path_text(), "c.owner");
}

#[test]
fn fetch_join_without_alias_is_still_bound() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT c FROM Contact c LEFT JOIN FETCH c.owner")
        .unwrap();

    let fetched = compiled
        .type_bindings()
        .iter()
        .find(|binding| binding.alias().is_none())
        .unwrap();
    assert_eq!(fetched.declared_type(), "User");
    assert!(fetched.is_fetch_join());
    assert!(!fetched.is_inner_join());
}

#[test]
fn map_join_carries_key_type() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT p FROM User u JOIN u.phones p")
        .unwrap();

    let binding = compiled.binding_for_alias("p").unwrap();
    assert_eq!(binding.declared_type(), "Phone");
    assert_eq!(binding.key_type(), Some("PhoneType"));
}

#[test]
fn chained_joins_resolve_in_order() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT t FROM User u JOIN u.contacts c JOIN c.tags t")
        .unwrap();
    assert_eq!(compiled.binding_for_alias("c").unwrap().declared_type(), "Contact");
    assert_eq!(compiled.binding_for_alias("t").unwrap().declared_type(), "Tag");
}

#[test]
fn subselect_from_contributes_bindings() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT c FROM Contact c WHERE EXISTS (SELECT t FROM c.tags t)")
        .unwrap();
    assert_eq!(compiled.binding_for_alias("t").unwrap().declared_type(), "Tag");
}

// ============================================================================
// Section: Selected paths
// ============================================================================

#[test]
fn plain_selected_path() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler.compile_text("SELECT c FROM Contact c").unwrap();

    assert_eq!(compiled.selected_paths().len(), 1);
    let selected = &compiled.selected_paths()[0];
    assert_eq!(selected.path().root(), "c");
    assert!(selected.path().is_alias_only());
    assert!(selected.condition().is_none());
}

#[test]
fn entry_expands_to_key_value_and_entry() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT ENTRY(p) FROM User u JOIN u.phones p")
        .unwrap();

    let texts: Vec<String> = compiled
        .selected_paths()
        .iter()
        .map(|selected| selected.path().to_path_text())
        .collect();
    assert_eq!(texts, vec!["KEY(p)", "VALUE(p)", "p"]);
}

#[test]
fn case_branches_become_conditional_paths() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text(
            "SELECT CASE WHEN c.text = 'a' THEN c.owner ELSE c.backup END FROM Contact c",
        )
        .unwrap();

    assert_eq!(compiled.selected_paths().len(), 2);
    let first = &compiled.selected_paths()[0];
    assert_eq!(first.path().to_path_text(), "c.owner");
    assert_eq!(render(first.condition().unwrap()), "c.text = 'a'");
    let second = &compiled.selected_paths()[1];
    assert_eq!(second.path().to_path_text(), "c.backup");
    assert_eq!(render(second.condition().unwrap()), "NOT (c.text = 'a')");
}

#[test]
fn later_case_branches_negate_earlier_conditions() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text(
            "SELECT CASE WHEN c.text = 'a' THEN c.owner WHEN c.text = 'b' THEN c.backup \
             ELSE c END FROM Contact c",
        )
        .unwrap();

    let second = &compiled.selected_paths()[1];
    assert_eq!(second.path().to_path_text(), "c.backup");
    assert_eq!(
        render(second.condition().unwrap()),
        "c.text = 'b' AND NOT (c.text = 'a')"
    );
    let third = &compiled.selected_paths()[2];
    assert_eq!(third.path().to_path_text(), "c");
    assert_eq!(
        render(third.condition().unwrap()),
        "NOT (c.text = 'a') AND NOT (c.text = 'b')"
    );
}

#[test]
fn coalesce_guards_with_earlier_nullness() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT COALESCE(c.owner, c.backup) FROM Contact c")
        .unwrap();

    let first = &compiled.selected_paths()[0];
    assert_eq!(first.path().to_path_text(), "c.owner");
    assert!(first.condition().is_none());
    let second = &compiled.selected_paths()[1];
    assert_eq!(second.path().to_path_text(), "c.backup");
    assert_eq!(render(second.condition().unwrap()), "c.owner IS NULL");
}

#[test]
fn nullif_guards_on_inequality() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT NULLIF(c.owner, c.backup) FROM Contact c")
        .unwrap();

    assert_eq!(compiled.selected_paths().len(), 1);
    let selected = &compiled.selected_paths()[0];
    assert_eq!(selected.path().to_path_text(), "c.owner");
    assert_eq!(render(selected.condition().unwrap()), "c.owner <> c.backup");
}

#[test]
fn constructor_arguments_and_return_type() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT NEW com.example.Dto(c.text, c.owner) FROM Contact c")
        .unwrap();

    assert_eq!(compiled.constructor_return_type(), Some("com.example.Dto"));
    assert_eq!(compiled.selected_paths().len(), 2);
    assert_eq!(compiled.selected_paths()[1].path().to_path_text(), "c.owner");
}

#[test]
fn aggregates_recurse_into_their_operand() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text("SELECT COUNT(c.owner) FROM Contact c")
        .unwrap();
    assert_eq!(compiled.selected_paths()[0].path().to_path_text(), "c.owner");
}

// ============================================================================
// Section: Parameters
// ============================================================================

#[test]
fn parameters_are_collected_from_the_whole_tree() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let compiled = compiler
        .compile_text(
            "SELECT c FROM Contact c WHERE c.text = :text AND c.owner.name = :name \
             AND c.text <> ?1 AND c.text <> ?2",
        )
        .unwrap();

    assert!(compiled.named_parameters().contains("text"));
    assert!(compiled.named_parameters().contains("name"));
    assert_eq!(compiled.named_parameters().len(), 2);
    assert_eq!(
        compiled.positional_parameters().iter().copied().collect::<Vec<_>>(),
        vec![1, 2]
    );
}

// ============================================================================
// Section: Errors
// ============================================================================

#[test]
fn unknown_entity_is_fatal() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let error = compiler.compile_text("SELECT x FROM Missing x").unwrap_err();
    assert!(matches!(
        error,
        QueryError::Compile(CompileError::UnknownEntity(name)) if name == "Missing"
    ));
}

#[test]
fn selected_path_with_undeclared_alias_is_fatal() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let error = compiler.compile_text("SELECT x FROM Contact c").unwrap_err();
    assert!(matches!(
        error,
        QueryError::Compile(CompileError::MissingAlias(alias)) if alias == "x"
    ));
}

#[test]
fn join_over_unknown_attribute_is_fatal() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let error = compiler
        .compile_text("SELECT m FROM Contact c JOIN c.missing m")
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::Compile(CompileError::InvalidPath(path)) if path == "c.missing"
    ));
}

#[test]
fn join_with_unresolvable_root_is_fatal() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let error = compiler
        .compile_text("SELECT x FROM Contact c JOIN z.owner x")
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::Compile(CompileError::UnresolvedJoin(path)) if path == "z.owner"
    ));
}

#[test]
fn abstract_roots_expand_to_concrete_subtype_bindings() {
    let metamodel = Metamodel::new()
        .with_entity(EntityType::new("Benefit").abstract_type())
        .with_entity(EntityType::new("Bonus").extends("Benefit"))
        .with_entity(EntityType::new("Raise").extends("Benefit"));
    let compiled = StatementCompiler::new(&metamodel)
        .compile_text("SELECT b FROM Benefit b")
        .unwrap();
    let bindings: Vec<(Option<&str>, &str)> = compiled
        .type_bindings()
        .iter()
        .map(|binding| (binding.alias(), binding.declared_type()))
        .collect();
    assert_eq!(bindings, vec![(Some("b"), "Bonus"), (Some("b"), "Raise")]);
}

#[test]
fn anonymous_root_declarations_are_rejected() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    let error = compiler
        .compile_text("SELECT u FROM Contact, User u")
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::Compile(CompileError::MissingAlias(name)) if name == "Contact"
    ));
}

#[test]
fn parse_failures_surface_as_query_errors() {
    let metamodel = metamodel();
    let compiler = StatementCompiler::new(&metamodel);
    assert!(matches!(
        compiler.compile_text("SELECT FROM"),
        Err(QueryError::Parse(_))
    ));
}

// ============================================================================
// Section: Cache
// ============================================================================

#[test]
fn cache_hits_are_isolated_clones() {
    let metamodel = metamodel();
    let cache = StatementCache::new(&metamodel);
    let text = "SELECT c FROM Contact c WHERE c.text = 'a'";

    let mut first = cache.compile(text).unwrap();
    first.set_root(node::always_true());

    // The mutation above must not leak into later hits.
    let second = cache.compile(text).unwrap();
    assert_eq!(render(second.root()), text);
    assert_eq!(second.binding_for_alias("c").unwrap().declared_type(), "Contact");
}
