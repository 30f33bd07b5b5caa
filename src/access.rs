//! Access rules and their enforcement.
//!
//! A rule grants one or more kinds of access to an entity type, usually
//! under a predicate over the entity and the security context. Rules
//! are enforced two ways: [`RuleInjector::inject`] rewrites a compiled
//! statement so the database only returns accessible rows, and
//! [`RuleInjector::is_accessible`] decides access for one in-memory
//! value with the partial evaluator.
//!
//! Rule resolution is deliberately asymmetric: a type no rule mentions
//! is unrestricted, while a mentioned type with no granting rule is
//! denied outright.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::{
    ast::{Node, NodeKind, QueryPath, SelectedPath, node},
    compile::CompiledStatement,
    evaluator::{EvaluationContext, EvaluationMode, PartialEvaluator},
    metamodel::{AttributeKind, Metamodel, SecurityContext, SecurityValue},
    parser::{self, ParseError},
    rewrite::{self, Rewrite},
    value::Value,
};

/// The four kinds of access a rule can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessType {
    Create,
    Read,
    Update,
    Delete,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessType::Create => "CREATE",
            AccessType::Read => "READ",
            AccessType::Update => "UPDATE",
            AccessType::Delete => "DELETE",
        };
        write!(f, "{}", name)
    }
}

/// A rule that could not be parsed or resolved, or an injection that
/// could not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectError {
    Parse(ParseError),
    UnknownEntity(String),
}

impl std::fmt::Display for InjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectError::Parse(err) => write!(f, "{}", err),
            InjectError::UnknownEntity(name) => write!(f, "unknown entity '{}'", name),
        }
    }
}

impl std::error::Error for InjectError {}

impl From<ParseError> for InjectError {
    fn from(err: ParseError) -> InjectError {
        InjectError::Parse(err)
    }
}

/// One parsed and resolved access rule.
#[derive(Debug, Clone)]
pub struct AccessRule {
    entity_type: String,
    alias: String,
    predicate: Option<Arc<Node>>,
    access_types: BTreeSet<AccessType>,
}

impl AccessRule {
    /// Parse a `GRANT ... ACCESS TO Entity alias [WHERE ...]` rule and
    /// resolve its entity against the metamodel.
    pub fn parse(metamodel: &Metamodel, text: &str) -> Result<AccessRule, InjectError> {
        let parsed = parser::parse_access_rule(text)?;
        let entity = metamodel
            .resolve(&parsed.entity_name)
            .ok_or_else(|| InjectError::UnknownEntity(parsed.entity_name.clone()))?;
        let access_types = if parsed.access_types.is_empty() {
            // A bare GRANT ACCESS grants everything.
            BTreeSet::from([
                AccessType::Create,
                AccessType::Read,
                AccessType::Update,
                AccessType::Delete,
            ])
        } else {
            parsed.access_types.into_iter().collect()
        };
        Ok(AccessRule {
            entity_type: entity.name().to_string(),
            alias: parsed.alias,
            predicate: parsed.predicate,
            access_types,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn predicate(&self) -> Option<&Arc<Node>> {
        self.predicate.as_ref()
    }

    pub fn grants(&self, access_type: AccessType) -> bool {
        self.access_types.contains(&access_type)
    }

    /// Whether this rule restricts values of the given type: true when
    /// either type is assignable to the other.
    pub fn applies_to(&self, metamodel: &Metamodel, entity_type: &str) -> bool {
        metamodel.may_be_assignable(&self.entity_type, entity_type)
    }

    /// A copy of this rule whose alias avoids every reserved name,
    /// renamed to the lowest free numeric suffix (`e` becomes `e0`,
    /// then `e1`, ...). Path roots in the predicate are renamed along.
    pub fn resolve_alias_collision<'r>(
        &self,
        reserved: impl Iterator<Item = &'r str>,
    ) -> AccessRule {
        let reserved: BTreeSet<&str> = reserved.collect();
        if !reserved.contains(self.alias.as_str()) {
            return self.clone();
        }
        let mut suffix = 0usize;
        let fresh = loop {
            let candidate = format!("{}{}", self.alias, suffix);
            if !reserved.contains(candidate.as_str()) {
                break candidate;
            }
            suffix += 1;
        };
        let predicate = self
            .predicate
            .as_ref()
            .map(|predicate| substitute_path_root(predicate, &self.alias, &fresh));
        AccessRule {
            entity_type: self.entity_type.clone(),
            alias: fresh,
            predicate,
            access_types: self.access_types.clone(),
        }
    }
}

/// The merged restriction for one selected type: a predicate ready to
/// splice, plus the parameter values it references.
#[derive(Debug, Clone)]
pub struct AccessDefinition {
    predicate: Arc<Node>,
    parameters: HashMap<String, Value>,
}

impl AccessDefinition {
    pub fn predicate(&self) -> &Arc<Node> {
        &self.predicate
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }
}

/// Rewrites statements and answers in-memory access checks against a
/// set of rules and a security context.
pub struct RuleInjector<'m> {
    metamodel: &'m Metamodel,
    security: SecurityContext,
    rules: Vec<AccessRule>,
    evaluator: PartialEvaluator,
}

impl<'m> RuleInjector<'m> {
    pub fn new(metamodel: &'m Metamodel, security: SecurityContext) -> Self {
        RuleInjector {
            metamodel,
            security,
            rules: Vec::new(),
            evaluator: PartialEvaluator::new(),
        }
    }

    pub fn with_rule(mut self, rule: AccessRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = AccessRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// Rewrite the statement so it only returns rows the security
    /// context may access with `access_type`. Returns the parameter
    /// values the rewritten statement references; the caller binds them
    /// at execution.
    ///
    /// Each selected path is restricted independently. A conditionally
    /// selected path (a CASE branch) is restricted by implication: the
    /// restriction only has to hold when the branch is actually taken.
    pub fn inject(
        &self,
        statement: &mut CompiledStatement,
        access_type: AccessType,
    ) -> Result<HashMap<String, Value>, InjectError> {
        let mut parameters = HashMap::new();
        let reserved = Reserved {
            aliases: statement
                .type_bindings()
                .iter()
                .filter_map(|binding| binding.alias().map(str::to_string))
                .collect(),
            parameters: statement.named_parameters().clone(),
        };
        let selected: Vec<SelectedPath> = statement.selected_paths().to_vec();
        for selected_path in selected {
            let Some(entity_type) = self.selected_entity_type(statement, selected_path.path())
            else {
                continue;
            };
            let root_text = selected_path.path().to_path_text();
            let Some(restriction) = self.restriction(
                &entity_type,
                &root_text,
                access_type,
                &reserved,
                &mut parameters,
            ) else {
                continue;
            };
            if node::is_always_true(&restriction) {
                continue;
            }
            let restriction = match selected_path.condition() {
                // NOT (guard) OR (restriction)
                Some(guard) => node::or(
                    node::not(node::group(guard.clone())),
                    grouped(restriction),
                ),
                None => restriction,
            };
            splice(statement, restriction);
        }
        Ok(parameters)
    }

    /// Decide access to one in-memory value. `Undefined` is a denial:
    /// when the bound information cannot prove access, there is none.
    pub fn is_accessible(&self, entity_type: &str, value: Value, access_type: AccessType) -> bool {
        let entity_type = match self.metamodel.resolve(entity_type) {
            Some(entity) => entity.name().to_string(),
            None => return false,
        };
        let applicable: Vec<&AccessRule> = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(self.metamodel, &entity_type))
            .collect();
        if applicable.is_empty() {
            return true;
        }

        let mut context = EvaluationContext::new(self.metamodel)
            .with_mode(EvaluationMode::AccessCheck);
        for alias in self.security.aliases() {
            let bound = match self.security.value(alias) {
                Some(SecurityValue::Single(value)) => value.clone(),
                Some(SecurityValue::Set(values)) => Value::Collection(values.clone()),
                None => continue,
            };
            // Both spellings must evaluate: `CURRENT_PRINCIPAL` as a
            // path root and `:CURRENT_PRINCIPAL` as a parameter.
            context = context
                .bind_alias(alias, bound.clone())
                .bind_parameter(alias, bound);
        }

        for rule in applicable {
            if !rule.grants(access_type) {
                continue;
            }
            let rule = rule.resolve_alias_collision(self.security.aliases());
            let Some(predicate) = rule.predicate() else {
                return true;
            };
            let rule_context = context.clone().bind_alias(rule.alias(), value.clone());
            if self.evaluator.evaluate_boolean(predicate, &rule_context) == Ok(true) {
                return true;
            }
        }
        false
    }

    /// The merged restriction for one type, or `None` when no rule
    /// mentions the type at all.
    pub fn access_definition(
        &self,
        entity_type: &str,
        root_text: &str,
        access_type: AccessType,
    ) -> Option<AccessDefinition> {
        let mut parameters = HashMap::new();
        let predicate = self.restriction(
            entity_type,
            root_text,
            access_type,
            &Reserved::default(),
            &mut parameters,
        )?;
        Some(AccessDefinition {
            predicate,
            parameters,
        })
    }

    fn restriction(
        &self,
        entity_type: &str,
        root_text: &str,
        access_type: AccessType,
        reserved: &Reserved,
        parameters: &mut HashMap<String, Value>,
    ) -> Option<Arc<Node>> {
        let applicable: Vec<&AccessRule> = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(self.metamodel, entity_type))
            .collect();
        if applicable.is_empty() {
            return None;
        }
        let mut merged: Option<Arc<Node>> = None;
        for rule in applicable {
            if !rule.grants(access_type) {
                continue;
            }
            let contribution = match rule.predicate() {
                // An unconditional grant makes the whole restriction
                // vacuous.
                None => return Some(node::always_true()),
                Some(predicate) => {
                    let mut predicate =
                        substitute_path_root(predicate, rule.alias(), root_text);
                    // Any subselect alias the rule declares must not
                    // capture one of the statement's aliases.
                    let mut declared = BTreeSet::new();
                    declared_aliases(&predicate, &mut declared);
                    for alias in &declared {
                        if reserved.aliases.contains(alias) {
                            let fresh = fresh_alias(alias, &reserved.aliases, &declared);
                            predicate = rename_declared_alias(&predicate, alias, &fresh);
                        }
                    }
                    self.bind_security_values(&predicate, reserved, parameters)
                }
            };
            if node::is_always_true(&contribution) {
                return Some(node::always_true());
            }
            let contribution = grouped(contribution);
            merged = Some(match merged {
                Some(existing) => node::or(existing, contribution),
                None => contribution,
            });
        }
        Some(merged.unwrap_or_else(node::always_false))
    }

    /// Replace every reference to a security alias with concrete
    /// parameters: single values become one named parameter, and an
    /// `IN` over a set value expands to an OR chain of equalities (or
    /// the canonical `1 <> 1` when the set is empty).
    fn bind_security_values(
        &self,
        predicate: &Arc<Node>,
        reserved: &Reserved,
        parameters: &mut HashMap<String, Value>,
    ) -> Arc<Node> {
        rewrite::rewrite_tree(predicate, |current| match current.kind() {
            NodeKind::In => {
                let Some((alias, values)) = self.in_set_alias(current) else {
                    return Rewrite::Keep;
                };
                let Some(operand) = current.child(0) else {
                    return Rewrite::Keep;
                };
                if values.is_empty() {
                    return Rewrite::Replace(node::always_false());
                }
                let prefix = parameter_prefix(&alias);
                let mut expansion: Option<Arc<Node>> = None;
                for value in values {
                    let name = fresh_parameter(parameters, reserved, &prefix);
                    parameters.insert(name.clone(), value);
                    let comparison =
                        node::equals(operand.clone(), node::named_parameter(name));
                    expansion = Some(match expansion {
                        Some(existing) => node::or(existing, comparison),
                        None => comparison,
                    });
                }
                match expansion {
                    Some(expansion) => Rewrite::Replace(node::group(expansion)),
                    None => Rewrite::Keep,
                }
            }
            NodeKind::Path => {
                let Some(path) = current.value().and_then(QueryPath::parse) else {
                    return Rewrite::Keep;
                };
                let Some(SecurityValue::Single(value)) = self.security.value(path.root())
                else {
                    return Rewrite::Keep;
                };
                let mut resolved = value.clone();
                for segment in path.segments() {
                    match resolved.attribute(segment) {
                        Some(next) => resolved = next.clone(),
                        None => {
                            resolved = Value::Null;
                            break;
                        }
                    }
                }
                let mut name = path.root().to_string();
                for segment in path.segments() {
                    name.push('_');
                    name.push_str(segment);
                }
                let name = match parameters.get(&name) {
                    Some(existing) if *existing == resolved => name,
                    Some(_) => fresh_parameter(parameters, reserved, &name),
                    None if reserved.parameters.contains(&name) => {
                        fresh_parameter(parameters, reserved, &name)
                    }
                    None => name,
                };
                parameters.insert(name.clone(), resolved);
                Rewrite::Replace(node::named_parameter(name))
            }
            // A named parameter spelled after a single-valued security
            // alias keeps its name; only the value needs binding.
            NodeKind::NamedParameter => {
                let Some(name) = current.value() else {
                    return Rewrite::Keep;
                };
                let Some(SecurityValue::Single(value)) = self.security.value(name) else {
                    return Rewrite::Keep;
                };
                parameters.insert(name.to_string(), value.clone());
                Rewrite::Keep
            }
            _ => Rewrite::Keep,
        })
    }

    /// When an IN node's candidates are exactly one reference to a
    /// set-valued security alias, return the alias and its values.
    fn in_set_alias(&self, in_node: &Arc<Node>) -> Option<(String, Vec<Value>)> {
        let [_, candidate] = in_node.children() else {
            return None;
        };
        let alias = match candidate.kind() {
            NodeKind::Path => {
                let path = candidate.value().and_then(QueryPath::parse)?;
                if !path.is_alias_only() {
                    return None;
                }
                path.root().to_string()
            }
            NodeKind::NamedParameter => candidate.value()?.to_string(),
            _ => return None,
        };
        match self.security.value(&alias) {
            Some(SecurityValue::Set(values)) => Some((alias, values.clone())),
            _ => None,
        }
    }

    /// The entity type a selected path ranges over, or `None` when it
    /// selects a basic value no rule can apply to.
    fn selected_entity_type(
        &self,
        statement: &CompiledStatement,
        path: &QueryPath,
    ) -> Option<String> {
        let binding = statement.binding_for_alias(path.root())?;
        if path.segments().is_empty() {
            if path.is_key_path() {
                return binding.key_type().map(str::to_string);
            }
            return Some(binding.declared_type().to_string());
        }
        let mut current = binding.declared_type().to_string();
        let last = path.segments().len() - 1;
        for (index, segment) in path.segments().iter().enumerate() {
            let entity = self.metamodel.resolve(&current)?;
            let attribute = entity.attribute(segment)?;
            if attribute.kind() == AttributeKind::Basic {
                return None;
            }
            if index == last && path.is_key_path() {
                return attribute.key_type().map(str::to_string);
            }
            current = attribute.target_type()?.to_string();
        }
        Some(current)
    }
}

/// AND a restriction into the statement's WHERE clause, creating the
/// clause right after FROM when the statement has none. The existing
/// predicate and the restriction are each bracketed so operator
/// precedence cannot change meaning.
fn splice(statement: &mut CompiledStatement, restriction: Arc<Node>) {
    let root = Arc::clone(statement.root());
    let restriction = grouped(restriction);
    match root
        .children()
        .iter()
        .position(|child| child.kind() == NodeKind::WhereClause)
    {
        Some(index) => {
            let where_clause = &root.children()[index];
            let Some(existing) = where_clause.child(0) else {
                return;
            };
            let combined = node::and(grouped(Arc::clone(existing)), restriction);
            let rewritten = rewrite::replace_child(where_clause, 0, combined);
            statement.set_root(rewrite::replace_child(&root, index, rewritten));
        }
        None => {
            let from_index = root
                .children()
                .iter()
                .position(|child| child.kind() == NodeKind::FromClause);
            let insert_at = match from_index {
                Some(index) => index + 1,
                None => root.children().len(),
            };
            let clause = node::where_clause(restriction);
            statement.set_root(rewrite::insert_child(&root, insert_at, clause));
        }
    }
}

/// Bracket a predicate unless it already is a grouping.
fn grouped(predicate: Arc<Node>) -> Arc<Node> {
    if predicate.kind() == NodeKind::Grouping {
        predicate
    } else {
        node::group(predicate)
    }
}

/// Rename every path rooted at `from` so it roots at `to` instead.
fn substitute_path_root(predicate: &Arc<Node>, from: &str, to: &str) -> Arc<Node> {
    rewrite::rewrite_tree(predicate, |current| {
        if current.kind() != NodeKind::Path {
            return Rewrite::Keep;
        }
        let Some(path) = current.value().and_then(QueryPath::parse) else {
            return Rewrite::Keep;
        };
        if path.root() != from {
            return Rewrite::Keep;
        }
        let renamed = path.with_root(to);
        Rewrite::Replace(Node::leaf(NodeKind::Path, renamed.to_path_text()))
    })
}

/// `CURRENT_ROLES` expands to parameters `role0`, `role1`, ...
fn parameter_prefix(alias: &str) -> String {
    let stripped = alias.strip_prefix("CURRENT_").unwrap_or(alias);
    let lowered = stripped.to_lowercase();
    lowered.strip_suffix('s').unwrap_or(&lowered).to_string()
}

/// Names an injection must not reuse: the statement's declared aliases
/// and its own named parameters.
#[derive(Debug, Default)]
struct Reserved {
    aliases: BTreeSet<String>,
    parameters: BTreeSet<String>,
}

fn fresh_parameter(
    parameters: &HashMap<String, Value>,
    reserved: &Reserved,
    prefix: &str,
) -> String {
    let mut index = 0usize;
    loop {
        let candidate = format!("{}{}", prefix, index);
        if !parameters.contains_key(&candidate) && !reserved.parameters.contains(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Collect every alias a predicate's FROM items declare, subselects and
/// joins included.
fn declared_aliases(node: &Arc<Node>, found: &mut BTreeSet<String>) {
    if matches!(
        node.kind(),
        NodeKind::RangeDeclaration
            | NodeKind::InnerJoin
            | NodeKind::OuterJoin
            | NodeKind::InnerFetchJoin
            | NodeKind::OuterFetchJoin
    ) {
        if let Some(alias) = node.child(1).and_then(|alias| alias.value()) {
            found.insert(alias.to_string());
        }
    }
    for child in node.children() {
        declared_aliases(child, found);
    }
}

/// Rename a declared alias everywhere it appears: the declaration's
/// alias node and every path rooted at it.
fn rename_declared_alias(predicate: &Arc<Node>, from: &str, to: &str) -> Arc<Node> {
    rewrite::rewrite_tree(predicate, |current| match current.kind() {
        NodeKind::Alias if current.value() == Some(from) => {
            Rewrite::Replace(Node::leaf(NodeKind::Alias, to))
        }
        // Collection-rooted declarations carry their path in the entity
        // name slot.
        NodeKind::EntityName => {
            let Some(name) = current.value() else {
                return Rewrite::Keep;
            };
            let Some(rest) = name.strip_prefix(from) else {
                return Rewrite::Keep;
            };
            if !rest.starts_with('.') {
                return Rewrite::Keep;
            }
            Rewrite::Replace(Node::leaf(NodeKind::EntityName, format!("{}{}", to, rest)))
        }
        NodeKind::Path => {
            let Some(path) = current.value().and_then(QueryPath::parse) else {
                return Rewrite::Keep;
            };
            if path.root() != from {
                return Rewrite::Keep;
            }
            let renamed = path.with_root(to);
            Rewrite::Replace(Node::leaf(NodeKind::Path, renamed.to_path_text()))
        }
        _ => Rewrite::Keep,
    })
}

/// The lowest numeric suffix that avoids both reservation sets.
fn fresh_alias(base: &str, reserved: &BTreeSet<String>, declared: &BTreeSet<String>) -> String {
    let mut suffix = 0usize;
    loop {
        let candidate = format!("{}{}", base, suffix);
        if !reserved.contains(&candidate) && !declared.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
