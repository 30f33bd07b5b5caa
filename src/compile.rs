//! Compilation of parsed statements: selected-path extraction, alias
//! typing against the metamodel, and parameter discovery.
//!
//! Compilation is where fatal errors live. The evaluator answers
//! "cannot decide" with `Undefined`; the compiler answers "this
//! statement is malformed" with [`CompileError`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::{
    ast::{Node, NodeKind, QueryPath, SelectedPath, node},
    metamodel::{AttributeKind, Metamodel},
    parser::{self, ParseError},
};

/// A statement that could not be compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A selected path roots at an alias no FROM clause declares.
    MissingAlias(String),
    /// A FROM clause names an entity the metamodel does not know.
    UnknownEntity(String),
    /// A join path whose root alias never resolves to a type.
    UnresolvedJoin(String),
    /// A path that does not navigate the declared types.
    InvalidPath(String),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::MissingAlias(alias) => {
                write!(f, "alias '{}' is not declared in any FROM clause", alias)
            }
            CompileError::UnknownEntity(name) => {
                write!(f, "unknown entity '{}'", name)
            }
            CompileError::UnresolvedJoin(path) => {
                write!(f, "join path '{}' cannot be resolved", path)
            }
            CompileError::InvalidPath(path) => {
                write!(f, "path '{}' does not navigate the declared types", path)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Any failure on the way from statement text to a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    Parse(ParseError),
    Compile(CompileError),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Parse(err) => write!(f, "{}", err),
            QueryError::Compile(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ParseError> for QueryError {
    fn from(err: ParseError) -> QueryError {
        QueryError::Parse(err)
    }
}

impl From<CompileError> for QueryError {
    fn from(err: CompileError) -> QueryError {
        QueryError::Compile(err)
    }
}

/// One alias (or anonymous declaration) and the entity type it ranges
/// over, with the join shape that produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeBinding {
    alias: Option<String>,
    declared_type: String,
    key_type: Option<String>,
    join_path: Option<QueryPath>,
    inner_join: bool,
    fetch_join: bool,
}

impl TypeBinding {
    pub fn declaration(alias: Option<String>, declared_type: impl Into<String>) -> TypeBinding {
        TypeBinding {
            alias,
            declared_type: declared_type.into(),
            key_type: None,
            join_path: None,
            inner_join: true,
            fetch_join: false,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// The key type when this binding ranges over a map join.
    pub fn key_type(&self) -> Option<&str> {
        self.key_type.as_deref()
    }

    pub fn join_path(&self) -> Option<&QueryPath> {
        self.join_path.as_ref()
    }

    pub fn is_inner_join(&self) -> bool {
        self.inner_join
    }

    pub fn is_fetch_join(&self) -> bool {
        self.fetch_join
    }
}

/// A statement together with everything compilation derived from it.
///
/// The tree is immutable; [`CompiledStatement::set_root`] swaps in a
/// rewritten tree while keeping the derived information, which is what
/// the optimizer and the rule injector rely on after predicate-only
/// rewrites.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    root: Arc<Node>,
    selected_paths: Vec<SelectedPath>,
    type_bindings: BTreeSet<TypeBinding>,
    named_parameters: BTreeSet<String>,
    positional_parameters: BTreeSet<usize>,
    constructor_return_type: Option<String>,
}

impl CompiledStatement {
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn set_root(&mut self, root: Arc<Node>) {
        self.root = root;
    }

    pub fn selected_paths(&self) -> &[SelectedPath] {
        &self.selected_paths
    }

    pub fn type_bindings(&self) -> &BTreeSet<TypeBinding> {
        &self.type_bindings
    }

    pub fn binding_for_alias(&self, alias: &str) -> Option<&TypeBinding> {
        self.type_bindings
            .iter()
            .find(|binding| binding.alias() == Some(alias))
    }

    pub fn named_parameters(&self) -> &BTreeSet<String> {
        &self.named_parameters
    }

    pub fn positional_parameters(&self) -> &BTreeSet<usize> {
        &self.positional_parameters
    }

    pub fn constructor_return_type(&self) -> Option<&str> {
        self.constructor_return_type.as_deref()
    }

    /// The top-level clause of the given kind, when present.
    pub fn clause(&self, kind: NodeKind) -> Option<&Arc<Node>> {
        self.root.children().iter().find(|child| child.kind() == kind)
    }
}

/// Compiles parsed trees against a metamodel.
pub struct StatementCompiler<'m> {
    metamodel: &'m Metamodel,
}

impl<'m> StatementCompiler<'m> {
    pub fn new(metamodel: &'m Metamodel) -> Self {
        StatementCompiler { metamodel }
    }

    /// Parse and compile in one step.
    pub fn compile_text(&self, text: &str) -> Result<CompiledStatement, QueryError> {
        let root = parser::parse_statement(text)?;
        Ok(self.compile(root)?)
    }

    pub fn compile(&self, root: Arc<Node>) -> Result<CompiledStatement, CompileError> {
        let type_bindings = self.resolve_bindings(&root)?;

        let mut selected_paths = Vec::new();
        let mut constructor_return_type = None;
        if let Some(select_clause) = find_clause(&root, NodeKind::SelectClause) {
            for item in select_clause.children() {
                collect_selected(item, None, &mut selected_paths, &mut constructor_return_type)?;
            }
        }
        for selected in &selected_paths {
            let alias = selected.path().root();
            let declared = type_bindings
                .iter()
                .any(|binding| binding.alias() == Some(alias));
            if !declared {
                return Err(CompileError::MissingAlias(alias.to_string()));
            }
        }

        let mut named_parameters = BTreeSet::new();
        let mut positional_parameters = BTreeSet::new();
        collect_parameters(&root, &mut named_parameters, &mut positional_parameters);

        Ok(CompiledStatement {
            root,
            selected_paths,
            type_bindings,
            named_parameters,
            positional_parameters,
            constructor_return_type,
        })
    }

    /// Collect the declarations and joins of every FROM clause in the
    /// statement, subselects included, and resolve each to an entity
    /// type. Joins may reference aliases declared after them, so
    /// unresolved joins are retried until a pass makes no progress.
    fn resolve_bindings(&self, root: &Arc<Node>) -> Result<BTreeSet<TypeBinding>, CompileError> {
        let mut declarations = Vec::new();
        collect_from_items(root, &mut declarations);

        let mut bindings = BTreeSet::new();
        let mut pending = Vec::new();
        for item in declarations {
            match item.kind() {
                NodeKind::RangeDeclaration => {
                    let name = item
                        .child(0)
                        .and_then(|entity| entity.value())
                        .unwrap_or_default()
                        .to_string();
                    let alias = item.child(1).and_then(|a| a.value()).map(str::to_string);
                    if alias.is_none() {
                        return Err(CompileError::MissingAlias(name));
                    }
                    if name.contains('.') {
                        // A collection-rooted declaration, as subselects
                        // use them. Typed like a join.
                        let path = QueryPath::parse(&name)
                            .ok_or_else(|| CompileError::InvalidPath(name.clone()))?;
                        pending.push((path, alias, true, false));
                    } else {
                        let entity = self
                            .metamodel
                            .resolve(&name)
                            .ok_or_else(|| CompileError::UnknownEntity(name.clone()))?;
                        if entity.is_abstract() {
                            // An abstract root ranges over every concrete
                            // subtype; each gets a binding under the same
                            // alias.
                            let concrete =
                                self.metamodel.entities_assignable_to(entity.name());
                            if concrete.is_empty() {
                                bindings
                                    .insert(TypeBinding::declaration(alias, entity.name()));
                            } else {
                                for subtype in concrete {
                                    bindings.insert(TypeBinding::declaration(
                                        alias.clone(),
                                        subtype.name(),
                                    ));
                                }
                            }
                        } else {
                            bindings.insert(TypeBinding::declaration(alias, entity.name()));
                        }
                    }
                }
                NodeKind::InnerJoin
                | NodeKind::OuterJoin
                | NodeKind::InnerFetchJoin
                | NodeKind::OuterFetchJoin => {
                    let text = item
                        .child(0)
                        .and_then(|path| path.value())
                        .unwrap_or_default()
                        .to_string();
                    let path = QueryPath::parse(&text)
                        .ok_or_else(|| CompileError::InvalidPath(text.clone()))?;
                    let alias = item.child(1).and_then(|a| a.value()).map(str::to_string);
                    let inner = matches!(
                        item.kind(),
                        NodeKind::InnerJoin | NodeKind::InnerFetchJoin
                    );
                    let fetch = matches!(
                        item.kind(),
                        NodeKind::InnerFetchJoin | NodeKind::OuterFetchJoin
                    );
                    pending.push((path, alias, inner, fetch));
                }
                _ => {}
            }
        }

        // Fixpoint: each pass types every join whose root alias is
        // already bound.
        while !pending.is_empty() {
            let mut remaining = Vec::new();
            let mut progressed = false;
            for (path, alias, inner, fetch) in pending {
                let root_type = bindings
                    .iter()
                    .find(|binding: &&TypeBinding| binding.alias() == Some(path.root()))
                    .map(|binding| binding.declared_type().to_string());
                match root_type {
                    Some(root_type) => {
                        let (declared_type, key_type) =
                            self.navigate_join(&root_type, &path)?;
                        bindings.insert(TypeBinding {
                            alias,
                            declared_type,
                            key_type,
                            join_path: Some(path),
                            inner_join: inner,
                            fetch_join: fetch,
                        });
                        progressed = true;
                    }
                    None => remaining.push((path, alias, inner, fetch)),
                }
            }
            if !progressed {
                let (path, ..) = &remaining[0];
                return Err(CompileError::UnresolvedJoin(path.to_path_text()));
            }
            pending = remaining;
        }
        Ok(bindings)
    }

    /// Walk a join path segment by segment through the metamodel,
    /// returning the element type the final segment ranges over and the
    /// key type when that segment is a map.
    fn navigate_join(
        &self,
        root_type: &str,
        path: &QueryPath,
    ) -> Result<(String, Option<String>), CompileError> {
        let mut current = root_type.to_string();
        let mut key_type = None;
        for segment in path.segments() {
            let entity = self
                .metamodel
                .resolve(&current)
                .ok_or_else(|| CompileError::UnknownEntity(current.clone()))?;
            let attribute = entity
                .attribute(segment)
                .ok_or_else(|| CompileError::InvalidPath(path.to_path_text()))?;
            let target = match attribute.kind() {
                AttributeKind::Basic => {
                    return Err(CompileError::InvalidPath(path.to_path_text()));
                }
                _ => attribute
                    .target_type()
                    .ok_or_else(|| CompileError::InvalidPath(path.to_path_text()))?,
            };
            key_type = attribute.key_type().map(str::to_string);
            current = target.to_string();
        }
        Ok((current, key_type))
    }
}

/// A compiling cache keyed by statement text.
///
/// Hits return a clone, so a caller mutating its copy (the optimizer,
/// the injector) never leaks rewrites back into the cache.
pub struct StatementCache<'m> {
    compiler: StatementCompiler<'m>,
    cache: Mutex<HashMap<String, CompiledStatement>>,
}

impl<'m> StatementCache<'m> {
    pub fn new(metamodel: &'m Metamodel) -> Self {
        StatementCache {
            compiler: StatementCompiler::new(metamodel),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn compile(&self, text: &str) -> Result<CompiledStatement, QueryError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(hit.clone());
            }
        }
        let compiled = self.compiler.compile_text(text)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(text.to_string(), compiled.clone());
        }
        Ok(compiled)
    }
}

fn find_clause<'n>(root: &'n Arc<Node>, kind: NodeKind) -> Option<&'n Arc<Node>> {
    root.children().iter().find(|child| child.kind() == kind)
}

fn collect_from_items(node: &Arc<Node>, out: &mut Vec<Arc<Node>>) {
    if node.kind() == NodeKind::FromClause {
        out.extend(node.children().iter().cloned());
    }
    for child in node.children() {
        collect_from_items(child, out);
    }
}

fn collect_parameters(
    node: &Arc<Node>,
    named: &mut BTreeSet<String>,
    positional: &mut BTreeSet<usize>,
) {
    match node.kind() {
        NodeKind::NamedParameter => {
            if let Some(name) = node.value() {
                named.insert(name.to_string());
            }
        }
        NodeKind::PositionalParameter => {
            if let Some(position) = node.value().and_then(|v| v.parse().ok()) {
                positional.insert(position);
            }
        }
        _ => {}
    }
    for child in node.children() {
        collect_parameters(child, named, positional);
    }
}

/// Extract the paths a select item can produce, each with the guard
/// under which the item actually produces it. A path inside a CASE
/// branch is only selected when that branch is taken, so its guard is
/// the branch condition conjoined with the negations of every earlier
/// branch condition.
fn collect_selected(
    item: &Arc<Node>,
    guard: Option<Arc<Node>>,
    out: &mut Vec<SelectedPath>,
    constructor_return_type: &mut Option<String>,
) -> Result<(), CompileError> {
    match item.kind() {
        NodeKind::Path => {
            let text = item.value().unwrap_or_default();
            let path = QueryPath::parse(text)
                .ok_or_else(|| CompileError::InvalidPath(text.to_string()))?;
            out.push(match guard {
                Some(guard) => SelectedPath::conditional(path, guard),
                None => SelectedPath::plain(path),
            });
        }
        NodeKind::MapEntry => {
            // ENTRY(m) exposes the key, the value, and the entry itself.
            let text = item
                .child(0)
                .and_then(|path| path.value())
                .unwrap_or_default();
            for wrapped in [format!("KEY({})", text), format!("VALUE({})", text)] {
                let path = QueryPath::parse(&wrapped)
                    .ok_or_else(|| CompileError::InvalidPath(wrapped.clone()))?;
                out.push(selected(path, guard.clone()));
            }
            let path = QueryPath::parse(text)
                .ok_or_else(|| CompileError::InvalidPath(text.to_string()))?;
            out.push(selected(path, guard));
        }
        NodeKind::Constructor => {
            if let Some(class_name) = item.value() {
                *constructor_return_type = Some(class_name.to_string());
            }
            for argument in item.children() {
                collect_selected(argument, guard.clone(), out, constructor_return_type)?;
            }
        }
        NodeKind::CaseWhen => {
            let Some((else_expr, branches)) = item.children().split_last() else {
                return Ok(());
            };
            let mut priors: Vec<Arc<Node>> = Vec::new();
            for branch in branches {
                let (Some(condition), Some(result)) = (branch.child(0), branch.child(1))
                else {
                    continue;
                };
                let branch_guard = conjoin_negated(condition.clone(), &priors);
                collect_selected(
                    result,
                    Some(conjoin(guard.clone(), branch_guard)),
                    out,
                    constructor_return_type,
                )?;
                priors.push(condition.clone());
            }
            match negations(&priors) {
                Some(else_guard) => collect_selected(
                    else_expr,
                    Some(conjoin(guard, else_guard)),
                    out,
                    constructor_return_type,
                )?,
                None => collect_selected(else_expr, guard, out, constructor_return_type)?,
            }
        }
        NodeKind::SimpleCase => {
            let children = item.children();
            let (Some(operand), Some((else_expr, rest))) =
                (children.first(), children.split_last())
            else {
                return Ok(());
            };
            let mut priors: Vec<Arc<Node>> = Vec::new();
            for branch in rest.iter().skip(1) {
                let (Some(matched), Some(result)) = (branch.child(0), branch.child(1)) else {
                    continue;
                };
                let condition = node::equals(operand.clone(), matched.clone());
                let branch_guard = conjoin_negated(condition.clone(), &priors);
                collect_selected(
                    result,
                    Some(conjoin(guard.clone(), branch_guard)),
                    out,
                    constructor_return_type,
                )?;
                priors.push(condition);
            }
            match negations(&priors) {
                Some(else_guard) => collect_selected(
                    else_expr,
                    Some(conjoin(guard, else_guard)),
                    out,
                    constructor_return_type,
                )?,
                None => collect_selected(else_expr, guard, out, constructor_return_type)?,
            }
        }
        NodeKind::Coalesce => {
            // Operand i is selected only when every earlier operand was
            // null.
            let mut earlier_null: Option<Arc<Node>> = None;
            for operand in item.children() {
                let operand_guard = match &earlier_null {
                    Some(earlier) => Some(conjoin(guard.clone(), earlier.clone())),
                    None => guard.clone(),
                };
                collect_selected(operand, operand_guard, out, constructor_return_type)?;
                let is_null = Node::branch(NodeKind::IsNull, vec![operand.clone()]);
                earlier_null = Some(match earlier_null {
                    Some(earlier) => node::and(earlier, is_null),
                    None => is_null,
                });
            }
        }
        NodeKind::Nullif => {
            // NULLIF(a, b) yields a only while a <> b.
            let (Some(a), Some(b)) = (item.child(0), item.child(1)) else {
                return Ok(());
            };
            let condition = node::not_equals(a.clone(), b.clone());
            collect_selected(
                a,
                Some(conjoin(guard, condition)),
                out,
                constructor_return_type,
            )?;
        }
        NodeKind::Subselect => {}
        _ => {
            for child in item.children() {
                collect_selected(child, guard.clone(), out, constructor_return_type)?;
            }
        }
    }
    Ok(())
}

fn selected(path: QueryPath, guard: Option<Arc<Node>>) -> SelectedPath {
    match guard {
        Some(guard) => SelectedPath::conditional(path, guard),
        None => SelectedPath::plain(path),
    }
}

fn conjoin(guard: Option<Arc<Node>>, condition: Arc<Node>) -> Arc<Node> {
    match guard {
        Some(guard) => node::and(guard, condition),
        None => condition,
    }
}

/// `condition AND NOT (p1) AND NOT (p2) ...` for first-match-wins CASE
/// semantics.
fn conjoin_negated(condition: Arc<Node>, priors: &[Arc<Node>]) -> Arc<Node> {
    let mut result = condition;
    for prior in priors {
        result = node::and(result, node::not(node::group(prior.clone())));
    }
    result
}

fn negations(priors: &[Arc<Node>]) -> Option<Arc<Node>> {
    let mut result: Option<Arc<Node>> = None;
    for prior in priors {
        let negated = node::not(node::group(prior.clone()));
        result = Some(match result {
            Some(existing) => node::and(existing, negated),
            None => negated,
        });
    }
    result
}
