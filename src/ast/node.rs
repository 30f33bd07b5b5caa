use std::sync::Arc;

/// The kind of a tree node.
///
/// One variant per grammar rule. The set is closed: every walk in the
/// crate matches on this enum, so the compiler flags any walk that a new
/// variant has not been added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // Statement and clauses
    /// A complete SELECT statement. Children: select clause, from clause,
    /// then any of where/group-by/having/order-by in that order.
    Select,
    /// `SELECT [DISTINCT] item, ...` - value is `"distinct"` when present.
    SelectClause,
    /// `FROM decl [joins], decl [joins], ...` - declarations and their
    /// joins are flattened into one ordered child list.
    FromClause,
    /// `WHERE predicate` - single child.
    WhereClause,
    /// `GROUP BY path, ...`
    GroupByClause,
    /// `HAVING predicate`
    HavingClause,
    /// `ORDER BY item, ...`
    OrderByClause,
    /// One ordering term. Value is `"asc"` or `"desc"`; child is the path.
    OrderByItem,
    /// `EntityName [AS] alias` - children: entity-name terminal, alias
    /// terminal (the alias may be absent, which the compiler rejects for
    /// root declarations).
    RangeDeclaration,
    /// `[INNER] JOIN path [AS] alias`
    InnerJoin,
    /// `LEFT [OUTER] JOIN path [AS] alias`
    OuterJoin,
    /// `[INNER] JOIN FETCH path`
    InnerFetchJoin,
    /// `LEFT [OUTER] JOIN FETCH path`
    OuterFetchJoin,

    // Boolean connectives
    And,
    Or,
    Not,
    /// A parenthesized predicate or expression.
    Grouping,

    // Comparison predicates
    Equals,
    NotEquals,
    GreaterThan,
    GreaterEquals,
    LessThan,
    LessEquals,
    /// `x BETWEEN low AND high` - three children.
    Between,
    /// `x LIKE pattern [ESCAPE ch]` - two or three children.
    Like,
    /// `x IN (items...)` or `x IN (subselect)` or `x IN (:param)` -
    /// first child is the tested expression, the rest are the candidates.
    In,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
    /// `x MEMBER [OF] collection` - two children.
    MemberOf,
    NotMemberOf,
    /// `EXISTS (subselect)` - single child.
    Exists,

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Unary minus.
    Negate,

    // String functions
    /// `CONCAT(a, b, ...)`
    Concat,
    /// `SUBSTRING(str, start [, length])` - start is 1-based.
    Substring,
    /// `TRIM([LEADING|TRAILING|BOTH] [ch FROM] str)` - value is the mode
    /// (`"leading"`, `"trailing"`, `"both"`) or absent for the default;
    /// children are `[ch, str]` or `[str]`.
    Trim,
    Upper,
    Lower,
    Length,
    /// `LOCATE(search, within [, start])` - 1-based result, 0 when absent.
    Locate,

    // Aggregate functions
    /// Value is `"distinct"` for `COUNT(DISTINCT x)`.
    Count,
    Sum,
    Avg,
    Min,
    Max,

    // Case expressions
    /// Searched case: children are `When` nodes followed by the ELSE
    /// expression.
    CaseWhen,
    /// One `WHEN predicate THEN expr` branch - two children.
    When,
    /// Simple case: children are the tested operand, `SimpleWhen` nodes,
    /// then the ELSE expression.
    SimpleCase,
    /// One `WHEN value THEN expr` branch of a simple case - two children.
    SimpleWhen,
    Coalesce,
    /// `NULLIF(a, b)` - two children.
    Nullif,

    // Map projection
    /// `ENTRY(path)` - single path child. `KEY(...)`/`VALUE(...)` are
    /// encoded in the path terminal's text itself.
    MapEntry,

    /// `NEW fq.Class(args...)` - value is the class name.
    Constructor,

    /// A nested `(SELECT ...)`. Children like [`NodeKind::Select`].
    Subselect,

    // Terminals
    /// Dotted navigation path, e.g. `e.owner.name` or `KEY(e.map).id`.
    Path,
    /// An identification variable declaration.
    Alias,
    /// An entity or class name in a FROM clause.
    EntityName,
    /// Integer literal; value keeps the source spelling.
    IntegerLiteral,
    /// Exact decimal literal; value keeps the source spelling.
    DecimalLiteral,
    /// String literal; value is the unquoted content.
    StringLiteral,
    /// `TRUE` or `FALSE`; value is `"true"`/`"false"`.
    BooleanLiteral,
    NullLiteral,
    /// `:name` - value is the name.
    NamedParameter,
    /// `?n` - value is the position digits.
    PositionalParameter,

    // Evaluation hints
    /// A `/* ... */` hint attached to a predicate. Value is the hint name.
    Hint,
    /// A predicate with a preceding hint - children `[Hint, predicate]`.
    Hinted,
}

/// An immutable tree node.
///
/// A node owns its kind, an optional terminal value, and an ordered list
/// of children behind [`Arc`]. Once constructed a node is never mutated;
/// every change goes through the copy-on-write primitives in
/// [`crate::rewrite`], which produce a new root and reuse all untouched
/// subtrees.
///
/// Two notions of equality apply:
/// - `PartialEq` is structural (kind, value, children, recursively),
/// - identity between tree versions is [`Arc::ptr_eq`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    kind: NodeKind,
    value: Option<String>,
    children: Vec<Arc<Node>>,
}

impl Node {
    /// Create a branch node.
    pub fn branch(kind: NodeKind, children: Vec<Arc<Node>>) -> Arc<Node> {
        Arc::new(Node {
            kind,
            value: None,
            children,
        })
    }

    /// Create a branch node that also carries a value (e.g. `Trim` mode,
    /// `Constructor` class name, `SelectClause` distinct marker).
    pub fn branch_with_value(
        kind: NodeKind,
        value: impl Into<String>,
        children: Vec<Arc<Node>>,
    ) -> Arc<Node> {
        Arc::new(Node {
            kind,
            value: Some(value.into()),
            children,
        })
    }

    /// Create a terminal node.
    pub fn leaf(kind: NodeKind, value: impl Into<String>) -> Arc<Node> {
        Arc::new(Node {
            kind,
            value: Some(value.into()),
            children: Vec::new(),
        })
    }

    /// Create a terminal node without a value (e.g. `NullLiteral`).
    pub fn bare_leaf(kind: NodeKind) -> Arc<Node> {
        Arc::new(Node {
            kind,
            value: None,
            children: Vec::new(),
        })
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &[Arc<Node>] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Arc<Node>> {
        self.children.get(index)
    }

    /// Number of nodes in this subtree, the terminal included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(|c| c.size()).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Builders
//
// Shorthand constructors for the fragments the rule injector, the optimizer
// and tests assemble by hand.
// ---------------------------------------------------------------------------

pub fn and(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::And, vec![left, right])
}

pub fn or(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::Or, vec![left, right])
}

pub fn not(operand: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::Not, vec![operand])
}

pub fn group(inner: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::Grouping, vec![inner])
}

pub fn equals(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::Equals, vec![left, right])
}

pub fn not_equals(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::NotEquals, vec![left, right])
}

pub fn path(text: impl Into<String>) -> Arc<Node> {
    Node::leaf(NodeKind::Path, text)
}

pub fn named_parameter(name: impl Into<String>) -> Arc<Node> {
    Node::leaf(NodeKind::NamedParameter, name)
}

pub fn integer_literal(value: i64) -> Arc<Node> {
    Node::leaf(NodeKind::IntegerLiteral, value.to_string())
}

pub fn string_literal(value: impl Into<String>) -> Arc<Node> {
    Node::leaf(NodeKind::StringLiteral, value)
}

pub fn where_clause(predicate: Arc<Node>) -> Arc<Node> {
    Node::branch(NodeKind::WhereClause, vec![predicate])
}

/// The canonical always-true predicate, `1 = 1`.
pub fn always_true() -> Arc<Node> {
    equals(integer_literal(1), integer_literal(1))
}

/// The canonical always-false predicate, `1 <> 1`.
pub fn always_false() -> Arc<Node> {
    not_equals(integer_literal(1), integer_literal(1))
}

/// Whether a node is the canonical `1 = 1` / `1 <> 1` constant produced by
/// the optimizer and the injector.
pub fn is_always_true(node: &Node) -> bool {
    constant_operands(node, NodeKind::Equals)
}

pub fn is_always_false(node: &Node) -> bool {
    constant_operands(node, NodeKind::NotEquals)
}

fn constant_operands(node: &Node, kind: NodeKind) -> bool {
    node.kind() == kind
        && node.children().len() == 2
        && node.children().iter().all(|c| {
            c.kind() == NodeKind::IntegerLiteral && c.value() == Some("1")
        })
}
