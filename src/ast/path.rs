use std::fmt;
use std::sync::Arc;

use crate::ast::Node;

/// A dotted navigation path rooted at an identification variable.
///
/// Parsed from the text of a [`crate::ast::NodeKind::Path`] terminal.
/// `KEY(...)` and `VALUE(...)` wrappers around the root mark map key and
/// map value projection; a path may also be flagged as an enum literal
/// when its "root" is really the head of a qualified constant name.
///
/// # Examples
///
/// - `e` → root `e`, no segments
/// - `e.owner.name` → root `e`, segments `["owner", "name"]`
/// - `KEY(e.phones).countryCode` → root `e`, segments
///   `["phones", "countryCode"]`, `is_key_path`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueryPath {
    root: String,
    segments: Vec<String>,
    is_key_path: bool,
    is_value_path: bool,
    enum_literal: bool,
}

impl QueryPath {
    /// Parse a path from its rendered text. Returns `None` for text that
    /// is not a well-formed path (empty segments, unbalanced wrappers).
    pub fn parse(text: &str) -> Option<QueryPath> {
        let (inner, is_key_path, is_value_path, trailer) = strip_wrapper(text)?;

        let mut parts = inner
            .split('.')
            .map(str::to_string)
            .collect::<Vec<String>>();
        if let Some(trailer) = trailer {
            parts.extend(trailer.split('.').map(str::to_string));
        }
        if parts.iter().any(String::is_empty) {
            return None;
        }

        let root = parts.remove(0);
        Some(QueryPath {
            root,
            segments: parts,
            is_key_path,
            is_value_path,
            enum_literal: false,
        })
    }

    /// Construct a path from its parts directly.
    pub fn new(root: impl Into<String>, segments: Vec<String>) -> QueryPath {
        QueryPath {
            root: root.into(),
            segments,
            is_key_path: false,
            is_value_path: false,
            enum_literal: false,
        }
    }

    /// Mark this path as a qualified enum constant rather than a
    /// navigation; the evaluator resolves it to its terminal segment.
    pub fn as_enum_literal(mut self) -> QueryPath {
        self.enum_literal = true;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_key_path(&self) -> bool {
        self.is_key_path
    }

    pub fn is_value_path(&self) -> bool {
        self.is_value_path
    }

    pub fn is_enum_literal(&self) -> bool {
        self.enum_literal
    }

    /// Whether the path is a bare identification variable.
    pub fn is_alias_only(&self) -> bool {
        self.segments.is_empty() && !self.is_key_path && !self.is_value_path
    }

    /// The same path rebound to another root alias.
    pub fn with_root(&self, root: impl Into<String>) -> QueryPath {
        QueryPath {
            root: root.into(),
            ..self.clone()
        }
    }

    /// Re-render the path as terminal text (inverse of [`QueryPath::parse`]).
    pub fn to_path_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_key_path || self.is_value_path {
            // The wrapper closes after the map-valued prefix; a key path
            // with further segments renders as KEY(root.seg1).seg2...
            let wrapper = if self.is_key_path { "KEY" } else { "VALUE" };
            match self.segments.split_first() {
                None => write!(f, "{}({})", wrapper, self.root),
                Some((first, rest)) => {
                    write!(f, "{}({}.{})", wrapper, self.root, first)?;
                    for segment in rest {
                        write!(f, ".{}", segment)?;
                    }
                    Ok(())
                }
            }
        } else {
            write!(f, "{}", self.root)?;
            for segment in &self.segments {
                write!(f, ".{}", segment)?;
            }
            Ok(())
        }
    }
}

fn strip_wrapper(text: &str) -> Option<(&str, bool, bool, Option<&str>)> {
    for (prefix, is_key) in [("KEY(", true), ("VALUE(", false)] {
        if let Some(rest) = text.strip_prefix(prefix) {
            let close = rest.find(')')?;
            let inner = &rest[..close];
            let trailer = match &rest[close + 1..] {
                "" => None,
                t => Some(t.strip_prefix('.')?),
            };
            if inner.is_empty() {
                return None;
            }
            return Some((inner, is_key, !is_key, trailer));
        }
    }
    if text.is_empty() || text.contains('(') || text.contains(')') {
        return None;
    }
    Some((text, false, false, None))
}

/// A selected output expression of a compiled statement.
///
/// Plain select items carry just the path. Items produced by expanding a
/// `CASE`/`COALESCE`/`NULLIF` expression additionally carry the guard
/// predicate under which that branch is the one actually selected; the
/// guard is consulted by the rule injector (to scope an access rule to the
/// branch) and never during execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPath {
    path: QueryPath,
    condition: Option<Arc<Node>>,
}

impl SelectedPath {
    pub fn plain(path: QueryPath) -> SelectedPath {
        SelectedPath {
            path,
            condition: None,
        }
    }

    pub fn conditional(path: QueryPath, condition: Arc<Node>) -> SelectedPath {
        SelectedPath {
            path,
            condition: Some(condition),
        }
    }

    pub fn path(&self) -> &QueryPath {
        &self.path
    }

    /// The guard predicate, when this is a conditional path.
    pub fn condition(&self) -> Option<&Arc<Node>> {
        self.condition.as_ref()
    }
}
