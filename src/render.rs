//! Rendering a tree back to query text.
//!
//! Depth-first token joining with grammar-aware spacing. The guarantee is
//! structural, not textual: re-parsing rendered output yields a tree equal
//! to the one rendered, but the text may normalize keyword case and
//! spacing relative to the original source.

use crate::ast::{Node, NodeKind};

/// Render a tree to query text.
pub fn render(node: &Node) -> String {
    let mut out = String::new();
    write_node(&mut out, node);
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node.kind() {
        NodeKind::Select => write_separated(out, node, " "),
        NodeKind::Subselect => {
            out.push('(');
            write_separated(out, node, " ");
            out.push(')');
        }
        NodeKind::SelectClause => {
            out.push_str("SELECT ");
            if node.value() == Some("distinct") {
                out.push_str("DISTINCT ");
            }
            write_separated(out, node, ", ");
        }
        NodeKind::FromClause => {
            out.push_str("FROM ");
            for (index, child) in node.children().iter().enumerate() {
                if index > 0 {
                    // Declarations are comma-separated; the joins hanging
                    // off a declaration follow it with plain spaces.
                    if child.kind() == NodeKind::RangeDeclaration {
                        out.push_str(", ");
                    } else {
                        out.push(' ');
                    }
                }
                write_node(out, child);
            }
        }
        NodeKind::WhereClause => {
            out.push_str("WHERE ");
            write_separated(out, node, " ");
        }
        NodeKind::GroupByClause => {
            out.push_str("GROUP BY ");
            write_separated(out, node, ", ");
        }
        NodeKind::HavingClause => {
            out.push_str("HAVING ");
            write_separated(out, node, " ");
        }
        NodeKind::OrderByClause => {
            out.push_str("ORDER BY ");
            write_separated(out, node, ", ");
        }
        NodeKind::OrderByItem => {
            write_separated(out, node, " ");
            if node.value() == Some("desc") {
                out.push_str(" DESC");
            } else {
                out.push_str(" ASC");
            }
        }
        NodeKind::RangeDeclaration => write_separated(out, node, " "),
        NodeKind::InnerJoin => {
            out.push_str("JOIN ");
            write_separated(out, node, " ");
        }
        NodeKind::OuterJoin => {
            out.push_str("LEFT JOIN ");
            write_separated(out, node, " ");
        }
        NodeKind::InnerFetchJoin => {
            out.push_str("JOIN FETCH ");
            write_separated(out, node, " ");
        }
        NodeKind::OuterFetchJoin => {
            out.push_str("LEFT JOIN FETCH ");
            write_separated(out, node, " ");
        }

        NodeKind::And => write_binary(out, node, " AND "),
        NodeKind::Or => write_binary(out, node, " OR "),
        NodeKind::Not => {
            out.push_str("NOT ");
            write_separated(out, node, " ");
        }
        NodeKind::Grouping => {
            out.push('(');
            write_separated(out, node, " ");
            out.push(')');
        }

        NodeKind::Equals => write_binary(out, node, " = "),
        NodeKind::NotEquals => write_binary(out, node, " <> "),
        NodeKind::GreaterThan => write_binary(out, node, " > "),
        NodeKind::GreaterEquals => write_binary(out, node, " >= "),
        NodeKind::LessThan => write_binary(out, node, " < "),
        NodeKind::LessEquals => write_binary(out, node, " <= "),
        NodeKind::Between => {
            if let [operand, low, high] = node.children() {
                write_node(out, operand);
                out.push_str(" BETWEEN ");
                write_node(out, low);
                out.push_str(" AND ");
                write_node(out, high);
            }
        }
        NodeKind::Like => {
            if let Some(operand) = node.child(0) {
                write_node(out, operand);
            }
            out.push_str(" LIKE ");
            if let Some(pattern) = node.child(1) {
                write_node(out, pattern);
            }
            if let Some(escape) = node.child(2) {
                out.push_str(" ESCAPE ");
                write_node(out, escape);
            }
        }
        NodeKind::In => {
            if let Some((operand, candidates)) = node.children().split_first() {
                write_node(out, operand);
                out.push_str(" IN ");
                // A subselect already brings its own parentheses.
                if let [single] = candidates {
                    if single.kind() == NodeKind::Subselect {
                        write_node(out, single);
                        return;
                    }
                }
                out.push('(');
                for (index, candidate) in candidates.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    write_node(out, candidate);
                }
                out.push(')');
            }
        }
        NodeKind::IsNull => write_postfix(out, node, " IS NULL"),
        NodeKind::IsNotNull => write_postfix(out, node, " IS NOT NULL"),
        NodeKind::IsEmpty => write_postfix(out, node, " IS EMPTY"),
        NodeKind::IsNotEmpty => write_postfix(out, node, " IS NOT EMPTY"),
        NodeKind::MemberOf => write_binary(out, node, " MEMBER OF "),
        NodeKind::NotMemberOf => write_binary(out, node, " NOT MEMBER OF "),
        NodeKind::Exists => {
            out.push_str("EXISTS ");
            write_separated(out, node, " ");
        }

        NodeKind::Add => write_binary(out, node, " + "),
        NodeKind::Subtract => write_binary(out, node, " - "),
        NodeKind::Multiply => write_binary(out, node, " * "),
        NodeKind::Divide => write_binary(out, node, " / "),
        NodeKind::Negate => {
            out.push('-');
            write_separated(out, node, " ");
        }

        NodeKind::Concat => write_function(out, node, "CONCAT"),
        NodeKind::Substring => write_function(out, node, "SUBSTRING"),
        NodeKind::Trim => {
            out.push_str("TRIM(");
            match node.value() {
                Some("leading") => out.push_str("LEADING "),
                Some("trailing") => out.push_str("TRAILING "),
                Some("both") => out.push_str("BOTH "),
                _ => {}
            }
            if let [trim_char, source] = node.children() {
                write_node(out, trim_char);
                out.push_str(" FROM ");
                write_node(out, source);
            } else if node.value().is_some() {
                out.push_str("FROM ");
                write_separated(out, node, " ");
            } else {
                write_separated(out, node, " ");
            }
            out.push(')');
        }
        NodeKind::Upper => write_function(out, node, "UPPER"),
        NodeKind::Lower => write_function(out, node, "LOWER"),
        NodeKind::Length => write_function(out, node, "LENGTH"),
        NodeKind::Locate => write_function(out, node, "LOCATE"),

        NodeKind::Count => {
            out.push_str("COUNT(");
            if node.value() == Some("distinct") {
                out.push_str("DISTINCT ");
            }
            write_separated(out, node, ", ");
            out.push(')');
        }
        NodeKind::Sum => write_function(out, node, "SUM"),
        NodeKind::Avg => write_function(out, node, "AVG"),
        NodeKind::Min => write_function(out, node, "MIN"),
        NodeKind::Max => write_function(out, node, "MAX"),

        NodeKind::CaseWhen => {
            out.push_str("CASE");
            let (else_expr, whens) = split_case_children(node);
            for when in whens {
                out.push(' ');
                write_node(out, when);
            }
            out.push_str(" ELSE ");
            if let Some(else_expr) = else_expr {
                write_node(out, else_expr);
            }
            out.push_str(" END");
        }
        NodeKind::When | NodeKind::SimpleWhen => {
            if let [condition, result] = node.children() {
                out.push_str("WHEN ");
                write_node(out, condition);
                out.push_str(" THEN ");
                write_node(out, result);
            }
        }
        NodeKind::SimpleCase => {
            out.push_str("CASE ");
            if let Some(operand) = node.child(0) {
                write_node(out, operand);
            }
            let children = node.children();
            let branches = &children[1..children.len().saturating_sub(1)];
            for when in branches {
                out.push(' ');
                write_node(out, when);
            }
            out.push_str(" ELSE ");
            if let Some(else_expr) = children.last() {
                write_node(out, else_expr);
            }
            out.push_str(" END");
        }
        NodeKind::Coalesce => write_function(out, node, "COALESCE"),
        NodeKind::Nullif => write_function(out, node, "NULLIF"),

        NodeKind::MapEntry => write_function(out, node, "ENTRY"),
        NodeKind::Constructor => {
            out.push_str("NEW ");
            out.push_str(node.value().unwrap_or_default());
            out.push('(');
            write_separated(out, node, ", ");
            out.push(')');
        }

        NodeKind::Path | NodeKind::Alias | NodeKind::EntityName => {
            out.push_str(node.value().unwrap_or_default());
        }
        NodeKind::IntegerLiteral | NodeKind::DecimalLiteral => {
            out.push_str(node.value().unwrap_or_default());
        }
        NodeKind::StringLiteral => {
            out.push('\'');
            out.push_str(&node.value().unwrap_or_default().replace('\'', "''"));
            out.push('\'');
        }
        NodeKind::BooleanLiteral => {
            if node.value() == Some("true") {
                out.push_str("TRUE");
            } else {
                out.push_str("FALSE");
            }
        }
        NodeKind::NullLiteral => out.push_str("NULL"),
        NodeKind::NamedParameter => {
            out.push(':');
            out.push_str(node.value().unwrap_or_default());
        }
        NodeKind::PositionalParameter => {
            out.push('?');
            out.push_str(node.value().unwrap_or_default());
        }

        NodeKind::Hint => {
            out.push_str("/* ");
            out.push_str(node.value().unwrap_or_default());
            out.push_str(" */");
        }
        NodeKind::Hinted => write_separated(out, node, " "),
    }
}

fn split_case_children(node: &Node) -> (Option<&Node>, &[std::sync::Arc<Node>]) {
    let children = node.children();
    match children.split_last() {
        Some((last, rest)) => (Some(last.as_ref()), rest),
        None => (None, children),
    }
}

fn write_separated(out: &mut String, node: &Node, separator: &str) {
    for (index, child) in node.children().iter().enumerate() {
        if index > 0 {
            out.push_str(separator);
        }
        write_node(out, child);
    }
}

fn write_binary(out: &mut String, node: &Node, operator: &str) {
    if let [left, right] = node.children() {
        write_node(out, left);
        out.push_str(operator);
        write_node(out, right);
    }
}

fn write_postfix(out: &mut String, node: &Node, suffix: &str) {
    if let Some(operand) = node.child(0) {
        write_node(out, operand);
    }
    out.push_str(suffix);
}

fn write_function(out: &mut String, node: &Node, name: &str) {
    out.push_str(name);
    out.push('(');
    write_separated(out, node, ", ");
    out.push(')');
}
