//! Three-valued partial evaluation of predicates and expressions.
//!
//! The evaluator decides as much of a tree as the bound information
//! allows. A predicate evaluates to `true`, `false`, or [`Undefined`] -
//! "cannot be decided with what is currently bound". `Undefined` is a
//! normal value, not an error: it travels through [`EvalResult`] so `?`
//! propagates it, and callers pick their conservative reaction (deny
//! access, leave a subtree unoptimized). Fatal conditions never use this
//! channel.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

use crate::{
    ast::{Node, NodeKind, QueryPath},
    metamodel::Metamodel,
    value::Value,
};

/// The "cannot be decided" sentinel of the three-valued logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Undefined;

impl std::fmt::Display for Undefined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "undefined")
    }
}

/// A concrete value or [`Undefined`].
pub type EvalResult = Result<Value, Undefined>;

/// What the caller is evaluating for. The mode gates only the
/// comment-hint short-circuits; it does not otherwise change semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Deciding an access-control outcome in memory.
    AccessCheck,
    /// Evaluate everything; hints are ignored.
    AlwaysEvaluatable,
    /// Statically simplifying a statement before execution.
    OptimizeQuery,
}

/// Everything bound for one evaluation: the metamodel, alias values,
/// parameter values, and the mode.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'m> {
    metamodel: &'m Metamodel,
    alias_values: HashMap<String, Value>,
    named_parameters: HashMap<String, Value>,
    positional_parameters: HashMap<usize, Value>,
    mode: EvaluationMode,
}

impl<'m> EvaluationContext<'m> {
    pub fn new(metamodel: &'m Metamodel) -> Self {
        EvaluationContext {
            metamodel,
            alias_values: HashMap::new(),
            named_parameters: HashMap::new(),
            positional_parameters: HashMap::new(),
            mode: EvaluationMode::AccessCheck,
        }
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn bind_alias(mut self, alias: impl Into<String>, value: Value) -> Self {
        self.alias_values.insert(alias.into(), value);
        self
    }

    pub fn bind_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named_parameters.insert(name.into(), value);
        self
    }

    pub fn bind_positional(mut self, position: usize, value: Value) -> Self {
        self.positional_parameters.insert(position, value);
        self
    }

    pub fn metamodel(&self) -> &'m Metamodel {
        self.metamodel
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.alias_values.contains_key(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.alias_values.keys().map(String::as_str)
    }

    pub fn alias_value(&self, alias: &str) -> Option<&Value> {
        self.alias_values.get(alias)
    }
}

/// A strategy for evaluating subselects in memory.
///
/// Strategies are consulted in order; the first to return `Some` wins.
/// `None` means "not capable under this context", after which the next
/// strategy is tried, and the subselect is `Undefined` when all decline.
pub trait SubselectEvaluator {
    fn evaluate(
        &self,
        subselect: &Arc<Node>,
        evaluator: &PartialEvaluator,
        context: &EvaluationContext,
    ) -> Option<EvalResult>;
}

/// The recursive three-valued evaluator.
pub struct PartialEvaluator {
    subselect_evaluators: Vec<Box<dyn SubselectEvaluator>>,
}

impl Default for PartialEvaluator {
    fn default() -> Self {
        PartialEvaluator {
            subselect_evaluators: vec![Box::new(CollectionSubselectEvaluator)],
        }
    }
}

impl PartialEvaluator {
    pub fn new() -> Self {
        PartialEvaluator::default()
    }

    /// An evaluator with no subselect support at all.
    pub fn without_subselect_support() -> Self {
        PartialEvaluator {
            subselect_evaluators: Vec::new(),
        }
    }

    /// Append a strategy; earlier strategies take precedence.
    pub fn with_subselect_evaluator(
        mut self,
        strategy: Box<dyn SubselectEvaluator>,
    ) -> Self {
        self.subselect_evaluators.push(strategy);
        self
    }

    /// Evaluate a predicate to a three-valued boolean.
    pub fn evaluate_boolean(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
    ) -> Result<bool, Undefined> {
        boolean(self.evaluate(node, context))
    }

    pub fn evaluate(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        match node.kind() {
            NodeKind::And => self.evaluate_and(node, context),
            NodeKind::Or => self.evaluate_or(node, context),
            NodeKind::Not => {
                let inner = boolean(self.evaluate(child(node, 0)?, context))?;
                Ok(Value::Boolean(!inner))
            }
            NodeKind::Grouping => self.evaluate(child(node, 0)?, context),
            NodeKind::Hinted => self.evaluate_hinted(node, context),

            NodeKind::Equals => self.evaluate_equality(node, context, false),
            NodeKind::NotEquals => self.evaluate_equality(node, context, true),
            NodeKind::GreaterThan => self.evaluate_comparison(node, context, |o| o.is_gt()),
            NodeKind::GreaterEquals => self.evaluate_comparison(node, context, |o| o.is_ge()),
            NodeKind::LessThan => self.evaluate_comparison(node, context, |o| o.is_lt()),
            NodeKind::LessEquals => self.evaluate_comparison(node, context, |o| o.is_le()),
            NodeKind::Between => {
                let operand = self.evaluate(child(node, 0)?, context)?;
                let low = self.evaluate(child(node, 1)?, context)?;
                let high = self.evaluate(child(node, 2)?, context)?;
                let lower = operand.compare(&low).ok_or(Undefined)?;
                let upper = operand.compare(&high).ok_or(Undefined)?;
                Ok(Value::Boolean(lower.is_ge() && upper.is_le()))
            }
            NodeKind::Like => self.evaluate_like(node, context),
            NodeKind::In => self.evaluate_in(node, context),
            NodeKind::IsNull => {
                let operand = self.evaluate(child(node, 0)?, context)?;
                Ok(Value::Boolean(operand.is_null()))
            }
            NodeKind::IsNotNull => {
                let operand = self.evaluate(child(node, 0)?, context)?;
                Ok(Value::Boolean(!operand.is_null()))
            }
            NodeKind::IsEmpty => {
                let operand = self.evaluate(child(node, 0)?, context)?;
                let empty = operand.is_empty_collection().ok_or(Undefined)?;
                Ok(Value::Boolean(empty))
            }
            NodeKind::IsNotEmpty => {
                let operand = self.evaluate(child(node, 0)?, context)?;
                let empty = operand.is_empty_collection().ok_or(Undefined)?;
                Ok(Value::Boolean(!empty))
            }
            NodeKind::MemberOf => self.evaluate_member_of(node, context, false),
            NodeKind::NotMemberOf => self.evaluate_member_of(node, context, true),
            NodeKind::Exists => {
                let result = self.evaluate_subselect(child(node, 0)?, context)?;
                let empty = result.is_empty_collection().ok_or(Undefined)?;
                Ok(Value::Boolean(!empty))
            }
            NodeKind::Subselect => self.evaluate_subselect(node, context),

            NodeKind::Add => self.evaluate_arithmetic(node, context, |a, b| a.checked_add(b)),
            NodeKind::Subtract => {
                self.evaluate_arithmetic(node, context, |a, b| a.checked_sub(b))
            }
            NodeKind::Multiply => {
                self.evaluate_arithmetic(node, context, |a, b| a.checked_mul(b))
            }
            NodeKind::Divide => self.evaluate_arithmetic(node, context, divide),
            NodeKind::Negate => {
                let operand = self.evaluate(child(node, 0)?, context)?;
                let operand = operand.as_decimal().ok_or(Undefined)?;
                Ok(numeric(-operand))
            }

            NodeKind::Concat => {
                let mut result = String::new();
                for operand in node.children() {
                    result.push_str(&self.evaluate_string(operand, context)?);
                }
                Ok(Value::String(result))
            }
            NodeKind::Substring => self.evaluate_substring(node, context),
            NodeKind::Trim => self.evaluate_trim(node, context),
            NodeKind::Upper => {
                let s = self.evaluate_string(child(node, 0)?, context)?;
                Ok(Value::String(s.to_uppercase()))
            }
            NodeKind::Lower => {
                let s = self.evaluate_string(child(node, 0)?, context)?;
                Ok(Value::String(s.to_lowercase()))
            }
            NodeKind::Length => {
                let s = self.evaluate_string(child(node, 0)?, context)?;
                Ok(Value::Integer(s.chars().count() as i64))
            }
            NodeKind::Locate => self.evaluate_locate(node, context),

            NodeKind::Count => self.evaluate_count(node, context),
            NodeKind::Sum | NodeKind::Avg => self.evaluate_numeric_aggregate(node, context),
            NodeKind::Min | NodeKind::Max => self.evaluate_extremum(node, context),

            NodeKind::CaseWhen => self.evaluate_searched_case(node, context),
            NodeKind::SimpleCase => self.evaluate_simple_case(node, context),
            NodeKind::Coalesce => {
                for operand in node.children() {
                    let value = self.evaluate(operand, context)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::Nullif => {
                let a = self.evaluate(child(node, 0)?, context)?;
                let b = self.evaluate(child(node, 1)?, context)?;
                if a.is_null() || b.is_null() {
                    return Ok(a);
                }
                match a.equals(&b) {
                    Some(true) => Ok(Value::Null),
                    Some(false) => Ok(a),
                    None => Err(Undefined),
                }
            }

            NodeKind::Path => self.evaluate_path(node, context),
            NodeKind::IntegerLiteral => {
                let spelling = node.value().ok_or(Undefined)?;
                match i64::from_str(spelling) {
                    Ok(i) => Ok(Value::Integer(i)),
                    Err(_) => Decimal::from_str(spelling)
                        .map(Value::Decimal)
                        .map_err(|_| Undefined),
                }
            }
            NodeKind::DecimalLiteral => {
                let spelling = node.value().ok_or(Undefined)?;
                Decimal::from_str(spelling)
                    .map(Value::Decimal)
                    .map_err(|_| Undefined)
            }
            NodeKind::StringLiteral => {
                Ok(Value::String(node.value().unwrap_or_default().to_string()))
            }
            NodeKind::BooleanLiteral => Ok(Value::Boolean(node.value() == Some("true"))),
            NodeKind::NullLiteral => Ok(Value::Null),
            NodeKind::NamedParameter => {
                let name = node.value().ok_or(Undefined)?;
                context.named_parameters.get(name).cloned().ok_or(Undefined)
            }
            NodeKind::PositionalParameter => {
                let position = node.value().ok_or(Undefined)?;
                let position = usize::from_str(position).map_err(|_| Undefined)?;
                context
                    .positional_parameters
                    .get(&position)
                    .cloned()
                    .ok_or(Undefined)
            }

            // Structural node kinds have no value of their own.
            NodeKind::Select
            | NodeKind::SelectClause
            | NodeKind::FromClause
            | NodeKind::WhereClause
            | NodeKind::GroupByClause
            | NodeKind::HavingClause
            | NodeKind::OrderByClause
            | NodeKind::OrderByItem
            | NodeKind::RangeDeclaration
            | NodeKind::InnerJoin
            | NodeKind::OuterJoin
            | NodeKind::InnerFetchJoin
            | NodeKind::OuterFetchJoin
            | NodeKind::When
            | NodeKind::SimpleWhen
            | NodeKind::MapEntry
            | NodeKind::Constructor
            | NodeKind::Alias
            | NodeKind::EntityName
            | NodeKind::Hint => Err(Undefined),
        }
    }

    /// AND with short-circuit: a definite `false` on the left suppresses
    /// the right side entirely; an undefined left still resolves to
    /// `false` when the right side is definitely `false`.
    fn evaluate_and(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        match boolean(self.evaluate(child(node, 0)?, context)) {
            Ok(false) => Ok(Value::Boolean(false)),
            Ok(true) => Ok(Value::Boolean(boolean(
                self.evaluate(child(node, 1)?, context),
            )?)),
            Err(Undefined) => match boolean(self.evaluate(child(node, 1)?, context)) {
                Ok(false) => Ok(Value::Boolean(false)),
                _ => Err(Undefined),
            },
        }
    }

    fn evaluate_or(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        match boolean(self.evaluate(child(node, 0)?, context)) {
            Ok(true) => Ok(Value::Boolean(true)),
            Ok(false) => Ok(Value::Boolean(boolean(
                self.evaluate(child(node, 1)?, context),
            )?)),
            Err(Undefined) => match boolean(self.evaluate(child(node, 1)?, context)) {
                Ok(true) => Ok(Value::Boolean(true)),
                _ => Err(Undefined),
            },
        }
    }

    fn evaluate_hinted(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let hint = child(node, 0)?.value().unwrap_or_default();
        match (context.mode, hint) {
            // The hinted clause contributes nothing to in-memory checks.
            (EvaluationMode::AccessCheck, "skip_access_check") => Ok(Value::Boolean(true)),
            // The optimizer must leave the hinted clause untouched.
            (EvaluationMode::OptimizeQuery, "skip_optimize") => Err(Undefined),
            _ => self.evaluate(child(node, 1)?, context),
        }
    }

    fn evaluate_equality(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
        negated: bool,
    ) -> EvalResult {
        let left = self.evaluate(child(node, 0)?, context)?;
        let right = self.evaluate(child(node, 1)?, context)?;
        let equal = left.equals(&right).ok_or(Undefined)?;
        Ok(Value::Boolean(equal != negated))
    }

    fn evaluate_comparison(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> EvalResult {
        let left = self.evaluate(child(node, 0)?, context)?;
        let right = self.evaluate(child(node, 1)?, context)?;
        let ordering = left.compare(&right).ok_or(Undefined)?;
        Ok(Value::Boolean(accept(ordering)))
    }

    fn evaluate_like(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let operand = self.evaluate_string(child(node, 0)?, context)?;
        let pattern = self.evaluate_string(child(node, 1)?, context)?;
        let escape = match node.child(2) {
            Some(escape_node) => {
                let escape = self.evaluate_string(escape_node, context)?;
                escape.chars().next()
            }
            None => None,
        };
        let regex = like_to_regex(&pattern, escape).ok_or(Undefined)?;
        Ok(Value::Boolean(regex.is_match(&operand)))
    }

    fn evaluate_in(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let operand = self.evaluate(child(node, 0)?, context)?;
        if operand.is_null() {
            return Err(Undefined);
        }
        let mut unknown = false;
        for candidate in &node.children()[1..] {
            let value = if candidate.kind() == NodeKind::Subselect {
                self.evaluate_subselect(candidate, context)?
            } else {
                self.evaluate(candidate, context)?
            };
            // A collection-valued candidate (bound parameter, subselect
            // result) is tested for membership; scalars for equality.
            match &value {
                Value::Collection(items) => {
                    for item in items {
                        match operand.equals(item) {
                            Some(true) => return Ok(Value::Boolean(true)),
                            Some(false) => {}
                            None => unknown = true,
                        }
                    }
                }
                _ => match operand.equals(&value) {
                    Some(true) => return Ok(Value::Boolean(true)),
                    Some(false) => {}
                    None => unknown = true,
                },
            }
        }
        if unknown {
            Err(Undefined)
        } else {
            Ok(Value::Boolean(false))
        }
    }

    fn evaluate_member_of(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
        negated: bool,
    ) -> EvalResult {
        let member = self.evaluate(child(node, 0)?, context)?;
        let collection = self.evaluate(child(node, 1)?, context)?;
        let items = collection.as_collection().ok_or(Undefined)?;
        let mut unknown = false;
        for item in items {
            match member.equals(item) {
                Some(true) => return Ok(Value::Boolean(!negated)),
                Some(false) => {}
                None => unknown = true,
            }
        }
        if unknown {
            Err(Undefined)
        } else {
            Ok(Value::Boolean(negated))
        }
    }

    fn evaluate_subselect(
        &self,
        subselect: &Arc<Node>,
        context: &EvaluationContext,
    ) -> EvalResult {
        for strategy in &self.subselect_evaluators {
            if let Some(result) = strategy.evaluate(subselect, self, context) {
                return result;
            }
        }
        Err(Undefined)
    }

    fn evaluate_arithmetic(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
        op: fn(Decimal, Decimal) -> Option<Decimal>,
    ) -> EvalResult {
        let left = self.evaluate(child(node, 0)?, context)?;
        let right = self.evaluate(child(node, 1)?, context)?;
        let left = left.as_decimal().ok_or(Undefined)?;
        let right = right.as_decimal().ok_or(Undefined)?;
        op(left, right).map(numeric).ok_or(Undefined)
    }

    fn evaluate_string(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
    ) -> Result<String, Undefined> {
        match self.evaluate(node, context)? {
            Value::String(s) => Ok(s),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Decimal(d) => Ok(d.to_string()),
            _ => Err(Undefined),
        }
    }

    fn evaluate_substring(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let source = self.evaluate_string(child(node, 0)?, context)?;
        let start = self.evaluate_index(child(node, 1)?, context)?;
        if start < 1 {
            return Err(Undefined);
        }
        let tail = source.chars().skip(start as usize - 1);
        let result: String = match node.child(2) {
            Some(length_node) => {
                let length = self.evaluate_index(length_node, context)?;
                if length < 0 {
                    return Err(Undefined);
                }
                tail.take(length as usize).collect()
            }
            None => tail.collect(),
        };
        Ok(Value::String(result))
    }

    fn evaluate_trim(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let (trim_char, source) = match node.children() {
            [source] => (' ', source),
            [trim_char, source] => {
                let spec = self.evaluate_string(trim_char, context)?;
                let mut chars = spec.chars();
                let (Some(ch), None) = (chars.next(), chars.next()) else {
                    return Err(Undefined);
                };
                (ch, source)
            }
            _ => return Err(Undefined),
        };
        let source = self.evaluate_string(source, context)?;
        let result = match node.value() {
            Some("leading") => source.trim_start_matches(trim_char).to_string(),
            Some("trailing") => source.trim_end_matches(trim_char).to_string(),
            _ => source
                .trim_start_matches(trim_char)
                .trim_end_matches(trim_char)
                .to_string(),
        };
        Ok(Value::String(result))
    }

    fn evaluate_locate(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let search = self.evaluate_string(child(node, 0)?, context)?;
        let within = self.evaluate_string(child(node, 1)?, context)?;
        let start = match node.child(2) {
            Some(start_node) => {
                let start = self.evaluate_index(start_node, context)?;
                if start < 1 {
                    return Err(Undefined);
                }
                start as usize
            }
            None => 1,
        };
        // 1-based both ways; 0 means "not found".
        let chars: Vec<char> = within.chars().collect();
        let offset = start - 1;
        if offset > chars.len() {
            return Ok(Value::Integer(0));
        }
        let haystack: String = chars[offset..].iter().collect();
        match haystack.find(&search) {
            Some(byte_index) => {
                let char_index = haystack[..byte_index].chars().count();
                Ok(Value::Integer((offset + char_index + 1) as i64))
            }
            None => Ok(Value::Integer(0)),
        }
    }

    fn evaluate_index(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
    ) -> Result<i64, Undefined> {
        match self.evaluate(node, context)? {
            Value::Integer(i) => Ok(i),
            Value::Decimal(d) => d.to_i64().ok_or(Undefined),
            _ => Err(Undefined),
        }
    }

    fn evaluate_count(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let operand = self.evaluate(child(node, 0)?, context)?;
        let items = operand.as_collection().ok_or(Undefined)?;
        if node.value() == Some("distinct") {
            let mut distinct: Vec<&Value> = Vec::new();
            for item in items {
                if !distinct.iter().any(|seen| seen.equals(item) == Some(true)) {
                    distinct.push(item);
                }
            }
            Ok(Value::Integer(distinct.len() as i64))
        } else {
            Ok(Value::Integer(items.len() as i64))
        }
    }

    fn evaluate_numeric_aggregate(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
    ) -> EvalResult {
        let operand = self.evaluate(child(node, 0)?, context)?;
        let items = operand.as_collection().ok_or(Undefined)?;
        if items.is_empty() {
            return Ok(Value::Null);
        }
        let mut sum = Decimal::ZERO;
        for item in items {
            sum = sum
                .checked_add(item.as_decimal().ok_or(Undefined)?)
                .ok_or(Undefined)?;
        }
        if node.kind() == NodeKind::Sum {
            Ok(numeric(sum))
        } else {
            let count = Decimal::from(items.len() as i64);
            divide(sum, count).map(numeric).ok_or(Undefined)
        }
    }

    fn evaluate_extremum(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let operand = self.evaluate(child(node, 0)?, context)?;
        let items = operand.as_collection().ok_or(Undefined)?;
        let mut best: Option<&Value> = None;
        for item in items {
            if item.is_null() {
                continue;
            }
            best = match best {
                None => Some(item),
                Some(current) => {
                    let ordering = item.compare(current).ok_or(Undefined)?;
                    let wins = if node.kind() == NodeKind::Min {
                        ordering.is_lt()
                    } else {
                        ordering.is_gt()
                    };
                    Some(if wins { item } else { current })
                }
            };
        }
        Ok(best.cloned().unwrap_or(Value::Null))
    }

    fn evaluate_searched_case(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
    ) -> EvalResult {
        let children = node.children();
        let (else_expr, branches) = children.split_last().ok_or(Undefined)?;
        for branch in branches {
            let condition = child(branch, 0)?;
            let result = child(branch, 1)?;
            // An undecidable branch makes the whole CASE undecidable:
            // we cannot know whether a later branch would be reached.
            if boolean(self.evaluate(condition, context))? {
                return self.evaluate(result, context);
            }
        }
        self.evaluate(else_expr, context)
    }

    fn evaluate_simple_case(
        &self,
        node: &Arc<Node>,
        context: &EvaluationContext,
    ) -> EvalResult {
        let children = node.children();
        let operand = self.evaluate(children.first().ok_or(Undefined)?, context)?;
        let (else_expr, rest) = children.split_last().ok_or(Undefined)?;
        for branch in rest.iter().skip(1) {
            let matched = self.evaluate(child(branch, 0)?, context)?;
            match operand.equals(&matched) {
                Some(true) => return self.evaluate(child(branch, 1)?, context),
                Some(false) => {}
                None => return Err(Undefined),
            }
        }
        self.evaluate(else_expr, context)
    }

    fn evaluate_path(&self, node: &Arc<Node>, context: &EvaluationContext) -> EvalResult {
        let text = node.value().ok_or(Undefined)?;
        let path = QueryPath::parse(text).ok_or(Undefined)?;
        if path.is_enum_literal() {
            let name = path.segments().last().cloned();
            return Ok(Value::String(name.unwrap_or_else(|| path.root().to_string())));
        }

        let root = context.alias_value(path.root()).ok_or(Undefined)?;

        if path.is_key_path() || path.is_value_path() {
            return self.project_map(&path, root);
        }

        let mut current = root.clone();
        for segment in path.segments() {
            if current.is_null() {
                // SQL-style null propagation through a navigation.
                return Ok(Value::Null);
            }
            current = current.attribute(segment).cloned().ok_or(Undefined)?;
        }
        Ok(current)
    }

    /// `KEY(...)`/`VALUE(...)` over a map-valued navigation: project the
    /// keys or values as a collection. Trailing segments after the
    /// projection are beyond what in-memory bindings can answer.
    fn project_map(&self, path: &QueryPath, root: &Value) -> EvalResult {
        let mut current = root.clone();
        let mut segments = path.segments().iter();
        loop {
            if let Value::Map(entries) = &current {
                if segments.next().is_some() {
                    return Err(Undefined);
                }
                let projected = entries
                    .iter()
                    .map(|(key, value)| {
                        if path.is_key_path() {
                            key.clone()
                        } else {
                            value.clone()
                        }
                    })
                    .collect();
                return Ok(Value::Collection(projected));
            }
            match segments.next() {
                Some(segment) => {
                    current = current.attribute(segment).cloned().ok_or(Undefined)?;
                }
                None => return Err(Undefined),
            }
        }
    }
}

/// Evaluate a subselect whose FROM root is a collection reachable from
/// the outer bindings, e.g. `(SELECT i.name FROM e.items i WHERE ...)`
/// with `e` bound: iterate the collection, apply the WHERE per element,
/// collect the selected values.
pub struct CollectionSubselectEvaluator;

impl SubselectEvaluator for CollectionSubselectEvaluator {
    fn evaluate(
        &self,
        subselect: &Arc<Node>,
        evaluator: &PartialEvaluator,
        context: &EvaluationContext,
    ) -> Option<EvalResult> {
        let select_clause = find_child(subselect, NodeKind::SelectClause)?;
        let from_clause = find_child(subselect, NodeKind::FromClause)?;
        let where_clause = find_child(subselect, NodeKind::WhereClause);

        // Only the single-declaration, no-join form is supported.
        let [declaration] = from_clause.children() else {
            return None;
        };
        if declaration.kind() != NodeKind::RangeDeclaration {
            return None;
        }
        let root_text = declaration.child(0)?.value()?;
        let root_path = QueryPath::parse(root_text)?;
        if root_path.is_alias_only() {
            return None;
        }
        let alias = declaration.child(1)?.value()?;
        let select_item = select_clause.child(0)?;

        let collection =
            match evaluator.evaluate(&Node::leaf(NodeKind::Path, root_text), context) {
                Ok(Value::Collection(items)) => items,
                Ok(_) => return Some(Err(Undefined)),
                Err(Undefined) => return Some(Err(Undefined)),
            };

        let mut selected = Vec::new();
        for element in collection {
            let inner = context.clone().bind_alias(alias, element);
            if let Some(where_clause) = where_clause {
                let Some(predicate) = where_clause.child(0) else {
                    return Some(Err(Undefined));
                };
                match evaluator.evaluate_boolean(predicate, &inner) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(Undefined) => return Some(Err(Undefined)),
                }
            }
            match evaluator.evaluate(select_item, &inner) {
                Ok(value) => selected.push(value),
                Err(Undefined) => return Some(Err(Undefined)),
            }
        }
        Some(Ok(Value::Collection(selected)))
    }
}

fn find_child<'n>(node: &'n Arc<Node>, kind: NodeKind) -> Option<&'n Arc<Node>> {
    node.children().iter().find(|child| child.kind() == kind)
}

/// Narrow a three-valued result to a boolean; a non-boolean value is as
/// undecidable as an unbound one.
fn boolean(result: EvalResult) -> Result<bool, Undefined> {
    match result? {
        Value::Boolean(b) => Ok(b),
        _ => Err(Undefined),
    }
}

fn child<'n>(node: &'n Arc<Node>, index: usize) -> Result<&'n Arc<Node>, Undefined> {
    node.child(index).ok_or(Undefined)
}

/// Scale results narrow back to `Integer` when exact.
fn numeric(decimal: Decimal) -> Value {
    let normalized = decimal.normalize();
    if normalized.fract().is_zero() {
        if let Some(i) = normalized.to_i64() {
            return Value::Integer(i);
        }
    }
    Value::Decimal(normalized)
}

/// Decimal division with HALF_UP rounding at the maximum supported scale.
fn divide(a: Decimal, b: Decimal) -> Option<Decimal> {
    let quotient = a.checked_div(b)?;
    Some(quotient.round_dp_with_strategy(28, RoundingStrategy::MidpointAwayFromZero))
}

/// Translate a LIKE pattern into an anchored regular expression:
/// `_` matches any one character, `%` any run, an escape character makes
/// the following wildcard literal, and everything else is quoted.
fn like_to_regex(pattern: &str, escape: Option<char>) -> Option<Regex> {
    let mut source = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if escape == Some(ch) {
            let literal = chars.next()?;
            source.push_str(&regex::escape(&literal.to_string()));
        } else if ch == '_' {
            source.push('.');
        } else if ch == '%' {
            source.push_str(".*");
        } else {
            source.push_str(&regex::escape(&ch.to_string()));
        }
    }
    source.push('$');
    Regex::new(&source).ok()
}
