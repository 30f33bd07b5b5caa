//! Static simplification of WHERE clauses.
//!
//! The optimizer runs the partial evaluator in
//! [`EvaluationMode::OptimizeQuery`] over a statement's predicate and
//! folds every subtree the bound values already decide. A predicate
//! that folds to `true` removes the WHERE clause; one that folds to
//! `false` becomes the canonical `1 <> 1`, leaving the statement
//! executable but empty.

use std::sync::Arc;

use crate::{
    ast::{Node, NodeKind, node},
    compile::CompiledStatement,
    evaluator::{EvaluationContext, EvaluationMode, PartialEvaluator, Undefined},
    rewrite::{self, Rewrite},
};

pub struct QueryOptimizer<'m> {
    evaluator: PartialEvaluator,
    context: EvaluationContext<'m>,
}

impl<'m> QueryOptimizer<'m> {
    pub fn new(context: EvaluationContext<'m>) -> Self {
        QueryOptimizer {
            evaluator: PartialEvaluator::new(),
            context: context.with_mode(EvaluationMode::OptimizeQuery),
        }
    }

    pub fn with_evaluator(mut self, evaluator: PartialEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Simplify the statement's WHERE clause in place.
    pub fn optimize(&self, statement: &mut CompiledStatement) {
        let root = Arc::clone(statement.root());
        let Some(index) = root
            .children()
            .iter()
            .position(|child| child.kind() == NodeKind::WhereClause)
        else {
            return;
        };
        let where_clause = &root.children()[index];
        let Some(predicate) = where_clause.child(0) else {
            return;
        };

        let simplified = self.optimize_predicate(predicate);
        match self.evaluator.evaluate_boolean(&simplified, &self.context) {
            Ok(true) => {
                statement.set_root(rewrite::delete_child(&root, index));
            }
            Ok(false) => {
                let emptied = node::where_clause(node::always_false());
                statement.set_root(rewrite::replace_child(&root, index, emptied));
            }
            Err(Undefined) => {
                if !Arc::ptr_eq(&simplified, predicate) {
                    let rewritten = rewrite::replace_child(where_clause, 0, simplified);
                    statement.set_root(rewrite::replace_child(&root, index, rewritten));
                }
            }
        }
    }

    /// Fold every decidable subtree of a predicate, bottom-up. Subtrees
    /// the evaluator cannot decide are kept untouched, identity
    /// included.
    pub fn optimize_predicate(&self, predicate: &Arc<Node>) -> Arc<Node> {
        rewrite::rewrite_tree(predicate, |current| self.fold(current))
    }

    fn fold(&self, current: &Arc<Node>) -> Rewrite {
        match current.kind() {
            // AND and OR simplify even when only one side is decided.
            NodeKind::And => {
                let (Some(left), Some(right)) = (current.child(0), current.child(1)) else {
                    return Rewrite::Keep;
                };
                match (self.decide(left), self.decide(right)) {
                    (Ok(false), _) | (_, Ok(false)) => Rewrite::Replace(node::always_false()),
                    (Ok(true), Ok(true)) => Rewrite::Replace(node::always_true()),
                    (Ok(true), Err(Undefined)) => Rewrite::Replace(Arc::clone(right)),
                    (Err(Undefined), Ok(true)) => Rewrite::Replace(Arc::clone(left)),
                    (Err(Undefined), Err(Undefined)) => Rewrite::Keep,
                }
            }
            NodeKind::Or => {
                let (Some(left), Some(right)) = (current.child(0), current.child(1)) else {
                    return Rewrite::Keep;
                };
                match (self.decide(left), self.decide(right)) {
                    (Ok(true), _) | (_, Ok(true)) => Rewrite::Replace(node::always_true()),
                    (Ok(false), Ok(false)) => Rewrite::Replace(node::always_false()),
                    (Ok(false), Err(Undefined)) => Rewrite::Replace(Arc::clone(right)),
                    (Err(Undefined), Ok(false)) => Rewrite::Replace(Arc::clone(left)),
                    (Err(Undefined), Err(Undefined)) => Rewrite::Keep,
                }
            }
            // Unwrap nested groupings; single-level groupings stay for
            // rendering fidelity.
            NodeKind::Grouping => match current.child(0) {
                Some(inner) if inner.kind() == NodeKind::Grouping => {
                    Rewrite::Replace(Arc::clone(inner))
                }
                _ => Rewrite::Keep,
            },
            NodeKind::Not
            | NodeKind::Equals
            | NodeKind::NotEquals
            | NodeKind::GreaterThan
            | NodeKind::GreaterEquals
            | NodeKind::LessThan
            | NodeKind::LessEquals
            | NodeKind::Between
            | NodeKind::Like
            | NodeKind::In
            | NodeKind::IsNull
            | NodeKind::IsNotNull
            | NodeKind::IsEmpty
            | NodeKind::IsNotEmpty
            | NodeKind::MemberOf
            | NodeKind::NotMemberOf
            | NodeKind::Exists
            | NodeKind::Hinted => match self.decide(current) {
                Ok(true) => {
                    if node::is_always_true(current) {
                        Rewrite::Keep
                    } else {
                        Rewrite::Replace(node::always_true())
                    }
                }
                Ok(false) => {
                    if node::is_always_false(current) {
                        Rewrite::Keep
                    } else {
                        Rewrite::Replace(node::always_false())
                    }
                }
                Err(Undefined) => Rewrite::Keep,
            },
            _ => Rewrite::Keep,
        }
    }

    fn decide(&self, node: &Arc<Node>) -> Result<bool, Undefined> {
        self.evaluator.evaluate_boolean(node, &self.context)
    }
}
