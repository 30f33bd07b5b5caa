pub mod access;
pub mod ast;
pub mod compile;
pub mod evaluator;
pub mod lexer;
pub mod metamodel;
pub mod optimize;
pub mod parser;
pub mod render;
pub mod rewrite;
pub mod value;

pub use access::{AccessDefinition, AccessRule, AccessType, InjectError, RuleInjector};
pub use ast::{Node, NodeKind, QueryPath, SelectedPath};
pub use compile::{
    CompileError, CompiledStatement, QueryError, StatementCache, StatementCompiler, TypeBinding,
};
pub use evaluator::{
    EvalResult, EvaluationContext, EvaluationMode, PartialEvaluator, SubselectEvaluator,
    Undefined,
};
pub use lexer::{LexError, Lexer, Token};
pub use metamodel::{
    Attribute, AttributeKind, EntityType, Metamodel, SecurityContext, SecurityValue,
};
pub use optimize::QueryOptimizer;
pub use parser::{ParseError, parse_access_rule, parse_predicate, parse_statement};
pub use render::render;
pub use value::Value;
