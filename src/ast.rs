//! # Warden Query Language - Abstract Syntax Tree
//!
//! This module defines the tree representation shared by every component of
//! the crate: the statement compiler, the copy-on-write rewriter, the
//! partial evaluator, the optimizer and the rule injector all operate on
//! the same immutable [`Node`] type.
//!
//! ## Architecture Overview
//!
//! The AST module is organized into focused submodules:
//!
//! - **[node]** - The node kinds, the immutable node type, and builders
//! - **[path]** - Dotted navigation paths and selected-path metadata
//!
//! ## Core Concepts
//!
//! ### One closed node set
//!
//! Every grammar rule maps to exactly one [`NodeKind`] variant. Consumers
//! pattern-match exhaustively, so a new node kind is a compile error in
//! every walk that has not been taught about it.
//!
//! ### Immutability and sharing
//!
//! A [`Node`] never changes after construction. Children are held behind
//! [`std::sync::Arc`], so two versions of a statement may share arbitrary
//! subtrees; a rewrite copies only the spine from the changed node up to
//! the root. Nodes carry no parent pointers - parent linkage is supplied
//! transiently by whichever traversal needs it.
//!
//! ### Terminals
//!
//! Leaf nodes keep their token text in an optional `value` slot. Literals
//! store their source spelling, so rendering a tree reproduces the text it
//! was parsed from.

pub mod node;
pub mod path;

pub use node::{Node, NodeKind};
pub use path::{QueryPath, SelectedPath};
