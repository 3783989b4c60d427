//! Policy language core for the verdict policy decision point.
//!
//! This crate holds the data model ([`Term`], [`Value`], [`Ref`]), the
//! hand-written parser, the whole-set [`Compiler`], and the
//! virtual-document [`RuleIndex`] that backs write-conflict checks.
//!
//! # Example
//!
//! ```
//! use verdict_ast::{parse_module, Compiler};
//! use std::collections::BTreeMap;
//!
//! let module = parse_module("package a.b\nc = 2 :- true").unwrap();
//! let mut modules = BTreeMap::new();
//! modules.insert("example".to_string(), module);
//! let compiler = Compiler::compile(modules).unwrap();
//! assert!(compiler.has_virtual_document(&verdict_ast::Ref::data(&["a", "b", "c"])));
//! ```

pub mod compile;
pub mod error;
pub mod module;
pub mod parse;
pub mod ruleindex;
pub mod term;

pub use compile::Compiler;
pub use error::{AstError, AstErrors};
pub use module::{BinOp, Body, Expr, ExprKind, Location, Module, Package, Rule, RuleKind};
pub use parse::{parse_body, parse_module, parse_term_str};
pub use ruleindex::{NodeId, RuleIndex, RuleRef};
pub use term::{Ref, Term, Value, DATA_ROOT, REQUEST_ROOT};
