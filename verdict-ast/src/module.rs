//! Policy module AST: packages, rules, bodies, expressions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::{Ref, Term};

/// Source position, one-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Location {
    pub row: usize,
    pub col: usize,
}

impl Location {
    pub fn new(row: usize, col: usize) -> Self {
        Location { row, col }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// A parsed policy module: a package declaration plus rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub package: Package,
    pub rules: Vec<Rule>,
}

/// Package declaration. The path is `data`-rooted: `package a.b` stores
/// the reference `data.a.b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub path: Ref,
    pub location: Location,
}

/// How a rule contributes to its virtual document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// `name = value :- body` — a single document value.
    Complete,
    /// `name[key] = value :- body` — accumulated object entries.
    PartialObject,
    /// `name[elem] :- body` — accumulated set elements.
    PartialSet,
}

/// One rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Term>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Term>,
    pub body: Body,
    pub location: Location,
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match (&self.key, &self.value) {
            (Some(_), Some(_)) => RuleKind::PartialObject,
            (Some(_), None) => RuleKind::PartialSet,
            _ => RuleKind::Complete,
        }
    }

    /// The rule's document path: package path extended with the rule name.
    pub fn path(&self, package: &Package) -> Ref {
        let mut r = package.path.clone();
        r.push(Term::string(self.name.clone()));
        r
    }
}

/// A query body: conjunction of expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body(pub Vec<Expr>);

impl Body {
    /// Visit every variable occurrence in the body.
    pub fn walk_vars(&self, f: &mut impl FnMut(&str) -> bool) -> bool {
        self.0.iter().all(|e| e.walk_vars(f))
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// One expression in a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub negated: bool,
    pub location: Location,
}

impl Expr {
    pub fn walk_vars(&self, f: &mut impl FnMut(&str) -> bool) -> bool {
        match &self.kind {
            ExprKind::Term(t) => t.value.walk_vars(f),
            ExprKind::Infix { lhs, rhs, .. } => {
                lhs.value.walk_vars(f) && rhs.value.walk_vars(f)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Term(Term),
    Infix { op: BinOp, lhs: Term, rhs: Term },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        match &self.kind {
            ExprKind::Term(t) => write!(f, "{}", t),
            ExprKind::Infix { op, lhs, rhs } => {
                write!(f, "{} {} {}", lhs, op.symbol(), rhs)
            }
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(key) = &self.key {
            write!(f, "[{}]", key)?;
        }
        if let Some(value) = &self.value {
            write!(f, " = {}", value)?;
        }
        write!(f, " :- {}", self.body)
    }
}
