//! Expression node types produced by the parser and consumed read-only by
//! the evaluator. Every node carries the source location of its first
//! token. The tree is immutable for the lifetime of an evaluation: closures
//! hold plain references into it.

use crate::SourceLocation;

/// A variable occurrence: a name plus where it appeared.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub sl: SourceLocation,
    pub name: String,
}

/// A lambda abstraction. Kept as its own struct (rather than inlined in
/// [`Expr`]) because closure values reference the node directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub sl: SourceLocation,
    pub params: Vec<Var>,
    pub body: Box<Expr>,
}

/// The callee position of a call. An intrinsic reference is only legal
/// here; keeping it out of [`Expr`] means it can never be evaluated into a
/// first-class value.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Intrinsic { sl: SourceLocation, name: String },
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Integer {
        sl: SourceLocation,
        value: i64,
    },
    Str {
        sl: SourceLocation,
        value: String,
    },
    Variable(Var),
    /// Rebind an existing variable: overwrite the heap cell its location
    /// names. Evaluates to Void.
    Set {
        sl: SourceLocation,
        target: Var,
        value: Box<Expr>,
    },
    Lambda(Lambda),
    /// Simultaneous recursive bindings: every name is visible (as a Void
    /// placeholder) in every binding expression.
    Letrec {
        sl: SourceLocation,
        bindings: Vec<(Var, Expr)>,
        body: Box<Expr>,
    },
    If {
        sl: SourceLocation,
        cond: Box<Expr>,
        branch1: Box<Expr>,
        branch2: Box<Expr>,
    },
    /// Loops while the condition is a non-zero Integer. Evaluates to Void.
    While {
        sl: SourceLocation,
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Call {
        sl: SourceLocation,
        callee: Callee,
        args: Vec<Expr>,
    },
    /// Non-empty; evaluates to its last sub-expression's value.
    Sequence {
        sl: SourceLocation,
        exprs: Vec<Expr>,
    },
    /// `@ name expr`: does the closure produced by `expr` bind `name`?
    Query {
        sl: SourceLocation,
        field: Var,
        object: Box<Expr>,
    },
    /// `& name expr`: the location bound to `name` in that closure's
    /// environment, aliased rather than copied.
    Access {
        sl: SourceLocation,
        field: Var,
        object: Box<Expr>,
    },
}

impl Expr {
    pub fn sl(&self) -> SourceLocation {
        match self {
            Expr::Integer { sl, .. }
            | Expr::Str { sl, .. }
            | Expr::Set { sl, .. }
            | Expr::Letrec { sl, .. }
            | Expr::If { sl, .. }
            | Expr::While { sl, .. }
            | Expr::Call { sl, .. }
            | Expr::Sequence { sl, .. }
            | Expr::Query { sl, .. }
            | Expr::Access { sl, .. } => *sl,
            Expr::Variable(var) => var.sl,
            Expr::Lambda(lambda) => lambda.sl,
        }
    }
}
