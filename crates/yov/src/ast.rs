//! Parse trees produced on demand by the Parser. These are intermediate:
//! the IR Builder consumes them and they are discarded once a
//! function/global body has been lowered.

use crate::diagnostics::Location;
use crate::lexer::BinaryOperator;

#[derive(Debug, Clone)]
pub enum TypeExpr {
    Named(String),
    Array(Box<TypeExpr>),
    Reference(Box<TypeExpr>),
}

#[derive(Debug, Clone)]
pub enum StringPart {
    Text(String),
    Interp(Expr),
}

#[derive(Debug, Clone, Copy)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLiteral(i64, Location),
    BoolLiteral(bool, Location),
    StringLiteral(Vec<StringPart>, Location),
    CodepointLiteral(char, Location),
    NullLiteral(Location),
    Identifier(String, Location),
    Unary { op: UnaryOp, expr: Box<Expr>, location: Location },
    Binary { op: BinaryOperator, lhs: Box<Expr>, rhs: Box<Expr>, location: Location },
    Call { callee: Box<Expr>, args: Vec<Expr>, location: Location },
    Member { base: Box<Expr>, name: String, location: Location },
    Index { base: Box<Expr>, index: Box<Expr>, location: Location },
    Reference { expr: Box<Expr>, location: Location },
    Is { expr: Box<Expr>, ty: TypeExpr, location: Location },
    ArrayLiteral { elements: Vec<Expr>, location: Location },
}

impl Expr {
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::IntLiteral(_, l)
            | Self::BoolLiteral(_, l)
            | Self::StringLiteral(_, l)
            | Self::CodepointLiteral(_, l)
            | Self::NullLiteral(l)
            | Self::Identifier(_, l)
            | Self::Unary { location: l, .. }
            | Self::Binary { location: l, .. }
            | Self::Call { location: l, .. }
            | Self::Member { location: l, .. }
            | Self::Index { location: l, .. }
            | Self::Reference { location: l, .. }
            | Self::Is { location: l, .. }
            | Self::ArrayLiteral { location: l, .. } => *l,
        }
    }
}

/// Either a mutable initializer (`name: Type = expr;`) or a constant binding
/// (`name :: expr;`), per the object-definition statement form.
#[derive(Debug, Clone)]
pub enum ObjectInit {
    Value(Expr),
    Constant(Expr),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    ExprStmt(Expr),
    ObjectDef { names: Vec<String>, ty: Option<TypeExpr>, init: Option<ObjectInit>, location: Location },
    Assign { target: Expr, op: Option<BinaryOperator>, value: Expr, location: Location },
    MultiAssign { targets: Vec<Expr>, declares: Vec<bool>, value: Expr, location: Location },
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>>, location: Location },
    While { cond: Expr, body: Box<Stmt>, location: Location },
    ForClassic { init: Option<Box<Stmt>>, cond: Option<Expr>, update: Option<Box<Stmt>>, body: Box<Stmt>, location: Location },
    ForEach { elem: String, index: Option<String>, iter: Expr, body: Box<Stmt>, location: Location },
    Return { values: Vec<Expr>, location: Location },
    Break(Location),
    Continue(Location),
    Block(Vec<Stmt>),
    Import { path: String, location: Location },
}
