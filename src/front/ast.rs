//! The typed surface AST for the class-based source language.
//!
//! Node shapes follow the original homework's `AST.h`: a `Program` is zero
//! or more classes followed by a `main` method body. Every statement and
//! expression form here has a fixed, unambiguous surface spelling (see the
//! `Display` impls below), used to reconstruct a statement's source text for
//! diagnostics; the `Serialize` derives are used by the driver's
//! `--print-ast` mode.

use std::fmt;

use serde::Serialize;

use crate::common::Id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Type {
    Int,
    Class(Id),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Class(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub name: Id,
    pub ty: Type,
}

#[derive(Debug, Clone, Serialize)]
pub struct Method {
    pub name: Id,
    pub params: Vec<Param>,
    pub returns: Type,
    pub locals: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Class {
    pub name: Id,
    pub fields: Vec<Param>,
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub classes: Vec<Class>,
    pub main_params: Vec<Param>,
    pub main_body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            BOp::Add => '+',
            BOp::Sub => '-',
            BOp::Mul => '*',
            BOp::Div => '/',
        };
        write!(f, "{c}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Expr {
    IntLit(u32),
    Var(Id),
    This,
    Null(Id),
    BinOp { op: BOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { receiver: Box<Expr>, method: Id, args: Vec<Expr> },
    FieldRead { receiver: Box<Expr>, field: Id },
    New(Id),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::This => write!(f, "this"),
            Expr::Null(class) => write!(f, "null:{class}"),
            Expr::BinOp { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Call { receiver, method, args } => {
                write!(f, "^{receiver}.{method}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::FieldRead { receiver, field } => write!(f, "&{receiver}.{field}"),
            Expr::New(class) => write!(f, "@{class}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Stmt {
    Assign { var: Id, value: Expr },
    Discard { value: Expr },
    FieldWrite { receiver: Expr, field: Id, value: Expr },
    If { guard: Expr, then_branch: Vec<Stmt>, else_branch: Vec<Stmt> },
    IfOnly { guard: Expr, then_branch: Vec<Stmt> },
    While { guard: Expr, body: Vec<Stmt> },
    Return(Expr),
    Print(Expr),
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { var, value } => write!(f, "{var} = {value}"),
            Stmt::Discard { value } => write!(f, "_ = {value}"),
            Stmt::FieldWrite { receiver, field, value } => write!(f, "!{receiver}.{field} = {value}"),
            Stmt::If { guard, .. } => write!(f, "if {guard}: {{ ... }} else {{ ... }}"),
            Stmt::IfOnly { guard, .. } => write!(f, "ifonly {guard}: {{ ... }}"),
            Stmt::While { guard, .. } => write!(f, "while {guard}: {{ ... }}"),
            Stmt::Return(e) => write!(f, "return {e}"),
            Stmt::Print(e) => write!(f, "print {e}"),
        }
    }
}
