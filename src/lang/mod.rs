pub mod codegen;
pub mod scope;
pub mod semantics;
pub mod stack;
pub mod types;

use std::fmt;

pub use codegen::{Compiler, CodegenError};
pub use scope::{ScopeChain, ScopeError};
pub use semantics::{SemanticError, TypeChecker};
pub use stack::{StackError, StackManager};
pub use types::{StructType, Type, TypeModelError, TypeRegistry};

/// A typed tree plus the struct declarations it refers to.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub registry: TypeRegistry,
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn new(registry: TypeRegistry, body: Vec<Stmt>) -> Self {
        Program { registry, body }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Char(char),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Operators whose result is a 0/1 `int`.
    pub fn is_boolean(self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        f.write_str(s)
    }
}

/// One projection step after a variable name. `ty` is filled by the
/// typechecker with the type reached after this step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Field { name: String, ty: Option<Type> },
    Index { index: Box<Expr>, ty: Option<Type> },
}

impl Lookup {
    pub fn field(name: &str) -> Self {
        Lookup::Field {
            name: name.to_string(),
            ty: None,
        }
    }

    pub fn index(index: Expr) -> Self {
        Lookup::Index {
            index: Box::new(index),
            ty: None,
        }
    }

    pub fn ty(&self) -> Option<&Type> {
        match self {
            Lookup::Field { ty, .. } | Lookup::Index { ty, .. } => ty.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    /// Resolved by the typechecker.
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Literal(Value),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Get {
        name: String,
        chain: Vec<Lookup>,
    },
    AddressOf {
        name: String,
        chain: Vec<Lookup>,
    },
    Deref(Box<Expr>),
    StructLit(Vec<Expr>),
    ArrayLit(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Expr { kind, ty: None }
    }
}

impl Expr {
    pub fn int(value: i32) -> Self {
        ExprKind::Literal(Value::Int(value)).into()
    }

    pub fn char(value: char) -> Self {
        ExprKind::Literal(Value::Char(value)).into()
    }

    pub fn bool(value: bool) -> Self {
        ExprKind::Literal(Value::Bool(value)).into()
    }

    pub fn str(value: &str) -> Self {
        ExprKind::Literal(Value::Str(value.to_string())).into()
    }

    pub fn var(name: &str) -> Self {
        Self::get(name, Vec::new())
    }

    pub fn get(name: &str, chain: Vec<Lookup>) -> Self {
        ExprKind::Get {
            name: name.to_string(),
            chain,
        }
        .into()
    }

    pub fn address_of(name: &str, chain: Vec<Lookup>) -> Self {
        ExprKind::AddressOf {
            name: name.to_string(),
            chain,
        }
        .into()
    }

    pub fn deref(pointer: Expr) -> Self {
        ExprKind::Deref(Box::new(pointer)).into()
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .into()
    }

    pub fn struct_lit(fields: Vec<Expr>) -> Self {
        ExprKind::StructLit(fields).into()
    }

    pub fn array_lit(elements: Vec<Expr>) -> Self {
        ExprKind::ArrayLit(elements).into()
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        ExprKind::Call {
            name: name.to_string(),
            args,
        }
        .into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Declare {
        name: String,
        ty: Type,
        init: Option<Expr>,
    },
    Set {
        name: String,
        chain: Vec<Lookup>,
        value: Expr,
    },
    Debug(Expr),
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    /// `step` runs after the body and is where `continue` lands.
    While {
        cond: Expr,
        body: Box<Stmt>,
        step: Option<Box<Stmt>>,
    },
    Function(Function),
    Return(Expr),
    Break,
    Continue,
    Unreachable,
}

impl Stmt {
    pub fn declare(name: &str, ty: Type, init: Option<Expr>) -> Self {
        Stmt::Declare {
            name: name.to_string(),
            ty,
            init,
        }
    }

    pub fn set(name: &str, chain: Vec<Lookup>, value: Expr) -> Self {
        Stmt::Set {
            name: name.to_string(),
            chain,
            value,
        }
    }

    pub fn if_else(cond: Expr, then: Stmt, otherwise: Option<Stmt>) -> Self {
        Stmt::If {
            cond,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        }
    }

    pub fn while_loop(cond: Expr, body: Stmt) -> Self {
        Stmt::While {
            cond,
            body: Box::new(body),
            step: None,
        }
    }

    /// `for (init; cond; step) body`, scoped so `init` does not leak.
    pub fn for_loop(init: Stmt, cond: Expr, step: Stmt, body: Stmt) -> Self {
        Stmt::Block(vec![
            init,
            Stmt::While {
                cond,
                body: Box::new(body),
                step: Some(Box::new(step)),
            },
        ])
    }

    pub fn function(name: &str, params: Vec<(&str, Type)>, ret: Type, body: Vec<Stmt>) -> Self {
        Stmt::Function(Function {
            name: name.to_string(),
            params: params
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
            ret,
            body,
        })
    }
}
