use thiserror::Error;

use super::scope::{ScopeChain, ScopeError};
use super::types::{StructType, Type, TypeModelError};
use super::{BinOp, Expr, ExprKind, Function, Lookup, Program, Stmt, Value};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SemanticError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },
    #[error("operator '{op}' cannot combine {left} and {right}")]
    BadOperands { op: BinOp, left: Type, right: Type },
    #[error("dereference of non-pointer {found}")]
    NotPointer { found: Type },
    #[error("field access on non-struct {found}")]
    NotStruct { found: Type },
    #[error("cannot index into {found}")]
    NotIndexable { found: Type },
    #[error("debug needs a one-word value, found {found}")]
    NotScalar { found: Type },
    #[error("'{name}' is a function, not a variable")]
    NotVariable { name: String },
    #[error("'{name}' is not a function")]
    NotFunction { name: String },
    #[error("function '{name}' expects {expected} args, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("function '{name}' has no return")]
    NoReturn { name: String },
    #[error("function '{name}' declared inside another function")]
    NestedFunction { name: String },
    #[error("return outside of a function")]
    ReturnOutsideFunction,
    #[error("'{keyword}' outside of a loop")]
    OutsideLoop { keyword: &'static str },
    #[error("empty struct literal")]
    EmptyStruct,
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    TypeModel(#[from] TypeModelError),
}

/// Parameter and return types of a declared function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Debug, Clone)]
enum Binding {
    Var(Type),
    Func(Signature),
}

/// Single pass over the tree that fills in every `ty` slot and rejects
/// programs that break the typing rules.
#[derive(Debug, Default)]
pub struct TypeChecker {
    scopes: ScopeChain<Binding>,
    expected_return: Option<Type>,
    found_return: bool,
    loop_depth: usize,
}

pub fn check_program(program: &mut Program) -> Result<(), SemanticError> {
    TypeChecker::new().check_program(program)
}

fn expect(expected: &Type, found: &Type) -> Result<(), SemanticError> {
    if expected == found {
        Ok(())
    } else {
        Err(SemanticError::TypeMismatch {
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

impl TypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_program(&mut self, program: &mut Program) -> Result<(), SemanticError> {
        for stmt in &mut program.body {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn check_scoped(&mut self, stmt: &mut Stmt) -> Result<(), SemanticError> {
        self.scopes.open();
        self.check_stmt(stmt)?;
        self.scopes.close()?;
        Ok(())
    }

    pub fn check_stmt(&mut self, stmt: &mut Stmt) -> Result<(), SemanticError> {
        match stmt {
            Stmt::Declare { name, ty, init } => {
                if let Some(init) = init {
                    let found = self.check_expr(init)?;
                    expect(ty, &found)?;
                }
                self.scopes.bind(name, Binding::Var(ty.clone()))?;
            }
            Stmt::Set { name, chain, value } => {
                let found = self.check_expr(value)?;
                let base = self.variable(name)?;
                let target = self.walk_chain(base, chain)?;
                expect(&target, &found)?;
            }
            Stmt::Debug(expr) => {
                let found = self.check_expr(expr)?;
                if found.words() != 1 {
                    return Err(SemanticError::NotScalar { found });
                }
            }
            Stmt::Expr(expr) => {
                self.check_expr(expr)?;
            }
            Stmt::Block(stmts) => {
                self.scopes.open();
                for stmt in stmts {
                    self.check_stmt(stmt)?;
                }
                self.scopes.close()?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let found = self.check_expr(cond)?;
                expect(&Type::int(), &found)?;
                self.check_scoped(then)?;
                if let Some(otherwise) = otherwise {
                    self.check_scoped(otherwise)?;
                }
            }
            Stmt::While { cond, body, step } => {
                let found = self.check_expr(cond)?;
                expect(&Type::int(), &found)?;
                self.loop_depth += 1;
                self.check_scoped(body)?;
                if let Some(step) = step {
                    self.check_scoped(step)?;
                }
                self.loop_depth -= 1;
            }
            Stmt::Function(func) => self.check_function(func)?,
            Stmt::Return(expr) => {
                let expected = self
                    .expected_return
                    .clone()
                    .ok_or(SemanticError::ReturnOutsideFunction)?;
                self.found_return = true;
                let found = self.check_expr(expr)?;
                expect(&expected, &found)?;
            }
            Stmt::Break => self.require_loop("break")?,
            Stmt::Continue => self.require_loop("continue")?,
            Stmt::Unreachable => {}
        }
        Ok(())
    }

    fn require_loop(&self, keyword: &'static str) -> Result<(), SemanticError> {
        if self.loop_depth == 0 {
            return Err(SemanticError::OutsideLoop { keyword });
        }
        Ok(())
    }

    fn check_function(&mut self, func: &mut Function) -> Result<(), SemanticError> {
        if self.expected_return.is_some() {
            return Err(SemanticError::NestedFunction {
                name: func.name.clone(),
            });
        }
        let signature = Signature {
            params: func.params.iter().map(|(_, ty)| ty.clone()).collect(),
            ret: func.ret.clone(),
        };
        // Bound before the body so recursive calls resolve.
        self.scopes.bind(&func.name, Binding::Func(signature))?;

        let outer_loops = std::mem::take(&mut self.loop_depth);
        self.expected_return = Some(func.ret.clone());
        self.found_return = false;
        self.scopes.open();
        for (name, ty) in &func.params {
            self.scopes.bind(name, Binding::Var(ty.clone()))?;
        }
        for stmt in &mut func.body {
            self.check_stmt(stmt)?;
        }
        self.scopes.close()?;
        self.expected_return = None;
        self.loop_depth = outer_loops;

        if !self.found_return {
            return Err(SemanticError::NoReturn {
                name: func.name.clone(),
            });
        }
        Ok(())
    }

    fn variable(&self, name: &str) -> Result<Type, SemanticError> {
        match self.scopes.lookup(name)? {
            Binding::Var(ty) => Ok(ty.clone()),
            Binding::Func(_) => Err(SemanticError::NotVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Narrow `base` through each projection, annotating every step.
    fn walk_chain(&mut self, base: Type, chain: &mut [Lookup]) -> Result<Type, SemanticError> {
        let mut current = base;
        for step in chain {
            let next = match step {
                Lookup::Field { name, ty } => {
                    let st = current
                        .as_struct()
                        .ok_or_else(|| SemanticError::NotStruct {
                            found: current.clone(),
                        })?;
                    let next = st.field_type(name)?.clone();
                    *ty = Some(next.clone());
                    next
                }
                Lookup::Index { index, ty } => {
                    let pointer = current
                        .as_pointer()
                        .ok_or_else(|| SemanticError::NotIndexable {
                            found: current.clone(),
                        })?;
                    let next = (*pointer.pointee).clone();
                    let index_ty = self.check_expr(index)?;
                    expect(&Type::int(), &index_ty)?;
                    *ty = Some(next.clone());
                    next
                }
            };
            current = next;
        }
        Ok(current)
    }

    pub fn check_expr(&mut self, expr: &mut Expr) -> Result<Type, SemanticError> {
        let ty = match &mut expr.kind {
            ExprKind::Literal(value) => match value {
                Value::Int(_) | Value::Bool(_) => Type::int(),
                Value::Char(_) => Type::char(),
                Value::Str(s) => Type::array(Type::char(), s.chars().count()),
            },
            ExprKind::Binary { op, left, right } => {
                let left = self.check_expr(left)?;
                let right = self.check_expr(right)?;
                self.binary_type(*op, left, right)?
            }
            ExprKind::Get { name, chain } => {
                let base = self.variable(name)?;
                self.walk_chain(base, chain)?
            }
            ExprKind::AddressOf { name, chain } => {
                let base = self.variable(name)?;
                Type::pointer(self.walk_chain(base, chain)?)
            }
            ExprKind::Deref(inner) => {
                match self.check_expr(inner)? {
                    Type::Pointer(p) if p.count == 0 => *p.pointee,
                    found => return Err(SemanticError::NotPointer { found }),
                }
            }
            ExprKind::StructLit(fields) => {
                if fields.is_empty() {
                    return Err(SemanticError::EmptyStruct);
                }
                let types = fields
                    .iter_mut()
                    .map(|f| self.check_expr(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Type::Struct(StructType::anonymous(types))
            }
            ExprKind::ArrayLit(elements) => {
                let mut element_ty: Option<Type> = None;
                for element in elements.iter_mut() {
                    let found = self.check_expr(element)?;
                    match &element_ty {
                        Some(expected) => expect(expected, &found)?,
                        None => element_ty = Some(found),
                    }
                }
                match element_ty {
                    Some(ty) => Type::array(ty, elements.len()),
                    None => Type::pointer(Type::void()),
                }
            }
            ExprKind::Call { name, args } => {
                let signature = match self.scopes.lookup(name)? {
                    Binding::Func(sig) => sig.clone(),
                    Binding::Var(_) => {
                        return Err(SemanticError::NotFunction { name: name.clone() });
                    }
                };
                if signature.params.len() != args.len() {
                    return Err(SemanticError::ArityMismatch {
                        name: name.clone(),
                        expected: signature.params.len(),
                        found: args.len(),
                    });
                }
                for (param, arg) in signature.params.iter().zip(args.iter_mut()) {
                    let found = self.check_expr(arg)?;
                    expect(param, &found)?;
                }
                signature.ret
            }
        };
        expr.ty = Some(ty.clone());
        Ok(ty)
    }

    fn binary_type(&self, op: BinOp, left: Type, right: Type) -> Result<Type, SemanticError> {
        if matches!(op, BinOp::Add | BinOp::Sub) && left.is_plain_pointer() && right.is_int() {
            return Ok(left);
        }
        if left != right || !left.is_scalar() {
            return Err(SemanticError::BadOperands { op, left, right });
        }
        Ok(if op.is_boolean() { Type::int() } else { left })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::TypeRegistry;

    fn check(body: Vec<Stmt>) -> Result<Vec<Stmt>, SemanticError> {
        let mut program = Program::new(TypeRegistry::new(), body);
        check_program(&mut program)?;
        Ok(program.body)
    }

    fn add(l: Expr, r: Expr) -> Expr {
        Expr::binary(BinOp::Add, l, r)
    }

    #[test]
    fn int_plus_string_rejected() {
        let err = check(vec![Stmt::Debug(add(Expr::int(1), Expr::str("x")))]).unwrap_err();
        assert!(matches!(err, SemanticError::BadOperands { op: BinOp::Add, .. }));
    }

    #[test]
    fn return_type_must_match() {
        let err = check(vec![Stmt::function(
            "f",
            vec![],
            Type::char(),
            vec![Stmt::Return(Expr::int(1))],
        )])
        .unwrap_err();
        assert_eq!(
            err,
            SemanticError::TypeMismatch {
                expected: Type::char(),
                found: Type::int()
            }
        );
    }

    #[test]
    fn function_without_return_rejected() {
        let err = check(vec![Stmt::function(
            "f",
            vec![("x", Type::int())],
            Type::int(),
            vec![Stmt::Debug(Expr::var("x"))],
        )])
        .unwrap_err();
        assert_eq!(err, SemanticError::NoReturn { name: "f".into() });
    }

    #[test]
    fn return_inside_branch_counts() {
        let body = vec![Stmt::if_else(
            Expr::var("x"),
            Stmt::Block(vec![Stmt::Return(Expr::int(1))]),
            None,
        )];
        assert!(check(vec![Stmt::function("f", vec![("x", Type::int())], Type::int(), body)]).is_ok());
    }

    #[test]
    fn recursive_call_resolves() {
        let body = vec![Stmt::Return(Expr::call("f", vec![Expr::var("x")]))];
        assert!(check(vec![Stmt::function("f", vec![("x", Type::int())], Type::int(), body)]).is_ok());
    }

    #[test]
    fn nested_function_rejected() {
        let inner = Stmt::function("g", vec![], Type::int(), vec![Stmt::Return(Expr::int(0))]);
        let outer = Stmt::function("f", vec![], Type::int(), vec![inner, Stmt::Return(Expr::int(0))]);
        assert_eq!(
            check(vec![outer]).unwrap_err(),
            SemanticError::NestedFunction { name: "g".into() }
        );
    }

    #[test]
    fn calls_check_arity_and_arguments() {
        let decl = Stmt::function(
            "f",
            vec![("c", Type::char())],
            Type::int(),
            vec![Stmt::Return(Expr::int(0))],
        );
        let err = check(vec![decl.clone(), Stmt::Expr(Expr::call("f", vec![]))]).unwrap_err();
        assert!(matches!(err, SemanticError::ArityMismatch { expected: 1, found: 0, .. }));
        let err = check(vec![decl, Stmt::Expr(Expr::call("f", vec![Expr::int(1)]))]).unwrap_err();
        assert!(matches!(err, SemanticError::TypeMismatch { .. }));
    }

    #[test]
    fn chains_are_annotated() {
        let mut reg = TypeRegistry::new();
        let s = reg
            .declare_struct("S", [("a", Type::int()), ("b", Type::array(Type::char(), 2))])
            .unwrap();
        let mut program = Program::new(
            reg,
            vec![
                Stmt::declare("v", s, None),
                Stmt::Debug(Expr::get(
                    "v",
                    vec![Lookup::field("b"), Lookup::index(Expr::int(1))],
                )),
            ],
        );
        check_program(&mut program).unwrap();
        let Stmt::Debug(expr) = &program.body[1] else {
            panic!("expected debug");
        };
        assert_eq!(expr.ty, Some(Type::char()));
        let ExprKind::Get { chain, .. } = &expr.kind else {
            panic!("expected get");
        };
        assert_eq!(chain[0].ty(), Some(&Type::array(Type::char(), 2)));
        assert_eq!(chain[1].ty(), Some(&Type::char()));
    }

    #[test]
    fn bad_lookups_rejected() {
        let err = check(vec![
            Stmt::declare("x", Type::int(), None),
            Stmt::Debug(Expr::get("x", vec![Lookup::field("a")])),
        ])
        .unwrap_err();
        assert!(matches!(err, SemanticError::NotStruct { .. }));

        let err = check(vec![
            Stmt::declare("x", Type::array(Type::int(), 2), None),
            Stmt::Debug(Expr::get("x", vec![Lookup::index(Expr::char('a'))])),
        ])
        .unwrap_err();
        assert!(matches!(err, SemanticError::TypeMismatch { .. }));
    }

    #[test]
    fn array_literals_need_one_element_type() {
        let err = check(vec![Stmt::Expr(Expr::array_lit(vec![
            Expr::int(1),
            Expr::char('a'),
        ]))])
        .unwrap_err();
        assert!(matches!(err, SemanticError::TypeMismatch { .. }));
        let body = check(vec![Stmt::Expr(Expr::array_lit(vec![]))]).unwrap();
        let Stmt::Expr(expr) = &body[0] else {
            panic!("expected expression");
        };
        assert_eq!(expr.ty, Some(Type::pointer(Type::void())));
    }

    #[test]
    fn pointers_from_address_of() {
        let body = check(vec![
            Stmt::declare("x", Type::int(), Some(Expr::int(3))),
            Stmt::declare("p", Type::pointer(Type::int()), Some(Expr::address_of("x", vec![]))),
            Stmt::Debug(Expr::deref(add(Expr::var("p"), Expr::int(0)))),
        ]);
        assert!(body.is_ok());
        let err = check(vec![Stmt::Debug(Expr::deref(Expr::int(1)))]).unwrap_err();
        assert_eq!(err, SemanticError::NotPointer { found: Type::int() });
    }

    #[test]
    fn shadowing_and_duplicates() {
        assert!(check(vec![
            Stmt::declare("a", Type::int(), Some(Expr::int(1))),
            Stmt::Block(vec![Stmt::declare("a", Type::char(), Some(Expr::char('x')))]),
            Stmt::Debug(Expr::var("a")),
        ])
        .is_ok());
        let err = check(vec![
            Stmt::declare("a", Type::int(), None),
            Stmt::declare("a", Type::int(), None),
        ])
        .unwrap_err();
        assert!(matches!(err, SemanticError::Scope(ScopeError::AlreadyBound { .. })));
        let err = check(vec![
            Stmt::Block(vec![Stmt::declare("b", Type::int(), None)]),
            Stmt::Debug(Expr::var("b")),
        ])
        .unwrap_err();
        assert!(matches!(err, SemanticError::Scope(ScopeError::Missing { .. })));
    }

    #[test]
    fn control_flow_placement() {
        assert_eq!(
            check(vec![Stmt::Break]).unwrap_err(),
            SemanticError::OutsideLoop { keyword: "break" }
        );
        assert_eq!(
            check(vec![Stmt::Return(Expr::int(0))]).unwrap_err(),
            SemanticError::ReturnOutsideFunction
        );
        assert!(check(vec![Stmt::while_loop(Expr::int(0), Stmt::Continue)]).is_ok());
        let err = check(vec![Stmt::while_loop(Expr::char('a'), Stmt::Break)]).unwrap_err();
        assert!(matches!(err, SemanticError::TypeMismatch { .. }));
    }

    #[test]
    fn debug_needs_one_word() {
        let err = check(vec![Stmt::Debug(Expr::struct_lit(vec![
            Expr::int(1),
            Expr::int(2),
        ]))])
        .unwrap_err();
        assert!(matches!(err, SemanticError::NotScalar { .. }));
    }
}
