use std::mem;

use thiserror::Error;
use tracing::debug;

use super::scope::{ScopeChain, ScopeError};
use super::stack::{StackError, StackManager};
use super::types::{Type, TypeModelError, WORD_BYTES};
use super::{BinOp, Expr, ExprKind, Function, Lookup, Program, Stmt, Value};
use crate::machine::{Fixup, Instruction, Instructions, Opcode, Reg};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("missing type annotation on {what}")]
    Untyped { what: &'static str },
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("'{name}' is not a variable")]
    NotVariable { name: String },
    #[error("invalid lookup into {found}")]
    BadLookup { found: Type },
    #[error("'{keyword}' outside of a loop")]
    OutsideLoop { keyword: &'static str },
    #[error("return outside of a function")]
    ReturnOutsideFunction,
    #[error("function '{name}' declared inside another function")]
    NestedFunction { name: String },
    #[error("unresolved {fixup:?} jump at instruction {index}")]
    Unresolved { fixup: Fixup, index: usize },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error(transparent)]
    TypeModel(#[from] TypeModelError),
}

/// Where a slot's word offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base {
    /// Top-level storage: byte address `4 * offset`.
    Absolute,
    /// Function-local storage, addressed relative to `sp`.
    Frame,
}

#[derive(Debug, Clone)]
struct Slot {
    ty: Type,
    offset: i64,
    base: Base,
}

#[derive(Debug, Clone)]
enum Symbol {
    Var(Slot),
    Func { address: i32, params: usize },
}

fn bytes(words: i64) -> i32 {
    (words * i64::from(WORD_BYTES)) as i32
}

fn push_reg(reg: Reg) -> Instructions {
    vec![
        Instruction::sw(Reg::SP, reg, 0),
        Instruction::addi(Reg::SP, Reg::SP, WORD_BYTES),
    ]
    .into()
}

fn pop_reg(reg: Reg) -> Instructions {
    vec![
        Instruction::addi(Reg::SP, Reg::SP, -WORD_BYTES),
        Instruction::lw(reg, Reg::SP, 0),
    ]
    .into()
}

fn push_imm(value: i32) -> Instructions {
    Instructions::from(vec![Instruction::addi(Reg::T0, Reg::ZERO, value)]) + push_reg(Reg::T0)
}

/// `sp += delta` words; nothing for a zero delta.
fn move_sp(words: i64) -> Instructions {
    if words == 0 {
        return Instructions::new();
    }
    vec![Instruction::addi(Reg::SP, Reg::SP, bytes(words))].into()
}

/// Copy `words` words starting at the address in `src` onto the stack.
fn copy_to_stack(src: Reg, words: usize) -> Instructions {
    let mut code = Instructions::new();
    for k in 0..words {
        code += Instruction::lw(Reg::T1, src, bytes(k as i64));
        code += Instruction::sw(Reg::SP, Reg::T1, bytes(k as i64));
    }
    code + move_sp(words as i64)
}

fn ty_of(expr: &Expr) -> Result<&Type, CodegenError> {
    expr.ty
        .as_ref()
        .ok_or(CodegenError::Untyped { what: "expression" })
}

fn literal_words(value: &Value) -> Vec<i32> {
    match value {
        Value::Int(n) => vec![*n],
        Value::Bool(b) => vec![i32::from(*b)],
        Value::Char(c) => vec![*c as i32],
        Value::Str(s) if s.is_empty() => vec![0],
        Value::Str(s) => s.chars().map(|c| c as i32).collect(),
    }
}

fn binary_op(op: BinOp) -> Instructions {
    use Instruction as I;
    let (t0, t1, zero) = (Reg::T0, Reg::T1, Reg::ZERO);
    let code = match op {
        BinOp::Add => vec![I::add(t0, t0, t1)],
        BinOp::Sub => vec![I::sub(t0, t0, t1)],
        BinOp::Mul => vec![I::mul(t0, t0, t1)],
        BinOp::Div => vec![I::r(Opcode::Div, t0, t0, t1)],
        BinOp::Eq => vec![
            I::r(Opcode::Xor, t0, t0, t1),
            I::i(Opcode::Sltiu, t0, t0, 1),
        ],
        BinOp::Neq => vec![
            I::r(Opcode::Xor, t0, t0, t1),
            I::r(Opcode::Sltu, t0, zero, t0),
        ],
        BinOp::Gt => vec![I::sub(t0, t0, t1), I::r(Opcode::Slt, t0, zero, t0)],
        BinOp::Lt => vec![I::sub(t0, t1, t0), I::r(Opcode::Slt, t0, zero, t0)],
        BinOp::Ge => vec![
            I::sub(t0, t1, t0),
            I::addi(t1, zero, 1),
            I::r(Opcode::Slt, t0, t0, t1),
        ],
        BinOp::Le => vec![
            I::sub(t0, t0, t1),
            I::addi(t1, zero, 1),
            I::r(Opcode::Slt, t0, t0, t1),
        ],
        BinOp::Or => vec![
            I::r(Opcode::Or, t0, t0, t1),
            I::r(Opcode::Sltu, t0, zero, t0),
        ],
        BinOp::And => vec![
            I::r(Opcode::And, t0, t0, t1),
            I::r(Opcode::Sltu, t0, zero, t0),
        ],
    };
    code.into()
}

/// Lowers a typechecked tree to a flat instruction stream.
///
/// Every emitted push or pop of `sp` is mirrored on a [`StackManager`], so
/// each variable's position relative to the stack top is known statically.
/// Each compiled expression leaves exactly one entry on the tracker.
///
/// Program layout: a jump over all function bodies, the bodies, then the
/// top-level statements and a final `stop`. Function entries therefore have
/// fixed byte addresses and are called with an absolute `jalr`.
#[derive(Debug, Default)]
pub struct Compiler {
    scopes: ScopeChain<Symbol>,
    stack: StackManager,
    functions: Instructions,
    /// Tracker offsets at the start of each enclosing loop body.
    loops: Vec<i64>,
    /// Tracker offset right after the current function's prologue.
    frame_entry: Option<i64>,
}

pub fn compile_program(program: &Program) -> Result<Instructions, CodegenError> {
    Compiler::new().compile_program(program)
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_program(mut self, program: &Program) -> Result<Instructions, CodegenError> {
        let mut main = Instructions::new();
        for stmt in &program.body {
            main += self.compile_stmt(stmt)?;
        }
        let functions = mem::take(&mut self.functions);
        let skip = Instruction::jal(Reg::ZERO, functions.span() + 1).with_comment("skip functions");
        let code = Instructions::from(vec![skip]) + functions + main + Instruction::stop();
        if let Some((index, fixup)) = code.first_pending() {
            return Err(CodegenError::Unresolved { fixup, index });
        }
        debug!(instructions = code.len(), "compiled program");
        Ok(code)
    }

    fn var(&self, name: &str) -> Result<Slot, CodegenError> {
        match self.scopes.lookup(name)? {
            Symbol::Var(slot) => Ok(slot.clone()),
            Symbol::Func { .. } => Err(CodegenError::NotVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Run `f` inside a fresh scope and free whatever it left on the stack.
    fn scoped<F>(&mut self, f: F) -> Result<Instructions, CodegenError>
    where
        F: FnOnce(&mut Self) -> Result<Instructions, CodegenError>,
    {
        self.scopes.open();
        let start = self.stack.current();
        let code = f(self)?;
        let freed = self.stack.pop_until(start)?;
        self.scopes.close()?;
        Ok(code + move_sp(-(freed as i64)))
    }

    fn compile_scoped(&mut self, stmt: &Stmt) -> Result<Instructions, CodegenError> {
        self.scoped(|this| this.compile_stmt(stmt))
    }

    pub fn compile_stmt(&mut self, stmt: &Stmt) -> Result<Instructions, CodegenError> {
        match stmt {
            Stmt::Declare { name, ty, init } => {
                let offset = self.stack.current();
                let code = match init {
                    Some(init) => self.compile_expr(init)?,
                    None => {
                        let words = ty.alloc_words();
                        let zeros: Instructions = (0..words)
                            .map(|k| Instruction::sw(Reg::SP, Reg::ZERO, bytes(k as i64)))
                            .collect();
                        zeros + move_sp(words as i64)
                    }
                };
                self.stack.pop_until(offset)?;
                self.stack.push(ty);
                let base = if self.frame_entry.is_some() {
                    Base::Frame
                } else {
                    Base::Absolute
                };
                self.scopes.bind(
                    name,
                    Symbol::Var(Slot {
                        ty: ty.clone(),
                        offset,
                        base,
                    }),
                )?;
                Ok(code.comment_first(format!("declare {name}")))
            }
            Stmt::Set { name, chain, value } => {
                let words = ty_of(value)?.words();
                let mut code = self.compile_expr(value)?;
                let (addr, base) = self.address(name, chain)?;
                code += addr;
                code += pop_reg(Reg::T0);
                self.stack.pop()?;
                code += Instruction::add(Reg::T0, Reg::T0, base);
                let top = bytes(words as i64);
                for k in 0..words {
                    let at = bytes(k as i64);
                    code += Instruction::lw(Reg::T1, Reg::SP, at - top);
                    code += Instruction::sw(Reg::T0, Reg::T1, at);
                }
                code += move_sp(-(words as i64));
                self.stack.pop()?;
                Ok(code.comment_first(format!("set {name}")))
            }
            Stmt::Debug(expr) => {
                let code = self.compile_expr(expr)? + Instruction::debug();
                self.stack.pop()?;
                Ok(code)
            }
            Stmt::Expr(expr) => {
                let code = self.compile_expr(expr)?;
                let words = self.stack.pop()?;
                Ok(code + move_sp(-(words as i64)))
            }
            Stmt::Block(stmts) => self.scoped(|this| {
                let mut code = Instructions::new();
                for stmt in stmts {
                    code += this.compile_stmt(stmt)?;
                }
                Ok(code)
            }),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let mut code = self.compile_expr(cond)? + pop_reg(Reg::T0);
                self.stack.pop()?;
                let mut then = self.compile_scoped(then)?;
                let otherwise = match otherwise {
                    Some(stmt) => {
                        let otherwise = self.compile_scoped(stmt)?;
                        then += Instruction::jal(Reg::ZERO, otherwise.span() + 1);
                        otherwise
                    }
                    None => Instructions::new(),
                };
                code += Instruction::beq(Reg::T0, Reg::ZERO, then.span() + 1);
                Ok(code + then + otherwise)
            }
            Stmt::While { cond, body, step } => self.compile_while(cond, body, step.as_deref()),
            Stmt::Function(func) => {
                self.compile_function(func)?;
                Ok(Instructions::new())
            }
            Stmt::Return(expr) => {
                let entry = self.frame_entry.ok_or(CodegenError::ReturnOutsideFunction)?;
                let words = ty_of(expr)?.words();
                let mut code = self.compile_expr(expr)?;
                code += Instruction::addi(Reg::FP, Reg::SP, -bytes(words as i64));
                code += move_sp(entry - self.stack.current());
                code += Instruction::pending_jump(Fixup::Return);
                self.stack.pop()?;
                Ok(code.comment_first("return"))
            }
            Stmt::Break => self.loop_exit("break", Fixup::Break),
            Stmt::Continue => self.loop_exit("continue", Fixup::Continue),
            Stmt::Unreachable => Ok(vec![Instruction::raise_error()].into()),
        }
    }

    fn loop_exit(&mut self, keyword: &'static str, fixup: Fixup) -> Result<Instructions, CodegenError> {
        let start = *self
            .loops
            .last()
            .ok_or(CodegenError::OutsideLoop { keyword })?;
        Ok(move_sp(start - self.stack.current()) + Instruction::pending_jump(fixup))
    }

    /// `cond; beq t0 zero end; body; step; jal cond; end:`
    fn compile_while(
        &mut self,
        cond: &Expr,
        body: &Stmt,
        step: Option<&Stmt>,
    ) -> Result<Instructions, CodegenError> {
        let start = self.stack.current();
        let cond = self.compile_expr(cond)? + pop_reg(Reg::T0);
        self.stack.pop()?;

        self.loops.push(start);
        let body = self.compile_scoped(body)?;
        let step = match step {
            Some(step) => self.compile_scoped(step)?,
            None => Instructions::new(),
        };
        self.loops.pop();

        let continue_at = if step.is_empty() {
            0
        } else {
            cond.len() + 1 + body.len()
        };
        let looped = body.span() + step.span();
        let back = -(cond.span() + 1 + looped);
        let mut code = cond
            + Instruction::beq(Reg::T0, Reg::ZERO, looped + 2)
            + body
            + step
            + Instruction::jal(Reg::ZERO, back);
        let end = code.len();
        code.patch(Fixup::Break, end);
        code.patch(Fixup::Continue, continue_at);
        Ok(code.comment_first("while"))
    }

    fn compile_function(&mut self, func: &Function) -> Result<(), CodegenError> {
        if self.frame_entry.is_some() {
            return Err(CodegenError::NestedFunction {
                name: func.name.clone(),
            });
        }
        let address = bytes(self.functions.len() as i64 + 1);
        self.scopes.bind(
            &func.name,
            Symbol::Func {
                address,
                params: func.params.len(),
            },
        )?;

        let outer_stack = mem::take(&mut self.stack);
        let outer_loops = mem::take(&mut self.loops);
        self.scopes.open();

        // Arguments sit just below the callee's stack top, last one highest.
        let param_words: usize = func.params.iter().map(|(_, ty)| ty.words()).sum();
        let mut offset = -(param_words as i64);
        for (name, ty) in &func.params {
            let slot = Slot {
                ty: ty.clone(),
                offset,
                base: Base::Frame,
            };
            self.scopes.bind(name, Symbol::Var(slot))?;
            offset += ty.words() as i64;
        }

        let mut code = push_reg(Reg::RA);
        self.stack.push(&Type::int());
        self.frame_entry = Some(self.stack.current());
        for stmt in &func.body {
            code += self.compile_stmt(stmt)?;
        }
        code += Instruction::raise_error().with_comment("missing return");

        let epilogue = code.len();
        let ret_words = func.ret.words();
        code += pop_reg(Reg::RA).comment_first("epilogue");
        code += move_sp(-(param_words as i64));
        code += copy_to_stack(Reg::FP, ret_words);
        code += Instruction::jalr(Reg::ZERO, Reg::RA, 0);
        code.patch(Fixup::Return, epilogue);

        self.scopes.close()?;
        self.stack = outer_stack;
        self.loops = outer_loops;
        self.frame_entry = None;

        debug!(function = %func.name, address, instructions = code.len(), "compiled function");
        self.functions += code.comment_first(format!("fn {}", func.name));
        Ok(())
    }

    /// Push the address of `name` followed by `chain`. The returned register
    /// must be added to the popped value to form an absolute byte address.
    fn address(&mut self, name: &str, chain: &[Lookup]) -> Result<(Instructions, Reg), CodegenError> {
        let slot = self.var(name)?;
        let (mut code, mut base) = match slot.base {
            Base::Absolute => (push_imm(bytes(slot.offset)), Reg::ZERO),
            Base::Frame => (push_imm(bytes(slot.offset - self.stack.current())), Reg::SP),
        };
        self.stack.push(&Type::int());

        let mut current = slot.ty;
        for step in chain {
            let next = step
                .ty()
                .cloned()
                .ok_or(CodegenError::Untyped { what: "lookup" })?;
            match step {
                Lookup::Field { name, .. } => {
                    let st = current.as_struct().ok_or_else(|| CodegenError::BadLookup {
                        found: current.clone(),
                    })?;
                    let offset = st.field_offset(name)?;
                    if offset > 0 {
                        code += pop_reg(Reg::T0);
                        code += Instruction::addi(Reg::T0, Reg::T0, bytes(offset as i64));
                        code += push_reg(Reg::T0);
                    }
                }
                Lookup::Index { index, .. } => {
                    let pointer = current.as_pointer().ok_or_else(|| CodegenError::BadLookup {
                        found: current.clone(),
                    })?;
                    if pointer.count == 0 {
                        // Follow the pointer; the result is already absolute.
                        code += pop_reg(Reg::T0);
                        code += Instruction::add(Reg::T0, Reg::T0, base);
                        code += Instruction::lw(Reg::T0, Reg::T0, 0);
                        code += push_reg(Reg::T0);
                        base = Reg::ZERO;
                    }
                    let element = bytes(pointer.pointee.words() as i64);
                    code += self.compile_expr(index)?;
                    code += pop_reg(Reg::T1);
                    code += pop_reg(Reg::T0);
                    self.stack.pop_items(2)?;
                    code += Instruction::addi(Reg::T2, Reg::ZERO, element);
                    code += Instruction::mul(Reg::T1, Reg::T1, Reg::T2);
                    code += Instruction::add(Reg::T0, Reg::T0, Reg::T1);
                    code += push_reg(Reg::T0);
                    self.stack.push(&Type::int());
                }
            }
            current = next;
        }
        Ok((code, base))
    }

    pub fn compile_expr(&mut self, expr: &Expr) -> Result<Instructions, CodegenError> {
        let ty = ty_of(expr)?.clone();
        let code = match &expr.kind {
            ExprKind::Literal(value) => literal_words(value)
                .into_iter()
                .fold(Instructions::new(), |code, word| code + push_imm(word)),
            ExprKind::Binary { op, left, right } => {
                // pointer +/- int moves by whole pointees
                let stride = match ty_of(left)?.as_pointer() {
                    Some(p) if p.count == 0 && matches!(op, BinOp::Add | BinOp::Sub) => {
                        ty_of(right)?.is_int().then(|| p.pointee.words())
                    }
                    _ => None,
                };
                let mut code = self.compile_expr(left)?;
                code += self.compile_expr(right)?;
                code += pop_reg(Reg::T1);
                code += pop_reg(Reg::T0);
                self.stack.pop_items(2)?;
                if let Some(words) = stride {
                    code += Instruction::addi(Reg::T2, Reg::ZERO, bytes(words as i64));
                    code += Instruction::mul(Reg::T1, Reg::T1, Reg::T2);
                }
                code + binary_op(*op) + push_reg(Reg::T0)
            }
            ExprKind::Get { name, chain } => {
                let (mut code, base) = self.address(name, chain)?;
                code += pop_reg(Reg::T0);
                self.stack.pop()?;
                code += Instruction::add(Reg::T0, Reg::T0, base);
                code + copy_to_stack(Reg::T0, ty.words())
            }
            ExprKind::AddressOf { name, chain } => {
                let (mut code, base) = self.address(name, chain)?;
                if base != Reg::ZERO {
                    code += pop_reg(Reg::T0);
                    code += Instruction::add(Reg::T0, Reg::T0, base);
                    code += push_reg(Reg::T0);
                }
                self.stack.pop()?;
                code
            }
            ExprKind::Deref(inner) => {
                let mut code = self.compile_expr(inner)?;
                code += pop_reg(Reg::T0);
                self.stack.pop()?;
                code + copy_to_stack(Reg::T0, ty.words())
            }
            ExprKind::StructLit(items) | ExprKind::ArrayLit(items) => {
                let start = self.stack.current();
                let mut code = Instructions::new();
                for item in items {
                    code += self.compile_expr(item)?;
                }
                self.stack.pop_until(start)?;
                if items.is_empty() {
                    code += push_imm(0);
                }
                code
            }
            ExprKind::Call { name, args } => {
                let (address, params) = match self.scopes.lookup(name) {
                    Ok(Symbol::Func { address, params }) => (*address, *params),
                    _ => {
                        return Err(CodegenError::UnknownFunction { name: name.clone() });
                    }
                };
                let mut code = Instructions::new();
                for arg in args {
                    code += self.compile_expr(arg)?;
                }
                self.stack.pop_items(params)?;
                code + Instruction::jalr(Reg::RA, Reg::ZERO, address).with_comment(format!("call {name}"))
            }
        };
        self.stack.push(&ty);
        Ok(code)
    }
}
