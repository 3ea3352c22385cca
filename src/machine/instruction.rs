use std::ops::{Add, AddAssign, Index};
use std::str::FromStr;

use thiserror::Error;

use super::binary::Binary;

/// Width of one encoded instruction in bytes; `pc` advances by this much.
pub const INSTRUCTION_BYTES: u32 = 4;

/// One of the 32 general purpose registers. `x0` always reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

pub const REG_COUNT: usize = 32;

impl Reg {
    pub const ZERO: Reg = Reg(0);
    pub const RA: Reg = Reg(1);
    pub const SP: Reg = Reg(2);
    pub const GP: Reg = Reg(3);
    pub const TP: Reg = Reg(4);
    pub const T0: Reg = Reg(5);
    pub const T1: Reg = Reg(6);
    pub const T2: Reg = Reg(7);
    pub const S0: Reg = Reg(8);
    /// Frame-base register, an alias of `s0`.
    pub const FP: Reg = Reg(8);
    pub const S1: Reg = Reg(9);
    pub const A0: Reg = Reg(10);
    pub const A1: Reg = Reg(11);

    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < REG_COUNT).then_some(Reg(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// ABI name used when printing.
    pub fn abi_name(self) -> &'static str {
        REG_NAMES
            .iter()
            .find(|(_, idx)| *idx == self.0)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }
}

// First entry per index is the canonical ABI name.
const REG_NAMES: &[(&str, u8)] = &[
    ("zero", 0),
    ("ra", 1),
    ("sp", 2),
    ("gp", 3),
    ("tp", 4),
    ("t0", 5),
    ("t1", 6),
    ("t2", 7),
    ("s0", 8),
    ("fp", 8),
    ("s1", 9),
    ("a0", 10),
    ("a1", 11),
    ("a2", 12),
    ("a3", 13),
    ("a4", 14),
    ("a5", 15),
    ("a6", 16),
    ("a7", 17),
    ("s2", 18),
    ("s3", 19),
    ("s4", 20),
    ("s5", 21),
    ("s6", 22),
    ("s7", 23),
    ("s8", 24),
    ("s9", 25),
    ("s10", 26),
    ("s11", 27),
    ("t3", 28),
    ("t4", 29),
    ("t5", 30),
    ("t6", 31),
];

impl FromStr for Reg {
    type Err = AsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_ascii_lowercase();
        if let Some(&(_, idx)) = REG_NAMES.iter().find(|(n, _)| *n == name) {
            return Ok(Reg(idx));
        }
        name.strip_prefix('x')
            .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u8>().ok())
            .and_then(Reg::new)
            .ok_or_else(|| AsmError::BadRegister(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Xor,
    Or,
    And,
    Mul,
    Div,
    Slt,
    Sltu,
    Addi,
    Slti,
    Sltiu,
    Lw,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Jal,
    Sw,
    Stop,
    Debug,
    RaiseError,
}

/// Operand layout shared by a group of opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    R,
    I,
    B,
    J,
    S,
    Pseudo,
}

impl Opcode {
    pub fn format(self) -> Format {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Xor
            | Opcode::Or
            | Opcode::And
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Slt
            | Opcode::Sltu => Format::R,
            Opcode::Addi | Opcode::Slti | Opcode::Sltiu | Opcode::Lw | Opcode::Jalr => Format::I,
            Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Bge => Format::B,
            Opcode::Jal => Format::J,
            Opcode::Sw => Format::S,
            Opcode::Stop | Opcode::Debug | Opcode::RaiseError => Format::Pseudo,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Xor => "xor",
            Opcode::Or => "or",
            Opcode::And => "and",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Slt => "slt",
            Opcode::Sltu => "sltu",
            Opcode::Addi => "addi",
            Opcode::Slti => "slti",
            Opcode::Sltiu => "sltiu",
            Opcode::Lw => "lw",
            Opcode::Jalr => "jalr",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Blt => "blt",
            Opcode::Bge => "bge",
            Opcode::Jal => "jal",
            Opcode::Sw => "sw",
            Opcode::Stop => "stop",
            Opcode::Debug => "debug",
            Opcode::RaiseError => "raiseerror",
        }
    }
}

impl FromStr for Opcode {
    type Err = AsmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let opcode = match s.to_ascii_lowercase().as_str() {
            "add" => Opcode::Add,
            "sub" => Opcode::Sub,
            "xor" => Opcode::Xor,
            "or" => Opcode::Or,
            "and" => Opcode::And,
            "mul" => Opcode::Mul,
            "div" => Opcode::Div,
            "slt" => Opcode::Slt,
            "sltu" => Opcode::Sltu,
            "addi" => Opcode::Addi,
            "slti" => Opcode::Slti,
            "sltiu" => Opcode::Sltiu,
            "lw" => Opcode::Lw,
            "jalr" => Opcode::Jalr,
            "beq" => Opcode::Beq,
            "bne" => Opcode::Bne,
            "blt" => Opcode::Blt,
            "bge" => Opcode::Bge,
            "jal" => Opcode::Jal,
            "sw" => Opcode::Sw,
            "stop" => Opcode::Stop,
            "debug" => Opcode::Debug,
            "raiseerror" => Opcode::RaiseError,
            _ => return Err(AsmError::UnknownOpcode(s.to_string())),
        };
        Ok(opcode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    R { rd: Reg, rs1: Reg, rs2: Reg },
    I { rd: Reg, rs1: Reg, imm: Binary },
    /// `offset` is the net displacement in instructions from the branch itself.
    B { rs1: Reg, rs2: Reg, offset: i32 },
    J { rd: Reg, offset: i32 },
    /// `sw base src imm` stores `src` at `base + imm`.
    S { base: Reg, src: Reg, imm: Binary },
    None,
}

/// Jump targets that are not known when the jump is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fixup {
    /// Jump to the enclosing function's epilogue.
    Return,
    /// Jump past the innermost loop.
    Break,
    /// Jump to the innermost loop's step or condition.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Operands,
    pub comment: Option<String>,
    /// Set on placeholder jumps until their offset has been patched.
    pub fixup: Option<Fixup>,
}

impl Instruction {
    fn new(opcode: Opcode, operands: Operands) -> Self {
        Instruction {
            opcode,
            operands,
            comment: None,
            fixup: None,
        }
    }

    pub fn r(opcode: Opcode, rd: Reg, rs1: Reg, rs2: Reg) -> Self {
        debug_assert_eq!(opcode.format(), Format::R);
        Self::new(opcode, Operands::R { rd, rs1, rs2 })
    }

    pub fn i(opcode: Opcode, rd: Reg, rs1: Reg, imm: impl Into<Binary>) -> Self {
        debug_assert_eq!(opcode.format(), Format::I);
        Self::new(
            opcode,
            Operands::I {
                rd,
                rs1,
                imm: imm.into(),
            },
        )
    }

    pub fn b(opcode: Opcode, rs1: Reg, rs2: Reg, offset: i32) -> Self {
        debug_assert_eq!(opcode.format(), Format::B);
        Self::new(opcode, Operands::B { rs1, rs2, offset })
    }

    pub fn add(rd: Reg, rs1: Reg, rs2: Reg) -> Self {
        Self::r(Opcode::Add, rd, rs1, rs2)
    }

    pub fn sub(rd: Reg, rs1: Reg, rs2: Reg) -> Self {
        Self::r(Opcode::Sub, rd, rs1, rs2)
    }

    pub fn mul(rd: Reg, rs1: Reg, rs2: Reg) -> Self {
        Self::r(Opcode::Mul, rd, rs1, rs2)
    }

    pub fn addi(rd: Reg, rs1: Reg, imm: impl Into<Binary>) -> Self {
        Self::i(Opcode::Addi, rd, rs1, imm)
    }

    pub fn lw(rd: Reg, base: Reg, imm: impl Into<Binary>) -> Self {
        Self::i(Opcode::Lw, rd, base, imm)
    }

    pub fn sw(base: Reg, src: Reg, imm: impl Into<Binary>) -> Self {
        Self::new(
            Opcode::Sw,
            Operands::S {
                base,
                src,
                imm: imm.into(),
            },
        )
    }

    pub fn jalr(rd: Reg, rs1: Reg, imm: impl Into<Binary>) -> Self {
        Self::i(Opcode::Jalr, rd, rs1, imm)
    }

    pub fn beq(rs1: Reg, rs2: Reg, offset: i32) -> Self {
        Self::b(Opcode::Beq, rs1, rs2, offset)
    }

    pub fn jal(rd: Reg, offset: i32) -> Self {
        Self::new(Opcode::Jal, Operands::J { rd, offset })
    }

    /// Unconditional jump whose offset is filled in later by [`Instructions::patch`].
    pub fn pending_jump(fixup: Fixup) -> Self {
        let mut inst = Self::jal(Reg::ZERO, 0);
        inst.fixup = Some(fixup);
        inst
    }

    pub fn stop() -> Self {
        Self::new(Opcode::Stop, Operands::None)
    }

    pub fn debug() -> Self {
        Self::new(Opcode::Debug, Operands::None)
    }

    pub fn raise_error() -> Self {
        Self::new(Opcode::RaiseError, Operands::None)
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    /// Relative offset for branch and jump kinds.
    pub fn offset(&self) -> Option<i32> {
        match self.operands {
            Operands::B { offset, .. } | Operands::J { offset, .. } => Some(offset),
            _ => None,
        }
    }

    fn set_offset(&mut self, new: i32) {
        match &mut self.operands {
            Operands::B { offset, .. } | Operands::J { offset, .. } => *offset = new,
            _ => {}
        }
    }
}

impl FromStr for Instruction {
    type Err = AsmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_asm_line(s)
    }
}

/// An owned, append-only instruction buffer.
///
/// Concatenation with `+`/`+=` moves the right-hand side in, so a compiled
/// sub-stream can never be aliased into two places.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions {
    instrs: Vec<Instruction>,
}

impl Instructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instrs.iter()
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.instrs
    }

    pub fn get(&self, idx: usize) -> Option<&Instruction> {
        self.instrs.get(idx)
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instrs.push(inst);
    }

    /// Length as a branch offset.
    pub fn span(&self) -> i32 {
        self.instrs.len() as i32
    }

    pub fn comment_first(mut self, text: impl Into<String>) -> Self {
        if let Some(first) = self.instrs.first_mut() {
            first.comment = Some(text.into());
        }
        self
    }

    pub fn comment_last(mut self, text: impl Into<String>) -> Self {
        if let Some(last) = self.instrs.last_mut() {
            last.comment = Some(text.into());
        }
        self
    }

    /// Point every pending `fixup` jump at instruction index `target` of this
    /// buffer. Returns how many jumps were patched.
    pub fn patch(&mut self, fixup: Fixup, target: usize) -> usize {
        let mut patched = 0;
        for (idx, inst) in self.instrs.iter_mut().enumerate() {
            if inst.fixup == Some(fixup) {
                inst.set_offset(target as i32 - idx as i32);
                inst.fixup = None;
                patched += 1;
            }
        }
        patched
    }

    /// First placeholder jump that has not been patched yet.
    pub fn first_pending(&self) -> Option<(usize, Fixup)> {
        self.instrs
            .iter()
            .enumerate()
            .find_map(|(idx, inst)| inst.fixup.map(|f| (idx, f)))
    }

    pub fn into_vec(self) -> Vec<Instruction> {
        self.instrs
    }
}

impl From<Vec<Instruction>> for Instructions {
    fn from(instrs: Vec<Instruction>) -> Self {
        Instructions { instrs }
    }
}

impl FromIterator<Instruction> for Instructions {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Instructions {
            instrs: iter.into_iter().collect(),
        }
    }
}

impl Extend<Instruction> for Instructions {
    fn extend<T: IntoIterator<Item = Instruction>>(&mut self, iter: T) {
        self.instrs.extend(iter);
    }
}

impl IntoIterator for Instructions {
    type Item = Instruction;
    type IntoIter = std::vec::IntoIter<Instruction>;
    fn into_iter(self) -> Self::IntoIter {
        self.instrs.into_iter()
    }
}

impl<'a> IntoIterator for &'a Instructions {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;
    fn into_iter(self) -> Self::IntoIter {
        self.instrs.iter()
    }
}

impl Index<usize> for Instructions {
    type Output = Instruction;
    fn index(&self, idx: usize) -> &Instruction {
        &self.instrs[idx]
    }
}

impl Add for Instructions {
    type Output = Instructions;
    fn add(mut self, rhs: Instructions) -> Instructions {
        self.instrs.extend(rhs.instrs);
        self
    }
}

impl Add<Instruction> for Instructions {
    type Output = Instructions;
    fn add(mut self, rhs: Instruction) -> Instructions {
        self.instrs.push(rhs);
        self
    }
}

impl AddAssign for Instructions {
    fn add_assign(&mut self, rhs: Instructions) {
        self.instrs.extend(rhs.instrs);
    }
}

impl AddAssign<Instruction> for Instructions {
    fn add_assign(&mut self, rhs: Instruction) {
        self.instrs.push(rhs);
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("bad register '{0}'")]
    BadRegister(String),
    #[error("bad immediate '{0}'")]
    BadImmediate(String),
    #[error("'{opcode}' takes {expected} operands, found {found}")]
    OperandCount {
        opcode: String,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<AsmError>,
    },
}

/// Parse a single assembly line: `op [operand ...]`.
pub fn parse_asm_line(line: &str) -> Result<Instruction, AsmError> {
    let trimmed = strip_comment(line).trim();
    let mut parts = trimmed
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty());
    let op_part = parts.next().ok_or_else(|| AsmError::UnknownOpcode(String::new()))?;
    let opcode = Opcode::from_str(op_part)?;
    let args: Vec<&str> = parts.collect();

    let expected = match opcode.format() {
        Format::R | Format::I | Format::B | Format::S => 3,
        Format::J => 2,
        Format::Pseudo => 0,
    };
    if args.len() != expected {
        return Err(AsmError::OperandCount {
            opcode: op_part.to_string(),
            expected,
            found: args.len(),
        });
    }

    let reg = |idx: usize| Reg::from_str(args[idx]);
    let imm = |idx: usize| {
        Binary::from_str(args[idx]).map_err(|_| AsmError::BadImmediate(args[idx].to_string()))
    };

    let operands = match opcode.format() {
        Format::R => Operands::R {
            rd: reg(0)?,
            rs1: reg(1)?,
            rs2: reg(2)?,
        },
        Format::I => Operands::I {
            rd: reg(0)?,
            rs1: reg(1)?,
            imm: imm(2)?,
        },
        Format::B => Operands::B {
            rs1: reg(0)?,
            rs2: reg(1)?,
            offset: imm(2)?.to_i32(),
        },
        Format::J => Operands::J {
            rd: reg(0)?,
            offset: imm(1)?.to_i32(),
        },
        Format::S => Operands::S {
            base: reg(0)?,
            src: reg(1)?,
            imm: imm(2)?,
        },
        Format::Pseudo => Operands::None,
    };

    Ok(Instruction::new(opcode, operands))
}

/// Parse a textual program, one instruction per line.
///
/// Blank lines and lines starting with `#` or `;` are skipped.
pub fn parse_program(source: &str) -> Result<Instructions, AsmError> {
    let mut program = Instructions::new();
    for (idx, line) in source.lines().enumerate() {
        if strip_comment(line).trim().is_empty() {
            continue;
        }
        let inst = parse_asm_line(line).map_err(|e| AsmError::Line {
            line: idx + 1,
            source: Box::new(e),
        })?;
        program.push(inst);
    }
    Ok(program)
}

fn strip_comment(line: &str) -> &str {
    match line.find(['#', ';']) {
        Some(idx) => &line[..idx],
        None => line,
    }
}
