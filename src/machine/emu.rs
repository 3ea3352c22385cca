use tracing::{debug, trace};

use crate::config::EmuConfig;
use crate::machine::binary::Binary;
use crate::machine::instruction::{INSTRUCTION_BYTES, Instruction, Opcode, Operands, REG_COUNT, Reg};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EmuError {
    #[error("unaligned memory access at address {addr}")]
    Unaligned { addr: i64 },
    #[error("memory access out of range at address {addr}")]
    OutOfBounds { addr: i64 },
    #[error("program counter out of range: {pc}")]
    PcOutOfRange { pc: u32 },
    #[error("loop: no stop after {limit} steps")]
    Loop { limit: usize },
    #[error("raised error at pc {pc}")]
    Raised { pc: u32 },
    #[error("unresolved jump placeholder at pc {pc}")]
    Unresolved { pc: u32 },
    #[error("malformed instruction at pc {pc}")]
    Malformed { pc: u32 },
}

enum Flow {
    Next,
    Jump(u32),
    Halt,
}

/// Register machine with a flat word-addressed memory.
///
/// The stack starts at address 0 and grows upward; `sp` points at the next
/// free word.
pub struct Emu {
    pub regs: [Binary; REG_COUNT],
    pub pc: u32,
    pub mem: Vec<Binary>,
    config: EmuConfig,
    steps: usize,
    last_capture: Option<Binary>,
    captures: Vec<Binary>,
}

impl Emu {
    pub fn new(config: EmuConfig) -> Self {
        Emu {
            regs: [Binary::ZERO; REG_COUNT],
            pc: 0,
            mem: vec![Binary::ZERO; config.memory_words],
            config,
            steps: 0,
            last_capture: None,
            captures: Vec::new(),
        }
    }

    /// Execute from `pc` until `stop`. Returns the last debug capture.
    pub fn run(&mut self, program: &[Instruction]) -> Result<Option<Binary>, EmuError> {
        debug!(instructions = program.len(), max_steps = self.config.max_steps, "emulation start");
        loop {
            if self.steps >= self.config.max_steps {
                return Err(EmuError::Loop {
                    limit: self.config.max_steps,
                });
            }
            let idx = (self.pc / INSTRUCTION_BYTES) as usize;
            let inst = match program.get(idx) {
                Some(inst) if self.pc % INSTRUCTION_BYTES == 0 => inst,
                _ => return Err(EmuError::PcOutOfRange { pc: self.pc }),
            };
            trace!(pc = self.pc, "{inst}");
            self.steps += 1;
            match self.step(inst)? {
                Flow::Next => self.pc = self.pc.wrapping_add(INSTRUCTION_BYTES),
                Flow::Jump(target) => self.pc = target,
                Flow::Halt => break,
            }
        }
        debug!(steps = self.steps, result = ?self.last_capture, "emulation stopped");
        Ok(self.last_capture)
    }

    fn step(&mut self, inst: &Instruction) -> Result<Flow, EmuError> {
        if inst.fixup.is_some() {
            return Err(EmuError::Unresolved { pc: self.pc });
        }
        let malformed = EmuError::Malformed { pc: self.pc };
        match (inst.opcode, inst.operands) {
            (Opcode::Stop, _) => Ok(Flow::Halt),
            (Opcode::Debug, _) => {
                let sp = self.reg(Reg::SP) - Binary::from(4);
                let value = self.load(sp)?;
                self.set_reg(Reg::SP, sp);
                self.last_capture = Some(value);
                if self.config.capture_log {
                    self.captures.push(value);
                }
                Ok(Flow::Next)
            }
            (Opcode::RaiseError, _) => Err(EmuError::Raised { pc: self.pc }),
            (op, Operands::R { rd, rs1, rs2 }) => {
                let (a, b) = (self.reg(rs1), self.reg(rs2));
                let value = match op {
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Xor => a ^ b,
                    Opcode::Or => a | b,
                    Opcode::And => a & b,
                    Opcode::Mul => a * b,
                    Opcode::Div => a / b,
                    Opcode::Slt => Binary::from(a < b),
                    Opcode::Sltu => Binary::from(a.lt_unsigned(b)),
                    _ => return Err(malformed),
                };
                self.set_reg(rd, value);
                Ok(Flow::Next)
            }
            (op, Operands::I { rd, rs1, imm }) => {
                let a = self.reg(rs1);
                match op {
                    Opcode::Addi => self.set_reg(rd, a + imm),
                    Opcode::Slti => self.set_reg(rd, Binary::from(a < imm)),
                    Opcode::Sltiu => self.set_reg(rd, Binary::from(a.lt_unsigned(imm))),
                    Opcode::Lw => {
                        let value = self.load(a + imm)?;
                        self.set_reg(rd, value);
                    }
                    Opcode::Jalr => {
                        let target = (a + imm).bits();
                        self.set_reg(rd, self.return_address());
                        return Ok(Flow::Jump(target));
                    }
                    _ => return Err(malformed),
                }
                Ok(Flow::Next)
            }
            (op, Operands::B { rs1, rs2, offset }) => {
                let (a, b) = (self.reg(rs1), self.reg(rs2));
                let taken = match op {
                    Opcode::Beq => a == b,
                    Opcode::Bne => a != b,
                    Opcode::Blt => a < b,
                    Opcode::Bge => a >= b,
                    _ => return Err(malformed),
                };
                if taken {
                    Ok(Flow::Jump(self.relative(offset)))
                } else {
                    Ok(Flow::Next)
                }
            }
            (Opcode::Jal, Operands::J { rd, offset }) => {
                self.set_reg(rd, self.return_address());
                Ok(Flow::Jump(self.relative(offset)))
            }
            (Opcode::Sw, Operands::S { base, src, imm }) => {
                let addr = self.reg(base) + imm;
                self.store(addr, self.reg(src))?;
                Ok(Flow::Next)
            }
            _ => Err(malformed),
        }
    }

    pub fn reg(&self, reg: Reg) -> Binary {
        self.regs[reg.index()]
    }

    /// Writes to `x0` are discarded.
    pub fn set_reg(&mut self, reg: Reg, value: Binary) {
        if reg != Reg::ZERO {
            self.regs[reg.index()] = value;
        }
    }

    /// Last value captured by `debug`.
    pub fn result(&self) -> Option<Binary> {
        self.last_capture
    }

    /// Every capture in execution order (only filled in capture-log mode).
    pub fn captures(&self) -> &[Binary] {
        &self.captures
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Word at a byte address.
    pub fn load(&self, addr: Binary) -> Result<Binary, EmuError> {
        let idx = self.word_index(addr)?;
        Ok(self.mem[idx])
    }

    pub fn store(&mut self, addr: Binary, value: Binary) -> Result<(), EmuError> {
        let idx = self.word_index(addr)?;
        self.mem[idx] = value;
        Ok(())
    }

    fn word_index(&self, addr: Binary) -> Result<usize, EmuError> {
        let byte = addr.to_i32() as i64;
        if byte % 4 != 0 {
            return Err(EmuError::Unaligned { addr: byte });
        }
        if byte < 0 || (byte / 4) as usize >= self.mem.len() {
            return Err(EmuError::OutOfBounds { addr: byte });
        }
        Ok((byte / 4) as usize)
    }

    fn return_address(&self) -> Binary {
        Binary::from_bits(self.pc.wrapping_add(INSTRUCTION_BYTES))
    }

    fn relative(&self, offset: i32) -> u32 {
        self.pc
            .wrapping_add_signed(offset.wrapping_mul(INSTRUCTION_BYTES as i32))
    }
}
