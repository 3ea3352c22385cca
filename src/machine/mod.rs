pub mod binary;
pub mod display;
pub mod emu;
pub mod instruction;

pub use binary::{Binary, ParseBinaryError};
pub use emu::{Emu, EmuError};
pub use instruction::{
    AsmError, Fixup, Format, INSTRUCTION_BYTES, Instruction, Instructions, Opcode, Operands,
    REG_COUNT, Reg, parse_asm_line, parse_program,
};
