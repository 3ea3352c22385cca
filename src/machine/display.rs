use std::fmt;

use super::instruction::{Instruction, Instructions, Opcode, Operands, Reg};

/// Column at which instruction comments start.
const COMMENT_COLUMN: usize = 24;

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_name())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Display for Operands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operands::R { rd, rs1, rs2 } => write!(f, "{rd} {rs1} {rs2}"),
            Operands::I { rd, rs1, imm } => write!(f, "{rd} {rs1} {imm}"),
            Operands::B { rs1, rs2, offset } => write!(f, "{rs1} {rs2} {offset}"),
            Operands::J { rd, offset } => write!(f, "{rd} {offset}"),
            Operands::S { base, src, imm } => write!(f, "{base} {src} {imm}"),
            Operands::None => Ok(()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.operands {
            Operands::None => self.opcode.to_string(),
            ref ops => format!("{} {}", self.opcode, ops),
        };
        match (&self.comment, self.fixup) {
            (Some(comment), _) => write!(f, "{text:<COMMENT_COLUMN$}# {comment}"),
            (None, Some(fixup)) => write!(f, "{text:<COMMENT_COLUMN$}# pending {fixup:?}"),
            (None, None) => f.write_str(&text),
        }
    }
}

impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in self {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}
