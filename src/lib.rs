//! A typed toy-language backend: typechecker, stack-tracking code generator
//! and an emulator for a small RISC-V-like machine.

pub mod config;
pub mod lang;
pub mod machine;

use thiserror::Error;

pub use config::EmuConfig;
use lang::{CodegenError, Program, SemanticError};
use machine::{AsmError, Binary, Emu, EmuError, Instructions, REG_COUNT};

#[derive(Debug, Error)]
pub enum Error {
    #[error("assembly error: {0}")]
    Asm(#[from] AsmError),
    #[error("type error: {0}")]
    Semantic(#[from] SemanticError),
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
    #[error("execution error: {0}")]
    Emu(#[from] EmuError),
}

/// What a finished run exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Last value captured by `debug`.
    pub result: Option<Binary>,
    /// Every capture, when the config asked for a capture log.
    pub captures: Vec<Binary>,
    pub regs: [Binary; REG_COUNT],
    pub steps: usize,
}

/// Annotate every expression in `program` with its type.
pub fn check(program: &mut Program) -> Result<(), Error> {
    lang::semantics::check_program(program)?;
    Ok(())
}

/// Typecheck, then lower to instructions.
pub fn compile(program: &mut Program) -> Result<Instructions, Error> {
    check(program)?;
    Ok(lang::codegen::compile_program(program)?)
}

pub fn execute(code: &Instructions, config: EmuConfig) -> Result<Outcome, Error> {
    let mut emu = Emu::new(config);
    let result = emu.run(code.as_slice())?;
    Ok(Outcome {
        result,
        captures: emu.captures().to_vec(),
        regs: emu.regs,
        steps: emu.steps(),
    })
}

/// Compile and run a program tree.
pub fn run(program: &mut Program, config: EmuConfig) -> Result<Outcome, Error> {
    let code = compile(program)?;
    execute(&code, config)
}

/// Assemble textual instructions and run them.
pub fn run_asm(source: &str, config: EmuConfig) -> Result<Outcome, Error> {
    let code = machine::parse_program(source)?;
    execute(&code, config)
}
