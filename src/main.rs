use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use minirv::EmuConfig;
use minirv::machine::Reg;

#[derive(Parser)]
#[command(name = "minirv")]
#[command(about = "Assemble and run a program for the minirv machine", long_about = None)]
struct Cli {
    /// Textual assembly file, one instruction per line
    file: PathBuf,

    /// Abort with a loop error after this many instructions
    #[arg(long, default_value_t = EmuConfig::default().max_steps)]
    max_steps: usize,

    /// Size of memory in 4-byte words
    #[arg(long, default_value_t = EmuConfig::default().memory_words)]
    memory_words: usize,

    /// Print every debug capture, not only the last
    #[arg(long)]
    captures: bool,

    /// Dump the register file after the run
    #[arg(long)]
    regs: bool,

    /// Log every executed instruction to stderr
    #[arg(long)]
    trace: bool,
}

fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("minirv=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.trace);

    let source = match fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", cli.file.display());
            return ExitCode::FAILURE;
        }
    };

    let config = EmuConfig {
        memory_words: cli.memory_words,
        max_steps: cli.max_steps,
        capture_log: cli.captures,
    };
    let outcome = match minirv::run_asm(&source, config) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.captures {
        for value in &outcome.captures {
            println!("capture: {value}");
        }
    }
    match outcome.result {
        Some(value) => println!("result: {value}"),
        None => println!("result: none"),
    }
    if cli.regs {
        for (idx, value) in outcome.regs.iter().enumerate() {
            let name = Reg::new(idx as u8).map_or("?", Reg::abi_name);
            println!("x{idx:02} {name:>4} = {value}");
        }
    }
    ExitCode::SUCCESS
}
