// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! checkcap: compartment instrumentation CLI tool
//!
//! Reads RISC-V assembly, assigns every function to its compartment section,
//! inserts `checkcap` entry guards and appends the assignments to the build's
//! ledger. Logs go to stderr; stdout carries only assembly.
//!
//! Usage:
//!     clang -S -o - main.c | checkcap instrument --unit main.c --ledger-dir build > main.s
//!     checkcap template --input main.s --unit main.c --out-dir maps
//!     checkcap ledger build/compartments.cap

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use compartment::{
    CompartmentId, Ledger, LedgerError, LedgerKey, LedgerName, PassConfig, PassDriver, PassError,
};
use instrumenter::{InstrumentError, instrument, write_template};
use machine::GuardSyntax;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "checkcap", version)]
#[command(about = "Compartment sections and entry guards for RISC-V assembly")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log filter directives (e.g. "debug" or "compartment=trace"); overrides -v
    #[arg(long, env = "CHECKCAP_LOG", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Instrument the assembly of one translation unit
    Instrument(InstrumentArgs),
    /// Write a compartment map listing every function of a unit
    Template(TemplateArgs),
    /// Print the assignments of a ledger; fails on conflicting ids
    Ledger {
        /// Ledger file to read
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct InstrumentArgs {
    /// Assembly to read (stdin if absent)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where to write the instrumented assembly (stdout if absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Source file of the unit; selects its compartment map
    #[arg(short, long)]
    unit: String,

    /// Directory of compartment maps (empty disables maps)
    #[arg(long, env = "CHECKCAP_MAP_DIR")]
    map_dir: Option<PathBuf>,

    /// Compartment of functions without a mapping
    #[arg(long, env = "CHECKCAP_DEFAULT_COMPARTMENT")]
    default_compartment: Option<CompartmentId>,

    /// Only insert guards the map forces per function
    #[arg(long, env = "CHECKCAP_DISABLE_GUARD")]
    disable_guard: bool,

    /// Directory of the ledger shared by the build
    #[arg(long, env = "CHECKCAP_LEDGER_DIR")]
    ledger_dir: Option<PathBuf>,

    /// Append to a ledger named after the unit instead of the shared one
    #[arg(long)]
    ledger_per_unit: bool,

    /// What each ledger record is keyed by
    #[arg(long, value_enum, default_value_t = KeyArg::Function)]
    ledger_key: KeyArg,

    /// How the guard is spelled in the output
    #[arg(long, value_enum, default_value_t = SyntaxArg::Mnemonic)]
    guard_syntax: SyntaxArg,
}

#[derive(Args, Debug)]
struct TemplateArgs {
    /// Assembly to read (stdin if absent)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Source file of the unit; names the map
    #[arg(short, long)]
    unit: String,

    /// Directory to write the map into
    #[arg(long)]
    out_dir: PathBuf,

    /// Compartment every function is listed in
    #[arg(long, env = "CHECKCAP_DEFAULT_COMPARTMENT")]
    default_compartment: Option<CompartmentId>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyArg {
    Function,
    Section,
}

impl From<KeyArg> for LedgerKey {
    fn from(key: KeyArg) -> Self {
        match key {
            KeyArg::Function => LedgerKey::Function,
            KeyArg::Section => LedgerKey::Section,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SyntaxArg {
    /// `checkcap <id>`
    Mnemonic,
    /// `.insn i 0x0b, 0, x0, x0, <id>`
    Insn,
}

impl From<SyntaxArg> for GuardSyntax {
    fn from(syntax: SyntaxArg) -> Self {
        match syntax {
            SyntaxArg::Mnemonic => GuardSyntax::Mnemonic,
            SyntaxArg::Insn => GuardSyntax::Insn,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {target}: {source}")]
    Read { target: String, source: io::Error },

    #[error("failed to write {target}: {source}")]
    Write { target: String, source: io::Error },

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Pass(#[from] PassError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_level.as_deref());

    let result = match cli.command {
        Command::Instrument(args) => run_instrument(args),
        Command::Template(args) => run_template(args),
        Command::Ledger { file } => run_ledger(&file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, directives: Option<&str>) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives.unwrap_or(default)))
        .with_writer(io::stderr)
        .init();
}

fn run_instrument(args: InstrumentArgs) -> Result<ExitCode, CliError> {
    let config = PassConfig {
        mapping_dir: args.map_dir,
        default_compartment: args.default_compartment,
        disable_guard_insertion: args.disable_guard,
        ledger_dir: args.ledger_dir,
        ledger_name: if args.ledger_per_unit {
            LedgerName::PerUnit
        } else {
            LedgerName::default()
        },
        ledger_key: args.ledger_key.into(),
        ..Default::default()
    };
    let mut driver = PassDriver::new(config)?;

    let input = read_input(args.input.as_deref())?;
    let instrumented = instrument(&input, &args.unit, &mut driver, args.guard_syntax.into())?;
    write_output(args.output.as_deref(), &instrumented.output)?;
    Ok(ExitCode::SUCCESS)
}

fn run_template(args: TemplateArgs) -> Result<ExitCode, CliError> {
    let input = read_input(args.input.as_deref())?;
    let compartment = args.default_compartment.unwrap_or(CompartmentId::UNSET);
    let path = write_template(&input, &args.unit, &args.out_dir, compartment)?;
    info!(path = %path.display(), "template written");
    Ok(ExitCode::SUCCESS)
}

fn run_ledger(file: &Path) -> Result<ExitCode, CliError> {
    let ledger = Ledger::read(file)?;
    let write_err = |source| CliError::Write {
        target: "stdout".to_string(),
        source,
    };

    let mut stdout = io::stdout().lock();
    for (key, ids) in ledger.assignments() {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        writeln!(stdout, "{key}:{}", ids.join(",")).map_err(write_err)?;
    }

    let conflicts = ledger.conflicts();
    for (key, ids) in &conflicts {
        warn!(key, ?ids, "conflicting compartment assignments");
    }
    if conflicts.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{} key(s) assigned to more than one compartment", conflicts.len());
        Ok(ExitCode::from(2))
    }
}

fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    match path {
        Some(path) => fs::read_to_string(path).map_err(|source| CliError::Read {
            target: path.display().to_string(),
            source,
        }),
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|source| CliError::Read {
                    target: "stdin".to_string(),
                    source,
                })?;
            Ok(input)
        }
    }
}

fn write_output(path: Option<&Path>, output: &str) -> Result<(), CliError> {
    let result = match path {
        Some(path) => fs::write(path, output),
        None => io::stdout().lock().write_all(output.as_bytes()),
    };
    result.map_err(|source| CliError::Write {
        target: path.map_or_else(|| "stdout".to_string(), |p| p.display().to_string()),
        source,
    })
}
