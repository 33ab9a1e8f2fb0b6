// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Compartment instrumentation for RISC-V assembly
//!
//! This crate provides tools to:
//! - Parse RISC-V assembly text files
//! - Recover functions and their basic blocks
//! - Run the compartment pass over them (section assignment, `checkcap` guards,
//!   ledger records)
//! - Write the instrumented assembly back out
//! - Emit compartment map templates listing a unit's functions

pub mod error;
pub mod parser;
pub mod unit;

use std::path::{Path, PathBuf};

use compartment::{CompartmentId, FunctionReport, PassDriver, codec};
pub use error::{AsmError, InstrumentError, InstrumentResult};
use machine::{GuardSyntax, INSN_MAX_COMPARTMENT};
pub use parser::{ParsedAssembly, ParsedLine};
pub use unit::{AsmFunction, AsmInstruction, AsmUnit};

/// Output of [`instrument`].
#[derive(Debug, Clone)]
pub struct Instrumented {
    /// The rewritten assembly.
    pub output: String,
    /// One report per function the driver processed.
    pub reports: Vec<FunctionReport>,
}

/// Run the compartment pass over the assembly of one translation unit.
///
/// `unit_source` names the unit's source file; it selects the compartment
/// map (and per-unit ledger, if configured).
///
/// # Errors
///
/// Besides parse and pass errors, fails without output when a guarded
/// function's compartment cannot be spelled in `syntax`.
pub fn instrument(
    input: &str,
    unit_source: &str,
    driver: &mut PassDriver,
    syntax: GuardSyntax,
) -> InstrumentResult<Instrumented> {
    let mut unit = AsmUnit::parse(input)?;
    let reports = driver.run_on_unit(unit_source, unit.functions_mut())?;
    if let Some(report) = reports
        .iter()
        .find(|r| r.guard.is_inserted() && !syntax.encodes(r.record.compartment.get()))
    {
        return Err(InstrumentError::GuardOutOfRange {
            function: report.record.name.clone(),
            compartment: report.record.compartment,
            max: INSN_MAX_COMPARTMENT,
        });
    }
    Ok(Instrumented {
        output: unit.render(syntax),
        reports,
    })
}

/// Write a compartment map for `unit_source` placing every function of
/// `input` in `compartment`. Returns the path written.
pub fn write_template(
    input: &str,
    unit_source: &str,
    dir: &Path,
    compartment: CompartmentId,
) -> InstrumentResult<PathBuf> {
    let unit = AsmUnit::parse(input)?;
    Ok(codec::write_unit_template(
        dir,
        unit_source,
        unit.function_names(),
        compartment,
    )?)
}
