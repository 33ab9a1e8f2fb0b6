// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for assembly instrumentation.

use compartment::{CompartmentId, MapError, PassError};
use thiserror::Error;

/// Error recovering functions from assembly text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    /// A symbol typed as a function has no label in the file.
    #[error("function '{name}' declared at line {line} is never defined")]
    UndefinedFunction {
        /// The function symbol.
        name: String,
        /// Line of the `.type` directive.
        line: usize,
    },
    /// The same function label appears twice.
    #[error("function '{name}' redefined at line {line}")]
    DuplicateFunction {
        /// The function symbol.
        name: String,
        /// Line of the second definition.
        line: usize,
    },
}

/// Errors that can occur while instrumenting a unit.
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error(transparent)]
    Asm(#[from] AsmError),

    #[error(transparent)]
    Pass(#[from] PassError),

    #[error(transparent)]
    Map(#[from] MapError),

    /// The selected guard syntax cannot encode the function's compartment.
    #[error("compartment {compartment} of '{function}' does not fit the .insn guard immediate (max {max})")]
    GuardOutOfRange {
        function: String,
        compartment: CompartmentId,
        max: u16,
    },
}

/// Result type alias for instrumentation
pub type InstrumentResult<T> = Result<T, InstrumentError>;
