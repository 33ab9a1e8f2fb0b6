// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Entry guard insertion
//!
//! Places a single `checkcap <id>` before every other instruction of the
//! entry block:
//!
//! ```asm
//! foo:
//!     checkcap 7          # inserted, carries the debug location of addi
//!     addi sp, sp, -16
//!     ...
//! ```
//!
//! The guard reads no registers, so liveness at the function entry is
//! unchanged. Running this twice on the same function inserts two guards;
//! [`crate::PassDriver`] only calls it once per function.

use machine::{InsertPoint, MachineFunction, MachineInstr};
use tracing::{trace, warn};

use crate::CompartmentId;

/// Why no guard was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Guards are disabled and the map does not force one for this function.
    OptedOut,
    /// The map exempts this function.
    Exempt,
    /// The function has no entry instruction to anchor the guard.
    NoInstructions,
}

/// Result of [`EntryInstrumenter::insert_guard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Inserted,
    Skipped(SkipReason),
}

impl GuardOutcome {
    pub fn is_inserted(self) -> bool {
        self == GuardOutcome::Inserted
    }
}

/// Inserts the compartment guard at function entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryInstrumenter {
    disable_guard_insertion: bool,
}

impl EntryInstrumenter {
    pub fn new(disable_guard_insertion: bool) -> Self {
        Self {
            disable_guard_insertion,
        }
    }

    /// Whether a function with the given map flag should be guarded.
    pub fn wants_guard(&self, guard_override: Option<bool>) -> Result<(), SkipReason> {
        match guard_override {
            Some(true) => Ok(()),
            Some(false) => Err(SkipReason::Exempt),
            None if self.disable_guard_insertion => Err(SkipReason::OptedOut),
            None => Ok(()),
        }
    }

    /// Insert `checkcap <compartment>` as the first instruction of `function`.
    ///
    /// The guard copies the debug location of the instruction it precedes.
    /// Skips leave the function untouched.
    pub fn insert_guard<F: MachineFunction>(
        &self,
        function: &mut F,
        compartment: CompartmentId,
        guard_override: Option<bool>,
    ) -> GuardOutcome {
        if let Err(reason) = self.wants_guard(guard_override) {
            trace!(function = function.name(), ?reason, "guard skipped");
            return GuardOutcome::Skipped(reason);
        }

        let Some(first) = function.first_instruction() else {
            warn!(function = function.name(), "no entry instruction, guard not inserted");
            return GuardOutcome::Skipped(SkipReason::NoInstructions);
        };

        let guard = F::Instr::entry_guard(compartment.get(), first.debug_loc());
        function.insert_before(InsertPoint::ENTRY, guard);
        GuardOutcome::Inserted
    }
}
