// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-function pass entry point
//!
//! For every defined function, in order:
//!
//! 1. initialize the unit (first function only): load the compartment map
//! 2. resolve the function's compartment
//! 3. derive and assign its output section
//! 4. insert the entry guard
//! 5. append the ledger record
//!
//! A function is processed at most once per driver; asking again is a no-op.

use std::collections::HashSet;

use machine::MachineFunction;
use tracing::{debug, info, warn};

use crate::{
    CompartmentId,
    config::{LedgerKey, PassConfig},
    error::{LedgerError, PassResult},
    instrument::{EntryInstrumenter, GuardOutcome},
    ledger::LedgerWriter,
    resolver::CompartmentResolver,
    section::SectionNamer,
};

/// Unit lifecycle: the map is loaded on the first function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Uninitialized,
    Initialized,
}

/// Outcome of resolving one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    pub name: String,
    pub compartment: CompartmentId,
    pub section: String,
    /// False when the function is exempt or guards are disabled for it.
    pub needs_guard: bool,
}

/// What the driver did to one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionReport {
    pub record: FunctionRecord,
    pub guard: GuardOutcome,
    /// Instructions in the function before the guard was inserted.
    pub instructions: usize,
}

impl FunctionReport {
    /// Whether the pass changed program semantics. Always false: the guard
    /// does not alter behaviour for the optimizer's purposes, even though it
    /// changes code layout.
    pub fn changed(&self) -> bool {
        false
    }
}

/// Counters over the functions processed by one driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub functions: usize,
    pub guarded: usize,
    pub skipped: usize,
    pub instructions: usize,
}

/// Drives resolution, instrumentation and recording for one unit.
#[derive(Debug)]
pub struct PassDriver {
    config: PassConfig,
    resolver: CompartmentResolver,
    namer: SectionNamer,
    instrumenter: EntryInstrumenter,
    ledger: Option<LedgerWriter>,
    processed: HashSet<String>,
    stats: PassStats,
}

impl PassDriver {
    /// # Errors
    ///
    /// [`LedgerError::MissingDirectory`] when no ledger directory is
    /// configured: without a ledger the link stage cannot see compartments.
    pub fn new(config: PassConfig) -> PassResult<Self> {
        if config.ledger_dir().is_none() {
            return Err(LedgerError::MissingDirectory.into());
        }

        Ok(Self {
            resolver: CompartmentResolver::from_config(&config),
            namer: SectionNamer::new(config.section_prefix.clone()),
            instrumenter: EntryInstrumenter::new(config.disable_guard_insertion),
            ledger: None,
            processed: HashSet::new(),
            stats: PassStats::default(),
            config,
        })
    }

    pub fn unit_state(&self) -> UnitState {
        if self.resolver.is_initialized() {
            UnitState::Initialized
        } else {
            UnitState::Uninitialized
        }
    }

    pub fn resolver(&self) -> &CompartmentResolver {
        &self.resolver
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    /// Ledger writer, once the unit is initialized.
    pub fn ledger(&self) -> Option<&LedgerWriter> {
        self.ledger.as_ref()
    }

    /// Process one function.
    ///
    /// Returns `None` for declarations and for functions this driver has
    /// already processed.
    pub fn run_on_function<F: MachineFunction>(
        &mut self,
        unit_source: &str,
        function: &mut F,
    ) -> PassResult<Option<FunctionReport>> {
        if function.is_declaration() {
            return Ok(None);
        }
        if self.processed.contains(function.name()) {
            debug!(function = function.name(), "already processed, skipping");
            return Ok(None);
        }

        self.initialize_unit(unit_source)?;
        let ledger = self.ledger.as_ref().ok_or(LedgerError::MissingDirectory)?;

        let name = function.name().to_string();
        let compartment = self.resolver.lookup(&name);
        if !compartment.is_program_valid() {
            warn!(function = %name, %compartment, "compartment outside the program-valid range");
        }

        let section = self.namer.name_for(compartment);
        function.set_section(section.clone());

        let guard_override = self.resolver.guard_override(&name);
        let instructions = function.instruction_count();
        let guard = self
            .instrumenter
            .insert_guard(function, compartment, guard_override);
        self.processed.insert(name.clone());

        let key = match self.config.ledger_key {
            LedgerKey::Function => name.as_str(),
            LedgerKey::Section => section.as_str(),
        };
        ledger.append(key, compartment)?;

        self.stats.functions += 1;
        self.stats.instructions += instructions;
        if guard.is_inserted() {
            self.stats.guarded += 1;
        } else {
            self.stats.skipped += 1;
        }
        debug!(
            function = %name,
            %compartment,
            %section,
            instructions,
            ?guard,
            "function processed"
        );

        Ok(Some(FunctionReport {
            record: FunctionRecord {
                name,
                compartment,
                section,
                needs_guard: self.instrumenter.wants_guard(guard_override).is_ok(),
            },
            guard,
            instructions,
        }))
    }

    /// Process every function of a unit, in order.
    pub fn run_on_unit<F: MachineFunction>(
        &mut self,
        unit_source: &str,
        functions: &mut [F],
    ) -> PassResult<Vec<FunctionReport>> {
        let mut reports = Vec::with_capacity(functions.len());
        for function in functions.iter_mut() {
            if let Some(report) = self.run_on_function(unit_source, function)? {
                reports.push(report);
            }
        }

        let stats = self.stats;
        info!(
            unit = unit_source,
            functions = stats.functions,
            guarded = stats.guarded,
            skipped = stats.skipped,
            instructions = stats.instructions,
            "compartment pass finished"
        );
        Ok(reports)
    }

    fn initialize_unit(&mut self, unit_source: &str) -> PassResult<()> {
        if self.resolver.is_initialized() {
            return Ok(());
        }

        self.resolver.initialize_once(unit_source)?;
        let dir = self
            .config
            .ledger_dir()
            .ok_or(LedgerError::MissingDirectory)?;
        let writer = LedgerWriter::new(dir, &self.config.ledger_file_name(unit_source));
        debug!(
            unit = unit_source,
            ledger = %writer.path().display(),
            default = %self.resolver.default_compartment(),
            "unit initialized"
        );
        self.ledger = Some(writer);
        Ok(())
    }
}
