// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Compartment assignment for RISC-V machine functions
//!
//! Every defined function of a translation unit is assigned a numeric
//! compartment, moved into a per-compartment text section and guarded with a
//! `checkcap <id>` at its entry. Assignments are appended to a ledger file
//! shared by every compiler process of the build, for the link stage.
//!
//! # Architecture
//!
//! - [`codec`]: the `<unit>.cap` map format (read, write, templates).
//! - [`CompartmentResolver`]: loads a unit's map once and answers lookups.
//! - [`SectionNamer`]: compartment id to section name.
//! - [`EntryInstrumenter`]: inserts the entry guard.
//! - [`LedgerWriter`] / [`Ledger`]: append-only cross-process record.
//! - [`PassDriver`]: sequences the above, once per function.
//!
//! # Example
//!
//! ```no_run
//! use compartment::{PassConfig, PassDriver};
//! use machine::{Block, Function, Instruction};
//!
//! let config = PassConfig {
//!     ledger_dir: Some("/tmp/build".into()),
//!     ..Default::default()
//! };
//! let mut driver = PassDriver::new(config)?;
//!
//! let mut main: Function = Function::new("main").with_block(Block::with_instructions(
//!     Some("main".into()),
//!     vec![Instruction::new("ret", vec![])],
//! ));
//! driver.run_on_function("main.c", &mut main)?;
//! # Ok::<(), compartment::PassError>(())
//! ```

pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod id;
pub mod instrument;
pub mod ledger;
pub mod resolver;
pub mod section;

pub use codec::{MapEntry, MappingFile};
pub use config::{LedgerKey, LedgerName, PassConfig};
pub use driver::{FunctionRecord, FunctionReport, PassDriver, PassStats, UnitState};
pub use error::{LedgerError, MapError, ParseError, PassError, PassResult};
pub use id::CompartmentId;
pub use instrument::{EntryInstrumenter, GuardOutcome, SkipReason};
pub use ledger::{Ledger, LedgerRecord, LedgerWriter};
pub use resolver::CompartmentResolver;
pub use section::{DEFAULT_SECTION_PREFIX, SectionNamer};
