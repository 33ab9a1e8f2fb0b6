// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pass configuration

use std::path::{Path, PathBuf};

use crate::{CompartmentId, codec, section::DEFAULT_SECTION_PREFIX};

/// Base name of the shared ledger when every unit appends to the same file.
pub const DEFAULT_LEDGER_NAME: &str = "compartments";

/// Which ledger file a unit appends to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerName {
    /// One file shared by every unit of the build.
    Fixed(String),
    /// One file per unit, named like the unit's compartment map.
    PerUnit,
}

impl Default for LedgerName {
    fn default() -> Self {
        LedgerName::Fixed(DEFAULT_LEDGER_NAME.to_string())
    }
}

/// What the ledger records as the key of each line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerKey {
    #[default]
    Function,
    Section,
}

/// Configuration of one pass run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassConfig {
    /// Directory holding `<unit>.cap` maps. `None` or empty disables maps.
    pub mapping_dir: Option<PathBuf>,
    /// Compartment of functions absent from the map.
    pub default_compartment: Option<CompartmentId>,
    /// Skip guards unless the map forces them per function.
    pub disable_guard_insertion: bool,
    /// Directory of the ledger. Required.
    pub ledger_dir: Option<PathBuf>,
    pub ledger_name: LedgerName,
    pub ledger_key: LedgerKey,
    pub section_prefix: String,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            mapping_dir: None,
            default_compartment: None,
            disable_guard_insertion: false,
            ledger_dir: None,
            ledger_name: LedgerName::default(),
            ledger_key: LedgerKey::default(),
            section_prefix: DEFAULT_SECTION_PREFIX.to_string(),
        }
    }
}

impl PassConfig {
    /// Map directory, treating an empty path as unset.
    pub fn mapping_dir(&self) -> Option<&Path> {
        non_empty(self.mapping_dir.as_deref())
    }

    /// Ledger directory, treating an empty path as unset.
    pub fn ledger_dir(&self) -> Option<&Path> {
        non_empty(self.ledger_dir.as_deref())
    }

    /// Configured default, or [`CompartmentId::UNSET`].
    pub fn default_compartment(&self) -> CompartmentId {
        self.default_compartment.unwrap_or(CompartmentId::UNSET)
    }

    /// Ledger file name (with extension) for `unit_source`.
    pub fn ledger_file_name(&self, unit_source: &str) -> String {
        match &self.ledger_name {
            LedgerName::Fixed(name) => format!("{name}.{}", codec::MAP_EXTENSION),
            LedgerName::PerUnit => codec::map_file_name(unit_source),
        }
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}
