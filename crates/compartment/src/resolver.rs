// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Function name to compartment resolution
//!
//! The map of a unit is read once, on the first function processed, and is
//! read-only afterwards. Resolution precedence:
//!
//! 1. the function's record in the unit's map
//! 2. the map's default record
//! 3. the configured default
//! 4. [`CompartmentId::UNSET`]

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{
    CompartmentId,
    codec::{self, MappingFile},
    config::PassConfig,
    error::MapError,
};

/// State established by [`CompartmentResolver::initialize_once`].
#[derive(Debug)]
struct UnitMap {
    unit_source: String,
    map: MappingFile,
    default: CompartmentId,
}

/// Resolves compartments for the functions of one translation unit.
#[derive(Debug)]
pub struct CompartmentResolver {
    mapping_dir: Option<PathBuf>,
    configured_default: CompartmentId,
    unit: Option<UnitMap>,
}

impl CompartmentResolver {
    /// `mapping_dir` of `None` (or an empty path) disables map files.
    pub fn new(mapping_dir: Option<PathBuf>, configured_default: CompartmentId) -> Self {
        Self {
            mapping_dir: mapping_dir.filter(|dir| !dir.as_os_str().is_empty()),
            configured_default,
            unit: None,
        }
    }

    pub fn from_config(config: &PassConfig) -> Self {
        Self::new(
            config.mapping_dir().map(Path::to_path_buf),
            config.default_compartment(),
        )
    }

    /// Path of the map consulted for `unit_source`, if maps are enabled.
    pub fn map_path(&self, unit_source: &str) -> Option<PathBuf> {
        self.mapping_dir
            .as_ref()
            .map(|dir| dir.join(codec::map_file_name(unit_source)))
    }

    /// Load the unit's map. Only the first call does anything.
    ///
    /// # Errors
    ///
    /// A malformed map is fatal. A missing or unreadable map is not: the unit
    /// falls back to the default compartment.
    pub fn initialize_once(&mut self, unit_source: &str) -> Result<(), MapError> {
        if let Some(unit) = &self.unit {
            if unit.unit_source != unit_source {
                warn!(
                    initialized = %unit.unit_source,
                    requested = %unit_source,
                    "resolver already initialized for another unit"
                );
            }
            return Ok(());
        }

        let map = match self.map_path(unit_source) {
            None => {
                debug!("no mapping directory configured, compartment maps disabled");
                MappingFile::new()
            }
            Some(path) => match codec::read(&path) {
                Ok(Some(map)) => {
                    info!(path = %path.display(), functions = map.len(), "loaded compartment map");
                    map
                }
                Ok(None) => {
                    debug!(path = %path.display(), "no compartment map for unit");
                    MappingFile::new()
                }
                Err(MapError::Read { path, source }) => {
                    warn!(path = %path.display(), error = %source, "unreadable compartment map ignored");
                    MappingFile::new()
                }
                Err(e) => return Err(e),
            },
        };

        let default = map.default.unwrap_or(self.configured_default);
        self.unit = Some(UnitMap {
            unit_source: unit_source.to_string(),
            map,
            default,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.unit.is_some()
    }

    /// Compartment of `function`. Never fails.
    pub fn lookup(&self, function: &str) -> CompartmentId {
        match &self.unit {
            Some(unit) => unit.map.compartment(function).unwrap_or(unit.default),
            None => self.configured_default,
        }
    }

    /// Per-function guard flag from the map, if any.
    pub fn guard_override(&self, function: &str) -> Option<bool> {
        self.unit
            .as_ref()
            .and_then(|unit| unit.map.guard_override(function))
    }

    /// The unit's default compartment (the configured one before initialization).
    pub fn default_compartment(&self) -> CompartmentId {
        self.unit
            .as_ref()
            .map_or(self.configured_default, |unit| unit.default)
    }

    /// The loaded map, once initialized.
    pub fn map(&self) -> Option<&MappingFile> {
        self.unit.as_ref().map(|unit| &unit.map)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use tempfile::TempDir;

    use super::*;

    fn id(value: u16) -> CompartmentId {
        CompartmentId::new(value)
    }

    fn map_dir(unit: &str, contents: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(codec::map_file_name(unit)), contents).unwrap();
        dir
    }

    #[test]
    fn test_map_default_and_entries() {
        let dir = map_dir("main.c", ":5\nfoo:9\n");
        let mut resolver = CompartmentResolver::new(Some(dir.path().into()), id(1));
        resolver.initialize_once("main.c").unwrap();

        assert_eq!(resolver.default_compartment(), id(5));
        assert_eq!(resolver.lookup("foo"), id(9));
        assert_eq!(resolver.lookup("bar"), id(5));
    }

    #[test]
    fn test_mapped_entry_wins_over_any_default() {
        let dir = map_dir("main.c", "foo:7\n");
        let mut resolver = CompartmentResolver::new(Some(dir.path().into()), id(200));
        resolver.initialize_once("main.c").unwrap();

        assert_eq!(resolver.lookup("foo"), id(7));
        assert_eq!(resolver.lookup("other"), id(200));
    }

    #[test]
    fn test_maps_disabled() {
        let mut resolver = CompartmentResolver::new(Some(PathBuf::new()), CompartmentId::UNSET);
        assert!(resolver.map_path("main.c").is_none());
        resolver.initialize_once("main.c").unwrap();

        assert!(resolver.is_initialized());
        assert_eq!(resolver.lookup("anyFunction"), CompartmentId::UNSET);
        assert_eq!(resolver.lookup("anyFunction").get(), 266);
    }

    #[test]
    fn test_missing_map_file_uses_configured_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = CompartmentResolver::new(Some(dir.path().into()), id(3));
        resolver.initialize_once("nothing_here.c").unwrap();

        assert!(resolver.map().unwrap().is_empty());
        assert_eq!(resolver.lookup("f"), id(3));
    }

    #[test]
    fn test_initialize_twice_is_identical_to_once() {
        let dir = map_dir("unit.c", indoc! {"
            :4
            a:1
            b:2:1
        "});
        let mut once = CompartmentResolver::new(Some(dir.path().into()), id(0));
        once.initialize_once("unit.c").unwrap();

        let mut twice = CompartmentResolver::new(Some(dir.path().into()), id(0));
        twice.initialize_once("unit.c").unwrap();
        // Changing the file after initialization must not matter.
        fs::write(dir.path().join("unit.cap"), "a:99\n").unwrap();
        twice.initialize_once("unit.c").unwrap();

        assert_eq!(once.map(), twice.map());
        assert_eq!(once.default_compartment(), twice.default_compartment());
        assert_eq!(twice.lookup("a"), id(1));
        assert_eq!(twice.guard_override("b"), Some(true));
    }

    #[test]
    fn test_malformed_map_is_fatal() {
        let dir = map_dir("bad.c", "foo:not-a-number\n");
        let mut resolver = CompartmentResolver::new(Some(dir.path().into()), id(0));
        let err = resolver.initialize_once("bad.c").unwrap_err();

        assert!(matches!(err, MapError::Parse { .. }));
        assert!(!resolver.is_initialized());
    }

    #[test]
    fn test_lookup_before_initialization() {
        let resolver = CompartmentResolver::new(None, id(11));
        assert!(!resolver.is_initialized());
        assert_eq!(resolver.lookup("f"), id(11));
        assert_eq!(resolver.guard_override("f"), None);
    }

    #[test]
    fn test_nested_unit_path() {
        let dir = map_dir("src/net/tcp.c", "send:12\n");
        let mut resolver = CompartmentResolver::new(Some(dir.path().into()), id(0));
        resolver.initialize_once("src/net/tcp.c").unwrap();
        assert_eq!(resolver.lookup("send"), id(12));
    }
}
