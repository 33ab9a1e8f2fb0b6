// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cross-process compartment ledger
//!
//! Every compiler process of a build appends `<key>:<id>` lines to the same
//! file. Lines are independent: readers treat the file as an unordered
//! multiset, so interleaving between processes and duplicates from rebuilds
//! are both expected.
//!
//! The writer opens, appends and closes on every record. Each record is
//! handed to the OS in one `write` on an `O_APPEND` descriptor, so lines from
//! concurrent writers do not tear.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{trace, warn};

use crate::{CompartmentId, error::LedgerError};

/// One `<key>:<id>` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerRecord {
    /// Function or section name.
    pub key: String,
    pub compartment: CompartmentId,
}

impl LedgerRecord {
    pub fn new(key: impl Into<String>, compartment: CompartmentId) -> Self {
        Self {
            key: key.into(),
            compartment,
        }
    }

    /// Parse a line, splitting at the last colon. `None` if malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let (key, id) = line.trim().rsplit_once(':')?;
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key, id.parse().ok()?))
    }
}

impl fmt::Display for LedgerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.compartment)
    }
}

/// Appends records to a ledger file.
#[derive(Debug, Clone)]
pub struct LedgerWriter {
    path: PathBuf,
}

impl LedgerWriter {
    /// Writer for `<directory>/<file_name>`.
    pub fn new(directory: &Path, file_name: &str) -> Self {
        Self {
            path: directory.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and close the file.
    ///
    /// # Errors
    ///
    /// Any I/O failure is returned; the record is not retried.
    pub fn append(&self, key: &str, compartment: CompartmentId) -> Result<(), LedgerError> {
        let line = format!("{}\n", LedgerRecord::new(key, compartment));
        let err = |source| LedgerError::Append {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(err)?;
        file.write_all(line.as_bytes()).map_err(err)?;
        file.flush().map_err(err)?;

        trace!(path = %self.path.display(), key, %compartment, "ledger record appended");
        Ok(())
    }
}

/// All records of a ledger, in file order, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    records: Vec<LedgerRecord>,
    skipped: usize,
}

impl Ledger {
    /// Parse ledger text. Malformed lines (e.g. torn by a crashed writer)
    /// are skipped and counted.
    pub fn parse(text: &str) -> Self {
        let mut ledger = Self::default();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match LedgerRecord::parse(line) {
                Some(record) => ledger.records.push(record),
                None => {
                    warn!(line = idx + 1, text = line, "skipping malformed ledger record");
                    ledger.skipped += 1;
                }
            }
        }
        ledger
    }

    pub fn read(path: &Path) -> Result<Self, LedgerError> {
        fs::read_to_string(path)
            .map(|text| Self::parse(&text))
            .map_err(|source| LedgerError::Read {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    /// Number of malformed lines skipped while parsing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn contains(&self, key: &str, compartment: CompartmentId) -> bool {
        self.records
            .iter()
            .any(|r| r.key == key && r.compartment == compartment)
    }

    /// Every key with the set of ids recorded for it.
    pub fn assignments(&self) -> BTreeMap<&str, BTreeSet<CompartmentId>> {
        let mut assignments: BTreeMap<&str, BTreeSet<CompartmentId>> = BTreeMap::new();
        for record in &self.records {
            assignments
                .entry(record.key.as_str())
                .or_default()
                .insert(record.compartment);
        }
        assignments
    }

    /// Keys recorded with more than one distinct id.
    ///
    /// Whether these are errors (e.g. same-named static functions in
    /// different units) is for the link stage to decide.
    pub fn conflicts(&self) -> BTreeMap<&str, BTreeSet<CompartmentId>> {
        self.assignments()
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .collect()
    }
}
