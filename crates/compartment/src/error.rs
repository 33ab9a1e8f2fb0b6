// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the compartment pass.

use std::{io, path::PathBuf};

use thiserror::Error;

/// A malformed record in a compartment map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The id field is not an unsigned 16-bit integer.
    #[error("line {line}: invalid compartment id '{value}'")]
    InvalidCompartment { line: usize, value: String },
    /// The guard flag field is not an unsigned integer.
    #[error("line {line}: invalid guard flag '{value}'")]
    InvalidGuardFlag { line: usize, value: String },
    /// A default-only record after the first record.
    #[error("line {line}: default compartment must be the first record")]
    MisplacedDefault { line: usize },
    /// A guard flag without a function name.
    #[error("line {line}: guard flag given without a function name")]
    EmptyName { line: usize },
    /// More fields than `<name>:<id>:<flag>`.
    #[error("line {line}: too many fields")]
    TooManyFields { line: usize },
    /// Bytes that are not UTF-8.
    #[error("line {line}: invalid UTF-8")]
    InvalidUtf8 { line: usize },
    /// A trailing backslash in a versioned map.
    #[error("line {line}: dangling escape")]
    DanglingEscape { line: usize },
}

/// Errors reading or writing compartment maps.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read compartment map {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write compartment map {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("malformed compartment map {path}: {source}")]
    Parse { path: PathBuf, source: ParseError },
}

/// Errors recording to or reading from the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no ledger directory configured (set --ledger-dir or CHECKCAP_LEDGER_DIR)")]
    MissingDirectory,

    #[error("failed to append to ledger {path}: {source}")]
    Append { path: PathBuf, source: io::Error },

    #[error("failed to read ledger {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

/// Fatal errors of the pass driver.
#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result type alias for pass operations
pub type PassResult<T> = Result<T, PassError>;
