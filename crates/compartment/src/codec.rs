// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Compartment map text format.
//!
//! One record per line:
//!
//! ```text
//! :5              default compartment for the unit (first record only)
//! foo:9           foo lives in compartment 9
//! bar:3:1         bar lives in compartment 3 and is always guarded (any non-zero flag)
//! baz:3:0         baz lives in compartment 3 and is never guarded
//! ```
//!
//! A bare integer first record (`5`) is also accepted as the default. Blank
//! lines and `#` comments are ignored.
//!
//! # Versions
//!
//! Unversioned maps split a record at its **last** colon, so names may
//! contain colons only in the two-field form. A three-field record is
//! recognised when the last field is an unsigned integer and the field before
//! it is an id.
//!
//! Maps starting with [`V2_HEADER`] split at unescaped colons instead; `\:`
//! and `\\` stand for a literal colon and backslash inside names. This is the
//! form [`serialize`] writes.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    CompartmentId,
    error::{MapError, ParseError},
};

/// First line of a versioned (escape-aware) map.
pub const V2_HEADER: &str = "#!compartment-map v2";

/// Extension of map and ledger files.
pub const MAP_EXTENSION: &str = "cap";

/// Per-function record of a compartment map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub compartment: CompartmentId,
    /// `Some(true)` forces the guard, `Some(false)` exempts the function.
    pub guard: Option<bool>,
}

impl MapEntry {
    pub fn new(compartment: CompartmentId) -> Self {
        Self {
            compartment,
            guard: None,
        }
    }

    pub fn with_guard(compartment: CompartmentId, guard: bool) -> Self {
        Self {
            compartment,
            guard: Some(guard),
        }
    }
}

/// Parsed compartment map of one translation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingFile {
    /// Default compartment set by the map's first record.
    pub default: Option<CompartmentId>,
    entries: BTreeMap<String, MapEntry>,
}

impl MappingFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, entry: MapEntry) -> Option<MapEntry> {
        self.entries.insert(name.into(), entry)
    }

    pub fn get(&self, name: &str) -> Option<&MapEntry> {
        self.entries.get(name)
    }

    pub fn compartment(&self, name: &str) -> Option<CompartmentId> {
        self.get(name).map(|entry| entry.compartment)
    }

    pub fn guard_override(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|entry| entry.guard)
    }

    /// Names explicitly forced (`true`) or exempted (`false`) by a guard flag.
    pub fn guard_overrides(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries
            .iter()
            .filter_map(|(name, entry)| entry.guard.map(|guard| (name.as_str(), guard)))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &MapEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Version {
    Legacy,
    Escaped,
}

/// One parsed line.
enum Record {
    Default(CompartmentId),
    Function { name: String, entry: MapEntry },
}

/// Parse map text.
///
/// # Errors
///
/// Any malformed record is an error: a wrong compartment is worse than none.
pub fn parse(text: &str) -> Result<MappingFile, ParseError> {
    let mut map = MappingFile::new();
    let mut version = Version::Legacy;
    let mut seen_record = false;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();

        if text.is_empty() {
            continue;
        }
        if text == V2_HEADER && !seen_record {
            version = Version::Escaped;
            continue;
        }
        if text.starts_with('#') {
            continue;
        }

        let record = match version {
            Version::Legacy => parse_legacy(text, line)?,
            Version::Escaped => parse_escaped(text, line)?,
        };

        match record {
            Record::Default(id) if seen_record => {
                debug!(line, %id, "default record after first record");
                return Err(ParseError::MisplacedDefault { line });
            }
            Record::Default(id) => map.default = Some(id),
            Record::Function { name, entry } => {
                if map.get(&name).is_some_and(|previous| *previous != entry) {
                    warn!(function = %name, line, "duplicate compartment map record, last one wins");
                }
                map.insert(name, entry);
            }
        }
        seen_record = true;
    }

    Ok(map)
}

/// Read and parse the map at `path`.
///
/// A missing file is `Ok(None)`: the unit simply has no map. Content that is
/// not UTF-8 is a parse error, not a read error.
pub fn read(path: &Path) -> Result<Option<MappingFile>, MapError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(MapError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let parse_error = |source| MapError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let text = String::from_utf8(bytes).map_err(|e| {
        let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
        let line = valid.iter().filter(|&&b| b == b'\n').count() + 1;
        parse_error(ParseError::InvalidUtf8 { line })
    })?;
    parse(&text).map(Some).map_err(parse_error)
}

/// Serialize a map in the versioned format.
pub fn serialize(map: &MappingFile) -> String {
    let mut out = String::new();
    out.push_str(V2_HEADER);
    out.push('\n');

    if let Some(default) = map.default {
        out.push_str(&format!(":{default}\n"));
    }
    for (name, entry) in map.entries() {
        out.push_str(&escape(name));
        out.push_str(&format!(":{}", entry.compartment));
        if let Some(guard) = entry.guard {
            out.push_str(if guard { ":1" } else { ":0" });
        }
        out.push('\n');
    }
    out
}

/// Write `map` to `path`, replacing any existing file.
pub fn write(path: &Path, map: &MappingFile) -> Result<(), MapError> {
    fs::write(path, serialize(map)).map_err(|source| MapError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// File name of the map for translation unit `unit_source`.
///
/// The extension of the last path component is dropped and every path
/// separator becomes `__`, so `src/net/tcp.c` maps to `src__net__tcp.cap`.
pub fn map_file_name(unit_source: &str) -> String {
    let mut source = unit_source;
    while let Some(rest) = source.strip_prefix("./") {
        source = rest;
    }

    let split = source.rfind(['/', '\\']).map_or(0, |sep| sep + 1);
    let (dir, file) = source.split_at(split);
    let stem = match file.rfind('.') {
        Some(0) | None => file,
        Some(dot) => &file[..dot],
    };

    let mut name = String::with_capacity(source.len() + 8);
    for c in dir.chars() {
        match c {
            '/' | '\\' => name.push_str("__"),
            c => name.push(c),
        }
    }
    name.push_str(stem);
    name.push('.');
    name.push_str(MAP_EXTENSION);
    name
}

/// Write a map listing every function of a unit in `compartment`.
///
/// Gives users a complete map to edit. Returns the path written.
pub fn write_unit_template<'a>(
    dir: &Path,
    unit_source: &str,
    functions: impl IntoIterator<Item = &'a str>,
    compartment: CompartmentId,
) -> Result<PathBuf, MapError> {
    let mut map = MappingFile::new();
    for name in functions {
        map.insert(name, MapEntry::new(compartment));
    }

    let path = dir.join(map_file_name(unit_source));
    write(&path, &map)?;
    debug!(path = %path.display(), functions = map.len(), "wrote compartment map template");
    Ok(path)
}

fn parse_id(value: &str, line: usize) -> Result<CompartmentId, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError::InvalidCompartment {
            line,
            value: value.trim().to_string(),
        })
}

fn parse_flag(value: &str, line: usize) -> Result<bool, ParseError> {
    value
        .trim()
        .parse::<u32>()
        .map(|flag| flag != 0)
        .map_err(|_| ParseError::InvalidGuardFlag {
            line,
            value: value.trim().to_string(),
        })
}

fn function_record(
    name: &str,
    id: &str,
    flag: Option<&str>,
    line: usize,
) -> Result<Record, ParseError> {
    let name = name.trim();
    let compartment = parse_id(id, line)?;
    match flag {
        None if name.is_empty() => Ok(Record::Default(compartment)),
        None => Ok(Record::Function {
            name: name.to_string(),
            entry: MapEntry::new(compartment),
        }),
        Some(_) if name.is_empty() => Err(ParseError::EmptyName { line }),
        Some(flag) => Ok(Record::Function {
            name: name.to_string(),
            entry: MapEntry::with_guard(compartment, parse_flag(flag, line)?),
        }),
    }
}

fn parse_legacy(text: &str, line: usize) -> Result<Record, ParseError> {
    let Some((head, last)) = text.rsplit_once(':') else {
        return parse_id(text, line).map(Record::Default);
    };

    // `name:id:flag` when the last two fields are both numeric; the flag
    // counts when non-zero.
    let last = last.trim();
    if last.parse::<u32>().is_ok() {
        if let Some((name, middle)) = head.rsplit_once(':') {
            if middle.parse::<CompartmentId>().is_ok() {
                return function_record(name, middle, Some(last), line);
            }
        }
    }

    function_record(head, last, None, line)
}

fn parse_escaped(text: &str, line: usize) -> Result<Record, ParseError> {
    let fields = split_escaped(text, line)?;
    match fields.as_slice() {
        [id] => parse_id(id, line).map(Record::Default),
        [name, id] => function_record(name, id, None, line),
        [name, id, flag] => function_record(name, id, Some(flag), line),
        _ => Err(ParseError::TooManyFields { line }),
    }
}

/// Split at unescaped colons, resolving `\:` and `\\`.
fn split_escaped(text: &str, line: usize) -> Result<Vec<String>, ParseError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(ParseError::DanglingEscape { line }),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    Ok(fields)
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '\\' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
