// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, num::ParseIntError, str::FromStr};

/// Numeric compartment (security domain) identifier.
///
/// `0..=255` are valid in a linked program. Larger values are tolerated while
/// resolving so that sentinels such as [`CompartmentId::UNSET`] can flow
/// through; callers narrow them before the final link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompartmentId(u16);

impl CompartmentId {
    /// No explicit mapping and no configured default.
    pub const UNSET: Self = Self(266);

    /// Largest id valid in a linked program.
    pub const MAX_VALID: u16 = 255;

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn is_program_valid(self) -> bool {
        self.0 <= Self::MAX_VALID
    }

    pub const fn is_unset(self) -> bool {
        self.0 == Self::UNSET.0
    }
}

impl From<u16> for CompartmentId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl FromStr for CompartmentId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for CompartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
