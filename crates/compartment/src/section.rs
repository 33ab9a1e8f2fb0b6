// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::CompartmentId;

/// Prefix of compartment text sections; the decimal id follows.
pub const DEFAULT_SECTION_PREFIX: &str = ".text.compartment.";

/// Derives the linker section a compartment's code is emitted into.
///
/// Every function of one compartment lands in the same section, so the link
/// stage can place and protect a compartment as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNamer {
    prefix: String,
}

impl Default for SectionNamer {
    fn default() -> Self {
        Self::new(DEFAULT_SECTION_PREFIX)
    }
}

impl SectionNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name_for(&self, compartment: CompartmentId) -> String {
        format!("{}{}", self.prefix, compartment)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_name_embeds_decimal_id() {
        let namer = SectionNamer::default();
        assert_eq!(namer.name_for(CompartmentId::new(7)), ".text.compartment.7");
        assert_eq!(
            namer.name_for(CompartmentId::UNSET),
            ".text.compartment.266"
        );
    }

    #[test]
    fn test_stable_across_calls() {
        let namer = SectionNamer::default();
        let id = CompartmentId::new(42);
        assert_eq!(namer.name_for(id), namer.name_for(id));
    }

    #[test]
    fn test_distinct_ids_give_distinct_names() {
        let namer = SectionNamer::default();
        let names: HashSet<_> = (0..=300u16)
            .map(|v| namer.name_for(CompartmentId::new(v)))
            .collect();
        assert_eq!(names.len(), 301);
    }

    #[test]
    fn test_custom_prefix() {
        let namer = SectionNamer::new(".cap.");
        assert_eq!(namer.name_for(CompartmentId::new(1)), ".cap.1");
    }
}
