// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Trait abstractions over the host compiler's machine functions
//!
//! Implemented by:
//! - In-memory model: [`crate::Function`] over [`crate::Instruction`]
//! - Text assembly: `AsmFunction` (in instrumenter)

use std::fmt;

use crate::riscv::{self, CHECKCAP};

/// Source location attached to an instruction.
///
/// `file` is the assembler's file number (as in `.loc <file> <line> <col>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebugLoc {
    pub file: u32,
    pub line: u32,
    pub column: u32,
}

impl DebugLoc {
    pub fn new(file: u32, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for DebugLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Position of an instruction: block index, then index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPoint {
    pub block: usize,
    pub index: usize,
}

impl InsertPoint {
    /// The very first slot of the entry block.
    pub const ENTRY: Self = Self { block: 0, index: 0 };
}

/// What the pass needs to know about one machine instruction.
pub trait MachineInstr: Sized {
    /// Returns the mnemonic of this instruction (e.g. "addi", "checkcap").
    fn mnemonic(&self) -> &str;

    /// Returns the debug location, if the substrate recorded one.
    fn debug_loc(&self) -> Option<DebugLoc>;

    /// Builds a `checkcap` guard carrying `compartment` as its only immediate.
    ///
    /// `loc` is copied from the instruction the guard is placed before.
    fn entry_guard(compartment: u16, loc: Option<DebugLoc>) -> Self;

    /// Check if this is a `checkcap` guard.
    #[inline]
    fn is_entry_guard(&self) -> bool {
        self.mnemonic() == CHECKCAP
    }

    /// Check if this instruction ends a basic block.
    #[inline]
    fn is_terminator(&self) -> bool {
        riscv::is_terminator(self.mnemonic())
    }
}

/// A machine function as seen by the compartment pass.
///
/// Blocks are ordered; block 0 is the entry block.
pub trait MachineFunction {
    type Instr: MachineInstr;

    /// Symbol name of the function (unique within the unit).
    fn name(&self) -> &str;

    /// Declarations have no body and are never instrumented.
    fn is_declaration(&self) -> bool {
        false
    }

    /// Number of basic blocks.
    fn block_count(&self) -> usize;

    /// Instructions of block `index`, in order. Panics when out of range.
    fn block(&self, index: usize) -> &[Self::Instr];

    /// Insert `instr` before the instruction currently at `point`.
    ///
    /// `point.index` may equal the block length to append.
    fn insert_before(&mut self, point: InsertPoint, instr: Self::Instr);

    /// Current output section, if one has been assigned.
    fn section(&self) -> Option<&str>;

    /// Assign the output section the function is emitted into.
    fn set_section(&mut self, section: String);

    /// The entry block, or `None` for a function without blocks.
    fn entry_block(&self) -> Option<&[Self::Instr]> {
        (self.block_count() > 0).then(|| self.block(0))
    }

    /// The first instruction of the function, if any.
    fn first_instruction(&self) -> Option<&Self::Instr> {
        self.entry_block().and_then(|block| block.first())
    }

    /// Total number of instructions across all blocks.
    fn instruction_count(&self) -> usize {
        (0..self.block_count()).map(|b| self.block(b).len()).sum()
    }
}
