// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory machine functions
//!
//! [`Function`] is generic over the instruction type so that substrates with
//! their own instruction representation (e.g. text assembly that remembers
//! source lines) reuse the same block structure.

use std::fmt;

use crate::{
    riscv::CHECKCAP,
    traits::{DebugLoc, InsertPoint, MachineFunction, MachineInstr},
};

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Register by ABI or architectural name (e.g. "a0", "x10").
    Reg(String),
    /// Immediate value.
    Imm(i64),
    /// Symbol or label reference.
    Symbol(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => f.write_str(reg),
            Operand::Imm(imm) => write!(f, "{imm}"),
            Operand::Symbol(sym) => f.write_str(sym),
        }
    }
}

/// A plain machine instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub loc: Option<DebugLoc>,
}

impl Instruction {
    pub fn new(mnemonic: impl Into<String>, operands: Vec<Operand>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            operands,
            loc: None,
        }
    }

    /// Attach a debug location.
    pub fn at(mut self, loc: DebugLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    /// The first immediate operand, if any.
    pub fn immediate(&self) -> Option<i64> {
        self.operands.iter().find_map(|op| match op {
            Operand::Imm(imm) => Some(*imm),
            _ => None,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}

impl MachineInstr for Instruction {
    fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    fn debug_loc(&self) -> Option<DebugLoc> {
        self.loc
    }

    fn entry_guard(compartment: u16, loc: Option<DebugLoc>) -> Self {
        Self {
            mnemonic: CHECKCAP.to_string(),
            operands: vec![Operand::Imm(i64::from(compartment))],
            loc,
        }
    }
}

/// A basic block: an optional label and an ordered run of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<I> {
    pub label: Option<String>,
    pub instructions: Vec<I>,
}

impl<I> Block<I> {
    pub fn new(label: Option<String>) -> Self {
        Self {
            label,
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(label: Option<String>, instructions: Vec<I>) -> Self {
        Self {
            label,
            instructions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// A machine function made of ordered basic blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function<I = Instruction> {
    pub name: String,
    pub blocks: Vec<Block<I>>,
    pub section: Option<String>,
    /// True for functions that are only declared in this unit.
    pub declaration: bool,
}

impl<I> Function<I> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            section: None,
            declaration: false,
        }
    }

    /// A function without a body.
    pub fn declaration(name: impl Into<String>) -> Self {
        Self {
            declaration: true,
            ..Self::new(name)
        }
    }

    pub fn with_block(mut self, block: Block<I>) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn push_block(&mut self, block: Block<I>) {
        self.blocks.push(block);
    }

    /// Iterate all instructions in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &I> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

impl<I: MachineInstr> MachineFunction for Function<I> {
    type Instr = I;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_declaration(&self) -> bool {
        self.declaration
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block(&self, index: usize) -> &[I] {
        &self.blocks[index].instructions
    }

    fn insert_before(&mut self, point: InsertPoint, instr: I) {
        self.blocks[point.block]
            .instructions
            .insert(point.index, instr);
    }

    fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    fn set_section(&mut self, section: String) {
        self.section = Some(section);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addi(rd: &str, rs: &str, imm: i64) -> Instruction {
        Instruction::new(
            "addi",
            vec![
                Operand::Reg(rd.into()),
                Operand::Reg(rs.into()),
                Operand::Imm(imm),
            ],
        )
    }

    #[test]
    fn test_display_instruction() {
        assert_eq!(addi("sp", "sp", -16).to_string(), "addi sp, sp, -16");
        assert_eq!(Instruction::new("ret", vec![]).to_string(), "ret");
    }

    #[test]
    fn test_entry_guard_carries_immediate_and_loc() {
        let loc = DebugLoc::new(1, 12, 3);
        let guard = Instruction::entry_guard(9, Some(loc));
        assert!(guard.is_entry_guard());
        assert_eq!(guard.immediate(), Some(9));
        assert_eq!(guard.debug_loc(), Some(loc));
        assert_eq!(guard.to_string(), "checkcap 9");
    }

    #[test]
    fn test_insert_before_entry() {
        let mut func: Function = Function::new("f").with_block(Block::with_instructions(
            None,
            vec![addi("sp", "sp", -16), Instruction::new("ret", vec![])],
        ));
        func.insert_before(InsertPoint::ENTRY, Instruction::entry_guard(1, None));

        let mnemonics: Vec<_> = func.instructions().map(|i| i.mnemonic.as_str()).collect();
        assert_eq!(mnemonics, ["checkcap", "addi", "ret"]);
        assert_eq!(func.instruction_count(), 3);
    }

    #[test]
    fn test_entry_block_of_empty_function() {
        let func: Function = Function::new("empty");
        assert!(func.entry_block().is_none());
        assert!(func.first_instruction().is_none());
        assert_eq!(func.instruction_count(), 0);
    }

    #[test]
    fn test_declaration() {
        let func: Function = Function::declaration("extern_fn");
        assert!(func.is_declaration());
    }

    #[test]
    fn test_terminator_classification_through_trait() {
        assert!(Instruction::new("ret", vec![]).is_terminator());
        assert!(!addi("a0", "a0", 1).is_terminator());
    }
}
