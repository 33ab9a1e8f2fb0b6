// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Machine-function seam for the compartment pass
//!
//! The compartment pass never owns the compiler's IR. It only needs to:
//! - read a function's name and its ordered blocks of instructions
//! - read the debug location of an instruction
//! - insert one instruction before a position
//! - set the function's output section
//!
//! # Architecture
//!
//! - [`MachineInstr`]: what the pass needs from a single instruction, plus a
//!   constructor for the entry guard so each substrate builds its own.
//! - [`MachineFunction`]: block access, insertion and section assignment.
//! - [`Function`] / [`Block`]: a generic in-memory model implementing
//!   `MachineFunction` for any instruction type.
//! - [`riscv`]: RISC-V mnemonic classification and the `checkcap` guard.

pub mod function;
pub mod riscv;
pub mod traits;

pub use function::{Block, Function, Instruction, Operand};
pub use riscv::{CHECKCAP, ClassifiedOpcode, GuardSyntax, INSN_MAX_COMPARTMENT};
pub use traits::{DebugLoc, InsertPoint, MachineFunction, MachineInstr};
