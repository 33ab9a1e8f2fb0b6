// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! RISC-V mnemonic classification
//!
//! Only what block recovery needs: which mnemonics end a basic block. The
//! table covers the base ISA control transfers, the compressed forms and the
//! assembler pseudo-instructions that compilers emit.

/// Mnemonic of the compartment entry guard.
pub const CHECKCAP: &str = "checkcap";

/// Major opcode used when the guard is spelled as a raw `.insn` (custom-0).
pub const CHECKCAP_MAJOR_OPCODE: u8 = 0x0b;

/// Largest id an I-type immediate (signed 12 bits) can carry.
pub const INSN_MAX_COMPARTMENT: u16 = 2047;

/// How the guard is spelled in emitted assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GuardSyntax {
    /// `checkcap <id>`, for assemblers that know the extension.
    #[default]
    Mnemonic,
    /// `.insn i 0x0b, 0, x0, x0, <id>`, accepted by any GNU-compatible assembler.
    Insn,
}

impl GuardSyntax {
    /// Whether `compartment` can be spelled in this syntax.
    pub fn encodes(self, compartment: u16) -> bool {
        match self {
            GuardSyntax::Mnemonic => true,
            GuardSyntax::Insn => compartment <= INSN_MAX_COMPARTMENT,
        }
    }

    /// Render the guard for `compartment` without indentation.
    pub fn render(self, compartment: u16) -> String {
        match self {
            GuardSyntax::Mnemonic => format!("{CHECKCAP} {compartment}"),
            GuardSyntax::Insn => {
                format!(".insn i {CHECKCAP_MAJOR_OPCODE:#04x}, 0, x0, x0, {compartment}")
            }
        }
    }
}

/// Classification of a RISC-V mnemonic
pub struct ClassifiedOpcode {
    /// The mnemonic string (e.g., "beq", "ret")
    pub mnemonic: &'static str,
    /// Control flow: is this a branch or jump?
    pub is_branch: bool,
    /// Control flow: is this a call? (jal/jalr with link, call, tail)
    pub is_call: bool,
    /// Control flow: is this a return?
    pub is_return: bool,
    /// Control flow: can this instruction fall through?
    pub is_conditional: bool,
}

impl ClassifiedOpcode {
    const fn jump(mnemonic: &'static str) -> Self {
        Self {
            mnemonic,
            is_branch: true,
            is_call: false,
            is_return: false,
            is_conditional: false,
        }
    }

    const fn conditional(mnemonic: &'static str) -> Self {
        Self {
            mnemonic,
            is_branch: true,
            is_call: false,
            is_return: false,
            is_conditional: true,
        }
    }

    const fn call(mnemonic: &'static str) -> Self {
        Self {
            mnemonic,
            is_branch: true,
            is_call: true,
            is_return: false,
            is_conditional: false,
        }
    }

    const fn ret(mnemonic: &'static str) -> Self {
        Self {
            mnemonic,
            is_branch: true,
            is_call: false,
            is_return: true,
            is_conditional: false,
        }
    }

    /// Look up a mnemonic (case-insensitive). Unknown mnemonics are not control flow.
    pub fn from_mnemonic(mnemonic: &str) -> Option<&'static Self> {
        CONTROL_FLOW
            .iter()
            .find(|op| op.mnemonic.eq_ignore_ascii_case(mnemonic))
    }

    /// Does this instruction end a basic block?
    ///
    /// Calls return to the next instruction, so they do not.
    pub fn is_terminator(&self) -> bool {
        self.is_branch && !self.is_call
    }
}

static CONTROL_FLOW: &[ClassifiedOpcode] = &[
    // Unconditional jumps
    ClassifiedOpcode::jump("j"),
    ClassifiedOpcode::jump("jr"),
    ClassifiedOpcode::jump("c.j"),
    ClassifiedOpcode::jump("c.jr"),
    // Tail calls leave the function, so they end the block
    ClassifiedOpcode::jump("tail"),
    // Conditional branches
    ClassifiedOpcode::conditional("beq"),
    ClassifiedOpcode::conditional("bne"),
    ClassifiedOpcode::conditional("blt"),
    ClassifiedOpcode::conditional("bge"),
    ClassifiedOpcode::conditional("bltu"),
    ClassifiedOpcode::conditional("bgeu"),
    ClassifiedOpcode::conditional("beqz"),
    ClassifiedOpcode::conditional("bnez"),
    ClassifiedOpcode::conditional("blez"),
    ClassifiedOpcode::conditional("bgez"),
    ClassifiedOpcode::conditional("bltz"),
    ClassifiedOpcode::conditional("bgtz"),
    ClassifiedOpcode::conditional("bgt"),
    ClassifiedOpcode::conditional("ble"),
    ClassifiedOpcode::conditional("bgtu"),
    ClassifiedOpcode::conditional("bleu"),
    ClassifiedOpcode::conditional("c.beqz"),
    ClassifiedOpcode::conditional("c.bnez"),
    // Calls
    ClassifiedOpcode::call("call"),
    ClassifiedOpcode::call("jal"),
    ClassifiedOpcode::call("jalr"),
    ClassifiedOpcode::call("c.jal"),
    ClassifiedOpcode::call("c.jalr"),
    // Returns
    ClassifiedOpcode::ret("ret"),
    ClassifiedOpcode::ret("mret"),
    ClassifiedOpcode::ret("sret"),
];

/// Check if `mnemonic` ends a basic block.
pub fn is_terminator(mnemonic: &str) -> bool {
    ClassifiedOpcode::from_mnemonic(mnemonic).is_some_and(ClassifiedOpcode::is_terminator)
}
