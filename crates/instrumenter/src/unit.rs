// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Functions recovered from an assembly unit
//!
//! An [`AsmUnit`] exposes each function of a `.s` file as a
//! [`MachineFunction`], so the compartment pass runs on text assembly exactly
//! as it runs on an in-memory function. Rendering reproduces every original
//! line and adds only what the pass asked for:
//!
//! ```asm
//!     .pushsection .text.compartment.7,"ax",@progbits   # added
//!     .globl  foo
//!     .type   foo,@function
//! foo:
//!     .loc    1 3 0
//!     checkcap 7                                         # added
//!     addi    sp, sp, -16
//!     ...
//!     .size   foo, .Lfunc_end0-foo
//!     .cfi_endproc
//!     .popsection                                        # added
//! ```
//!
//! # Function recovery
//!
//! Functions are the labels typed `@function` by a `.type` directive. A file
//! without any `.type` (typical of hand-written assembly) instead treats every
//! non-local label that reaches an instruction before the next non-local
//! label as a function.
//!
//! A function's region runs from the symbol directives right above its label
//! (`.globl`, `.p2align`, `.type`, ...) to its `.size` directive and any CFI
//! directives right after it. Without `.size` it ends at the last instruction
//! or trailing non-section directive. Inside a region, a switch back to
//! `.text` (after a jump table in `.rodata`, say) is rewritten to switch to
//! the function's compartment section instead.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    ops::RangeInclusive,
};

use machine::{
    Block, DebugLoc, Function, GuardSyntax, InsertPoint, MachineFunction, MachineInstr,
};
use tracing::debug;

use crate::{
    error::AsmError,
    parser::{ParsedAssembly, ParsedInstruction, ParsedLine, Statement},
};

/// Symbol directives that belong to the function they precede.
const LEADING_DIRECTIVES: &[&str] = &[
    ".globl",
    ".global",
    ".local",
    ".weak",
    ".hidden",
    ".protected",
    ".internal",
    ".type",
    ".p2align",
    ".align",
    ".balign",
];

/// Directives that switch the current section.
const SECTION_DIRECTIVES: &[&str] = &[
    ".section",
    ".text",
    ".data",
    ".bss",
    ".rodata",
    ".pushsection",
    ".popsection",
    ".previous",
];

/// An instruction of an assembly unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmInstruction {
    pub mnemonic: String,
    pub operands: Vec<String>,
    /// Location from the `.loc` in effect.
    pub loc: Option<DebugLoc>,
    /// Index of the source line; `None` for inserted instructions.
    pub line: Option<usize>,
}

impl AsmInstruction {
    fn from_parsed(parsed: &ParsedInstruction<'_>, loc: Option<DebugLoc>, line: usize) -> Self {
        Self {
            mnemonic: parsed.mnemonic.to_string(),
            operands: parsed.operands.iter().map(|op| op.to_string()).collect(),
            loc,
            line: Some(line),
        }
    }

    /// Text of an inserted instruction, without indentation.
    fn render(&self, syntax: GuardSyntax) -> String {
        match self.operands.as_slice() {
            [id] if self.is_entry_guard() => match id.parse() {
                Ok(id) => syntax.render(id),
                Err(_) => self.to_string(),
            },
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for AsmInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands.join(", "))?;
        }
        Ok(())
    }
}

impl MachineInstr for AsmInstruction {
    fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    fn debug_loc(&self) -> Option<DebugLoc> {
        self.loc
    }

    fn entry_guard(compartment: u16, loc: Option<DebugLoc>) -> Self {
        Self {
            mnemonic: machine::CHECKCAP.to_string(),
            operands: vec![compartment.to_string()],
            loc,
            line: None,
        }
    }
}

/// A function of an assembly unit and where it sits in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmFunction {
    function: Function<AsmInstruction>,
    label_line: usize,
    region: RangeInclusive<usize>,
}

impl AsmFunction {
    /// Index of the line defining the function's label.
    pub fn label_line(&self) -> usize {
        self.label_line
    }

    /// Line indices wrapped into the function's section.
    pub fn region(&self) -> &RangeInclusive<usize> {
        &self.region
    }

    pub fn function(&self) -> &Function<AsmInstruction> {
        &self.function
    }
}

impl MachineFunction for AsmFunction {
    type Instr = AsmInstruction;

    fn name(&self) -> &str {
        self.function.name()
    }

    fn block_count(&self) -> usize {
        self.function.block_count()
    }

    fn block(&self, index: usize) -> &[AsmInstruction] {
        self.function.block(index)
    }

    fn insert_before(&mut self, point: InsertPoint, instr: AsmInstruction) {
        self.function.insert_before(point, instr);
    }

    fn section(&self) -> Option<&str> {
        self.function.section()
    }

    fn set_section(&mut self, section: String) {
        self.function.set_section(section);
    }
}

/// A parsed assembly file and the functions recovered from it.
#[derive(Debug, Clone)]
pub struct AsmUnit<'a> {
    asm: ParsedAssembly<'a>,
    functions: Vec<AsmFunction>,
}

impl<'a> AsmUnit<'a> {
    /// Parse `input` and recover its functions.
    ///
    /// # Errors
    ///
    /// - [`AsmError::UndefinedFunction`]: a `.type`d function has no label
    /// - [`AsmError::DuplicateFunction`]: a function label appears twice
    pub fn parse(input: &'a str) -> Result<Self, AsmError> {
        let asm = ParsedAssembly::parse(input);
        let lines = asm.lines();
        let starts = function_starts(lines)?;
        let locs = locations(lines);

        let mut functions = Vec::with_capacity(starts.len());
        let mut floor = 0;
        for (i, &(name, label_line)) in starts.iter().enumerate() {
            let limit = starts.get(i + 1).map_or(lines.len(), |&(_, next)| next);
            let start = region_start(lines, label_line, floor);
            let end = region_end(lines, name, label_line, limit);
            floor = end + 1;

            let function = collect_blocks(lines, &locs, name, label_line, end);
            debug!(
                function = name,
                line = lines[label_line].line_number,
                blocks = function.blocks.len(),
                "recovered function"
            );
            functions.push(AsmFunction {
                function,
                label_line,
                region: start..=end,
            });
        }

        Ok(Self { asm, functions })
    }

    pub fn lines(&self) -> &[ParsedLine<'a>] {
        self.asm.lines()
    }

    pub fn functions(&self) -> &[AsmFunction] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [AsmFunction] {
        &mut self.functions
    }

    /// Names of the functions, in file order.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name())
    }

    /// Reproduce the file with inserted instructions and section wrapping.
    pub fn render(&self, syntax: GuardSyntax) -> String {
        let mut before: HashMap<usize, Vec<&AsmInstruction>> = HashMap::new();
        let mut after: HashMap<usize, Vec<&AsmInstruction>> = HashMap::new();
        let mut opens: HashMap<usize, &str> = HashMap::new();
        let mut closes: HashSet<usize> = HashSet::new();
        let mut returns: HashMap<usize, &str> = HashMap::new();

        for function in &self.functions {
            if let Some(section) = function.section() {
                opens.insert(*function.region.start(), section);
                closes.insert(*function.region.end());
                // Jump tables detour through `.rodata`; the way back must land
                // in the compartment, not in plain `.text`.
                for idx in function.region.clone().skip(1) {
                    if is_text_switch(&self.lines()[idx]) {
                        returns.insert(idx, section);
                    }
                }
            }

            // Inserted instructions are anchored to the next original one.
            let mut pending = Vec::new();
            let mut last_line = function.label_line;
            for instr in function.function.instructions() {
                match instr.line {
                    None => pending.push(instr),
                    Some(line) => {
                        before.entry(line).or_default().append(&mut pending);
                        last_line = line;
                    }
                }
            }
            if !pending.is_empty() {
                after.entry(last_line).or_default().extend(pending);
            }
        }

        let mut output = String::new();
        for (idx, line) in self.lines().iter().enumerate() {
            if let Some(section) = opens.get(&idx) {
                output.push_str(&format!("\t.pushsection\t{section},\"ax\",@progbits\n"));
            }

            let inserted = before.get(&idx).filter(|inserted| !inserted.is_empty());
            match (inserted, returns.get(&idx)) {
                (Some(inserted), _) => emit_before(&mut output, line, inserted, syntax),
                (None, Some(section)) => emit_return(&mut output, line, section),
                (None, None) => {
                    output.push_str(line.original);
                    output.push('\n');
                }
            }

            if let Some(inserted) = after.get(&idx) {
                for instr in inserted {
                    emit(&mut output, indent_of(line), instr, syntax);
                }
            }
            if closes.contains(&idx) {
                output.push_str("\t.popsection\n");
            }
        }
        output
    }
}

/// Emit `inserted` ahead of `line`, splitting off a label on the same line.
fn emit_before(
    output: &mut String,
    line: &ParsedLine<'_>,
    inserted: &[&AsmInstruction],
    syntax: GuardSyntax,
) {
    match line.split_at_label() {
        Some((label, rest)) => {
            output.push_str(label);
            output.push('\n');
            for instr in inserted {
                emit(output, "\t", instr, syntax);
            }
            output.push('\t');
            output.push_str(rest.trim_start());
            output.push('\n');
        }
        None => {
            for instr in inserted {
                emit(output, indent_of(line), instr, syntax);
            }
            output.push_str(line.original);
            output.push('\n');
        }
    }
}

/// Replace a switch back to `.text` with a switch to `section`.
fn emit_return(output: &mut String, line: &ParsedLine<'_>, section: &str) {
    if let Some((label, _)) = line.split_at_label() {
        output.push_str(label);
        output.push('\n');
    }
    output.push_str(indent_of(line));
    output.push_str(&format!(".section\t{section},\"ax\",@progbits\n"));
}

fn emit(output: &mut String, indent: &str, instr: &AsmInstruction, syntax: GuardSyntax) {
    output.push_str(indent);
    output.push_str(&instr.render(syntax));
    output.push('\n');
}

fn indent_of<'a>(line: &ParsedLine<'a>) -> &'a str {
    match line.indent() {
        "" => "\t",
        indent => indent,
    }
}

/// Local labels never start a function.
fn is_local_label(label: &str) -> bool {
    label.starts_with(".L") || label.starts_with(|c: char| c.is_ascii_digit())
}

fn is_section_switch(line: &ParsedLine<'_>) -> bool {
    line.directive()
        .is_some_and(|d| SECTION_DIRECTIVES.contains(&d.name))
}

/// `.text` or `.section .text*`.
fn is_text_switch(line: &ParsedLine<'_>) -> bool {
    match line.directive() {
        Some(d) if d.name == ".text" => true,
        Some(d) if d.name == ".section" => d
            .arguments()
            .first()
            .is_some_and(|name| name.starts_with(".text")),
        _ => false,
    }
}

/// Function labels with their line indices, in file order.
fn function_starts<'a>(lines: &[ParsedLine<'a>]) -> Result<Vec<(&'a str, usize)>, AsmError> {
    let mut declared: Vec<(&'a str, usize)> = Vec::new();
    for line in lines {
        if let Some(name) = line.directive().and_then(|d| d.function_type()) {
            if !declared.iter().any(|&(seen, _)| seen == name) {
                declared.push((name, line.line_number));
            }
        }
    }

    let names: HashSet<&str> = declared.iter().map(|&(name, _)| name).collect();
    let is_function = |label: &str, idx: usize| {
        if names.is_empty() {
            !is_local_label(label) && reaches_instruction(lines, idx)
        } else {
            names.contains(label)
        }
    };

    let mut starts: Vec<(&'a str, usize)> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some(label) = line.label else { continue };
        if !is_function(label, idx) {
            continue;
        }
        if starts.iter().any(|&(seen, _)| seen == label) {
            return Err(AsmError::DuplicateFunction {
                name: label.to_string(),
                line: line.line_number,
            });
        }
        starts.push((label, idx));
    }

    for (name, line) in declared {
        if !starts.iter().any(|&(defined, _)| defined == name) {
            return Err(AsmError::UndefinedFunction {
                name: name.to_string(),
                line,
            });
        }
    }
    Ok(starts)
}

/// Whether the label at `idx` reaches an instruction before the next
/// non-local label or section switch.
fn reaches_instruction(lines: &[ParsedLine<'_>], idx: usize) -> bool {
    if lines[idx].instruction().is_some() {
        return true;
    }
    for line in &lines[idx + 1..] {
        if line.label.is_some_and(|label| !is_local_label(label)) || is_section_switch(line) {
            return false;
        }
        if line.instruction().is_some() {
            return true;
        }
    }
    false
}

/// The `.loc` in effect at every line.
fn locations(lines: &[ParsedLine<'_>]) -> Vec<Option<DebugLoc>> {
    let mut current = None;
    lines
        .iter()
        .map(|line| {
            if let Some(loc) = line.directive().and_then(|d| d.debug_loc()) {
                current = Some(loc);
            }
            current
        })
        .collect()
}

/// First line of the symbol directives directly above `label_line`.
fn region_start(lines: &[ParsedLine<'_>], label_line: usize, floor: usize) -> usize {
    let mut start = label_line;
    for idx in (floor..label_line).rev() {
        let line = &lines[idx];
        if line.label.is_some() {
            break;
        }
        match &line.statement {
            Statement::Empty => {}
            Statement::Directive(d) if LEADING_DIRECTIVES.contains(&d.name) => start = idx,
            _ => break,
        }
    }
    start
}

/// Last line of the function starting at `label_line`; `limit` is the next
/// function's label line.
fn region_end(lines: &[ParsedLine<'_>], name: &str, label_line: usize, limit: usize) -> usize {
    let size = (label_line + 1..limit)
        .find(|&idx| lines[idx].directive().and_then(|d| d.size_of()) == Some(name));
    if let Some(size) = size {
        // LLVM closes the CFI frame after `.size`; it must stay in the section
        // that opened it.
        return (size + 1..limit)
            .take_while(|&idx| {
                let line = &lines[idx];
                line.label.is_none()
                    && (line.statement == Statement::Empty
                        || line.directive().is_some_and(|d| d.name.starts_with(".cfi_")))
            })
            .filter(|&idx| lines[idx].directive().is_some())
            .last()
            .unwrap_or(size);
    }

    let mut end = label_line;
    for (idx, line) in lines.iter().enumerate().take(limit).skip(label_line + 1) {
        match &line.statement {
            Statement::Instruction(_) => end = idx,
            Statement::Directive(d) if SECTION_DIRECTIVES.contains(&d.name) => break,
            Statement::Directive(d) if !LEADING_DIRECTIVES.contains(&d.name) => end = idx,
            _ => {}
        }
    }
    end
}

/// Split the instructions of `label_line..=end` into basic blocks.
///
/// A block starts at a label or after a terminator; consecutive labels name
/// the same block.
fn collect_blocks(
    lines: &[ParsedLine<'_>],
    locs: &[Option<DebugLoc>],
    name: &str,
    label_line: usize,
    end: usize,
) -> Function<AsmInstruction> {
    let mut function = Function::new(name);
    let mut current = Block::new(Some(name.to_string()));
    // Inside a data detour such as a jump table in `.rodata`.
    let mut in_data = false;

    for idx in label_line..=end {
        let line = &lines[idx];
        if is_section_switch(line) {
            in_data = !is_text_switch(line)
                && line
                    .directive()
                    .is_some_and(|d| !matches!(d.name, ".previous" | ".popsection"));
        }
        if in_data {
            continue;
        }
        if let Some(label) = line.label.filter(|_| idx != label_line) {
            if !current.is_empty() {
                let next = Block::new(Some(label.to_string()));
                function.push_block(std::mem::replace(&mut current, next));
            } else if current.label.is_none() {
                current.label = Some(label.to_string());
            }
        }

        if let Some(parsed) = line.instruction() {
            let instr = AsmInstruction::from_parsed(parsed, locs[idx], idx);
            let terminates = instr.is_terminator();
            current.instructions.push(instr);
            if terminates {
                function.push_block(std::mem::replace(&mut current, Block::new(None)));
            }
        }
    }

    if !current.is_empty() {
        function.push_block(current);
    }
    function
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const LLVM_STYLE: &str = indoc! {r#"
        	.text
        	.attribute	4, 16
        	.file	"add.c"
        	.globl	add                             # -- Begin function add
        	.p2align	1
        	.type	add,@function
        add:                                    # @add
        .Lfunc_begin0:
        	.loc	1 1 0
        	.cfi_startproc
        # %bb.0:
        	.loc	1 2 12 prologue_end
        	addw	a0, a0, a1
        	ret
        .Lfunc_end0:
        	.size	add, .Lfunc_end0-add
        	.cfi_endproc
                                                # -- End function
        	.ident	"clang"
    "#};

    fn guard_all(unit: &mut AsmUnit<'_>, id: u16) {
        for function in unit.functions_mut() {
            let loc = function.first_instruction().and_then(|i| i.debug_loc());
            function.insert_before(InsertPoint::ENTRY, AsmInstruction::entry_guard(id, loc));
            function.set_section(format!(".text.compartment.{id}"));
        }
    }

    #[test]
    fn test_recovers_typed_function() {
        let unit = AsmUnit::parse(LLVM_STYLE).unwrap();
        assert_eq!(unit.function_names().collect::<Vec<_>>(), ["add"]);

        let add = &unit.functions()[0];
        assert_eq!(add.label_line(), 6);
        // .globl .. .cfi_endproc
        assert_eq!(add.region(), &(3..=16));
        assert_eq!(add.block_count(), 1);

        let first = add.first_instruction().unwrap();
        assert_eq!(first.mnemonic, "addw");
        assert_eq!(first.loc, Some(DebugLoc::new(1, 2, 12)));
    }

    #[test]
    fn test_render_without_changes_is_identity() {
        let unit = AsmUnit::parse(LLVM_STYLE).unwrap();
        assert_eq!(unit.render(GuardSyntax::Mnemonic), LLVM_STYLE);
    }

    #[test]
    fn test_render_guard_and_section() {
        let mut unit = AsmUnit::parse(LLVM_STYLE).unwrap();
        guard_all(&mut unit, 5);
        let output = unit.render(GuardSyntax::Mnemonic);

        let source: Vec<_> = LLVM_STYLE.lines().collect();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[3], "\t.pushsection\t.text.compartment.5,\"ax\",@progbits");
        assert_eq!(lines[4], source[3]);
        assert_eq!(lines[12], source[11]);
        assert_eq!(lines[13], "\tcheckcap 5");
        assert_eq!(lines[14], source[12]);
        assert_eq!(lines[18], source[16]);
        assert_eq!(lines[19], "\t.popsection");
        assert_eq!(lines.len(), source.len() + 3);
    }

    #[test]
    fn test_render_insn_syntax() {
        let mut unit = AsmUnit::parse(LLVM_STYLE).unwrap();
        guard_all(&mut unit, 9);
        let output = unit.render(GuardSyntax::Insn);
        assert!(output.contains("\t.insn i 0x0b, 0, x0, x0, 9\n\taddw"));
        assert!(!output.contains("checkcap"));
    }

    #[test]
    fn test_blocks_split_at_labels_and_terminators() {
        let unit = AsmUnit::parse(indoc! {"
            \t.type count,@function
            count:
            \tli a1, 0
            .LBB0_1:
            \taddi a1, a1, 1
            \tbne a1, a0, .LBB0_1
            \tmv a0, a1
            \tret
            \t.size count, .-count
        "})
        .unwrap();

        let count = unit.functions()[0].function();
        let blocks: Vec<_> = count
            .blocks
            .iter()
            .map(|b| (b.label.as_deref(), b.instructions.len()))
            .collect();
        assert_eq!(
            blocks,
            [(Some("count"), 1), (Some(".LBB0_1"), 2), (None, 2)]
        );
    }

    #[test]
    fn test_untyped_labels_reaching_instructions_are_functions() {
        let unit = AsmUnit::parse(indoc! {"
            \t.text
            \t.globl _start
            _start:
            \tcall main
            \tj _start
            main:
            .Lentry:
            \tli a0, 0
            \tret
            \t.data
            counter:
            \t.word 0
        "})
        .unwrap();

        assert_eq!(unit.function_names().collect::<Vec<_>>(), ["_start", "main"]);
        let start = &unit.functions()[0];
        assert_eq!(start.region(), &(1..=4));
        // Without .size, main ends at its last instruction.
        assert_eq!(unit.functions()[1].region(), &(5..=8));
    }

    #[test]
    fn test_label_and_instruction_on_one_line() {
        let input = "leaf: ret\n";
        let mut unit = AsmUnit::parse(input).unwrap();
        guard_all(&mut unit, 3);

        assert_eq!(
            unit.render(GuardSyntax::Mnemonic),
            indoc! {"
                \t.pushsection\t.text.compartment.3,\"ax\",@progbits
                leaf:
                \tcheckcap 3
                \tret
                \t.popsection
            "}
        );
    }

    #[test]
    fn test_return_to_text_stays_in_compartment() {
        let input = indoc! {"
            \t.type pick,@function
            pick:
            \tjr a5
            \t.section .rodata
            .Ltable:
            \t.word .Lone
            \t.text
            .Lone:
            \tret
            \t.size pick, .-pick
            \t.text
        "};
        let mut unit = AsmUnit::parse(input).unwrap();
        let blocks: Vec<_> = unit.functions()[0]
            .function()
            .blocks
            .iter()
            .map(|b| b.label.as_deref())
            .collect();
        assert_eq!(blocks, [Some("pick"), Some(".Lone")]);

        guard_all(&mut unit, 6);
        let output = unit.render(GuardSyntax::Mnemonic);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[7], "\t.section\t.text.compartment.6,\"ax\",@progbits");
        assert_eq!(lines[8], ".Lone:");
        assert_eq!(lines[11], "\t.popsection");
        // Outside the region the switch is left alone.
        assert_eq!(lines[12], "\t.text");
    }

    #[test]
    fn test_function_without_instructions() {
        let unit = AsmUnit::parse(indoc! {"
            \t.type stub,@function
            stub:
            \t.size stub, 0
        "})
        .unwrap();
        let stub = &unit.functions()[0];
        assert_eq!(stub.block_count(), 0);
        assert_eq!(stub.region(), &(0..=2));
    }

    #[test]
    fn test_undefined_function() {
        let err = AsmUnit::parse("\t.type ghost,@function\n\tret\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::UndefinedFunction {
                name: "ghost".into(),
                line: 1,
            }
        );
    }

    #[test]
    fn test_duplicate_function() {
        let err = AsmUnit::parse("f:\n\tret\nf:\n\tret\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::DuplicateFunction {
                name: "f".into(),
                line: 3,
            }
        );
    }

    #[test]
    fn test_size_of_unknown_function_is_ignored() {
        let unit = AsmUnit::parse("f:\n\tret\n\t.size g, 4\n").unwrap();
        assert_eq!(unit.functions()[0].region(), &(0..=2));
    }
}
