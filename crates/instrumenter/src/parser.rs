// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! RISC-V assembly text parser.
//!
//! Parses GNU-style assembly syntax as produced by LLVM/GCC for RISC-V.
//! Every line is classified (label, directive, instruction) and keeps its
//! original text so the file can be reproduced byte for byte around inserted
//! code. No validation is done on mnemonics or operands.

use machine::DebugLoc;

/// An instruction with operands as raw strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction<'a> {
    /// The mnemonic (e.g., "addi", "bnez", "ret").
    pub mnemonic: &'a str,
    /// Operands as raw strings (e.g., `["ra", "12(sp)"]`).
    pub operands: Vec<&'a str>,
}

impl<'a> ParsedInstruction<'a> {
    /// Parse an instruction from text (after removing label and comments).
    fn parse(text: &'a str) -> Self {
        let text = text.trim();

        let mut parts = text.splitn(2, char::is_whitespace);
        let mnemonic = parts.next().unwrap_or("");
        let operands = split_operands(parts.next().unwrap_or(""));

        Self { mnemonic, operands }
    }
}

/// An assembler directive, split into its name and raw arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    /// Name including the dot (e.g., ".type").
    pub name: &'a str,
    /// Everything after the name, trimmed.
    pub args: &'a str,
}

impl<'a> Directive<'a> {
    fn parse(text: &'a str) -> Self {
        let mut parts = text.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();
        Self { name, args }
    }

    /// Comma-separated arguments.
    pub fn arguments(&self) -> Vec<&'a str> {
        split_operands(self.args)
    }

    /// Symbol named by `.type sym, @function` (or `%function`, `STT_FUNC`).
    pub fn function_type(&self) -> Option<&'a str> {
        if self.name != ".type" {
            return None;
        }
        match self.arguments().as_slice() {
            [symbol, kind] if matches!(*kind, "@function" | "%function" | "STT_FUNC") => {
                Some(*symbol)
            }
            _ => None,
        }
    }

    /// Symbol named by `.size sym, expr`.
    pub fn size_of(&self) -> Option<&'a str> {
        if self.name != ".size" {
            return None;
        }
        self.arguments().first().copied()
    }

    /// Location set by `.loc file line [column] [options...]`.
    pub fn debug_loc(&self) -> Option<DebugLoc> {
        if self.name != ".loc" {
            return None;
        }
        let mut fields = self.args.split_whitespace();
        let file = fields.next()?.parse().ok()?;
        let line = fields.next()?.parse().ok()?;
        let column = fields.next().and_then(|c| c.parse().ok()).unwrap_or(0);
        Some(DebugLoc::new(file, line, column))
    }
}

/// The content of an assembly line after any label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement<'a> {
    /// A CPU instruction.
    Instruction(ParsedInstruction<'a>),
    /// An assembler directive (e.g., `.globl`, `.loc`).
    Directive(Directive<'a>),
    /// Empty line, comment or label-only.
    Empty,
}

/// A parsed line from an assembly file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    /// Label defined on this line (e.g., `".LBB0_1"` from `".LBB0_1:"`).
    pub label: Option<&'a str>,
    /// The statement on this line.
    pub statement: Statement<'a>,
    /// Original line number (1-indexed).
    pub line_number: usize,
    /// Original line text (for reconstruction or error messages).
    pub original: &'a str,
}

impl<'a> ParsedLine<'a> {
    pub fn instruction(&self) -> Option<&ParsedInstruction<'a>> {
        match &self.statement {
            Statement::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }

    pub fn directive(&self) -> Option<&Directive<'a>> {
        match &self.statement {
            Statement::Directive(directive) => Some(directive),
            _ => None,
        }
    }

    /// Leading whitespace of the original line.
    pub fn indent(&self) -> &'a str {
        let trimmed = self.original.trim_start();
        &self.original[..self.original.len() - trimmed.len()]
    }

    /// Original text split after the label's colon: `("foo:", " ret")`.
    pub fn split_at_label(&self) -> Option<(&'a str, &'a str)> {
        let label = self.label?;
        let colon = self.original.find(label)? + label.len();
        Some((&self.original[..=colon], &self.original[colon + 1..]))
    }
}

/// Parsed assembly text.
#[derive(Debug, Clone)]
pub struct ParsedAssembly<'a> {
    lines: Vec<ParsedLine<'a>>,
}

impl<'a> ParsedAssembly<'a> {
    /// Parse assembly text into lines.
    pub fn parse(input: &'a str) -> Self {
        let lines = input
            .lines()
            .enumerate()
            .map(|(idx, text)| Self::parse_line(text, idx + 1))
            .collect();
        Self { lines }
    }

    /// Access the parsed lines for inspection.
    pub fn lines(&self) -> &[ParsedLine<'a>] {
        &self.lines
    }

    /// Parse a single line of assembly.
    fn parse_line(text: &'a str, line_number: usize) -> ParsedLine<'a> {
        let original = text;
        let text = strip_comment(text).trim();

        let (label, rest) = split_label(text);
        let statement = if rest.is_empty() {
            Statement::Empty
        } else if rest.starts_with('.') {
            Statement::Directive(Directive::parse(rest))
        } else {
            Statement::Instruction(ParsedInstruction::parse(rest))
        };

        ParsedLine {
            label,
            statement,
            line_number,
            original,
        }
    }
}

/// Remove a trailing `#` comment, ignoring `#` inside string literals.
///
/// `/* ... */` spanning several lines is not handled.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;

    for (pos, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..pos],
            '/' if !in_string && line[pos..].starts_with("/*") => return &line[..pos],
            _ => {}
        }
    }
    line
}

/// Split a line into optional label and remaining text.
fn split_label(line: &str) -> (Option<&str>, &str) {
    match find_label_colon(line) {
        Some(colon_pos) => (Some(line[..colon_pos].trim()), line[colon_pos + 1..].trim()),
        None => (None, line),
    }
}

/// Find position of label-ending colon.
///
/// Valid label characters: alphanumeric, `_`, `.`, `$`
fn find_label_colon(line: &str) -> Option<usize> {
    for (pos, c) in line.char_indices() {
        if c == ':' {
            return (pos > 0).then_some(pos);
        }
        if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
            continue;
        }
        break;
    }
    None
}

/// Split comma-separated operands, respecting parentheses and quotes.
///
/// Commas inside `(...)` (e.g. `%lo(sym)(a0)`) or string literals are not
/// treated as separators.
fn split_operands(s: &str) -> Vec<&str> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }

    let mut operands = Vec::new();
    let mut start = 0;
    let mut depth: usize = 0;
    let mut in_string = false;

    for (i, c) in s.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth = depth.saturating_sub(1),
            ',' if depth == 0 && !in_string => {
                let operand = s[start..i].trim();
                if !operand.is_empty() {
                    operands.push(operand);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    let operand = s[start..].trim();
    if !operand.is_empty() {
        operands.push(operand);
    }
    operands
}
