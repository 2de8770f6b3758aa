// This module implements the parser of the MIR text format printed by MachineFunction's
// Display implementation. A file holds any number of functions; each has a signature of
// typed arguments, an optional list of typed live-in registers, and a body of one
// instruction per line. An instruction optionally starts with its typed defs, followed
// by the opcode name, the value operands, bare integer immediates, and after `::` the
// memory descriptors as (size, align) pairs in bits. Comments start with ';' and run to
// the end of the line. Pointer widths are not written out, so the parser asks the
// target for the width of each address space; target opcodes are resolved by name
// through the same interface. Values named by plain numbers are anonymous and print by
// their index, so the printed form of a parsed function parses back to itself.

//! MIR text format parser.

use hashbrown::HashMap;
use thiserror::Error;

use crate::core::{
    LowLevelType, MachineFunction, MachineInst, MemDesc, Opcode, TargetCapabilities, ValueId,
};

/// Syntax or reference error in MIR text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse every function in `text`.
pub fn parse_functions(text: &str, target: &dyn TargetCapabilities) -> ParseResult<Vec<MachineFunction>> {
    Parser::new(text, target).parse()
}

/// Parse a text holding exactly one function.
pub fn parse_function(text: &str, target: &dyn TargetCapabilities) -> ParseResult<MachineFunction> {
    let mut functions = parse_functions(text, target)?;
    match functions.len() {
        1 => Ok(functions.remove(0)),
        n => Err(ParseError { line: 1, message: format!("expected one function, found {n}") }),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    target: &'a dyn TargetCapabilities,

    // Per-function value names
    values: HashMap<&'a str, ValueId>,
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

fn is_anonymous(name: &str) -> bool {
    name.bytes().all(|b| b.is_ascii_digit())
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, target: &'a dyn TargetCapabilities) -> Self {
        Self { text, pos: 0, target, values: HashMap::new() }
    }

    fn parse(mut self) -> ParseResult<Vec<MachineFunction>> {
        let mut functions = Vec::new();
        self.skip_whitespace(true);
        while !self.is_eof() {
            let mf = self.parse_function()?;
            if functions.iter().any(|f: &MachineFunction| f.name() == mf.name()) {
                return Err(self.error(format!("duplicate function '{}'", mf.name())));
            }
            functions.push(mf);
            self.skip_whitespace(true);
        }
        Ok(functions)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let line = self.text[..self.pos.min(self.text.len())].matches('\n').count() + 1;
        ParseError { line, message: message.into() }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    /// Skip blanks and comments; line breaks only if `skip_newlines`.
    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(true);
        self.try_read_inline(ch)
    }

    /// Like `try_read` without crossing a line break.
    fn try_read_inline(&mut self, ch: char) -> bool {
        self.skip_whitespace(false);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> ParseResult<()> {
        if !self.try_read(ch) {
            return Err(self.error(format!("expected '{}' but found {:?}", ch, self.current_char())));
        }
        Ok(())
    }

    fn read_name(&mut self) -> &'a str {
        let start = self.pos;
        while self.current_char().is_some_and(is_name_char) {
            self.advance();
        }
        &self.text[start..self.pos]
    }

    fn read_identifier(&mut self) -> ParseResult<&'a str> {
        self.skip_whitespace(true);
        match self.current_char() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => Ok(self.read_name()),
            Some(ch) => Err(self.error(format!("expected identifier but found '{ch}'"))),
            None => Err(self.error("expected identifier but found end of input")),
        }
    }

    fn read_value_name(&mut self) -> ParseResult<&'a str> {
        self.expect('%')?;
        let name = self.read_name();
        if name.is_empty() {
            return Err(self.error("expected value name after '%'"));
        }
        Ok(name)
    }

    fn read_number(&mut self) -> ParseResult<i64> {
        self.skip_whitespace(true);
        let negative = self.current_char() == Some('-');
        if negative {
            self.advance();
        }
        let start = self.pos;
        while self.current_char().is_some_and(|ch| ch.is_ascii_alphanumeric()) {
            self.advance();
        }
        let digits = &self.text[start..self.pos];
        let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16).map(|v| v as i64)
        } else {
            digits.parse::<i64>()
        };
        let value = magnitude.map_err(|e| self.error(format!("invalid number '{digits}': {e}")))?;
        Ok(if negative { value.wrapping_neg() } else { value })
    }

    fn read_u32(&mut self) -> ParseResult<u32> {
        let value = self.read_number()?;
        u32::try_from(value).map_err(|_| self.error(format!("{value} is out of range")))
    }

    fn read_type(&mut self) -> ParseResult<LowLevelType> {
        if self.try_read('<') {
            let count = self.read_u32()?;
            if self.read_identifier()? != "x" {
                return Err(self.error("expected 'x' in vector type"));
            }
            let elem = self.read_element_type()?;
            self.expect('>')?;
            if count == 0 {
                return Err(self.error("vector type needs at least one element"));
            }
            return Ok(LowLevelType::vector_of(count, elem));
        }
        self.read_element_type()
    }

    fn read_element_type(&mut self) -> ParseResult<LowLevelType> {
        let ident = self.read_identifier()?;
        let (kind, digits) = ident.split_at(1);
        let value: u32 = digits
            .parse()
            .map_err(|_| self.error(format!("invalid type '{ident}'")))?;
        match kind {
            "s" if value > 0 => Ok(LowLevelType::scalar(value)),
            "p" => Ok(LowLevelType::pointer(value, self.target.pointer_size_in_bits(value))),
            _ => Err(self.error(format!("invalid type '{ident}'"))),
        }
    }

    fn read_typed_value(&mut self) -> ParseResult<(&'a str, LowLevelType)> {
        let name = self.read_value_name()?;
        self.expect(':')?;
        let ty = self.read_type()?;
        Ok((name, ty))
    }

    fn define(&mut self, mf: &mut MachineFunction, name: &'a str, ty: LowLevelType) -> ParseResult<ValueId> {
        if self.values.contains_key(name) {
            return Err(self.error(format!("value %{name} defined twice")));
        }
        let id = if is_anonymous(name) { mf.new_value(ty) } else { mf.new_named_value(ty, name) };
        self.values.insert(name, id);
        Ok(id)
    }

    fn lookup(&self, name: &str) -> ParseResult<ValueId> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| self.error(format!("use of undefined value %{name}")))
    }

    fn parse_function(&mut self) -> ParseResult<MachineFunction> {
        let name = self.read_identifier()?;
        let mut mf = MachineFunction::new(name);
        self.values.clear();

        self.expect('(')?;
        if !self.try_read(')') {
            loop {
                let (arg, ty) = self.read_typed_value()?;
                if self.values.contains_key(arg) {
                    return Err(self.error(format!("value %{arg} defined twice")));
                }
                let id = if is_anonymous(arg) { mf.add_unnamed_arg(ty) } else { mf.add_arg(ty, arg) };
                self.values.insert(arg, id);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }

        self.skip_whitespace(true);
        if self.current_char().is_some_and(|ch| ch.is_ascii_alphabetic()) {
            let keyword = self.read_identifier()?;
            if keyword != "liveins" {
                return Err(self.error(format!("expected 'liveins' or '{{' but found '{keyword}'")));
            }
            self.expect('(')?;
            if !self.try_read(')') {
                loop {
                    let (reg, ty) = self.read_typed_value()?;
                    if self.values.contains_key(reg) {
                        return Err(self.error(format!("value %{reg} defined twice")));
                    }
                    let id = mf.live_in(reg, ty);
                    self.values.insert(reg, id);
                    if self.try_read(')') {
                        break;
                    }
                    self.expect(',')?;
                }
            }
        }

        self.expect('{')?;
        while !self.try_read('}') {
            if self.is_eof() {
                return Err(self.error(format!("unterminated body of '{}'", mf.name())));
            }
            self.parse_instruction(&mut mf)?;
        }
        Ok(mf)
    }

    fn parse_instruction(&mut self, mf: &mut MachineFunction) -> ParseResult<()> {
        self.skip_whitespace(true);

        let mut defs = Vec::new();
        if self.current_char() == Some('%') {
            loop {
                let (name, ty) = self.read_typed_value()?;
                defs.push((name, ty));
                if !self.try_read_inline(',') {
                    break;
                }
            }
            self.expect('=')?;
        }

        let opcode_name = self.read_identifier()?;
        let opcode = Opcode::from_name(opcode_name)
            .or_else(|| self.target.target_opcode(opcode_name).map(Opcode::Target))
            .ok_or_else(|| self.error(format!("unknown opcode '{opcode_name}'")))?;

        let mut uses = Vec::new();
        let mut imms = Vec::new();
        loop {
            self.skip_whitespace(false);
            match self.current_char() {
                Some('%') => {
                    let name = self.read_value_name()?;
                    uses.push(self.lookup(name)?);
                }
                Some(ch) if ch == '-' || ch.is_ascii_digit() => imms.push(self.read_number()?),
                _ => break,
            }
            if !self.try_read_inline(',') {
                break;
            }
        }

        let mut mem = Vec::new();
        if self.try_read_inline(':') {
            self.expect(':')?;
            loop {
                self.expect('(')?;
                let size = self.read_u32()?;
                self.expect(',')?;
                let align = self.read_u32()?;
                self.expect(')')?;
                mem.push(MemDesc::new(size, align));
                if !self.try_read_inline(',') {
                    break;
                }
            }
        }

        self.skip_whitespace(false);
        match self.current_char() {
            None | Some('\n') | Some('}') => {}
            Some(ch) => return Err(self.error(format!("unexpected '{ch}' after {opcode_name}"))),
        }

        let (min_defs, min_uses) = opcode.min_operands();
        if defs.len() < min_defs || uses.len() < min_uses {
            return Err(self.error(format!(
                "{opcode_name} needs at least {min_defs} defs and {min_uses} uses, found {} and {}",
                defs.len(),
                uses.len()
            )));
        }
        if opcode.is_memory() && mem.is_empty() {
            return Err(self.error(format!("{opcode_name} without a memory operand")));
        }

        // Operands are resolved before the defs come into scope.
        let mut def_ids = Vec::with_capacity(defs.len());
        for (name, ty) in defs {
            def_ids.push(self.define(mf, name, ty)?);
        }
        mf.append(MachineInst::new(opcode, def_ids, uses).with_imms(imms).with_mem(mem));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amdgpu::{Generation, Subtarget};

    fn target() -> Subtarget {
        Subtarget::new(Generation::Gfx9)
    }

    #[test]
    fn test_parse_basic_function() {
        let text = "; add two values\nf(%a:s32, %b:p3) {\n  %c:s32 = G_ADD %a, %a\n  %d:s32 = G_LOAD %b :: (32, 32)\n  G_STORE %c, %b :: (32, 32)\n}\n";
        let mf = parse_function(text, &target()).unwrap();
        assert_eq!(mf.name(), "f");
        assert_eq!(mf.args().len(), 2);
        assert_eq!(mf.value_type(mf.args()[1]), LowLevelType::pointer(3, 32));
        let insts: Vec<_> = mf.instructions().map(|(_, i)| i.clone()).collect();
        assert_eq!(insts.len(), 3);
        assert_eq!(insts[1].mem, vec![MemDesc::new(32, 32)]);
        assert!(insts[2].defs.is_empty());
        assert_eq!(insts[2].uses.len(), 2);
    }

    #[test]
    fn test_parse_vectors_liveins_and_target_opcodes() {
        let text = "g() liveins(%queue_ptr:p4) {\n  %0:<2 x p3> = G_IMPLICIT_DEF\n  %1:s32 = S_GETREG_B32 -0x1\n}\n";
        let mf = parse_function(text, &target()).unwrap();
        assert_eq!(mf.live_ins().len(), 1);
        let insts: Vec<_> = mf.instructions().map(|(_, i)| i.clone()).collect();
        assert_eq!(mf.value_type(insts[0].defs[0]), LowLevelType::vector_of(2, LowLevelType::pointer(3, 32)));
        assert!(!insts[1].opcode.is_generic());
        assert_eq!(insts[1].imms, vec![-1]);
    }

    #[test]
    fn test_print_parse_is_stable() {
        let text = "f(%a:s16) {\n  %0:s1 = G_ICMP %a, %a, 33\n  %1:s16 = G_SELECT %0, %a, %a\n}\n";
        let mf = parse_function(text, &target()).unwrap();
        assert_eq!(mf.to_string(), text);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse_function("f() {\n  %a:s32 = G_ADD %b, %b\n}\n", &target()).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("%b"));

        let err = parse_function("f() {\n\n  %a:s32 = G_FROB\n}\n", &target()).unwrap_err();
        assert_eq!(err.line, 3);

        let err = parse_function("f(%a:s0) {\n}\n", &target()).unwrap_err();
        assert!(err.message.contains("s0"));
    }

    #[test]
    fn test_operand_counts_are_checked() {
        let err = parse_function("f(%a:s128) {\n  %d:s128 = G_AND %a\n}\n", &target()).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("G_AND needs at least 1 defs and 2 uses"), "{}", err.message);

        let err = parse_function("f(%a:s32) {\n  G_ADD %a, %a\n}\n", &target()).unwrap_err();
        assert!(err.message.contains("found 0 and 2"), "{}", err.message);

        let err = parse_function("f(%p:p1) {\n  %v:s32 = G_LOAD %p\n}\n", &target()).unwrap_err();
        assert!(err.message.contains("memory operand"));
    }

    #[test]
    fn test_multiple_functions() {
        let text = "a() {\n}\n; second\nb(%x:s64) {\n  %y:s64 = G_ADD %x, %x ; double\n}\n";
        let functions = parse_functions(text, &target()).unwrap();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[1].len(), 1);
        assert!(parse_function(text, &target()).is_err());
    }
}
