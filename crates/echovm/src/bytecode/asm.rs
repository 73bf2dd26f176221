//! Textual code-unit listings.
//!
//! A listing is a line-oriented rendering of a code unit, convenient for
//! hand-written fixtures and for front ends that prefer emitting text:
//!
//! ```text
//! .name <module>
//! .filename pkg/mod.py
//! .line 1
//!     LoadConst 1
//!     StoreName x
//! .line 2
//!     LoadConst &double
//!     LoadConst "double"
//!     MakeFunction 0
//!     StoreName double
//!     LoadConst None
//!     ReturnValue
//!
//! .code double
//! .args n
//!     LoadFast n
//!     LoadConst 2
//!     BinaryOp Mul
//!     ReturnValue
//! .end
//! ```
//!
//! Operands are written according to the opcode's [`OperandKind`]: literals for
//! constants (`None`, `True`, `42`, `1.5`, `"text"`, `b"raw"`, tuples in
//! parentheses, `&name` for a nested unit), identifiers for names, locals and
//! cells, labels for jump targets and operator names or symbols for operators.
//! `#` starts a comment outside string literals.

use std::{collections::HashMap, rc::Rc, str::FromStr};

use super::{
    code::{Code, CodeFlags, Const, ISA_VERSION, Instruction},
    op::{BinaryOp, CompareOp, Opcode, OperandKind, UnaryOp},
};
use crate::source::LoadError;

/// Parses a listing into a validated code unit.
pub fn parse_listing(text: &str) -> Result<Code, LoadError> {
    let mut stack = vec![UnitState::new(Code::new("<module>", CodeFlags::MODULE), None)];
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(directive) = line.strip_prefix('.') {
            let (name, rest) = split_word(directive);
            match name {
                "code" => {
                    let child_name = rest.trim();
                    if child_name.is_empty() {
                        return Err(listing_error(line_no, ".code needs a name"));
                    }
                    let parent_filename = stack.last().map(|s| s.code.filename.clone()).unwrap_or_default();
                    let mut code = Code::new(child_name, CodeFlags::FUNCTION);
                    code.filename = parent_filename;
                    stack.push(UnitState::new(code, Some(child_name.to_owned())));
                }
                "end" => {
                    if stack.len() < 2 {
                        return Err(listing_error(line_no, ".end without matching .code"));
                    }
                    let finished = stack.pop().ok_or_else(|| listing_error(line_no, "unbalanced .end"))?;
                    let key = finished.key.clone().unwrap_or_default();
                    let code = finished.finish()?;
                    let parent = stack.last_mut().ok_or_else(|| listing_error(line_no, "unbalanced .end"))?;
                    parent.children.insert(key, Rc::new(code));
                }
                _ => {
                    let unit = stack.last_mut().ok_or_else(|| listing_error(line_no, "no open code unit"))?;
                    unit.directive(name, rest, line_no)?;
                }
            }
            continue;
        }
        let unit = stack.last_mut().ok_or_else(|| listing_error(line_no, "no open code unit"))?;
        if let Some(label) = line.strip_suffix(':')
            && is_identifier(label)
        {
            unit.place_label(label, line_no)?;
            continue;
        }
        unit.instruction(line, line_no)?;
    }
    if stack.len() != 1 {
        return Err(listing_error(text.lines().count(), "unterminated .code block"));
    }
    let top = stack.pop().ok_or_else(|| listing_error(0, "empty listing"))?;
    top.finish()
}

/// Parse state for one (possibly nested) code unit.
struct UnitState {
    code: Code,
    /// Name the parent uses to reference this unit with `&name`.
    key: Option<String>,
    line: u32,
    saw_line: bool,
    qualname_set: bool,
    labels: HashMap<String, u32>,
    /// Jump instructions awaiting a label: (instruction index, label, listing line).
    jump_refs: Vec<(usize, String, usize)>,
    /// Constant slots awaiting a nested unit: (const index, unit name, listing line).
    code_refs: Vec<(usize, String, usize)>,
    children: HashMap<String, Rc<Code>>,
}

impl UnitState {
    fn new(code: Code, key: Option<String>) -> Self {
        Self {
            line: code.first_line,
            code,
            key,
            saw_line: false,
            qualname_set: false,
            labels: HashMap::new(),
            jump_refs: Vec::new(),
            code_refs: Vec::new(),
            children: HashMap::new(),
        }
    }

    fn directive(&mut self, name: &str, rest: &str, line_no: usize) -> Result<(), LoadError> {
        let words: Vec<&str> = rest.split_whitespace().collect();
        match name {
            "name" => {
                rest.trim().clone_into(&mut self.code.name);
                if !self.qualname_set {
                    rest.trim().clone_into(&mut self.code.qualname);
                }
            }
            "qualname" => {
                rest.trim().clone_into(&mut self.code.qualname);
                self.qualname_set = true;
            }
            "filename" => rest.trim().clone_into(&mut self.code.filename),
            "version" => {
                self.code.version = parse_number(rest.trim(), line_no)?;
            }
            "flags" => {
                let mut flags = CodeFlags::empty();
                for word in &words {
                    let flag = CodeFlags::from_name(word)
                        .ok_or_else(|| listing_error(line_no, format!("unknown flag '{word}'")))?;
                    flags = flags | flag;
                }
                self.code.flags = flags;
            }
            "args" => {
                self.code.argcount += words.len() as u32;
                self.code.varnames.extend(words.iter().map(|w| (*w).to_owned()));
            }
            "kwonly" => {
                self.code.kwonlyargcount += words.len() as u32;
                self.code.varnames.extend(words.iter().map(|w| (*w).to_owned()));
            }
            "varargs" | "varkeywords" => {
                let [param] = words.as_slice() else {
                    return Err(listing_error(line_no, format!(".{name} takes exactly one name")));
                };
                let flag = if name == "varargs" {
                    CodeFlags::VARARGS
                } else {
                    CodeFlags::VARKEYWORDS
                };
                self.code.flags = self.code.flags | flag;
                self.code.varnames.push((*param).to_owned());
            }
            "varnames" => {
                for word in words {
                    intern(&mut self.code.varnames, word);
                }
            }
            "cellvars" => self.code.cellvars.extend(words.iter().map(|w| (*w).to_owned())),
            "freevars" => self.code.freevars.extend(words.iter().map(|w| (*w).to_owned())),
            "names" => {
                for word in words {
                    intern(&mut self.code.names, word);
                }
            }
            "line" => {
                self.line = parse_number(rest.trim(), line_no)?;
                if !self.saw_line && self.code.instructions.is_empty() {
                    self.code.first_line = self.line;
                }
                self.saw_line = true;
            }
            "src" => {
                let source = self.code.source.get_or_insert_with(String::new);
                source.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                source.push('\n');
            }
            other => return Err(listing_error(line_no, format!("unknown directive '.{other}'"))),
        }
        Ok(())
    }

    fn place_label(&mut self, label: &str, line_no: usize) -> Result<(), LoadError> {
        let target = self.code.instructions.len() as u32;
        if self.labels.insert(label.to_owned(), target).is_some() {
            return Err(listing_error(line_no, format!("label '{label}' defined twice")));
        }
        Ok(())
    }

    fn instruction(&mut self, line: &str, line_no: usize) -> Result<(), LoadError> {
        let (mnemonic, operand) = split_word(line);
        let op = Opcode::from_str(mnemonic)
            .map_err(|_| listing_error(line_no, format!("unknown opcode '{mnemonic}'")))?;
        let operand = operand.trim();
        let kind = op.operand_kind();
        if operand.is_empty() && !matches!(kind, OperandKind::None) {
            return Err(listing_error(line_no, format!("{op} needs an operand")));
        }
        let arg = match kind {
            OperandKind::None => {
                if !operand.is_empty() {
                    return Err(listing_error(line_no, format!("{op} takes no operand")));
                }
                0
            }
            OperandKind::Const => {
                if let Some(name) = operand.strip_prefix('&') {
                    self.code.consts.push(Const::None);
                    let index = self.code.consts.len() - 1;
                    self.code_refs.push((index, name.trim().to_owned(), line_no));
                    index as u32
                } else {
                    let value = LiteralParser::new(operand, line_no).parse_all()?;
                    self.add_const(value)
                }
            }
            OperandKind::Name => intern(&mut self.code.names, identifier(operand, line_no)?),
            OperandKind::Local => intern(&mut self.code.varnames, identifier(operand, line_no)?),
            OperandKind::Cell => {
                let name = identifier(operand, line_no)?;
                let index = self
                    .code
                    .cellvars
                    .iter()
                    .chain(&self.code.freevars)
                    .position(|c| c == name)
                    .ok_or_else(|| listing_error(line_no, format!("'{name}' is not a cell or free variable")))?;
                index as u32
            }
            OperandKind::Target => {
                let label = identifier(operand, line_no)?;
                self.jump_refs
                    .push((self.code.instructions.len(), label.to_owned(), line_no));
                0
            }
            OperandKind::Count => parse_number(operand, line_no)?,
            OperandKind::BinOp => BinaryOp::from_str(operand)
                .map_err(|_| listing_error(line_no, format!("unknown binary operator '{operand}'")))?
                as u32,
            OperandKind::UnOp => UnaryOp::from_str(operand)
                .map_err(|_| listing_error(line_no, format!("unknown unary operator '{operand}'")))?
                as u32,
            OperandKind::CmpOp => CompareOp::from_str(operand)
                .map_err(|_| listing_error(line_no, format!("unknown comparison '{operand}'")))?
                as u32,
        };
        self.code.instructions.push(Instruction::new(op, arg, self.line));
        Ok(())
    }

    fn add_const(&mut self, value: Const) -> u32 {
        if !matches!(value, Const::Float(_))
            && let Some(index) = self.code.consts.iter().position(|c| *c == value)
        {
            return index as u32;
        }
        self.code.consts.push(value);
        (self.code.consts.len() - 1) as u32
    }

    fn finish(mut self) -> Result<Code, LoadError> {
        for (ip, label, line_no) in self.jump_refs {
            let target = self
                .labels
                .get(&label)
                .ok_or_else(|| listing_error(line_no, format!("undefined label '{label}'")))?;
            self.code.instructions[ip].arg = *target;
        }
        for (index, name, line_no) in self.code_refs {
            let child = self
                .children
                .get(&name)
                .ok_or_else(|| listing_error(line_no, format!("no nested .code named '{name}'")))?;
            self.code.consts[index] = Const::Code(Rc::clone(child));
        }
        if self.code.qualname.is_empty() {
            self.code.qualname.clone_from(&self.code.name);
        }
        if self.code.version == 0 {
            self.code.version = ISA_VERSION;
        }
        self.code.validate()?;
        Ok(self.code)
    }
}

/// Recursive-descent parser for constant literals.
struct LiteralParser<'a> {
    text: &'a str,
    pos: usize,
    line_no: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str, line_no: usize) -> Self {
        Self { text, pos: 0, line_no }
    }

    fn parse_all(mut self) -> Result<Const, LoadError> {
        let value = self.parse_value()?;
        self.skip_ws();
        if self.pos != self.text.len() {
            return Err(self.error("trailing characters after constant"));
        }
        Ok(value)
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn error(&self, message: impl Into<String>) -> LoadError {
        listing_error(self.line_no, message.into())
    }

    fn parse_value(&mut self) -> Result<Const, LoadError> {
        self.skip_ws();
        let rest = self.rest();
        if rest.starts_with('(') {
            return self.parse_tuple();
        }
        if rest.starts_with('"') {
            return Ok(Const::Str(self.parse_string()?));
        }
        if rest.starts_with("b\"") {
            self.pos += 1;
            return Ok(Const::Bytes(self.parse_string()?.into_bytes()));
        }
        let end = rest
            .find(|c: char| c == ',' || c == ')' || c.is_whitespace())
            .unwrap_or(rest.len());
        let word = &rest[..end];
        self.pos += end;
        match word {
            "None" => Ok(Const::None),
            "True" => Ok(Const::Bool(true)),
            "False" => Ok(Const::Bool(false)),
            "inf" => Ok(Const::Float(f64::INFINITY)),
            "-inf" => Ok(Const::Float(f64::NEG_INFINITY)),
            _ => {
                if let Ok(int) = word.parse::<i64>() {
                    Ok(Const::Int(int))
                } else if let Ok(float) = word.parse::<f64>() {
                    Ok(Const::Float(float))
                } else {
                    Err(self.error(format!("invalid constant '{word}'")))
                }
            }
        }
    }

    fn parse_tuple(&mut self) -> Result<Const, LoadError> {
        // consume '('
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.rest().starts_with(')') {
                self.pos += 1;
                return Ok(Const::Tuple(items));
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            if self.rest().starts_with(',') {
                self.pos += 1;
            } else if !self.rest().starts_with(')') {
                return Err(self.error("expected ',' or ')' in tuple constant"));
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, LoadError> {
        // consume opening quote
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(out);
                }
                '\\' => {
                    let (_, escaped) = chars.next().ok_or_else(|| self.error("unterminated escape"))?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        other => return Err(self.error(format!("unknown escape '\\{other}'"))),
                    });
                }
                other => out.push(other),
            }
        }
        Err(self.error("unterminated string constant"))
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == '#' {
            return &line[..i];
        }
    }
    line
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '<')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '>')
}

fn identifier(text: &str, line_no: usize) -> Result<&str, LoadError> {
    if is_identifier(text) {
        Ok(text)
    } else {
        Err(listing_error(line_no, format!("expected an identifier, found '{text}'")))
    }
}

fn parse_number<T: FromStr>(text: &str, line_no: usize) -> Result<T, LoadError> {
    text.parse()
        .map_err(|_| listing_error(line_no, format!("expected a number, found '{text}'")))
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    if let Some(index) = table.iter().position(|n| n == name) {
        return index as u32;
    }
    table.push(name.to_owned());
    (table.len() - 1) as u32
}

fn listing_error(line: usize, message: impl Into<String>) -> LoadError {
    LoadError::Listing {
        line,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_nested_units_and_labels() {
        let listing = r#"
.filename m.py
.line 1
    LoadConst &f        # forward reference
    LoadConst "f"
    MakeFunction 0
    StoreName f
top:
    LoadConst 0
    PopJumpIfFalse done
    Jump top
done:
    LoadConst None
    ReturnValue

.code f
.args a b
    LoadFast a
    LoadFast b
    BinaryOp +
    ReturnValue
.end
"#;
        let code = parse_listing(listing).unwrap();
        assert_eq!(code.filename, "m.py");
        assert_eq!(code.instructions[5].arg, 7);
        assert_eq!(code.instructions[6].arg, 4);
        let Const::Code(f) = &code.consts[0] else {
            panic!("expected nested code, got {:?}", code.consts[0]);
        };
        assert_eq!(f.argcount, 2);
        assert_eq!(f.filename, "m.py");
        assert_eq!(f.instructions[2].arg, BinaryOp::Add as u32);
    }

    #[test]
    fn parses_tuple_and_string_constants() {
        let code = parse_listing("LoadConst (\"a#b\", 1, (True, None), b\"x\")\nReturnValue").unwrap();
        assert_eq!(
            code.consts[0],
            Const::Tuple(vec![
                Const::Str("a#b".to_owned()),
                Const::Int(1),
                Const::Tuple(vec![Const::Bool(true), Const::None]),
                Const::Bytes(b"x".to_vec()),
            ])
        );
    }

    #[test]
    fn unknown_opcode_is_reported_with_line() {
        let err = parse_listing("LoadConst 1\nFrobnicate\n").unwrap_err();
        assert!(matches!(err, LoadError::Listing { line: 2, .. }), "{err}");
    }

    #[test]
    fn version_gate_applies_to_listings() {
        let err = parse_listing(".version 1\nLoadConst None\nYieldValue\n").unwrap_err();
        assert!(matches!(err, LoadError::UnavailableOpcode { .. }), "{err}");
    }
}
