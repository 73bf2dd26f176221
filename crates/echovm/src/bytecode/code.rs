//! The code unit: the contract between the external front end and the interpreter.

use std::{fmt::Write as _, ops::BitOr, rc::Rc};

use serde::{Deserialize, Serialize};

use super::op::{BinaryOp, CompareOp, Opcode, OperandKind, UnaryOp};
use crate::source::LoadError;

/// Newest instruction-set version this interpreter executes.
pub const ISA_VERSION: u16 = 2;
/// Oldest instruction-set version this interpreter executes.
pub const MIN_ISA_VERSION: u16 = 1;

/// Magic prefix of the binary (postcard) code-unit encoding.
pub(crate) const BINARY_MAGIC: &[u8; 4] = b"EVMc";

/// A single instruction: opcode, operand and source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    #[serde(default)]
    pub arg: u32,
    #[serde(default)]
    pub line: u32,
}

impl Instruction {
    #[must_use]
    pub fn new(op: Opcode, arg: u32, line: u32) -> Self {
        Self { op, arg, line }
    }
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Const>),
    /// Nested code unit (function, generator or class body).
    Code(Rc<Code>),
}

impl From<i64> for Const {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Const {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Const {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Const {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Const {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Const {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Code> for Const {
    fn from(value: Code) -> Self {
        Self::Code(Rc::new(value))
    }
}

/// Bit flags describing a code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// Module body.
    pub const MODULE: Self = Self(1);
    /// Ordinary function body.
    pub const FUNCTION: Self = Self(1 << 1);
    /// Calling the function returns a suspended generator.
    pub const GENERATOR: Self = Self(1 << 2);
    /// Collects extra positional arguments into a tuple.
    pub const VARARGS: Self = Self(1 << 3);
    /// Collects extra keyword arguments into a dict.
    pub const VARKEYWORDS: Self = Self(1 << 4);
    /// Class body run by `__build_class__`.
    pub const CLASS_BODY: Self = Self(1 << 5);

    const NAMES: [(&'static str, Self); 6] = [
        ("module", Self::MODULE),
        ("function", Self::FUNCTION),
        ("generator", Self::GENERATOR),
        ("varargs", Self::VARARGS),
        ("varkeywords", Self::VARKEYWORDS),
        ("class_body", Self::CLASS_BODY),
    ];

    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Parses a lowercase flag name as written in listings.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES.iter().find(|(n, _)| *n == name).map(|(_, flag)| *flag)
    }

    /// Lowercase names of the set flags.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .iter()
            .filter(move |(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A compiled code unit as produced by the front end.
///
/// Code units are immutable once loaded and shared by every function object
/// and frame created from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    /// Instruction-set version the unit was compiled for.
    pub version: u16,
    pub name: String,
    #[serde(default)]
    pub qualname: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub first_line: u32,
    #[serde(default)]
    pub flags: CodeFlags,
    /// Number of positional parameters (the first `argcount` varnames).
    #[serde(default)]
    pub argcount: u32,
    /// Number of keyword-only parameters following the positional ones.
    #[serde(default)]
    pub kwonlyargcount: u32,
    #[serde(default)]
    pub varnames: Vec<String>,
    /// Locals captured by nested functions.
    #[serde(default)]
    pub cellvars: Vec<String>,
    /// Variables captured from enclosing functions.
    #[serde(default)]
    pub freevars: Vec<String>,
    /// Global, attribute and imported names.
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub consts: Vec<Const>,
    pub instructions: Vec<Instruction>,
    /// Original source text, used only for traceback previews.
    #[serde(default)]
    pub source: Option<String>,
}

impl Code {
    /// Creates an empty code unit targeting the current instruction-set version.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: CodeFlags) -> Self {
        let name = name.into();
        Self {
            version: ISA_VERSION,
            qualname: name.clone(),
            name,
            filename: String::new(),
            first_line: 1,
            flags,
            argcount: 0,
            kwonlyargcount: 0,
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            names: Vec::new(),
            consts: Vec::new(),
            instructions: Vec::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    #[must_use]
    pub fn is_module(&self) -> bool {
        self.flags.contains(CodeFlags::MODULE)
    }

    /// Number of cell slots a frame for this code needs (cellvars then freevars).
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Name of cell slot `index`.
    #[must_use]
    pub fn cell_name(&self, index: usize) -> Option<&str> {
        self.cellvars
            .get(index)
            .or_else(|| self.freevars.get(index.checked_sub(self.cellvars.len())?))
            .map(String::as_str)
    }

    /// Returns the source text of `line`, if the unit carries source.
    #[must_use]
    pub fn source_line(&self, line: u32) -> Option<&str> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        self.source.as_deref()?.lines().nth(index)
    }

    /// Checks the unit (and every nested unit) against the supported instruction set.
    ///
    /// Unknown versions, opcodes newer than the unit's version, out-of-range
    /// operands and jumps outside the stream are all hard failures.
    pub fn validate(&self) -> Result<(), LoadError> {
        if !(MIN_ISA_VERSION..=ISA_VERSION).contains(&self.version) {
            return Err(LoadError::UnsupportedVersion {
                code: self.qualname_or_name().to_owned(),
                version: self.version,
            });
        }
        for (ip, instr) in self.instructions.iter().enumerate() {
            if instr.op.since() > self.version {
                return Err(LoadError::UnavailableOpcode {
                    code: self.qualname_or_name().to_owned(),
                    ip,
                    opcode: instr.op,
                    version: self.version,
                });
            }
            let arg = instr.arg as usize;
            let in_range = match instr.op.operand_kind() {
                OperandKind::None | OperandKind::Count => true,
                OperandKind::Const => arg < self.consts.len(),
                OperandKind::Name => arg < self.names.len(),
                OperandKind::Local => arg < self.varnames.len(),
                OperandKind::Cell => arg < self.cell_count(),
                OperandKind::Target => arg < self.instructions.len(),
                OperandKind::BinOp => BinaryOp::from_arg(instr.arg).is_some(),
                OperandKind::UnOp => UnaryOp::from_arg(instr.arg).is_some(),
                OperandKind::CmpOp => CompareOp::from_arg(instr.arg).is_some(),
            };
            if !in_range {
                return Err(LoadError::OperandOutOfRange {
                    code: self.qualname_or_name().to_owned(),
                    ip,
                    opcode: instr.op,
                    arg: instr.arg,
                });
            }
        }
        let params = (self.argcount + self.kwonlyargcount) as usize
            + usize::from(self.flags.contains(CodeFlags::VARARGS))
            + usize::from(self.flags.contains(CodeFlags::VARKEYWORDS));
        if params > self.varnames.len() {
            return Err(LoadError::Decode {
                path: None,
                message: format!(
                    "code unit '{}' declares {params} parameters but only {} varnames",
                    self.qualname_or_name(),
                    self.varnames.len()
                ),
            });
        }
        for constant in &self.consts {
            validate_const(constant)?;
        }
        Ok(())
    }

    fn qualname_or_name(&self) -> &str {
        if self.qualname.is_empty() { &self.name } else { &self.qualname }
    }

    /// Encodes the unit in the compact binary form understood by [`Code::from_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, LoadError> {
        let mut out = BINARY_MAGIC.to_vec();
        let body = postcard::to_allocvec(self).map_err(|err| LoadError::Decode {
            path: None,
            message: err.to_string(),
        })?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes the binary form written by [`Code::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let body = bytes.strip_prefix(BINARY_MAGIC.as_slice()).ok_or_else(|| LoadError::Decode {
            path: None,
            message: "missing binary code-unit header".to_owned(),
        })?;
        postcard::from_bytes(body).map_err(|err| LoadError::Decode {
            path: None,
            message: err.to_string(),
        })
    }

    /// Renders a human-readable listing, one instruction per line.
    ///
    /// ```text
    ///    0  L1  LoadConst          0 (1)
    ///    1  L1  StoreName          0 (x)
    /// ```
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        let flags: Vec<_> = self.flags.names().collect();
        let _ = writeln!(
            out,
            "{pad}code {} (version {}, flags [{}])",
            self.qualname_or_name(),
            self.version,
            flags.join(", ")
        );
        for (ip, instr) in self.instructions.iter().enumerate() {
            let detail = self.describe_operand(*instr);
            let _ = writeln!(
                out,
                "{pad}{ip:>5}  L{:<4} {:<18} {:<4} {detail}",
                instr.line,
                instr.op.to_string(),
                instr.arg
            );
        }
        for constant in &self.consts {
            if let Const::Code(nested) = constant {
                nested.disassemble_into(out, indent + 2);
            }
        }
    }

    fn describe_operand(&self, instr: Instruction) -> String {
        let arg = instr.arg as usize;
        match instr.op.operand_kind() {
            OperandKind::None | OperandKind::Count => String::new(),
            OperandKind::Const => self.consts.get(arg).map(const_repr).unwrap_or_default(),
            OperandKind::Name => self.names.get(arg).map(|n| format!("({n})")).unwrap_or_default(),
            OperandKind::Local => self.varnames.get(arg).map(|n| format!("({n})")).unwrap_or_default(),
            OperandKind::Cell => self.cell_name(arg).map(|n| format!("({n})")).unwrap_or_default(),
            OperandKind::Target => format!("(to {arg})"),
            OperandKind::BinOp => BinaryOp::from_arg(instr.arg).map(|op| format!("({op})")).unwrap_or_default(),
            OperandKind::UnOp => UnaryOp::from_arg(instr.arg).map(|op| format!("({op})")).unwrap_or_default(),
            OperandKind::CmpOp => CompareOp::from_arg(instr.arg).map(|op| format!("({op})")).unwrap_or_default(),
        }
    }
}

fn validate_const(constant: &Const) -> Result<(), LoadError> {
    match constant {
        Const::Code(code) => code.validate(),
        Const::Tuple(items) => items.iter().try_for_each(validate_const),
        _ => Ok(()),
    }
}

fn const_repr(constant: &Const) -> String {
    match constant {
        Const::None => "(None)".to_owned(),
        Const::Bool(b) => format!("({})", if *b { "True" } else { "False" }),
        Const::Int(i) => format!("({i})"),
        Const::Float(f) => format!("({f:?})"),
        Const::Str(s) => format!("({s:?})"),
        Const::Bytes(b) => format!("(b{:?})", String::from_utf8_lossy(b)),
        Const::Tuple(items) => format!("(tuple of {})", items.len()),
        Const::Code(code) => format!("(<code {}>)", code.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(instructions: Vec<Instruction>) -> Code {
        let mut code = Code::new("<module>", CodeFlags::MODULE);
        code.consts.push(Const::None);
        code.instructions = instructions;
        code
    }

    #[test]
    fn rejects_unknown_version() {
        let mut code = unit(vec![Instruction::new(Opcode::ReturnValue, 0, 1)]);
        code.version = ISA_VERSION + 1;
        assert!(matches!(code.validate(), Err(LoadError::UnsupportedVersion { .. })));
    }

    #[test]
    fn rejects_opcode_newer_than_unit_version() {
        let mut code = unit(vec![
            Instruction::new(Opcode::LoadConst, 0, 1),
            Instruction::new(Opcode::YieldValue, 0, 1),
        ]);
        code.version = 1;
        let err = code.validate().unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnavailableOpcode {
                ip: 1,
                opcode: Opcode::YieldValue,
                ..
            }
        ));
    }

    #[test]
    fn rejects_out_of_range_operands() {
        let code = unit(vec![Instruction::new(Opcode::LoadConst, 3, 1)]);
        assert!(matches!(code.validate(), Err(LoadError::OperandOutOfRange { arg: 3, .. })));
        let code = unit(vec![Instruction::new(Opcode::Jump, 9, 1)]);
        assert!(matches!(code.validate(), Err(LoadError::OperandOutOfRange { .. })));
    }

    #[test]
    fn binary_form_round_trips() {
        let code = unit(vec![
            Instruction::new(Opcode::LoadConst, 0, 1),
            Instruction::new(Opcode::ReturnValue, 0, 1),
        ]);
        let bytes = code.to_bytes().unwrap();
        assert!(bytes.starts_with(BINARY_MAGIC));
        assert_eq!(Code::from_bytes(&bytes).unwrap(), code);
    }

    #[test]
    fn cell_names_span_cellvars_then_freevars() {
        let mut code = Code::new("f", CodeFlags::FUNCTION);
        code.cellvars = vec!["a".to_owned()];
        code.freevars = vec!["b".to_owned()];
        assert_eq!(code.cell_name(0), Some("a"));
        assert_eq!(code.cell_name(1), Some("b"));
        assert_eq!(code.cell_name(2), None);
    }
}
