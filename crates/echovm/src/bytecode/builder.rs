//! Programmatic construction of code units.
//!
//! Front ends and tests use [`CodeBuilder`] instead of writing instruction
//! vectors by hand. Jumps are emitted against [`Label`]s and patched when the
//! unit is built.

use super::{
    code::{Code, CodeFlags, Const, Instruction},
    op::{BinaryOp, CompareOp, Opcode, UnaryOp},
};
use crate::source::LoadError;

/// A forward or backward jump destination inside one [`CodeBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builder for a single code unit.
///
/// ```
/// use echovm::{CodeBuilder, Const};
///
/// let mut b = CodeBuilder::module("demo", "demo.py");
/// b.load_const(1).store_name("x");
/// b.load_const(Const::None).return_value();
/// let code = b.build().unwrap();
/// assert_eq!(code.names, vec!["x".to_owned()]);
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    code: Code,
    line: u32,
    labels: Vec<Option<u32>>,
    /// Instruction index and label of every jump awaiting its target.
    fixups: Vec<(usize, Label)>,
}

impl CodeBuilder {
    /// Starts a module body.
    #[must_use]
    pub fn module(name: &str, filename: &str) -> Self {
        let mut code = Code::new("<module>", CodeFlags::MODULE);
        code.qualname = name.to_owned();
        code.filename = filename.to_owned();
        Self::from_code(code)
    }

    /// Starts a function body with the given positional parameters.
    #[must_use]
    pub fn function(name: &str, params: &[&str]) -> Self {
        let mut code = Code::new(name, CodeFlags::FUNCTION);
        code.argcount = params.len() as u32;
        code.varnames = params.iter().map(|p| (*p).to_owned()).collect();
        Self::from_code(code)
    }

    /// Starts a class body, run by `__build_class__` with a fresh namespace.
    #[must_use]
    pub fn class_body(name: &str) -> Self {
        Self::from_code(Code::new(name, CodeFlags::FUNCTION | CodeFlags::CLASS_BODY))
    }

    fn from_code(code: Code) -> Self {
        Self {
            line: code.first_line,
            code,
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Adds flags such as [`CodeFlags::GENERATOR`].
    #[must_use]
    pub fn with_flags(mut self, flags: CodeFlags) -> Self {
        self.code.flags = self.code.flags | flags;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u16) -> Self {
        self.code.version = version;
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: &str) -> Self {
        filename.clone_into(&mut self.code.filename);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.code.source = Some(source.to_owned());
        self
    }

    /// Declares keyword-only parameters after the positional ones.
    #[must_use]
    pub fn with_kwonly(mut self, names: &[&str]) -> Self {
        self.code.kwonlyargcount = names.len() as u32;
        for name in names {
            self.code.varnames.push((*name).to_owned());
        }
        self
    }

    /// Declares a `*args` parameter. Must follow positional and keyword-only parameters.
    #[must_use]
    pub fn with_varargs(mut self, name: &str) -> Self {
        self.code.flags = self.code.flags | CodeFlags::VARARGS;
        self.code.varnames.push(name.to_owned());
        self
    }

    /// Declares a `**kwargs` parameter. Must be declared last.
    #[must_use]
    pub fn with_varkeywords(mut self, name: &str) -> Self {
        self.code.flags = self.code.flags | CodeFlags::VARKEYWORDS;
        self.code.varnames.push(name.to_owned());
        self
    }

    #[must_use]
    pub fn with_cellvars(mut self, names: &[&str]) -> Self {
        self.code.cellvars = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn with_freevars(mut self, names: &[&str]) -> Self {
        self.code.freevars = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    /// Sets the source line recorded on subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Emits a raw instruction.
    pub fn emit(&mut self, op: Opcode, arg: u32) -> &mut Self {
        self.code.instructions.push(Instruction::new(op, arg, self.line));
        self
    }

    /// Emits an instruction whose operand is ignored.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.emit(op, 0)
    }

    /// Adds a constant, reusing an equal scalar entry.
    pub fn add_const(&mut self, value: impl Into<Const>) -> u32 {
        let value = value.into();
        if !matches!(value, Const::Code(_) | Const::Float(_))
            && let Some(index) = self.code.consts.iter().position(|c| *c == value)
        {
            return index as u32;
        }
        self.code.consts.push(value);
        (self.code.consts.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        intern(&mut self.code.names, name)
    }

    pub fn add_varname(&mut self, name: &str) -> u32 {
        intern(&mut self.code.varnames, name)
    }

    fn cell_index(&self, name: &str) -> u32 {
        let index = self
            .code
            .cellvars
            .iter()
            .chain(&self.code.freevars)
            .position(|c| c == name);
        // unknown cells surface as out-of-range operands at build time
        index.map_or(u32::MAX, |i| i as u32)
    }

    pub fn load_const(&mut self, value: impl Into<Const>) -> &mut Self {
        let index = self.add_const(value);
        self.emit(Opcode::LoadConst, index)
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::LoadName, index)
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::StoreName, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::LoadGlobal, index)
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::StoreGlobal, index)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.add_varname(name);
        self.emit(Opcode::LoadFast, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.add_varname(name);
        self.emit(Opcode::StoreFast, index)
    }

    pub fn load_deref(&mut self, name: &str) -> &mut Self {
        let index = self.cell_index(name);
        self.emit(Opcode::LoadDeref, index)
    }

    pub fn store_deref(&mut self, name: &str) -> &mut Self {
        let index = self.cell_index(name);
        self.emit(Opcode::StoreDeref, index)
    }

    pub fn load_closure(&mut self, name: &str) -> &mut Self {
        let index = self.cell_index(name);
        self.emit(Opcode::LoadClosure, index)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::LoadAttr, index)
    }

    pub fn store_attr(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::StoreAttr, index)
    }

    pub fn binary(&mut self, op: BinaryOp) -> &mut Self {
        self.emit(Opcode::BinaryOp, op as u32)
    }

    pub fn unary(&mut self, op: UnaryOp) -> &mut Self {
        self.emit(Opcode::UnaryOp, op as u32)
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit(Opcode::CompareOp, op as u32)
    }

    pub fn call(&mut self, argc: u32) -> &mut Self {
        self.emit(Opcode::CallFunction, argc)
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.op(Opcode::PopTop)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.op(Opcode::ReturnValue)
    }

    /// Emits `return None`.
    pub fn return_none(&mut self) -> &mut Self {
        self.load_const(Const::None).return_value()
    }

    /// Emits the `level`/`fromlist` pushes and `ImportName`.
    ///
    /// An empty `fromlist` is encoded as `None`, the plain `import a.b` form.
    pub fn import_name(&mut self, name: &str, level: u32, fromlist: &[&str]) -> &mut Self {
        self.load_const(i64::from(level));
        if fromlist.is_empty() {
            self.load_const(Const::None);
        } else {
            self.load_const(Const::Tuple(fromlist.iter().map(|n| Const::from(*n)).collect()));
        }
        let index = self.add_name(name);
        self.emit(Opcode::ImportName, index)
    }

    pub fn import_from(&mut self, name: &str) -> &mut Self {
        let index = self.add_name(name);
        self.emit(Opcode::ImportFrom, index)
    }

    /// Emits `MakeFunction` for a nested unit with no defaults or closure.
    pub fn make_function(&mut self, code: Code) -> &mut Self {
        let qualname = if code.qualname.is_empty() {
            code.name.clone()
        } else {
            code.qualname.clone()
        };
        self.load_const(code);
        self.load_const(qualname);
        self.emit(Opcode::MakeFunction, 0)
    }

    /// Allocates a new unplaced label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Places `label` at the next emitted instruction.
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.instructions.len() as u32);
        self
    }

    /// Emits a jump-style instruction targeting `label`.
    pub fn jump(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.fixups.push((self.code.instructions.len(), label));
        self.emit(op, 0)
    }

    /// Patches jumps and validates the finished unit.
    pub fn build(mut self) -> Result<Code, LoadError> {
        for (ip, label) in self.fixups {
            let target = self.labels[label.0].ok_or_else(|| LoadError::Decode {
                path: None,
                message: format!("label {} used but never placed in '{}'", label.0, self.code.name),
            })?;
            self.code.instructions[ip].arg = target;
        }
        self.code.validate()?;
        Ok(self.code)
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    if let Some(index) = table.iter().position(|n| n == name) {
        return index as u32;
    }
    table.push(name.to_owned());
    (table.len() - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_patch_forward_and_backward_jumps() {
        let mut b = CodeBuilder::module("m", "");
        let top = b.new_label();
        let end = b.new_label();
        b.place(top);
        b.load_const(true);
        b.jump(Opcode::PopJumpIfFalse, end);
        b.jump(Opcode::Jump, top);
        b.place(end);
        b.return_none();
        let code = b.build().unwrap();
        assert_eq!(code.instructions[1].arg, 3);
        assert_eq!(code.instructions[2].arg, 0);
    }

    #[test]
    fn unplaced_label_is_an_error() {
        let mut b = CodeBuilder::module("m", "");
        let never = b.new_label();
        b.jump(Opcode::Jump, never);
        assert!(b.build().is_err());
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut b = CodeBuilder::module("m", "");
        assert_eq!(b.add_const(7), b.add_const(7));
        assert_ne!(b.add_const("a"), b.add_const("b"));
    }
}
