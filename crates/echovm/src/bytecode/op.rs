//! Opcode definitions and operand classification.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr, IntoStaticStr};

/// Instruction opcodes.
///
/// Every instruction carries a single `u32` operand; how it is interpreted is
/// given by [`Opcode::operand_kind`]. Stack effects are noted as
/// `before -> after` with the top of stack on the right.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum Opcode {
    Nop,
    /// `a ->`
    PopTop,
    /// `a b -> b a`
    RotTwo,
    /// `a b c -> c a b`
    RotThree,
    /// `a -> a a`
    DupTop,
    /// `a b -> a b a b`
    DupTopTwo,

    /// Push `consts[arg]`.
    LoadConst,
    /// Name lookup through class namespace, module globals, then builtins.
    LoadName,
    StoreName,
    DeleteName,
    /// Name lookup through module globals, then builtins.
    LoadGlobal,
    StoreGlobal,
    /// Fast local `varnames[arg]`.
    LoadFast,
    StoreFast,
    DeleteFast,
    /// Cell `arg` (cellvars first, then freevars).
    LoadDeref,
    StoreDeref,
    /// Push the cell object itself, for building closures.
    LoadClosure,
    /// `obj -> obj.names[arg]`
    LoadAttr,
    /// `value obj ->` sets `obj.names[arg] = value`
    StoreAttr,
    /// `obj ->`
    DeleteAttr,

    /// `lhs rhs -> result`, operand is a [`BinaryOp`].
    BinaryOp,
    /// `value -> result`, operand is a [`UnaryOp`].
    UnaryOp,
    /// `lhs rhs -> bool`, operand is a [`CompareOp`].
    CompareOp,
    /// `obj key -> obj[key]`
    BinarySubscr,
    /// `value obj key ->`
    StoreSubscr,
    /// `obj key ->`
    DeleteSubscr,

    /// Collect `arg` items into a new container.
    BuildTuple,
    BuildList,
    BuildSet,
    /// Collect `arg` key/value pairs (`k1 v1 k2 v2 ...`) into a dict.
    BuildMap,
    /// Concatenate `arg` strings.
    BuildString,
    /// Convert TOS to a string; operand 0 uses `str`, 1 uses `repr`.
    FormatValue,
    /// Append TOS to the list `arg` slots below it (comprehensions).
    ListAppend,
    SetAdd,
    /// `key value ->` inserted into the dict `arg` slots below.
    MapAdd,
    /// Replace an iterable with exactly `arg` items, first item on top.
    UnpackSequence,

    /// Jump to instruction index `arg`.
    Jump,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    /// `iterable -> iterator`
    GetIter,
    /// `iterator -> iterator item`, or pop the iterator and jump to `arg` when exhausted.
    ForIter,

    /// Push a loop block whose exit is `arg`.
    SetupLoop,
    /// Unwind to the innermost loop block and jump to its exit.
    BreakLoop,
    /// Push an exception handler block whose handler starts at `arg`.
    SetupExcept,
    /// Push a cleanup block entered with the exception when the protected range raises.
    SetupFinally,
    /// Pop the innermost loop/handler block after its range completes normally.
    PopBlock,
    /// Leave an exception handler, restoring the previously handled exception.
    PopExcept,
    /// 0: re-raise the handled exception; 1: raise TOS; 2: raise TOS1 from TOS.
    RaiseVarargs,
    /// Re-raise the exception currently being handled, keeping its traceback.
    Reraise,

    /// `[defaults] [kwdefaults] [closure] code qualname -> function`, operand bit flags.
    MakeFunction,
    /// `callee arg1 .. argN -> result`
    CallFunction,
    /// `callee args.. names_tuple -> result`; the last `len(names)` args are keywords.
    CallFunctionKw,
    /// `callee args_iterable [kwargs_dict] -> result`; operand bit 0 marks kwargs.
    CallFunctionEx,
    ReturnValue,
    /// Suspend the generator frame, handing TOS to the resumer.
    YieldValue,

    /// Push the `__build_class__` builtin.
    LoadBuildClass,

    /// `level fromlist -> module`, importing `names[arg]`.
    ImportName,
    /// `module -> module value`, reading `names[arg]` from the module.
    ImportFrom,
    /// `module ->`, binding every public name into the current namespace.
    ImportStar,
}

/// How an instruction's operand is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// The operand is ignored.
    None,
    /// Index into `consts`.
    Const,
    /// Index into `names`.
    Name,
    /// Index into `varnames`.
    Local,
    /// Index into `cellvars ++ freevars`.
    Cell,
    /// Instruction index.
    Target,
    /// Item count or flag bits.
    Count,
    BinOp,
    UnOp,
    CmpOp,
}

impl Opcode {
    /// Returns how this opcode's operand is interpreted.
    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::LoadConst => OperandKind::Const,
            Self::LoadName
            | Self::StoreName
            | Self::DeleteName
            | Self::LoadGlobal
            | Self::StoreGlobal
            | Self::LoadAttr
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::ImportName
            | Self::ImportFrom => OperandKind::Name,
            Self::LoadFast | Self::StoreFast | Self::DeleteFast => OperandKind::Local,
            Self::LoadDeref | Self::StoreDeref | Self::LoadClosure => OperandKind::Cell,
            Self::Jump
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::ForIter
            | Self::SetupLoop
            | Self::SetupExcept
            | Self::SetupFinally => OperandKind::Target,
            Self::BuildTuple
            | Self::BuildList
            | Self::BuildSet
            | Self::BuildMap
            | Self::BuildString
            | Self::FormatValue
            | Self::ListAppend
            | Self::SetAdd
            | Self::MapAdd
            | Self::UnpackSequence
            | Self::RaiseVarargs
            | Self::MakeFunction
            | Self::CallFunction
            | Self::CallFunctionKw
            | Self::CallFunctionEx => OperandKind::Count,
            Self::BinaryOp => OperandKind::BinOp,
            Self::UnaryOp => OperandKind::UnOp,
            Self::CompareOp => OperandKind::CmpOp,
            Self::Nop
            | Self::PopTop
            | Self::RotTwo
            | Self::RotThree
            | Self::DupTop
            | Self::DupTopTwo
            | Self::BinarySubscr
            | Self::StoreSubscr
            | Self::DeleteSubscr
            | Self::GetIter
            | Self::BreakLoop
            | Self::PopBlock
            | Self::PopExcept
            | Self::Reraise
            | Self::ReturnValue
            | Self::YieldValue
            | Self::LoadBuildClass
            | Self::ImportStar => OperandKind::None,
        }
    }

    /// Instruction-set version that introduced this opcode.
    ///
    /// Version 1 is the original straight-line set; version 2 added generators,
    /// unpacked calls, set/dict comprehensions and string building.
    #[must_use]
    pub fn since(self) -> u16 {
        match self {
            Self::YieldValue
            | Self::CallFunctionEx
            | Self::BuildSet
            | Self::SetAdd
            | Self::MapAdd
            | Self::BuildString
            | Self::FormatValue => 2,
            _ => 1,
        }
    }
}

/// Binary operators carried by [`Opcode::BinaryOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, FromRepr)]
#[repr(u8)]
pub enum BinaryOp {
    #[strum(to_string = "Add", serialize = "+")]
    Add,
    #[strum(to_string = "Sub", serialize = "-")]
    Sub,
    #[strum(to_string = "Mul", serialize = "*")]
    Mul,
    #[strum(to_string = "TrueDiv", serialize = "/")]
    TrueDiv,
    #[strum(to_string = "FloorDiv", serialize = "//")]
    FloorDiv,
    #[strum(to_string = "Mod", serialize = "%")]
    Mod,
    #[strum(to_string = "Pow", serialize = "**")]
    Pow,
    #[strum(to_string = "LShift", serialize = "<<")]
    LShift,
    #[strum(to_string = "RShift", serialize = ">>")]
    RShift,
    #[strum(to_string = "BitAnd", serialize = "&")]
    BitAnd,
    #[strum(to_string = "BitOr", serialize = "|")]
    BitOr,
    #[strum(to_string = "BitXor", serialize = "^")]
    BitXor,
}

impl BinaryOp {
    /// Decodes an instruction operand.
    #[must_use]
    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    /// Source-level operator symbol, used in error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }

    /// Name of the special method consulted on the left operand.
    #[must_use]
    pub fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::Sub => "__sub__",
            Self::Mul => "__mul__",
            Self::TrueDiv => "__truediv__",
            Self::FloorDiv => "__floordiv__",
            Self::Mod => "__mod__",
            Self::Pow => "__pow__",
            Self::LShift => "__lshift__",
            Self::RShift => "__rshift__",
            Self::BitAnd => "__and__",
            Self::BitOr => "__or__",
            Self::BitXor => "__xor__",
        }
    }

    /// Name of the reflected special method consulted on the right operand.
    #[must_use]
    pub fn reflected_dunder(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::Sub => "__rsub__",
            Self::Mul => "__rmul__",
            Self::TrueDiv => "__rtruediv__",
            Self::FloorDiv => "__rfloordiv__",
            Self::Mod => "__rmod__",
            Self::Pow => "__rpow__",
            Self::LShift => "__rlshift__",
            Self::RShift => "__rrshift__",
            Self::BitAnd => "__rand__",
            Self::BitOr => "__ror__",
            Self::BitXor => "__rxor__",
        }
    }
}

/// Unary operators carried by [`Opcode::UnaryOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, FromRepr)]
#[repr(u8)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

impl UnaryOp {
    #[must_use]
    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "unary -",
            Self::Pos => "unary +",
            Self::Not => "not",
            Self::Invert => "unary ~",
        }
    }

    /// Special method consulted on instances; `not` always uses truthiness.
    #[must_use]
    pub fn dunder(self) -> Option<&'static str> {
        match self {
            Self::Neg => Some("__neg__"),
            Self::Pos => Some("__pos__"),
            Self::Invert => Some("__invert__"),
            Self::Not => None,
        }
    }
}

/// Comparison operators carried by [`Opcode::CompareOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, FromRepr)]
#[repr(u8)]
pub enum CompareOp {
    #[strum(to_string = "Lt", serialize = "<")]
    Lt,
    #[strum(to_string = "Le", serialize = "<=")]
    Le,
    #[strum(to_string = "Eq", serialize = "==")]
    Eq,
    #[strum(to_string = "Ne", serialize = "!=")]
    Ne,
    #[strum(to_string = "Gt", serialize = ">")]
    Gt,
    #[strum(to_string = "Ge", serialize = ">=")]
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    /// `exc class_or_tuple -> bool`, used by `except` clauses.
    ExceptionMatch,
}

impl CompareOp {
    #[must_use]
    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::ExceptionMatch => "exception match",
        }
    }

    /// Rich comparison special method and its reflection, for ordering and equality.
    #[must_use]
    pub fn dunders(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Lt => Some(("__lt__", "__gt__")),
            Self::Le => Some(("__le__", "__ge__")),
            Self::Eq => Some(("__eq__", "__eq__")),
            Self::Ne => Some(("__ne__", "__ne__")),
            Self::Gt => Some(("__gt__", "__lt__")),
            Self::Ge => Some(("__ge__", "__le__")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn operators_parse_from_name_or_symbol() {
        assert_eq!(BinaryOp::from_str("Add").unwrap(), BinaryOp::Add);
        assert_eq!(BinaryOp::from_str("//").unwrap(), BinaryOp::FloorDiv);
        assert_eq!(CompareOp::from_str("<=").unwrap(), CompareOp::Le);
        assert_eq!(CompareOp::from_str("ExceptionMatch").unwrap(), CompareOp::ExceptionMatch);
        assert_eq!(BinaryOp::FloorDiv.to_string(), "FloorDiv");
    }

    #[test]
    fn operands_decode_by_discriminant() {
        assert_eq!(BinaryOp::from_arg(BinaryOp::Mod as u32), Some(BinaryOp::Mod));
        assert_eq!(CompareOp::from_arg(CompareOp::IsNot as u32), Some(CompareOp::IsNot));
        assert_eq!(UnaryOp::from_arg(200), None);
        assert_eq!(BinaryOp::from_arg(1 << 20), None);
    }

    #[test]
    fn generator_opcodes_need_version_two() {
        assert_eq!(Opcode::YieldValue.since(), 2);
        assert_eq!(Opcode::ImportName.since(), 1);
    }
}
