//! The guest value representation.

use std::{fmt::Write, rc::Rc};

use crate::{
    builtins::Builtins,
    bytecode::{Code, Const},
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceError,
    types::{Type, class::class_name},
};

/// A guest value.
///
/// Scalars are stored inline and have value semantics; everything with
/// identity or mutability lives in the [`Heap`] and is referenced by
/// [`Value::Ref`]. Copying a `Ref` copies the handle, never the object.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    /// Marker for unbound locals and empty cells. Never visible to guest code.
    Undefined,
    None,
    NotImplemented,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    /// Native builtin functions and builtin types.
    Builtin(Builtins),
    /// A nested code unit loaded from a constant, consumed by `MakeFunction`.
    Code(Rc<Code>),
    Ref(HeapId),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// Materializes a constant-pool entry. Tuples are allocated fresh each time.
    pub fn from_const(constant: &Const, heap: &mut Heap) -> Result<Self, ResourceError> {
        Ok(match constant {
            Const::None => Self::None,
            Const::Bool(b) => Self::Bool(*b),
            Const::Int(i) => Self::Int(*i),
            Const::Float(f) => Self::Float(*f),
            Const::Str(s) => Self::str(s),
            Const::Bytes(b) => Self::Bytes(Rc::from(b.as_slice())),
            Const::Code(code) => Self::Code(Rc::clone(code)),
            Const::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|item| Self::from_const(item, heap))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::Ref(heap.allocate(HeapData::Tuple(values))?)
            }
        })
    }

    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any real number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Identity comparison (`is`).
    ///
    /// Heap objects compare by handle. Scalars have no observable identity
    /// beyond their value, so equal scalars of the same kind are identical.
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::None, Self::None) | (Self::NotImplemented, Self::NotImplemented) => true,
            (Self::Undefined, Self::Undefined) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Type tag used for builtin dispatch.
    pub fn py_type(&self, heap: &Heap) -> Type {
        match self {
            Self::Undefined | Self::None => Type::NoneType,
            Self::NotImplemented => Type::NotImplementedType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Str(_) => Type::Str,
            Self::Bytes(_) => Type::Bytes,
            Self::Builtin(b) => b.py_type(),
            Self::Code(_) => Type::Code,
            Self::Ref(id) => heap.get(*id).py_type(),
        }
    }

    /// Name of the value's type as shown in error messages.
    pub fn type_name(&self, heap: &Heap) -> String {
        match self {
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Instance(inst) => class_name(heap, inst.class),
                HeapData::Class(cls) => cls.metaclass.map_or_else(|| "type".to_owned(), |m| class_name(heap, m)),
                other => other.py_type().to_string(),
            },
            other => other.py_type(heap).to_string(),
        }
    }

    /// Converts the value to a dict/set key.
    ///
    /// Numbers that compare equal hash equal (`1`, `1.0` and `True` are one
    /// key). Tuples hash by content; other heap objects hash by identity;
    /// mutable containers are rejected.
    pub fn to_key(&self, heap: &Heap) -> RunResult<DictKey> {
        Ok(match self {
            Self::None => DictKey::None,
            Self::NotImplemented => DictKey::NotImplemented,
            Self::Bool(b) => DictKey::Int(i64::from(*b)),
            Self::Int(i) => DictKey::Int(*i),
            Self::Float(f) => float_key(*f),
            Self::Str(s) => DictKey::Str(Rc::clone(s)),
            Self::Bytes(b) => DictKey::Bytes(Rc::clone(b)),
            Self::Builtin(b) => DictKey::Builtin(*b),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Tuple(items) => DictKey::Tuple(
                    items
                        .iter()
                        .map(|item| item.to_key(heap))
                        .collect::<RunResult<Box<[_]>>>()?,
                ),
                HeapData::List(_) | HeapData::Dict(_) | HeapData::Set(_) => {
                    return Err(ExcType::unhashable(&self.type_name(heap)));
                }
                _ => DictKey::Identity(*id),
            },
            Self::Undefined | Self::Code(_) => return Err(ExcType::unhashable(&self.type_name(heap))),
        })
    }
}

fn float_key(f: f64) -> DictKey {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        DictKey::Int(f as i64)
    } else {
        DictKey::Float(f.to_bits())
    }
}

/// Hashable, normalized form of a value used as a dict key or set member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    NotImplemented,
    Int(i64),
    /// Non-integral float, by bit pattern.
    Float(u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Box<[DictKey]>),
    Builtin(Builtins),
    /// Any other heap object, hashed by identity.
    Identity(HeapId),
}

/// Formats a float the way the modeled language's `repr` does.
///
/// Shortest round-trip digits; exponent notation below `1e-4` and from `1e16` up.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }
    let sci = format!("{f:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }
    let mut out = format!("{f}");
    if !out.contains('.') {
        out.push_str(".0");
    }
    out
}

/// Quotes a string like the modeled language's `repr`.
pub(crate) fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub(crate) fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push(quote as char);
    out
}

/// Renders a value without running guest code.
///
/// Used by tracers and by the host conversion for objects that have no
/// owned representation. Instances show their class instead of calling
/// `__repr__`; self-referencing containers render as `[...]`.
pub(crate) fn native_repr(value: &Value, heap: &Heap) -> String {
    let mut out = String::new();
    native_repr_into(value, heap, &mut out, &mut Vec::new());
    out
}

fn native_repr_into(value: &Value, heap: &Heap, out: &mut String, seen: &mut Vec<HeapId>) {
    match value {
        Value::Undefined => out.push_str("<undefined>"),
        Value::None => out.push_str("None"),
        Value::NotImplemented => out.push_str("NotImplemented"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => out.push_str(&str_repr(s)),
        Value::Bytes(b) => out.push_str(&bytes_repr(b)),
        Value::Builtin(b) => {
            let _ = write!(out, "{}", b.repr());
        }
        Value::Code(code) => {
            let _ = write!(out, "<code object {}>", code.name);
        }
        Value::Ref(id) => {
            if seen.contains(id) {
                out.push_str(match heap.get(*id) {
                    HeapData::Dict(_) | HeapData::Set(_) => "{...}",
                    HeapData::Tuple(_) => "(...)",
                    _ => "[...]",
                });
                return;
            }
            seen.push(*id);
            heap_repr_into(*id, heap, out, seen);
            seen.pop();
        }
    }
}

fn join_into(items: &[Value], heap: &Heap, out: &mut String, seen: &mut Vec<HeapId>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        native_repr_into(item, heap, out, seen);
    }
}

fn heap_repr_into(id: HeapId, heap: &Heap, out: &mut String, seen: &mut Vec<HeapId>) {
    match heap.get(id) {
        HeapData::List(items) => {
            out.push('[');
            join_into(items, heap, out, seen);
            out.push(']');
        }
        HeapData::Tuple(items) => {
            out.push('(');
            join_into(items, heap, out, seen);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        HeapData::Dict(dict) => {
            out.push('{');
            for (i, (k, v)) in dict.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                native_repr_into(k, heap, out, seen);
                out.push_str(": ");
                native_repr_into(v, heap, out, seen);
            }
            out.push('}');
        }
        HeapData::Set(set) => {
            if set.is_empty() {
                out.push_str("set()");
                return;
            }
            out.push('{');
            let items: Vec<Value> = set.iter().cloned().collect();
            join_into(&items, heap, out, seen);
            out.push('}');
        }
        HeapData::Range(r) => {
            if r.step == 1 {
                let _ = write!(out, "range({}, {})", r.start, r.stop);
            } else {
                let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
            }
        }
        HeapData::Module(module) => match module.file_display() {
            Some(file) => {
                let _ = write!(out, "<module '{}' from '{file}'>", module.name);
            }
            None if module.native.is_some() => {
                let _ = write!(out, "<module '{}' (built-in)>", module.name);
            }
            None => {
                let _ = write!(out, "<module '{}'>", module.name);
            }
        },
        HeapData::Class(cls) => {
            let _ = write!(out, "<class '{}'>", cls.display_name());
        }
        HeapData::Instance(inst) => {
            let exc_class = match heap.get(inst.class) {
                HeapData::Class(cls) => cls.exc_type.map(|_| cls.name.clone()),
                _ => None,
            };
            match (exc_class, inst.attrs.get("args")) {
                (Some(name), Some(Value::Ref(args_id))) => {
                    out.push_str(&name);
                    out.push('(');
                    if let HeapData::Tuple(args) = heap.get(*args_id) {
                        join_into(args, heap, out, seen);
                    }
                    out.push(')');
                }
                _ => {
                    let name = match heap.get(inst.class) {
                        HeapData::Class(cls) => cls.display_name(),
                        _ => "object".to_owned(),
                    };
                    let _ = write!(out, "<{name} object at {:#x}>", id.index());
                }
            }
        }
        HeapData::Function(func) => {
            let _ = write!(out, "<function {} at {:#x}>", func.qualname, id.index());
        }
        HeapData::BoundMethod(bound) => {
            out.push_str("<bound method ");
            match &bound.func {
                Value::Ref(func_id) => match heap.get(*func_id) {
                    HeapData::Function(func) => out.push_str(&func.qualname),
                    _ => out.push('?'),
                },
                Value::Builtin(b) => {
                    let _ = write!(out, "{}", b.name());
                }
                _ => out.push('?'),
            }
            out.push_str(" of ");
            native_repr_into(&bound.receiver, heap, out, seen);
            out.push('>');
        }
        HeapData::BuiltinMethod(bound) => {
            let _ = write!(
                out,
                "<built-in method {} of {} object>",
                bound.method.name(),
                bound.receiver.type_name(heap)
            );
        }
        HeapData::Generator(generator) => {
            let _ = write!(out, "<generator object {} at {:#x}>", generator.qualname, id.index());
        }
        other => {
            let _ = write!(out, "<{} object at {:#x}>", other.py_type(), id.index());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_matches_shortest_round_trip() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123_456.789), "123456.789");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn str_repr_picks_quotes() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(bytes_repr(b"a\x00"), "b'a\\x00'");
    }

    #[test]
    fn equal_numbers_share_a_key() {
        let heap = Heap::new(None);
        let one = Value::Int(1).to_key(&heap).unwrap();
        assert_eq!(Value::Float(1.0).to_key(&heap).unwrap(), one);
        assert_eq!(Value::Bool(true).to_key(&heap).unwrap(), one);
        assert_ne!(Value::Float(1.5).to_key(&heap).unwrap(), one);
    }

    #[test]
    fn lists_are_unhashable() {
        let mut heap = Heap::new(None);
        let list = Value::Ref(heap.allocate(HeapData::List(vec![])).unwrap());
        let err = list.to_key(&heap).unwrap_err();
        assert!(err.is_simple_exception(ExcType::TypeError));
    }

    #[test]
    fn self_referencing_list_renders_ellipsis() {
        let mut heap = Heap::new(None);
        let id = heap.allocate(HeapData::List(vec![Value::Int(1)])).unwrap();
        if let HeapData::List(items) = heap.get_mut(id) {
            items.push(Value::Ref(id));
        }
        assert_eq!(native_repr(&Value::Ref(id), &heap), "[1, [...]]");
    }
}
