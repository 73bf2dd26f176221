use std::fmt::{self, Write};

use ahash::AHashSet;

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    types::{Dict, Set},
    value::{Value, bytes_repr, float_repr, native_repr, str_repr},
};

/// A guest value that can be passed to or read back from the interpreter.
///
/// Owns all its data, so it outlives the heap it was read from and can be
/// serialized. Values without a natural mapping (functions, classes,
/// instances, modules) are read back as `Repr`, as is any container that
/// contains itself.
///
/// # JSON
///
/// [`Object::to_json_value`] produces natural JSON for `None`, `Bool`, `Int`,
/// `Float`, `String`, `List` and string-keyed `Dict`; the other variants use a
/// `{"$tag": ...}` object. The derived serde impls are used for binary formats.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    #[serde(alias = "none")]
    None,
    #[serde(alias = "bool")]
    Bool(bool),
    #[serde(alias = "int")]
    Int(i64),
    #[serde(alias = "float")]
    Float(f64),
    #[serde(alias = "str")]
    String(String),
    #[serde(alias = "bytes")]
    Bytes(Vec<u8>),
    #[serde(alias = "list")]
    List(Vec<Self>),
    #[serde(alias = "tuple")]
    Tuple(Vec<Self>),
    /// Insertion-ordered key/value pairs.
    #[serde(alias = "dict")]
    Dict(Vec<(Self, Self)>),
    #[serde(alias = "set")]
    Set(Vec<Self>),
    /// An exception instance: its class name and `str()` of its first argument.
    Exception { exc_type: String, message: Option<String> },
    /// Output-only: the `repr()` of a value with no other mapping, or a
    /// placeholder such as `[...]` for a self-containing container.
    Repr(String),
}

impl Object {
    /// Reads a guest value out of the heap.
    pub(crate) fn from_value(value: &Value, heap: &Heap) -> Self {
        let mut visiting = AHashSet::new();
        Self::from_value_inner(value, heap, &mut visiting)
    }

    fn from_value_inner(value: &Value, heap: &Heap, visiting: &mut AHashSet<HeapId>) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::Str(s) => Self::String(s.to_string()),
            Value::Bytes(b) => Self::Bytes(b.to_vec()),
            Value::Ref(id) => {
                if !visiting.insert(*id) {
                    let placeholder = match heap.get(*id) {
                        HeapData::List(_) => "[...]",
                        HeapData::Tuple(_) => "(...)",
                        HeapData::Dict(_) | HeapData::Set(_) => "{...}",
                        _ => "...",
                    };
                    return Self::Repr(placeholder.to_owned());
                }
                let items = |items: &[Value], visiting: &mut AHashSet<HeapId>| -> Vec<Self> {
                    items
                        .iter()
                        .map(|item| Self::from_value_inner(item, heap, visiting))
                        .collect()
                };
                let object = match heap.get(*id) {
                    HeapData::List(list) => Self::List(items(list, visiting)),
                    HeapData::Tuple(tuple) => Self::Tuple(items(tuple, visiting)),
                    HeapData::Dict(dict) => Self::Dict(
                        dict.iter()
                            .map(|(k, v)| {
                                (
                                    Self::from_value_inner(k, heap, visiting),
                                    Self::from_value_inner(v, heap, visiting),
                                )
                            })
                            .collect(),
                    ),
                    HeapData::Set(set) => {
                        Self::Set(set.iter().map(|item| Self::from_value_inner(item, heap, visiting)).collect())
                    }
                    HeapData::Instance(inst) => match exception_parts(heap, inst.class, &inst.attrs) {
                        Some((exc_type, message)) => Self::Exception { exc_type, message },
                        None => Self::Repr(native_repr(value, heap)),
                    },
                    _ => Self::Repr(native_repr(value, heap)),
                };
                visiting.remove(id);
                object
            }
            other => Self::Repr(native_repr(other, heap)),
        }
    }

    /// Allocates the guest form of this object.
    ///
    /// `Exception` and `Repr` are output-only and rejected.
    pub(crate) fn to_value(self, heap: &mut Heap) -> RunResult<Value> {
        let type_name = self.type_name();
        Ok(match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
            Self::String(s) => Value::str(&s),
            Self::Bytes(b) => Value::Bytes(b.into()),
            Self::List(items) => {
                let items = items.into_iter().map(|i| i.to_value(heap)).collect::<RunResult<_>>()?;
                heap.list(items)?
            }
            Self::Tuple(items) => {
                let items = items.into_iter().map(|i| i.to_value(heap)).collect::<RunResult<_>>()?;
                heap.tuple(items)?
            }
            Self::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key_value = key.to_value(heap)?;
                    let value = value.to_value(heap)?;
                    dict.insert(key_value.to_key(heap)?, key_value, value);
                }
                Value::Ref(heap.allocate(HeapData::Dict(dict))?)
            }
            Self::Set(items) => {
                let mut set = Set::new();
                for item in items {
                    let value = item.to_value(heap)?;
                    set.add(value.to_key(heap)?, value);
                }
                Value::Ref(heap.allocate(HeapData::Set(set))?)
            }
            Self::Exception { .. } | Self::Repr(_) => {
                return Err(ExcType::type_error(format!(
                    "'{type_name}' objects cannot be passed into the interpreter"
                )));
            }
        })
    }

    /// The guest type name this object reads back as.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Exception { .. } => "Exception",
            Self::Repr(_) => "Repr",
        }
    }

    /// The guest `repr()` of this object.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.repr_fmt(&mut out);
        out
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&float_repr(*v)),
            Self::String(s) => f.write_str(&str_repr(s)),
            Self::Bytes(b) => f.write_str(&bytes_repr(b)),
            Self::List(items) => {
                f.write_char('[')?;
                write_items(f, items)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(pairs) => {
                f.write_char('{')?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    key.repr_fmt(f)?;
                    f.write_str(": ")?;
                    value.repr_fmt(f)?;
                }
                f.write_char('}')
            }
            Self::Set(items) if items.is_empty() => f.write_str("set()"),
            Self::Set(items) => {
                f.write_char('{')?;
                write_items(f, items)?;
                f.write_char('}')
            }
            Self::Exception { exc_type, message } => match message {
                Some(message) => write!(f, "{exc_type}({})", str_repr(message)),
                None => write!(f, "{exc_type}()"),
            },
            Self::Repr(repr) => f.write_str(repr),
        }
    }

    /// Natural JSON for the JSON-shaped variants, tagged objects for the rest.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::{Value as JV, json};
        match self {
            Self::None => JV::Null,
            Self::Bool(b) => JV::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) if f.is_finite() => json!(f),
            Self::Float(_) => JV::Null,
            Self::String(s) => JV::String(s.clone()),
            Self::Bytes(b) => json!({ "$bytes": b }),
            Self::List(items) => JV::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Tuple(items) => json!({ "$tuple": items.iter().map(Self::to_json_value).collect::<Vec<_>>() }),
            Self::Dict(pairs) => JV::Object(
                pairs
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            Self::String(s) => s.clone(),
                            other => other.py_repr(),
                        };
                        (key, value.to_json_value())
                    })
                    .collect(),
            ),
            Self::Set(items) => json!({ "$set": items.iter().map(Self::to_json_value).collect::<Vec<_>>() }),
            Self::Exception { exc_type, message } => {
                json!({ "$exception": { "type": exc_type, "message": message } })
            }
            Self::Repr(repr) => json!({ "$repr": repr }),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            _ => self.repr_fmt(f),
        }
    }
}

fn write_items(f: &mut impl Write, items: &[Object]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f)?;
    }
    Ok(())
}

/// Class name and message of an exception instance; `None` for other instances.
fn exception_parts(heap: &Heap, class: HeapId, attrs: &crate::types::Namespace) -> Option<(String, Option<String>)> {
    let HeapData::Class(cls) = heap.get(class) else {
        return None;
    };
    cls.exc_type?;
    let message = attrs
        .get("args")
        .and_then(Value::ref_id)
        .and_then(|args| match heap.get(args) {
            HeapData::Tuple(items) => items.first().map(|first| match first {
                Value::Str(s) => s.to_string(),
                other => native_repr(other, heap),
            }),
            _ => None,
        });
    Some((cls.name.clone(), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_containing_list_reads_back_with_placeholder() {
        let mut heap = Heap::new(None);
        let list = heap.allocate(HeapData::List(vec![Value::Int(1)])).unwrap();
        if let HeapData::List(items) = heap.get_mut(list) {
            items.push(Value::Ref(list));
        }
        let object = Object::from_value(&Value::Ref(list), &heap);
        assert_eq!(object, Object::List(vec![Object::Int(1), Object::Repr("[...]".to_owned())]));
        assert_eq!(object.py_repr(), "[1, [...]]");
    }

    #[test]
    fn shared_children_are_not_cycles() {
        let mut heap = Heap::new(None);
        let inner = heap.list(vec![Value::Int(2)]).unwrap();
        let outer = heap.tuple(vec![inner.clone(), inner]).unwrap();
        let object = Object::from_value(&outer, &heap);
        assert_eq!(object.py_repr(), "([2], [2])");
    }

    #[test]
    fn dict_round_trips_through_the_heap() {
        let mut heap = Heap::new(None);
        let object = Object::Dict(vec![
            (Object::String("a".to_owned()), Object::Tuple(vec![Object::Int(1)])),
            (Object::Int(2), Object::Float(0.5)),
        ]);
        let value = object.clone().to_value(&mut heap).unwrap();
        assert_eq!(Object::from_value(&value, &heap), object);
        assert_eq!(object.py_repr(), "{'a': (1,), 2: 0.5}");
        assert_eq!(
            object.to_json_value(),
            serde_json::json!({ "a": { "$tuple": [1] }, "2": 0.5 })
        );
    }

    #[test]
    fn repr_objects_are_output_only() {
        let mut heap = Heap::new(None);
        assert!(Object::Repr("<function f>".to_owned()).to_value(&mut heap).is_err());
    }
}
