//! Truthiness and guest-aware `repr` / `str`.

use std::fmt::Write;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::class::lookup_in_mro,
    value::{Value, native_repr},
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Truthiness, honoring `__bool__` and `__len__` on instances.
    pub(crate) fn truthy(&mut self, value: &Value) -> RunResult<bool> {
        Ok(match value {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::NotImplemented | Value::Builtin(_) | Value::Code(_) => true,
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => !items.is_empty(),
                HeapData::Dict(dict) => !dict.is_empty(),
                HeapData::Set(set) => !set.is_empty(),
                HeapData::Range(range) => range.len() > 0,
                HeapData::Instance(_) => {
                    if let Some(result) = self.call_special(value, "__bool__", ArgValues::empty())? {
                        return match result {
                            Value::Bool(b) => Ok(b),
                            other => Err(ExcType::type_error(format!(
                                "__bool__ should return bool, returned {}",
                                other.type_name(&self.heap)
                            ))),
                        };
                    }
                    if self.has_special(value, "__len__") {
                        return Ok(self.len_of(value)? != 0);
                    }
                    true
                }
                _ => true,
            },
        })
    }

    /// `repr(value)`.
    pub(crate) fn repr_value(&mut self, value: &Value) -> RunResult<String> {
        let mut out = String::new();
        self.repr_into(value, &mut out, &mut Vec::new())?;
        Ok(out)
    }

    /// `str(value)`.
    pub(crate) fn str_value(&mut self, value: &Value) -> RunResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Instance(_)) => {
                if let Some(result) = self.user_text(value, "__str__")? {
                    return Ok(result);
                }
                if self.exception_type_of(*id).is_some() {
                    return self.exception_message(*id);
                }
                self.repr_value(value)
            }
            _ => self.repr_value(value),
        }
    }

    /// `str()` of an exception instance without a custom `__str__`.
    ///
    /// No args gives an empty string, one arg its `str` (its `repr` for
    /// `KeyError`), several args the repr of the args tuple.
    pub(crate) fn exception_message(&mut self, id: HeapId) -> RunResult<String> {
        let key_error = self
            .exception_type_of(id)
            .is_some_and(|t| t.is_subclass_of(ExcType::KeyError));
        let args = match self.heap.get(id) {
            HeapData::Instance(inst) => inst.attrs.get("args").cloned(),
            _ => None,
        };
        let Some(args) = args else {
            return Ok(String::new());
        };
        let items = match &args {
            Value::Ref(args_id) => match self.heap.get(*args_id) {
                HeapData::Tuple(items) => items.clone(),
                _ => return self.str_value(&args),
            },
            other => return self.str_value(other),
        };
        match items.as_slice() {
            [] => Ok(String::new()),
            [single] if key_error => self.repr_value(single),
            [single] => self.str_value(single),
            _ => self.repr_value(&args),
        }
    }

    /// Calls a user `__str__`/`__repr__`, which must return a string.
    fn user_text(&mut self, value: &Value, dunder: &str) -> RunResult<Option<String>> {
        let Some(class_id) = self.instance_class(value) else {
            return Ok(None);
        };
        if lookup_in_mro(&self.heap, class_id, dunder).is_none() {
            return Ok(None);
        }
        match self.call_special(value, dunder, ArgValues::empty())? {
            Some(Value::Str(s)) => Ok(Some(s.to_string())),
            Some(other) => Err(ExcType::type_error(format!(
                "{dunder} returned non-string (type {})",
                other.type_name(&self.heap)
            ))),
            None => Ok(None),
        }
    }

    fn repr_into(&mut self, value: &Value, out: &mut String, seen: &mut Vec<HeapId>) -> RunResult<()> {
        let Value::Ref(id) = value else {
            out.push_str(&native_repr(value, &self.heap));
            return Ok(());
        };
        let id = *id;
        if seen.contains(&id) {
            out.push_str(match self.heap.get(id) {
                HeapData::Dict(_) | HeapData::Set(_) => "{...}",
                HeapData::Tuple(_) => "(...)",
                HeapData::Instance(_) => "...",
                _ => "[...]",
            });
            return Ok(());
        }
        self.limits.check_recursion_depth(self.depth + seen.len() + 1)?;
        seen.push(id);
        let result = self.repr_heap(id, value, out, seen);
        seen.pop();
        result
    }

    fn repr_heap(&mut self, id: HeapId, value: &Value, out: &mut String, seen: &mut Vec<HeapId>) -> RunResult<()> {
        enum Shape {
            Seq(&'static str, &'static str, Vec<Value>, bool),
            Map(Vec<(Value, Value)>),
            Instance,
            Native,
        }
        let shape = match self.heap.get(id) {
            HeapData::List(items) => Shape::Seq("[", "]", items.clone(), false),
            HeapData::Tuple(items) => Shape::Seq("(", ")", items.clone(), items.len() == 1),
            HeapData::Set(set) if !set.is_empty() => Shape::Seq("{", "}", set.iter().cloned().collect(), false),
            HeapData::Dict(dict) => Shape::Map(dict.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            HeapData::Instance(_) => Shape::Instance,
            _ => Shape::Native,
        };
        match shape {
            Shape::Seq(open, close, items, trailing_comma) => {
                out.push_str(open);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.repr_into(item, out, seen)?;
                }
                if trailing_comma {
                    out.push(',');
                }
                out.push_str(close);
            }
            Shape::Map(entries) => {
                out.push('{');
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.repr_into(key, out, seen)?;
                    out.push_str(": ");
                    self.repr_into(item, out, seen)?;
                }
                out.push('}');
            }
            Shape::Instance => {
                if let Some(text) = self.user_text(value, "__repr__")? {
                    out.push_str(&text);
                } else if self.exception_type_of(id).is_some() {
                    let Some(class_id) = self.instance_class(value) else {
                        return Ok(());
                    };
                    out.push_str(&self.class_display(class_id));
                    out.push('(');
                    let args = match self.heap.get(id) {
                        HeapData::Instance(inst) => inst.attrs.get("args").cloned(),
                        _ => None,
                    };
                    if let Some(Value::Ref(args_id)) = args
                        && let HeapData::Tuple(items) = self.heap.get(args_id)
                    {
                        for (i, item) in items.clone().iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            self.repr_into(item, out, seen)?;
                        }
                    }
                    out.push(')');
                } else {
                    let name = match self.instance_class(value).map(|c| self.heap.get(c)) {
                        Some(HeapData::Class(cls)) => cls.display_name(),
                        _ => "object".to_owned(),
                    };
                    let _ = write!(out, "<{name} object at {:#x}>", id.index());
                }
            }
            Shape::Native => out.push_str(&native_repr(value, &self.heap)),
        }
        Ok(())
    }
}
