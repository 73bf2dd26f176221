//! Calling a builtin type: `int(x)`, `list(it)`, `range(n)`, `type(obj)`.

use super::Builtins;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, SimpleException},
    heap::HeapData,
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{Dict, Range, Set, Type, new_namespace},
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Constructs a value of a builtin type.
    pub(crate) fn construct_builtin(&mut self, ty: Type, args: ArgValues) -> RunResult<Value> {
        match ty {
            Type::Type => self.builtin_type(args),
            Type::Bool => match args.get_zero_one_arg("bool")? {
                None => Ok(Value::Bool(false)),
                Some(value) => Ok(Value::Bool(self.truthy(&value)?)),
            },
            Type::Int => self.construct_int(args),
            Type::Float => match args.get_zero_one_arg("float")? {
                None => Ok(Value::Float(0.0)),
                Some(value) => self.to_float(&value).map(Value::Float),
            },
            Type::Str => match args.get_zero_one_arg("str")? {
                None => Ok(Value::str("")),
                Some(value) => Ok(Value::str(&self.str_value(&value)?)),
            },
            Type::Bytes => self.construct_bytes(args),
            Type::List => {
                let items = match args.get_zero_one_arg("list")? {
                    None => Vec::new(),
                    Some(iterable) => self.iterate_to_vec(iterable)?,
                };
                Ok(self.heap.list(items)?)
            }
            Type::Tuple => {
                let items = match args.get_zero_one_arg("tuple")? {
                    None => Vec::new(),
                    Some(iterable) => self.iterate_to_vec(iterable)?,
                };
                Ok(self.heap.tuple(items)?)
            }
            Type::Dict => {
                let ArgValues { positional, kwargs } = args;
                if positional.len() > 1 {
                    return Err(ExcType::type_error(format!(
                        "dict expected at most 1 argument, got {}",
                        positional.len()
                    )));
                }
                let mut dict = Dict::new();
                if let Some(source) = positional.into_iter().next() {
                    for (key_value, value) in self.mapping_pairs(source)? {
                        dict.insert(key_value.to_key(&self.heap)?, key_value, value);
                    }
                }
                for (name, value) in kwargs {
                    let key_value = Value::str(&name);
                    dict.insert(key_value.to_key(&self.heap)?, key_value, value);
                }
                Ok(Value::Ref(self.heap.allocate(HeapData::Dict(dict))?))
            }
            Type::Set => {
                let mut set = Set::new();
                if let Some(iterable) = args.get_zero_one_arg("set")? {
                    for item in self.iterate_to_vec(iterable)? {
                        set.add(item.to_key(&self.heap)?, item);
                    }
                }
                Ok(Value::Ref(self.heap.allocate(HeapData::Set(set))?))
            }
            Type::Range => self.construct_range(args),
            other => Err(ExcType::type_error(format!("cannot create '{other}' instances"))),
        }
    }

    /// `type(obj)` or `type(name, bases, namespace)`.
    fn builtin_type(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("type")?;
        let mut positional = args.positional.into_iter();
        match (positional.next(), positional.next(), positional.next(), positional.next()) {
            (Some(value), None, None, None) => Ok(self.type_of(&value)),
            (Some(Value::Str(name)), Some(bases), Some(Value::Ref(ns_id)), None) => {
                let HeapData::Dict(dict) = self.heap.get(ns_id) else {
                    return Err(ExcType::type_error("type() argument 3 must be dict"));
                };
                let mut namespace = new_namespace();
                for (key, value) in dict.iter() {
                    let Value::Str(key) = key else {
                        return Err(ExcType::type_error("type() namespace keys must be str"));
                    };
                    namespace.insert(key.to_string(), value.clone());
                }
                let bases = self.iterate_to_vec(bases)?;
                let module = match namespace.get("__module__") {
                    Some(Value::Str(module)) => module.to_string(),
                    _ => "builtins".to_owned(),
                };
                let id = self.create_class(&name, &name, &module, bases, namespace, None)?;
                Ok(Value::Ref(id))
            }
            _ => Err(ExcType::type_error("type() takes 1 or 3 arguments")),
        }
    }

    /// The class of a value: a heap class for instances and classes, a
    /// builtin type tag otherwise.
    pub(crate) fn type_of(&self, value: &Value) -> Value {
        if let Value::Ref(id) = value {
            match self.heap.get(*id) {
                HeapData::Instance(inst) => return Value::Ref(inst.class),
                HeapData::Class(cls) => return Value::Ref(cls.metaclass.unwrap_or(self.classes.type_)),
                _ => {}
            }
        }
        match value.py_type(&self.heap) {
            Type::Type => Value::Ref(self.classes.type_),
            ty => Value::Builtin(Builtins::Type(ty)),
        }
    }

    fn construct_int(&mut self, args: ArgValues) -> RunResult<Value> {
        let mut args = args;
        let kw_base = args.take_kwarg("base");
        args.check_no_kwargs("int")?;
        let mut positional = args.positional.into_iter();
        let value = positional.next();
        let base = kw_base.or_else(|| positional.next());
        if positional.next().is_some() {
            return Err(ExcType::type_error("int() takes at most 2 arguments"));
        }
        let Some(value) = value else {
            return Ok(Value::Int(0));
        };
        if let Some(base) = base {
            let base = base
                .as_int()
                .ok_or_else(|| ExcType::type_error("'base' must be an integer"))?;
            let Value::Str(text) = &value else {
                return Err(ExcType::type_error("int() can't convert non-string with explicit base"));
            };
            let radix = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| ExcType::value_error("int() base must be >= 2 and <= 36, or 0"))?;
            return parse_int(text, radix).map(Value::Int);
        }
        match &value {
            Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or_default())),
            Value::Float(f) => float_to_int(*f).map(Value::Int),
            Value::Str(text) => parse_int(text, 10).map(Value::Int),
            other => Err(ExcType::type_error(format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name(&self.heap)
            ))),
        }
    }

    fn to_float(&self, value: &Value) -> RunResult<f64> {
        match value {
            Value::Str(text) => {
                let trimmed = text.trim().replace('_', "");
                trimmed
                    .parse::<f64>()
                    .map_err(|_| ExcType::value_error(format!("could not convert string to float: '{text}'")))
            }
            other => other.as_float().ok_or_else(|| {
                ExcType::type_error(format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name(&self.heap)
                ))
            }),
        }
    }

    fn construct_bytes(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("bytes")?;
        let mut positional = args.positional.into_iter();
        let source = positional.next();
        let encoding = positional.next();
        let data: Vec<u8> = match (source, encoding) {
            (None, _) => Vec::new(),
            (Some(Value::Str(text)), Some(Value::Str(_))) => text.as_bytes().to_vec(),
            (Some(Value::Str(_)), None) => return Err(ExcType::type_error("string argument without an encoding")),
            (Some(Value::Bytes(data)), None) => data.to_vec(),
            (Some(Value::Int(n)), None) => {
                let n = usize::try_from(n).map_err(|_| ExcType::value_error("negative count"))?;
                vec![0; n]
            }
            (Some(iterable), None) => {
                let mut data = Vec::new();
                for item in self.iterate_to_vec(iterable)? {
                    let byte = item
                        .as_int()
                        .and_then(|i| u8::try_from(i).ok())
                        .ok_or_else(|| ExcType::value_error("bytes must be in range(0, 256)"))?;
                    data.push(byte);
                }
                data
            }
            (Some(_), Some(_)) => return Err(ExcType::type_error("encoding without a string argument")),
        };
        Ok(Value::Bytes(data.into()))
    }

    fn construct_range(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("range")?;
        let mut ints = Vec::with_capacity(3);
        for value in &args.positional {
            ints.push(value.as_int().ok_or_else(|| {
                ExcType::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name(&self.heap)
                ))
            })?);
        }
        let range = match ints.as_slice() {
            [stop] => Range { start: 0, stop: *stop, step: 1 },
            [start, stop] => Range { start: *start, stop: *stop, step: 1 },
            [_, _, 0] => return Err(ExcType::value_error("range() arg 3 must not be zero")),
            [start, stop, step] => Range { start: *start, stop: *stop, step: *step },
            [] => return Err(ExcType::type_error("range expected at least 1 argument, got 0")),
            more => {
                return Err(ExcType::type_error(format!(
                    "range expected at most 3 arguments, got {}",
                    more.len()
                )));
            }
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Range(range))?))
    }
}

/// Parses an integer literal the way `int(str, base)` does: surrounding
/// whitespace, a sign, and single underscores between digits are accepted.
fn parse_int(text: &str, radix: u32) -> RunResult<i64> {
    let invalid = || ExcType::value_error(format!("invalid literal for int() with base {radix}: '{text}'"));
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = i128::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    let signed = if negative { -magnitude } else { magnitude };
    i64::try_from(signed).map_err(|_| ExcType::int_overflow())
}

fn float_to_int(f: f64) -> RunResult<i64> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(SimpleException::new_msg(ExcType::OverflowError, "cannot convert float infinity to integer").into());
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ExcType::int_overflow());
    }
    Ok(truncated as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals_accept_signs_whitespace_and_underscores() {
        assert_eq!(parse_int(" -1_000 ", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert!(parse_int("99999999999999999999", 10).is_err());
    }

    #[test]
    fn float_truncation_rejects_non_finite_values() {
        assert_eq!(float_to_int(-2.9).unwrap(), -2);
        assert!(float_to_int(f64::NAN).is_err());
        assert!(float_to_int(f64::INFINITY).is_err());
    }
}
