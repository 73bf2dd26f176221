//! Methods of builtin values: `list.append`, `dict.items`, `str.join`,
//! `generator.send` and the rest.
//!
//! Attribute access on a builtin value looks the name up in the
//! [`MethodTable`] and allocates a [`BoundBuiltin`] pairing the method with
//! its receiver. Calling that object lands in `call_builtin_method`.

use ahash::AHashMap;

use crate::{
    args::ArgValues,
    bytecode::vm::normalize_index,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{Dict, Set, Type},
    value::Value,
};

/// A native method of a builtin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BuiltinMethod {
    ListAppend,
    ListExtend,
    ListPop,
    ListInsert,
    ListRemove,
    ListIndex,
    ListCount,
    ListClear,
    ListReverse,
    ListSort,
    ListCopy,
    TupleIndex,
    TupleCount,
    DictGet,
    DictKeys,
    DictValues,
    DictItems,
    DictPop,
    DictSetdefault,
    DictUpdate,
    DictClear,
    DictCopy,
    SetAdd,
    SetRemove,
    SetDiscard,
    SetPop,
    SetClear,
    SetCopy,
    SetUnion,
    SetIntersection,
    StrJoin,
    StrSplit,
    StrStrip,
    StrLstrip,
    StrRstrip,
    StrStartswith,
    StrEndswith,
    StrUpper,
    StrLower,
    StrReplace,
    StrFind,
    StrCount,
    StrEncode,
    BytesDecode,
    GeneratorSend,
    GeneratorThrow,
    GeneratorClose,
    /// `__next__` of generators and native iterators.
    Next,
}

impl BuiltinMethod {
    /// Attribute name the method is reached through.
    pub fn name(self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, _, method)| *method == self)
            .map_or("?", |(_, name, _)| name)
    }
}

/// Every (type, attribute name) pair that resolves to a native method.
const METHODS: &[(Type, &str, BuiltinMethod)] = &[
    (Type::List, "append", BuiltinMethod::ListAppend),
    (Type::List, "extend", BuiltinMethod::ListExtend),
    (Type::List, "pop", BuiltinMethod::ListPop),
    (Type::List, "insert", BuiltinMethod::ListInsert),
    (Type::List, "remove", BuiltinMethod::ListRemove),
    (Type::List, "index", BuiltinMethod::ListIndex),
    (Type::List, "count", BuiltinMethod::ListCount),
    (Type::List, "clear", BuiltinMethod::ListClear),
    (Type::List, "reverse", BuiltinMethod::ListReverse),
    (Type::List, "sort", BuiltinMethod::ListSort),
    (Type::List, "copy", BuiltinMethod::ListCopy),
    (Type::Tuple, "index", BuiltinMethod::TupleIndex),
    (Type::Tuple, "count", BuiltinMethod::TupleCount),
    (Type::Dict, "get", BuiltinMethod::DictGet),
    (Type::Dict, "keys", BuiltinMethod::DictKeys),
    (Type::Dict, "values", BuiltinMethod::DictValues),
    (Type::Dict, "items", BuiltinMethod::DictItems),
    (Type::Dict, "pop", BuiltinMethod::DictPop),
    (Type::Dict, "setdefault", BuiltinMethod::DictSetdefault),
    (Type::Dict, "update", BuiltinMethod::DictUpdate),
    (Type::Dict, "clear", BuiltinMethod::DictClear),
    (Type::Dict, "copy", BuiltinMethod::DictCopy),
    (Type::Set, "add", BuiltinMethod::SetAdd),
    (Type::Set, "remove", BuiltinMethod::SetRemove),
    (Type::Set, "discard", BuiltinMethod::SetDiscard),
    (Type::Set, "pop", BuiltinMethod::SetPop),
    (Type::Set, "clear", BuiltinMethod::SetClear),
    (Type::Set, "copy", BuiltinMethod::SetCopy),
    (Type::Set, "union", BuiltinMethod::SetUnion),
    (Type::Set, "intersection", BuiltinMethod::SetIntersection),
    (Type::Str, "join", BuiltinMethod::StrJoin),
    (Type::Str, "split", BuiltinMethod::StrSplit),
    (Type::Str, "strip", BuiltinMethod::StrStrip),
    (Type::Str, "lstrip", BuiltinMethod::StrLstrip),
    (Type::Str, "rstrip", BuiltinMethod::StrRstrip),
    (Type::Str, "startswith", BuiltinMethod::StrStartswith),
    (Type::Str, "endswith", BuiltinMethod::StrEndswith),
    (Type::Str, "upper", BuiltinMethod::StrUpper),
    (Type::Str, "lower", BuiltinMethod::StrLower),
    (Type::Str, "replace", BuiltinMethod::StrReplace),
    (Type::Str, "find", BuiltinMethod::StrFind),
    (Type::Str, "count", BuiltinMethod::StrCount),
    (Type::Str, "encode", BuiltinMethod::StrEncode),
    (Type::Bytes, "decode", BuiltinMethod::BytesDecode),
    (Type::Generator, "send", BuiltinMethod::GeneratorSend),
    (Type::Generator, "throw", BuiltinMethod::GeneratorThrow),
    (Type::Generator, "close", BuiltinMethod::GeneratorClose),
    (Type::Generator, "__next__", BuiltinMethod::Next),
    (Type::Iterator, "__next__", BuiltinMethod::Next),
];

/// Immutable `(type, name) -> method` lookup, built once with the interpreter.
#[derive(Debug)]
pub(crate) struct MethodTable {
    entries: AHashMap<(Type, &'static str), BuiltinMethod>,
}

impl MethodTable {
    pub fn new() -> Self {
        let entries = METHODS.iter().map(|(ty, name, method)| ((*ty, *name), *method)).collect();
        Self { entries }
    }

    pub fn get(&self, ty: Type, name: &str) -> Option<BuiltinMethod> {
        // bools are ints for method purposes
        let ty = if ty == Type::Bool { Type::Int } else { ty };
        self.entries.get(&(ty, name)).copied()
    }
}

/// A builtin method bound to the value it was read from.
#[derive(Debug, Clone)]
pub(crate) struct BoundBuiltin {
    pub method: BuiltinMethod,
    pub receiver: Value,
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Calls a bound builtin method.
    pub(crate) fn call_builtin_method(&mut self, method: BuiltinMethod, receiver: Value, args: ArgValues) -> RunResult<Value> {
        match method {
            BuiltinMethod::ListAppend
            | BuiltinMethod::ListExtend
            | BuiltinMethod::ListPop
            | BuiltinMethod::ListInsert
            | BuiltinMethod::ListRemove
            | BuiltinMethod::ListIndex
            | BuiltinMethod::ListCount
            | BuiltinMethod::ListClear
            | BuiltinMethod::ListReverse
            | BuiltinMethod::ListSort
            | BuiltinMethod::ListCopy => {
                let id = receiver_id(&receiver)?;
                self.list_method(method, id, args)
            }
            BuiltinMethod::TupleIndex | BuiltinMethod::TupleCount => {
                let id = receiver_id(&receiver)?;
                let items = self.seq_items(id);
                let value = args.get_one_arg(if method == BuiltinMethod::TupleIndex { "index" } else { "count" })?;
                if method == BuiltinMethod::TupleCount {
                    return Ok(Value::Int(self.count_equal(&items, &value)?));
                }
                match self.position_of(&items, &value)? {
                    Some(index) => Ok(Value::Int(index as i64)),
                    None => Err(ExcType::value_error("tuple.index(x): x not in tuple")),
                }
            }
            BuiltinMethod::DictGet
            | BuiltinMethod::DictKeys
            | BuiltinMethod::DictValues
            | BuiltinMethod::DictItems
            | BuiltinMethod::DictPop
            | BuiltinMethod::DictSetdefault
            | BuiltinMethod::DictUpdate
            | BuiltinMethod::DictClear
            | BuiltinMethod::DictCopy => {
                let id = receiver_id(&receiver)?;
                self.dict_method(method, id, args)
            }
            BuiltinMethod::SetAdd
            | BuiltinMethod::SetRemove
            | BuiltinMethod::SetDiscard
            | BuiltinMethod::SetPop
            | BuiltinMethod::SetClear
            | BuiltinMethod::SetCopy
            | BuiltinMethod::SetUnion
            | BuiltinMethod::SetIntersection => {
                let id = receiver_id(&receiver)?;
                self.set_method(method, id, args)
            }
            BuiltinMethod::StrJoin
            | BuiltinMethod::StrSplit
            | BuiltinMethod::StrStrip
            | BuiltinMethod::StrLstrip
            | BuiltinMethod::StrRstrip
            | BuiltinMethod::StrStartswith
            | BuiltinMethod::StrEndswith
            | BuiltinMethod::StrUpper
            | BuiltinMethod::StrLower
            | BuiltinMethod::StrReplace
            | BuiltinMethod::StrFind
            | BuiltinMethod::StrCount
            | BuiltinMethod::StrEncode => {
                let Value::Str(text) = &receiver else {
                    return Err(RunError::internal("str method bound to a non-str"));
                };
                self.str_method(method, text, args)
            }
            BuiltinMethod::BytesDecode => {
                let Value::Bytes(data) = &receiver else {
                    return Err(RunError::internal("bytes method bound to non-bytes"));
                };
                args.check_zero_args("decode")?;
                match std::str::from_utf8(data) {
                    Ok(text) => Ok(Value::str(text)),
                    Err(err) => Err(ExcType::value_error(format!("'utf-8' codec can't decode bytes: {err}"))),
                }
            }
            BuiltinMethod::GeneratorSend => {
                let id = receiver_id(&receiver)?;
                let value = args.get_one_arg("send")?;
                self.generator_send(id, value)
            }
            BuiltinMethod::GeneratorThrow => {
                let id = receiver_id(&receiver)?;
                let exc = args.get_one_arg("throw")?;
                self.generator_throw(id, exc)
            }
            BuiltinMethod::GeneratorClose => {
                let id = receiver_id(&receiver)?;
                args.check_zero_args("close")?;
                self.generator_close(id)?;
                Ok(Value::None)
            }
            BuiltinMethod::Next => {
                args.check_zero_args("__next__")?;
                match self.next_value(&receiver)? {
                    Some(item) => Ok(item),
                    None => Err(ExcType::stop_iteration()),
                }
            }
        }
    }

    fn list_method(&mut self, method: BuiltinMethod, id: HeapId, args: ArgValues) -> RunResult<Value> {
        match method {
            BuiltinMethod::ListAppend => {
                let item = args.get_one_arg("append")?;
                self.list_mut(id)?.push(item);
                Ok(Value::None)
            }
            BuiltinMethod::ListExtend => {
                let iterable = args.get_one_arg("extend")?;
                let items = self.iterate_to_vec(iterable)?;
                self.list_mut(id)?.extend(items);
                Ok(Value::None)
            }
            BuiltinMethod::ListPop => {
                let index = args.get_zero_one_arg("pop")?;
                let list = self.list_mut(id)?;
                if list.is_empty() {
                    return Err(index_error("pop from empty list"));
                }
                let index = match index {
                    None => list.len() - 1,
                    Some(value) => {
                        let raw = value.as_int().ok_or_else(|| ExcType::type_error("list indices must be integers"))?;
                        normalize_index(raw, list.len()).ok_or_else(|| index_error("pop index out of range"))?
                    }
                };
                Ok(list.remove(index))
            }
            BuiltinMethod::ListInsert => {
                let (index, item) = args.get_two_args("insert")?;
                let raw = index.as_int().ok_or_else(|| ExcType::type_error("list indices must be integers"))?;
                let list = self.list_mut(id)?;
                let len = list.len() as i64;
                let at = if raw < 0 { (raw + len).max(0) } else { raw.min(len) };
                list.insert(at as usize, item);
                Ok(Value::None)
            }
            BuiltinMethod::ListRemove => {
                let value = args.get_one_arg("remove")?;
                let items = self.seq_items(id);
                let Some(index) = self.position_of(&items, &value)? else {
                    return Err(ExcType::value_error("list.remove(x): x not in list"));
                };
                self.list_mut(id)?.remove(index);
                Ok(Value::None)
            }
            BuiltinMethod::ListIndex => {
                let value = args.get_one_arg("index")?;
                let items = self.seq_items(id);
                match self.position_of(&items, &value)? {
                    Some(index) => Ok(Value::Int(index as i64)),
                    None => {
                        let repr = self.repr_value(&value)?;
                        Err(ExcType::value_error(format!("{repr} is not in list")))
                    }
                }
            }
            BuiltinMethod::ListCount => {
                let value = args.get_one_arg("count")?;
                let items = self.seq_items(id);
                Ok(Value::Int(self.count_equal(&items, &value)?))
            }
            BuiltinMethod::ListClear => {
                args.check_zero_args("clear")?;
                self.list_mut(id)?.clear();
                Ok(Value::None)
            }
            BuiltinMethod::ListReverse => {
                args.check_zero_args("reverse")?;
                self.list_mut(id)?.reverse();
                Ok(Value::None)
            }
            BuiltinMethod::ListSort => {
                let mut args = args;
                let key = args.take_kwarg("key").filter(|k| !k.is_none());
                let reverse = match args.take_kwarg("reverse") {
                    Some(flag) => self.truthy(&flag)?,
                    None => false,
                };
                args.check_zero_args("sort")?;
                let items = std::mem::take(self.list_mut(id)?);
                let sorted = self.sort_values(items, key, reverse)?;
                *self.list_mut(id)? = sorted;
                Ok(Value::None)
            }
            _ => {
                args.check_zero_args("copy")?;
                let items = self.seq_items(id);
                Ok(self.heap.list(items)?)
            }
        }
    }

    fn dict_method(&mut self, method: BuiltinMethod, id: HeapId, args: ArgValues) -> RunResult<Value> {
        match method {
            BuiltinMethod::DictGet => {
                let (key, default) = args.get_one_two_args("get")?;
                let key = key.to_key(&self.heap)?;
                Ok(self.dict_ref(id)?.get(&key).cloned().or(default).unwrap_or(Value::None))
            }
            BuiltinMethod::DictKeys => {
                args.check_zero_args("keys")?;
                let keys = self.dict_ref(id)?.keys().cloned().collect();
                Ok(self.heap.list(keys)?)
            }
            BuiltinMethod::DictValues => {
                args.check_zero_args("values")?;
                let values = self.dict_ref(id)?.values().cloned().collect();
                Ok(self.heap.list(values)?)
            }
            BuiltinMethod::DictItems => {
                args.check_zero_args("items")?;
                let pairs: Vec<(Value, Value)> =
                    self.dict_ref(id)?.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let mut items = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    items.push(self.heap.tuple(vec![key, value])?);
                }
                Ok(self.heap.list(items)?)
            }
            BuiltinMethod::DictPop => {
                let (key_value, default) = args.get_one_two_args("pop")?;
                let key = key_value.to_key(&self.heap)?;
                match self.dict_mut(id)?.remove(&key) {
                    Some((_, value)) => Ok(value),
                    None => default.ok_or_else(|| self.raise_with_args(ExcType::KeyError, vec![key_value])),
                }
            }
            BuiltinMethod::DictSetdefault => {
                let (key_value, default) = args.get_one_two_args("setdefault")?;
                let key = key_value.to_key(&self.heap)?;
                let dict = self.dict_mut(id)?;
                if let Some(existing) = dict.get(&key) {
                    return Ok(existing.clone());
                }
                let value = default.unwrap_or(Value::None);
                dict.insert(key, key_value, value.clone());
                Ok(value)
            }
            BuiltinMethod::DictUpdate => {
                let ArgValues { positional, kwargs } = args;
                if positional.len() > 1 {
                    return Err(ExcType::type_error(format!(
                        "update expected at most 1 argument, got {}",
                        positional.len()
                    )));
                }
                let mut pairs: Vec<(Value, Value)> = Vec::new();
                if let Some(other) = positional.into_iter().next() {
                    pairs.extend(self.mapping_pairs(other)?);
                }
                pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(&k), v)));
                for (key_value, value) in pairs {
                    let key = key_value.to_key(&self.heap)?;
                    self.dict_mut(id)?.insert(key, key_value, value);
                }
                Ok(Value::None)
            }
            BuiltinMethod::DictClear => {
                args.check_zero_args("clear")?;
                self.dict_mut(id)?.clear();
                Ok(Value::None)
            }
            _ => {
                args.check_zero_args("copy")?;
                let copy = self.dict_ref(id)?.clone();
                Ok(Value::Ref(self.heap.allocate(HeapData::Dict(copy))?))
            }
        }
    }

    fn set_method(&mut self, method: BuiltinMethod, id: HeapId, args: ArgValues) -> RunResult<Value> {
        match method {
            BuiltinMethod::SetAdd | BuiltinMethod::SetRemove | BuiltinMethod::SetDiscard => {
                let name: &'static str = match method {
                    BuiltinMethod::SetAdd => "add",
                    BuiltinMethod::SetRemove => "remove",
                    _ => "discard",
                };
                let item = args.get_one_arg(name)?;
                let key = item.to_key(&self.heap)?;
                let set = self.set_mut(id)?;
                match method {
                    BuiltinMethod::SetAdd => {
                        set.add(key, item);
                    }
                    BuiltinMethod::SetRemove => {
                        if set.remove(&key).is_none() {
                            return Err(self.raise_with_args(ExcType::KeyError, vec![item]));
                        }
                    }
                    _ => {
                        set.remove(&key);
                    }
                }
                Ok(Value::None)
            }
            BuiltinMethod::SetPop => {
                args.check_zero_args("pop")?;
                match self.set_mut(id)?.pop_last() {
                    Some(item) => Ok(item),
                    None => Err(SimpleException::new_msg(ExcType::KeyError, "'pop from an empty set'").into()),
                }
            }
            BuiltinMethod::SetClear => {
                args.check_zero_args("clear")?;
                self.set_mut(id)?.clear();
                Ok(Value::None)
            }
            BuiltinMethod::SetCopy => {
                args.check_zero_args("copy")?;
                let copy = self.set_ref(id)?.clone();
                Ok(Value::Ref(self.heap.allocate(HeapData::Set(copy))?))
            }
            BuiltinMethod::SetUnion => {
                args.check_no_kwargs("union")?;
                let mut result = self.set_ref(id)?.clone();
                for other in args.positional {
                    for item in self.iterate_to_vec(other)? {
                        result.add(item.to_key(&self.heap)?, item);
                    }
                }
                Ok(Value::Ref(self.heap.allocate(HeapData::Set(result))?))
            }
            _ => {
                args.check_no_kwargs("intersection")?;
                let mut result = self.set_ref(id)?.clone();
                for other in args.positional {
                    let mut keep = Set::new();
                    for item in self.iterate_to_vec(other)? {
                        let key = item.to_key(&self.heap)?;
                        if result.contains(&key) {
                            keep.add(key, item);
                        }
                    }
                    // members keep the receiver's values and order
                    let mut ordered = Set::new();
                    for (key, value) in result.entries() {
                        if keep.contains(key) {
                            ordered.add(key.clone(), value.clone());
                        }
                    }
                    result = ordered;
                }
                Ok(Value::Ref(self.heap.allocate(HeapData::Set(result))?))
            }
        }
    }

    fn str_method(&mut self, method: BuiltinMethod, text: &str, args: ArgValues) -> RunResult<Value> {
        match method {
            BuiltinMethod::StrJoin => {
                let iterable = args.get_one_arg("join")?;
                let items = self.iterate_to_vec(iterable)?;
                let mut parts = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(s) => parts.push(s.to_string()),
                        other => {
                            return Err(ExcType::type_error(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name(&self.heap)
                            )));
                        }
                    }
                }
                Ok(Value::str(&parts.join(text)))
            }
            BuiltinMethod::StrSplit => {
                let mut args = args;
                let kw_sep = args.take_kwarg("sep");
                let kw_max = args.take_kwarg("maxsplit");
                args.check_no_kwargs("split")?;
                let mut positional = args.positional.into_iter();
                let sep = kw_sep.or_else(|| positional.next()).unwrap_or(Value::None);
                let maxsplit = kw_max.or_else(|| positional.next()).unwrap_or(Value::Int(-1));
                let maxsplit = maxsplit
                    .as_int()
                    .ok_or_else(|| ExcType::type_error("maxsplit must be an integer"))?;
                let limit = usize::try_from(maxsplit).ok().map(|m| m + 1);
                let parts: Vec<Value> = match sep {
                    Value::None => split_whitespace(text, limit).into_iter().map(Value::str).collect(),
                    Value::Str(sep) if sep.is_empty() => return Err(ExcType::value_error("empty separator")),
                    Value::Str(sep) => match limit {
                        Some(n) => text.splitn(n, &*sep).map(Value::str).collect(),
                        None => text.split(&*sep).map(Value::str).collect(),
                    },
                    other => {
                        return Err(ExcType::type_error(format!(
                            "must be str or None, not {}",
                            other.type_name(&self.heap)
                        )));
                    }
                };
                Ok(self.heap.list(parts)?)
            }
            BuiltinMethod::StrStrip | BuiltinMethod::StrLstrip | BuiltinMethod::StrRstrip => {
                let name = if method == BuiltinMethod::StrStrip {
                    "strip"
                } else if method == BuiltinMethod::StrLstrip {
                    "lstrip"
                } else {
                    "rstrip"
                };
                let chars = match args.get_zero_one_arg(name)? {
                    None | Some(Value::None) => None,
                    Some(Value::Str(chars)) => Some(chars),
                    Some(other) => {
                        return Err(ExcType::type_error(format!(
                            "{name} arg must be None or str, not {}",
                            other.type_name(&self.heap)
                        )));
                    }
                };
                let matches = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(c));
                let out = match method {
                    BuiltinMethod::StrStrip => text.trim_matches(matches),
                    BuiltinMethod::StrLstrip => text.trim_start_matches(matches),
                    _ => text.trim_end_matches(matches),
                };
                Ok(Value::str(out))
            }
            BuiltinMethod::StrStartswith | BuiltinMethod::StrEndswith => {
                let name = if method == BuiltinMethod::StrStartswith { "startswith" } else { "endswith" };
                let affix = args.get_one_arg(name)?;
                let candidates = match &affix {
                    Value::Str(s) => vec![s.to_string()],
                    Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Tuple(_)) => self
                        .tuple_items(&affix)?
                        .into_iter()
                        .map(|item| match item {
                            Value::Str(s) => Ok(s.to_string()),
                            other => Err(ExcType::type_error(format!(
                                "tuple for {name} must only contain str, not {}",
                                other.type_name(&self.heap)
                            ))),
                        })
                        .collect::<RunResult<Vec<_>>>()?,
                    other => {
                        return Err(ExcType::type_error(format!(
                            "{name} first arg must be str or a tuple of str, not {}",
                            other.type_name(&self.heap)
                        )));
                    }
                };
                let hit = candidates.iter().any(|c| {
                    if method == BuiltinMethod::StrStartswith {
                        text.starts_with(c.as_str())
                    } else {
                        text.ends_with(c.as_str())
                    }
                });
                Ok(Value::Bool(hit))
            }
            BuiltinMethod::StrUpper => {
                args.check_zero_args("upper")?;
                Ok(Value::str(&text.to_uppercase()))
            }
            BuiltinMethod::StrLower => {
                args.check_zero_args("lower")?;
                Ok(Value::str(&text.to_lowercase()))
            }
            BuiltinMethod::StrReplace => {
                args.check_no_kwargs("replace")?;
                let mut positional = args.positional.into_iter();
                let (Some(Value::Str(old)), Some(Value::Str(new))) = (positional.next(), positional.next()) else {
                    return Err(ExcType::type_error("replace() arguments must be str"));
                };
                let out = match positional.next().and_then(|c| c.as_int()) {
                    Some(count) if count >= 0 => text.replacen(&*old, &new, count as usize),
                    _ => text.replace(&*old, &new),
                };
                Ok(Value::str(&out))
            }
            BuiltinMethod::StrFind | BuiltinMethod::StrCount => {
                let name = if method == BuiltinMethod::StrFind { "find" } else { "count" };
                let Value::Str(needle) = args.get_one_arg(name)? else {
                    return Err(ExcType::type_error(format!("{name}() argument must be str")));
                };
                if method == BuiltinMethod::StrCount {
                    let count = if needle.is_empty() {
                        text.chars().count() + 1
                    } else {
                        text.matches(&*needle).count()
                    };
                    return Ok(Value::Int(count as i64));
                }
                Ok(Value::Int(
                    text.find(&*needle)
                        .map_or(-1, |byte| text[..byte].chars().count() as i64),
                ))
            }
            _ => {
                args.check_zero_args("encode")?;
                Ok(Value::Bytes(text.as_bytes().into()))
            }
        }
    }

    /// Key/value pairs of a dict, or of an iterable of 2-item sequences.
    pub(crate) fn mapping_pairs(&mut self, source: Value) -> RunResult<Vec<(Value, Value)>> {
        if let Value::Ref(id) = &source
            && let HeapData::Dict(dict) = self.heap.get(*id)
        {
            return Ok(dict.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        }
        let mut pairs = Vec::new();
        for (i, item) in self.iterate_to_vec(source)?.into_iter().enumerate() {
            let pair = self.iterate_to_vec(item)?;
            let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
                ExcType::value_error(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    pair.len()
                ))
            })?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// Index of the first item equal to `value`.
    pub(crate) fn position_of(&mut self, items: &[Value], value: &Value) -> RunResult<Option<usize>> {
        for (i, item) in items.iter().enumerate() {
            if item.is_identical(value) || self.eq_values(item, value)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn count_equal(&mut self, items: &[Value], value: &Value) -> RunResult<i64> {
        let mut count = 0;
        for item in items {
            if item.is_identical(value) || self.eq_values(item, value)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn seq_items(&self, id: HeapId) -> Vec<Value> {
        match self.heap.get(id) {
            HeapData::List(items) | HeapData::Tuple(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn list_mut(&mut self, id: HeapId) -> RunResult<&mut Vec<Value>> {
        match self.heap.get_mut(id) {
            HeapData::List(items) => Ok(items),
            _ => Err(RunError::internal("list method bound to a non-list")),
        }
    }

    fn dict_ref(&self, id: HeapId) -> RunResult<&Dict> {
        match self.heap.get(id) {
            HeapData::Dict(dict) => Ok(dict),
            _ => Err(RunError::internal("dict method bound to a non-dict")),
        }
    }

    fn dict_mut(&mut self, id: HeapId) -> RunResult<&mut Dict> {
        match self.heap.get_mut(id) {
            HeapData::Dict(dict) => Ok(dict),
            _ => Err(RunError::internal("dict method bound to a non-dict")),
        }
    }

    fn set_ref(&self, id: HeapId) -> RunResult<&Set> {
        match self.heap.get(id) {
            HeapData::Set(set) => Ok(set),
            _ => Err(RunError::internal("set method bound to a non-set")),
        }
    }

    fn set_mut(&mut self, id: HeapId) -> RunResult<&mut Set> {
        match self.heap.get_mut(id) {
            HeapData::Set(set) => Ok(set),
            _ => Err(RunError::internal("set method bound to a non-set")),
        }
    }
}

fn index_error(msg: &str) -> RunError {
    SimpleException::new_msg(ExcType::IndexError, msg).into()
}

fn receiver_id(receiver: &Value) -> RunResult<HeapId> {
    receiver
        .ref_id()
        .ok_or_else(|| RunError::internal("builtin method bound to a non-heap receiver"))
}

/// `str.split()` with no separator: runs of whitespace, no empty strings.
fn split_whitespace(text: &str, limit: Option<usize>) -> Vec<&str> {
    let Some(limit) = limit else {
        return text.split_whitespace().collect();
    };
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if parts.len() + 1 == limit {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_resolves_by_type_and_name() {
        let table = MethodTable::new();
        assert_eq!(table.get(Type::List, "append"), Some(BuiltinMethod::ListAppend));
        assert_eq!(table.get(Type::Tuple, "append"), None);
        assert_eq!(table.get(Type::Generator, "send"), Some(BuiltinMethod::GeneratorSend));
    }

    #[test]
    fn maxsplit_keeps_the_remainder_intact() {
        assert_eq!(split_whitespace("  a b   c ", Some(2)), vec!["a", "b   c "]);
        assert_eq!(split_whitespace("  a b   c ", None), vec!["a", "b", "c"]);
        assert!(split_whitespace("   ", Some(1)).is_empty());
    }
}
