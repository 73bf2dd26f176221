//! Builtins that consume or wrap iterables (`sum`, `sorted`, `zip`, `min`,
//! ...) and the small numeric/character ones (`abs`, `chr`, `ord`).

use crate::{
    args::ArgValues,
    bytecode::{BinaryOp, CompareOp},
    exception_private::{ExcType, RunError, RunResult},
    heap::HeapData,
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::ValueIter,
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `all(iterable)` when `want_all`, else `any(iterable)`; both short-circuit.
    pub(crate) fn builtin_all_any(&mut self, args: ArgValues, want_all: bool) -> RunResult<Value> {
        let iterable = args.get_one_arg(if want_all { "all" } else { "any" })?;
        let iter = self.get_iter(iterable)?;
        while let Some(item) = self.next_value(&iter)? {
            if self.truthy(&item)? != want_all {
                return Ok(Value::Bool(!want_all));
            }
        }
        Ok(Value::Bool(want_all))
    }

    /// `enumerate(iterable, start=0)`.
    pub(crate) fn builtin_enumerate(&mut self, args: ArgValues) -> RunResult<Value> {
        let mut args = args;
        let kw_start = args.take_kwarg("start");
        let (iterable, start) = match kw_start {
            Some(start) => (args.get_one_arg("enumerate")?, Some(start)),
            None => args.get_one_two_args("enumerate")?,
        };
        let count = match start {
            None => 0,
            Some(value) => value.as_int().ok_or_else(|| {
                ExcType::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name(&self.heap)
                ))
            })?,
        };
        let inner = self.get_iter(iterable)?;
        let state = ValueIter::Enumerate { inner, count };
        Ok(Value::Ref(self.heap.allocate(HeapData::Iter(state))?))
    }

    /// `zip(*iterables)`.
    pub(crate) fn builtin_zip(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("zip")?;
        let mut inners = Vec::with_capacity(args.positional.len());
        for iterable in args.positional {
            inners.push(self.get_iter(iterable)?);
        }
        Ok(Value::Ref(self.heap.allocate(HeapData::Iter(ValueIter::Zip { inners }))?))
    }

    /// `reversed(seq)`.
    pub(crate) fn builtin_reversed(&mut self, args: ArgValues) -> RunResult<Value> {
        let seq = args.get_one_arg("reversed")?;
        let mut items = match &seq {
            Value::Str(s) => s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(),
            Value::Bytes(b) => b.iter().map(|b| Value::Int(i64::from(*b))).collect(),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => items.clone(),
                HeapData::Dict(dict) => dict.keys().cloned().collect(),
                HeapData::Range(range) => (0..range.len()).filter_map(|i| range.get(i)).map(Value::Int).collect(),
                HeapData::Instance(_) if self.has_special(&seq, "__reversed__") => {
                    return match self.call_special(&seq, "__reversed__", ArgValues::empty())? {
                        Some(result) => Ok(result),
                        None => Err(not_reversible(&seq.type_name(&self.heap))),
                    };
                }
                _ => return Err(not_reversible(&seq.type_name(&self.heap))),
            },
            other => return Err(not_reversible(&other.type_name(&self.heap))),
        };
        items.reverse();
        Ok(Value::Ref(self.heap.allocate(HeapData::Iter(ValueIter::snapshot(items)))?))
    }

    /// `sorted(iterable, key=None, reverse=False)`.
    pub(crate) fn builtin_sorted(&mut self, args: ArgValues) -> RunResult<Value> {
        let mut args = args;
        let key = args.take_kwarg("key").filter(|k| !k.is_none());
        let reverse = match args.take_kwarg("reverse") {
            Some(flag) => self.truthy(&flag)?,
            None => false,
        };
        let iterable = args.get_one_arg("sorted")?;
        let items = self.iterate_to_vec(iterable)?;
        let sorted = self.sort_values(items, key, reverse)?;
        Ok(self.heap.list(sorted)?)
    }

    /// Stable sort through the guest `<`, optionally by `key(item)`.
    ///
    /// With `reverse`, equal items still keep their original order.
    pub(crate) fn sort_values(&mut self, items: Vec<Value>, key: Option<Value>, reverse: bool) -> RunResult<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let sort_key = match &key {
                Some(key) => self.call_value(key.clone(), ArgValues::one(item.clone()))?,
                None => item.clone(),
            };
            keyed.push((sort_key, item));
        }
        let sorted = self.merge_sort(keyed, reverse)?;
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    fn merge_sort(&mut self, mut items: Vec<(Value, Value)>, reverse: bool) -> RunResult<Vec<(Value, Value)>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, reverse)?;
        let right = self.merge_sort(right, reverse)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let take_right = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => {
                    // right wins only when strictly ordered before left
                    if reverse {
                        self.less_than(&l.0, &r.0)?
                    } else {
                        self.less_than(&r.0, &l.0)?
                    }
                }
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (None, None) => break,
            };
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        Ok(merged)
    }

    fn less_than(&mut self, a: &Value, b: &Value) -> RunResult<bool> {
        let result = self.rich_compare(a.clone(), b.clone(), CompareOp::Lt)?;
        self.truthy(&result)
    }

    /// `min(...)` / `max(...)`: one iterable or several arguments, with
    /// optional `key=` and (iterable form only) `default=`.
    pub(crate) fn builtin_min_max(&mut self, args: ArgValues, name: &str) -> RunResult<Value> {
        let mut args = args;
        let key = args.take_kwarg("key").filter(|k| !k.is_none());
        let default = args.take_kwarg("default");
        args.check_no_kwargs(name)?;
        let items = match args.positional.len() {
            0 => return Err(ExcType::type_error(format!("{name} expected at least 1 argument, got 0"))),
            1 => {
                let iterable = args.positional.into_iter().next().unwrap_or(Value::None);
                self.iterate_to_vec(iterable)?
            }
            _ => {
                if default.is_some() {
                    return Err(ExcType::type_error(format!(
                        "Cannot specify a default for {name}() with multiple positional arguments"
                    )));
                }
                args.positional.into_vec()
            }
        };
        let mut items = items.into_iter();
        let Some(first) = items.next() else {
            return default.ok_or_else(|| ExcType::value_error(format!("{name}() iterable argument is empty")));
        };
        let mut best_key = self.min_max_key(key.as_ref(), &first)?;
        let mut best = first;
        for item in items {
            let item_key = self.min_max_key(key.as_ref(), &item)?;
            let better = if name == "max" {
                self.less_than(&best_key, &item_key)?
            } else {
                self.less_than(&item_key, &best_key)?
            };
            if better {
                best = item;
                best_key = item_key;
            }
        }
        Ok(best)
    }

    fn min_max_key(&mut self, key: Option<&Value>, item: &Value) -> RunResult<Value> {
        match key {
            Some(key) => self.call_value(key.clone(), ArgValues::one(item.clone())),
            None => Ok(item.clone()),
        }
    }

    /// `sum(iterable, start=0)`.
    pub(crate) fn builtin_sum(&mut self, args: ArgValues) -> RunResult<Value> {
        let mut args = args;
        let kw_start = args.take_kwarg("start");
        let (iterable, start) = match kw_start {
            Some(start) => (args.get_one_arg("sum")?, Some(start)),
            None => args.get_one_two_args("sum")?,
        };
        let mut total = start.unwrap_or(Value::Int(0));
        match &total {
            Value::Str(_) => return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]")),
            Value::Bytes(_) => return Err(ExcType::type_error("sum() can't sum bytes [use b''.join(seq) instead]")),
            _ => {}
        }
        let iter = self.get_iter(iterable)?;
        while let Some(item) = self.next_value(&iter)? {
            total = self.binary_op(total, item, BinaryOp::Add)?;
        }
        Ok(total)
    }

    /// `next(iterator[, default])`.
    pub(crate) fn builtin_next(&mut self, args: ArgValues) -> RunResult<Value> {
        let (iter, default) = args.get_one_two_args("next")?;
        match self.next_value(&iter)? {
            Some(item) => Ok(item),
            None => default.ok_or_else(ExcType::stop_iteration),
        }
    }

    /// `abs(x)`.
    pub(crate) fn builtin_abs(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("abs")?;
        match &value {
            Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(ExcType::int_overflow),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            _ => match self.call_special(&value, "__abs__", ArgValues::empty())? {
                Some(result) => Ok(result),
                None => Err(ExcType::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    value.type_name(&self.heap)
                ))),
            },
        }
    }

    /// `chr(i)`.
    pub(crate) fn builtin_chr(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("chr")?;
        let Some(code) = value.as_int() else {
            return Err(ExcType::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name(&self.heap)
            )));
        };
        u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
            .ok_or_else(|| ExcType::value_error("chr() arg not in range(0x110000)"))
    }

    /// `ord(c)` for a one-character string or a one-byte bytes object.
    pub(crate) fn builtin_ord(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("ord")?;
        match &value {
            Value::Str(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                    _ => Err(ExcType::type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    ))),
                }
            }
            Value::Bytes(b) if b.len() == 1 => Ok(Value::Int(i64::from(b[0]))),
            Value::Bytes(b) => Err(ExcType::type_error(format!(
                "ord() expected a character, but string of length {} found",
                b.len()
            ))),
            other => Err(ExcType::type_error(format!(
                "ord() expected string of length 1, but {} found",
                other.type_name(&self.heap)
            ))),
        }
    }
}

fn not_reversible(type_name: &str) -> RunError {
    ExcType::type_error(format!("'{type_name}' object is not reversible"))
}
