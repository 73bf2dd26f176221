//! Subscripts, iteration, `len` and the container-building opcodes.

use std::rc::Rc;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{Dict, Set, ValueIter},
    value::Value,
};

/// Resolves a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `obj[key]`.
    pub(crate) fn get_item(&mut self, obj: &Value, key: Value) -> RunResult<Value> {
        match obj {
            Value::Str(s) => {
                let index = self.int_index(&key, "string")?;
                let count = s.chars().count();
                match normalize_index(index, count).and_then(|i| s.chars().nth(i)) {
                    Some(c) => Ok(Value::str(c.encode_utf8(&mut [0; 4]))),
                    None => Err(ExcType::index_error("string")),
                }
            }
            Value::Bytes(b) => {
                let index = self.int_index(&key, "byte")?;
                match normalize_index(index, b.len()) {
                    Some(i) => Ok(Value::Int(i64::from(b[i]))),
                    None => Err(ExcType::index_error("index")),
                }
            }
            Value::Ref(id) => {
                match self.heap.get(*id) {
                    HeapData::List(items) | HeapData::Tuple(items) => {
                        let kind = if matches!(self.heap.get(*id), HeapData::List(_)) { "list" } else { "tuple" };
                        let index = self.int_index(&key, kind)?;
                        return normalize_index(index, items.len())
                            .map(|i| items[i].clone())
                            .ok_or_else(|| ExcType::index_error(kind));
                    }
                    HeapData::Dict(dict) => {
                        let found = dict.get(&key.to_key(&self.heap)?).cloned();
                        return match found {
                            Some(value) => Ok(value),
                            None => Err(self.raise_with_args(ExcType::KeyError, vec![key])),
                        };
                    }
                    HeapData::Range(range) => {
                        let range = *range;
                        let index = self.int_index(&key, "range object")?;
                        return normalize_index(index, range.len())
                            .and_then(|i| range.get(i))
                            .map(Value::Int)
                            .ok_or_else(|| {
                                SimpleException::new_msg(ExcType::IndexError, "range object index out of range").into()
                            });
                    }
                    HeapData::Instance(_) => {
                        if let Some(result) = self.call_special(obj, "__getitem__", ArgValues::one(key))? {
                            return Ok(result);
                        }
                    }
                    _ => {}
                }
                Err(not_subscriptable(&obj.type_name(&self.heap)))
            }
            _ => Err(not_subscriptable(&obj.type_name(&self.heap))),
        }
    }

    fn int_index(&self, key: &Value, kind: &str) -> RunResult<i64> {
        key.as_int().ok_or_else(|| {
            let suffix = if kind == "list" || kind == "tuple" { " or slices" } else { "" };
            ExcType::type_error(format!(
                "{kind} indices must be integers{suffix}, not {}",
                key.type_name(&self.heap)
            ))
        })
    }

    /// `obj[key] = value`.
    pub(crate) fn set_item(&mut self, obj: &Value, key: Value, value: Value) -> RunResult<()> {
        let type_name = obj.type_name(&self.heap);
        let Value::Ref(id) = obj else {
            return Err(ExcType::type_error(format!(
                "'{type_name}' object does not support item assignment"
            )));
        };
        match self.heap.get(*id) {
            HeapData::List(items) => {
                let len = items.len();
                let index = self.int_index(&key, "list")?;
                let slot = normalize_index(index, len).ok_or_else(|| {
                    RunError::from(SimpleException::new_msg(ExcType::IndexError, "list assignment index out of range"))
                })?;
                if let HeapData::List(items) = self.heap.get_mut(*id) {
                    items[slot] = value;
                }
                Ok(())
            }
            HeapData::Dict(_) => {
                let dict_key = key.to_key(&self.heap)?;
                if let HeapData::Dict(dict) = self.heap.get_mut(*id) {
                    dict.insert(dict_key, key, value);
                }
                Ok(())
            }
            HeapData::Instance(_) => match self.call_special(obj, "__setitem__", ArgValues::new([key, value]))? {
                Some(_) => Ok(()),
                None => Err(ExcType::type_error(format!(
                    "'{type_name}' object does not support item assignment"
                ))),
            },
            _ => Err(ExcType::type_error(format!(
                "'{type_name}' object does not support item assignment"
            ))),
        }
    }

    /// `del obj[key]`.
    pub(crate) fn del_item(&mut self, obj: &Value, key: Value) -> RunResult<()> {
        let type_name = obj.type_name(&self.heap);
        let not_supported = || ExcType::type_error(format!("'{type_name}' object doesn't support item deletion"));
        let Value::Ref(id) = obj else {
            return Err(not_supported());
        };
        match self.heap.get(*id) {
            HeapData::List(items) => {
                let len = items.len();
                let index = self.int_index(&key, "list")?;
                let slot = normalize_index(index, len).ok_or_else(|| {
                    RunError::from(SimpleException::new_msg(ExcType::IndexError, "list assignment index out of range"))
                })?;
                if let HeapData::List(items) = self.heap.get_mut(*id) {
                    items.remove(slot);
                }
                Ok(())
            }
            HeapData::Dict(_) => {
                let dict_key = key.to_key(&self.heap)?;
                let removed = match self.heap.get_mut(*id) {
                    HeapData::Dict(dict) => dict.remove(&dict_key).is_some(),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(self.raise_with_args(ExcType::KeyError, vec![key]))
                }
            }
            HeapData::Instance(_) => match self.call_special(obj, "__delitem__", ArgValues::one(key))? {
                Some(_) => Ok(()),
                None => Err(not_supported()),
            },
            _ => Err(not_supported()),
        }
    }

    /// `iter(value)`.
    pub(crate) fn get_iter(&mut self, value: Value) -> RunResult<Value> {
        let state = match &value {
            Value::Str(text) => ValueIter::Str {
                text: Rc::clone(text),
                offset: 0,
            },
            Value::Bytes(data) => ValueIter::Bytes {
                data: Rc::clone(data),
                index: 0,
            },
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(_) | HeapData::Tuple(_) => ValueIter::Seq { source: *id, index: 0 },
                HeapData::Dict(_) | HeapData::Set(_) => ValueIter::Keys { source: *id, index: 0 },
                HeapData::Range(range) => ValueIter::Range {
                    range: *range,
                    index: 0,
                },
                HeapData::Iter(_) | HeapData::Generator(_) => return Ok(value),
                HeapData::Instance(_) => {
                    return match self.call_special(&value, "__iter__", ArgValues::empty())? {
                        Some(iter) => Ok(iter),
                        None => Err(ExcType::not_iterable(&value.type_name(&self.heap))),
                    };
                }
                _ => return Err(ExcType::not_iterable(&value.type_name(&self.heap))),
            },
            _ => return Err(ExcType::not_iterable(&value.type_name(&self.heap))),
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Iter(state))?))
    }

    /// Advances an iterator; `Ok(None)` when it is exhausted.
    pub(crate) fn next_value(&mut self, iter: &Value) -> RunResult<Option<Value>> {
        let not_iterator = |this: &Self| ExcType::type_error(format!("'{}' object is not an iterator", iter.type_name(&this.heap)));
        let Value::Ref(id) = iter else {
            return Err(not_iterator(self));
        };
        match self.heap.get(*id) {
            HeapData::Iter(_) => self.next_native(*id),
            HeapData::Generator(_) => self.generator_next(*id),
            HeapData::Instance(_) => match self.call_special(iter, "__next__", ArgValues::empty()) {
                Ok(Some(item)) => Ok(Some(item)),
                Ok(None) => Err(not_iterator(self)),
                Err(err) if self.error_matches(&err, ExcType::StopIteration) => Ok(None),
                Err(err) => Err(err),
            },
            _ => Err(not_iterator(self)),
        }
    }

    fn next_native(&mut self, id: HeapId) -> RunResult<Option<Value>> {
        let HeapData::Iter(state) = self.heap.get(id) else {
            return Err(RunError::internal("next_native on a non-iterator"));
        };
        let (item, advance) = match state {
            ValueIter::Seq { source, index } => match self.heap.get(*source) {
                HeapData::List(items) | HeapData::Tuple(items) => (items.get(*index).cloned(), 1),
                _ => (None, 0),
            },
            ValueIter::Keys { source, index } => match self.heap.get(*source) {
                HeapData::Dict(dict) => (dict.key_at(*index).cloned(), 1),
                HeapData::Set(set) => (set.member_at(*index).cloned(), 1),
                _ => (None, 0),
            },
            ValueIter::Str { text, offset } => match text[*offset..].chars().next() {
                Some(c) => (Some(Value::str(c.encode_utf8(&mut [0; 4]))), c.len_utf8()),
                None => (None, 0),
            },
            ValueIter::Bytes { data, index } => (data.get(*index).map(|b| Value::Int(i64::from(*b))), 1),
            ValueIter::Range { range, index } => (range.get(*index).map(Value::Int), 1),
            ValueIter::Snapshot { items, index } => (items.get(*index).cloned(), 1),
            ValueIter::Enumerate { inner, count } => {
                let (inner, count) = (inner.clone(), *count);
                let Some(item) = self.next_value(&inner)? else {
                    return Ok(None);
                };
                if let HeapData::Iter(ValueIter::Enumerate { count, .. }) = self.heap.get_mut(id) {
                    *count += 1;
                }
                return Ok(Some(self.heap.tuple(vec![Value::Int(count), item])?));
            }
            ValueIter::Zip { inners } => {
                let inners = inners.clone();
                let mut items = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match self.next_value(inner)? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                if items.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.heap.tuple(items)?));
            }
        };
        if item.is_some()
            && let HeapData::Iter(state) = self.heap.get_mut(id)
        {
            match state {
                ValueIter::Seq { index, .. }
                | ValueIter::Keys { index, .. }
                | ValueIter::Bytes { index, .. }
                | ValueIter::Range { index, .. }
                | ValueIter::Snapshot { index, .. } => *index += advance,
                ValueIter::Str { offset, .. } => *offset += advance,
                ValueIter::Enumerate { .. } | ValueIter::Zip { .. } => {}
            }
        }
        Ok(item)
    }

    /// Drains any iterable into a vector.
    pub(crate) fn iterate_to_vec(&mut self, iterable: Value) -> RunResult<Vec<Value>> {
        if let Value::Ref(id) = &iterable
            && let HeapData::List(items) | HeapData::Tuple(items) = self.heap.get(*id)
        {
            return Ok(items.clone());
        }
        let iter = self.get_iter(iterable)?;
        let mut out = Vec::new();
        while let Some(item) = self.next_value(&iter)? {
            out.push(item);
        }
        Ok(out)
    }

    /// `len(value)`.
    pub(crate) fn len_of(&mut self, value: &Value) -> RunResult<usize> {
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => items.len(),
                HeapData::Dict(dict) => dict.len(),
                HeapData::Set(set) => set.len(),
                HeapData::Range(range) => range.len(),
                HeapData::Instance(_) => {
                    let Some(result) = self.call_special(value, "__len__", ArgValues::empty())? else {
                        return Err(no_len(&value.type_name(&self.heap)));
                    };
                    let Some(n) = result.as_int() else {
                        return Err(ExcType::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            result.type_name(&self.heap)
                        )));
                    };
                    return usize::try_from(n).map_err(|_| ExcType::value_error("__len__() should return >= 0"));
                }
                _ => return Err(no_len(&value.type_name(&self.heap))),
            },
            _ => return Err(no_len(&value.type_name(&self.heap))),
        };
        Ok(len)
    }

    pub(crate) fn build_set(&mut self, items: Vec<Value>) -> RunResult<Value> {
        let mut set = Set::new();
        for item in items {
            set.add(item.to_key(&self.heap)?, item);
        }
        Ok(Value::Ref(self.heap.allocate(HeapData::Set(set))?))
    }

    /// Builds a dict from a flat `k1 v1 k2 v2 ...` sequence.
    pub(crate) fn build_map(&mut self, items: Vec<Value>) -> RunResult<Value> {
        let mut dict = Dict::new();
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            dict.insert(key.to_key(&self.heap)?, key, value);
        }
        Ok(Value::Ref(self.heap.allocate(HeapData::Dict(dict))?))
    }

    pub(crate) fn list_append(&mut self, target: &Value, item: Value) -> RunResult<()> {
        match target.ref_id().map(|id| self.heap.get_mut(id)) {
            Some(HeapData::List(items)) => {
                items.push(item);
                Ok(())
            }
            _ => Err(RunError::internal("ListAppend target is not a list")),
        }
    }

    pub(crate) fn set_add(&mut self, target: &Value, item: Value) -> RunResult<()> {
        let key = item.to_key(&self.heap)?;
        match target.ref_id().map(|id| self.heap.get_mut(id)) {
            Some(HeapData::Set(set)) => {
                set.add(key, item);
                Ok(())
            }
            _ => Err(RunError::internal("SetAdd target is not a set")),
        }
    }

    /// `UnpackSequence`: exactly `expected` items, in order.
    pub(crate) fn unpack(&mut self, seq: Value, expected: usize) -> RunResult<Vec<Value>> {
        let items = if let Value::Ref(id) = &seq
            && let HeapData::List(items) | HeapData::Tuple(items) = self.heap.get(*id)
        {
            items.clone()
        } else {
            let iter = self.get_iter(seq)?;
            let mut items = Vec::with_capacity(expected);
            while items.len() <= expected {
                match self.next_value(&iter)? {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
            items
        };
        match items.len().cmp(&expected) {
            std::cmp::Ordering::Equal => Ok(items),
            std::cmp::Ordering::Less => Err(ExcType::value_error(format!(
                "not enough values to unpack (expected {expected}, got {})",
                items.len()
            ))),
            std::cmp::Ordering::Greater => Err(ExcType::value_error(format!(
                "too many values to unpack (expected {expected})"
            ))),
        }
    }
}

fn not_subscriptable(type_name: &str) -> RunError {
    ExcType::type_error(format!("'{type_name}' object is not subscriptable"))
}

fn no_len(type_name: &str) -> RunError {
    ExcType::type_error(format!("object of type '{type_name}' has no len()"))
}

#[cfg(test)]
mod tests {
    use super::normalize_index;

    #[test]
    fn negative_indices_count_from_the_end() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(0, 0), None);
    }
}
