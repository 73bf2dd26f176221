//! Comparison, equality and membership.

use std::cmp::Ordering;

use crate::{
    args::ArgValues,
    bytecode::CompareOp,
    exception_private::{ExcType, RunError, RunResult},
    heap::HeapData,
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `lhs <op> rhs` for every [`CompareOp`].
    pub(crate) fn compare_op(&mut self, lhs: Value, rhs: Value, op: CompareOp) -> RunResult<Value> {
        match op {
            CompareOp::Is => Ok(Value::Bool(lhs.is_identical(&rhs))),
            CompareOp::IsNot => Ok(Value::Bool(!lhs.is_identical(&rhs))),
            CompareOp::In => Ok(Value::Bool(self.contains(&rhs, &lhs)?)),
            CompareOp::NotIn => Ok(Value::Bool(!self.contains(&rhs, &lhs)?)),
            CompareOp::ExceptionMatch => Ok(Value::Bool(self.exception_matches(&lhs, &rhs)?)),
            _ => self.rich_compare(lhs, rhs, op),
        }
    }

    /// Rich comparison: special methods first, then the native ordering.
    pub(crate) fn rich_compare(&mut self, lhs: Value, rhs: Value, op: CompareOp) -> RunResult<Value> {
        let Some((dunder, reflected)) = op.dunders() else {
            return Err(RunError::internal(format!("'{}' is not a rich comparison", op.symbol())));
        };
        if self.instance_class(&lhs).is_some() || self.instance_class(&rhs).is_some() {
            if let Some(result) = self.call_special(&lhs, dunder, ArgValues::one(rhs.clone()))?
                && !matches!(result, Value::NotImplemented)
            {
                return Ok(result);
            }
            if let Some(result) = self.call_special(&rhs, reflected, ArgValues::one(lhs.clone()))?
                && !matches!(result, Value::NotImplemented)
            {
                return Ok(result);
            }
            return match op {
                CompareOp::Eq => Ok(Value::Bool(lhs.is_identical(&rhs))),
                CompareOp::Ne => Ok(Value::Bool(!lhs.is_identical(&rhs))),
                _ => Err(self.not_orderable(&lhs, &rhs, op)),
            };
        }
        match op {
            CompareOp::Eq => Ok(Value::Bool(self.native_eq(&lhs, &rhs)?)),
            CompareOp::Ne => Ok(Value::Bool(!self.native_eq(&lhs, &rhs)?)),
            _ => match self.native_order(&lhs, &rhs, op)? {
                Some(result) => Ok(Value::Bool(result)),
                None => Err(self.not_orderable(&lhs, &rhs, op)),
            },
        }
    }

    fn not_orderable(&self, lhs: &Value, rhs: &Value, op: CompareOp) -> RunError {
        ExcType::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            lhs.type_name(&self.heap),
            rhs.type_name(&self.heap)
        ))
    }

    /// `a == b` as a Rust bool, honoring `__eq__`.
    pub(crate) fn eq_values(&mut self, a: &Value, b: &Value) -> RunResult<bool> {
        if self.instance_class(a).is_some() || self.instance_class(b).is_some() {
            let result = self.rich_compare(a.clone(), b.clone(), CompareOp::Eq)?;
            return self.truthy(&result);
        }
        self.native_eq(a, b)
    }

    fn native_eq(&mut self, a: &Value, b: &Value) -> RunResult<bool> {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return Ok(x == y);
        }
        if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
            return Ok(x == y);
        }
        let (x, y) = match (a, b) {
            (Value::Ref(x), Value::Ref(y)) => (*x, *y),
            _ => return Ok(a.is_identical(b)),
        };
        if x == y {
            return Ok(true);
        }
        let pairs: Vec<(Value, Value)> = match (self.heap.get(x), self.heap.get(y)) {
            (HeapData::List(l), HeapData::List(r)) | (HeapData::Tuple(l), HeapData::Tuple(r)) => {
                if l.len() != r.len() {
                    return Ok(false);
                }
                l.iter().cloned().zip(r.iter().cloned()).collect()
            }
            (HeapData::Dict(l), HeapData::Dict(r)) => {
                if l.len() != r.len() {
                    return Ok(false);
                }
                let mut pairs = Vec::with_capacity(l.len());
                for (key, (_, value)) in l.dict_keys().zip(l.iter()) {
                    match r.get(key) {
                        Some(other) => pairs.push((value.clone(), other.clone())),
                        None => return Ok(false),
                    }
                }
                pairs
            }
            (HeapData::Set(l), HeapData::Set(r)) => {
                return Ok(l.len() == r.len() && l.entries().all(|(k, _)| r.contains(k)));
            }
            (HeapData::Range(l), HeapData::Range(r)) => {
                let len = l.len();
                return Ok(len == r.len() && (len == 0 || (l.start == r.start && (len == 1 || l.step == r.step))));
            }
            _ => return Ok(false),
        };
        self.limits.check_recursion_depth(self.depth + 1)?;
        self.depth += 1;
        let mut result = Ok(true);
        for (l, r) in &pairs {
            match self.eq_values(l, r) {
                Ok(true) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.depth -= 1;
        result
    }

    /// Native ordering; `Ok(None)` when the operand types are not orderable.
    fn native_order(&mut self, a: &Value, b: &Value, op: CompareOp) -> RunResult<Option<bool>> {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return Ok(Some(ordering_matches(x.cmp(&y), op)));
        }
        if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
            return Ok(Some(x.partial_cmp(&y).is_some_and(|ord| ordering_matches(ord, op))));
        }
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => Ok(Some(ordering_matches(x.cmp(y), op))),
            (Value::Bytes(x), Value::Bytes(y)) => Ok(Some(ordering_matches(x.cmp(y), op))),
            (Value::Ref(x), Value::Ref(y)) => {
                let (l, r) = match (self.heap.get(*x), self.heap.get(*y)) {
                    (HeapData::List(l), HeapData::List(r)) | (HeapData::Tuple(l), HeapData::Tuple(r)) => {
                        (l.clone(), r.clone())
                    }
                    (HeapData::Set(l), HeapData::Set(r)) => {
                        let subset = l.entries().all(|(k, _)| r.contains(k));
                        let superset = r.entries().all(|(k, _)| l.contains(k));
                        return Ok(Some(match op {
                            CompareOp::Lt => subset && l.len() < r.len(),
                            CompareOp::Le => subset,
                            CompareOp::Gt => superset && l.len() > r.len(),
                            _ => superset,
                        }));
                    }
                    _ => return Ok(None),
                };
                for (x, y) in l.iter().zip(&r) {
                    if !self.eq_values(x, y)? {
                        let strict = match op {
                            CompareOp::Le => CompareOp::Lt,
                            CompareOp::Ge => CompareOp::Gt,
                            other => other,
                        };
                        let result = self.rich_compare(x.clone(), y.clone(), strict)?;
                        return Ok(Some(self.truthy(&result)?));
                    }
                }
                Ok(Some(ordering_matches(l.len().cmp(&r.len()), op)))
            }
            _ => Ok(None),
        }
    }

    /// `item in container`.
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(&**needle)),
                other => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name(&self.heap)
                ))),
            },
            Value::Bytes(b) => match item {
                Value::Bytes(needle) => {
                    Ok(needle.is_empty() || b.windows(needle.len()).any(|w| w == &**needle))
                }
                Value::Int(byte) => Ok(u8::try_from(*byte).is_ok_and(|byte| b.contains(&byte))),
                other => Err(ExcType::type_error(format!(
                    "a bytes-like object is required, not '{}'",
                    other.type_name(&self.heap)
                ))),
            },
            Value::Ref(id) => {
                let items = match self.heap.get(*id) {
                    HeapData::List(items) | HeapData::Tuple(items) => items.clone(),
                    HeapData::Dict(dict) => {
                        let key = item.to_key(&self.heap)?;
                        return Ok(dict.contains(&key));
                    }
                    HeapData::Set(set) => {
                        let key = item.to_key(&self.heap)?;
                        return Ok(set.contains(&key));
                    }
                    HeapData::Range(range) => {
                        return Ok(match item {
                            Value::Int(_) | Value::Bool(_) => range.contains(item.as_int().unwrap_or_default()),
                            Value::Float(f) if f.fract() == 0.0 => range.contains(*f as i64),
                            _ => false,
                        });
                    }
                    HeapData::Instance(_) => {
                        if let Some(result) = self.call_special(container, "__contains__", ArgValues::one(item.clone()))? {
                            return self.truthy(&result);
                        }
                        return self.iter_contains(container, item);
                    }
                    HeapData::Iter(_) | HeapData::Generator(_) => return self.iter_contains(container, item),
                    _ => {
                        return Err(ExcType::type_error(format!(
                            "argument of type '{}' is not iterable",
                            container.type_name(&self.heap)
                        )));
                    }
                };
                for candidate in &items {
                    if candidate.is_identical(item) || self.eq_values(candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                container.type_name(&self.heap)
            ))),
        }
    }

    fn iter_contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        let iter = self.get_iter(container.clone())?;
        while let Some(candidate) = self.next_value(&iter)? {
            if candidate.is_identical(item) || self.eq_values(&candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn ordering_matches(ord: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        CompareOp::Eq => ord == Ordering::Equal,
        _ => ord != Ordering::Equal,
    }
}
