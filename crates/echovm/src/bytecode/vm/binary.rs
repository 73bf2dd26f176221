//! Binary and unary operators.
//!
//! Instance special methods are consulted first (left operand's method, then
//! the right operand's reflected method); the native numeric, sequence and
//! set tables are the fallback.

use std::rc::Rc;

use crate::{
    args::ArgValues,
    bytecode::op::{BinaryOp, UnaryOp},
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::Set,
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `lhs <op> rhs`.
    pub(crate) fn binary_op(&mut self, lhs: Value, rhs: Value, op: BinaryOp) -> RunResult<Value> {
        if self.instance_class(&lhs).is_some() || self.instance_class(&rhs).is_some() {
            if let Some(result) = self.call_special(&lhs, op.dunder(), ArgValues::one(rhs.clone()))?
                && !matches!(result, Value::NotImplemented)
            {
                return Ok(result);
            }
            if let Some(result) = self.call_special(&rhs, op.reflected_dunder(), ArgValues::one(lhs.clone()))?
                && !matches!(result, Value::NotImplemented)
            {
                return Ok(result);
            }
        } else if let Some(result) = self.native_binary(&lhs, &rhs, op)? {
            return Ok(result);
        }
        Err(ExcType::unsupported_operand(
            op.symbol(),
            &lhs.type_name(&self.heap),
            &rhs.type_name(&self.heap),
        ))
    }

    /// Native operator table. `Ok(None)` means no entry for these operand types.
    fn native_binary(&mut self, lhs: &Value, rhs: &Value, op: BinaryOp) -> RunResult<Option<Value>> {
        if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
            match op {
                BinaryOp::BitAnd => return Ok(Some(Value::Bool(*a & *b))),
                BinaryOp::BitOr => return Ok(Some(Value::Bool(*a | *b))),
                BinaryOp::BitXor => return Ok(Some(Value::Bool(*a ^ *b))),
                _ => {}
            }
        }
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            return int_binary(a, b, op).map(Some);
        }
        if let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) {
            return float_binary(a, b, op);
        }
        match (lhs, rhs, op) {
            (Value::Str(a), Value::Str(b), BinaryOp::Add) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Ok(Some(Value::Str(Rc::from(out))))
            }
            (Value::Str(s), count, BinaryOp::Mul) | (count, Value::Str(s), BinaryOp::Mul) if count.as_int().is_some() => {
                let n = repeat_count(count)?;
                Ok(Some(Value::Str(Rc::from(s.repeat(n)))))
            }
            (Value::Bytes(a), Value::Bytes(b), BinaryOp::Add) => {
                let joined: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
                Ok(Some(Value::Bytes(Rc::from(joined))))
            }
            (Value::Bytes(b), count, BinaryOp::Mul) | (count, Value::Bytes(b), BinaryOp::Mul)
                if count.as_int().is_some() =>
            {
                let n = repeat_count(count)?;
                Ok(Some(Value::Bytes(Rc::from(b.repeat(n)))))
            }
            (Value::Ref(a), Value::Ref(b), _) => self.heap_binary(*a, *b, op),
            (Value::Ref(seq), count, BinaryOp::Mul) | (count, Value::Ref(seq), BinaryOp::Mul)
                if count.as_int().is_some() =>
            {
                let n = repeat_count(count)?;
                self.sequence_repeat(*seq, n)
            }
            _ => Ok(None),
        }
    }

    fn heap_binary(&mut self, a: HeapId, b: HeapId, op: BinaryOp) -> RunResult<Option<Value>> {
        let result = match (self.heap.get(a), self.heap.get(b), op) {
            (HeapData::List(x), HeapData::List(y), BinaryOp::Add) => HeapData::List(x.iter().chain(y).cloned().collect()),
            (HeapData::Tuple(x), HeapData::Tuple(y), BinaryOp::Add) => {
                HeapData::Tuple(x.iter().chain(y).cloned().collect())
            }
            (HeapData::Set(x), HeapData::Set(y), _) => {
                let mut out = Set::new();
                match op {
                    BinaryOp::BitOr => {
                        for (key, value) in x.entries().chain(y.entries()) {
                            out.add(key.clone(), value.clone());
                        }
                    }
                    BinaryOp::BitAnd => {
                        for (key, value) in x.entries().filter(|(k, _)| y.contains(k)) {
                            out.add(key.clone(), value.clone());
                        }
                    }
                    BinaryOp::Sub => {
                        for (key, value) in x.entries().filter(|(k, _)| !y.contains(k)) {
                            out.add(key.clone(), value.clone());
                        }
                    }
                    BinaryOp::BitXor => {
                        let left = x.entries().filter(|(k, _)| !y.contains(k));
                        let right = y.entries().filter(|(k, _)| !x.contains(k));
                        for (key, value) in left.chain(right) {
                            out.add(key.clone(), value.clone());
                        }
                    }
                    _ => return Ok(None),
                }
                HeapData::Set(out)
            }
            (HeapData::Dict(x), HeapData::Dict(y), BinaryOp::BitOr) => {
                let mut out = x.clone();
                for (key, (k, v)) in y.dict_keys().zip(y.iter()) {
                    out.insert(key.clone(), k.clone(), v.clone());
                }
                HeapData::Dict(out)
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.heap.allocate(result)?)))
    }

    fn sequence_repeat(&mut self, seq: HeapId, n: usize) -> RunResult<Option<Value>> {
        let result = match self.heap.get(seq) {
            HeapData::List(items) => HeapData::List(repeat_items(items, n)?),
            HeapData::Tuple(items) => HeapData::Tuple(repeat_items(items, n)?),
            _ => return Ok(None),
        };
        Ok(Some(Value::Ref(self.heap.allocate(result)?)))
    }

    /// `<op> operand`.
    pub(crate) fn unary_op(&mut self, operand: Value, op: UnaryOp) -> RunResult<Value> {
        match (&operand, op) {
            (_, UnaryOp::Not) => Ok(Value::Bool(!self.truthy(&operand)?)),
            (Value::Int(_) | Value::Bool(_), _) => {
                let a = operand.as_int().unwrap_or_default();
                Ok(Value::Int(match op {
                    UnaryOp::Neg => a.checked_neg().ok_or_else(ExcType::int_overflow)?,
                    UnaryOp::Invert => !a,
                    _ => a,
                }))
            }
            (Value::Float(f), UnaryOp::Neg) => Ok(Value::Float(-f)),
            (Value::Float(f), UnaryOp::Pos) => Ok(Value::Float(*f)),
            _ => {
                if let Some(dunder) = op.dunder()
                    && let Some(result) = self.call_special(&operand, dunder, ArgValues::empty())?
                {
                    return Ok(result);
                }
                Err(ExcType::type_error(format!(
                    "bad operand type for {}: '{}'",
                    op.symbol(),
                    operand.type_name(&self.heap)
                )))
            }
        }
    }
}

fn repeat_count(count: &Value) -> RunResult<usize> {
    let n = count.as_int().unwrap_or_default();
    Ok(usize::try_from(n).unwrap_or(0))
}

fn repeat_items(items: &[Value], n: usize) -> RunResult<Vec<Value>> {
    let total = items.len().checked_mul(n).ok_or_else(ExcType::int_overflow)?;
    let mut out = Vec::with_capacity(total);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

/// Integer arithmetic with floor division semantics and overflow checks.
pub(crate) fn int_binary(a: i64, b: i64, op: BinaryOp) -> RunResult<Value> {
    let overflow = ExcType::int_overflow;
    Ok(match op {
        BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Err(ExcType::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(ExcType::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            let adjust = a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0));
            Value::Int(if adjust { q - 1 } else { q })
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(ExcType::zero_division("integer modulo by zero"));
            }
            let r = a.wrapping_rem(b);
            Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinaryOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
                }
                Value::Float((a as f64).powf(b as f64))
            } else {
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                Value::Int(a.checked_pow(exp).ok_or_else(overflow)?)
            }
        }
        BinaryOp::LShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if a == 0 {
                Value::Int(0)
            } else {
                let shift = u32::try_from(b).ok().filter(|s| *s < 64).ok_or_else(overflow)?;
                let shifted = a << shift;
                if shifted >> shift != a {
                    return Err(overflow());
                }
                Value::Int(shifted)
            }
        }
        BinaryOp::RShift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinaryOp::BitAnd => Value::Int(a & b),
        BinaryOp::BitOr => Value::Int(a | b),
        BinaryOp::BitXor => Value::Int(a ^ b),
    })
}

fn float_binary(a: f64, b: f64, op: BinaryOp) -> RunResult<Option<Value>> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(ExcType::value_error("negative number cannot be raised to a fractional power"));
            }
            a.powf(b)
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: RunResult<Value>) -> i64 {
        v.unwrap().as_int().unwrap()
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        assert_eq!(int(int_binary(-7, 2, BinaryOp::FloorDiv)), -4);
        assert_eq!(int(int_binary(7, -2, BinaryOp::FloorDiv)), -4);
        assert_eq!(int(int_binary(-7, 2, BinaryOp::Mod)), 1);
        assert_eq!(int(int_binary(7, -2, BinaryOp::Mod)), -1);
        assert_eq!(int(int_binary(i64::MIN, -1, BinaryOp::Mod)), 0);
    }

    #[test]
    fn overflow_and_zero_division_raise() {
        let err = int_binary(i64::MAX, 1, BinaryOp::Add).unwrap_err();
        assert!(err.is_simple_exception(ExcType::OverflowError));
        let err = int_binary(1, 0, BinaryOp::FloorDiv).unwrap_err();
        assert!(err.is_simple_exception(ExcType::ZeroDivisionError));
        let err = int_binary(1, 64, BinaryOp::LShift).unwrap_err();
        assert!(err.is_simple_exception(ExcType::OverflowError));
        assert!(matches!(int_binary(2, -1, BinaryOp::Pow).unwrap(), Value::Float(f) if f == 0.5));
    }
}
