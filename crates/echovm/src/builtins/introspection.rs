//! Type and attribute introspection builtins: `isinstance`, `issubclass`,
//! `getattr` and friends, plus explicit two-argument `super`.

use std::{
    hash::{BuildHasher, Hash, Hasher},
    rc::Rc,
};

use super::Builtins;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{SuperProxy, Type, class::is_subclass},
    value::{DictKey, Value},
};

/// A class operand of `isinstance`/`issubclass`, with `type` folded into
/// its heap class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassRef {
    Heap(HeapId),
    Builtin(Type),
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `isinstance(obj, classinfo)`.
    pub(crate) fn builtin_isinstance(&mut self, args: ArgValues) -> RunResult<Value> {
        let (obj, classinfo) = args.get_two_args("isinstance")?;
        let cls = self.class_ref(&self.type_of(&obj)).unwrap_or(ClassRef::Heap(self.classes.object));
        self.matches_classinfo(cls, &classinfo, "isinstance").map(Value::Bool)
    }

    /// `issubclass(cls, classinfo)`.
    pub(crate) fn builtin_issubclass(&mut self, args: ArgValues) -> RunResult<Value> {
        let (cls, classinfo) = args.get_two_args("issubclass")?;
        let Some(cls) = self.class_ref(&cls) else {
            return Err(ExcType::type_error("issubclass() arg 1 must be a class"));
        };
        self.matches_classinfo(cls, &classinfo, "issubclass").map(Value::Bool)
    }

    /// Whether `value` is an instance of the heap class `class_id` or a subclass.
    pub(crate) fn is_instance_of_class(&self, value: &Value, class_id: HeapId) -> bool {
        self.class_ref(&self.type_of(value))
            .is_some_and(|cls| self.class_is_subclass(cls, ClassRef::Heap(class_id)))
    }

    fn class_ref(&self, value: &Value) -> Option<ClassRef> {
        match value {
            Value::Builtin(Builtins::Type(Type::Type)) => Some(ClassRef::Heap(self.classes.type_)),
            Value::Builtin(Builtins::Type(ty)) => Some(ClassRef::Builtin(*ty)),
            Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Class(_)) => Some(ClassRef::Heap(*id)),
            _ => None,
        }
    }

    fn class_is_subclass(&self, cls: ClassRef, base: ClassRef) -> bool {
        match (cls, base) {
            (ClassRef::Heap(cls), ClassRef::Heap(base)) => is_subclass(&self.heap, cls, base),
            (ClassRef::Builtin(_), ClassRef::Heap(base)) => base == self.classes.object,
            (ClassRef::Heap(_), ClassRef::Builtin(_)) => false,
            (ClassRef::Builtin(cls), ClassRef::Builtin(base)) => cls == base || (cls == Type::Bool && base == Type::Int),
        }
    }

    fn matches_classinfo(&self, cls: ClassRef, classinfo: &Value, caller: &str) -> RunResult<bool> {
        if let Some(base) = self.class_ref(classinfo) {
            return Ok(self.class_is_subclass(cls, base));
        }
        if let Value::Ref(id) = classinfo
            && let HeapData::Tuple(items) = self.heap.get(*id)
        {
            for item in items {
                if self.matches_classinfo(cls, item, caller)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        Err(ExcType::type_error(format!(
            "{caller}() arg 2 must be a type or tuple of types"
        )))
    }

    /// `getattr(obj, name[, default])`.
    pub(crate) fn builtin_getattr(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("getattr")?;
        let mut positional = args.positional.into_iter();
        let (Some(obj), Some(name)) = (positional.next(), positional.next()) else {
            return Err(ExcType::type_error("getattr expected at least 2 arguments"));
        };
        let default = positional.next();
        if positional.next().is_some() {
            return Err(ExcType::type_error("getattr expected at most 3 arguments"));
        }
        let name = self.attr_name(&name, "getattr")?;
        match self.get_attr(&obj, &name) {
            Err(err) if default.is_some() && self.error_matches(&err, ExcType::AttributeError) => {
                Ok(default.unwrap_or(Value::None))
            }
            other => other,
        }
    }

    /// `hasattr(obj, name)`: only AttributeError means "no".
    pub(crate) fn builtin_hasattr(&mut self, args: ArgValues) -> RunResult<Value> {
        let (obj, name) = args.get_two_args("hasattr")?;
        let name = self.attr_name(&name, "hasattr")?;
        match self.get_attr(&obj, &name) {
            Ok(_) => Ok(Value::Bool(true)),
            Err(err) if self.error_matches(&err, ExcType::AttributeError) => Ok(Value::Bool(false)),
            Err(err) => Err(err),
        }
    }

    /// `setattr(obj, name, value)`.
    pub(crate) fn builtin_setattr(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("setattr")?;
        let [obj, name, value] = <[Value; 3]>::try_from(args.positional.into_vec())
            .map_err(|args| ExcType::type_error(format!("setattr expected 3 arguments, got {}", args.len())))?;
        let name = self.attr_name(&name, "setattr")?;
        self.set_attr(&obj, &name, value)?;
        Ok(Value::None)
    }

    fn attr_name(&self, name: &Value, caller: &str) -> RunResult<String> {
        match name {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(ExcType::type_error(format!(
                "{caller}(): attribute name must be string, not '{}'",
                other.type_name(&self.heap)
            ))),
        }
    }

    /// `id(obj)`: the arena slot for heap objects.
    pub(crate) fn builtin_id(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("id")?;
        let id = match &value {
            Value::Ref(id) => id.index() as i64,
            Value::Code(code) => Rc::as_ptr(code) as usize as i64,
            other => match other.to_key(&self.heap) {
                Ok(key) => hash_key(&key),
                Err(_) => 0,
            },
        };
        Ok(Value::Int(id))
    }

    /// `hash(obj)`: ints hash to themselves, everything else through the
    /// dict-key form, so values that compare equal hash equal.
    pub(crate) fn builtin_hash(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("hash")?;
        let key = value.to_key(&self.heap)?;
        Ok(Value::Int(match key {
            DictKey::Int(i) => i,
            other => hash_key(&other),
        }))
    }

    /// `callable(obj)`.
    pub(crate) fn builtin_callable(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("callable")?;
        let callable = match &value {
            Value::Builtin(_) => true,
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(_)
                | HeapData::BoundMethod(_)
                | HeapData::BuiltinMethod(_)
                | HeapData::Class(_)
                | HeapData::StaticMethod(_) => true,
                HeapData::Instance(_) => self.has_special(&value, "__call__"),
                _ => false,
            },
            _ => false,
        };
        Ok(Value::Bool(callable))
    }

    /// `super(type, obj)`. The zero-argument form needs compiler support the
    /// code units do not carry, so callers pass both arguments.
    pub(crate) fn builtin_super(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("super")?;
        let mut positional = args.positional.into_iter();
        let (this, receiver) = match (positional.next(), positional.next(), positional.next()) {
            (None, _, _) => return Err(ExcType::runtime_error("super(): no arguments")),
            (Some(this), Some(receiver), None) => (this, receiver),
            (Some(_), None, _) => {
                return Err(ExcType::type_error("super() with one argument is not supported"));
            }
            _ => return Err(ExcType::type_error("super() takes at most 2 arguments")),
        };
        let this_class = match &this {
            Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Class(_)) => *id,
            other => {
                return Err(ExcType::type_error(format!(
                    "super() argument 1 must be a type, not {}",
                    other.type_name(&self.heap)
                )));
            }
        };
        let mro_source = match &receiver {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Instance(inst) if is_subclass(&self.heap, inst.class, this_class) => Some(inst.class),
                HeapData::Class(_) if is_subclass(&self.heap, *id, this_class) => Some(*id),
                _ => None,
            },
            _ => None,
        };
        let Some(mro_source) = mro_source else {
            return Err(ExcType::type_error(
                "super(type, obj): obj must be an instance or subtype of type",
            ));
        };
        let proxy = SuperProxy {
            this_class,
            mro_source,
            receiver,
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Super(proxy))?))
    }
}

/// Stable hash of a dict key; fixed seeds keep `hash()` reproducible across runs.
fn hash_key(key: &DictKey) -> i64 {
    let state = ahash::RandomState::with_seeds(0x243f_6a88, 0x85a3_08d3, 0x1319_8a2e, 0x0370_7344);
    let mut hasher = state.build_hasher();
    key.hash(&mut hasher);
    // -1 is never a valid hash
    match hasher.finish() as i64 {
        -1 => -2,
        h => h,
    }
}
