//! Attribute lookup, assignment and method binding.

use crate::{
    args::ArgValues,
    builtins::{BoundBuiltin, Builtins, readonly_attribute},
    exception_private::{ExcType, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{
        BoundMethod,
        class::{lookup_after, lookup_in_mro},
    },
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `obj.name`.
    pub(crate) fn get_attr(&mut self, obj: &Value, name: &str) -> RunResult<Value> {
        let id = match obj {
            Value::Ref(id) => *id,
            Value::Builtin(Builtins::Type(ty)) if name == "__name__" || name == "__qualname__" => {
                return Ok(Value::str((*ty).into()));
            }
            _ => return self.builtin_value_attr(obj, name),
        };
        match self.heap.get(id) {
            HeapData::Instance(inst) => {
                let class_id = inst.class;
                if name == "__class__" {
                    return Ok(Value::Ref(class_id));
                }
                let own = inst.attrs.get(name).cloned();
                let class_member = lookup_in_mro(&self.heap, class_id, name);
                // properties win over the instance dict
                if let Some(member) = &class_member
                    && self.is_property(member)
                {
                    return self.bind_class_member(member.clone(), obj, class_id);
                }
                if let Some(value) = own {
                    return Ok(value);
                }
                if let Some(member) = class_member {
                    return self.bind_class_member(member, obj, class_id);
                }
                if let Some(getattr) = lookup_in_mro(&self.heap, class_id, "__getattr__") {
                    return self.call_with_receiver(getattr, obj.clone(), ArgValues::one(Value::str(name)));
                }
                Err(ExcType::attribute_error(&self.class_display(class_id), name))
            }
            HeapData::Class(_) => self.class_attr(id, name),
            HeapData::Module(module) => {
                if let Some(native) = module.native
                    && native.computes(name)
                {
                    return self.native_attr(native, name);
                }
                match module.globals.get(name) {
                    Some(value) => Ok(value.clone()),
                    None => Err(ExcType::module_attribute_error(&module.name, name)),
                }
            }
            HeapData::Super(proxy) => {
                let (this_class, mro_source, receiver) = (proxy.this_class, proxy.mro_source, proxy.receiver.clone());
                let Some(member) = lookup_after(&self.heap, mro_source, this_class, name) else {
                    return Err(ExcType::attribute_error("super", name));
                };
                if receiver.ref_id() == Some(mro_source) {
                    self.class_member(member, mro_source)
                } else {
                    self.bind_class_member(member, &receiver, mro_source)
                }
            }
            HeapData::Function(func) => match name {
                "__name__" => Ok(Value::str(func.name())),
                "__qualname__" => Ok(Value::str(&func.qualname)),
                "__module__" => match self.heap.get(func.globals) {
                    HeapData::Module(m) => Ok(Value::str(&m.name)),
                    _ => Ok(Value::None),
                },
                _ => Err(ExcType::attribute_error("function", name)),
            },
            HeapData::BoundMethod(bound) => match name {
                "__self__" => Ok(bound.receiver.clone()),
                "__func__" => Ok(bound.func.clone()),
                _ => Err(ExcType::attribute_error("method", name)),
            },
            _ => self.builtin_value_attr(obj, name),
        }
    }

    /// Attribute access on a class object.
    fn class_attr(&mut self, class_id: HeapId, name: &str) -> RunResult<Value> {
        let HeapData::Class(cls) = self.heap.get(class_id) else {
            return Err(ExcType::attribute_error("type", name));
        };
        match name {
            "__name__" => return Ok(Value::str(&cls.name)),
            "__qualname__" => return Ok(Value::str(&cls.qualname)),
            "__class__" => return Ok(Value::Ref(cls.metaclass.unwrap_or(self.classes.type_))),
            "__mro__" | "__bases__" => {
                let ids = if name == "__mro__" { cls.mro.clone() } else { cls.bases.clone() };
                return Ok(self.heap.tuple(ids.into_iter().map(Value::Ref).collect())?);
            }
            _ => {}
        }
        let metaclass = cls.metaclass.unwrap_or(self.classes.type_);
        if let Some(member) = lookup_in_mro(&self.heap, class_id, name) {
            return self.class_member(member, class_id);
        }
        if let Some(member) = lookup_in_mro(&self.heap, metaclass, name) {
            return self.bind_class_member(member, &Value::Ref(class_id), metaclass);
        }
        Err(SimpleException::new_msg(
            ExcType::AttributeError,
            format!("type object '{}' has no attribute '{name}'", self.class_display(class_id)),
        )
        .into())
    }

    /// A class attribute read through the class itself: functions stay plain,
    /// `staticmethod` unwraps, `classmethod` binds to the class.
    fn class_member(&mut self, member: Value, class_id: HeapId) -> RunResult<Value> {
        let Value::Ref(id) = &member else {
            return Ok(member);
        };
        match self.heap.get(*id) {
            HeapData::StaticMethod(inner) => Ok(inner.clone()),
            HeapData::ClassMethod(inner) => {
                let bound = BoundMethod {
                    func: inner.clone(),
                    receiver: Value::Ref(class_id),
                };
                Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(bound))?))
            }
            _ => Ok(member),
        }
    }

    /// A class attribute read through an instance (or through a class acting
    /// as an instance of its metaclass): functions bind to the receiver.
    pub(crate) fn bind_class_member(&mut self, member: Value, receiver: &Value, class_id: HeapId) -> RunResult<Value> {
        let func = match &member {
            Value::Builtin(Builtins::Function(f)) if f.binds_as_method() => member.clone(),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(_) => member.clone(),
                HeapData::StaticMethod(inner) => return Ok(inner.clone()),
                HeapData::ClassMethod(inner) => {
                    let bound = BoundMethod {
                        func: inner.clone(),
                        receiver: Value::Ref(class_id),
                    };
                    return Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(bound))?));
                }
                HeapData::Property(getter) => {
                    let getter = getter.clone();
                    return self.call_with_receiver(getter, receiver.clone(), ArgValues::empty());
                }
                _ => return Ok(member),
            },
            _ => return Ok(member),
        };
        let bound = BoundMethod {
            func,
            receiver: receiver.clone(),
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(bound))?))
    }

    fn is_property(&self, value: &Value) -> bool {
        matches!(value, Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Property(_)))
    }

    /// Methods of builtin values come from the method table.
    fn builtin_value_attr(&mut self, obj: &Value, name: &str) -> RunResult<Value> {
        let ty = obj.py_type(&self.heap);
        match self.methods.get(ty, name) {
            Some(method) => {
                let bound = BoundBuiltin {
                    method,
                    receiver: obj.clone(),
                };
                Ok(Value::Ref(self.heap.allocate(HeapData::BuiltinMethod(bound))?))
            }
            None => Err(ExcType::attribute_error(&obj.type_name(&self.heap), name)),
        }
    }

    /// `obj.name = value`.
    pub(crate) fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(ExcType::attribute_error(&obj.type_name(&self.heap), name));
        };
        let class_id = match self.heap.get_mut(*id) {
            HeapData::Instance(inst) => inst.class,
            HeapData::Class(cls) => {
                cls.namespace.insert(name.to_owned(), value);
                return Ok(());
            }
            HeapData::Module(module) => {
                if let Some(native) = module.native
                    && native.computes(name)
                {
                    return Err(readonly_attribute(native, name));
                }
                module.globals.insert(name.to_owned(), value);
                return Ok(());
            }
            _ => return Err(ExcType::attribute_error(&obj.type_name(&self.heap), name)),
        };
        if let Some(member) = lookup_in_mro(&self.heap, class_id, name)
            && self.is_property(&member)
        {
            return Err(SimpleException::new_msg(
                ExcType::AttributeError,
                format!("property '{name}' of '{}' object has no setter", self.class_display(class_id)),
            )
            .into());
        }
        if let HeapData::Instance(inst) = self.heap.get_mut(*id) {
            inst.attrs.insert(name.to_owned(), value);
        }
        Ok(())
    }

    /// `del obj.name`.
    pub(crate) fn del_attr(&mut self, obj: &Value, name: &str) -> RunResult<()> {
        let type_name = obj.type_name(&self.heap);
        let removed = match obj {
            Value::Ref(id) => match self.heap.get_mut(*id) {
                HeapData::Instance(inst) => inst.attrs.shift_remove(name).is_some(),
                HeapData::Class(cls) => cls.namespace.shift_remove(name).is_some(),
                HeapData::Module(module) => {
                    if let Some(native) = module.native
                        && native.computes(name)
                    {
                        return Err(readonly_attribute(native, name));
                    }
                    module.globals.shift_remove(name).is_some()
                }
                _ => false,
            },
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            Err(ExcType::attribute_error(&type_name, name))
        }
    }

    /// Class of an instance value.
    pub(crate) fn instance_class(&self, value: &Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Instance(inst) => Some(inst.class),
                _ => None,
            },
            _ => None,
        }
    }

    /// Calls a special method looked up on an instance's class.
    ///
    /// Returns `Ok(None)` when `receiver` is not an instance or its class
    /// does not define `name`.
    pub(crate) fn call_special(&mut self, receiver: &Value, name: &str, args: ArgValues) -> RunResult<Option<Value>> {
        let Some(class_id) = self.instance_class(receiver) else {
            return Ok(None);
        };
        let Some(method) = lookup_in_mro(&self.heap, class_id, name) else {
            return Ok(None);
        };
        let direct = match &method {
            Value::Builtin(Builtins::Function(f)) => f.binds_as_method(),
            Value::Ref(id) => matches!(self.heap.get(*id), HeapData::Function(_)),
            _ => false,
        };
        let result = if direct {
            self.call_with_receiver(method, receiver.clone(), args)?
        } else {
            let bound = self.bind_class_member(method, receiver, class_id)?;
            self.call_value(bound, args)?
        };
        Ok(Some(result))
    }

    /// Whether an instance's class defines `name`.
    pub(crate) fn has_special(&self, receiver: &Value, name: &str) -> bool {
        self.instance_class(receiver)
            .is_some_and(|class_id| lookup_in_mro(&self.heap, class_id, name).is_some())
    }
}
