//! Class creation (`__build_class__`, three-argument `type`) and the slot
//! functions of the builtin `object` and `BaseException` classes.

use super::Builtins;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{ClassObject, Instance, Namespace, Type, compute_c3_mro, new_namespace},
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `__build_class__(func, name, *bases, metaclass=None)`.
    ///
    /// Runs the class body with a fresh dict as its namespace, then creates
    /// the class from whatever the body stored there.
    pub(crate) fn builtin_build_class(&mut self, args: ArgValues) -> RunResult<Value> {
        let mut args = args;
        let metaclass = args.take_kwarg("metaclass");
        args.check_no_kwargs("__build_class__")?;
        let mut positional = args.positional.into_iter();
        let (Some(func), Some(name)) = (positional.next(), positional.next()) else {
            return Err(ExcType::type_error("__build_class__: not enough arguments"));
        };
        let bases: Vec<Value> = positional.collect();

        let func_id = match func {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Function(_)) => id,
            _ => return Err(ExcType::type_error("__build_class__: func must be a function")),
        };
        let Value::Str(name) = name else {
            return Err(ExcType::type_error("__build_class__: name is not a string"));
        };
        let (qualname, globals) = match self.heap.get(func_id) {
            HeapData::Function(f) => (f.qualname.clone(), f.globals),
            _ => return Err(RunError::internal("class body changed kind")),
        };
        let module = match self.module_globals(globals)?.get("__name__") {
            Some(Value::Str(module)) => module.to_string(),
            _ => "__main__".to_owned(),
        };
        let metaclass = match metaclass {
            None | Some(Value::None) | Some(Value::Builtin(Builtins::Type(Type::Type))) => None,
            Some(Value::Ref(id)) if id == self.classes.type_ => None,
            Some(Value::Ref(id)) if matches!(self.heap.get(id), HeapData::Class(_)) => Some(id),
            Some(other) => {
                return Err(ExcType::type_error(format!(
                    "metaclass must be a class, not '{}'",
                    other.type_name(&self.heap)
                )));
            }
        };

        let ns_id = self.new_dict()?;
        for (key, value) in [("__module__", Value::str(&module)), ("__qualname__", Value::str(&qualname))] {
            let key_value = Value::str(key);
            let key = key_value.to_key(&self.heap)?;
            if let HeapData::Dict(dict) = self.heap.get_mut(ns_id) {
                dict.insert(key, key_value, value);
            }
        }
        let mut frame = self.prepare_frame(func_id, ArgValues::empty())?;
        frame.namespace = Some(ns_id);
        let class_cell = frame
            .code
            .cellvars
            .iter()
            .position(|v| v == "__class__")
            .and_then(|i| frame.cells.get(i).copied());
        self.execute_frame(frame)?;

        let mut namespace = new_namespace();
        if let HeapData::Dict(dict) = self.heap.get(ns_id) {
            for (key, value) in dict.iter() {
                if let Value::Str(key) = key {
                    namespace.insert(key.to_string(), value.clone());
                }
            }
        }
        let class_id = self.create_class(&name, &qualname, &module, bases, namespace, metaclass)?;
        if let Some(cell) = class_cell
            && let HeapData::Cell(slot) = self.heap.get_mut(cell)
        {
            *slot = Value::Ref(class_id);
        }
        Ok(Value::Ref(class_id))
    }

    /// Allocates a class and linearizes its MRO.
    ///
    /// An empty `bases` means `(object,)`. The metaclass, when not given, is
    /// inherited from the first base that has one; the builtin exception
    /// type is inherited the same way.
    pub(crate) fn create_class(
        &mut self,
        name: &str,
        qualname: &str,
        module: &str,
        bases: Vec<Value>,
        namespace: Namespace,
        metaclass: Option<HeapId>,
    ) -> RunResult<HeapId> {
        let mut base_ids = Vec::with_capacity(bases.len());
        for base in bases {
            let id = match base {
                Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => id,
                Value::Builtin(Builtins::Type(Type::Type)) => self.classes.type_,
                Value::Builtin(Builtins::Type(ty)) => {
                    return Err(ExcType::type_error(format!("type '{ty}' is not an acceptable base type")));
                }
                other => {
                    return Err(ExcType::type_error(format!(
                        "bases must be types, not '{}'",
                        other.type_name(&self.heap)
                    )));
                }
            };
            if base_ids.contains(&id) {
                let dup = self.class_display(id);
                return Err(ExcType::type_error(format!("duplicate base class {dup}")));
            }
            base_ids.push(id);
        }
        if base_ids.is_empty() {
            base_ids.push(self.classes.object);
        }

        let mut exc_type = None;
        let mut inherited_meta = None;
        for base in &base_ids {
            if let HeapData::Class(cls) = self.heap.get(*base) {
                exc_type = exc_type.or(cls.exc_type);
                inherited_meta = inherited_meta.or(cls.metaclass);
            }
        }

        let class = ClassObject {
            name: name.to_owned(),
            qualname: qualname.to_owned(),
            module: module.to_owned(),
            bases: base_ids.clone(),
            mro: Vec::new(),
            namespace,
            metaclass: metaclass.or(inherited_meta),
            exc_type,
        };
        let id = self.heap.allocate(HeapData::Class(class))?;
        let mro = compute_c3_mro(id, &base_ids, &self.heap)?;
        if let HeapData::Class(cls) = self.heap.get_mut(id) {
            cls.mro = mro;
        }
        Ok(id)
    }

    /// `object.__init__(self)`.
    pub(crate) fn builtin_object_init(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("object.__init__")?;
        if args.positional.len() != 1 {
            return Err(ExcType::type_error(
                "object.__init__() takes exactly one argument (the instance to initialize)",
            ));
        }
        Ok(Value::None)
    }

    /// `object.__new__(cls, ...)`: a bare instance of `cls`.
    pub(crate) fn builtin_object_new(&mut self, args: ArgValues) -> RunResult<Value> {
        let class_id = match args.positional.first() {
            Some(Value::Ref(id)) if matches!(self.heap.get(*id), HeapData::Class(_)) => *id,
            Some(other) => {
                return Err(ExcType::type_error(format!(
                    "object.__new__(X): X is not a type object ({})",
                    other.type_name(&self.heap)
                )));
            }
            None => return Err(ExcType::type_error("object.__new__(): not enough arguments")),
        };
        let mut instance = Instance::new(class_id);
        if self.class_exc_type(class_id).is_some() {
            let exc_args = self.heap.tuple(args.positional[1..].to_vec())?;
            instance.attrs.insert("args".to_owned(), exc_args);
        }
        Ok(Value::Ref(self.heap.allocate(HeapData::Instance(instance))?))
    }

    /// `BaseException.__init__(self, *args)`: records `args`.
    pub(crate) fn builtin_exception_init(&mut self, args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("BaseException.__init__")?;
        let mut positional = args.positional.into_iter();
        let Some(Value::Ref(id)) = positional.next() else {
            return Err(ExcType::type_error("descriptor '__init__' requires a 'BaseException' object"));
        };
        let exc_args = self.heap.tuple(positional.collect())?;
        match self.heap.get_mut(id) {
            HeapData::Instance(inst) => {
                inst.attrs.insert("args".to_owned(), exc_args);
                Ok(Value::None)
            }
            _ => Err(ExcType::type_error("descriptor '__init__' requires a 'BaseException' object")),
        }
    }

    /// `staticmethod(f)`, `classmethod(f)` and `property(getter)`.
    pub(crate) fn builtin_wrapper(&mut self, args: ArgValues, name: &str, wrap: fn(Value) -> HeapData) -> RunResult<Value> {
        let inner = args.get_one_arg(name)?;
        Ok(Value::Ref(self.heap.allocate(wrap(inner))?))
    }
}
