//! Builtin functions, builtin types and the builtin name registry.
//!
//! Builtins are plain [`Value::Builtin`] tags: calling one never creates a
//! guest frame, the interpreter dispatches straight to the native
//! implementation with the already-evaluated arguments. The registry mapping
//! builtin names to values is built once with the interpreter and never
//! mutated afterwards.

mod class_build;
mod introspection;
mod iteration;
mod methods;
mod native;
mod print;
mod type_;

use ahash::AHashMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr, IntoEnumIterator};

pub(crate) use methods::{BoundBuiltin, MethodTable};
pub(crate) use native::{NativeModule, readonly_attribute};

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{ClassObject, Type},
    value::Value,
};

/// Enumerates every native builtin callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Builtins {
    /// A builtin function like `print` or `len`.
    Function(BuiltinsFunctions),
    /// A builtin type like `int` or `list`; calling it constructs a value.
    Type(Type),
}

impl Builtins {
    pub fn py_type(self) -> Type {
        match self {
            Self::Function(_) => Type::BuiltinFunction,
            Self::Type(_) => Type::Type,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Function(f) => f.into(),
            Self::Type(t) => t.into(),
        }
    }

    pub fn repr(self) -> String {
        match self {
            Self::Function(f) => format!("<built-in function {f}>"),
            Self::Type(t) => format!("<class '{t}'>"),
        }
    }
}

/// Builtin functions. The string form is the name the function is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BuiltinsFunctions {
    Abs,
    All,
    Any,
    Callable,
    Chr,
    Classmethod,
    Enumerate,
    Getattr,
    Hasattr,
    Hash,
    Id,
    Isinstance,
    Issubclass,
    Iter,
    Len,
    Max,
    Min,
    Next,
    Ord,
    Print,
    Property,
    Repr,
    Reversed,
    Setattr,
    Sorted,
    Staticmethod,
    Sum,
    Super,
    Zip,
    #[strum(serialize = "__build_class__")]
    BuildClass,
    /// `object.__init__`, stored in the `object` class namespace.
    #[strum(serialize = "object.__init__")]
    ObjectInit,
    /// `object.__new__`.
    #[strum(serialize = "object.__new__")]
    ObjectNew,
    /// `BaseException.__init__`, which records `args`.
    #[strum(serialize = "BaseException.__init__")]
    ExceptionInit,
    /// `type.__call__`, the default instance construction protocol.
    #[strum(serialize = "type.__call__")]
    TypeCall,
}

impl BuiltinsFunctions {
    /// Slot functions stored in builtin class namespaces bind like guest methods.
    pub fn binds_as_method(self) -> bool {
        matches!(self, Self::ObjectInit | Self::ExceptionInit | Self::TypeCall)
    }

    /// Whether the function is reachable by name from guest code.
    fn is_global(self) -> bool {
        !matches!(
            self,
            Self::ObjectInit | Self::ObjectNew | Self::ExceptionInit | Self::TypeCall
        )
    }
}

/// Heap classes created once per interpreter: `object`, `type` and the
/// builtin exception hierarchy.
#[derive(Debug)]
pub(crate) struct BuiltinClasses {
    pub object: HeapId,
    pub type_: HeapId,
    pub exceptions: AHashMap<ExcType, HeapId>,
}

impl BuiltinClasses {
    pub fn new(heap: &mut Heap) -> Self {
        let object = alloc_class(heap, ClassObject::builtin("object", vec![], None));
        if let HeapData::Class(cls) = heap.get_mut(object) {
            cls.namespace
                .insert("__init__".to_owned(), Value::Builtin(Builtins::Function(BuiltinsFunctions::ObjectInit)));
            cls.namespace
                .insert("__new__".to_owned(), Value::Builtin(Builtins::Function(BuiltinsFunctions::ObjectNew)));
        }
        let type_ = alloc_class(heap, ClassObject::builtin("type", vec![object], None));
        if let HeapData::Class(cls) = heap.get_mut(type_) {
            cls.namespace
                .insert("__call__".to_owned(), Value::Builtin(Builtins::Function(BuiltinsFunctions::TypeCall)));
        }
        let mut classes = Self {
            object,
            type_,
            exceptions: AHashMap::new(),
        };
        for exc_type in ExcType::iter() {
            classes.exception_class(heap, exc_type);
        }
        classes
    }

    fn exception_class(&mut self, heap: &mut Heap, exc_type: ExcType) -> HeapId {
        if let Some(id) = self.exceptions.get(&exc_type) {
            return *id;
        }
        let base = match exc_type.parent() {
            Some(parent) => self.exception_class(heap, parent),
            None => self.object,
        };
        let mut class = ClassObject::builtin(exc_type.into(), vec![base], Some(exc_type));
        if exc_type == ExcType::BaseException {
            class.namespace.insert(
                "__init__".to_owned(),
                Value::Builtin(Builtins::Function(BuiltinsFunctions::ExceptionInit)),
            );
        }
        let id = alloc_class(heap, class);
        self.exceptions.insert(exc_type, id);
        id
    }

    /// Every builtin class id, for use as collector roots.
    pub fn ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        [self.object, self.type_].into_iter().chain(self.exceptions.values().copied())
    }

    /// The heap class for a builtin exception type.
    pub fn exception(&self, exc_type: ExcType) -> HeapId {
        self.exceptions.get(&exc_type).copied().unwrap_or(self.object)
    }
}

/// Allocates a builtin class and fills in its MRO from its single base.
fn alloc_class(heap: &mut Heap, class: ClassObject) -> HeapId {
    let base_mro = match class.bases.first() {
        Some(base) => match heap.get(*base) {
            HeapData::Class(base) => base.mro.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    let id = heap.allocate_builtin(HeapData::Class(class));
    if let HeapData::Class(cls) = heap.get_mut(id) {
        cls.mro = std::iter::once(id).chain(base_mro).collect();
    }
    id
}

/// Immutable mapping from builtin name to value, consulted after locals and
/// globals, plus the native modules the import resolver checks before the
/// path walk.
#[derive(Debug)]
pub(crate) struct BuiltinRegistry {
    names: AHashMap<&'static str, Value>,
    modules: AHashMap<&'static str, NativeModule>,
}

impl BuiltinRegistry {
    pub fn new(classes: &BuiltinClasses) -> Self {
        let mut names = AHashMap::new();
        for function in BuiltinsFunctions::iter().filter(|f| f.is_global()) {
            names.insert(function.into(), Value::Builtin(Builtins::Function(function)));
        }
        for ty in Type::iter().filter(|t| t.is_constructor()) {
            names.insert(ty.into(), Value::Builtin(Builtins::Type(ty)));
        }
        names.insert("object", Value::Ref(classes.object));
        for (exc_type, id) in &classes.exceptions {
            names.insert((*exc_type).into(), Value::Ref(*id));
        }
        names.insert("NotImplemented", Value::NotImplemented);
        let modules = NativeModule::iter().map(|module| (module.into(), module)).collect();
        Self { names, modules }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.names.get(name).cloned()
    }

    pub fn native_module(&self, name: &str) -> Option<NativeModule> {
        self.modules.get(name).copied()
    }
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Calls a builtin function.
    pub(crate) fn call_builtin(&mut self, function: BuiltinsFunctions, args: ArgValues) -> RunResult<Value> {
        match function {
            BuiltinsFunctions::Abs => self.builtin_abs(args),
            BuiltinsFunctions::All => self.builtin_all_any(args, true),
            BuiltinsFunctions::Any => self.builtin_all_any(args, false),
            BuiltinsFunctions::Callable => self.builtin_callable(args),
            BuiltinsFunctions::Chr => self.builtin_chr(args),
            BuiltinsFunctions::Classmethod => self.builtin_wrapper(args, "classmethod", HeapData::ClassMethod),
            BuiltinsFunctions::Enumerate => self.builtin_enumerate(args),
            BuiltinsFunctions::Getattr => self.builtin_getattr(args),
            BuiltinsFunctions::Hasattr => self.builtin_hasattr(args),
            BuiltinsFunctions::Hash => self.builtin_hash(args),
            BuiltinsFunctions::Id => self.builtin_id(args),
            BuiltinsFunctions::Isinstance => self.builtin_isinstance(args),
            BuiltinsFunctions::Issubclass => self.builtin_issubclass(args),
            BuiltinsFunctions::Iter => {
                let value = args.get_one_arg("iter")?;
                self.get_iter(value)
            }
            BuiltinsFunctions::Len => {
                let value = args.get_one_arg("len")?;
                Ok(Value::Int(self.len_of(&value)? as i64))
            }
            BuiltinsFunctions::Max => self.builtin_min_max(args, "max"),
            BuiltinsFunctions::Min => self.builtin_min_max(args, "min"),
            BuiltinsFunctions::Next => self.builtin_next(args),
            BuiltinsFunctions::Ord => self.builtin_ord(args),
            BuiltinsFunctions::Print => self.builtin_print(args),
            BuiltinsFunctions::Property => self.builtin_wrapper(args, "property", HeapData::Property),
            BuiltinsFunctions::Repr => {
                let value = args.get_one_arg("repr")?;
                Ok(Value::str(&self.repr_value(&value)?))
            }
            BuiltinsFunctions::Reversed => self.builtin_reversed(args),
            BuiltinsFunctions::Setattr => self.builtin_setattr(args),
            BuiltinsFunctions::Sorted => self.builtin_sorted(args),
            BuiltinsFunctions::Staticmethod => self.builtin_wrapper(args, "staticmethod", HeapData::StaticMethod),
            BuiltinsFunctions::Sum => self.builtin_sum(args),
            BuiltinsFunctions::Super => self.builtin_super(args),
            BuiltinsFunctions::Zip => self.builtin_zip(args),
            BuiltinsFunctions::BuildClass => self.builtin_build_class(args),
            BuiltinsFunctions::ObjectInit => self.builtin_object_init(args),
            BuiltinsFunctions::ObjectNew => self.builtin_object_new(args),
            BuiltinsFunctions::ExceptionInit => self.builtin_exception_init(args),
            BuiltinsFunctions::TypeCall => {
                let mut args = args;
                if args.positional.is_empty() {
                    return Err(ExcType::type_error("descriptor '__call__' of 'type' object needs an argument"));
                }
                let cls = args.positional.remove(0);
                match cls {
                    Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) => self.instantiate(id, args),
                    other => self.call_value(other, args),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn builtin_names_round_trip() {
        assert_eq!(BuiltinsFunctions::from_str("isinstance").unwrap(), BuiltinsFunctions::Isinstance);
        assert_eq!(BuiltinsFunctions::BuildClass.to_string(), "__build_class__");
        assert_eq!(Builtins::Type(Type::Int).name(), "int");
    }

    #[test]
    fn exception_classes_follow_the_hierarchy() {
        let mut heap = Heap::new(None);
        let classes = BuiltinClasses::new(&mut heap);
        let not_found = classes.exceptions[&ExcType::ModuleNotFoundError];
        let import_error = classes.exceptions[&ExcType::ImportError];
        let HeapData::Class(cls) = heap.get(not_found) else { unreachable!() };
        assert_eq!(cls.mro[1], import_error);
        assert_eq!(*cls.mro.last().unwrap(), classes.object);
        let registry = BuiltinRegistry::new(&classes);
        assert!(registry.get("ValueError").is_some());
        assert!(registry.get("object.__init__").is_none());
        assert_eq!(registry.native_module("sys"), Some(NativeModule::Sys));
        assert_eq!(registry.native_module("os"), None);
    }
}
