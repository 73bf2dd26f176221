/// Structured types for heap-resident guest values.
///
/// Every kind of object that lives in the arena has its struct here; the
/// behavior that needs the whole interpreter (calls, attribute binding,
/// iteration of generators) lives with the VM.
pub mod class;
pub mod dict;
pub mod function;
pub mod generator;
pub mod iter;
pub mod module;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

pub(crate) use class::{ClassObject, Instance, SuperProxy, compute_c3_mro};
pub(crate) use dict::{Dict, Set};
pub(crate) use function::{BoundMethod, Function};
pub(crate) use generator::{Generator, GeneratorState};
pub(crate) use iter::{Range, ValueIter};
pub(crate) use module::{Module, ModuleState};

use crate::value::Value;

/// Ordered string-keyed attribute storage shared by modules, classes and instances.
pub(crate) type Namespace = indexmap::IndexMap<String, Value, ahash::RandomState>;

/// Creates an empty [`Namespace`].
pub(crate) fn new_namespace() -> Namespace {
    Namespace::with_hasher(ahash::RandomState::new())
}

/// Type tag of a guest value.
///
/// Builtin types are dispatched on this tag; the constructible ones double as
/// callable builtins (`int(...)`, `list(...)`). User classes report
/// [`Type::Object`] and carry their real name on the heap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Type {
    #[strum(serialize = "NoneType")]
    NoneType,
    #[strum(serialize = "NotImplementedType")]
    NotImplementedType,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Type,
    /// Instances of user-defined classes.
    Object,
    Iterator,
    Module,
    Function,
    Method,
    #[strum(serialize = "builtin_function_or_method")]
    BuiltinFunction,
    Cell,
    Generator,
    Super,
    #[strum(serialize = "staticmethod")]
    StaticMethod,
    #[strum(serialize = "classmethod")]
    ClassMethod,
    Property,
    Code,
}

impl Type {
    /// Whether calling this type constructs a value (and so it is bound in the builtin registry).
    #[must_use]
    pub fn is_constructor(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Int
                | Self::Float
                | Self::Str
                | Self::Bytes
                | Self::List
                | Self::Tuple
                | Self::Dict
                | Self::Set
                | Self::Range
                | Self::Type
        )
    }
}
