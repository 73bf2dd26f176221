use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{heap::HeapId, resource::ResourceError, source::LoadError};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Builtin exception classes known to the interpreter.
///
/// Each variant is materialized once as a heap class when the interpreter is
/// constructed, so guest code can subclass them and `except` clauses match
/// through the ordinary MRO walk. The string form matches the variant name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum ExcType {
    /// Root of the hierarchy.
    BaseException,
    /// Base for every ordinary exception.
    Exception,
    /// Thrown into a generator by `close()`; inherits from BaseException.
    GeneratorExit,

    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    LookupError,
    IndexError,
    KeyError,

    RuntimeError,
    NotImplementedError,
    RecursionError,

    AttributeError,
    NameError,
    /// Subclass of NameError for locals read before assignment.
    UnboundLocalError,

    /// Import failures: beyond-top-level relative imports and missing fromlist names.
    ImportError,
    /// Subclass of ImportError raised when a dotted component cannot be found.
    ModuleNotFoundError,

    AssertionError,
    MemoryError,
    StopIteration,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Returns the direct base class of this exception type.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception | Self::GeneratorExit => Some(Self::BaseException),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::ModuleNotFoundError => Some(Self::ImportError),
            Self::ArithmeticError
            | Self::LookupError
            | Self::RuntimeError
            | Self::AttributeError
            | Self::NameError
            | Self::ImportError
            | Self::AssertionError
            | Self::MemoryError
            | Self::StopIteration
            | Self::TypeError
            | Self::ValueError => Some(Self::Exception),
        }
    }

    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == handler_type {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }

    /// Creates a `TypeError` with the given message.
    pub(crate) fn type_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    /// Creates a `ValueError` with the given message.
    pub(crate) fn value_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    /// Creates an `AttributeError` in the form `'type' object has no attribute 'name'`.
    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
        .into()
    }

    /// Creates an `AttributeError` for a missing module attribute.
    pub(crate) fn module_attribute_error(module: &str, attr: &str) -> RunError {
        SimpleException::new_msg(Self::AttributeError, format!("module '{module}' has no attribute '{attr}'")).into()
    }

    /// Creates a `NameError` for an unresolved global or builtin.
    pub(crate) fn name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined")).into()
    }

    /// Creates an `UnboundLocalError` for a local read before assignment.
    pub(crate) fn unbound_local(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
        .into()
    }

    /// Creates a `NameError` for a free variable whose enclosing cell is still empty.
    pub(crate) fn unbound_free(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::NameError,
            format!("free variable '{name}' referenced before assignment in enclosing scope"),
        )
        .into()
    }

    /// Creates a `TypeError` for an operation with no dispatch entry for its operand types.
    pub(crate) fn unsupported_operand(symbol: &str, lhs: &str, rhs: &str) -> RunError {
        Self::type_error(format!("unsupported operand type(s) for {symbol}: '{lhs}' and '{rhs}'"))
    }

    /// Creates a `ZeroDivisionError` with the given message.
    pub(crate) fn zero_division(msg: &'static str) -> RunError {
        SimpleException::new_msg(Self::ZeroDivisionError, msg).into()
    }

    /// Creates an `OverflowError` for integer arithmetic that leaves the i64 range.
    pub(crate) fn int_overflow() -> RunError {
        SimpleException::new_msg(Self::OverflowError, "integer overflow").into()
    }

    /// Creates a `TypeError` for an object that cannot be called.
    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    /// Creates a `TypeError` for an object that cannot be iterated.
    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    /// Creates a `TypeError` for an unhashable dict key or set member.
    pub(crate) fn unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    /// Creates an `IndexError` in the form `list index out of range`.
    pub(crate) fn index_error(type_name: &str) -> RunError {
        SimpleException::new_msg(Self::IndexError, format!("{type_name} index out of range")).into()
    }

    /// Creates a `ModuleNotFoundError` for an unresolved dotted component.
    pub(crate) fn module_not_found(fqn: &str) -> RunError {
        SimpleException::new_msg(Self::ModuleNotFoundError, format!("No module named '{fqn}'")).into()
    }

    /// Creates the beyond-top-level relative import error.
    ///
    /// Kept as a plain `ImportError` so it is distinguishable from the
    /// `ModuleNotFoundError` raised for a missing component.
    pub(crate) fn beyond_top_level() -> RunError {
        SimpleException::new_msg(Self::ImportError, "attempted relative import beyond top-level package").into()
    }

    /// Creates the `ImportError` for a fromlist name that is neither an attribute nor a submodule.
    pub(crate) fn cannot_import_name(name: &str, module: &str, file: Option<&str>) -> RunError {
        let msg = match file {
            Some(file) => format!("cannot import name '{name}' from '{module}' ({file})"),
            None => format!("cannot import name '{name}' from '{module}' (unknown location)"),
        };
        SimpleException::new_msg(Self::ImportError, msg).into()
    }

    /// Creates a `RuntimeError` with the given message.
    pub(crate) fn runtime_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::RuntimeError, msg).into()
    }

    /// Creates a `StopIteration` with no value.
    pub(crate) fn stop_iteration() -> RunError {
        SimpleException::new(Self::StopIteration, None).into()
    }
}

/// Simple lightweight representation of an exception.
///
/// Native code raises these without touching the heap; they are turned into
/// instances of the builtin exception classes only when a guest handler
/// catches them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SimpleException {
    exc_type: ExcType,
    message: Option<String>,
}

impl SimpleException {
    /// Creates a new exception with the given type and optional message.
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self { exc_type, message }
    }

    /// Creates a new exception with a message.
    #[must_use]
    pub fn new_msg(exc_type: ExcType, message: impl fmt::Display) -> Self {
        Self::new(exc_type, Some(message.to_string()))
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.exc_type),
            None => write!(f, "{}", self.exc_type),
        }
    }
}

/// One traceback entry, recorded as an exception leaves a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TracebackEntry {
    /// Fully qualified name of the module owning the frame's code.
    pub module: String,
    /// File the code unit came from, empty for in-memory units.
    pub filename: String,
    /// Code unit name (`<module>` for module bodies).
    pub name: String,
    pub line: u32,
    /// Source text of `line`, when the code unit carried its source.
    pub preview: Option<String>,
}

/// The raised payload: either a lightweight native exception or a heap instance.
#[derive(Debug, Clone)]
pub(crate) enum ExcValue {
    Simple(SimpleException),
    Object(HeapId),
}

/// A raised exception together with the traceback accumulated so far.
///
/// `traceback` is ordered innermost first; the public conversion reverses it
/// into "most recent call last" order.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionRaise {
    pub value: ExcValue,
    pub traceback: Vec<TracebackEntry>,
    /// Set by a re-raise: the raising frame's entry is already in `traceback`.
    pub frame_recorded: bool,
}

impl ExceptionRaise {
    /// Wraps a heap exception instance raised fresh (empty traceback).
    pub fn from_object(id: HeapId) -> Self {
        Self {
            value: ExcValue::Object(id),
            traceback: Vec::new(),
            frame_recorded: false,
        }
    }

    /// Adds a caller's frame as the outermost entry of the traceback.
    pub fn add_caller_frame(&mut self, entry: TracebackEntry) {
        self.traceback.push(entry);
    }
}

impl From<SimpleException> for ExceptionRaise {
    fn from(exc: SimpleException) -> Self {
        Self {
            value: ExcValue::Simple(exc),
            traceback: Vec::new(),
            frame_recorded: false,
        }
    }
}

/// Runtime error types that can occur during execution.
///
/// Three variants:
/// - `Exc`: guest exception, catchable by handlers
/// - `Load`: a code unit failed to load or validate while importing; not catchable
/// - `Internal`: a broken bytecode contract or interpreter bug; not catchable
#[derive(Debug)]
pub(crate) enum RunError {
    Exc(Box<ExceptionRaise>),
    Load(Box<LoadError>),
    Internal(Cow<'static, str>),
}

impl From<ExceptionRaise> for RunError {
    fn from(exc: ExceptionRaise) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc.into()))
    }
}

impl From<LoadError> for RunError {
    fn from(err: LoadError) -> Self {
        Self::Load(Box::new(err))
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc_type = match err {
            ResourceError::Allocation { .. } => ExcType::MemoryError,
            ResourceError::Recursion { .. } => ExcType::RecursionError,
        };
        SimpleException::new_msg(exc_type, err).into()
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error is a lightweight native exception of exactly `exc_type`.
    ///
    /// Heap instances need the interpreter to inspect; see `Interpreter::error_matches`.
    #[cfg(test)]
    pub fn is_simple_exception(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(raise) => matches!(&raise.value, ExcValue::Simple(exc) if exc.exc_type() == exc_type),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn module_not_found_is_an_import_error() {
        assert!(ExcType::ModuleNotFoundError.is_subclass_of(ExcType::ImportError));
        assert!(ExcType::ModuleNotFoundError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::ImportError.is_subclass_of(ExcType::ModuleNotFoundError));
    }

    #[test]
    fn generator_exit_is_not_an_exception() {
        assert!(!ExcType::GeneratorExit.is_subclass_of(ExcType::Exception));
        assert!(ExcType::GeneratorExit.is_subclass_of(ExcType::BaseException));
    }

    #[test]
    fn names_round_trip_through_strum() {
        assert_eq!(ExcType::from_str("KeyError").unwrap(), ExcType::KeyError);
        assert_eq!(ExcType::UnboundLocalError.to_string(), "UnboundLocalError");
    }
}
