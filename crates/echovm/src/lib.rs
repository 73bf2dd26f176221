//! A bytecode interpreter for a Python-like guest language.
//!
//! The crate consumes pre-compiled code units (see [`Code`]) produced by an external
//! front end and executes them against an arena-backed object model. The import
//! system reproduces the modeled language's rules: a process-wide module cache,
//! greedy per-component path walking, relative imports bounded by the importer's
//! package, circular-import partial visibility and package attribute injection.
//!
//! ```ignore
//! use echovm::{FileSystemSource, Interpreter, InterpreterConfig};
//!
//! let config = InterpreterConfig::new().with_search_path_from_env();
//! let mut interp = Interpreter::new(config, FileSystemSource::default());
//! interp.run_main("app/main.py")?;
//! ```
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the guest language")]
#![expect(clippy::needless_pass_by_value, reason = "call APIs pass values consistently")]
#![expect(clippy::float_cmp, reason = "guest float equality is exact")]
// first, everything else stores values in it
mod heap;

mod args;
mod builtins;
mod bytecode;
mod config;
mod exception_private;
mod exception_public;
mod import;
mod interpreter;
mod io;
mod object;
mod resource;
mod source;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{
        BinaryOp, Code, CodeBuilder, CodeFlags, CompareOp, Const, ISA_VERSION, Instruction, Label, MIN_ISA_VERSION,
        Opcode, OperandKind, UnaryOp, parse_listing,
    },
    config::{InterpreterConfig, SEARCH_PATH_ENV, SearchPath},
    exception_private::ExcType,
    exception_public::{Exception, StackFrame},
    heap::HeapStats,
    interpreter::Interpreter,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::Object,
    resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceError, ResourceLimits},
    source::{CodeUnitFrontend, FileSystemSource, Frontend, LoadError, MemorySource, ModuleSource},
    tracer::{ImportEvent, NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
};
