//! VM execution tracing infrastructure.
//!
//! Provides a trait-based tracing system for the interpreter with zero-cost abstraction.
//! When using [`NoopTracer`], all trace methods compile away entirely via monomorphization.
//!
//! # Architecture
//!
//! The [`VmTracer`] trait defines hook points at key execution events (instruction dispatch,
//! function calls/returns, exception handlers, import resolution steps). Concrete
//! implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution and import log to stderr |
//! | [`RecordingTracer`] | Full event recording for tests or post-mortem |
//!
//! Tracing is purely observational: no hook can change what the interpreter does.
//!
//! # Usage
//!
//! ```ignore
//! // Production (zero overhead):
//! let mut interp = Interpreter::new(config, source);
//!
//! // Debugging imports:
//! let tracer = StderrTracer::new().instructions(false).imports(true);
//! let mut interp = Interpreter::with_parts(config, source, StdPrint::default(), tracer);
//! ```

use std::{fmt, path::PathBuf};

use crate::bytecode::Opcode;

/// One step of import resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    /// An `ImportName` (or host `import`) request entered the resolver.
    Request {
        name: String,
        level: u32,
        fromlist: Vec<String>,
        importer: Option<String>,
    },
    /// A relative request was anchored to the importer's package.
    RelativeBase { importer: String, level: u32, base: String },
    /// The fully qualified name was already in the module cache.
    CacheHit { fqn: String },
    /// A directory is being probed for the next component.
    Search { fqn: String, dir: PathBuf },
    /// The component was found; `package` marks an `__init__` file.
    Found { fqn: String, file: PathBuf, package: bool },
    /// No directory satisfied the component.
    NotFound { fqn: String },
    /// A native module was created; it has no body.
    Native { fqn: String },
    /// The module body is about to run.
    Execute { fqn: String },
    /// The module body completed.
    Ready { fqn: String },
    /// The module body raised.
    Failed { fqn: String },
    /// A submodule was bound as an attribute of its parent package.
    BindAttribute { parent: String, name: String },
    /// A fromlist name was resolved, either as an existing attribute or as a submodule.
    Fromlist { module: String, name: String, submodule: bool },
}

impl fmt::Display for ImportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request {
                name,
                level,
                fromlist,
                importer,
            } => {
                write!(f, "import {}{name}", ".".repeat(*level as usize))?;
                if !fromlist.is_empty() {
                    write!(f, " fromlist=[{}]", fromlist.join(", "))?;
                }
                if let Some(importer) = importer {
                    write!(f, " from {importer}")?;
                }
                Ok(())
            }
            Self::RelativeBase { importer, level, base } => {
                write!(f, "relative level={level} in {importer} -> base '{base}'")
            }
            Self::CacheHit { fqn } => write!(f, "cache hit {fqn}"),
            Self::Search { fqn, dir } => write!(f, "search {fqn} in {}", dir.display()),
            Self::Found { fqn, file, package } => {
                let kind = if *package { "package" } else { "module" };
                write!(f, "found {kind} {fqn} at {}", file.display())
            }
            Self::NotFound { fqn } => write!(f, "not found {fqn}"),
            Self::Native { fqn } => write!(f, "native {fqn}"),
            Self::Execute { fqn } => write!(f, "execute {fqn}"),
            Self::Ready { fqn } => write!(f, "ready {fqn}"),
            Self::Failed { fqn } => write!(f, "failed {fqn}"),
            Self::BindAttribute { parent, name } => write!(f, "bind {parent}.{name}"),
            Self::Fromlist {
                module,
                name,
                submodule,
            } => {
                let how = if *submodule { "submodule" } else { "attribute" };
                write!(f, "fromlist {module}:{name} as {how}")
            }
        }
    }
}

/// Trace event emitted during execution.
///
/// Used by [`RecordingTracer`] to capture a full execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An opcode was dispatched at the given instruction index.
    Instruction {
        ip: usize,
        opcode: Opcode,
        /// Value stack depth at the time of dispatch.
        stack_depth: usize,
    },
    /// A guest frame was entered.
    Call {
        func_name: Option<String>,
        /// Frame depth after the push.
        depth: usize,
    },
    /// A guest frame returned or raised.
    Return { depth: usize },
    /// An exception handler was entered.
    ExceptionPush { depth: usize },
    /// An exception handler was left.
    ExceptionPop { depth: usize },
    Import(ImportEvent),
}

/// Trait for execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code and compiles to zero instructions. Implementations only
/// override the hooks they care about.
///
/// The interpreter carries the tracer as a type parameter `Tr: VmTracer`, so
/// the compiler can inline and eliminate no-op calls at compile time.
pub trait VmTracer: fmt::Debug {
    /// Whether [`VmTracer::on_stack_dump`] should be fed. Rendering the value
    /// stack on every instruction is expensive, so it is only done on request.
    const WANTS_STACK: bool = false;

    /// Whether [`VmTracer::on_import`] should be fed. Events own their
    /// strings, so they are only built on request.
    const WANTS_IMPORTS: bool = false;

    /// Called before each opcode dispatch in the main execution loop.
    ///
    /// This is the hottest hook, called for every single instruction.
    ///
    /// # Arguments
    /// * `ip` - Index of the instruction in the code unit
    /// * `opcode` - The opcode about to be executed
    /// * `stack_depth` - Number of values on the frame's value stack
    /// * `frame_depth` - Number of nested guest frames
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called after [`VmTracer::on_instruction`] with the rendered value stack,
    /// bottom first, when `WANTS_STACK` is set.
    #[inline(always)]
    fn on_stack_dump(&mut self, _stack: &[String]) {}

    /// Called when a guest frame is pushed (function call, module or class body).
    ///
    /// # Arguments
    /// * `func_name` - Code unit name
    /// * `depth` - Frame depth after the push
    #[inline(always)]
    fn on_call(&mut self, _func_name: Option<&str>, _depth: usize) {}

    /// Called when a guest frame is popped.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a new exception handler is entered.
    ///
    /// # Arguments
    /// * `depth` - Handled-exception stack depth after the push
    #[inline(always)]
    fn on_exception_push(&mut self, _depth: usize) {}

    /// Called when an exception handler is exited.
    #[inline(always)]
    fn on_exception_pop(&mut self, _depth: usize) {}

    /// Called for each import resolution step when `WANTS_IMPORTS` is set.
    #[inline(always)]
    fn on_import(&mut self, _event: &ImportEvent) {}
}

// ============================================================================
// NoopTracer — zero-cost production default
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer — human-readable execution log
// ============================================================================

/// Tracer that prints a human-readable log to stderr.
///
/// Output format:
/// ```text
/// [    0] LoadConst         stack=0  frames=1
///         stack: [None]
///   >>> CALL helper         depth=2
///   ::: import pkg.mod from __main__
///   ::: found module pkg.mod at /lib/pkg/mod.py
///   <<< RETURN              depth=1
/// ```
///
/// Instruction and import output are toggled independently.
#[derive(Debug)]
pub struct StderrTracer {
    instructions: bool,
    imports: bool,
    /// Maximum number of instructions to trace before stopping. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    /// Creates a tracer with instruction and import output enabled and no limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instructions: true,
            imports: true,
            limit: None,
            count: 0,
            stopped: false,
        }
    }

    /// Creates a tracer that stops instruction output after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn instructions(mut self, enabled: bool) -> Self {
        self.instructions = enabled;
        self
    }

    #[must_use]
    pub fn imports(mut self, enabled: bool) -> Self {
        self.imports = enabled;
        self
    }

    fn exec_enabled(&self) -> bool {
        self.instructions && !self.stopped
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracer for StderrTracer {
    const WANTS_STACK: bool = true;
    const WANTS_IMPORTS: bool = true;

    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if !self.exec_enabled() {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:<17} stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_stack_dump(&mut self, stack: &[String]) {
        if !self.exec_enabled() || stack.is_empty() {
            return;
        }
        eprintln!("        stack: [{}]", stack.join(", "));
    }

    fn on_call(&mut self, func_name: Option<&str>, depth: usize) {
        if !self.exec_enabled() {
            return;
        }
        let name = func_name.unwrap_or("<anonymous>");
        eprintln!("  >>> CALL {name:<20} depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        if !self.exec_enabled() {
            return;
        }
        eprintln!("  <<< RETURN              depth={depth}");
    }

    fn on_exception_push(&mut self, depth: usize) {
        if !self.exec_enabled() {
            return;
        }
        eprintln!("  !!! EXCEPT enter        handling={depth}");
    }

    fn on_exception_pop(&mut self, depth: usize) {
        if !self.exec_enabled() {
            return;
        }
        eprintln!("  !!! EXCEPT leave        handling={depth}");
    }

    fn on_import(&mut self, event: &ImportEvent) {
        if self.imports {
            eprintln!("  ::: {event}");
        }
    }
}

// ============================================================================
// RecordingTracer — full event recording
// ============================================================================

/// Tracer that records every event.
///
/// The most expensive tracer (allocates per event), so use it only for tests
/// or for recording short executions.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    /// Optional limit on number of events recorded.
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Recorded import events, in order.
    pub fn import_events(&self) -> impl Iterator<Item = &ImportEvent> {
        self.events.iter().filter_map(|event| match event {
            TraceEvent::Import(event) => Some(event),
            _ => None,
        })
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl VmTracer for RecordingTracer {
    const WANTS_IMPORTS: bool = true;

    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Instruction {
            ip,
            opcode,
            stack_depth,
        });
    }

    fn on_call(&mut self, func_name: Option<&str>, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.map(String::from),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_exception_push(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPush { depth });
    }

    fn on_exception_pop(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPop { depth });
    }

    fn on_import(&mut self, event: &ImportEvent) {
        self.record(TraceEvent::Import(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_respects_limit() {
        let mut tracer = RecordingTracer::with_limit(2);
        tracer.on_call(Some("f"), 1);
        tracer.on_return(0);
        tracer.on_return(0);
        assert_eq!(tracer.events().len(), 2);
    }

    #[test]
    fn import_events_render_readably() {
        let event = ImportEvent::Request {
            name: "mod".to_owned(),
            level: 2,
            fromlist: vec!["x".to_owned()],
            importer: Some("pkg.sub.a".to_owned()),
        };
        assert_eq!(event.to_string(), "import ..mod fromlist=[x] from pkg.sub.a");
    }
}
