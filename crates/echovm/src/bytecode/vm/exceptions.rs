//! Exception raising, handler lookup and traceback recording.

use super::{Block, BlockKind, CallFrame};
use crate::{
    args::ArgValues,
    exception_private::{ExcType, ExcValue, ExceptionRaise, RunError, RunResult, TracebackEntry},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{Instance, class::is_subclass},
    value::Value,
};

/// An exception a handler is currently running for.
///
/// The traceback is kept with it so a re-raise continues from the entries
/// recorded when it was first caught.
#[derive(Debug, Clone)]
pub(crate) struct CaughtException {
    pub value: HeapId,
    pub traceback: Vec<TracebackEntry>,
    /// Call depth of the frame whose handler caught it.
    pub depth: usize,
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Transfers control to the innermost handler for `err`, or fails the frame.
    ///
    /// Returns `Ok(())` when a handler was entered; the frame resumes at the
    /// handler with the exception instance on top of the stack. Otherwise the
    /// frame's traceback entry is appended and the error is returned.
    pub(super) fn unwind(&mut self, frame: &mut CallFrame, err: RunError) -> RunResult<()> {
        let RunError::Exc(mut raise) = err else {
            return Err(err);
        };
        while let Some(block) = frame.blocks.pop() {
            match block.kind {
                BlockKind::Loop => {}
                BlockKind::ExceptHandler => self.pop_handled(frame),
                BlockKind::Except | BlockKind::Finally => {
                    frame.stack.truncate(block.depth);
                    if !raise.frame_recorded {
                        raise.add_caller_frame(self.frame_entry(frame));
                    }
                    let id = self.materialize(&mut raise)?;
                    self.handled.push(CaughtException {
                        value: id,
                        traceback: std::mem::take(&mut raise.traceback),
                        depth: self.depth,
                    });
                    self.tracer.on_exception_push(self.handled.len());
                    frame.blocks.push(Block {
                        kind: BlockKind::ExceptHandler,
                        handler: block.handler,
                        depth: block.depth,
                    });
                    frame.stack.push(Value::Ref(id));
                    frame.ip = block.handler;
                    return Ok(());
                }
            }
        }
        if raise.frame_recorded {
            raise.frame_recorded = false;
        } else {
            raise.add_caller_frame(self.frame_entry(frame));
        }
        Err(RunError::Exc(raise))
    }

    /// Drops the frame's innermost handled exception, restoring the one before it.
    pub(super) fn pop_handled(&mut self, frame: &CallFrame) {
        if self.handled.len() > frame.handled_base {
            self.handled.pop();
            self.tracer.on_exception_pop(self.handled.len());
        }
    }

    /// `RaiseVarargs`: builds the error to raise.
    pub(super) fn raise_varargs(&mut self, frame: &mut CallFrame, arg: u32) -> RunResult<RunError> {
        match arg {
            0 => self.reraise(),
            1 => {
                let exc = frame.pop()?;
                let id = self.exception_from_value(exc)?;
                Ok(ExceptionRaise::from_object(id).into())
            }
            2 => {
                let cause = frame.pop()?;
                let exc = frame.pop()?;
                let id = self.exception_from_value(exc)?;
                let cause = if cause.is_none() {
                    Value::None
                } else {
                    Value::Ref(self.exception_from_value(cause)?)
                };
                if let HeapData::Instance(inst) = self.heap.get_mut(id) {
                    inst.attrs.insert("__cause__".to_owned(), cause);
                }
                Ok(ExceptionRaise::from_object(id).into())
            }
            _ => Err(RunError::internal(format!("RaiseVarargs operand {arg} out of range"))),
        }
    }

    /// Re-raises the exception the innermost running handler caught, same
    /// object and same traceback. Handlers in calling frames count, so a
    /// function called from an `except` block can re-raise.
    pub(super) fn reraise(&self) -> RunResult<RunError> {
        let Some(caught) = self.handled.last() else {
            return Err(ExcType::runtime_error("No active exception to reraise"));
        };
        Ok(ExceptionRaise {
            value: ExcValue::Object(caught.value),
            traceback: caught.traceback.clone(),
            frame_recorded: caught.depth == self.depth,
        }
        .into())
    }

    /// Accepts an exception class (instantiated with no arguments) or instance.
    pub(super) fn exception_from_value(&mut self, value: Value) -> RunResult<HeapId> {
        if let Value::Ref(id) = value {
            match self.heap.get(id) {
                HeapData::Class(cls) if cls.exc_type.is_some() => {
                    let instance = self.instantiate(id, ArgValues::empty())?;
                    if let Some(inst_id) = instance.ref_id()
                        && self.exception_type_of(inst_id).is_some()
                    {
                        return Ok(inst_id);
                    }
                    return Err(ExcType::type_error(
                        "calling an exception class should have returned an instance of BaseException",
                    ));
                }
                HeapData::Instance(_) if self.exception_type_of(id).is_some() => return Ok(id),
                _ => {}
            }
        }
        Err(ExcType::type_error("exceptions must derive from BaseException"))
    }

    /// Nearest builtin exception type of an instance, if it is an exception.
    pub(crate) fn exception_type_of(&self, id: HeapId) -> Option<ExcType> {
        let HeapData::Instance(inst) = self.heap.get(id) else {
            return None;
        };
        match self.heap.get(inst.class) {
            HeapData::Class(cls) => cls.exc_type,
            _ => None,
        }
    }

    /// Turns a lightweight exception into a heap instance, in place.
    pub(crate) fn materialize(&mut self, raise: &mut ExceptionRaise) -> RunResult<HeapId> {
        match &raise.value {
            ExcValue::Object(id) => Ok(*id),
            ExcValue::Simple(exc) => {
                let args = exc.message().map(Value::str).into_iter().collect();
                let id = self.new_exception_instance(exc.exc_type(), args)?;
                raise.value = ExcValue::Object(id);
                Ok(id)
            }
        }
    }

    /// Allocates an instance of a builtin exception class with the given `args`.
    pub(crate) fn new_exception_instance(&mut self, exc_type: ExcType, args: Vec<Value>) -> RunResult<HeapId> {
        let class = self.classes.exception(exc_type);
        let args = self.heap.tuple(args)?;
        let mut instance = Instance::new(class);
        instance.attrs.insert("args".to_owned(), args);
        Ok(self.heap.allocate(HeapData::Instance(instance))?)
    }

    /// Builds an error carrying a heap exception, for native raises whose
    /// argument is not a plain message (`KeyError(key)`).
    pub(crate) fn raise_with_args(&mut self, exc_type: ExcType, args: Vec<Value>) -> RunError {
        match self.new_exception_instance(exc_type, args) {
            Ok(id) => ExceptionRaise::from_object(id).into(),
            Err(err) => err,
        }
    }

    /// Whether `err` is a guest exception that `except exc_type:` would catch.
    pub(crate) fn error_matches(&self, err: &RunError, exc_type: ExcType) -> bool {
        let RunError::Exc(raise) = err else {
            return false;
        };
        match &raise.value {
            ExcValue::Simple(exc) => exc.exc_type().is_subclass_of(exc_type),
            ExcValue::Object(id) => self
                .exception_type_of(*id)
                .is_some_and(|t| t.is_subclass_of(exc_type)),
        }
    }

    /// `CompareOp ExceptionMatch`: `exc` against a class or a tuple of classes.
    pub(super) fn exception_matches(&self, exc: &Value, spec: &Value) -> RunResult<bool> {
        let exc_class = match exc {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Instance(inst) => Some(inst.class),
                HeapData::Class(_) => Some(*id),
                _ => None,
            },
            _ => None,
        };
        let Value::Ref(spec_id) = spec else {
            return Err(not_an_exception_class());
        };
        match self.heap.get(*spec_id) {
            HeapData::Class(cls) if cls.exc_type.is_some() => {
                Ok(exc_class.is_some_and(|c| is_subclass(&self.heap, c, *spec_id)))
            }
            HeapData::Tuple(items) => {
                for item in items {
                    if self.exception_matches(exc, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(not_an_exception_class()),
        }
    }

    /// Traceback entry for the frame's current line.
    pub(crate) fn frame_entry(&self, frame: &CallFrame) -> TracebackEntry {
        let module = match self.heap.get(frame.globals) {
            HeapData::Module(m) => m.name.clone(),
            _ => String::new(),
        };
        TracebackEntry {
            module,
            filename: frame.code.filename.clone(),
            name: frame.code.name.clone(),
            line: frame.line,
            preview: frame.code.source_line(frame.line).map(|l| l.trim().to_owned()),
        }
    }
}

fn not_an_exception_class() -> RunError {
    ExcType::type_error("catching classes that do not inherit from BaseException is not allowed")
}
