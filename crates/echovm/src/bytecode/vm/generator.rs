//! Generator resumption.
//!
//! A generator's frame is checked out of the heap for the duration of a
//! resumption, so a generator that tries to resume itself finds it
//! `Running` and fails instead of aliasing the frame.

use super::FrameExit;
use crate::{
    exception_private::{ExcType, ExceptionRaise, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::GeneratorState,
    value::Value,
};

/// How a generator is resumed.
#[derive(Debug)]
pub(crate) enum Resume {
    /// `next()` (with `None`) or `send(value)`.
    Send(Value),
    /// `throw(exc)`: the error is raised at the suspension point.
    Throw(RunError),
}

/// Outcome of one resumption.
#[derive(Debug)]
pub(crate) enum GeneratorStep {
    Yielded(Value),
    /// The body returned; the generator is finished.
    Returned(Value),
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Runs the generator until its next yield or until it finishes.
    pub(crate) fn resume_generator(&mut self, id: HeapId, resume: Resume) -> RunResult<GeneratorStep> {
        let HeapData::Generator(generator) = self.heap.get(id) else {
            return Err(RunError::internal("resume_generator on a non-generator"));
        };
        let state = generator.state;
        match state {
            GeneratorState::Running => return Err(ExcType::value_error("generator already executing")),
            GeneratorState::Finished => {
                return match resume {
                    Resume::Send(_) => Ok(GeneratorStep::Returned(Value::None)),
                    Resume::Throw(err) => Err(err),
                };
            }
            GeneratorState::Created => {
                if let Resume::Send(value) = &resume
                    && !value.is_none()
                {
                    return Err(ExcType::type_error(
                        "can't send non-None value to a just-started generator",
                    ));
                }
            }
            GeneratorState::Suspended => {}
        }
        let name = generator.qualname.clone();
        self.enter_frame(&name)?;

        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            self.leave_frame();
            return Err(RunError::internal("generator changed kind"));
        };
        let Some(mut frame) = generator.frame.take() else {
            self.leave_frame();
            return Err(RunError::internal("suspended generator has no frame"));
        };
        generator.state = GeneratorState::Running;

        let injected = match resume {
            Resume::Send(value) => {
                if state == GeneratorState::Suspended {
                    frame.stack.push(value);
                }
                None
            }
            Resume::Throw(err) => Some(err),
        };
        let result = self.run_frame(&mut frame, injected);
        self.leave_frame();

        let result = match result {
            Err(err) if self.error_matches(&err, ExcType::StopIteration) => {
                Err(ExcType::runtime_error("generator raised StopIteration"))
            }
            other => other,
        };
        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            return Err(RunError::internal("generator changed kind"));
        };
        match result {
            Ok(FrameExit::Yield(value)) => {
                generator.frame = Some(frame);
                generator.state = GeneratorState::Suspended;
                Ok(GeneratorStep::Yielded(value))
            }
            Ok(FrameExit::Return(value)) => {
                generator.state = GeneratorState::Finished;
                Ok(GeneratorStep::Returned(value))
            }
            Err(err) => {
                generator.state = GeneratorState::Finished;
                Err(err)
            }
        }
    }

    /// `next(gen)`: `Ok(None)` once the generator is exhausted.
    pub(crate) fn generator_next(&mut self, id: HeapId) -> RunResult<Option<Value>> {
        match self.resume_generator(id, Resume::Send(Value::None))? {
            GeneratorStep::Yielded(value) => Ok(Some(value)),
            GeneratorStep::Returned(_) => Ok(None),
        }
    }

    /// `gen.send(value)`; exhaustion raises StopIteration carrying the return value.
    pub(crate) fn generator_send(&mut self, id: HeapId, value: Value) -> RunResult<Value> {
        match self.resume_generator(id, Resume::Send(value))? {
            GeneratorStep::Yielded(value) => Ok(value),
            GeneratorStep::Returned(value) => Err(self.stop_iteration_with(value)),
        }
    }

    /// `gen.throw(exc)`.
    pub(crate) fn generator_throw(&mut self, id: HeapId, exc: Value) -> RunResult<Value> {
        let exc_id = self.exception_from_value(exc)?;
        let err = ExceptionRaise::from_object(exc_id).into();
        match self.resume_generator(id, Resume::Throw(err))? {
            GeneratorStep::Yielded(value) => Ok(value),
            GeneratorStep::Returned(value) => Err(self.stop_iteration_with(value)),
        }
    }

    /// `gen.close()`: raises GeneratorExit at the suspension point.
    pub(crate) fn generator_close(&mut self, id: HeapId) -> RunResult<()> {
        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            return Err(RunError::internal("generator_close on a non-generator"));
        };
        match generator.state {
            GeneratorState::Created | GeneratorState::Finished => {
                generator.state = GeneratorState::Finished;
                generator.frame = None;
                return Ok(());
            }
            GeneratorState::Running => return Err(ExcType::value_error("generator already executing")),
            GeneratorState::Suspended => {}
        }
        let exit = SimpleException::new(ExcType::GeneratorExit, None).into();
        match self.resume_generator(id, Resume::Throw(exit)) {
            Ok(GeneratorStep::Yielded(_)) => Err(ExcType::runtime_error("generator ignored GeneratorExit")),
            Ok(GeneratorStep::Returned(_)) => Ok(()),
            Err(err) if self.error_matches(&err, ExcType::GeneratorExit) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn stop_iteration_with(&mut self, value: Value) -> RunError {
        if value.is_none() {
            ExcType::stop_iteration()
        } else {
            self.raise_with_args(ExcType::StopIteration, vec![value])
        }
    }
}
