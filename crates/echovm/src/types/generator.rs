//! Generator objects: a function frame kept alive between resumptions.
//!
//! Calling a generator function binds its arguments into a fresh frame and
//! stores that frame here instead of running it. Each resumption takes the
//! frame out of the heap, runs it until the next `YieldValue` or return, and
//! puts it back.

use crate::bytecode::CallFrame;

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeneratorState {
    /// Created but the body has not started.
    Created,
    /// Currently executing; the frame is checked out of the heap.
    Running,
    /// Suspended at a `YieldValue`.
    Suspended,
    /// Returned or raised; the frame has been dropped.
    Finished,
}

#[derive(Debug)]
pub(crate) struct Generator {
    pub qualname: String,
    pub state: GeneratorState,
    /// `None` while running and after finishing.
    pub frame: Option<Box<CallFrame>>,
}

impl Generator {
    pub fn new(qualname: String, frame: CallFrame) -> Self {
        Self {
            qualname,
            state: GeneratorState::Created,
            frame: Some(Box::new(frame)),
        }
    }
}
