//! Guest functions and bound methods.

use std::rc::Rc;

use crate::{bytecode::Code, heap::HeapId, value::Value};

/// A function created by `MakeFunction`.
#[derive(Debug)]
pub(crate) struct Function {
    pub code: Rc<Code>,
    pub qualname: String,
    /// Module whose globals the body reads and writes.
    pub globals: HeapId,
    /// Defaults for the last `defaults.len()` positional parameters.
    pub defaults: Vec<Value>,
    pub kwdefaults: Vec<(String, Value)>,
    /// Cells for the code's free variables, in `freevars` order.
    pub closure: Vec<HeapId>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.code.name
    }
}

/// A callable bound to its first argument.
#[derive(Debug, Clone)]
pub(crate) struct BoundMethod {
    pub func: Value,
    pub receiver: Value,
}
