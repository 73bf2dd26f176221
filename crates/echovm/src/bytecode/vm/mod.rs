//! Frame execution for compiled code units.
//!
//! The VM uses a stack-based execution model: each [`CallFrame`] owns its
//! value stack, block stack and instruction pointer. A guest call made by a
//! `CallFunction*` instruction pushes the callee onto the frame stack of the
//! running [`Interpreter::run_frame`] loop instead of recursing on the host
//! stack. Native code that calls back into the guest (special methods,
//! `__init__`, sort keys) starts a nested loop. Generator frames live in the
//! heap between resumptions.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod format;
mod generator;

use std::rc::Rc;

use call::CallStart;
pub(crate) use collections::normalize_index;
pub(crate) use exceptions::CaughtException;

use crate::{
    args::ArgValues,
    builtins::{Builtins, BuiltinsFunctions},
    bytecode::{
        code::Code,
        op::{BinaryOp, CompareOp, Opcode, UnaryOp},
    },
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    import::ImportRequest,
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{Dict, Function, Namespace},
    value::{Value, native_repr},
};

/// Kind of an entry on a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    /// `SetupLoop`: `BreakLoop` jumps to `handler`.
    Loop,
    /// `SetupExcept`: raising inside the range enters `handler`.
    Except,
    /// `SetupFinally`: like `Except`; the cleanup code ends with `Reraise`.
    Finally,
    /// Marks a running exception handler; popped by `PopExcept` or by unwinding.
    ExceptHandler,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    /// Value stack depth to restore when the block is left.
    pub depth: usize,
}

/// Execution record for one module body, class body or function invocation.
#[derive(Debug)]
pub(crate) struct CallFrame {
    pub code: Rc<Code>,
    pub ip: usize,
    pub stack: Vec<Value>,
    pub blocks: Vec<Block>,
    /// Fast locals, indexed like `code.varnames`.
    pub locals: Vec<Value>,
    /// Cell objects: cellvars first, then freevars.
    pub cells: Vec<HeapId>,
    /// Module whose globals `LoadGlobal` and `StoreGlobal` use.
    pub globals: HeapId,
    /// Class-body namespace dict consulted first by the `*Name` opcodes.
    pub namespace: Option<HeapId>,
    /// Length of the interpreter's handled-exception stack when the frame
    /// started running; entries above it belong to this frame.
    pub handled_base: usize,
    /// Handled exceptions of a generator suspended inside a handler.
    pub suspended_handling: Vec<CaughtException>,
    pub line: u32,
}

impl CallFrame {
    pub fn new(code: Rc<Code>, globals: HeapId) -> Self {
        let locals = vec![Value::Undefined; code.varnames.len()];
        let line = code.first_line;
        Self {
            code,
            ip: 0,
            stack: Vec::with_capacity(8),
            blocks: Vec::new(),
            locals,
            cells: Vec::new(),
            globals,
            namespace: None,
            handled_base: 0,
            suspended_handling: Vec::new(),
            line,
        }
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack.pop().ok_or_else(|| stack_underflow(&self.code, self.ip))
    }

    fn peek(&self) -> RunResult<&Value> {
        self.stack.last().ok_or_else(|| stack_underflow(&self.code, self.ip))
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let len = self.stack.len();
        if n > len {
            return Err(stack_underflow(&self.code, self.ip));
        }
        Ok(self.stack.split_off(len - n))
    }

    /// The value `n` slots below the top after the operand was popped (1 = top).
    fn peek_at(&self, n: usize) -> RunResult<&Value> {
        let len = self.stack.len();
        if n == 0 || n > len {
            return Err(stack_underflow(&self.code, self.ip));
        }
        Ok(&self.stack[len - n])
    }
}

fn stack_underflow(code: &Code, ip: usize) -> RunError {
    RunError::internal(format!("value stack underflow in '{}' at {}", code.name, ip.saturating_sub(1)))
}

/// How a frame stopped running.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Value),
    /// A generator frame suspended with the yielded value.
    Yield(Value),
}

/// What the loop does after one instruction.
#[derive(Debug)]
enum Step {
    Continue,
    /// Run a guest callee; its return value lands on the caller's stack.
    Call(CallFrame),
    Exit(FrameExit),
}

/// Operand lookups shared by the dispatch arms.
fn name_at(code: &Code, arg: u32) -> RunResult<&str> {
    code.names
        .get(arg as usize)
        .map(String::as_str)
        .ok_or_else(|| RunError::internal(format!("name index {arg} out of range in '{}'", code.name)))
}

fn local_name(code: &Code, arg: u32) -> &str {
    code.varnames.get(arg as usize).map_or("?", String::as_str)
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Runs `base` until it returns, yields or raises past its last handler.
    ///
    /// Guest callees are pushed onto a local frame stack and run by the same
    /// loop; only `base` may yield. `injected` starts execution by raising
    /// that error at the current instruction; generator `throw()` uses it.
    pub(crate) fn run_frame(&mut self, base: &mut CallFrame, injected: Option<RunError>) -> RunResult<FrameExit> {
        base.handled_base = self.handled.len();
        for caught in &mut base.suspended_handling {
            caught.depth = self.depth;
        }
        self.handled.append(&mut base.suspended_handling);

        let mut nested: Vec<CallFrame> = Vec::new();
        let mut pending = injected;
        loop {
            let result = {
                let frame = match nested.last_mut() {
                    Some(frame) => frame,
                    None => &mut *base,
                };
                let stepped = match pending.take() {
                    Some(err) => Err(err),
                    None => self.step(frame),
                };
                match stepped {
                    Err(err) => self.unwind(frame, err).map(|()| Step::Continue),
                    ok => ok,
                }
            };
            match result {
                Ok(Step::Continue) => {}
                Ok(Step::Call(mut callee)) => match self.enter_frame(&callee.code.name) {
                    Ok(()) => {
                        callee.handled_base = self.handled.len();
                        nested.push(callee);
                    }
                    Err(err) => pending = Some(err),
                },
                Ok(Step::Exit(exit)) => {
                    let Some(mut finished) = nested.pop() else {
                        match exit {
                            FrameExit::Return(_) => self.finish_frame(base),
                            FrameExit::Yield(_) => {
                                let saved = self.handled.split_off(base.handled_base.min(self.handled.len()));
                                base.suspended_handling = saved;
                            }
                        }
                        return Ok(exit);
                    };
                    self.finish_frame(&mut finished);
                    self.leave_frame();
                    match exit {
                        FrameExit::Return(value) => match nested.last_mut() {
                            Some(caller) => caller.stack.push(value),
                            None => base.stack.push(value),
                        },
                        FrameExit::Yield(_) => {
                            pending = Some(RunError::internal(format!(
                                "YieldValue in non-generator code '{}'",
                                finished.code.name
                            )));
                        }
                    }
                }
                Err(err) => {
                    let Some(failed) = nested.pop() else {
                        self.handled.truncate(base.handled_base);
                        return Err(err);
                    };
                    self.handled.truncate(failed.handled_base);
                    self.leave_frame();
                    pending = Some(err);
                }
            }
        }
    }

    fn finish_frame(&mut self, frame: &mut CallFrame) {
        frame.blocks.clear();
        frame.stack.clear();
        self.handled.truncate(frame.handled_base);
    }

    /// Pushes a fresh frame onto the guest call stack and runs it to completion.
    pub(crate) fn execute_frame(&mut self, mut frame: CallFrame) -> RunResult<Value> {
        self.enter_frame(&frame.code.name)?;
        let result = self.run_frame(&mut frame, None);
        self.leave_frame();
        match result? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(RunError::internal(format!(
                "YieldValue in non-generator code '{}'",
                frame.code.name
            ))),
        }
    }

    pub(crate) fn enter_frame(&mut self, name: &str) -> RunResult<()> {
        self.limits.check_recursion_depth(self.depth + 1)?;
        self.depth += 1;
        self.tracer.on_call(Some(name), self.depth);
        Ok(())
    }

    pub(crate) fn leave_frame(&mut self) {
        self.depth -= 1;
        self.tracer.on_return(self.depth);
    }

    /// Runs a module body with the module's globals as its namespace.
    pub(crate) fn run_module_body(&mut self, module: HeapId, code: Rc<Code>) -> RunResult<()> {
        self.execute_frame(CallFrame::new(code, module))?;
        Ok(())
    }

    /// Executes one instruction.
    fn step(&mut self, frame: &mut CallFrame) -> RunResult<Step> {
        let code = Rc::clone(&frame.code);
        let Some(instr) = code.instructions.get(frame.ip).copied() else {
            return Err(RunError::internal(format!(
                "instruction pointer {} ran past the end of '{}'",
                frame.ip, code.name
            )));
        };
        self.tracer.on_instruction(frame.ip, instr.op, frame.stack.len(), self.depth);
        if Tr::WANTS_STACK {
            let dump: Vec<String> = frame.stack.iter().map(|v| native_repr(v, &self.heap)).collect();
            self.tracer.on_stack_dump(&dump);
        }
        frame.ip += 1;
        if instr.line != 0 {
            frame.line = instr.line;
        }
        let arg = instr.arg;

        match instr.op {
            Opcode::Nop => {}
            Opcode::PopTop => {
                frame.pop()?;
            }
            Opcode::RotTwo => {
                let len = frame.stack.len();
                if len < 2 {
                    return Err(stack_underflow(&code, frame.ip));
                }
                frame.stack.swap(len - 1, len - 2);
            }
            Opcode::RotThree => {
                let top = frame.pop()?;
                let len = frame.stack.len();
                if len < 2 {
                    return Err(stack_underflow(&code, frame.ip));
                }
                frame.stack.insert(len - 2, top);
            }
            Opcode::DupTop => {
                let top = frame.peek()?.clone();
                frame.stack.push(top);
            }
            Opcode::DupTopTwo => {
                let len = frame.stack.len();
                if len < 2 {
                    return Err(stack_underflow(&code, frame.ip));
                }
                frame.stack.extend_from_within(len - 2..);
            }

            Opcode::LoadConst => {
                let constant = code
                    .consts
                    .get(arg as usize)
                    .ok_or_else(|| RunError::internal("constant index out of range"))?;
                let value = Value::from_const(constant, &mut self.heap)?;
                frame.stack.push(value);
            }
            Opcode::LoadName => {
                let value = self.load_name(frame, name_at(&code, arg)?)?;
                frame.stack.push(value);
            }
            Opcode::StoreName => {
                let value = frame.pop()?;
                self.store_name(frame, name_at(&code, arg)?, value)?;
            }
            Opcode::DeleteName => self.delete_name(frame, name_at(&code, arg)?)?,
            Opcode::LoadGlobal => {
                let value = self.load_global(frame.globals, name_at(&code, arg)?)?;
                frame.stack.push(value);
            }
            Opcode::StoreGlobal => {
                let value = frame.pop()?;
                self.module_globals_mut(frame.globals)?
                    .insert(name_at(&code, arg)?.to_owned(), value);
            }
            Opcode::LoadFast => {
                let value = match frame.locals.get(arg as usize) {
                    Some(Value::Undefined) | None => return Err(ExcType::unbound_local(local_name(&code, arg))),
                    Some(value) => value.clone(),
                };
                frame.stack.push(value);
            }
            Opcode::StoreFast => {
                let value = frame.pop()?;
                if let Some(slot) = frame.locals.get_mut(arg as usize) {
                    *slot = value;
                }
            }
            Opcode::DeleteFast => match frame.locals.get_mut(arg as usize) {
                Some(slot) if !matches!(slot, Value::Undefined) => *slot = Value::Undefined,
                _ => return Err(ExcType::unbound_local(local_name(&code, arg))),
            },
            Opcode::LoadDeref => {
                let cell = self.cell_at(frame, arg)?;
                let HeapData::Cell(value) = self.heap.get(cell) else {
                    return Err(RunError::internal("cell slot does not hold a cell"));
                };
                if matches!(value, Value::Undefined) {
                    let name = code.cell_name(arg as usize).unwrap_or("?");
                    return Err(if (arg as usize) < code.cellvars.len() {
                        ExcType::unbound_local(name)
                    } else {
                        ExcType::unbound_free(name)
                    });
                }
                frame.stack.push(value.clone());
            }
            Opcode::StoreDeref => {
                let value = frame.pop()?;
                let cell = self.cell_at(frame, arg)?;
                *self.heap.get_mut(cell) = HeapData::Cell(value);
            }
            Opcode::LoadClosure => {
                let cell = self.cell_at(frame, arg)?;
                frame.stack.push(Value::Ref(cell));
            }
            Opcode::LoadAttr => {
                let obj = frame.pop()?;
                let value = self.get_attr(&obj, name_at(&code, arg)?)?;
                frame.stack.push(value);
            }
            Opcode::StoreAttr => {
                let obj = frame.pop()?;
                let value = frame.pop()?;
                self.set_attr(&obj, name_at(&code, arg)?, value)?;
            }
            Opcode::DeleteAttr => {
                let obj = frame.pop()?;
                self.del_attr(&obj, name_at(&code, arg)?)?;
            }

            Opcode::BinaryOp => {
                let op = BinaryOp::from_arg(arg).ok_or_else(|| RunError::internal("bad binary operator"))?;
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let value = self.binary_op(lhs, rhs, op)?;
                frame.stack.push(value);
            }
            Opcode::UnaryOp => {
                let op = UnaryOp::from_arg(arg).ok_or_else(|| RunError::internal("bad unary operator"))?;
                let operand = frame.pop()?;
                let value = self.unary_op(operand, op)?;
                frame.stack.push(value);
            }
            Opcode::CompareOp => {
                let op = CompareOp::from_arg(arg).ok_or_else(|| RunError::internal("bad comparison operator"))?;
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let value = self.compare_op(lhs, rhs, op)?;
                frame.stack.push(value);
            }
            Opcode::BinarySubscr => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                let value = self.get_item(&obj, key)?;
                frame.stack.push(value);
            }
            Opcode::StoreSubscr => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                let value = frame.pop()?;
                self.set_item(&obj, key, value)?;
            }
            Opcode::DeleteSubscr => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                self.del_item(&obj, key)?;
            }

            Opcode::BuildTuple => {
                let items = frame.pop_n(arg as usize)?;
                frame.stack.push(self.heap.tuple(items)?);
            }
            Opcode::BuildList => {
                let items = frame.pop_n(arg as usize)?;
                frame.stack.push(self.heap.list(items)?);
            }
            Opcode::BuildSet => {
                let items = frame.pop_n(arg as usize)?;
                let value = self.build_set(items)?;
                frame.stack.push(value);
            }
            Opcode::BuildMap => {
                let items = frame.pop_n(arg as usize * 2)?;
                let value = self.build_map(items)?;
                frame.stack.push(value);
            }
            Opcode::BuildString => {
                let parts = frame.pop_n(arg as usize)?;
                let mut out = String::new();
                for part in &parts {
                    match part {
                        Value::Str(s) => out.push_str(s),
                        other => out.push_str(&self.str_value(other)?),
                    }
                }
                frame.stack.push(Value::str(&out));
            }
            Opcode::FormatValue => {
                let value = frame.pop()?;
                let text = if arg == 1 {
                    self.repr_value(&value)?
                } else {
                    self.str_value(&value)?
                };
                frame.stack.push(Value::str(&text));
            }
            Opcode::ListAppend => {
                let item = frame.pop()?;
                let target = frame.peek_at(arg as usize)?.clone();
                self.list_append(&target, item)?;
            }
            Opcode::SetAdd => {
                let item = frame.pop()?;
                let target = frame.peek_at(arg as usize)?.clone();
                self.set_add(&target, item)?;
            }
            Opcode::MapAdd => {
                let value = frame.pop()?;
                let key = frame.pop()?;
                let target = frame.peek_at(arg as usize)?.clone();
                self.set_item(&target, key, value)?;
            }
            Opcode::UnpackSequence => {
                let seq = frame.pop()?;
                let items = self.unpack(seq, arg as usize)?;
                frame.stack.extend(items.into_iter().rev());
            }

            Opcode::Jump => frame.ip = arg as usize,
            Opcode::PopJumpIfFalse => {
                let cond = frame.pop()?;
                if !self.truthy(&cond)? {
                    frame.ip = arg as usize;
                }
            }
            Opcode::PopJumpIfTrue => {
                let cond = frame.pop()?;
                if self.truthy(&cond)? {
                    frame.ip = arg as usize;
                }
            }
            Opcode::JumpIfFalseOrPop => {
                let cond = frame.peek()?.clone();
                if self.truthy(&cond)? {
                    frame.pop()?;
                } else {
                    frame.ip = arg as usize;
                }
            }
            Opcode::JumpIfTrueOrPop => {
                let cond = frame.peek()?.clone();
                if self.truthy(&cond)? {
                    frame.ip = arg as usize;
                } else {
                    frame.pop()?;
                }
            }
            Opcode::GetIter => {
                let iterable = frame.pop()?;
                let iter = self.get_iter(iterable)?;
                frame.stack.push(iter);
            }
            Opcode::ForIter => {
                let iter = frame.peek()?.clone();
                match self.next_value(&iter)? {
                    Some(item) => frame.stack.push(item),
                    None => {
                        frame.pop()?;
                        frame.ip = arg as usize;
                    }
                }
            }

            Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally => {
                let kind = match instr.op {
                    Opcode::SetupLoop => BlockKind::Loop,
                    Opcode::SetupExcept => BlockKind::Except,
                    _ => BlockKind::Finally,
                };
                frame.blocks.push(Block {
                    kind,
                    handler: arg as usize,
                    depth: frame.stack.len(),
                });
            }
            Opcode::BreakLoop => {
                while let Some(block) = frame.blocks.pop() {
                    match block.kind {
                        BlockKind::Loop => {
                            frame.stack.truncate(block.depth);
                            frame.ip = block.handler;
                            return Ok(Step::Continue);
                        }
                        BlockKind::ExceptHandler => self.pop_handled(frame),
                        BlockKind::Except | BlockKind::Finally => {}
                    }
                }
                return Err(RunError::internal("BreakLoop outside of a loop block"));
            }
            Opcode::PopBlock => {
                frame
                    .blocks
                    .pop()
                    .ok_or_else(|| RunError::internal("PopBlock with an empty block stack"))?;
            }
            Opcode::PopExcept => match frame.blocks.pop() {
                Some(Block {
                    kind: BlockKind::ExceptHandler,
                    depth,
                    ..
                }) => {
                    frame.stack.truncate(depth);
                    self.pop_handled(frame);
                }
                _ => return Err(RunError::internal("PopExcept outside of an exception handler")),
            },
            Opcode::RaiseVarargs => return Err(self.raise_varargs(frame, arg)?),
            Opcode::Reraise => return Err(self.reraise()?),

            Opcode::MakeFunction => {
                let function = self.make_function(frame, arg)?;
                frame.stack.push(function);
            }
            Opcode::CallFunction => {
                let args = frame.pop_n(arg as usize)?;
                let callee = frame.pop()?;
                return self.call_at_site(frame, callee, ArgValues::new(args));
            }
            Opcode::CallFunctionKw => {
                let names = frame.pop()?;
                let mut values = frame.pop_n(arg as usize)?;
                let callee = frame.pop()?;
                let names = self.str_tuple(&names)?;
                if names.len() > values.len() {
                    return Err(RunError::internal("CallFunctionKw has more names than arguments"));
                }
                let kw_values = values.split_off(values.len() - names.len());
                let args = ArgValues::new(values).with_kwargs(names.into_iter().zip(kw_values).collect());
                return self.call_at_site(frame, callee, args);
            }
            Opcode::CallFunctionEx => {
                let kwargs = if arg & 1 == 1 { Some(frame.pop()?) } else { None };
                let positional = frame.pop()?;
                let callee = frame.pop()?;
                let args = self.unpack_call_args(positional, kwargs)?;
                return self.call_at_site(frame, callee, args);
            }
            Opcode::ReturnValue => {
                let value = frame.pop()?;
                return Ok(Step::Exit(FrameExit::Return(value)));
            }
            Opcode::YieldValue => {
                let value = frame.pop()?;
                return Ok(Step::Exit(FrameExit::Yield(value)));
            }

            Opcode::LoadBuildClass => frame
                .stack
                .push(Value::Builtin(Builtins::Function(BuiltinsFunctions::BuildClass))),

            Opcode::ImportName => {
                let fromlist = frame.pop()?;
                let level = frame.pop()?;
                let level = level
                    .as_int()
                    .and_then(|l| u32::try_from(l).ok())
                    .ok_or_else(|| ExcType::value_error("import level must be a non-negative integer"))?;
                let fromlist = if fromlist.is_none() {
                    Vec::new()
                } else {
                    self.str_tuple(&fromlist)?
                };
                let request = ImportRequest {
                    name: name_at(&code, arg)?,
                    level,
                    fromlist: &fromlist,
                    importer: Some(frame.globals),
                };
                let outcome = self.import_module(&request)?;
                frame.stack.push(Value::Ref(outcome.selected(fromlist.is_empty())));
            }
            Opcode::ImportFrom => {
                let module = frame.peek()?.clone();
                let value = self.import_from(&module, name_at(&code, arg)?)?;
                frame.stack.push(value);
            }
            Opcode::ImportStar => {
                let module = frame.pop()?;
                for (name, value) in self.star_names(&module)? {
                    self.store_name(frame, &name, value)?;
                }
            }
        }
        Ok(Step::Continue)
    }

    /// Finishes a `CallFunction*` instruction: guest functions become a new
    /// frame for the loop, everything else is called right away.
    fn call_at_site(&mut self, frame: &mut CallFrame, callee: Value, args: ArgValues) -> RunResult<Step> {
        match self.start_call(callee, args)? {
            CallStart::Frame(callee) => Ok(Step::Call(callee)),
            CallStart::Done(value) => {
                frame.stack.push(value);
                Ok(Step::Continue)
            }
        }
    }

    fn cell_at(&self, frame: &CallFrame, arg: u32) -> RunResult<HeapId> {
        frame
            .cells
            .get(arg as usize)
            .copied()
            .ok_or_else(|| RunError::internal(format!("cell index {arg} out of range in '{}'", frame.code.name)))
    }

    pub(crate) fn module_globals(&self, module: HeapId) -> RunResult<&Namespace> {
        match self.heap.get(module) {
            HeapData::Module(m) => Ok(&m.globals),
            _ => Err(RunError::internal("frame globals are not a module")),
        }
    }

    pub(crate) fn module_globals_mut(&mut self, module: HeapId) -> RunResult<&mut Namespace> {
        match self.heap.get_mut(module) {
            HeapData::Module(m) => Ok(&mut m.globals),
            _ => Err(RunError::internal("frame globals are not a module")),
        }
    }

    /// Module globals, then builtins.
    pub(crate) fn load_global(&self, globals: HeapId, name: &str) -> RunResult<Value> {
        if let Some(value) = self.module_globals(globals)?.get(name) {
            return Ok(value.clone());
        }
        self.builtins.get(name).ok_or_else(|| ExcType::name_error(name))
    }

    /// Class namespace, then module globals, then builtins.
    fn load_name(&self, frame: &CallFrame, name: &str) -> RunResult<Value> {
        if let Some(ns) = frame.namespace
            && let HeapData::Dict(dict) = self.heap.get(ns)
            && let Some(value) = dict.get_str(name)
        {
            return Ok(value.clone());
        }
        self.load_global(frame.globals, name)
    }

    fn store_name(&mut self, frame: &CallFrame, name: &str, value: Value) -> RunResult<()> {
        match frame.namespace {
            Some(ns) => {
                let HeapData::Dict(dict) = self.heap.get_mut(ns) else {
                    return Err(RunError::internal("class namespace is not a dict"));
                };
                let key = Value::str(name);
                dict.insert(crate::value::DictKey::Str(Rc::from(name)), key, value);
            }
            None => {
                self.module_globals_mut(frame.globals)?.insert(name.to_owned(), value);
            }
        }
        Ok(())
    }

    fn delete_name(&mut self, frame: &CallFrame, name: &str) -> RunResult<()> {
        let removed = match frame.namespace {
            Some(ns) => match self.heap.get_mut(ns) {
                HeapData::Dict(dict) => dict.remove(&crate::value::DictKey::Str(Rc::from(name))).is_some(),
                _ => false,
            },
            None => self.module_globals_mut(frame.globals)?.shift_remove(name).is_some(),
        };
        if removed { Ok(()) } else { Err(ExcType::name_error(name)) }
    }

    /// Builds a function from `[defaults] [kwdefaults] [annotations] [closure] code qualname`.
    fn make_function(&mut self, frame: &mut CallFrame, flags: u32) -> RunResult<Value> {
        let qualname = match frame.pop()? {
            Value::Str(s) => s.to_string(),
            _ => return Err(RunError::internal("MakeFunction qualname is not a string")),
        };
        let Value::Code(code) = frame.pop()? else {
            return Err(RunError::internal("MakeFunction expects a code object"));
        };
        let closure = if flags & 0x08 != 0 {
            let cells = frame.pop()?;
            self.tuple_items(&cells)?
                .into_iter()
                .map(|cell| {
                    cell.ref_id()
                        .ok_or_else(|| RunError::internal("closure tuple holds a non-cell"))
                })
                .collect::<RunResult<Vec<_>>>()?
        } else {
            Vec::new()
        };
        if flags & 0x04 != 0 {
            frame.pop()?;
        }
        let kwdefaults = if flags & 0x02 != 0 {
            let dict = frame.pop()?;
            self.str_keyed_items(&dict)?
        } else {
            Vec::new()
        };
        let defaults = if flags & 0x01 != 0 {
            let tuple = frame.pop()?;
            self.tuple_items(&tuple)?
        } else {
            Vec::new()
        };
        if closure.len() != code.freevars.len() {
            return Err(RunError::internal(format!(
                "'{}' expects {} closure cells, got {}",
                code.name,
                code.freevars.len(),
                closure.len()
            )));
        }
        let function = Function {
            code,
            qualname,
            globals: frame.globals,
            defaults,
            kwdefaults,
            closure,
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Function(function))?))
    }

    /// Items of a tuple value.
    pub(crate) fn tuple_items(&self, value: &Value) -> RunResult<Vec<Value>> {
        match value {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Tuple(items) => Ok(items.clone()),
                _ => Err(RunError::internal("expected a tuple operand")),
            },
            _ => Err(RunError::internal("expected a tuple operand")),
        }
    }

    /// Strings of a tuple of strings.
    fn str_tuple(&self, value: &Value) -> RunResult<Vec<String>> {
        self.tuple_items(value)?
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.to_string()),
                _ => Err(RunError::internal("expected a tuple of strings")),
            })
            .collect()
    }

    /// `(name, value)` pairs of a dict whose keys must all be strings.
    pub(crate) fn str_keyed_items(&self, value: &Value) -> RunResult<Vec<(String, Value)>> {
        let Value::Ref(id) = value else {
            return Err(ExcType::type_error(format!(
                "argument after ** must be a mapping, not {}",
                value.type_name(&self.heap)
            )));
        };
        let HeapData::Dict(dict) = self.heap.get(*id) else {
            return Err(ExcType::type_error(format!(
                "argument after ** must be a mapping, not {}",
                value.type_name(&self.heap)
            )));
        };
        dict.iter()
            .map(|(k, v)| match k {
                Value::Str(s) => Ok((s.to_string(), v.clone())),
                _ => Err(ExcType::type_error("keywords must be strings")),
            })
            .collect()
    }

    fn unpack_call_args(&mut self, positional: Value, kwargs: Option<Value>) -> RunResult<ArgValues> {
        let positional = self.iterate_to_vec(positional)?;
        let kwargs = match kwargs {
            Some(dict) => self.str_keyed_items(&dict)?,
            None => Vec::new(),
        };
        Ok(ArgValues::new(positional).with_kwargs(kwargs))
    }

    /// Allocates an empty dict.
    pub(crate) fn new_dict(&mut self) -> RunResult<HeapId> {
        Ok(self.heap.allocate(HeapData::Dict(Dict::new()))?)
    }
}
