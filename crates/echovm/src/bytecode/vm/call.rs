//! Call dispatch: guest functions, bound methods, classes and builtins.

use std::rc::Rc;

use super::CallFrame;
use crate::{
    args::ArgValues,
    builtins::{Builtins, BuiltinsFunctions},
    bytecode::{Code, CodeFlags},
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    types::{BoundMethod, Dict, Generator, Instance, class::lookup_in_mro},
    value::Value,
};

/// A call resolved at its call site.
#[derive(Debug)]
pub(super) enum CallStart {
    /// A guest frame, arguments bound, ready to run.
    Frame(CallFrame),
    /// The call already produced its value.
    Done(Value),
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Calls any callable value with evaluated arguments.
    pub(crate) fn call_value(&mut self, callee: Value, mut args: ArgValues) -> RunResult<Value> {
        let id = match callee {
            Value::Builtin(Builtins::Function(function)) => return self.call_builtin(function, args),
            Value::Builtin(Builtins::Type(ty)) => return self.construct_builtin(ty, args),
            Value::Ref(id) => id,
            other => return Err(ExcType::not_callable(&other.type_name(&self.heap))),
        };
        match self.heap.get(id) {
            HeapData::Function(_) => self.call_function(id, args),
            HeapData::BoundMethod(bound) => {
                let BoundMethod { func, receiver } = bound.clone();
                args.prepend(receiver);
                self.call_value(func, args)
            }
            HeapData::BuiltinMethod(bound) => {
                let bound = bound.clone();
                self.call_builtin_method(bound.method, bound.receiver, args)
            }
            HeapData::Class(_) => self.call_class(id, args),
            HeapData::StaticMethod(inner) => {
                let inner = inner.clone();
                self.call_value(inner, args)
            }
            HeapData::Instance(_) => match self.call_special(&Value::Ref(id), "__call__", args)? {
                Some(result) => Ok(result),
                None => Err(ExcType::not_callable(&Value::Ref(id).type_name(&self.heap))),
            },
            _ => Err(ExcType::not_callable(&Value::Ref(id).type_name(&self.heap))),
        }
    }

    /// Calls a guest function from native code, running its frame in a
    /// nested loop.
    pub(crate) fn call_function(&mut self, func_id: HeapId, args: ArgValues) -> RunResult<Value> {
        match self.start_function(func_id, args)? {
            CallStart::Frame(frame) => self.execute_frame(frame),
            CallStart::Done(value) => Ok(value),
        }
    }

    /// Resolves a call made by a call instruction. Guest functions, directly
    /// or through a bound method, come back as a frame for the caller's loop.
    pub(super) fn start_call(&mut self, callee: Value, mut args: ArgValues) -> RunResult<CallStart> {
        if let Value::Ref(id) = callee {
            match self.heap.get(id) {
                HeapData::Function(_) => return self.start_function(id, args),
                HeapData::BoundMethod(bound) => {
                    let BoundMethod { func, receiver } = bound.clone();
                    args.prepend(receiver);
                    return self.start_call(func, args);
                }
                _ => {}
            }
        }
        self.call_value(callee, args).map(CallStart::Done)
    }

    /// Binds a guest function's arguments. A generator function returns its
    /// suspended generator here, at the call site, without running any of
    /// the body.
    fn start_function(&mut self, func_id: HeapId, args: ArgValues) -> RunResult<CallStart> {
        let frame = self.prepare_frame(func_id, args)?;
        if !frame.code.is_generator() {
            return Ok(CallStart::Frame(frame));
        }
        let qualname = match self.heap.get(func_id) {
            HeapData::Function(func) => func.qualname.clone(),
            _ => frame.code.qualname.clone(),
        };
        let id = self.heap.allocate(HeapData::Generator(Generator::new(qualname, frame)))?;
        Ok(CallStart::Done(Value::Ref(id)))
    }

    /// Builds the frame for a call: binds arguments to fast locals and sets up cells.
    pub(crate) fn prepare_frame(&mut self, func_id: HeapId, args: ArgValues) -> RunResult<CallFrame> {
        let HeapData::Function(func) = self.heap.get(func_id) else {
            return Err(RunError::internal("prepare_frame on a non-function"));
        };
        let code = Rc::clone(&func.code);
        let qualname = func.qualname.clone();
        let defaults = func.defaults.clone();
        let kwdefaults = func.kwdefaults.clone();
        let closure = func.closure.clone();
        let mut frame = CallFrame::new(Rc::clone(&code), func.globals);

        self.bind_arguments(&code, &qualname, &defaults, &kwdefaults, args, &mut frame.locals)?;

        let param_count = parameter_slots(&code);
        for name in &code.cellvars {
            // a parameter captured by an inner function lives in its cell
            let initial = code.varnames[..param_count]
                .iter()
                .position(|v| v == name)
                .map_or(Value::Undefined, |i| frame.locals[i].clone());
            let cell = self.heap.allocate(HeapData::Cell(initial))?;
            frame.cells.push(cell);
        }
        frame.cells.extend(closure);
        Ok(frame)
    }

    fn bind_arguments(
        &mut self,
        code: &Code,
        name: &str,
        defaults: &[Value],
        kwdefaults: &[(String, Value)],
        args: ArgValues,
        locals: &mut [Value],
    ) -> RunResult<()> {
        let argcount = code.argcount as usize;
        let kwonly = code.kwonlyargcount as usize;
        let has_varargs = code.flags.contains(CodeFlags::VARARGS);
        let has_varkw = code.flags.contains(CodeFlags::VARKEYWORDS);
        if locals.len() < parameter_slots(code) {
            return Err(RunError::internal(format!("'{name}' declares fewer locals than parameters")));
        }

        let ArgValues { positional, kwargs } = args;
        let mut positional = positional.into_vec();
        let given = positional.len();
        let extra = if given > argcount {
            positional.split_off(argcount)
        } else {
            Vec::new()
        };
        if !extra.is_empty() && !has_varargs {
            return Err(too_many_positional(name, argcount, defaults.len(), given));
        }
        for (slot, value) in locals.iter_mut().zip(positional) {
            *slot = value;
        }

        let mut extra_kwargs = Vec::new();
        for (key, value) in kwargs {
            match code.varnames[..argcount + kwonly].iter().position(|n| *n == key) {
                Some(i) => {
                    if !matches!(locals[i], Value::Undefined) {
                        return Err(ExcType::type_error(format!(
                            "{name}() got multiple values for argument '{key}'"
                        )));
                    }
                    locals[i] = value;
                }
                None if has_varkw => extra_kwargs.push((key, value)),
                None => {
                    return Err(ExcType::type_error(format!(
                        "{name}() got an unexpected keyword argument '{key}'"
                    )));
                }
            }
        }

        let first_default = argcount.saturating_sub(defaults.len());
        let mut missing = Vec::new();
        for i in 0..argcount {
            if matches!(locals[i], Value::Undefined) {
                if i >= first_default {
                    locals[i] = defaults[i - first_default].clone();
                } else {
                    missing.push(code.varnames[i].as_str());
                }
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(name, &missing, "positional"));
        }
        for i in argcount..argcount + kwonly {
            if matches!(locals[i], Value::Undefined) {
                match kwdefaults.iter().find(|(k, _)| *k == code.varnames[i]) {
                    Some((_, value)) => locals[i] = value.clone(),
                    None => missing.push(code.varnames[i].as_str()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(name, &missing, "keyword-only"));
        }

        let mut slot = argcount + kwonly;
        if has_varargs {
            locals[slot] = self.heap.tuple(extra)?;
            slot += 1;
        }
        if has_varkw {
            let mut dict = Dict::new();
            for (key, value) in extra_kwargs {
                let key_value = Value::str(&key);
                dict.insert(key_value.to_key(&self.heap)?, key_value, value);
            }
            locals[slot] = Value::Ref(self.heap.allocate(HeapData::Dict(dict))?);
        }
        Ok(())
    }

    /// Calls a class object: metaclass `__call__` when one is defined, else
    /// the default construction protocol.
    pub(crate) fn call_class(&mut self, class_id: HeapId, mut args: ArgValues) -> RunResult<Value> {
        let metaclass = match self.heap.get(class_id) {
            HeapData::Class(cls) => cls.metaclass,
            _ => None,
        };
        if let Some(meta) = metaclass
            && let Some(call) = lookup_in_mro(&self.heap, meta, "__call__")
            && !matches!(call, Value::Builtin(Builtins::Function(BuiltinsFunctions::TypeCall)))
        {
            args.prepend(Value::Ref(class_id));
            return self.call_value(call, args);
        }
        self.instantiate(class_id, args)
    }

    /// `type.__call__`: `__new__` (or a plain allocation), then `__init__`.
    pub(crate) fn instantiate(&mut self, class_id: HeapId, args: ArgValues) -> RunResult<Value> {
        let custom_new = match lookup_in_mro(&self.heap, class_id, "__new__") {
            None | Some(Value::Builtin(Builtins::Function(BuiltinsFunctions::ObjectNew))) => None,
            Some(Value::Ref(id)) => match self.heap.get(id) {
                HeapData::StaticMethod(inner) => Some(inner.clone()),
                _ => Some(Value::Ref(id)),
            },
            Some(other) => Some(other),
        };
        let has_custom_new = custom_new.is_some();

        let instance = match custom_new {
            Some(new) => {
                let mut new_args = args.clone();
                new_args.prepend(Value::Ref(class_id));
                let result = self.call_value(new, new_args)?;
                if !self.is_instance_of_class(&result, class_id) {
                    return Ok(result);
                }
                result
            }
            None => {
                let mut instance = Instance::new(class_id);
                if self.class_exc_type(class_id).is_some() {
                    let exc_args = self.heap.tuple(args.positional.to_vec())?;
                    instance.attrs.insert("args".to_owned(), exc_args);
                }
                Value::Ref(self.heap.allocate(HeapData::Instance(instance))?)
            }
        };

        match lookup_in_mro(&self.heap, class_id, "__init__") {
            None | Some(Value::Builtin(Builtins::Function(BuiltinsFunctions::ObjectInit))) => {
                if args.count() > 0 && !has_custom_new {
                    let name = self.class_display(class_id);
                    return Err(ExcType::type_error(format!("{name}() takes no arguments")));
                }
            }
            Some(init) => {
                let init = self.bind_class_member(init, &instance, class_id)?;
                let result = self.call_value(init, args)?;
                if !result.is_none() {
                    return Err(ExcType::type_error(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name(&self.heap)
                    )));
                }
            }
        }
        Ok(instance)
    }

    /// Calls `callee` with `receiver` prepended to `args`.
    pub(crate) fn call_with_receiver(&mut self, callee: Value, receiver: Value, mut args: ArgValues) -> RunResult<Value> {
        args.prepend(receiver);
        self.call_value(callee, args)
    }

    pub(crate) fn class_exc_type(&self, class_id: HeapId) -> Option<ExcType> {
        match self.heap.get(class_id) {
            HeapData::Class(cls) => cls.exc_type,
            _ => None,
        }
    }

    pub(crate) fn class_display(&self, class_id: HeapId) -> String {
        match self.heap.get(class_id) {
            HeapData::Class(cls) => cls.name.clone(),
            _ => "object".to_owned(),
        }
    }
}

/// Number of local slots taken by parameters, including `*args` and `**kwargs`.
fn parameter_slots(code: &Code) -> usize {
    code.argcount as usize
        + code.kwonlyargcount as usize
        + usize::from(code.flags.contains(CodeFlags::VARARGS))
        + usize::from(code.flags.contains(CodeFlags::VARKEYWORDS))
}

fn too_many_positional(name: &str, argcount: usize, default_count: usize, given: usize) -> RunError {
    let takes = if default_count > 0 && default_count <= argcount {
        format!("from {} to {argcount} positional arguments", argcount - default_count)
    } else if argcount == 1 {
        "1 positional argument".to_owned()
    } else {
        format!("{argcount} positional arguments")
    };
    let were = if given == 1 { "was" } else { "were" };
    ExcType::type_error(format!("{name}() takes {takes} but {given} {were} given"))
}

fn missing_arguments(name: &str, missing: &[&str], kind: &str) -> RunError {
    let quoted: Vec<String> = missing.iter().map(|m| format!("'{m}'")).collect();
    let list = match quoted.as_slice() {
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
        [] => String::new(),
    };
    let plural = if missing.len() == 1 { "argument" } else { "arguments" };
    ExcType::type_error(format!(
        "{name}() missing {} required {kind} {plural}: {list}",
        missing.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_errors_read_like_the_guest_language() {
        let err = missing_arguments("f", &["a", "b", "c"], "positional");
        let RunError::Exc(raise) = err else { panic!("expected an exception") };
        let crate::exception_private::ExcValue::Simple(exc) = &raise.value else { panic!() };
        assert_eq!(
            exc.message(),
            Some("f() missing 3 required positional arguments: 'a', 'b', and 'c'")
        );
        let err = too_many_positional("g", 1, 0, 2);
        let RunError::Exc(raise) = err else { panic!("expected an exception") };
        let crate::exception_private::ExcValue::Simple(exc) = &raise.value else { panic!() };
        assert_eq!(exc.message(), Some("g() takes 1 positional argument but 2 were given"));
    }
}
