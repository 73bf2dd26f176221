//! Implementation of the print() builtin function.

use std::borrow::Cow;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    exception_public::Exception,
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    value::Value,
};

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// `print(*objects, sep=' ', end='\n')`.
    ///
    /// `flush` is accepted and ignored; writers decide when to flush.
    pub(crate) fn builtin_print(&mut self, args: ArgValues) -> RunResult<Value> {
        let mut args = args;
        let sep = self.print_option(args.take_kwarg("sep"), "sep", " ")?;
        let end = self.print_option(args.take_kwarg("end"), "end", "\n")?;
        args.take_kwarg("flush");
        args.check_no_kwargs("print")?;

        for (i, value) in args.positional.iter().enumerate() {
            if i > 0 {
                self.print.stdout_push(&sep).map_err(writer_error)?;
            }
            let text = self.str_value(value)?;
            self.print.stdout_write(Cow::Owned(text)).map_err(writer_error)?;
        }
        self.print.stdout_push(&end).map_err(writer_error)?;
        Ok(Value::None)
    }

    fn print_option(&self, value: Option<Value>, name: &str, default: &str) -> RunResult<String> {
        match value {
            None | Some(Value::None) => Ok(default.to_owned()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(ExcType::type_error(format!(
                "{name} must be None or a string, not {}",
                other.type_name(&self.heap)
            ))),
        }
    }
}

/// A writer failure surfaces in the guest as the exception the writer reported.
fn writer_error(exc: Exception) -> RunError {
    let exc_type = exc.kind().unwrap_or(ExcType::RuntimeError);
    SimpleException::new(exc_type, exc.into_message()).into()
}
