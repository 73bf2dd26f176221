use std::{
    borrow::Cow,
    io::{self, Write as _},
};

use crate::exception_public::Exception;

/// Trait for handling output from the `print()` builtin function.
///
/// Implement this trait to capture or redirect guest output.
/// The default implementation `StdPrint` writes to stdout.
pub trait PrintWriter {
    /// Called once for each formatted argument passed to `print()`.
    ///
    /// Writes only the argument's text; separators and the terminator are
    /// emitted through [`PrintWriter::stdout_push`].
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception>;

    /// Add a separator or terminator string (`sep` / `end` of `print()`).
    fn stdout_push(&mut self, end: &str) -> Result<(), Exception>;
}

/// Default `PrintWriter` that writes to stdout.
///
/// Output is buffered and flushed when the writer is dropped, so diagnostics
/// written to stderr by the tracer are not interleaved mid-line.
#[derive(Debug, Default)]
pub struct StdPrint {
    buffer: String,
}

impl StdPrint {
    /// Flushes buffered output to stdout.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(self.buffer.as_bytes());
        let _ = stdout.flush();
        self.buffer.clear();
    }
}

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.buffer.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: &str) -> Result<(), Exception> {
        self.buffer.push_str(end);
        if end.contains('\n') {
            self.flush();
        }
        Ok(())
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        self.flush();
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    /// Creates a new empty `CollectStringPrint`.
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Consumes the writer and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: &str) -> Result<(), Exception> {
        self.0.push_str(end);
        Ok(())
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: &str) -> Result<(), Exception> {
        Ok(())
    }
}
