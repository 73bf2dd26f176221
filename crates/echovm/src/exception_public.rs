use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exception_private::{ExcType, TracebackEntry};

/// One frame of a rendered traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// File the frame's code came from, or the module name for in-memory code.
    pub filename: String,
    pub line: u32,
    /// Function name, `<module>` for module bodies.
    pub name: String,
    /// The source line at `line`, if the code unit carried its source text.
    pub preview_line: Option<String>,
}

impl From<TracebackEntry> for StackFrame {
    fn from(entry: TracebackEntry) -> Self {
        let filename = if entry.filename.is_empty() {
            entry.module
        } else {
            entry.filename
        };
        Self {
            filename,
            line: entry.line,
            name: entry.name,
            preview_line: entry.preview,
        }
    }
}

/// A guest exception (or fatal failure) that escaped to the host.
///
/// `Display` renders it the way the modeled language prints an unhandled
/// exception:
///
/// ```text
/// Traceback (most recent call last):
///   File "app/main.py", line 3, in <module>
///     import helpers
/// ModuleNotFoundError: No module named 'helpers'
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    exc_type: String,
    kind: Option<ExcType>,
    message: Option<String>,
    /// Outermost frame first.
    traceback: Vec<StackFrame>,
}

impl Exception {
    /// Creates an exception for a builtin exception type.
    #[must_use]
    pub fn new(kind: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type: kind.to_string(),
            kind: Some(kind),
            message,
            traceback: Vec::new(),
        }
    }

    /// Creates an exception with full detail.
    ///
    /// `exc_type` is the guest class name, `kind` the nearest builtin exception
    /// class in its MRO (`None` for fatal non-guest failures).
    #[must_use]
    pub fn new_full(
        exc_type: impl Into<String>,
        kind: Option<ExcType>,
        message: Option<String>,
        traceback: Vec<StackFrame>,
    ) -> Self {
        Self {
            exc_type: exc_type.into(),
            kind,
            message,
            traceback,
        }
    }

    /// Class name of the raised object, e.g. `ValueError` or a user class name.
    #[must_use]
    pub fn exc_type(&self) -> &str {
        &self.exc_type
    }

    /// Nearest builtin exception type in the raised object's MRO.
    #[must_use]
    pub fn kind(&self) -> Option<ExcType> {
        self.kind
    }

    /// Returns true if this exception would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_instance_of(&self, handler_type: ExcType) -> bool {
        self.kind.is_some_and(|kind| kind.is_subclass_of(handler_type))
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message
    }

    /// Traceback frames, outermost first.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// The final `Type: message` line.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(msg) if !msg.is_empty() => format!("{}: {msg}", self.exc_type),
            _ => self.exc_type.clone(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for frame in &self.traceback {
                writeln!(f, "  File \"{}\", line {}, in {}", frame.filename, frame.line, frame.name)?;
                if let Some(preview) = &frame.preview_line {
                    writeln!(f, "    {}", preview.trim())?;
                }
            }
        }
        write!(f, "{}", self.summary())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display_renders_traceback_most_recent_last() {
        let exc = Exception::new_full(
            "ValueError",
            Some(ExcType::ValueError),
            Some("bad".to_owned()),
            vec![
                StackFrame {
                    filename: "main.py".to_owned(),
                    line: 4,
                    name: "<module>".to_owned(),
                    preview_line: Some("    f()".to_owned()),
                },
                StackFrame {
                    filename: "main.py".to_owned(),
                    line: 2,
                    name: "f".to_owned(),
                    preview_line: None,
                },
            ],
        );
        assert_eq!(
            exc.to_string(),
            "Traceback (most recent call last):\n  File \"main.py\", line 4, in <module>\n    f()\n  File \"main.py\", line 2, in f\nValueError: bad"
        );
    }

    #[test]
    fn kind_matching_follows_hierarchy() {
        let exc = Exception::new(ExcType::ModuleNotFoundError, None);
        assert!(exc.is_instance_of(ExcType::ImportError));
        assert!(!exc.is_instance_of(ExcType::AttributeError));
        assert_eq!(exc.summary(), "ModuleNotFoundError");
    }
}
