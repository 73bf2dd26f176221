//! Modules provided by the interpreter instead of a source file.

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::VmTracer,
    value::Value,
};

/// Native modules. The string form is the top-level name they import as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum NativeModule {
    /// `modules` and `path` views of interpreter state.
    Sys,
}

impl NativeModule {
    /// Attributes computed on every access. They cannot be rebound or deleted.
    pub fn computed(self) -> &'static [&'static str] {
        match self {
            Self::Sys => &["modules", "path"],
        }
    }

    pub fn computes(self, name: &str) -> bool {
        self.computed().contains(&name)
    }
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Reads a computed attribute of a native module.
    ///
    /// Each read builds a fresh snapshot; mutating it leaves the module
    /// cache and the search path untouched.
    pub(crate) fn native_attr(&mut self, module: NativeModule, name: &str) -> RunResult<Value> {
        match (module, name) {
            (NativeModule::Sys, "modules") => {
                let items = self
                    .modules
                    .names()
                    .map(Value::str)
                    .zip(self.modules.ids().map(Value::Ref))
                    .flat_map(|(key, value)| [key, value])
                    .collect();
                self.build_map(items)
            }
            (NativeModule::Sys, "path") => {
                let items = self
                    .search_path
                    .dirs()
                    .iter()
                    .map(|dir| Value::str(&dir.display().to_string()))
                    .collect();
                Ok(self.heap.list(items)?)
            }
            _ => Err(ExcType::module_attribute_error(module.into(), name)),
        }
    }
}

/// Raised when guest code rebinds or deletes a computed attribute.
pub(crate) fn readonly_attribute(module: NativeModule, name: &str) -> RunError {
    SimpleException::new_msg(
        ExcType::AttributeError,
        format!("module '{module}' attribute '{name}' is read-only"),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn native_names_parse() {
        assert_eq!(NativeModule::from_str("sys"), Ok(NativeModule::Sys));
        assert!(NativeModule::from_str("os").is_err());
        assert!(NativeModule::Sys.computes("path"));
        assert!(!NativeModule::Sys.computes("argv"));
    }
}
