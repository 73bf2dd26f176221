//! Guest modules.

use std::path::PathBuf;

use super::Namespace;
use crate::builtins::NativeModule;

/// Initialization progress of a module in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModuleState {
    /// The body is executing; importers see a partially populated module.
    Initializing,
    Ready,
    /// The body raised. The module stays cached but is never run again.
    Failed,
}

/// A module record. Created once per fully qualified name.
#[derive(Debug)]
pub(crate) struct Module {
    pub name: String,
    pub file: Option<PathBuf>,
    /// Directories searched for submodules; `Some` marks a package.
    pub path: Option<Vec<PathBuf>>,
    pub globals: Namespace,
    pub state: ModuleState,
    /// Set for modules the interpreter provides; they have no file.
    pub native: Option<NativeModule>,
}

impl Module {
    pub fn new(name: &str, file: Option<PathBuf>, path: Option<Vec<PathBuf>>) -> Self {
        Self {
            name: name.to_owned(),
            file,
            path,
            globals: super::new_namespace(),
            state: ModuleState::Initializing,
            native: None,
        }
    }

    /// A native module, ready on creation.
    pub fn native(name: &str, kind: NativeModule) -> Self {
        Self {
            state: ModuleState::Ready,
            native: Some(kind),
            ..Self::new(name, None, None)
        }
    }

    pub fn is_package(&self) -> bool {
        self.path.is_some()
    }

    /// File path as shown in error messages.
    pub fn file_display(&self) -> Option<String> {
        self.file.as_ref().map(|p| p.display().to_string())
    }
}
