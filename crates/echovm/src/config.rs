//! Interpreter configuration: module search path and resource limits.

use std::{
    env,
    path::{Path, PathBuf},
};

use crate::resource::ResourceLimits;

/// Environment variable holding extra search-path directories, in the host's
/// path-list syntax (`:` separated on Unix).
pub const SEARCH_PATH_ENV: &str = "ECHOVM_PATH";

/// Ordered list of directories consulted for top-level module components.
///
/// Order matters: the first directory that satisfies a component wins even if
/// a later directory would satisfy the whole dotted name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath(Vec<PathBuf>);

impl SearchPath {
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self(dirs)
    }

    /// Reads [`SEARCH_PATH_ENV`]; an unset variable yields an empty path.
    #[must_use]
    pub fn from_env() -> Self {
        env::var_os(SEARCH_PATH_ENV)
            .map(|value| Self(env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()).collect()))
            .unwrap_or_default()
    }

    /// Appends a directory at lowest priority.
    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.0.push(dir.into());
    }

    /// Inserts a directory at highest priority unless it is already first.
    pub(crate) fn prepend(&mut self, dir: &Path) {
        if self.0.first().is_some_and(|first| first == dir) {
            return;
        }
        self.0.insert(0, dir.to_path_buf());
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.0
    }
}

/// Configuration for an [`Interpreter`](crate::Interpreter), built once per run.
///
/// ```
/// use echovm::{InterpreterConfig, ResourceLimits};
///
/// let config = InterpreterConfig::new()
///     .with_search_dir("/opt/app/lib")
///     .with_limits(ResourceLimits::new().max_recursion_depth(500));
/// assert_eq!(config.search_path().dirs().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    search_path: SearchPath,
    limits: ResourceLimits,
}

impl InterpreterConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the directories listed in [`SEARCH_PATH_ENV`].
    #[must_use]
    pub fn with_search_path_from_env(mut self) -> Self {
        self.search_path.0.extend(SearchPath::from_env().0);
        self
    }

    /// Appends one directory to the search path.
    #[must_use]
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.push(dir);
        self
    }

    #[must_use]
    pub fn with_search_path(mut self, search_path: SearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub(crate) fn into_parts(self) -> (SearchPath, ResourceLimits) {
        (self.search_path, self.limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_does_not_duplicate_first_entry() {
        let mut path = SearchPath::new(vec![PathBuf::from("/a")]);
        path.prepend(Path::new("/a"));
        path.prepend(Path::new("/b"));
        assert_eq!(path.dirs(), &[PathBuf::from("/b"), PathBuf::from("/a")]);
    }
}
