//! The import resolver: module cache, relative-name anchoring, the greedy
//! per-component path walk, fromlist handling and package attribute injection.
//!
//! Every write to the module cache happens here. The VM calls in through
//! [`Interpreter::import_module`] (for `ImportName`), `import_from` and
//! `star_names`; the host API calls in through `import_path` and
//! `import_dotted`.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    builtins::NativeModule,
    bytecode::Code,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    interpreter::Interpreter,
    io::PrintWriter,
    tracer::{ImportEvent, VmTracer},
    types::{Module, ModuleState},
    value::Value,
};

/// File name of a package's initializer inside its directory.
const PACKAGE_INIT: &str = "__init__.py";
/// Extension of a plain module file.
const MODULE_SUFFIX: &str = ".py";

/// Process-wide `fqn -> module` map. Iteration order is load order.
#[derive(Debug, Default)]
pub(crate) struct ModuleCache {
    modules: IndexMap<String, HeapId, ahash::RandomState>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fqn: &str) -> Option<HeapId> {
        self.modules.get(fqn).copied()
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.modules.contains_key(fqn)
    }

    /// Registers a module. Names are never re-bound once inserted.
    fn insert(&mut self, fqn: &str, id: HeapId) {
        self.modules.entry(fqn.to_owned()).or_insert(id);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.modules.values().copied()
    }
}

/// One import request, as issued by `ImportName`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImportRequest<'a> {
    /// Dotted name; empty for `from . import x`.
    pub name: &'a str,
    /// 0 for absolute imports, otherwise the number of leading dots.
    pub level: u32,
    pub fromlist: &'a [String],
    /// Module whose code issued the request.
    pub importer: Option<HeapId>,
}

/// Modules an import resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImportOutcome {
    /// First component named by the request (after the relative base, if any).
    pub root: HeapId,
    /// The fully resolved module.
    pub leaf: HeapId,
}

impl ImportOutcome {
    /// The value `ImportName` pushes: the root for `import a.b.c`, the leaf
    /// when a fromlist follows.
    pub fn selected(&self, fromlist_empty: bool) -> HeapId {
        if fromlist_empty { self.root } else { self.leaf }
    }
}

/// Where a component was found on disk.
#[derive(Debug)]
struct Located {
    file: PathBuf,
    /// Set for packages: the directories searched for their submodules.
    package_dirs: Option<Vec<PathBuf>>,
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    /// Resolves an import request, loading and executing modules as needed,
    /// then processes its fromlist.
    pub(crate) fn import_module(&mut self, request: &ImportRequest<'_>) -> RunResult<ImportOutcome> {
        if Tr::WANTS_IMPORTS {
            let importer = request.importer.map(|id| self.module_name(id));
            self.tracer.on_import(&ImportEvent::Request {
                name: request.name.to_owned(),
                level: request.level,
                fromlist: request.fromlist.to_vec(),
                importer,
            });
        }
        let base = if request.level > 0 {
            Some(self.relative_base(request)?)
        } else {
            None
        };
        let fqn = match (&base, request.name) {
            (Some(base), "") => base.clone(),
            (Some(base), name) => format!("{base}.{name}"),
            (None, name) => name.to_owned(),
        };
        if fqn.is_empty() {
            return Err(ExcType::value_error("Empty module name"));
        }

        let parts: Vec<&str> = fqn.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(ExcType::module_not_found(&fqn));
        }
        // index of the component `root` refers to
        let root_index = match &base {
            None => 0,
            Some(_) if request.name.is_empty() => parts.len() - 1,
            Some(base) => base.split('.').count(),
        };

        let mut parent: Option<HeapId> = None;
        let mut root = None;
        for (i, part) in parts.iter().enumerate() {
            let prefix = parts[..=i].join(".");
            let id = self.resolve_component(&prefix, part, parent)?;
            if i == root_index {
                root = Some(id);
            }
            parent = Some(id);
        }
        let (Some(root), Some(leaf)) = (root, parent) else {
            return Err(RunError::internal(format!("import of '{fqn}' resolved no modules")));
        };

        if !request.fromlist.is_empty() {
            self.handle_fromlist(leaf, request.fromlist)?;
        }
        Ok(ImportOutcome { root, leaf })
    }

    /// Absolute import of a dotted name from the host; returns the leaf module.
    pub(crate) fn import_dotted(&mut self, name: &str) -> RunResult<HeapId> {
        let request = ImportRequest {
            name,
            level: 0,
            fromlist: &[],
            importer: None,
        };
        Ok(self.import_module(&request)?.leaf)
    }

    /// Package a relative request is anchored to.
    ///
    /// A package importer anchors to itself, a plain module to its parent;
    /// each level beyond the first strips one more component.
    fn relative_base(&mut self, request: &ImportRequest<'_>) -> RunResult<String> {
        let Some(importer) = request.importer else {
            return Err(ExcType::beyond_top_level());
        };
        let HeapData::Module(module) = self.heap.get(importer) else {
            return Err(RunError::internal("relative import from a non-module"));
        };
        let package = match module.globals.get("__package__") {
            Some(Value::Str(package)) => package.to_string(),
            _ if module.is_package() => module.name.clone(),
            _ => module
                .name
                .rsplit_once('.')
                .map_or_else(String::new, |(parent, _)| parent.to_owned()),
        };
        let importer_name = module.name.clone();
        if package.is_empty() {
            return Err(ExcType::beyond_top_level());
        }
        let mut base = package.as_str();
        for _ in 1..request.level {
            match base.rsplit_once('.') {
                Some((parent, _)) => base = parent,
                None => return Err(ExcType::beyond_top_level()),
            }
        }
        if Tr::WANTS_IMPORTS {
            self.tracer.on_import(&ImportEvent::RelativeBase {
                importer: importer_name,
                level: request.level,
                base: base.to_owned(),
            });
        }
        Ok(base.to_owned())
    }

    /// Returns the module for `fqn`, loading it if the cache misses. A cached
    /// module is returned as-is, including one whose body raised.
    ///
    /// A top-level name with a native module is never searched for, so a
    /// source file of the same name cannot shadow it. Otherwise only the
    /// next component `part` is searched for: in the search path for a
    /// top-level name, else in the parent package's directories.
    fn resolve_component(&mut self, fqn: &str, part: &str, parent: Option<HeapId>) -> RunResult<HeapId> {
        if let Some(id) = self.modules.get(fqn) {
            if Tr::WANTS_IMPORTS {
                self.tracer.on_import(&ImportEvent::CacheHit { fqn: fqn.to_owned() });
            }
            return Ok(id);
        }
        if parent.is_none()
            && let Some(native) = self.builtins.native_module(part)
        {
            return self.install_native(fqn, native);
        }
        let dirs = self.search_dirs(fqn, parent)?;
        match self.locate(fqn, part, &dirs) {
            Some(located) => self.load_located(fqn, part, located, parent),
            None => Err(ExcType::module_not_found(fqn)),
        }
    }

    /// Directories to search for the last component of `fqn`.
    fn search_dirs(&self, fqn: &str, parent: Option<HeapId>) -> RunResult<Vec<PathBuf>> {
        let Some(parent) = parent else {
            return Ok(self.search_path.dirs().to_vec());
        };
        let HeapData::Module(module) = self.heap.get(parent) else {
            return Err(RunError::internal("import parent is not a module"));
        };
        match &module.path {
            Some(dirs) => Ok(dirs.clone()),
            None => Err(SimpleException::new_msg(
                ExcType::ModuleNotFoundError,
                format!("No module named '{fqn}'; '{}' is not a package", module.name),
            )
            .into()),
        }
    }

    /// First directory that has `part` as a module file or a package; the
    /// module file wins within one directory.
    fn locate(&mut self, fqn: &str, part: &str, dirs: &[PathBuf]) -> Option<Located> {
        for dir in dirs {
            if Tr::WANTS_IMPORTS {
                self.tracer.on_import(&ImportEvent::Search {
                    fqn: fqn.to_owned(),
                    dir: dir.clone(),
                });
            }
            let file = dir.join(format!("{part}{MODULE_SUFFIX}"));
            if self.source.is_file(&file) {
                return Some(Located {
                    file,
                    package_dirs: None,
                });
            }
            let package_dir = dir.join(part);
            let init = package_dir.join(PACKAGE_INIT);
            if self.source.is_file(&init) {
                return Some(Located {
                    file: init,
                    package_dirs: Some(vec![package_dir]),
                });
            }
        }
        if Tr::WANTS_IMPORTS {
            self.tracer.on_import(&ImportEvent::NotFound { fqn: fqn.to_owned() });
        }
        None
    }

    fn load_located(&mut self, fqn: &str, part: &str, located: Located, parent: Option<HeapId>) -> RunResult<HeapId> {
        if Tr::WANTS_IMPORTS {
            self.tracer.on_import(&ImportEvent::Found {
                fqn: fqn.to_owned(),
                file: located.file.clone(),
                package: located.package_dirs.is_some(),
            });
        }
        let code = self.source.load(&located.file)?;
        let id = self.install_module(fqn, code, Some(located.file), located.package_dirs)?;
        if let Some(parent) = parent {
            self.bind_submodule(parent, part, id)?;
        }
        Ok(id)
    }

    /// Creates the module record, caches it, then runs its body.
    ///
    /// The module is visible in the cache for the whole body run, so a
    /// circular import finds it half-initialized instead of re-running it.
    pub(crate) fn install_module(
        &mut self,
        fqn: &str,
        code: Code,
        file: Option<PathBuf>,
        package_dirs: Option<Vec<PathBuf>>,
    ) -> RunResult<HeapId> {
        let package = match &package_dirs {
            Some(_) => fqn.to_owned(),
            None => fqn.rsplit_once('.').map_or_else(String::new, |(parent, _)| parent.to_owned()),
        };
        let path_list = match &package_dirs {
            Some(dirs) => {
                let items = dirs.iter().map(|d| Value::str(&d.display().to_string())).collect();
                Some(self.heap.list(items)?)
            }
            None => None,
        };
        let mut module = Module::new(fqn, file.clone(), package_dirs);
        module.globals.insert("__name__".to_owned(), Value::str(fqn));
        module.globals.insert(
            "__file__".to_owned(),
            file.as_deref().map_or(Value::None, |f| Value::str(&f.display().to_string())),
        );
        module.globals.insert("__package__".to_owned(), Value::str(&package));
        if let Some(path_list) = path_list {
            module.globals.insert("__path__".to_owned(), path_list);
        }
        let id = self.heap.allocate(HeapData::Module(module))?;
        self.modules.insert(fqn, id);

        if Tr::WANTS_IMPORTS {
            self.tracer.on_import(&ImportEvent::Execute { fqn: fqn.to_owned() });
        }
        let result = self.run_module_body(id, Rc::new(code));
        let state = if result.is_ok() {
            ModuleState::Ready
        } else {
            ModuleState::Failed
        };
        if let HeapData::Module(module) = self.heap.get_mut(id) {
            module.state = state;
        }
        if Tr::WANTS_IMPORTS {
            let fqn = fqn.to_owned();
            self.tracer.on_import(&match state {
                ModuleState::Ready => ImportEvent::Ready { fqn },
                _ => ImportEvent::Failed { fqn },
            });
        }
        result.map(|()| id)
    }

    /// Creates and caches a native module. There is no body to run.
    fn install_native(&mut self, fqn: &str, native: NativeModule) -> RunResult<HeapId> {
        let mut module = Module::native(fqn, native);
        module.globals.insert("__name__".to_owned(), Value::str(fqn));
        module.globals.insert("__file__".to_owned(), Value::None);
        module.globals.insert("__package__".to_owned(), Value::str(""));
        let id = self.heap.allocate(HeapData::Module(module))?;
        self.modules.insert(fqn, id);
        if Tr::WANTS_IMPORTS {
            self.tracer.on_import(&ImportEvent::Native { fqn: fqn.to_owned() });
        }
        Ok(id)
    }

    /// Runs the file at `path` as module `fqn`, e.g. a script as `__main__`.
    ///
    /// A name already in the cache is returned without running anything.
    pub(crate) fn import_path(&mut self, path: &Path, fqn: &str) -> RunResult<HeapId> {
        if let Some(id) = self.modules.get(fqn) {
            return Ok(id);
        }
        let code = self.source.load(path)?;
        self.install_module(fqn, code, Some(path.to_path_buf()), None)
    }

    /// Binds a loaded submodule as an attribute of its parent package.
    ///
    /// Runs after the submodule body completed, and overwrites whatever the
    /// package itself bound under that name.
    fn bind_submodule(&mut self, parent: HeapId, name: &str, child: HeapId) -> RunResult<()> {
        let parent_name = self.module_name(parent);
        self.module_globals_mut(parent)?
            .insert(name.to_owned(), Value::Ref(child));
        if Tr::WANTS_IMPORTS {
            self.tracer.on_import(&ImportEvent::BindAttribute {
                parent: parent_name,
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Makes each fromlist name available on `module`: an existing attribute
    /// is left alone, otherwise a submodule of that name is imported. Names
    /// that are neither are left for `ImportFrom` to report.
    fn handle_fromlist(&mut self, module: HeapId, fromlist: &[String]) -> RunResult<()> {
        for name in fromlist {
            if name == "*" {
                if let Some(all) = self.module_globals(module)?.get("__all__").cloned() {
                    let names = self.all_names(&all)?;
                    self.handle_fromlist(module, &names)?;
                }
                continue;
            }
            let module_name = self.module_name(module);
            if self.module_globals(module)?.contains_key(name.as_str()) {
                if Tr::WANTS_IMPORTS {
                    self.tracer.on_import(&ImportEvent::Fromlist {
                        module: module_name,
                        name: name.clone(),
                        submodule: false,
                    });
                }
                continue;
            }
            let is_package = matches!(self.heap.get(module), HeapData::Module(m) if m.is_package());
            if !is_package {
                continue;
            }
            let fqn = format!("{module_name}.{name}");
            let found = if self.modules.contains(&fqn) {
                Some(self.resolve_component(&fqn, name, Some(module))?)
            } else {
                let dirs = self.search_dirs(&fqn, Some(module))?;
                match self.locate(&fqn, name, &dirs) {
                    Some(located) => Some(self.load_located(&fqn, name, located, Some(module))?),
                    None => None,
                }
            };
            if found.is_some() && Tr::WANTS_IMPORTS {
                self.tracer.on_import(&ImportEvent::Fromlist {
                    module: module_name,
                    name: name.clone(),
                    submodule: true,
                });
            }
        }
        Ok(())
    }

    /// `ImportFrom`: `name` from an imported module.
    ///
    /// Falls back to the cache entry `module.name`, which covers a package
    /// whose submodule is still initializing and so not yet bound.
    pub(crate) fn import_from(&mut self, module: &Value, name: &str) -> RunResult<Value> {
        let Some(id) = module.ref_id().filter(|id| matches!(self.heap.get(*id), HeapData::Module(_))) else {
            return match self.get_attr(module, name) {
                Err(err) if self.error_matches(&err, ExcType::AttributeError) => {
                    let type_name = module.type_name(&self.heap);
                    Err(ExcType::cannot_import_name(name, &type_name, None))
                }
                other => other,
            };
        };
        let HeapData::Module(m) = self.heap.get(id) else {
            return Err(RunError::internal("module changed kind"));
        };
        if let Some(native) = m.native
            && native.computes(name)
        {
            return self.native_attr(native, name);
        }
        if let Some(value) = m.globals.get(name) {
            return Ok(value.clone());
        }
        let (module_name, state, file) = (m.name.clone(), m.state, m.file_display());
        if let Some(sub) = self.modules.get(&format!("{module_name}.{name}")) {
            return Ok(Value::Ref(sub));
        }
        if state == ModuleState::Initializing {
            let location = file.unwrap_or_else(|| "unknown location".to_owned());
            return Err(SimpleException::new_msg(
                ExcType::ImportError,
                format!(
                    "cannot import name '{name}' from partially initialized module '{module_name}' \
                     (most likely due to a circular import) ({location})"
                ),
            )
            .into());
        }
        Err(ExcType::cannot_import_name(name, &module_name, file.as_deref()))
    }

    /// `ImportStar`: the names `from module import *` binds.
    pub(crate) fn star_names(&mut self, module: &Value) -> RunResult<Vec<(String, Value)>> {
        let Some(id) = module.ref_id().filter(|id| matches!(self.heap.get(*id), HeapData::Module(_))) else {
            return Err(ExcType::type_error("import * requires a module"));
        };
        let all = self.module_globals(id)?.get("__all__").cloned();
        match all {
            Some(all) => {
                let names = self.all_names(&all)?;
                let mut pairs = Vec::with_capacity(names.len());
                for name in names {
                    let value = match self.module_globals(id)?.get(name.as_str()) {
                        Some(value) => value.clone(),
                        None => {
                            let module_name = self.module_name(id);
                            return Err(ExcType::module_attribute_error(&module_name, &name));
                        }
                    };
                    pairs.push((name, value));
                }
                Ok(pairs)
            }
            None => Ok(self
                .module_globals(id)?
                .iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()),
        }
    }

    fn all_names(&mut self, all: &Value) -> RunResult<Vec<String>> {
        self.iterate_to_vec(all.clone())?
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.to_string()),
                other => Err(ExcType::type_error(format!(
                    "Item in __all__ must be str, not {}",
                    other.type_name(&self.heap)
                ))),
            })
            .collect()
    }

    /// Fully qualified name of a module record.
    pub(crate) fn module_name(&self, id: HeapId) -> String {
        match self.heap.get(id) {
            HeapData::Module(module) => module.name.clone(),
            _ => String::new(),
        }
    }
}
