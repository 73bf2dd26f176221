//! The interpreter context and its host-facing API.
//!
//! An [`Interpreter`] owns everything one guest program can reach: the heap,
//! the module cache, the search path and the builtin tables. Nothing is
//! process-global, so several interpreters can coexist in one host.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    builtins::{BuiltinClasses, BuiltinRegistry, MethodTable},
    bytecode::{Code, vm::CaughtException},
    config::{InterpreterConfig, SearchPath},
    exception_private::{ExcType, ExcValue, RunError, RunResult},
    exception_public::{Exception, StackFrame},
    heap::{Heap, HeapData, HeapStats},
    import::ModuleCache,
    io::{PrintWriter, StdPrint},
    object::Object,
    resource::ResourceLimits,
    source::ModuleSource,
    tracer::{NoopTracer, VmTracer},
    types::{ModuleState, class::class_name},
};

/// Name the entry script runs under.
const MAIN_MODULE: &str = "__main__";

/// A guest-language interpreter.
///
/// `P` receives `print()` output and `Tr` observes execution; both default to
/// the production choices (stdout, no tracing).
///
/// ```ignore
/// use echovm::{CollectStringPrint, Interpreter, InterpreterConfig, MemorySource, NoopTracer};
///
/// let mut source = MemorySource::new();
/// source.insert_listing("/app/main.py", "LoadConst \"hi\"\nStoreName greeting\nLoadConst None\nReturnValue")?;
/// let mut interp = Interpreter::with_parts(InterpreterConfig::new(), source, CollectStringPrint::new(), NoopTracer);
/// interp.run_main("/app/main.py")?;
/// assert_eq!(interp.get_global("__main__", "greeting"), Some(echovm::Object::String("hi".into())));
/// ```
pub struct Interpreter<P: PrintWriter = StdPrint, Tr: VmTracer = NoopTracer> {
    pub(crate) heap: Heap,
    pub(crate) modules: ModuleCache,
    pub(crate) search_path: SearchPath,
    pub(crate) builtins: BuiltinRegistry,
    pub(crate) methods: MethodTable,
    pub(crate) classes: BuiltinClasses,
    pub(crate) source: Box<dyn ModuleSource>,
    pub(crate) limits: ResourceLimits,
    pub(crate) print: P,
    pub(crate) tracer: Tr,
    /// Number of guest frames currently executing.
    pub(crate) depth: usize,
    /// Exceptions whose handlers are running, innermost last, across all frames.
    pub(crate) handled: Vec<CaughtException>,
}

impl Interpreter {
    /// Creates an interpreter that prints to stdout and does not trace.
    pub fn new(config: InterpreterConfig, source: impl ModuleSource + 'static) -> Self {
        Self::with_parts(config, source, StdPrint::default(), NoopTracer)
    }
}

impl<P: PrintWriter, Tr: VmTracer> Interpreter<P, Tr> {
    pub fn with_parts(config: InterpreterConfig, source: impl ModuleSource + 'static, print: P, tracer: Tr) -> Self {
        let (search_path, limits) = config.into_parts();
        let mut heap = Heap::new(limits.allocation_limit());
        let classes = BuiltinClasses::new(&mut heap);
        let builtins = BuiltinRegistry::new(&classes);
        Self {
            heap,
            modules: ModuleCache::new(),
            search_path,
            builtins,
            methods: MethodTable::new(),
            classes,
            source: Box::new(source),
            limits,
            print,
            tracer,
            depth: 0,
            handled: Vec::new(),
        }
    }

    /// Runs the script at `path` as `__main__`.
    ///
    /// The script's directory is put in front of the search path first, so
    /// modules next to the script shadow everything else.
    pub fn run_main(&mut self, path: impl AsRef<Path>) -> Result<(), Exception> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.search_path.prepend(&dir);
        let result = self.import_path(path, MAIN_MODULE);
        result.map(drop).map_err(|err| self.to_public(err))
    }

    /// Runs a code unit as the body of module `fqn`.
    ///
    /// A new module is created and cached unless `fqn` is already loaded, in
    /// which case the code runs again in that module's globals.
    pub fn run_code(&mut self, code: Code, fqn: &str) -> Result<(), Exception> {
        let result = self.run_code_inner(code, fqn);
        result.map_err(|err| self.to_public(err))
    }

    fn run_code_inner(&mut self, code: Code, fqn: &str) -> RunResult<()> {
        code.validate()?;
        match self.modules.get(fqn) {
            Some(id) => {
                let result = self.run_module_body(id, code.into());
                if let HeapData::Module(module) = self.heap.get_mut(id) {
                    module.state = if result.is_ok() {
                        ModuleState::Ready
                    } else {
                        ModuleState::Failed
                    };
                }
                result
            }
            None => self.install_module(fqn, code, None, None).map(drop),
        }
    }

    /// Imports a dotted module name as `import name` would, from no module.
    pub fn import(&mut self, name: &str) -> Result<(), Exception> {
        let result = self.import_dotted(name);
        result.map(drop).map_err(|err| self.to_public(err))
    }

    /// Fully qualified names of every cached module, in load order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules.names().map(str::to_owned).collect()
    }

    #[must_use]
    pub fn has_module(&self, fqn: &str) -> bool {
        self.modules.contains(fqn)
    }

    /// Reads a module global as an owned value.
    #[must_use]
    pub fn get_global(&self, module: &str, name: &str) -> Option<Object> {
        let id = self.modules.get(module)?;
        let HeapData::Module(m) = self.heap.get(id) else {
            return None;
        };
        m.globals.get(name).map(|value| Object::from_value(value, &self.heap))
    }

    /// Names bound in a module's globals, in binding order. Empty for an
    /// unknown module.
    #[must_use]
    pub fn global_names(&self, module: &str) -> Vec<String> {
        match self.modules.get(module).map(|id| self.heap.get(id)) {
            Some(HeapData::Module(m)) => m.globals.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Binds a module global from an owned value.
    pub fn set_global(&mut self, module: &str, name: &str, value: Object) -> Result<(), Exception> {
        let result = self.set_global_inner(module, name, value);
        result.map_err(|err| self.to_public(err))
    }

    fn set_global_inner(&mut self, module: &str, name: &str, value: Object) -> RunResult<()> {
        let Some(id) = self.modules.get(module) else {
            return Err(ExcType::module_not_found(module));
        };
        let value = value.to_value(&mut self.heap)?;
        self.module_globals_mut(id)?.insert(name.to_owned(), value);
        Ok(())
    }

    /// Frees every heap object that cached modules, builtin classes and
    /// handled exceptions cannot reach. Returns the number of objects freed.
    ///
    /// Only call between runs: values held by the host side of a running
    /// frame are not roots.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self
            .modules
            .ids()
            .chain(self.classes.ids())
            .chain(self.handled.iter().map(|caught| caught.value))
            .collect();
        self.heap.collect_garbage(roots)
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    #[must_use]
    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    #[must_use]
    pub fn print_writer(&self) -> &P {
        &self.print
    }

    pub fn print_writer_mut(&mut self) -> &mut P {
        &mut self.print
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    /// Converts an internal error into the host-facing exception.
    ///
    /// Load and internal failures carry no builtin kind.
    pub(crate) fn to_public(&mut self, err: RunError) -> Exception {
        match err {
            RunError::Exc(raise) => {
                let traceback: Vec<StackFrame> = raise.traceback.into_iter().rev().map(StackFrame::from).collect();
                match raise.value {
                    ExcValue::Simple(exc) => Exception::new_full(
                        exc.exc_type().to_string(),
                        Some(exc.exc_type()),
                        exc.message().map(str::to_owned),
                        traceback,
                    ),
                    ExcValue::Object(id) => {
                        let kind = self.exception_type_of(id);
                        let exc_name = match self.heap.get(id) {
                            HeapData::Instance(inst) => class_name(&self.heap, inst.class),
                            _ => "BaseException".to_owned(),
                        };
                        let message = match self.exception_message(id) {
                            Ok(message) if message.is_empty() => None,
                            Ok(message) => Some(message),
                            Err(_) => Some("<exception str() failed>".to_owned()),
                        };
                        Exception::new_full(exc_name, kind, message, traceback)
                    }
                }
            }
            RunError::Load(err) => Exception::new_full("LoadError", None, Some(err.to_string()), Vec::new()),
            RunError::Internal(msg) => Exception::new_full("InternalError", None, Some(msg.into_owned()), Vec::new()),
        }
    }
}

impl<P: PrintWriter + fmt::Debug, Tr: VmTracer> fmt::Debug for Interpreter<P, Tr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("modules", &self.modules)
            .field("search_path", &self.search_path)
            .field("heap", &self.heap.stats())
            .field("print", &self.print)
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}
