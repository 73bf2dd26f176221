/// Tests for module resolution, loading and binding.
///
/// Module files are textual listings held in a `MemorySource`, so every
/// scenario describes its whole file tree inline. One test at the end goes
/// through real directories to cover `FileSystemSource`.
use std::path::PathBuf;

use echovm::{
    CodeBuilder, CollectStringPrint, ExcType, ImportEvent, Interpreter, InterpreterConfig, MemorySource, NoopTracer,
    Object, RecordingTracer,
};
use pretty_assertions::assert_eq;

const MAIN: &str = "/app/main.py";

fn source(files: &[(&str, &str)]) -> MemorySource {
    let mut source = MemorySource::new();
    for (path, listing) in files {
        source
            .insert_listing(*path, listing)
            .unwrap_or_else(|err| panic!("{path}: {err}"));
    }
    source
}

/// Interpreter searching `/lib` that collects printed output.
fn interpreter(files: &[(&str, &str)]) -> Interpreter<CollectStringPrint, NoopTracer> {
    let config = InterpreterConfig::new().with_search_dir("/lib");
    Interpreter::with_parts(config, source(files), CollectStringPrint::new(), NoopTracer)
}

fn global(interp: &Interpreter<CollectStringPrint, NoopTracer>, module: &str, name: &str) -> Object {
    interp
        .get_global(module, name)
        .unwrap_or_else(|| panic!("{module}.{name} is not bound"))
}

/// `import pkg.sub` runs the package before the submodule and binds the root.
#[test]
fn dotted_import_binds_root_and_runs_parents_first() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r"
    LoadConst 0
    LoadConst None
    ImportName pkg.sub
    StoreName pkg
    LoadName pkg
    LoadAttr sub
    LoadAttr value
    StoreName result
    LoadConst None
    ReturnValue
",
        ),
        (
            "/lib/pkg/__init__.py",
            r#"
    LoadName print
    LoadConst "pkg"
    CallFunction 1
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/pkg/sub.py",
            r#"
    LoadName print
    LoadConst "sub"
    CallFunction 1
    PopTop
    LoadConst 42
    StoreName value
    LoadConst None
    ReturnValue
"#,
        ),
    ]);
    interp.run_main(MAIN).unwrap();
    assert_eq!(interp.print_writer().output(), "pkg\nsub\n");
    assert_eq!(global(&interp, "__main__", "result"), Object::Int(42));
    assert_eq!(interp.module_names(), vec!["__main__", "pkg", "pkg.sub"]);
    assert_eq!(
        global(&interp, "pkg", "__path__"),
        Object::List(vec![Object::String("/lib/pkg".to_owned())])
    );
    assert_eq!(global(&interp, "pkg.sub", "__package__"), Object::String("pkg".to_owned()));
}

/// A module body runs once no matter how many importers ask for it.
#[test]
fn module_body_runs_exactly_once() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r"
    LoadConst 0
    LoadConst None
    ImportName a
    StoreName a
    LoadConst 0
    LoadConst None
    ImportName b
    StoreName b
    LoadConst 0
    LoadConst None
    ImportName a
    StoreName a
    LoadConst None
    ReturnValue
",
        ),
        (
            "/lib/a.py",
            r#"
    LoadName print
    LoadConst "a"
    CallFunction 1
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/b.py",
            r#"
    LoadConst 0
    LoadConst None
    ImportName a
    StoreName a
    LoadName print
    LoadConst "b"
    CallFunction 1
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
    ]);
    interp.run_main(MAIN).unwrap();
    assert_eq!(interp.print_writer().output(), "a\nb\n");
}

/// The first search directory that has the top-level name wins, and the
/// package found there is the only place its submodules are looked for.
#[test]
fn first_directory_wins_for_each_component() {
    let files = [
        ("/one/shared.py", "LoadConst \"one\"\nStoreName origin\nLoadConst None\nReturnValue"),
        ("/two/shared.py", "LoadConst \"two\"\nStoreName origin\nLoadConst None\nReturnValue"),
        ("/one/pkg/__init__.py", "LoadConst None\nReturnValue"),
        ("/two/pkg/__init__.py", "LoadConst None\nReturnValue"),
        ("/two/pkg/extra.py", "LoadConst None\nReturnValue"),
    ];
    let config = InterpreterConfig::new().with_search_dir("/one").with_search_dir("/two");
    let mut interp = Interpreter::with_parts(config, source(&files), CollectStringPrint::new(), NoopTracer);

    interp.import("shared").unwrap();
    assert_eq!(global(&interp, "shared", "origin"), Object::String("one".to_owned()));

    let err = interp.import("pkg.extra").unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::ModuleNotFoundError));
    assert_eq!(err.message(), Some("No module named 'pkg.extra'"));
    assert!(interp.has_module("pkg"));
    assert!(!interp.has_module("pkg.extra"));
}

/// Within one directory a module file shadows a package of the same name.
#[test]
fn module_file_beats_package_directory() {
    let mut interp = interpreter(&[
        ("/lib/thing.py", "LoadConst \"module\"\nStoreName kind\nLoadConst None\nReturnValue"),
        (
            "/lib/thing/__init__.py",
            "LoadConst \"package\"\nStoreName kind\nLoadConst None\nReturnValue",
        ),
    ]);
    interp.import("thing").unwrap();
    assert_eq!(global(&interp, "thing", "kind"), Object::String("module".to_owned()));
    assert_eq!(
        global(&interp, "thing", "__file__"),
        Object::String("/lib/thing.py".to_owned())
    );
    assert_eq!(interp.get_global("thing", "__path__"), None);
}

/// A module importing its importer sees the half-initialized module: names
/// bound before the cycle are there, later ones are not yet.
#[test]
fn circular_import_sees_partial_module() {
    let mut interp = interpreter(&[
        (
            "/lib/a.py",
            r"
    LoadConst 1
    StoreName early
    LoadConst 0
    LoadConst None
    ImportName b
    StoreName b
    LoadConst 2
    StoreName late
    LoadConst None
    ReturnValue
",
        ),
        (
            "/lib/b.py",
            r#"
    LoadConst 0
    LoadConst None
    ImportName a
    StoreName a
    LoadName a
    LoadAttr early
    StoreName seen_early
    LoadName hasattr
    LoadName a
    LoadConst "late"
    CallFunction 2
    StoreName saw_late
    LoadConst None
    ReturnValue
"#,
        ),
    ]);
    interp.import("a").unwrap();
    assert_eq!(global(&interp, "b", "seen_early"), Object::Int(1));
    assert_eq!(global(&interp, "b", "saw_late"), Object::Bool(false));
    assert_eq!(global(&interp, "a", "late"), Object::Int(2));
}

/// `from a import y` against a module still running its body names the cycle.
#[test]
fn circular_from_import_reports_partial_initialization() {
    let mut interp = interpreter(&[
        (
            "/lib/a.py",
            r#"
    LoadConst 0
    LoadConst ("x",)
    ImportName b
    ImportFrom x
    StoreName x
    PopTop
    LoadConst 1
    StoreName y
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/b.py",
            r#"
    LoadConst 0
    LoadConst ("y",)
    ImportName a
    ImportFrom y
    StoreName y
    PopTop
    LoadConst 1
    StoreName x
    LoadConst None
    ReturnValue
"#,
        ),
    ]);
    let err = interp.import("a").unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::ImportError));
    assert_eq!(
        err.message(),
        Some(
            "cannot import name 'y' from partially initialized module 'a' \
             (most likely due to a circular import) (/lib/a.py)"
        )
    );
    let names: Vec<&str> = err.traceback().iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["/lib/a.py", "/lib/b.py"]);
}

/// The package attribute for a submodule is bound only once the submodule
/// finished, so the submodule body still sees what the package bound.
#[test]
fn submodule_attribute_is_bound_after_its_body() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r"
    LoadConst 0
    LoadConst None
    ImportName pkg.sub
    StoreName pkg
    LoadName pkg
    LoadAttr sub
    LoadAttr __name__
    StoreName after
    LoadConst None
    ReturnValue
",
        ),
        (
            "/lib/pkg/__init__.py",
            "LoadConst \"placeholder\"\nStoreName sub\nLoadConst None\nReturnValue",
        ),
        (
            "/lib/pkg/sub.py",
            r"
    LoadConst 0
    LoadConst None
    ImportName pkg
    StoreName pkg
    LoadName pkg
    LoadAttr sub
    StoreName during
    LoadConst None
    ReturnValue
",
        ),
    ]);
    interp.run_main(MAIN).unwrap();
    assert_eq!(
        global(&interp, "pkg.sub", "during"),
        Object::String("placeholder".to_owned())
    );
    assert_eq!(global(&interp, "__main__", "after"), Object::String("pkg.sub".to_owned()));
}

/// A submodule probing its package for itself mid-body finds nothing.
#[test]
fn submodule_is_absent_from_package_while_running() {
    let mut interp = interpreter(&[
        ("/lib/bare/__init__.py", "LoadConst None\nReturnValue"),
        (
            "/lib/bare/child.py",
            r#"
    LoadConst 0
    LoadConst None
    ImportName bare
    StoreName bare
    LoadName hasattr
    LoadName bare
    LoadConst "child"
    CallFunction 2
    StoreName probe
    LoadConst None
    ReturnValue
"#,
        ),
    ]);
    assert_eq!(interp.get_global("bare", "child"), None);
    interp.import("bare.child").unwrap();
    assert_eq!(global(&interp, "bare.child", "probe"), Object::Bool(false));
    assert!(interp.get_global("bare", "child").is_some());
}

/// A module whose body raised stays cached with whatever it bound before
/// failing; importing it again returns that module without re-running the body.
#[test]
fn failed_module_is_cached_and_not_executed_again() {
    let mut interp = interpreter(&[(
        "/lib/bad.py",
        r#"
    LoadName print
    LoadConst "running bad"
    CallFunction 1
    PopTop
    LoadConst 1
    StoreName early
    LoadName ValueError
    LoadConst "boom"
    CallFunction 1
    RaiseVarargs 1
    LoadConst 2
    StoreName late
    LoadConst None
    ReturnValue
"#,
    )]);
    let first = interp.import("bad").unwrap_err();
    assert_eq!(first.kind(), Some(ExcType::ValueError));
    assert_eq!(first.message(), Some("boom"));

    interp.import("bad").unwrap();
    assert_eq!(global(&interp, "bad", "early"), Object::Int(1));
    assert_eq!(interp.get_global("bad", "late"), None);
    assert_eq!(interp.print_writer().output(), "running bad\n");
}

fn dict_keys(object: Object) -> Vec<Object> {
    match object {
        Object::Dict(pairs) => pairs.into_iter().map(|(key, _)| key).collect(),
        other => panic!("expected a dict, got {other:?}"),
    }
}

/// `sys` comes from the interpreter, ahead of any `sys.py` on the search
/// path, and reports the module cache and the search path.
#[test]
fn sys_reports_loaded_modules_and_search_path() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r#"
    LoadConst 0
    LoadConst None
    ImportName sys
    StoreName sys
    LoadConst 0
    LoadConst None
    ImportName helper
    StoreName helper
    LoadName sys
    LoadAttr modules
    StoreName loaded
    LoadConst 0
    LoadConst ("path",)
    ImportName sys
    ImportFrom path
    StoreName path
    PopTop
    LoadConst 1
    LoadName loaded
    LoadConst "fake"
    StoreSubscr
    LoadName sys
    LoadAttr modules
    StoreName again
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/sys.py",
            r#"
    LoadName print
    LoadConst "shadowed"
    CallFunction 1
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
        ("/lib/helper.py", "LoadConst None\nReturnValue"),
    ]);
    interp.run_main(MAIN).unwrap();

    let names = |names: &[&str]| names.iter().map(|n| Object::String((*n).to_owned())).collect::<Vec<_>>();
    assert_eq!(dict_keys(global(&interp, "__main__", "loaded")), names(&["__main__", "sys", "helper", "fake"]));
    assert_eq!(dict_keys(global(&interp, "__main__", "again")), names(&["__main__", "sys", "helper"]));
    assert_eq!(global(&interp, "__main__", "path"), Object::List(names(&["/app", "/lib"])));
    assert_eq!(global(&interp, "sys", "__file__"), Object::None);
    assert_eq!(interp.print_writer().output(), "");
}

/// The computed attributes of `sys` cannot be rebound.
#[test]
fn sys_views_are_read_only() {
    let mut interp = interpreter(&[(
        MAIN,
        r#"
    LoadConst 0
    LoadConst None
    ImportName sys
    StoreName sys
    LoadConst "/tmp"
    LoadName sys
    StoreAttr path
    LoadConst None
    ReturnValue
"#,
    )]);
    let err = interp.run_main(MAIN).unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::AttributeError));
    assert_eq!(err.message(), Some("module 'sys' attribute 'path' is read-only"));
}

/// `from .b import value` and `from ..b import value` resolve against the
/// importer's package.
#[test]
fn relative_imports_anchor_to_the_importing_package() {
    let mut files = source(&[
        ("/lib/pkg/__init__.py", "LoadConst None\nReturnValue"),
        ("/lib/pkg/b.py", "LoadConst 7\nStoreName value\nLoadConst None\nReturnValue"),
        (
            "/lib/pkg/a.py",
            r#"
    LoadConst 1
    LoadConst ("value",)
    ImportName b
    ImportFrom value
    StoreName value
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
        ("/lib/pkg/sub/__init__.py", "LoadConst None\nReturnValue"),
    ]);
    // `from ..b import value` then `from .. import a`
    let mut c = CodeBuilder::module("<module>", "/lib/pkg/sub/c.py");
    c.import_name("b", 2, &["value"]).import_from("value").store_name("value").pop_top();
    c.import_name("", 2, &["a"]).import_from("a").store_name("a").pop_top();
    c.return_none();
    files.insert("/lib/pkg/sub/c.py", c.build().unwrap());

    let config = InterpreterConfig::new().with_search_dir("/lib");
    let mut interp = Interpreter::with_parts(config, files, CollectStringPrint::new(), NoopTracer);
    interp.import("pkg.a").unwrap();
    interp.import("pkg.sub.c").unwrap();
    assert_eq!(global(&interp, "pkg.a", "value"), Object::Int(7));
    assert_eq!(global(&interp, "pkg.sub.c", "value"), Object::Int(7));
    assert!(interp.has_module("pkg.b"));
    assert_eq!(
        interp.module_names(),
        vec!["pkg", "pkg.a", "pkg.b", "pkg.sub", "pkg.sub.c"]
    );
}

/// More leading dots than the importer has packages is an `ImportError`,
/// not a `ModuleNotFoundError`.
#[test]
fn relative_import_beyond_top_level() {
    let mut interp = interpreter(&[
        ("/lib/pkg/__init__.py", "LoadConst None\nReturnValue"),
        (
            "/lib/pkg/deep.py",
            r#"
    LoadConst 3
    LoadConst ("x",)
    ImportName y
    ImportFrom x
    StoreName x
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
    ]);
    let err = interp.import("pkg.deep").unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::ImportError));
    assert_eq!(err.message(), Some("attempted relative import beyond top-level package"));
}

/// `from pkg import sub` loads the submodule when the package has no such attribute.
#[test]
fn fromlist_loads_missing_submodule() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r#"
    LoadConst 0
    LoadConst ("sub", "helper")
    ImportName pkg
    ImportFrom sub
    StoreName sub
    ImportFrom helper
    StoreName helper
    PopTop
    LoadName sub
    LoadAttr value
    StoreName v
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/pkg/__init__.py",
            "LoadConst \"attr\"\nStoreName helper\nLoadConst None\nReturnValue",
        ),
        ("/lib/pkg/sub.py", "LoadConst 3\nStoreName value\nLoadConst None\nReturnValue"),
        ("/lib/pkg/helper.py", "LoadConst None\nReturnValue"),
    ]);
    interp.run_main(MAIN).unwrap();
    assert_eq!(global(&interp, "__main__", "v"), Object::Int(3));
    // an existing attribute is not replaced by a same-named submodule
    assert_eq!(global(&interp, "__main__", "helper"), Object::String("attr".to_owned()));
    assert!(!interp.has_module("pkg.helper"));
}

/// `from mod import *` honours `__all__`, otherwise takes the public names.
#[test]
fn star_import_uses_all_or_public_names() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r#"
    LoadConst 0
    LoadConst ("*",)
    ImportName listed
    ImportStar
    LoadConst 0
    LoadConst ("*",)
    ImportName unlisted
    ImportStar
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/listed.py",
            r#"
    LoadConst 1
    StoreName a
    LoadConst 2
    StoreName b
    LoadConst "a"
    BuildList 1
    StoreName __all__
    LoadConst None
    ReturnValue
"#,
        ),
        (
            "/lib/unlisted.py",
            r"
    LoadConst 3
    StoreName c
    LoadConst 4
    StoreName _hidden
    LoadConst None
    ReturnValue
",
        ),
    ]);
    interp.run_main(MAIN).unwrap();
    assert_eq!(global(&interp, "__main__", "a"), Object::Int(1));
    assert_eq!(interp.get_global("__main__", "b"), None);
    assert_eq!(global(&interp, "__main__", "c"), Object::Int(3));
    assert_eq!(interp.get_global("__main__", "_hidden"), None);
    assert_eq!(global(&interp, "__main__", "__name__"), Object::String("__main__".to_owned()));
}

#[test]
fn from_import_of_missing_name() {
    let mut interp = interpreter(&[
        (
            MAIN,
            r#"
    LoadConst 0
    LoadConst ("missing",)
    ImportName mod
    ImportFrom missing
    StoreName missing
    PopTop
    LoadConst None
    ReturnValue
"#,
        ),
        ("/lib/mod.py", "LoadConst None\nReturnValue"),
    ]);
    let err = interp.run_main(MAIN).unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::ImportError));
    assert_eq!(err.message(), Some("cannot import name 'missing' from 'mod' (/lib/mod.py)"));
}

/// Importing below a plain module names the module that is not a package.
#[test]
fn submodule_of_plain_module() {
    let mut interp = interpreter(&[("/lib/mod.py", "LoadConst None\nReturnValue")]);
    let err = interp.import("mod.sub").unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::ModuleNotFoundError));
    assert_eq!(err.message(), Some("No module named 'mod.sub'; 'mod' is not a package"));
    assert!(err.is_instance_of(ExcType::ImportError));
}

/// An unresolvable import escapes with a traceback pointing at the import line.
#[test]
fn missing_module_traceback() {
    let mut interp = interpreter(&[(
        MAIN,
        r"
.src x = 1
.src y = 2
.src import helpers
.line 1
    LoadConst 1
    StoreName x
.line 2
    LoadConst 2
    StoreName y
.line 3
    LoadConst 0
    LoadConst None
    ImportName helpers
    StoreName helpers
    LoadConst None
    ReturnValue
",
    )]);
    let err = interp.run_main(MAIN).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Traceback (most recent call last):\n  \
         File \"/app/main.py\", line 3, in <module>\n    \
         import helpers\n\
         ModuleNotFoundError: No module named 'helpers'"
    );
    // the script directory went in front of the configured path
    assert_eq!(
        interp.search_path().dirs(),
        &[PathBuf::from("/app"), PathBuf::from("/lib")]
    );
}

/// The recording tracer sees every resolution step in order.
#[test]
fn import_events_are_traced_in_order() {
    let files = source(&[
        ("/lib/pkg/__init__.py", "LoadConst None\nReturnValue"),
        ("/lib/pkg/sub.py", "LoadConst None\nReturnValue"),
    ]);
    let config = InterpreterConfig::new().with_search_dir("/lib");
    let mut interp = Interpreter::with_parts(config, files, CollectStringPrint::new(), RecordingTracer::new());
    interp.import("pkg.sub").unwrap();
    interp.import("pkg.sub").unwrap();

    let events: Vec<ImportEvent> = interp.tracer().import_events().cloned().collect();
    let request = || ImportEvent::Request {
        name: "pkg.sub".to_owned(),
        level: 0,
        fromlist: Vec::new(),
        importer: None,
    };
    let fqn = |s: &str| s.to_owned();
    assert_eq!(
        events,
        vec![
            request(),
            ImportEvent::Search {
                fqn: fqn("pkg"),
                dir: PathBuf::from("/lib"),
            },
            ImportEvent::Found {
                fqn: fqn("pkg"),
                file: PathBuf::from("/lib/pkg/__init__.py"),
                package: true,
            },
            ImportEvent::Execute { fqn: fqn("pkg") },
            ImportEvent::Ready { fqn: fqn("pkg") },
            ImportEvent::Search {
                fqn: fqn("pkg.sub"),
                dir: PathBuf::from("/lib/pkg"),
            },
            ImportEvent::Found {
                fqn: fqn("pkg.sub"),
                file: PathBuf::from("/lib/pkg/sub.py"),
                package: false,
            },
            ImportEvent::Execute { fqn: fqn("pkg.sub") },
            ImportEvent::Ready { fqn: fqn("pkg.sub") },
            ImportEvent::BindAttribute {
                parent: fqn("pkg"),
                name: fqn("sub"),
            },
            request(),
            ImportEvent::CacheHit { fqn: fqn("pkg") },
            ImportEvent::CacheHit { fqn: fqn("pkg.sub") },
        ]
    );
    assert_eq!(events[3].to_string(), "execute pkg");
}

/// Module files on disk, found through the search path.
#[test]
fn filesystem_source_loads_listing_files() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib");
    std::fs::create_dir_all(lib.join("tools")).unwrap();
    std::fs::write(lib.join("tools").join("__init__.py"), "LoadConst None\nReturnValue\n").unwrap();
    std::fs::write(
        lib.join("tools").join("math.py"),
        "LoadConst 6\nLoadConst 7\nBinaryOp Mul\nStoreName answer\nLoadConst None\nReturnValue\n",
    )
    .unwrap();
    let main = dir.path().join("main.py");
    std::fs::write(
        &main,
        r#"
    LoadConst 0
    LoadConst ("answer",)
    ImportName tools.math
    ImportFrom answer
    StoreName answer
    PopTop
    LoadName print
    LoadName answer
    CallFunction 1
    PopTop
    LoadConst None
    ReturnValue
"#,
    )
    .unwrap();

    let config = InterpreterConfig::new().with_search_dir(&lib);
    let mut interp = Interpreter::with_parts(
        config,
        echovm::FileSystemSource::default(),
        CollectStringPrint::new(),
        NoopTracer,
    );
    interp.run_main(&main).unwrap();
    assert_eq!(interp.print_writer().output(), "42\n");
    let file = lib.join("tools").join("math.py");
    assert_eq!(
        interp.get_global("tools.math", "__file__"),
        Some(Object::String(file.display().to_string()))
    );
}
