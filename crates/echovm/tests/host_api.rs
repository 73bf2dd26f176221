/// Tests for the host-facing surface: globals in and out, garbage collection,
/// code-unit validation and decoding, resource limits and tracing.
use echovm::{
    CodeBuilder, CodeUnitFrontend, CollectStringPrint, Const, DEFAULT_MAX_RECURSION_DEPTH, ExcType, ImportEvent, Interpreter, InterpreterConfig,
    LoadError, MemorySource, NoPrint, NoopTracer, Object, Opcode, RecordingTracer, ResourceLimits, TraceEvent,
    parse_listing,
};
use pretty_assertions::assert_eq;

fn interpreter() -> Interpreter<CollectStringPrint, NoopTracer> {
    Interpreter::with_parts(
        InterpreterConfig::new(),
        MemorySource::new(),
        CollectStringPrint::new(),
        NoopTracer,
    )
}

fn listing(text: &str) -> echovm::Code {
    parse_listing(text).unwrap_or_else(|err| panic!("bad listing: {err}"))
}

/// Values set by the host are ordinary guest objects afterwards.
#[test]
fn globals_round_trip_between_host_and_guest() {
    let mut interp = interpreter();
    interp.run_code(listing("LoadConst None\nReturnValue"), "config").unwrap();
    interp
        .set_global(
            "config",
            "items",
            Object::List(vec![Object::Int(1), Object::String("a".to_owned())]),
        )
        .unwrap();
    interp
        .run_code(
            listing(
                r"
    LoadName items
    LoadAttr append
    LoadConst 3
    CallFunction 1
    PopTop
    LoadName len
    LoadName items
    CallFunction 1
    StoreName n
    LoadConst None
    ReturnValue
",
            ),
            "config",
        )
        .unwrap();
    assert_eq!(
        interp.get_global("config", "items"),
        Some(Object::List(vec![
            Object::Int(1),
            Object::String("a".to_owned()),
            Object::Int(3)
        ]))
    );
    assert_eq!(interp.get_global("config", "n"), Some(Object::Int(3)));
    assert_eq!(interp.get_global("config", "absent"), None);
    assert_eq!(interp.get_global("nowhere", "n"), None);

    let mapping = Object::Dict(vec![(
        Object::String("k".to_owned()),
        Object::Tuple(vec![Object::Int(1), Object::None]),
    )]);
    interp.set_global("config", "mapping", mapping.clone()).unwrap();
    assert_eq!(interp.get_global("config", "mapping"), Some(mapping));
}

#[test]
fn set_global_rejects_unknown_module_and_output_only_values() {
    let mut interp = interpreter();
    let err = interp.set_global("ghost", "x", Object::Int(1)).unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::ModuleNotFoundError));

    interp.run_code(listing("LoadConst None\nReturnValue"), "m").unwrap();
    let err = interp
        .set_global("m", "x", Object::Repr("<function f>".to_owned()))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::TypeError));
}

/// Unreachable cycles are reclaimed; reachable ones survive.
#[test]
fn garbage_collection_frees_unreachable_cycles() {
    let mut interp = interpreter();
    interp
        .run_code(
            listing(
                r#"
    BuildList 0
    StoreName keep
    LoadName keep
    LoadAttr append
    LoadName keep
    CallFunction 1
    PopTop
    BuildList 0
    StoreName lost
    LoadName lost
    LoadAttr append
    LoadName lost
    CallFunction 1
    PopTop
    DeleteName lost
    LoadBuildClass
    LoadConst &Node
    LoadConst "Node"
    MakeFunction 0
    LoadConst "Node"
    CallFunction 2
    StoreName Node
    LoadName Node
    CallFunction 0
    StoreName a
    LoadName Node
    CallFunction 0
    StoreName b
    LoadName b
    LoadName a
    StoreAttr peer
    LoadName a
    LoadName b
    StoreAttr peer
    DeleteName a
    DeleteName b
    LoadConst None
    ReturnValue
.code Node
.flags function class_body
    LoadConst None
    ReturnValue
.end
"#,
            ),
            "__main__",
        )
        .unwrap();
    let before = interp.heap_stats();
    let freed = interp.collect_garbage();
    // the dropped list, both bound `append` methods and the two instances
    assert!(freed >= 5, "freed {freed}");
    let after = interp.heap_stats();
    assert_eq!(after.live, before.live - freed);
    assert_eq!(after.last_collected, freed);
    assert_eq!(interp.collect_garbage(), 0);

    assert_eq!(
        interp.get_global("__main__", "keep"),
        Some(Object::List(vec![Object::Repr("[...]".to_owned())]))
    );
}

/// Code units are checked before anything runs.
#[test]
fn invalid_code_units_are_rejected_before_running() {
    let mut interp = interpreter();
    let mut code = listing("LoadName print\nLoadConst 1\nCallFunction 1\nReturnValue");
    code.version = 99;
    let err = interp.run_code(code, "__main__").unwrap_err();
    assert_eq!(err.exc_type(), "LoadError");
    assert_eq!(err.kind(), None);
    assert_eq!(
        err.message(),
        Some("code unit '<module>' targets unsupported instruction-set version 99")
    );
    assert_eq!(interp.print_writer().output(), "");
    assert!(!interp.has_module("__main__"));

    let err = parse_listing(".version 1\nLoadConst None\nYieldValue\n").unwrap_err();
    assert!(
        matches!(err, LoadError::UnavailableOpcode { opcode: Opcode::YieldValue, version: 1, .. }),
        "{err}"
    );
}

/// A module file holding an unusable unit fails the import with a load error.
#[test]
fn import_of_invalid_unit_is_a_load_error() {
    let mut b = CodeBuilder::module("<module>", "/lib/old.py");
    b.load_const(Const::None).op(Opcode::YieldValue).pop_top();
    b.return_none();
    let mut code = b.build().unwrap();
    code.version = 1;
    let mut source = MemorySource::new();
    source.insert("/lib/old.py", code);

    let config = InterpreterConfig::new().with_search_dir("/lib");
    let mut interp = Interpreter::with_parts(config, source, NoPrint, NoopTracer);
    let err = interp.import("old").unwrap_err();
    assert_eq!(err.kind(), None);
    assert!(
        err.message().unwrap_or_default().contains("YieldValue"),
        "{}",
        err.summary()
    );
}

/// All three encodings of a code unit decode to the same unit.
#[test]
fn code_units_decode_from_every_encoding() {
    let code = listing(
        r#"
.filename calc.py
    LoadConst &twice
    LoadConst "twice"
    MakeFunction 0
    StoreName twice
    LoadConst None
    ReturnValue
.code twice
.args n
    LoadFast n
    LoadConst 2
    BinaryOp Mul
    ReturnValue
.end
"#,
    );
    let binary = code.to_bytes().unwrap();
    assert_eq!(CodeUnitFrontend::decode(&binary).unwrap(), code);
    let json = serde_json::to_string(&code).unwrap();
    assert_eq!(CodeUnitFrontend::decode(json.as_bytes()).unwrap(), code);

    let err = CodeUnitFrontend::decode(b"LoadConst\n").unwrap_err();
    assert!(matches!(err, LoadError::Listing { line: 1, .. }), "{err}");
}

/// Unbounded recursion becomes a `RecursionError`, and the interpreter is
/// usable afterwards.
#[test]
fn recursion_limit_raises_recursion_error() {
    let config = InterpreterConfig::new().with_limits(ResourceLimits::new().max_recursion_depth(40));
    let mut interp = Interpreter::with_parts(config, MemorySource::new(), NoPrint, NoopTracer);
    let err = interp
        .run_code(
            listing(
                r#"
    LoadConst &f
    LoadConst "f"
    MakeFunction 0
    StoreName f
    LoadName f
    CallFunction 0
    ReturnValue
.code f
    LoadGlobal f
    CallFunction 0
    ReturnValue
.end
"#,
            ),
            "__main__",
        )
        .unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::RecursionError));
    assert_eq!(err.message(), Some("maximum recursion depth exceeded"));
    assert_eq!(err.traceback().len(), 40);

    interp
        .run_code(listing("LoadConst 1\nStoreName ok\nLoadConst None\nReturnValue"), "__main__")
        .unwrap();
    assert_eq!(interp.get_global("__main__", "ok"), Some(Object::Int(1)));
}

/// The default limit is reached through the interpreter's own frame stack,
/// on an ordinary test thread.
#[test]
fn default_recursion_limit_raises_recursion_error() {
    let mut interp = interpreter();
    let err = interp
        .run_code(
            listing(
                r#"
    LoadConst &f
    LoadConst "f"
    MakeFunction 0
    StoreName f
    LoadName f
    LoadConst 0
    CallFunction 1
    ReturnValue
.code f
.args n
    LoadGlobal f
    LoadFast n
    LoadConst 1
    BinaryOp Add
    CallFunction 1
    ReturnValue
.end
"#,
            ),
            "__main__",
        )
        .unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::RecursionError));
    assert_eq!(err.traceback().len(), DEFAULT_MAX_RECURSION_DEPTH);
    assert_eq!(err.traceback()[0].name, "<module>");
    assert_eq!(err.traceback()[1].name, "f");
}

#[test]
fn allocation_limit_raises_memory_error() {
    let config = InterpreterConfig::new().with_limits(ResourceLimits::new().max_allocations(500));
    let mut interp = Interpreter::with_parts(config, MemorySource::new(), NoPrint, NoopTracer);
    let err = interp
        .run_code(listing("top:\n    BuildList 0\n    StoreName x\n    Jump top\n"), "__main__")
        .unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::MemoryError));
}

/// Frames, handlers and instructions are all visible to a recording tracer.
#[test]
fn recording_tracer_sees_calls_and_handlers() {
    let mut interp = Interpreter::with_parts(
        InterpreterConfig::new(),
        MemorySource::new(),
        NoPrint,
        RecordingTracer::new(),
    );
    interp
        .run_code(
            listing(
                r#"
    LoadConst &f
    LoadConst "f"
    MakeFunction 0
    CallFunction 0
    PopTop
    SetupExcept handler
    LoadName missing
    PopTop
    PopBlock
    Jump done
handler:
    PopTop
    PopExcept
done:
    LoadConst None
    ReturnValue
.code f
    LoadConst None
    ReturnValue
.end
"#,
            ),
            "__main__",
        )
        .unwrap();
    let frames: Vec<&TraceEvent> = interp
        .tracer()
        .events()
        .iter()
        .filter(|e| !matches!(e, TraceEvent::Instruction { .. } | TraceEvent::Import(_)))
        .collect();
    assert_eq!(
        frames,
        vec![
            &TraceEvent::Call {
                func_name: Some("<module>".to_owned()),
                depth: 1,
            },
            &TraceEvent::Call {
                func_name: Some("f".to_owned()),
                depth: 2,
            },
            &TraceEvent::Return { depth: 1 },
            &TraceEvent::ExceptionPush { depth: 1 },
            &TraceEvent::ExceptionPop { depth: 0 },
            &TraceEvent::Return { depth: 0 },
        ]
    );
    let imports: Vec<&ImportEvent> = interp
        .tracer()
        .events()
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Import(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(
        imports,
        vec![
            &ImportEvent::Execute {
                fqn: "__main__".to_owned()
            },
            &ImportEvent::Ready {
                fqn: "__main__".to_owned()
            },
        ]
    );
    assert!(interp.tracer().events().iter().any(|e| matches!(
        e,
        TraceEvent::Instruction {
            opcode: Opcode::CallFunction,
            ..
        }
    )));
}
