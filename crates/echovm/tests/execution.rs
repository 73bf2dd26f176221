/// Tests for code-unit execution: functions and closures, generators,
/// exception handling and tracebacks, classes and the builtins they lean on.
///
/// Every program is a listing run as `__main__`; results are read back as
/// module globals or from the collected `print()` output.
use echovm::{
    CollectStringPrint, ExcType, Exception, Interpreter, InterpreterConfig, MemorySource, NoopTracer, Object,
    parse_listing,
};
use pretty_assertions::assert_eq;

type TestInterpreter = Interpreter<CollectStringPrint, NoopTracer>;

fn interpreter() -> TestInterpreter {
    Interpreter::with_parts(
        InterpreterConfig::new(),
        MemorySource::new(),
        CollectStringPrint::new(),
        NoopTracer,
    )
}

/// Runs `listing` as (or again inside) `__main__`.
fn exec(interp: &mut TestInterpreter, listing: &str) -> Result<(), Exception> {
    let code = parse_listing(listing).unwrap_or_else(|err| panic!("bad listing: {err}"));
    interp.run_code(code, "__main__")
}

fn run(listing: &str) -> TestInterpreter {
    let mut interp = interpreter();
    exec(&mut interp, listing).unwrap_or_else(|exc| panic!("unexpected exception:\n{exc}"));
    interp
}

fn run_err(listing: &str) -> Exception {
    let mut interp = interpreter();
    exec(&mut interp, listing).expect_err("listing should raise")
}

fn global(interp: &TestInterpreter, name: &str) -> Object {
    interp
        .get_global("__main__", name)
        .unwrap_or_else(|| panic!("'{name}' is not bound"))
}

/// Each call of the factory gets its own cell; the inner function updates it.
#[test]
fn closures_share_their_cell() {
    let interp = run(r#"
    LoadConst &make_counter
    LoadConst "make_counter"
    MakeFunction 0
    StoreName make_counter
    LoadName make_counter
    CallFunction 0
    StoreName c
    LoadName make_counter
    CallFunction 0
    StoreName other
    LoadName c
    CallFunction 0
    PopTop
    LoadName c
    CallFunction 0
    StoreName second
    LoadName other
    CallFunction 0
    StoreName first_of_other
    LoadName c
    LoadAttr __qualname__
    StoreName qualname
    LoadConst None
    ReturnValue

.code make_counter
.cellvars count
    LoadConst 0
    StoreDeref count
    LoadClosure count
    BuildTuple 1
    LoadConst &inc
    LoadConst "make_counter.<locals>.inc"
    MakeFunction 8
    ReturnValue
.code inc
.freevars count
    LoadDeref count
    LoadConst 1
    BinaryOp Add
    StoreDeref count
    LoadDeref count
    ReturnValue
.end
.end
"#);
    assert_eq!(global(&interp, "second"), Object::Int(2));
    assert_eq!(global(&interp, "first_of_other"), Object::Int(1));
    assert_eq!(
        global(&interp, "qualname"),
        Object::String("make_counter.<locals>.inc".to_owned())
    );
}

/// Defaults and keyword arguments bind the way the parameter list says.
#[test]
fn defaults_and_keyword_arguments() {
    let interp = run(r#"
    LoadConst (10,)
    LoadConst &scale
    LoadConst "scale"
    MakeFunction 1
    StoreName scale
    LoadName scale
    LoadConst 2
    CallFunction 1
    StoreName by_default
    LoadName scale
    LoadConst 2
    LoadConst 3
    LoadConst ("factor",)
    CallFunctionKw 2
    StoreName by_keyword
    LoadConst None
    ReturnValue

.code scale
.args value factor
    LoadFast value
    LoadFast factor
    BinaryOp Mul
    ReturnValue
.end
"#);
    assert_eq!(global(&interp, "by_default"), Object::Int(20));
    assert_eq!(global(&interp, "by_keyword"), Object::Int(6));
}

const GENERATOR_DEF: &str = r#"
    LoadConst &gen
    LoadConst "gen"
    MakeFunction 0
    StoreName gen
    LoadName gen
    LoadConst 5
    CallFunction 1
    StoreName g
    LoadConst None
    ReturnValue

.code gen
.flags function generator
.args n
    LoadGlobal print
    LoadConst "started"
    CallFunction 1
    PopTop
    LoadConst 1
    YieldValue
    PopTop
    LoadFast n
    YieldValue
    PopTop
    LoadConst None
    ReturnValue
.end
"#;

/// Calling a generator function runs nothing; iteration drives the body.
#[test]
fn generator_body_runs_lazily() {
    let mut interp = run(GENERATOR_DEF);
    assert_eq!(interp.print_writer().output(), "");

    exec(
        &mut interp,
        r#"
    LoadName list
    LoadName g
    CallFunction 1
    StoreName items
    LoadName next
    LoadName g
    LoadConst "done"
    CallFunction 2
    StoreName after
    LoadConst None
    ReturnValue
"#,
    )
    .unwrap();
    assert_eq!(interp.print_writer().output(), "started\n");
    assert_eq!(global(&interp, "items"), Object::List(vec![Object::Int(1), Object::Int(5)]));
    assert_eq!(global(&interp, "after"), Object::String("done".to_owned()));

    let err = exec(&mut interp, "LoadName next\nLoadName g\nCallFunction 1\nReturnValue").unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::StopIteration));
}

/// `send` delivers a value to the suspended `YieldValue`.
#[test]
fn generator_send_resumes_with_value() {
    let interp = run(r#"
    LoadConst &echo
    LoadConst "echo"
    MakeFunction 0
    StoreName echo
    LoadName echo
    CallFunction 0
    StoreName g
    LoadName next
    LoadName g
    CallFunction 1
    StoreName first
    LoadName g
    LoadAttr send
    LoadConst "ping"
    CallFunction 1
    StoreName reply
    LoadConst None
    ReturnValue

.code echo
.flags function generator
    LoadConst "ready"
    YieldValue
    StoreFast received
    LoadConst "got "
    LoadFast received
    FormatValue 0
    BuildString 2
    YieldValue
    PopTop
    LoadConst None
    ReturnValue
.end
"#);
    assert_eq!(global(&interp, "first"), Object::String("ready".to_owned()));
    assert_eq!(global(&interp, "reply"), Object::String("got ping".to_owned()));
}

/// A generator that resumes itself is rejected instead of re-entered.
#[test]
fn generator_reentry_is_a_value_error() {
    let err = run_err(
        r#"
    LoadConst &reenter
    LoadConst "reenter"
    MakeFunction 0
    StoreName reenter
    LoadName reenter
    CallFunction 0
    StoreName g
    LoadName next
    LoadName g
    CallFunction 1
    ReturnValue

.code reenter
.flags function generator
    LoadGlobal next
    LoadGlobal g
    CallFunction 1
    YieldValue
    PopTop
    LoadConst None
    ReturnValue
.end
"#,
    );
    assert_eq!(err.kind(), Some(ExcType::ValueError));
    assert_eq!(err.message(), Some("generator already executing"));
}

/// A bare `raise` in a handler re-raises the same object.
#[test]
fn reraise_preserves_identity() {
    let interp = run(r#"
    SetupExcept outer
    SetupExcept inner
    LoadName ValueError
    LoadConst "first"
    CallFunction 1
    RaiseVarargs 1
inner:
    StoreName e
    RaiseVarargs 0
outer:
    StoreName e2
    PopExcept
    LoadName e
    LoadName e2
    CompareOp Is
    StoreName same
    LoadConst None
    ReturnValue
"#);
    assert_eq!(global(&interp, "same"), Object::Bool(true));
    assert_eq!(
        global(&interp, "e"),
        Object::Exception {
            exc_type: "ValueError".to_owned(),
            message: Some("first".to_owned()),
        }
    );
}

/// A bare `raise` in a function called from a handler re-raises the
/// caller's exception; with no handler running anywhere it is an error.
#[test]
fn reraise_reaches_into_called_functions() {
    let program = r#"
    LoadConst &rethrow
    LoadConst "rethrow"
    MakeFunction 0
    StoreName rethrow
    SetupExcept handler
    LoadName ValueError
    LoadConst "orig"
    CallFunction 1
    RaiseVarargs 1
handler:
    StoreName first
    SetupExcept again
    LoadName rethrow
    CallFunction 0
    PopTop
    PopBlock
    Jump done
again:
    StoreName second
    PopExcept
done:
    PopExcept
    LoadName first
    LoadName second
    CompareOp Is
    StoreName same
    LoadConst None
    ReturnValue

.code rethrow
    RaiseVarargs 0
    LoadConst None
    ReturnValue
.end
"#;
    let interp = run(program);
    assert_eq!(global(&interp, "same"), Object::Bool(true));
    assert_eq!(
        global(&interp, "second"),
        Object::Exception {
            exc_type: "ValueError".to_owned(),
            message: Some("orig".to_owned()),
        }
    );

    let err = run_err(
        r#"
    LoadConst &rethrow
    LoadConst "rethrow"
    MakeFunction 0
    CallFunction 0
    ReturnValue

.code rethrow
    RaiseVarargs 0
    LoadConst None
    ReturnValue
.end
"#,
    );
    assert_eq!(err.kind(), Some(ExcType::RuntimeError));
    assert_eq!(err.message(), Some("No active exception to reraise"));
}

/// `except KeyError:` catches a subclass match and lets others through.
#[test]
fn exception_match_selects_handler() {
    let interp = run(r#"
    BuildMap 0
    StoreName d
    SetupExcept handler
    LoadName d
    LoadConst "k"
    BinarySubscr
    PopTop
    PopBlock
    Jump done
handler:
    DupTop
    LoadName LookupError
    CompareOp ExceptionMatch
    PopJumpIfFalse unmatched
    StoreName caught
    PopExcept
    Jump done
unmatched:
    Reraise
done:
    LoadConst None
    ReturnValue
"#);
    assert!(
        matches!(global(&interp, "caught"), Object::Exception { ref exc_type, .. } if exc_type == "KeyError"),
        "KeyError should be caught as LookupError"
    );

    let err = run_err(
        r"
    SetupExcept handler
    LoadConst 1
    LoadConst 0
    BinaryOp TrueDiv
    PopTop
    PopBlock
    Jump done
handler:
    DupTop
    LoadName LookupError
    CompareOp ExceptionMatch
    PopJumpIfFalse unmatched
    PopTop
    PopExcept
    Jump done
unmatched:
    Reraise
done:
    LoadConst None
    ReturnValue
",
    );
    assert_eq!(err.kind(), Some(ExcType::ZeroDivisionError));
    assert_eq!(err.traceback().len(), 1);
}

/// Tracebacks list frames outermost first with their current lines.
#[test]
fn traceback_follows_the_call_chain() {
    let err = run_err(
        r#"
.filename app.py
.src def inner():
.src     raise ValueError("deep")
.src def outer():
.src     inner()
.src outer()
.line 1
    LoadConst &inner
    LoadConst "inner"
    MakeFunction 0
    StoreName inner
.line 3
    LoadConst &outer
    LoadConst "outer"
    MakeFunction 0
    StoreName outer
.line 5
    LoadName outer
    CallFunction 0
    PopTop
    LoadConst None
    ReturnValue

.code inner
.line 2
    LoadGlobal ValueError
    LoadConst "deep"
    CallFunction 1
    RaiseVarargs 1
.end

.code outer
.line 4
    LoadGlobal inner
    CallFunction 0
    ReturnValue
.end
"#,
    );
    let frames: Vec<(&str, u32, &str)> = err
        .traceback()
        .iter()
        .map(|f| (f.filename.as_str(), f.line, f.name.as_str()))
        .collect();
    assert_eq!(
        frames,
        vec![("app.py", 5, "<module>"), ("app.py", 4, "outer"), ("app.py", 2, "inner")]
    );
    assert_eq!(
        err.to_string(),
        "Traceback (most recent call last):\n  \
         File \"app.py\", line 5, in <module>\n    \
         outer()\n  \
         File \"app.py\", line 4, in outer\n  \
         File \"app.py\", line 2, in inner\n\
         ValueError: deep"
    );
}

const DIAMOND: &str = r#"
    LoadBuildClass
    LoadConst &A
    LoadConst "A"
    MakeFunction 0
    LoadConst "A"
    CallFunction 2
    StoreName A
    LoadBuildClass
    LoadConst &B
    LoadConst "B"
    MakeFunction 0
    LoadConst "B"
    LoadName A
    CallFunction 3
    StoreName B
    LoadBuildClass
    LoadConst &C
    LoadConst "C"
    MakeFunction 0
    LoadConst "C"
    LoadName A
    CallFunction 3
    StoreName C
    LoadBuildClass
    LoadConst &D
    LoadConst "D"
    MakeFunction 0
    LoadConst "D"
    LoadName B
    LoadName C
    CallFunction 4
    StoreName D
    LoadConst None
    ReturnValue

.code A
.flags function class_body
    LoadConst &__init__
    LoadConst "A.__init__"
    MakeFunction 0
    StoreName __init__
    LoadConst &who
    LoadConst "A.who"
    MakeFunction 0
    StoreName who
    LoadConst None
    ReturnValue
.code __init__
.args self tag
    LoadFast tag
    LoadFast self
    StoreAttr tag
    LoadConst None
    ReturnValue
.end
.code who
.args self
    LoadConst "A"
    ReturnValue
.end
.end

.code B
.flags function class_body
    LoadConst &who
    LoadConst "B.who"
    MakeFunction 0
    StoreName who
    LoadConst None
    ReturnValue
.code who
.args self
    LoadConst "B+"
    LoadGlobal super
    LoadGlobal B
    LoadFast self
    CallFunction 2
    LoadAttr who
    CallFunction 0
    BinaryOp Add
    ReturnValue
.end
.end

.code C
.flags function class_body
    LoadConst &who
    LoadConst "C.who"
    MakeFunction 0
    StoreName who
    LoadConst None
    ReturnValue
.code who
.args self
    LoadConst "C+"
    LoadGlobal super
    LoadGlobal C
    LoadFast self
    CallFunction 2
    LoadAttr who
    CallFunction 0
    BinaryOp Add
    ReturnValue
.end
.end

.code D
.flags function class_body
    LoadConst None
    ReturnValue
.end
"#;

/// A diamond linearizes as D, B, C, A, object and `super` walks that order.
#[test]
fn diamond_mro_and_cooperative_super() {
    let mut interp = run(DIAMOND);
    exec(
        &mut interp,
        r#"
    LoadName D
    LoadConst "t"
    CallFunction 1
    StoreName d
    LoadName d
    LoadAttr who
    CallFunction 0
    StoreName result
    LoadName d
    LoadAttr tag
    StoreName tag
    BuildList 0
    StoreName names
    LoadName D
    LoadAttr __mro__
    GetIter
loop:
    ForIter done
    LoadAttr __name__
    StoreName n
    LoadName names
    LoadAttr append
    LoadName n
    CallFunction 1
    PopTop
    Jump loop
done:
    LoadName isinstance
    LoadName d
    LoadName A
    CallFunction 2
    StoreName is_a
    LoadConst None
    ReturnValue
"#,
    )
    .unwrap();
    assert_eq!(global(&interp, "result"), Object::String("B+C+A".to_owned()));
    assert_eq!(global(&interp, "tag"), Object::String("t".to_owned()));
    assert_eq!(
        global(&interp, "names"),
        Object::List(
            ["D", "B", "C", "A", "object"]
                .iter()
                .map(|s| Object::String((*s).to_owned()))
                .collect()
        )
    );
    assert_eq!(global(&interp, "is_a"), Object::Bool(true));
}

/// Bases that cannot be linearized are a `TypeError` at class creation.
#[test]
fn inconsistent_bases_are_rejected() {
    let mut interp = run(DIAMOND);
    // class E(A, B): A precedes its own subclass
    let err = exec(
        &mut interp,
        r#"
    LoadBuildClass
    LoadConst &E
    LoadConst "E"
    MakeFunction 0
    LoadConst "E"
    LoadName A
    LoadName B
    CallFunction 4
    StoreName E
    LoadConst None
    ReturnValue
.code E
.flags function class_body
    LoadConst None
    ReturnValue
.end
"#,
    )
    .unwrap_err();
    assert_eq!(err.kind(), Some(ExcType::TypeError));
}

/// A guest exception class reports its own name and its builtin ancestry.
#[test]
fn user_exception_class_escapes_with_its_name() {
    let err = run_err(
        r#"
    LoadBuildClass
    LoadConst &AppError
    LoadConst "AppError"
    MakeFunction 0
    LoadConst "AppError"
    LoadName RuntimeError
    CallFunction 3
    StoreName AppError
    LoadName AppError
    LoadConst "config missing"
    CallFunction 1
    RaiseVarargs 1
.code AppError
.flags function class_body
    LoadConst None
    ReturnValue
.end
"#,
    );
    assert_eq!(err.exc_type(), "AppError");
    assert_eq!(err.kind(), Some(ExcType::RuntimeError));
    assert!(err.is_instance_of(ExcType::Exception));
    assert_eq!(err.summary(), "AppError: config missing");
}

/// `for` over a range and a `while` left with `break`.
#[test]
fn loops_iterate_and_break() {
    let interp = run(r"
    LoadConst 0
    StoreName total
    LoadName range
    LoadConst 5
    CallFunction 1
    GetIter
sum_loop:
    ForIter summed
    LoadName total
    RotTwo
    BinaryOp Add
    StoreName total
    Jump sum_loop
summed:
    LoadName total
    StoreName summed
    SetupLoop after
grow:
    LoadName total
    LoadConst 100
    CompareOp Gt
    PopJumpIfFalse double
    BreakLoop
double:
    LoadName total
    LoadConst 2
    BinaryOp Mul
    StoreName total
    Jump grow
after:
    LoadConst None
    ReturnValue
");
    assert_eq!(global(&interp, "summed"), Object::Int(10));
    assert_eq!(global(&interp, "total"), Object::Int(160));
}

#[test]
fn print_honours_sep_and_end() {
    let interp = run(r#"
    LoadName print
    LoadConst 1
    LoadConst "two"
    LoadConst 3.5
    LoadConst "-"
    LoadConst "!\n"
    LoadConst ("sep", "end")
    CallFunctionKw 5
    PopTop
    LoadName print
    BuildList 0
    LoadConst None
    LoadConst (1, "a")
    CallFunction 3
    PopTop
    LoadConst None
    ReturnValue
"#);
    assert_eq!(interp.print_writer().output(), "1-two-3.5!\n[] None (1, 'a')\n");
}

/// Reading a local before assignment names the variable.
#[test]
fn unbound_local_is_reported() {
    let err = run_err(
        r#"
    LoadConst &f
    LoadConst "f"
    MakeFunction 0
    CallFunction 0
    ReturnValue
.code f
.varnames x
    LoadFast x
    ReturnValue
.end
"#,
    );
    assert_eq!(err.kind(), Some(ExcType::UnboundLocalError));
    assert!(err.message().unwrap_or_default().contains("'x'"), "{err}");
}

#[test]
fn undefined_name_is_a_name_error() {
    let err = run_err("LoadName nowhere\nReturnValue");
    assert_eq!(err.kind(), Some(ExcType::NameError));
    assert_eq!(err.message(), Some("name 'nowhere' is not defined"));
}

/// A module made only of scalar assignments reads back name for name and
/// value for value.
#[test]
fn scalar_globals_read_back_unchanged() {
    let interp = run(r#"
    LoadConst 7
    StoreName count
    LoadConst -3
    StoreName offset
    LoadConst 2.5
    StoreName ratio
    LoadConst True
    StoreName enabled
    LoadConst False
    StoreName verbose
    LoadConst None
    StoreName nothing
    LoadConst "text"
    StoreName label
    LoadConst b"raw"
    StoreName payload
    LoadConst None
    ReturnValue
"#);
    let expected = [
        ("count", Object::Int(7)),
        ("offset", Object::Int(-3)),
        ("ratio", Object::Float(2.5)),
        ("enabled", Object::Bool(true)),
        ("verbose", Object::Bool(false)),
        ("nothing", Object::None),
        ("label", Object::String("text".to_owned())),
        ("payload", Object::Bytes(b"raw".to_vec())),
    ];
    let names: Vec<String> = interp
        .global_names("__main__")
        .into_iter()
        .filter(|name| !name.starts_with("__"))
        .collect();
    assert_eq!(names, expected.iter().map(|(name, _)| (*name).to_owned()).collect::<Vec<_>>());
    for (name, value) in expected {
        assert_eq!(global(&interp, name), value, "{name}");
    }
}
