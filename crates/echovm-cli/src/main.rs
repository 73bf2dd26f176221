use std::{env, path::PathBuf, process::ExitCode, thread};

use echovm::{
    CodeUnitFrontend, Exception, FileSystemSource, Interpreter, InterpreterConfig, NoopTracer, StderrTracer, StdPrint,
    VmTracer,
};

const USAGE: &str = "usage: echovm [--trace] [--trace-imports] [--trace-limit N] [-p DIR]... (PATH | -c CODE_UNIT)";

/// Environment variable selecting trace output: `instructions`, `imports` or
/// `all`, comma separated.
const TRACE_ENV: &str = "ECHOVM_TRACE";

/// Native code calling back into the guest (special methods, `__init__`)
/// recurses on the host stack, so the interpreter gets a roomy thread.
const INTERPRETER_STACK: usize = 256 * 1024 * 1024;

/// Exit status for an unhandled guest exception (-1 as a process status).
const EXIT_GUEST_EXCEPTION: u8 = 255;
const EXIT_USAGE: u8 = 2;

#[derive(Debug, Default)]
struct Options {
    trace_instructions: bool,
    trace_imports: bool,
    trace_limit: Option<usize>,
    search_dirs: Vec<PathBuf>,
    target: Option<Target>,
}

#[derive(Debug)]
enum Target {
    Path(PathBuf),
    Inline(String),
}

fn main() -> ExitCode {
    let mut options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n{USAGE}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    apply_trace_env(&mut options, env::var(TRACE_ENV).ok().as_deref());

    let handle = thread::Builder::new()
        .name("echovm".to_owned())
        .stack_size(INTERPRETER_STACK)
        .spawn(move || {
            if options.trace_instructions || options.trace_imports {
                let tracer = match options.trace_limit {
                    Some(limit) => StderrTracer::with_limit(limit),
                    None => StderrTracer::new(),
                }
                .instructions(options.trace_instructions)
                .imports(options.trace_imports);
                run(&options, tracer)
            } else {
                run(&options, NoopTracer)
            }
        });
    match handle.map(thread::JoinHandle::join) {
        Ok(Ok(code)) => ExitCode::from(code),
        Ok(Err(_)) => {
            eprintln!("error: interpreter thread panicked");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: cannot start interpreter thread: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run<Tr: VmTracer>(options: &Options, tracer: Tr) -> u8 {
    let mut config = InterpreterConfig::new();
    if let Some(Target::Inline(_)) = options.target {
        // inline code imports relative to the working directory
        config = config.with_search_dir(".");
    }
    for dir in &options.search_dirs {
        config = config.with_search_dir(dir);
    }
    let config = config.with_search_path_from_env();
    let mut interp = Interpreter::with_parts(config, FileSystemSource::default(), StdPrint::default(), tracer);

    let result = match &options.target {
        Some(Target::Path(path)) => interp.run_main(path),
        Some(Target::Inline(text)) => match CodeUnitFrontend::decode(text.as_bytes()) {
            Ok(code) => interp.run_code(code, "__main__"),
            Err(err) => {
                eprintln!("error: {err}");
                return EXIT_USAGE;
            }
        },
        None => {
            eprintln!("{USAGE}");
            return EXIT_USAGE;
        }
    };
    interp.print_writer_mut().flush();
    match result {
        Ok(()) => 0,
        Err(exc) => report(&exc),
    }
}

/// Prints an escaped exception and picks the exit status for it.
fn report(exc: &Exception) -> u8 {
    if exc.kind().is_some() {
        eprintln!("{exc}");
        EXIT_GUEST_EXCEPTION
    } else {
        // load failures and interpreter faults are not guest exceptions
        eprintln!("error: {}", exc.summary());
        EXIT_USAGE
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--trace" => options.trace_instructions = true,
            "--trace-imports" => options.trace_imports = true,
            "--trace-limit" => {
                let value = args.next().ok_or("--trace-limit needs a value")?;
                let limit = value
                    .parse()
                    .map_err(|_| format!("--trace-limit expects a number, got '{value}'"))?;
                options.trace_limit = Some(limit);
                options.trace_instructions = true;
            }
            "-p" => {
                let dir = args.next().ok_or("-p needs a directory")?;
                options.search_dirs.push(PathBuf::from(dir));
            }
            "-c" => {
                let text = args.next().ok_or("-c needs a code unit")?;
                set_target(&mut options, Target::Inline(text))?;
            }
            "-h" | "--help" => return Err("help requested".to_owned()),
            flag if flag.starts_with('-') && flag.len() > 1 => return Err(format!("unknown option '{flag}'")),
            path => set_target(&mut options, Target::Path(PathBuf::from(path)))?,
        }
    }
    if options.target.is_none() {
        return Err("no script given".to_owned());
    }
    Ok(options)
}

fn set_target(options: &mut Options, target: Target) -> Result<(), String> {
    if options.target.is_some() {
        return Err("only one script or -c code unit may be given".to_owned());
    }
    options.target = Some(target);
    Ok(())
}

fn apply_trace_env(options: &mut Options, value: Option<&str>) {
    for part in value.unwrap_or_default().split(',').map(str::trim) {
        match part {
            "instructions" => options.trace_instructions = true,
            "imports" => options.trace_imports = true,
            "all" => {
                options.trace_instructions = true;
                options.trace_imports = true;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, String> {
        parse_args(args.iter().map(|s| (*s).to_owned()))
    }

    #[test]
    fn flags_and_search_dirs_are_collected() {
        let options = parse(&["--trace-imports", "-p", "lib", "-p", "vendor", "main.py"]).unwrap();
        assert!(options.trace_imports);
        assert!(!options.trace_instructions);
        assert_eq!(options.search_dirs, vec![PathBuf::from("lib"), PathBuf::from("vendor")]);
        assert!(matches!(options.target, Some(Target::Path(ref p)) if p == &PathBuf::from("main.py")));
    }

    #[test]
    fn trace_limit_implies_instruction_tracing() {
        let options = parse(&["--trace-limit", "50", "-c", "LoadConst None\nReturnValue"]).unwrap();
        assert_eq!(options.trace_limit, Some(50));
        assert!(options.trace_instructions);
        assert!(matches!(options.target, Some(Target::Inline(_))));
    }

    #[test]
    fn rejects_two_targets_and_missing_target() {
        assert!(parse(&["a.py", "b.py"]).is_err());
        assert!(parse(&["--trace"]).is_err());
        assert!(parse(&["--bogus", "a.py"]).is_err());
    }

    #[test]
    fn trace_env_toggles_combine() {
        let mut options = Options::default();
        apply_trace_env(&mut options, Some("imports, bogus"));
        assert!(options.trace_imports && !options.trace_instructions);
        apply_trace_env(&mut options, Some("all"));
        assert!(options.trace_instructions);
    }
}
