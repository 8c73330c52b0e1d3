use std::io::Write;

use clap::Parser;

use jmpl::ast::ExprId;
use jmpl::interpreter::Interpreter;
use jmpl::{parser, resolver, scanner};

#[derive(Debug, Parser)]
#[command(name = "jmpl")]
struct Cli {
    /// Source file to run; starts the REPL when omitted
    file: Option<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            error.exit()
        }
        Err(_) => {
            eprintln!("Usage: jmpl [path]");
            std::process::exit(64);
        }
    };

    match cli.file {
        Some(path) => run_file(&path),
        None => run_prompt(),
    }
}

fn run_file(path: &str) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read {}: {}", path, error);
            std::process::exit(74);
        }
    };

    let mut runner = Runner::new();
    match runner.run(&source) {
        RunOutcome::Ok => {}
        RunOutcome::StaticError => std::process::exit(65),
        RunOutcome::RuntimeError => std::process::exit(70),
    }
}

fn run_prompt() {
    let mut runner = Runner::new();
    let mut input = String::new();

    loop {
        print!("> ");
        std::io::stdout()
            .flush()
            .expect("should be able to flush stdout");

        input.clear();
        let read = std::io::stdin()
            .read_line(&mut input)
            .expect("should be able to read line from stdin");

        // EOF ends the session
        if read == 0 {
            break;
        }

        // Errors were reported; the next line starts with a clean slate
        // but keeps the interpreter and its globals
        runner.run(&input);
    }
}

enum RunOutcome {
    Ok,
    StaticError,
    RuntimeError,
}

/// Drives one source string through the pipeline. The interpreter and the
/// expression id counter persist across runs so REPL lines build on each
/// other.
struct Runner {
    interpreter: Interpreter,
    next_id: ExprId,
}

impl Runner {
    fn new() -> Self {
        Self {
            interpreter: Interpreter::default(),
            next_id: 0,
        }
    }

    fn run(&mut self, source: &str) -> RunOutcome {
        let (tokens, scan_errors) = scanner::scan_tokens(source);

        let outcome = parser::Parser::with_ids(&tokens, self.next_id).parse();
        self.next_id = outcome.next_id;

        let mut static_errors = scan_errors;
        static_errors.extend(outcome.errors);
        if !static_errors.is_empty() {
            for error in &static_errors {
                eprintln!("{}", error);
            }
            return RunOutcome::StaticError;
        }

        let (locals, resolve_errors) = resolver::resolve(&outcome.statements);
        if !resolve_errors.is_empty() {
            for error in &resolve_errors {
                eprintln!("{}", error);
            }
            return RunOutcome::StaticError;
        }

        self.interpreter.resolve(locals);
        match self.interpreter.interpret(&outcome.statements) {
            Ok(()) => RunOutcome::Ok,
            Err(error) => {
                eprintln!("{}", error);
                RunOutcome::RuntimeError
            }
        }
    }
}
