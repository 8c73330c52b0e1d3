use std::{cell::RefCell, rc::Rc};

use jmpl::ast::Stmt;
use jmpl::error::{ErrorKind, RuntimeError, StaticError};
use jmpl::interpreter::{ExecutionError, Interpreter};
use jmpl::{parser, resolver, scanner};

fn prepare(source: &str) -> (Vec<Stmt>, rustc_hash::FxHashMap<usize, usize>) {
    let (tokens, scan_errors) = scanner::scan_tokens(source);
    assert!(scan_errors.is_empty(), "scan errors: {:?}", scan_errors);

    let outcome = parser::parse(&tokens);
    assert!(
        outcome.errors.is_empty(),
        "parse errors: {:?}",
        outcome.errors
    );

    let (locals, resolve_errors) = resolver::resolve(&outcome.statements);
    assert!(
        resolve_errors.is_empty(),
        "resolve errors: {:?}",
        resolve_errors
    );

    (outcome.statements, locals)
}

fn test_valid_program(source: &str, expected_output: &str) {
    let (statements, locals) = prepare(source);

    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output.clone());
    interpreter.resolve(locals);
    interpreter
        .interpret(&statements)
        .expect("interpret should work on valid program");

    let output = String::from_utf8(output.take()).expect("output should be valid UTF-8");
    assert_eq!(output, expected_output);
}

fn run_to_runtime_error(source: &str) -> RuntimeError {
    let (statements, locals) = prepare(source);

    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output.clone());
    interpreter.resolve(locals);

    match interpreter.interpret(&statements) {
        Ok(()) => panic!("program should fail at runtime"),
        Err(ExecutionError::Runtime(error)) => error,
        Err(error) => panic!("unexpected error: {}", error),
    }
}

fn run_to_static_errors(source: &str) -> Vec<StaticError> {
    let (tokens, mut errors) = scanner::scan_tokens(source);
    let outcome = parser::parse(&tokens);
    errors.extend(outcome.errors);

    if errors.is_empty() {
        let (_, resolve_errors) = resolver::resolve(&outcome.statements);
        errors.extend(resolve_errors);
    }

    assert!(!errors.is_empty(), "program should fail statically");
    errors
}

#[test]
fn test_addition() {
    test_valid_program("out 1 + 2;", "3\n");
}

#[test]
fn test_globals() {
    test_valid_program("let a = 1; let b = 2; out a + b;", "3\n");
}

#[test]
fn test_fib() {
    let source = "function fib(n) = if n < 2 then return n; \
                  else return fib(n-1) + fib(n-2); \
                  out fib(10);";
    test_valid_program(source, "55\n");
}

#[test]
fn test_counter_closure() {
    let source = "function mkc() = ( let i = 0; function c() = ( i := i + 1; i ); c ); \
                  let f = mkc(); out f(); out f(); out f();";
    test_valid_program(source, "1\n2\n3\n");
}

#[test]
fn test_closures_are_independent() {
    let source = "function mkc() = ( let i = 0; function c() = ( i := i + 1; i ); c ); \
                  let f = mkc(); let g = mkc(); out f(); out f(); out g();";
    test_valid_program(source, "1\n2\n1\n");
}

#[test]
fn test_summation_of_numbers() {
    test_valid_program("out ∑(5, let i = 1) i;", "15\n");
}

#[test]
fn test_summation_of_strings() {
    test_valid_program("out ∑(3, let i = 1) \"a\";", "aaa\n");
}

#[test]
fn test_summation_with_expression_summand() {
    test_valid_program("out ∑(3, let k = 1) k * 2;", "12\n");
}

#[test]
fn test_summation_with_assignment_lower_bound() {
    test_valid_program("let i = 0; out ∑(5, i := 1) i; out i;", "15\n6\n");
}

#[test]
fn test_summation_inside_function() {
    let source = "function triangle(n) = return ∑(n, let i = 1) i; out triangle(100);";
    test_valid_program(source, "5050\n");
}

#[test]
fn test_nested_summation_upper_bound() {
    // Inner sum is 1+2 = 3, so the outer sums 1..3
    test_valid_program("out ∑(∑(2, let i = 1) i, let j = 1) j;", "6\n");
}

#[test]
fn test_division_by_zero() {
    let error = run_to_runtime_error("out 1/0;");
    assert_eq!(error.kind, ErrorKind::ZeroDivision);
    assert_eq!(error.to_string(), "[line 1] ZeroDivisionError: Division by 0.");
}

#[test]
fn test_self_reference_in_initialiser() {
    let errors = run_to_static_errors("( let a = a; )");
    assert_eq!(errors[0].kind, ErrorKind::Variable);
    assert_eq!(
        errors[0].to_string(),
        "[line 1] VariableError at 'a': Can't read local variable in its own initialiser."
    );
}

#[test]
fn test_precedence_and_grouping() {
    test_valid_program("out 1 + 2 * 3;", "7\n");
    test_valid_program("out (1 + 2) * 3;", "9\n");
    test_valid_program("out 2 ^ 3 ^ 2;", "64\n");
    test_valid_program("out -2 ^ 2;", "4\n");
    test_valid_program("out 10 / 4;", "2.5\n");
}

#[test]
fn test_string_concatenation() {
    test_valid_program("out \"n = \" + 4;", "n = 4\n");
    test_valid_program("out 1 + \"a\";", "1a\n");
    test_valid_program("out \"v: \" + null;", "v: null\n");
}

#[test]
fn test_logical_operators_return_deciding_operand() {
    test_valid_program("out 0 or \"x\";", "x\n");
    test_valid_program("out 1 or 2;", "1\n");
    test_valid_program("out null and 1;", "null\n");
    test_valid_program("out 1 and 2;", "2\n");
}

#[test]
fn test_short_circuit_skips_right_operand() {
    let source = "let a = 0; function bump() = ( a := a + 1; a ); \
                  out false and bump(); out true or bump(); out a;";
    test_valid_program(source, "false\ntrue\n0\n");
}

#[test]
fn test_truthiness_in_conditions() {
    test_valid_program("if \"\" then out 1; else out 2;", "2\n");
    test_valid_program("if 0 then out 1; else out 2;", "2\n");
    test_valid_program("if \"x\" then out 1; else out 2;", "1\n");
}

#[test]
fn test_equality() {
    test_valid_program("out 1 == 1; out 1 != 2; out null == null;", "true\ntrue\ntrue\n");
    test_valid_program("out \"a\" == \"a\"; out 1 == \"1\";", "true\nfalse\n");
    test_valid_program("out null == 0;", "false\n");
}

#[test]
fn test_unary_operators() {
    test_valid_program("out -3; out !true; out !0; out !\"\";", "-3\ntrue\ntrue\ntrue\n");
}

#[test]
fn test_while_loop() {
    test_valid_program(
        "let n = 3; while n > 0 do ( out n; n := n - 1; )",
        "3\n2\n1\n",
    );
}

#[test]
fn test_let_without_initialiser_is_null() {
    test_valid_program("let a; out a;", "null\n");
}

#[test]
fn test_assignment_is_an_expression() {
    test_valid_program("let a = 0; out a := 5; out a;", "5\n5\n");
    test_valid_program("let a; let b; a := b := 2; out a + b;", "4\n");
}

#[test]
fn test_block_scoping_and_shadowing() {
    test_valid_program("let a = 1; ( let a = 2; out a; ) out a;", "2\n1\n");
}

#[test]
fn test_function_without_return_yields_body_value() {
    test_valid_program("function two() = ( 1; 2 ) out two();", "2\n");
}

#[test]
fn test_function_with_statement_body_yields_null() {
    test_valid_program("function f() = out 1; out f();", "1\nnull\n");
}

#[test]
fn test_bare_return_yields_null() {
    test_valid_program("function f() = return; out f();", "null\n");
}

#[test]
fn test_function_stringification() {
    test_valid_program("function f() = return 1; out f;", "<fn f>\n");
    test_valid_program("out clock;", "<native fn>\n");
}

#[test]
fn test_clock_returns_a_number() {
    test_valid_program("out clock() > 0;", "true\n");
}

#[test]
fn test_type_errors() {
    let error = run_to_runtime_error("out 1 - \"a\";");
    assert_eq!(error.kind, ErrorKind::Type);
    assert_eq!(error.message, "Operands must be numbers");

    let error = run_to_runtime_error("out true + 1;");
    assert_eq!(error.kind, ErrorKind::Type);
    assert_eq!(error.message, "Invalid operand type(s)");

    let error = run_to_runtime_error("out -\"x\";");
    assert_eq!(error.kind, ErrorKind::Type);
}

#[test]
fn test_runtime_error_carries_line() {
    let error = run_to_runtime_error("out 1;\nout -\"x\";");
    assert_eq!(error.token.line, 2);
}

#[test]
fn test_only_functions_can_be_called() {
    let error = run_to_runtime_error("out 1(2);");
    assert_eq!(error.kind, ErrorKind::Syntax);
    assert_eq!(error.message, "Only functions can be called");
}

#[test]
fn test_arity_mismatch() {
    let error = run_to_runtime_error("function f(a) = return a; out f();");
    assert_eq!(error.kind, ErrorKind::Argument);
    assert_eq!(error.message, "Expected 1 arguments but got 0");
}

#[test]
fn test_undefined_identifier() {
    let error = run_to_runtime_error("out x;");
    assert_eq!(error.kind, ErrorKind::Identifier);
    assert_eq!(error.message, "Undefined identifier 'x'");
}

#[test]
fn test_assignment_to_unbound_name() {
    let error = run_to_runtime_error("x := 1;");
    assert_eq!(error.kind, ErrorKind::Variable);
    assert_eq!(error.message, "Undefined variable 'x'");
}

#[test]
fn test_redefinition_in_globals() {
    let error = run_to_runtime_error("let a = 1; let a = 2;");
    assert_eq!(error.kind, ErrorKind::Identifier);
    assert_eq!(error.message, "Identifier 'a' already defined in this scope");
}

#[test]
fn test_summation_bound_errors() {
    let error = run_to_runtime_error("out ∑(1.5, let i = 1) i;");
    assert_eq!(error.kind, ErrorKind::Syntax);
    assert_eq!(error.message, "Upper bound must be an integer");

    let error = run_to_runtime_error("out ∑(5, let i = 1.5) i;");
    assert_eq!(error.message, "Lower bound must be an integer");

    let error = run_to_runtime_error("out ∑(1, let i = 3) i;");
    assert_eq!(
        error.message,
        "Lower bound must be less than or equal to the upper bound"
    );

    let error = run_to_runtime_error("out ∑(\"x\", let i = 1) i;");
    assert_eq!(error.message, "Upper bound must be an integer");
}

#[test]
fn test_summation_summand_type_error() {
    let error = run_to_runtime_error("out ∑(3, let i = 1) true;");
    assert_eq!(error.kind, ErrorKind::Syntax);
    assert_eq!(error.message, "Summand must be a number or a string");
}

#[test]
fn test_top_level_return_is_static() {
    let errors = run_to_static_errors("return 1;");
    assert_eq!(errors[0].kind, ErrorKind::Return);
    assert_eq!(errors[0].message, "Can't return from top-level code");
}

#[test]
fn test_multiple_static_errors_reported_together() {
    let errors = run_to_static_errors("out ;\nout +;");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].line, 1);
    assert_eq!(errors[1].line, 2);
}

#[test]
fn test_repl_session_keeps_globals_and_resolutions() {
    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output.clone());
    let mut next_id = 0;

    // Each line scans, parses and resolves on its own, sharing the
    // interpreter and the expression id counter like the REPL driver
    let lines = [
        "function mkc() = ( let i = 0; function c() = ( i := i + 1; i ); c );",
        "let f = mkc();",
        "out f();",
        "out f();",
    ];

    for line in lines {
        let (tokens, scan_errors) = scanner::scan_tokens(line);
        assert!(scan_errors.is_empty());
        let outcome = parser::Parser::with_ids(&tokens, next_id).parse();
        assert!(outcome.errors.is_empty());
        next_id = outcome.next_id;

        let (locals, resolve_errors) = resolver::resolve(&outcome.statements);
        assert!(resolve_errors.is_empty());

        interpreter.resolve(locals);
        interpreter.interpret(&outcome.statements).expect("line should run");
    }

    let output = String::from_utf8(output.take()).unwrap();
    assert_eq!(output, "1\n2\n");
}

#[test]
fn test_environment_recovers_after_runtime_error() {
    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output.clone());

    let (statements, locals) = prepare("let a = 1; ( let b = 2; out 1/0; )");
    interpreter.resolve(locals);
    assert!(interpreter.interpret(&statements).is_err());

    // The failed block's environment was popped: b is gone, a still works
    let (statements, locals) = prepare("out a;");
    interpreter.resolve(locals);
    interpreter.interpret(&statements).expect("a should survive");

    let (statements, locals) = prepare("out b;");
    interpreter.resolve(locals);
    assert!(interpreter.interpret(&statements).is_err());

    let output = String::from_utf8(output.take()).unwrap();
    assert_eq!(output, "1\n");
}

#[test]
fn test_unicode_and_ascii_operator_forms_agree() {
    test_valid_program("out 1 ≤ 2; out 1 ≥ 2; out 1 ≠ 2; out ¬false;", "true\nfalse\ntrue\ntrue\n");
    test_valid_program("out true ∧ false; out true ∨ false;", "false\ntrue\n");
}

#[test]
fn test_recursive_summation_of_strings_grows() {
    test_valid_program("let s = ∑(4, let i = 1) \"ab\"; out s;", "abababab\n");
}
