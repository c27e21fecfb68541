// rill-compiler - End-to-end compilation tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Source text in, bytecode out.

use std::cell::RefCell;
use std::rc::Rc;

use rill_compiler::Opcode;
use rill_compiler::compiler::compile;
use rill_core::config::{Config, ErrorKind, ErrorReporter};
use rill_core::heap::HeapLimits;
use rill_core::object::ObjRef;
use rill_core::value::Value;
use rill_core::vm::Vm;

/// Collects diagnostics instead of printing them.
struct CaptureReporter(Rc<RefCell<Vec<(u32, String)>>>);

impl ErrorReporter for CaptureReporter {
    fn report(&mut self, _kind: ErrorKind, _path: &str, line: u32, message: &str) {
        self.0.borrow_mut().push((line, message.to_string()));
    }
}

fn test_vm() -> (Vm, Rc<RefCell<Vec<(u32, String)>>>) {
    test_vm_with_limits(HeapLimits::default())
}

fn test_vm_with_limits(limits: HeapLimits) -> (Vm, Rc<RefCell<Vec<(u32, String)>>>) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let config = Config {
        limits,
        reporter: Box::new(CaptureReporter(errors.clone())),
        ..Config::default()
    };
    (Vm::new(config), errors)
}

fn compile_ok(source: &str) -> (Vm, ObjRef) {
    let (mut vm, errors) = test_vm();
    let script = compile(&mut vm, "test.rill", source)
        .unwrap_or_else(|_| panic!("compile failed: {:?}", errors.borrow()));
    (vm, script)
}

fn compile_err(source: &str) -> Vec<(u32, String)> {
    let (mut vm, errors) = test_vm();
    let result = compile(&mut vm, "test.rill", source);
    assert!(result.is_err(), "expected a compile error");
    let collected = errors.borrow().clone();
    assert!(!collected.is_empty(), "error result with no diagnostics");
    collected
}

fn body_code(vm: &Vm, script: ObjRef) -> Vec<u8> {
    let body = vm.heap.script(script).body();
    vm.heap.function(body).code().opcodes.clone()
}

fn function_code(vm: &Vm, script: ObjRef, index: usize) -> Vec<u8> {
    let func = vm.heap.script(script).functions[index];
    vm.heap.function(func).code().opcodes.clone()
}

fn literal_numbers(vm: &Vm, script: ObjRef) -> Vec<f64> {
    vm.heap
        .script(script)
        .literals
        .iter()
        .filter(|v| v.is_number())
        .map(|v| v.as_number())
        .collect()
}

fn op(o: Opcode) -> u8 {
    o as u8
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_binary_add() {
    let (vm, script) = compile_ok("1 + 2");

    assert_eq!(literal_numbers(&vm, script), [1.0, 2.0]);
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::Add),
            op(Opcode::Pop),
        ]
    );

    // Peak simulated stack: both operands live at once.
    let body = vm.heap.script(script).body();
    assert_eq!(vm.heap.function(body).code().stack_size, 2);
}

#[test]
fn test_line_records_parallel_opcodes() {
    let (vm, script) = compile_ok("1 +\n2");

    // The operator may be followed by a newline; emission continues on the
    // next line.
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::Add),
            op(Opcode::Pop),
        ]
    );

    let body = vm.heap.script(script).body();
    let code = vm.heap.function(body).code();
    assert_eq!(code.oplines.len(), code.opcodes.len());
    assert_eq!(code.oplines[0], 1);
    assert_eq!(*code.oplines.last().unwrap(), 2);
}

#[test]
fn test_string_literal_statement() {
    let (vm, script) = compile_ok("\"a\"");

    let literals = &vm.heap.script(script).literals;
    assert_eq!(literals.len(), 1);
    assert_eq!(vm.heap.str(literals[0].as_object()).data, "a");

    assert_eq!(
        body_code(&vm, script),
        [op(Opcode::Constant), 0, 0, op(Opcode::Pop)]
    );
}

#[test]
fn test_if_inside_function_patches_past_return() {
    let (vm, script) = compile_ok("def f()\nif true do\nreturn 1\nend\nend\n");

    // functions[0] is the script body; f follows it.
    assert_eq!(
        function_code(&vm, script, 1),
        [
            op(Opcode::Constant), 0, 0,    // true
            op(Opcode::JumpIfNot), 0, 10,  // patched to just after Return
            op(Opcode::Constant), 0, 1,    // 1
            op(Opcode::Return),
            op(Opcode::PushNull),          // implicit return
            op(Opcode::Return),
        ]
    );

    // Nothing was emitted into the script body.
    assert!(body_code(&vm, script).is_empty());
}

#[test]
fn test_while_break_patches_to_loop_exit() {
    let (vm, script) = compile_ok("while false do\nbreak\nend");

    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,    // false
            op(Opcode::JumpIfNot), 0, 12,  // loop exit
            op(Opcode::Jump), 0, 12,       // break, patched to the same exit
            op(Opcode::Jump), 0, 0,        // back to the condition
        ]
    );
}

#[test]
fn test_string_escapes() {
    let (vm, script) = compile_ok("\"a\\nb\"");

    let literals = &vm.heap.script(script).literals;
    assert_eq!(literals.len(), 1);
    assert_eq!(
        vm.heap.str(literals[0].as_object()).data.as_bytes(),
        [b'a', 0x0a, b'b']
    );
}

#[test]
fn test_number_literal() {
    let (vm, script) = compile_ok("123.45");

    assert_eq!(literal_numbers(&vm, script), [123.45]);
    assert_eq!(
        body_code(&vm, script),
        [op(Opcode::Constant), 0, 0, op(Opcode::Pop)]
    );
}

// ============================================================================
// Constant pool
// ============================================================================

#[test]
fn test_equal_constants_are_coalesced() {
    let (vm, script) = compile_ok("1 + 1");
    assert_eq!(literal_numbers(&vm, script), [1.0]);
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::Constant), 0, 0,
            op(Opcode::Add),
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_equal_string_literals_share_one_entry() {
    let (vm, script) = compile_ok("\"a\" + \"a\"");
    assert_eq!(vm.heap.script(script).literals.len(), 1);
}

#[test]
fn test_true_false_null_are_pooled() {
    let (vm, script) = compile_ok("true\nfalse\nnull\ntrue");
    let literals = &vm.heap.script(script).literals;
    assert_eq!(literals.len(), 3);
    assert!(literals[0].is_same(Value::TRUE));
    assert!(literals[1].is_same(Value::FALSE));
    assert!(literals[2].is_same(Value::NULL));
}

// ============================================================================
// Names: globals, locals, functions
// ============================================================================

#[test]
fn test_global_definition_and_read() {
    let (vm, script) = compile_ok("x = 5\nx");

    let s = vm.heap.script(script);
    assert_eq!(s.globals.len(), 1);
    assert_eq!(s.global_names.count(), 1);
    assert_eq!(vm.heap.str(s.global_names.get(0)).data, "x");

    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::StoreGlobal), 0,
            op(Opcode::Pop),
            op(Opcode::PushGlobal), 0,
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_local_definition_in_function() {
    let (vm, script) = compile_ok("def f(a)\nb = a + 1\nreturn b\nend");

    assert_eq!(
        function_code(&vm, script, 1),
        [
            op(Opcode::PushLocal), 0,   // a
            op(Opcode::Constant), 0, 0, // 1
            op(Opcode::Add),
            op(Opcode::PushLocal), 1,   // b's defining value stays as its slot
            op(Opcode::Pop),
            op(Opcode::PushLocal), 1,
            op(Opcode::Return),
            op(Opcode::PushNull),
            op(Opcode::Return),
        ]
    );

    let f = vm.heap.script(script).functions[1];
    assert_eq!(vm.heap.function(f).arity, 1);
    assert_eq!(vm.heap.function(f).code().stack_size, 3);
}

#[test]
fn test_compound_assignment_desugars_to_load_op_store() {
    let (vm, script) = compile_ok("x = 1\nx += 2");

    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::StoreGlobal), 0,
            op(Opcode::Pop),
            op(Opcode::PushGlobal), 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::Add),
            op(Opcode::StoreGlobal), 0,
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_function_call() {
    let (vm, script) = compile_ok("def f()\nend\nf(1, 2)");

    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::PushFn), 0, 1,
            op(Opcode::Constant), 0, 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::Call), 2,
            op(Opcode::Pop),
        ]
    );

    // An empty function body still returns.
    assert_eq!(
        function_code(&vm, script, 1),
        [op(Opcode::PushNull), op(Opcode::Return)]
    );
}

#[test]
fn test_native_function_declaration() {
    let (vm, script) = compile_ok("native add(a, b)\n1");

    let s = vm.heap.script(script);
    assert_eq!(s.functions.len(), 2);
    assert_eq!(s.function_names.count(), 2);

    let add = vm.heap.function(s.functions[1]);
    assert!(add.is_native());
    assert_eq!(add.arity, 2);
    assert_eq!(vm.heap.str(add.name).data, "add");
}

#[test]
fn test_script_tables_stay_aligned() {
    let (vm, script) = compile_ok("a = 1\nb = 2\ndef f()\nend\ndef g()\nend\n");
    let s = vm.heap.script(script);
    assert_eq!(s.globals.len(), s.global_names.count());
    assert_eq!(s.functions.len(), s.function_names.count());
}

// ============================================================================
// Containers, attributes, subscripts
// ============================================================================

#[test]
fn test_list_literal() {
    let (vm, script) = compile_ok("[1, 2]");
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::PushList), 0, 2,
            op(Opcode::Constant), 0, 0,
            op(Opcode::ListAppend),
            op(Opcode::Constant), 0, 1,
            op(Opcode::ListAppend),
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_map_literal() {
    let (vm, script) = compile_ok("{1: 2}");
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::PushMap),
            op(Opcode::Constant), 0, 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::MapInsert),
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_attribute_get_and_set() {
    let (vm, script) = compile_ok("x = [1]\nx.y = 2\nx[0]");

    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::PushList), 0, 1,
            op(Opcode::Constant), 0, 0,
            op(Opcode::ListAppend),
            op(Opcode::StoreGlobal), 0,
            op(Opcode::Pop),
            op(Opcode::PushGlobal), 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::SetAttrib), 0, 0,
            op(Opcode::Pop),
            op(Opcode::PushGlobal), 0,
            op(Opcode::Constant), 0, 2,
            op(Opcode::GetSubscript),
            op(Opcode::Pop),
        ]
    );

    let s = vm.heap.script(script);
    assert_eq!(s.names.count(), 1);
    assert_eq!(vm.heap.str(s.names.get(0)).data, "y");
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_if_else_branches_jump_over_each_other() {
    let (vm, script) = compile_ok("def f()\nif false do\nreturn 1\nelse\nreturn 2\nend\nend");

    assert_eq!(
        function_code(&vm, script, 1),
        [
            op(Opcode::Constant), 0, 0,    // false
            op(Opcode::JumpIfNot), 0, 13,  // to the else branch
            op(Opcode::Constant), 0, 1,
            op(Opcode::Return),
            op(Opcode::Jump), 0, 17,       // over the else branch
            op(Opcode::Constant), 0, 2,
            op(Opcode::Return),
            op(Opcode::PushNull),
            op(Opcode::Return),
        ]
    );
}

#[test]
fn test_elif_chain() {
    let (vm, script) =
        compile_ok("def f()\nif false do\nreturn 1\nelif true do\nreturn 2\nend\nend");

    assert_eq!(
        function_code(&vm, script, 1),
        [
            op(Opcode::Constant), 0, 0,    // false
            op(Opcode::JumpIfNot), 0, 13,  // to the elif condition
            op(Opcode::Constant), 0, 1,
            op(Opcode::Return),
            op(Opcode::Jump), 0, 23,       // over the rest of the chain
            op(Opcode::Constant), 0, 2,    // true
            op(Opcode::JumpIfNot), 0, 23,
            op(Opcode::Constant), 0, 3,
            op(Opcode::Return),
            op(Opcode::PushNull),
            op(Opcode::Return),
        ]
    );
}

#[test]
fn test_block_without_do_keyword() {
    let (vm, script) = compile_ok("if true\n1\nend");
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::JumpIfNot), 0, 10,
            op(Opcode::Constant), 0, 1,
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_continue_jumps_to_loop_start() {
    let (vm, script) = compile_ok("while true do\ncontinue\nend");
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::JumpIfNot), 0, 12,
            op(Opcode::Jump), 0, 0,   // continue
            op(Opcode::Jump), 0, 0,   // loop back
        ]
    );
}

// ============================================================================
// Errors & recovery
// ============================================================================

#[test]
fn test_break_outside_loop() {
    let errors = compile_err("break");
    assert!(errors[0].1.contains("'break' outside a loop"));
}

#[test]
fn test_continue_outside_loop() {
    let errors = compile_err("continue");
    assert!(errors[0].1.contains("'continue' outside a loop"));
}

#[test]
fn test_return_at_top_level() {
    let errors = compile_err("return 1");
    assert!(errors[0].1.contains("'return' outside a function"));
}

#[test]
fn test_undefined_name() {
    let errors = compile_err("y");
    assert!(errors[0].1.contains("Name 'y' is not defined."));
}

#[test]
fn test_invalid_assignment_target() {
    let errors = compile_err("1 + 2 = 3");
    assert!(errors.iter().any(|(_, m)| m.contains("Invalid assignment target.")));
}

#[test]
fn test_compound_assignment_on_attribute_is_rejected() {
    let errors = compile_err("x = [1]\nx.y += 2");
    assert!(
        errors
            .iter()
            .any(|(_, m)| m.contains("Compound assignment is not allowed on attributes."))
    );
}

#[test]
fn test_for_is_reserved() {
    let errors = compile_err("for");
    assert!(errors[0].1.contains("not implemented"));
}

#[test]
fn test_multiple_errors_in_one_run() {
    let errors = compile_err("break\ncontinue");
    assert!(errors.len() >= 2);
    assert_eq!(errors[0].0, 1);
    assert_eq!(errors[1].0, 2);
}

#[test]
fn test_lex_error_suppresses_parse_cascade() {
    let errors = compile_err("@");
    // One lex error for the bad character, no "Expected an expression."
    // cascade at the error token.
    assert!(errors.iter().any(|(_, m)| m.contains("Invalid character")));
    assert!(!errors.iter().any(|(_, m)| m.contains("Expected an expression.")));
}

#[test]
fn test_missing_end_statement() {
    let errors = compile_err("1 + 2 3");
    assert!(
        errors
            .iter()
            .any(|(_, m)| m.contains("Expected statement end"))
    );
}

// ============================================================================
// Boundaries
// ============================================================================

#[test]
fn test_too_many_locals() {
    let mut source = String::from("def f()\n");
    for i in 0..=256 {
        source.push_str(&format!("v{} = 0\n", i));
    }
    source.push_str("end\n");

    let errors = compile_err(&source);
    assert!(
        errors
            .iter()
            .any(|(_, m)| m.contains("at most 256 local variables"))
    );
}

#[test]
fn test_too_many_constants() {
    let mut source = String::new();
    for i in 0..=65536 {
        source.push_str(&format!("{}\n", i));
    }

    let errors = compile_err(&source);
    assert!(
        errors
            .iter()
            .any(|(_, m)| m.contains("at most 65536 unique constants"))
    );
}

#[test]
fn test_too_many_breaks() {
    let mut source = String::from("while true do\n");
    for _ in 0..=256 {
        source.push_str("break\n");
    }
    source.push_str("end\n");

    let errors = compile_err(&source);
    assert!(
        errors
            .iter()
            .any(|(_, m)| m.contains("at most 256 break statements"))
    );
}

// ============================================================================
// Misc
// ============================================================================

#[test]
fn test_import_is_recognized_without_emission() {
    let (vm, script) = compile_ok("import foo\n1");
    assert_eq!(
        body_code(&vm, script),
        [op(Opcode::Constant), 0, 0, op(Opcode::Pop)]
    );
}

#[test]
fn test_semicolon_terminates_statements() {
    let (vm, script) = compile_ok("1; 2");
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::Pop),
            op(Opcode::Constant), 0, 1,
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_unary_operators() {
    let (vm, script) = compile_ok("not true\n-1\n~2");
    let code = body_code(&vm, script);
    assert!(code.contains(&op(Opcode::Not)));
    assert!(code.contains(&op(Opcode::Negative)));
    assert!(code.contains(&op(Opcode::BitNot)));
}

#[test]
fn test_range_operator() {
    let (vm, script) = compile_ok("0..10");
    assert_eq!(
        body_code(&vm, script),
        [
            op(Opcode::Constant), 0, 0,
            op(Opcode::Constant), 0, 1,
            op(Opcode::Range),
            op(Opcode::Pop),
        ]
    );
}

#[test]
fn test_type_name_literals() {
    let (vm, script) = compile_ok("1 is Num");
    let code = body_code(&vm, script);
    assert!(code.contains(&op(Opcode::PushType)));
    assert!(code.contains(&op(Opcode::Is)));
}

#[test]
fn test_compilation_survives_aggressive_collection() {
    // Collect at every allocation; the compiler's roots must keep the
    // in-flight script graph alive.
    let (mut vm, errors) = test_vm_with_limits(HeapLimits {
        initial_threshold: 1,
        growth_percent: 100,
    });
    let script = compile(
        &mut vm,
        "test.rill",
        "x = \"hello\"\ny = \"world\"\ndef f(a)\nreturn a\nend\n",
    )
    .unwrap_or_else(|_| panic!("compile failed: {:?}", errors.borrow()));

    let s = vm.heap.script(script);
    assert_eq!(s.globals.len(), 2);
    assert_eq!(vm.heap.str(s.global_names.get(0)).data, "x");
    assert_eq!(vm.heap.str(s.global_names.get(1)).data, "y");
    let hello = s.literals[0];
    assert_eq!(vm.heap.str(hello.as_object()).data, "hello");
}

#[test]
fn test_utf8_bom_is_skipped() {
    let (vm, script) = compile_ok("\u{feff}1 + 2");
    assert_eq!(literal_numbers(&vm, script), [1.0, 2.0]);
}
