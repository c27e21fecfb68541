// rill-embed - Embedding API tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use rill_embed::{
    Config, Engine, ErrorKind, ErrorReporter, FromValue, IntoValue, InterpretResult, SourceLoader,
    Value,
};

struct CaptureReporter(Rc<RefCell<Vec<String>>>);

impl ErrorReporter for CaptureReporter {
    fn report(&mut self, _kind: ErrorKind, path: &str, line: u32, message: &str) {
        self.0
            .borrow_mut()
            .push(format!("{}:{}: {}", path, line, message));
    }
}

/// Serves sources from memory instead of the filesystem.
struct MemoryLoader(HashMap<String, String>);

impl SourceLoader for MemoryLoader {
    fn resolve_path(&mut self, _from: Option<&str>, name: &str) -> Option<String> {
        Some(name.to_string())
    }

    fn load(&mut self, path: &str) -> io::Result<String> {
        self.0
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such script"))
    }
}

fn engine_with(sources: &[(&str, &str)]) -> (Engine, Rc<RefCell<Vec<String>>>) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let mut map = HashMap::new();
    for (path, source) in sources {
        map.insert(path.to_string(), source.to_string());
    }
    let config = Config {
        reporter: Box::new(CaptureReporter(errors.clone())),
        loader: Box::new(MemoryLoader(map)),
        ..Config::default()
    };
    (Engine::with_config(config), errors)
}

#[test]
fn test_compile_str_success() {
    let mut engine = Engine::new();
    let handle = engine.compile_str("x = 1 + 2", "test.rill").unwrap();
    assert!(handle.value.is_object());
    engine.release(handle);
}

#[test]
fn test_compile_str_reports_errors() {
    let (mut engine, errors) = engine_with(&[]);
    let result = engine.compile_str("x +", "broken.rill");
    assert!(result.is_err());
    let errors = errors.borrow();
    assert!(!errors.is_empty());
    assert!(errors[0].starts_with("broken.rill:1:"));
}

#[test]
fn test_interpret_compiles_a_loaded_script() {
    let (mut engine, _) = engine_with(&[("main.rill", "x = 40 + 2\n")]);
    assert_eq!(engine.interpret("main.rill"), InterpretResult::Success);
}

#[test]
fn test_interpret_missing_script() {
    let (mut engine, errors) = engine_with(&[]);
    assert_eq!(engine.interpret("gone.rill"), InterpretResult::CompileError);
    assert!(errors.borrow()[0].contains("failed to load script"));
}

#[test]
fn test_interpret_compile_error() {
    let (mut engine, errors) = engine_with(&[("bad.rill", "while\n")]);
    assert_eq!(engine.interpret("bad.rill"), InterpretResult::CompileError);
    assert!(!errors.borrow().is_empty());
}

#[test]
fn test_rooted_strings_survive_collection() {
    let mut engine = Engine::new();
    let handle = engine.var_string("keep me");
    engine.collect_garbage();
    assert_eq!(engine.as_string(handle.value), "keep me");
    engine.release(handle);
}

#[test]
fn test_value_helpers() {
    assert!(Engine::var_bool(true).as_bool());
    assert_eq!(Engine::as_number(Engine::var_number(1.5)), 1.5);
}

#[test]
fn test_conversions_round_trip() {
    let mut engine = Engine::new();

    let v = 3.25f64.into_value(&mut engine);
    assert_eq!(f64::from_value(&engine, v), Some(3.25));

    let v = true.into_value(&mut engine);
    assert_eq!(bool::from_value(&engine, v), Some(true));

    let v = "hello".into_value(&mut engine);
    assert_eq!(String::from_value(&engine, v), Some("hello".to_string()));

    // Type mismatches are None, not panics.
    assert_eq!(f64::from_value(&engine, Value::TRUE), None);
    assert_eq!(String::from_value(&engine, Value::number(1.0)), None);
}
