// rill-embed - Engine implementation
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The Engine struct - main entry point for embedding Rill.

use rill_core::config::{Config, ErrorKind};
use rill_core::heap::RootId;
use rill_core::value::Value;
use rill_core::vm::{InterpretResult, Vm};
use rill_compiler::compiler::{CompileError, compile};

/// A value kept alive on behalf of the embedder.
///
/// Heap values handed across the embedding boundary are registered as
/// persistent GC roots; give the handle back to [`Engine::release`] when
/// done with it.
#[derive(Debug)]
pub struct Handle {
    pub value: Value,
    root: Option<RootId>,
}

/// The Rill scripting engine.
///
/// `Engine` owns one VM: its object heap, configuration callbacks, and
/// compiler entry points. It is not thread-safe; create one engine per
/// thread, and never share objects between engines.
///
/// # Example
///
/// ```rust
/// use rill_embed::Engine;
///
/// let mut engine = Engine::new();
/// let script = engine.compile_str("x = 1 + 2", "example.rill").unwrap();
/// engine.release(script);
/// ```
pub struct Engine {
    vm: Vm,
}

impl Engine {
    /// A new engine with the default configuration (stderr reporter,
    /// stdout writer, filesystem loader).
    pub fn new() -> Engine {
        Engine {
            vm: Vm::new(Config::default()),
        }
    }

    /// A new engine with the given configuration.
    pub fn with_config(config: Config) -> Engine {
        Engine {
            vm: Vm::new(config),
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Resolve, load, and compile the script at `path`.
    ///
    /// Execution is the host interpreter's concern; a script that compiles
    /// cleanly reports `Success`.
    pub fn interpret(&mut self, path: &str) -> InterpretResult {
        let Some(resolved) = self.vm.config.loader.resolve_path(None, path) else {
            self.vm.report_error(
                ErrorKind::Compile,
                path,
                0,
                "cannot resolve the script path",
            );
            return InterpretResult::CompileError;
        };

        let source = match self.vm.config.loader.load(&resolved) {
            Ok(source) => source,
            Err(err) => {
                let message = format!("failed to load script: {}", err);
                self.vm
                    .report_error(ErrorKind::Compile, &resolved, 0, &message);
                return InterpretResult::CompileError;
            }
        };

        match compile(&mut self.vm, &resolved, &source) {
            Ok(_) => InterpretResult::Success,
            Err(CompileError) => InterpretResult::CompileError,
        }
    }

    /// Compile `source` as the script `path`, returning a rooted handle to
    /// the compiled script object.
    pub fn compile_str(&mut self, source: &str, path: &str) -> Result<Handle, CompileError> {
        let script = compile(&mut self.vm, path, source)?;
        Ok(self.root(Value::object(script)))
    }

    /// Keep `value` alive until the handle is released.
    pub fn root(&mut self, value: Value) -> Handle {
        let root = value
            .is_object()
            .then(|| self.vm.heap.add_root(value.as_object()));
        Handle { value, root }
    }

    /// Drop a handle's root; the value collects normally afterwards.
    pub fn release(&mut self, handle: Handle) {
        if let Some(root) = handle.root {
            self.vm.heap.remove_root(root);
        }
    }

    /// Force a full collection.
    pub fn collect_garbage(&mut self) {
        self.vm.heap.collect();
    }

    // ========================================================================
    // Value helpers
    // ========================================================================

    pub fn var_bool(value: bool) -> Value {
        Value::bool(value)
    }

    pub fn var_number(value: f64) -> Value {
        Value::number(value)
    }

    /// Box a host string, rooted for the embedder.
    pub fn var_string(&mut self, text: &str) -> Handle {
        let value = self.vm.var_string(text);
        self.root(value)
    }

    pub fn as_bool(value: Value) -> bool {
        value.as_bool()
    }

    pub fn as_number(value: Value) -> f64 {
        value.as_number()
    }

    pub fn as_string(&self, value: Value) -> &str {
        self.vm.as_string(value)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
