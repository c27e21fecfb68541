// rill - An embeddable scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use rill_compiler::disassemble_script;
use rill_core::vm::InterpretResult;
use rill_embed::Engine;

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();

    // Handle --version flag
    if args.len() == 1 && (args[0] == "--version" || args[0] == "-v") {
        println!("Rill v0.1.0");
        return;
    }

    let dump = args.iter().any(|a| a == "--dump");
    args.retain(|a| a != "--dump");

    if args.is_empty() {
        eprintln!("usage: rill [--dump] <file.rill>...");
        process::exit(2);
    }

    let mut engine = Engine::new();
    let mut failed = false;
    for path in &args {
        if let Err(message) = check_extension(path) {
            eprintln!("{}", message);
            process::exit(1);
        }

        if dump {
            if !dump_script(&mut engine, path) {
                failed = true;
            }
        } else {
            match engine.interpret(path) {
                InterpretResult::Success => {}
                InterpretResult::CompileError | InterpretResult::RuntimeError => failed = true,
            }
        }
    }

    if failed {
        process::exit(1);
    }
}

/// Compile one file and print its disassembly.
fn dump_script(engine: &mut Engine, path: &str) -> bool {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error reading '{}': {}", path, err);
            return false;
        }
    };

    match engine.compile_str(&source, path) {
        Ok(handle) => {
            let script = handle.value.as_object();
            print!("{}", disassemble_script(&engine.vm().heap, script));
            engine.release(handle);
            true
        }
        Err(_) => false,
    }
}

/// Validate the file extension before compiling.
fn check_extension(path: &str) -> Result<(), String> {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("rill") => Ok(()),
        Some(ext) => Err(format!(
            "Error: unsupported file extension '.{}' for '{}'",
            ext, path
        )),
        None => Err(format!(
            "Error: file '{}' has no extension (expected .rill)",
            path
        )),
    }
}
