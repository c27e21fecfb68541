// rill-core - VM configuration and host callbacks
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Host-facing configuration.
//!
//! The embedder supplies an error reporter, a writer for user-visible
//! output, and a source loader; each has a filesystem/stdio default so a
//! plain `Config::default()` behaves like the CLI.

use std::fs;
use std::io;
use std::path::Path;

use crate::heap::HeapLimits;

/// What kind of diagnostic is being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Syntax errors and other compile-time diagnostics.
    Compile,
    /// A runtime error message.
    Runtime,
    /// One entry of a runtime error's stack trace, reported after the
    /// `Runtime` message.
    StackTrace,
}

/// Receives every diagnostic the VM produces.
pub trait ErrorReporter {
    fn report(&mut self, kind: ErrorKind, path: &str, line: u32, message: &str);
}

/// Default reporter: one line per diagnostic on stderr.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl ErrorReporter for StderrReporter {
    fn report(&mut self, kind: ErrorKind, path: &str, line: u32, message: &str) {
        match kind {
            ErrorKind::Compile => eprintln!("{}:{}: error: {}", path, line, message),
            ErrorKind::Runtime => eprintln!("{}:{}: runtime error: {}", path, line, message),
            ErrorKind::StackTrace => eprintln!("  at {}:{}: {}", path, line, message),
        }
    }
}

/// Receives user-visible output (the `print` surface).
pub trait Writer {
    fn write(&mut self, text: &str);
}

/// Default writer: stdout.
#[derive(Debug, Default)]
pub struct StdoutWriter;

impl Writer for StdoutWriter {
    fn write(&mut self, text: &str) {
        print!("{}", text);
    }
}

/// Resolves and loads script sources.
///
/// `resolve_path` maps an import name, as written in the script at `from`,
/// to a canonical path; the same name imported from different scripts must
/// resolve to the same path. `from` is `None` for the root script.
pub trait SourceLoader {
    fn resolve_path(&mut self, from: Option<&str>, name: &str) -> Option<String>;
    fn load(&mut self, path: &str) -> io::Result<String>;
}

/// Default loader: resolves relative to the importing script's directory
/// and reads from the filesystem.
#[derive(Debug, Default)]
pub struct FileLoader;

impl SourceLoader for FileLoader {
    fn resolve_path(&mut self, from: Option<&str>, name: &str) -> Option<String> {
        let resolved = match from.map(Path::new).and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => Path::new(name).to_path_buf(),
        };
        Some(resolved.to_string_lossy().into_owned())
    }

    fn load(&mut self, path: &str) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Everything the embedder can configure.
pub struct Config {
    pub limits: HeapLimits,
    pub reporter: Box<dyn ErrorReporter>,
    pub writer: Box<dyn Writer>,
    pub loader: Box<dyn SourceLoader>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            limits: HeapLimits::default(),
            reporter: Box::new(StderrReporter),
            writer: Box::new(StdoutWriter),
            loader: Box::new(FileLoader),
        }
    }
}
