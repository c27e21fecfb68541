// rill-embed - High-level embedding API for Rill
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Embed the Rill language in a Rust host.
//!
//! [`Engine`] wraps a VM with its heap and configuration; the conversion
//! traits move values across the boundary.

pub mod convert;
pub mod engine;

pub use convert::{FromValue, IntoValue};
pub use engine::{Engine, Handle};

pub use rill_core::config::{Config, ErrorKind, ErrorReporter, SourceLoader, Writer};
pub use rill_core::heap::HeapLimits;
pub use rill_core::value::Value;
pub use rill_core::vm::InterpretResult;
pub use rill_compiler::compiler::CompileError;
