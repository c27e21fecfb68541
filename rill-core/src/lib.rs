// rill-core - Value representation and object memory manager for Rill
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The Rill core runtime: NaN-boxed values and the garbage-collected
//! object heap shared by the compiler and the embedding API.

pub mod config;
pub mod containers;
pub mod heap;
pub mod object;
pub mod value;
pub mod vm;

pub use config::{Config, ErrorKind, ErrorReporter, FileLoader, SourceLoader, StderrReporter, StdoutWriter, Writer};
pub use containers::FormatArg;
pub use heap::{Heap, HeapLimits, MAX_TEMP_ROOTS, RootId, SCRIPT_BODY_NAME};
pub use object::{
    ARITY_UNINIT, ARITY_VARIADIC, CallFrame, Code, Fiber, FnKind, Function, List, Map, MapEntry,
    NameTable, NativeFn, Obj, ObjKind, ObjRef, ObjType, Range, Script, Str,
};
pub use value::{Value, hash_bits, hash_bytes, hash_number};
pub use vm::{InterpretResult, Vm};
