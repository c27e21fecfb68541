// rill-compiler - Single-pass bytecode compiler for the Rill language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The Rill front end: lexer, Pratt parser, and bytecode emitter.

pub mod compiler;
pub mod debug;
pub mod lexer;
pub mod opcode;

pub use compiler::{
    CompileError, MAX_ARGS, MAX_BREAK_PATCH, MAX_CONSTANTS, MAX_JUMP, MAX_VARIABLES, compile,
};
pub use debug::{disassemble_function, disassemble_script};
pub use lexer::{Lexer, Scanned, Token, TokenKind, TokenValue};
pub use opcode::{OPCODE_INFO, OpInfo, Opcode};
