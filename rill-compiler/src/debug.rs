// rill-compiler - Bytecode disassembler
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Human-readable dumps of compiled bytecode.

use std::fmt::Write;

use rill_core::heap::Heap;
use rill_core::object::ObjRef;

use crate::opcode::Opcode;

/// Disassemble one function's opcode stream: offset, source line, opcode
/// name, and operand.
pub fn disassemble_function(heap: &Heap, func: ObjRef) -> String {
    let function = heap.function(func);
    let name = &heap.str(function.name).data;

    let mut out = String::new();
    let _ = writeln!(out, "== {} (arity {}) ==", name, function.arity);
    if function.is_native() {
        let _ = writeln!(out, "  <native>");
        return out;
    }

    let code = function.code();
    let mut offset = 0;
    while offset < code.opcodes.len() {
        let byte = code.opcodes[offset];
        let line = code.oplines[offset];

        let Some(op) = Opcode::from_byte(byte) else {
            let _ = writeln!(out, "{:04} {:4} ??? 0x{:02x}", offset, line, byte);
            offset += 1;
            continue;
        };

        let _ = write!(out, "{:04} {:4} {:<14}", offset, line, op.name());
        match op.info().params {
            0 => {}
            1 => {
                let arg = code.opcodes[offset + 1];
                let _ = write!(out, " {}", arg);
            }
            _ => {
                let arg = (code.opcodes[offset + 1] as u16) << 8 | code.opcodes[offset + 2] as u16;
                let _ = write!(out, " {}", arg);
            }
        }
        let _ = writeln!(out);

        offset += 1 + op.info().params as usize;
    }
    out
}

/// Disassemble a script: its body first, then every declared function.
pub fn disassemble_script(heap: &Heap, script: ObjRef) -> String {
    let functions: Vec<ObjRef> = heap.script(script).functions.to_vec();

    let mut out = String::new();
    for func in functions {
        out.push_str(&disassemble_function(heap, func));
        out.push('\n');
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
