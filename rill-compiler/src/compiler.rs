// rill-compiler - Single-pass compiler from source text to bytecode
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The compiler: a Pratt-style precedence-climbing parser that emits
//! stack-machine bytecode as it goes.
//!
//! The parser keeps a three-token window (`previous`, `current`, `next`)
//! over the lexer's output. Expressions are driven by a grammar table of
//! `{prefix, infix, precedence}` entries keyed by token kind; statements
//! dispatch on their leading keyword. Emission appends to the current
//! function's opcode buffer, records a parallel source line per byte, and
//! simulates operand-stack depth so every function knows its maximum stack
//! size. Jumps are patched in place once their target address is known.
//!
//! Compilation never stops at an error: diagnostics are routed through the
//! VM's reporter and parsing continues so one run surfaces as many errors
//! as possible. A script compiled with errors is returned as
//! [`CompileError`] and must not be executed.

use std::collections::HashMap;
use std::fmt;

use rill_core::config::ErrorKind;
use rill_core::object::ObjRef;
use rill_core::value::Value;
use rill_core::vm::Vm;

use crate::lexer::{Lexer, Token, TokenKind, TokenValue};
use crate::opcode::{
    Opcode, TYPE_ARRAY, TYPE_BOOL, TYPE_FUNCTION, TYPE_MAP, TYPE_NUM, TYPE_OBJECT, TYPE_RANGE,
    TYPE_STRING,
};

/// Maximum locals per function, and globals per script. Locals are
/// addressed by a single opcode byte.
pub const MAX_VARIABLES: usize = 256;

/// Maximum unique constants per script, addressed by a 2-byte operand.
pub const MAX_CONSTANTS: usize = 1 << 16;

/// Maximum jump target address.
pub const MAX_JUMP: usize = 1 << 16;

/// Maximum `break` statements in one loop.
pub const MAX_BREAK_PATCH: usize = 256;

/// Maximum arguments in one call, addressed by a single opcode byte.
pub const MAX_ARGS: usize = 255;

/// Compilation failed; the diagnostics went through the VM's reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileError;

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compilation failed")
    }
}

impl std::error::Error for CompileError {}

// ============================================================================
// Parser state
// ============================================================================

struct Parser<'a> {
    lexer: Lexer<'a>,
    path: &'a str,
    previous: Token,
    current: Token,
    next: Token,
    /// Sticks once any lex or parse error is reported.
    has_errors: bool,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, path: &'a str) -> Parser<'a> {
        Parser {
            lexer: Lexer::new(source),
            path,
            previous: Token::synthetic(TokenKind::Error),
            current: Token::synthetic(TokenKind::Error),
            next: Token::synthetic(TokenKind::Error),
            has_errors: false,
        }
    }
}

// ============================================================================
// Compiler state
// ============================================================================

/// A variable visible to the compiler. `depth == -1` marks a global.
#[derive(Debug, Clone, Copy)]
struct Variable<'a> {
    name: &'a str,
    depth: i32,
    #[allow(dead_code)]
    line: u32,
}

/// Per-loop bookkeeping: where `continue` jumps back to and which `break`
/// jumps still need their target patched.
struct LoopFrame {
    start: usize,
    patches: Vec<usize>,
}

/// Where a name resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameRef {
    Local(u8),
    Global(u8),
    Function(u16),
    NotDefined,
}

struct Compiler<'a> {
    vm: &'a mut Vm,
    source: &'a str,
    parser: Parser<'a>,

    /// -1 at top level, 0 in function-parameter scope, > 0 in nested
    /// blocks.
    scope_depth: i32,
    variables: Vec<Variable<'a>>,

    /// Simulated operand-stack depth, locals included.
    stack_size: i32,

    script: ObjRef,
    /// The function currently being emitted into.
    function: ObjRef,
    /// Innermost loop last.
    loops: Vec<LoopFrame>,

    /// Constant-pool indices by value bits (numbers and singletons) and by
    /// string bytes, so pooling stays linear in the script size.
    literal_index: HashMap<u64, usize>,
    string_literal_index: HashMap<String, usize>,
}

// ============================================================================
// Grammar table
// ============================================================================

/// Binding strength, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Lowest,
    Assignment,   // =
    LogicalOr,    // or
    LogicalAnd,   // and
    LogicalNot,   // not
    Equality,     // == !=
    In,           // in
    Is,           // is
    Comparison,   // < > <= >=
    BitwiseOr,    // |
    BitwiseXor,   // ^
    BitwiseAnd,   // &
    BitwiseShift, // << >>
    Range,        // ..
    Term,         // + -
    Factor,       // * / %
    Unary,        // - ~ not
    Call,         // ()
    Subscript,    // []
    Attrib,       // .name
    Primary,
}

impl Precedence {
    /// One level stronger, for left-associative recursion.
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Lowest,
            Lowest => Assignment,
            Assignment => LogicalOr,
            LogicalOr => LogicalAnd,
            LogicalAnd => LogicalNot,
            LogicalNot => Equality,
            Equality => In,
            In => Is,
            Is => Comparison,
            Comparison => BitwiseOr,
            BitwiseOr => BitwiseXor,
            BitwiseXor => BitwiseAnd,
            BitwiseAnd => BitwiseShift,
            BitwiseShift => Range,
            Range => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Subscript,
            Subscript => Attrib,
            Attrib => Primary,
            Primary => Primary,
        }
    }
}

type GrammarFn = for<'a> fn(&mut Compiler<'a>, bool);

#[derive(Clone, Copy)]
struct GrammarRule {
    prefix: Option<GrammarFn>,
    infix: Option<GrammarFn>,
    precedence: Precedence,
}

const fn rule(
    prefix: Option<GrammarFn>,
    infix: Option<GrammarFn>,
    precedence: Precedence,
) -> GrammarRule {
    GrammarRule {
        prefix,
        infix,
        precedence,
    }
}

const NO_RULE: GrammarRule = rule(None, None, Precedence::None);

/// The fully-populated grammar lookup, keyed by token kind.
fn get_rule(kind: TokenKind) -> GrammarRule {
    use Precedence as P;
    use TokenKind::*;
    match kind {
        Dot => rule(None, Some(expr_attrib), P::Attrib),
        DotDot => rule(None, Some(expr_binary_op), P::Range),
        Lparen => rule(Some(expr_grouping), Some(expr_call), P::Call),
        Lbracket => rule(Some(expr_array), Some(expr_subscript), P::Subscript),
        Lbrace => rule(Some(expr_map), None, P::None),
        Percent => rule(None, Some(expr_binary_op), P::Factor),
        Tilde => rule(Some(expr_unary_op), None, P::None),
        Amp => rule(None, Some(expr_binary_op), P::BitwiseAnd),
        Pipe => rule(None, Some(expr_binary_op), P::BitwiseOr),
        Caret => rule(None, Some(expr_binary_op), P::BitwiseXor),
        Plus => rule(None, Some(expr_binary_op), P::Term),
        Minus => rule(Some(expr_unary_op), Some(expr_binary_op), P::Term),
        Star => rule(None, Some(expr_binary_op), P::Factor),
        Slash => rule(None, Some(expr_binary_op), P::Factor),
        Eq => rule(None, Some(expr_assignment), P::Assignment),
        Gt => rule(None, Some(expr_binary_op), P::Comparison),
        Lt => rule(None, Some(expr_binary_op), P::Comparison),
        EqEq => rule(None, Some(expr_binary_op), P::Equality),
        NotEq => rule(None, Some(expr_binary_op), P::Equality),
        GtEq => rule(None, Some(expr_binary_op), P::Comparison),
        LtEq => rule(None, Some(expr_binary_op), P::Comparison),
        PlusEq => rule(None, Some(expr_assignment), P::Assignment),
        MinusEq => rule(None, Some(expr_assignment), P::Assignment),
        StarEq => rule(None, Some(expr_assignment), P::Assignment),
        SlashEq => rule(None, Some(expr_assignment), P::Assignment),
        Rshift => rule(None, Some(expr_binary_op), P::BitwiseShift),
        Lshift => rule(None, Some(expr_binary_op), P::BitwiseShift),
        Is => rule(None, Some(expr_binary_op), P::Is),
        In => rule(None, Some(expr_binary_op), P::In),
        And => rule(None, Some(expr_binary_op), P::LogicalAnd),
        Or => rule(None, Some(expr_binary_op), P::LogicalOr),
        Not => rule(Some(expr_unary_op), None, P::None),
        True | False | Null => rule(Some(expr_literal), None, P::None),
        BoolType | NumType | StringType | ArrayType | MapType | RangeType | FunctionType
        | ObjectType => rule(Some(expr_literal), None, P::None),
        Name => rule(Some(expr_name), None, P::None),
        Number | String => rule(Some(expr_literal), None, P::None),
        _ => NO_RULE,
    }
}

// ============================================================================
// Token flow
// ============================================================================

impl<'a> Compiler<'a> {
    /// Shift the token window forward by one. Lex errors are reported here
    /// so the stream keeps flowing.
    fn lex_token(&mut self) {
        self.parser.previous =
            std::mem::replace(&mut self.parser.current, self.parser.next.clone());
        if self.parser.current.kind == TokenKind::Eof {
            return;
        }

        let scanned = self.parser.lexer.scan();
        for message in &scanned.errors {
            self.lex_error(scanned.token.line, message);
        }
        self.parser.next = scanned.token;
    }

    fn peek(&self) -> TokenKind {
        self.parser.current.kind
    }

    /// Source text of the previous token.
    fn prev_slice(&self) -> &'a str {
        let t = &self.parser.previous;
        &self.source[t.start..t.start + t.length]
    }

    /// Skip newlines, then consume the current token if it matches.
    fn match_token(&mut self, expected: TokenKind) -> bool {
        debug_assert!(expected != TokenKind::Line);
        self.match_line();
        if self.peek() != expected {
            return false;
        }
        self.lex_token();
        true
    }

    /// Consume one or more newline tokens.
    fn match_line(&mut self) -> bool {
        if self.peek() != TokenKind::Line {
            return false;
        }
        while self.peek() == TokenKind::Line {
            self.lex_token();
        }
        true
    }

    fn skip_new_lines(&mut self) {
        self.match_line();
    }

    /// Consume the current token; report `message` if it is not the
    /// expected one. When the following token is the expected one, it is
    /// consumed too, losing at most one token of cascade.
    fn consume(&mut self, expected: TokenKind, message: &str) {
        debug_assert!(expected != TokenKind::Line);
        self.match_line();

        self.lex_token();
        if self.parser.previous.kind != expected {
            self.parse_error(message);
            if self.peek() == expected {
                self.lex_token();
            }
        }
    }

    /// A statement ends with `;`, one or more newlines, or EOF.
    fn consume_end_statement(&mut self) {
        let mut consumed = false;
        // A semicolon must be on the same line.
        if self.peek() == TokenKind::Semicolon {
            self.lex_token();
            consumed = true;
        }
        if self.match_line() {
            consumed = true;
        }
        if !consumed && self.peek() != TokenKind::Eof {
            self.parse_error("Expected statement end with newline or ';'.");
        }
    }

    /// A block opens with `do` or a newline.
    fn consume_start_block(&mut self) {
        let mut consumed = false;
        // A `do` must be on the same line.
        if self.peek() == TokenKind::Do {
            self.lex_token();
            consumed = true;
        }
        if self.match_line() {
            consumed = true;
        }
        if !consumed {
            self.parse_error("Expected enter block with newline or 'do'.");
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn lex_error(&mut self, line: u32, message: &str) {
        self.parser.has_errors = true;
        self.vm
            .report_error(ErrorKind::Compile, self.parser.path, line, message);
    }

    /// Report at the previous token. Suppressed when that token is a lex
    /// error, which was already reported.
    fn parse_error(&mut self, message: &str) {
        if self.parser.previous.kind == TokenKind::Error {
            return;
        }
        self.parser.has_errors = true;
        let line = self.parser.previous.line;
        self.vm
            .report_error(ErrorKind::Compile, self.parser.path, line, message);
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn code_len(&self) -> usize {
        self.vm.heap.function(self.function).code().opcodes.len()
    }

    /// Append one byte and the previous token's line; returns the byte's
    /// index.
    fn emit_byte(&mut self, byte: u8) -> usize {
        let line = self.parser.previous.line;
        let code = self.vm.heap.function_mut(self.function).code_mut();
        code.opcodes.push(byte);
        code.oplines.push(line);
        code.opcodes.len() - 1
    }

    /// Append a big-endian 2-byte operand; returns the index of its first
    /// byte.
    fn emit_short(&mut self, arg: u16) -> usize {
        let index = self.emit_byte((arg >> 8) as u8);
        self.emit_byte((arg & 0xff) as u8);
        index
    }

    /// Append an opcode and update the simulated stack, keeping the
    /// function's running maximum.
    fn emit_opcode(&mut self, op: Opcode) {
        self.emit_byte(op as u8);

        self.stack_size += op.info().stack as i32;
        let code = self.vm.heap.function_mut(self.function).code_mut();
        if self.stack_size > code.stack_size as i32 {
            code.stack_size = self.stack_size as u32;
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.add_constant(value);
        self.emit_opcode(Opcode::Constant);
        self.emit_short(index as u16);
    }

    /// Write the current opcode count into a 2-byte patch site.
    fn patch_jump(&mut self, index: usize) {
        let jump_to = self.code_len();
        assert!(jump_to < MAX_JUMP, "Too large address to jump.");
        self.patch_short(index, jump_to as u16);
    }

    fn patch_short(&mut self, index: usize, value: u16) {
        let code = self.vm.heap.function_mut(self.function).code_mut();
        code.opcodes[index] = (value >> 8) as u8;
        code.opcodes[index + 1] = (value & 0xff) as u8;
    }

    // ========================================================================
    // Constants
    // ========================================================================

    fn push_literal(&mut self, value: Value) -> usize {
        let count = self.vm.heap.script(self.script).literals.len();
        if count < MAX_CONSTANTS {
            self.vm.heap.script_mut(self.script).literals.push(value);
        } else {
            self.parse_error("A script should contain at most 65536 unique constants.");
        }
        self.vm.heap.script(self.script).literals.len() - 1
    }

    /// Pool a constant, coalescing onto an existing equal entry. For
    /// numbers and singletons value equality is bit equality.
    fn add_constant(&mut self, value: Value) -> usize {
        if let Some(&index) = self.literal_index.get(&value.bits()) {
            return index;
        }
        let index = self.push_literal(value);
        self.literal_index.insert(value.bits(), index);
        index
    }

    /// Pool a string constant, coalescing by byte equality so the heap
    /// string is only materialized for a genuinely new literal.
    fn add_string_constant(&mut self, text: &str) -> usize {
        if let Some(&index) = self.string_literal_index.get(text) {
            return index;
        }
        let s = self.vm.heap.new_string(text);
        let index = self.push_literal(Value::object(s));
        self.string_literal_index.insert(text.to_string(), index);
        index
    }

    // ========================================================================
    // Scopes & variables
    // ========================================================================

    fn enter_block(&mut self) {
        self.scope_depth += 1;
    }

    /// Locals declared at the exiting depth are dropped from both the
    /// variable table and the simulated stack; no pops are emitted.
    fn exit_block(&mut self) {
        debug_assert!(self.scope_depth > -1, "cannot exit top level");
        while let Some(var) = self.variables.last() {
            if var.depth < self.scope_depth {
                break;
            }
            self.variables.pop();
            self.stack_size -= 1;
        }
        self.scope_depth -= 1;
    }

    fn add_variable(&mut self, name: &'a str, line: u32) -> usize {
        if self.variables.len() >= MAX_VARIABLES {
            self.parse_error("A function should contain at most 256 local variables.");
            return self.variables.len() - 1;
        }
        self.variables.push(Variable {
            name,
            depth: self.scope_depth,
            line,
        });
        self.variables.len() - 1
    }

    /// Search only the current scope depth; used for duplicate parameters.
    fn search_current_scope(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| v.depth == self.scope_depth && v.name == name)
            .map(|(i, _)| i)
    }

    /// Resolve a name: locals innermost-first, then the script's globals,
    /// then its functions.
    fn search_name(&self, name: &str) -> NameRef {
        for (i, var) in self.variables.iter().enumerate().rev() {
            if var.name == name {
                return NameRef::Local(i as u8);
            }
        }

        let heap = &self.vm.heap;
        let script = heap.script(self.script);
        if let Some(i) = heap.find_name(&script.global_names, name) {
            return NameRef::Global(i as u8);
        }
        if let Some(i) = heap.find_name(&script.function_names, name) {
            return NameRef::Function(i as u16);
        }
        NameRef::NotDefined
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// One expression; leaves exactly one value on the simulated stack.
fn compile_expression(c: &mut Compiler<'_>) {
    parse_precedence(c, Precedence::Lowest);
}

fn parse_precedence(c: &mut Compiler<'_>, precedence: Precedence) {
    c.lex_token();
    let prefix = get_rule(c.parser.previous.kind).prefix;

    let Some(prefix) = prefix else {
        c.parse_error("Expected an expression.");
        return;
    };

    let can_assign = precedence <= Precedence::Assignment;
    prefix(c, can_assign);

    while get_rule(c.peek()).precedence >= precedence {
        c.lex_token();
        let infix = get_rule(c.parser.previous.kind).infix;
        debug_assert!(infix.is_some(), "rule with a precedence has an infix");
        if let Some(infix) = infix {
            infix(c, can_assign);
        }
    }
}

/// Literals and type names. Numbers, strings, and the keyword literals go
/// through the constant pool; type names push a type id.
fn expr_literal(c: &mut Compiler<'_>, _can_assign: bool) {
    match c.parser.previous.kind {
        TokenKind::Number => {
            let TokenValue::Number(n) = c.parser.previous.value else {
                return;
            };
            c.emit_constant(Value::number(n));
        }
        TokenKind::String => {
            let TokenValue::Str(text) = c.parser.previous.value.clone() else {
                return;
            };
            let index = c.add_string_constant(&text);
            c.emit_opcode(Opcode::Constant);
            c.emit_short(index as u16);
        }
        TokenKind::True => c.emit_constant(Value::TRUE),
        TokenKind::False => c.emit_constant(Value::FALSE),
        TokenKind::Null => c.emit_constant(Value::NULL),

        TokenKind::BoolType => emit_type(c, TYPE_BOOL),
        TokenKind::NumType => emit_type(c, TYPE_NUM),
        TokenKind::StringType => emit_type(c, TYPE_STRING),
        TokenKind::ArrayType => emit_type(c, TYPE_ARRAY),
        TokenKind::MapType => emit_type(c, TYPE_MAP),
        TokenKind::RangeType => emit_type(c, TYPE_RANGE),
        TokenKind::FunctionType => emit_type(c, TYPE_FUNCTION),
        TokenKind::ObjectType => emit_type(c, TYPE_OBJECT),

        _ => unreachable!("literal rule on a non-literal token"),
    }
}

fn emit_type(c: &mut Compiler<'_>, type_id: u8) {
    c.emit_opcode(Opcode::PushType);
    c.emit_byte(type_id);
}

/// A bare name: read, assign, or define.
fn expr_name<'a>(c: &mut Compiler<'a>, can_assign: bool) {
    let name = c.prev_slice();
    let line = c.parser.previous.line;
    let resolved = c.search_name(name);

    // The operator has to be on the same line; a newline already ended the
    // expression statement.
    let op = c.peek();
    if can_assign && op == TokenKind::Eq {
        c.lex_token();
        c.skip_new_lines();
        compile_expression(c);
        emit_store(c, name, line, resolved);
        return;
    }

    if can_assign && let Some(binary) = compound_binary_op(op) {
        c.lex_token();

        // Compound assignment desugars to load, operate, store; the target
        // must already be a plain variable.
        match resolved {
            NameRef::Local(i) => {
                c.emit_opcode(Opcode::PushLocal);
                c.emit_byte(i);
            }
            NameRef::Global(i) => {
                c.emit_opcode(Opcode::PushGlobal);
                c.emit_byte(i);
            }
            NameRef::Function(_) => {
                c.parse_error("Cannot assign to a function.");
                c.skip_new_lines();
                compile_expression(c);
                return;
            }
            NameRef::NotDefined => {
                c.parse_error(&format!("Name '{}' is not defined.", name));
                c.skip_new_lines();
                compile_expression(c);
                return;
            }
        }

        c.skip_new_lines();
        compile_expression(c);
        c.emit_opcode(binary);

        match resolved {
            NameRef::Local(i) => {
                c.emit_opcode(Opcode::StoreLocal);
                c.emit_byte(i);
            }
            NameRef::Global(i) => {
                c.emit_opcode(Opcode::StoreGlobal);
                c.emit_byte(i);
            }
            _ => {}
        }
        return;
    }

    // Plain read.
    match resolved {
        NameRef::Local(i) => {
            c.emit_opcode(Opcode::PushLocal);
            c.emit_byte(i);
        }
        NameRef::Global(i) => {
            c.emit_opcode(Opcode::PushGlobal);
            c.emit_byte(i);
        }
        NameRef::Function(i) => {
            c.emit_opcode(Opcode::PushFn);
            c.emit_short(i);
        }
        NameRef::NotDefined => {
            c.parse_error(&format!("Name '{}' is not defined.", name));
        }
    }
}

/// Store the RHS into `resolved`, defining the name when it is unbound: a
/// script global at top level, a local otherwise. The RHS value is left as
/// the expression result.
fn emit_store<'a>(c: &mut Compiler<'a>, name: &'a str, line: u32, resolved: NameRef) {
    match resolved {
        NameRef::Local(i) => {
            c.emit_opcode(Opcode::StoreLocal);
            c.emit_byte(i);
        }
        NameRef::Global(i) => {
            c.emit_opcode(Opcode::StoreGlobal);
            c.emit_byte(i);
        }
        NameRef::Function(_) => {
            c.parse_error("Cannot assign to a function.");
        }
        NameRef::NotDefined => {
            if c.scope_depth == -1 {
                if c.vm.heap.script(c.script).global_names.count() >= MAX_VARIABLES {
                    c.parse_error("A script should contain at most 256 global variables.");
                    return;
                }
                let index = c.vm.heap.script_add_global(c.script, name);
                c.emit_opcode(Opcode::StoreGlobal);
                c.emit_byte(index as u8);
            } else {
                // The RHS value on the stack becomes the local's slot; a
                // copy is pushed as the expression result.
                let index = c.add_variable(name, line);
                c.emit_opcode(Opcode::PushLocal);
                c.emit_byte(index as u8);
            }
        }
    }
}

/// Left-associative binary operator: recurse one level stronger, emit one
/// opcode.
fn expr_binary_op(c: &mut Compiler<'_>, _can_assign: bool) {
    let op = c.parser.previous.kind;
    c.skip_new_lines();
    parse_precedence(c, get_rule(op).precedence.next());

    let opcode = match op {
        TokenKind::DotDot => Opcode::Range,
        TokenKind::Percent => Opcode::Mod,
        TokenKind::Amp => Opcode::BitAnd,
        TokenKind::Pipe => Opcode::BitOr,
        TokenKind::Caret => Opcode::BitXor,
        TokenKind::Plus => Opcode::Add,
        TokenKind::Minus => Opcode::Subtract,
        TokenKind::Star => Opcode::Multiply,
        TokenKind::Slash => Opcode::Divide,
        TokenKind::Gt => Opcode::Gt,
        TokenKind::Lt => Opcode::Lt,
        TokenKind::EqEq => Opcode::EqEq,
        TokenKind::NotEq => Opcode::NotEq,
        TokenKind::GtEq => Opcode::GtEq,
        TokenKind::LtEq => Opcode::LtEq,
        TokenKind::Rshift => Opcode::BitRshift,
        TokenKind::Lshift => Opcode::BitLshift,
        TokenKind::Is => Opcode::Is,
        TokenKind::In => Opcode::In,
        TokenKind::And => Opcode::And,
        TokenKind::Or => Opcode::Or,
        _ => unreachable!("binary rule on a non-operator token"),
    };
    c.emit_opcode(opcode);
}

fn expr_unary_op(c: &mut Compiler<'_>, _can_assign: bool) {
    let op = c.parser.previous.kind;
    c.skip_new_lines();
    parse_precedence(c, Precedence::Unary.next());

    match op {
        TokenKind::Tilde => c.emit_opcode(Opcode::BitNot),
        TokenKind::Minus => c.emit_opcode(Opcode::Negative),
        TokenKind::Not => c.emit_opcode(Opcode::Not),
        _ => unreachable!("unary rule on a non-operator token"),
    }
}

fn expr_grouping(c: &mut Compiler<'_>, _can_assign: bool) {
    compile_expression(c);
    c.consume(TokenKind::Rparen, "Expected ')' after expression.");
}

/// `[a, b, ...]`: the element count operand is patched once known.
fn expr_array(c: &mut Compiler<'_>, _can_assign: bool) {
    c.emit_opcode(Opcode::PushList);
    let count_site = c.emit_short(0);

    let mut count: usize = 0;
    loop {
        c.skip_new_lines();
        if c.peek() == TokenKind::Rbracket {
            break;
        }
        compile_expression(c);
        count += 1;
        c.emit_opcode(Opcode::ListAppend);
        c.skip_new_lines();
        if !c.match_token(TokenKind::Comma) {
            break;
        }
    }
    c.consume(TokenKind::Rbracket, "Expected ']' after list elements.");

    if count > u16::MAX as usize {
        c.parse_error("A list literal should contain at most 65535 elements.");
        return;
    }
    c.patch_short(count_site, count as u16);
}

/// `{k: v, ...}`.
fn expr_map(c: &mut Compiler<'_>, _can_assign: bool) {
    c.emit_opcode(Opcode::PushMap);

    loop {
        c.skip_new_lines();
        if c.peek() == TokenKind::Rbrace {
            break;
        }
        compile_expression(c);
        c.consume(TokenKind::Colon, "Expected ':' after a map key.");
        c.skip_new_lines();
        compile_expression(c);
        c.emit_opcode(Opcode::MapInsert);
        c.skip_new_lines();
        if !c.match_token(TokenKind::Comma) {
            break;
        }
    }
    c.consume(TokenKind::Rbrace, "Expected '}' after map entries.");
}

/// Call: the callee is already on the stack; the stack effect depends on
/// the argument count, adjusted here.
fn expr_call(c: &mut Compiler<'_>, _can_assign: bool) {
    let mut argc: usize = 0;

    if !c.match_token(TokenKind::Rparen) {
        loop {
            c.skip_new_lines();
            compile_expression(c);
            argc += 1;
            c.skip_new_lines();
            if !c.match_token(TokenKind::Comma) {
                break;
            }
        }
        c.consume(TokenKind::Rparen, "Expected ')' after arguments.");
    }

    if argc > MAX_ARGS {
        c.parse_error("A call should have at most 255 arguments.");
    }

    c.emit_opcode(Opcode::Call);
    c.emit_byte(argc as u8);
    c.stack_size -= argc as i32;
}

/// `.name`: get, or set with `=` under `can_assign`.
fn expr_attrib(c: &mut Compiler<'_>, can_assign: bool) {
    c.consume(TokenKind::Name, "Expected an attribute name after '.'.");
    let name = c.prev_slice();
    let index = c.vm.heap.script_intern_name(c.script, name);
    if index > u16::MAX as usize {
        c.parse_error("A script should contain at most 65536 names.");
        return;
    }

    let op = c.peek();
    if can_assign && op == TokenKind::Eq {
        c.lex_token();
        c.skip_new_lines();
        compile_expression(c);
        c.emit_opcode(Opcode::SetAttrib);
        c.emit_short(index as u16);
        return;
    }
    if can_assign && compound_binary_op(op).is_some() {
        c.lex_token();
        c.parse_error("Compound assignment is not allowed on attributes.");
        c.skip_new_lines();
        compile_expression(c);
        return;
    }

    c.emit_opcode(Opcode::GetAttrib);
    c.emit_short(index as u16);
}

/// `[index]`: get, or set with `=` under `can_assign`.
fn expr_subscript(c: &mut Compiler<'_>, can_assign: bool) {
    c.skip_new_lines();
    compile_expression(c);
    c.consume(TokenKind::Rbracket, "Expected ']' after subscript.");

    let op = c.peek();
    if can_assign && op == TokenKind::Eq {
        c.lex_token();
        c.skip_new_lines();
        compile_expression(c);
        c.emit_opcode(Opcode::SetSubscript);
        return;
    }
    if can_assign && compound_binary_op(op).is_some() {
        c.lex_token();
        c.parse_error("Compound assignment is not allowed on subscripts.");
        c.skip_new_lines();
        compile_expression(c);
        return;
    }

    c.emit_opcode(Opcode::GetSubscript);
}

/// Fires only when `=` (or a compound) follows something that is not an
/// assignable place; valid targets consumed their operator already.
fn expr_assignment(c: &mut Compiler<'_>, _can_assign: bool) {
    c.parse_error("Invalid assignment target.");
    c.skip_new_lines();
    parse_precedence(c, Precedence::Lowest);
}

fn compound_binary_op(kind: TokenKind) -> Option<Opcode> {
    match kind {
        TokenKind::PlusEq => Some(Opcode::Add),
        TokenKind::MinusEq => Some(Opcode::Subtract),
        TokenKind::StarEq => Some(Opcode::Multiply),
        TokenKind::SlashEq => Some(Opcode::Divide),
        _ => None,
    }
}

// ============================================================================
// Statements
// ============================================================================

fn compile_statement(c: &mut Compiler<'_>) {
    if c.match_token(TokenKind::Break) {
        if c.loops.is_empty() {
            c.parse_error("Cannot use 'break' outside a loop.");
            return;
        }

        c.emit_opcode(Opcode::Jump);
        let patch = c.emit_short(0xffff);
        let overflowed = {
            let frame = c.loops.last_mut().expect("loop frame exists");
            if frame.patches.len() < MAX_BREAK_PATCH {
                frame.patches.push(patch);
                false
            } else {
                true
            }
        };
        if overflowed {
            c.parse_error("A loop should contain at most 256 break statements.");
        }
        c.consume_end_statement();
    } else if c.match_token(TokenKind::Continue) {
        if c.loops.is_empty() {
            c.parse_error("Cannot use 'continue' outside a loop.");
            return;
        }

        let start = c.loops.last().expect("loop frame exists").start;
        c.emit_opcode(Opcode::Jump);
        c.emit_short(start as u16);
        c.consume_end_statement();
    } else if c.match_token(TokenKind::Return) {
        if c.scope_depth == -1 {
            c.parse_error("Invalid 'return' outside a function.");
            return;
        }

        if c.peek() == TokenKind::Semicolon || c.peek() == TokenKind::Line {
            c.emit_opcode(Opcode::PushNull);
            c.emit_opcode(Opcode::Return);
        } else {
            compile_expression(c);
            c.emit_opcode(Opcode::Return);
        }
        c.consume_end_statement();
    } else if c.match_token(TokenKind::If) {
        compile_if_statement(c);
    } else if c.match_token(TokenKind::While) {
        compile_while_statement(c);
    } else if c.match_token(TokenKind::For) {
        c.parse_error("'for' loops are not implemented yet.");
    } else {
        // An expression statement discards its value.
        compile_expression(c);
        c.emit_opcode(Opcode::Pop);
        c.consume_end_statement();
    }
}

/// An `if`/`elif`/`else` chain. Each satisfied branch jumps over the rest;
/// one `end` closes the whole chain.
fn compile_if_statement(c: &mut Compiler<'_>) {
    let mut end_patches: Vec<usize> = Vec::new();

    loop {
        compile_expression(c); // Condition.
        c.emit_opcode(Opcode::JumpIfNot);
        let if_patch = c.emit_short(0xffff);

        c.consume_start_block();
        compile_block_body(c, true);

        if c.match_token(TokenKind::Elif) {
            c.emit_opcode(Opcode::Jump);
            end_patches.push(c.emit_short(0xffff));
            c.patch_jump(if_patch);
            continue;
        }

        if c.match_token(TokenKind::Else) {
            c.emit_opcode(Opcode::Jump);
            end_patches.push(c.emit_short(0xffff));
            c.patch_jump(if_patch);
            compile_block_body(c, false);
        } else {
            c.patch_jump(if_patch);
        }
        break;
    }

    c.consume(TokenKind::End, "Expected 'end' after block.");
    for patch in end_patches {
        c.patch_jump(patch);
    }
}

fn compile_while_statement(c: &mut Compiler<'_>) {
    let start = c.code_len();
    assert!(start < MAX_JUMP, "Too large address to jump.");
    c.loops.push(LoopFrame {
        start,
        patches: Vec::new(),
    });

    compile_expression(c); // Condition.
    c.emit_opcode(Opcode::JumpIfNot);
    let while_patch = c.emit_short(0xffff);

    c.consume_start_block();
    compile_block_body(c, false);

    c.emit_opcode(Opcode::Jump);
    c.emit_short(start as u16);

    c.patch_jump(while_patch);

    let frame = c.loops.pop().expect("loop frame exists");
    for patch in frame.patches {
        c.patch_jump(patch);
    }

    c.consume(TokenKind::End, "Expected 'end' after block.");
}

/// Statements until `end`, EOF, or (in an if body) `elif`/`else`. The
/// terminator is left for the caller.
fn compile_block_body(c: &mut Compiler<'_>, if_body: bool) {
    c.enter_block();

    loop {
        c.skip_new_lines();
        let next = c.peek();
        if next == TokenKind::End
            || next == TokenKind::Eof
            || (if_body && (next == TokenKind::Else || next == TokenKind::Elif))
        {
            break;
        }
        compile_statement(c);
    }

    c.exit_block();
}

/// `def name(params) ... end` or `native name(params)`.
fn compile_function(c: &mut Compiler<'_>, is_native: bool) {
    c.consume(TokenKind::Name, "Expected a function name.");
    let name = c.prev_slice();

    if c.search_name(name) != NameRef::NotDefined {
        c.parse_error(&format!("Name '{}' is already defined.", name));
    }

    let func = c.vm.heap.new_function(name, Some(c.script), is_native);
    c.function = func;

    c.consume(TokenKind::Lparen, "Expected '(' after function name.");

    c.scope_depth += 1; // Parameter scope.

    let mut arity: i32 = 0;
    if c.peek() != TokenKind::Rparen {
        loop {
            c.consume(TokenKind::Name, "Expected a parameter name.");
            let param = c.prev_slice();
            let line = c.parser.previous.line;

            if c.search_current_scope(param).is_some() {
                c.parse_error("Multiple definition of a parameter.");
            }
            c.add_variable(param, line);
            c.stack_size += 1; // Parameters occupy the frame's first slots.
            arity += 1;

            if !c.match_token(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::Rparen, "Expected ')' after parameters.");
    c.vm.heap.function_mut(func).arity = arity;

    c.consume_end_statement();

    if !is_native {
        compile_block_body(c, false);
        c.consume(TokenKind::End, "Expected 'end' after function body.");

        // Implicit return for bodies that fall off the end.
        c.emit_opcode(Opcode::PushNull);
        c.emit_opcode(Opcode::Return);
    }

    // Drop the parameters and leave parameter scope.
    while let Some(var) = c.variables.last() {
        if var.depth < 0 {
            break;
        }
        c.variables.pop();
        c.stack_size -= 1;
    }
    c.scope_depth -= 1;

    c.function = c.vm.heap.script(c.script).body();
}

/// `import <name>`: recognized and parsed; linking is out of scope and no
/// code is emitted.
fn compile_import(c: &mut Compiler<'_>) {
    c.consume(TokenKind::Name, "Expected a script name after 'import'.");
    c.consume_end_statement();
}

// ============================================================================
// Entry point
// ============================================================================

/// Compile `source` into a new script. Diagnostics go through the VM's
/// reporter; on any error the script is unsafe to execute and
/// `Err(CompileError)` is returned instead.
pub fn compile(vm: &mut Vm, path: &str, source: &str) -> Result<ObjRef, CompileError> {
    // Skip a UTF-8 BOM if there is one.
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    let script = vm.heap.new_script(path);
    // The collector must see in-flight compiler state as reachable.
    vm.heap.set_compiler_roots(&[script]);
    let body = vm.heap.script(script).body();

    let mut compiler = Compiler {
        vm,
        source,
        parser: Parser::new(source, path),
        scope_depth: -1,
        variables: Vec::new(),
        stack_size: 0,
        script,
        function: body,
        loops: Vec::new(),
        literal_index: HashMap::new(),
        string_literal_index: HashMap::new(),
    };

    // Prime the window: current <- next.
    compiler.lex_token();
    compiler.lex_token();
    compiler.skip_new_lines();

    while !compiler.match_token(TokenKind::Eof) {
        if compiler.match_token(TokenKind::Native) {
            compile_function(&mut compiler, true);
        } else if compiler.match_token(TokenKind::Def) {
            compile_function(&mut compiler, false);
        } else if compiler.match_token(TokenKind::Import) {
            compile_import(&mut compiler);
        } else {
            compile_statement(&mut compiler);
        }
    }

    let has_errors = compiler.parser.has_errors;
    vm.heap.clear_compiler_roots();

    if has_errors { Err(CompileError) } else { Ok(script) }
}

// ============================================================================
// Tests
// ============================================================================
