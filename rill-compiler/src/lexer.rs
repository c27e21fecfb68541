// rill-compiler - Lexer for Rill source text
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Lexer (tokeniser) for Rill source code.
//!
//! The lexer is a byte cursor over the source. Newlines are significant
//! (they terminate statements) and are produced as [`TokenKind::Line`]
//! tokens; `#` starts a comment running to the end of the line, leaving the
//! newline itself to be tokenised. Lexing never stops on an error: bad
//! input produces an error message alongside a best-effort token and
//! scanning continues.

use std::fmt;

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Produced for unrecognisable input; parse errors at an `Error` token
    /// are suppressed since the lex error was already reported.
    Error,
    Eof,
    Line,

    // Symbols
    Dot,        // .
    DotDot,     // ..
    Comma,      // ,
    Colon,      // :
    Semicolon,  // ;
    Lparen,     // (
    Rparen,     // )
    Lbracket,   // [
    Rbracket,   // ]
    Lbrace,     // {
    Rbrace,     // }
    Percent,    // %

    Tilde,      // ~
    Amp,        // &
    Pipe,       // |
    Caret,      // ^

    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Eq,         // =
    Gt,         // >
    Lt,         // <

    EqEq,       // ==
    NotEq,      // !=
    GtEq,       // >=
    LtEq,       // <=

    PlusEq,     // +=
    MinusEq,    // -=
    StarEq,     // *=
    SlashEq,    // /=
    Rshift,     // >>
    Lshift,     // <<

    // Keywords
    Import,
    Enum,
    Def,
    Native,
    End,

    Null,
    SelfKw,
    Is,
    In,
    And,
    Or,
    Not, // the keyword `not`, and bare `!`
    True,
    False,

    // Type names, for `is` tests
    BoolType,
    NumType,
    StringType,
    ArrayType,
    MapType,
    RangeType,
    FunctionType,
    ObjectType,

    Do,
    While,
    For,
    If,
    Elif,
    Else,
    Break,
    Continue,
    Return,

    Name,
    Number,
    String,
}

/// Literal payload of a `Number` or `String` token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    Number(f64),
    Str(String),
}

/// One token: kind, source span, 1-based line, and literal payload.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the source.
    pub start: usize,
    pub length: usize,
    pub line: u32,
    pub value: TokenValue,
}

impl Token {
    pub(crate) fn synthetic(kind: TokenKind) -> Token {
        Token {
            kind,
            start: 0,
            length: 0,
            line: 1,
            value: TokenValue::None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

/// A scanned token plus any lex errors raised while producing it.
#[derive(Debug)]
pub struct Scanned {
    pub token: Token,
    pub errors: Vec<String>,
}

/// Keywords, matched after an identifier is fully consumed.
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("import", TokenKind::Import),
    ("enum", TokenKind::Enum),
    ("def", TokenKind::Def),
    ("native", TokenKind::Native),
    ("end", TokenKind::End),
    ("null", TokenKind::Null),
    ("self", TokenKind::SelfKw),
    ("is", TokenKind::Is),
    ("in", TokenKind::In),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
    ("not", TokenKind::Not),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("do", TokenKind::Do),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("if", TokenKind::If),
    ("elif", TokenKind::Elif),
    ("else", TokenKind::Else),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
    // Type names.
    ("Bool", TokenKind::BoolType),
    ("Num", TokenKind::NumType),
    ("String", TokenKind::StringType),
    ("Array", TokenKind::ArrayType),
    ("Map", TokenKind::MapType),
    ("Range", TokenKind::RangeType),
    ("Function", TokenKind::FunctionType),
    ("Object", TokenKind::ObjectType),
];

/// The lexer: a cursor over the source bytes.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    /// Start of the token being scanned.
    token_start: usize,
    /// Current byte position.
    pos: usize,
    /// 1-based line of the current position.
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            source,
            bytes: source.as_bytes(),
            token_start: 0,
            pos: 0,
            line: 1,
        }
    }

    /// Scan the next token. At the end of input this keeps returning
    /// `Eof` tokens.
    pub fn scan(&mut self) -> Scanned {
        let mut errors = Vec::new();

        while let Some(c) = self.peek() {
            self.token_start = self.pos;
            self.advance();

            match c {
                b',' => return self.token(TokenKind::Comma, errors),
                b':' => return self.token(TokenKind::Colon, errors),
                b';' => return self.token(TokenKind::Semicolon, errors),
                b'(' => return self.token(TokenKind::Lparen, errors),
                b')' => return self.token(TokenKind::Rparen, errors),
                b'[' => return self.token(TokenKind::Lbracket, errors),
                b']' => return self.token(TokenKind::Rbracket, errors),
                b'{' => return self.token(TokenKind::Lbrace, errors),
                b'}' => return self.token(TokenKind::Rbrace, errors),
                b'%' => return self.token(TokenKind::Percent, errors),

                b'~' => return self.token(TokenKind::Tilde, errors),
                b'&' => return self.token(TokenKind::Amp, errors),
                b'|' => return self.token(TokenKind::Pipe, errors),
                b'^' => return self.token(TokenKind::Caret, errors),

                b'\n' => return self.line_token(errors),

                b' ' | b'\t' | b'\r' => {
                    while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r')) {
                        self.advance();
                    }
                }

                // Comment to end of line; the newline stays for the next
                // token so statements still terminate.
                b'#' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }

                b'.' => {
                    return self.two_char(b'.', TokenKind::Dot, TokenKind::DotDot, errors);
                }
                b'=' => {
                    return self.two_char(b'=', TokenKind::Eq, TokenKind::EqEq, errors);
                }
                b'!' => {
                    return self.two_char(b'=', TokenKind::Not, TokenKind::NotEq, errors);
                }
                b'>' => {
                    if self.match_byte(b'>') {
                        return self.token(TokenKind::Rshift, errors);
                    }
                    return self.two_char(b'=', TokenKind::Gt, TokenKind::GtEq, errors);
                }
                b'<' => {
                    if self.match_byte(b'<') {
                        return self.token(TokenKind::Lshift, errors);
                    }
                    return self.two_char(b'=', TokenKind::Lt, TokenKind::LtEq, errors);
                }
                b'+' => {
                    return self.two_char(b'=', TokenKind::Plus, TokenKind::PlusEq, errors);
                }
                b'-' => {
                    return self.two_char(b'=', TokenKind::Minus, TokenKind::MinusEq, errors);
                }
                b'*' => {
                    return self.two_char(b'=', TokenKind::Star, TokenKind::StarEq, errors);
                }
                b'/' => {
                    return self.two_char(b'=', TokenKind::Slash, TokenKind::SlashEq, errors);
                }

                b'"' => return self.scan_string(errors),

                _ => {
                    if c.is_ascii_digit() {
                        return self.scan_number(errors);
                    }
                    if is_name_start(c) {
                        return self.scan_name(errors);
                    }
                    if (32..=126).contains(&c) {
                        errors.push(format!("Invalid character '{}'", c as char));
                    } else {
                        errors.push(format!("Invalid byte 0x{:x}", c));
                    }
                    return self.token(TokenKind::Error, errors);
                }
            }
        }

        self.token_start = self.pos;
        self.token(TokenKind::Eof, errors)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek();
        if let Some(c) = c {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
            }
        }
        c
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            return true;
        }
        false
    }

    fn two_char(
        &mut self,
        trailing: u8,
        one: TokenKind,
        two: TokenKind,
        errors: Vec<String>,
    ) -> Scanned {
        if self.match_byte(trailing) {
            self.token(two, errors)
        } else {
            self.token(one, errors)
        }
    }

    fn token(&self, kind: TokenKind, errors: Vec<String>) -> Scanned {
        Scanned {
            token: Token {
                kind,
                start: self.token_start,
                length: self.pos - self.token_start,
                line: self.line,
                value: TokenValue::None,
            },
            errors,
        }
    }

    /// A newline belongs to the line it ends.
    fn line_token(&self, errors: Vec<String>) -> Scanned {
        let mut scanned = self.token(TokenKind::Line, errors);
        scanned.token.line = self.line - 1;
        scanned
    }

    fn value_token(&self, kind: TokenKind, value: TokenValue, errors: Vec<String>) -> Scanned {
        let mut scanned = self.token(kind, errors);
        scanned.token.value = value;
        scanned
    }

    fn scan_string(&mut self, mut errors: Vec<String>) -> Scanned {
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let c = match self.advance() {
                Some(c) => c,
                None => {
                    errors.push("Non terminated string.".to_string());
                    break;
                }
            };

            if c == b'"' {
                break;
            }

            if c == b'\\' {
                match self.advance() {
                    Some(b'"') => buf.push(b'"'),
                    Some(b'\\') => buf.push(b'\\'),
                    Some(b'n') => buf.push(b'\n'),
                    Some(b'r') => buf.push(b'\r'),
                    Some(b't') => buf.push(b'\t'),
                    _ => errors.push("Invalid escape character.".to_string()),
                }
            } else {
                buf.push(c);
            }
        }

        let text = String::from_utf8_lossy(&buf).into_owned();
        self.value_token(TokenKind::String, TokenValue::Str(text), errors)
    }

    fn scan_number(&mut self, mut errors: Vec<String>) -> Scanned {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        // A fractional part needs at least one digit, so `1..5` stays a
        // range expression.
        if self.peek() == Some(b'.')
            && matches!(self.peek_at(self.pos + 1), Some(c) if c.is_ascii_digit())
        {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[self.token_start..self.pos];
        let mut value: f64 = text.parse().unwrap_or(0.0);
        if !value.is_finite() {
            errors.push(format!("Literal is too large ({})", text));
            value = 0.0;
        }
        self.value_token(TokenKind::Number, TokenValue::Number(value), errors)
    }

    fn scan_name(&mut self, errors: Vec<String>) -> Scanned {
        while matches!(self.peek(), Some(c) if is_name_start(c) || c.is_ascii_digit()) {
            self.advance();
        }

        let text = &self.source[self.token_start..self.pos];
        for (keyword, kind) in KEYWORDS {
            if *keyword == text {
                return self.token(*kind, errors);
            }
        }
        self.token(TokenKind::Name, errors)
    }
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

// ============================================================================
// Tests
// ============================================================================
