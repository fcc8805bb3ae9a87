//! The flat token stream emitted by the lexer.

use std::fmt::{self, Display};

use super::position::Position;

/* -------------------- *
 *      TOKEN KIND      *
 * -------------------- */
/// Represents the different kinds of tokens created by the lexer.
///
/// `RawString` carries the verbatim body together with the number of
/// `<` characters of its delimiter run (1 to 126).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Text(String),
    CallOpen,
    CallName(String),
    ArgOpen,
    ArgKey(String),
    ArgEq,
    ArgClose,
    CallClose,
    Whitespace(String),
    RawString(String, u8),
}

impl TokenKind {
    /// Returns the name of the token kind as a string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Text(_) => "Text",
            TokenKind::CallOpen => "CallOpen",
            TokenKind::CallName(_) => "CallName",
            TokenKind::ArgOpen => "ArgOpen",
            TokenKind::ArgKey(_) => "ArgKey",
            TokenKind::ArgEq => "ArgEq",
            TokenKind::ArgClose => "ArgClose",
            TokenKind::CallClose => "CallClose",
            TokenKind::Whitespace(_) => "Whitespace",
            TokenKind::RawString(..) => "RawString",
        }
    }
}

/* -------------------- *
 *        TOKEN         *
 * -------------------- */
/// Represents a token created by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The kind of the token, including its payload.
    pub kind: TokenKind,
    /// The position in the source document this token was created at.
    pub position: Position,
}

impl Token {
    /// Creates a new instance of [`Token`].
    #[inline]
    #[must_use]
    pub fn new(kind: TokenKind, position: Position) -> Self {
        Self { kind, position }
    }
}

impl Display for Token {
    /// One-line rendering used by the token stream dump.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            TokenKind::Text(text) => write!(f, "{:>6}  Text({text:?})", self.position.byte_start),
            TokenKind::CallName(name) => write!(f, "{:>6}  CallName({name:?})", self.position.byte_start),
            TokenKind::ArgKey(key) => write!(f, "{:>6}  ArgKey({key:?})", self.position.byte_start),
            TokenKind::Whitespace(ws) => write!(f, "{:>6}  Whitespace({ws:?})", self.position.byte_start),
            TokenKind::RawString(body, depth) => {
                write!(f, "{:>6}  RawString({body:?}, {depth})", self.position.byte_start)
            }
            other => write!(f, "{:>6}  {}", self.position.byte_start, other.name()),
        }
    }
}
