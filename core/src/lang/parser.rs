//! Parser for litua text documents.
//!
//! Consumes the flat token stream and produces a tree rooted in the
//! synthetic `document` node. The parser only enforces the token
//! protocol; every malformed document is already rejected by the lexer,
//! so a [`ParseError`](crate::types::error::ErrorCode::ParseError) here
//! means the two sides disagree about that protocol.

use std::iter::Peekable;
use std::vec::IntoIter;

use crate::types::error::{Diagnostic, ErrorCode};
use crate::types::token::{Token, TokenKind};
use crate::types::tree::{Element, Node, META_WHITESPACE};

/* -------------------- *
 *        PARSER        *
 * -------------------- */
/// Where an element sequence ends.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SequenceEnd {
    EndOfInput,
    CallClose,
    ArgClose,
}

/// Represents a parser consuming one token stream.
pub struct Parser {
    iter: Peekable<IntoIter<Token>>,
}

impl Parser {
    /* -------------------- *
     *        PUBLIC        *
     * -------------------- */
    /// Creates a new instance of [`Parser`].
    #[inline]
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { iter: tokens.into_iter().peekable() }
    }

    /// Parses the token stream into the synthetic `document` root.
    pub fn parse(mut self) -> Result<Node, Diagnostic> {
        let content = self.parse_elements(SequenceEnd::EndOfInput)?;
        Ok(Node::document(content))
    }

    /* -------------------- *
     *       ELEMENTS       *
     * -------------------- */
    fn parse_elements(&mut self, end: SequenceEnd) -> Result<Vec<Element>, Diagnostic> {
        let mut elements = Vec::new();

        loop {
            let Some(token) = self.iter.peek() else {
                if end == SequenceEnd::EndOfInput {
                    return Ok(elements);
                }
                return Err(Self::unexpected_end());
            };

            match &token.kind {
                TokenKind::Text(_) => {
                    if let Some(Token { kind: TokenKind::Text(text), .. }) = self.iter.next() {
                        elements.push(Element::Text(text));
                    }
                }
                TokenKind::RawString(..) => {
                    if let Some(Token { kind: TokenKind::RawString(body, depth), .. }) = self.iter.next() {
                        elements.push(Element::Call(Node::raw(depth, &body)));
                    }
                }
                TokenKind::CallOpen => {
                    let node = self.parse_call()?;
                    elements.push(Element::Call(node));
                }
                TokenKind::CallClose if end == SequenceEnd::CallClose => {
                    self.iter.next();
                    return Ok(elements);
                }
                TokenKind::ArgClose if end == SequenceEnd::ArgClose => {
                    self.iter.next();
                    return Ok(elements);
                }
                _ => return Err(Self::unexpected_token(token)),
            }
        }
    }

    /* -------------------- *
     *        CALLS         *
     * -------------------- */
    fn parse_call(&mut self) -> Result<Node, Diagnostic> {
        self.expect(|kind| matches!(kind, TokenKind::CallOpen), "the start of a function call")?;

        let name_token = self.expect(|kind| matches!(kind, TokenKind::CallName(_)), "a call name")?;
        let TokenKind::CallName(name) = name_token.kind else { unreachable!() };

        let mut node = Node::new(name);

        loop {
            let Some(token) = self.iter.peek() else {
                return Err(Self::unexpected_end());
            };

            match &token.kind {
                // one `[key=value]` group; repeated keys append to the
                // same value sequence
                TokenKind::ArgOpen => {
                    self.iter.next();

                    let key_token = self.expect(|kind| matches!(kind, TokenKind::ArgKey(_)), "an argument key")?;
                    let TokenKind::ArgKey(key) = key_token.kind else { unreachable!() };

                    self.expect(|kind| matches!(kind, TokenKind::ArgEq), "a '=' after the argument key")?;

                    let value = self.parse_elements(SequenceEnd::ArgClose)?;
                    node.args.entry(key).or_default().extend(value);
                }
                TokenKind::Whitespace(_) => {
                    if let Some(Token { kind: TokenKind::Whitespace(separator), .. }) = self.iter.next() {
                        node.args.insert(META_WHITESPACE.to_owned(), vec![Element::Text(separator)]);
                    }

                    node.content = self.parse_elements(SequenceEnd::CallClose)?;
                    return Ok(node);
                }
                TokenKind::CallClose => {
                    self.iter.next();
                    return Ok(node);
                }
                _ => return Err(Self::unexpected_token(token)),
            }
        }
    }

    /* -------------------- *
     *        UTILS         *
     * -------------------- */
    fn expect(
        &mut self,
        admissible: fn(&TokenKind) -> bool,
        expected: &str,
    ) -> Result<Token, Diagnostic> {
        match self.iter.next() {
            Some(token) if admissible(&token.kind) => Ok(token),
            Some(token) => Err(Self::unexpected_token(&token).with_expected(expected.to_owned())),
            None => Err(Self::unexpected_end().with_expected(expected.to_owned())),
        }
    }

    fn unexpected_token(token: &Token) -> Diagnostic {
        Diagnostic::new(ErrorCode::ParseError, format!("unexpected token {}", token.kind.name()))
            .with_position(token.position)
    }

    fn unexpected_end() -> Diagnostic {
        Diagnostic::new(ErrorCode::ParseError, "unexpected end of the token stream")
    }
}
