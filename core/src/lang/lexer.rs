//! Lexer for litua text documents.
//!
//! The scanner walks the UTF-8 source with a byte cursor and emits the
//! flat token stream consumed by the parser. The grammar is context
//! dependent: `]` only terminates inside an argument value, a `<` run
//! directly after `{` opens a raw string, and exactly one whitespace
//! scalar separates a call name from its content.
//!
//! # Examples
//!
//! ```
//! use litua::lang::lexer::Lexer;
//! use litua::types::token::TokenKind;
//!
//! let tokens = Lexer::new("{item} a").tokenize().unwrap();
//!
//! assert_eq!(tokens[0].kind, TokenKind::CallOpen);
//! assert_eq!(tokens[1].kind, TokenKind::CallName("item".to_owned()));
//! assert_eq!(tokens[2].kind, TokenKind::CallClose);
//! assert_eq!(tokens[3].kind, TokenKind::Text(" a".to_owned()));
//! ```

use crate::types::error::{Diagnostic, ErrorCode};
use crate::types::position::Position;
use crate::types::token::{Token, TokenKind};

// characters part of the litua text document syntax

/// U+007B  LEFT CURLY BRACKET
pub const OPEN_FUNCTION: char = '{';
/// U+007D  RIGHT CURLY BRACKET
pub const CLOSE_FUNCTION: char = '}';
/// U+005B  LEFT SQUARE BRACKET
pub const OPEN_ARG: char = '[';
/// U+005D  RIGHT SQUARE BRACKET
pub const CLOSE_ARG: char = ']';
/// U+003D  EQUALS SIGN
pub const ASSIGN: char = '=';
/// U+003C  LESS-THAN SIGN
pub const OPEN_RAW: char = '<';
/// U+003E  GREATER-THAN SIGN
pub const CLOSE_RAW: char = '>';

/// Longest admissible raw string delimiter run.
pub const RAW_DELIMITER_MAX: usize = 126;

/* -------------------- *
 *         LEXER        *
 * -------------------- */
/// Where a token sequence ends.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Terminator {
    EndOfInput,
    FunctionClose,
    ArgumentClose,
}

/// What follows a call name.
enum NameEnd {
    Closed,
    Arguments,
    Content,
}

/// A bookmark into the source, taken before a token starts.
#[derive(Clone, Copy)]
struct Mark {
    byte: usize,
    line: u32,
    col: u32,
}

/// Represents a lexer tokenizing one source document.
pub struct Lexer<'a> {
    source: &'a str,
    cursor: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    /* -------------------- *
     *        PUBLIC        *
     * -------------------- */
    /// Creates a new instance of [`Lexer`].
    #[inline]
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            cursor: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
        }
    }

    /// Tokenizes the whole source document.
    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        self.lex_sequence(Terminator::EndOfInput)?;
        Ok(self.tokens)
    }

    /* -------------------- *
     *      SEQUENCES       *
     * -------------------- */
    /// Lexes text, calls and raw strings until the given terminator.
    fn lex_sequence(&mut self, until: Terminator) -> Result<(), Diagnostic> {
        let mut text: Option<Mark> = None;

        loop {
            let Some(chr) = self.peek() else {
                self.flush_text(text.take());

                return match until {
                    Terminator::EndOfInput => Ok(()),
                    Terminator::FunctionClose => Err(self
                        .error_here("function call is never closed")
                        .with_expected("a '}' before the end of input")),
                    Terminator::ArgumentClose => Err(self
                        .error_here("argument value is never closed")
                        .with_expected("a ']' before the end of input")),
                };
            };

            match chr {
                OPEN_FUNCTION => {
                    self.flush_text(text.take());
                    self.lex_call()?;
                }
                CLOSE_FUNCTION => match until {
                    Terminator::FunctionClose => {
                        self.flush_text(text.take());
                        let mark = self.mark();
                        self.bump();
                        self.push_span(TokenKind::CallClose, mark);
                        return Ok(());
                    }
                    Terminator::ArgumentClose => {
                        return Err(self
                            .error_here("unbalanced '}' inside an argument value")
                            .with_fix("use {right-curly-brace} for a literal '}'"));
                    }
                    Terminator::EndOfInput => {
                        return Err(self
                            .error_here("there is one function end too many")
                            .with_context("a '}' appears without a matching '{'")
                            .with_fix("use {right-curly-brace} for a literal '}'"));
                    }
                },
                CLOSE_ARG if until == Terminator::ArgumentClose => {
                    self.flush_text(text.take());
                    let mark = self.mark();
                    self.bump();
                    self.push_span(TokenKind::ArgClose, mark);
                    return Ok(());
                }
                _ => {
                    if text.is_none() {
                        text = Some(self.mark());
                    }
                    self.bump();
                }
            }
        }
    }

    /* -------------------- *
     *        CALLS         *
     * -------------------- */
    /// Lexes one function call or raw string. The cursor sits on `{`.
    fn lex_call(&mut self) -> Result<(), Diagnostic> {
        let open = self.mark();
        self.bump();

        match self.peek() {
            None => Err(self
                .error_here("function call is never closed")
                .with_expected("a call name followed by a '}'")),
            Some(CLOSE_FUNCTION) => Err(self
                .error_at(open, "call was immediately closed, but empty call names are not allowed")
                .with_fix("use {left-curly-brace} and {right-curly-brace} for literal braces")),
            Some(OPEN_RAW) => self.lex_raw(open),
            Some(_) => {
                self.push_span(TokenKind::CallOpen, open);

                match self.lex_call_name()? {
                    NameEnd::Closed => Ok(()),
                    NameEnd::Arguments => self.lex_args(),
                    NameEnd::Content => self.lex_sequence(Terminator::FunctionClose),
                }
            }
        }
    }

    /// Lexes the call name and the single token following it.
    fn lex_call_name(&mut self) -> Result<NameEnd, Diagnostic> {
        let mark = self.mark();

        loop {
            match self.peek() {
                None => {
                    return Err(self
                        .error_here("function call is never closed")
                        .with_expected("a '}' before the end of input"));
                }
                Some(CLOSE_FUNCTION) => {
                    self.emit_name(mark)?;
                    let close = self.mark();
                    self.bump();
                    self.push_span(TokenKind::CallClose, close);
                    return Ok(NameEnd::Closed);
                }
                Some(OPEN_ARG) => {
                    self.emit_name(mark)?;
                    return Ok(NameEnd::Arguments);
                }
                Some(chr) if chr.is_whitespace() => {
                    self.emit_name(mark)?;
                    self.lex_separator();
                    return Ok(NameEnd::Content);
                }
                Some(chr @ (OPEN_FUNCTION | OPEN_RAW | ASSIGN)) => {
                    return Err(self
                        .error_here(format!("character '{chr}' is not allowed in a call name"))
                        .with_expected("a name without '{', '<', '=' or whitespace"));
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn emit_name(&mut self, mark: Mark) -> Result<(), Diagnostic> {
        let name = &self.source[mark.byte..self.cursor];

        if name.is_empty() {
            return Err(self
                .error_at(mark, "call name must not be empty")
                .with_expected("at least one character in front of '[', '}' or whitespace"));
        }

        self.push_span(TokenKind::CallName(name.to_owned()), mark);
        Ok(())
    }

    /// Emits the single whitespace scalar separating a call name or the
    /// last argument group from the content. Any further whitespace
    /// belongs to the content text.
    fn lex_separator(&mut self) {
        let mark = self.mark();
        let chr = self.bump();
        self.push_span(TokenKind::Whitespace(chr.to_string()), mark);
    }

    /* -------------------- *
     *      ARGUMENTS       *
     * -------------------- */
    /// Lexes `[key=value]` groups and whatever follows them. The cursor
    /// sits on `[`.
    fn lex_args(&mut self) -> Result<(), Diagnostic> {
        loop {
            let mark = self.mark();
            self.bump();
            self.push_span(TokenKind::ArgOpen, mark);

            self.lex_arg_key()?;
            self.lex_sequence(Terminator::ArgumentClose)?;

            match self.peek() {
                Some(OPEN_ARG) => continue,
                Some(CLOSE_FUNCTION) => {
                    let close = self.mark();
                    self.bump();
                    self.push_span(TokenKind::CallClose, close);
                    return Ok(());
                }
                Some(chr) if chr.is_whitespace() => {
                    self.lex_separator();
                    return self.lex_sequence(Terminator::FunctionClose);
                }
                Some(chr) => {
                    return Err(self
                        .error_here(format!("unexpected character '{chr}' after an argument group"))
                        .with_expected("'[', '}' or a whitespace character to continue with content"));
                }
                None => {
                    return Err(self
                        .error_here("function call is never closed")
                        .with_expected("a '}' before the end of input"));
                }
            }
        }
    }

    fn lex_arg_key(&mut self) -> Result<(), Diagnostic> {
        let mark = self.mark();

        loop {
            match self.peek() {
                None => {
                    return Err(self
                        .error_here("argument key is never finished")
                        .with_expected("a '=' before the end of input"));
                }
                Some(ASSIGN) => {
                    let key = &self.source[mark.byte..self.cursor];

                    if key.is_empty() {
                        return Err(self
                            .error_at(mark, "argument key must not be empty")
                            .with_expected("at least one character in front of '='"));
                    }

                    self.push_span(TokenKind::ArgKey(key.to_owned()), mark);

                    let eq = self.mark();
                    self.bump();
                    self.push_span(TokenKind::ArgEq, eq);
                    return Ok(());
                }
                Some(chr) if chr.is_whitespace() => {
                    return Err(self
                        .error_here("whitespace is not allowed in an argument key")
                        .with_expected("a key without whitespace, followed by '='"));
                }
                Some(chr @ (OPEN_FUNCTION | CLOSE_FUNCTION | OPEN_ARG | CLOSE_ARG)) => {
                    return Err(self
                        .error_here(format!("character '{chr}' is not allowed in an argument key"))
                        .with_expected("a key without braces or brackets, followed by '='"));
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    /* -------------------- *
     *     RAW STRINGS      *
     * -------------------- */
    /// Lexes one raw string. The cursor sits on the first `<` after the
    /// opening `{`.
    ///
    /// The body runs from the required whitespace after the `<` run to
    /// the earliest whitespace scalar followed by exactly `>^k}`. Both
    /// boundary scalars stay inside the body, which is what keeps the
    /// verbatim region verbatim under text projection. Any `>` run not
    /// completing the exact terminator is literal content.
    fn lex_raw(&mut self, open: Mark) -> Result<(), Diagnostic> {
        let mut depth = 0usize;

        while self.peek() == Some(OPEN_RAW) {
            self.bump();
            depth += 1;

            if depth > RAW_DELIMITER_MAX {
                return Err(self
                    .error_at(open, "raw string delimiter is too long")
                    .with_expected(format!("at most {RAW_DELIMITER_MAX} '<' characters")));
            }
        }

        match self.peek() {
            None => {
                return Err(self
                    .error_here("raw string is never closed")
                    .with_expected("whitespace, content and a matching '>' run before the end of input"));
            }
            Some(chr) if chr.is_whitespace() => {}
            Some(chr) => {
                return Err(self
                    .error_here(format!("unexpected character '{chr}' while reading a raw string start"))
                    .with_expected("a whitespace character after the '<' run")
                    .with_fix("call names must not start with '<'"));
            }
        }

        let body_start = self.cursor;
        let terminator = format!("{}{}", ">".repeat(depth), CLOSE_FUNCTION);
        let mut body_end = None;

        for (index, chr) in self.source[body_start..].char_indices() {
            if chr.is_whitespace() {
                let after = body_start + index + chr.len_utf8();

                if self.source[after..].starts_with(&terminator) {
                    body_end = Some(after);
                    break;
                }
            }
        }

        let Some(body_end) = body_end else {
            return Err(self
                .error_at(open, "raw string is never closed")
                .with_expected(format!("a whitespace character followed by {depth} '>' and a '}}'")));
        };

        let body = self.source[body_start..body_end].to_owned();
        let resume = body_end + terminator.len();

        while self.cursor < resume {
            self.bump();
        }

        self.push_span(TokenKind::RawString(body, depth as u8), open);
        Ok(())
    }

    /* -------------------- *
     *        UTILS         *
     * -------------------- */
    #[inline]
    fn peek(&self) -> Option<char> {
        self.source[self.cursor..].chars().next()
    }

    fn bump(&mut self) -> char {
        let chr = self.peek().expect("bump past end of input");
        self.cursor += chr.len_utf8();

        if chr == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }

        chr
    }

    #[inline]
    fn mark(&self) -> Mark {
        Mark { byte: self.cursor, line: self.line, col: self.col }
    }

    fn push_span(&mut self, kind: TokenKind, mark: Mark) {
        let position = Position::new(mark.byte, self.cursor, mark.line, mark.col);
        self.tokens.push(Token::new(kind, position));
    }

    fn flush_text(&mut self, mark: Option<Mark>) {
        if let Some(mark) = mark {
            let text = self.source[mark.byte..self.cursor].to_owned();
            self.push_span(TokenKind::Text(text), mark);
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(ErrorCode::LexError, message)
            .with_position(Position::new(self.cursor, self.cursor, self.line, self.col))
    }

    fn error_at(&self, mark: Mark, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(ErrorCode::LexError, message)
            .with_position(Position::new(mark.byte, self.cursor, mark.line, mark.col))
    }
}
