//! Structured diagnostics shared by the lexer, parser and hook runtime.

use std::error;
use std::fmt::{self, Debug, Display};

use super::position::Position;

/* -------------------- *
 *      ERROR CODE      *
 * -------------------- */
macro_rules! error_code {
    ($($code:ident : $desc:literal),* $(,)?) => {
        /// Represents the error codes used by litua.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $(#[doc=$desc] $code,)*
        }

        impl ErrorCode {
            /// Returns the error code as a string.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorCode::$code => stringify!($code),)*
                }
            }

            /// Returns the description of the error code.
            #[must_use]
            pub fn description(&self) -> &'static str {
                match self {
                    $(ErrorCode::$code => $desc,)*
                }
            }
        }

        impl Debug for ErrorCode {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{} [{}]", self.as_str(), self.description())
            }
        }

        impl Display for ErrorCode {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    }
}

error_code! {
    // reading the document
    LexError: "Malformed document syntax",
    ParseError: "Ill-structured token stream",
    // registering hooks
    UnknownPhase: "Unknown transformation phase",
    InvalidFilter: "Filter does not match the call name grammar",
    InvalidHook: "Hook implementation is not callable",
    DuplicateConverter: "A filter can only carry one string converter",
    // running hooks
    HookReturnShape: "Hook return value violates the phase contract",
    HookFailed: "Hook raised an error",
    NodeAccess: "Field is outside the published node attributes",
    FormatOverflow: "Too many positional arguments",
    RawStringBoundary: "Reserved substitution byte in serialized text",
    ScriptError: "Hook script or environment failure",
}

/* -------------------- *
 *      DIAGNOSTIC      *
 * -------------------- */
/// A structured error raised by any part of the transformation.
///
/// Rendered as a multi-line block prefixed with `ERROR`. The optional
/// fields narrow the failure down: what was going on (`context`), what
/// the core wanted (`expected`) versus what it got (`actual`), how to
/// repair the document or hook (`fix`), and which registration site is
/// responsible (`source`).
#[derive(Clone)]
pub struct Diagnostic {
    inner: Box<DiagnosticInner>,
}

#[derive(Debug, Clone)]
struct DiagnosticInner {
    code: ErrorCode,
    message: String,
    position: Option<Position>,
    context: Option<String>,
    expected: Option<String>,
    actual: Option<String>,
    fix: Option<String>,
    source: Option<String>,
}

impl Diagnostic {
    /// Creates a new instance of [`Diagnostic`].
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            inner: Box::new(DiagnosticInner {
                code,
                message: message.into(),
                position: None,
                context: None,
                expected: None,
                actual: None,
                fix: None,
                source: None,
            }),
        }
    }

    /// Attaches the source position the failure was detected at.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.inner.position = Some(position);
        self
    }

    /// Attaches a description of what was going on.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.inner.context = Some(context.into());
        self
    }

    /// Attaches a description of the admissible values.
    #[must_use]
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.inner.expected = Some(expected.into());
        self
    }

    /// Attaches a description of the value actually found.
    #[must_use]
    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.inner.actual = Some(actual.into());
        self
    }

    /// Attaches a hint on how to repair the document or hook.
    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.inner.fix = Some(fix.into());
        self
    }

    /// Attaches the registration site responsible for the failure.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.inner.source = Some(source.into());
        self
    }

    /// Gets the error code associated with this diagnostic.
    #[inline]
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.inner.code
    }

    /// Gets the primary message of this diagnostic.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Gets the optional source position of this diagnostic.
    #[inline]
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.inner.position
    }

    /// Gets the optional registration site of this diagnostic.
    #[inline]
    #[must_use]
    pub fn source_site(&self) -> Option<&str> {
        self.inner.source.as_deref()
    }
}

impl Debug for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ERROR: {}", self.inner.message)?;
        write!(f, "\n  code:     {}", self.inner.code)?;

        if let Some(position) = &self.inner.position {
            write!(f, "\n  position: {position}")?;
        }
        if let Some(context) = &self.inner.context {
            write!(f, "\n  context:  {context}")?;
        }
        if let Some(expected) = &self.inner.expected {
            write!(f, "\n  expected: {expected}")?;
        }
        if let Some(actual) = &self.inner.actual {
            write!(f, "\n  actual:   {actual}")?;
        }
        if let Some(fix) = &self.inner.fix {
            write!(f, "\n  fix:      {fix}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\n  source:   {source}")?;
        }

        Ok(())
    }
}

impl error::Error for Diagnostic {}
