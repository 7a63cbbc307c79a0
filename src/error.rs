//! # Error Taxonomy for the Bang! Interpreter
//!
//! Bang! distinguishes parser *control-flow* (not errors at all) from
//! genuine failures reported to the host:
//!
//! - [`ParseSignal`] is internal to the parser. `NoMatch` means "this
//!   production doesn't apply here, try the next one"; `EndOfFile` means
//!   the character stream is exhausted. Neither is ever surfaced outside
//!   the parser module.
//! - [`BangError`] is the only error type that crosses the parser/runtime
//!   boundary. `ParseFail` covers syntactic errors (including an unbound
//!   identifier reference, caught at parse time); `RuntimeError` covers
//!   everything that can go wrong while a program is running (type
//!   mismatches, missing upvalues, non-callable applies, divide by zero,
//!   unimplemented library methods); `Io` wraps filesystem failure from
//!   `require`.
//!
//! `AstExecFail` from the C++ original is not a distinct variant here: it
//! is a `RuntimeError` whose `where_` field has been stamped with the
//! failing AST node's location by the single call site in the run loop
//! that catches a primitive/operator failure.

/// Parser-internal control-flow conditions. Never returned from a public API.
#[derive(Debug)]
pub enum ParseSignal {
    /// This production did not match at the current stream position.
    NoMatch,
    /// The character stream is exhausted.
    EndOfFile,
}

impl std::fmt::Display for ParseSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseSignal::NoMatch => write!(f, "no match"),
            ParseSignal::EndOfFile => write!(f, "end of file"),
        }
    }
}

/// Errors that can escape the parser or interpreter to host code.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BangError {
    #[error("Parse error at {where_}: {message}")]
    ParseFail { where_: String, message: String },

    #[error("Error at {where_}: {message}")]
    RuntimeError { where_: String, message: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl BangError {
    pub fn parse_fail(where_: impl Into<String>, message: impl Into<String>) -> Self {
        BangError::ParseFail { where_: where_.into(), message: message.into() }
    }

    pub fn runtime(where_: impl Into<String>, message: impl Into<String>) -> Self {
        BangError::RuntimeError { where_: where_.into(), message: message.into() }
    }

    /// Stamp an AST location onto an error raised without one (a primitive
    /// only knows about the stack, not the calling AST node). Mirrors
    /// `AstExecFail` wrapping in the C++ original's `RunProgram`.
    pub fn with_where(self, where_: &str) -> Self {
        match self {
            BangError::RuntimeError { message, where_: prev } => {
                let loc = if prev.is_empty() { where_.to_string() } else { prev };
                BangError::RuntimeError { where_: loc, message }
            }
            other => other,
        }
    }
}

impl From<std::io::Error> for BangError {
    fn from(e: std::io::Error) -> Self {
        BangError::Io(e.to_string())
    }
}
