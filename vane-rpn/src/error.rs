//! Engine error implementation.

use thiserror::Error;

use crate::tokenizer::Position;

/// Stack access error variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// A pop or peek reached below the bottom of the stack.
    #[error("stack underflow")]
    Underflow,
    /// The stack grew past the configured limit.
    #[error("stack limit exceeded")]
    Overflow,
    /// A typed access found a value of another type.
    #[error("expected {expected}, found {found}")]
    Cast {
        /// The type the operation required.
        expected: &'static str,
        /// The type actually on the stack.
        found: &'static str,
    },
    /// An unmark was requested with no mark in place.
    #[error("stack is not marked")]
    NotMarked,
}

/// Errors raised while compiling source text into a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A block was still open at end of input.
    #[error("missing block end at {0}")]
    MissingBlockEnd(Position),
    /// A construct needed more instructions than the source provided.
    #[error("missing instructions at {0}")]
    MissingInstructions(Position),
    /// A parenthesis had no match.
    #[error("unbalanced parenthesis at {0}")]
    UnbalancedParenthesis(Position),
    /// End of input arrived while macro arguments were being collected.
    #[error("missing macro arguments at {0}")]
    MissingArgs(Position),
    /// A macro expanded into itself past the loop limit.
    #[error("recursion of macro '{name}' exceeded {limit}")]
    MacroRecursion {
        /// The macro name.
        name: String,
        /// The configured loop limit.
        limit: usize,
    },
    /// A macro definition could not be parsed.
    #[error("bad macro definition '{0}'")]
    BadMacroDef(String),
    /// A word matched no operation, macro or operand form.
    #[error("unknown operation '{name}' at {position}")]
    UnknownOperation {
        /// The unresolved word.
        name: String,
        /// Where it appeared.
        position: Position,
    },
    /// A string literal was not terminated.
    #[error("unterminated string at {0}")]
    UnterminatedString(Position),
}

/// Errors raised while executing a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecuteError {
    /// A failure requested by the program itself.
    ///
    /// Without a message the failure is silent and an enclosing `try`
    /// catches it; with a message it always propagates.
    #[error("{}", message.as_deref().unwrap_or("failed"))]
    Failure {
        /// Optional failure message.
        message: Option<String>,
    },
    /// No overload of an operation accepted the current stack.
    #[error("no overload of '{name}' accepts the stack at {position}")]
    OperationArgs {
        /// Operation name.
        name: String,
        /// Source position of the operation site.
        position: Position,
    },
    /// A value could not be converted to the requested type.
    #[error("cannot convert {from} to {to}")]
    ConvertFailed {
        /// Target type name.
        to: &'static str,
        /// Display form of the offending value.
        from: String,
    },
    /// A format string could not be applied.
    #[error("format failed: {0}")]
    FormatFailed(String),
    /// Substring bounds fell outside the string.
    #[error("substring [{start}, {end}) out of bounds for length {len}")]
    SubstringOutOfBounds {
        /// Requested start.
        start: i64,
        /// Requested end.
        end: i64,
        /// Actual string length.
        len: usize,
    },
    /// A tuple index fell outside the tuple.
    #[error("tuple index {index} out of bounds for size {size}")]
    TupleIndexOutOfBounds {
        /// Requested index.
        index: i64,
        /// Actual tuple size.
        size: usize,
    },
    /// A date-time could not be interpreted.
    #[error("date-time error: {0}")]
    DateTimeFormat(String),
    /// Stack access failed.
    #[error(transparent)]
    Stack(#[from] StackError),
    /// A loop ran past the configured limit.
    #[error("{name} iterations exceeded {limit}")]
    LoopLimit {
        /// Capitalized loop operation name.
        name: &'static str,
        /// The configured limit.
        limit: usize,
    },
    /// Runtime compilation (the `call` operation) failed.
    #[error("call failed: {0}")]
    Call(#[from] CompileError),
}

impl ExecuteError {
    /// The silent failure raised by the `fail` operation.
    pub const fn failure() -> Self {
        Self::Failure { message: None }
    }

    /// A failure that carries a message and always propagates.
    pub fn message(text: impl Into<String>) -> Self {
        Self::Failure {
            message: Some(text.into()),
        }
    }

    /// Return `true` if an enclosing `try` catches this error.
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::Failure { message: None })
    }
}
