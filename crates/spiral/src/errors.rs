use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Stable error codes surfaced by the evaluation engine.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `DivideByZero` -> "DivideByZero"), which is the form carried in
/// serialized error values and asserted by cross-implementation tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorCode {
    /// An operand or argument had the wrong runtime type.
    TypeError,
    /// Integer or float division (or modulo) by zero.
    DivideByZero,
    /// A `var` expression named an identifier absent from the lexical environment.
    UnboundIdentifier,
    /// An `ns:name` pair was not found in the operator registry.
    UnknownOperator,
    /// A closure application passed too few or too many arguments.
    ArityError,
    /// A value was outside an operator's domain (index out of bounds, bad state).
    DomainError,
    /// An `await` timer expired before the future resolved.
    TimeoutError,
    /// A `select` timer expired before any future resolved.
    SelectTimeout,
    /// The document failed a structural invariant (missing node, bad CFG entry).
    ValidationError,
    /// A step or iteration budget was exhausted.
    NonTermination,
}

/// A first-class runtime error: a code plus an optional message.
///
/// Errors flow through evaluation as values. Operators return them instead of
/// panicking, `try` binds them to the catch parameter, and entry points convert
/// an uncaught error into the document's result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl ErrorValue {
    /// Creates an error value with a message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Creates an error value without a message.
    #[must_use]
    pub fn bare(code: ErrorCode) -> Self {
        Self { code, message: None }
    }

    /// Shorthand for `TypeError` values, the most common operator failure.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeError, message)
    }

    /// Shorthand for `DomainError` values.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DomainError, message)
    }

    /// Shorthand for `ValidationError` values.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

impl Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ErrorValue {}

/// Internal error propagation channel for the evaluators.
///
/// `Raise` is the ordinary path: operand errors short-circuit via `?` and are
/// caught by `try`. `Fatal` bypasses `try`: it carries structural failures
/// (document invariant violations, scheduler exhaustion after cancellation)
/// that still become error values at the entry-point boundary but must not be
/// swallowed by user catch handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunError {
    /// Catchable error; `try` binds it to the catch parameter.
    Raise(Box<ErrorValue>),
    /// Uncatchable structural failure; surfaces at the evaluation boundary.
    Fatal(Box<ErrorValue>),
}

impl RunError {
    /// Creates a catchable error with a message.
    pub fn raise(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Raise(Box::new(ErrorValue::new(code, message)))
    }

    /// Creates an uncatchable structural failure.
    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Fatal(Box::new(ErrorValue::new(code, message)))
    }

    /// Shorthand for catchable `TypeError`s.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raise(ErrorCode::TypeError, message)
    }

    /// Shorthand for catchable `DomainError`s.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::raise(ErrorCode::DomainError, message)
    }

    /// Shorthand for uncatchable `ValidationError`s.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::fatal(ErrorCode::ValidationError, message)
    }

    /// Returns true if `try` may catch this error.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Raise(_))
    }

    /// Extracts the error value regardless of catchability.
    #[must_use]
    pub fn into_error_value(self) -> ErrorValue {
        match self {
            Self::Raise(inner) | Self::Fatal(inner) => *inner,
        }
    }

    /// Borrows the error value regardless of catchability.
    #[must_use]
    pub fn error_value(&self) -> &ErrorValue {
        match self {
            Self::Raise(inner) | Self::Fatal(inner) => inner,
        }
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_value())
    }
}

impl std::error::Error for RunError {}

impl From<ErrorValue> for RunError {
    fn from(err: ErrorValue) -> Self {
        Self::Raise(Box::new(err))
    }
}
