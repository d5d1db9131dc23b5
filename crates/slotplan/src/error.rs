use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured compiler fault with a stable internal classification.
/// Invariant-violation errors are programming-error-class: they indicate a
/// broken builder contract and are meant to be caught in testing, never
/// recovered from in production.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl InternalError {
    #[must_use]
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    /// Construct a build-origin invariant violation.
    pub(crate) fn build_invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Build, message)
    }

    /// Construct an environment-origin invariant violation.
    pub(crate) fn env_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Environment,
            message,
        )
    }
}

///
/// ErrorClass
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    InvariantViolation,
    Unsupported,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvariantViolation => "invariant_violation",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Build,
    Expression,
    Environment,
    Slot,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Build => "build",
            Self::Expression => "expression",
            Self::Environment => "environment",
            Self::Slot => "slot",
        };
        write!(f, "{s}")
    }
}

///
/// UnsupportedFeature
///
/// Logical-tree inputs the compiler recognizes but does not implement.
/// Reported to the caller as a structured compilation failure; no partial
/// plan is returned.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnsupportedFeature {
    SortKeyGenerator,
    SortByMetadata,
}

impl fmt::Display for UnsupportedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SortKeyGenerator => write!(f, "sort key generator stage"),
            Self::SortByMetadata => write!(f, "sorting by computed metadata"),
        }
    }
}

///
/// BuildError
///
/// Public failure type for plan compilation.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum BuildError {
    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error("unsupported query feature: {feature}")]
    Unsupported { feature: UnsupportedFeature },
}

impl BuildError {
    #[must_use]
    pub const fn unsupported(feature: UnsupportedFeature) -> Self {
        Self::Unsupported { feature }
    }
}

///
/// EvalError
///
/// Failure of the reference expression interpreter. `Fail` is the
/// data-dependent runtime error embedded in compiled expressions; the
/// compiler only emits it, it never detects it at compile time.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum EvalError {
    #[error("{message}")]
    Fail { message: String },

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl EvalError {
    pub(crate) fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(context: &str) -> Self {
        Self::Internal(InternalError::new(
            ErrorClass::Internal,
            ErrorOrigin::Expression,
            format!("type mismatch: {context}"),
        ))
    }
}
