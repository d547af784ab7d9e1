//! Error types shared by the model and sampler modules.

use thiserror::Error;

/// Errors raised while building models, sampling, or collapsing variables.
///
/// Variants follow the failure classes the samplers care about: `Model` and
/// `Parse` are fatal at construction, `Contract` means a caller broke an API
/// precondition, `Intractable` is the recoverable "can't collapse this"
/// signal the adaptive strategy is allowed to swallow, and `Numerical` marks
/// a degenerate weight vector that survived stabilization.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid model definition (bad cardinality, duplicate IDs, table size).
    #[error("model error: {0}")]
    Model(String),

    /// A call-site precondition was violated (wrong buffer length, bad value tuple).
    #[error("contract violation: {0}")]
    Contract(String),

    /// A collapse target is unavailable or its blanket is too large.
    #[error("intractable: {0}")]
    Intractable(String),

    /// Sampling weights degenerated to a non-finite or empty total.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Malformed UAI model, evidence, or solution input.
    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An operation failed further down; keeps the operation → cause chain.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps the error with the name of the operation that observed it.
    pub fn context(self, context: impl Into<String>) -> Error {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Extension for attaching context to a `Result`, like wrapping errors
/// up a call chain.
pub trait WrapErr<T> {
    fn wrap_err(self, context: impl Into<String>) -> Result<T>;
}

impl<T> WrapErr<T> for Result<T> {
    fn wrap_err(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}
