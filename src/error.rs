//! Error types for the convergence engine
//!
//! Errors are structured with fields so a failed run points at the exact
//! resource, field path, or step that broke. Low-level causes are never
//! flattened into a generic message: a `StepFailure` keeps its source chain.

use std::time::Duration;

use thiserror::Error;

/// Main error type for convergence operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed type coordinates on an object reference
    #[error("invalid reference {reference}: {message}")]
    InvalidReference {
        /// The offending reference, rendered for humans
        reference: String,
        /// What is wrong with it
        message: String,
    },

    /// The referenced object does not exist in the store
    #[error("{reference} not found")]
    NotFound {
        /// The reference that was looked up
        reference: String,
    },

    /// The store could not serve the read (connectivity, permission, ...)
    #[error("store error reading {reference}: {message}")]
    Store {
        /// The reference that was being read
        reference: String,
        /// Description of the failure
        message: String,
    },

    /// A field path segment is absent
    #[error("field not found at path {path} in {resource}")]
    FieldNotFound {
        /// The object being navigated
        resource: String,
        /// Dotted field path
        path: String,
    },

    /// A field exists but has the wrong shape
    #[error("type mismatch at path {path} in {resource}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The object being navigated
        resource: String,
        /// Dotted field path
        path: String,
        /// Shape that was expected
        expected: String,
        /// Shape that was found
        found: String,
    },

    /// A polled condition was never satisfied within its budget
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What was being waited on, including the resource
        what: String,
        /// Budget that elapsed
        timeout: Duration,
    },

    /// The run was cancelled while work was in progress
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// What was in progress
        what: String,
    },

    /// A composed step failed
    #[error("step {step} failed: {source}")]
    StepFailure {
        /// Name of the failing step
        step: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Certificate generation error
    #[error("certificate error: {message}")]
    Certificate {
        /// Description of what failed
        message: String,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong
        message: String,
    },

    /// Kubernetes client error outside of a point read
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },
}

impl Error {
    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl ToString, msg: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            message: msg.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(reference: impl ToString) -> Self {
        Self::NotFound {
            reference: reference.to_string(),
        }
    }

    /// Create a store error
    pub fn store(reference: impl ToString, msg: impl Into<String>) -> Self {
        Self::Store {
            reference: reference.to_string(),
            message: msg.into(),
        }
    }

    /// Create a field not found error
    pub fn field_not_found(resource: impl Into<String>, path: impl ToString) -> Self {
        Self::FieldNotFound {
            resource: resource.into(),
            path: path.to_string(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        resource: impl Into<String>,
        path: impl ToString,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            resource: resource.into(),
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(what: impl Into<String>) -> Self {
        Self::Cancelled { what: what.into() }
    }

    /// Wrap an error as the failure of a named step
    pub fn step_failure(step: impl Into<String>, source: Error) -> Self {
        Self::StepFailure {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Create a certificate error
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether repeating the same operation could succeed.
    ///
    /// Only store-side failures qualify. Structural mismatches, bad
    /// references and exhausted budgets stay broken no matter how often
    /// they are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NotFound { .. } | Error::Store { .. } | Error::Kube { .. } => true,
            Error::StepFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Name of the innermost failing step, if this error came out of a step.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Error::StepFailure { step, source } => source.failed_step().or(Some(step.as_str())),
            _ => None,
        }
    }

    /// The underlying cause with all step wrappers removed.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::StepFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
