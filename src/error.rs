#![allow(non_shorthand_field_patterns)]
#![doc = "Error handling primitives shared across the ingestion crate."]
// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! The derive emitted by [`masterror::Error`] expands pattern matches that
//! trigger the `non_shorthand_field_patterns` lint. The lint is disabled for
//! the module to keep the generated implementations warning-free.
//!
//! Fetch failures are split by how the orchestrator reacts to them:
//! [`Error::TransientFetch`] suspends the invocation and keeps the checkpoint,
//! [`Error::FatalAuth`] and a missing repository ([`Error::NotFound`] outside
//! the per-file lookups) fail it, and [`Error::MalformedResponse`] skips the
//! offending item when it is raised for a single record.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Unified error type returned by the ingestion pipeline and CLI.
#[derive(Debug, masterror::Error)]
pub enum Error {
    /// Wraps I/O errors that occur while reading or writing local files.
    #[error("failed to access {path:?}: {source}")]
    Io {
        /// Location of the file being accessed.
        path:   PathBuf,
        /// Underlying I/O error.
        source: std::io::Error
    },
    /// Wraps YAML decoding errors.
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// Source decoding error from serde_yaml.
        source: serde_yaml::Error
    },
    /// Returned when configuration or user input violates invariants.
    #[error("invalid configuration: {message}")]
    Validation {
        /// Human readable message describing the validation problem.
        message: String
    },
    /// Wraps JSON serialization errors for records and checkpoint files.
    #[error("failed to serialize JSON: {source}")]
    Serialize {
        /// Underlying serialization error.
        source: serde_json::Error
    },
    /// Network failure, server error, or exhausted rate-limit retries.
    #[error("transient fetch failure: {message}")]
    TransientFetch {
        /// Description of the last failed attempt.
        message: String
    },
    /// The API rejected the credential. Never retried.
    #[error("authentication failed: {message}")]
    FatalAuth {
        /// Description of the rejected request.
        message: String
    },
    /// The API answered with a payload of an unexpected shape.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// Description of the mismatch.
        message: String
    },
    /// The API reported an exhausted quota. Consumed by the retry loop.
    #[error("rate limited until {reset_at}")]
    RateLimited {
        /// Moment at which the quota window resets.
        reset_at: DateTime<Utc>
    },
    /// The requested resource does not exist.
    #[error("resource not found: {url}")]
    NotFound {
        /// Requested URL or path.
        url: String
    },
    /// The checkpoint store could not be read or updated.
    #[error("checkpoint store failure: {message}")]
    Checkpoint {
        /// Human readable message describing the failure.
        message: String
    }
}

impl Error {
    /// Constructs a validation error from the provided displayable value.
    pub fn validation<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Validation {
            message: message.into()
        }
    }

    /// Constructs a transient fetch error.
    pub fn transient<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::TransientFetch {
            message: message.into()
        }
    }

    /// Constructs an authentication error.
    pub fn fatal_auth<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::FatalAuth {
            message: message.into()
        }
    }

    /// Constructs a malformed response error.
    pub fn malformed<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::MalformedResponse {
            message: message.into()
        }
    }

    /// Constructs a checkpoint store error.
    pub fn checkpoint<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Checkpoint {
            message: message.into()
        }
    }

    /// Reports whether a retry policy may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch { .. } | Self::RateLimited { .. })
    }

    /// Reports whether the error must fail the invocation without advancing
    /// the checkpoint any further.
    ///
    /// Callers that treat a missing resource as empty intercept
    /// [`Error::NotFound`] before asking.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalAuth { .. } | Self::NotFound { .. })
    }

    /// Formats the error for diagnostics without the variant name.
    ///
    /// The returned string matches the [`std::fmt::Display`] implementation.
    pub fn to_display_string(&self) -> String {
        format!("{self}")
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(source: serde_yaml::Error) -> Self {
        Self::Parse {
            source
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialize {
            source
        }
    }
}

/// Creates an [`Error::Io`] variant capturing the failing path and source.
///
/// # Parameters
///
/// * `path` - Location of the file that triggered the error.
/// * `source` - I/O error reported by the operating system.
pub fn io_error(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source
    }
}
