//! Shared contracts for the relay task-distribution service.
//!
//! This crate defines the vocabulary every other crate in the workspace
//! builds on: the domain model (`model`), the HTTP wire shapes
//! (`wire`), and the task executor seam (`executor`). None of it is
//! tied to a particular transport or store implementation.

use std::fmt;

pub mod executor;
pub mod model;
pub mod wire;

pub type Result<T> = std::result::Result<T, Error>;

/// Library-facing error type.
///
/// Binaries in this workspace use `anyhow::Result` end to end; this type
/// exists for the handful of library seams (the store trait, the executor
/// trait) where a caller shouldn't have to take on an `anyhow` dependency
/// just to match our error type.
#[derive(Debug)]
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: anyhow::anyhow!(message.into()),
        }
    }

    pub fn into_anyhow(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self { inner: value }
    }
}
