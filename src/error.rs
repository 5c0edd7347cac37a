//! Crate-level error type.
//!
//! Unifies the two subsystem error hierarchies — [`crate::lock::LockError`]
//! and [`crate::recovery::RecoveryError`] — the way the teacher's top-level
//! `error.rs` unifies its per-module error enums, via `thiserror`'s `#[from]`.

use thiserror::Error;

use crate::lock::LockError;
use crate::recovery::RecoveryError;

/// Result type alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}
