//! Errors raised by the log manager and the ARIES recovery manager.
//!
//! Grounded on the teacher's `transaction::error::TransactionError`'s I/O and
//! recovery variant groups, and on §7's "recovery errors are fatal" design:
//! every variant here is meant to abort startup, not to be retried.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::{Lsn, PageNum, TransactionId};

pub type RecoveryResult<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The log's backing storage could not be read from or written to.
    #[error("log I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A log record could not be encoded or decoded.
    #[error("failed to serialize log record: {0}")]
    Serialization(#[from] bincode::error::EncodeError),

    /// A log record could not be decoded.
    #[error("failed to deserialize log record: {0}")]
    Deserialization(#[from] bincode::error::DecodeError),

    /// `fetchLogRecord`/chain-walk addressed an LSN the log has no record
    /// for.
    #[error("no log record at LSN {lsn}")]
    NoSuchLogRecord { lsn: Lsn },

    /// Startup found no master record (or one pointing past the end of the
    /// log); the log is unusable.
    #[error("missing or corrupt master record")]
    MissingMasterRecord,

    /// `end(t)`/forward-processing hooks require an existing Transaction
    /// Table entry; restart invariants require the Dirty Page Table to be
    /// internally consistent. Both kinds of violation land here.
    #[error("recovery invariant violated for transaction {txn:?}: {reason}")]
    InvariantViolated {
        txn: Option<TransactionId>,
        reason: String,
    },

    /// A page referenced by a redoable record could not be fetched from the
    /// collaborating buffer manager.
    #[error("buffer manager could not fetch page {page}")]
    PageUnavailable { page: PageNum },

    /// The on-disk log image's CRC32C did not match its recorded checksum.
    /// Startup must not proceed against a log that might have been
    /// partially written or bit-flipped.
    #[error("log image at {path:?} failed its checksum; refusing to start")]
    CorruptLogImage { path: PathBuf },
}

impl RecoveryError {
    pub fn invariant(txn: Option<TransactionId>, reason: impl Into<String>) -> Self {
        RecoveryError::InvariantViolated {
            txn,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_message_names_reason() {
        let err = RecoveryError::invariant(Some(7), "dangling undoNextLSN");
        assert!(err.to_string().contains("dangling undoNextLSN"));
        assert!(err.to_string().contains('7'));
    }
}
