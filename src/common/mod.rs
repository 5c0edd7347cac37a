// # Common Types
//
// Shared identifiers and size constants used across the lock manager and the
// recovery manager. Kept deliberately small: this crate has exactly two
// subsystems, and both close over the same handful of primitive types.

use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a transaction.
pub type TransactionId = u64;

/// Physical page number, unique within a partition's address space.
pub type PageNum = u64;

/// Disk partition number. Partition 0 is reserved for the log (see
/// [`crate::collab::DiskSpaceManager`]).
pub type PartitionNum = u64;

/// Log Sequence Number: a monotonically increasing identifier of a log
/// record. LSN 0 is reserved for the master record and never assigned to a
/// regular log record.
pub type Lsn = u64;

/// LSN reserved for "no predecessor" (the head of a transaction's chain, or
/// the absence of a checkpoint).
pub const LSN_NONE: Lsn = 0;

// ============================================================================
// Size limits
// ============================================================================

/// Page size used to bound before/after images carried by page-update log
/// records (see [`crate::recovery::log_record::LogRecord::UpdatePage`]).
/// Mirrors the collaborating buffer manager's `EFFECTIVE_PAGE_SIZE` (§6).
pub const EFFECTIVE_PAGE_SIZE: usize = 4096;

/// Maximum size, in bytes, of a before- or after-image carried by a single
/// `UpdatePage`/`UndoUpdatePage` record.
pub const MAX_PAGE_IMAGE_SIZE: usize = EFFECTIVE_PAGE_SIZE / 2;

// ============================================================================
// Transaction status
// ============================================================================

/// Lifecycle status of a transaction, as tracked by the recovery manager's
/// Transaction Table.
///
/// Valid transitions: `Running -> {Committing, Aborting}`, `Aborting ->
/// Complete`, `Committing -> Complete`. During restart analysis, transitions
/// are additionally constrained to `Running -> {Committing, RecoveryAborting}`
/// and never go backward (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransactionStatus {
    /// Actively executing forward operations.
    Running,
    /// Commit record has been appended; awaiting `end`.
    Committing,
    /// Abort record has been appended by the transaction itself; awaiting `end`.
    Aborting,
    /// Discovered mid-flight at crash time; being rolled back by restart.
    RecoveryAborting,
    /// Terminal: all locks released, end record appended.
    Complete,
}

impl TransactionStatus {
    /// True once the transaction is done aborting, either explicitly or
    /// because restart is unwinding it.
    pub fn is_aborting(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Aborting | TransactionStatus::RecoveryAborting
        )
    }

    /// True if this is a terminal status; no further log records for this
    /// transaction (other than its own) should occur.
    pub fn is_complete(&self) -> bool {
        matches!(self, TransactionStatus::Complete)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Running => "RUNNING",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Aborting => "ABORTING",
            TransactionStatus::RecoveryAborting => "RECOVERY_ABORTING",
            TransactionStatus::Complete => "COMPLETE",
        };
        write!(f, "{s}")
    }
}
