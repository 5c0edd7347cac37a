//! Errors raised by the lock manager and lock context tree.
//!
//! Grounded on the teacher's `transaction::error::TransactionError`: a
//! `thiserror` enum with constructor helpers and predicate methods, but
//! trimmed to the handful of failure modes this crate's spec actually names
//! in §7 (`DuplicateLockRequestException`, `NoLockHeldException`,
//! `InvalidLockException`, `UnsupportedOperationException`) — no timeout or
//! deadlock variants, since both are explicit non-goals.

use thiserror::Error;

use crate::common::TransactionId;
use crate::lock::ResourceName;

pub type LockResult<T> = std::result::Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// A transaction requested a lock it already holds on this resource, via
    /// `acquire` rather than `promote`/`escalate` (§7).
    #[error("transaction {txn} already holds a lock on {resource}")]
    DuplicateLockRequest {
        txn: TransactionId,
        resource: ResourceName,
    },

    /// `release`/`promote` was called for a resource the transaction holds
    /// no lock on (§7).
    #[error("transaction {txn} holds no lock on {resource}")]
    NoLockHeld {
        txn: TransactionId,
        resource: ResourceName,
    },

    /// The requested operation would violate multigranularity well-formedness
    /// — e.g. promoting to a mode that is not a true upgrade, or releasing a
    /// resource that still has locked descendants (§7).
    #[error("invalid lock operation on {resource}: {reason}")]
    InvalidLock {
        resource: ResourceName,
        reason: String,
    },

    /// The requested operation is not supported in the calling context — e.g.
    /// acquiring through a context whose ancestor has disabled child locks
    /// after an escalation (§4.2, §7).
    #[error("unsupported lock operation on {resource}: {reason}")]
    UnsupportedOperation {
        resource: ResourceName,
        reason: String,
    },
}

impl LockError {
    pub fn duplicate(txn: TransactionId, resource: ResourceName) -> Self {
        LockError::DuplicateLockRequest { txn, resource }
    }

    pub fn no_lock_held(txn: TransactionId, resource: ResourceName) -> Self {
        LockError::NoLockHeld { txn, resource }
    }

    pub fn invalid(resource: ResourceName, reason: impl Into<String>) -> Self {
        LockError::InvalidLock {
            resource,
            reason: reason.into(),
        }
    }

    pub fn unsupported(resource: ResourceName, reason: impl Into<String>) -> Self {
        LockError::UnsupportedOperation {
            resource,
            reason: reason.into(),
        }
    }

    /// The resource the failed operation targeted, for callers that want to
    /// log or retry by resource without matching on the variant.
    pub fn resource(&self) -> &ResourceName {
        match self {
            LockError::DuplicateLockRequest { resource, .. } => resource,
            LockError::NoLockHeld { resource, .. } => resource,
            LockError::InvalidLock { resource, .. } => resource,
            LockError::UnsupportedOperation { resource, .. } => resource,
        }
    }
}
