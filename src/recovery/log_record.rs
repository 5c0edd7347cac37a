//! The closed, tagged log record type (§3, §9 "Tagged log records").
//!
//! The teacher's `transaction::wal::LogRecord` is a single large enum with a
//! `CLR` variant wrapping a boxed inner record; this crate's spec instead
//! pairs every undoable record with its own dedicated `Undo*` compensation
//! variant (§3), so CLRs are representable without boxing or an inner-record
//! indirection. Kept from the teacher: the flat, `#[derive(Serialize,
//! Deserialize)]` enum shape, `LSN`/`PageId` type aliases (here
//! [`crate::common::Lsn`]/[`crate::common::PageNum`]), and bounding
//! before/after images to half the effective page size (§6).

use serde::{Deserialize, Serialize};

use crate::common::{Lsn, PageNum, PartitionNum, TransactionId, LSN_NONE, MAX_PAGE_IMAGE_SIZE};

/// A single entry in the write-ahead log.
///
/// Every variant carries its own `lsn` (assigned by
/// [`crate::recovery::log_manager::LogManager::append_to_log`] — constructed
/// records start with [`LSN_NONE`] and are stamped in place at append time)
/// and, where applicable, `prev_lsn` (the transaction's previous log record,
/// chaining backward to 0) and `undo_next_lsn` (set only on compensation
/// records, pointing past the record that the CLR undid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Fixed at LSN 0; holds the LSN of the most recent checkpoint's
    /// `BeginCheckpoint` record. Rewritten in place, never chained.
    Master { lsn: Lsn, last_checkpoint_lsn: Lsn },

    BeginCheckpoint { lsn: Lsn },

    EndCheckpoint {
        lsn: Lsn,
        dpt: Vec<(PageNum, Lsn)>,
        xt: Vec<(TransactionId, TxnSnapshot)>,
    },

    CommitTxn { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn },
    AbortTxn { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn },
    EndTxn { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn },

    UpdatePage {
        lsn: Lsn,
        trans_num: TransactionId,
        prev_lsn: Lsn,
        page_num: PageNum,
        offset: u16,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    /// Compensation record for an undone `UpdatePage` (a CLR).
    UndoUpdatePage {
        lsn: Lsn,
        trans_num: TransactionId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        page_num: PageNum,
        offset: u16,
        before: Vec<u8>,
        after: Vec<u8>,
    },

    AllocPart { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn, part_num: PartitionNum },
    FreePart { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn, part_num: PartitionNum },
    UndoAllocPart {
        lsn: Lsn,
        trans_num: TransactionId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        part_num: PartitionNum,
    },
    UndoFreePart {
        lsn: Lsn,
        trans_num: TransactionId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        part_num: PartitionNum,
    },

    AllocPage { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn, page_num: PageNum },
    FreePage { lsn: Lsn, trans_num: TransactionId, prev_lsn: Lsn, page_num: PageNum },
    UndoAllocPage {
        lsn: Lsn,
        trans_num: TransactionId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        page_num: PageNum,
    },
    UndoFreePage {
        lsn: Lsn,
        trans_num: TransactionId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        page_num: PageNum,
    },
}

/// The per-transaction payload of an `EndCheckpoint` record (§3
/// `TransactionTableEntry`, minus the transaction handle and savepoints,
/// which are not log-durable).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxnSnapshot {
    pub status: crate::common::TransactionStatus,
    pub last_lsn: Lsn,
}

impl LogRecord {
    pub fn lsn(&self) -> Lsn {
        use LogRecord::*;
        match *self {
            Master { lsn, .. }
            | BeginCheckpoint { lsn, .. }
            | EndCheckpoint { lsn, .. }
            | CommitTxn { lsn, .. }
            | AbortTxn { lsn, .. }
            | EndTxn { lsn, .. }
            | UpdatePage { lsn, .. }
            | UndoUpdatePage { lsn, .. }
            | AllocPart { lsn, .. }
            | FreePart { lsn, .. }
            | UndoAllocPart { lsn, .. }
            | UndoFreePart { lsn, .. }
            | AllocPage { lsn, .. }
            | FreePage { lsn, .. }
            | UndoAllocPage { lsn, .. }
            | UndoFreePage { lsn, .. } => lsn,
        }
    }

    /// Stamp this record's LSN. Only the log manager should call this, at
    /// append time.
    pub(crate) fn set_lsn(&mut self, new_lsn: Lsn) {
        use LogRecord::*;
        let slot = match self {
            Master { lsn, .. }
            | BeginCheckpoint { lsn, .. }
            | EndCheckpoint { lsn, .. }
            | CommitTxn { lsn, .. }
            | AbortTxn { lsn, .. }
            | EndTxn { lsn, .. }
            | UpdatePage { lsn, .. }
            | UndoUpdatePage { lsn, .. }
            | AllocPart { lsn, .. }
            | FreePart { lsn, .. }
            | UndoAllocPart { lsn, .. }
            | UndoFreePart { lsn, .. }
            | AllocPage { lsn, .. }
            | FreePage { lsn, .. }
            | UndoAllocPage { lsn, .. }
            | UndoFreePage { lsn, .. } => lsn,
        };
        *slot = new_lsn;
    }

    pub fn trans_num(&self) -> Option<TransactionId> {
        use LogRecord::*;
        match *self {
            Master { .. } | BeginCheckpoint { .. } | EndCheckpoint { .. } => None,
            CommitTxn { trans_num, .. }
            | AbortTxn { trans_num, .. }
            | EndTxn { trans_num, .. }
            | UpdatePage { trans_num, .. }
            | UndoUpdatePage { trans_num, .. }
            | AllocPart { trans_num, .. }
            | FreePart { trans_num, .. }
            | UndoAllocPart { trans_num, .. }
            | UndoFreePart { trans_num, .. }
            | AllocPage { trans_num, .. }
            | FreePage { trans_num, .. }
            | UndoAllocPage { trans_num, .. }
            | UndoFreePage { trans_num, .. } => Some(trans_num),
        }
    }

    pub fn prev_lsn(&self) -> Option<Lsn> {
        use LogRecord::*;
        match *self {
            Master { .. } | BeginCheckpoint { .. } | EndCheckpoint { .. } => None,
            CommitTxn { prev_lsn, .. }
            | AbortTxn { prev_lsn, .. }
            | EndTxn { prev_lsn, .. }
            | UpdatePage { prev_lsn, .. }
            | UndoUpdatePage { prev_lsn, .. }
            | AllocPart { prev_lsn, .. }
            | FreePart { prev_lsn, .. }
            | UndoAllocPart { prev_lsn, .. }
            | UndoFreePart { prev_lsn, .. }
            | AllocPage { prev_lsn, .. }
            | FreePage { prev_lsn, .. }
            | UndoAllocPage { prev_lsn, .. }
            | UndoFreePage { prev_lsn, .. } => Some(prev_lsn),
        }
    }

    pub fn page_num(&self) -> Option<PageNum> {
        use LogRecord::*;
        match *self {
            UpdatePage { page_num, .. }
            | UndoUpdatePage { page_num, .. }
            | AllocPage { page_num, .. }
            | FreePage { page_num, .. }
            | UndoAllocPage { page_num, .. }
            | UndoFreePage { page_num, .. } => Some(page_num),
            _ => None,
        }
    }

    pub fn part_num(&self) -> Option<PartitionNum> {
        use LogRecord::*;
        match *self {
            AllocPart { part_num, .. }
            | FreePart { part_num, .. }
            | UndoAllocPart { part_num, .. }
            | UndoFreePart { part_num, .. } => Some(part_num),
            _ => None,
        }
    }

    /// Set only on compensation records: the LSN the undo chain should jump
    /// to next, skipping past whatever this CLR just undid.
    pub fn undo_next_lsn(&self) -> Option<Lsn> {
        use LogRecord::*;
        match *self {
            UndoUpdatePage { undo_next_lsn, .. }
            | UndoAllocPart { undo_next_lsn, .. }
            | UndoFreePart { undo_next_lsn, .. }
            | UndoAllocPage { undo_next_lsn, .. }
            | UndoFreePage { undo_next_lsn, .. } => Some(undo_next_lsn),
            _ => None,
        }
    }

    /// True for records whose effect on page/partition state must be
    /// reapplied during the Redo phase (§4.5). Status/checkpoint records are
    /// not redoable; every data and space record is, including CLRs (a crash
    /// during Undo must be able to redo a partially-applied CLR).
    pub fn is_redoable(&self) -> bool {
        use LogRecord::*;
        matches!(
            self,
            UpdatePage { .. }
                | UndoUpdatePage { .. }
                | AllocPart { .. }
                | FreePart { .. }
                | UndoAllocPart { .. }
                | UndoFreePart { .. }
                | AllocPage { .. }
                | FreePage { .. }
                | UndoAllocPage { .. }
                | UndoFreePage { .. }
        )
    }

    /// True only for original forward operations with a logical inverse.
    /// CLRs (`Undo*` variants) are themselves the inverse and are never
    /// undone a second time.
    pub fn is_undoable(&self) -> bool {
        use LogRecord::*;
        matches!(
            self,
            UpdatePage { .. } | AllocPart { .. } | FreePart { .. } | AllocPage { .. } | FreePage { .. }
        )
    }

    /// Construct (but do not apply) the compensation log record for this
    /// entry. `new_prev_lsn` is the transaction's current `lastLSN`, which
    /// becomes the CLR's `prevLSN` — the CLR is appended like any other
    /// record in the transaction's chain. Returns `None` if `self` is not
    /// undoable.
    pub fn undo(&self, new_prev_lsn: Lsn) -> Option<LogRecord> {
        use LogRecord::*;
        let undo_next_lsn = self.prev_lsn().unwrap_or(LSN_NONE);
        let trans_num = self.trans_num()?;
        Some(match *self {
            UpdatePage {
                page_num, offset, ref before, ref after, ..
            } => UndoUpdatePage {
                lsn: LSN_NONE,
                trans_num,
                prev_lsn: new_prev_lsn,
                undo_next_lsn,
                page_num,
                offset,
                before: after.clone(),
                after: before.clone(),
            },
            AllocPart { part_num, .. } => UndoAllocPart {
                lsn: LSN_NONE,
                trans_num,
                prev_lsn: new_prev_lsn,
                undo_next_lsn,
                part_num,
            },
            FreePart { part_num, .. } => UndoFreePart {
                lsn: LSN_NONE,
                trans_num,
                prev_lsn: new_prev_lsn,
                undo_next_lsn,
                part_num,
            },
            AllocPage { page_num, .. } => UndoAllocPage {
                lsn: LSN_NONE,
                trans_num,
                prev_lsn: new_prev_lsn,
                undo_next_lsn,
                page_num,
            },
            FreePage { page_num, .. } => UndoFreePage {
                lsn: LSN_NONE,
                trans_num,
                prev_lsn: new_prev_lsn,
                undo_next_lsn,
                page_num,
            },
            _ => return None,
        })
    }

    pub fn update_page(
        trans_num: TransactionId,
        prev_lsn: Lsn,
        page_num: PageNum,
        offset: u16,
        before: Vec<u8>,
        after: Vec<u8>,
    ) -> Self {
        debug_assert!(before.len() <= MAX_PAGE_IMAGE_SIZE && after.len() <= MAX_PAGE_IMAGE_SIZE);
        LogRecord::UpdatePage {
            lsn: LSN_NONE,
            trans_num,
            prev_lsn,
            page_num,
            offset,
            before,
            after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TransactionStatus;

    fn sample_update(lsn: Lsn, prev_lsn: Lsn) -> LogRecord {
        let mut r = LogRecord::update_page(1, prev_lsn, 5, 0, vec![1, 2], vec![3, 4]);
        r.set_lsn(lsn);
        r
    }

    #[test]
    fn accessors_on_update_page() {
        let r = sample_update(20, 10);
        assert_eq!(r.lsn(), 20);
        assert_eq!(r.prev_lsn(), Some(10));
        assert_eq!(r.trans_num(), Some(1));
        assert_eq!(r.page_num(), Some(5));
        assert!(r.is_redoable());
        assert!(r.is_undoable());
        assert_eq!(r.undo_next_lsn(), None);
    }

    #[test]
    fn status_records_are_neither_redoable_nor_undoable() {
        let r = LogRecord::CommitTxn { lsn: 1, trans_num: 1, prev_lsn: 0 };
        assert!(!r.is_redoable());
        assert!(!r.is_undoable());
        assert_eq!(r.undo_next_lsn(), None);
    }

    #[test]
    fn undo_produces_clr_with_swapped_images_and_undo_next_lsn() {
        let r = sample_update(20, 10);
        let clr = r.undo(30).expect("UpdatePage is undoable");
        match clr {
            LogRecord::UndoUpdatePage {
                prev_lsn,
                undo_next_lsn,
                before,
                after,
                trans_num,
                page_num,
                ..
            } => {
                assert_eq!(prev_lsn, 30);
                assert_eq!(undo_next_lsn, 10);
                assert_eq!(before, vec![3, 4]);
                assert_eq!(after, vec![1, 2]);
                assert_eq!(trans_num, 1);
                assert_eq!(page_num, 5);
            }
            other => panic!("expected UndoUpdatePage, got {other:?}"),
        }
        assert!(clr.is_redoable());
        assert!(!clr.is_undoable());
    }

    #[test]
    fn undo_of_non_undoable_record_is_none() {
        let r = LogRecord::CommitTxn { lsn: 1, trans_num: 1, prev_lsn: 0 };
        assert!(r.undo(5).is_none());
    }

    #[test]
    fn undo_chain_end_has_undo_next_lsn_zero() {
        // The first record in a transaction's chain has prevLSN == 0; its
        // CLR's undoNextLSN must be 0 so undo processing stops there.
        let r = sample_update(5, LSN_NONE);
        let clr = r.undo(12).unwrap();
        assert_eq!(clr.undo_next_lsn(), Some(LSN_NONE));
    }

    #[test]
    fn end_checkpoint_carries_dpt_and_xt_snapshots() {
        let r = LogRecord::EndCheckpoint {
            lsn: 99,
            dpt: vec![(5, 10)],
            xt: vec![(1, TxnSnapshot { status: TransactionStatus::Running, last_lsn: 8 })],
        };
        assert_eq!(r.lsn(), 99);
        assert_eq!(r.trans_num(), None);
        assert!(!r.is_redoable());
    }
}
