//! External collaborator interfaces (§6).
//!
//! The buffer pool, disk space manager, and the broader transaction
//! lifecycle are out of scope for this crate (§1) — they're consumed here
//! as thin traits, exactly the way the teacher's `storage::page` and
//! `buffer::manager` modules are consumed by `transaction::recovery` rather
//! than reimplemented by it. The in-memory implementations below exist only
//! so this crate's own tests can drive the recovery manager end to end
//! without a real storage engine; they are not production collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Lsn, PageNum, PartitionNum, EFFECTIVE_PAGE_SIZE, LSN_NONE};
use crate::common::TransactionStatus;
use crate::common::TransactionId;

/// A fetched, pinned page (§6: `fetchPage(pageNum) -> Page`).
pub trait Page: Send + Sync {
    fn page_num(&self) -> PageNum;
    fn get_page_lsn(&self) -> Lsn;
    fn set_page_lsn(&self, lsn: Lsn);
    fn write_bytes(&self, offset: usize, bytes: &[u8]);
    fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8>;
}

/// The buffer manager collaborator (§6): `fetchPage`, `unpin`,
/// `iterPageNums`. `EFFECTIVE_PAGE_SIZE` lives as a plain crate constant
/// ([`crate::common::EFFECTIVE_PAGE_SIZE`]) rather than an associated
/// constant here, since the recovery manager needs it before any buffer
/// manager instance exists (to bound log record image sizes at construction
/// time).
pub trait BufferManager: Send + Sync {
    fn fetch_page(&self, page_num: PageNum) -> Option<Arc<dyn Page>>;
    fn unpin(&self, page_num: PageNum);
    /// Visit every page currently resident, with whether it's dirty.
    fn iter_page_nums(&self, visit: &mut dyn FnMut(PageNum, bool));
}

/// The disk space manager collaborator (§6). Partition 0 is reserved for
/// the log; callers must treat `get_part_num` returning `0` as "this page
/// belongs to the log, not to user data" and skip space-allocation logging
/// for it.
pub trait DiskSpaceManager: Send + Sync {
    fn get_part_num(&self, page_num: PageNum) -> PartitionNum;
}

/// Partition number reserved for the log (§6).
pub const LOG_PARTITION: PartitionNum = 0;

/// The running-transaction collaborator (§6): status bookkeeping and the
/// two-phase block/unblock protocol's participant-facing half (§5). This
/// crate's own [`crate::lock::LockManager`] blocks the calling thread
/// directly via `parking_lot::Condvar` rather than delegating to
/// `prepare_block`/`block`/`unblock` on this trait — behaviorally identical
/// (prepare happens under the monitor, the actual wait happens outside it),
/// just without an extra indirection. The trait is kept because the
/// recovery manager's `end`/restart-analysis paths need `status`/
/// `set_status`/`cleanup` on whatever is standing in for a transaction.
pub trait TransactionHandle: Send + Sync {
    fn trans_num(&self) -> TransactionId;
    fn status(&self) -> TransactionStatus;
    fn set_status(&self, status: TransactionStatus);
    /// Release all locks and flush any transaction-local resources. Called
    /// once a transaction reaches `Complete`.
    fn cleanup(&self);
}

// ============================================================================
// In-memory stand-ins, for this crate's own tests only.
// ============================================================================

pub struct InMemoryPage {
    page_num: PageNum,
    lsn: AtomicU64,
    bytes: Mutex<Vec<u8>>,
}

impl InMemoryPage {
    pub fn new(page_num: PageNum) -> Self {
        InMemoryPage {
            page_num,
            lsn: AtomicU64::new(LSN_NONE),
            bytes: Mutex::new(vec![0u8; EFFECTIVE_PAGE_SIZE]),
        }
    }
}

impl Page for InMemoryPage {
    fn page_num(&self) -> PageNum {
        self.page_num
    }

    fn get_page_lsn(&self) -> Lsn {
        self.lsn.load(Ordering::SeqCst)
    }

    fn set_page_lsn(&self, lsn: Lsn) {
        self.lsn.store(lsn, Ordering::SeqCst);
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        let mut buf = self.bytes.lock();
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.bytes.lock()[offset..offset + len].to_vec()
    }
}

/// A buffer manager over an in-memory page table. Every page is always
/// resident (no eviction) since this stand-in only needs to support tests
/// that drive forward-processing and restart directly.
#[derive(Default)]
pub struct InMemoryBufferManager {
    pages: Mutex<HashMap<PageNum, Arc<InMemoryPage>>>,
    dirty: Mutex<HashMap<PageNum, bool>>,
}

impl InMemoryBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self, page_num: PageNum, dirty: bool) {
        self.dirty.lock().insert(page_num, dirty);
    }

    fn get_or_create(&self, page_num: PageNum) -> Arc<InMemoryPage> {
        Arc::clone(
            self.pages
                .lock()
                .entry(page_num)
                .or_insert_with(|| Arc::new(InMemoryPage::new(page_num))),
        )
    }
}

impl BufferManager for InMemoryBufferManager {
    fn fetch_page(&self, page_num: PageNum) -> Option<Arc<dyn Page>> {
        Some(self.get_or_create(page_num) as Arc<dyn Page>)
    }

    fn unpin(&self, _page_num: PageNum) {}

    fn iter_page_nums(&self, visit: &mut dyn FnMut(PageNum, bool)) {
        let pages: Vec<PageNum> = self.pages.lock().keys().copied().collect();
        let dirty = self.dirty.lock();
        for p in pages {
            visit(p, dirty.get(&p).copied().unwrap_or(false));
        }
    }
}

/// A disk space manager stand-in: pages are partitioned by a fixed number
/// of pages per partition, with partition 0 reserved for the log.
pub struct InMemoryDiskSpaceManager {
    pages_per_partition: u64,
}

impl InMemoryDiskSpaceManager {
    pub fn new(pages_per_partition: u64) -> Self {
        InMemoryDiskSpaceManager { pages_per_partition }
    }
}

impl DiskSpaceManager for InMemoryDiskSpaceManager {
    fn get_part_num(&self, page_num: PageNum) -> PartitionNum {
        page_num / self.pages_per_partition.max(1)
    }
}

pub struct InMemoryTransactionHandle {
    trans_num: TransactionId,
    status: Mutex<TransactionStatus>,
    cleaned_up: Mutex<bool>,
}

impl InMemoryTransactionHandle {
    pub fn new(trans_num: TransactionId) -> Self {
        InMemoryTransactionHandle {
            trans_num,
            status: Mutex::new(TransactionStatus::Running),
            cleaned_up: Mutex::new(false),
        }
    }

    pub fn is_cleaned_up(&self) -> bool {
        *self.cleaned_up.lock()
    }
}

impl TransactionHandle for InMemoryTransactionHandle {
    fn trans_num(&self) -> TransactionId {
        self.trans_num
    }

    fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }

    fn cleanup(&self) {
        *self.cleaned_up.lock() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_manager_creates_pages_lazily() {
        let bm = InMemoryBufferManager::new();
        let page = bm.fetch_page(7).unwrap();
        assert_eq!(page.page_num(), 7);
        assert_eq!(page.get_page_lsn(), LSN_NONE);
    }

    #[test]
    fn page_write_and_read_round_trip() {
        let bm = InMemoryBufferManager::new();
        let page = bm.fetch_page(1).unwrap();
        page.write_bytes(10, &[1, 2, 3, 4]);
        assert_eq!(page.read_bytes(10, 4), vec![1, 2, 3, 4]);
        page.set_page_lsn(42);
        assert_eq!(page.get_page_lsn(), 42);
    }

    #[test]
    fn disk_space_manager_reserves_partition_zero() {
        let dsm = InMemoryDiskSpaceManager::new(100);
        assert_eq!(dsm.get_part_num(5), LOG_PARTITION);
        assert_eq!(dsm.get_part_num(150), 1);
    }

    #[test]
    fn transaction_handle_cleanup() {
        let t = InMemoryTransactionHandle::new(1);
        assert_eq!(t.status(), TransactionStatus::Running);
        t.set_status(TransactionStatus::Committing);
        assert_eq!(t.status(), TransactionStatus::Committing);
        assert!(!t.is_cleaned_up());
        t.cleanup();
        assert!(t.is_cleaned_up());
    }
}
