//! Multigranularity lock management and ARIES crash recovery core.
//!
//! Two independent subsystems sharing a handful of primitive types
//! ([`common`]): [`lock`] implements hierarchical lock acquisition with
//! escalation (§4.1–§4.3), and [`recovery`] implements write-ahead logging
//! and three-pass ARIES restart (§3, §4.4–§4.5). [`collab`] holds the trait
//! boundary to the storage engine this crate is embedded in (§6); this crate
//! owns neither the buffer pool nor the disk space manager.

pub mod collab;
pub mod common;
pub mod error;
pub mod lock;
pub mod recovery;

pub use error::{Error, Result};

/// Tunables shared by the lock manager and recovery manager at construction
/// time (§10.3). Not a file/CLI config loader — callers build one directly,
/// the way the rest of this crate's types are constructed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory the embedding storage engine persists pages and the
    /// log under. This crate itself only uses it when opening a
    /// file-backed [`recovery::LogManager`].
    pub data_dir: String,
    /// Page size in bytes, mirrored from [`common::EFFECTIVE_PAGE_SIZE`].
    pub page_size: usize,
    /// Maximum Dirty Page Table entries packed into a single
    /// `EndCheckpoint` record before a fuzzy checkpoint starts a new one.
    pub dpt_capacity_per_checkpoint_record: usize,
    /// Maximum Transaction Table entries packed into a single
    /// `EndCheckpoint` record before a fuzzy checkpoint starts a new one.
    pub xt_capacity_per_checkpoint_record: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            page_size: common::EFFECTIVE_PAGE_SIZE,
            dpt_capacity_per_checkpoint_record: 512,
            xt_capacity_per_checkpoint_record: 256,
        }
    }
}
