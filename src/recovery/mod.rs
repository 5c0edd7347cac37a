//! ARIES write-ahead logging and crash recovery (§3, §4.4, §4.5).

pub mod error;
pub mod log_manager;
pub mod log_record;
pub mod manager;

pub use error::{RecoveryError, RecoveryResult};
pub use log_manager::LogManager;
pub use log_record::{LogRecord, TxnSnapshot};
pub use manager::{RecoveryConfig, RecoveryManager, RecoveryStats};
