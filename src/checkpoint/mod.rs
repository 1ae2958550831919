//! 断点续跑：会话账本、账本存储（内存 / JSON 文件 / SQLite）与回放游标

pub mod file;
pub mod ledger;
pub mod memory;
pub mod replay;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

pub use file::FileLedgerStore;
pub use ledger::{Ledger, LedgerStore, RootCall, RunSegment};
pub(crate) use ledger::{session_key, SessionLocks};
pub use memory::InMemoryLedgerStore;
pub use replay::ReplayCursor;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteLedgerStore;
