//! Storage
//!
//! Abstract storage traits for swap records with a pooled SQLite
//! implementation for production and an in-memory twin for tests. Status
//! updates are validated against the transition tables here, so an illegal
//! transition can never reach disk.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ChainSwapStore, ChannelCreationStore, KeyIndexStore, ReverseStore, StorageError,
    StorageResult, Store, SubmarineStore, TxLabelStore,
};
