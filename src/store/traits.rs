//! Storage Trait Definitions
//!
//! Abstract interfaces for swap persistence. Implementations:
//! - `SqliteStore` - pooled SQLite for production
//! - `MemoryStore` - in-memory twin for tests

use async_trait::async_trait;
use thiserror::Error;

use crate::types::status::{SwapKind, SwapStatus};
use crate::types::swap::{ChainSwap, ChannelCreation, ChannelCreationStatus, ReverseSwap, Swap};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("illegal {kind} transition {from} -> {to} for {id}")]
    InvalidTransition {
        kind: SwapKind,
        id: String,
        from: SwapStatus,
        to: SwapStatus,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Submarine swap storage
#[async_trait]
pub trait SubmarineStore: Send + Sync {
    async fn insert_swap(&self, swap: &Swap) -> StorageResult<()>;

    async fn get_swap(&self, id: &str) -> StorageResult<Option<Swap>>;

    async fn get_swap_by_preimage_hash(&self, hash: &str) -> StorageResult<Option<Swap>>;

    async fn get_swap_by_lockup_address(&self, address: &str) -> StorageResult<Option<Swap>>;

    async fn get_swaps_by_status(&self, status: SwapStatus) -> StorageResult<Vec<Swap>>;

    /// Apply a status transition. Rejected with `InvalidTransition` and the
    /// record left untouched when the transition table forbids it.
    async fn set_swap_status(&self, id: &str, status: SwapStatus) -> StorageResult<Swap>;

    async fn set_swap_lockup(
        &self,
        id: &str,
        txid: &str,
        vout: u32,
        amount: u64,
        zero_conf: bool,
    ) -> StorageResult<()>;

    async fn set_swap_invoice(
        &self,
        id: &str,
        invoice: &str,
        expected_amount: u64,
    ) -> StorageResult<()>;

    async fn set_swap_preimage(&self, id: &str, preimage: &str) -> StorageResult<()>;

    async fn set_swap_failure_reason(&self, id: &str, reason: &str) -> StorageResult<()>;
}

/// Reverse swap storage
#[async_trait]
pub trait ReverseStore: Send + Sync {
    async fn insert_reverse(&self, swap: &ReverseSwap) -> StorageResult<()>;

    async fn get_reverse(&self, id: &str) -> StorageResult<Option<ReverseSwap>>;

    async fn get_reverse_by_preimage_hash(&self, hash: &str)
        -> StorageResult<Option<ReverseSwap>>;

    async fn get_reverses_by_status(&self, status: SwapStatus) -> StorageResult<Vec<ReverseSwap>>;

    async fn set_reverse_status(&self, id: &str, status: SwapStatus)
        -> StorageResult<ReverseSwap>;

    async fn set_reverse_invoice(
        &self,
        id: &str,
        invoice: &str,
        miner_fee_invoice: Option<&str>,
    ) -> StorageResult<()>;

    async fn set_reverse_lockup(&self, id: &str, txid: &str, vout: u32) -> StorageResult<()>;

    async fn set_reverse_preimage(&self, id: &str, preimage: &str) -> StorageResult<()>;
}

/// Chain swap storage
#[async_trait]
pub trait ChainSwapStore: Send + Sync {
    async fn insert_chain_swap(&self, swap: &ChainSwap) -> StorageResult<()>;

    async fn get_chain_swap(&self, id: &str) -> StorageResult<Option<ChainSwap>>;

    async fn set_chain_swap_status(&self, id: &str, status: SwapStatus)
        -> StorageResult<ChainSwap>;
}

/// Channel creation storage
#[async_trait]
pub trait ChannelCreationStore: Send + Sync {
    async fn insert_channel_creation(&self, creation: &ChannelCreation) -> StorageResult<()>;

    async fn get_channel_creation(&self, swap_id: &str)
        -> StorageResult<Option<ChannelCreation>>;

    async fn get_channel_creations_by_status(
        &self,
        status: ChannelCreationStatus,
    ) -> StorageResult<Vec<ChannelCreation>>;

    async fn set_channel_creation_status(
        &self,
        swap_id: &str,
        status: ChannelCreationStatus,
    ) -> StorageResult<()>;

    async fn set_channel_creation_funding(
        &self,
        swap_id: &str,
        funding_txid: &str,
        funding_vout: u32,
    ) -> StorageResult<()>;
}

/// BIP32 derivation cursor, one row per currency symbol
#[async_trait]
pub trait KeyIndexStore: Send + Sync {
    /// Reserve and return the next derivation index for a symbol
    async fn next_key_index(&self, symbol: &str) -> StorageResult<u32>;
}

/// Transaction labels for broadcast bookkeeping
#[async_trait]
pub trait TxLabelStore: Send + Sync {
    async fn label_transaction(
        &self,
        txid: &str,
        symbol: &str,
        label: &str,
    ) -> StorageResult<()>;

    async fn get_transaction_label(&self, txid: &str) -> StorageResult<Option<String>>;
}

/// Everything the swap core needs from persistence
pub trait Store:
    SubmarineStore
    + ReverseStore
    + ChainSwapStore
    + ChannelCreationStore
    + KeyIndexStore
    + TxLabelStore
{
}

impl<T> Store for T where
    T: SubmarineStore
        + ReverseStore
        + ChainSwapStore
        + ChannelCreationStore
        + KeyIndexStore
        + TxLabelStore
{
}

/// Shared transition guard for store implementations
pub(crate) fn check_transition(
    kind: SwapKind,
    id: &str,
    from: SwapStatus,
    to: SwapStatus,
) -> StorageResult<()> {
    if from.can_transition(kind, to) {
        Ok(())
    } else {
        Err(StorageError::InvalidTransition {
            kind,
            id: id.to_string(),
            from,
            to,
        })
    }
}
