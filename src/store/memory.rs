//! In-memory Storage
//!
//! HashMap-backed implementation of the storage traits. Used by tests and
//! available as a throwaway backend for regtest runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::traits::{
    check_transition, ChainSwapStore, ChannelCreationStore, KeyIndexStore, ReverseStore,
    StorageError, StorageResult, SubmarineStore, TxLabelStore,
};
use crate::types::status::SwapStatus;
use crate::types::swap::{ChainSwap, ChannelCreation, ChannelCreationStatus, ReverseSwap, Swap};

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    swaps: RwLock<HashMap<String, Swap>>,
    reverses: RwLock<HashMap<String, ReverseSwap>>,
    chain_swaps: RwLock<HashMap<String, ChainSwap>>,
    channel_creations: RwLock<HashMap<String, ChannelCreation>>,
    key_indices: RwLock<HashMap<String, u32>>,
    tx_labels: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmarineStore for MemoryStore {
    async fn insert_swap(&self, swap: &Swap) -> StorageResult<()> {
        let mut swaps = self.swaps.write().unwrap();
        if swaps.contains_key(&swap.id) {
            return Err(StorageError::Duplicate(swap.id.clone()));
        }
        swaps.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn get_swap(&self, id: &str) -> StorageResult<Option<Swap>> {
        Ok(self.swaps.read().unwrap().get(id).cloned())
    }

    async fn get_swap_by_preimage_hash(&self, hash: &str) -> StorageResult<Option<Swap>> {
        Ok(self
            .swaps
            .read()
            .unwrap()
            .values()
            .find(|s| s.preimage_hash == hash)
            .cloned())
    }

    async fn get_swap_by_lockup_address(&self, address: &str) -> StorageResult<Option<Swap>> {
        Ok(self
            .swaps
            .read()
            .unwrap()
            .values()
            .find(|s| s.lockup_address == address)
            .cloned())
    }

    async fn get_swaps_by_status(&self, status: SwapStatus) -> StorageResult<Vec<Swap>> {
        Ok(self
            .swaps
            .read()
            .unwrap()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn set_swap_status(&self, id: &str, status: SwapStatus) -> StorageResult<Swap> {
        let mut swaps = self.swaps.write().unwrap();
        let swap = swaps
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        check_transition(Swap::KIND, id, swap.status, status)?;
        swap.set_status(status);
        Ok(swap.clone())
    }

    async fn set_swap_lockup(
        &self,
        id: &str,
        txid: &str,
        vout: u32,
        amount: u64,
        zero_conf: bool,
    ) -> StorageResult<()> {
        let mut swaps = self.swaps.write().unwrap();
        let swap = swaps
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.set_lockup(txid.to_string(), vout, amount, zero_conf);
        Ok(())
    }

    async fn set_swap_invoice(
        &self,
        id: &str,
        invoice: &str,
        expected_amount: u64,
    ) -> StorageResult<()> {
        let mut swaps = self.swaps.write().unwrap();
        let swap = swaps
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.invoice = invoice.to_string();
        swap.expected_amount = expected_amount;
        Ok(())
    }

    async fn set_swap_preimage(&self, id: &str, preimage: &str) -> StorageResult<()> {
        let mut swaps = self.swaps.write().unwrap();
        let swap = swaps
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.set_preimage(preimage.to_string());
        Ok(())
    }

    async fn set_swap_failure_reason(&self, id: &str, reason: &str) -> StorageResult<()> {
        let mut swaps = self.swaps.write().unwrap();
        let swap = swaps
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.set_failure_reason(reason.to_string());
        Ok(())
    }
}

#[async_trait]
impl ReverseStore for MemoryStore {
    async fn insert_reverse(&self, swap: &ReverseSwap) -> StorageResult<()> {
        let mut reverses = self.reverses.write().unwrap();
        if reverses.contains_key(&swap.id) {
            return Err(StorageError::Duplicate(swap.id.clone()));
        }
        reverses.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn get_reverse(&self, id: &str) -> StorageResult<Option<ReverseSwap>> {
        Ok(self.reverses.read().unwrap().get(id).cloned())
    }

    async fn get_reverse_by_preimage_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        Ok(self
            .reverses
            .read()
            .unwrap()
            .values()
            .find(|s| s.preimage_hash == hash)
            .cloned())
    }

    async fn get_reverses_by_status(
        &self,
        status: SwapStatus,
    ) -> StorageResult<Vec<ReverseSwap>> {
        Ok(self
            .reverses
            .read()
            .unwrap()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn set_reverse_status(
        &self,
        id: &str,
        status: SwapStatus,
    ) -> StorageResult<ReverseSwap> {
        let mut reverses = self.reverses.write().unwrap();
        let swap = reverses
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        check_transition(ReverseSwap::KIND, id, swap.status, status)?;
        swap.set_status(status);
        Ok(swap.clone())
    }

    async fn set_reverse_invoice(
        &self,
        id: &str,
        invoice: &str,
        miner_fee_invoice: Option<&str>,
    ) -> StorageResult<()> {
        let mut reverses = self.reverses.write().unwrap();
        let swap = reverses
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.set_invoice(
            invoice.to_string(),
            miner_fee_invoice.map(|s| s.to_string()),
        );
        Ok(())
    }

    async fn set_reverse_lockup(&self, id: &str, txid: &str, vout: u32) -> StorageResult<()> {
        let mut reverses = self.reverses.write().unwrap();
        let swap = reverses
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.set_lockup(txid.to_string(), vout);
        Ok(())
    }

    async fn set_reverse_preimage(&self, id: &str, preimage: &str) -> StorageResult<()> {
        let mut reverses = self.reverses.write().unwrap();
        let swap = reverses
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        swap.set_preimage(preimage.to_string());
        Ok(())
    }
}

#[async_trait]
impl ChainSwapStore for MemoryStore {
    async fn insert_chain_swap(&self, swap: &ChainSwap) -> StorageResult<()> {
        let mut chain_swaps = self.chain_swaps.write().unwrap();
        if chain_swaps.contains_key(&swap.id) {
            return Err(StorageError::Duplicate(swap.id.clone()));
        }
        chain_swaps.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn get_chain_swap(&self, id: &str) -> StorageResult<Option<ChainSwap>> {
        Ok(self.chain_swaps.read().unwrap().get(id).cloned())
    }

    async fn set_chain_swap_status(
        &self,
        id: &str,
        status: SwapStatus,
    ) -> StorageResult<ChainSwap> {
        let mut chain_swaps = self.chain_swaps.write().unwrap();
        let swap = chain_swaps
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        check_transition(ChainSwap::KIND, id, swap.status, status)?;
        swap.set_status(status);
        Ok(swap.clone())
    }
}

#[async_trait]
impl ChannelCreationStore for MemoryStore {
    async fn insert_channel_creation(&self, creation: &ChannelCreation) -> StorageResult<()> {
        let mut creations = self.channel_creations.write().unwrap();
        if creations.contains_key(&creation.swap_id) {
            return Err(StorageError::Duplicate(creation.swap_id.clone()));
        }
        creations.insert(creation.swap_id.clone(), creation.clone());
        Ok(())
    }

    async fn get_channel_creation(
        &self,
        swap_id: &str,
    ) -> StorageResult<Option<ChannelCreation>> {
        Ok(self.channel_creations.read().unwrap().get(swap_id).cloned())
    }

    async fn get_channel_creations_by_status(
        &self,
        status: ChannelCreationStatus,
    ) -> StorageResult<Vec<ChannelCreation>> {
        Ok(self
            .channel_creations
            .read()
            .unwrap()
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn set_channel_creation_status(
        &self,
        swap_id: &str,
        status: ChannelCreationStatus,
    ) -> StorageResult<()> {
        let mut creations = self.channel_creations.write().unwrap();
        let creation = creations
            .get_mut(swap_id)
            .ok_or_else(|| StorageError::NotFound(swap_id.to_string()))?;
        creation.set_status(status);
        Ok(())
    }

    async fn set_channel_creation_funding(
        &self,
        swap_id: &str,
        funding_txid: &str,
        funding_vout: u32,
    ) -> StorageResult<()> {
        let mut creations = self.channel_creations.write().unwrap();
        let creation = creations
            .get_mut(swap_id)
            .ok_or_else(|| StorageError::NotFound(swap_id.to_string()))?;
        creation.set_funding(funding_txid.to_string(), funding_vout);
        Ok(())
    }
}

#[async_trait]
impl KeyIndexStore for MemoryStore {
    async fn next_key_index(&self, symbol: &str) -> StorageResult<u32> {
        let mut indices = self.key_indices.write().unwrap();
        let index = indices.entry(symbol.to_string()).or_insert(0);
        let reserved = *index;
        *index += 1;
        Ok(reserved)
    }
}

#[async_trait]
impl TxLabelStore for MemoryStore {
    async fn label_transaction(
        &self,
        txid: &str,
        symbol: &str,
        label: &str,
    ) -> StorageResult<()> {
        self.tx_labels
            .write()
            .unwrap()
            .insert(txid.to_string(), format!("{}: {}", symbol, label));
        Ok(())
    }

    async fn get_transaction_label(&self, txid: &str) -> StorageResult<Option<String>> {
        Ok(self.tx_labels.read().unwrap().get(txid).cloned())
    }
}
