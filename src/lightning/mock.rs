//! In-memory Lightning node for tests
//!
//! Behaviour is scripted per call site: payment and channel-open results are
//! queued and popped in order, invoice states are set directly.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{LightningClient, LightningError};
use super::types::{
    Channel, ChannelPoint, DecodedInvoice, HoldInvoiceRequest, InvoiceState, NodeInfo,
    OpenChannelRequest, PaymentResult, Peer,
};

#[derive(Default)]
struct MockState {
    invoice_states: HashMap<String, InvoiceState>,
    hold_invoices: Vec<HoldInvoiceRequest>,
    settled_preimages: Vec<String>,
    cancelled_hashes: Vec<String>,
    pay_results: VecDeque<Result<PaymentResult, String>>,
    pay_attempts: u32,
    paid_invoices: Vec<String>,
    open_results: VecDeque<Result<ChannelPoint, String>>,
    open_attempts: u32,
    connect_attempts: u32,
    connect_fails: bool,
    peers: Vec<Peer>,
    channels: Vec<Channel>,
    decoded: HashMap<String, DecodedInvoice>,
    pending_payments: HashMap<String, bool>,
}

#[derive(Default)]
pub(crate) struct MockLightning {
    state: Mutex<MockState>,
}

impl MockLightning {
    pub fn set_invoice_state(&self, preimage_hash_hex: &str, state: InvoiceState) {
        self.state
            .lock()
            .unwrap()
            .invoice_states
            .insert(preimage_hash_hex.to_string(), state);
    }

    pub fn queue_payment(&self, result: Result<PaymentResult, &str>) {
        self.state
            .lock()
            .unwrap()
            .pay_results
            .push_back(result.map_err(|e| e.to_string()));
    }

    pub fn queue_open_channel(&self, result: Result<ChannelPoint, &str>) {
        self.state
            .lock()
            .unwrap()
            .open_results
            .push_back(result.map_err(|e| e.to_string()));
    }

    pub fn set_connect_fails(&self, fails: bool) {
        self.state.lock().unwrap().connect_fails = fails;
    }

    pub fn set_pending_payment(&self, preimage_hash_hex: &str, pending: bool) {
        self.state
            .lock()
            .unwrap()
            .pending_payments
            .insert(preimage_hash_hex.to_string(), pending);
    }

    pub fn add_peer(&self, public_key: &str) {
        self.state.lock().unwrap().peers.push(Peer {
            public_key: public_key.to_string(),
            address: "127.0.0.1:9735".to_string(),
        });
    }

    pub fn add_channel(&self, remote: &str, funding_txid: &str, vout: u32, active: bool) {
        self.state.lock().unwrap().channels.push(Channel {
            active,
            remote_public_key: remote.to_string(),
            channel_point: format!("{}:{}", funding_txid, vout),
            chan_id: "598314847122948096".to_string(),
            capacity: "0".to_string(),
        });
    }

    pub fn set_decoded(&self, invoice: &str, decoded: DecodedInvoice) {
        self.state
            .lock()
            .unwrap()
            .decoded
            .insert(invoice.to_string(), decoded);
    }

    pub fn pay_attempts(&self) -> u32 {
        self.state.lock().unwrap().pay_attempts
    }

    pub fn open_attempts(&self) -> u32 {
        self.state.lock().unwrap().open_attempts
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn hold_invoices(&self) -> Vec<HoldInvoiceRequest> {
        self.state.lock().unwrap().hold_invoices.clone()
    }

    pub fn settled_preimages(&self) -> Vec<String> {
        self.state.lock().unwrap().settled_preimages.clone()
    }

    pub fn cancelled_hashes(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled_hashes.clone()
    }
}

#[async_trait]
impl LightningClient for MockLightning {
    async fn get_info(&self) -> Result<NodeInfo, LightningError> {
        Ok(NodeInfo {
            public_key: "03".repeat(33),
            alias: "mock".to_string(),
            synced_to_chain: true,
            block_height: 800_000,
        })
    }

    async fn add_hold_invoice(&self, req: HoldInvoiceRequest) -> Result<String, LightningError> {
        let mut state = self.state.lock().unwrap();
        let hash_hex = hex::encode(req.preimage_hash);
        state
            .invoice_states
            .entry(hash_hex.clone())
            .or_insert(InvoiceState::Open);
        state.hold_invoices.push(req);
        Ok(format!("lnbcrt_hold_{}", &hash_hex[..16]))
    }

    async fn settle_hold_invoice(&self, preimage: &[u8; 32]) -> Result<(), LightningError> {
        use bitcoin::hashes::{sha256, Hash as _};

        let mut state = self.state.lock().unwrap();
        let hash = hex::encode(sha256::Hash::hash(preimage).to_byte_array());
        state.invoice_states.insert(hash, InvoiceState::Settled);
        state.settled_preimages.push(hex::encode(preimage));
        Ok(())
    }

    async fn cancel_hold_invoice(&self, preimage_hash: &[u8; 32]) -> Result<(), LightningError> {
        let mut state = self.state.lock().unwrap();
        let hash_hex = hex::encode(preimage_hash);
        state
            .invoice_states
            .insert(hash_hex.clone(), InvoiceState::Cancelled);
        state.cancelled_hashes.push(hash_hex);
        Ok(())
    }

    async fn lookup_invoice(
        &self,
        preimage_hash: &[u8; 32],
    ) -> Result<InvoiceState, LightningError> {
        let state = self.state.lock().unwrap();
        state
            .invoice_states
            .get(&hex::encode(preimage_hash))
            .copied()
            .ok_or_else(|| LightningError::InvoiceNotFound(hex::encode(preimage_hash)))
    }

    async fn pay_invoice(
        &self,
        invoice: &str,
        _max_fee_ratio: f64,
        _outgoing_channel_id: Option<u64>,
    ) -> Result<PaymentResult, LightningError> {
        let mut state = self.state.lock().unwrap();
        state.pay_attempts += 1;
        match state.pay_results.pop_front() {
            Some(Ok(result)) => {
                state.paid_invoices.push(invoice.to_string());
                Ok(result)
            }
            Some(Err(reason)) => Err(LightningError::PaymentFailed(reason)),
            None => Err(LightningError::PaymentFailed(
                "no scripted payment result".to_string(),
            )),
        }
    }

    async fn has_pending_payment(
        &self,
        preimage_hash: &[u8; 32],
    ) -> Result<bool, LightningError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pending_payments
            .get(&hex::encode(preimage_hash))
            .copied()
            .unwrap_or(false))
    }

    async fn decode(&self, invoice: &str) -> Result<DecodedInvoice, LightningError> {
        let state = self.state.lock().unwrap();
        state
            .decoded
            .get(invoice)
            .cloned()
            .ok_or_else(|| LightningError::Decode(format!("unknown invoice: {}", invoice)))
    }

    async fn connect_peer(
        &self,
        public_key: &str,
        _address_hints: &[String],
    ) -> Result<(), LightningError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.connect_fails {
            return Err(LightningError::Api("connection refused".to_string()));
        }
        state.peers.push(Peer {
            public_key: public_key.to_string(),
            address: "127.0.0.1:9735".to_string(),
        });
        Ok(())
    }

    async fn open_channel(
        &self,
        _req: OpenChannelRequest,
    ) -> Result<ChannelPoint, LightningError> {
        let mut state = self.state.lock().unwrap();
        state.open_attempts += 1;
        match state.open_results.pop_front() {
            Some(Ok(point)) => Ok(point),
            Some(Err(reason)) => Err(LightningError::Api(reason)),
            None => Err(LightningError::Api("no scripted open result".to_string())),
        }
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, LightningError> {
        Ok(self.state.lock().unwrap().peers.clone())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, LightningError> {
        Ok(self.state.lock().unwrap().channels.clone())
    }
}
