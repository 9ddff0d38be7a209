//! swapd - Trust-minimised submarine swap service
//!
//! Bridges onchain Bitcoin UTXOs and offchain Lightning payments through
//! Hash Time-Locked Contracts. Users deposit coins to an HTLC, the service
//! pays (or is paid on) Lightning, and the counterparty redeems with the
//! preimage; timelocks guarantee refundability.
//!
//! ## Module Organization
//!
//! - `config` / `logging` / `error` - Configuration, tracing, error handling
//! - `types/` - Swap records, pairs, statuses, amount normalisation
//! - `chain/` - Esplora client and the chain listener (lockup detection)
//! - `lightning/` - Lightning client trait, LND REST adapter, event listener
//! - `store/` - Storage traits, SQLite and in-memory implementations
//! - `wallet/` - Wallet capability interface and the service wallet
//! - `htlc/` - Taproot swap trees, claim/refund transaction building
//! - `musig/` - MuSig2 cooperative signer for claims and refunds
//! - `hints/` - Routing hints, BIP21 params, invoice descriptors
//! - `swap/` - Submarine and reverse state machines, channel nursery
//! - `events` / `timeout` - Status event bus and the timeout watcher
//! - `api/` - HTTP server and WebSocket status streaming

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod hints;
pub mod htlc;
pub mod lightning;
pub mod logging;
pub mod musig;
pub mod store;
pub mod swap;
pub mod timeout;
pub mod types;
pub mod wallet;
