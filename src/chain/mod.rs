//! Chain access
//!
//! `EsploraClient` talks to an Esplora-compatible HTTP API; `ChainListener`
//! watches swap addresses and outpoints and normalises what it sees into
//! `ChainEvent`s for the state machines.

pub mod esplora;
pub mod listener;

pub use esplora::{ChainBackend, ChainError, EsploraClient, EsploraTx, TxStatus, Utxo};
pub use listener::{ChainEvent, ChainListener, ZeroConfRejection};
