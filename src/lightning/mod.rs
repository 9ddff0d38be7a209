//! Lightning access
//!
//! The `LightningClient` trait is what the swap core needs from a Lightning
//! node: hold invoices, payments, peer and channel management. The REST
//! adapter speaks an LND-style API; the listener turns polled node state
//! into typed `LightningEvent`s.

pub mod client;
pub mod invoice;
pub mod listener;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{LightningClient, LightningError, LndRestClient};
pub use listener::LightningListener;
pub use types::{
    Channel, ChannelPoint, DecodedInvoice, HoldInvoiceRequest, HopHint, InvoiceState,
    LightningEvent, NodeInfo, OpenChannelRequest, PaymentResult, Peer,
};
