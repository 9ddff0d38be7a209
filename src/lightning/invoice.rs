//! Invoice Helpers
//!
//! Local BOLT11 parsing for the fields the swap core checks before ever
//! talking to the node. BOLT12 requests are recognised by prefix and decoded
//! through the node.

use std::str::FromStr as _;
use std::time::{Duration, SystemTime};

use bitcoin::hashes::Hash as _;
use lightning_invoice::Bolt11Invoice;
use thiserror::Error;

/// Invoice parsing errors
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invalid BOLT11 invoice: {0}")]
    InvalidBolt11(String),

    #[error("invoice has no amount")]
    MissingAmount,
}

/// Whether a payment request is a BOLT12 offer or invoice
pub fn is_bolt12(invoice: &str) -> bool {
    let lowered = invoice.to_lowercase();
    lowered.starts_with("lno1") || lowered.starts_with("lni1")
}

fn parse(invoice: &str) -> Result<Bolt11Invoice, InvoiceError> {
    Bolt11Invoice::from_str(invoice)
        .map_err(|e| InvoiceError::InvalidBolt11(format!("{:?}", e)))
}

/// Payment hash of a BOLT11 invoice
pub fn payment_hash(invoice: &str) -> Result<[u8; 32], InvoiceError> {
    Ok(parse(invoice)?.payment_hash().to_byte_array())
}

/// Amount of a BOLT11 invoice in millisatoshis
pub fn amount_msat(invoice: &str) -> Result<Option<u64>, InvoiceError> {
    Ok(parse(invoice)?.amount_milli_satoshis())
}

/// Amount of a BOLT11 invoice in satoshis, required
pub fn amount_sat(invoice: &str) -> Result<u64, InvoiceError> {
    amount_msat(invoice)?
        .map(|msat| msat / 1_000)
        .ok_or(InvoiceError::MissingAmount)
}

/// Payee node key of a BOLT11 invoice (hex)
pub fn payee_public_key(invoice: &str) -> Result<String, InvoiceError> {
    let invoice = parse(invoice)?;
    Ok(invoice
        .payee_pub_key()
        .copied()
        .unwrap_or_else(|| invoice.recover_payee_pub_key())
        .to_string())
}

/// Whether a BOLT11 invoice has expired
pub fn is_expired(invoice: &str) -> Result<bool, InvoiceError> {
    let invoice = parse(invoice)?;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    Ok(invoice.would_expire(now))
}
