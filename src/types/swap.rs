//! Swap Records
//!
//! Durable records for submarine, reverse and chain swaps plus channel
//! creations. Records are plain data; every status mutation goes through
//! the store so the transition table is enforced in one place.

use serde::{Deserialize, Serialize};

use super::status::{SwapKind, SwapStatus};

/// Which side of the pair the user trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err(format!("unknown order side: {}", s)),
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}_{:08x}", prefix, now_secs(), rand::random::<u32>())
}

/// A submarine swap: onchain deposit, Lightning payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    /// Unique swap id
    pub id: String,
    /// Pair identifier, e.g. "BTC/BTC"
    pub pair: String,
    /// Order side
    pub order_side: OrderSide,
    /// Current status
    pub status: SwapStatus,

    /// Expected onchain lockup amount in satoshis
    pub expected_amount: u64,
    /// Actual lockup amount once seen
    pub onchain_amount: Option<u64>,
    /// BOLT11 invoice (or BOLT12 pull payment) the service pays
    pub invoice: String,
    /// SHA256 payment hash (hex, 32 bytes)
    pub preimage_hash: String,
    /// Preimage revealed by the Lightning payment (hex)
    pub preimage: Option<String>,

    /// Client refund public key (hex, 33 bytes compressed)
    pub refund_public_key: String,
    /// Service claim public key (hex, 33 bytes compressed)
    pub claim_public_key: String,
    /// BIP32 derivation index of the claim key
    pub key_index: u32,

    /// Claim leaf script (hex)
    pub claim_leaf: String,
    /// Refund leaf script (hex)
    pub refund_leaf: String,
    /// Taproot lockup address
    pub lockup_address: String,
    /// Absolute block height of the refund timelock
    pub timeout_block_height: u32,

    /// Lockup transaction id once seen
    pub lockup_txid: Option<String>,
    /// Lockup output index
    pub lockup_vout: Option<u32>,
    /// Whether the lockup was accepted unconfirmed
    pub accepted_zero_conf: bool,

    /// Whether a channel creation is attached
    pub channel_creation: bool,

    /// Terminal failure detail, if any
    pub failure_reason: Option<String>,

    pub created_at: u64,
    pub updated_at: u64,
}

impl Swap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair: String,
        order_side: OrderSide,
        expected_amount: u64,
        invoice: String,
        preimage_hash: String,
        refund_public_key: String,
        claim_public_key: String,
        key_index: u32,
        claim_leaf: String,
        refund_leaf: String,
        lockup_address: String,
        timeout_block_height: u32,
    ) -> Self {
        let now = now_secs();
        Self {
            id: new_id("swap"),
            pair,
            order_side,
            status: SwapStatus::SwapCreated,
            expected_amount,
            onchain_amount: None,
            invoice,
            preimage_hash,
            preimage: None,
            refund_public_key,
            claim_public_key,
            key_index,
            claim_leaf,
            refund_leaf,
            lockup_address,
            timeout_block_height,
            lockup_txid: None,
            lockup_vout: None,
            accepted_zero_conf: false,
            channel_creation: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub const KIND: SwapKind = SwapKind::Submarine;

    /// Whether the lockup covers the expected amount
    pub fn sufficiently_paid(&self) -> bool {
        self.onchain_amount
            .map(|actual| actual >= self.expected_amount)
            .unwrap_or(false)
    }

    pub fn set_status(&mut self, status: SwapStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_lockup(&mut self, txid: String, vout: u32, amount: u64, zero_conf: bool) {
        self.lockup_txid = Some(txid);
        self.lockup_vout = Some(vout);
        self.onchain_amount = Some(amount);
        self.accepted_zero_conf = zero_conf;
        self.touch();
    }

    pub fn set_preimage(&mut self, preimage: String) {
        self.preimage = Some(preimage);
        self.touch();
    }

    pub fn set_failure_reason(&mut self, reason: String) {
        self.failure_reason = Some(reason);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_secs();
    }
}

/// A reverse swap: Lightning hold invoice in, onchain lockup out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseSwap {
    pub id: String,
    pub pair: String,
    pub order_side: OrderSide,
    pub status: SwapStatus,

    /// Amount of the hold invoice in satoshis
    pub invoice_amount: u64,
    /// Amount locked up onchain in satoshis
    pub onchain_amount: u64,
    /// Hold invoice issued for this swap
    pub invoice: Option<String>,
    /// Optional prepay miner fee invoice
    pub miner_fee_invoice: Option<String>,

    /// SHA256 payment hash supplied by the client (hex, 32 bytes)
    pub preimage_hash: String,
    /// Preimage once revealed by the claim (hex)
    pub preimage: Option<String>,

    /// Client claim public key (hex, 33 bytes compressed)
    pub claim_public_key: String,
    /// Service refund public key (hex, 33 bytes compressed)
    pub refund_public_key: String,
    /// BIP32 derivation index of the refund key
    pub key_index: u32,

    pub claim_leaf: String,
    pub refund_leaf: String,
    pub lockup_address: String,
    pub timeout_block_height: u32,

    /// Lockup transaction id once broadcast
    pub lockup_txid: Option<String>,
    pub lockup_vout: Option<u32>,

    pub failure_reason: Option<String>,

    pub created_at: u64,
    pub updated_at: u64,
}

impl ReverseSwap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair: String,
        order_side: OrderSide,
        invoice_amount: u64,
        onchain_amount: u64,
        preimage_hash: String,
        claim_public_key: String,
        refund_public_key: String,
        key_index: u32,
        claim_leaf: String,
        refund_leaf: String,
        lockup_address: String,
        timeout_block_height: u32,
    ) -> Self {
        let now = now_secs();
        Self {
            id: new_id("rswap"),
            pair,
            order_side,
            status: SwapStatus::SwapCreated,
            invoice_amount,
            onchain_amount,
            invoice: None,
            miner_fee_invoice: None,
            preimage_hash,
            preimage: None,
            claim_public_key,
            refund_public_key,
            key_index,
            claim_leaf,
            refund_leaf,
            lockup_address,
            timeout_block_height,
            lockup_txid: None,
            lockup_vout: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub const KIND: SwapKind = SwapKind::Reverse;

    pub fn set_status(&mut self, status: SwapStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_invoice(&mut self, invoice: String, miner_fee_invoice: Option<String>) {
        self.invoice = Some(invoice);
        self.miner_fee_invoice = miner_fee_invoice;
        self.touch();
    }

    pub fn set_lockup(&mut self, txid: String, vout: u32) {
        self.lockup_txid = Some(txid);
        self.lockup_vout = Some(vout);
        self.touch();
    }

    pub fn set_preimage(&mut self, preimage: String) {
        self.preimage = Some(preimage);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_secs();
    }
}

/// One onchain side of a chain swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSwapSide {
    pub symbol: String,
    pub amount: u64,
    pub lockup_address: String,
    pub timeout_block_height: u32,
    pub claim_leaf: String,
    pub refund_leaf: String,
    pub lockup_txid: Option<String>,
    pub lockup_vout: Option<u32>,
}

/// A chain swap: both sides onchain, one preimage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSwap {
    pub id: String,
    pub pair: String,
    pub order_side: OrderSide,
    pub status: SwapStatus,

    pub preimage_hash: String,
    pub preimage: Option<String>,

    /// Side the user funds
    pub sending: ChainSwapSide,
    /// Side the service funds
    pub receiving: ChainSwapSide,

    pub created_at: u64,
    pub updated_at: u64,
}

impl ChainSwap {
    pub fn new(
        pair: String,
        order_side: OrderSide,
        preimage_hash: String,
        sending: ChainSwapSide,
        receiving: ChainSwapSide,
    ) -> Self {
        let now = now_secs();
        Self {
            id: new_id("cswap"),
            pair,
            order_side,
            status: SwapStatus::SwapCreated,
            preimage_hash,
            preimage: None,
            sending,
            receiving,
            created_at: now,
            updated_at: now,
        }
    }

    pub const KIND: SwapKind = SwapKind::Chain;

    pub fn set_status(&mut self, status: SwapStatus) {
        self.status = status;
        self.updated_at = now_secs();
    }
}

/// Lifecycle of a channel creation attached to a submarine swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCreationStatus {
    /// Channel open in flight
    Attempted,
    /// Funding transaction broadcast
    Created,
    /// Invoice paid through this channel
    Settled,
    /// Swap expired or invoice paid via another route
    Abandoned,
}

impl std::fmt::Display for ChannelCreationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Attempted => "attempted",
            Self::Created => "created",
            Self::Settled => "settled",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ChannelCreationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attempted" => Ok(Self::Attempted),
            "created" => Ok(Self::Created),
            "settled" => Ok(Self::Settled),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("unknown channel creation status: {}", s)),
        }
    }
}

/// Channel creation requested by a submarine swap
///
/// Linked to the swap by id; the swap record is resolved through the store,
/// never held here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCreation {
    /// Id of the submarine swap this belongs to
    pub swap_id: String,
    /// Public key of the node to open the channel to (hex)
    pub node_public_key: String,
    /// Whether the channel is announced
    pub private: bool,
    /// Extra inbound liquidity in percent of the invoice amount
    pub inbound_liquidity_percent: u32,
    /// Funding transaction once the open succeeded
    pub funding_txid: Option<String>,
    pub funding_vout: Option<u32>,
    pub status: ChannelCreationStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ChannelCreation {
    pub fn new(
        swap_id: String,
        node_public_key: String,
        private: bool,
        inbound_liquidity_percent: u32,
    ) -> Self {
        let now = now_secs();
        Self {
            swap_id,
            node_public_key,
            private,
            inbound_liquidity_percent,
            funding_txid: None,
            funding_vout: None,
            status: ChannelCreationStatus::Attempted,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_funding(&mut self, txid: String, vout: u32) {
        self.funding_txid = Some(txid);
        self.funding_vout = Some(vout);
        self.touch();
    }

    pub fn set_status(&mut self, status: ChannelCreationStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_secs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_swap() -> Swap {
        Swap::new(
            "BTC/BTC".to_string(),
            OrderSide::Sell,
            1_000_000,
            "lnbcrt10m1invoice".to_string(),
            "aa".repeat(32),
            "02".repeat(33),
            "03".repeat(33),
            0,
            "51".to_string(),
            "52".to_string(),
            "bcrt1p...".to_string(),
            800,
        )
    }

    #[test]
    fn test_swap_lifecycle_fields() {
        let mut swap = sample_swap();
        assert_eq!(swap.status, SwapStatus::SwapCreated);
        assert!(!swap.sufficiently_paid());
        assert!(swap.id.starts_with("swap_"));

        swap.set_lockup("txid".to_string(), 1, 1_000_000, true);
        assert!(swap.sufficiently_paid());
        assert!(swap.accepted_zero_conf);

        swap.set_lockup("txid".to_string(), 1, 999_999, false);
        assert!(!swap.sufficiently_paid());
    }

    #[test]
    fn test_channel_creation_lifecycle() {
        let mut cc = ChannelCreation::new("swap_1".to_string(), "02ab".to_string(), true, 25);
        assert_eq!(cc.status, ChannelCreationStatus::Attempted);

        cc.set_funding("ftxid".to_string(), 0);
        cc.set_status(ChannelCreationStatus::Created);
        assert_eq!(cc.funding_txid.as_deref(), Some("ftxid"));

        cc.set_status(ChannelCreationStatus::Settled);
        assert_eq!(cc.status.to_string(), "settled");
    }

    #[test]
    fn test_order_side_round_trip() {
        assert_eq!("buy".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!(OrderSide::Sell.to_string(), "sell");
        assert!("hodl".parse::<OrderSide>().is_err());
    }
}
