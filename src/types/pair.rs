//! Trading Pairs
//!
//! A pair describes the two currencies of a swap together with its fee
//! policy, amount limits, zero-conf ceiling and per-swap-type timeout
//! deltas (in blocks of the onchain side).

use serde::{Deserialize, Serialize};

use crate::config::Network;

/// Timeout deltas in blocks, per swap type
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutDeltas {
    pub submarine: u32,
    pub reverse: u32,
    pub chain: u32,
}

/// A configured trading pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    /// Base currency symbol (the onchain side of a submarine swap)
    pub base: String,
    /// Quote currency symbol
    pub quote: String,
    /// Service fee in percent of the swap amount
    pub fee_percentage: f64,
    /// Minimal swap amount in satoshis
    pub min_amount: u64,
    /// Maximal swap amount in satoshis
    pub max_amount: u64,
    /// Largest lockup accepted without a confirmation
    pub max_zero_conf_amount: u64,
    /// Minimal accepted lockup feerate in sat/vB for zero-conf
    pub min_zero_conf_feerate: f64,
    /// Timeout deltas in blocks
    pub timeout_deltas: TimeoutDeltas,
}

impl Pair {
    /// The BTC/BTC pair with network-dependent defaults
    pub fn btc_btc(network: Network) -> Self {
        let (min_amount, max_amount) = match network {
            Network::Mainnet => (50_000, 10_000_000),
            _ => (10_000, 100_000_000),
        };

        Self {
            base: "BTC".to_string(),
            quote: "BTC".to_string(),
            fee_percentage: 0.5,
            min_amount,
            max_amount,
            max_zero_conf_amount: 1_000_000,
            min_zero_conf_feerate: 2.0,
            timeout_deltas: TimeoutDeltas {
                submarine: 1_008,
                reverse: 144,
                chain: 288,
            },
        }
    }

    /// Pair identifier, e.g. "BTC/BTC"
    pub fn id(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Service fee for the given amount, rounded down
    pub fn fee_for(&self, amount_sat: u64) -> u64 {
        ((amount_sat as u128) * ((self.fee_percentage * 100.0) as u128) / 10_000) as u64
    }

    /// Whether the amount is within the configured limits
    pub fn amount_in_limits(&self, amount_sat: u64) -> bool {
        amount_sat >= self.min_amount && amount_sat <= self.max_amount
    }

    /// Whether a lockup of this size may be accepted unconfirmed at all
    pub fn allows_zero_conf(&self, amount_sat: u64) -> bool {
        self.max_zero_conf_amount > 0 && amount_sat <= self.max_zero_conf_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_id() {
        let pair = Pair::btc_btc(Network::Regtest);
        assert_eq!(pair.id(), "BTC/BTC");
    }

    #[test]
    fn test_fee_calculation() {
        let pair = Pair::btc_btc(Network::Regtest);
        // 0.5% of 1_000_000
        assert_eq!(pair.fee_for(1_000_000), 5_000);
        assert_eq!(pair.fee_for(0), 0);
    }

    #[test]
    fn test_limits() {
        let pair = Pair::btc_btc(Network::Regtest);
        assert!(pair.amount_in_limits(pair.min_amount));
        assert!(pair.amount_in_limits(pair.max_amount));
        assert!(!pair.amount_in_limits(pair.min_amount - 1));
        assert!(!pair.amount_in_limits(pair.max_amount + 1));
    }

    #[test]
    fn test_zero_conf_ceiling() {
        let pair = Pair::btc_btc(Network::Regtest);
        assert!(pair.allows_zero_conf(1_000_000));
        assert!(!pair.allows_zero_conf(1_000_001));
    }
}
