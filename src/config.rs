//! Environment-based Configuration
//!
//! Loads the service configuration from environment variables. Sensitive
//! values (keys) MUST come from the environment, never from hardcoded
//! defaults outside of regtest.
//!
//! # Environment Variables
//!
//! ## Network
//! - `SWAPD_NETWORK` - "mainnet", "testnet", or "regtest" (default: "regtest")
//! - `SWAPD_ESPLORA_URL` - Esplora-compatible chain API endpoint
//! - `SWAPD_LND_REST_URL` - LND-style REST endpoint of the Lightning node
//! - `SWAPD_LND_MACAROON` - Hex-encoded admin macaroon for the REST endpoint
//!
//! ## Keys
//! - `SWAPD_MASTER_SEED` - Hex-encoded BIP32 master seed for claim/refund keys
//! - `SWAPD_WALLET_KEY` - Hex-encoded key of the onchain service wallet
//!
//! ## Service
//! - `SWAPD_DB_PATH` - Path to the SQLite database file
//! - `SWAPD_API_PORT` - REST API port (default: 9001)
//! - `SWAPD_POLL_INTERVAL_SECS` - Chain/Lightning poll interval
//! - `SWAPD_LOG_LEVEL` - Logging level (trace, debug, info, warn, error)
//! - `SWAPD_LOG_JSON` - Set to "1" for JSON log output

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::types::pair::Pair;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("network mismatch: expected {0}, got {1}")]
    NetworkMismatch(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "SWAPD_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Default Esplora endpoint for this network
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Regtest => "http://127.0.0.1:3002",
        }
    }

    /// The rust-bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct SwapdConfig {
    /// Network environment
    pub network: Network,

    /// Esplora-compatible chain API endpoint
    pub esplora_url: String,

    /// Lightning node REST endpoint
    pub lnd_rest_url: String,

    /// Hex-encoded macaroon for the Lightning REST endpoint
    pub lnd_macaroon: String,

    /// Hex-encoded BIP32 master seed for swap keypairs
    pub master_seed: String,

    /// Hex-encoded key of the onchain service wallet
    pub wallet_key: String,

    /// SQLite database path
    pub db_path: String,

    /// REST API port
    pub api_port: u16,

    /// Chain/Lightning poll interval in seconds
    pub poll_interval_secs: u64,

    /// Seconds to wait for a cooperative claim before falling back to the
    /// script-spend path
    pub cooperative_claim_timeout_secs: u64,

    /// Grace period before a vanished mempool lockup counts as evicted
    pub mempool_eviction_grace_secs: u64,

    /// Maximum Lightning payment attempts for a submarine swap
    pub max_payment_attempts: u32,

    /// Overall Lightning payment deadline in seconds
    pub payment_timeout_secs: u64,

    /// Configured trading pairs
    pub pairs: Vec<Pair>,

    /// Log level
    pub log_level: String,

    /// JSON log output
    pub log_json: bool,
}

impl SwapdConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("SWAPD_NETWORK")
            .unwrap_or_else(|_| "regtest".to_string())
            .parse()?;

        let esplora_url = env::var("SWAPD_ESPLORA_URL")
            .unwrap_or_else(|_| network.default_esplora_url().to_string());

        let lnd_rest_url = env::var("SWAPD_LND_REST_URL")
            .unwrap_or_else(|_| "https://127.0.0.1:8080".to_string());
        let lnd_macaroon = env::var("SWAPD_LND_MACAROON").unwrap_or_default();

        let master_seed = required_or_regtest_default(
            "SWAPD_MASTER_SEED",
            "73776170645f726567746573745f6d61737465725f73656564",
            network,
        )?;
        let wallet_key = required_or_regtest_default(
            "SWAPD_WALLET_KEY",
            "0000000000000000000000000000000000000000000000000000000000000001",
            network,
        )?;

        let db_path = env::var("SWAPD_DB_PATH").unwrap_or_else(|_| "data/swapd.db".to_string());

        let api_port = parse_env("SWAPD_API_PORT", 9001)?;
        let poll_interval_secs = parse_env("SWAPD_POLL_INTERVAL_SECS", 10)?;
        let cooperative_claim_timeout_secs =
            parse_env("SWAPD_COOPERATIVE_CLAIM_TIMEOUT_SECS", 120)?;
        let mempool_eviction_grace_secs = parse_env("SWAPD_MEMPOOL_EVICTION_GRACE_SECS", 300)?;
        let max_payment_attempts = parse_env("SWAPD_MAX_PAYMENT_ATTEMPTS", 4)?;
        let payment_timeout_secs = parse_env("SWAPD_PAYMENT_TIMEOUT_SECS", 900)?;

        let log_level = env::var("SWAPD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("SWAPD_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            network,
            esplora_url,
            lnd_rest_url,
            lnd_macaroon,
            master_seed,
            wallet_key,
            db_path,
            api_port,
            poll_interval_secs,
            cooperative_claim_timeout_secs,
            mempool_eviction_grace_secs,
            max_payment_attempts,
            payment_timeout_secs,
            pairs: vec![Pair::btc_btc(network)],
            log_level,
            log_json,
        })
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network != Network::Mainnet {
            return Err(ConfigError::NetworkMismatch(
                "mainnet".to_string(),
                format!("{:?}", self.network),
            ));
        }

        if self.lnd_macaroon.is_empty() {
            return Err(ConfigError::MissingEnvVar("SWAPD_LND_MACAROON".to_string()));
        }

        Ok(())
    }

    /// Look up a configured pair by its symbols
    pub fn pair(&self, base: &str, quote: &str) -> Option<&Pair> {
        self.pairs
            .iter()
            .find(|p| p.base == base && p.quote == quote)
    }

    /// Log a configuration summary, hiding sensitive values
    pub fn log_summary(&self) {
        tracing::info!(
            network = ?self.network,
            esplora = %self.esplora_url,
            lightning = %self.lnd_rest_url,
            db = %self.db_path,
            api_port = self.api_port,
            pairs = self.pairs.len(),
            "loaded configuration"
        );
    }
}

/// Get a required env var, or use the default for regtest only
fn required_or_regtest_default(
    var_name: &str,
    regtest_default: &str,
    network: Network,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => {
            if network == Network::Regtest {
                Ok(regtest_default.to_string())
            } else {
                Err(ConfigError::MissingEnvVar(var_name.to_string()))
            }
        }
    }
}

fn parse_env<T: FromStr + Copy>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var_name.to_string(), value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert!(matches!("mainnet".parse::<Network>(), Ok(Network::Mainnet)));
        assert!(matches!("testnet".parse::<Network>(), Ok(Network::Testnet)));
        assert!(matches!("regtest".parse::<Network>(), Ok(Network::Regtest)));
        assert!("invalid".parse::<Network>().is_err());
    }

    #[test]
    fn test_bitcoin_network_mapping() {
        assert_eq!(Network::Mainnet.bitcoin_network(), bitcoin::Network::Bitcoin);
        assert_eq!(Network::Regtest.bitcoin_network(), bitcoin::Network::Regtest);
    }
}
