//! swapd entry point
//!
//! Wires the chain and Lightning listeners, the stores, the state machines
//! and the API server together, resumes interrupted swaps, then runs until
//! killed.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use swapd::api::{self, AppState};
use swapd::chain::{ChainListener, EsploraClient};
use swapd::config::SwapdConfig;
use swapd::events::EventBus;
use swapd::lightning::{LightningListener, LndRestClient};
use swapd::logging::{init_logging, LogLevel};
use swapd::musig::MusigSigner;
use swapd::store::SqliteStore;
use swapd::swap::{
    ChannelNursery, NurseryConfig, ReverseConfig, ReverseManager, SubmarineConfig,
    SubmarineManager, SwapRouter,
};
use swapd::timeout::TimeoutWatcher;
use swapd::wallet::{KeyProvider, ServiceWallet};

#[derive(Parser)]
#[command(name = "swapd", version, about = "Trust-minimised submarine swap service")]
struct Cli {
    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match SwapdConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = init_logging(LogLevel::from(config.log_level.as_str()), config.log_json) {
        eprintln!("logging error: {}", err);
        std::process::exit(1);
    }

    config.log_summary();

    if cli.check_config {
        match config.validate_for_production() {
            Ok(()) => info!("configuration is production ready"),
            Err(err) => info!(error = %err, "configuration is NOT production ready"),
        }
        return;
    }

    if let Err(err) = run(config).await {
        error!(error = %err, "swapd exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: SwapdConfig) -> Result<(), Box<dyn std::error::Error>> {
    let network = config.network.bitcoin_network();

    // Storage and keys
    let store = Arc::new(SqliteStore::new(&config.db_path)?);
    let keys = Arc::new(KeyProvider::from_seed_hex(&config.master_seed, network)?);

    // Chain and Lightning plumbing
    let chain = Arc::new(EsploraClient::new(&config.esplora_url));
    let lightning = Arc::new(LndRestClient::new(
        &config.lnd_rest_url,
        &config.lnd_macaroon,
    ));
    let wallet = Arc::new(ServiceWallet::from_key_hex(
        &config.wallet_key,
        network,
        chain.clone(),
    )?);

    let (chain_tx, chain_rx) = mpsc::channel(1_024);
    let chain_listener = Arc::new(ChainListener::new(
        chain.clone(),
        chain_tx,
        Duration::from_secs(config.mempool_eviction_grace_secs),
    ));

    let (lightning_tx, lightning_rx) = mpsc::channel(1_024);
    let lightning_listener = Arc::new(LightningListener::new(lightning.clone(), lightning_tx));

    let (timeout_tx, timeout_rx) = mpsc::channel(1_024);
    let timeouts = Arc::new(TimeoutWatcher::new(timeout_tx));

    let events = Arc::new(EventBus::new(1_024));

    // State machines
    let (nursery_tx, nursery_command_rx) = mpsc::channel(256);
    let (outcome_tx, outcome_rx) = mpsc::channel(256);

    let submarine = SubmarineManager::new(
        store.clone(),
        chain.clone(),
        chain_listener.clone(),
        lightning.clone(),
        wallet.clone(),
        keys.clone(),
        events.clone(),
        timeouts.clone(),
        nursery_tx,
        SubmarineConfig {
            network,
            pairs: config.pairs.clone(),
            max_payment_attempts: config.max_payment_attempts,
            payment_timeout: Duration::from_secs(config.payment_timeout_secs),
            payment_base_retry: Duration::from_secs(5),
            cooperative_claim_timeout: Duration::from_secs(
                config.cooperative_claim_timeout_secs,
            ),
            max_fee_ratio: 0.01,
        },
    );

    let reverse = Arc::new(ReverseManager::new(
        store.clone(),
        chain.clone(),
        chain_listener.clone(),
        lightning.clone(),
        lightning_listener.clone(),
        wallet.clone(),
        keys.clone(),
        events.clone(),
        timeouts.clone(),
        ReverseConfig {
            network,
            pairs: config.pairs.clone(),
            invoice_expiry_secs: 3_600,
            prepay_miner_fee: false,
            lockup_sat_per_vbyte: 2,
        },
    ));

    let nursery = ChannelNursery::new(
        store.clone(),
        lightning.clone(),
        events.clone(),
        outcome_tx,
        NurseryConfig::default(),
    );

    let musig = Arc::new(MusigSigner::new(
        store.clone(),
        lightning.clone(),
        keys.clone(),
        events.clone(),
    ));

    // Resume everything that was in flight before the restart
    submarine.resume().await?;
    reverse.resume().await?;
    nursery.retry_opening_channels().await?;
    nursery.settle_created_channels().await?;
    info!("restart recovery complete");

    // Background tasks
    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    {
        let chain_listener = chain_listener.clone();
        tokio::spawn(async move { chain_listener.run(poll_interval).await });
    }
    {
        let lightning_listener = lightning_listener.clone();
        tokio::spawn(async move { lightning_listener.run(poll_interval).await });
    }
    {
        let timeouts = timeouts.clone();
        tokio::spawn(async move { timeouts.run(Duration::from_secs(1)).await });
    }
    {
        let nursery = nursery.clone();
        tokio::spawn(async move { nursery.run(nursery_command_rx).await });
    }

    let router = SwapRouter {
        submarine: submarine.clone(),
        reverse: reverse.clone(),
        nursery: nursery.clone(),
        timeouts: timeouts.clone(),
    };
    tokio::spawn(async move {
        router
            .run(chain_rx, lightning_rx, timeout_rx, outcome_rx)
            .await
    });

    // API server runs in the foreground
    let state = Arc::new(AppState {
        submarine,
        reverse,
        musig,
        store,
        chain,
        events,
        pairs: config.pairs.clone(),
    });
    api::start_server(state, config.api_port).await?;

    Ok(())
}
