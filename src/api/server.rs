//! REST API
//!
//! Endpoints:
//! - `POST /swap/submarine` - create a submarine swap
//! - `GET  /swap/submarine` - pair matrix
//! - `GET  /swap/{id}` - status snapshot
//! - `GET  /swap/submarine/{id}/transaction` - lockup transaction
//! - `POST /swap/submarine/{id}/claim` - cooperative claim cooperation
//! - `POST /swap/submarine/refund` - cooperative refund partial signature
//! - `POST /swap/reverse` - create a reverse swap
//! - `POST /swap/reverse/claim` - cooperative claim partial signature
//! - `GET  /health`

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::chain::ChainBackend;
use crate::error::ApiError;
use crate::events::EventBus;
use crate::htlc::SwapTree;
use crate::musig::MusigSigner;
use crate::store::{ChainSwapStore as _, ReverseStore as _, Store, SubmarineStore as _};
use crate::swap::reverse::CreateReverseRequest;
use crate::swap::submarine::{ChannelRequest, CreateSubmarineRequest};
use crate::swap::{ReverseManager, SubmarineManager};
use crate::types::pair::Pair;
use crate::types::swap::OrderSide;

/// Shared handler state
pub struct AppState {
    pub submarine: Arc<SubmarineManager>,
    pub reverse: Arc<ReverseManager>,
    pub musig: Arc<MusigSigner>,
    pub store: Arc<dyn Store>,
    pub chain: Arc<dyn ChainBackend>,
    pub events: Arc<EventBus>,
    pub pairs: Vec<Pair>,
}

pub type SharedState = Arc<AppState>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body())).into_response()
    }
}

impl AppState {
    fn resolve_pair(&self, from: &str, to: &str) -> Result<(Pair, OrderSide), ApiError> {
        self.pairs
            .iter()
            .find(|p| {
                (p.base == from && p.quote == to) || (p.base == to && p.quote == from)
            })
            .map(|p| {
                let side = if from == p.base {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                };
                (p.clone(), side)
            })
            .ok_or_else(|| {
                ApiError::bad_request("SWAP.4", format!("unsupported pair {}/{}", from, to))
            })
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmarineBody {
    pub from: String,
    pub to: String,
    pub invoice: String,
    pub refund_public_key: String,
    #[serde(default)]
    pub channel: Option<ChannelBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBody {
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_inbound_liquidity")]
    pub inbound_liquidity: u32,
}

fn default_inbound_liquidity() -> u32 {
    25
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmarineResponse {
    pub id: String,
    pub bip21: String,
    pub address: String,
    pub swap_tree: SwapTree,
    pub claim_public_key: String,
    pub timeout_block_height: u32,
    pub accept_zero_conf: bool,
    pub expected_amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReverseBody {
    pub from: String,
    pub to: String,
    pub preimage_hash: String,
    pub claim_public_key: String,
    #[serde(default)]
    pub invoice_amount: Option<u64>,
    #[serde(default)]
    pub onchain_amount: Option<u64>,
    /// Hex-encoded 32-byte description hash
    #[serde(default)]
    pub description_hash: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub address_signature: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReverseResponse {
    pub id: String,
    pub invoice: String,
    pub swap_tree: SwapTree,
    pub lockup_address: String,
    pub refund_public_key: String,
    pub timeout_block_height: u32,
    pub onchain_amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bip21: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSignatureBody {
    pub id: String,
    pub pub_nonce: String,
    pub transaction: String,
    pub index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseClaimBody {
    pub id: String,
    pub preimage: String,
    pub pub_nonce: String,
    pub transaction: String,
    pub index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarineClaimBody {
    pub pub_nonce: String,
    pub partial_signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransactionResponse {
    pub id: String,
    pub hex: String,
    pub timeout_block_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_eta: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub fee_percentage: f64,
    pub limits: PairLimits,
    pub timeout_deltas: crate::types::pair::TimeoutDeltas,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairLimits {
    pub minimal: u64,
    pub maximal: u64,
    pub maximal_zero_conf: u64,
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "swapd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_get_pairs(State(state): State<SharedState>) -> impl IntoResponse {
    let pairs: HashMap<String, PairInfo> = state
        .pairs
        .iter()
        .map(|p| {
            (
                p.id(),
                PairInfo {
                    fee_percentage: p.fee_percentage,
                    limits: PairLimits {
                        minimal: p.min_amount,
                        maximal: p.max_amount,
                        maximal_zero_conf: p.max_zero_conf_amount,
                    },
                    timeout_deltas: p.timeout_deltas,
                },
            )
        })
        .collect();

    Json(serde_json::json!({ "pairs": pairs }))
}

async fn handle_create_submarine(
    State(state): State<SharedState>,
    Json(body): Json<CreateSubmarineBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (pair, order_side) = state.resolve_pair(&body.from, &body.to)?;

    let created = state
        .submarine
        .create(CreateSubmarineRequest {
            pair: pair.clone(),
            order_side,
            invoice: body.invoice,
            refund_public_key: body.refund_public_key,
            channel: body.channel.map(|c| ChannelRequest {
                private: c.private,
                inbound_liquidity_percent: c.inbound_liquidity,
            }),
        })
        .await?;

    let response = CreateSubmarineResponse {
        id: created.swap.id.clone(),
        bip21: created.bip21,
        address: created.swap.lockup_address.clone(),
        swap_tree: created.swap_tree,
        claim_public_key: created.swap.claim_public_key.clone(),
        timeout_block_height: created.swap.timeout_block_height,
        accept_zero_conf: pair.allows_zero_conf(created.swap.expected_amount),
        expected_amount: created.swap.expected_amount,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

async fn handle_create_reverse(
    State(state): State<SharedState>,
    Json(body): Json<CreateReverseBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (pair, order_side) = state.resolve_pair(&body.from, &body.to)?;

    let description_hash = body
        .description_hash
        .map(|h| {
            hex::decode(&h)
                .map_err(|_| ApiError::bad_request("HINTS.2", "description hash is not hex"))
        })
        .transpose()?;

    let created = state
        .reverse
        .create(CreateReverseRequest {
            pair,
            order_side,
            preimage_hash: body.preimage_hash,
            claim_public_key: body.claim_public_key,
            invoice_amount: body.invoice_amount,
            onchain_amount: body.onchain_amount,
            description_hash,
            refund_address: body.address,
            address_signature: body.address_signature,
        })
        .await?;

    let response = CreateReverseResponse {
        id: created.swap.id.clone(),
        invoice: created.swap.invoice.clone().unwrap_or_default(),
        swap_tree: created.swap_tree,
        lockup_address: created.swap.lockup_address.clone(),
        refund_public_key: created.swap.refund_public_key.clone(),
        timeout_block_height: created.swap.timeout_block_height,
        onchain_amount: created.swap.onchain_amount,
        bip21: created.bip21,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

async fn handle_get_swap(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(swap) = state.store.get_swap(&id).await? {
        return Ok(Json(StatusResponse {
            status: swap.status.to_string(),
            transaction_id: swap.lockup_txid,
            failure_reason: swap.failure_reason,
        }));
    }

    if let Some(swap) = state.store.get_reverse(&id).await? {
        return Ok(Json(StatusResponse {
            status: swap.status.to_string(),
            transaction_id: swap.lockup_txid,
            failure_reason: swap.failure_reason,
        }));
    }

    if let Some(swap) = state.store.get_chain_swap(&id).await? {
        return Ok(Json(StatusResponse {
            status: swap.status.to_string(),
            transaction_id: swap.sending.lockup_txid,
            failure_reason: None,
        }));
    }

    Err(ApiError::not_found(format!("swap {} not found", id)))
}

async fn handle_get_swap_transaction(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let swap = state
        .store
        .get_swap(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("swap {} not found", id)))?;

    let txid = swap
        .lockup_txid
        .ok_or_else(|| ApiError::not_found(format!("swap {} has no lockup", id)))?;

    let hex = state
        .chain
        .tx_hex(&txid)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;

    let timeout_eta = match state.chain.tip_height().await {
        Ok(tip) if (swap.timeout_block_height as u64) > tip => {
            Some((swap.timeout_block_height as u64 - tip) * 600)
        }
        _ => None,
    };

    Ok(Json(SwapTransactionResponse {
        id,
        hex,
        timeout_block_height: swap.timeout_block_height,
        timeout_eta,
    }))
}

async fn handle_submarine_refund(
    State(state): State<SharedState>,
    Json(body): Json<RefundSignatureBody>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .musig
        .sign_swap_refund(&body.id, &body.pub_nonce, &body.transaction, body.index)
        .await?;
    Ok(Json(response))
}

async fn handle_submarine_claim(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<SubmarineClaimBody>,
) -> Result<impl IntoResponse, ApiError> {
    let txid = state
        .submarine
        .cooperative_claim(&id, &body.pub_nonce, &body.partial_signature)
        .await?;
    Ok(Json(serde_json::json!({ "transactionId": txid })))
}

async fn handle_reverse_claim(
    State(state): State<SharedState>,
    Json(body): Json<ReverseClaimBody>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .musig
        .sign_reverse_swap_claim(
            &body.id,
            &body.preimage,
            &body.pub_nonce,
            &body.transaction,
            body.index,
        )
        .await?;
    Ok(Json(response))
}

// =============================================================================
// Router
// =============================================================================

pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/swap/submarine",
            get(handle_get_pairs).post(handle_create_submarine),
        )
        .route("/swap/submarine/refund", post(handle_submarine_refund))
        .route(
            "/swap/submarine/:id/transaction",
            get(handle_get_swap_transaction),
        )
        .route("/swap/submarine/:id/claim", post(handle_submarine_claim))
        .route("/swap/reverse", post(handle_create_reverse))
        .route("/swap/reverse/claim", post(handle_reverse_claim))
        .route("/swap/:id", get(handle_get_swap))
        .route("/ws/swaps", get(super::ws::ws_all_swaps_handler))
        .route("/ws/swaps/:id", get(super::ws::ws_swap_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: SharedState, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(address = %addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
