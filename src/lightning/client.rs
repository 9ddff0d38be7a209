//! Lightning Client
//!
//! `LightningClient` is the capability interface the swap core consumes.
//! `LndRestClient` implements it over an LND-style REST API; node state is
//! polled, never streamed, so a flaky connection degrades to latency.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::types::{
    Channel, ChannelPoint, DecodedInvoice, HoldInvoiceRequest, InvoiceState, NodeInfo,
    OpenChannelRequest, PaymentResult, Peer,
};

/// Payment failure reasons that no amount of retrying will fix
const TERMINAL_PAYMENT_ERRORS: [&str; 4] = [
    "no_route",
    "unable to find a path",
    "invoice expired",
    "incorrect_payment_details",
];

/// Lightning access errors
#[derive(Debug, Error)]
pub enum LightningError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node error: {0}")]
    Api(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl LightningError {
    /// Whether this error marks the payment unpayable rather than the
    /// attempt unlucky
    pub fn is_terminal_payment_failure(&self) -> bool {
        match self {
            LightningError::PaymentFailed(reason) => {
                let reason = reason.to_lowercase();
                TERMINAL_PAYMENT_ERRORS
                    .iter()
                    .any(|needle| reason.contains(needle))
            }
            _ => false,
        }
    }
}

/// What the swap core needs from a Lightning node
#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn get_info(&self) -> Result<NodeInfo, LightningError>;

    /// Create a hold invoice, returning the payment request
    async fn add_hold_invoice(&self, req: HoldInvoiceRequest) -> Result<String, LightningError>;

    async fn settle_hold_invoice(&self, preimage: &[u8; 32]) -> Result<(), LightningError>;

    async fn cancel_hold_invoice(&self, preimage_hash: &[u8; 32]) -> Result<(), LightningError>;

    /// Current state of an invoice by its payment hash
    async fn lookup_invoice(&self, preimage_hash: &[u8; 32])
        -> Result<InvoiceState, LightningError>;

    /// Pay an invoice, blocking until settlement or failure
    async fn pay_invoice(
        &self,
        invoice: &str,
        max_fee_ratio: f64,
        outgoing_channel_id: Option<u64>,
    ) -> Result<PaymentResult, LightningError>;

    /// Whether an outgoing HTLC for this payment hash is still in flight
    async fn has_pending_payment(
        &self,
        preimage_hash: &[u8; 32],
    ) -> Result<bool, LightningError>;

    /// Decode a BOLT11 invoice or BOLT12 offer/invoice via the node
    async fn decode(&self, invoice: &str) -> Result<DecodedInvoice, LightningError>;

    async fn connect_peer(
        &self,
        public_key: &str,
        address_hints: &[String],
    ) -> Result<(), LightningError>;

    async fn open_channel(&self, req: OpenChannelRequest)
        -> Result<ChannelPoint, LightningError>;

    async fn list_peers(&self) -> Result<Vec<Peer>, LightningError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, LightningError>;
}

/// LND-style REST client
pub struct LndRestClient {
    client: Client,
    base_url: String,
    macaroon: String,
}

#[derive(Deserialize)]
struct AddHoldInvoiceResponse {
    payment_request: String,
}

#[derive(Deserialize)]
struct LookupInvoiceResponse {
    state: String,
}

#[derive(Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: String,
    #[serde(default)]
    payment_preimage: String,
    #[serde(default)]
    payment_route: Option<PaymentRoute>,
}

#[derive(Deserialize)]
struct PaymentRoute {
    #[serde(default)]
    total_fees_msat: String,
}

#[derive(Deserialize)]
struct PayReqResponse {
    #[serde(default)]
    destination: String,
    payment_hash: String,
    #[serde(default)]
    num_msat: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    description_hash: String,
    #[serde(default)]
    cltv_expiry: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    expiry: String,
}

#[derive(Deserialize)]
struct OpenChannelResponse {
    funding_txid_bytes: String,
    #[serde(default)]
    output_index: u32,
}

#[derive(Deserialize)]
struct ListPeersResponse {
    #[serde(default)]
    peers: Vec<Peer>,
}

#[derive(Deserialize)]
struct ListChannelsResponse {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct ListPaymentsResponse {
    #[serde(default)]
    payments: Vec<PaymentEntry>,
}

#[derive(Deserialize)]
struct PaymentEntry {
    #[serde(default)]
    payment_hash: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct LndErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

impl LndRestClient {
    pub fn new(base_url: &str, macaroon_hex: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            macaroon: macaroon_hex.to_string(),
        }
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LightningError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Grpc-Metadata-macaroon", &self.macaroon)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, LightningError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Grpc-Metadata-macaroon", &self.macaroon)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, LightningError> {
        if resp.status().is_success() {
            return Ok(resp.json().await?);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<LndErrorResponse>(&text)
            .map(|e| if e.error.is_empty() { e.message } else { e.error })
            .unwrap_or(text);
        Err(LightningError::Api(message))
    }
}

#[async_trait]
impl LightningClient for LndRestClient {
    async fn get_info(&self) -> Result<NodeInfo, LightningError> {
        self.get("/v1/getinfo").await
    }

    async fn add_hold_invoice(&self, req: HoldInvoiceRequest) -> Result<String, LightningError> {
        let route_hints: Vec<serde_json::Value> = req
            .routing_hints
            .iter()
            .map(|hop| {
                json!({
                    "hop_hints": [{
                        "node_id": hop.node_id,
                        "chan_id": hop.chan_id.to_string(),
                        "fee_base_msat": hop.fee_base_msat,
                        "fee_proportional_millionths": hop.fee_proportional_millionths,
                        "cltv_expiry_delta": hop.cltv_expiry_delta,
                    }]
                })
            })
            .collect();

        let mut body = json!({
            "hash": Self::b64(&req.preimage_hash),
            "value": req.amount_sat.to_string(),
            "memo": req.memo,
            "expiry": req.expiry_secs.to_string(),
            "route_hints": route_hints,
        });
        if let Some(hash) = req.description_hash {
            body["description_hash"] = json!(Self::b64(&hash));
        }

        let resp: AddHoldInvoiceResponse = self.post("/v2/invoices/hodl", body).await?;
        Ok(resp.payment_request)
    }

    async fn settle_hold_invoice(&self, preimage: &[u8; 32]) -> Result<(), LightningError> {
        let _: serde_json::Value = self
            .post(
                "/v2/invoices/settle",
                json!({ "preimage": Self::b64(preimage) }),
            )
            .await?;
        Ok(())
    }

    async fn cancel_hold_invoice(&self, preimage_hash: &[u8; 32]) -> Result<(), LightningError> {
        let _: serde_json::Value = self
            .post(
                "/v2/invoices/cancel",
                json!({ "payment_hash": Self::b64(preimage_hash) }),
            )
            .await?;
        Ok(())
    }

    async fn lookup_invoice(
        &self,
        preimage_hash: &[u8; 32],
    ) -> Result<InvoiceState, LightningError> {
        let resp: LookupInvoiceResponse = self
            .get(&format!("/v1/invoice/{}", hex::encode(preimage_hash)))
            .await
            .map_err(|err| match err {
                LightningError::Api(msg) if msg.contains("unable to locate") => {
                    LightningError::InvoiceNotFound(hex::encode(preimage_hash))
                }
                other => other,
            })?;

        Ok(match resp.state.as_str() {
            "ACCEPTED" => InvoiceState::Accepted,
            "SETTLED" => InvoiceState::Settled,
            "CANCELED" => InvoiceState::Cancelled,
            _ => InvoiceState::Open,
        })
    }

    async fn pay_invoice(
        &self,
        invoice: &str,
        max_fee_ratio: f64,
        outgoing_channel_id: Option<u64>,
    ) -> Result<PaymentResult, LightningError> {
        let decoded = self.decode(invoice).await?;
        let fee_limit_msat = decoded
            .amount_msat
            .map(|amount| (amount as f64 * max_fee_ratio) as u64)
            .unwrap_or(0);

        let mut body = json!({
            "payment_request": invoice,
            "fee_limit": { "fixed_msat": fee_limit_msat.to_string() },
        });
        if let Some(chan_id) = outgoing_channel_id {
            body["outgoing_chan_id"] = json!(chan_id.to_string());
        }

        let resp: SendPaymentResponse = self.post("/v1/channels/transactions", body).await?;

        if !resp.payment_error.is_empty() {
            return Err(LightningError::PaymentFailed(resp.payment_error));
        }

        let preimage_bytes = base64::engine::general_purpose::STANDARD
            .decode(&resp.payment_preimage)
            .map_err(|e| LightningError::Decode(format!("invalid preimage: {}", e)))?;

        Ok(PaymentResult {
            preimage: hex::encode(preimage_bytes),
            fee_msat: resp
                .payment_route
                .and_then(|r| r.total_fees_msat.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn has_pending_payment(
        &self,
        preimage_hash: &[u8; 32],
    ) -> Result<bool, LightningError> {
        let resp: ListPaymentsResponse = self
            .get("/v1/payments?include_incomplete=true&reversed=true&max_payments=250")
            .await?;

        let hash_hex = hex::encode(preimage_hash);
        Ok(resp
            .payments
            .iter()
            .any(|p| p.payment_hash == hash_hex && p.status == "IN_FLIGHT"))
    }

    async fn decode(&self, invoice: &str) -> Result<DecodedInvoice, LightningError> {
        let resp: PayReqResponse = self.get(&format!("/v1/payreq/{}", invoice)).await?;

        let timestamp: u64 = resp.timestamp.parse().unwrap_or(0);
        let expiry: u64 = resp.expiry.parse().unwrap_or(0);

        Ok(DecodedInvoice {
            // The node reports BOLT12 requests without a legacy description
            // hash field; the invoice helpers decide the flavour upfront
            bolt12: false,
            amount_msat: resp.num_msat.parse().ok().filter(|&n: &u64| n > 0),
            payment_hash: resp.payment_hash,
            description: (!resp.description.is_empty()).then_some(resp.description),
            description_hash: (!resp.description_hash.is_empty()).then_some(resp.description_hash),
            payee: (!resp.destination.is_empty()).then_some(resp.destination),
            min_final_cltv_expiry: resp.cltv_expiry.parse().unwrap_or(0),
            expires_at: (timestamp > 0).then_some(timestamp + expiry),
        })
    }

    async fn connect_peer(
        &self,
        public_key: &str,
        address_hints: &[String],
    ) -> Result<(), LightningError> {
        let mut last_err = LightningError::Api("no address hints supplied".to_string());

        for host in address_hints {
            let body = json!({
                "addr": { "pubkey": public_key, "host": host },
                "perm": false,
            });
            match self.post::<serde_json::Value>("/v1/peers", body).await {
                Ok(_) => return Ok(()),
                Err(LightningError::Api(msg)) if msg.contains("already connected") => {
                    return Ok(())
                }
                Err(err) => last_err = err,
            }
        }

        Err(last_err)
    }

    async fn open_channel(
        &self,
        req: OpenChannelRequest,
    ) -> Result<ChannelPoint, LightningError> {
        let pubkey_bytes = hex::decode(&req.public_key)
            .map_err(|e| LightningError::Decode(format!("invalid node key: {}", e)))?;

        let body = json!({
            "node_pubkey": Self::b64(&pubkey_bytes),
            "local_funding_amount": req.local_funding_amount.to_string(),
            "private": req.private,
            "sat_per_vbyte": req.sat_per_vbyte.to_string(),
        });

        let resp: OpenChannelResponse = self.post("/v1/channels", body).await?;
        ChannelPoint::from_funding_bytes(&resp.funding_txid_bytes, resp.output_index)
            .map_err(LightningError::Decode)
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, LightningError> {
        let resp: ListPeersResponse = self.get("/v1/peers").await?;
        Ok(resp.peers)
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, LightningError> {
        let resp: ListChannelsResponse = self.get("/v1/channels").await?;
        Ok(resp.channels)
    }
}
