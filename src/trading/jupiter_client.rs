//! Jupiter swap API client
//!
//! Requests quotes and prebuilt swap transactions, and maps every upstream
//! failure onto a small set of user-facing categories.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::{parse_url, ConfigError};

/// Platform fee attached when a caller opts into fee collection
pub const PLATFORM_FEE_BPS: u16 = 50;

/// Classified quote/swap-build failure. The display text is shown to users verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    #[error("Service is busy. Please wait a moment and try again.")]
    ServiceBusy,

    #[error("This token pair is not available for swapping.")]
    PairUnavailable,

    #[error("Swap service is temporarily unavailable. Please try again later.")]
    ServiceDown,

    #[error("No quote is available for this amount.")]
    EmptyQuote,

    #[error("Failed to build swap transaction: {0}")]
    InvalidSwapTransaction(String),

    #[error("Failed to get quote: {0}")]
    Unknown(String),
}

impl QuoteError {
    /// Map a non-2xx aggregator response to its category
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            429 => QuoteError::ServiceBusy,
            404 => QuoteError::PairUnavailable,
            500..=599 => QuoteError::ServiceDown,
            _ => QuoteError::Unknown(upstream_message(status, body)),
        }
    }
}

/// Best-effort extraction of the aggregator's own error text
fn upstream_message(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for field in ["error", "message", "errorMessage"] {
            if let Some(msg) = json.get(field).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
    }

    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        body.to_string()
    }
}

/// Quote request parameters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// Mint being sold (wrapped SOL for native SOL)
    pub input_mint: String,
    /// Mint being bought
    pub output_mint: String,
    /// Raw integer amount of the input token
    pub amount: String,
    /// Slippage tolerance in basis points
    pub slippage_bps: u16,
    /// Omitted from the query when `None`
    pub platform_fee_bps: Option<u16>,
}

impl QuoteRequest {
    pub fn new(
        input_mint: impl Into<String>,
        output_mint: impl Into<String>,
        amount: impl Into<String>,
        slippage_bps: u16,
    ) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount: amount.into(),
            slippage_bps,
            platform_fee_bps: Some(PLATFORM_FEE_BPS),
        }
    }
}

/// Route step as reported by the aggregator
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanStep {
    pub swap_info: SwapInfo,
    #[serde(default)]
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    /// Pool address
    #[serde(default)]
    pub amm_key: String,
    /// Venue name, e.g. `Orca` or `Raydium`
    #[serde(default)]
    pub label: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlatformFee {
    #[serde(default)]
    fee_bps: Option<u16>,
}

/// Lenient view over the upstream quote payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuote {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
    #[serde(default)]
    route_plan: Vec<RoutePlanStep>,
    #[serde(default)]
    platform_fee: Option<RawPlatformFee>,
}

/// Normalized quote; `raw_quote_response` is passed back verbatim when building the swap
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    /// Raw input amount
    pub in_amount: String,
    /// Raw expected output amount, before slippage
    pub out_amount: String,
    /// Parsed from `priceImpactPct`; 0 when absent
    pub price_impact: f64,
    pub route_plan: Vec<RoutePlanStep>,
    /// Fee the aggregator applied, if any
    pub platform_fee_bps: Option<u16>,
    pub raw_quote_response: Value,
}

impl SwapQuote {
    pub fn from_response(raw_quote_response: Value) -> Result<Self, QuoteError> {
        let has_out_amount = raw_quote_response
            .get("outAmount")
            .and_then(Value::as_str)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_out_amount {
            return Err(QuoteError::EmptyQuote);
        }

        let raw: RawQuote = serde_json::from_value(raw_quote_response.clone())
            .map_err(|e| QuoteError::Unknown(format!("malformed quote response: {}", e)))?;

        Ok(Self {
            input_mint: raw.input_mint,
            output_mint: raw.output_mint,
            in_amount: raw.in_amount,
            out_amount: raw.out_amount,
            price_impact: raw
                .price_impact_pct
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0),
            route_plan: raw.route_plan,
            platform_fee_bps: raw.platform_fee.and_then(|f| f.fee_bps),
            raw_quote_response,
        })
    }

    /// Distinct venue labels along the route
    pub fn venues(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for step in &self.route_plan {
            if !labels.contains(&step.swap_info.label) {
                labels.push(step.swap_info.label.clone());
            }
        }
        labels
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    #[serde(default)]
    swap_transaction: Option<String>,
}

/// Source of quotes and swap transactions
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<SwapQuote, QuoteError>;

    /// Unsigned, serialized swap transaction for `user_public_key`
    async fn get_swap_transaction(
        &self,
        quote: &SwapQuote,
        user_public_key: &str,
        fee_account: Option<&str>,
    ) -> Result<Vec<u8>, QuoteError>;
}

/// Jupiter v1 swap API client
pub struct SwapQuoteService {
    client: Client,
    api_url: String,
}

impl SwapQuoteService {
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        parse_url("swap.api_url", api_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn quote_params(request: &QuoteRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("inputMint", request.input_mint.clone()),
            ("outputMint", request.output_mint.clone()),
            ("amount", request.amount.clone()),
            ("slippageBps", request.slippage_bps.to_string()),
        ];
        if let Some(fee_bps) = request.platform_fee_bps {
            params.push(("platformFeeBps", fee_bps.to_string()));
        }
        params
    }

    /// Request body for `/swap`; the platform fee is only attached with a fee account
    fn swap_body(quote: &SwapQuote, user_public_key: &str, fee_account: Option<&str>) -> Value {
        let mut body = serde_json::json!({
            "quoteResponse": quote.raw_quote_response,
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": "auto",
        });

        if let Some(fee_account) = fee_account {
            body["feeAccount"] = Value::String(fee_account.to_string());
            body["platformFeeBps"] = Value::from(PLATFORM_FEE_BPS);
        }

        body
    }
}

#[async_trait]
impl QuoteSource for SwapQuoteService {
    #[instrument(skip(self), fields(input = %request.input_mint, output = %request.output_mint))]
    async fn get_quote(&self, request: &QuoteRequest) -> Result<SwapQuote, QuoteError> {
        let url = format!("{}/swap/v1/quote", self.api_url);
        debug!(amount = %request.amount, slippage_bps = request.slippage_bps, "Requesting swap quote");

        let response = self
            .client
            .get(&url)
            .query(&Self::quote_params(request))
            .send()
            .await
            .map_err(|e| QuoteError::Unknown(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let error = QuoteError::from_status(status, &body);
            warn!(status = status.as_u16(), error = %error, "Quote request failed");
            return Err(error);
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| QuoteError::Unknown(format!("malformed quote response: {}", e)))?;
        let quote = SwapQuote::from_response(json)?;

        debug!(
            in_amount = %quote.in_amount,
            out_amount = %quote.out_amount,
            price_impact = quote.price_impact,
            route_steps = quote.route_plan.len(),
            "Quote received"
        );

        Ok(quote)
    }

    #[instrument(skip(self, quote))]
    async fn get_swap_transaction(
        &self,
        quote: &SwapQuote,
        user_public_key: &str,
        fee_account: Option<&str>,
    ) -> Result<Vec<u8>, QuoteError> {
        let url = format!("{}/swap/v1/swap", self.api_url);
        let body = Self::swap_body(quote, user_public_key, fee_account);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| QuoteError::Unknown(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let error = QuoteError::from_status(status, &text);
            warn!(status = status.as_u16(), error = %error, "Swap transaction request failed");
            return Err(error);
        }

        let swap: SwapResponse = serde_json::from_str(&text)
            .map_err(|e| QuoteError::InvalidSwapTransaction(e.to_string()))?;

        let encoded = swap
            .swap_transaction
            .filter(|tx| !tx.is_empty())
            .ok_or_else(|| QuoteError::InvalidSwapTransaction("response has no transaction".to_string()))?;

        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| QuoteError::InvalidSwapTransaction(e.to_string()))?;

        debug!(bytes = bytes.len(), "Swap transaction received");
        Ok(bytes)
    }
}
