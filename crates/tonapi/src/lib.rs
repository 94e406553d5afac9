//! TonAPI v2 client for Rust
//!
//! A typed, async interface to the subset of the TonAPI REST API used by
//! tonproxy: accounts, rates, jettons, NFTs, events and address parsing.
//!
//! # Example
//!
//! ```no_run
//! use tonapi::{ClientConfig, EventsQuery, TonApi};
//!
//! # async fn run() -> tonapi::Result<()> {
//! let api = TonApi::new(ClientConfig::default())?;
//!
//! // Latest 100 events of an account
//! let page = api
//!     .account_events("EQBvW8Z5huBkMJYdnfAEM5JqTNkuWX3diqYENkWsIL0XggGG", &EventsQuery::new(100))
//!     .await?;
//! println!("{} events, next_from={}", page.events.len(), page.next_from);
//!
//! // Price of one TON in USD
//! let price = api.ton_price_usd().await?;
//! println!("TON = ${price}");
//! # Ok(())
//! # }
//! ```

use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default public endpoint
pub const DEFAULT_BASE_URL: &str = "https://tonapi.io/v2";

/// Errors that can occur when talking to TonAPI
#[derive(Error, Debug)]
pub enum Error {
    #[error("TonAPI rate limit exceeded")]
    RateLimited,

    #[error("Address could not be decoded: {0}")]
    AddressNotFound(String),

    #[error("TonAPI error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected TonAPI payload: {0}")]
    Decode(String),

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True for throttling responses, which callers may retry later
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited)
    }
}

/// Result type for TonAPI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL including the version prefix, e.g. `https://tonapi.io/v2`
    pub base_url: String,

    /// Bearer token sent with every request
    pub api_key: Option<String>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Account as returned by `/accounts/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Raw address (`0:<hex>`)
    pub address: String,
    /// Balance in nanotons
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_wallet: bool,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub last_activity: Option<i64>,
}

impl Account {
    /// Whether the account implements a given contract interface
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }
}

/// Encoded forms of an address (`/address/{id}/parse`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub raw_form: String,
    pub bounceable: EncodedAddress,
    pub non_bounceable: EncodedAddress,
    #[serde(default)]
    pub given_type: Option<String>,
    #[serde(default)]
    pub test_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedAddress {
    pub b64: String,
    pub b64url: String,
}

/// `/rates` response
#[derive(Debug, Clone, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, TokenRates>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenRates {
    #[serde(default)]
    prices: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct JettonBalances {
    balances: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct NftItems {
    nft_items: Vec<serde_json::Value>,
}

/// Jetton master info (`/jettons/{id}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JettonInfo {
    #[serde(default)]
    pub mintable: bool,
    #[serde(default)]
    pub total_supply: String,
    #[serde(default)]
    pub holders_count: u64,
    #[serde(default)]
    pub verification: Option<String>,
    pub metadata: JettonMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JettonMetadata {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// NFT item (`/nfts/{id}` and entries of `/accounts/{id}/nfts`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NftItem {
    pub address: String,
    #[serde(default)]
    pub owner: Option<AccountRef>,
    #[serde(default)]
    pub collection: Option<CollectionRef>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub previews: Vec<ImagePreview>,
    #[serde(default)]
    pub approved_by: Vec<String>,
}

impl NftItem {
    /// Preview URL at the given resolution index, if the upstream provided one
    pub fn preview_url(&self, index: usize) -> Option<&str> {
        self.previews.get(index).map(|p| p.url.as_str())
    }

    /// A string field of the free-form metadata object
    pub fn metadata_str(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRef {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_scam: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRef {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePreview {
    pub resolution: String,
    pub url: String,
}

/// One page of account history (`/accounts/{id}/events`)
#[derive(Debug, Clone, Deserialize)]
pub struct AccountEvents {
    pub events: Vec<serde_json::Value>,
    /// Logical time to pass as `before_lt` for the next page; 0 when exhausted
    #[serde(default)]
    pub next_from: i64,
}

/// Query parameters for `/accounts/{id}/events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsQuery {
    pub limit: u32,
    pub before_lt: Option<i64>,
    pub initiator: Option<bool>,
}

impl EventsQuery {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            before_lt: None,
            initiator: None,
        }
    }

    /// Only events older than the given logical time
    pub fn before(mut self, lt: i64) -> Self {
        self.before_lt = Some(lt);
        self
    }

    pub fn initiator(mut self, initiator: bool) -> Self {
        self.initiator = Some(initiator);
        self
    }

    fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("limit", self.limit.to_string())];
        if let Some(lt) = self.before_lt {
            pairs.push(("before_lt", lt.to_string()));
        }
        if let Some(initiator) = self.initiator {
            pairs.push(("initiator", initiator.to_string()));
        }
        pairs
    }
}

/// Error body returned by TonAPI on failure
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Async TonAPI client
#[derive(Debug, Clone)]
pub struct TonApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TonApi {
    /// Create a new client
    ///
    /// Returns an error if the base URL is empty or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::InvalidConfig("base_url must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("tonproxy/0.1"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a GET and decode the JSON body, classifying failures
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "TonAPI request");

        let mut request = self.client.get(&url).query(query);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| Error::Decode(format!("{}: {}", path, e)))
    }

    /// Account state
    pub async fn account(&self, account_id: &str) -> Result<Account> {
        self.get_json(&format!("/accounts/{}", encode(account_id)), &[])
            .await
    }

    /// Raw and user-friendly forms of an address
    pub async fn parse_address(&self, account_id: &str) -> Result<ParsedAddress> {
        self.get_json(&format!("/address/{}/parse", encode(account_id)), &[])
            .await
    }

    /// Current TON price in USD
    pub async fn ton_price_usd(&self) -> Result<f64> {
        let rates: RatesResponse = self
            .get_json(
                "/rates",
                &[
                    ("tokens", "ton".to_string()),
                    ("currencies", "usd".to_string()),
                ],
            )
            .await?;

        rates
            .rates
            .get("TON")
            .and_then(|r| r.prices.get("USD"))
            .copied()
            .ok_or_else(|| Error::Decode("rates: missing TON/USD price".to_string()))
    }

    /// Jetton balances of an account, priced in USD
    pub async fn jetton_balances(&self, account_id: &str) -> Result<Vec<serde_json::Value>> {
        let balances: JettonBalances = self
            .get_json(
                &format!("/accounts/{}/jettons", encode(account_id)),
                &[("currencies", "usd".to_string())],
            )
            .await?;
        Ok(balances.balances)
    }

    /// NFT items owned by an account, as returned by the upstream
    pub async fn account_nfts(&self, account_id: &str) -> Result<Vec<serde_json::Value>> {
        let items: NftItems = self
            .get_json(&format!("/accounts/{}/nfts", encode(account_id)), &[])
            .await?;
        Ok(items.nft_items)
    }

    /// Single NFT item
    pub async fn nft(&self, account_id: &str) -> Result<NftItem> {
        self.get_json(&format!("/nfts/{}", encode(account_id)), &[])
            .await
    }

    /// Jetton master info
    pub async fn jetton(&self, account_id: &str) -> Result<JettonInfo> {
        self.get_json(&format!("/jettons/{}", encode(account_id)), &[])
            .await
    }

    /// A single event by id
    pub async fn event(&self, event_id: &str) -> Result<serde_json::Value> {
        self.get_json(&format!("/events/{}", encode(event_id)), &[])
            .await
    }

    /// One page of account history, newest first
    pub async fn account_events(
        &self,
        account_id: &str,
        query: &EventsQuery,
    ) -> Result<AccountEvents> {
        self.get_json(
            &format!("/accounts/{}/events", encode(account_id)),
            &query.to_pairs(),
        )
        .await
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Map a non-success response to an error variant
///
/// TonAPI reports throttling either with HTTP 429 or with an `error`
/// message mentioning the rate limit; both become [`Error::RateLimited`].
pub fn classify_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());
    let lower = message.to_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS || lower.contains("rate limit") {
        return Error::RateLimited;
    }

    if lower.contains("can't decode address") {
        return Error::AddressNotFound(message);
    }

    Error::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_by_status() {
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_classify_rate_limit_by_message() {
        let err = classify_error(
            StatusCode::FORBIDDEN,
            r#"{"error":"Rate limit exceeded, upgrade your plan"}"#,
        );
        assert!(matches!(err, Error::RateLimited));
    }

    #[test]
    fn test_classify_bad_address() {
        let err = classify_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"can't decode address foo"}"#,
        );
        assert!(matches!(err, Error::AddressNotFound(_)));
    }

    #[test]
    fn test_classify_generic() {
        let err = classify_error(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded");
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_events_query_pairs() {
        let q = EventsQuery::new(100);
        assert_eq!(q.to_pairs(), vec![("limit", "100".to_string())]);

        let q = EventsQuery::new(10).before(42).initiator(false);
        assert_eq!(
            q.to_pairs(),
            vec![
                ("limit", "10".to_string()),
                ("before_lt", "42".to_string()),
                ("initiator", "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_account_events_without_next_from() {
        let page: AccountEvents =
            serde_json::from_str(r#"{"events":[{"event_id":"a"},{"event_id":"b"}]}"#).unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.next_from, 0);
    }

    #[test]
    fn test_account_interfaces() {
        let account: Account = serde_json::from_str(
            r#"{"address":"0:abc","balance":1500000000,"status":"active",
                "is_wallet":false,"interfaces":["jetton_master"]}"#,
        )
        .unwrap();
        assert!(account.implements("jetton_master"));
        assert!(!account.implements("nft_item"));
        assert_eq!(account.balance, 1_500_000_000);
    }

    #[test]
    fn test_nft_helpers() {
        let item: NftItem = serde_json::from_str(
            r#"{"address":"0:nft","metadata":{"name":"Punk #1"},
                "previews":[{"resolution":"5x5","url":"a"},{"resolution":"100x100","url":"b"},
                            {"resolution":"500x500","url":"c"}]}"#,
        )
        .unwrap();
        assert_eq!(item.preview_url(2), Some("c"));
        assert_eq!(item.preview_url(3), None);
        assert_eq!(item.metadata_str("name"), Some("Punk #1"));
        assert!(item.owner.is_none());
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = ClientConfig {
            base_url: "/".to_string(),
            ..Default::default()
        };
        assert!(matches!(TonApi::new(config), Err(Error::InvalidConfig(_))));
    }
}
