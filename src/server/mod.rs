//! HTTP server for tonproxy
//!
//! # Routes
//!
//! - `GET /health`, `GET /metrics`
//! - `GET /api/v1/ton/{getFriendlyAddress,getRawAddress,getTonPrice,getAddressType}`
//! - `GET /api/v1/ton/{getWalletInfo,getTransactionInfo,getJettonInfo,getNftInfo}`
//! - `GET /api/v1/ton/{getNftInfoByOwner,getTransactions,getJettons,getNfts}`
//! - `POST /api/v1/users`, `GET /api/v1/users`
//! - `GET /api/v1/users/{id}`, `GET /api/v1/users/by-user-id/{user_id}`
//!
//! # Example
//!
//! ```no_run
//! use tonproxy::config::ProxyConfig;
//! use tonproxy::server::ProxyServer;
//!
//! #[tokio::main]
//! async fn main() -> tonproxy::Result<()> {
//!     let config = ProxyConfig::default();
//!     let server = ProxyServer::from_config(&config)?;
//!     server.run(&config.server.bind_addr()).await
//! }
//! ```

mod handlers;
mod rate_limit;
mod response;

pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use response::{ApiError, ApiResponse, ErrorBody};

use crate::cache::SqliteCacheStore;
use crate::config::{PaginationConfig, ProxyConfig};
use crate::metrics;
use crate::pagination::PaginationEngine;
use crate::ton::TonService;
use crate::upstream::TonApiEventSource;
use crate::users::UserStore;
use crate::{ProxyError, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tonapi::TonApi;

/// Shared server state
pub struct AppState {
    pub ton: TonService,
    pub users: UserStore,
    pub pagination: PaginationConfig,
    pub rate_limiter: RateLimiter,
}

/// The proxy's HTTP server
pub struct ProxyServer {
    state: Arc<AppState>,
}

impl ProxyServer {
    pub fn new(
        ton: TonService,
        users: UserStore,
        pagination: PaginationConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                ton,
                users,
                pagination,
                rate_limiter: RateLimiter::new(rate_limit),
            }),
        }
    }

    /// Wire TonAPI, the SQLite stores and the pagination engine from config
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let api = Arc::new(TonApi::new(config.tonapi.client_config())?);
        let source = Arc::new(TonApiEventSource::new(
            api.clone(),
            config.pagination.initiator_only,
        ));
        let store = Arc::new(SqliteCacheStore::open(&config.storage)?);
        let engine = Arc::new(PaginationEngine::new(
            source,
            store,
            config.pagination.fetch_batch_size,
        ));
        let users = UserStore::open(&config.storage)?;

        tracing::info!(
            tonapi = api.base_url(),
            storage = %config.storage.path.display(),
            fetch_batch_size = config.pagination.fetch_batch_size,
            "Proxy wired"
        );

        Ok(Self::new(
            TonService::new(api, engine),
            users,
            config.pagination.clone(),
            config.server.rate_limit.clone().into(),
        ))
    }

    /// Build the router with rate limiting and metrics middleware
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let max_body_size = state.rate_limiter.config().max_body_size;

        let ton = Router::new()
            .route("/getFriendlyAddress", get(handlers::get_friendly_address))
            .route("/getRawAddress", get(handlers::get_raw_address))
            .route("/getTonPrice", get(handlers::get_ton_price))
            .route("/getAddressType", get(handlers::get_address_type))
            .route("/getWalletInfo", get(handlers::get_wallet_info))
            .route("/getTransactionInfo", get(handlers::get_transaction_info))
            .route("/getJettonInfo", get(handlers::get_jetton_info))
            .route("/getNftInfo", get(handlers::get_nft_info))
            .route("/getNftInfoByOwner", get(handlers::get_nft_info_by_owner))
            .route("/getTransactions", get(handlers::get_transactions))
            .route("/getJettons", get(handlers::get_jettons))
            .route("/getNfts", get(handlers::get_nfts));

        let users = Router::new()
            .route("/", post(handlers::create_user).get(handlers::list_users))
            .route("/{id}", get(handlers::get_user))
            .route("/by-user-id/{user_id}", get(handlers::get_user_by_user_id));

        let api = Router::new()
            .nest("/ton", ton)
            .nest("/users", users)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .layer(axum::extract::DefaultBodyLimit::max(max_body_size));

        Router::new()
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics_text))
            .nest("/api/v1", api)
            .layer(middleware::from_fn(track_requests))
            .with_state(state)
    }

    /// Run the server on the given address
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Server(format!("failed to bind {}: {}", addr, e)))?;

        let limits = self.state.rate_limiter.config().clone();
        tracing::info!(
            addr = addr,
            max_requests = limits.max_requests,
            window_secs = limits.window.as_secs(),
            max_body_size = limits.max_body_size,
            "tonproxy listening"
        );

        let state = self.state.clone();
        tokio::spawn(async move {
            let period = limits.window.max(std::time::Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                state.rate_limiter.cleanup().await;
            }
        });

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(ProxyError::Io)
    }
}

/// Rate limiting middleware
async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // No ConnectInfo when driven without a socket (tests)
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    match state.rate_limiter.check(&ip).await {
        Ok(()) => next.run(request).await,
        Err(RateLimitError::Exceeded { retry_after }) => {
            let retry_secs = retry_after.as_secs();
            tracing::warn!(ip = %ip, retry_after_secs = retry_secs, "Rate limit exceeded");

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_secs.to_string())],
                Json(ApiResponse::error(response::RATE_LIMIT)),
            )
                .into_response()
        }
    }
}

/// Count requests per matched route and status
async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_http_request(&route, response.status().as_u16());
    response
}
