//! Upstream event source
//!
//! The pagination engine only needs one capability from the outside world:
//! "give me up to N events older than this cursor". [`EventSource`] is that
//! seam; [`TonApiEventSource`] implements it on top of the TonAPI client.

use crate::cache::Event;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tonapi::{EventsQuery, TonApi};

/// Failures of an event fetch
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream rate limit exceeded")]
    RateLimited,

    #[error("upstream failure: {0}")]
    Failure(String),
}

impl From<tonapi::Error> for UpstreamError {
    fn from(err: tonapi::Error) -> Self {
        if err.is_rate_limited() {
            UpstreamError::RateLimited
        } else {
            UpstreamError::Failure(err.to_string())
        }
    }
}

/// One fetched batch, newest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    pub events: Vec<Event>,
    /// Cursor for the next, older batch; `None` when upstream has no more
    pub next_cursor: Option<String>,
}

/// Paged history provider
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch up to `fetch_limit` events for `key`, older than `cursor` if given
    async fn fetch_events(
        &self,
        key: &str,
        fetch_limit: usize,
        cursor: Option<&str>,
    ) -> Result<EventBatch, UpstreamError>;
}

/// [`EventSource`] backed by `/accounts/{id}/events`
///
/// The cursor is TonAPI's `next_from` logical time, passed back as
/// `before_lt`. A `next_from` of 0 means the history is exhausted.
pub struct TonApiEventSource {
    api: Arc<TonApi>,
    initiator_only: bool,
}

impl TonApiEventSource {
    pub fn new(api: Arc<TonApi>, initiator_only: bool) -> Self {
        Self {
            api,
            initiator_only,
        }
    }
}

#[async_trait]
impl EventSource for TonApiEventSource {
    async fn fetch_events(
        &self,
        key: &str,
        fetch_limit: usize,
        cursor: Option<&str>,
    ) -> Result<EventBatch, UpstreamError> {
        let limit = u32::try_from(fetch_limit).unwrap_or(u32::MAX);
        let mut query = EventsQuery::new(limit);

        if let Some(cursor) = cursor {
            let lt = parse_cursor(cursor)?;
            query = query.before(lt);
        }
        if self.initiator_only {
            query = query.initiator(true);
        }

        let page = self.api.account_events(key, &query).await?;

        Ok(EventBatch {
            events: page.events,
            next_cursor: cursor_from_next_from(page.next_from),
        })
    }
}

fn parse_cursor(cursor: &str) -> Result<i64, UpstreamError> {
    cursor
        .parse()
        .map_err(|_| UpstreamError::Failure(format!("invalid cursor: {}", cursor)))
}

fn cursor_from_next_from(next_from: i64) -> Option<String> {
    (next_from > 0).then(|| next_from.to_string())
}
