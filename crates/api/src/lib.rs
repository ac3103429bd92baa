//! kubeview backend query contract.
//!
//! This crate defines the request/response types and the executor trait the
//! table engine depends on. Implementations live elsewhere (HTTP) or below (mock).

#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use kubeview_core::series::Series;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Instant,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryFormat {
    #[default]
    Table,
    TimeSeries,
}

/// Evaluation window for range queries, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
    pub step_secs: u64,
}

impl TimeRange {
    /// `now - secs` → `now`, with a step giving roughly 240 points.
    pub fn last(secs: i64) -> Self {
        let to = chrono::Utc::now().timestamp();
        let step_secs = ((secs / 240).max(1)) as u64;
        Self { from: to - secs, to, step_secs }
    }
}

impl Default for TimeRange {
    fn default() -> Self { Self::last(3600) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Result identifier; routes results back to the field they feed.
    pub ref_id: String,
    pub expr: String,
    pub mode: QueryMode,
    pub format: QueryFormat,
    /// Only used for [`QueryMode::Range`].
    pub range: Option<TimeRange>,
}

impl QueryRequest {
    pub fn instant_table(ref_id: impl Into<String>, expr: impl Into<String>) -> Self {
        Self { ref_id: ref_id.into(), expr: expr.into(), mode: QueryMode::Instant, format: QueryFormat::Table, range: None }
    }

    pub fn range(ref_id: impl Into<String>, expr: impl Into<String>, range: TimeRange) -> Self {
        Self { ref_id: ref_id.into(), expr: expr.into(), mode: QueryMode::Range, format: QueryFormat::TimeSeries, range: Some(range) }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResponse {
    pub ref_id: String,
    pub series: Vec<Series>,
}

/// Errors raised by query executors, suitable for transport.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("backend ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("not_found: {0}")]
    NotFound(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Backend query executor. Async, may fail; retry and timeouts are the
/// implementation's concern.
#[allow(unused_variables)]
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> ApiResult<QueryResponse>;

    /// Distinct values of `label` across series matching `matcher`.
    async fn label_values(&self, matcher: &str, label: &str) -> ApiResult<Vec<String>> {
        Err(ApiError::Unsupported("label_values".into()))
    }
}

// ----------------- Mock implementation -----------------

#[derive(Clone)]
struct MockReply {
    result: ApiResult<Vec<Series>>,
    gate: Option<Arc<Notify>>,
}

/// In-memory executor for tests.
///
/// Replies are queued per `refId`; the last queued reply repeats once the
/// queue is down to one entry. A gated reply waits until its `Notify` fires.
#[derive(Default)]
pub struct MockExecutor {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    labels: Mutex<HashMap<String, Vec<String>>>,
    log: Mutex<Vec<QueryRequest>>,
}

impl MockExecutor {
    pub fn new() -> Self { Self::default() }

    fn push(&self, ref_id: &str, reply: MockReply) {
        let mut map = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(ref_id.to_string()).or_default().push_back(reply);
    }

    pub fn respond(&self, ref_id: &str, series: Vec<Series>) -> &Self {
        self.push(ref_id, MockReply { result: Ok(series), gate: None });
        self
    }

    pub fn fail(&self, ref_id: &str, err: ApiError) -> &Self {
        self.push(ref_id, MockReply { result: Err(err), gate: None });
        self
    }

    /// Queue a reply that is held back until the returned `Notify` is signalled.
    pub fn respond_gated(&self, ref_id: &str, series: Vec<Series>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.push(ref_id, MockReply { result: Ok(series), gate: Some(gate.clone()) });
        gate
    }

    pub fn with_label_values(&self, label: &str, values: Vec<String>) -> &Self {
        self.labels.lock().unwrap_or_else(|e| e.into_inner()).insert(label.to_string(), values);
        self
    }

    /// Every request executed so far, in issue order.
    pub fn requests(&self) -> Vec<QueryRequest> { self.log.lock().unwrap_or_else(|e| e.into_inner()).clone() }

    fn next_reply(&self, ref_id: &str) -> Option<MockReply> {
        let mut map = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let queue = map.get_mut(ref_id)?;
        if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, request: &QueryRequest) -> ApiResult<QueryResponse> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        let reply = self
            .next_reply(&request.ref_id)
            .ok_or_else(|| ApiError::NotFound(format!("no mock reply for {}", request.ref_id)))?;
        if let Some(gate) = reply.gate {
            debug!(ref_id = %request.ref_id, "mock: holding reply");
            gate.notified().await;
        }
        reply.result.map(|series| QueryResponse { ref_id: request.ref_id.clone(), series })
    }

    async fn label_values(&self, _matcher: &str, label: &str) -> ApiResult<Vec<String>> {
        self.labels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(label)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("no label values for {}", label)))
    }
}
