//! kubeview Prometheus HTTP executor.

#![forbid(unsafe_code)]

mod decode;

use std::time::{Duration, Instant};

use kubeview_api::{ApiError, ApiResult, QueryExecutor, QueryMode, QueryRequest, QueryResponse};
use tracing::{debug, info, warn};

/// Query executor backed by the Prometheus HTTP API (`/api/v1/*`).
#[derive(Clone, Debug)]
pub struct PromClient {
    base: String,
    http: reqwest::Client,
}

impl PromClient {
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { base: base_url.trim_end_matches('/').to_string(), http })
    }

    pub fn base_url(&self) -> &str { &self.base }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> ApiResult<Vec<u8>> {
        let resp = self
            .http
            .get(self.url(path))
            .query(params)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let resp = handle_response(resp).await?;
        let bytes = resp.bytes().await.map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Map non-success statuses to [`ApiError::Backend`], keeping the server's message.
async fn handle_response(resp: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Backend { status: status.as_u16(), message: decode::error_message(&body) })
}

fn query_params(request: &QueryRequest) -> ApiResult<(&'static str, Vec<(&'static str, String)>)> {
    match request.mode {
        QueryMode::Instant => Ok(("/api/v1/query", vec![("query", request.expr.clone())])),
        QueryMode::Range => {
            let r = request
                .range
                .ok_or_else(|| ApiError::Unsupported(format!("range query {} without time range", request.ref_id)))?;
            Ok((
                "/api/v1/query_range",
                vec![
                    ("query", request.expr.clone()),
                    ("start", r.from.to_string()),
                    ("end", r.to.to_string()),
                    ("step", format!("{}s", r.step_secs)),
                ],
            ))
        }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for PromClient {
    async fn execute(&self, request: &QueryRequest) -> ApiResult<QueryResponse> {
        let t0 = Instant::now();
        let (path, params) = query_params(request)?;
        debug!(ref_id = %request.ref_id, expr = %request.expr, path, "prom: query");
        let result = match self.get(path, &params).await {
            Ok(body) => decode::decode_query(&body),
            Err(e) => Err(e),
        };
        match result {
            Ok(series) => {
                info!(ref_id = %request.ref_id, series = series.len(), took_ms = %t0.elapsed().as_millis(), "prom: query ok");
                metrics::histogram!("prom_query_ms", t0.elapsed().as_millis() as f64);
                Ok(QueryResponse { ref_id: request.ref_id.clone(), series })
            }
            Err(e) => {
                warn!(ref_id = %request.ref_id, error = %e, "prom: query failed");
                metrics::counter!("prom_query_errors_total", 1u64);
                Err(e)
            }
        }
    }

    async fn label_values(&self, matcher: &str, label: &str) -> ApiResult<Vec<String>> {
        let path = format!("/api/v1/label/{}/values", label);
        let params = if matcher.is_empty() { Vec::new() } else { vec![("match[]", matcher.to_string())] };
        let body = self.get(&path, &params).await?;
        let values = decode::decode_label_values(&body)?;
        debug!(label, count = values.len(), "prom: label values");
        Ok(values)
    }
}
