//! Prometheus HTTP API response envelopes and their conversion into [`Series`].

use std::collections::BTreeMap;

use kubeview_api::{ApiError, ApiResult};
use kubeview_core::series::Series;
use serde::Deserialize;
use smallvec::SmallVec;

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub status: String,
    pub data: Option<T>,
    #[serde(rename = "errorType")]
    pub error_type: Option<String>,
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn into_data(self) -> ApiResult<T> {
        if self.status != "success" {
            let kind = self.error_type.unwrap_or_else(|| "error".into());
            let msg = self.error.unwrap_or_default();
            return Err(ApiError::Backend { status: 200, message: format!("{}: {}", kind, msg) });
        }
        self.data.ok_or_else(|| ApiError::Decode("response without data".into()))
    }
}

/// `[<unix seconds>, "<value>"]`
type Sample = (f64, String);

#[derive(Debug, Deserialize)]
pub(crate) struct VectorSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: Sample,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MatrixSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub(crate) enum QueryData {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
    Scalar(Sample),
    String(Sample),
}

fn parse_value(raw: &str) -> ApiResult<f64> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw.parse::<f64>().map_err(|e| ApiError::Decode(format!("sample value {:?}: {}", raw, e))),
    }
}

/// Result order is preserved; backend-side `sort()` ordering relies on it.
pub(crate) fn into_series(data: QueryData) -> ApiResult<Vec<Series>> {
    match data {
        QueryData::Vector(samples) => samples
            .into_iter()
            .map(|s| {
                let mut values = SmallVec::new();
                values.push(parse_value(&s.value.1)?);
                Ok(Series { labels: s.metric, values })
            })
            .collect(),
        QueryData::Matrix(series) => series
            .into_iter()
            .map(|s| {
                let values = s.values.iter().map(|(_, v)| parse_value(v)).collect::<ApiResult<SmallVec<[f64; 2]>>>()?;
                Ok(Series { labels: s.metric, values })
            })
            .collect(),
        QueryData::Scalar((_, v)) => Ok(vec![Series::new().with_value(parse_value(&v)?)]),
        QueryData::String(_) => Err(ApiError::Unsupported("string result".into())),
    }
}

pub(crate) fn decode_query(body: &[u8]) -> ApiResult<Vec<Series>> {
    let env: Envelope<QueryData> = serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    into_series(env.into_data()?)
}

pub(crate) fn decode_label_values(body: &[u8]) -> ApiResult<Vec<String>> {
    let env: Envelope<Vec<String>> = serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    env.into_data()
}

/// Best-effort message from an error body; Prometheus usually answers with a JSON envelope.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<Envelope<serde_json::Value>>(body) {
        Ok(env) if env.error.is_some() => {
            format!("{}: {}", env.error_type.unwrap_or_else(|| "error".into()), env.error.unwrap_or_default())
        }
        _ => body.trim().to_string(),
    }
}
