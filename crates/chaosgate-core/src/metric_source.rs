//! Metric backends answering "evaluate query Q now".

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MetricsConfig;

/// A scalar reading at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Errors from a metric backend.
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("metric backend returned status {status}")]
    Status { status: u16 },

    #[error("no data for query: {query}")]
    NoData { query: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for MetricError {
    fn from(err: reqwest::Error) -> Self {
        MetricError::Http(err.to_string())
    }
}

/// Point-query interface to a metric backend.
///
/// Called at most once per guard interval per monitored run.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(&self, query: &str) -> Result<MetricSample, MetricError>;
}

/// Prometheus instant-query client.
pub struct PrometheusMetricSource {
    base_url: String,
    http_client: reqwest::Client,
}

impl PrometheusMetricSource {
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("chaosgate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.prometheus_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl MetricSource for PrometheusMetricSource {
    async fn query(&self, query: &str) -> Result<MetricSample, MetricError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MetricError::Status {
                status: response.status().as_u16(),
            });
        }
        let body: serde_json::Value = response.json().await?;
        parse_instant_response(query, &body)
    }
}

/// Extract the first sample of an instant-query vector response.
///
/// Expects `data.result[0].value` to be `[<unix seconds>, "<value>"]`; the
/// value may also be a bare number.
pub fn parse_instant_response(
    query: &str,
    body: &serde_json::Value,
) -> Result<MetricSample, MetricError> {
    if let Some(status) = body.get("status").and_then(|s| s.as_str()) {
        if status != "success" {
            let detail = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or(status);
            return Err(MetricError::Malformed(detail.to_string()));
        }
    }

    let result = body
        .pointer("/data/result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| MetricError::Malformed("missing data.result".into()))?;
    let first = result.first().ok_or_else(|| MetricError::NoData {
        query: query.to_string(),
    })?;
    let pair = first
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MetricError::Malformed("missing value pair".into()))?;

    let value = match pair.get(1) {
        Some(serde_json::Value::String(s)) => s
            .parse::<f64>()
            .map_err(|e| MetricError::Malformed(format!("value {s:?}: {e}")))?,
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| MetricError::Malformed("value out of range".into()))?,
        _ => return Err(MetricError::Malformed("missing sample value".into())),
    };

    let timestamp = pair
        .first()
        .and_then(|t| t.as_f64())
        .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single())
        .unwrap_or_else(Utc::now);

    Ok(MetricSample { timestamp, value })
}

/// In-memory query table; values may be changed while runs are monitored.
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    values: RwLock<HashMap<String, f64>>,
}

impl StaticMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let source = Self::new();
        for (k, v) in values {
            source.set(k, v);
        }
        source
    }

    pub fn set(&self, query: impl Into<String>, value: f64) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query.into(), value);
    }

    pub fn remove(&self, query: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(query);
    }
}

#[async_trait]
impl MetricSource for StaticMetricSource {
    async fn query(&self, query: &str) -> Result<MetricSample, MetricError> {
        let value = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(query)
            .copied()
            .ok_or_else(|| MetricError::NoData {
                query: query.to_string(),
            })?;
        Ok(MetricSample {
            timestamp: Utc::now(),
            value,
        })
    }
}
