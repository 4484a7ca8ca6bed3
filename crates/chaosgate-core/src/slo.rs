//! SLO evaluation engine.
//!
//! Queries every target against a [`MetricSource`] and derives a single
//! breach verdict. A failing query never stops evaluation of the remaining
//! targets; it is recorded as an `ERROR` entry and skipped by the verdict.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::{Comparator, SloTarget};
use crate::metric_source::MetricSource;

/// Marker stored under the metric key when its query failed.
pub const ERROR_VALUE: &str = "ERROR";

/// Outcome of one target's query.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementOutcome {
    Measured {
        value: f64,
        threshold: f64,
        comparator: String,
    },
    Error {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SloMeasurement {
    pub metric: String,
    pub outcome: MeasurementOutcome,
}

/// A breached target with its measured value.
#[derive(Debug, Clone, PartialEq)]
pub struct SloBreach {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub comparator: Comparator,
}

impl SloBreach {
    /// Human-readable description, e.g. `latency_p95=650 violates < 500`.
    pub fn describe(&self) -> String {
        format!(
            "{}={} violates {} {}",
            self.metric, self.value, self.comparator, self.threshold
        )
    }
}

/// Ordered measurements of one evaluation pass, in target order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SloEvaluation {
    pub measurements: Vec<SloMeasurement>,
}

impl SloEvaluation {
    /// Every breached target, in target order.
    ///
    /// Error entries are skipped. An unknown comparator is logged as a
    /// configuration error and never counts as a breach.
    pub fn breach_details(&self) -> Vec<SloBreach> {
        self.measurements
            .iter()
            .filter_map(|m| match &m.outcome {
                MeasurementOutcome::Measured {
                    value,
                    threshold,
                    comparator,
                } => {
                    let Ok(cmp) = comparator.parse::<Comparator>() else {
                        warn!(
                            metric = %m.metric,
                            comparator = %comparator,
                            "unknown SLO comparator; treating as no breach"
                        );
                        return None;
                    };
                    cmp.is_breached(*value, *threshold).then(|| SloBreach {
                        metric: m.metric.clone(),
                        value: *value,
                        threshold: *threshold,
                        comparator: cmp,
                    })
                }
                MeasurementOutcome::Error { .. } => None,
            })
            .collect()
    }

    /// First breach in target order, if any.
    pub fn first_breach(&self) -> Option<SloBreach> {
        for m in &self.measurements {
            let MeasurementOutcome::Measured {
                value,
                threshold,
                comparator,
            } = &m.outcome
            else {
                continue;
            };
            match comparator.parse::<Comparator>() {
                Ok(cmp) if cmp.is_breached(*value, *threshold) => {
                    return Some(SloBreach {
                        metric: m.metric.clone(),
                        value: *value,
                        threshold: *threshold,
                        comparator: cmp,
                    });
                }
                Ok(_) => {}
                Err(_) => warn!(
                    metric = %m.metric,
                    comparator = %comparator,
                    "unknown SLO comparator; treating as no breach"
                ),
            }
        }
        None
    }

    /// Whether any target is breached. Short-circuits on the first breach.
    pub fn breached(&self) -> bool {
        self.first_breach().is_some()
    }

    pub fn error_count(&self) -> usize {
        self.measurements
            .iter()
            .filter(|m| matches!(m.outcome, MeasurementOutcome::Error { .. }))
            .count()
    }

    /// Flatten into the report result map.
    ///
    /// Measured targets produce `key`, `key_threshold` and `key_comparator`;
    /// failed queries produce `key = "ERROR"` and `key_error`.
    pub fn to_result_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        for m in &self.measurements {
            match &m.outcome {
                MeasurementOutcome::Measured {
                    value,
                    threshold,
                    comparator,
                } => {
                    map.insert(m.metric.clone(), json!(value));
                    map.insert(format!("{}_threshold", m.metric), json!(threshold));
                    map.insert(format!("{}_comparator", m.metric), json!(comparator));
                }
                MeasurementOutcome::Error { reason } => {
                    map.insert(m.metric.clone(), json!(ERROR_VALUE));
                    map.insert(format!("{}_error", m.metric), json!(reason));
                }
            }
        }
        map
    }
}

/// Evaluates SLO targets against a metric source.
#[derive(Clone)]
pub struct SloEvaluator {
    source: Arc<dyn MetricSource>,
}

impl SloEvaluator {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    /// Query every target concurrently; results keep target order.
    pub async fn evaluate(&self, targets: &[SloTarget]) -> SloEvaluation {
        let queries = targets.iter().map(|t| self.source.query(&t.query));
        let samples = join_all(queries).await;

        let measurements = targets
            .iter()
            .zip(samples)
            .map(|(target, sample)| {
                let outcome = match sample {
                    Ok(sample) => {
                        debug!(metric = %target.metric, value = sample.value, "SLO measured");
                        MeasurementOutcome::Measured {
                            value: sample.value,
                            threshold: target.threshold,
                            comparator: target.comparator.clone(),
                        }
                    }
                    Err(e) => {
                        warn!(metric = %target.metric, error = %e, "SLO query failed");
                        MeasurementOutcome::Error {
                            reason: e.to_string(),
                        }
                    }
                };
                SloMeasurement {
                    metric: target.metric.clone(),
                    outcome,
                }
            })
            .collect();

        SloEvaluation { measurements }
    }
}
