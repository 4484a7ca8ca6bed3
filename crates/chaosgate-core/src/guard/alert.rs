//! Alert delivery for detected violations.

use async_trait::async_trait;

use super::ViolationRecord;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, record: &ViolationRecord);
}

/// Emits alerts as `error!` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn alert(&self, record: &ViolationRecord) {
        tracing::error!(
            event = "guard.alert",
            checker = %record.checker,
            subject_id = %record.subject_id,
            summary = %record.summary,
            "guard violation alert"
        );
    }
}
