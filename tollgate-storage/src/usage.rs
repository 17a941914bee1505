//! Usage accounting sinks.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tollgate_core::{StoreResult, UsageRecord};

/// Destination for accounted requests.
///
/// The pipeline calls `record` from a spawned task and only logs failures.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: UsageRecord) -> StoreResult<()>;
}

/// Emits each record as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: UsageRecord) -> StoreResult<()> {
        tracing::info!(
            target: "tollgate::usage",
            subject_id = %record.subject_id,
            endpoint = %record.endpoint,
            method = %record.method,
            status_code = record.status_code,
            response_time_ms = record.response_time_ms,
            error_type = ?record.error_type,
            correlation_id = ?record.correlation_id,
            "API usage"
        );
        Ok(())
    }
}

/// Keeps records in memory. Used by tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryUsageLog {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().await.clone()
    }

    pub async fn records_for(&self, subject_id: &str) -> Vec<UsageRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.subject_id == subject_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UsageSink for InMemoryUsageLog {
    async fn record(&self, record: UsageRecord) -> StoreResult<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
