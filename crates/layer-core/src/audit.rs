//! Request auditing
//!
//! Every completion attempt produces one [`AuditRecord`]. Records are handed
//! to a detached worker over a channel, so writing them never delays or fails
//! the response. Write failures surface as [`AuditWriteError`] in the log.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{CallerContext, Usage};

/// Immutable outcome of one completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub owner_id: String,
    /// Null when the gate could not be resolved
    pub gate_id: Option<String>,
    pub gate_name: Option<String>,
    pub model_requested: Option<String>,
    pub model_used: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Start a record for `caller`; the router fills in the rest
    pub fn begin(caller: &CallerContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: caller.owner_id.clone(),
            gate_id: None,
            gate_name: None,
            model_requested: None,
            model_used: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            success: false,
            error_message: None,
            user_agent: caller.user_agent.clone(),
            ip_address: caller.ip_address.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn with_usage(mut self, usage: &Usage, cost_usd: f64) -> Self {
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens = usage.completion_tokens;
        self.total_tokens = usage.total_tokens;
        self.cost_usd = cost_usd;
        self
    }
}

/// Durable destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
#[error("Failed to write audit record {record_id}: {source:#}")]
pub struct AuditWriteError {
    pub record_id: String,
    #[source]
    pub source: anyhow::Error,
}

/// Handle used by the router to submit records.
///
/// Cloning is cheap. The worker task exits once every handle is dropped and
/// the queue is drained, which is how shutdown flushes pending records.
#[derive(Clone)]
pub struct RequestAuditor {
    tx: mpsc::UnboundedSender<AuditRecord>,
    failures: Arc<AtomicU64>,
}

impl std::fmt::Debug for RequestAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuditor")
            .field("failures", &self.write_failures())
            .finish()
    }
}

impl RequestAuditor {
    /// Start the background writer for `sink`
    pub fn spawn(sink: Arc<dyn AuditSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        let failures = Arc::new(AtomicU64::new(0));
        let worker_failures = failures.clone();

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match sink.write(&record).await {
                    Ok(()) => debug!("Audit record {} written", record.id),
                    Err(source) => {
                        worker_failures.fetch_add(1, Ordering::Relaxed);
                        let err = AuditWriteError {
                            record_id: record.id.clone(),
                            source,
                        };
                        warn!("{}", err);
                    }
                }
            }
            debug!("Audit worker stopped");
        });

        (Self { tx, failures }, handle)
    }

    /// Queue a record. Never blocks and never fails the caller.
    pub fn record(&self, record: AuditRecord) {
        if let Err(e) = self.tx.send(record) {
            warn!("Audit worker is gone, dropping record {}", e.0.id);
        }
    }

    /// Number of records the sink rejected so far
    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
