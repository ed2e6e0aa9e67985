//! Shared run-scoped state (§5). `GoalContext` and the global evidence index
//! are mutated from concurrently-dispatched goals within a dependency group,
//! so each is guarded by its own `tokio::sync::Mutex` — a "parallel-threads"
//! concurrency model, since this crate uses Tokio's multi-thread runtime
//! rather than true single-threaded cooperative scheduling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use recon_core::event::EventSink;
use recon_core::model::GoalContext;
use recon_core::prompt::Usage;
use tokio::sync::Mutex;

use crate::evidence::GlobalEvidenceIndex;

/// Everything a running goal needs shared access to.
pub struct RunState {
    /// Run-scoped context: objective, constraints, rate-limited sources.
    pub context: Mutex<GoalContext>,
    /// The de-duplicated evidence store.
    pub evidence: Mutex<GlobalEvidenceIndex>,
    /// Structured audit-trail sink.
    pub event_sink: Arc<dyn EventSink>,
    /// Running total of LLM usage for cost accounting (§5: informational,
    /// not a hard gate unless configured).
    pub usage: Mutex<Usage>,
    /// Total `ProcessedEvidence` projections produced this run.
    pub processed_evidence_count: AtomicU64,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState").finish_non_exhaustive()
    }
}

impl RunState {
    /// Creates a fresh run state.
    #[must_use]
    pub fn new(context: GoalContext, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            context: Mutex::new(context),
            evidence: Mutex::new(GlobalEvidenceIndex::new()),
            event_sink,
            usage: Mutex::new(Usage::default()),
            processed_evidence_count: AtomicU64::new(0),
        }
    }

    /// Adds `usage` to the running total.
    pub async fn record_usage(&self, usage: Usage) {
        let mut total = self.usage.lock().await;
        *total = total.combine(usage);
    }

    /// Adds `n` to the processed-evidence counter.
    pub fn record_processed(&self, n: u64) {
        self.processed_evidence_count.fetch_add(n, Ordering::Relaxed);
    }
}
