//! Run journal collaborator (spec §6.3): an append-only record of what
//! happened during a run, owned and persisted by the embedder. The
//! executor only ever appends to it — it never reads the journal back,
//! and a journal write failure is logged and swallowed, never allowed to
//! abort a run in progress.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One journaled problem, severe enough to record but not necessarily
/// fatal to the run (a guardrail warning, a retried node, a repaired
/// output).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JournaledProblem {
    pub run_id: String,
    pub node_id: Option<String>,
    pub kind: String,
    pub detail: String,
    pub context: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JournalError(pub String);

/// The journal collaborator: start/report/end. Implementations are
/// supplied by the embedder (append to a file, push to a database, ship
/// to a log pipeline); this crate only consumes the trait.
#[async_trait]
pub trait RuntimeJournal: Send + Sync {
    async fn start_run(&self, run_id: &str, graph_id: &str) -> Result<(), JournalError>;
    async fn report_problem(&self, problem: JournaledProblem) -> Result<(), JournalError>;
    async fn end_run(&self, run_id: &str, status: &str) -> Result<(), JournalError>;
}

/// Wraps a `RuntimeJournal` so its errors are logged and discarded,
/// matching the executor's "journal failures never abort the run"
/// discipline (spec §7).
pub struct NonFatalJournal<J: RuntimeJournal> {
    inner: J,
}

impl<J: RuntimeJournal> NonFatalJournal<J> {
    pub fn new(inner: J) -> Self {
        Self { inner }
    }

    pub async fn start_run(&self, run_id: &str, graph_id: &str) {
        if let Err(e) = self.inner.start_run(run_id, graph_id).await {
            tracing::warn!(run_id, error = %e, "journal start_run failed");
        }
    }

    pub async fn report_problem(&self, problem: JournaledProblem) {
        let run_id = problem.run_id.clone();
        if let Err(e) = self.inner.report_problem(problem).await {
            tracing::warn!(run_id, error = %e, "journal report_problem failed");
        }
    }

    pub async fn end_run(&self, run_id: &str, status: &str) {
        if let Err(e) = self.inner.end_run(run_id, status).await {
            tracing::warn!(run_id, error = %e, "journal end_run failed");
        }
    }
}

/// No-op journal for tests and embedders that don't need durability.
pub struct NullJournal;

#[async_trait]
impl RuntimeJournal for NullJournal {
    async fn start_run(&self, _run_id: &str, _graph_id: &str) -> Result<(), JournalError> {
        Ok(())
    }
    async fn report_problem(&self, _problem: JournaledProblem) -> Result<(), JournalError> {
        Ok(())
    }
    async fn end_run(&self, _run_id: &str, _status: &str) -> Result<(), JournalError> {
        Ok(())
    }
}
