//! Per-source records and the batch a run produces.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use newsdesk_shared::{ErrorKind, RunId, SourceKind, SourceMeta, StageKind};

use crate::stage::StageFailure;

/// What happened to one stage of one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Ok(Value),
    Failed(StageFailure),
    /// An earlier stage failed.
    Skipped { blocked_by: StageKind },
    /// The pipeline halted (stop request or crash) before reaching this stage.
    #[default]
    NotRun,
}

impl StageOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Where the fetch stage's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrigin {
    Network,
    Cache,
    /// Expired cache entry used because the network fetch failed.
    StaleCache,
}

/// Why a source did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DegradeReason {
    Stage {
        stage: StageKind,
        kind: ErrorKind,
        message: String,
    },
    Cancelled {
        before: StageKind,
    },
    Crashed {
        message: String,
    },
}

impl DegradeReason {
    /// Short label: the error kind name, `Cancelled` or `Crashed`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stage { kind, .. } => kind.as_str(),
            Self::Cancelled { .. } => "Cancelled",
            Self::Crashed { .. } => "Crashed",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Stage { stage, message, .. } => format!("{stage} failed: {message}"),
            Self::Cancelled { before } => format!("run stopped before {before}"),
            Self::Crashed { message } => format!("pipeline task crashed: {message}"),
        }
    }
}

/// Terminal state of a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Terminal {
    Completed {
        output: Value,
    },
    Degraded {
        last_good_stage: Option<StageKind>,
        reason: DegradeReason,
    },
}

/// Everything the run learned about one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    /// Indexed by [`StageKind::index`].
    pub stages: [StageOutcome; 4],
    pub fetch_origin: Option<FetchOrigin>,
    pub elapsed_ms: u64,
    pub terminal: Terminal,
}

impl SourceRecord {
    pub fn stage(&self, stage: StageKind) -> &StageOutcome {
        &self.stages[stage.index()]
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.terminal, Terminal::Completed { .. })
    }

    pub fn degrade_reason(&self) -> Option<&DegradeReason> {
        match &self.terminal {
            Terminal::Completed { .. } => None,
            Terminal::Degraded { reason, .. } => Some(reason),
        }
    }

    /// The latest stage that produced output, with that output.
    pub fn last_good(&self) -> Option<(StageKind, &Value)> {
        StageKind::ALL
            .into_iter()
            .rev()
            .find_map(|stage| self.stage(stage).value().map(|value| (stage, value)))
    }

    /// Record for a source that never started because the run was stopped.
    pub fn cancelled(meta: &SourceMeta) -> Self {
        Self::halted(
            meta,
            DegradeReason::Cancelled {
                before: StageKind::Fetch,
            },
        )
    }

    /// Record for a source whose pipeline task died; its partial work is lost.
    pub fn crashed(meta: &SourceMeta, message: impl Into<String>) -> Self {
        Self::halted(
            meta,
            DegradeReason::Crashed {
                message: message.into(),
            },
        )
    }

    fn halted(meta: &SourceMeta, reason: DegradeReason) -> Self {
        Self {
            name: meta.name.clone(),
            url: meta.url.to_string(),
            kind: meta.kind,
            stages: Default::default(),
            fetch_origin: None,
            elapsed_ms: 0,
            terminal: Terminal::Degraded {
                last_good_stage: None,
                reason,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// All records of one run, in configuration order.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationBatch {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<SourceRecord>,
}

/// Summary counts for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub completed: usize,
    pub degraded: usize,
    /// Degraded sources that still produced some output.
    pub partial: usize,
    pub from_cache: usize,
    /// `completed / total`, or 0 for an empty batch.
    pub success_rate: f64,
}

impl AggregationBatch {
    pub fn stats(&self) -> RunStats {
        let total = self.records.len();
        let completed = self.records.iter().filter(|r| r.is_completed()).count();
        let partial = self
            .records
            .iter()
            .filter(|r| !r.is_completed() && r.last_good().is_some())
            .count();
        let from_cache = self
            .records
            .iter()
            .filter(|r| {
                matches!(
                    r.fetch_origin,
                    Some(FetchOrigin::Cache | FetchOrigin::StaleCache)
                )
            })
            .count();

        RunStats {
            total,
            completed,
            degraded: total - completed,
            partial,
            from_cache,
            success_rate: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64
            },
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
