//! Folds a run's records into the synthesis input.
//!
//! Every configured source gets exactly one entry, in configuration order.
//! Degraded sources are never dropped: they contribute whatever their last
//! good stage produced, or an absence marker naming why nothing was produced.

use serde::Serialize;
use serde_json::Value;

use newsdesk_shared::{RunId, SourceKind, StageKind};

use crate::record::{AggregationBatch, RunStats, SourceRecord, Terminal};

/// What one source contributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "coverage", rename_all = "snake_case")]
pub enum Coverage {
    /// All four stages ran; `content` is the translated output.
    Complete { content: Value },
    /// Output exists up to `missing_beyond`; later stages are missing.
    Partial {
        missing_beyond: StageKind,
        content: Value,
        reason: String,
        detail: String,
    },
    /// Nothing was produced.
    Absent { reason: String, detail: String },
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisEntry {
    pub source: String,
    pub url: String,
    pub kind: SourceKind,
    #[serde(flatten)]
    pub coverage: Coverage,
}

/// Input to the synthesis capability.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisInput {
    pub run_id: RunId,
    pub entries: Vec<SynthesisEntry>,
    pub stats: RunStats,
}

impl SynthesisInput {
    /// Entries that are not complete, in order.
    pub fn coverage_gaps(&self) -> Vec<&SynthesisEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.coverage.is_complete())
            .collect()
    }

    /// Whether any source produced content at all.
    pub fn has_content(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| !matches!(entry.coverage, Coverage::Absent { .. }))
    }
}

/// Build the synthesis input. No truncation, no re-ranking.
pub fn aggregate(batch: &AggregationBatch) -> SynthesisInput {
    SynthesisInput {
        run_id: batch.run_id,
        entries: batch.records.iter().map(entry_for).collect(),
        stats: batch.stats(),
    }
}

fn entry_for(record: &SourceRecord) -> SynthesisEntry {
    let coverage = match &record.terminal {
        Terminal::Completed { output } => Coverage::Complete {
            content: output.clone(),
        },
        Terminal::Degraded { reason, .. } => match record.last_good() {
            Some((stage, value)) => Coverage::Partial {
                missing_beyond: stage,
                content: value.clone(),
                reason: reason.label().to_string(),
                detail: reason.detail(),
            },
            None => Coverage::Absent {
                reason: reason.label().to_string(),
                detail: reason.detail(),
            },
        },
    };

    SynthesisEntry {
        source: record.name.clone(),
        url: record.url.clone(),
        kind: record.kind,
        coverage,
    }
}
