use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

use super::processing::RuleId;
use crate::domain::{ClassifiedRecord, Diagnostic, LobId, ProjectedRecord};

/// Terminal state of one record after the per-record stages
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Did not satisfy a filter; excluded silently
    Filtered { record: ProjectedRecord, rule: RuleId },
    /// Violated a drop-action validation rule
    ValidationDropped {
        record: ProjectedRecord,
        rule: RuleId,
        reason: String,
    },
    /// Passed validation but matched no line of business
    Unclassified { record: ProjectedRecord },
    /// Assigned to one or more lines of business
    Accepted {
        record: ClassifiedRecord,
        /// Routed to the default line of business after matching nothing
        defaulted: bool,
    },
}

impl RecordOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            RecordOutcome::Filtered { record, .. }
            | RecordOutcome::ValidationDropped { record, .. }
            | RecordOutcome::Unclassified { record } => record.sequence(),
            RecordOutcome::Accepted { record, .. } => record.sequence(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            RecordOutcome::Filtered { record, .. }
            | RecordOutcome::ValidationDropped { record, .. }
            | RecordOutcome::Unclassified { record } => record.diagnostics(),
            RecordOutcome::Accepted { record, .. } => record.record().diagnostics(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, RecordOutcome::Accepted { .. })
    }
}

/// Ordered records assigned to one line of business
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputBatch {
    pub lob: LobId,
    pub records: Vec<ClassifiedRecord>,
}

impl OutputBatch {
    fn new(lob: LobId) -> Self {
        Self {
            lob,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Run-level counters. Every input record lands in exactly one of
/// accepted, filtered, validation-dropped or unclassified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingSummary {
    pub input: usize,
    pub accepted: usize,
    pub filtered: usize,
    pub validation_dropped: usize,
    pub unclassified: usize,
    /// Accepted records that reached their batch through the default line of business
    pub routed_to_default: usize,
    /// The run stopped pulling records before the source was exhausted
    pub cancelled: bool,
    pub drop_reasons: BTreeMap<String, usize>,
    pub warnings: BTreeMap<String, usize>,
    pub coercion_failures: BTreeMap<String, usize>,
    pub lob_counts: BTreeMap<String, usize>,
}

impl ProcessingSummary {
    pub fn is_balanced(&self) -> bool {
        self.accepted + self.filtered + self.validation_dropped + self.unclassified == self.input
    }
}

/// Stage at which a reportable record left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStage {
    Validation,
    Unclassified,
}

/// One line of the drop report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropEntry {
    pub sequence: u64,
    pub record_key: Option<String>,
    pub stage: DropStage,
    pub rule: Option<RuleId>,
    pub reason: String,
}

/// Everything a run hands to the output collaborators
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ProcessingSummary,
    pub batches: Vec<OutputBatch>,
    pub drops: Vec<DropEntry>,
}

impl RunOutput {
    pub fn batch(&self, lob: &str) -> Option<&OutputBatch> {
        self.batches.iter().find(|batch| batch.lob.as_str() == lob)
    }
}

/// Single-writer accumulator of per-LOB batches and run counters.
/// Outcomes must be pushed in arrival order.
#[derive(Debug)]
pub struct BatchAssembler {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    batches: Vec<OutputBatch>,
    positions: HashMap<LobId, usize>,
    summary: ProcessingSummary,
    drops: Vec<DropEntry>,
}

impl BatchAssembler {
    /// One batch is prepared per configured line of business, in that order
    pub fn new(lobs: &[LobId]) -> Self {
        let mut assembler = Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            batches: Vec::with_capacity(lobs.len()),
            positions: HashMap::with_capacity(lobs.len()),
            summary: ProcessingSummary::default(),
            drops: Vec::new(),
        };
        for lob in lobs {
            assembler.batch_position(lob);
        }
        assembler
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn summary(&self) -> &ProcessingSummary {
        &self.summary
    }

    pub fn push(&mut self, outcome: RecordOutcome) {
        self.summary.input += 1;
        self.tally_diagnostics(outcome.diagnostics());

        match outcome {
            RecordOutcome::Filtered { .. } => {
                self.summary.filtered += 1;
            }
            RecordOutcome::ValidationDropped { record, rule, reason } => {
                self.summary.validation_dropped += 1;
                *self.summary.drop_reasons.entry(rule.to_string()).or_insert(0) += 1;
                self.drops.push(DropEntry {
                    sequence: record.sequence(),
                    record_key: record.key(),
                    stage: DropStage::Validation,
                    rule: Some(rule),
                    reason,
                });
            }
            RecordOutcome::Unclassified { record } => {
                self.summary.unclassified += 1;
                self.drops.push(DropEntry {
                    sequence: record.sequence(),
                    record_key: record.key(),
                    stage: DropStage::Unclassified,
                    rule: None,
                    reason: "no line-of-business rule matched".to_string(),
                });
            }
            RecordOutcome::Accepted { record, defaulted } => {
                self.summary.accepted += 1;
                if defaulted {
                    self.summary.routed_to_default += 1;
                }
                self.fan_out(record);
            }
        }
    }

    /// Mark the run as stopped before the source was exhausted
    pub fn mark_cancelled(&mut self) {
        self.summary.cancelled = true;
    }

    pub fn finish(self) -> RunOutput {
        debug!(run_id = %self.run_id, input = self.summary.input, "batch assembly finished");
        RunOutput {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            summary: self.summary,
            batches: self.batches,
            drops: self.drops,
        }
    }

    /// Copy the record into every batch it was assigned to. The last batch
    /// takes ownership of the original.
    fn fan_out(&mut self, record: ClassifiedRecord) {
        let lobs: Vec<LobId> = record.lobs().to_vec();
        let Some((last, rest)) = lobs.split_last() else {
            return;
        };

        for lob in rest {
            let position = self.batch_position(lob);
            self.batches[position].records.push(record.clone());
            *self.summary.lob_counts.entry(lob.to_string()).or_insert(0) += 1;
        }
        let position = self.batch_position(last);
        self.batches[position].records.push(record);
        *self.summary.lob_counts.entry(last.to_string()).or_insert(0) += 1;
    }

    fn batch_position(&mut self, lob: &LobId) -> usize {
        if let Some(&position) = self.positions.get(lob) {
            return position;
        }
        let position = self.batches.len();
        self.batches.push(OutputBatch::new(lob.clone()));
        self.positions.insert(lob.clone(), position);
        position
    }

    fn tally_diagnostics(&mut self, diagnostics: &[Diagnostic]) {
        for diagnostic in diagnostics {
            match diagnostic {
                Diagnostic::CoercionFailure { field, .. } => {
                    *self.summary.coercion_failures.entry(field.clone()).or_insert(0) += 1;
                }
                Diagnostic::ValidationWarning { rule, .. } => {
                    *self.summary.warnings.entry(rule.clone()).or_insert(0) += 1;
                }
            }
        }
    }
}
