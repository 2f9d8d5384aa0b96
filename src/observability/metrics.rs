//! Metrics for the knowledge record pipeline
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Every metric the pipeline emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run-level metrics
    RunsCompleted,
    RunsCancelled,
    RunDuration,

    // Record outcome metrics
    RecordsIngested,
    RecordsAccepted,
    RecordsFiltered,
    RecordsValidationDropped,
    RecordsUnclassified,
    RecordsRoutedToDefault,
    LobAssignments,
    CoercionFailures,
    ValidationWarnings,

    // Source metrics
    SourceFilesOpened,
    SourceMalformedLines,

    // Sink metrics
    SinkDelivered,
    SinkRemoved,
    SinkUnchanged,
    SinkSkipped,
    SinkFailed,
    SinkDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsCompleted => "kb_runs_completed_total",
            MetricName::RunsCancelled => "kb_runs_cancelled_total",
            MetricName::RunDuration => "kb_run_duration_seconds",

            MetricName::RecordsIngested => "kb_records_ingested_total",
            MetricName::RecordsAccepted => "kb_records_accepted_total",
            MetricName::RecordsFiltered => "kb_records_filtered_total",
            MetricName::RecordsValidationDropped => "kb_records_validation_dropped_total",
            MetricName::RecordsUnclassified => "kb_records_unclassified_total",
            MetricName::RecordsRoutedToDefault => "kb_records_routed_to_default_total",
            MetricName::LobAssignments => "kb_lob_assignments_total",
            MetricName::CoercionFailures => "kb_coercion_failures_total",
            MetricName::ValidationWarnings => "kb_validation_warnings_total",

            MetricName::SourceFilesOpened => "kb_source_files_opened_total",
            MetricName::SourceMalformedLines => "kb_source_malformed_lines_total",

            MetricName::SinkDelivered => "kb_sink_delivered_total",
            MetricName::SinkRemoved => "kb_sink_removed_total",
            MetricName::SinkUnchanged => "kb_sink_unchanged_total",
            MetricName::SinkSkipped => "kb_sink_skipped_total",
            MetricName::SinkFailed => "kb_sink_failed_total",
            MetricName::SinkDuration => "kb_sink_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus exporter listening on `addr`. Without an address
/// nothing is installed and every recording call stays a no-op.
pub fn init_metrics(addr: Option<SocketAddr>) {
    let Some(addr) = addr else {
        return;
    };
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

pub mod pipeline {
    use super::MetricName;
    use crate::domain::Diagnostic;
    use crate::pipeline::{ProcessingSummary, RecordOutcome};

    /// Record the terminal state of one record
    pub fn outcome_recorded(outcome: &RecordOutcome) {
        ::metrics::counter!(MetricName::RecordsIngested.as_str()).increment(1);

        match outcome {
            RecordOutcome::Filtered { rule, .. } => {
                ::metrics::counter!(MetricName::RecordsFiltered.as_str(), "rule" => rule.to_string()).increment(1);
            }
            RecordOutcome::ValidationDropped { rule, .. } => {
                ::metrics::counter!(MetricName::RecordsValidationDropped.as_str(), "rule" => rule.to_string())
                    .increment(1);
            }
            RecordOutcome::Unclassified { .. } => {
                ::metrics::counter!(MetricName::RecordsUnclassified.as_str()).increment(1);
            }
            RecordOutcome::Accepted { record, defaulted } => {
                ::metrics::counter!(MetricName::RecordsAccepted.as_str()).increment(1);
                if *defaulted {
                    ::metrics::counter!(MetricName::RecordsRoutedToDefault.as_str()).increment(1);
                }
                for lob in record.lobs() {
                    ::metrics::counter!(MetricName::LobAssignments.as_str(), "lob" => lob.to_string()).increment(1);
                }
            }
        }

        for diagnostic in outcome.diagnostics() {
            match diagnostic {
                Diagnostic::CoercionFailure { field, .. } => {
                    ::metrics::counter!(MetricName::CoercionFailures.as_str(), "field" => field.clone()).increment(1);
                }
                Diagnostic::ValidationWarning { rule, .. } => {
                    ::metrics::counter!(MetricName::ValidationWarnings.as_str(), "rule" => rule.clone()).increment(1);
                }
            }
        }
    }

    /// Record the end of a run
    pub fn run_completed(summary: &ProcessingSummary) {
        ::metrics::counter!(MetricName::RunsCompleted.as_str()).increment(1);
        if summary.cancelled {
            ::metrics::counter!(MetricName::RunsCancelled.as_str()).increment(1);
        }
    }

    pub fn run_duration(seconds: f64) {
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(seconds);
    }
}

// ============================================================================
// Source Metrics
// ============================================================================

pub mod source {
    use super::MetricName;

    pub fn file_opened() {
        ::metrics::counter!(MetricName::SourceFilesOpened.as_str()).increment(1);
    }

    pub fn malformed_line() {
        ::metrics::counter!(MetricName::SourceMalformedLines.as_str()).increment(1);
    }
}

// ============================================================================
// Sink Metrics
// ============================================================================

pub mod sink {
    use super::MetricName;
    use crate::app::ports::SinkReport;

    /// Record what one sink did with a run's batches
    pub fn delivered(sink: &'static str, report: &SinkReport, seconds: f64) {
        let counts = [
            (MetricName::SinkDelivered, report.delivered),
            (MetricName::SinkRemoved, report.removed),
            (MetricName::SinkUnchanged, report.unchanged),
            (MetricName::SinkSkipped, report.skipped),
            (MetricName::SinkFailed, report.failed),
        ];
        for (metric, count) in counts {
            if count > 0 {
                ::metrics::counter!(metric.as_str(), "sink" => sink).increment(count as u64);
            }
        }
        ::metrics::histogram!(MetricName::SinkDuration.as_str(), "sink" => sink).record(seconds);
    }
}
