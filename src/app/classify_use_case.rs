use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::app::ports::{BatchSink, SinkReport};
use crate::domain::RawRecord;
use crate::observability::metrics;
use crate::pipeline::{Cancellation, Pipeline, RunOutput};

/// Per-sink result within a run report
#[derive(Debug, Clone, Serialize)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub report: SinkReport,
}

/// A finished run and what each sink made of it
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output: RunOutput,
    pub sinks: Vec<SinkOutcome>,
}

/// Use case running the pipeline over a record source and handing the
/// batches to every configured sink, in order
pub struct ClassifyUseCase {
    pipeline: Arc<Pipeline>,
    sinks: Vec<Box<dyn BatchSink>>,
}

impl ClassifyUseCase {
    pub fn new(pipeline: Arc<Pipeline>, sinks: Vec<Box<dyn BatchSink>>) -> Self {
        Self { pipeline, sinks }
    }

    /// Classify the records, then deliver. Sinks still run for a cancelled
    /// run so the records already processed are not lost.
    pub async fn execute<I>(&self, records: I, cancel: Cancellation) -> Result<RunReport>
    where
        I: IntoIterator<Item = RawRecord>,
        I::IntoIter: Send + 'static,
    {
        let started = Instant::now();
        let output = Arc::clone(&self.pipeline)
            .run_concurrent(records, cancel)
            .await
            .context("pipeline run failed")?;
        metrics::pipeline::run_duration(started.elapsed().as_secs_f64());

        if output.summary.cancelled {
            warn!(run_id = %output.run_id, processed = output.summary.input, "Run cancelled; delivering partial batches");
        }

        let mut sinks = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let sink_started = Instant::now();
            let report = sink
                .deliver(&output)
                .await
                .with_context(|| format!("sink '{}' failed", sink.name()))?;
            metrics::sink::delivered(sink.name(), &report, sink_started.elapsed().as_secs_f64());
            info!(
                sink = sink.name(),
                delivered = report.delivered,
                removed = report.removed,
                unchanged = report.unchanged,
                skipped = report.skipped,
                failed = report.failed,
                "Sink finished"
            );
            sinks.push(SinkOutcome {
                sink: sink.name(),
                report,
            });
        }

        Ok(RunReport { output, sinks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::cancellation;
    use async_trait::async_trait;

    struct MockSink {
        pub seen: Arc<tokio::sync::Mutex<Vec<(String, usize)>>>,
    }

    impl MockSink {
        pub fn new() -> Self {
            Self {
                seen: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl BatchSink for MockSink {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn deliver(&self, output: &RunOutput) -> Result<SinkReport> {
            let mut seen = self.seen.lock().await;
            let mut report = SinkReport::default();
            for batch in &output.batches {
                seen.push((batch.lob.to_string(), batch.len()));
                report.delivered += batch.len();
            }
            Ok(report)
        }
    }

    struct FailingSink;

    #[async_trait]
    impl BatchSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _output: &RunOutput) -> Result<SinkReport> {
            anyhow::bail!("disk full")
        }
    }

    fn pipeline() -> Arc<Pipeline> {
        let config = PipelineConfig::from_toml_str(
            r#"
            [[projection]]
            field = "Id"
            data_type = "id"

            [[projection]]
            field = "BusinessUnit__c"
            data_type = "picklist"

            [[classification]]
            lob = "Retail"
            field = "BusinessUnit__c"
            value = "Retail"

            [[classification]]
            lob = "Cards"
            field = "BusinessUnit__c"
            value = "Cards"
            "#,
        )
        .unwrap();
        Arc::new(Pipeline::from_config(&config).unwrap())
    }

    fn records() -> Vec<RawRecord> {
        ["Retail", "Cards", "Retail", "Wealth"]
            .iter()
            .enumerate()
            .map(|(i, unit)| {
                [("Id", Some(format!("kA{}", i))), ("BusinessUnit__c", Some(unit.to_string()))]
                    .into_iter()
                    .collect()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_classify_use_case_delivers_every_batch() {
        let sink = MockSink::new();
        let seen = sink.seen.clone();
        let use_case = ClassifyUseCase::new(pipeline(), vec![Box::new(sink)]);

        let report = use_case.execute(records(), Cancellation::never()).await.unwrap();

        assert_eq!(report.output.summary.accepted, 3);
        assert_eq!(report.output.summary.unclassified, 1);
        assert_eq!(report.sinks.len(), 1);
        assert_eq!(report.sinks[0].report.delivered, 3);
        assert_eq!(
            *seen.lock().await,
            vec![("Retail".to_string(), 2), ("Cards".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported() {
        let use_case = ClassifyUseCase::new(pipeline(), vec![Box::new(FailingSink)]);
        let err = use_case.execute(records(), Cancellation::never()).await.unwrap_err();
        assert!(err.to_string().contains("failing"));
    }

    #[tokio::test]
    async fn test_cancelled_run_still_reaches_sinks() {
        let sink = MockSink::new();
        let seen = sink.seen.clone();
        let use_case = ClassifyUseCase::new(pipeline(), vec![Box::new(sink)]);
        let (handle, cancel) = cancellation();
        handle.cancel();

        let report = use_case.execute(records(), cancel).await.unwrap();

        assert!(report.output.summary.cancelled);
        assert_eq!(report.output.summary.input, 0);
        assert_eq!(seen.lock().await.len(), 2);
    }
}
