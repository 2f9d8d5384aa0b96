use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::ports::{BatchSink, SinkReport};
use crate::constants;
use crate::pipeline::{DropEntry, ProcessingSummary, RunOutput};

/// Writes each line-of-business batch as `<slug>.ndjson` plus a run
/// `summary.json` into one output directory
pub struct NdjsonBatchSink {
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct PartitionEntry {
    lob: String,
    file: String,
    records: usize,
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    summary: &'a ProcessingSummary,
    partitions: Vec<PartitionEntry>,
    drops: &'a [DropEntry],
}

impl NdjsonBatchSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn partition_file_name(slug: &str) -> String {
        format!("{}.{}", slug, constants::PARTITION_EXTENSION)
    }
}

#[async_trait]
impl BatchSink for NdjsonBatchSink {
    fn name(&self) -> &'static str {
        "ndjson"
    }

    async fn deliver(&self, output: &RunOutput) -> Result<SinkReport> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("creating output directory {}", self.output_dir.display()))?;

        let mut report = SinkReport::default();
        let mut partitions = Vec::with_capacity(output.batches.len());

        for batch in &output.batches {
            let file = Self::partition_file_name(&batch.lob.slug());
            let path = self.output_dir.join(&file);

            let mut buffer = Vec::new();
            for record in &batch.records {
                serde_json::to_writer(&mut buffer, record)?;
                buffer.push(b'\n');
            }
            tokio::fs::write(&path, &buffer)
                .await
                .with_context(|| format!("writing partition {}", path.display()))?;

            debug!(lob = %batch.lob, records = batch.len(), "Wrote partition {}", path.display());
            report.delivered += batch.len();
            partitions.push(PartitionEntry {
                lob: batch.lob.to_string(),
                file,
                records: batch.len(),
            });
        }

        let document = SummaryDocument {
            run_id: output.run_id,
            started_at: output.started_at,
            finished_at: output.finished_at,
            summary: &output.summary,
            partitions,
            drops: &output.drops,
        };
        let summary_path = self.output_dir.join(constants::SUMMARY_FILE_NAME);
        tokio::fs::write(&summary_path, serde_json::to_vec_pretty(&document)?)
            .await
            .with_context(|| format!("writing run summary {}", summary_path.display()))?;

        info!(
            "Wrote {} partition(s) and run summary to {}",
            output.batches.len(),
            self.output_dir.display()
        );
        Ok(report)
    }
}
