use async_trait::async_trait;
use serde::Serialize;

use crate::pipeline::RunOutput;

/// What a sink did with a run's batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    /// Records (or files) written
    pub delivered: usize,
    /// Previously published files removed
    pub removed: usize,
    /// Writes skipped because the target already had identical content
    pub unchanged: usize,
    /// Records the sink has nothing to do for
    pub skipped: usize,
    /// Records that could not be delivered
    pub failed: usize,
}

impl SinkReport {
    pub fn merge(&mut self, other: SinkReport) {
        self.delivered += other.delivered;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Output port receiving the assembled batches of a finished run
#[async_trait]
pub trait BatchSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, output: &RunOutput) -> anyhow::Result<SinkReport>;
}
