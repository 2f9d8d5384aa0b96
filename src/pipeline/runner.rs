use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::assembler::{BatchAssembler, RecordOutcome, RunOutput};
use super::cancel::Cancellation;
use super::processing::classify::Classifier;
use super::processing::filter::{compile_filters, first_failing_filter};
use super::processing::projection::project;
use super::processing::rules::Rule;
use super::processing::sanitize::FieldSanitizer;
use super::processing::validation::{compile_validations, validate, ValidationOutcome};
use super::processing::Routing;
use crate::config::PipelineConfig;
use crate::domain::{ClassifiedRecord, FieldSpec, FieldType, LobId, Projection, RawRecord};
use crate::error::{ConfigError, PipelineError};
use crate::observability::metrics;

/// Chunking and parallelism for [`Pipeline::run_concurrent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub batch_size: usize,
    pub max_workers: usize,
}

/// A compiled configuration: every rule is resolved against the projection
/// before the first record is read.
#[derive(Debug)]
pub struct Pipeline {
    projection: Arc<Projection>,
    filters: Vec<Rule>,
    validations: Vec<Rule>,
    sanitizer: FieldSanitizer,
    classifier: Classifier,
    settings: RunSettings,
}

impl Pipeline {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let specs = config
            .projection
            .iter()
            .map(|field| Ok(FieldSpec::new(field.field.as_str(), FieldType::from_config(&field.field, &field.data_type)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let projection = Arc::new(Projection::new(specs)?);

        let filters = compile_filters(&config.filters, &projection)?;
        let validations = compile_validations(&config.validations, &projection)?;
        let sanitizer = FieldSanitizer::compile(&config.sanitize, &projection)?;
        let classifier = Classifier::compile(
            &config.classification,
            &projection,
            config.pipeline.match_policy,
            config.pipeline.default_lob.as_deref(),
        )?;

        let settings = RunSettings {
            batch_size: config.pipeline.batch_size,
            max_workers: config.pipeline.max_workers,
        };
        check_settings(settings)?;

        info!(
            fields = projection.len(),
            filters = filters.len(),
            validations = validations.len(),
            lobs = classifier.lobs().len(),
            policy = ?classifier.policy(),
            "Pipeline compiled"
        );

        Ok(Self {
            projection,
            filters,
            validations,
            sanitizer,
            classifier,
            settings,
        })
    }

    /// Override chunk size and worker count, e.g. from the command line
    pub fn with_settings(mut self, settings: RunSettings) -> Result<Self, ConfigError> {
        check_settings(settings)?;
        self.settings = settings;
        Ok(self)
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    /// Lines of business that receive a batch, in configured order
    pub fn lobs(&self) -> &[LobId] {
        self.classifier.lobs()
    }

    pub fn settings(&self) -> RunSettings {
        self.settings
    }

    /// Take one raw record through projection, filtering, validation,
    /// sanitizing and classification
    pub fn process(&self, sequence: u64, raw: &RawRecord) -> RecordOutcome {
        let record = project(sequence, raw, &self.projection);

        if let Some(rule) = first_failing_filter(&record, &self.filters) {
            let rule = rule.id().clone();
            return RecordOutcome::Filtered { record, rule };
        }

        let report = validate(&record, &self.validations);
        let record = record.with_diagnostics(report.warnings);
        if let ValidationOutcome::Drop { rule, reason } = report.outcome {
            return RecordOutcome::ValidationDropped { record, rule, reason };
        }

        let record = self.sanitizer.apply(record);

        match self.classifier.route(&record) {
            Routing::Assigned(lobs) => RecordOutcome::Accepted {
                record: ClassifiedRecord::new(record, lobs),
                defaulted: false,
            },
            Routing::Defaulted(lob) => RecordOutcome::Accepted {
                record: ClassifiedRecord::new(record, vec![lob]),
                defaulted: true,
            },
            Routing::Unclassified => RecordOutcome::Unclassified { record },
        }
    }

    /// Lazily process records, numbering them in arrival order
    pub fn outcomes<'a, I>(&'a self, records: I) -> impl Iterator<Item = RecordOutcome> + 'a
    where
        I: IntoIterator<Item = RawRecord> + 'a,
        I::IntoIter: 'a,
    {
        records
            .into_iter()
            .enumerate()
            .map(move |(sequence, raw)| self.process(sequence as u64, &raw))
    }

    /// Lazily yield only the records that were assigned a line of business
    pub fn classified<'a, I>(&'a self, records: I) -> impl Iterator<Item = ClassifiedRecord> + 'a
    where
        I: IntoIterator<Item = RawRecord> + 'a,
        I::IntoIter: 'a,
    {
        self.outcomes(records).filter_map(|outcome| match outcome {
            RecordOutcome::Accepted { record, .. } => Some(record),
            _ => None,
        })
    }

    /// An empty assembler with one batch per line of business
    pub fn assembler(&self) -> BatchAssembler {
        BatchAssembler::new(self.classifier.lobs())
    }

    pub fn run<I>(&self, records: I) -> RunOutput
    where
        I: IntoIterator<Item = RawRecord>,
    {
        self.run_with_cancellation(records, &Cancellation::never())
    }

    /// Process records on the calling thread. Cancellation is checked before
    /// each record is pulled; records already pulled are completed.
    #[instrument(skip_all)]
    pub fn run_with_cancellation<I>(&self, records: I, cancel: &Cancellation) -> RunOutput
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut assembler = self.assembler();
        info!(run_id = %assembler.run_id(), "Starting pipeline run");

        let mut source = records.into_iter();
        let mut sequence: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                assembler.mark_cancelled();
                break;
            }
            let Some(raw) = source.next() else {
                break;
            };
            reduce(&mut assembler, self.process(sequence, &raw));
            sequence += 1;
        }

        finish(assembler)
    }

    /// Process records in chunks of `batch_size` on the blocking pool with at
    /// most `max_workers` chunks in flight. Chunks are also pulled from the
    /// source on the blocking pool, since sources may do file I/O. Outcomes
    /// are reduced in arrival order by this task alone.
    #[instrument(skip_all, fields(batch_size = self.settings.batch_size, max_workers = self.settings.max_workers))]
    pub async fn run_concurrent<I>(self: Arc<Self>, records: I, cancel: Cancellation) -> Result<RunOutput, PipelineError>
    where
        I: IntoIterator<Item = RawRecord>,
        I::IntoIter: Send + 'static,
    {
        let RunSettings { batch_size, max_workers } = self.settings;
        let mut assembler = self.assembler();
        info!(run_id = %assembler.run_id(), "Starting concurrent pipeline run");

        let mut in_flight: VecDeque<JoinHandle<Vec<RecordOutcome>>> = VecDeque::with_capacity(max_workers);
        let mut source = records.into_iter();
        let mut sequence: u64 = 0;
        let mut cancelled = false;

        loop {
            let pull_cancel = cancel.clone();
            let first = sequence;
            let (returned, chunk, stopped) = tokio::task::spawn_blocking(move || {
                let (chunk, stopped) = pull_chunk(&mut source, &pull_cancel, batch_size, first);
                (source, chunk, stopped)
            })
            .await?;
            source = returned;
            sequence += chunk.len() as u64;
            cancelled |= stopped;
            let last_chunk = chunk.len() < batch_size;

            if !chunk.is_empty() {
                if in_flight.len() >= max_workers {
                    if let Some(handle) = in_flight.pop_front() {
                        for outcome in handle.await? {
                            reduce(&mut assembler, outcome);
                        }
                    }
                }
                debug!(records = chunk.len(), first, "Dispatching chunk");
                let pipeline = Arc::clone(&self);
                in_flight.push_back(tokio::task::spawn_blocking(move || {
                    chunk
                        .into_iter()
                        .map(|(sequence, raw)| pipeline.process(sequence, &raw))
                        .collect::<Vec<_>>()
                }));
            }

            if last_chunk {
                break;
            }
        }

        while let Some(handle) = in_flight.pop_front() {
            for outcome in handle.await? {
                reduce(&mut assembler, outcome);
            }
        }

        if cancelled {
            assembler.mark_cancelled();
        }
        Ok(finish(assembler))
    }
}

fn check_settings(settings: RunSettings) -> Result<(), ConfigError> {
    if settings.batch_size == 0 {
        return Err(ConfigError::InvalidSetting {
            key: "batch_size".to_string(),
            detail: "must be greater than zero".to_string(),
        });
    }
    if settings.max_workers == 0 {
        return Err(ConfigError::InvalidSetting {
            key: "max_workers".to_string(),
            detail: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Pull up to `batch_size` records, numbering them from `first`. Returns the
/// chunk and whether cancellation stopped the pull.
fn pull_chunk<S>(source: &mut S, cancel: &Cancellation, batch_size: usize, first: u64) -> (Vec<(u64, RawRecord)>, bool)
where
    S: Iterator<Item = RawRecord>,
{
    let mut chunk = Vec::with_capacity(batch_size);
    while chunk.len() < batch_size {
        if cancel.is_cancelled() {
            return (chunk, true);
        }
        match source.next() {
            Some(raw) => chunk.push((first + chunk.len() as u64, raw)),
            None => break,
        }
    }
    (chunk, false)
}

fn reduce(assembler: &mut BatchAssembler, outcome: RecordOutcome) {
    metrics::pipeline::outcome_recorded(&outcome);
    assembler.push(outcome);
}

fn finish(assembler: BatchAssembler) -> RunOutput {
    let output = assembler.finish();
    let summary = &output.summary;
    metrics::pipeline::run_completed(summary);
    info!(
        run_id = %output.run_id,
        input = summary.input,
        accepted = summary.accepted,
        filtered = summary.filtered,
        validation_dropped = summary.validation_dropped,
        unclassified = summary.unclassified,
        routed_to_default = summary.routed_to_default,
        cancelled = summary.cancelled,
        "Pipeline run finished"
    );
    output
}
