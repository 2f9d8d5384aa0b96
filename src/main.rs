use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use kb_pipeline::app::ports::BatchSink;
use kb_pipeline::app::{ClassifyUseCase, SinkOutcome};
use kb_pipeline::config::PipelineConfig;
use kb_pipeline::constants;
use kb_pipeline::infra::{HtmlPublishSink, NdjsonBatchSink, NdjsonRecordSource, SourceStatsSnapshot};
use kb_pipeline::observability::{init_logging, init_metrics};
use kb_pipeline::pipeline::{cancellation, Pipeline, ProcessingSummary, RunSettings};

#[derive(Parser)]
#[command(name = "kb_pipeline")]
#[command(about = "Classify exported knowledge articles into line-of-business batches")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over an NDJSON export
    Run {
        /// Pipeline configuration (defaults to $KB_PIPELINE_CONFIG, then config/pipeline.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Export file, or a directory of export files
        #[arg(long)]
        input: PathBuf,
        /// Directory receiving the per-LOB partitions and the run summary
        #[arg(long)]
        output: PathBuf,
        /// Also publish article HTML into the directories of the LOB mapping
        #[arg(long)]
        publish: bool,
        /// Records per worker chunk
        #[arg(long)]
        batch_size: Option<usize>,
        /// Chunks processed in parallel
        #[arg(long)]
        workers: Option<usize>,
        /// Write daily-rotated JSON logs into this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Expose Prometheus metrics on this address, e.g. 127.0.0.1:9898
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
    /// Compile a configuration and report what it declares
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct RunSummaryOutput<'a> {
    run_id: String,
    summary: &'a ProcessingSummary,
    source: SourceStatsSnapshot,
    sinks: &'a [SinkOutcome],
}

fn resolve_config_path(config: Option<PathBuf>) -> PathBuf {
    config
        .or_else(|| std::env::var(constants::ENV_CONFIG_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_CONFIG_PATH))
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(path)?;
    config.apply_process_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            publish,
            batch_size,
            workers,
            log_dir,
            metrics_addr,
        } => {
            let _guard = init_logging(log_dir.as_deref())?;
            init_metrics(metrics_addr);

            let config_path = resolve_config_path(config);
            let config = load_config(&config_path)?;

            let mut pipeline = Pipeline::from_config(&config)?;
            if batch_size.is_some() || workers.is_some() {
                let current = pipeline.settings();
                pipeline = pipeline.with_settings(RunSettings {
                    batch_size: batch_size.unwrap_or(current.batch_size),
                    max_workers: workers.unwrap_or(current.max_workers),
                })?;
            }

            let mut sinks: Vec<Box<dyn BatchSink>> = vec![Box::new(NdjsonBatchSink::new(&output))];
            if publish {
                for field in [
                    &config.publish.status_field,
                    &config.publish.title_field,
                    &config.publish.url_name_field,
                    &config.publish.content_field,
                ] {
                    if pipeline.projection().index_of(field).is_none() {
                        warn!("Publish field '{}' is not projected; nothing will be published for it", field);
                    }
                }
                sinks.push(Box::new(HtmlPublishSink::new(config.publish.clone())));
            }

            let source = NdjsonRecordSource::open(&input)
                .with_context(|| format!("opening input {}", input.display()))?;
            let source_stats = source.stats();

            let (cancel_handle, cancel) = cancellation();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; finishing records already read");
                    cancel_handle.cancel();
                }
            });

            let use_case = ClassifyUseCase::new(Arc::new(pipeline), sinks);
            let report = match use_case.execute(source, cancel).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Run failed: {:#}", e);
                    return Err(e);
                }
            };

            let source = source_stats.snapshot();
            if source.malformed > 0 {
                warn!("{} malformed export line(s) skipped", source.malformed);
            }
            let printed = RunSummaryOutput {
                run_id: report.output.run_id.to_string(),
                summary: &report.output.summary,
                source,
                sinks: &report.sinks,
            };
            println!("{}", serde_json::to_string_pretty(&printed)?);
            info!("Run {} complete", report.output.run_id);
        }
        Commands::CheckConfig { config } => {
            let _guard = init_logging(None)?;
            let config_path = resolve_config_path(config);
            let config = load_config(&config_path)?;
            let pipeline = Pipeline::from_config(&config)?;

            println!("Configuration {} is valid", config_path.display());
            println!("  Fields:");
            for spec in pipeline.projection().fields() {
                println!("    {} ({})", spec.name, spec.data_type);
            }
            println!("  Filters: {}", config.filters.len());
            println!("  Validations: {}", config.validations.len());
            println!("  Match policy: {:?}", config.pipeline.match_policy);
            println!("  Lines of business:");
            for lob in pipeline.lobs() {
                let target = config
                    .publish
                    .lob_mapping
                    .get(lob.as_str())
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_else(|| "(not mapped)".to_string());
                println!("    {} -> {}.{} | {}", lob, lob.slug(), constants::PARTITION_EXTENSION, target);
            }
            let settings = pipeline.settings();
            println!("  Batch size: {}, workers: {}", settings.batch_size, settings.max_workers);
        }
    }
    Ok(())
}
