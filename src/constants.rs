/// Field and setting defaults shared across the pipeline, the sinks and the CLI.
/// Field names follow the CRM knowledge export.

// Export field names
pub const DEFAULT_CONTENT_FIELD: &str = "Content__c";
pub const DEFAULT_TITLE_FIELD: &str = "Title";
pub const DEFAULT_URL_NAME_FIELD: &str = "UrlName";
pub const DEFAULT_STATUS_FIELD: &str = "PublishStatus";

// Publish status values
pub const STATUS_ONLINE: &str = "Online";
pub const STATUS_ARCHIVED: &str = "Archived";

// Run sizing
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_MAX_WORKERS: usize = 10;

// Environment overrides
pub const ENV_CONFIG_PATH: &str = "KB_PIPELINE_CONFIG";
pub const ENV_LOB_MAPPING: &str = "LOB_MAPPING";
pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
pub const ENV_MAX_THREADS: &str = "MAX_THREADS";
pub const ENV_CONTENT_FIELD: &str = "CONTENT_FIELD";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

// Output artifacts
pub const SUMMARY_FILE_NAME: &str = "summary.json";
pub const PARTITION_EXTENSION: &str = "ndjson";
pub const PUBLISHED_EXTENSION: &str = "html";

/// Export file extensions picked up when the input is a directory
pub fn supported_input_extensions() -> Vec<&'static str> {
    vec!["json", "jsonl", "ndjson"]
}
