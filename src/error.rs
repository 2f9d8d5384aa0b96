use thiserror::Error;

/// Fatal configuration problems. Raised while loading and compiling the
/// pipeline configuration, before any record is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Projection declares no fields")]
    EmptyProjection,

    #[error("Field '{0}' is declared more than once in the projection")]
    DuplicateField(String),

    #[error("Unknown data type '{data_type}' for field '{field}'")]
    UnknownDataType { field: String, data_type: String },

    #[error("Unknown operator '{operator}' in {rule}")]
    UnknownOperator { rule: String, operator: String },

    #[error("Unknown validation action '{action}' in {rule}")]
    UnknownAction { rule: String, action: String },

    #[error("{rule} references field '{field}' which is not in the projection")]
    UndeclaredField { rule: String, field: String },

    #[error("{rule}: {detail}")]
    InvalidArity { rule: String, detail: String },

    #[error("{rule}: comparison value '{value}' is not a valid {data_type}")]
    InvalidComparisonValue {
        rule: String,
        value: String,
        data_type: String,
    },

    #[error("Line of business identifier must not be empty")]
    EmptyLobId,

    #[error("Line of business '{0}' is declared with conflicting classification rules")]
    ConflictingLobRules(String),

    #[error("Lines of business '{first}' and '{second}' would share the partition name '{slug}'")]
    PartitionNameCollision {
        first: String,
        second: String,
        slug: String,
    },

    #[error("Sanitize field '{field}': {detail}")]
    InvalidSanitizeField { field: String, detail: String },

    #[error("Invalid value for {key}: {detail}")]
    InvalidSetting { key: String, detail: String },
}

/// Errors surfaced by a pipeline run. Per-record problems are never errors;
/// they are reported through the run summary.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pipeline worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
