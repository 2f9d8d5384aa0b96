use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants;
use crate::error::ConfigError;
use crate::pipeline::processing::MatchPolicy;

/// Declarative pipeline configuration, loaded once per run
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: RunConfig,
    pub projection: Vec<FieldConfig>,
    #[serde(default)]
    pub filters: Vec<RuleConfig>,
    #[serde(default)]
    pub validations: Vec<ValidationConfig>,
    #[serde(default)]
    pub classification: Vec<ClassificationConfig>,
    #[serde(default)]
    pub sanitize: SanitizeConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub match_policy: MatchPolicy,
    /// Unmatched records are routed here instead of being reported unclassified
    pub default_lob: Option<String>,
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::default(),
            default_lob: None,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_workers: constants::DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub field: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: Option<String>,
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    pub name: Option<String>,
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationConfig {
    pub lob: String,
    pub field: String,
    pub value: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

impl ClassificationConfig {
    /// `value` and `values` combined, `value` first
    pub fn expected_values(&self) -> Vec<String> {
        self.value.iter().chain(self.values.iter()).cloned().collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SanitizeConfig {
    pub fields: Vec<String>,
}

/// Settings for publishing article HTML per line of business
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub status_field: String,
    pub online_value: String,
    pub archived_value: String,
    pub title_field: String,
    pub url_name_field: String,
    pub content_field: String,
    /// Line of business -> output directory
    pub lob_mapping: BTreeMap<String, PathBuf>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            status_field: constants::DEFAULT_STATUS_FIELD.to_string(),
            online_value: constants::STATUS_ONLINE.to_string(),
            archived_value: constants::STATUS_ARCHIVED.to_string(),
            title_field: constants::DEFAULT_TITLE_FIELD.to_string(),
            url_name_field: constants::DEFAULT_URL_NAME_FIELD.to_string(),
            content_field: constants::DEFAULT_CONTENT_FIELD.to_string(),
            lob_mapping: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Read and parse a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded pipeline configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.check_settings()?;
        Ok(config)
    }

    /// Apply `LOB_MAPPING`, `BATCH_SIZE`, `MAX_THREADS` and `CONTENT_FIELD`
    /// overrides, looked up through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mapping) = lookup(constants::ENV_LOB_MAPPING) {
            self.publish.lob_mapping = parse_lob_mapping(&mapping)?;
            debug!(lobs = self.publish.lob_mapping.len(), "LOB mapping overridden from environment");
        }
        if let Some(batch_size) = lookup(constants::ENV_BATCH_SIZE) {
            self.pipeline.batch_size = parse_count(constants::ENV_BATCH_SIZE, &batch_size)?;
        }
        if let Some(max_workers) = lookup(constants::ENV_MAX_THREADS) {
            self.pipeline.max_workers = parse_count(constants::ENV_MAX_THREADS, &max_workers)?;
        }
        if let Some(content_field) = lookup(constants::ENV_CONTENT_FIELD) {
            let content_field = content_field.trim();
            if !content_field.is_empty() {
                self.retarget_content_field(content_field);
            }
        }
        self.check_settings()
    }

    /// Point every use of the content field at `field`: the published body,
    /// the sanitized fields and the validations that checked the old field
    fn retarget_content_field(&mut self, field: &str) {
        let previous = std::mem::replace(&mut self.publish.content_field, field.to_string());
        if previous == field {
            return;
        }
        for name in self.sanitize.fields.iter_mut().filter(|name| **name == previous) {
            *name = field.to_string();
        }
        for validation in self.validations.iter_mut().filter(|v| v.field == previous) {
            validation.field = field.to_string();
        }
        debug!(from = %previous, to = %field, "Content field overridden from environment");
    }

    /// Apply overrides from the process environment. A `.env` file is loaded
    /// once at startup by the binary.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    fn check_settings(&self) -> Result<(), ConfigError> {
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "pipeline.batch_size".to_string(),
                detail: "must be greater than zero".to_string(),
            });
        }
        if self.pipeline.max_workers == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "pipeline.max_workers".to_string(),
                detail: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse `lob:dir,lob:dir`. Empty entries are skipped; the directory is
/// everything after the first colon.
pub fn parse_lob_mapping(mapping: &str) -> Result<BTreeMap<String, PathBuf>, ConfigError> {
    let mut parsed = BTreeMap::new();
    for pair in mapping.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (lob, dir) = pair.split_once(':').ok_or_else(|| ConfigError::InvalidSetting {
            key: constants::ENV_LOB_MAPPING.to_string(),
            detail: format!("entry '{}' is not of the form lob:directory", pair),
        })?;
        let (lob, dir) = (lob.trim(), dir.trim());
        if lob.is_empty() || dir.is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: constants::ENV_LOB_MAPPING.to_string(),
                detail: format!("entry '{}' has an empty side", pair),
            });
        }
        parsed.insert(lob.to_string(), PathBuf::from(dir));
    }
    Ok(parsed)
}

fn parse_count(key: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidSetting {
            key: key.to_string(),
            detail: format!("'{}' is not a positive integer", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        [[projection]]
        field = "Id"
        data_type = "id"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.pipeline.batch_size, 25);
        assert_eq!(config.pipeline.max_workers, 10);
        assert_eq!(config.pipeline.match_policy, MatchPolicy::AllMatches);
        assert_eq!(config.publish.content_field, "Content__c");
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let toml = format!("{}\n[pipeline]\nbatchsize = 5\n", MINIMAL);
        assert!(matches!(PipelineConfig::from_toml_str(&toml), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let toml = format!("[pipeline]\nbatch_size = 0\n{}", MINIMAL);
        assert!(matches!(
            PipelineConfig::from_toml_str(&toml),
            Err(ConfigError::InvalidSetting { key, .. }) if key == "pipeline.batch_size"
        ));
    }

    #[test]
    fn test_content_field_override_moves_sanitize_and_validation() {
        let toml = format!(
            "{}\n[[validations]]\nfield = \"Content__c\"\noperator = \"VALIDATE_NON_NULL\"\naction = \"DropRecord\"\n\n\
             [[validations]]\nfield = \"Title\"\noperator = \"VALIDATE_NON_NULL\"\naction = \"DropRecord\"\n\n\
             [sanitize]\nfields = [\"Title\", \"Content__c\"]\n",
            MINIMAL
        );
        let mut config = PipelineConfig::from_toml_str(&toml).unwrap();

        config
            .apply_env_overrides(|key| (key == "CONTENT_FIELD").then(|| "Body__c".to_string()))
            .unwrap();

        assert_eq!(config.publish.content_field, "Body__c");
        assert_eq!(config.sanitize.fields, vec!["Title", "Body__c"]);
        let checked: Vec<&str> = config.validations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(checked, vec!["Body__c", "Title"]);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("LOB_MAPPING", "retail-kb:/srv/kb/retail, cards-kb:/srv/kb/cards,"),
            ("BATCH_SIZE", "50"),
            ("MAX_THREADS", "4"),
            ("CONTENT_FIELD", "Body__c"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.pipeline.max_workers, 4);
        assert_eq!(config.publish.content_field, "Body__c");
        assert_eq!(
            config.publish.lob_mapping.get("cards-kb"),
            Some(&PathBuf::from("/srv/kb/cards"))
        );
    }

    #[test]
    fn test_invalid_env_number_rejected() {
        let mut config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        let err = config
            .apply_env_overrides(|key| (key == "MAX_THREADS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { key, .. } if key == "MAX_THREADS"));
    }

    #[test]
    fn test_lob_mapping_requires_separator() {
        assert!(parse_lob_mapping("retail-kb").is_err());
        assert!(parse_lob_mapping(":dir").is_err());
        assert!(parse_lob_mapping("").unwrap().is_empty());
    }
}
