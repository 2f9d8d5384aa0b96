use tracing::debug;

use super::rules::{Rule, RuleAction, RuleId, RuleStage};
use crate::config::RuleConfig;
use crate::domain::{ProjectedRecord, Projection};
use crate::error::ConfigError;

/// Compile the configured filters. Filters are combined with logical AND.
pub fn compile_filters(configs: &[RuleConfig], projection: &Projection) -> Result<Vec<Rule>, ConfigError> {
    configs
        .iter()
        .enumerate()
        .map(|(position, config)| {
            let id = RuleId::new(
                RuleStage::Filter,
                position,
                config.name.as_deref(),
                &config.operator,
                &config.field,
            );
            Rule::compile(id, &config.field, &config.operator, &config.values, RuleAction::Exclude, projection)
        })
        .collect()
}

/// The first filter the record does not satisfy, in configured order
pub fn first_failing_filter<'a>(record: &ProjectedRecord, filters: &'a [Rule]) -> Option<&'a Rule> {
    let failing = filters.iter().find(|rule| !rule.evaluate(record));
    if let Some(rule) = failing {
        debug!(sequence = record.sequence(), rule = %rule.id(), "record filtered out");
    }
    failing
}

/// Whether the record satisfies every configured filter
pub fn passes_filters(record: &ProjectedRecord, filters: &[Rule]) -> bool {
    first_failing_filter(record, filters).is_none()
}
