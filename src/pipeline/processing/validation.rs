use tracing::debug;

use super::rules::{Rule, RuleAction, RuleId, RuleStage};
use crate::config::ValidationConfig;
use crate::domain::{Diagnostic, ProjectedRecord, Projection};
use crate::error::ConfigError;

/// Final decision of the validation stage for one record
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accept,
    Drop { rule: RuleId, reason: String },
}

/// Outcome plus the warnings raised by non-dropping rules evaluated before
/// the outcome was reached
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn is_accepted(&self) -> bool {
        self.outcome == ValidationOutcome::Accept
    }
}

pub fn compile_validations(
    configs: &[ValidationConfig],
    projection: &Projection,
) -> Result<Vec<Rule>, ConfigError> {
    configs
        .iter()
        .enumerate()
        .map(|(position, config)| {
            let id = RuleId::new(
                RuleStage::Validation,
                position,
                config.name.as_deref(),
                &config.operator,
                &config.field,
            );
            let action = RuleAction::parse_validation(&id, &config.action)?;
            Rule::compile(id, &config.field, &config.operator, &config.values, action, projection)
        })
        .collect()
}

/// Evaluate the rules in order. Stops at the first violated drop rule;
/// violated warn rules are collected and evaluation continues.
pub fn validate(record: &ProjectedRecord, rules: &[Rule]) -> ValidationReport {
    let mut warnings = Vec::new();

    for rule in rules {
        if rule.evaluate(record) {
            continue;
        }
        match rule.action() {
            RuleAction::DropRecord => {
                let reason = rule.violation(record);
                debug!(sequence = record.sequence(), rule = %rule.id(), %reason, "record dropped by validation");
                return ValidationReport {
                    outcome: ValidationOutcome::Drop {
                        rule: rule.id().clone(),
                        reason,
                    },
                    warnings,
                };
            }
            _ => warnings.push(Diagnostic::ValidationWarning {
                rule: rule.id().to_string(),
                field: rule.field_name().to_string(),
            }),
        }
    }

    ValidationReport {
        outcome: ValidationOutcome::Accept,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldSpec, FieldType, RawRecord};
    use crate::pipeline::processing::projection::project;
    use std::sync::Arc;

    fn projection() -> Arc<Projection> {
        Arc::new(
            Projection::new(vec![
                FieldSpec::new("Id", FieldType::Identifier),
                FieldSpec::new("Summary", FieldType::String),
                FieldSpec::new("Content__c", FieldType::Text),
                FieldSpec::new("LastPublishedDate", FieldType::DateTime),
            ])
            .unwrap(),
        )
    }

    fn non_null(field: &str, action: &str) -> ValidationConfig {
        ValidationConfig {
            name: None,
            field: field.to_string(),
            operator: "VALIDATE_NON_NULL".to_string(),
            values: vec![],
            action: action.to_string(),
        }
    }

    #[test]
    fn test_drop_after_warning_keeps_warning() {
        let rules = compile_validations(
            &[non_null("Summary", "Warn"), non_null("Content__c", "DropRecord")],
            &projection(),
        )
        .unwrap();
        let raw: RawRecord = [("Id", Some("kA01"))].into_iter().collect();

        let report = validate(&project(0, &raw, &projection()), &rules);

        assert_eq!(
            report.outcome,
            ValidationOutcome::Drop {
                rule: rules[1].id().clone(),
                reason: "Content__c is null, expected is not null".to_string(),
            }
        );
        assert_eq!(
            report.warnings,
            vec![Diagnostic::ValidationWarning {
                rule: "validation#1 VALIDATE_NON_NULL(Summary)".to_string(),
                field: "Summary".to_string(),
            }]
        );
    }

    #[test]
    fn test_evaluation_stops_at_first_drop() {
        let rules = compile_validations(
            &[non_null("Content__c", "DropRecord"), non_null("Summary", "Warn")],
            &projection(),
        )
        .unwrap();
        let raw: RawRecord = [("Id", Some("kA01"))].into_iter().collect();

        let report = validate(&project(0, &raw, &projection()), &rules);

        assert!(!report.is_accepted());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_warning_only_record_is_accepted() {
        let rules = compile_validations(&[non_null("Summary", "NoOp")], &projection()).unwrap();
        let raw: RawRecord = [("Id", Some("kA01")), ("Content__c", Some("<p>x</p>"))]
            .into_iter()
            .collect();

        let report = validate(&project(0, &raw, &projection()), &rules);

        assert!(report.is_accepted());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_coercion_failure_counts_as_null() {
        let rules = compile_validations(&[non_null("LastPublishedDate", "DropRecord")], &projection()).unwrap();
        let raw: RawRecord = [("Id", Some("kA01")), ("LastPublishedDate", Some("soon"))]
            .into_iter()
            .collect();

        let projected = project(0, &raw, &projection());
        assert_eq!(projected.diagnostics().len(), 1);
        assert!(!validate(&projected, &rules).is_accepted());
    }

    #[test]
    fn test_unknown_action_is_config_error() {
        let err = compile_validations(&[non_null("Summary", "Quarantine")], &projection()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction { action, .. } if action == "Quarantine"));
    }
}
