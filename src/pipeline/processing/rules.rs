//! Rule substrate shared by the filter, validation and classification stages.
//!
//! Every configured rule compiles to one [`Rule`]: a target field, a closed
//! [`Condition`] and an [`RuleAction`]. A single dispatcher
//! ([`Rule::evaluate`]) decides whether the condition holds; the stages only
//! differ in what they do with the answer.

use serde::Serialize;
use std::fmt;

use crate::domain::{FieldIndex, FieldValue, LobId, ProjectedRecord, Projection};
use crate::error::ConfigError;

/// Comparison operators accepted in rule configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    EqualTo,
    In,
    NotEqualTo,
    ValidateNonNull,
}

impl Operator {
    pub fn parse(rule: &RuleId, operator: &str) -> Result<Self, ConfigError> {
        match operator.trim().to_ascii_uppercase().as_str() {
            "EQUAL_TO" => Ok(Operator::EqualTo),
            "IN" => Ok(Operator::In),
            "NOT_EQUAL_TO" => Ok(Operator::NotEqualTo),
            "VALIDATE_NON_NULL" => Ok(Operator::ValidateNonNull),
            _ => Err(ConfigError::UnknownOperator {
                rule: rule.to_string(),
                operator: operator.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::EqualTo => "EQUAL_TO",
            Operator::In => "IN",
            Operator::NotEqualTo => "NOT_EQUAL_TO",
            Operator::ValidateNonNull => "VALIDATE_NON_NULL",
        }
    }
}

/// The closed set of conditions a rule can test
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(FieldValue),
    OneOf(Vec<FieldValue>),
    NotEquals(FieldValue),
    NonNull,
}

impl Condition {
    /// Null fails every comparison; only `NonNull` looks at nullness itself.
    fn holds(&self, value: Option<&FieldValue>) -> bool {
        match (self, value) {
            (Condition::NonNull, value) => value.is_some(),
            (_, None) => false,
            (Condition::Equals(expected), Some(actual)) => actual == expected,
            (Condition::OneOf(allowed), Some(actual)) => allowed.contains(actual),
            (Condition::NotEquals(excluded), Some(actual)) => actual != excluded,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equals(v) => write!(f, "= \"{}\"", v),
            Condition::OneOf(values) => {
                let joined = values.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "in [{}]", joined.join(", "))
            }
            Condition::NotEquals(v) => write!(f, "!= \"{}\"", v),
            Condition::NonNull => write!(f, "is not null"),
        }
    }
}

/// Stage a rule is configured under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStage {
    Filter,
    Validation,
    Classification,
}

impl RuleStage {
    fn label(&self) -> &'static str {
        match self {
            RuleStage::Filter => "filter",
            RuleStage::Validation => "validation",
            RuleStage::Classification => "classification",
        }
    }
}

/// Identity of a configured rule, as reported in summaries and drop reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// The configured name when present, else `<stage>#<n> <OPERATOR>(<field>)`
    /// with `n` counted from 1
    pub fn new(stage: RuleStage, position: usize, name: Option<&str>, operator: &str, field: &str) -> Self {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => Self(name.to_string()),
            None => Self(format!(
                "{}#{} {}({})",
                stage.label(),
                position + 1,
                operator.trim().to_ascii_uppercase(),
                field
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens when a rule is evaluated by its stage
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// Filter rule: exclude the record silently when the condition fails
    Exclude,
    /// Validation rule: drop the record when the condition fails
    DropRecord,
    /// Validation rule: keep the record but note the violation
    Warn,
    /// Classification rule: assign the line of business when the condition holds
    Assign(LobId),
}

impl RuleAction {
    /// Parse a validation action. `NoOp` is the export connector's name for
    /// a rule that only reports.
    pub fn parse_validation(rule: &RuleId, action: &str) -> Result<Self, ConfigError> {
        let normalized: String = action
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "droprecord" | "drop" => Ok(RuleAction::DropRecord),
            "warn" | "noop" => Ok(RuleAction::Warn),
            _ => Err(ConfigError::UnknownAction {
                rule: rule.to_string(),
                action: action.to_string(),
            }),
        }
    }
}

/// A compiled rule bound to a projection field
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    id: RuleId,
    field: FieldIndex,
    field_name: String,
    operator: Operator,
    condition: Condition,
    action: RuleAction,
}

impl Rule {
    /// Resolve the field, parse the operator, check its arity and coerce the
    /// comparison values with the field's declared type.
    pub fn compile(
        id: RuleId,
        field: &str,
        operator: &str,
        values: &[String],
        action: RuleAction,
        projection: &Projection,
    ) -> Result<Self, ConfigError> {
        let index = projection
            .index_of(field)
            .ok_or_else(|| ConfigError::UndeclaredField {
                rule: id.to_string(),
                field: field.to_string(),
            })?;
        let operator = Operator::parse(&id, operator)?;
        let data_type = projection.spec(index).data_type;

        let arity_error = |detail: &str| ConfigError::InvalidArity {
            rule: id.to_string(),
            detail: format!("{} {}", operator.as_str(), detail),
        };

        let mut coerced = Vec::with_capacity(values.len());
        for value in values {
            let typed = if value.trim().is_empty() {
                None
            } else {
                data_type.coerce(value).ok()
            };
            match typed {
                Some(typed) => coerced.push(typed),
                None => {
                    return Err(ConfigError::InvalidComparisonValue {
                        rule: id.to_string(),
                        value: value.clone(),
                        data_type: data_type.to_string(),
                    })
                }
            }
        }

        let condition = match operator {
            Operator::EqualTo => match coerced.len() {
                0 => return Err(arity_error("requires at least one value")),
                1 => Condition::Equals(coerced.remove(0)),
                _ => Condition::OneOf(coerced),
            },
            Operator::In => {
                if coerced.is_empty() {
                    return Err(arity_error("requires at least one value"));
                }
                Condition::OneOf(coerced)
            }
            Operator::NotEqualTo => {
                if coerced.len() != 1 {
                    return Err(arity_error("requires exactly one value"));
                }
                Condition::NotEquals(coerced.remove(0))
            }
            Operator::ValidateNonNull => {
                if !coerced.is_empty() {
                    return Err(arity_error("takes no values"));
                }
                Condition::NonNull
            }
        };

        Ok(Self {
            id,
            field: index,
            field_name: field.to_string(),
            operator,
            condition,
            action,
        })
    }

    /// Whether the rule's condition holds for the record
    pub fn evaluate(&self, record: &ProjectedRecord) -> bool {
        self.condition.holds(record.value(self.field))
    }

    /// Human-readable account of a failed condition
    pub fn violation(&self, record: &ProjectedRecord) -> String {
        match record.value(self.field) {
            None => format!("{} is null, expected {}", self.field_name, self.condition),
            Some(actual) => format!(
                "{} = \"{}\", expected {}",
                self.field_name, actual, self.condition
            ),
        }
    }

    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn field(&self) -> FieldIndex {
        self.field
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn action(&self) -> &RuleAction {
        &self.action
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
                FieldSpec::new("PublishStatus", FieldType::Picklist),
                FieldSpec::new("LastPublishedDate", FieldType::DateTime),
            ])
            .unwrap(),
        )
    }

    fn rule(operator: &str, values: &[&str]) -> Result<Rule, ConfigError> {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let id = RuleId::new(RuleStage::Filter, 0, None, operator, "PublishStatus");
        Rule::compile(id, "PublishStatus", operator, &values, RuleAction::Exclude, &projection())
    }

    fn record(status: Option<&str>) -> ProjectedRecord {
        let raw: RawRecord = [("Id", Some("kA01")), ("PublishStatus", status)]
            .into_iter()
            .collect();
        project(0, &raw, &projection())
    }

    #[test]
    fn test_equal_to_with_several_values_is_set_membership() {
        let rule = rule("EQUAL_TO", &["Online", "Archived"]).unwrap();
        assert!(matches!(rule.condition(), Condition::OneOf(v) if v.len() == 2));
        assert!(rule.evaluate(&record(Some("Archived"))));
        assert!(!rule.evaluate(&record(Some("Draft"))));
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let rule = rule("IN", &["Online"]).unwrap();
        assert!(rule.evaluate(&record(Some("Online"))));
        assert!(!rule.evaluate(&record(Some("online"))));
    }

    #[test]
    fn test_null_fails_comparisons() {
        assert!(!rule("EQUAL_TO", &["Online"]).unwrap().evaluate(&record(None)));
        assert!(!rule("NOT_EQUAL_TO", &["Draft"]).unwrap().evaluate(&record(None)));
        assert!(!rule("VALIDATE_NON_NULL", &[]).unwrap().evaluate(&record(None)));
        assert!(rule("VALIDATE_NON_NULL", &[]).unwrap().evaluate(&record(Some("Draft"))));
    }

    #[test]
    fn test_unknown_operator_is_config_error() {
        let err = rule("CONTAINS", &["x"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOperator { operator, .. } if operator == "CONTAINS"));
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(matches!(rule("EQUAL_TO", &[]), Err(ConfigError::InvalidArity { .. })));
        assert!(matches!(rule("NOT_EQUAL_TO", &["a", "b"]), Err(ConfigError::InvalidArity { .. })));
        assert!(matches!(rule("VALIDATE_NON_NULL", &["a"]), Err(ConfigError::InvalidArity { .. })));
    }

    #[test]
    fn test_undeclared_field_is_config_error() {
        let id = RuleId::new(RuleStage::Validation, 2, None, "VALIDATE_NON_NULL", "Body");
        let err = Rule::compile(id, "Body", "VALIDATE_NON_NULL", &[], RuleAction::DropRecord, &projection())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UndeclaredField { rule, field }
            if rule == "validation#3 VALIDATE_NON_NULL(Body)" && field == "Body"));
    }

    #[test]
    fn test_comparison_values_are_coerced_with_field_type() {
        let id = RuleId::new(RuleStage::Filter, 0, Some("published-after"), "EQUAL_TO", "LastPublishedDate");
        let err = Rule::compile(
            id,
            "LastPublishedDate",
            "EQUAL_TO",
            &["last tuesday".to_string()],
            RuleAction::Exclude,
            &projection(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidComparisonValue { rule, .. } if rule == "published-after"));
    }

    #[test]
    fn test_validation_action_names() {
        let id = RuleId::new(RuleStage::Validation, 0, None, "VALIDATE_NON_NULL", "Id");
        assert_eq!(RuleAction::parse_validation(&id, "DropRecord").unwrap(), RuleAction::DropRecord);
        assert_eq!(RuleAction::parse_validation(&id, "NoOp").unwrap(), RuleAction::Warn);
        assert!(matches!(
            RuleAction::parse_validation(&id, "TerminateFlow"),
            Err(ConfigError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_violation_message() {
        let rule = rule("IN", &["Online", "Archived"]).unwrap();
        assert_eq!(
            rule.violation(&record(Some("Draft"))),
            "PublishStatus = \"Draft\", expected in [Online, Archived]"
        );
    }
}
