use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::rules::{Rule, RuleAction, RuleId, RuleStage};
use crate::config::ClassificationConfig;
use crate::domain::{LobId, ProjectedRecord, Projection};
use crate::error::ConfigError;

/// How many lines of business a record may be assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Every matching line of business is assigned
    #[default]
    AllMatches,
    /// Only the first matching rule, in configured order, is assigned
    FirstMatch,
}

/// Where a validated record goes
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    Assigned(Vec<LobId>),
    /// No rule matched and a default line of business is configured
    Defaulted(LobId),
    Unclassified,
}

/// Maps records to lines of business with exact, case-sensitive field matches
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
    lobs: Vec<LobId>,
    policy: MatchPolicy,
    default_lob: Option<LobId>,
}

impl Classifier {
    /// Compile classification rules. A line of business declared twice with
    /// different conditions is a configuration error; an exact repeat is
    /// collapsed.
    pub fn compile(
        configs: &[ClassificationConfig],
        projection: &Projection,
        policy: MatchPolicy,
        default_lob: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut rules: Vec<Rule> = Vec::with_capacity(configs.len());
        let mut by_lob: HashMap<LobId, usize> = HashMap::new();

        for (position, config) in configs.iter().enumerate() {
            let lob = LobId::new(config.lob.as_str())?;
            let values = config.expected_values();
            let id = RuleId::new(
                RuleStage::Classification,
                position,
                Some(lob.as_str()),
                "EQUAL_TO",
                &config.field,
            );
            let rule = Rule::compile(id, &config.field, "EQUAL_TO", &values, RuleAction::Assign(lob.clone()), projection)?;

            if let Some(&existing) = by_lob.get(&lob) {
                let previous: &Rule = &rules[existing];
                if previous.field() == rule.field() && previous.condition() == rule.condition() {
                    warn!(lob = %lob, "duplicate classification rule ignored");
                    continue;
                }
                return Err(ConfigError::ConflictingLobRules(lob.to_string()));
            }

            by_lob.insert(lob, rules.len());
            rules.push(rule);
        }

        let default_lob = default_lob.map(LobId::new).transpose()?;

        let mut lobs: Vec<LobId> = rules.iter().filter_map(|rule| assigned_lob(rule).cloned()).collect();
        if let Some(default) = &default_lob {
            if !lobs.contains(default) {
                lobs.push(default.clone());
            }
        }
        check_partition_names(&lobs)?;

        Ok(Self {
            rules,
            lobs,
            policy,
            default_lob,
        })
    }

    /// The set of lines of business whose rule matches, in configured order
    pub fn classify(&self, record: &ProjectedRecord) -> Vec<LobId> {
        let mut matched = Vec::new();
        for rule in &self.rules {
            if !rule.evaluate(record) {
                continue;
            }
            if let Some(lob) = assigned_lob(rule) {
                if !matched.contains(lob) {
                    matched.push(lob.clone());
                }
            }
            if self.policy == MatchPolicy::FirstMatch {
                break;
            }
        }
        matched
    }

    /// Classify and apply the unclassified policy
    pub fn route(&self, record: &ProjectedRecord) -> Routing {
        let matched = self.classify(record);
        if !matched.is_empty() {
            return Routing::Assigned(matched);
        }
        match &self.default_lob {
            Some(default) => {
                debug!(sequence = record.sequence(), lob = %default, "record routed to default line of business");
                Routing::Defaulted(default.clone())
            }
            None => Routing::Unclassified,
        }
    }

    /// Every line of business that can receive records, in configured order;
    /// the default line of business comes last unless it also has a rule
    pub fn lobs(&self) -> &[LobId] {
        &self.lobs
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn default_lob(&self) -> Option<&LobId> {
        self.default_lob.as_ref()
    }
}

/// Each line of business is written to `<slug>.ndjson`, so slugs must be unique
fn check_partition_names(lobs: &[LobId]) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, &LobId> = HashMap::with_capacity(lobs.len());
    for lob in lobs {
        let slug = lob.slug();
        if let Some(first) = seen.get(&slug) {
            return Err(ConfigError::PartitionNameCollision {
                first: first.to_string(),
                second: lob.to_string(),
                slug,
            });
        }
        seen.insert(slug, lob);
    }
    Ok(())
}

fn assigned_lob(rule: &Rule) -> Option<&LobId> {
    match rule.action() {
        RuleAction::Assign(lob) => Some(lob),
        _ => None,
    }
}
