// Per-record stages: projection, filtering, validation, sanitizing, classification

pub mod classify;
pub mod filter;
pub mod projection;
pub mod rules;
pub mod sanitize;
pub mod validation;

pub use classify::{Classifier, MatchPolicy, Routing};
pub use filter::{first_failing_filter, passes_filters};
pub use projection::project;
pub use rules::{Condition, Operator, Rule, RuleAction, RuleId};
pub use sanitize::{FieldSanitizer, HtmlSanitizer};
pub use validation::{validate, ValidationOutcome, ValidationReport};
