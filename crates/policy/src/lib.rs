//! Priority-ordered allow/deny rule evaluation for tool requests.

pub mod error;
pub mod evaluator;
pub mod loader;
pub mod types;
pub mod validator;

pub use error::PolicyError;
pub use evaluator::{EvaluationStats, PolicyEvaluator};
pub use loader::{load_directory, load_document};
pub use types::*;
pub use validator::{validate_document, validate_rule_set, ValidationIssue, ValidationReport};
