use crate::validator::ValidationReport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid policy document {origin}: {report}")]
    Invalid {
        origin: String,
        report: ValidationReport,
    },

    #[error("Unsupported policy file: {0}")]
    UnsupportedFormat(String),
}
