use crate::error::PolicyError;
use crate::types::PolicyDocument;
use crate::validator::{validate_document, validate_rule_set};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

impl PolicyDocument {
    /// Validate a raw document and convert it to the typed model.
    pub fn from_value(value: Value, origin: &str) -> Result<Self, PolicyError> {
        let report = validate_document(&value);
        if !report.is_valid() {
            return Err(PolicyError::Invalid {
                origin: origin.to_string(),
                report,
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PolicyError> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(value, "<yaml>")
    }

    pub fn from_json_str(content: &str) -> Result<Self, PolicyError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value, "<json>")
    }
}

/// Load and validate one `.yaml`, `.yml` or `.json` policy file.
pub async fn load_document<P: AsRef<Path>>(path: P) -> Result<PolicyDocument, PolicyError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let content = tokio::fs::read_to_string(path).await?;

    let value: Value = match extension(path).as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        Some("json") => serde_json::from_str(&content)?,
        _ => return Err(PolicyError::UnsupportedFormat(origin)),
    };

    let document = PolicyDocument::from_value(value, &origin)?;
    debug!(path = %origin, rules = document.rules.len(), "policy document loaded");
    Ok(document)
}

/// Load every policy file in `dir`, in file-name order, and reject rule ids
/// that repeat across files.
pub async fn load_directory<P: AsRef<Path>>(dir: P) -> Result<Vec<PolicyDocument>, PolicyError> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths: Vec<PathBuf> = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_policy = matches!(extension(&path).as_deref(), Some("yaml" | "yml" | "json"));
        if is_policy && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in &paths {
        documents.push(load_document(path).await?);
    }

    let report = validate_rule_set(&documents);
    if !report.is_valid() {
        return Err(PolicyError::Invalid {
            origin: dir.display().to_string(),
            report,
        });
    }

    info!(
        dir = %dir.display(),
        documents = documents.len(),
        rules = documents.iter().map(|d| d.rules.len()).sum::<usize>(),
        "policies loaded from directory"
    );
    Ok(documents)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHELL_POLICY: &str = r#"
version: "1.0"
name: shell
rules:
  - id: deny-shell
    priority: 100
    match:
      resource: tool
      resourceId: shell
    effect: deny
    reason: Shell access is not allowed
"#;

    #[test]
    fn test_from_yaml_str() {
        let doc = PolicyDocument::from_yaml_str(SHELL_POLICY).unwrap();
        assert_eq!(doc.name.as_deref(), Some("shell"));
        assert_eq!(doc.rules.len(), 1);
        assert_eq!(doc.rules[0].priority, 100.0);
    }

    #[test]
    fn test_from_json_str_rejects_invalid() {
        let err = PolicyDocument::from_json_str(r#"{"version": "1", "rules": [{"id": "x"}]}"#)
            .unwrap_err();
        match err {
            PolicyError::Invalid { report, .. } => assert!(report.issues.len() >= 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_load_directory_in_name_order() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("20-shell.yaml"), SHELL_POLICY).await.unwrap();
        tokio::fs::write(
            dir.path().join("10-base.json"),
            r#"{"version": "1.0", "rules": [{"id": "allow-all", "priority": 0, "match": {}, "effect": "allow"}]}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("README.txt"), "not a policy").await.unwrap();

        let docs = load_directory(dir.path()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].rules[0].id, "allow-all");
        assert_eq!(docs[1].rules[0].id, "deny-shell");
    }

    #[tokio::test]
    async fn test_load_directory_rejects_duplicate_ids() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.yaml"), SHELL_POLICY).await.unwrap();
        tokio::fs::write(dir.path().join("b.yml"), SHELL_POLICY).await.unwrap();

        let err = load_directory(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate rule id 'deny-shell'"));
    }

    #[tokio::test]
    async fn test_load_document_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        tokio::fs::write(&path, "version = 1").await.unwrap();
        assert!(matches!(
            load_document(&path).await,
            Err(PolicyError::UnsupportedFormat(_))
        ));
    }
}
