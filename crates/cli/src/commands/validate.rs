use anyhow::{Context, Result};
use nachos_policy::{load_directory, load_document, PolicyDocument, PolicyError};
use std::path::{Path, PathBuf};

/// Validate every given policy file or directory. Returns whether all of
/// them passed.
pub async fn run(paths: &[PathBuf]) -> Result<bool> {
    let mut all_ok = true;
    for path in paths {
        match validate_path(path).await {
            Ok(documents) => {
                let rules: usize = documents.iter().map(|d| d.rules.len()).sum();
                println!("✓ {} ({} documents, {} rules)", path.display(), documents.len(), rules);
            }
            Err(PolicyError::Invalid { origin, report }) => {
                all_ok = false;
                println!("✗ {}", origin);
                for issue in &report.issues {
                    println!("    {}: {}", issue.path, issue.message);
                }
            }
            Err(other) => {
                all_ok = false;
                println!("✗ {}: {}", path.display(), other);
            }
        }
    }
    Ok(all_ok)
}

async fn validate_path(path: &Path) -> Result<Vec<PolicyDocument>, PolicyError> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_dir() {
        load_directory(path).await
    } else {
        Ok(vec![load_document(path).await?])
    }
}

/// Load the rule set used by `check`: a directory or a single file.
pub async fn load_policies(path: &Path) -> Result<Vec<PolicyDocument>> {
    validate_path(path)
        .await
        .with_context(|| format!("Failed to load policies from {}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_reports_invalid_documents() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.yaml");
        let bad = dir.path().join("bad.json");
        tokio::fs::write(
            &good,
            "version: '1'\nrules:\n  - id: a\n    priority: 1\n    match: {}\n    effect: allow\n",
        )
        .await
        .unwrap();
        tokio::fs::write(&bad, r#"{"version": "1", "rules": [{"id": "b", "effect": "maybe"}]}"#)
            .await
            .unwrap();

        assert!(run(&[good.clone()]).await.unwrap());
        assert!(!run(&[good, bad]).await.unwrap());
        assert!(!run(&[dir.path().join("absent.yaml")]).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_policies_from_directory() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("base.yaml"),
            "version: '1'\nrules:\n  - id: a\n    priority: 1\n    match: {}\n    effect: allow\n",
        )
        .await
        .unwrap();
        let documents = load_policies(dir.path()).await.unwrap();
        assert_eq!(documents.len(), 1);

        let err = load_policies(&dir.path().join("missing")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to load policies"));
    }
}
