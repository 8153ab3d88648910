use anyhow::{bail, Result};
use nachos_approval::requires_approval;
use nachos_coordinator::{CoordinatorConfig, TierSource, ToolClassifier};
use std::path::PathBuf;

/// Print the inferred tier of each tool name.
pub fn run(args: &[String]) -> Result<()> {
    let (config, tools) = match args {
        [flag, path, tools @ ..] if flag == "--config" => {
            (CoordinatorConfig::load(PathBuf::from(path))?, tools)
        }
        tools => (CoordinatorConfig::from_env()?, tools),
    };
    if tools.is_empty() {
        bail!("classify needs at least one tool name");
    }

    let classifier = ToolClassifier::from_settings(&config.classifier);
    for tool in tools {
        println!("{}", describe(&classifier, tool));
    }
    Ok(())
}

fn describe(classifier: &ToolClassifier, tool: &str) -> String {
    match classifier.classify_with_source(tool) {
        Some((tier, source)) => {
            let source = match source {
                TierSource::Override => "override".to_string(),
                TierSource::Rule(name) => format!("rule {}", name),
            };
            let approval = if requires_approval(tier) { ", needs approval" } else { "" };
            format!("{}: {} ({}) via {}{}", tool, tier.name(), tier.as_u8(), source, approval)
        }
        None => format!("{}: unclassified", tool),
    }
}
