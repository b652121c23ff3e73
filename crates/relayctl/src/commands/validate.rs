//! `relayctl validate <dir>`

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use super::load_resources;
use crate::output::OutputFormat;

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub directory: String,
    pub chains: usize,
    pub triggers: usize,
    pub agents: usize,
    pub teams: usize,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_directory(dir: &Path) -> Result<ValidationReport> {
    let manager = load_resources(dir)?;
    let summary = manager.summary();
    Ok(ValidationReport {
        directory: dir.display().to_string(),
        chains: summary.chains,
        triggers: summary.triggers,
        agents: summary.agents,
        teams: summary.teams,
        errors: manager
            .validate_references()
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

pub fn execute(dir: &Path, output: OutputFormat) -> Result<()> {
    let report = validate_directory(dir)?;

    if !output.print_structured(&report)? {
        println!(
            "Loaded {} chains, {} triggers, {} agents, {} teams from {}",
            report.chains, report.triggers, report.agents, report.teams, report.directory
        );
        for error in &report.errors {
            println!("  ✗ {}", error);
        }
        if report.is_valid() {
            println!("✓ All references resolve");
        }
    }

    if !report.is_valid() {
        anyhow::bail!("{} broken reference(s)", report.errors.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    const TEAM: &str = r#"
apiVersion: relay.dev/v1
kind: Team
metadata:
  name: maintenance
"#;

    const AGENT: &str = r#"
apiVersion: relay.dev/v1
kind: AgentConfiguration
metadata:
  name: drafter
spec:
  team: maintenance
"#;

    const CHAIN: &str = r#"
apiVersion: relay.dev/v1
kind: Chain
metadata:
  name: intake
spec:
  steps:
    - agent: drafter
      workflow: draft_work_order
"#;

    #[test]
    fn test_valid_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "teams/maintenance.yaml", TEAM);
        write(dir.path(), "agents/drafter.yaml", AGENT);
        write(dir.path(), "chains/intake.yaml", CHAIN);

        let report = validate_directory(dir.path()).unwrap();
        assert!(report.is_valid());
        assert_eq!((report.chains, report.agents, report.teams), (1, 1, 1));
    }

    #[test]
    fn test_broken_reference_is_reported() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "chains/intake.yaml", CHAIN);

        let report = validate_directory(dir.path()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("drafter"));
        assert!(execute(dir.path(), OutputFormat::Json).is_err());
    }

    #[test]
    fn test_missing_directory() {
        assert!(validate_directory(Path::new("/nonexistent/relay")).is_err());
    }
}
