//! `relayctl route <team-file>`

use anyhow::{Context, Result};
use std::path::Path;

use relay_core::{load_yaml_file, RoutingCandidate, RuntimeConfig, Team};
use relay_runtime::RoutingEngine;

use crate::output::{print_table, OutputFormat};

pub fn rank(
    team_file: &Path,
    skills: &[String],
    hours: f64,
    runtime: Option<&Path>,
) -> Result<Vec<RoutingCandidate>> {
    let team: Team = load_yaml_file(team_file)
        .with_context(|| format!("Failed to load team from {}", team_file.display()))?;
    let config = match runtime {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    tracing::debug!(
        "Ranking {} member(s) of {} with weights {:?}",
        team.spec.members.len(),
        team.id(),
        config.spec.routing
    );
    Ok(RoutingEngine::new(config.spec.routing).calculate_routing(&team, skills, hours))
}

pub fn execute(
    team_file: &Path,
    skills: &[String],
    hours: f64,
    runtime: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let candidates = rank(team_file, skills, hours, runtime)?;
    if output.print_structured(&candidates)? {
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No active member with capacity");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = candidates
        .iter()
        .enumerate()
        .map(|(rank, c)| {
            vec![
                (rank + 1).to_string(),
                c.user_id.clone(),
                format!("{:.2}", c.combined_score),
                format!("{:.2}", c.skill_score),
                format!("{:.2}", c.capacity_score),
                format!("{:?}", c.confidence).to_lowercase(),
                format!(
                    "{:.0}%",
                    c.reasoning.capacity_analysis.projected_utilization * 100.0
                ),
            ]
        })
        .collect();
    print_table(
        &["RANK", "USER", "SCORE", "SKILL", "CAPACITY", "CONFIDENCE", "UTILIZATION"],
        &rows,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEAM: &str = r#"
apiVersion: relay.dev/v1
kind: Team
metadata:
  name: maintenance
spec:
  members:
    - userId: alice
      capacityHoursPerWeek: 40
      currentWorkloadHours: 36
      skills:
        plumbing: 5
    - userId: bob
      capacityHoursPerWeek: 40
      currentWorkloadHours: 8
      skills:
        plumbing: 4
    - userId: carol
      active: false
      capacityHoursPerWeek: 40
      skills:
        plumbing: 5
"#;

    #[test]
    fn test_rank_from_team_file() {
        let dir = TempDir::new().unwrap();
        let team_file = dir.path().join("team.yaml");
        std::fs::write(&team_file, TEAM).unwrap();

        let ranked = rank(&team_file, &["plumbing".to_string()], 4.0, None).unwrap();
        let users: Vec<&str> = ranked.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(users, vec!["bob", "alice"]);
    }

    #[test]
    fn test_runtime_weights_are_applied() {
        let dir = TempDir::new().unwrap();
        let team_file = dir.path().join("team.yaml");
        std::fs::write(&team_file, TEAM).unwrap();
        let runtime = dir.path().join("runtime.yaml");
        std::fs::write(
            &runtime,
            "apiVersion: relay.dev/v1\nkind: RuntimeConfig\nspec:\n  routing:\n    skillWeight: 1.0\n    capacityWeight: 0.0\n",
        )
        .unwrap();

        let ranked = rank(&team_file, &["plumbing".to_string()], 4.0, Some(&runtime)).unwrap();
        assert_eq!(ranked[0].user_id, "alice");
        assert_eq!(ranked[0].combined_score, ranked[0].skill_score);
    }
}
