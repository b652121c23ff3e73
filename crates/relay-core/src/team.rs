// Relay Core - Teams and routing candidates
//
// Teams own agents, chains run under a team, and team members are the
// candidates the routing engine ranks for a unit of work.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Team resource
///
/// Example:
/// ```yaml
/// apiVersion: relay.dev/v1
/// kind: Team
/// metadata:
///   name: maintenance
/// spec:
///   members:
///     - userId: alice
///       capacityHoursPerWeek: 40
///       currentWorkloadHours: 12
///       skills:
///         plumbing: 5
///         electrical: 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_team_kind")]
    pub kind: String,

    pub metadata: TeamMetadata,

    #[serde(default)]
    pub spec: TeamSpec,
}

fn default_api_version() -> String {
    crate::API_VERSION.to_string()
}

fn default_team_kind() -> String {
    "Team".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TeamMetadata {
    /// Team id
    pub name: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub members: Vec<TeamMember>,
}

/// A person work can be routed to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub user_id: String,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub capacity_hours_per_week: f64,

    #[serde(default)]
    pub current_workload_hours: f64,

    /// Skill name to proficiency (1..=5)
    #[serde(default)]
    pub skills: HashMap<String, u8>,
}

impl TeamMember {
    pub fn new(user_id: impl Into<String>, capacity: f64, workload: f64) -> Self {
        Self {
            user_id: user_id.into(),
            active: true,
            capacity_hours_per_week: capacity,
            current_workload_hours: workload,
            skills: HashMap::new(),
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>, proficiency: u8) -> Self {
        self.skills.insert(skill.into(), proficiency);
        self
    }

    /// Proficiency for `skill`, matched case-insensitively
    pub fn proficiency(&self, skill: &str) -> Option<u8> {
        self.skills
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(skill))
            .map(|(_, p)| *p)
    }
}

impl Team {
    pub fn new(id: impl Into<String>, members: Vec<TeamMember>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_team_kind(),
            metadata: TeamMetadata {
                name: id.into(),
                ..Default::default()
            },
            spec: TeamSpec {
                display_name: None,
                members,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    pub fn active_members(&self) -> impl Iterator<Item = &TeamMember> {
        self.spec.members.iter().filter(|m| m.active)
    }
}

/// Confidence bucket derived from the combined score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub const HIGH_THRESHOLD: f64 = 0.75;
    pub const MEDIUM_THRESHOLD: f64 = 0.5;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            Self::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// How one required skill contributed to the skill score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillMatch {
    pub skill: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proficiency: Option<u8>,
    pub contribution: f64,
}

/// Capacity figures behind the capacity score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityAnalysis {
    pub capacity_hours_per_week: f64,
    pub current_workload_hours: f64,
    pub available_hours: f64,
    /// Utilization if the work were assigned
    pub projected_utilization: f64,
    pub penalty_applied: bool,
}

/// Audit payload attached to each candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingReasoning {
    pub skill_matches: Vec<SkillMatch>,
    pub capacity_analysis: CapacityAnalysis,
}

/// Ranked assignment recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingCandidate {
    pub user_id: String,
    pub skill_score: f64,
    pub capacity_score: f64,
    pub combined_score: f64,
    pub confidence: Confidence,
    pub reasoning: RoutingReasoning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(Confidence::from_score(0.9), Confidence::High);
        assert_eq!(Confidence::from_score(0.75), Confidence::High);
        assert_eq!(Confidence::from_score(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.1), Confidence::Low);
    }

    #[test]
    fn test_parse_team_yaml() {
        let yaml = r#"
apiVersion: relay.dev/v1
kind: Team
metadata:
  name: maintenance
spec:
  members:
    - userId: alice
      capacityHoursPerWeek: 40
      currentWorkloadHours: 12
      skills:
        Plumbing: 5
    - userId: bob
      active: false
"#;
        let team: Team = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(team.id(), "maintenance");
        assert_eq!(team.active_members().count(), 1);
        assert_eq!(team.spec.members[0].proficiency("plumbing"), Some(5));
    }
}
