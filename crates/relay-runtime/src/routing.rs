//! Routing Decision Engine
//!
//! Ranks the members of a team for a unit of work by combining how well
//! their skills match with how much room they have left.

use std::cmp::Ordering;

use relay_core::{
    CapacityAnalysis, Confidence, RoutingCandidate, RoutingReasoning, RoutingWeights, SkillMatch,
    Team, TeamMember,
};

const MAX_PROFICIENCY: f64 = 5.0;

#[derive(Debug, Clone, Default)]
pub struct RoutingEngine {
    weights: RoutingWeights,
}

impl RoutingEngine {
    pub fn new(weights: RoutingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RoutingWeights {
        &self.weights
    }

    /// Candidates sorted best first
    ///
    /// Inactive members and members without capacity are left out. Ties on
    /// the combined score go to the lower current workload, then user id.
    pub fn calculate_routing(
        &self,
        team: &Team,
        required_skills: &[String],
        estimated_hours: f64,
    ) -> Vec<RoutingCandidate> {
        let estimated_hours = estimated_hours.max(0.0);
        let mut candidates: Vec<RoutingCandidate> = team
            .active_members()
            .filter(|m| m.capacity_hours_per_week > 0.0)
            .map(|m| self.score(m, required_skills, estimated_hours))
            .collect();

        candidates.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    a.reasoning
                        .capacity_analysis
                        .current_workload_hours
                        .partial_cmp(&b.reasoning.capacity_analysis.current_workload_hours)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        tracing::debug!(
            "Routed {} candidate(s) in team {} for {:?}",
            candidates.len(),
            team.id(),
            required_skills
        );
        candidates
    }

    fn score(
        &self,
        member: &TeamMember,
        required_skills: &[String],
        estimated_hours: f64,
    ) -> RoutingCandidate {
        let skill_matches: Vec<SkillMatch> = required_skills
            .iter()
            .map(|skill| {
                let proficiency = member.proficiency(skill);
                let contribution = proficiency
                    .map(|p| (p as f64 / MAX_PROFICIENCY).min(1.0))
                    .unwrap_or(0.0);
                SkillMatch {
                    skill: skill.clone(),
                    proficiency,
                    contribution,
                }
            })
            .collect();

        let skill_score = if skill_matches.is_empty() {
            1.0
        } else {
            skill_matches.iter().map(|m| m.contribution).sum::<f64>() / skill_matches.len() as f64
        };

        let capacity = member.capacity_hours_per_week;
        let workload = member.current_workload_hours.max(0.0);
        let available_hours = (capacity - workload).max(0.0);
        let projected_utilization = (workload + estimated_hours) / capacity;

        let mut capacity_score = ((capacity - workload - estimated_hours).max(0.0)) / capacity;
        let mut penalty_applied = false;
        if projected_utilization > 1.0 {
            capacity_score = 0.0;
        } else if projected_utilization >= self.weights.near_capacity_threshold {
            capacity_score *= self.weights.near_capacity_penalty;
            penalty_applied = true;
        }

        let total_weight = self.weights.skill_weight + self.weights.capacity_weight;
        let combined_score = (self.weights.skill_weight * skill_score
            + self.weights.capacity_weight * capacity_score)
            / total_weight;

        RoutingCandidate {
            user_id: member.user_id.clone(),
            skill_score,
            capacity_score,
            combined_score,
            confidence: Confidence::from_score(combined_score),
            reasoning: RoutingReasoning {
                skill_matches,
                capacity_analysis: CapacityAnalysis {
                    capacity_hours_per_week: capacity,
                    current_workload_hours: workload,
                    available_hours,
                    projected_utilization,
                    penalty_applied,
                },
            },
        }
    }
}
