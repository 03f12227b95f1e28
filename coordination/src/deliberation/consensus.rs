//! Consensus tally — supermajority agreement over non-skeptic agents.
//!
//! The skeptic is mandated to disagree, so its score is reported but never
//! counted. Failed invocations are excluded entirely.

use serde::{Deserialize, Serialize};

use super::records::AgentTurn;
use crate::agent::TheoryDraft;

/// Thresholds of the supermajority rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRule {
    /// Minimum agreement for an agent to count as agreeing.
    pub agree_threshold: u8,
    /// Minimum percentage of agreeing non-skeptics for a discovery.
    pub discovery_threshold: f64,
}

impl Default for ConsensusRule {
    fn default() -> Self {
        Self {
            agree_threshold: 70,
            discovery_threshold: 95.0,
        }
    }
}

/// Agreement counts for one round of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusTally {
    /// Agents that were invoked.
    pub total_agents: usize,
    /// Invocations that succeeded.
    pub successful: usize,
    /// Successful non-skeptic invocations, the denominator.
    pub voting: usize,
    /// Voting agents at or above the agree threshold.
    pub agreeing: usize,
    pub consensus_percent: f64,
    pub average_agreement: f64,
    /// The skeptic's score, reported but not counted.
    pub skeptic_agreement: Option<u8>,
    pub reached: bool,
}

impl ConsensusTally {
    pub fn summary_line(&self) -> String {
        format!(
            "{}/{} non-skeptic agents agree ({:.1}%), discovery: {}",
            self.agreeing,
            self.voting,
            self.consensus_percent,
            if self.reached { "yes" } else { "no" }
        )
    }
}

impl ConsensusRule {
    /// Tally agreement over `turns`, which must be in registration order.
    pub fn tally(&self, turns: &[AgentTurn]) -> ConsensusTally {
        let successful: Vec<&AgentTurn> = turns.iter().filter(|t| t.result.success).collect();
        let voters: Vec<u8> = successful
            .iter()
            .filter(|t| !t.role.is_skeptic())
            .map(|t| t.result.agreement)
            .collect();
        let agreeing = voters
            .iter()
            .filter(|a| **a >= self.agree_threshold)
            .count();

        let (consensus_percent, average_agreement) = if voters.is_empty() {
            (0.0, 0.0)
        } else {
            let n = voters.len() as f64;
            (
                agreeing as f64 / n * 100.0,
                voters.iter().map(|a| *a as f64).sum::<f64>() / n,
            )
        };

        ConsensusTally {
            total_agents: turns.len(),
            successful: successful.len(),
            voting: voters.len(),
            agreeing,
            consensus_percent,
            average_agreement,
            skeptic_agreement: successful
                .iter()
                .find(|t| t.role.is_skeptic())
                .map(|t| t.result.agreement),
            reached: !voters.is_empty() && consensus_percent >= self.discovery_threshold,
        }
    }

    /// Highest-agreement theory among successful turns. Ties go to the
    /// earliest turn, so results must be in registration order.
    pub fn best_theory<'a>(&self, turns: &'a [AgentTurn]) -> Option<(&'a AgentTurn, &'a TheoryDraft)> {
        let mut best: Option<(&AgentTurn, &TheoryDraft)> = None;
        for turn in turns.iter().filter(|t| t.result.success) {
            for draft in turn.result.proposed_theories() {
                let better = match best {
                    None => true,
                    Some((current, _)) => turn.result.agreement > current.result.agreement,
                };
                if better {
                    best = Some((turn, draft));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResult;
    use crate::deliberation::records::AgentRef;
    use crate::persona::Role;

    fn turn(key: &str, role: Role, agreement: u8, success: bool, theory: Option<&str>) -> AgentTurn {
        let mut result = AgentResult::failed("backend down");
        if success {
            result = AgentResult::degraded(String::new(), 0, String::new());
            result.outcome = crate::agent::ResultOutcome::Ok;
        }
        result.agreement = agreement;
        result.theory = theory.map(|name| TheoryDraft {
            name: name.to_string(),
            description: String::new(),
            mathematics: None,
            predictions: vec![],
            tests: vec![],
        });
        AgentTurn {
            agent: AgentRef {
                agent_id: key.to_string(),
                agent_key: key.to_string(),
                agent_name: key.to_string(),
            },
            role,
            result,
        }
    }

    fn council(agreeing: usize, total: usize, skeptic_score: u8) -> Vec<AgentTurn> {
        let mut turns: Vec<AgentTurn> = (0..total)
            .map(|i| {
                let score = if i < agreeing { 90 } else { 40 };
                turn(&format!("a{i}"), Role::Standard, score, true, None)
            })
            .collect();
        turns.push(turn("skeptic", Role::Skeptic, skeptic_score, true, None));
        turns
    }

    #[test]
    fn test_eight_of_nine_does_not_reach() {
        let tally = ConsensusRule::default().tally(&council(8, 9, 10));
        assert_eq!(tally.agreeing, 8);
        assert_eq!(tally.voting, 9);
        assert!((tally.consensus_percent - 88.888).abs() < 0.01);
        assert!(!tally.reached);
    }

    #[test]
    fn test_nine_of_nine_reaches() {
        let tally = ConsensusRule::default().tally(&council(9, 9, 10));
        assert_eq!(tally.consensus_percent, 100.0);
        assert!(tally.reached);
        assert_eq!(tally.skeptic_agreement, Some(10));
    }

    #[test]
    fn test_skeptic_score_never_counts() {
        let with_low = ConsensusRule::default().tally(&council(9, 9, 0));
        let with_high = ConsensusRule::default().tally(&council(9, 9, 100));
        assert_eq!(with_low.consensus_percent, with_high.consensus_percent);
        assert_eq!(with_low.voting, 9);
    }

    #[test]
    fn test_failures_are_excluded() {
        let mut turns = council(8, 8, 10);
        turns.insert(0, turn("down", Role::Standard, 0, false, None));
        let tally = ConsensusRule::default().tally(&turns);
        assert_eq!(tally.total_agents, 10);
        assert_eq!(tally.successful, 9);
        assert_eq!(tally.voting, 8);
        assert!(tally.reached);
    }

    #[test]
    fn test_no_voters_never_reaches() {
        let turns = vec![turn("skeptic", Role::Skeptic, 10, true, None)];
        let tally = ConsensusRule::default().tally(&turns);
        assert_eq!(tally.consensus_percent, 0.0);
        assert!(!tally.reached);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let turns = vec![turn("a", Role::Standard, 70, true, None)];
        assert!(ConsensusRule::default().tally(&turns).reached);
    }

    #[test]
    fn test_best_theory_ties_go_to_first() {
        let turns = vec![
            turn("a", Role::Standard, 80, true, Some("First")),
            turn("b", Role::Standard, 95, true, Some("Second")),
            turn("c", Role::Standard, 95, true, Some("Third")),
            turn("d", Role::Standard, 99, false, Some("Failed")),
        ];
        let (winner, draft) = ConsensusRule::default().best_theory(&turns).unwrap();
        assert_eq!(winner.agent.agent_key, "b");
        assert_eq!(draft.name, "Second");
    }

    #[test]
    fn test_summary_line() {
        let tally = ConsensusRule::default().tally(&council(9, 9, 10));
        assert_eq!(
            tally.summary_line(),
            "9/9 non-skeptic agents agree (100.0%), discovery: yes"
        );
    }
}
