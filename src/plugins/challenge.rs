//! Adversarial review over the decision ledger.
//!
//! Configuration says which roles challenge which; inverted here into
//! `author role -> challenger roles`. A decision by a targeted author is not
//! executable until a challenger accepts it or the dispute is escalated.

use crate::core::config::{ChallengeLimits, DefaultAction, GovernanceConfig};
use crate::core::error::{StewardError, ViolationType};
use crate::plugins::decision::{DecisionRecord, DecisionStatus, DecisionStore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionCheck {
    pub executable: bool,
    pub reason: String,
    pub required_challengers: Vec<String>,
}

/// How a challenge that exhausted the round limit was settled.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Escalated,
    AutoAccepted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeOutcome {
    pub decision: DecisionRecord,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone)]
pub struct ChallengeProtocol {
    challengers: BTreeMap<String, BTreeSet<String>>,
    limits: ChallengeLimits,
}

impl ChallengeProtocol {
    pub fn new(config: &GovernanceConfig) -> Self {
        let mut challengers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (role, role_config) in &config.roles {
            for target in &role_config.challenges {
                challengers
                    .entry(target.clone())
                    .or_default()
                    .insert(role.clone());
            }
        }
        Self {
            challengers,
            limits: config.challenge.clone(),
        }
    }

    pub fn limits(&self) -> &ChallengeLimits {
        &self.limits
    }

    /// Roles allowed to challenge decisions authored by `author`.
    pub fn challengers_for(&self, author: &str) -> Vec<String> {
        self.challengers
            .get(author)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn can_execute(&self, decision: &DecisionRecord) -> ExecutionCheck {
        let required = self.challengers_for(&decision.author);
        if required.is_empty() {
            return ExecutionCheck {
                executable: true,
                reason: format!("no role challenges '{}' decisions", decision.author),
                required_challengers: required,
            };
        }
        let executable = matches!(
            decision.status,
            DecisionStatus::Accepted | DecisionStatus::Escalated
        );
        let reason = if executable {
            format!("decision is {}", decision.status)
        } else {
            format!(
                "decision is {}; awaiting review by {}",
                decision.status,
                required.join(", ")
            )
        };
        ExecutionCheck {
            executable,
            reason,
            required_challengers: required,
        }
    }

    fn authorize<'a>(
        &self,
        ledger: &'a DecisionStore,
        id: &str,
        challenger: &str,
    ) -> Result<&'a DecisionRecord, StewardError> {
        let decision = ledger
            .get(id)
            .ok_or_else(|| StewardError::NotFound(format!("decision '{id}'")))?;
        let allowed = self
            .challengers
            .get(&decision.author)
            .is_some_and(|set| set.contains(challenger));
        if !allowed {
            tracing::warn!(id, challenger, author = %decision.author, "unauthorized challenger");
            return Err(StewardError::AccessDenied {
                violation_type: ViolationType::UnauthorizedChallenger,
                reason: format!(
                    "role '{challenger}' may not review decisions authored by '{}'",
                    decision.author
                ),
            });
        }
        Ok(decision)
    }

    /// Open a challenge round. When the round limit is reached the dispute is
    /// settled by policy instead of looping.
    pub fn challenge(
        &self,
        ledger: &mut DecisionStore,
        id: &str,
        challenger: &str,
        rationale: &str,
        counter_proposal: Option<&str>,
    ) -> Result<ChallengeOutcome, StewardError> {
        self.authorize(ledger, id, challenger)?;
        let decision = ledger.challenge(id, challenger, rationale, counter_proposal)?;
        if decision.challenge_rounds < self.limits.max_rounds {
            return Ok(ChallengeOutcome {
                decision,
                resolution: None,
            });
        }

        let auto_accept =
            !self.limits.auto_escalation && self.limits.default_action == DefaultAction::Accept;
        if auto_accept {
            tracing::info!(id, rounds = decision.challenge_rounds, "challenge rounds exhausted, auto-accepting");
            let decision = ledger.accept(id, None, None)?;
            Ok(ChallengeOutcome {
                decision,
                resolution: Some(Resolution::AutoAccepted),
            })
        } else {
            tracing::warn!(id, rounds = decision.challenge_rounds, "challenge rounds exhausted, escalating");
            let decision = ledger.escalate(id)?;
            Ok(ChallengeOutcome {
                decision,
                resolution: Some(Resolution::Escalated),
            })
        }
    }

    /// A challenger signs off on the decision.
    pub fn accept(
        &self,
        ledger: &mut DecisionStore,
        id: &str,
        challenger: &str,
        rationale: &str,
    ) -> Result<DecisionRecord, StewardError> {
        self.authorize(ledger, id, challenger)?;
        ledger.accept(id, Some(challenger), Some(rationale))
    }

    pub fn escalate(&self, ledger: &mut DecisionStore, id: &str) -> Result<DecisionRecord, StewardError> {
        ledger.escalate(id)
    }
}
