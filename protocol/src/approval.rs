//! Action approval types.
//!
//! Adapters sometimes propose side effects (create files, run commands).
//! The approval engine scores each proposed action's importance and, above
//! a threshold, gates it on the registered approval callback.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// How much scrutiny an action deserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceLevel {
    /// Auto-approved.
    Low,
    /// Notification; may auto-approve.
    Medium,
    /// Requires explicit approval.
    High,
    /// Must confirm with details.
    Critical,
}

/// Kind of side effect an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FileCreate,
    FileModify,
    FileDelete,
    CommandExecute,
    ApiCall,
    ConfigChange,
    InstallPackage,
    Suggestion,
}

/// Outcome of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    AutoApproved,
    Approved,
    Rejected,
    Modified,
    Pending,
}

/// One adapter's vote on a proposed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiVote {
    pub adapter: String,
    pub approves: bool,
    /// Vote confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// An action proposed during the discussion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub description: String,
    #[serde(default)]
    pub details: HashMap<String, Value>,

    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub files_to_delete: Vec<String>,
    #[serde(default)]
    pub commands_to_execute: Vec<String>,

    #[serde(default)]
    pub modifies_files: bool,
    #[serde(default)]
    pub executes_commands: bool,
    #[serde(default)]
    pub has_destructive_operation: bool,
    #[serde(default = "default_reversible")]
    pub reversible: bool,

    #[serde(default)]
    pub votes: Vec<AiVote>,
}

fn default_reversible() -> bool {
    true
}

impl Action {
    /// A bare action of the given kind with no side-effect details yet.
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            details: HashMap::new(),
            files_to_create: Vec::new(),
            files_to_modify: Vec::new(),
            files_to_delete: Vec::new(),
            commands_to_execute: Vec::new(),
            modifies_files: false,
            executes_commands: false,
            has_destructive_operation: false,
            reversible: true,
            votes: Vec::new(),
        }
    }

    /// Mean confidence of approving votes over all votes.
    pub fn total_confidence(&self) -> f64 {
        if self.votes.is_empty() {
            return 0.0;
        }
        let approving: f64 = self
            .votes
            .iter()
            .filter(|v| v.approves)
            .map(|v| v.confidence)
            .sum();
        if approving == 0.0 {
            return 0.0;
        }
        approving / self.votes.len() as f64
    }

    /// Fraction of votes that approve.
    pub fn approval_ratio(&self) -> f64 {
        if self.votes.is_empty() {
            return 0.0;
        }
        let approving = self.votes.iter().filter(|v| v.approves).count();
        approving as f64 / self.votes.len() as f64
    }
}

/// Result handed back by the approval engine or callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub status: ApprovalStatus,
    pub action: Action,
    #[serde(default)]
    pub user_feedback: String,
    #[serde(default)]
    pub modifications: HashMap<String, Value>,
}

impl ApprovalOutcome {
    pub fn auto_approved(action: Action) -> Self {
        Self {
            status: ApprovalStatus::AutoApproved,
            action,
            user_feedback: String::new(),
            modifications: HashMap::new(),
        }
    }

    pub fn pending(action: Action) -> Self {
        Self {
            status: ApprovalStatus::Pending,
            action,
            user_feedback: String::new(),
            modifications: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn vote(adapter: &str, approves: bool, confidence: f64) -> AiVote {
        AiVote {
            adapter: adapter.to_string(),
            approves,
            confidence,
            reasoning: String::new(),
        }
    }

    #[test]
    fn approval_ratio_counts_approving_votes() {
        let mut action = Action::new(ActionType::Suggestion, "try it");
        action.votes = vec![vote("a", true, 0.9), vote("b", false, 0.8)];
        assert_eq!(action.approval_ratio(), 0.5);
    }

    #[test]
    fn no_votes_means_zero_confidence() {
        let action = Action::new(ActionType::Suggestion, "try it");
        assert_eq!(action.total_confidence(), 0.0);
        assert_eq!(action.approval_ratio(), 0.0);
    }

    #[test]
    fn total_confidence_averages_over_all_votes() {
        let mut action = Action::new(ActionType::Suggestion, "try it");
        action.votes = vec![
            vote("a", true, 0.8),
            vote("b", true, 0.6),
            vote("c", false, 1.0),
        ];
        let expected = (0.8 + 0.6) / 3.0;
        assert!((action.total_confidence() - expected).abs() < 1e-9);
    }

    #[test]
    fn importance_levels_order() {
        assert!(ImportanceLevel::Low < ImportanceLevel::Critical);
    }
}
