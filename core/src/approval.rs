//! Action approval engine.
//!
//! Scores how much scrutiny a proposed action deserves and gates the
//! important ones on a user callback. Low-importance actions are
//! auto-approved so the discussion is not interrupted for suggestions.

use std::sync::Arc;
use std::sync::LazyLock;

use futures::future::BoxFuture;
use quorum_protocol::Action;
use quorum_protocol::ActionType;
use quorum_protocol::ApprovalOutcome;
use quorum_protocol::ImportanceLevel;
use regex::Regex;
use regex::RegexBuilder;

/// Async callback presenting an approval decision to the user.
pub type ApprovalCallback =
    Arc<dyn Fn(Action, ImportanceLevel) -> BoxFuture<'static, ApprovalOutcome> + Send + Sync>;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            #[allow(clippy::unwrap_used)]
            RegexBuilder::new(p)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .unwrap()
        })
        .collect()
}

static DANGEROUS_COMMANDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\brm\s+-rf\b",
        r"\brm\s+.*\*",
        r"\bsudo\b",
        r"\bchmod\s+777\b",
        r"\bdrop\s+database\b",
        r"\btruncate\b",
        r"\bformat\b",
        r"\bfdisk\b",
        r">\s*/dev/",
        r"\bdd\s+if=",
    ])
});

static SENSITIVE_FILES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\.env",
        r"\.git/",
        r"\.ssh/",
        r"credentials",
        r"secrets?\.ya?ml",
        r"config\.ya?ml",
        r"package-lock\.json",
        r"yarn\.lock",
    ])
});

static FILE_CREATE_CUES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"create\s+(?:file|files)?\s*[:\s]+([^\n]+)",
        r"생성[:\s]+([^\n]+)",
    ])
});

static COMMAND_CUES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"run[:\s]+`([^`]+)`",
        r"execute[:\s]+`([^`]+)`",
        r"실행[:\s]+`([^`]+)`",
        r"```(?:bash|sh|shell)\n([^`]+)```",
    ])
});

static INSTALL_CUES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"npm\s+install\s+([^\n]+)",
        r"pip\s+install\s+([^\n]+)",
        r"yarn\s+add\s+([^\n]+)",
    ])
});

/// Decides which actions need a human in the loop.
#[derive(Clone)]
pub struct ApprovalEngine {
    pub auto_approve_low: bool,
    pub auto_approve_medium: bool,
    callback: Option<ApprovalCallback>,
}

impl Default for ApprovalEngine {
    fn default() -> Self {
        Self {
            auto_approve_low: true,
            auto_approve_medium: false,
            callback: None,
        }
    }
}

impl std::fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("auto_approve_low", &self.auto_approve_low)
            .field("auto_approve_medium", &self.auto_approve_medium)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ApprovalEngine {
    pub fn set_callback(&mut self, callback: ApprovalCallback) {
        self.callback = Some(callback);
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Score an action onto an importance level.
    pub fn calculate_importance(&self, action: &Action) -> ImportanceLevel {
        let mut score: f64 = 0.0;

        if action.modifies_files {
            score += 2.0;
        }
        score += action.files_to_create.len() as f64 * 0.5;
        score += action.files_to_modify.len() as f64;
        for file in &action.files_to_modify {
            if is_sensitive_file(file) {
                score += 2.0;
            }
        }
        score += action.files_to_delete.len() as f64 * 2.0;

        if action.executes_commands {
            score += 2.0;
            for command in &action.commands_to_execute {
                if is_dangerous_command(command) {
                    score += 3.0;
                }
            }
        }

        if action.has_destructive_operation {
            score += 3.0;
        }
        if !action.reversible {
            score += 2.0;
        }

        if !action.votes.is_empty() {
            let ratio = action.approval_ratio();
            if ratio < 0.5 {
                score += 2.0;
            } else if ratio < 0.8 {
                score += 1.0;
            }
        }

        if score <= 1.0 {
            ImportanceLevel::Low
        } else if score <= 3.0 {
            ImportanceLevel::Medium
        } else if score <= 5.0 {
            ImportanceLevel::High
        } else {
            ImportanceLevel::Critical
        }
    }

    /// Decide on an action: auto-approve under the configured
    /// thresholds, delegate to the callback when present, else leave
    /// high-importance actions pending.
    pub async fn request_approval(&self, action: Action) -> (ImportanceLevel, ApprovalOutcome) {
        let importance = self.calculate_importance(&action);

        if importance == ImportanceLevel::Low && self.auto_approve_low {
            return (importance, ApprovalOutcome::auto_approved(action));
        }
        if importance == ImportanceLevel::Medium && self.auto_approve_medium {
            return (importance, ApprovalOutcome::auto_approved(action));
        }

        if let Some(callback) = &self.callback {
            let outcome = callback(action, importance).await;
            return (importance, outcome);
        }

        if importance >= ImportanceLevel::High {
            return (importance, ApprovalOutcome::pending(action));
        }
        (importance, ApprovalOutcome::auto_approved(action))
    }

    /// Pull proposed actions out of a response text.
    pub fn extract_actions(&self, response: &str) -> Vec<Action> {
        let mut actions = Vec::new();

        let mut files_to_create: Vec<String> = Vec::new();
        for pattern in FILE_CREATE_CUES.iter() {
            for caps in pattern.captures_iter(response) {
                if let Some(group) = caps.get(1) {
                    files_to_create.push(group.as_str().trim().to_string());
                }
            }
        }
        if !files_to_create.is_empty() {
            files_to_create.truncate(10);
            let mut action = Action::new(ActionType::FileCreate, "Create files");
            action.files_to_create = files_to_create;
            action.modifies_files = true;
            actions.push(action);
        }

        let mut commands: Vec<String> = Vec::new();
        for pattern in COMMAND_CUES.iter() {
            for caps in pattern.captures_iter(response) {
                if let Some(group) = caps.get(1) {
                    commands.push(group.as_str().trim().to_string());
                }
            }
        }
        if !commands.is_empty() {
            commands.truncate(10);
            let mut action = Action::new(ActionType::CommandExecute, "Execute commands");
            action.has_destructive_operation =
                commands.iter().any(|c| is_dangerous_command(c));
            action.commands_to_execute = commands;
            action.executes_commands = true;
            action.reversible = false;
            actions.push(action);
        }

        for pattern in INSTALL_CUES.iter() {
            let packages: Vec<String> = pattern
                .captures_iter(response)
                .filter_map(|caps| caps.get(1).map(|g| g.as_str().trim().to_string()))
                .take(5)
                .collect();
            if !packages.is_empty() {
                let mut action = Action::new(
                    ActionType::InstallPackage,
                    format!("Install packages: {}", packages.join(", ")),
                );
                action.commands_to_execute =
                    packages.iter().map(|p| format!("Install: {p}")).collect();
                action.executes_commands = true;
                actions.push(action);
                break;
            }
        }

        actions
    }
}

fn is_sensitive_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    SENSITIVE_FILES.iter().any(|p| p.is_match(&lower))
}

fn is_dangerous_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    DANGEROUS_COMMANDS.iter().any(|p| p.is_match(&lower))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use quorum_protocol::AiVote;
    use quorum_protocol::ApprovalStatus;

    use super::*;

    #[test]
    fn suggestions_are_low_importance() {
        let engine = ApprovalEngine::default();
        let action = Action::new(ActionType::Suggestion, "consider a cache");
        assert_eq!(engine.calculate_importance(&action), ImportanceLevel::Low);
    }

    #[test]
    fn deleting_files_escalates() {
        let engine = ApprovalEngine::default();
        let mut action = Action::new(ActionType::FileDelete, "remove old configs");
        action.modifies_files = true;
        action.files_to_delete = vec!["a.txt".to_string(), "b.txt".to_string()];
        action.has_destructive_operation = true;
        action.reversible = false;
        assert_eq!(
            engine.calculate_importance(&action),
            ImportanceLevel::Critical
        );
    }

    #[test]
    fn sensitive_files_raise_the_score() {
        let engine = ApprovalEngine::default();
        let mut plain = Action::new(ActionType::FileModify, "edit");
        plain.modifies_files = true;
        plain.files_to_modify = vec!["src/main.rs".to_string()];

        let mut sensitive = plain.clone();
        sensitive.files_to_modify = vec![".env".to_string()];

        assert!(
            engine.calculate_importance(&sensitive) > engine.calculate_importance(&plain)
        );
    }

    #[test]
    fn dangerous_commands_are_detected() {
        assert!(is_dangerous_command("sudo rm -rf /"));
        assert!(is_dangerous_command("dd if=/dev/zero of=/dev/sda"));
        assert!(!is_dangerous_command("cargo build --release"));
    }

    #[test]
    fn split_votes_increase_importance() {
        let engine = ApprovalEngine::default();
        let mut action = Action::new(ActionType::FileModify, "edit");
        action.modifies_files = true;
        action.files_to_modify = vec!["src/lib.rs".to_string()];
        let base = engine.calculate_importance(&action);

        action.votes = vec![
            AiVote {
                adapter: "claude".to_string(),
                approves: true,
                confidence: 0.9,
                reasoning: String::new(),
            },
            AiVote {
                adapter: "codex".to_string(),
                approves: false,
                confidence: 0.9,
                reasoning: String::new(),
            },
        ];
        assert!(engine.calculate_importance(&action) > base);
    }

    #[tokio::test]
    async fn low_importance_auto_approves() {
        let engine = ApprovalEngine::default();
        let action = Action::new(ActionType::Suggestion, "try it");
        let (importance, outcome) = engine.request_approval(action).await;
        assert_eq!(importance, ImportanceLevel::Low);
        assert_eq!(outcome.status, ApprovalStatus::AutoApproved);
    }

    #[tokio::test]
    async fn high_importance_without_callback_stays_pending() {
        let engine = ApprovalEngine::default();
        let mut action = Action::new(ActionType::CommandExecute, "run it");
        action.executes_commands = true;
        action.commands_to_execute = vec!["sudo reboot".to_string()];
        action.reversible = false;
        let (importance, outcome) = engine.request_approval(action).await;
        assert!(importance >= ImportanceLevel::High);
        assert_eq!(outcome.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn callback_decides_when_registered() {
        let mut engine = ApprovalEngine::default();
        engine.set_callback(Arc::new(
            |action, _importance| -> BoxFuture<'static, ApprovalOutcome> {
                Box::pin(async move {
                    ApprovalOutcome {
                        status: ApprovalStatus::Rejected,
                        action,
                        user_feedback: "not now".to_string(),
                        modifications: Default::default(),
                    }
                })
            },
        ));

        let mut action = Action::new(ActionType::CommandExecute, "run it");
        action.executes_commands = true;
        action.reversible = false;
        let (_importance, outcome) = engine.request_approval(action).await;
        assert_eq!(outcome.status, ApprovalStatus::Rejected);
        assert_eq!(outcome.user_feedback, "not now");
    }

    #[test]
    fn actions_are_extracted_from_response_text() {
        let engine = ApprovalEngine::default();
        let response = "First create file: src/cache.rs\nthen run: `cargo test` and \
                        finally npm install lru-cache for the frontend";
        let actions = engine.extract_actions(response);

        assert!(
            actions
                .iter()
                .any(|a| a.action_type == ActionType::FileCreate && a.modifies_files)
        );
        assert!(
            actions
                .iter()
                .any(|a| a.action_type == ActionType::CommandExecute
                    && a.commands_to_execute == vec!["cargo test".to_string()])
        );
        assert!(
            actions
                .iter()
                .any(|a| a.action_type == ActionType::InstallPackage)
        );
    }

    #[test]
    fn destructive_commands_flag_the_action() {
        let engine = ApprovalEngine::default();
        let actions = engine.extract_actions("please run: `sudo rm -rf /tmp/cache`");
        let command = actions
            .iter()
            .find(|a| a.action_type == ActionType::CommandExecute)
            .expect("command action");
        assert!(command.has_destructive_operation);
        assert!(!command.reversible);
    }

    #[test]
    fn plain_prose_extracts_nothing() {
        let engine = ApprovalEngine::default();
        assert!(
            engine
                .extract_actions("the tradeoffs are balanced either way")
                .is_empty()
        );
    }
}
