//! Analyzed-task types produced by the task analyzer.

use serde::Deserialize;
use serde::Serialize;

/// Kind of work a prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Code,
    Design,
    Analysis,
    Creative,
    Research,
    Debug,
    Explain,
    #[default]
    General,
    /// Greetings, acknowledgements and other short exchanges that do not
    /// warrant a multi-adapter discussion.
    SimpleChat,
}

impl TaskType {
    /// Stable string form, used for persistence and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Code => "code",
            TaskType::Design => "design",
            TaskType::Analysis => "analysis",
            TaskType::Creative => "creative",
            TaskType::Research => "research",
            TaskType::Debug => "debug",
            TaskType::Explain => "explain",
            TaskType::General => "general",
            TaskType::SimpleChat => "simple_chat",
        }
    }

    /// Parse the stable string form back into a kind.
    pub fn parse(s: &str) -> Option<TaskType> {
        match s {
            "code" => Some(TaskType::Code),
            "design" => Some(TaskType::Design),
            "analysis" => Some(TaskType::Analysis),
            "creative" => Some(TaskType::Creative),
            "research" => Some(TaskType::Research),
            "debug" => Some(TaskType::Debug),
            "explain" => Some(TaskType::Explain),
            "general" => Some(TaskType::General),
            "simple_chat" => Some(TaskType::SimpleChat),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of analyzing a user prompt.
///
/// Built once per request by the analyzer and read-only afterwards. The
/// discussion manager and the selector derive everything they need from
/// this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The original, untrimmed prompt.
    pub prompt: String,
    /// Detected task kind.
    pub task_type: TaskType,
    /// Complexity estimate in `[0.0, 1.0]`.
    pub complexity: f64,
    /// Up to ten keywords in first-seen order, stopwords removed.
    pub keywords: Vec<String>,
    pub requires_code: bool,
    pub requires_creativity: bool,
    pub requires_analysis: bool,
    /// Suggested discussion rounds, in `[1, 7]`.
    pub suggested_rounds: u32,
    /// Suggested number of participating adapters, in `[1, 6]`.
    pub suggested_ai_count: u32,
}

impl Task {
    /// True when complexity is above the "complex" threshold.
    pub fn is_complex(&self) -> bool {
        self.complexity > 0.6
    }

    /// True when complexity is below the fast-path threshold.
    pub fn is_simple(&self) -> bool {
        self.complexity < 0.3
    }

    /// Whether this task justifies a multi-adapter discussion.
    ///
    /// Simple chat, low complexity and single-round tasks all take the
    /// fast path instead.
    pub fn requires_multi_ai(&self) -> bool {
        if self.task_type == TaskType::SimpleChat {
            return false;
        }
        if self.complexity < 0.3 {
            return false;
        }
        self.suggested_rounds >= 2
    }
}
