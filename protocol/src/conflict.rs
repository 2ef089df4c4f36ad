//! Conflict and resolution records produced by the conflict resolver.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Severity of a detected disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// Minor disagreement, easily resolved.
    Low,
    /// Significant disagreement.
    Medium,
    /// Strong opposing views.
    High,
    /// Fundamental disagreement that usually needs user input.
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
            ConflictSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a conflict was (or was not) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Settled by weighted voting.
    AutoResolved,
    /// The race was too close; the user picks.
    UserDecision,
    /// Positions were merged.
    Compromise,
    /// No clear positions; more discussion needed.
    Deferred,
}

impl ResolutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionKind::AutoResolved => "auto_resolved",
            ResolutionKind::UserDecision => "user_decision",
            ResolutionKind::Compromise => "compromise",
            ResolutionKind::Deferred => "deferred",
        }
    }
}

/// One adapter's extracted stance on the contested topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opinion {
    /// Adapter the opinion is attributed to.
    pub adapter: String,
    /// Extracted position, at most 100 characters.
    pub position: String,
    /// Confidence estimate in `[0.3, 1.0]`.
    pub confidence: f64,
    /// Excerpt of the message the position was lifted from.
    pub reasoning: String,
    /// Up to five supporting points, each at most 100 characters.
    pub supporting_points: Vec<String>,
}

/// A detected disagreement between adapter opinions.
///
/// Opinions are keyed by adapter name in a sorted map so that iteration
/// order (and therefore voting and serialization) is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub topic: String,
    pub opinions: BTreeMap<String, Opinion>,
    pub severity: ConflictSeverity,
    pub round_detected: u32,
    #[serde(default)]
    pub context_summary: String,
}

/// One voted position with its aggregate support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotedOption {
    pub position: String,
    pub supporters: Vec<String>,
    pub weight: f64,
    pub reasoning: String,
}

/// Outcome of weighted voting over a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: ResolutionKind,
    /// Winning position, present for [`ResolutionKind::AutoResolved`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Options ranked by descending weight.
    #[serde(default)]
    pub options: Vec<VotedOption>,
    #[serde(default)]
    pub explanation: String,
    /// Confidence in `[0.0, 1.0]`.
    #[serde(default)]
    pub confidence: f64,
}

impl Resolution {
    /// A resolution that defers to further discussion.
    pub fn deferred(explanation: impl Into<String>) -> Self {
        Self {
            kind: ResolutionKind::Deferred,
            winner: None,
            options: Vec::new(),
            explanation: explanation.into(),
            confidence: 0.0,
        }
    }
}
