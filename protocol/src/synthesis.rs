//! Synthesis output and discussion summary records.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Result of synthesizing a finished discussion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Short human-readable summary, bounded by the synthesizer's
    /// configured length.
    pub summary: String,
    /// Up to ten deduplicated key points.
    pub key_points: Vec<String>,
    /// Up to five sender-prefixed agreement excerpts.
    pub agreements: Vec<String>,
    /// Up to five sender-prefixed disagreement excerpts.
    pub disagreements: Vec<String>,
    /// Up to five extracted recommendations.
    pub recommendations: Vec<String>,
    /// Message count per adapter, keyed by adapter name.
    pub contributions: BTreeMap<String, u32>,
    pub total_messages: u32,
    pub total_rounds: u32,
    pub consensus_reached: bool,
    /// Confidence carried into persistence, in `[0.0, 1.0]`.
    #[serde(default)]
    pub confidence: f64,
}

/// Per-adapter contribution statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Contribution {
    pub message_count: u32,
    pub total_tokens: u32,
}

/// Serializable snapshot of a shared context, carried on the terminal
/// [`Result`](crate::Event::Result) event instead of the live transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    /// Original prompt, truncated to 100 characters.
    pub original_prompt: String,
    pub total_messages: u32,
    pub total_rounds: u32,
    pub contributions: BTreeMap<String, Contribution>,
    pub key_points_count: u32,
    pub consensus_reached: bool,
}
