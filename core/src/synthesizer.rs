//! Heuristic synthesis of a finished discussion.
//!
//! Pure over the final context: extracts key points, agreement and
//! disagreement excerpts, and recommendations, then renders a short
//! summary. No adapter is consulted.

use std::sync::LazyLock;

use quorum_protocol::SynthesisResult;
use regex::Regex;
use regex::RegexBuilder;

use crate::context::SharedContext;

#[allow(clippy::unwrap_used)]
fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .unwrap()
        })
        .collect()
}

static NUMBERED_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let pattern = RegexBuilder::new(r"^\d+[.)]\s*(.+)$")
        .multi_line(true)
        .build()
        .unwrap();
    pattern
});

static IMPORTANT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"중요한[^.]*점[은는]?\s*:?\s*(.+)",
        r"key points?:?\s*(.+)",
        r"importantly?:?\s*(.+)",
    ])
});

static AGREEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"동의합니다[.:]?\s*(.+)",
        r"agreed?[.:]\s*(.+)",
        r"맞습니다[.:]?\s*(.+)",
        r"좋은 의견입니다[.:]?\s*(.+)",
        r"build on (?:that|this)[.:]?\s*(.+)",
    ])
});

static DISAGREEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"동의하지 않(?:습니다|는다)[.:]?\s*(.+)",
        r"disagree[.:]?\s*(.+)",
        r"다른 의견[.:]?\s*(.+)",
        r"however[,:]?\s+(.+)",
        r"그러나[,]?\s*(.+)",
    ])
});

static RECOMMENDATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"추천[합니다하면][.:]?\s*(.+)",
        r"recommends?[.:]?\s*(.+)",
        r"제안[합니다하면][.:]?\s*(.+)",
        r"suggests?[.:]?\s*(.+)",
        r"should[:]?\s+(.+)",
    ])
});

/// Synthesizes discussion results.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    /// Maximum summary length in characters.
    pub max_summary_length: usize,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self {
            max_summary_length: 500,
        }
    }
}

impl Synthesizer {
    pub fn new(max_summary_length: usize) -> Self {
        Self { max_summary_length }
    }

    /// Synthesize the discussion held in `context`.
    pub fn synthesize(&self, context: &SharedContext) -> SynthesisResult {
        let key_points = extract_key_points(context);
        let (agreements, disagreements) = analyze_positions(context);
        let recommendations = extract_recommendations(context);
        let summary = self.create_summary(context, &key_points, &recommendations);

        let contributions = context
            .message_counts()
            .iter()
            .map(|(name, &count)| (name.clone(), count))
            .collect();

        SynthesisResult {
            summary,
            key_points,
            agreements,
            disagreements,
            recommendations,
            contributions,
            total_messages: context.messages().len() as u32,
            total_rounds: context.current_round(),
            consensus_reached: context.consensus_reached,
            confidence: 0.0,
        }
    }

    /// Short template: participant count, rounds, consensus status, top
    /// key points and the leading recommendation.
    fn create_summary(
        &self,
        context: &SharedContext,
        key_points: &[String],
        recommendations: &[String],
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(format!(
            "{}개의 AI가 {}라운드에 걸쳐 토론했습니다.",
            context.message_counts().len(),
            context.current_round()
        ));
        if context.consensus_reached {
            parts.push("토론 결과 합의에 도달했습니다.".to_string());
        } else {
            parts.push("다양한 관점이 제시되었습니다.".to_string());
        }

        if !key_points.is_empty() {
            parts.push("\n주요 포인트:".to_string());
            for (i, point) in key_points.iter().take(3).enumerate() {
                parts.push(format!("  {}. {point}", i + 1));
            }
        }

        if let Some(top) = recommendations.first() {
            parts.push(format!("\n권장 사항: {top}"));
        }

        let summary = parts.join(" ");
        if summary.chars().count() > self.max_summary_length {
            let head: String = summary
                .chars()
                .take(self.max_summary_length.saturating_sub(3))
                .collect();
            format!("{head}...")
        } else {
            summary
        }
    }
}

fn push_unique(target: &mut Vec<String>, seen: &mut Vec<String>, candidate: &str) {
    let candidate: String = candidate.trim().chars().take(100).collect();
    if candidate.is_empty() {
        return;
    }
    let folded = candidate.to_lowercase();
    if seen.contains(&folded) {
        return;
    }
    seen.push(folded);
    target.push(candidate);
}

/// Context key points plus list items and "important" phrases from the
/// messages, case-insensitively deduplicated, capped at ten.
fn extract_key_points(context: &SharedContext) -> Vec<String> {
    let mut points = Vec::new();
    let mut seen = Vec::new();

    for point in context.key_points() {
        push_unique(&mut points, &mut seen, point);
    }

    for message in context.messages() {
        for caps in NUMBERED_ITEM.captures_iter(&message.content) {
            if let Some(group) = caps.get(1) {
                push_unique(&mut points, &mut seen, group.as_str());
            }
        }
        for pattern in IMPORTANT_PATTERNS.iter() {
            for caps in pattern.captures_iter(&message.content) {
                if let Some(group) = caps.get(1) {
                    push_unique(&mut points, &mut seen, group.as_str());
                }
            }
        }
    }

    points.truncate(10);
    points
}

/// Sender-prefixed agreement and disagreement excerpts, five each.
fn analyze_positions(context: &SharedContext) -> (Vec<String>, Vec<String>) {
    let mut agreements = Vec::new();
    let mut disagreements = Vec::new();
    let mut seen_agree = Vec::new();
    let mut seen_disagree = Vec::new();

    for message in context.messages() {
        for pattern in AGREEMENT_PATTERNS.iter() {
            for caps in pattern.captures_iter(&message.content) {
                if let Some(group) = caps.get(1) {
                    let excerpt: String = group.as_str().trim().chars().take(100).collect();
                    push_unique(
                        &mut agreements,
                        &mut seen_agree,
                        &format!("{}: {excerpt}", message.sender),
                    );
                }
            }
        }
        for pattern in DISAGREEMENT_PATTERNS.iter() {
            for caps in pattern.captures_iter(&message.content) {
                if let Some(group) = caps.get(1) {
                    let excerpt: String = group.as_str().trim().chars().take(100).collect();
                    push_unique(
                        &mut disagreements,
                        &mut seen_disagree,
                        &format!("{}: {excerpt}", message.sender),
                    );
                }
            }
        }
    }

    agreements.truncate(5);
    disagreements.truncate(5);
    (agreements, disagreements)
}

/// Recommendation-cue captures across all messages, five kept.
fn extract_recommendations(context: &SharedContext) -> Vec<String> {
    let mut recommendations = Vec::new();
    let mut seen = Vec::new();
    for message in context.messages() {
        for pattern in RECOMMENDATION_PATTERNS.iter() {
            for caps in pattern.captures_iter(&message.content) {
                if let Some(group) = caps.get(1) {
                    push_unique(&mut recommendations, &mut seen, group.as_str());
                }
            }
        }
    }
    recommendations.truncate(5);
    recommendations
}
