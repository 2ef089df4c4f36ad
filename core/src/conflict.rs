//! Conflict detection and weighted-vote resolution.
//!
//! After each round (from the second onward) the coordinator asks this
//! module whether the adapters substantively disagree. Detection is
//! heuristic: positions are lifted from each adapter's latest message,
//! disagreement cues are counted across the transcript, and the combined
//! score maps onto a severity. Resolution weights each position by a
//! fixed per-adapter strength table times the opinion's confidence.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use quorum_protocol::Conflict;
use quorum_protocol::ConflictSeverity;
use quorum_protocol::Opinion;
use quorum_protocol::Resolution;
use quorum_protocol::ResolutionKind;
use quorum_protocol::TaskType;
use quorum_protocol::VotedOption;
use regex::Regex;
use regex::RegexBuilder;
use tracing::debug;

use crate::context::SharedContext;

/// Minimum disagreement score before a conflict is reported.
const DISAGREEMENT_FLOOR: f64 = 0.3;

/// Relative weight gap under which the race goes to the user.
const CLOSE_RACE_GAP: f64 = 0.1;

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

static DISAGREEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(disagree|동의하지 않|다른 의견|however|but|그러나|반면|alternatively)\b",
        r"\b(instead|대신|rather than|오히려|on the contrary)\b",
        r"\b(not recommend|추천하지 않|against|반대)\b",
        r"\b(wrong|잘못|incorrect|틀린|mistake)\b",
    ])
});

static POSITION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?:recommend|suggest|추천|제안)s?[:\s]+([^.!?\n]+)",
        r"(?:should use|should be|해야|사용해야)[:\s]+([^.!?\n]+)",
        r"(?:best|최선|best option|best choice)[:\s]+([^.!?\n]+)",
    ])
});

static HIGH_CONFIDENCE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(definitely|certainly|확실히|분명히|strongly)\b",
        r"\b(best|최선|optimal|최적)\b",
        r"\b(must|반드시|should definitely)\b",
    ])
});

static LOW_CONFIDENCE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(maybe|아마|perhaps|possibly)\b",
        r"\b(could|might|할 수도)\b",
        r"\b(not sure|확실하지 않|uncertain)\b",
    ])
});

static NUMBERED_POINT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let pattern = RegexBuilder::new(r"^\d+[.)]\s*(.+)$")
        .multi_line(true)
        .build()
        .unwrap();
    pattern
});

static BULLET_POINT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let pattern = RegexBuilder::new(r"^[-*]\s*(.+)$")
        .multi_line(true)
        .build()
        .unwrap();
    pattern
});

static TOPIC_TERMS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(framework|프레임워크)\b",
        r"\b(language|언어)\b",
        r"\b(database|데이터베이스)\b",
        r"\b(architecture|아키텍처)\b",
        r"\b(approach|접근|방법)\b",
        r"\b(library|라이브러리)\b",
    ])
});

/// Fixed per-adapter strength by task kind, used as vote weight. Local
/// instance names ("Ollama-Coder") fall back to their backend prefix.
fn strength(adapter: &str, kind: TaskType) -> f64 {
    let lower = adapter.to_lowercase();
    let key = lower.split('-').next().unwrap_or(&lower);
    match key {
        "claude" => match kind {
            TaskType::Design | TaskType::Explain => 0.95,
            TaskType::Code
            | TaskType::Analysis
            | TaskType::General
            | TaskType::SimpleChat => 0.9,
            TaskType::Creative | TaskType::Debug => 0.85,
            TaskType::Research => 0.8,
        },
        "codex" => match kind {
            TaskType::Code => 0.95,
            TaskType::Debug => 0.9,
            TaskType::Design => 0.85,
            TaskType::Analysis | TaskType::General => 0.8,
            TaskType::Explain => 0.75,
            TaskType::Creative | TaskType::Research | TaskType::SimpleChat => 0.7,
        },
        "gemini" => match kind {
            TaskType::Research => 0.95,
            TaskType::Analysis | TaskType::Creative | TaskType::Explain => 0.9,
            TaskType::Code
            | TaskType::Design
            | TaskType::General
            | TaskType::SimpleChat => 0.85,
            TaskType::Debug => 0.8,
        },
        "ollama" => match kind {
            TaskType::SimpleChat => 0.85,
            TaskType::Code
            | TaskType::Creative
            | TaskType::Explain
            | TaskType::General => 0.8,
            TaskType::Design | TaskType::Analysis | TaskType::Debug => 0.75,
            TaskType::Research => 0.7,
        },
        _ => 0.5,
    }
}

/// Detects and resolves conflicts for one task kind.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    task_type: TaskType,
}

impl ConflictResolver {
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }

    /// Look for substantive disagreement in the current transcript.
    ///
    /// Returns `None` for simple chat, with fewer than two contributing
    /// adapters, or when the disagreement score stays under the floor.
    pub fn detect_conflict(&self, context: &SharedContext) -> Option<Conflict> {
        if self.task_type == TaskType::SimpleChat {
            return None;
        }
        if context.messages().len() < 2 {
            return None;
        }

        let opinions = self.extract_opinions(context);
        if opinions.len() < 2 {
            return None;
        }

        let score = self.disagreement_score(context, &opinions);
        if score < DISAGREEMENT_FLOOR {
            return None;
        }

        let severity = severity_for(score, &opinions);
        debug!(score, severity = %severity, "conflict detected");

        Some(Conflict {
            topic: identify_topic(context),
            opinions,
            severity,
            round_detected: context.current_round(),
            context_summary: format!(
                "Discussion about: {}\nRounds completed: {}\nMessages: {}",
                context.original_prompt.chars().take(100).collect::<String>(),
                context.current_round(),
                context.messages().len()
            ),
        })
    }

    /// One opinion per adapter, from its most recent message.
    fn extract_opinions(&self, context: &SharedContext) -> BTreeMap<String, Opinion> {
        let mut latest: BTreeMap<String, &str> = BTreeMap::new();
        for message in context.messages() {
            if message.sender == "user" || message.sender == "system" {
                continue;
            }
            latest.insert(message.sender.clone(), &message.content);
        }

        latest
            .into_iter()
            .map(|(adapter, text)| {
                let reasoning: String = if text.chars().count() > 200 {
                    let head: String = text.chars().take(200).collect();
                    format!("{head}...")
                } else {
                    text.to_string()
                };
                (
                    adapter.clone(),
                    Opinion {
                        adapter,
                        position: extract_position(text),
                        confidence: estimate_confidence(text),
                        reasoning,
                        supporting_points: extract_supporting_points(text),
                    },
                )
            })
            .collect()
    }

    /// 0.6 · disagreement-cue fraction + 0.4 · position diversity.
    fn disagreement_score(
        &self,
        context: &SharedContext,
        opinions: &BTreeMap<String, Opinion>,
    ) -> f64 {
        let total = context.messages().len();
        if total == 0 {
            return 0.0;
        }
        let cued = context
            .messages()
            .iter()
            .filter(|message| {
                let content = message.content.to_lowercase();
                DISAGREEMENT_PATTERNS.iter().any(|p| p.is_match(&content))
            })
            .count();

        let cue_fraction = cued as f64 / total as f64;
        cue_fraction * 0.6 + position_diversity(opinions) * 0.4
    }

    /// Weighted voting over a detected conflict.
    pub fn resolve(&self, conflict: &Conflict) -> Resolution {
        let mut votes: BTreeMap<String, VotedOption> = BTreeMap::new();
        for opinion in conflict.opinions.values() {
            let weight = strength(&opinion.adapter, self.task_type) * opinion.confidence;
            votes
                .entry(opinion.position.clone())
                .and_modify(|option| {
                    option.supporters.push(opinion.adapter.clone());
                    option.weight += weight;
                })
                .or_insert_with(|| VotedOption {
                    position: opinion.position.clone(),
                    supporters: vec![opinion.adapter.clone()],
                    weight,
                    reasoning: opinion.reasoning.clone(),
                });
        }

        let mut options: Vec<VotedOption> = votes.into_values().collect();
        options.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        if options.is_empty() {
            return Resolution::deferred("No clear positions identified");
        }

        if options.len() >= 2 {
            let top = options[0].weight;
            let second = options[1].weight;
            let gap = if top > 0.0 { (top - second) / top } else { 0.0 };
            if gap < CLOSE_RACE_GAP {
                return Resolution {
                    kind: ResolutionKind::UserDecision,
                    winner: None,
                    explanation: format!("Close vote: {top:.2} vs {second:.2}"),
                    confidence: gap,
                    options: options.into_iter().take(2).collect(),
                };
            }
        }

        let total: f64 = options.iter().map(|o| o.weight).sum();
        let winner = options[0].clone();
        Resolution {
            kind: ResolutionKind::AutoResolved,
            winner: Some(winner.position),
            explanation: format!("Winner by weighted vote: {:.2}", winner.weight),
            confidence: if total > 0.0 {
                winner.weight / total
            } else {
                0.0
            },
            options,
        }
    }
}

/// First recommendation-pattern capture, else the first sentence, cut to
/// 100 characters.
fn extract_position(text: &str) -> String {
    for pattern in POSITION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text)
            && let Some(group) = caps.get(1)
        {
            return group.as_str().trim().chars().take(100).collect();
        }
    }

    let sentence = text
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(text)
        .trim_end_matches(['.', '!', '?']);
    sentence.trim().chars().take(100).collect()
}

/// Confidence starts at 0.7, ±0.1 per matching cue group, clamped to
/// `[0.3, 1.0]`.
fn estimate_confidence(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let mut confidence: f64 = 0.7;
    for pattern in HIGH_CONFIDENCE.iter() {
        if pattern.is_match(&lower) {
            confidence += 0.1;
        }
    }
    for pattern in LOW_CONFIDENCE.iter() {
        if pattern.is_match(&lower) {
            confidence -= 0.1;
        }
    }
    confidence.clamp(0.3, 1.0)
}

/// Up to five numbered or bulleted lines, each cut to 100 characters.
fn extract_supporting_points(text: &str) -> Vec<String> {
    let mut points: Vec<String> = Vec::new();
    for pattern in [&*NUMBERED_POINT, &*BULLET_POINT] {
        for caps in pattern.captures_iter(text).take(5) {
            if let Some(group) = caps.get(1) {
                let point = group.as_str().trim();
                if point.chars().count() > 10 {
                    points.push(point.chars().take(100).collect());
                }
            }
        }
    }
    points.truncate(5);
    points
}

/// Unique leading-triple count over `|opinions| - 1`.
fn position_diversity(opinions: &BTreeMap<String, Opinion>) -> f64 {
    if opinions.len() < 2 {
        return 0.0;
    }
    let starts: std::collections::HashSet<Vec<String>> = opinions
        .values()
        .map(|o| {
            o.position
                .to_lowercase()
                .split_whitespace()
                .take(3)
                .map(str::to_string)
                .collect()
        })
        .collect();
    (starts.len() - 1) as f64 / (opinions.len() - 1) as f64
}

/// Severity from `score · (0.5 + 0.5 · avg confidence)`.
fn severity_for(score: f64, opinions: &BTreeMap<String, Opinion>) -> ConflictSeverity {
    let avg_confidence =
        opinions.values().map(|o| o.confidence).sum::<f64>() / opinions.len() as f64;
    let severity_score = score * (0.5 + avg_confidence * 0.5);
    if severity_score < 0.3 {
        ConflictSeverity::Low
    } else if severity_score < 0.5 {
        ConflictSeverity::Medium
    } else if severity_score < 0.7 {
        ConflictSeverity::High
    } else {
        ConflictSeverity::Critical
    }
}

/// First matching technical term ("Choice of …"), else the first five
/// words of the prompt.
fn identify_topic(context: &SharedContext) -> String {
    let all_text: String = context
        .messages()
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    for pattern in TOPIC_TERMS.iter() {
        if let Some(found) = pattern.find(&all_text) {
            return format!("Choice of {}", found.as_str());
        }
    }

    let words: Vec<&str> = context.original_prompt.split_whitespace().take(5).collect();
    if words.len() == 5 {
        format!("{}...", words.join(" "))
    } else {
        context.original_prompt.clone()
    }
}

/// Render a conflict for display.
pub fn format_conflict(conflict: &Conflict) -> String {
    let mut lines = vec![
        format!("Topic: {}", conflict.topic),
        format!("Severity: {}", conflict.severity.as_str().to_uppercase()),
        String::new(),
    ];
    for (adapter, opinion) in &conflict.opinions {
        lines.push(format!("{adapter}:"));
        lines.push(format!("  Position: {}", opinion.position));
        lines.push(format!("  Confidence: {:.0}%", opinion.confidence * 100.0));
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Render a resolution for display.
pub fn format_resolution(resolution: &Resolution) -> String {
    let mut lines = vec![format!("Resolution Type: {}", resolution.kind.as_str())];
    if let Some(winner) = &resolution.winner {
        lines.push(format!("Winner: {winner}"));
    }
    if !resolution.options.is_empty() {
        lines.push("Options:".to_string());
        for (i, option) in resolution.options.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, option.position));
            lines.push(format!(
                "     Supporters: {}",
                option.supporters.join(", ")
            ));
            lines.push(format!("     Weight: {:.2}", option.weight));
        }
    }
    lines.push(format!("Explanation: {}", resolution.explanation));
    lines.push(format!("Confidence: {:.0}%", resolution.confidence * 100.0));
    lines.join("\n")
}
