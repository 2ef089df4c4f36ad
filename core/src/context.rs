//! Request-local shared context.
//!
//! Owns the append-only transcript of one discussion plus the derived
//! key-points buffer, and assembles per-adapter prompts inside the token
//! budget. Created per request; its durable shadow is the persisted
//! session.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use quorum_protocol::ContextSummary;
use quorum_protocol::Contribution;

/// Key points kept at most.
const MAX_KEY_POINTS: usize = 20;

/// Characters kept per key point.
const KEY_POINT_CHARS: usize = 100;

/// Characters of one message included in a rebuilt prompt.
const PROMPT_MESSAGE_CHARS: usize = 500;

/// A message in the discussion transcript.
#[derive(Debug, Clone)]
pub struct Message {
    /// Adapter name, or `"user"` / `"system"`.
    pub sender: String,
    pub content: String,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    /// Coarse token estimate: characters ÷ 4.
    pub token_estimate: u32,
}

impl Message {
    pub fn new(sender: impl Into<String>, content: impl Into<String>, round: u32) -> Self {
        let content = content.into();
        let token_estimate = (content.chars().count() / 4) as u32;
        Self {
            sender: sender.into(),
            content,
            round,
            timestamp: Utc::now(),
            token_estimate,
        }
    }
}

/// Shared conversation state for one request.
#[derive(Debug)]
pub struct SharedContext {
    pub original_prompt: String,
    max_tokens: u32,
    #[allow(dead_code)]
    max_history_per_ai: u32,
    messages: Vec<Message>,
    message_counts: BTreeMap<String, u32>,
    current_round: u32,
    pub consensus_reached: bool,
    key_points: Vec<String>,
}

impl SharedContext {
    /// Defaults: 8000-token context budget, 5 messages kept per adapter.
    pub fn new(original_prompt: impl Into<String>) -> Self {
        Self::with_limits(original_prompt, 8000, 5)
    }

    pub fn with_limits(
        original_prompt: impl Into<String>,
        max_tokens: u32,
        max_history_per_ai: u32,
    ) -> Self {
        Self {
            original_prompt: original_prompt.into(),
            max_tokens,
            max_history_per_ai,
            messages: Vec::new(),
            message_counts: BTreeMap::new(),
            current_round: 0,
            consensus_reached: false,
            key_points: Vec::new(),
        }
    }

    /// Append a message, updating counts, the round high-water mark and
    /// the key-points buffer.
    pub fn append(&mut self, sender: &str, content: &str, round: u32) {
        let message = Message::new(sender, content, round);
        self.current_round = self.current_round.max(round);
        *self.message_counts.entry(sender.to_string()).or_insert(0) += 1;
        self.extract_key_points(content);
        self.messages.push(message);
    }

    /// Lines that look like enumerated or bulleted items become key
    /// points.
    fn extract_key_points(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let bulleted = line.starts_with('-')
                || line.starts_with('*')
                || line.starts_with('\u{2022}')
                || line.chars().next().is_some_and(|c| c.is_ascii_digit());
            if bulleted {
                self.add_key_point(line);
            }
        }
    }

    /// Add one key point: truncated to 100 chars, deduplicated
    /// case-insensitively, oldest evicted past 20 entries.
    pub fn add_key_point(&mut self, point: &str) {
        let point: String = point.chars().take(KEY_POINT_CHARS).collect();
        if point.is_empty() {
            return;
        }
        let folded = point.to_lowercase();
        if self
            .key_points
            .iter()
            .any(|existing| existing.to_lowercase() == folded)
        {
            return;
        }
        self.key_points.push(point);
        if self.key_points.len() > MAX_KEY_POINTS {
            self.key_points.remove(0);
        }
    }

    pub fn key_points(&self) -> &[String] {
        &self.key_points
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn message_counts(&self) -> &BTreeMap<String, u32> {
        &self.message_counts
    }

    pub fn messages_for_round(&self, round: u32) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.round == round)
    }

    pub fn messages_by(&self, sender: &str) -> impl Iterator<Item = &Message> {
        let sender = sender.to_string();
        self.messages.iter().filter(move |m| m.sender == sender)
    }

    /// The `count` most recent messages, oldest first.
    pub fn recent_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Build the prompt for one adapter's turn.
    ///
    /// The transcript tail is selected newest-first until the cumulative
    /// token estimate would exceed half the context budget, then emitted
    /// in chronological order. The context itself is not mutated.
    pub fn build_prompt(&self, adapter_name: &str, is_first_round: bool) -> String {
        let mut parts: Vec<String> = vec![
            "You are participating in a collaborative AI discussion.".to_string(),
            "Multiple AIs are working together to help the user.".to_string(),
            "Be concise but thorough. Build on others' ideas.".to_string(),
            "If you agree, say so briefly and add value.".to_string(),
            "If you disagree, explain why constructively.".to_string(),
            String::new(),
            format!("USER'S QUESTION: {}", self.original_prompt),
            String::new(),
        ];

        if is_first_round {
            parts.push("This is the first round. Share your initial thoughts.".to_string());
        } else {
            parts.push("DISCUSSION SO FAR:".to_string());
            parts.push(String::new());

            for message in self.budgeted_tail() {
                let content: String = if message.content.chars().count() > PROMPT_MESSAGE_CHARS {
                    let head: String =
                        message.content.chars().take(PROMPT_MESSAGE_CHARS).collect();
                    format!("{head}...")
                } else {
                    message.content.clone()
                };
                parts.push(format!("[{}] {content}", message.sender.to_uppercase()));
                parts.push(String::new());
            }

            if !self.key_points.is_empty() {
                parts.push("KEY POINTS IDENTIFIED:".to_string());
                let start = self.key_points.len().saturating_sub(5);
                for point in &self.key_points[start..] {
                    parts.push(format!("  {point}"));
                }
                parts.push(String::new());
            }

            parts.push(format!(
                "Now it's your turn ({adapter_name}). Respond to the discussion."
            ));
            parts.push("Add new insights or build on what others have said.".to_string());
        }

        parts.join("\n")
    }

    /// Newest-first accumulation under half the token budget, returned
    /// chronologically.
    fn budgeted_tail(&self) -> Vec<&Message> {
        let budget = self.max_tokens / 2;
        let mut token_count = 0u32;
        let mut tail: Vec<&Message> = Vec::new();
        for message in self.messages.iter().rev() {
            if token_count + message.token_estimate > budget {
                break;
            }
            token_count += message.token_estimate;
            tail.push(message);
        }
        tail.reverse();
        tail
    }

    /// Full transcript as one string, with round separators.
    pub fn all_content(&self) -> String {
        let mut parts = vec![format!("Original Question: {}\n", self.original_prompt)];
        let mut current_round = 0;
        for message in &self.messages {
            if message.round != current_round {
                current_round = message.round;
                parts.push(format!("\n--- Round {current_round} ---\n"));
            }
            parts.push(format!(
                "[{}]: {}\n",
                message.sender.to_uppercase(),
                message.content
            ));
        }
        parts.concat()
    }

    /// Serializable snapshot for the terminal event.
    pub fn summary(&self) -> ContextSummary {
        let contributions = self
            .message_counts
            .iter()
            .map(|(sender, &count)| {
                let total_tokens = self
                    .messages_by(sender)
                    .map(|m| m.token_estimate)
                    .sum::<u32>();
                (
                    sender.clone(),
                    Contribution {
                        message_count: count,
                        total_tokens,
                    },
                )
            })
            .collect();

        ContextSummary {
            original_prompt: self.original_prompt.chars().take(100).collect(),
            total_messages: self.messages.len() as u32,
            total_rounds: self.current_round,
            contributions,
            key_points_count: self.key_points.len() as u32,
            consensus_reached: self.consensus_reached,
        }
    }
}
