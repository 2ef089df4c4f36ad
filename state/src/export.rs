//! Session export and import.
//!
//! Markdown for human reports, JSON mirroring the persisted model
//! one-to-one, and a flat plain-text transcript. A JSON export imports
//! back to an equal session, so export → import → export is
//! byte-identical.

use quorum_protocol::SenderType;
use quorum_protocol::Session;
use serde_json::Error as JsonError;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Json,
    Text,
}

impl ExportFormat {
    /// Parse a user-supplied format name ("md", "json", "txt").
    pub fn parse(s: &str) -> Option<ExportFormat> {
        match s.to_lowercase().as_str() {
            "md" | "markdown" => Some(ExportFormat::Markdown),
            "json" => Some(ExportFormat::Json),
            "txt" | "text" => Some(ExportFormat::Text),
            _ => None,
        }
    }
}

/// Render a session in the requested format.
pub fn export_session(session: &Session, format: ExportFormat) -> Result<String, JsonError> {
    match format {
        ExportFormat::Markdown => Ok(export_markdown(session)),
        ExportFormat::Json => serde_json::to_string_pretty(session),
        ExportFormat::Text => Ok(export_text(session)),
    }
}

/// Reconstruct a session from a JSON export. Ids and timestamps are
/// preserved as exported.
pub fn import_json(json: &str) -> Result<Session, JsonError> {
    serde_json::from_str(json)
}

fn export_markdown(session: &Session) -> String {
    let mut lines = vec![
        "# Quorum Discussion".to_string(),
        String::new(),
        format!(
            "**Date:** {}",
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        ),
        format!("**AIs:** {}", session.participating_ais.join(", ")),
        format!("**Rounds:** {}", session.total_rounds),
        format!("**Status:** {}", session.status.as_str()),
        String::new(),
        "## Question".to_string(),
        String::new(),
        session.user_query.clone(),
        String::new(),
        "## Discussion".to_string(),
        String::new(),
    ];

    let mut current_round = 0;
    for message in &session.messages {
        if message.round_num != current_round {
            current_round = message.round_num;
            lines.push(format!("### Round {current_round}"));
            lines.push(String::new());
        }
        match message.sender_type {
            SenderType::User => lines.push(format!("**User:** {}", message.content)),
            SenderType::Ai => lines.push(format!(
                "**{}:** {}",
                message.sender_id.to_uppercase(),
                message.content
            )),
            SenderType::System => lines.push(format!("*{}*", message.content)),
        }
        lines.push(String::new());
    }

    if let Some(result) = &session.result {
        lines.push("## Result".to_string());
        lines.push(String::new());
        lines.push(result.summary.clone());
        lines.push(String::new());
        if !result.key_points.is_empty() {
            lines.push("**Key Points:**".to_string());
            for point in &result.key_points {
                lines.push(format!("- {point}"));
            }
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

fn export_text(session: &Session) -> String {
    let mut lines = vec![
        format!(
            "Quorum Discussion - {}",
            session.created_at.format("%Y-%m-%d %H:%M")
        ),
        "=".repeat(60),
        format!("Question: {}", session.user_query),
        format!("AIs: {}", session.participating_ais.join(", ")),
        "-".repeat(60),
    ];

    for message in &session.messages {
        match message.sender_type {
            SenderType::Ai => lines.push(format!(
                "[{}] {}",
                message.sender_id.to_uppercase(),
                message.content
            )),
            SenderType::User => lines.push(format!("[USER] {}", message.content)),
            SenderType::System => {}
        }
    }

    if let Some(result) = &session.result {
        lines.push("-".repeat(60));
        lines.push("Result:".to_string());
        lines.push(result.summary.clone());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> Session {
        let mut session = Session::create(
            "what storage engine fits",
            "analysis",
            vec!["Claude".to_string(), "Codex".to_string()],
        );
        session.add_message(SenderType::User, "user", "what storage engine fits", 0);
        session.add_message(SenderType::Ai, "Claude", "consider LSM trees", 1);
        session.add_message(SenderType::Ai, "Codex", "agree, LSM for writes", 1);
        session.total_rounds = 1;
        session.set_result("LSM it is", vec!["write-heavy".to_string()], true, 0.8);
        session
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(ExportFormat::parse("md"), Some(ExportFormat::Markdown));
        assert_eq!(ExportFormat::parse("JSON"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("txt"), Some(ExportFormat::Text));
        assert_eq!(ExportFormat::parse("pdf"), None);
    }

    #[test]
    fn markdown_contains_query_senders_and_summary() {
        let session = sample();
        let md = export_session(&session, ExportFormat::Markdown).expect("markdown");
        assert!(md.contains("## Question"));
        assert!(md.contains("what storage engine fits"));
        assert!(md.contains("### Round 1"));
        assert!(md.contains("**CLAUDE:** consider LSM trees"));
        assert!(md.contains("**User:**"));
        assert!(md.contains("LSM it is"));
        assert!(md.contains("- write-heavy"));
    }

    #[test]
    fn text_is_a_flat_transcript() {
        let session = sample();
        let txt = export_session(&session, ExportFormat::Text).expect("text");
        assert!(txt.contains("[USER] what storage engine fits"));
        assert!(txt.contains("[CLAUDE] consider LSM trees"));
        assert!(txt.contains("Result:"));
    }

    #[test]
    fn json_round_trips_byte_identically() {
        let session = sample();
        let exported = export_session(&session, ExportFormat::Json).expect("json");
        let imported = import_json(&exported).expect("import");
        assert_eq!(imported, session);
        let re_exported = export_session(&imported, ExportFormat::Json).expect("json again");
        assert_eq!(re_exported, exported);
    }

    #[test]
    fn sessions_without_result_export_cleanly() {
        let mut session = Session::create("q", "general", vec![]);
        session.add_message(SenderType::Ai, "Claude", "partial thought", 1);
        let md = export_session(&session, ExportFormat::Markdown).expect("markdown");
        assert!(!md.contains("## Result"));
        let txt = export_session(&session, ExportFormat::Text).expect("text");
        assert!(!txt.contains("Result:"));
    }
}
