//! Subprocess-backed adapters.
//!
//! Each backend CLI is described by a [`CommandProfile`]: the executable,
//! an argv template with a `{prompt}` placeholder, and display identity.
//! Output is read in bounded chunks, ANSI-stripped, and yielded as it
//! arrives. Backends that refuse to stream without a TTY set `use_pty`.

use std::env;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use quorum_ansi_escape::strip_ansi;
use quorum_protocol::AdapterConfig;
use tracing::debug;

use crate::adapters::Adapter;
use crate::adapters::ChunkStream;
use crate::error::QuorumErr;
use crate::error::Result;
use crate::spawn::ChildSession;
use crate::spawn::PtySession;
use crate::spawn::SpawnConfig;

/// Placeholder replaced by the prompt in an argv template.
const PROMPT_SLOT: &str = "{prompt}";

/// Static description of one CLI backend.
#[derive(Debug, Clone)]
pub struct CommandProfile {
    pub name: String,
    pub display_name: String,
    pub icon: String,
    pub color: String,
    /// Executable looked up in `PATH`.
    pub command: String,
    /// Argv template; exactly one element should be [`PROMPT_SLOT`].
    pub arg_template: Vec<String>,
    /// Argument that prints the version, usually `--version`.
    pub version_arg: String,
    /// Extra environment entries beyond the sanitized base.
    pub env: Vec<(String, String)>,
    /// Run under a pseudo-terminal.
    pub use_pty: bool,
}

impl CommandProfile {
    pub fn new(name: &str, command: &str, arg_template: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            icon: "🤖".to_string(),
            color: "white".to_string(),
            command: command.to_string(),
            arg_template: arg_template.iter().map(|s| s.to_string()).collect(),
            version_arg: "--version".to_string(),
            env: Vec::new(),
            use_pty: false,
        }
    }

    pub fn with_display(mut self, display_name: &str, icon: &str, color: &str) -> Self {
        self.display_name = display_name.to_string();
        self.icon = icon.to_string();
        self.color = color.to_string();
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_pty(mut self) -> Self {
        self.use_pty = true;
        self
    }

    /// The Claude CLI in print mode.
    pub fn claude() -> Self {
        Self::new("claude", "claude", &["-p", PROMPT_SLOT]).with_display(
            "Claude",
            "🟠",
            "bright_yellow",
        )
    }

    /// The Codex CLI in non-interactive exec mode.
    pub fn codex() -> Self {
        Self::new(
            "codex",
            "codex",
            &["exec", "--skip-git-repo-check", PROMPT_SLOT],
        )
        .with_display("Codex", "🟢", "bright_green")
        .with_env("CODEX_QUIET", "1")
    }

    /// The Gemini CLI in prompt mode.
    pub fn gemini() -> Self {
        Self::new("gemini", "gemini", &["-p", PROMPT_SLOT]).with_display(
            "Gemini",
            "🔴",
            "bright_blue",
        )
    }

    fn argv(&self, prompt: &str) -> Vec<String> {
        self.arg_template
            .iter()
            .map(|arg| {
                if arg == PROMPT_SLOT {
                    prompt.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

/// Find `name` on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Adapter over a local CLI backend.
pub struct SubprocessAdapter {
    profile: CommandProfile,
    config: AdapterConfig,
}

impl SubprocessAdapter {
    pub fn new(profile: CommandProfile, config: AdapterConfig) -> Self {
        Self { profile, config }
    }

    fn spawn_config(&self, prompt: &str) -> SpawnConfig {
        let mut spawn = SpawnConfig::new(
            self.profile.command.clone(),
            self.profile.argv(prompt),
            self.config.timeout(),
        );
        for (key, value) in &self.profile.env {
            spawn = spawn.with_env(key.clone(), value.clone());
        }
        spawn
    }

    fn pipe_stream(mut session: ChildSession) -> ChunkStream {
        Box::pin(async_stream::stream! {
            let mut produced = false;
            loop {
                match session.next_chunk().await {
                    Ok(Some(raw)) => {
                        let clean = strip_ansi(&raw);
                        if !clean.is_empty() {
                            produced = true;
                            yield Ok(clean);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            match session.finish().await {
                Ok((code, stderr)) if code != 0 && !produced => {
                    let detail = if stderr.trim().is_empty() {
                        format!("exited with code {code}")
                    } else {
                        stderr.trim().to_string()
                    };
                    yield Err(QuorumErr::Backend(detail));
                }
                Ok(_) => {}
                Err(err) => yield Err(err),
            }
        })
    }

    fn pty_stream(mut session: PtySession) -> ChunkStream {
        Box::pin(async_stream::stream! {
            loop {
                match session.next_chunk().await {
                    Ok(Some(raw)) => {
                        let clean = strip_ansi(&raw);
                        if !clean.is_empty() {
                            yield Ok(clean);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Adapter for SubprocessAdapter {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn display_name(&self) -> &str {
        &self.profile.display_name
    }

    fn icon(&self) -> &str {
        &self.profile.icon
    }

    fn color(&self) -> &str {
        &self.profile.color
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn check_availability(&self) -> bool {
        find_executable(&self.profile.command).is_some()
    }

    async fn version(&self) -> String {
        let spawn = SpawnConfig::new(
            self.profile.command.clone(),
            vec![self.profile.version_arg.clone()],
            std::time::Duration::from_secs(10),
        );
        let Ok(mut session) = ChildSession::spawn(&spawn) else {
            return "unknown".to_string();
        };
        let mut output = String::new();
        while let Ok(Some(chunk)) = session.next_chunk().await {
            output.push_str(&chunk);
        }
        let version = strip_ansi(&output);
        match version.lines().next() {
            Some(line) if !line.trim().is_empty() => line.trim().to_string(),
            _ => "unknown".to_string(),
        }
    }

    async fn send(&self, prompt: &str) -> Result<ChunkStream> {
        if find_executable(&self.profile.command).is_none() {
            return Err(QuorumErr::NotAvailable(format!(
                "{} is not installed",
                self.profile.command
            )));
        }

        let spawn = self.spawn_config(prompt);
        debug!(
            adapter = %self.profile.name,
            command = %spawn.command,
            pty = self.profile.use_pty,
            "starting backend turn"
        );

        if self.profile.use_pty {
            let session = PtySession::spawn(&spawn)?;
            Ok(Self::pty_stream(session))
        } else {
            let session = ChildSession::spawn(&spawn)?;
            Ok(Self::pipe_stream(session))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    use super::*;

    fn sh_profile(name: &str, script: &str) -> CommandProfile {
        // `{prompt}` lands in `$0`; the scripts ignore it.
        CommandProfile::new(name, "sh", &["-c", script, PROMPT_SLOT])
    }

    async fn collect(adapter: &SubprocessAdapter, prompt: &str) -> Result<String> {
        let mut stream = adapter.send(prompt).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn streams_and_strips_ansi() {
        let adapter = SubprocessAdapter::new(
            sh_profile("echoer", r#"printf '\033[32mgreen\033[0m text'"#),
            AdapterConfig::default(),
        );
        let output = collect(&adapter, "ignored").await.expect("output");
        assert_eq!(output, "green text");
    }

    #[tokio::test]
    async fn nonzero_exit_with_empty_stdout_is_backend_error() {
        let adapter = SubprocessAdapter::new(
            sh_profile("failer", "echo broken pipe >&2; exit 2"),
            AdapterConfig::default(),
        );
        let err = collect(&adapter, "ignored").await.expect_err("must fail");
        match err {
            QuorumErr::Backend(msg) => assert_eq!(msg, "broken pipe"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_with_output_still_yields_output() {
        let adapter = SubprocessAdapter::new(
            sh_profile("partial", "printf partial; exit 1"),
            AdapterConfig::default(),
        );
        let output = collect(&adapter, "ignored").await.expect("output");
        assert_eq!(output, "partial");
    }

    #[tokio::test]
    async fn timeout_surfaces_after_first_chunk() {
        let adapter = SubprocessAdapter::new(
            sh_profile("hang", "printf first; sleep 30"),
            AdapterConfig::default().with_timeout(Duration::from_millis(600)),
        );
        let mut stream = adapter.send("ignored").await.expect("stream");
        let first = stream.next().await.expect("one chunk").expect("ok");
        assert_eq!(first, "first");
        let err = stream.next().await.expect("error item").expect_err("timeout");
        assert!(matches!(err, QuorumErr::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_binary_is_not_available() {
        let adapter = SubprocessAdapter::new(
            CommandProfile::new("ghost", "no-such-binary-3f9e", &[PROMPT_SLOT]),
            AdapterConfig::default(),
        );
        assert!(!adapter.check_availability().await);
        let err = adapter.send("hi").await.err().expect("unavailable");
        assert!(matches!(err, QuorumErr::NotAvailable(_)));
    }

    #[tokio::test]
    async fn prompt_is_substituted_into_argv() {
        let adapter = SubprocessAdapter::new(
            CommandProfile::new("echo", "printf", &["%s", PROMPT_SLOT]),
            AdapterConfig::default(),
        );
        let output = collect(&adapter, "the actual prompt").await.expect("output");
        assert_eq!(output, "the actual prompt");
    }

    #[tokio::test]
    async fn version_takes_first_line() {
        let adapter = SubprocessAdapter::new(
            CommandProfile {
                version_arg: "-c".to_string(),
                ..sh_profile("ver", "true")
            },
            AdapterConfig::default(),
        );
        // `sh -c` with no script prints nothing; version falls back.
        assert_eq!(adapter.version().await, "unknown");
    }

    #[test]
    fn find_executable_locates_sh() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("no-such-binary-3f9e").is_none());
    }
}
