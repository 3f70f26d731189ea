use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AdvisorError;

/// How a Claude-backed advisor calls the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub binary: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Run one prompt through the CLI and return its stdout.
///
/// The request JSON goes over stdin so large feature payloads never hit the
/// argv limit. The child is killed if this future is dropped, which is what
/// happens when the vote collector aborts a request.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AdvisorError> {
    debug!(model = %config.model, bytes = user_prompt.len(), "Invoking claude CLI");

    let run = async {
        let mut child = Command::new(&config.binary)
            .args([
                "-p",
                "--system-prompt",
                system_prompt,
                "--model",
                &config.model,
                "--output-format",
                "text",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdvisorError::Cli(format!("failed to spawn {}: {e}", config.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(user_prompt.as_bytes())
                .await
                .map_err(|e| AdvisorError::Cli(format!("failed to write prompt: {e}")))?;
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| AdvisorError::Cli(format!("failed to read claude output: {e}")))
    };

    let output = tokio::time::timeout(config.timeout, run)
        .await
        .map_err(|_| AdvisorError::Timeout(config.timeout.as_secs()))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(status = %output.status, stderr = %stderr.trim(), "Claude CLI failed");
        return Err(AdvisorError::Cli(format!(
            "claude exited {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(AdvisorError::Cli("claude returned an empty response".to_string()));
    }

    Ok(stdout)
}

/// Whether the configured CLI binary can be executed.
pub async fn check_cli_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
