use async_trait::async_trait;
use tribunal_models::{AdvisorJudgment, AdvisorRequest};

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::error::AdvisorError;
use crate::parser::parse_judgment;
use crate::prompts::get_advisor_prompt;

/// One member of the council. Mockable for testing.
///
/// Implementations may be slow or fail; the collector bounds every call with
/// a timeout and turns any error into an abstention.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Stable identity; keys the advisor's vote and its agreement statistics.
    fn id(&self) -> &str;
    fn role(&self) -> &str;

    async fn analyze(&self, request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError>;
}

/// An advisor backed by the Claude CLI, prompted according to its role.
pub struct ClaudeAdvisor {
    pub id: String,
    pub role: String,
    pub cli_config: ClaudeCliConfig,
}

impl ClaudeAdvisor {
    pub fn new(id: String, role: String, model: String, timeout: std::time::Duration) -> Self {
        Self {
            id,
            role,
            cli_config: ClaudeCliConfig {
                model,
                timeout,
                ..ClaudeCliConfig::default()
            },
        }
    }

    /// Use `binary` instead of `claude` from PATH.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.cli_config.binary = binary.into();
        self
    }
}

#[async_trait]
impl Advisor for ClaudeAdvisor {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        &self.role
    }

    async fn analyze(&self, request: &AdvisorRequest) -> Result<AdvisorJudgment, AdvisorError> {
        let system_prompt = get_advisor_prompt(&self.role)
            .ok_or_else(|| AdvisorError::UnknownRole(self.role.clone()))?;

        let user_prompt = serde_json::to_string(request)?;
        let raw_output = invoke_claude(&system_prompt, &user_prompt, &self.cli_config).await?;
        parse_judgment(&raw_output)
    }
}
