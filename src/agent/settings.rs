use crate::error::RunError;

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5-20250929";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 180;

/// LLM endpoint the agent talks to
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    /// Per-call timeout so a hung provider cannot stall an instance
    pub timeout_secs: u64,
}

/// Everything the harness needs from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub llm: LlmSettings,
    /// Key for the GPT-4o milestone evaluator
    pub evaluator_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, RunError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`; empty values count as unset.
    /// Provider keys are never crossed: a Together key is not sent to Anthropic.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let first = |names: &[&str]| names.iter().find_map(|&name| get(name));

        let model_override = get("OPENHANDS_LLM_MODEL");
        let api_key = match model_override.as_deref() {
            Some(model) if model.starts_with("anthropic/") => {
                first(&["OPENHANDS_LLM_API_KEY", "ANTHROPIC_API_KEY"]).ok_or_else(|| {
                    RunError::MissingCredential(
                        "for anthropic/ models set ANTHROPIC_API_KEY or OPENHANDS_LLM_API_KEY".into(),
                    )
                })?
            }
            Some(_) => first(&[
                "OPENHANDS_LLM_API_KEY",
                "TOGETHER_API_KEY",
                "TOGETHERAI_API_KEY",
            ])
            .ok_or_else(|| {
                RunError::MissingCredential(
                    "for non-Anthropic models set OPENHANDS_LLM_API_KEY or TOGETHER_API_KEY / TOGETHERAI_API_KEY"
                        .into(),
                )
            })?,
            None => {
                let anthropic = get("ANTHROPIC_API_KEY").ok_or_else(|| {
                    RunError::MissingCredential(
                        "ANTHROPIC_API_KEY not set (or set OPENHANDS_LLM_MODEL + provider API key)".into(),
                    )
                })?;
                get("OPENHANDS_LLM_API_KEY").unwrap_or(anthropic)
            }
        };

        let evaluator_key = get("OPENAI_API_KEY")
            .ok_or_else(|| RunError::MissingCredential("OPENAI_API_KEY not set".into()))?;

        let timeout_secs = match get("OPENHANDS_LLM_TIMEOUT") {
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                RunError::InvalidSetting {
                    name: "OPENHANDS_LLM_TIMEOUT",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        };

        Ok(Self {
            llm: LlmSettings {
                model: model_override.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_key,
                base_url: get("OPENHANDS_LLM_BASE_URL"),
                timeout_secs,
            },
            evaluator_key,
        })
    }

    /// Environment handed to the harness process
    pub fn harness_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("OPENHANDS_LLM_MODEL".to_string(), self.llm.model.clone()),
            ("OPENHANDS_LLM_API_KEY".to_string(), self.llm.api_key.clone()),
            (
                "OPENHANDS_LLM_TIMEOUT".to_string(),
                self.llm.timeout_secs.to_string(),
            ),
            ("OPENAI_API_KEY".to_string(), self.evaluator_key.clone()),
        ];
        if let Some(base_url) = &self.llm.base_url {
            env.push(("OPENHANDS_LLM_BASE_URL".to_string(), base_url.clone()));
        }
        env
    }
}
