use serde::{Deserialize, Serialize};

/// Chat-completion endpoint used to analyze UART transcripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4-turbo".to_string(),
            max_tokens: 250,
            temperature: 0.2,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}
