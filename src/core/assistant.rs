//! Transcript analysis through a chat-completion API
//! Sends a UART transcript with a fixed instruction prompt and extracts the
//! probable device type and a table of suggested commands from the answer.

use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::assistant_config::AssistantConfig;
use crate::error::AssistantError;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that identifies BLE devices based on their UART communication logs.";

const TABLE_MARKER: &str = "**Possible UART Commands Table:**";
const TABLE_HEADER: &str = "| Command ID | Function";

static SEPARATOR_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:?-{3,}:?$").unwrap());

/// Builds the instruction prompt around the transcript.
pub fn instruction_prompt(transcript: &str) -> String {
    format!(
        r#"You are a highly knowledgeable assistant specializing in analyzing BLE (Bluetooth Low Energy) UART communication logs.

Your task is to:
1. **Identify the type of device** based purely on the provided UART log.
2. **Extract relevant characteristics and values** based on known BLE GATT characteristics (e.g., battery level, firmware, manufacturer, serial number).
3. **Suggest only commands that match the detected device type** (e.g., audio controls for headphones, unlock commands for smart locks).
4. **Return a structured table listing all possible commands**, including:
   - **Command ID** (e.g., `0x10`)
   - **Function** (e.g., `Unlock Device`)
   - **Description** (e.g., `Sends an unlock request to the device`)
   - **HEX Data (if applicable)**

Provide UART commands only if they are clearly related to the identified device. Avoid making assumptions beyond the data provided.

Here is the UART communication log to analyze:

```
{transcript}
```

Return the response in the following format:
- **Device Type:** (Detected device type)
- **Extracted Characteristics:**
  - [Characteristic Name]: [Value]
  - [Characteristic Name]: [Value]
- **Possible UART Commands Table:**

| Command ID | Function | Description | HEX Data |
|------------|----------|-------------|----------|
| 0x01       | Request Device Status | Requests device health and battery | 64 |
| 0x02       | Request Serial Number | Retrieves the device serial number | 53 4E ... |
| 0x10       | Unlock Device | Sends an unlock request to the device | 00 00 00 |

Please provide all **possible UART commands**, even if they are inferred based on known BLE device communication patterns.

If the device type is unclear, state:
"Unknown BLE device. Based on the available data, I cannot determine the exact type. Please provide additional details or check manufacturer documentation.""#
    )
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ChatRequest {
    pub fn new(config: &AssistantConfig, transcript: &str) -> Self {
        Self {
            model: config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: instruction_prompt(transcript),
                },
            ],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Pulls `choices[0].message.content` out of a response body.
pub fn extract_content(body: &str) -> Result<String, AssistantError> {
    let json: serde_json::Value = serde_json::from_str(body)?;
    let response: ChatResponse =
        serde_json::from_value(json).map_err(|_| AssistantError::InvalidResponseFormat)?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or(AssistantError::InvalidResponseFormat)
}

/// One row of the suggested command table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UartCommandSuggestion {
    pub command_id: String,
    pub function: String,
    pub description: String,
    pub hex_data: String,
}

/// Extracts the command table that follows the table marker.
pub fn parse_command_table(answer: &str) -> Vec<UartCommandSuggestion> {
    let Some(start) = answer.find(TABLE_MARKER) else {
        debug!("No command table found in response");
        return Vec::new();
    };

    let mut in_table = false;
    let mut commands = Vec::new();
    for row in answer[start + TABLE_MARKER.len()..]
        .lines()
        .map(str::trim)
        .filter(|row| !row.is_empty())
    {
        if row.contains(TABLE_HEADER) {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }

        let cells: Vec<&str> = row
            .split('|')
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();
        if is_separator(&cells) {
            continue;
        }
        if let [command_id, function, description, hex_data] = cells.as_slice() {
            commands.push(UartCommandSuggestion {
                command_id: command_id.to_string(),
                function: function.to_string(),
                description: description.to_string(),
                hex_data: hex_data.to_string(),
            });
        }
    }
    commands
}

fn is_separator(cells: &[&str]) -> bool {
    !cells.is_empty() && cells.iter().all(|cell| SEPARATOR_CELL.is_match(cell))
}

/// The first paragraph of the answer.
pub fn probable_device(answer: &str) -> &str {
    answer.split("\n\n").next().unwrap_or(answer)
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub probable_device: String,
    pub answer: String,
    pub commands: Vec<UartCommandSuggestion>,
}

impl Analysis {
    pub fn from_answer(answer: String) -> Self {
        Self {
            probable_device: probable_device(&answer).to_string(),
            commands: parse_command_table(&answer),
            answer,
        }
    }
}

pub struct Assistant {
    client: reqwest::Client,
    config: AssistantConfig,
    api_key: String,
}

impl Assistant {
    pub fn new(config: AssistantConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key,
        }
    }

    /// Reads the API key from the configured environment variable.
    pub fn from_env(config: AssistantConfig) -> Result<Self, AssistantError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AssistantError::MissingApiKey(config.api_key_env.clone()))?;
        Ok(Self::new(config, api_key))
    }

    pub async fn analyze(&self, transcript: &str) -> Result<Analysis, AssistantError> {
        if transcript.trim().is_empty() {
            return Err(AssistantError::EmptyTranscript);
        }

        info!("Asking {} about a {} byte transcript", self.config.model, transcript.len());
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest::new(&self.config, transcript))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Raw API response: {}", body);
        if !status.is_success() {
            return Err(AssistantError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Analysis::from_answer(extract_content(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "- **Device Type:** Smart Lock\n\n- **Extracted Characteristics:**\n  - Battery Level: 80%\n\n- **Possible UART Commands Table:**\n\n| Command ID | Function | Description | HEX Data |\n|------------|----------|-------------|----------|\n| 0x10       | Unlock Device | Sends an unlock request | 00 00 00 |\n| 0x11 | Lock Device | Sends a lock request | --- |\n| broken row | only two |\n";

    #[test]
    fn test_parse_command_table() {
        let commands = parse_command_table(ANSWER);
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            UartCommandSuggestion {
                command_id: "0x10".to_string(),
                function: "Unlock Device".to_string(),
                description: "Sends an unlock request".to_string(),
                hex_data: "00 00 00".to_string(),
            }
        );
        assert_eq!(commands[1].hex_data, "---");
    }

    #[test]
    fn test_table_requires_marker_and_header() {
        assert!(parse_command_table("| 0x01 | a | b | c |").is_empty());
        assert!(parse_command_table("**Possible UART Commands Table:**\n| 0x01 | a | b | c |").is_empty());
    }

    #[test]
    fn test_probable_device() {
        assert_eq!(probable_device(ANSWER), "- **Device Type:** Smart Lock");
        assert_eq!(probable_device("single line"), "single line");
    }

    #[test]
    fn test_extract_content() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"A heart rate strap"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "A heart rate strap");

        assert!(matches!(
            extract_content(r#"{"choices":[]}"#),
            Err(AssistantError::InvalidResponseFormat)
        ));
        assert!(matches!(
            extract_content(r#"{"error":{"message":"quota"}}"#),
            Err(AssistantError::InvalidResponseFormat)
        ));
        assert!(matches!(
            extract_content("not json"),
            Err(AssistantError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_request_body() {
        let request = ChatRequest::new(&AssistantConfig::default(), "📡 🔋 📖 [2A19] Battery Level: 80%");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4-turbo");
        assert_eq!(json["max_tokens"], 250);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], SYSTEM_PROMPT);
        let prompt = json["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.contains("```\n📡 🔋 📖 [2A19] Battery Level: 80%\n```"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_rejected_before_any_request() {
        let assistant = Assistant::new(AssistantConfig::default(), "unused".to_string());
        assert!(matches!(
            assistant.analyze("  \n").await,
            Err(AssistantError::EmptyTranscript)
        ));
    }

    #[test]
    fn test_separator_rows() {
        assert!(is_separator(&["---", ":---:", "----:", ":---"]));
        assert!(!is_separator(&["0x01", "---"]));
        assert!(!is_separator(&[]));
    }
}
