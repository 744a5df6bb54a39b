use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_NEW_TOKENS_LIMIT: u32 = 2048;

/// Sampling parameters shared by the inference endpoint and the batch client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// 1..=2048
    pub max_new_tokens: u32,
    /// 0.0..=2.0
    pub temperature: f32,
    /// 0.0..=1.0
    pub top_p: f32,
    /// >= 1 when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// >= 1.0 when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    pub do_sample: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            temperature: 0.1,
            top_p: 0.8,
            top_k: None,
            repetition_penalty: None,
            do_sample: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionsError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.message)
    }
}

impl std::error::Error for OptionsError {}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(1..=MAX_NEW_TOKENS_LIMIT).contains(&self.max_new_tokens) {
            return Err(OptionsError {
                field: "max_new_tokens",
                message: format!(
                    "{} is outside 1..={}",
                    self.max_new_tokens, MAX_NEW_TOKENS_LIMIT
                ),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(OptionsError {
                field: "temperature",
                message: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(OptionsError {
                field: "top_p",
                message: format!("{} is outside 0.0..=1.0", self.top_p),
            });
        }
        if let Some(top_k) = self.top_k {
            if top_k < 1 {
                return Err(OptionsError {
                    field: "top_k",
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(penalty) = self.repetition_penalty {
            // NaN fails this comparison too
            if !(penalty >= 1.0) {
                return Err(OptionsError {
                    field: "repetition_penalty",
                    message: format!("{} is below 1.0", penalty),
                });
            }
        }
        Ok(())
    }

    /// Temperature actually sent to a backend: greedy decoding when sampling is off.
    pub fn effective_temperature(&self) -> f32 {
        if self.do_sample { self.temperature } else { 0.0 }
    }
}

/// A system/user prompt pair as sent to a chat-style model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl Prompt {
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: self.system.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: self.user.clone(),
            },
        ]
    }
}
