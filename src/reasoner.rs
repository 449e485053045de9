use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AgentError;
use crate::settings::Settings;

/// Consumed capability: one prompt in, one completion out. The agent loop
/// never talks to a model API directly.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, system: &str, transcript: &str) -> Result<String, AgentError>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini-backed reasoner. Each call is a single stateless completion;
/// conversation history travels in the transcript.
#[derive(Debug)]
pub struct GeminiReasoner {
    client: reqwest::Client,
    model_name: String,
    temperature: f64,
    timeout: Duration,
    api_key: String,
}

impl GeminiReasoner {
    pub fn new(settings: &Settings) -> Result<Self, AgentError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| AgentError::ConfigError {
                message: "GOOGLE_API_KEY is required for the Gemini reasoner".to_string(),
            })?;
        Ok(Self {
            client: reqwest::Client::new(),
            model_name: settings.model_name.clone(),
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.reasoner_timeout_secs),
            api_key,
        })
    }
}

#[async_trait]
impl Reasoner for GeminiReasoner {
    async fn complete(&self, system: &str, transcript: &str) -> Result<String, AgentError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_BASE_URL, self.model_name, self.api_key
        );
        let body = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": [{"role": "user", "parts": [{"text": transcript}]}],
            "generationConfig": {"temperature": self.temperature},
        });

        let request = self.client.post(&url).json(&body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| AgentError::ReasonerTimeout {
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| AgentError::ReasonerUnavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::ReasonerUnavailable {
                message: format!("model API returned {}: {}", status, detail),
            });
        }

        let payload: Value =
            response
                .json()
                .await
                .map_err(|e| AgentError::ReasonerUnavailable {
                    message: format!("unreadable model response: {}", e),
                })?;
        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| AgentError::ReasonerUnavailable {
                message: "model response carried no text candidate".to_string(),
            })?;
        debug!("Reasoner returned {} characters", text.len());
        Ok(text.to_string())
    }
}

/// Deterministic reasoner fed from a queue of canned completions. Records
/// every transcript it was shown.
pub struct ScriptedReasoner {
    responses: Mutex<VecDeque<String>>,
    transcripts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    pub fn seen_transcripts(&self) -> Vec<String> {
        match self.transcripts.lock() {
            Ok(transcripts) => transcripts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(&self, _system: &str, transcript: &str) -> Result<String, AgentError> {
        if let Ok(mut transcripts) = self.transcripts.lock() {
            transcripts.push(transcript.to_string());
        }
        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.ok_or_else(|| AgentError::ReasonerUnavailable {
            message: "scripted reasoner ran out of responses".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_reasoner_replays_in_order() {
        let reasoner = ScriptedReasoner::new(["first", "second"]);
        assert_eq!(reasoner.complete("sys", "a").await.unwrap(), "first");
        assert_eq!(reasoner.complete("sys", "b").await.unwrap(), "second");
        let err = reasoner.complete("sys", "c").await.unwrap_err();
        assert!(matches!(err, AgentError::ReasonerUnavailable { .. }));
        assert_eq!(reasoner.seen_transcripts().len(), 3);
    }

    #[test]
    fn gemini_reasoner_requires_an_api_key() {
        let settings = Settings::default();
        let err = GeminiReasoner::new(&settings).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
    }
}
