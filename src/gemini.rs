use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::Config;
use crate::store::Role;

/// One history entry on the wire: `{role, parts: text}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub parts: String,
}

// Structures matching the generateContent endpoint.
#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

/// Wraps a Gemini chat-completion call over a rolling history buffer.
///
/// Single attempt, no retries or backoff: transport and non-2xx failures
/// propagate to the caller, which surfaces them as one generic orchestration
/// failure.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.gemini_base_url.clone(),
            model: config.model.clone(),
            api_key: config.google_api_key.clone(),
        }
    }

    /// Sends `message` against the supplied history and returns the model's
    /// plain-text reply.
    ///
    /// The remote API rejects histories that do not open with a user turn, so
    /// a leading user turn carrying the knowledge-base `context` is either
    /// synthesized (empty or model-first history) or folded into the first
    /// user entry.
    #[instrument(skip(self, history, message, context))]
    pub async fn send_message(
        &self,
        history: &[HistoryEntry],
        message: &str,
        context: &str,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .context("GOOGLE_API_KEY is not configured; cannot call the Gemini API")?;

        let mut contents = Vec::with_capacity(history.len() + 2);
        let mut rest = history;

        if let Some((first, tail)) = history.split_first() {
            if first.role == Role::User {
                contents.push(user_content(format!(
                    "System: Your responses should always be based on this knowledge base: {}. User: {}",
                    context, first.parts
                )));
                rest = tail;
            }
        }
        if contents.is_empty() {
            contents.push(user_content(format!(
                "System: Your responses should always be based on this knowledge base: {}. User: Hello",
                context
            )));
        }
        for entry in rest {
            contents.push(Content {
                role: role_name(entry.role).to_string(),
                parts: vec![Part {
                    text: entry.parts.clone(),
                }],
            });
        }
        contents.push(user_content(message.to_string()));

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&GenerateContentRequest { contents })
            .send()
            .await
            .with_context(|| format!("Failed to send request to the Gemini API at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Gemini API request failed");
            return Err(anyhow::anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_body
            ));
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .context("Failed to parse JSON response from the Gemini API")?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .context("Gemini response contained no candidates")?;

        debug!(reply_len = text.len(), "received Gemini reply");
        Ok(text)
    }
}

fn user_content(text: String) -> Content {
    Content {
        role: "user".to_string(),
        parts: vec![Part { text }],
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}
