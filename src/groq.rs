use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default model for SQL question answering.
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    top_p: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GroqClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Stream a chat completion, calling `on_token` for every content
    /// delta as it arrives. Returns the accumulated text.
    ///
    /// Generation stops at any of the `stop` strings, which is how the
    /// agent keeps the model from inventing its own tool observations.
    pub async fn query_streaming<F>(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        stop: Option<Vec<String>>,
        mut on_token: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ApiMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ApiMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.0,
            top_p: 1.0,
            stream: true,
            stop,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Groq API error {status}: {body}"));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].to_string();
                buffer.drain(..=newline);

                match parse_sse_line(&line) {
                    SseEvent::Token(token) => {
                        on_token(&token);
                        full.push_str(&token);
                    }
                    SseEvent::Done => return Ok(full),
                    SseEvent::Ignore => {}
                }
            }
        }

        Ok(full)
    }
}

enum SseEvent {
    Token(String),
    Done,
    Ignore,
}

/// Decode one line of the server-sent-event stream.
fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return SseEvent::Ignore;
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .map_or(SseEvent::Ignore, SseEvent::Token),
        Err(_) => SseEvent::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deltas_are_extracted() {
        let line = r#"data: {"choices":[{"delta":{"content":"SELECT"}}]}"#;
        match parse_sse_line(line) {
            SseEvent::Token(token) => assert_eq!(token, "SELECT"),
            _ => panic!("expected a token"),
        }
    }

    #[test]
    fn done_marker_ends_the_stream() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseEvent::Done));
    }

    #[test]
    fn role_only_deltas_and_noise_are_ignored() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(matches!(parse_sse_line(role_only), SseEvent::Ignore));
        assert!(matches!(parse_sse_line(""), SseEvent::Ignore));
        assert!(matches!(parse_sse_line(": keepalive"), SseEvent::Ignore));
        assert!(matches!(parse_sse_line("data: not-json"), SseEvent::Ignore));
    }
}
