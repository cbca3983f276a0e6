//! Ollama API client (http://localhost:11434/api/chat by default).
//! Streaming chat (NDJSON), model listing, and a reachability probe.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{self, DEFAULT_API_URL};
use crate::session::Message;

/// How often a stream waiting on the network re-checks its cancel token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Client for the Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    chat_url: String,
    tags_url: String,
    read_timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {0}")]
    Api(String),
    #[error("no response from ollama within {0:?}")]
    Timeout(Duration),
    #[error("no models found")]
    NoModels,
    #[error("stopped")]
    Stopped,
}

impl OllamaClient {
    /// Build a client for a chat URL (normalized to end with /api/chat). `read_timeout`
    /// bounds the connect and every wait for the next chunk of a stream.
    pub fn new(chat_url: Option<&str>, read_timeout: Duration) -> Self {
        let chat_url = config::normalize_api_url(chat_url.unwrap_or(DEFAULT_API_URL));
        let tags_url = config::tags_url(&chat_url);
        let client = reqwest::Client::builder()
            .connect_timeout(read_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            chat_url,
            tags_url,
            read_timeout,
            client,
        }
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    pub fn tags_url(&self) -> &str {
        &self.tags_url
    }

    /// GET /api/tags with a short timeout; any successful response counts as reachable.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let res = self
            .client
            .get(&self.tags_url)
            .timeout(timeout)
            .send()
            .await;
        match res {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                log::debug!("probe {} returned {}", self.tags_url, r.status());
                false
            }
            Err(e) => {
                log::debug!("probe {} failed: {}", self.tags_url, e);
                false
            }
        }
    }

    /// GET /api/tags: list available models. An empty list is an error.
    pub async fn list_models(&self, timeout: Duration) -> Result<Vec<OllamaModel>, OllamaError> {
        let res = self
            .client
            .get(&self.tags_url)
            .timeout(timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: TagsResponse = res.json().await?;
        let models = data.models.unwrap_or_default();
        if models.is_empty() {
            return Err(OllamaError::NoModels);
        }
        Ok(models)
    }

    /// POST /api/chat with stream: true. Accumulates content fragments and returns the full
    /// reply once the server signals done or closes the stream.
    ///
    /// `cancel` is checked before the request and before each line; a set token ends the
    /// stream with [`OllamaError::Stopped`] and no text.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        cancel: &CancelToken,
    ) -> Result<String, OllamaError> {
        if cancel.is_cancelled() {
            return Err(OllamaError::Stopped);
        }
        let body = ChatRequest {
            model,
            messages,
            stream: true,
        };
        log::debug!("POST {} model={} messages={}", self.chat_url, model, messages.len());
        let res = tokio::time::timeout(
            self.read_timeout,
            self.client.post(&self.chat_url).json(&body).send(),
        )
        .await
        .map_err(|_| OllamaError::Timeout(self.read_timeout))??;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }

        let mut stream = res.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut reply = ReplyAccumulator::default();
        loop {
            let chunk = match self.next_chunk(&mut stream, cancel).await? {
                Some(chunk) => chunk,
                None => break,
            };
            lines.extend(&chunk);
            while let Some(line) = lines.next_line() {
                if cancel.is_cancelled() {
                    return Err(OllamaError::Stopped);
                }
                if reply.feed_line(&line)? == LineOutcome::Done {
                    return Ok(reply.into_text());
                }
            }
        }
        if let Some(line) = lines.take_rest() {
            if cancel.is_cancelled() {
                return Err(OllamaError::Stopped);
            }
            reply.feed_line(&line)?;
        }
        Ok(reply.into_text())
    }

    /// Wait for the next chunk, re-checking `cancel` while idle. `None` at end of stream.
    async fn next_chunk<S, B>(
        &self,
        stream: &mut S,
        cancel: &CancelToken,
    ) -> Result<Option<B>, OllamaError>
    where
        S: futures_util::Stream<Item = Result<B, reqwest::Error>> + Unpin,
    {
        let mut idle = Duration::ZERO;
        loop {
            match tokio::time::timeout(CANCEL_POLL_INTERVAL, stream.next()).await {
                Ok(Some(chunk)) => return Ok(Some(chunk?)),
                Ok(None) => return Ok(None),
                Err(_) => {
                    if cancel.is_cancelled() {
                        return Err(OllamaError::Stopped);
                    }
                    idle += CANCEL_POLL_INTERVAL;
                    if idle >= self.read_timeout {
                        return Err(OllamaError::Timeout(self.read_timeout));
                    }
                }
            }
        }
    }
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let i = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.buffer.drain(..i).collect();
        self.buffer.drain(..1);
        Some(String::from_utf8_lossy(&line_bytes).into_owned())
    }

    /// Whatever is left after the last newline (a final line with no terminator).
    pub fn take_rest(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Whether the stream should keep going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Done,
}

/// Collects content fragments from NDJSON chat events.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    text: String,
}

impl ReplyAccumulator {
    /// Apply one line of the stream. Blank and unparsable lines are skipped; an `error`
    /// field from the server ends the stream with that error.
    pub fn feed_line(&mut self, line: &str) -> Result<LineOutcome, OllamaError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Continue);
        }
        let event: ChatStreamEvent = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                log::debug!("skipping unparsable stream line: {}", e);
                return Ok(LineOutcome::Continue);
            }
        };
        if let Some(err) = event.error {
            return Err(OllamaError::Api(err));
        }
        if let Some(content) = event.message.and_then(|m| m.content) {
            self.text.push_str(&content);
        }
        if event.done {
            Ok(LineOutcome::Done)
        } else {
            Ok(LineOutcome::Continue)
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Run already-received lines through the same loop as [`OllamaClient::chat_stream`].
pub fn accumulate_reply<I, S>(lines: I, cancel: &CancelToken) -> Result<String, OllamaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut reply = ReplyAccumulator::default();
    for line in lines {
        if cancel.is_cancelled() {
            return Err(OllamaError::Stopped);
        }
        if reply.feed_line(line.as_ref())? == LineOutcome::Done {
            break;
        }
    }
    Ok(reply.into_text())
}

#[derive(Debug, Deserialize)]
struct ChatStreamEvent {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_concatenate_until_done() {
        let lines = [
            r#"{"message":{"content":"Hel"}}"#,
            r#"{"message":{"content":"lo"}}"#,
            r#"{"done":true}"#,
            r#"{"message":{"content":" ignored"}}"#,
        ];
        let text = accumulate_reply(lines, &CancelToken::new()).unwrap();
        assert_eq!(text, "Hello");
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        let lines = [
            r#"{"message":{"content":"a"}}"#,
            "",
            "{not json",
            "   ",
            r#"{"message":{"role":"assistant"}}"#,
            r#"{"message":{"content":"b"},"done":true}"#,
        ];
        let text = accumulate_reply(lines, &CancelToken::new()).unwrap();
        assert_eq!(text, "ab");
    }

    #[test]
    fn cancelled_before_first_line_is_stopped() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = accumulate_reply([r#"{"message":{"content":"x"}}"#], &cancel).unwrap_err();
        assert!(matches!(err, OllamaError::Stopped));
    }

    #[test]
    fn server_error_line_ends_stream() {
        let lines = [
            r#"{"message":{"content":"partial"}}"#,
            r#"{"error":"model runner crashed"}"#,
        ];
        let err = accumulate_reply(lines, &CancelToken::new()).unwrap_err();
        assert_eq!(err.to_string(), "ollama api error: model runner crashed");
    }

    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut buf = LineBuffer::default();
        buf.extend(b"{\"a\":1}\n{\"b\"");
        assert_eq!(buf.next_line().as_deref(), Some("{\"a\":1}"));
        assert_eq!(buf.next_line(), None);
        buf.extend(b":2}\r\ntail");
        assert_eq!(buf.next_line().as_deref(), Some("{\"b\":2}\r"));
        assert_eq!(buf.take_rest().as_deref(), Some("tail"));
        assert_eq!(buf.take_rest(), None);
    }

    #[test]
    fn request_body_matches_ollama_shape() {
        let messages = vec![Message::user("hi")];
        let body = ChatRequest {
            model: "llama3:8b",
            messages: &messages,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3:8b",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
        );
    }

    #[test]
    fn client_derives_tags_url() {
        let client = OllamaClient::new(Some("http://gpu:11434/"), Duration::from_secs(1));
        assert_eq!(client.chat_url(), "http://gpu:11434/api/chat");
        assert_eq!(client.tags_url(), "http://gpu:11434/api/tags");
    }
}
