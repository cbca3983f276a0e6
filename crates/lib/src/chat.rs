//! Chat streaming worker: one background thread per user turn.
//!
//! The worker streams a reply from Ollama and reports back over a channel. It sends either
//! the full reply or one error, then exactly one [`ChatEvent::Finished`].

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::llm::{OllamaClient, OllamaError};
use crate::session::Message;

/// Event from a chat worker, in the order it was produced.
#[derive(Debug)]
pub enum ChatEvent {
    /// The complete assistant reply.
    Reply(String),
    /// Transport or API failure, or [`OllamaError::Stopped`] after a cancel.
    Failed(OllamaError),
    /// Always last.
    Finished,
}

/// Controller-side handle to a running chat worker.
pub struct ChatHandle {
    cancel: CancelToken,
    events: mpsc::Receiver<ChatEvent>,
    thread: Option<JoinHandle<()>>,
}

/// Start streaming a reply for `transcript` on a new thread.
pub fn spawn_chat(client: OllamaClient, model: String, transcript: Vec<Message>) -> ChatHandle {
    spawn_chat_with_token(client, model, transcript, CancelToken::new())
}

/// Like [`spawn_chat`] but with a caller-provided token (e.g. already cancelled).
pub fn spawn_chat_with_token(
    client: OllamaClient,
    model: String,
    transcript: Vec<Message>,
    cancel: CancelToken,
) -> ChatHandle {
    let (tx, rx) = mpsc::channel();
    let worker_cancel = cancel.clone();
    let thread = std::thread::spawn(move || {
        let result = run_chat(&client, &model, &transcript, &worker_cancel);
        let event = match result {
            Ok(text) => ChatEvent::Reply(text),
            Err(e) => {
                if !matches!(e, OllamaError::Stopped) {
                    log::warn!("chat with {} failed: {}", model, e);
                }
                ChatEvent::Failed(e)
            }
        };
        let _ = tx.send(event);
        let _ = tx.send(ChatEvent::Finished);
    });
    ChatHandle {
        cancel,
        events: rx,
        thread: Some(thread),
    }
}

fn run_chat(
    client: &OllamaClient,
    model: &str,
    transcript: &[Message],
    cancel: &CancelToken,
) -> Result<String, OllamaError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| OllamaError::Api(format!("failed to start runtime: {}", e)))?;
    rt.block_on(client.chat_stream(model, transcript, cancel))
}

impl ChatHandle {
    /// Ask the worker to stop at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next event if one is ready; never blocks.
    pub fn try_next(&self) -> Option<ChatEvent> {
        self.events.try_recv().ok()
    }

    /// Block up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<ChatEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Cancel and wait up to `timeout` for the worker to finish, discarding its events.
    /// Returns true if `Finished` was observed.
    pub fn cancel_and_wait(mut self, timeout: Duration) -> bool {
        self.cancel();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.events.recv_timeout(remaining) {
                Ok(ChatEvent::Finished) => {
                    if let Some(thread) = self.thread.take() {
                        let _ = thread.join();
                    }
                    return true;
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_before_start_reports_stopped_then_finished() {
        let client = OllamaClient::new(Some("http://127.0.0.1:9"), Duration::from_secs(1));
        let cancel = CancelToken::new();
        cancel.cancel();
        let handle = spawn_chat_with_token(
            client,
            "llama3".to_string(),
            vec![Message::user("hi")],
            cancel,
        );
        let first = handle.next_timeout(Duration::from_secs(5));
        assert!(matches!(first, Some(ChatEvent::Failed(OllamaError::Stopped))));
        let second = handle.next_timeout(Duration::from_secs(5));
        assert!(matches!(second, Some(ChatEvent::Finished)));
        assert!(handle.next_timeout(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn connection_refused_reports_error_then_finished() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}", port);
        let client = OllamaClient::new(Some(&url), Duration::from_secs(2));
        let handle = spawn_chat(client, "llama3".to_string(), vec![Message::user("hi")]);
        let first = handle.next_timeout(Duration::from_secs(10));
        assert!(matches!(first, Some(ChatEvent::Failed(OllamaError::Request(_)))));
        assert!(matches!(
            handle.next_timeout(Duration::from_secs(5)),
            Some(ChatEvent::Finished)
        ));
    }
}
