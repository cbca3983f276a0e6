//! The orchestrator behind both front ends.
//!
//! `Controller` owns the settings, the in-memory transcript, the chat and command panes, and
//! at most one live handle per worker kind. Workers never touch this state: they send events
//! that [`Controller::poll`] drains on the owning thread.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::chat::{self, ChatEvent, ChatHandle};
use crate::config::{self, ApiConfig, Config, Settings};
use crate::exec::{self, CommandEvent, CommandHandle};
use crate::history::{HistoryKey, HistoryStore};
use crate::llm::{OllamaClient, OllamaError};
use crate::session::{ChatEntry, Message, Transcript};

/// How long a new chat turn waits for the one it replaces to wind down.
const CHAT_REPLACE_WAIT: Duration = Duration::from_millis(200);

/// A running chat worker and the transcript its reply belongs to.
struct PendingReply {
    handle: ChatHandle,
    key: HistoryKey,
    model: String,
}

pub struct Controller {
    settings: Settings,
    api: ApiConfig,
    client: OllamaClient,
    store: HistoryStore,
    transcript: Transcript,
    chat_log: Vec<ChatEntry>,
    command_log: Vec<String>,
    models: Vec<String>,
    connected: bool,
    chat: Option<PendingReply>,
    command: Option<CommandHandle>,
    /// Runs the short synchronous probe and model listing calls.
    runtime: tokio::runtime::Runtime,
}

impl Controller {
    /// Build from startup config. Does not touch the network; call
    /// [`check_connection`](Self::check_connection) and [`refresh_models`](Self::refresh_models).
    pub fn new(config: &Config) -> Result<Self> {
        let settings = Settings::from_config(config);
        let client = OllamaClient::new(Some(&settings.api_url), config.api.chat_timeout());
        let store = HistoryStore::new(config::resolve_history_dir(config));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("starting runtime for api calls")?;
        let mut controller = Self {
            settings,
            api: config.api.clone(),
            client,
            store,
            transcript: Vec::new(),
            chat_log: Vec::new(),
            command_log: Vec::new(),
            models: Vec::new(),
            connected: false,
            chat: None,
            command: None,
            runtime,
        };
        controller.load_history();
        Ok(controller)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn chat_log(&self) -> &[ChatEntry] {
        &self.chat_log
    }

    pub fn command_log(&self) -> &[String] {
        &self.command_log
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_chat_running(&self) -> bool {
        self.chat.is_some()
    }

    pub fn is_command_running(&self) -> bool {
        self.command.is_some()
    }

    pub fn history_key(&self) -> HistoryKey {
        HistoryKey::new(self.settings.model.as_deref(), self.settings.global_history)
    }

    pub fn history_path(&self) -> PathBuf {
        self.store.path(&self.history_key())
    }

    fn system(&mut self, text: impl Into<String>) {
        self.chat_log.push(ChatEntry::system(text));
    }

    /// Cancel a running reply and drop whatever it still sends.
    fn abandon_reply(&mut self) {
        if let Some(pending) = self.chat.take() {
            if !pending.handle.cancel_and_wait(CHAT_REPLACE_WAIT) {
                log::warn!("previous reply did not stop within {:?}", CHAT_REPLACE_WAIT);
            }
        }
    }

    // ---- history ----

    /// Replace the transcript and chat pane with whatever is stored for the current key.
    pub fn load_history(&mut self) {
        let key = self.history_key();
        self.transcript = self.store.load(&key);
        let name = self.settings.display_name();
        let model = self.settings.display_model().to_string();
        self.chat_log = self
            .transcript
            .iter()
            .map(|m| ChatEntry::from_message(m, &name, &model))
            .collect();
        log::debug!("loaded {} messages for {}", self.transcript.len(), key);
    }

    fn save_history(&mut self) {
        let key = self.history_key();
        if let Err(e) = self.store.save(&key, &self.transcript) {
            log::warn!("saving history for {}: {}", key, e);
            self.system(format!("Error saving history: {}", e));
        }
    }

    /// Delete the stored transcript for the current key and empty the chat.
    pub fn clear_history(&mut self) {
        self.abandon_reply();
        let result = self.store.clear(&self.history_key());
        self.transcript.clear();
        self.chat_log.clear();
        if let Err(e) = result {
            self.system(format!("Could not remove history file: {}", e));
        }
    }

    /// Start over with an empty transcript. The stored file is archived first so the next
    /// save does not overwrite earlier turns.
    pub fn new_session(&mut self) {
        self.abandon_reply();
        let archived = self.store.archive(&self.history_key());
        self.transcript.clear();
        self.chat_log.clear();
        match archived {
            Ok(Some(path)) => self.system(format!(
                "Started a new session (previous history archived to {}).",
                path.display()
            )),
            Ok(None) => self.system("Started a new session."),
            Err(e) => self.system(format!(
                "Started a new session (could not archive previous history: {}).",
                e
            )),
        }
    }

    // ---- settings ----

    /// Select a model (or none) and load its history.
    pub fn set_model(&mut self, model: Option<String>) {
        if self.settings.model == model {
            return;
        }
        self.settings.model = model;
        self.load_history();
    }

    /// Switch between the shared and the per-model transcript.
    pub fn set_global_history(&mut self, global: bool) {
        if self.settings.global_history == global {
            return;
        }
        self.settings.global_history = global;
        self.load_history();
    }

    pub fn set_ai_name(&mut self, name: impl Into<String>) {
        self.settings.ai_name = name.into();
    }

    /// Point at a new server, then probe it and reload its models.
    pub fn apply_api_url(&mut self, url: &str) {
        let url = config::normalize_api_url(url);
        self.client = OllamaClient::new(Some(&url), self.api.chat_timeout());
        self.settings.api_url = url;
        let msg = format!("API URL set to {}", self.settings.api_url);
        self.system(msg);
        self.check_connection();
        self.refresh_models();
    }

    // ---- connectivity ----

    /// Probe the tags endpoint; bounded by the probe timeout.
    pub fn check_connection(&mut self) -> bool {
        self.connected = self
            .runtime
            .block_on(self.client.probe(self.api.probe_timeout()));
        log::info!(
            "ollama at {} {}",
            self.client.tags_url(),
            if self.connected { "reachable" } else { "unreachable" }
        );
        self.connected
    }

    /// Reload the model list; keeps the current selection when it is still offered.
    pub fn refresh_models(&mut self) {
        let result = self
            .runtime
            .block_on(self.client.list_models(self.api.list_timeout()));
        match result {
            Ok(models) => {
                let names: Vec<String> = models.into_iter().map(|m| m.name).collect();
                let keep = self
                    .settings
                    .model
                    .as_ref()
                    .filter(|m| names.contains(*m))
                    .cloned();
                self.settings.model = keep.or_else(|| names.first().cloned());
                self.models = names;
                self.load_history();
                let msg = format!("Models loaded: {}", self.models.join(", "));
                self.system(msg);
            }
            Err(e) => {
                log::warn!("listing models: {}", e);
                self.models.clear();
                self.settings.model = None;
                self.load_history();
                self.system(format!("Could not load models ({})", e));
            }
        }
    }

    // ---- chat ----

    /// Append the user's message, save, and stream a reply. A running reply is cancelled first.
    pub fn send_message(&mut self, input: &str) {
        let text = input.trim();
        if text.is_empty() {
            return;
        }
        let Some(model) = self.settings.model.clone() else {
            self.system("No model selected.");
            return;
        };
        self.abandon_reply();
        self.chat_log.push(ChatEntry::User(text.to_string()));
        self.transcript.push(Message::user(text));
        self.save_history();

        log::info!("sending turn {} to {}", self.transcript.len(), model);
        let handle = chat::spawn_chat(self.client.clone(), model.clone(), self.transcript.clone());
        self.chat = Some(PendingReply {
            handle,
            key: self.history_key(),
            model,
        });
    }

    pub fn stop_response(&mut self) {
        match &self.chat {
            Some(pending) => {
                pending.handle.cancel();
                self.system("Requested stop of response.");
            }
            None => self.system("No response running."),
        }
    }

    /// Record a finished reply against the transcript it was asked from. When the user has
    /// since switched to another transcript, only the stored file of the original one changes.
    fn on_reply(&mut self, key: HistoryKey, model: String, text: String) {
        if key == self.history_key() {
            self.chat_log.push(ChatEntry::Assistant {
                name: self.settings.display_name(),
                model,
                text: text.clone(),
            });
            self.transcript.push(Message::assistant(text));
            self.save_history();
            return;
        }
        let mut stored = self.store.load(&key);
        stored.push(Message::assistant(text));
        match self.store.save(&key, &stored) {
            Ok(()) => self.system(format!("Reply from {} saved to history for {}.", model, key)),
            Err(e) => {
                log::warn!("saving history for {}: {}", key, e);
                self.system(format!("Error saving history: {}", e));
            }
        }
    }

    // ---- commands ----

    /// Run a shell command unless one is already running.
    pub fn run_command(&mut self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            self.command_log.push("System: No command entered.".to_string());
            return;
        }
        if self.command.is_some() {
            self.command_log.push("System: command runner busy".to_string());
            return;
        }
        self.command = Some(exec::spawn_command(command));
    }

    pub fn stop_command(&mut self) {
        match &self.command {
            Some(handle) => {
                handle.stop();
                self.command_log
                    .push("System: Requested stop of command.".to_string());
            }
            None => self.command_log.push("System: No command running.".to_string()),
        }
    }

    // ---- events ----

    /// Apply every pending worker event. Returns true if anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Some(event) = self.chat.as_ref().and_then(|p| p.handle.try_next()) {
            changed = true;
            match event {
                ChatEvent::Reply(text) => {
                    if let Some(pending) = &self.chat {
                        let (key, model) = (pending.key.clone(), pending.model.clone());
                        self.on_reply(key, model, text);
                    }
                }
                ChatEvent::Failed(OllamaError::Stopped) => self.system("[Stopped]"),
                ChatEvent::Failed(e) => self.system(format!("Error: {}", e)),
                ChatEvent::Finished => self.chat = None,
            }
        }
        while let Some(event) = self.command.as_ref().and_then(|h| h.try_next()) {
            changed = true;
            match event {
                CommandEvent::Line(line) => self.command_log.push(line),
                CommandEvent::Stopped => self.command_log.push("[Command stopped]".to_string()),
                CommandEvent::Finished => {
                    self.command = None;
                    self.command_log.push("System: Command finished".to_string());
                }
            }
        }
        changed
    }

    /// Poll until no worker is running or `timeout` passes. Returns true when idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.chat.is_none() && self.command.is_none() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(pending) = &self.chat {
            pending.handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn test_controller() -> Controller {
        let mut config = Config::default();
        config.api.url = format!("http://127.0.0.1:{}", closed_port());
        config.api.probe_timeout_secs = 1;
        config.api.list_timeout_secs = 1;
        config.history.directory = Some(
            std::env::temp_dir().join(format!("deck-controller-test-{}", uuid::Uuid::new_v4())),
        );
        Controller::new(&config).unwrap()
    }

    fn last_system(c: &Controller) -> String {
        c.chat_log().last().map(|e| e.to_string()).unwrap_or_default()
    }

    #[test]
    fn send_without_model_is_rejected() {
        let mut c = test_controller();
        c.send_message("hello");
        assert_eq!(last_system(&c), "System: No model selected.");
        assert!(c.transcript().is_empty());
        assert!(!c.is_chat_running());
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut c = test_controller();
        c.send_message("   ");
        assert!(c.chat_log().is_empty());
    }

    #[test]
    fn unreachable_server_is_reported() {
        let mut c = test_controller();
        assert!(!c.check_connection());
        c.refresh_models();
        assert!(c.models().is_empty());
        assert!(c.settings().model.is_none());
        assert!(last_system(&c).starts_with("System: Could not load models ("));
    }

    #[test]
    fn api_url_is_normalized() {
        let mut c = test_controller();
        let url = format!("http://127.0.0.1:{}/", closed_port());
        c.apply_api_url(&url);
        assert_eq!(
            c.settings().api_url,
            format!("{}api/chat", url)
        );
        assert!(c
            .chat_log()
            .iter()
            .any(|e| e.to_string().starts_with("System: API URL set to ")));
    }

    #[test]
    fn switching_model_and_global_mode_reloads_history() {
        let mut c = test_controller();
        let llama = HistoryKey::new(Some("llama3:8b"), false);
        c.store
            .save(&llama, &[Message::user("q"), Message::assistant("a")])
            .unwrap();

        c.set_model(Some("llama3:8b".to_string()));
        assert_eq!(c.transcript().len(), 2);
        assert_eq!(c.chat_log()[1].to_string(), "AI (llama3:8b): a");

        c.set_global_history(true);
        assert_eq!(c.history_key().as_str(), "global");
        assert!(c.transcript().is_empty());
        let _ = std::fs::remove_dir_all(c.store.dir());
    }

    #[test]
    fn clear_history_removes_file() {
        let mut c = test_controller();
        c.set_model(Some("mistral".to_string()));
        c.store.save(&c.history_key(), &[Message::user("x")]).unwrap();
        c.load_history();
        assert_eq!(c.transcript().len(), 1);

        c.clear_history();
        assert!(c.transcript().is_empty());
        assert!(c.chat_log().is_empty());
        assert!(!c.history_path().exists());
        let _ = std::fs::remove_dir_all(c.store.dir());
    }

    #[test]
    fn failed_model_refresh_reloads_default_history() {
        let mut c = test_controller();
        c.set_model(Some("mistral".to_string()));
        let mistral = c.history_key();
        c.store.save(&mistral, &[Message::user("x")]).unwrap();
        c.load_history();
        assert_eq!(c.transcript().len(), 1);

        c.refresh_models();
        assert_eq!(c.history_key().as_str(), "default");
        assert!(c.transcript().is_empty());
        assert!(last_system(&c).starts_with("System: Could not load models ("));

        c.clear_history();
        assert_eq!(c.store.load(&mistral), vec![Message::user("x")]);
        let _ = std::fs::remove_dir_all(c.store.dir());
    }

    #[test]
    fn new_session_archives_instead_of_overwriting() {
        let mut c = test_controller();
        c.set_model(Some("mistral".to_string()));
        c.store.save(&c.history_key(), &[Message::user("old")]).unwrap();
        c.load_history();

        c.new_session();
        assert!(c.transcript().is_empty());
        assert!(!c.history_path().exists());
        assert!(last_system(&c).contains("archived to"));
        let archived: Vec<_> = std::fs::read_dir(c.store.dir().join("archive"))
            .unwrap()
            .collect();
        assert_eq!(archived.len(), 1);
        let _ = std::fs::remove_dir_all(c.store.dir());
    }

    #[cfg(unix)]
    #[test]
    fn second_command_is_rejected_while_busy() {
        let mut c = test_controller();
        c.run_command("sleep 5");
        assert!(c.is_command_running());
        c.run_command("echo hi");
        assert_eq!(
            c.command_log().last().map(String::as_str),
            Some("System: command runner busy")
        );

        c.stop_command();
        assert!(c.wait_idle(Duration::from_secs(10)));
        let log = c.command_log();
        assert!(log.contains(&"[Command stopped]".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("System: Command finished"));
    }

    #[cfg(unix)]
    #[test]
    fn command_output_lands_in_log() {
        let mut c = test_controller();
        c.run_command("echo first; echo second");
        assert!(c.wait_idle(Duration::from_secs(10)));
        assert_eq!(
            c.command_log(),
            &[
                "first".to_string(),
                "second".to_string(),
                "System: Command finished".to_string()
            ]
        );
    }

    #[test]
    fn stop_without_workers_reports_idle() {
        let mut c = test_controller();
        c.stop_response();
        assert_eq!(last_system(&c), "System: No response running.");
        c.stop_command();
        assert_eq!(
            c.command_log().last().map(String::as_str),
            Some("System: No command running.")
        );
    }
}
