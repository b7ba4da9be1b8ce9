//! Conversation controller: owns the thread list, the active-thread pointer
//! and the connection manager, and turns user input and transport events into
//! storage writes, render calls and [`Effect`]s for the runtime.
//!
//! Every change to the thread list is saved in full before the operation
//! returns.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, UploadReceipt};
use crate::blocks;
use crate::command::Command;
use crate::connection::{ConnectParams, ConnectionManager, Inbound, Reconnect, SendError};
use crate::messages::HistoryEntry;
use crate::models::{ModelCatalog, ModelInfo};
use crate::render::{ConnectionStatus, Renderer};
use crate::thread::{Message, Thread, ThreadId};
use crate::thread_store::ThreadStore;

const CONNECTION_FAILED_NOTICE: &str =
    "Could not reach the server. Use /connect to try again or restart the client.";
const RECONNECTING_NOTICE: &str = "Not connected to the server. Reconnecting...";
const LOST_REPLY_NOTICE: &str = "Connection lost before the reply arrived. Please send it again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened,
    /// One text frame, in arrival order.
    Frame(String),
    /// Transport failed or was closed by either side.
    Closed(String),
}

#[derive(Debug)]
pub enum Event {
    Command(Command),
    Transport(TransportEvent),
    RetryElapsed,
    Uploaded(Result<UploadReceipt, ApiError>),
    ModelsListed(Result<Vec<ModelInfo>, ApiError>),
}

/// Work for the runtime, executed in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect(ConnectParams),
    ScheduleRetry(Duration),
    CancelRetry,
    Transmit(String),
    Upload(PathBuf),
    FetchModels,
    Close,
}

/// Outcome of [`ConversationController::submit_user_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Sent,
    Empty,
    InFlight,
    NotConnected,
    Failed,
}

pub struct ConversationController<R: Renderer> {
    store: ThreadStore,
    threads: Vec<Thread>,
    active: Option<ThreadId>,
    /// Thread the in-flight request was sent from.
    awaiting: Option<ThreadId>,
    connection: ConnectionManager,
    models: ModelCatalog,
    renderer: R,
    effects: Vec<Effect>,
    last_id: i64,
}

impl<R: Renderer> ConversationController<R> {
    /// Load stored threads and activate the most recent one, creating a
    /// thread when none exist.
    pub fn new(
        store: ThreadStore,
        connection: ConnectionManager,
        models: ModelCatalog,
        renderer: R,
    ) -> Self {
        let threads = store.load_all();
        let mut controller = Self {
            store,
            threads,
            active: None,
            awaiting: None,
            connection,
            models,
            renderer,
            effects: Vec::new(),
            last_id: 0,
        };
        match controller.threads.first().map(|t| t.id.clone()) {
            Some(id) => controller.select_thread(&id),
            None => {
                controller.create_thread();
            }
        }
        controller
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn active_thread_id(&self) -> Option<&ThreadId> {
        self.active.as_ref()
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        let id = self.active.as_ref()?;
        self.threads.iter().find(|t| &t.id == id)
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn models(&self) -> &ModelCatalog {
        &self.models
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// A chat request is awaiting its reply.
    pub fn is_waiting(&self) -> bool {
        self.connection.is_in_flight()
    }

    /// Effects emitted since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Single entry point for everything that happens to the session.
    pub fn dispatch(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Transport(TransportEvent::Opened) => self.on_open(),
            Event::Transport(TransportEvent::Frame(text)) => self.on_frame(&text),
            Event::Transport(TransportEvent::Closed(reason)) => self.on_closed(&reason),
            Event::RetryElapsed => self.on_retry_elapsed(),
            Event::Uploaded(result) => self.on_uploaded(result),
            Event::ModelsListed(result) => self.on_models_listed(result),
        }
        self.take_effects()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(text) => {
                let outcome = self.submit_user_input(&text);
                debug!(?outcome, "submission");
            }
            Command::NewThread => {
                self.create_thread();
            }
            Command::SelectThread(id) => self.select_thread(&id),
            Command::DeleteThread(id) => self.delete_thread(&id),
            Command::RenameThread(id, title) => self.rename_thread(&id, &title),
            Command::ListThreads => self.renderer.thread_list(&self.threads, self.active.as_ref()),
            Command::SelectModel(id) => self.select_model(&id),
            Command::RefreshModels => self.effects.push(Effect::FetchModels),
            Command::Upload(path) => self.effects.push(Effect::Upload(path)),
            Command::Connect => self.connect(),
            Command::Quit => self.quit(),
        }
    }

    /// New empty thread at the front of the list, made active.
    pub fn create_thread(&mut self) -> ThreadId {
        let id = self.next_thread_id();
        self.threads.insert(0, Thread::new(id.clone(), Utc::now()));
        self.active = Some(id.clone());
        self.persist();
        info!(thread = %id, "created thread");
        self.renderer.clear();
        self.renderer.threads(&self.threads, self.active.as_ref());
        id
    }

    /// Activate `id` and render its full history. No-op if already active.
    pub fn select_thread(&mut self, id: &ThreadId) {
        if self.active.as_ref() == Some(id) {
            return;
        }
        let Some(thread) = self.threads.iter().find(|t| &t.id == id) else {
            self.renderer.notice(&format!("No thread with id {id}"));
            return;
        };
        self.active = Some(id.clone());
        self.renderer.clear();
        for message in &thread.messages {
            let model_name = message.model.as_deref().map(|m| self.models.display_name(m));
            self.renderer.message(message, model_name);
        }
        self.renderer.threads(&self.threads, self.active.as_ref());
    }

    /// Remove `id`. When it was active, the most recent remaining thread
    /// becomes active, or a fresh one is created.
    pub fn delete_thread(&mut self, id: &ThreadId) {
        let Some(index) = self.threads.iter().position(|t| &t.id == id) else {
            self.renderer.notice(&format!("No thread with id {id}"));
            return;
        };
        self.threads.remove(index);
        self.persist();
        info!(thread = %id, "deleted thread");

        if self.active.as_ref() != Some(id) {
            self.renderer.threads(&self.threads, self.active.as_ref());
            return;
        }
        self.active = None;
        match self.threads.first().map(|t| t.id.clone()) {
            Some(next) => self.select_thread(&next),
            None => {
                self.create_thread();
            }
        }
    }

    pub fn rename_thread(&mut self, id: &ThreadId, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        let Some(thread) = self.threads.iter_mut().find(|t| &t.id == id) else {
            self.renderer.notice(&format!("No thread with id {id}"));
            return;
        };
        thread.title = title.to_string();
        self.persist();
        self.renderer.threads(&self.threads, self.active.as_ref());
    }

    /// Extract blocks from `raw`, append them as a user message to the active
    /// thread and transmit them. Empty input and input while a request is in
    /// flight are ignored.
    pub fn submit_user_input(&mut self, raw: &str) -> Submission {
        let text = raw.trim();
        if text.is_empty() {
            return Submission::Empty;
        }
        if self.connection.is_in_flight() {
            return Submission::InFlight;
        }

        let blocks = blocks::extract(text);
        let frame = match self.connection.send(&blocks, self.models.current()) {
            Ok(frame) => frame,
            Err(SendError::InFlight) => return Submission::InFlight,
            Err(SendError::NotConnected(state)) => {
                debug!(%state, "submission while not connected");
                if self.connection.is_exhausted() {
                    self.renderer.notice(CONNECTION_FAILED_NOTICE);
                } else {
                    self.renderer.notice(RECONNECTING_NOTICE);
                }
                return Submission::NotConnected;
            }
            Err(err) => {
                error!("failed to send message: {err}");
                self.renderer.notice(&format!("Failed to send message: {err}"));
                return Submission::Failed;
            }
        };

        if self.active.is_none() {
            self.create_thread();
        }
        self.effects.push(Effect::Transmit(frame));
        self.awaiting = self.active.clone();

        let message = Message::user(blocks);
        self.renderer.message(&message, None);
        if let Some(target) = self.active.clone() {
            self.append(&target, message);
        }
        self.renderer.pending(true);
        Submission::Sent
    }

    pub fn on_assistant_reply(
        &mut self,
        content: String,
        sources: Vec<String>,
        model: Option<String>,
    ) {
        self.renderer.pending(false);
        let message = Message::assistant(content, deduplicate_sources(sources), model);
        self.deliver(message);
    }

    /// Server-reported error: stored as a system message in the thread.
    pub fn on_error(&mut self, text: &str) {
        self.renderer.pending(false);
        warn!("server error: {text}");
        self.deliver(Message::system(text));
    }

    /// Replayed history is displayed only, never stored again.
    pub fn on_history(&mut self, entries: Vec<HistoryEntry>) {
        if entries.is_empty() {
            return;
        }
        debug!(count = entries.len(), "replaying history");
        self.renderer.clear();
        for entry in entries {
            let message = Message {
                role: entry.role,
                content: entry.content,
                sources: Vec::new(),
                model: None,
            };
            self.renderer.message(&message, None);
        }
    }

    /// Append a reply to the thread the request came from; render it only
    /// when that thread is the active one.
    fn deliver(&mut self, message: Message) {
        let target = self
            .awaiting
            .take()
            .filter(|id| self.threads.iter().any(|t| &t.id == id))
            .or_else(|| self.active.clone());
        let Some(target) = target else {
            return;
        };
        if self.active.as_ref() == Some(&target) {
            let model_name = message.model.as_deref().map(|m| self.models.display_name(m));
            self.renderer.message(&message, model_name);
        }
        self.append(&target, message);
    }

    fn append(&mut self, target: &ThreadId, message: Message) {
        let Some(thread) = self.threads.iter_mut().find(|t| &t.id == target) else {
            return;
        };
        let first = thread.messages.is_empty();
        thread.push(message);
        self.persist();
        if first {
            self.renderer.threads(&self.threads, self.active.as_ref());
        }
    }

    /// Explicit connect: cancels a scheduled retry and starts a fresh attempt.
    pub fn connect(&mut self) {
        match self.connection.connect() {
            Some(params) => {
                self.effects.push(Effect::CancelRetry);
                self.effects.push(Effect::Connect(params));
            }
            None => debug!(state = %self.connection.state(), "already connected"),
        }
    }

    pub fn quit(&mut self) {
        self.connection.close();
        self.effects.push(Effect::CancelRetry);
        self.effects.push(Effect::Close);
    }

    fn on_open(&mut self) {
        self.connection.on_open();
        self.renderer.status(ConnectionStatus::Connected);
    }

    fn on_frame(&mut self, text: &str) {
        match self.connection.on_frame(text) {
            Ok(Some(Inbound::Reply {
                content,
                sources,
                model,
            })) => self.on_assistant_reply(content, sources, model),
            Ok(Some(Inbound::Error(text))) => self.on_error(&text),
            Ok(Some(Inbound::History(entries))) => self.on_history(entries),
            Ok(None) => {}
            Err(err) => warn!("ignoring frame: {err}"),
        }
    }

    fn on_closed(&mut self, reason: &str) {
        let was_waiting = self.connection.is_in_flight();
        let decision = self.connection.on_closed();
        info!(%reason, "connection closed");

        self.awaiting = None;
        self.renderer.pending(false);
        self.renderer.status(ConnectionStatus::Disconnected);
        if was_waiting {
            self.renderer.notice(LOST_REPLY_NOTICE);
        }
        match decision {
            Reconnect::After(delay) => self.effects.push(Effect::ScheduleRetry(delay)),
            Reconnect::Exhausted => {
                self.renderer.status(ConnectionStatus::ConnectionFailed);
                self.renderer.notice(CONNECTION_FAILED_NOTICE);
            }
            Reconnect::Stopped => {}
        }
    }

    fn on_retry_elapsed(&mut self) {
        if let Some(params) = self.connection.retry() {
            self.effects.push(Effect::Connect(params));
        }
    }

    pub fn select_model(&mut self, id: &str) {
        if self.models.select(id) {
            info!(model = %id, "selected model");
        } else {
            self.renderer.notice(&format!("Unknown model {id}"));
        }
    }

    fn on_models_listed(&mut self, result: Result<Vec<ModelInfo>, ApiError>) {
        match result {
            Ok(models) => {
                self.models.replace(models);
                debug!(current = %self.models.current(), "model list updated");
                self.renderer.models(self.models.available(), self.models.current());
            }
            Err(err) => {
                warn!("failed to list models: {err}");
                self.renderer.notice(&format!("Failed to list models: {err}"));
            }
        }
    }

    fn on_uploaded(&mut self, result: Result<UploadReceipt, ApiError>) {
        match result {
            Ok(receipt) => self.renderer.notice(&format!("Uploaded \"{}\"", receipt.filename)),
            Err(err) => {
                warn!("upload failed: {err}");
                self.renderer.notice(&format!("Upload failed: {err}"));
            }
        }
    }

    fn persist(&self) {
        if let Err(err) = self.store.save_all(&self.threads) {
            warn!("failed to save threads: {err}");
        }
    }

    /// Millisecond timestamp, bumped past ids already issued or stored.
    fn next_thread_id(&mut self) -> ThreadId {
        let mut millis = Utc::now().timestamp_millis().max(self.last_id + 1);
        while self.threads.iter().any(|t| t.id.as_str() == millis.to_string()) {
            millis += 1;
        }
        self.last_id = millis;
        ThreadId::new(millis.to_string())
    }
}

/// Keep the first occurrence of each source, in order.
fn deduplicate_sources(sources: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|source| seen.insert(source.clone()))
        .collect()
}
