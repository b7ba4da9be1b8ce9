//! Rendering boundary. The controller reports transcript and status changes
//! through [`Renderer`]; the Markdown renderer, syntax highlighter and math
//! typesetter sit behind it.

use pulldown_cmark::{html, Options, Parser};

use crate::blocks::Block;
use crate::models::ModelInfo;
use crate::thread::{Content, Message, Role, Thread, ThreadId};

/// Connection banner shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// Retry bound reached; reported once.
    ConnectionFailed,
}

pub trait Renderer {
    /// Drop the visible transcript.
    fn clear(&mut self);
    /// Append one message to the visible transcript.
    fn message(&mut self, message: &Message, model_name: Option<&str>);
    /// Render-only system line, never stored in a thread.
    fn notice(&mut self, text: &str);
    /// Show or hide the pending-response indicator.
    fn pending(&mut self, visible: bool);
    fn status(&mut self, status: ConnectionStatus);
    /// Thread list changed (order, titles, active thread).
    fn threads(&mut self, threads: &[Thread], active: Option<&ThreadId>);
    /// The user asked for the thread list; shown even when unchanged.
    fn thread_list(&mut self, threads: &[Thread], active: Option<&ThreadId>) {
        self.threads(threads, active);
    }
    /// A model listing arrived; `current` is the selected model id.
    fn models(&mut self, models: &[ModelInfo], current: &str);
}

/// Render Markdown to HTML.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}

/// Escape HTML special characters.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// HTML for one block. Code is escaped verbatim for the highlighter; math is
/// wrapped in `\[..\]` or `\(..\)` for the typesetter.
pub fn render_block(block: &Block) -> String {
    match block {
        Block::Text { content } => render_markdown(content),
        Block::Code { language, content } => format!(
            "<pre><code class=\"language-{}\">{}</code></pre>",
            escape_html(language),
            escape_html(content)
        ),
        Block::Math {
            display: true,
            content,
        } => format!("\\[{}\\]", escape_html(content)),
        Block::Math {
            display: false,
            content,
        } => format!("\\({}\\)", escape_html(content)),
    }
}

/// Accumulates the visible transcript as HTML.
#[derive(Debug, Default)]
pub struct HtmlTranscript {
    html: String,
    pending: bool,
    status: Option<ConnectionStatus>,
    thread_titles: Vec<(ThreadId, String)>,
    active: Option<ThreadId>,
    models: Vec<ModelInfo>,
    current_model: Option<String>,
}

impl HtmlTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn status(&self) -> Option<ConnectionStatus> {
        self.status
    }

    pub fn thread_titles(&self) -> &[(ThreadId, String)] {
        &self.thread_titles
    }

    pub fn active(&self) -> Option<&ThreadId> {
        self.active.as_ref()
    }

    pub fn model_list(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }
}

fn role_class(role: Role) -> &'static str {
    match role {
        Role::User => "user-message",
        Role::Assistant => "assistant-message",
        Role::System => "system-message",
    }
}

impl Renderer for HtmlTranscript {
    fn clear(&mut self) {
        self.html.clear();
    }

    fn message(&mut self, message: &Message, model_name: Option<&str>) {
        self.html.push_str(&format!(
            "<div class=\"message {}\"><div class=\"message-content\">",
            role_class(message.role)
        ));
        match &message.content {
            Content::Blocks(blocks) => {
                for block in blocks {
                    self.html.push_str("<div class=\"message-block\">");
                    self.html.push_str(&render_block(block));
                    self.html.push_str("</div>");
                }
            }
            Content::Text(text) => self.html.push_str(&render_markdown(text)),
        }
        if message.role == Role::Assistant {
            if let Some(name) = model_name {
                self.html.push_str(&format!(
                    "<div class=\"model-badge\">{}</div>",
                    escape_html(name)
                ));
            }
        }
        self.html.push_str("</div></div>");

        if !message.sources.is_empty() {
            self.html.push_str("<div class=\"sources\"><ul>");
            for source in &message.sources {
                self.html.push_str(&format!("<li>{}</li>", escape_html(source)));
            }
            self.html.push_str("</ul></div>");
        }
    }

    fn notice(&mut self, text: &str) {
        self.html.push_str(&format!(
            "<div class=\"message system-message\">{}</div>",
            escape_html(text)
        ));
    }

    fn pending(&mut self, visible: bool) {
        self.pending = visible;
    }

    fn status(&mut self, status: ConnectionStatus) {
        self.status = Some(status);
    }

    fn threads(&mut self, threads: &[Thread], active: Option<&ThreadId>) {
        self.thread_titles = threads
            .iter()
            .map(|t| (t.id.clone(), t.title.clone()))
            .collect();
        self.active = active.cloned();
    }

    fn models(&mut self, models: &[ModelInfo], current: &str) {
        self.models = models.to_vec();
        self.current_model = Some(current.to_string());
    }
}
