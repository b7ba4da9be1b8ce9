//! Structured message content: decomposes free-form chat text into typed
//! blocks (text, fenced code, math) with a single forward scanner.
//!
//! Fenced code wins over math: a `$$` span is never allowed to swallow a fence
//! opening, so dollar signs inside code bodies are always code.

use serde::{Deserialize, Serialize};

const FENCE: &str = "```";
const DEFAULT_LANGUAGE: &str = "plaintext";

/// One typed unit of message content. Serialized with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Markdown text, rendered by the Markdown renderer.
    Text { content: String },
    /// Verbatim code, passed to the syntax highlighter.
    Code {
        #[serde(default = "default_language")]
        language: String,
        content: String,
    },
    /// Math expression with delimiters stripped.
    Math {
        #[serde(default)]
        display: bool,
        content: String,
    },
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl Block {
    pub fn text(content: impl Into<String>) -> Self {
        Block::Text {
            content: content.into(),
        }
    }

    pub fn code(language: impl Into<String>, content: impl Into<String>) -> Self {
        Block::Code {
            language: language.into(),
            content: content.into(),
        }
    }

    pub fn math(display: bool, content: impl Into<String>) -> Self {
        Block::Math {
            display,
            content: content.into(),
        }
    }

    /// Text content, if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Block::Text { content } => Some(content),
            _ => None,
        }
    }

    /// Re-insert the original delimiters around the block content.
    pub fn to_markdown(&self) -> String {
        match self {
            Block::Text { content } => content.clone(),
            Block::Code { language, content } => format!("```{}\n{}\n```", language, content),
            Block::Math {
                display: true,
                content,
            } => format!("$${}$$", content),
            Block::Math {
                display: false,
                content,
            } => format!("${}$", content),
        }
    }
}

/// Rebuild a Markdown transcript from blocks, one paragraph per block.
pub fn to_markdown(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::to_markdown)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split raw message text into ordered blocks.
///
/// Text runs are trimmed and dropped when empty; code bodies and math
/// expressions are trimmed. Unterminated fences and unmatched dollars stay
/// plain text.
pub fn extract(raw: &str) -> Vec<Block> {
    Scanner::new(raw)
        .filter_map(|token| match token {
            Token::Text(run) => {
                let run = run.trim();
                (!run.is_empty()).then(|| Block::text(run))
            }
            Token::Fence { language, body } => {
                let language = if language.is_empty() {
                    DEFAULT_LANGUAGE
                } else {
                    language
                };
                Some(Block::code(language, body.trim()))
            }
            Token::Math { display, body } => Some(Block::math(display, body.trim())),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Fence { language: &'a str, body: &'a str },
    Math { display: bool, body: &'a str },
}

/// Forward scanner over the source text. Yields text runs between spans and
/// one token per recognized span.
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    pending: Option<(Token<'a>, usize)>,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            pending: None,
        }
    }

    fn span_at(&self, at: usize) -> Option<(Token<'a>, usize)> {
        let rest = &self.src[at..];
        if rest.starts_with(FENCE) {
            if let Some(span) = fence_at(self.src, at) {
                return Some(span);
            }
        }
        if rest.starts_with("$$") {
            if let Some(span) = display_math_at(self.src, at) {
                return Some(span);
            }
        }
        if rest.starts_with('$') {
            return inline_math_at(self.src, at);
        }
        None
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if let Some((token, end)) = self.pending.take() {
            self.pos = end;
            return Some(token);
        }
        if self.pos >= self.src.len() {
            return None;
        }

        let start = self.pos;
        let mut at = start;
        while at < self.src.len() {
            if let Some((token, end)) = self.span_at(at) {
                if at == start {
                    self.pos = end;
                    return Some(token);
                }
                self.pending = Some((token, end));
                self.pos = at;
                return Some(Token::Text(&self.src[start..at]));
            }
            at += self.src[at..].chars().next().map_or(1, char::len_utf8);
        }
        self.pos = self.src.len();
        Some(Token::Text(&self.src[start..]))
    }
}

/// "```" + word-char language tag + newline, then the body up to the next "```".
fn fence_at(src: &str, at: usize) -> Option<(Token<'_>, usize)> {
    let tag_start = at + FENCE.len();
    let tag_len = src[tag_start..]
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    let tag_end = tag_start + tag_len;
    if src.as_bytes().get(tag_end) != Some(&b'\n') {
        return None;
    }
    let body_start = tag_end + 1;
    let close = src[body_start..].find(FENCE)?;
    Some((
        Token::Fence {
            language: &src[tag_start..tag_end],
            body: &src[body_start..body_start + close],
        },
        body_start + close + FENCE.len(),
    ))
}

/// "$$...$$", may span lines, must not contain a fence opening.
fn display_math_at(src: &str, at: usize) -> Option<(Token<'_>, usize)> {
    let body_start = at + 2;
    let close = src[body_start..].find("$$")?;
    let body_end = body_start + close;
    let contains_fence = src[body_start..body_end]
        .match_indices(FENCE)
        .any(|(offset, _)| fence_at(src, body_start + offset).is_some());
    if contains_fence {
        return None;
    }
    Some((
        Token::Math {
            display: true,
            body: &src[body_start..body_end],
        },
        body_end + 2,
    ))
}

/// "$...$" with at least one character and no newline or dollar inside.
fn inline_math_at(src: &str, at: usize) -> Option<(Token<'_>, usize)> {
    let body_start = at + 1;
    let body_len = src[body_start..]
        .find(|c| c == '$' || c == '\n')
        .filter(|len| *len > 0)?;
    let body_end = body_start + body_len;
    if src.as_bytes().get(body_end) != Some(&b'$') {
        return None;
    }
    Some((
        Token::Math {
            display: false,
            body: &src[body_start..body_end],
        },
        body_end + 1,
    ))
}
