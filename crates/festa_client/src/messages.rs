//! Socket frames exchanged with the chat server. Client ↔ server JSON objects
//! discriminated by a "type" field.

use serde::{Deserialize, Serialize};

use crate::blocks::Block;
use crate::thread::{Content, Role};

/// Client → server: one chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    #[serde(rename = "type")]
    pub typ: &'static str,
    pub content: &'a [Block],
    pub model: &'a str,
}

impl<'a> ChatRequest<'a> {
    pub fn new(content: &'a [Block], model: &'a str) -> Self {
        Self {
            typ: "message",
            content,
            model,
        }
    }
}

/// Server → client: assistant reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyMessage {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

/// Server → client: error text.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub content: String,
}

/// Server → client: reconnect token issuance.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenMessage {
    pub token: String,
}

/// One replayed history entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: Content,
}

/// Server → client: history replay.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Frame decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no type")]
    MissingType,
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

/// One server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Reply {
        content: String,
        sources: Vec<String>,
        model: Option<String>,
    },
    Error(String),
    ReconnectToken(String),
    History(Vec<HistoryEntry>),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json(value)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let typ = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        match typ.as_str() {
            "message" => {
                let m: ReplyMessage = serde_json::from_value(value)?;
                Ok(ServerMessage::Reply {
                    content: m.content,
                    sources: m.sources.unwrap_or_default(),
                    model: m.model,
                })
            }
            "error" => {
                let m: ErrorMessage = serde_json::from_value(value)?;
                Ok(ServerMessage::Error(m.content))
            }
            "reconnect_token" => {
                let m: TokenMessage = serde_json::from_value(value)?;
                Ok(ServerMessage::ReconnectToken(m.token))
            }
            "chat_history" => {
                let m: HistoryMessage = serde_json::from_value(value)?;
                Ok(ServerMessage::History(m.history))
            }
            _ => Err(ProtocolError::UnknownType(typ)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_wire_shape() {
        let blocks = vec![Block::text("hi"), Block::math(false, "x")];
        let json = serde_json::to_value(ChatRequest::new(&blocks, "deepseek-chat")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "message",
                "content": [
                    {"type": "text", "content": "hi"},
                    {"type": "math", "display": false, "content": "x"}
                ],
                "model": "deepseek-chat"
            })
        );
    }

    #[test]
    fn parses_reply_with_and_without_sources() {
        let reply = ServerMessage::parse(
            r#"{"type":"message","content":"Answer","model":"m1","sources":["a.pdf"]}"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            ServerMessage::Reply {
                content: "Answer".into(),
                sources: vec!["a.pdf".into()],
                model: Some("m1".into()),
            }
        );

        let bare = ServerMessage::parse(r#"{"type":"message","content":"A"}"#).unwrap();
        assert!(matches!(
            bare,
            ServerMessage::Reply { sources, model: None, .. } if sources.is_empty()
        ));
    }

    #[test]
    fn parses_control_frames() {
        assert_eq!(
            ServerMessage::parse(r#"{"type":"reconnect_token","token":"t"}"#).unwrap(),
            ServerMessage::ReconnectToken("t".into())
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"error","content":"boom"}"#).unwrap(),
            ServerMessage::Error("boom".into())
        );
        let history = ServerMessage::parse(
            r#"{"type":"chat_history","history":[{"role":"user","content":"q"},{"role":"assistant","content":"a"}]}"#,
        )
        .unwrap();
        match history {
            ServerMessage::History(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].role, Role::User);
                assert_eq!(entries[1].content, Content::Text("a".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_untyped_frames() {
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"typing"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "typing"
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"content":"x"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(ServerMessage::parse("nope"), Err(ProtocolError::Json(_))));
    }
}
