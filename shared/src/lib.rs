//! Wire format shared by the relay server and its clients.
//!
//! Every message travels as one self-describing JSON object with no length
//! prefix. The server coalesces queued messages into a single WebSocket frame,
//! so a receiver must split a frame into objects before decoding them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const WS_PATH: &str = "/ws";
pub const USERNAME_PARAM: &str = "username";
pub const DEFAULT_PORT: u16 = 6000;
pub const MAX_MESSAGE_SIZE: usize = 512;
pub const BATCH_DELIMITER: u8 = b'\n';

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} message is missing field `{field}`")]
    MissingField {
        kind: MessageKind,
        field: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "chat")]
    Chat,
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "member-count")]
    MemberCount,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::MemberCount => "member-count",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relay event. The variant decides which wire fields are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum Message {
    Chat {
        sender: String,
        content: String,
        created_at: DateTime<Utc>,
    },
    Join {
        sender: String,
        created_at: DateTime<Utc>,
    },
    Leave {
        sender: String,
        created_at: DateTime<Utc>,
    },
    MemberCount {
        count: usize,
        created_at: DateTime<Utc>,
    },
}

impl Message {
    pub fn chat(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Chat {
            sender: sender.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn join(sender: impl Into<String>) -> Self {
        Message::Join {
            sender: sender.into(),
            created_at: Utc::now(),
        }
    }

    pub fn leave(sender: impl Into<String>) -> Self {
        Message::Leave {
            sender: sender.into(),
            created_at: Utc::now(),
        }
    }

    pub fn member_count(count: usize) -> Self {
        Message::MemberCount {
            count,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Chat { .. } => MessageKind::Chat,
            Message::Join { .. } => MessageKind::Join,
            Message::Leave { .. } => MessageKind::Leave,
            Message::MemberCount { .. } => MessageKind::MemberCount,
        }
    }

    /// Display name of the member the event is about; empty for member counts.
    pub fn sender(&self) -> &str {
        match self {
            Message::Chat { sender, .. }
            | Message::Join { sender, .. }
            | Message::Leave { sender, .. } => sender,
            Message::MemberCount { .. } => "",
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Message::Chat { created_at, .. }
            | Message::Join { created_at, .. }
            | Message::Leave { created_at, .. }
            | Message::MemberCount { created_at, .. } => *created_at,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self.created_at().to_rfc3339_opts(SecondsFormat::Secs, true);
        match self {
            Message::Chat {
                sender, content, ..
            } => write!(f, "[{}] {}: {}", stamp, sender, content),
            Message::Join { sender, .. } => write!(f, "[{}] {} joined the chat", stamp, sender),
            Message::Leave { sender, .. } => write!(f, "[{}] {} left the chat", stamp, sender),
            Message::MemberCount { count, .. } => write!(f, "Users online: {}", count),
        }
    }
}

/// Flat on-the-wire record. Field presence is checked per kind when it is
/// turned into a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    kind: MessageKind,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    member_count: Option<usize>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireMessage> for Message {
    type Error = CodecError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = wire.kind;
        let missing = |field| CodecError::MissingField { kind, field };

        match kind {
            MessageKind::Chat => Ok(Message::Chat {
                sender: wire.sender,
                content: wire.content.ok_or_else(|| missing("content"))?,
                // Chat timestamps are always reassigned by the server.
                created_at: wire.created_at.unwrap_or_default(),
            }),
            MessageKind::Join | MessageKind::Leave => {
                if wire.sender.is_empty() {
                    return Err(missing("sender"));
                }
                let created_at = wire.created_at.ok_or_else(|| missing("created_at"))?;
                Ok(if kind == MessageKind::Join {
                    Message::Join {
                        sender: wire.sender,
                        created_at,
                    }
                } else {
                    Message::Leave {
                        sender: wire.sender,
                        created_at,
                    }
                })
            }
            MessageKind::MemberCount => Ok(Message::MemberCount {
                count: wire.member_count.ok_or_else(|| missing("member_count"))?,
                created_at: wire.created_at.ok_or_else(|| missing("created_at"))?,
            }),
        }
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let kind = message.kind();
        match message {
            Message::Chat {
                sender,
                content,
                created_at,
            } => WireMessage {
                kind,
                sender,
                content: Some(content),
                member_count: None,
                created_at: Some(created_at),
            },
            Message::Join { sender, created_at } | Message::Leave { sender, created_at } => {
                WireMessage {
                    kind,
                    sender,
                    content: Some(String::new()),
                    member_count: None,
                    created_at: Some(created_at),
                }
            }
            Message::MemberCount { count, created_at } => WireMessage {
                kind,
                sender: String::new(),
                content: Some(String::new()),
                member_count: Some(count),
                created_at: Some(created_at),
            },
        }
    }
}

pub fn encode(message: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    let wire: WireMessage = serde_json::from_slice(data)?;
    Message::try_from(wire)
}

/// Splits a buffer holding back-to-back JSON objects into one slice per
/// balanced top-level object.
///
/// Braces inside string values are ignored, and a backslash inside a string
/// skips the byte after it. When no complete object is found the whole buffer
/// is returned as the single candidate.
pub fn split_objects(data: &[u8]) -> Vec<&[u8]> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in data.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    objects.push(&data[start..=i]);
                }
            }
            _ => {}
        }
    }

    if objects.is_empty() {
        objects.push(data);
    }

    objects
}

/// Decodes every object in a (possibly coalesced) frame. A failure on one
/// object does not stop the others from decoding.
pub fn decode_batch(data: &[u8]) -> Vec<Result<Message, CodecError>> {
    split_objects(data).into_iter().map(decode).collect()
}
