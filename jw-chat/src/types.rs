use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(EventId);
id_newtype!(RoomId);
id_newtype!(ContactId);
id_newtype!(SenderId);

/// Where an inbound chat event originated: a multi-user room or a
/// one-to-one chat with a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Room(RoomId),
    Direct(ContactId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: EventId,
    pub source: EventSource,
    pub sender: SenderId,
    pub body: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// A request handed to the external business handler: the surface the
/// trigger message came from plus its whitespace-split argument tokens
/// (wake-word already stripped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericRequest {
    pub surface: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOutput {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentOutput {
    pub name: String,
    pub content_type: String,
    pub url: String,
}

/// Response payload produced by a request handler. Only text renders to a
/// rich body today; other variants fall back to a plain notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    Text(TextOutput),
    Attachment(AttachmentOutput),
}

impl Output {
    pub fn text(message: impl Into<String>) -> Self {
        Self::Text(TextOutput {
            message: message.into(),
        })
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Attachment(_) => "attachment",
        }
    }
}

/// Outbound chat payload: plain body, optionally accompanied by a
/// rich-text (XHTML-IM) body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub body: String,
    #[serde(default)]
    pub rich_body: Option<String>,
}

impl ChatMessage {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            rich_body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub plain: String,
    pub rich: Option<String>,
}

impl From<RenderedMessage> for ChatMessage {
    fn from(rendered: RenderedMessage) -> Self {
        Self {
            body: rendered.plain,
            rich_body: rendered.rich,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMembership {
    NotJoined,
    Joining,
    Joined,
}
