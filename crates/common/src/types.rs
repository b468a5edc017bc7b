//! Message and reply types exchanged between channels, the dispatch core,
//! and reply backends.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fallback user identifier when a channel cannot supply one.
pub const DEFAULT_USER_IDENTIFIER: &str = "default";

/// Where to send replies for a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub channel_type: String,
    pub account_id: String,
    /// Chat/peer ID to send the reply to.
    pub chat_id: String,
}

/// One side of a conversation as reported by the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub nickname: String,
    /// Name the bot account saved for this contact, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark_name: Option<String>,
}

/// Channel-supplied context travelling with every inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    pub reply_to: ReplyTarget,
    /// The person who typed the message. In private chats this is the peer.
    pub sender: Participant,
    /// The chat counterpart: the other user in a DM, the room in a group.
    pub peer: Participant,
    #[serde(default)]
    pub is_group: bool,
    /// Group whose members share one conversation with the backend.
    #[serde(default)]
    pub shared_session_group: bool,
    /// Key used for greeting whitelist lookups.
    pub user_identifier: String,
}

impl MessageContext {
    /// Mention prefix for group replies (`@nickname\n`), empty otherwise.
    #[must_use]
    pub fn mention_prefix(&self) -> String {
        if self.is_group && !self.sender.nickname.is_empty() {
            format!("@{}\n", self.sender.nickname)
        } else {
            String::new()
        }
    }
}

/// Kind of inbound content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    /// A request to generate an image; treated as text with a prefix.
    ImageCreate,
    Other(String),
}

/// A normalized inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_id: String,
    pub text: String,
    pub kind: MessageKind,
    pub context: MessageContext,
}

impl InboundMessage {
    pub fn text(
        session_id: impl Into<String>,
        text: impl Into<String>,
        context: MessageContext,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            kind: MessageKind::Text,
            context,
        }
    }
}

/// A single outbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum Reply {
    Text(String),
    ImageUrl(String),
    File(PathBuf),
    /// Informational notice generated by the gateway itself.
    Info(String),
    Error(String),
}

impl Reply {
    /// The textual body, for reply kinds that carry one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) | Self::Info(t) | Self::Error(t) => Some(t),
            Self::ImageUrl(_) | Self::File(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_prefix_only_in_groups() {
        let mut ctx = MessageContext {
            sender: Participant {
                id: "u1".into(),
                nickname: "Alice".into(),
                remark_name: None,
            },
            ..Default::default()
        };
        assert_eq!(ctx.mention_prefix(), "");
        ctx.is_group = true;
        assert_eq!(ctx.mention_prefix(), "@Alice\n");
    }

    #[test]
    fn reply_serializes_tagged() {
        let json = serde_json::to_value(Reply::Text("hi".into())).unwrap_or_default();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn as_text_skips_media() {
        assert_eq!(Reply::Info("ok".into()).as_text(), Some("ok"));
        assert_eq!(Reply::ImageUrl("https://x/y.png".into()).as_text(), None);
    }
}
