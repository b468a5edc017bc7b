//! Line-oriented console channel used by the `parley` binary.
//!
//! Input lines are `session|user|text`; a line without separators is treated
//! as text from `user` in session `console`.

use std::{
    io::Write,
    sync::Mutex,
};

use {
    async_trait::async_trait,
    parley_common::types::{
        InboundMessage, MessageContext, MessageKind, Participant, Reply, ReplyTarget,
    },
    parley_config::IdentifyBy,
};

use crate::{
    error::{Error, Result},
    identify::identify_user,
    plugin::{ChannelOutbound, MessageNormalizer},
};

pub const CHANNEL_TYPE: &str = "console";
const DEFAULT_SESSION: &str = "console";
const DEFAULT_USER: &str = "user";

pub struct StdinLineNormalizer {
    identify_by: IdentifyBy,
    image_prefix: Option<String>,
}

impl StdinLineNormalizer {
    pub fn new(identify_by: IdentifyBy) -> Self {
        Self {
            identify_by,
            image_prefix: None,
        }
    }

    /// Lines starting with `prefix` become [`MessageKind::ImageCreate`].
    #[must_use]
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.image_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }
}

impl MessageNormalizer for StdinLineNormalizer {
    type Raw = String;

    fn normalize(&self, raw: String) -> Option<InboundMessage> {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let mut parts = line.splitn(3, '|');
        let (session, user, text) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(u), Some(t)) => (s.trim(), u.trim(), t),
            _ => (DEFAULT_SESSION, DEFAULT_USER, line),
        };
        if session.is_empty() || text.trim().is_empty() {
            return None;
        }
        let user = if user.is_empty() {
            DEFAULT_USER
        } else {
            user
        };

        let (kind, text) = match self
            .image_prefix
            .as_deref()
            .and_then(|p| text.strip_prefix(p))
        {
            Some(rest) => (MessageKind::ImageCreate, rest),
            None => (MessageKind::Text, text),
        };

        let participant = Participant {
            id: user.to_string(),
            nickname: user.to_string(),
            remark_name: None,
        };
        let context = MessageContext {
            reply_to: ReplyTarget {
                channel_type: CHANNEL_TYPE.into(),
                account_id: "local".into(),
                chat_id: session.to_string(),
            },
            user_identifier: identify_user(self.identify_by, &participant),
            sender: participant.clone(),
            peer: participant,
            is_group: false,
            shared_session_group: false,
        };

        Some(InboundMessage {
            session_id: session.to_string(),
            text: text.to_string(),
            kind,
            context,
        })
    }
}

/// Writes replies as `[chat] body` lines.
pub struct ConsoleOutbound {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleOutbound {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

fn render(reply: &Reply) -> String {
    match reply {
        Reply::Text(t) => t.clone(),
        Reply::ImageUrl(url) => format!("<image {url}>"),
        Reply::File(path) => format!("<file {}>", path.display()),
        Reply::Info(t) => format!("[info] {t}"),
        Reply::Error(t) => format!("[error] {t}"),
    }
}

#[async_trait]
impl ChannelOutbound for ConsoleOutbound {
    async fn send(&self, reply: &Reply, ctx: &MessageContext) -> Result<()> {
        if ctx.reply_to.chat_id.is_empty() {
            return Err(Error::invalid_input("reply target has no chat id"));
        }
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "[{}] {}", ctx.reply_to.chat_id, render(reply))?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parses_full_line() {
        let n = StdinLineNormalizer::new(IdentifyBy::Nickname);
        let msg = n.normalize("room1|bob|hello | world\n".into()).unwrap();
        assert_eq!(msg.session_id, "room1");
        assert_eq!(msg.text, "hello | world");
        assert_eq!(msg.context.user_identifier, "bob");
        assert_eq!(msg.context.reply_to.chat_id, "room1");
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn plain_text_uses_default_session() {
        let n = StdinLineNormalizer::new(IdentifyBy::UserId);
        let msg = n.normalize("just text".into()).unwrap();
        assert_eq!(msg.session_id, "console");
        assert_eq!(msg.context.user_identifier, "user");
    }

    #[test]
    fn blank_lines_ignored() {
        let n = StdinLineNormalizer::new(IdentifyBy::Nickname);
        assert!(n.normalize("   \n".into()).is_none());
        assert!(n.normalize("s|u|  ".into()).is_none());
    }

    #[test]
    fn image_prefix_sets_kind() {
        let n = StdinLineNormalizer::new(IdentifyBy::Nickname).with_image_prefix("/img ");
        let msg = n.normalize("s|u|/img a cat".into()).unwrap();
        assert_eq!(msg.kind, MessageKind::ImageCreate);
        assert_eq!(msg.text, "a cat");
    }

    #[tokio::test]
    async fn outbound_writes_lines() {
        let buf = SharedBuf::default();
        let out = ConsoleOutbound::new(Box::new(buf.clone()));
        let msg = StdinLineNormalizer::new(IdentifyBy::Nickname)
            .normalize("s1|u|hi".into())
            .unwrap();
        out.send(&Reply::Text("hello".into()), &msg.context)
            .await
            .unwrap();
        out.send(&Reply::Info("memory cleared".into()), &msg.context)
            .await
            .unwrap();
        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "[s1] hello\n[s1] [info] memory cleared\n");
    }

    #[tokio::test]
    async fn outbound_rejects_missing_chat() {
        let out = ConsoleOutbound::new(Box::new(SharedBuf::default()));
        let err = out
            .send(&Reply::Text("hello".into()), &MessageContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }
}
