use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    parley_common::types::{InboundMessage, MessageContext, Reply},
};

use crate::error::{Error, Result};

/// Turn a transport-specific payload into an [`InboundMessage`].
///
/// Returns `None` for payloads the gateway should ignore (system notices,
/// messages from the bot itself, blank lines).
pub trait MessageNormalizer: Send + Sync {
    type Raw;

    fn normalize(&self, raw: Self::Raw) -> Option<InboundMessage>;
}

/// Send replies to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send(&self, reply: &Reply, ctx: &MessageContext) -> Result<()>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _ctx: &MessageContext) -> Result<()> {
        Ok(())
    }
}

/// A reply captured by [`MemoryOutbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    pub chat_id: String,
    pub reply: Reply,
}

/// Outbound that records every reply in memory.
#[derive(Debug, Default)]
pub struct MemoryOutbound {
    sent: Mutex<Vec<SentReply>>,
    typing: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, in send order.
    pub fn sent(&self) -> Vec<SentReply> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Text bodies sent to one chat.
    pub fn texts_for(&self, chat_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .filter_map(|s| s.reply.as_text().map(str::to_string))
            .collect()
    }

    /// Typing indicators that went through.
    pub fn typing_count(&self) -> usize {
        self.typing.load(Ordering::SeqCst)
    }

    /// Make subsequent sends fail with [`Error::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChannelOutbound for MemoryOutbound {
    async fn send(&self, reply: &Reply, ctx: &MessageContext) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::unavailable("outbound disconnected"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentReply {
                chat_id: ctx.reply_to.chat_id.clone(),
                reply: reply.clone(),
            });
        Ok(())
    }

    async fn send_typing(&self, _ctx: &MessageContext) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::unavailable("outbound disconnected"));
        }
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
