//! Channel plumbing.
//!
//! Transports implement [`MessageNormalizer`] to turn their payloads into
//! [`parley_common::types::InboundMessage`]s and [`ChannelOutbound`] to
//! deliver replies. The console channel backs the `parley` binary.

pub mod console;
pub mod error;
pub mod identify;
pub mod plugin;

pub use {
    console::{ConsoleOutbound, StdinLineNormalizer},
    error::{Error, Result},
    identify::identify_user,
    plugin::{ChannelOutbound, MemoryOutbound, MessageNormalizer, SentReply},
};
