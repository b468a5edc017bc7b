//! Session state and registry.
//!
//! A session is created the first time a chat is seen and lives for the
//! lifetime of the process. It tracks the backend conversation id, the
//! user/room the conversation belongs to, and a bounded message history.

pub mod registry;
pub mod session;

pub use {
    registry::SessionRegistry,
    session::{HistoryMessage, Role, Session},
};
