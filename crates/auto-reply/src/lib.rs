//! Inbound message pipeline: debounce fragments per session, run one reply
//! cycle per merged query, and keep the idle greeting schedule in step.
//!
//! Flow: channel message → disarm greeting → debounce → session history →
//! reply backend (with retry) → shape replies → channel outbound → re-arm
//! greeting.

pub mod backend;
pub mod chunk;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod reaper;

pub use {
    backend::{EchoBackend, ReplyBackend, ReplyOutcome, RetryPolicy, generate_with_retry},
    chunk::split_sentences,
    debounce::{Debouncer, FlushFn, SubmitOutcome},
    dispatch::{Collaborators, DispatchCoordinator, MEMORY_CLEARED},
    error::{Error, Result},
    reaper::Reaper,
};
