//! Proactive greetings.
//!
//! After a reply cycle completes, a session is armed with a one-shot timer
//! set 12–14 hours out (configurable) and snapped forward into the next
//! allowed daily band. When it fires, the user's whitelist membership and the
//! current time are re-checked before a synthetic query is sent through the
//! normal reply path. A new user message disarms the timer.

pub mod error;
pub mod scheduler;
pub mod whitelist;
pub mod window;

pub use {
    error::{Error, Result},
    scheduler::{
        ArmedGreeting, BusyFn, FireOutcome, GreetingFn, GreetingRequest, GreetingScheduler,
    },
    whitelist::{FileWhitelistSource, StaticWhitelist, WhitelistCache, WhitelistSource},
    window::GreetingWindow,
};
