//! Metric definitions for parley.
//!
//! Crates record through the `metrics` facade macros re-exported here; which
//! recorder (if any) receives the values is up to the binary.
//!
//! ```rust,ignore
//! use parley_metrics::{counter, debounce};
//!
//! counter!(debounce::FLUSHES_TOTAL).increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
