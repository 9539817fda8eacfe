//! Logging for labdesk
//!
//! Diagnostic output goes through `tracing`; the subscriber is installed by
//! the binary. The [`usage`] module records one JSONL event per resolution.

pub mod usage;

pub use usage::{ResolutionEvent, ResolutionOutcome, UsageLogger};
