//! labdesk - reservation query composition for the lab booking marketplace
//!
//! Turns "show me this user's (or this lab's) bookings" into a chain of
//! dependent reads against one of two backends, caches every read, and
//! composes the results into a single view.
//!
//! ## Layers
//!
//! - **Backend**: wallet and institutional read paths behind one trait, routed by identity mode
//! - **Cache**: per-operation query stores with stale times, in-flight collapsing and retries
//! - **Pipeline**: count → keys → records → status → enrichment → optimistic merge → aggregation
//! - **Logging**: tracing diagnostics plus an optional JSONL usage log

pub mod backend;
pub mod cache;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod types;

pub use backend::{BackendRouter, ReservationBackend};
pub use cache::{CacheConfig, QueryCache};
pub use config::Args;
pub use pipeline::{BookingsComposer, ComposedBookings, PipelineConfig, ResolveOptions};
pub use types::{PipelineError, Result, Subject};
