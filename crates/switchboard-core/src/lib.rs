//! Core types and the event bus for the Switchboard agent router.
//!
//! This crate provides the foundational pieces shared across all Switchboard
//! crates: the error taxonomy, the immutable lifecycle [`Event`], and the
//! bounded, lossy [`EventBus`] that decouples orchestration from observers.
//!
//! # Main types
//!
//! - [`SwitchboardError`]: Unified error enum for all Switchboard subsystems.
//! - [`SwitchboardResult`]: Convenience alias for `Result<T, SwitchboardError>`.
//! - [`Event`] / [`EventKind`]: A lifecycle fact and its closed set of kinds.
//! - [`EventBus`]: Topic-based publish/subscribe with wildcard matching.

/// Bounded publish/subscribe event bus.
pub mod bus;
/// Lifecycle events and their kinds.
pub mod event;

pub use bus::{
    handler_fn, BusStats, EventBus, EventHandler, SubscriptionId, DEFAULT_CAPACITY,
    DEFAULT_HANDLER_TIMEOUT,
};
pub use event::{Event, EventKind, ORCHESTRATOR_SOURCE};

/// Top-level error type for the Switchboard framework.
///
/// Each variant corresponds to a subsystem that can produce errors. Most of
/// these never cross a component boundary: transport and protocol faults are
/// turned into result data by the connection layer before the orchestrator
/// ever sees them.
#[derive(Debug, thiserror::Error)]
pub enum SwitchboardError {
    /// The transport beneath the tool-invocation protocol failed
    /// (connection refused, HTTP status, broken stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote peer answered with something that is not valid protocol
    /// traffic, or with a JSON-RPC error object.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation exceeded its configured deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The planner could not produce a usable skill list.
    #[error("Planner error: {0}")]
    Planner(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An agent-level precondition failed (unknown agent, not online).
    #[error("Agent error: {0}")]
    Agent(String),

    /// A subscriber reported a failure while handling an event.
    #[error("Event handler error: {0}")]
    EventHandler(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`SwitchboardError`].
pub type SwitchboardResult<T> = Result<T, SwitchboardError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwitchboardError::Agent("Agent a-1 not found".into());
        assert_eq!(err.to_string(), "Agent error: Agent a-1 not found");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: SwitchboardError = parse.unwrap_err().into();
        assert!(matches!(err, SwitchboardError::Json(_)));
    }
}
