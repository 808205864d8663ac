//! Lifecycle event reporting.
//!
//! The client emits structured events at defined lifecycle points through an
//! injected [`EventSink`]. Sink failures never affect the outcome of the
//! operation; the client discards them.

use serde_json::Value;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives (event name, JSON fields) pairs from the client.
pub trait EventSink: Send + Sync {
    fn event(&self, name: &str, fields: &Value) -> Result<(), SinkError>;
}

/// Default sink: structured `tracing` output at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn event(&self, name: &str, fields: &Value) -> Result<(), SinkError> {
        tracing::debug!(event = name, fields = %fields, "lifecycle event");
        Ok(())
    }
}
