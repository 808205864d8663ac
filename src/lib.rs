//! Resilient client for search-grounded answer generation.
//!
//! Surface:
//! - `Client` with a bounded retry/backoff loop and a one-shot
//!   compatibility fallback for older provider deployments
//! - Lenient option normalization (`RawOptions` → `Config`) that never fails
//! - Injected `Transport` and `EventSink` collaborators for testing and
//!   embedding
//! - Citation extraction with exact-URL deduplication and allow-list
//!   domain filtering

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod request;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{
    Config, ContextSize, RawOptions, ReasoningEffort, ToolChoice, UserLocation, WebAccess,
};
pub use error::ClientError;
pub use events::{EventSink, SinkError, TracingSink};
pub use extract::{Answer, Source};
pub use request::Payload;
pub use transport::{
    ReqwestTransport, Transport, TransportFailure, TransportRequest, TransportResponse,
};
