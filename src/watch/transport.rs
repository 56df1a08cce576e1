//! Streaming transport seam.
//!
//! The manager never opens sockets itself; it asks a [`WatchTransport`]
//! for an event stream and consumes whatever comes back. Production wires
//! this to the API server's watch endpoint; tests supply scripted
//! streams.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::bindings::WatchPhase;

/// Everything the transport needs to open one watch stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub group: String,
    pub version: String,
    /// Plural resource name on the watch path.
    pub resource: String,
    /// Restrict to one namespace; `None` watches cluster-wide.
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Periodic full-relist interval requested from the server.
    pub resync_period_seconds: u64,
    /// Resume point from a previous stream, if any.
    pub start_resource_version: Option<String>,
    /// Ask for an initial snapshot of existing objects. Only meaningful
    /// when no resume point is given.
    pub send_initial_list: bool,
}

/// One frame off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    /// Bookmark used as the resume point for the next connection.
    pub resource_version: Option<String>,
    /// Raw object payload; empty for snapshot-end markers.
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEventKind {
    Added,
    Modified,
    Deleted,
    /// End of the initial snapshot. Carries a bookmark but no object.
    SnapshotEnd,
}

impl StreamEventKind {
    /// The watch phase a frame maps to; snapshot-end markers carry none.
    pub fn phase(&self) -> Option<WatchPhase> {
        match self {
            StreamEventKind::Added => Some(WatchPhase::Added),
            StreamEventKind::Modified => Some(WatchPhase::Modified),
            StreamEventKind::Deleted => Some(WatchPhase::Deleted),
            StreamEventKind::SnapshotEnd => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("watch connection failed: {0}")]
    Connect(String),
    #[error("watch stream broken: {0}")]
    Stream(String),
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Open one watch stream. The returned stream ends when the server
    /// closes the connection; errors inside the stream end it too.
    async fn subscribe(&self, request: SubscribeRequest) -> Result<EventStream, TransportError>;
}
