//! Watch stream lifecycle: subscription, resume, reconnection, and event
//! dispatch.

pub mod manager;
pub mod transport;

pub use manager::{WatchError, WatchManager};
pub use transport::{
    EventStream, StreamEvent, StreamEventKind, SubscribeRequest, TransportError, WatchTransport,
};
