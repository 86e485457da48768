//! Streaming layer: duplex transport, subscription registry, and the
//! reconnecting session manager.

pub mod registry;
pub mod session;
pub mod transport;

pub use registry::{ItemCallback, StreamKey, SubscriptionHandle, SubscriptionRegistry};
pub use session::{
    AuthStatus, SessionEvent, SessionEventReceiver, SessionState, StreamAuth, StreamCodec,
    StreamMessage, StreamSession,
};
pub use transport::{Connector, DuplexTransport, Frame, WsConnector, WsTransport};
