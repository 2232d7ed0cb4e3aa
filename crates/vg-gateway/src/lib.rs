//! Stream ingestion gateway for Vigil.
//!
//! Provides:
//! - The inbound/outbound JSON protocol and its validation
//! - A transport seam ([`Connector`] / [`Connection`]) with WebSocket and
//!   in-process loopback implementations
//! - A reconnecting [`Gateway`] that writes validated samples into the
//!   telemetry store and forwards alert payloads immediately

pub mod gateway;
pub mod loopback;
pub mod protocol;
pub mod reconnect;
pub mod transport;
pub mod ws;

pub use gateway::{ConnectionState, Gateway, GatewayEvent, GatewayStats};
pub use loopback::{LoopbackConnector, LoopbackPeer};
pub use protocol::{InboundMessage, MessageType, OutboundCommand, Translated};
pub use reconnect::ReconnectPolicy;
pub use transport::{Connection, Connector};
pub use ws::WsConnector;
