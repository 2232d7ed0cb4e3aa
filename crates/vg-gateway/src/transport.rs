//! Transport seam between the gateway and the wire.

use async_trait::async_trait;

use vg_types::ConnectionError;

/// Opens connections to a feed endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// An open, text-framed, bidirectional connection.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Next inbound text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;

    async fn close(&mut self);
}
