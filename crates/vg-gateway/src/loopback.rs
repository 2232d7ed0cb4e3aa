//! In-process transport for tests and sandbox runs.
//!
//! Every successful [`Connector::connect`] hands a [`LoopbackPeer`] to the
//! receiver returned by [`LoopbackConnector::new`]. The peer pushes inbound
//! frames and reads what the gateway sent; dropping it closes the connection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use vg_types::ConnectionError;

use crate::transport::{Connection, Connector};

/// The far end of one loopback connection.
#[derive(Debug)]
pub struct LoopbackPeer {
    pub inbound: mpsc::UnboundedSender<Result<String, ConnectionError>>,
    pub outbound: mpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    /// Deliver a text frame to the gateway. Returns false once the gateway
    /// side is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Ok(text.into())).is_ok()
    }

    pub fn push_json(&self, value: &serde_json::Value) -> bool {
        self.push(value.to_string())
    }

    /// Inject a transport error into the gateway's read side.
    pub fn fail(&self, error: ConnectionError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Next frame the gateway sent, or `None` after the gateway closed.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

#[derive(Debug)]
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    refuse: AtomicBool,
    reject_sends: Arc<AtomicBool>,
    attempts: AtomicU32,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: AtomicBool::new(false),
                reject_sends: Arc::new(AtomicBool::new(false)),
                attempts: AtomicU32::new(0),
            },
            rx,
        )
    }

    /// While set, every connect attempt fails with a transport error.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// While set, every send on any connection fails with a transport error.
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Connect calls made so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, ConnectionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse.load(Ordering::SeqCst) {
            debug!(endpoint = %endpoint, attempt, "loopback refusing connection");
            return Err(ConnectionError::Transport {
                message: format!("connection to {endpoint} refused"),
            });
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.peers
            .send(LoopbackPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            })
            .map_err(|_| ConnectionError::Transport {
                message: "no loopback peer listening".to_string(),
            })?;

        Ok(Box::new(LoopbackConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
            reject_sends: Arc::clone(&self.reject_sends),
        }))
    }
}

struct LoopbackConnection {
    inbound: mpsc::UnboundedReceiver<Result<String, ConnectionError>>,
    outbound: mpsc::UnboundedSender<String>,
    reject_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport {
                message: "loopback send rejected".to_string(),
            });
        }
        self.outbound.send(text).map_err(|_| ConnectionError::Closed {
            reason: "loopback peer dropped".to_string(),
        })
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
