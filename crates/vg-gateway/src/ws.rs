use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use vg_types::ConnectionError;

use crate::transport::{Connection, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, ConnectionError> {
        info!(endpoint = %endpoint, "opening websocket");
        let (stream, response) = connect_async(endpoint)
            .await
            .map_err(|e| ConnectionError::Transport {
                message: e.to_string(),
            })?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WsStream,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ConnectionError::Transport {
                message: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!("dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                // tungstenite answers pings itself on the next write/flush
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "close frame received".to_string());
                    debug!(reason = %reason, "websocket closed by peer");
                    return None;
                }
                Err(e) => {
                    return Some(Err(ConnectionError::Transport {
                        message: e.to_string(),
                    }))
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "error while closing websocket");
        }
    }
}
