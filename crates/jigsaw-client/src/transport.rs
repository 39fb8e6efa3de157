//! Persistent stream transport.
//!
//! [`StreamConnector`] opens one text-framed, bidirectional connection per
//! identity. The session drives it; nothing else touches the socket.
//! [`WsConnector`] is the tokio-tungstenite implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Unavailable(String),
}

/// Opens stream connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn StreamConnection>, TransportError>;
}

/// One open connection.
///
/// `recv` must be cancel-safe: the session selects over it together with its
/// outbound queue.
#[async_trait]
pub trait StreamConnection: Send {
    /// Next text message. `None` once the peer has closed the stream.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close with a WebSocket close code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// [`StreamConnector`] over WebSocket.
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn StreamConnection>, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                source: Box::new(e),
            })?;
        debug!("Stream connected to {}", url);
        Ok(Box::new(WsConnection { ws }))
    }
}

pub struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!("Stream closed by server: {:?}", frame);
                    return None;
                }
                Ok(other) => trace!("Ignoring non-text frame ({} bytes)", other.len()),
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(TransportError::WebSocket(Box::new(e)))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::WebSocket(Box::new(e)))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        match self.ws.close(Some(frame)).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::WebSocket(Box::new(e))),
        }
    }
}
