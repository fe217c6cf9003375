//! Transport seam between the connection manager and the wire.
//!
//! The manager never sees a WebSocket directly. It asks a [`Connector`] for a
//! [`Transport`], a boxed sink/stream pair of [`Frame`]s, so tests can swap
//! in an in-memory fake and the production build uses tokio-tungstenite.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use snaplink_proto::CloseCode;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;

/// Transport-level failures. The manager retries all of them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("transport closed")]
    Closed,
}

/// One unit of transport traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: CloseCode, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open transport.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports. The only way the manager reaches the network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}

/// WebSocket connector (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_ws(frame))));

        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                Ok(Message::Close(frame)) => Some(Ok(from_ws_close(frame))),
                // Control frames are answered by tungstenite itself.
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn into_ws(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: reason.into(),
        })),
    }
}

fn from_ws_close(frame: Option<CloseFrame<'static>>) -> Frame {
    match frame {
        Some(frame) => Frame::Close {
            code: CloseCode(u16::from(frame.code)),
            reason: frame.reason.into_owned(),
        },
        // A close frame without a status is reported as 1005 by browsers.
        None => Frame::Close {
            code: CloseCode(1005),
            reason: String::new(),
        },
    }
}
