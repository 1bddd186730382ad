use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::ChannelError;

/// An open, ordered, message-oriented connection to a kernel.
///
/// Each call to `send` writes exactly one frame and each call to `recv`
/// yields exactly one frame. Implementations are owned by a single driver, so
/// neither method needs to be safe for concurrent use.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, frame: Bytes) -> Result<(), ChannelError>;
    async fn recv(&mut self) -> Result<Bytes, ChannelError>;
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsChannel {
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        let (stream, response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|source| ChannelError::Connect {
                    url: url.to_string(),
                    source,
                })?;

        info!(url, status = %response.status(), "connected to kernel channels");

        Ok(Self { stream })
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, frame: Bytes) -> Result<(), ChannelError> {
        let text = String::from_utf8(frame.to_vec())?;
        self.stream.send(Message::Text(text)).await?;

        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes, ChannelError> {
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => return Ok(Bytes::from(text)),
                Message::Binary(data) => return Ok(Bytes::from(data)),
                Message::Close(frame) => {
                    debug!(?frame, "kernel channel closed");
                    return Err(ChannelError::Closed);
                }
                // Pings are answered by tungstenite on the next read or write.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        Err(ChannelError::Closed)
    }
}
