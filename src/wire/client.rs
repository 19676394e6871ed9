use anyhow::{Context, Result};
use futures::stream::{SplitSink, SplitStream, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use super::messages::ClientFrame;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Write half of an open connection to the voice service
pub struct VoiceSocket {
    sink: WsSink,
}

/// Read half, yielding decoded socket inputs one at a time
pub struct SocketReader {
    stream: WsStream,
}

/// What the read half produced
#[derive(Debug)]
pub enum SocketInput {
    /// A text frame (JSON payload, not yet decoded)
    Frame(String),
    /// A socket-level error; the connection may still deliver a close after this
    Error(String),
    /// The peer closed the connection
    Closed { normal: bool },
}

impl VoiceSocket {
    /// Open a socket to the voice service
    ///
    /// The API key travels as a query parameter on the connection URI.
    /// There is no client-side timeout on the open wait; a stalled network
    /// leaves the caller suspended until the transport gives up.
    pub async fn connect(endpoint: &str, api_key: &str) -> Result<(VoiceSocket, SocketReader)> {
        let mut uri = Url::parse(endpoint).context("Invalid voice service endpoint")?;
        uri.query_pairs_mut().append_pair("api_key", api_key);

        debug!("Opening voice service socket: {}", uri.host_str().unwrap_or("?"));

        let (ws_stream, _response) = connect_async(uri.as_str())
            .await
            .context("Failed to open voice service socket")?;

        info!("Voice service socket connected");

        let (sink, stream) = ws_stream.split();

        Ok((VoiceSocket { sink }, SocketReader { stream }))
    }

    /// Send one outbound frame as a JSON text message
    pub async fn send(&mut self, frame: &ClientFrame) -> Result<()> {
        let payload = serde_json::to_string(frame).context("Failed to serialize frame")?;

        self.sink
            .send(Message::Text(payload.into()))
            .await
            .context("Failed to send frame to voice service")
    }

    /// Close the connection with a normal closure code
    pub async fn close(&mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client disconnect".into(),
        };

        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .context("Failed to send close frame")?;

        self.sink.close().await.context("Failed to close socket")
    }
}

impl SocketReader {
    /// Next input from the socket, or `None` once the transport is gone
    ///
    /// Binary and ping/pong frames are skipped; the voice service speaks
    /// JSON text only.
    pub async fn next(&mut self) -> Option<SocketInput> {
        loop {
            return match self.stream.next().await? {
                Ok(Message::Text(text)) => Some(SocketInput::Frame(text.as_str().to_string())),
                Ok(Message::Close(frame)) => {
                    let normal = matches!(&frame, Some(f) if f.code == CloseCode::Normal);
                    debug!("Voice service socket closed (normal={})", normal);
                    Some(SocketInput::Closed { normal })
                }
                Ok(_) => continue,
                Err(e) => Some(SocketInput::Error(e.to_string())),
            };
        }
    }
}
