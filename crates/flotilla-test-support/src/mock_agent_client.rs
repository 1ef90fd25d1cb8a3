//! `MockAgentClient`: a minimal stand-in for a real agent, used to
//! exercise the server session hub (C5) and router (C6) without running
//! the agent binary.

use flotilla_protocol::Envelope;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockAgentClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockAgentClient {
    /// Connects to `<base_url>/ws/agent?host_id=<host_id>&api_key=<api_key>`,
    /// the session URL spec.md §6 defines for agent handshakes.
    pub async fn connect(base_url: &str, host_id: &str, api_key: &str) -> Result<Self, String> {
        let url = format!("{base_url}/ws/agent?host_id={host_id}&api_key={api_key}");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| e.to_string())?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), String> {
        self.write
            .send(Message::Text(envelope.encode().into()))
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn recv(&mut self) -> Result<Envelope, String> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Envelope::decode(&text).map_err(|e| e.to_string()),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.to_string()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), String> {
        self.write.send(Message::Close(None)).await.map_err(|e| e.to_string())
    }
}
