//! `MockServer`: a minimal stand-in for the server hub (C5), used to
//! exercise the agent session client (C4) without a real server binary.
//! Accepts exactly one connection, lets the test push envelopes to the
//! agent and observe what the agent sends back.

use std::net::SocketAddr;

use flotilla_protocol::Envelope;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub struct MockServer {
    addr: SocketAddr,
    to_agent: mpsc::UnboundedSender<Envelope>,
    from_agent: mpsc::UnboundedReceiver<Envelope>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");

        let (to_agent_tx, mut to_agent_rx) = mpsc::unbounded_channel::<Envelope>();
        let (from_agent_tx, from_agent_rx) = mpsc::unbounded_channel::<Envelope>();

        let task = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else { return };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    outbound = to_agent_rx.recv() => {
                        match outbound {
                            Some(envelope) => {
                                if write.send(Message::Text(envelope.encode().into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    inbound = read.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(envelope) = Envelope::decode(&text) {
                                    if from_agent_tx.send(envelope).is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(_)) => break,
                        }
                    }
                }
            }
        });

        Self { addr, to_agent: to_agent_tx, from_agent: from_agent_rx, _task: task }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/agent", self.addr)
    }

    pub fn send(&self, envelope: Envelope) {
        let _ = self.to_agent.send(envelope);
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.from_agent.recv().await
    }
}
