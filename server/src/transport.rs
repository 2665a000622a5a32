//! Transport adapter: delivers connection events into the action queue and
//! carries outbound text frames and closes.
//!
//! The engine only sees the [`Transport`] trait. [`WsTransport`] is the
//! WebSocket implementation: an accept loop plus one reader and one writer
//! task per socket. `send` and `close` enqueue into the writer task's
//! channel, so they never block and are safe to call with a session lock
//! held. Per-connection event order is preserved end to end because each
//! socket has exactly one reader task feeding the queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use signet_shared::ConnectionId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::EngineError;
use crate::queue::{Action, ActionSender};

/// Downcalls the engine makes into the transport.
pub trait Transport: Send + Sync + 'static {
    /// Queue a text frame. Failure means the connection is already gone;
    /// it is never fatal to the engine.
    fn send(&self, conn: ConnectionId, text: String) -> Result<(), EngineError>;

    /// Queue a close with the given reason. Idempotent.
    fn close(&self, conn: ConnectionId, reason: &str);
}

/// Frames travelling from the engine to one socket's writer task.
enum Frame {
    Text(String),
    Close(String),
}

/// WebSocket transport over `tokio-tungstenite`.
pub struct WsTransport {
    peers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Frame>>>,
    next_id: AtomicU64,
    actions: ActionSender,
}

impl WsTransport {
    pub fn new(actions: ActionSender) -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            actions,
        })
    }

    /// Accept connections forever. An accept failure is the one fatal error
    /// in the system: it signals engine shutdown and returns.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), EngineError> {
        if let Ok(addr) = listener.local_addr() {
            info!("listening for connections on {}", addr);
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let transport = Arc::clone(&self);
                    tokio::spawn(async move {
                        transport.handle_socket(stream, peer).await;
                    });
                }
                Err(e) => {
                    error!("accept failed: {}; shutting engine down", e);
                    self.actions.shutdown();
                    return Err(EngineError::Transport(e));
                }
            }
        }
    }

    async fn handle_socket(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("websocket handshake with {} failed: {}", peer, e);
                return;
            }
        };

        let conn = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().insert(conn, frame_tx);
        trace!("connection {} accepted from {}", conn, peer);
        self.actions.push(Action::Open { conn });

        let (mut sink, mut source) = ws.split();

        // Writer: text frames in order, then at most one close frame.
        let writer = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                match frame {
                    Frame::Text(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Frame::Close(reason) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        });

        // Reader: the single task producing this connection's upcalls, so
        // their order matches the wire.
        while let Some(msg) = source.next().await {
            match msg {
                Ok(Message::Text(text)) => self.actions.push(Action::Message { conn, text }),
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // binary/ping/pong carry no protocol meaning here
                Err(e) => {
                    debug!("connection {} errored: {}", conn, e);
                    break;
                }
            }
        }

        self.peers.lock().unwrap().remove(&conn);
        self.actions.push(Action::Close { conn });
        writer.abort();
        trace!("connection {} torn down", conn);
    }

    fn sender_for(&self, conn: ConnectionId) -> Option<mpsc::UnboundedSender<Frame>> {
        self.peers.lock().unwrap().get(&conn).cloned()
    }
}

impl Transport for WsTransport {
    fn send(&self, conn: ConnectionId, text: String) -> Result<(), EngineError> {
        let Some(tx) = self.sender_for(conn) else {
            return Err(EngineError::SendFailed(conn));
        };
        tx.send(Frame::Text(text))
            .map_err(|_| EngineError::SendFailed(conn))
    }

    fn close(&self, conn: ConnectionId, reason: &str) {
        // Deregister first so later sends fail fast instead of racing the
        // close frame.
        let tx = self.peers.lock().unwrap().remove(&conn);
        if let Some(tx) = tx {
            let _ = tx.send(Frame::Close(reason.to_string()));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::action_queue;

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let (tx, _rx) = action_queue();
        let transport = WsTransport::new(tx);
        assert!(matches!(
            transport.send(ConnectionId(42), "hello".to_string()),
            Err(EngineError::SendFailed(ConnectionId(42)))
        ));
    }

    #[tokio::test]
    async fn close_of_unknown_connection_is_a_noop() {
        let (tx, _rx) = action_queue();
        let transport = WsTransport::new(tx);
        transport.close(ConnectionId(42), "bye");
    }
}
