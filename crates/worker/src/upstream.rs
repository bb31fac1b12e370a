//! Pools outbound connections to peer workers and demultiplexes their
//! responses back to the originating session.
//!
//! Grounded on `ProxyConnections`/`ProxyHandle` in the original
//! controller-proxy source: a per-URL dial guard prevents redundant
//! concurrent dials, and a single read-loop per connection demuxes
//! `ReceiveMessage` frames by `session`.
//!
//! `UpstreamConnection` never stores a reference back to a `Lease` — only
//! a plain `mpsc::Sender` per session — so there is no `UpstreamConnection`
//! ↔ `Lease` reference cycle to break with weak pointers; a `Lease` holds
//! a strong `Arc<UpstreamConnection>` and nothing holds a strong
//! reference the other way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

use ttsfleet_wire::{decode_receive_message, encode_send_message, ReceiveMessage, SendMessage};

use crate::errors::WorkerError;

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    WsMessage,
>;

pub struct UpstreamPool {
    password: Option<String>,
    connections: StdMutex<HashMap<String, Weak<UpstreamConnection>>>,
    dial_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UpstreamPool {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password,
            connections: StdMutex::new(HashMap::new()),
            dial_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn dial_lock_for(&self, url: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.dial_locks.lock().unwrap();
        locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn live_connection(&self, url: &str) -> Option<Arc<UpstreamConnection>> {
        let connections = self.connections.lock().unwrap();
        connections.get(url).and_then(Weak::upgrade)
    }

    /// Leases a connection to `peer_url` for `session_id`, dialing a
    /// fresh connection if none is live. At most one dial per URL is ever
    /// in flight; concurrent callers for the same URL await the same
    /// dial.
    pub async fn lease(
        &self,
        session_id: &str,
        peer_url: &str,
    ) -> Result<Lease, WorkerError> {
        if let Some(conn) = self.live_connection(peer_url) {
            let rx = conn.register_session(session_id);
            return Ok(Lease {
                session_id: session_id.to_string(),
                connection: conn,
                rx,
            });
        }

        let dial_lock = self.dial_lock_for(peer_url);
        let _guard = dial_lock.lock().await;

        // Re-check after acquiring the guard: another caller may have won
        // the dial while we waited.
        if let Some(conn) = self.live_connection(peer_url) {
            let rx = conn.register_session(session_id);
            return Ok(Lease {
                session_id: session_id.to_string(),
                connection: conn,
                rx,
            });
        }

        let conn = Arc::new(
            UpstreamConnection::dial(peer_url, self.password.as_deref())
                .await
                .map_err(|e| {
                    warn!(url = peer_url, error = %e, "upstream dial failed");
                    WorkerError::UpstreamFailure
                })?,
        );

        self.connections
            .lock()
            .unwrap()
            .insert(peer_url.to_string(), Arc::downgrade(&conn));

        let rx = conn.register_session(session_id);
        Ok(Lease {
            session_id: session_id.to_string(),
            connection: conn,
            rx,
        })
    }
}

pub struct UpstreamConnection {
    sink: AsyncMutex<WsSink>,
    sessions: Arc<StdMutex<HashMap<String, mpsc::Sender<ReceiveMessage>>>>,
    reader: tokio::task::JoinHandle<()>,
}

impl UpstreamConnection {
    async fn dial(peer_url: &str, password: Option<&str>) -> anyhow::Result<Self> {
        let ws_url = format!("{}/ws", peer_url.trim_end_matches('/'));
        let mut request = ws_url.into_client_request()?;
        if let Some(password) = password {
            request.headers_mut().insert(
                "Authorization",
                format!("Bearer {password}").parse()?,
            );
            request
                .headers_mut()
                .insert("X-Ttsfleet-Peer", password.parse()?);
        }

        let (stream, _resp) = tokio_tungstenite::connect_async(request).await?;
        let (sink, mut stream_rx) = stream.split();

        let sessions: Arc<StdMutex<HashMap<String, mpsc::Sender<ReceiveMessage>>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        let sessions_for_reader = sessions.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream_rx.next().await {
                let msg = match msg {
                    Ok(WsMessage::Binary(bytes)) => bytes,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let parsed = match decode_receive_message(&msg) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "malformed upstream frame, dropping");
                        continue;
                    }
                };
                let sender = sessions_for_reader
                    .lock()
                    .unwrap()
                    .get(&parsed.session)
                    .cloned();
                match sender {
                    Some(tx) => {
                        let _ = tx.send(parsed).await;
                    }
                    None => {
                        warn!(session = %parsed.session, "frame for unknown upstream session, dropping");
                    }
                }
            }
            // Transport died: drop every registered sender so each
            // Lease's recv() observes a closed channel and surfaces
            // UpstreamFailure.
            sessions_for_reader.lock().unwrap().clear();
        });

        Ok(Self {
            sink: AsyncMutex::new(sink),
            sessions,
            reader,
        })
    }

    fn register_session(&self, session_id: &str) -> mpsc::Receiver<ReceiveMessage> {
        let (tx, rx) = mpsc::channel(64);
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), tx);
        rx
    }

    fn deregister_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    async fn send(&self, msg: &SendMessage) -> Result<(), WorkerError> {
        let bytes = encode_send_message(msg);
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Binary(bytes.to_vec()))
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to write to upstream connection");
                WorkerError::UpstreamFailure
            })
    }
}

impl Drop for UpstreamConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// A scoped handle through which one session sends to and receives from
/// one shared `UpstreamConnection`.
pub struct Lease {
    session_id: String,
    connection: Arc<UpstreamConnection>,
    rx: mpsc::Receiver<ReceiveMessage>,
}

impl Lease {
    pub async fn send(&self, msg: &SendMessage) -> Result<(), WorkerError> {
        self.connection.send(msg).await
    }

    /// Awaits the next frame for this session. `None` means the shared
    /// transport died before a terminal frame arrived for this session —
    /// callers interpret that as an upstream failure.
    pub async fn recv(&mut self) -> Option<ReceiveMessage> {
        self.rx.recv().await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.connection.deregister_session(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_lock_is_shared_across_calls_for_same_url() {
        let pool = UpstreamPool::new(None);
        let a = pool.dial_lock_for("http://peer1");
        let b = pool.dial_lock_for("http://peer1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dial_lock_differs_across_urls() {
        let pool = UpstreamPool::new(None);
        let a = pool.dial_lock_for("http://peer1");
        let b = pool.dial_lock_for("http://peer2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn no_live_connection_before_any_dial() {
        let pool = UpstreamPool::new(None);
        assert!(pool.live_connection("http://peer1").is_none());
    }
}
