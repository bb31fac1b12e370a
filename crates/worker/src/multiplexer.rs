//! Owns one client transport: demultiplexes inbound frames into
//! per-session handlers, serializes outbound frames from all of them, and
//! runs the admission procedure for new sessions.
//!
//! Grounded on the split-socket, paired ingest/egress task design in
//! `voice_ws.rs` and on `WebsocketConnection` in the original proxy
//! source for the dispatch control flow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{info, warn};

use ttsfleet_wire::{decode_send_message, encode_receive_message, receive_message, send_message,
    ReceiveMessage, SendMessage};

use crate::errors::WorkerError;
use crate::health::HealthAgent;
use crate::model::SessionModel;
use crate::session::{self, OutboundSink, SessionHandler};
use crate::upstream::UpstreamPool;

pub struct ConnectionMultiplexer {
    internal: bool,
    sessions: Arc<RwLock<HashMap<String, Arc<SessionHandler>>>>,
    write_tx: mpsc::Sender<ReceiveMessage>,
    health: Arc<HealthAgent>,
    upstream: Arc<UpstreamPool>,
    model: Arc<dyn SessionModel>,
    input_timeout: Duration,
    output_timeout: Duration,
    closed: AtomicBool,
}

struct MultiplexerSink {
    write_tx: mpsc::Sender<ReceiveMessage>,
    sessions: Arc<RwLock<HashMap<String, Arc<SessionHandler>>>>,
}

#[async_trait::async_trait]
impl OutboundSink for MultiplexerSink {
    async fn send_frame(&self, msg: ReceiveMessage) {
        let _ = self.write_tx.send(msg).await;
    }

    async fn session_closed(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

impl ConnectionMultiplexer {
    /// Runs the full lifetime of one WebSocket connection: splits the
    /// socket, spawns the writer task, then reads until the transport
    /// closes or a fatal error occurs, tearing down every session it owns
    /// before returning.
    pub async fn run(
        socket: WebSocket,
        internal: bool,
        health: Arc<HealthAgent>,
        upstream: Arc<UpstreamPool>,
        model: Arc<dyn SessionModel>,
        input_timeout: Duration,
        output_timeout: Duration,
    ) {
        let (mut ws_sink, mut ws_stream) = socket.split();
        let (write_tx, mut write_rx) = mpsc::channel::<ReceiveMessage>(256);

        let mut writer = tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                let bytes = encode_receive_message(&msg);
                if ws_sink.send(AxumMessage::Binary(bytes.to_vec())).await.is_err() {
                    break;
                }
            }
        });

        let mux = Arc::new(ConnectionMultiplexer {
            internal,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            write_tx,
            health,
            upstream,
            model,
            input_timeout,
            output_timeout,
            closed: AtomicBool::new(false),
        });

        loop {
            tokio::select! {
                frame = ws_stream.next() => {
                    match frame {
                        Some(Ok(AxumMessage::Binary(bytes))) => {
                            mux.dispatch(&bytes).await;
                            if mux.closed.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Some(Ok(AxumMessage::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "transport read error, closing connection");
                            break;
                        }
                    }
                }
                _ = &mut writer => {
                    break;
                }
            }
        }

        mux.shutdown().await;
        writer.abort();
    }

    async fn dispatch(&self, bytes: &[u8]) {
        let msg = match decode_send_message(bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "malformed frame, closing connection");
                self.closed.store(true, Ordering::Release);
                return;
            }
        };

        let SendMessage { session, body } = msg;

        match body {
            Some(send_message::Body::StartSession(start)) => {
                self.handle_start_session(session, start.voice).await;
            }
            Some(send_message::Body::PushText(push)) => {
                self.dispatch_to_handler(&session, |h| {
                    let text = push.text.clone();
                    Box::pin(async move { h.push_text(text).await })
                })
                .await;
            }
            Some(send_message::Body::Eos(_)) => {
                self.dispatch_to_handler(&session, |h| Box::pin(async move { h.eos().await }))
                    .await;
            }
            None => {
                warn!(session = %session, "frame with no body, ignoring");
            }
        }
    }

    async fn dispatch_to_handler<F>(&self, session_id: &str, f: F)
    where
        F: FnOnce(Arc<SessionHandler>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
    {
        let handler = self.sessions.read().await.get(session_id).cloned();
        match handler {
            Some(h) => f(h).await,
            None => {
                self.send_frame(ReceiveMessage {
                    session: session_id.to_string(),
                    body: Some(receive_message::Body::Error(ttsfleet_wire::WireError {
                        message: WorkerError::UnknownSession.client_message().to_string(),
                    })),
                })
                .await;
            }
        }
    }

    async fn send_frame(&self, msg: ReceiveMessage) {
        let _ = self.write_tx.send(msg).await;
    }

    /// Implements the admission procedure in full: local check, then
    /// (unless this is an internal/peer connection) forwarding via the
    /// controller's ranked peer list, then exhaustion.
    async fn handle_start_session(&self, session_id: String, voice: String) {
        if self.sessions.read().await.contains_key(&session_id) {
            self.send_frame(ReceiveMessage {
                session: session_id.clone(),
                body: Some(receive_message::Body::Error(ttsfleet_wire::WireError {
                    message: "duplicate session id".to_string(),
                })),
            })
            .await;
            return;
        }

        let sink: Arc<dyn OutboundSink> = Arc::new(MultiplexerSink {
            write_tx: self.write_tx.clone(),
            sessions: self.sessions.clone(),
        });

        if self.health.can_accept_local() {
            let handler = session::spawn_local(
                session_id.clone(),
                voice,
                self.model.clone(),
                self.health.clone(),
                sink,
                self.input_timeout,
                self.output_timeout,
            );
            self.sessions
                .write()
                .await
                .insert(session_id, Arc::new(handler));
            return;
        }

        if self.internal {
            self.emit_no_capacity(&session_id).await;
            return;
        }

        let peers = self.health.available_peers().await;
        for peer in peers {
            let lease = match self.upstream.lease(&session_id, &peer.url).await {
                Ok(l) => l,
                Err(_) => continue,
            };
            let start = SendMessage {
                session: session_id.clone(),
                body: Some(send_message::Body::StartSession(
                    ttsfleet_wire::StartSession {
                        voice: voice.clone(),
                    },
                )),
            };
            if lease.send(&start).await.is_err() {
                continue;
            }

            let handler = session::spawn_remote(session_id.clone(), lease, sink);
            self.sessions
                .write()
                .await
                .insert(session_id, Arc::new(handler));
            return;
        }

        self.emit_no_capacity(&session_id).await;
    }

    async fn emit_no_capacity(&self, session_id: &str) {
        self.send_frame(ReceiveMessage {
            session: session_id.to_string(),
            body: Some(receive_message::Body::Error(ttsfleet_wire::WireError {
                message: WorkerError::NoCapacity.client_message().to_string(),
            })),
        })
        .await;
    }

    /// Closes every session this connection owns and waits up to a
    /// bounded grace period for their run-tasks to observe it.
    async fn shutdown(&self) {
        let handlers: Vec<_> = self.sessions.write().await.drain().map(|(_, h)| h).collect();
        if handlers.is_empty() {
            return;
        }
        info!(count = handlers.len(), "closing sessions on connection teardown");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        for handler in handlers {
            handler.eos().await;
            while !handler.is_closed() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
