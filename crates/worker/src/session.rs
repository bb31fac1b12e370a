//! Per-session state machine and the Local/Remote handler run-tasks.
//!
//! State transitions mirror the teacher's `IngestSession`/`SessionState`
//! validated-transition style; the 250 ms inactivity-timer poll loop is
//! grounded on `LocalWebsocketSession.inactivity_loop` in the original
//! proxy source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use ttsfleet_wire::{receive_message, send_message, AudioData, AudioType, Finished, ReceiveMessage,
    SendMessage};

use crate::errors::WorkerError;
use crate::health::HealthAgent;
use crate::model::SessionModel;
use crate::upstream::Lease;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Streaming,
    EndOfInput,
    Closed,
}

/// Outbound sink a handler writes `ReceiveMessage`s onto; implemented by
/// the owning `ConnectionMultiplexer`'s write side.
#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send_frame(&self, msg: ReceiveMessage);

    /// Called exactly once, after the terminal frame has been emitted, by
    /// a run-task that has just reached `Closed`. The owning
    /// `ConnectionMultiplexer` uses this to evict the session's entry
    /// from its session table — a `SessionId` is removed on termination,
    /// not just at connection teardown, so a later `StartSession` reusing
    /// the same id is admitted rather than rejected as a duplicate.
    async fn session_closed(&self, session_id: &str);
}

struct Shared {
    state: RwLock<SessionState>,
    closed: AtomicBool,
    last_input: RwLock<Instant>,
    last_output: RwLock<Instant>,
    terminal_sent: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            state: RwLock::new(SessionState::Opening),
            closed: AtomicBool::new(false),
            last_input: RwLock::new(now),
            last_output: RwLock::new(now),
            terminal_sent: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        *self.state.write().await = SessionState::Closed;
    }

    /// Returns true the first time it's called for this session; callers
    /// use this to enforce "exactly one terminal frame".
    fn claim_terminal(&self) -> bool {
        self.terminal_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Inbound items queued by the multiplexer for a session's run task.
pub enum Inbound {
    PushText(String),
    Eos,
}

/// A live session bound to one Connection. Created on `StartSession`,
/// destroyed once `Closed`.
pub struct SessionHandler {
    session_id: String,
    shared: Arc<Shared>,
    input_tx: mpsc::Sender<Inbound>,
}

impl SessionHandler {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn state(&self) -> SessionState {
        *self.shared.state.read().await
    }

    /// Enqueues inbound input. Never blocks the multiplexer's read loop
    /// forever — callers await this, which only suspends while the
    /// bounded queue is full, matching the spec's backpressure contract.
    pub async fn push_text(&self, text: String) {
        if self.shared.is_closed() {
            return;
        }
        if matches!(self.state().await, SessionState::EndOfInput | SessionState::Closed) {
            warn!(session = %self.session_id, "PushText after Eos, discarding");
            return;
        }
        let _ = self.input_tx.send(Inbound::PushText(text)).await;
    }

    pub async fn eos(&self) {
        if self.shared.is_closed() {
            return;
        }
        let _ = self.input_tx.send(Inbound::Eos).await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Spawns a LocalSessionHandler bound to a freshly opened model session.
/// `on_exit` runs exactly once regardless of how the run-task ends
/// (scoped decrement-on-exit for the session counter).
pub fn spawn_local(
    session_id: String,
    voice: String,
    model: Arc<dyn SessionModel>,
    health: Arc<HealthAgent>,
    sink: Arc<dyn OutboundSink>,
    input_timeout: Duration,
    output_timeout: Duration,
) -> SessionHandler {
    let shared = Arc::new(Shared::new());
    let (input_tx, mut input_rx) = mpsc::channel::<Inbound>(64);

    let handler = SessionHandler {
        session_id: session_id.clone(),
        shared: shared.clone(),
        input_tx,
    };

    tokio::spawn(async move {
        let _guard = SessionCounterGuard::new(health.clone());

        *shared.state.write().await = SessionState::Streaming;

        let (mut model_session, mut audio_rx) = model.create_session(&session_id, &voice);

        let mut eos_received = false;
        let terminal = loop {
            tokio::select! {
                biased;

                maybe_input = input_rx.recv() => {
                    match maybe_input {
                        Some(Inbound::PushText(text)) => {
                            *shared.last_input.write().await = Instant::now();
                            model_session.push_text(&text);
                        }
                        Some(Inbound::Eos) => {
                            *shared.last_input.write().await = Instant::now();
                            eos_received = true;
                            *shared.state.write().await = SessionState::EndOfInput;
                            model_session.end_of_stream();
                        }
                        None => {
                            // Connection tore down the input side.
                        }
                    }
                }

                chunk = audio_rx.recv() => {
                    match chunk {
                        Some(chunk) => {
                            *shared.last_output.write().await = Instant::now();
                            sink.send_frame(ReceiveMessage {
                                session: session_id.clone(),
                                body: Some(receive_message::Body::AudioData(AudioData {
                                    audio: chunk.audio,
                                    sample_rate: chunk.sample_rate,
                                    channel_count: chunk.channel_count,
                                    audio_type: AudioType::default() as i32,
                                })),
                            }).await;
                        }
                        None => {
                            break Terminal::Finished;
                        }
                    }
                }

                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    let now = Instant::now();
                    let last_input = *shared.last_input.read().await;
                    let last_output = *shared.last_output.read().await;
                    if !eos_received && now.duration_since(last_input) > input_timeout {
                        break Terminal::Error(WorkerError::InputInactivity);
                    }
                    if now.duration_since(last_output) > output_timeout {
                        break Terminal::Error(WorkerError::OutputInactivity);
                    }
                    continue;
                }
            };
        };

        emit_terminal(&sink, &shared, &session_id, terminal).await;
        shared.mark_closed().await;
        sink.session_closed(&session_id).await;
    });

    handler
}

/// Spawns a RemoteSessionHandler bound to an already-leased upstream
/// connection. The `StartSession` frame was already forwarded by the
/// admission procedure before this is called.
pub fn spawn_remote(
    session_id: String,
    mut lease: Lease,
    sink: Arc<dyn OutboundSink>,
) -> SessionHandler {
    let shared = Arc::new(Shared::new());
    let (input_tx, mut input_rx) = mpsc::channel::<Inbound>(64);

    let handler = SessionHandler {
        session_id: session_id.clone(),
        shared: shared.clone(),
        input_tx,
    };

    tokio::spawn(async move {
        *shared.state.write().await = SessionState::Streaming;

        let terminal = loop {
            tokio::select! {
                biased;

                maybe_input = input_rx.recv() => {
                    match maybe_input {
                        Some(Inbound::PushText(text)) => {
                            let msg = SendMessage {
                                session: session_id.clone(),
                                body: Some(send_message::Body::PushText(
                                    ttsfleet_wire::PushText { text },
                                )),
                            };
                            if lease.send(&msg).await.is_err() {
                                break Terminal::Error(WorkerError::UpstreamFailure);
                            }
                        }
                        Some(Inbound::Eos) => {
                            *shared.state.write().await = SessionState::EndOfInput;
                            let msg = SendMessage {
                                session: session_id.clone(),
                                body: Some(send_message::Body::Eos(ttsfleet_wire::Eos {})),
                            };
                            if lease.send(&msg).await.is_err() {
                                break Terminal::Error(WorkerError::UpstreamFailure);
                            }
                        }
                        None => {}
                    }
                }

                frame = lease.recv() => {
                    match frame {
                        Some(ReceiveMessage { body: Some(receive_message::Body::Finished(_)), .. }) => {
                            break Terminal::Finished;
                        }
                        Some(ReceiveMessage { body: Some(receive_message::Body::Error(e)), .. }) => {
                            sink.send_frame(ReceiveMessage {
                                session: session_id.clone(),
                                body: Some(receive_message::Body::Error(e)),
                            }).await;
                            shared.claim_terminal();
                            shared.mark_closed().await;
                            sink.session_closed(&session_id).await;
                            return;
                        }
                        Some(other) => {
                            sink.send_frame(other).await;
                            continue;
                        }
                        None => {
                            break Terminal::Error(WorkerError::UpstreamFailure);
                        }
                    }
                }
            };
        };

        emit_terminal(&sink, &shared, &session_id, terminal).await;
        shared.mark_closed().await;
        sink.session_closed(&session_id).await;
    });

    handler
}

enum Terminal {
    Finished,
    Error(WorkerError),
}

async fn emit_terminal(
    sink: &Arc<dyn OutboundSink>,
    shared: &Arc<Shared>,
    session_id: &str,
    terminal: Terminal,
) {
    if !shared.claim_terminal() {
        return;
    }
    let body = match terminal {
        Terminal::Finished => receive_message::Body::Finished(Finished {}),
        Terminal::Error(e) => receive_message::Body::Error(ttsfleet_wire::WireError {
            message: e.client_message().to_string(),
        }),
    };
    sink.send_frame(ReceiveMessage {
        session: session_id.to_string(),
        body: Some(body),
    })
    .await;
}

/// RAII guard implementing "increment before model work starts, decrement
/// exactly once at termination" even when the run-task exits early.
struct SessionCounterGuard {
    health: Arc<HealthAgent>,
}

impl SessionCounterGuard {
    fn new(health: Arc<HealthAgent>) -> Self {
        health.add_session();
        Self { health }
    }
}

impl Drop for SessionCounterGuard {
    fn drop(&mut self) {
        self.health.remove_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockSessionModel;
    use std::sync::Mutex as StdMutex;

    struct CollectingSink {
        frames: StdMutex<Vec<ReceiveMessage>>,
    }

    #[async_trait::async_trait]
    impl OutboundSink for CollectingSink {
        async fn send_frame(&self, msg: ReceiveMessage) {
            self.frames.lock().unwrap().push(msg);
        }

        async fn session_closed(&self, _session_id: &str) {}
    }

    #[tokio::test]
    async fn local_session_happy_path_emits_finished_exactly_once() {
        let sink = Arc::new(CollectingSink {
            frames: StdMutex::new(Vec::new()),
        });
        let model: Arc<dyn SessionModel> = Arc::new(MockSessionModel::default());
        let health = Arc::new(HealthAgent::new(1, "http://w1".to_string(), None));

        let handler = spawn_local(
            "s1".to_string(),
            "tara".to_string(),
            model,
            health.clone(),
            sink.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        handler.push_text("hello there".to_string()).await;
        handler.eos().await;

        // Give the run task time to drain the mock model's audio and close.
        for _ in 0..50 {
            if handler.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(handler.is_closed());

        let frames = sink.frames.lock().unwrap();
        let finished_count = frames
            .iter()
            .filter(|f| matches!(f.body, Some(receive_message::Body::Finished(_))))
            .count();
        assert_eq!(finished_count, 1);
        assert!(frames
            .iter()
            .any(|f| matches!(f.body, Some(receive_message::Body::AudioData(_)))));
        assert_eq!(health.local_sessions(), 0);
    }

    #[tokio::test]
    async fn push_text_after_eos_is_discarded_without_error() {
        let sink = Arc::new(CollectingSink {
            frames: StdMutex::new(Vec::new()),
        });
        let model: Arc<dyn SessionModel> = Arc::new(MockSessionModel::default());
        let health = Arc::new(HealthAgent::new(1, "http://w1".to_string(), None));

        let handler = spawn_local(
            "s1".to_string(),
            "tara".to_string(),
            model,
            health,
            sink.clone(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        handler.eos().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        handler.push_text("too late".to_string()).await;

        for _ in 0..50 {
            if handler.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let frames = sink.frames.lock().unwrap();
        let errors: Vec<_> = frames
            .iter()
            .filter(|f| matches!(f.body, Some(receive_message::Body::Error(_))))
            .collect();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn input_inactivity_closes_with_error() {
        let sink = Arc::new(CollectingSink {
            frames: StdMutex::new(Vec::new()),
        });
        let model: Arc<dyn SessionModel> = Arc::new(MockSessionModel::default());
        let health = Arc::new(HealthAgent::new(1, "http://w1".to_string(), None));

        let handler = spawn_local(
            "s1".to_string(),
            "tara".to_string(),
            model,
            health,
            sink.clone(),
            Duration::from_millis(100),
            Duration::from_secs(30),
        );

        for _ in 0..100 {
            if handler.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0].body {
            Some(receive_message::Body::Error(e)) => assert_eq!(e.message, "Inactivity timeout"),
            other => panic!("expected Error frame, got {:?}", other),
        }
    }
}
