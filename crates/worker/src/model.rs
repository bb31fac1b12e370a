//! The TTS inference engine, treated as an opaque collaborator.
//!
//! Only the interface is specified here: `create_session`, `push_text`,
//! `end_of_stream`, and an audio-frame producer. Tokenization, silence
//! trimming, and prompt-window management belong to the real model and
//! are never implemented in this crate.

use tokio::sync::mpsc;

/// One produced chunk of synthesized audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub channel_count: u32,
}

/// A running model session. Dropping it MUST NOT be relied on to flush
/// state; callers call [`ModelSession::end_of_stream`] explicitly.
pub trait ModelSession: Send {
    fn push_text(&mut self, text: &str);
    fn end_of_stream(&mut self);
}

/// Factory for model sessions, owned by the worker and passed explicitly
/// into session handler construction (never stored as ambient state).
pub trait SessionModel: Send + Sync {
    /// Opens a session bound to `session_id`/`voice`. Returns the
    /// controllable handle plus the channel the model will push produced
    /// audio chunks onto; the channel closes when synthesis is done.
    fn create_session(
        &self,
        session_id: &str,
        voice: &str,
    ) -> (Box<dyn ModelSession>, mpsc::Receiver<AudioChunk>);
}

/// Deterministic stand-in used by tests and the demo binary: emits one
/// silence chunk per pushed text fragment, then closes the producer
/// channel on `end_of_stream`.
pub struct MockSessionModel {
    pub sample_rate: u32,
    pub chunk_len_bytes: usize,
    /// `model_directory` (spec.md §6) plumbed through from `Config` as far
    /// as `SessionModel` construction; the real model would load weights
    /// from it, but this mock never reads it.
    pub model_directory: String,
}

impl MockSessionModel {
    pub fn new(model_directory: String) -> Self {
        Self {
            model_directory,
            ..Self::default()
        }
    }
}

impl Default for MockSessionModel {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            chunk_len_bytes: 480,
            model_directory: String::new(),
        }
    }
}

struct MockModelSession {
    tx: Option<mpsc::Sender<AudioChunk>>,
    sample_rate: u32,
    chunk_len_bytes: usize,
}

impl ModelSession for MockModelSession {
    fn push_text(&mut self, text: &str) {
        let Some(tx) = self.tx.clone() else {
            return;
        };
        let chunks = text.split_whitespace().count().max(1);
        let sample_rate = self.sample_rate;
        let chunk_len_bytes = self.chunk_len_bytes;
        tokio::spawn(async move {
            for _ in 0..chunks {
                let chunk = AudioChunk {
                    audio: vec![0u8; chunk_len_bytes],
                    sample_rate,
                    channel_count: 1,
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
    }

    fn end_of_stream(&mut self) {
        // Dropping our clone lets the producer channel close once every
        // in-flight `push_text` task has drained its own clone.
        self.tx = None;
    }
}

impl SessionModel for MockSessionModel {
    fn create_session(
        &self,
        _session_id: &str,
        _voice: &str,
    ) -> (Box<dyn ModelSession>, mpsc::Receiver<AudioChunk>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Box::new(MockModelSession {
                tx: Some(tx),
                sample_rate: self.sample_rate,
                chunk_len_bytes: self.chunk_len_bytes,
            }),
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_model_emits_a_chunk_per_word() {
        let model = MockSessionModel::default();
        let (mut session, mut rx) = model.create_session("s1", "tara");
        session.push_text("hello world");
        let mut received = 0;
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.sample_rate, 24_000);
            assert_eq!(chunk.channel_count, 1);
            received += 1;
            if received == 2 {
                break;
            }
        }
        assert_eq!(received, 2);
    }
}
