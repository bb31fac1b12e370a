//! Encode/decode helpers for the two tagged-union wire messages.
//!
//! Each WebSocket binary message carries exactly one `SendMessage` or
//! `ReceiveMessage`; the transport already delimits frames, so these are
//! thin wrappers over `prost::Message::encode`/`decode` rather than a
//! length-delimited stream codec.

use bytes::Bytes;
use prost::Message;

use crate::{ReceiveMessage, SendMessage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub fn encode_send_message(msg: &SendMessage) -> Bytes {
    msg.encode_to_vec().into()
}

pub fn decode_send_message(bytes: &[u8]) -> Result<SendMessage, FrameError> {
    Ok(SendMessage::decode(bytes)?)
}

pub fn encode_receive_message(msg: &ReceiveMessage) -> Bytes {
    msg.encode_to_vec().into()
}

pub fn decode_receive_message(bytes: &[u8]) -> Result<ReceiveMessage, FrameError> {
    Ok(ReceiveMessage::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{send_message, StartSession};

    #[test]
    fn round_trips_start_session() {
        let msg = SendMessage {
            session: "s1".to_string(),
            body: Some(send_message::Body::StartSession(StartSession {
                voice: "tara".to_string(),
            })),
        };
        let bytes = encode_send_message(&msg);
        let decoded = decode_send_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_send_message(&[0xff, 0xff, 0xff]).is_err());
    }
}
