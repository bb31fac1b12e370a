//! Wire schema and frame codec for the worker/controller protocol.
//!
//! Message definitions live in `proto/tts.proto` and `proto/health.proto`
//! and are compiled by `build.rs` into `src/generated`. Field numbers are
//! fixed in the `.proto` sources; both the public client hop and the
//! internal peer-forwarding hop use the identical schema, so a worker can
//! pipe frames between the two without re-encoding.

mod generated {
    include!("generated/ttsfleet.tts.rs");
    include!("generated/ttsfleet.health.rs");
}

pub use generated::{
    send_message, receive_message, AudioData, AudioType, Error as WireError, Eos, Finished,
    GetServerHealthResponse, PushText, ReceiveMessage, SendMessage, ServerHealth, StartSession,
};

pub mod frame;
pub mod health_json;

pub use frame::{decode_receive_message, decode_send_message, encode_receive_message,
    encode_send_message, FrameError};
pub use health_json::{PeerHealth, WorkerReport};
