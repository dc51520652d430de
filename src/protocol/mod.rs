//! Event protocol shared by the orchestrator and the stream consumer.

pub mod codec;
pub mod frame;

pub use codec::{decode_line, encode_frame, frame_payload, FrameDecoder, DONE_MARKER};
pub use frame::*;
