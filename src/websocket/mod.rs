//! WebSocket support (RFC 6455 base framing subset).
//!
//! - **`frame`**: decoding masked client frames and encoding unmasked server frames
//! - **`handshake`**: the `Sec-WebSocket-Accept` computation for the upgrade response

pub mod frame;
pub mod handshake;

pub use frame::{decode_frame, encode_text_frame, Frame, FrameError, OpCode};
pub use handshake::compute_accept;
