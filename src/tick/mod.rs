//! Normalized tick model and wire decoding
//!
//! Upstream sends the same logical feed message in two encodings: verbose
//! JSON text frames and compact MessagePack binary frames. Both decode into
//! the same [`FeedEnvelope`] / [`Tick`] shapes so nothing downstream needs to
//! know which wire format was used.

mod decoder;
mod types;

pub use decoder::{decode_frame, DecodeError, FeedEnvelope, WireFrame};
pub use types::{DepthLevel, Greeks, Tick};
