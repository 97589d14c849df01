//! NDJSON framing for the control-plane stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! so a misbehaving peer cannot make the reader allocate without bound.
//! Used as the decoder of the dispatcher's [`FramedRead`](tokio_util::codec::FramedRead);
//! outbound frames are written by the writer task directly.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line decoder for inbound control-plane messages.
///
/// Lines longer than [`MAX_LINE_BYTES`] decode to
/// [`AppError::Codec`]`("line too long: …")`; the codec then discards the
/// rest of that line and resumes at the next newline. I/O failures map to
/// [`AppError::Io`].
#[derive(Debug)]
pub struct ApiCodec(LinesCodec);

impl ApiCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }
}

impl Default for ApiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ApiCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Codec("line too long: exceeded max line length".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
