//! APT frame encoding and decoding.
//!
//! Every frame starts with a fixed 6-byte header:
//!
//! ```text
//! | msg id (u16 LE) | param1 | param2 | dest | source | payload ... |
//! ```
//!
//! When a data payload follows, bit 7 of `dest` is set and `param1`/`param2`
//! hold the payload length as a little-endian u16. Otherwise the two params are
//! command-specific scalars. There is no checksum or padding.

use crate::error::{AppResult, TcubeError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header length in bytes.
pub const HEADER_LEN: usize = 6;

/// Bit set in the destination byte when a data payload follows the header.
pub const DATA_FLAG: u8 = 0x80;

/// Write one frame verbatim.
///
/// `dest_byte` is written as given; callers building a data frame are expected
/// to have set [`DATA_FLAG`] and put the payload length in the params. Use
/// [`Frame::encode`] to get that for free.
pub fn encode(
    message_id: u16,
    param1: u8,
    param2: u8,
    dest_byte: u8,
    source_byte: u8,
    payload: Option<&[u8]>,
) -> Bytes {
    let payload = payload.unwrap_or_default();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16_le(message_id);
    buf.put_u8(param1);
    buf.put_u8(param2);
    buf.put_u8(dest_byte);
    buf.put_u8(source_byte);
    buf.put_slice(payload);
    buf.freeze()
}

fn payload_len(payload: &[u8]) -> AppResult<u16> {
    u16::try_from(payload.len()).map_err(|_| {
        TcubeError::MalformedFrame(format!("payload of {} bytes exceeds u16", payload.len()))
    })
}

/// One decoded or to-be-encoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message identifier
    pub message_id: u16,
    /// First header parameter (low length byte for data frames)
    pub param1: u8,
    /// Second header parameter (high length byte for data frames)
    pub param2: u8,
    /// Destination unit id, without [`DATA_FLAG`]
    pub destination: u8,
    /// Source (host) id
    pub source: u8,
    payload: Option<Bytes>,
    /// Bytes after the header that could not be attached as a payload
    pub trailing: Bytes,
}

impl Frame {
    /// A header-only frame carrying two scalar parameters.
    pub fn scalar(message_id: u16, param1: u8, param2: u8, destination: u8, source: u8) -> Self {
        Self {
            message_id,
            param1,
            param2,
            destination: destination & !DATA_FLAG,
            source,
            payload: None,
            trailing: Bytes::new(),
        }
    }

    /// A frame with a data payload; the header params become its length.
    pub fn with_data(
        message_id: u16,
        destination: u8,
        source: u8,
        payload: impl Into<Bytes>,
    ) -> AppResult<Self> {
        let payload = payload.into();
        let [param1, param2] = payload_len(&payload)?.to_le_bytes();
        Ok(Self {
            message_id,
            param1,
            param2,
            destination: destination & !DATA_FLAG,
            source,
            payload: Some(payload),
            trailing: Bytes::new(),
        })
    }

    /// Data payload, present only when the header announced one and it arrived whole.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Attach a payload and rewrite the params to its length.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) -> AppResult<()> {
        let payload = payload.into();
        let [param1, param2] = payload_len(&payload)?.to_le_bytes();
        self.param1 = param1;
        self.param2 = param2;
        self.payload = Some(payload);
        Ok(())
    }

    /// Whether a data payload is attached.
    pub fn has_data(&self) -> bool {
        self.payload.is_some()
    }

    /// Destination byte as it appears on the wire.
    pub fn dest_byte(&self) -> u8 {
        if self.has_data() {
            self.destination | DATA_FLAG
        } else {
            self.destination
        }
    }

    /// Encoded length (header + payload). `trailing` is not counted.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Always false: a frame has at least a header.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serialize to wire bytes.
    ///
    /// A data frame always announces its payload length in the params,
    /// whatever `param1`/`param2` hold. `trailing` is not written.
    pub fn encode(&self) -> Bytes {
        let (param1, param2) = match &self.payload {
            // length fits: set_payload, with_data and decode all checked it
            Some(payload) => {
                let [lo, hi] = (payload.len() as u16).to_le_bytes();
                (lo, hi)
            }
            None => (self.param1, self.param2),
        };
        encode(
            self.message_id,
            param1,
            param2,
            self.dest_byte(),
            self.source,
            self.payload.as_deref(),
        )
    }

    /// Parse raw bytes.
    ///
    /// Fails with [`TcubeError::MalformedFrame`] on fewer than 6 bytes. When the
    /// header announces a payload and exactly that many bytes follow, they are
    /// attached as `payload`; anything else after the header is kept in
    /// `trailing` for the caller to interpret.
    pub fn decode(raw: &[u8]) -> AppResult<Self> {
        if raw.len() < HEADER_LEN {
            return Err(TcubeError::MalformedFrame(format!(
                "{} bytes is shorter than the {HEADER_LEN}-byte header",
                raw.len()
            )));
        }

        let mut buf = raw;
        let message_id = buf.get_u16_le();
        let param1 = buf.get_u8();
        let param2 = buf.get_u8();
        let dest_byte = buf.get_u8();
        let source = buf.get_u8();
        let rest = Bytes::copy_from_slice(buf);

        let announced = usize::from(u16::from_le_bytes([param1, param2]));
        let (payload, trailing) = if dest_byte & DATA_FLAG != 0 && rest.len() == announced {
            (Some(rest), Bytes::new())
        } else {
            (None, rest)
        };

        Ok(Self {
            message_id,
            param1,
            param2,
            destination: dest_byte & !DATA_FLAG,
            source,
            payload,
            trailing,
        })
    }
}
