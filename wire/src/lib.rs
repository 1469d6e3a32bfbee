//! Frame format spoken between a forwarding secondary and the master.
//!
//! A frame is a 4-byte little-endian signed payload length followed by the
//! UTF-8 payload (arguments joined by `\n`). The master answers a complete
//! frame with exactly [`ACK`].

use thiserror::Error;

/// Acknowledgement token written by the master once a frame is complete.
pub const ACK: &[u8; 3] = b"ACK";

pub const SPLIT_CHAR: char = '\n';
pub const LEN_PREFIX_BYTES: usize = 4;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {0} bytes does not fit the length prefix")]
    TooLarge(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("short length prefix: got {0} of 4 bytes")]
    ShortPrefix(usize),
    #[error("negative payload length {0}")]
    NegativeLength(i32),
    #[error("payload length {declared} exceeds limit {limit}")]
    TooLarge { declared: usize, limit: usize },
    #[error("frame truncated: declared {declared} payload bytes, got {available}")]
    Truncated { declared: usize, available: usize },
    #[error("payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Encode an argument vector into a single length-prefixed frame.
///
/// Arguments that themselves contain `\n` come out split on the other end;
/// the newline is the only separator this format has. For the same reason an
/// empty sequence and `[""]` share one frame, which decodes to `[""]`.
pub fn encode<S: AsRef<str>>(args: &[S]) -> Result<Vec<u8>, EncodeError> {
    let mut payload = String::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            payload.push(SPLIT_CHAR);
        }
        payload.push_str(a.as_ref());
    }
    let prefix = length_prefix(payload.len())?;
    let mut out = Vec::with_capacity(LEN_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(payload.as_bytes());
    Ok(out)
}

fn length_prefix(len: usize) -> Result<[u8; LEN_PREFIX_BYTES], EncodeError> {
    let len = i32::try_from(len).map_err(|_| EncodeError::TooLarge(len))?;
    Ok(len.to_le_bytes())
}

/// Decode one complete frame.
///
/// Bytes past the declared payload length are ignored.
pub fn decode(frame: &[u8]) -> Result<Vec<String>, DecodeError> {
    let declared = read_len(frame, usize::MAX)?;
    let payload = &frame[LEN_PREFIX_BYTES..];
    if payload.len() < declared {
        return Err(DecodeError::Truncated {
            declared,
            available: payload.len(),
        });
    }
    split_payload(&payload[..declared])
}

pub fn is_ack(reply: &[u8]) -> bool {
    reply.len() >= ACK.len() && &reply[..ACK.len()] == ACK
}

fn read_len(b: &[u8], limit: usize) -> Result<usize, DecodeError> {
    if b.len() < LEN_PREFIX_BYTES {
        return Err(DecodeError::ShortPrefix(b.len()));
    }
    let mut raw = [0u8; LEN_PREFIX_BYTES];
    raw.copy_from_slice(&b[..LEN_PREFIX_BYTES]);
    let len = i32::from_le_bytes(raw);
    if len < 0 {
        return Err(DecodeError::NegativeLength(len));
    }
    let declared = len as usize;
    if declared > limit {
        return Err(DecodeError::TooLarge { declared, limit });
    }
    Ok(declared)
}

fn split_payload(payload: &[u8]) -> Result<Vec<String>, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(text.split(SPLIT_CHAR).map(str::to_string).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    AwaitingLength,
    AwaitingPayload { declared: usize },
    Delivered,
}

/// Incremental decoder for one connection.
///
/// Feed it whatever the socket produced; it returns the arguments once the
/// declared payload has fully arrived. Nothing is ever waited on here, so a
/// peer that declares more than it sends simply never completes.
#[derive(Debug)]
pub struct FrameDecoder {
    state: FrameState,
    max_payload: usize,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: FrameState::AwaitingLength,
            max_payload,
            buf: Vec::new(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Bytes buffered so far (length prefix included until it is parsed).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<Vec<String>>, DecodeError> {
        if self.state == FrameState::Delivered {
            return Ok(None);
        }
        self.buf.extend_from_slice(bytes);

        if self.state == FrameState::AwaitingLength {
            if self.buf.len() < LEN_PREFIX_BYTES {
                return Ok(None);
            }
            let declared = read_len(&self.buf, self.max_payload)?;
            self.buf.drain(..LEN_PREFIX_BYTES);
            self.state = FrameState::AwaitingPayload { declared };
        }

        match self.state {
            FrameState::AwaitingPayload { declared } if self.buf.len() >= declared => {
                let args = split_payload(&self.buf[..declared])?;
                self.buf.clear();
                self.state = FrameState::Delivered;
                Ok(Some(args))
            }
            _ => Ok(None),
        }
    }

    /// What was missing if the peer went away now; `None` once delivered.
    pub fn incomplete(&self) -> Option<DecodeError> {
        match self.state {
            FrameState::AwaitingLength => Some(DecodeError::ShortPrefix(self.buf.len())),
            FrameState::AwaitingPayload { declared } => Some(DecodeError::Truncated {
                declared,
                available: self.buf.len(),
            }),
            FrameState::Delivered => None,
        }
    }
}
