//! WebSocket base framing: single, unfragmented frames only.

/// Smallest buffer that can hold a masked client frame header.
const MIN_FRAME_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            other => OpCode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(v) => v & 0x0F,
        }
    }
}

/// A decoded client frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub mask_key: [u8; 4],
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("client frame is not masked")]
    Unmasked,
    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    TooLarge { len: u64, max: usize },
}

/// Decodes one client frame from the front of `buf`.
///
/// `Ok(None)` means the buffer does not yet hold a whole frame; the caller
/// keeps the bytes and waits for more. On success the number of bytes the
/// frame occupied is returned alongside it.
pub fn decode_frame(buf: &[u8], max_len: usize) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < MIN_FRAME_LEN {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = OpCode::from_u8(buf[0]);
    let masked = buf[1] & 0x80 != 0;
    let mut pos = 2;

    let payload_len = match buf[1] & 0x7F {
        126 => {
            if buf.len() < pos + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
            pos += 2;
            len
        }
        127 => {
            if buf.len() < pos + 8 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[pos..pos + 8]);
            pos += 8;
            u64::from_be_bytes(raw)
        }
        short => short as u64,
    };

    if !masked {
        return Err(FrameError::Unmasked);
    }
    if payload_len > max_len as u64 {
        return Err(FrameError::TooLarge { len: payload_len, max: max_len });
    }
    let payload_len = payload_len as usize;

    if buf.len() < pos + 4 + payload_len {
        return Ok(None);
    }

    let mut mask_key = [0u8; 4];
    mask_key.copy_from_slice(&buf[pos..pos + 4]);
    pos += 4;

    let mut payload = buf[pos..pos + payload_len].to_vec();
    apply_mask(&mut payload, mask_key);
    pos += payload_len;

    Ok(Some((
        Frame {
            fin,
            opcode,
            masked,
            mask_key,
            payload,
        },
        pos,
    )))
}

/// XORs `payload` in place with the rotating four byte key.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Builds an unmasked server frame with FIN set.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 10);

    frame.push(0x80 | opcode.as_u8());

    if len <= 125 {
        frame.push(len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

/// Builds the single text frame used for chat broadcasts (`0x81 ...`).
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(OpCode::Text, payload)
}
