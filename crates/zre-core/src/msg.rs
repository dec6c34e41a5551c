//! ZRE protocol messages. Seven kinds travel between node inboxes.
//!
//! A message travels as one transport message made of one or more frames.
//! The first frame starts with the 2-byte signature `0xAAA1` and the 1-byte
//! kind, followed by the kind's fields. WHISPER and SHOUT carry their
//! content as a second, opaque frame.
//!
//! Encoding conventions (all numbers big-endian):
//!   number 1 / number 2   u8 / u16
//!   string                u8 length + bytes, at most 255 bytes
//!   strings               u8 count + that many strings
//!   dictionary            u8 count + that many `key=value` strings

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Protocol signature in front of every message frame.
pub const SIGNATURE: u16 = 0xAAA0 | 1;

/// Longest string the 1-byte length prefix can describe.
pub const MAX_STRING: usize = u8::MAX as usize;

/// Most entries a 1-byte count can describe.
pub const MAX_ENTRIES: usize = u8::MAX as usize;

// ── Kinds ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Hello = 1,
    Whisper = 2,
    Shout = 3,
    Join = 4,
    Leave = 5,
    Ping = 6,
    PingOk = 7,
}

impl MessageKind {
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Hello => "HELLO",
            MessageKind::Whisper => "WHISPER",
            MessageKind::Shout => "SHOUT",
            MessageKind::Join => "JOIN",
            MessageKind::Leave => "LEAVE",
            MessageKind::Ping => "PING",
            MessageKind::PingOk => "PING_OK",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageKind::Hello),
            2 => Ok(MessageKind::Whisper),
            3 => Ok(MessageKind::Shout),
            4 => Ok(MessageKind::Join),
            5 => Ok(MessageKind::Leave),
            6 => Ok(MessageKind::Ping),
            7 => Ok(MessageKind::PingOk),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// One protocol message. Each variant holds exactly the fields its kind
/// carries on the wire.
///
/// `sequence` is assigned by the sending peer connection at send time; the
/// value set by the caller is overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// First message on every new connection: who we are and what we're in.
    Hello {
        sequence: u16,
        ipaddress: String,
        mailbox: u16,
        groups: Vec<String>,
        status: u8,
        headers: BTreeMap<String, String>,
    },
    /// Unicast payload.
    Whisper { sequence: u16, content: Bytes },
    /// Payload for every member of `group`.
    Shout {
        sequence: u16,
        group: String,
        content: Bytes,
    },
    /// Sender joined `group`; `status` is its new change counter.
    Join {
        sequence: u16,
        group: String,
        status: u8,
    },
    /// Sender left `group`; `status` is its new change counter.
    Leave {
        sequence: u16,
        group: String,
        status: u8,
    },
    /// Liveness check for a peer that has gone quiet.
    Ping { sequence: u16 },
    /// Reply to a PING.
    PingOk { sequence: u16 },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello { .. } => MessageKind::Hello,
            Message::Whisper { .. } => MessageKind::Whisper,
            Message::Shout { .. } => MessageKind::Shout,
            Message::Join { .. } => MessageKind::Join,
            Message::Leave { .. } => MessageKind::Leave,
            Message::Ping { .. } => MessageKind::Ping,
            Message::PingOk { .. } => MessageKind::PingOk,
        }
    }

    pub fn sequence(&self) -> u16 {
        match self {
            Message::Hello { sequence, .. }
            | Message::Whisper { sequence, .. }
            | Message::Shout { sequence, .. }
            | Message::Join { sequence, .. }
            | Message::Leave { sequence, .. }
            | Message::Ping { sequence }
            | Message::PingOk { sequence } => *sequence,
        }
    }

    pub fn set_sequence(&mut self, value: u16) {
        match self {
            Message::Hello { sequence, .. }
            | Message::Whisper { sequence, .. }
            | Message::Shout { sequence, .. }
            | Message::Join { sequence, .. }
            | Message::Leave { sequence, .. }
            | Message::Ping { sequence }
            | Message::PingOk { sequence } => *sequence = value,
        }
    }

    /// Serialize into transport frames: the message frame, plus the content
    /// frame for WHISPER and SHOUT.
    pub fn encode(&self) -> Result<Vec<Bytes>, EncodeError> {
        let mut out = BytesMut::with_capacity(64);
        out.put_u16(SIGNATURE);
        out.put_u8(self.kind().into());

        let content = match self {
            Message::Hello {
                sequence,
                ipaddress,
                mailbox,
                groups,
                status,
                headers,
            } => {
                out.put_u16(*sequence);
                put_string(&mut out, ipaddress)?;
                out.put_u16(*mailbox);
                put_count(&mut out, groups.len())?;
                for group in groups {
                    put_string(&mut out, group)?;
                }
                out.put_u8(*status);
                put_count(&mut out, headers.len())?;
                for (key, value) in headers {
                    if key.contains('=') {
                        return Err(EncodeError::HeaderKey(key.clone()));
                    }
                    put_string(&mut out, &format!("{key}={value}"))?;
                }
                None
            }
            Message::Whisper { sequence, content } => {
                out.put_u16(*sequence);
                Some(content.clone())
            }
            Message::Shout {
                sequence,
                group,
                content,
            } => {
                out.put_u16(*sequence);
                put_string(&mut out, group)?;
                Some(content.clone())
            }
            Message::Join {
                sequence,
                group,
                status,
            }
            | Message::Leave {
                sequence,
                group,
                status,
            } => {
                out.put_u16(*sequence);
                put_string(&mut out, group)?;
                out.put_u8(*status);
                None
            }
            Message::Ping { sequence } | Message::PingOk { sequence } => {
                out.put_u16(*sequence);
                None
            }
        };

        let mut frames = vec![out.freeze()];
        frames.extend(content);
        Ok(frames)
    }

    /// Parse one transport message.
    ///
    /// A transport message whose first frame lacks the protocol signature is
    /// foreign traffic: the whole message is discarded and `Ok(None)`
    /// returned, so none of its later frames reach the field parser.
    pub fn decode(frames: &[Bytes]) -> Result<Option<Message>, DecodeError> {
        let mut frames = frames.iter();
        let mut buf = match frames.next() {
            Some(frame)
                if frame.len() >= 2 && u16::from_be_bytes([frame[0], frame[1]]) == SIGNATURE =>
            {
                frame.slice(2..)
            }
            _ => return Ok(None),
        };

        let kind = MessageKind::try_from(get_u8(&mut buf)?)?;
        let message = match kind {
            MessageKind::Hello => {
                let sequence = get_u16(&mut buf)?;
                let ipaddress = get_string(&mut buf)?;
                let mailbox = get_u16(&mut buf)?;
                let group_count = get_u8(&mut buf)?;
                let mut groups = Vec::with_capacity(group_count as usize);
                for _ in 0..group_count {
                    groups.push(get_string(&mut buf)?);
                }
                let status = get_u8(&mut buf)?;
                let header_count = get_u8(&mut buf)?;
                let mut headers = BTreeMap::new();
                for _ in 0..header_count {
                    let entry = get_string(&mut buf)?;
                    let (key, value) = entry
                        .split_once('=')
                        .ok_or_else(|| DecodeError::HeaderEntry(entry.clone()))?;
                    headers.insert(key.to_string(), value.to_string());
                }
                Message::Hello {
                    sequence,
                    ipaddress,
                    mailbox,
                    groups,
                    status,
                    headers,
                }
            }
            MessageKind::Whisper => {
                let sequence = get_u16(&mut buf)?;
                let content = frames.next().cloned().ok_or(DecodeError::MissingContent)?;
                Message::Whisper { sequence, content }
            }
            MessageKind::Shout => {
                let sequence = get_u16(&mut buf)?;
                let group = get_string(&mut buf)?;
                let content = frames.next().cloned().ok_or(DecodeError::MissingContent)?;
                Message::Shout {
                    sequence,
                    group,
                    content,
                }
            }
            MessageKind::Join => Message::Join {
                sequence: get_u16(&mut buf)?,
                group: get_string(&mut buf)?,
                status: get_u8(&mut buf)?,
            },
            MessageKind::Leave => Message::Leave {
                sequence: get_u16(&mut buf)?,
                group: get_string(&mut buf)?,
                status: get_u8(&mut buf)?,
            },
            MessageKind::Ping => Message::Ping {
                sequence: get_u16(&mut buf)?,
            },
            MessageKind::PingOk => Message::PingOk {
                sequence: get_u16(&mut buf)?,
            },
        };
        Ok(Some(message))
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn put_string(out: &mut BytesMut, value: &str) -> Result<(), EncodeError> {
    if value.len() > MAX_STRING {
        return Err(EncodeError::StringTooLong(value.len()));
    }
    out.put_u8(value.len() as u8);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn put_count(out: &mut BytesMut, count: usize) -> Result<(), EncodeError> {
    if count > MAX_ENTRIES {
        return Err(EncodeError::TooManyEntries(count));
    }
    out.put_u8(count as u8);
    Ok(())
}

fn get_u8(buf: &mut Bytes) -> Result<u8, DecodeError> {
    if buf.remaining() < 1 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u16())
}

fn get_string(buf: &mut Bytes) -> Result<String, DecodeError> {
    let len = get_u8(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("string of {0} bytes exceeds {MAX_STRING}")]
    StringTooLong(usize),

    #[error("{0} entries exceed {MAX_ENTRIES}")]
    TooManyEntries(usize),

    #[error("header key {0:?} contains '='")]
    HeaderKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message truncated")]
    Truncated,

    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("content frame missing")]
    MissingContent,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("header entry {0:?} has no '='")]
    HeaderEntry(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
