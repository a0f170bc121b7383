//! Satchel wire format — the textual command frames carried in UDP datagrams.
//!
//! Every datagram holds exactly one frame: an ASCII command token, zero or
//! more colon-delimited header fields, and for attachment chunks a trailing
//! raw byte payload. The final header field of every command absorbs the
//! remainder of the datagram, so free text (email bodies) may legally
//! contain the delimiter.
//!
//! The attachment frame carries a declared payload length:
//!
//! ```text
//! SEND_EMAIL_WITH_ATTACHMENT:<from>:<to>:<file>:<index>:<count>:<len>:<body><payload>
//! ```
//!
//! The payload is the trailing `<len>` bytes of the datagram and the body is
//! the residual span between the seventh delimiter and the payload. The
//! payload boundary is computed from the declared length alone, never from
//! re-derived string lengths, so bodies with delimiters or multibyte text
//! cannot shift it.

use bytes::Bytes;

/// Header field delimiter.
pub const DELIMITER: u8 = b':';

/// Receive buffer size of the reference deployment. Senders chunking
/// attachments must keep each frame within this ceiling.
pub const MAX_DATAGRAM: usize = 1024;

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 12345;

// ── Frames ────────────────────────────────────────────────────────────────────

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Presence announcement. No fields, no reply.
    Connect,
    /// Presence withdrawal. No fields, no reply.
    Disconnect,
    /// Register a mailbox. Replied to in text.
    CreateAccount { account: String },
    /// Append a text message to the recipient's mailbox. The body is the
    /// final field and may contain the delimiter. No reply.
    SendEmail {
        from: String,
        to: String,
        body: String,
    },
    /// One chunk of a file attachment. No reply.
    Attachment(AttachmentFrame),
    /// List the mailbox's file names. Replied to in text.
    Login { account: String },
    /// Fetch a stored file. Replied to with the raw file bytes.
    Download { account: String, file_name: String },
    /// Anything else. Replied to with "Unknown command".
    Unknown { token: String },
}

/// The attachment chunk frame — the only frame with a binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFrame {
    pub from: String,
    pub to: String,
    pub file_name: String,
    /// Zero-based position of this chunk. Must be < `chunk_count`.
    pub chunk_index: u32,
    /// Total chunks in the transfer, declared identically by every chunk.
    pub chunk_count: u32,
    /// Email body. Carried by every chunk, persisted once per transfer.
    pub body: String,
    pub payload: Bytes,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Decoding and encoding failures. Every decode variant is a "malformed
/// frame" to the server: the datagram is dropped and logged, no reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty datagram")]
    Empty,

    #[error("header is not valid UTF-8")]
    BadText,

    #[error("{command} requires {expected} fields, got {found}")]
    MissingFields {
        command: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} is not a non-negative integer: {value:?}")]
    BadNumber {
        field: &'static str,
        value: String,
    },

    #[error("declared payload length {declared} exceeds the {available} bytes present")]
    PayloadOverrun { declared: usize, available: usize },

    #[error("{field} contains the delimiter")]
    DelimiterInField { field: &'static str },

    #[error("header leaves no payload room in a {max} byte datagram")]
    HeaderTooLarge { max: usize },
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode one datagram into a frame.
pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.is_empty() {
        return Err(FrameError::Empty);
    }

    let (token, rest) = match raw.iter().position(|&b| b == DELIMITER) {
        Some(i) => (&raw[..i], Some(&raw[i + 1..])),
        None => (raw, None),
    };
    let token = text(token)?;

    match (token, rest) {
        ("CONNECT", None) => Ok(Frame::Connect),
        ("DISCONNECT", None) => Ok(Frame::Disconnect),
        ("CREATE_ACCOUNT", Some(rest)) => {
            let [account] = fields::<1>("CREATE_ACCOUNT", rest)?;
            Ok(Frame::CreateAccount {
                account: name("accountName", account)?,
            })
        }
        ("SEND_EMAIL", Some(rest)) => {
            let [from, to, body] = fields::<3>("SEND_EMAIL", rest)?;
            Ok(Frame::SendEmail {
                from: name("from", from)?,
                to: name("to", to)?,
                body: text(body)?.to_string(),
            })
        }
        ("SEND_EMAIL_WITH_ATTACHMENT", Some(rest)) => decode_attachment(rest),
        ("LOGIN", Some(rest)) => {
            let [account] = fields::<1>("LOGIN", rest)?;
            Ok(Frame::Login {
                account: name("accountName", account)?,
            })
        }
        ("DOWNLOAD_FILE", Some(rest)) => {
            let [account, file_name] = fields::<2>("DOWNLOAD_FILE", rest)?;
            Ok(Frame::Download {
                account: name("accountName", account)?,
                file_name: name("fileName", file_name)?,
            })
        }
        // A recognised token with unexpected trailing fields lands here too,
        // matching the original server's exact-match handling of CONNECT.
        _ => Ok(Frame::Unknown {
            token: token.to_string(),
        }),
    }
}

fn decode_attachment(rest: &[u8]) -> Result<Frame, FrameError> {
    const CMD: &str = "SEND_EMAIL_WITH_ATTACHMENT";
    let [from, to, file_name, index, count, len, tail] = fields::<7>(CMD, rest)?;

    let chunk_index = number::<u32>("chunkIndex", index)?;
    let chunk_count = number::<u32>("chunkCount", count)?;
    let payload_len = number::<usize>("payloadLen", len)?;

    if payload_len > tail.len() {
        return Err(FrameError::PayloadOverrun {
            declared: payload_len,
            available: tail.len(),
        });
    }
    let split = tail.len() - payload_len;

    Ok(Frame::Attachment(AttachmentFrame {
        from: name("from", from)?,
        to: name("to", to)?,
        file_name: name("fileName", file_name)?,
        chunk_index,
        chunk_count,
        body: text(&tail[..split])?.to_string(),
        payload: Bytes::copy_from_slice(&tail[split..]),
    }))
}

/// Split `rest` on the delimiter into exactly N fields. The last field
/// absorbs the remainder of the input byte-for-byte.
fn fields<'a, const N: usize>(
    command: &'static str,
    rest: &'a [u8],
) -> Result<[&'a [u8]; N], FrameError> {
    let mut out = [&rest[..0]; N];
    let mut span = rest;
    for (i, slot) in out.iter_mut().enumerate().take(N - 1) {
        let pos = span.iter().position(|&b| b == DELIMITER).ok_or(
            FrameError::MissingFields {
                command,
                expected: N,
                found: i + 1,
            },
        )?;
        *slot = &span[..pos];
        span = &span[pos + 1..];
    }
    out[N - 1] = span;
    Ok(out)
}

fn text(raw: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(raw).map_err(|_| FrameError::BadText)
}

/// A structural field: non-empty UTF-8 text.
fn name(field: &'static str, raw: &[u8]) -> Result<String, FrameError> {
    let value = text(raw)?;
    if value.is_empty() {
        return Err(FrameError::EmptyField { field });
    }
    Ok(value.to_string())
}

fn number<T: std::str::FromStr>(field: &'static str, raw: &[u8]) -> Result<T, FrameError> {
    let value = text(raw)?;
    value.parse().map_err(|_| FrameError::BadNumber {
        field,
        value: value.to_string(),
    })
}

// ── Encoding ──────────────────────────────────────────────────────────────────

impl Frame {
    /// Serialize for transmission. The inverse of [`decode`].
    ///
    /// Fails when a structural field is empty or contains the delimiter;
    /// those would decode to a different frame on the far side.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        match self {
            Frame::Connect => Ok(Bytes::from_static(b"CONNECT")),
            Frame::Disconnect => Ok(Bytes::from_static(b"DISCONNECT")),
            Frame::CreateAccount { account } => {
                structural("accountName", account)?;
                Ok(Bytes::from(format!("CREATE_ACCOUNT:{account}")))
            }
            Frame::SendEmail { from, to, body } => {
                structural("from", from)?;
                structural("to", to)?;
                Ok(Bytes::from(format!("SEND_EMAIL:{from}:{to}:{body}")))
            }
            Frame::Attachment(a) => {
                structural("from", &a.from)?;
                structural("to", &a.to)?;
                structural("fileName", &a.file_name)?;
                let header = format!(
                    "SEND_EMAIL_WITH_ATTACHMENT:{}:{}:{}:{}:{}:{}:",
                    a.from,
                    a.to,
                    a.file_name,
                    a.chunk_index,
                    a.chunk_count,
                    a.payload.len(),
                );
                let mut buf =
                    Vec::with_capacity(header.len() + a.body.len() + a.payload.len());
                buf.extend_from_slice(header.as_bytes());
                buf.extend_from_slice(a.body.as_bytes());
                buf.extend_from_slice(&a.payload);
                Ok(Bytes::from(buf))
            }
            Frame::Login { account } => {
                structural("accountName", account)?;
                Ok(Bytes::from(format!("LOGIN:{account}")))
            }
            Frame::Download { account, file_name } => {
                structural("accountName", account)?;
                structural("fileName", file_name)?;
                Ok(Bytes::from(format!("DOWNLOAD_FILE:{account}:{file_name}")))
            }
            Frame::Unknown { token } => Ok(Bytes::from(token.clone())),
        }
    }
}

fn structural(field: &'static str, value: &str) -> Result<(), FrameError> {
    if value.is_empty() {
        return Err(FrameError::EmptyField { field });
    }
    if value.bytes().any(|b| b == DELIMITER) {
        return Err(FrameError::DelimiterInField { field });
    }
    Ok(())
}

// ── Sender-side chunking ──────────────────────────────────────────────────────

/// Split `data` into encoded attachment frames, each within `max_datagram`.
///
/// The chunk payload size is the datagram ceiling minus a worst-case header
/// estimate (ten digits for each numeric field). An empty file still
/// produces one frame with an empty payload so the transfer completes.
pub fn attachment_frames(
    from: &str,
    to: &str,
    body: &str,
    file_name: &str,
    data: &[u8],
    max_datagram: usize,
) -> Result<Vec<Bytes>, FrameError> {
    const NUMERIC_HEADROOM: usize = 3 * 10;
    let overhead = "SEND_EMAIL_WITH_ATTACHMENT".len()
        + 7
        + from.len()
        + to.len()
        + file_name.len()
        + body.len()
        + NUMERIC_HEADROOM;
    let chunk_size = max_datagram
        .checked_sub(overhead)
        .filter(|&n| n > 0)
        .ok_or(FrameError::HeaderTooLarge { max: max_datagram })?;

    let chunk_count = data.len().div_ceil(chunk_size).max(1) as u32;
    let mut frames = Vec::with_capacity(chunk_count as usize);

    let frame = |index: u32, payload: Bytes| {
        Frame::Attachment(AttachmentFrame {
            from: from.to_string(),
            to: to.to_string(),
            file_name: file_name.to_string(),
            chunk_index: index,
            chunk_count,
            body: body.to_string(),
            payload,
        })
        .encode()
    };

    if data.is_empty() {
        frames.push(frame(0, Bytes::new())?);
        return Ok(frames);
    }
    for (i, chunk) in data.chunks(chunk_size).enumerate() {
        frames.push(frame(i as u32, Bytes::copy_from_slice(chunk))?);
    }
    Ok(frames)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
