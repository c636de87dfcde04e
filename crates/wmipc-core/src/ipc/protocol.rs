//! Wire protocol for the wmipc control socket
//!
//! Every message is a frame: a fixed 6-byte header followed by a UTF-8 JSON
//! payload.
//!
//! ```text
//! +---------+------+----------------+-------------------+
//! | version | type | length (u32 BE)| payload (JSON)    |
//! +---------+------+----------------+-------------------+
//!     1B       1B         4B            `length` bytes
//! ```
//!
//! A zero length means "no payload" and decodes to `Value::Null`.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The only protocol version this implementation speaks
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 6;

/// Largest payload accepted from a peer (16 MiB)
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Get the base state directory, preferring XDG_CACHE_HOME
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("wmipc");
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".cache").join("wmipc"),
        None => {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/wmipc-{}", uid))
        }
    }
}

/// Get the control socket path for a display
///
/// The display defaults to `$WAYLAND_DISPLAY`, then `$DISPLAY`.
pub fn socket_path(display: Option<&str>) -> PathBuf {
    let display = display
        .map(str::to_string)
        .or_else(|| std::env::var("WAYLAND_DISPLAY").ok())
        .or_else(|| std::env::var("DISPLAY").ok())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| ":0".to_string());
    state_dir().join(format!("socket.{}", display))
}

/// Kind of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Command = 0x01,
    CommandResponse = 0x02,
    ReplEval = 0x10,
    ReplEvalResponse = 0x11,
    ReplComplete = 0x12,
    ReplCompleteResponse = 0x13,
    ReplSessionStart = 0x14,
    ReplSessionEnd = 0x15,
    Keepalive = 0xF0,
    KeepaliveAck = 0xF1,
    Close = 0xFF,
}

impl MessageType {
    /// Every member of the closed enumeration
    pub const ALL: [MessageType; 11] = [
        MessageType::Command,
        MessageType::CommandResponse,
        MessageType::ReplEval,
        MessageType::ReplEvalResponse,
        MessageType::ReplComplete,
        MessageType::ReplCompleteResponse,
        MessageType::ReplSessionStart,
        MessageType::ReplSessionEnd,
        MessageType::Keepalive,
        MessageType::KeepaliveAck,
        MessageType::Close,
    ];

    /// Parse a type byte, `None` when it is outside the enumeration
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == byte)
    }

    /// The response type paired with a request type
    ///
    /// `ReplSessionStart` is answered with a `ReplEvalResponse` carrying the
    /// new session id. Session end and close have no response.
    pub fn response_type(self) -> Option<Self> {
        match self {
            MessageType::Command => Some(MessageType::CommandResponse),
            MessageType::ReplEval | MessageType::ReplSessionStart => {
                Some(MessageType::ReplEvalResponse)
            }
            MessageType::ReplComplete => Some(MessageType::ReplCompleteResponse),
            MessageType::Keepalive => Some(MessageType::KeepaliveAck),
            _ => None,
        }
    }

    /// Whether this is one of the four REPL request types
    pub fn is_repl_request(self) -> bool {
        matches!(
            self,
            MessageType::ReplEval
                | MessageType::ReplComplete
                | MessageType::ReplSessionStart
                | MessageType::ReplSessionEnd
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Command => "COMMAND",
            MessageType::CommandResponse => "COMMAND_RESPONSE",
            MessageType::ReplEval => "REPL_EVAL",
            MessageType::ReplEvalResponse => "REPL_EVAL_RESPONSE",
            MessageType::ReplComplete => "REPL_COMPLETE",
            MessageType::ReplCompleteResponse => "REPL_COMPLETE_RESPONSE",
            MessageType::ReplSessionStart => "REPL_SESSION_START",
            MessageType::ReplSessionEnd => "REPL_SESSION_END",
            MessageType::Keepalive => "KEEPALIVE",
            MessageType::KeepaliveAck => "KEEPALIVE_ACK",
            MessageType::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

/// Framing and payload errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Incomplete message header ({got} of {HEADER_LEN} bytes)")]
    IncompleteHeader { got: usize },

    #[error("Unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Incomplete message payload ({got} of {expected} bytes)")]
    IncompletePayload { got: usize, expected: usize },

    #[error("Message payload too large: {0} bytes")]
    PayloadTooLarge(u64),

    #[error("Unable to decode message payload: {0}")]
    UndecodablePayload(String),

    #[error("Tried to JSON serialize unsupported type {type_name}: {reason}")]
    Unserializable {
        type_name: &'static str,
        reason: String,
    },

    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize a value to JSON payload bytes
///
/// Sets serialize as JSON arrays. A value without a JSON representation is
/// an error naming its type.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::Unserializable {
        type_name: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decode JSON payload bytes, an empty slice is `Null`
pub fn unpack(data: &[u8]) -> Result<Value, ProtocolError> {
    if data.is_empty() {
        return Ok(Value::Null);
    }
    let text =
        std::str::from_utf8(data).map_err(|e| ProtocolError::UndecodablePayload(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| ProtocolError::UndecodablePayload(e.to_string()))
}

/// Encode a full frame: header followed by payload
///
/// `Value::Null` payloads are sent with a zero length.
pub fn pack_message<T: Serialize + ?Sized>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let mut body = pack(payload)?;
    if body == b"null" {
        body.clear();
    }
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or(ProtocolError::PayloadTooLarge(body.len() as u64))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.push(PROTOCOL_VERSION);
    frame.push(msg_type as u8);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read exactly one frame
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before
/// sending any byte of a new frame.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<(MessageType, Value)>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(ProtocolError::IncompleteHeader { got });
    }

    let version = header[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let msg_type =
        MessageType::from_u8(header[1]).ok_or(ProtocolError::UnknownMessageType(header[1]))?;
    let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(len as u64));
    }

    let expected = len as usize;
    let mut body = vec![0u8; expected];
    let got = read_full(reader, &mut body).await?;
    if got < expected {
        return Err(ProtocolError::IncompletePayload { got, expected });
    }

    Ok(Some((msg_type, unpack(&body)?)))
}

/// Encode and write one frame, then flush
pub async fn write_message<W, T>(
    writer: &mut W,
    msg_type: MessageType,
    payload: &T,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let frame = pack_message(msg_type, payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Fill `buf` until it is full or the stream hits EOF, returning bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
