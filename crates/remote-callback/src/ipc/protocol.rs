//! Framing for binder transactions over a byte stream.
//!
//! Every message is a length-prefixed frame:
//!
//! ```text
//! [u32 BE: len][payload of len bytes]
//! ```
//!
//! The server opens every connection with a one-byte admission frame
//! (`0` accepted, `1` busy). After that:
//!
//! Request payload: `[u32 BE code][u32 BE flags][parcel bytes]`.
//! Reply payload: `[u8 status][parcel bytes]`, sent only for transactions
//! without the one-way flag.

use crate::binder::TransactionFlags;
use crate::config::IpcConfig;
use crate::{CallbackError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const REQUEST_HEADER_LEN: usize = 8;

/// First frame on every connection: whether the server took it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Admission {
    Accepted = 0,
    /// At the connection cap; the server closes the stream after this frame.
    Busy = 1,
}

impl Admission {
    pub fn encode(self) -> [u8; 1] {
        [self as u8]
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        match frame {
            [0] => Ok(Admission::Accepted),
            [1] => Ok(Admission::Busy),
            other => Err(CallbackError::decode(
                "admission",
                format!("unexpected frame {:?}", other),
            )),
        }
    }
}

/// Reject a payload that no peer would accept as one frame.
pub fn check_frame_size(len: usize) -> Result<()> {
    if len > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(CallbackError::PayloadTooLarge {
            size: len,
            max: IpcConfig::MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// A transaction travelling to the hosting process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub code: u32,
    pub flags: TransactionFlags,
    pub data: Vec<u8>,
}

impl TransactionRequest {
    pub fn new(code: u32, flags: TransactionFlags, data: &[u8]) -> Self {
        Self {
            code,
            flags,
            data: data.to_vec(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + self.data.len());
        buf.put_u32(self.code);
        buf.put_u32(self.flags.bits());
        buf.put_slice(&self.data);
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < REQUEST_HEADER_LEN {
            return Err(CallbackError::decode(
                "transaction request",
                format!("frame of {} bytes is shorter than its header", frame.len()),
            ));
        }
        let mut header = &frame[..REQUEST_HEADER_LEN];
        let code = header.get_u32();
        let flags = TransactionFlags::from_bits(header.get_u32());
        Ok(Self {
            code,
            flags,
            data: frame[REQUEST_HEADER_LEN..].to_vec(),
        })
    }
}

/// Whether the hosted binder recognized the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyStatus {
    Handled = 0,
    Unhandled = 1,
}

/// Reply to a non-one-way transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReply {
    pub status: ReplyStatus,
    pub data: Vec<u8>,
}

impl TransactionReply {
    pub fn handled(data: &[u8]) -> Self {
        Self {
            status: ReplyStatus::Handled,
            data: data.to_vec(),
        }
    }

    pub fn unhandled() -> Self {
        Self {
            status: ReplyStatus::Unhandled,
            data: Vec::new(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1 + self.data.len());
        buf.put_u8(self.status as u8);
        buf.put_slice(&self.data);
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (&status, data) = frame.split_first().ok_or_else(|| {
            CallbackError::decode("transaction reply", "empty reply frame")
        })?;
        let status = match status {
            0 => ReplyStatus::Handled,
            1 => ReplyStatus::Unhandled,
            other => {
                return Err(CallbackError::decode(
                    "transaction reply",
                    format!("unknown status byte {}", other),
                ))
            }
        };
        Ok(Self {
            status,
            data: data.to_vec(),
        })
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(CallbackError::decode(
            "ipc_frame",
            format!(
                "message size {} exceeds maximum {}",
                len,
                IpcConfig::MAX_MESSAGE_SIZE
            ),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Fails with `PayloadTooLarge` before writing anything if the payload is
/// over the frame limit.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    check_frame_size(payload.len())?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
