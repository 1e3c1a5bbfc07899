//! Flat binary container for transaction payloads.
//!
//! A `Parcel` is written front to back and read back through an internal
//! cursor. All values are little-endian and every write ends on a 4-byte
//! boundary:
//!
//! ```text
//! i32 / u32 / bool      4 bytes (bool as 0/1)
//! i64 / f64             8 bytes
//! string                [i32 byte len | -1 for none][UTF-8 bytes][NUL][pad]
//! byte array            [i32 len | -1 for none][bytes][pad]
//! interface token       [i32 strict-mode policy][string descriptor]
//! typed object          [i32 0] or [i32 1][object]
//! exception header      [i32 0] or [i32 code][string message]
//! ```
//!
//! Reads past the end of the buffer return `CallbackError::Decode`.
//!
//! Buffers are recycled: `Parcel::obtain()` hands out a `PooledParcel` which
//! returns its storage to a small per-thread pool when dropped.

use crate::config::ParcelConfig;
use crate::{CallbackError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

pub const EX_SECURITY: i32 = -1;
pub const EX_BAD_PARCELABLE: i32 = -2;
pub const EX_ILLEGAL_ARGUMENT: i32 = -3;
pub const EX_NULL_POINTER: i32 = -4;
pub const EX_ILLEGAL_STATE: i32 = -5;
pub const EX_UNSUPPORTED_OPERATION: i32 = -7;
pub const EX_TRANSACTION_FAILED: i32 = -129;

thread_local! {
    static POOL: RefCell<Vec<BytesMut>> = const { RefCell::new(Vec::new()) };
}

/// A value that knows how to flatten itself into a parcel.
///
/// Writing fails when the value cannot be represented on the wire; the
/// parcel may then hold a partial write and should be discarded.
pub trait Parcelable: Sized {
    fn write_to_parcel(&self, parcel: &mut Parcel) -> Result<()>;

    fn create_from_parcel(parcel: &mut Parcel) -> Result<Self>;
}

#[inline]
fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Growable binary buffer with a read cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parcel {
    buf: BytesMut,
    pos: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a recycled parcel from the pool.
    pub fn obtain() -> PooledParcel {
        let buf = POOL
            .try_with(|pool| pool.borrow_mut().pop())
            .ok()
            .flatten()
            .unwrap_or_default();
        PooledParcel {
            parcel: Parcel { buf, pos: 0 },
        }
    }

    /// Wrap already-marshaled bytes for reading.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(bytes),
            pos: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn data_size(&self) -> usize {
        self.buf.len()
    }

    pub fn data_position(&self) -> usize {
        self.pos
    }

    pub fn data_avail(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn set_data_position(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    /// Drop all contents and rewind the cursor.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Append raw marshaled bytes without any framing.
    pub fn append_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(i32::from(value));
    }

    /// Overwrite a previously written `i32` at `offset`.
    ///
    /// Used to back-patch length prefixes once the payload size is known.
    pub fn write_i32_at(&mut self, offset: usize, value: i32) {
        if let Some(slot) = self.buf.get_mut(offset..offset + 4) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }

    fn write_padding(&mut self, written: usize) {
        self.buf.put_bytes(0, padded(written) - written);
    }

    pub fn write_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.write_i32(s.len() as i32);
                self.buf.put_slice(s.as_bytes());
                self.buf.put_u8(0);
                self.write_padding(s.len() + 1);
            }
            None => self.write_i32(-1),
        }
    }

    pub fn write_byte_array(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                self.write_i32(bytes.len() as i32);
                self.buf.put_slice(bytes);
                self.write_padding(bytes.len());
            }
            None => self.write_i32(-1),
        }
    }

    /// Write the header that identifies which interface a transaction targets.
    pub fn write_interface_token(&mut self, descriptor: &str) {
        self.write_i32(ParcelConfig::STRICT_MODE_POLICY);
        self.write_string(Some(descriptor));
    }

    /// Write an optional object behind a presence discriminator.
    pub fn write_typed<T: Parcelable>(&mut self, value: Option<&T>) -> Result<()> {
        match value {
            Some(value) => {
                self.write_i32(1);
                value.write_to_parcel(self)
            }
            None => {
                self.write_i32(0);
                Ok(())
            }
        }
    }

    pub fn write_no_exception(&mut self) {
        self.write_i32(0);
    }

    pub fn write_exception(&mut self, err: &CallbackError) {
        self.write_i32(err.to_exception_code());
        self.write_string(Some(&err.to_string()));
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    fn take(&mut self, len: usize, field: &str) -> Result<&[u8]> {
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                CallbackError::decode(
                    field,
                    format!(
                        "need {} bytes at offset {}, parcel holds {}",
                        len,
                        start,
                        self.buf.len()
                    ),
                )
            })?;
        self.pos = end;
        Ok(&self.buf[start..end])
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut src = self.take(4, "i32")?;
        Ok(src.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut src = self.take(4, "u32")?;
        Ok(src.get_u32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut src = self.take(8, "i64")?;
        Ok(src.get_i64_le())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let mut src = self.take(8, "f64")?;
        Ok(src.get_f64_le())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    /// Read a length prefix, mapping `-1` to `None`.
    fn read_len(&mut self, field: &str) -> Result<Option<usize>> {
        match self.read_i32()? {
            -1 => Ok(None),
            len if len < 0 => Err(CallbackError::decode(
                field,
                format!("negative length {}", len),
            )),
            len => Ok(Some(len as usize)),
        }
    }

    pub fn read_string(&mut self) -> Result<Option<String>> {
        let Some(len) = self.read_len("string")? else {
            return Ok(None);
        };
        let raw = self.take(padded(len + 1), "string")?;
        if raw[len] != 0 {
            return Err(CallbackError::decode("string", "missing NUL terminator"));
        }
        let s = std::str::from_utf8(&raw[..len])
            .map_err(|e| CallbackError::decode("string", e.to_string()))?;
        Ok(Some(s.to_string()))
    }

    pub fn read_byte_array(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.read_len("byte array")? else {
            return Ok(None);
        };
        let raw = self.take(padded(len), "byte array")?;
        Ok(Some(raw[..len].to_vec()))
    }

    /// Read an interface token and check it names `expected`.
    pub fn enforce_interface(&mut self, expected: &str) -> Result<()> {
        let _policy = self.read_i32()?;
        let actual = self.read_string()?;
        if actual.as_deref() == Some(expected) {
            Ok(())
        } else {
            Err(CallbackError::InterfaceMismatch {
                expected: expected.to_string(),
                actual: actual.unwrap_or_default(),
            })
        }
    }

    pub fn read_typed<T: Parcelable>(&mut self) -> Result<Option<T>> {
        match self.read_i32()? {
            0 => Ok(None),
            _ => T::create_from_parcel(self).map(Some),
        }
    }

    /// Read a reply's exception header, re-raising a propagated failure.
    pub fn read_exception(&mut self) -> Result<()> {
        match self.read_i32()? {
            0 => Ok(()),
            code => {
                let message = self.read_string()?.unwrap_or_default();
                Err(CallbackError::Remote { code, message })
            }
        }
    }
}

/// A parcel borrowed from the process-wide pool.
///
/// The buffer is cleared and handed back when the guard is dropped, whatever
/// path the owning call exits through.
#[derive(Debug)]
pub struct PooledParcel {
    parcel: Parcel,
}

impl Deref for PooledParcel {
    type Target = Parcel;

    fn deref(&self) -> &Parcel {
        &self.parcel
    }
}

impl DerefMut for PooledParcel {
    fn deref_mut(&mut self) -> &mut Parcel {
        &mut self.parcel
    }
}

impl Drop for PooledParcel {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.parcel.buf);
        buf.clear();
        // The pool is gone once the thread is tearing down its locals.
        let _ = POOL.try_with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < ParcelConfig::POOL_CAPACITY {
                pool.push(buf);
            }
        });
    }
}

/// Number of idle buffers in this thread's pool.
#[cfg(test)]
pub(crate) fn pooled_buffers() -> usize {
    POOL.with(|pool| pool.borrow().len())
}

#[cfg(test)]
pub(crate) fn drain_pool() {
    POOL.with(|pool| pool.borrow_mut().clear());
}
