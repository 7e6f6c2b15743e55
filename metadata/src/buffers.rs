//! Fixed-field buffers: the 32-byte checksum slot, the 36-byte name slot,
//! and the 124-byte reserved slot that appear inline in the wire records.
//! None of these heap-allocate; all are plain stack arrays.

use crate::constants::{LP_CHECKSUM_SIZE, LP_HEADER_RESERVED_BYTES, LP_NAME_BUFFER_SIZE, LP_NAME_MAX_LEN};

/// A 32-byte opaque buffer, used for SHA-256 checksum slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumBuffer(pub [u8; LP_CHECKSUM_SIZE]);

impl ChecksumBuffer {
    pub const SIZE: usize = LP_CHECKSUM_SIZE;

    pub fn zeroed() -> Self {
        Self([0u8; LP_CHECKSUM_SIZE])
    }

    pub fn as_span(&self) -> &[u8] {
        &self.0
    }

    pub fn get_byte(&self, index: usize) -> u8 {
        self.0[index]
    }
}

impl From<[u8; LP_CHECKSUM_SIZE]> for ChecksumBuffer {
    fn from(bytes: [u8; LP_CHECKSUM_SIZE]) -> Self {
        Self(bytes)
    }
}

/// A 36-byte UTF-8 name buffer: up to 35 payload bytes followed by a
/// guaranteed NUL terminator (or more zero padding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameBuffer(pub [u8; LP_NAME_BUFFER_SIZE]);

impl NameBuffer {
    pub const SIZE: usize = LP_NAME_BUFFER_SIZE;

    pub fn zeroed() -> Self {
        Self([0u8; LP_NAME_BUFFER_SIZE])
    }

    /// Encode `name` into the first 35 bytes, zeroing the remainder.
    /// Truncates silently past 35 bytes — callers validate upstream.
    pub fn set_name(&mut self, name: &str) {
        self.0 = [0u8; LP_NAME_BUFFER_SIZE];
        let bytes = name.as_bytes();
        let n = bytes.len().min(LP_NAME_MAX_LEN);
        self.0[..n].copy_from_slice(&bytes[..n]);
    }

    /// Scan for the NUL terminator and decode the UTF-8 prefix up to it.
    /// Invalid UTF-8 is replaced lossily rather than failing: a corrupted
    /// name should not make the whole table unreadable.
    pub fn get_name(&self) -> String {
        let nul = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        String::from_utf8_lossy(&self.0[..nul]).into_owned()
    }

    pub fn as_span(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for NameBuffer {
    fn from(name: &str) -> Self {
        let mut buf = Self::zeroed();
        buf.set_name(name);
        buf
    }
}

/// A 124-byte reserved buffer, always zero on write and ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedBuffer(pub [u8; LP_HEADER_RESERVED_BYTES]);

impl ReservedBuffer {
    pub const SIZE: usize = LP_HEADER_RESERVED_BYTES;

    pub fn zeroed() -> Self {
        Self([0u8; LP_HEADER_RESERVED_BYTES])
    }

    pub fn as_span(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; LP_HEADER_RESERVED_BYTES]> for ReservedBuffer {
    fn from(bytes: [u8; LP_HEADER_RESERVED_BYTES]) -> Self {
        Self(bytes)
    }
}
