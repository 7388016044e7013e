//! Length-prefixed binary writer (component B).
//!
//! A single growable buffer backs a handful of typed `write_*` accessors, rather than a list of
//! fixed-size blocks, since `Vec<u8>` already grows amortized and gives a contiguous payload for
//! free.

use crate::error::Error;

/// Accumulates a single call's (or memory-update record's) payload before it is committed to
/// the stream sink as one `{length, payload}` pair.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    /// Drops any data written so far. Called at `vkBeginCommandBuffer` on a tracked command
    /// buffer's encoder (component H).
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Fails if the payload accumulated so far exceeds `limit`. The Spy calls this with
    /// [`super::MAX_PAYLOAD_BYTES`] before committing a record; any other limit is only used in
    /// tests.
    pub fn check_limit(&self, limit: usize) -> anyhow::Result<()> {
        if self.buf.len() > limit {
            return Err(Error::PayloadTooLarge(self.buf.len(), limit).into());
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Handles are always encoded as the raw 64-bit handle value; the replayer remaps these to
    /// live handles (component M).
    pub fn write_handle(&mut self, raw: u64) {
        self.write_u64(raw);
    }

    /// Arrays of fixed-width primitives are emitted as a count followed by a raw run, matching
    /// `encode_primitive_array` in the original tool.
    pub fn write_primitive_array<T: Copy>(&mut self, items: &[T]) {
        self.write_u64(items.len() as u64);
        let byte_len = std::mem::size_of_val(items);
        let ptr = items.as_ptr() as *const u8;
        // SAFETY: `items` is a valid slice of `T`; reinterpreting it as raw bytes for a
        // little-endian wire format is sound for the plain-old-data types this is used with
        // (u8/u32/u64/f32 and repr(C) Vulkan structs without padding-sensitive fields).
        let bytes = unsafe { std::slice::from_raw_parts(ptr, byte_len) };
        self.write_bytes(bytes);
    }

    /// A pointer-typed parameter is a presence byte followed by the pointee if present
    /// (component B).
    pub fn write_option<T>(&mut self, value: Option<T>, mut write: impl FnMut(&mut Self, T)) {
        match value {
            Some(v) => {
                self.write_bool(true);
                write(self, v);
            }
            None => self.write_bool(false),
        }
    }

    /// Writes a length-prefixed UTF-8 string (used by e.g. layer config payloads).
    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
    }
}
