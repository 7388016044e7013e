//! Counterpart reader to [`super::encoder::Encoder`] (component B).

use crate::error::Error;

/// Reads back a single record's payload by walking an owned byte buffer with a cursor,
/// bounds-checking every read instead of trusting the writer's side of the contract.
pub struct Decoder {
    buf: Vec<u8>,
    pos: usize,
}

impl Decoder {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn data_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn has_data_left(&self) -> bool {
        self.pos < self.buf.len()
    }

    fn take(&mut self, len: usize, what: &'static str) -> anyhow::Result<&[u8]> {
        if self.pos + len > self.buf.len() {
            return Err(Error::UnexpectedEof(what).into());
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, len: usize) -> anyhow::Result<Vec<u8>> {
        Ok(self.take(len, "byte blob")?.to_vec())
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> anyhow::Result<i32> {
        let b = self.take(4, "i32")?;
        Ok(i32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> anyhow::Result<u64> {
        let b = self.take(8, "u64")?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> anyhow::Result<f32> {
        let b = self.take(4, "f32")?;
        Ok(f32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_handle(&mut self) -> anyhow::Result<u64> {
        self.read_u64()
    }

    pub fn read_primitive_array<T: Copy>(&mut self, expected_len: usize) -> anyhow::Result<Vec<T>> {
        let len = self.read_u64()? as usize;
        if len != expected_len {
            return Err(Error::Uncategorized("primitive array length mismatch").into());
        }
        let byte_len = len * std::mem::size_of::<T>();
        let bytes = self.take(byte_len, "primitive array")?;
        let mut out = Vec::<T>::with_capacity(len);
        // SAFETY: `bytes` has exactly `len * size_of::<T>()` bytes and `T` is a plain-old-data
        // type written by `write_primitive_array`, so reinterpreting is sound.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr() as *mut u8, byte_len);
            out.set_len(len);
        }
        Ok(out)
    }

    /// Reads back a variable-length primitive array whose count was also encoded (as opposed to
    /// [`read_primitive_array`], which validates against a count already known from the call's
    /// other arguments). `write_primitive_array` writes exactly one length field, so this must
    /// not read a second one itself -- it only exists as the entry point for callers with no
    /// independent expected-length value to check against.
    pub fn read_counted_primitive_array<T: Copy>(&mut self) -> anyhow::Result<Vec<T>> {
        let len = self.read_u64()? as usize;
        let byte_len = len * std::mem::size_of::<T>();
        let bytes = self.take(byte_len, "counted primitive array")?;
        let mut out = Vec::<T>::with_capacity(len);
        // SAFETY: see `read_primitive_array`.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr() as *mut u8, byte_len);
            out.set_len(len);
        }
        Ok(out)
    }

    pub fn read_option<T>(&mut self, mut read: impl FnMut(&mut Self) -> anyhow::Result<T>) -> anyhow::Result<Option<T>> {
        if self.read_bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }

    pub fn read_str(&mut self) -> anyhow::Result<String> {
        let len = self.read_u64()? as usize;
        let bytes = self.take(len, "string")?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Encoder;

    #[test]
    fn counted_primitive_array_round_trips_with_encoder() {
        let mut enc = Encoder::new();
        enc.write_primitive_array(&[10u32, 20, 30]);
        let mut dec = Decoder::new(enc.into_bytes());
        assert_eq!(dec.read_counted_primitive_array::<u32>().unwrap(), vec![10, 20, 30]);
        assert!(!dec.has_data_left());
    }
}
