//! The outbound boundary the wire stream is written to (component K / §6 "Stream sink").

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// A destination for the serialized byte stream. Implementors must preserve byte order and
/// never reorder writes; the spy-serializer relies on that to keep call order meaningful.
pub trait StreamSink: Send + Sync {
    fn write(&self, bytes: &[u8]) -> io::Result<usize>;
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes the stream to a file on disk.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self { file: Mutex::new(File::create(path)?) })
    }
}

impl StreamSink for FileSink {
    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        self.file.lock().unwrap().write(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        self.file.lock().unwrap().flush()
    }
}

/// An in-memory sink, used by tests and by the replayer's golden-trace comparisons.
#[derive(Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_inner().unwrap()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }
}

impl StreamSink for MemorySink {
    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_preserves_write_order() {
        let sink = MemorySink::new();
        sink.write(b"abc").unwrap();
        sink.write(b"def").unwrap();
        assert_eq!(sink.bytes(), b"abcdef");
    }
}
