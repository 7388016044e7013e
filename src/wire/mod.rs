//! The wire format: a sequence of length-prefixed records, each holding a call's serialized
//! arguments (component B). See [`encoder`] and [`decoder`] for the writer/reader halves, and
//! [`custom`] for the fixed list of entry points whose wire shape the generic encoder cannot
//! express and must be hand-written.

pub mod custom;
pub mod decoder;
pub mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;

/// Maximum size in bytes of a single record's payload (component B / §7 kind 3). Exceeding this
/// is treated as a fatal serialization error, never a silently-dropped record.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Opcode reserved for a synthetic memory-update record (§6, "Wire format").
pub const OPCODE_MEMORY_UPDATE: u64 = 0;

/// Marks a record emitted as part of a mid-execution-capture prologue rather than during normal
/// recording (component L).
pub mod flags {
    pub const NORMAL: u32 = 0;
    pub const MID_EXECUTION: u32 = 1;
}

/// One decoded `{flags, payload}` record from a captured stream, with the `{length, flags}`
/// framing already stripped off (component M).
#[derive(Debug, Clone)]
pub struct Record {
    pub flags: u32,
    pub payload: Vec<u8>,
}

/// Splits a raw captured byte stream into its constituent records. Used by the replayer, which
/// (unlike the Spy) reads a whole stream at once rather than committing record-by-record.
pub fn read_records(bytes: &[u8]) -> anyhow::Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if pos + 12 > bytes.len() {
            return Err(crate::error::Error::UnexpectedEof("record header").into());
        }
        let len = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()) as usize;
        let record_flags = u32::from_le_bytes(bytes[pos + 8..pos + 12].try_into().unwrap());
        pos += 12;
        if pos + len > bytes.len() {
            return Err(crate::error::Error::UnexpectedEof("record payload").into());
        }
        records.push(Record { flags: record_flags, payload: bytes[pos..pos + len].to_vec() });
        pos += len;
    }
    Ok(records)
}
