//! Hand-written encodings for the fixed list of entry points and structures the generic
//! encoder/decoder cannot express generically (component B).

use super::{Decoder, Encoder};

/// `vkMapMemory`'s output pointer is never dereferenced by the replayer; only its integer value
/// is meaningful (as a key into the memory tracker's shadow ranges), so it is stored as a plain
/// `u64` rather than walked as a pointee.
pub fn encode_map_memory_pointer(enc: &mut Encoder, ptr: *mut std::ffi::c_void) {
    enc.write_u64(ptr as u64);
}

pub fn decode_map_memory_pointer(dec: &mut Decoder) -> anyhow::Result<u64> {
    dec.read_u64()
}

/// `vkCmdUpdateBuffer`/`vkCmdPushConstants` carry a trailing blob whose length comes from a
/// separate `size`/`dataSize` argument rather than being self-describing, so it is written as a
/// raw run with no count prefix of its own.
pub fn encode_sized_blob(enc: &mut Encoder, data: &[u8]) {
    enc.write_bytes(data);
}

pub fn decode_sized_blob(dec: &mut Decoder, size: usize) -> anyhow::Result<Vec<u8>> {
    dec.read_bytes(size)
}

/// One entry of a descriptor update template, as walked by `vkUpdateDescriptorSetWithTemplate`'s
/// custom encoding. `offset`/`stride` come from the template's `VkDescriptorUpdateTemplateEntry`;
/// the handle-typed subfields of image/buffer/texel-buffer-view descriptors are remapped at
/// replay like any other handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateEntryDescriptor {
    pub descriptor_type: u32,
    /// Raw handle for image/buffer/texel-buffer-view descriptors; 0 for inline-uniform data.
    pub handle: u64,
    pub offset: u64,
    pub range: u64,
}

/// Encodes the descriptors addressed by a single template entry (`{offset, stride,
/// descriptorCount, type}`), reading `descriptor_count` elements at `stride` apart starting at
/// `offset` within the caller-supplied update data.
pub fn encode_template_entries(enc: &mut Encoder, entries: &[TemplateEntryDescriptor]) {
    enc.write_primitive_array(entries);
}

pub fn decode_template_entries(dec: &mut Decoder, count: usize) -> anyhow::Result<Vec<TemplateEntryDescriptor>> {
    dec.read_primitive_array(count)
}

/// `VkClearValue`/`VkClearColorValue` are unions; the active member is unknowable without the
/// attachment's format, so all four possible 32-bit words are always serialized regardless of
/// which member the application wrote.
pub fn encode_clear_value(enc: &mut Encoder, words: [u32; 4]) {
    for w in words {
        enc.write_u32(w);
    }
}

pub fn decode_clear_value(dec: &mut Decoder) -> anyhow::Result<[u32; 4]> {
    Ok([dec.read_u32()?, dec.read_u32()?, dec.read_u32()?, dec.read_u32()?])
}

/// `VkPhysicalDeviceGroupProperties::physicalDevices` is a fixed-size array (`VK_MAX_DEVICE_GROUP_SIZE`)
/// of which only the first `physical_device_count` entries are meaningful; the rest are
/// synthesized as null handles purely to preserve the struct's layout on the wire.
pub const MAX_DEVICE_GROUP_SIZE: usize = 32;

pub fn encode_device_group_handles(enc: &mut Encoder, valid: &[u64]) {
    debug_assert!(valid.len() <= MAX_DEVICE_GROUP_SIZE);
    enc.write_u32(valid.len() as u32);
    let mut padded = [0u64; MAX_DEVICE_GROUP_SIZE];
    padded[..valid.len()].copy_from_slice(valid);
    enc.write_primitive_array(&padded);
}

pub fn decode_device_group_handles(dec: &mut Decoder) -> anyhow::Result<Vec<u64>> {
    let count = dec.read_u32()? as usize;
    let padded: Vec<u64> = dec.read_primitive_array(MAX_DEVICE_GROUP_SIZE)?;
    Ok(padded[..count].to_vec())
}
