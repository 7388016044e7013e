//! Common shape shared by every handle wrapper (component C).

use std::sync::Mutex;

/// Every wrapper stores the handle, its owning instance/device, and a deep clone of the
/// create-info tree that produced it. The create-info clone targets a byte buffer produced by
/// the same rules as the wire encoder (component B), rather than a struct-shaped arena, since
/// nothing downstream needs to mutate it in place -- only to reproduce the call during MEC or
/// command-buffer re-recording.
pub trait HandleWrapper {
    fn handle(&self) -> u64;
    fn parent(&self) -> Option<u64>;
}

/// Used for handle types with no representative live fields beyond parentage and create-info
/// (instance, physical device, device, queue, image view, buffer view, sampler, pipeline cache,
/// pipeline layout, descriptor set layout, descriptor pool, framebuffer, render pass, command
/// pool, event, query pool, sampler-ycbcr conversion, descriptor-update template, surface,
/// swapchain). `kind` is only used for log/error messages.
#[derive(Debug)]
pub struct Generic {
    pub kind: &'static str,
    pub handle: u64,
    pub parent: Option<u64>,
    pub create_info: Vec<u8>,
}

impl HandleWrapper for Generic {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        self.parent
    }
}

/// Per-subresource queue-ownership/layout triple tracked on [`super::types::Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceState {
    pub src_queue: u32,
    pub dst_queue: u32,
    pub layout: i32,
}

/// A single `{memory, offset, size}` binding. A buffer/image has at most one unless sparse
/// (invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBinding {
    pub memory: u64,
    pub offset: u64,
    pub size: u64,
}

/// Tracks the single active `vkMapMemory` range on a device memory wrapper (invariant 4).
#[derive(Debug)]
pub struct MappedRange {
    pub shadow_location: usize,
    pub offset: u64,
    pub size: u64,
}

/// The `{set, binding, count}` descriptor use extracted by SPIR-V reflection for one shader
/// entry point, or widened to cover a whole pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorUse {
    pub set: u32,
    pub binding: u32,
    pub count: u32,
}

/// Result of reflecting a shader module's entry point: either the precise set of descriptors it
/// reads/writes, or "unknown" when parsing failed (invariant 6).
#[derive(Debug, Clone)]
pub enum ReflectionResult {
    Known(Vec<DescriptorUse>),
    Unknown,
}

/// A single slot in a descriptor set (invariant: one of image/buffer/texel-buffer-view).
#[derive(Debug, Clone)]
pub enum DescriptorSlot {
    Image { sampler: u64, view: u64, layout: i32 },
    Buffer { buffer: u64, offset: u64, range: u64 },
    TexelBufferView(u64),
    Empty,
}

pub(crate) fn mutex_default<T: Default>() -> Mutex<T> {
    Mutex::new(T::default())
}
