//! Type-specific wrapper fields for the handle types called out by name in the data model
//! (component C, §3 representative type-specific fields).

use std::collections::HashSet;
use std::sync::Mutex;

use derivative::Derivative;

use super::wrapper::{DescriptorSlot, HandleWrapper, MappedRange, MemoryBinding, ReflectionResult, SubresourceState};

#[derive(Debug)]
pub struct DeviceMemory {
    pub handle: u64,
    pub device: u64,
    pub allocate_info: Vec<u8>,
    pub size: u64,
    pub memory_type_index: u32,
    /// Latched from the owning physical device's memory properties once the state tracker has
    /// seen them (component E); `true` until then, since the driver cannot yield a non-coherent
    /// mapping-relevant failure before that point.
    pub is_coherent: Mutex<bool>,
    pub mapped: Mutex<Option<MappedRange>>,
}

impl HandleWrapper for DeviceMemory {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

#[derive(Debug)]
pub struct Buffer {
    pub handle: u64,
    pub device: u64,
    pub create_info: Vec<u8>,
    pub required_size: Mutex<u64>,
    pub bindings: Mutex<Vec<MemoryBinding>>,
}

impl HandleWrapper for Buffer {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

#[derive(Debug)]
pub struct Image {
    pub handle: u64,
    pub device: u64,
    pub create_info: Vec<u8>,
    pub required_size: Mutex<u64>,
    pub bindings: Mutex<Vec<MemoryBinding>>,
    pub subresources: Mutex<Vec<SubresourceState>>,
    pub swapchain: Option<u64>,
}

impl HandleWrapper for Image {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

/// Per-entry-point descriptor uses extracted from a shader module's SPIR-V, keyed by entry
/// point name. Absent from the map entirely only before reflection has run.
#[derive(Debug, Default)]
pub struct ShaderModule {
    pub handle: u64,
    pub device: u64,
    pub spirv: Vec<u8>,
    pub reflection: Mutex<std::collections::HashMap<String, ReflectionResult>>,
}

impl HandleWrapper for ShaderModule {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

#[derive(Debug)]
pub struct Pipeline {
    pub handle: u64,
    pub device: u64,
    pub bind_point: i32,
    pub cache: Option<u64>,
    pub layout: u64,
    /// SPIR-V blob per stage, kept so a destroyed-but-referenced shader module can be
    /// resurrected during MEC (component L.4).
    pub stage_spirv: Vec<(i32, Vec<u8>)>,
    pub descriptor_uses: Mutex<Vec<super::wrapper::DescriptorUse>>,
    /// Set for pipelines cloned by the command-buffer splitter to target subpass 0
    /// (component I); `None` for pipelines created directly by the application.
    pub cloned_from: Option<u64>,
}

impl HandleWrapper for Pipeline {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

#[derive(Debug)]
pub struct DescriptorSet {
    pub handle: u64,
    pub pool: u64,
    pub layout: u64,
    pub slots: Mutex<Vec<DescriptorSlot>>,
}

impl HandleWrapper for DescriptorSet {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.pool)
    }
}

#[derive(Debug)]
pub struct Fence {
    pub handle: u64,
    pub device: u64,
    /// Device memories whose GPU writes this fence's signal will make visible, latched from the
    /// submission's descriptor write-set at `vkQueueSubmit` (component F.5).
    pub memory_writes: Mutex<HashSet<u64>>,
}

impl HandleWrapper for Fence {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

#[derive(Debug)]
pub struct Semaphore {
    pub handle: u64,
    pub device: u64,
    /// 0/1 for a binary semaphore; monotonically increasing for a timeline semaphore.
    pub value: Mutex<u64>,
}

impl HandleWrapper for Semaphore {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.device)
    }
}

/// A closure run against the live state block before or after a command buffer's submission is
/// processed (component F.5). Not `Debug`/`Clone`: closures capture arbitrary submission
/// context, so the field is simply omitted from those derives.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandBuffer {
    pub handle: u64,
    pub pool: u64,
    pub device: u64,
    pub allocate_info: Vec<u8>,
    /// True once any resource the recorded stream references has been destroyed
    /// (invariant 5).
    pub invalidated: Mutex<bool>,
    /// The exact subsequence of `vkCmd*` calls between the most recent
    /// `vkBeginCommandBuffer`/`vkEndCommandBuffer` pair, wire-encoded (component H).
    pub recorded: Mutex<Vec<u8>>,
    #[derivative(Debug = "ignore")]
    pub pre_run: Mutex<Vec<Box<dyn FnMut() + Send>>>,
    #[derivative(Debug = "ignore")]
    pub post_run: Mutex<Vec<Box<dyn FnMut() + Send>>>,
}

impl HandleWrapper for CommandBuffer {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn parent(&self) -> Option<u64> {
        Some(self.pool)
    }
}

impl CommandBuffer {
    pub fn new(handle: u64, pool: u64, device: u64, allocate_info: Vec<u8>) -> Self {
        Self {
            handle,
            pool,
            device,
            allocate_info,
            invalidated: Mutex::new(false),
            recorded: Mutex::new(Vec::new()),
            pre_run: Mutex::new(Vec::new()),
            post_run: Mutex::new(Vec::new()),
        }
    }

    /// Drops the recorded stream and clears invalidation; called at `vkBeginCommandBuffer`
    /// (component H).
    pub fn reset_recording(&self) {
        self.recorded.lock().unwrap().clear();
        *self.invalidated.lock().unwrap() = false;
    }
}
