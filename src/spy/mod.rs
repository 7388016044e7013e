//! The outermost transform: serializes every intercepted call to the wire format and drains
//! coherent-memory writes ahead of each submit (component K).
//!
//! `Spy` itself only decides *what* to write and when; [`serializer::SpySerializer`] owns the
//! thread coordination and the sink. Argument encoding here covers the plain scalar and handle
//! fields of each call -- full `pNext`-chain structs are out of scope, the same placeholder
//! scope already used for `create_info` bodies elsewhere in this crate (see `DESIGN.md`).

pub mod serializer;

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use crate::layers::memory_tracker::MemoryTracker;
use crate::state::StateBlock;
use crate::transform::Transform;
use crate::wire::OPCODE_MEMORY_UPDATE;

use serializer::SpySerializer;

/// Opcodes for the subset of entry points `Spy` records directly. 0 is reserved for the
/// synthetic memory-update record written out-of-band by [`Spy::drain_coherent_writes`].
/// `pub(crate)` so the MEC generator can tag its prologue calls with the same numbering the
/// replayer dispatches on.
pub(crate) mod opcode {
    pub const CREATE_INSTANCE: u32 = 1;
    pub const DESTROY_INSTANCE: u32 = 2;
    pub const ENUMERATE_PHYSICAL_DEVICES: u32 = 3;
    pub const CREATE_DEVICE: u32 = 4;
    pub const DESTROY_DEVICE: u32 = 5;
    pub const ALLOCATE_MEMORY: u32 = 6;
    pub const FREE_MEMORY: u32 = 7;
    pub const MAP_MEMORY: u32 = 8;
    pub const UNMAP_MEMORY: u32 = 9;
    pub const CREATE_BUFFER: u32 = 10;
    pub const DESTROY_BUFFER: u32 = 11;
    pub const CREATE_IMAGE: u32 = 12;
    pub const DESTROY_IMAGE: u32 = 13;
    pub const CREATE_SHADER_MODULE: u32 = 14;
    pub const DESTROY_SHADER_MODULE: u32 = 15;
    pub const CREATE_GRAPHICS_PIPELINES: u32 = 16;
    pub const CREATE_COMPUTE_PIPELINES: u32 = 17;
    pub const DESTROY_PIPELINE: u32 = 18;
    pub const CREATE_FENCE: u32 = 19;
    pub const DESTROY_FENCE: u32 = 20;
    pub const WAIT_FOR_FENCES: u32 = 21;
    pub const CREATE_SEMAPHORE: u32 = 22;
    pub const DESTROY_SEMAPHORE: u32 = 23;
    pub const QUEUE_SUBMIT: u32 = 24;
    pub const QUEUE_PRESENT: u32 = 25;
    /// Recorded so replay can resolve a live queue handle before attempting to replay a
    /// `QUEUE_SUBMIT` record against it.
    pub const GET_DEVICE_QUEUE: u32 = 26;
}

/// The outermost transform. Holds the serializer every call is recorded through, the state block
/// (read-only, to find which device memories are coherently mapped before a submit), and an
/// optional reference to the installed [`MemoryTracker`] -- `None` when the crate is built or
/// configured without coherent-memory tracking, in which case submits are recorded without a
/// preceding memory-update drain.
pub struct Spy {
    next: Arc<dyn Transform>,
    serializer: Arc<SpySerializer>,
    state: Arc<StateBlock>,
    memory_tracker: Option<Arc<MemoryTracker>>,
}

impl Spy {
    pub fn new(next: Arc<dyn Transform>, serializer: Arc<SpySerializer>, state: Arc<StateBlock>, memory_tracker: Option<Arc<MemoryTracker>>) -> Self {
        Self { next, serializer, state, memory_tracker }
    }

    /// Drains dirty pages from every coherently-mapped device memory and writes one
    /// memory-update record per dirty page, directly to the sink. Must run while `guard` (a
    /// [`serializer::EncoderGuard`] obtained with `get_locked_encoder`) is still alive, so nothing
    /// from another thread can land between these records and the submit record that follows.
    fn drain_coherent_writes(&self) {
        let Some(tracker) = &self.memory_tracker else { return };
        let Ok(memories) = self.state.device_memories.values() else { return };
        for mem in memories {
            if !*mem.is_coherent.lock().unwrap() {
                continue;
            }
            let Some(mapped_offset) = mem.mapped.lock().unwrap().as_ref().map(|m| m.offset) else { continue };
            let handle = mem.handle;
            tracker.for_dirty_in_mem(handle, |range_offset, ptr, len| {
                let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
                self.serializer.write_auxiliary_record(OPCODE_MEMORY_UPDATE as u32, |e| {
                    e.write_handle(handle);
                    e.write_u64(mapped_offset + range_offset as u64);
                    e.write_primitive_array(bytes);
                });
            });
        }
    }
}

impl Transform for Spy {
    fn next(&self) -> &dyn Transform {
        self.next.as_ref()
    }

    fn create_instance(&self, info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
        let guard = self.serializer.get_encoder(opcode::CREATE_INSTANCE);
        let result = self.next().create_instance(info);
        if let Ok(instance) = result {
            guard.write(|e| e.write_handle(instance.as_raw()));
        }
        result
    }

    fn destroy_instance(&self, instance: vk::Instance) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_INSTANCE);
        guard.write(|e| e.write_handle(instance.as_raw()));
        self.next().destroy_instance(instance)
    }

    /// Follows each enumerated physical device with its `{deviceID, vendorID, driverVersion}`
    /// tuple so replay can remap physical devices without re-probing the real hardware.
    fn enumerate_physical_devices(&self, instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        let guard = self.serializer.get_encoder(opcode::ENUMERATE_PHYSICAL_DEVICES);
        guard.write(|e| e.write_handle(instance.as_raw()));
        let result = self.next().enumerate_physical_devices(instance)?;
        guard.write(|e| {
            e.write_u64(result.len() as u64);
            for pd in &result {
                e.write_handle(pd.as_raw());
                match self.next().get_physical_device_properties(*pd) {
                    Ok(props) => {
                        e.write_bool(true);
                        e.write_u32(props.device_id);
                        e.write_u32(props.vendor_id);
                        e.write_u32(props.driver_version);
                    }
                    Err(_) => e.write_bool(false),
                }
            }
        });
        Ok(result)
    }

    fn create_device(&self, physical_device: vk::PhysicalDevice, info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
        let guard = self.serializer.get_encoder(opcode::CREATE_DEVICE);
        guard.write(|e| e.write_handle(physical_device.as_raw()));
        let result = self.next().create_device(physical_device, info);
        if let Ok(device) = result {
            guard.write(|e| e.write_handle(device.as_raw()));
        }
        result
    }

    fn destroy_device(&self, device: vk::Device) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_DEVICE);
        guard.write(|e| e.write_handle(device.as_raw()));
        self.next().destroy_device(device)
    }

    fn get_device_queue(&self, device: vk::Device, family_index: u32, queue_index: u32) -> anyhow::Result<vk::Queue> {
        let guard = self.serializer.get_encoder(opcode::GET_DEVICE_QUEUE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_u32(family_index);
            e.write_u32(queue_index);
        });
        let result = self.next().get_device_queue(device, family_index, queue_index);
        if let Ok(queue) = result {
            guard.write(|e| e.write_handle(queue.as_raw()));
        }
        result
    }

    fn allocate_memory(&self, device: vk::Device, info: &vk::MemoryAllocateInfo) -> anyhow::Result<vk::DeviceMemory> {
        let guard = self.serializer.get_encoder(opcode::ALLOCATE_MEMORY);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_u64(info.allocation_size);
            e.write_u32(info.memory_type_index);
        });
        let result = self.next().allocate_memory(device, info);
        if let Ok(memory) = result {
            guard.write(|e| e.write_handle(memory.as_raw()));
        }
        result
    }

    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::FREE_MEMORY);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(memory.as_raw());
        });
        self.next().free_memory(device, memory)
    }

    /// Records the call's arguments, then -- once `next()` (the state tracker / memory tracker
    /// chain below) has returned -- the pointer the application actually received. That pointer
    /// is already the memory tracker's shadow allocation, not the driver's real mapping, by the
    /// time it reaches the Spy; nothing further needs substituting here.
    fn map_memory(&self, device: vk::Device, memory: vk::DeviceMemory, offset: u64, size: u64) -> anyhow::Result<*mut std::ffi::c_void> {
        let guard = self.serializer.get_encoder(opcode::MAP_MEMORY);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(memory.as_raw());
            e.write_u64(offset);
            e.write_u64(size);
        });
        let result = self.next().map_memory(device, memory, offset, size);
        if let Ok(ptr) = result {
            guard.write(|e| e.write_u64(ptr as usize as u64));
        }
        result
    }

    fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::UNMAP_MEMORY);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(memory.as_raw());
        });
        self.next().unmap_memory(device, memory)
    }

    fn create_buffer(&self, device: vk::Device, info: &vk::BufferCreateInfo) -> anyhow::Result<vk::Buffer> {
        let guard = self.serializer.get_encoder(opcode::CREATE_BUFFER);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_u64(info.size);
            e.write_u32(info.usage.as_raw());
        });
        let result = self.next().create_buffer(device, info);
        if let Ok(buffer) = result {
            guard.write(|e| e.write_handle(buffer.as_raw()));
        }
        result
    }

    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_BUFFER);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(buffer.as_raw());
        });
        self.next().destroy_buffer(device, buffer)
    }

    fn create_image(&self, device: vk::Device, info: &vk::ImageCreateInfo) -> anyhow::Result<vk::Image> {
        let guard = self.serializer.get_encoder(opcode::CREATE_IMAGE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_i32(info.image_type.as_raw());
            e.write_i32(info.format.as_raw());
            e.write_u32(info.extent.width);
            e.write_u32(info.extent.height);
            e.write_u32(info.extent.depth);
            e.write_u32(info.usage.as_raw());
        });
        let result = self.next().create_image(device, info);
        if let Ok(image) = result {
            guard.write(|e| e.write_handle(image.as_raw()));
        }
        result
    }

    fn destroy_image(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_IMAGE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(image.as_raw());
        });
        self.next().destroy_image(device, image)
    }

    fn create_shader_module(&self, device: vk::Device, info: &vk::ShaderModuleCreateInfo) -> anyhow::Result<vk::ShaderModule> {
        let guard = self.serializer.get_encoder(opcode::CREATE_SHADER_MODULE);
        // SAFETY: `p_code`/`code_size` describe a valid SPIR-V words buffer for the lifetime of
        // this call, per the Vulkan spec's `VkShaderModuleCreateInfo` contract.
        let words = unsafe { std::slice::from_raw_parts(info.p_code, info.code_size / 4) };
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_primitive_array(words);
        });
        let result = self.next().create_shader_module(device, info);
        if let Ok(module) = result {
            guard.write(|e| e.write_handle(module.as_raw()));
        }
        result
    }

    fn destroy_shader_module(&self, device: vk::Device, module: vk::ShaderModule) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_SHADER_MODULE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(module.as_raw());
        });
        self.next().destroy_shader_module(device, module)
    }

    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo],
    ) -> anyhow::Result<Vec<vk::Pipeline>> {
        let guard = self.serializer.get_encoder(opcode::CREATE_GRAPHICS_PIPELINES);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(cache.as_raw());
            e.write_u64(infos.len() as u64);
        });
        let result = self.next().create_graphics_pipelines(device, cache, infos);
        if let Ok(pipelines) = &result {
            guard.write(|e| e.write_primitive_array(&pipelines.iter().map(|p| p.as_raw()).collect::<Vec<_>>()));
        }
        result
    }

    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo],
    ) -> anyhow::Result<Vec<vk::Pipeline>> {
        let guard = self.serializer.get_encoder(opcode::CREATE_COMPUTE_PIPELINES);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(cache.as_raw());
            e.write_u64(infos.len() as u64);
        });
        let result = self.next().create_compute_pipelines(device, cache, infos);
        if let Ok(pipelines) = &result {
            guard.write(|e| e.write_primitive_array(&pipelines.iter().map(|p| p.as_raw()).collect::<Vec<_>>()));
        }
        result
    }

    fn destroy_pipeline(&self, device: vk::Device, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_PIPELINE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(pipeline.as_raw());
        });
        self.next().destroy_pipeline(device, pipeline)
    }

    fn create_fence(&self, device: vk::Device, info: &vk::FenceCreateInfo) -> anyhow::Result<vk::Fence> {
        let guard = self.serializer.get_encoder(opcode::CREATE_FENCE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_u32(info.flags.as_raw());
        });
        let result = self.next().create_fence(device, info);
        if let Ok(fence) = result {
            guard.write(|e| e.write_handle(fence.as_raw()));
        }
        result
    }

    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_FENCE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(fence.as_raw());
        });
        self.next().destroy_fence(device, fence)
    }

    /// Waits, then looks up which of the waited-on fences actually signaled via
    /// `get_fence_status`, so replay only waits on the ones that did.
    fn wait_for_fences(&self, device: vk::Device, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::WAIT_FOR_FENCES);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_primitive_array(&fences.iter().map(|f| f.as_raw()).collect::<Vec<_>>());
            e.write_bool(wait_all);
            e.write_u64(timeout);
        });
        let result = self.next().wait_for_fences(device, fences, wait_all, timeout);
        let signaled: Vec<u8> = fences
            .iter()
            .map(|f| self.next().get_fence_status(device, *f).unwrap_or(false) as u8)
            .collect();
        guard.write(|e| e.write_primitive_array(&signaled));
        result
    }

    fn create_semaphore(&self, device: vk::Device, info: &vk::SemaphoreCreateInfo) -> anyhow::Result<vk::Semaphore> {
        let guard = self.serializer.get_encoder(opcode::CREATE_SEMAPHORE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_u32(info.flags.as_raw());
        });
        let result = self.next().create_semaphore(device, info);
        if let Ok(semaphore) = result {
            guard.write(|e| e.write_handle(semaphore.as_raw()));
        }
        result
    }

    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::DESTROY_SEMAPHORE);
        guard.write(|e| {
            e.write_handle(device.as_raw());
            e.write_handle(semaphore.as_raw());
        });
        self.next().destroy_semaphore(device, semaphore)
    }

    /// Drains coherent-memory dirty pages into memory-update records, then the submit itself,
    /// both under the same locked encoder so no other thread's record can land in between.
    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> anyhow::Result<()> {
        let guard = self.serializer.get_locked_encoder(opcode::QUEUE_SUBMIT);
        if guard.is_active() {
            self.drain_coherent_writes();
        }
        guard.write(|e| {
            e.write_handle(queue.as_raw());
            e.write_u64(submits.len() as u64);
            e.write_handle(fence.as_raw());
        });
        self.next().queue_submit(queue, submits, fence)
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> anyhow::Result<()> {
        let guard = self.serializer.get_encoder(opcode::QUEUE_PRESENT);
        guard.write(|e| {
            e.write_handle(queue.as_raw());
            e.write_u64(info.swapchain_count as u64);
        });
        self.next().queue_present(queue, info)
    }
}
