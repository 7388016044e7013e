//! Reconstructs capture state against a live driver by replaying a wire stream opcode-by-opcode
//! (component M).
//!
//! Dispatches on [`crate::spy::opcode`], the same numbering the Spy and the MEC generator both
//! write with, so a record's origin (live capture vs. MEC prologue) never matters to the
//! replayer. Pipeline creation/destruction, queue handle resolution, and queue submission all
//! drive the live driver and populate `Remap` the same as every other create/destroy pair --
//! `QUEUE_SUBMIT` itself only carries `{queue, submit_count, fence}` on the wire (see
//! `DESIGN.md`), so replay issues `submit_count` empty submits rather than reconstructing the
//! original command buffer content, which this crate never puts on the wire. `QUEUE_PRESENT` is
//! the one opcode genuinely skipped, since it needs a live swapchain/surface this crate doesn't
//! track.

pub mod device_match;

use std::collections::HashMap;
use std::sync::Mutex;

use ash::vk;
use ash::vk::Handle;

use crate::error::Error;
use crate::spy::opcode;
use crate::transform::Transform;
use crate::wire::{read_records, Decoder, OPCODE_MEMORY_UPDATE};

use device_match::{match_physical_device, RecordedPhysicalDevice};

/// Per-type handle remap: the handle value recorded in the stream maps to the handle the live
/// driver actually returned when the replayer recreated it.
#[derive(Default)]
struct Remap {
    instances: HashMap<u64, u64>,
    physical_devices: HashMap<u64, u64>,
    devices: HashMap<u64, u64>,
    device_memories: HashMap<u64, u64>,
    buffers: HashMap<u64, u64>,
    images: HashMap<u64, u64>,
    shader_modules: HashMap<u64, u64>,
    pipelines: HashMap<u64, u64>,
    fences: HashMap<u64, u64>,
    semaphores: HashMap<u64, u64>,
    queues: HashMap<u64, u64>,
    /// Live mapped pointer for a recorded device-memory handle, populated when a `MAP_MEMORY`
    /// record is replayed; consumed by `OPCODE_MEMORY_UPDATE` records that follow it.
    mapped_pointers: HashMap<u64, *mut std::ffi::c_void>,
}

// SAFETY: pointers in `mapped_pointers` are driver mappings that outlive the replay session;
// access is always serialized through `Replayer::remap`'s mutex.
unsafe impl Send for Remap {}

/// Replays a captured or mid-execution-capture-prefixed wire stream against `driver`, a
/// [`Transform`] chain ending in the real driver (component M). Physical devices are remapped by
/// `{vendorID, deviceID, driverVersion}` via [`device_match`]; every other object type is
/// remapped by straightforward recreate-and-remember.
pub struct Replayer {
    driver: Box<dyn Transform>,
    remap: Mutex<Remap>,
}

impl Replayer {
    pub fn new(driver: Box<dyn Transform>) -> Self {
        Self { driver, remap: Mutex::new(Remap::default()) }
    }

    /// Replays every record in `bytes` in order. Stops and returns the first error encountered;
    /// callers that want best-effort replay across a corrupted tail should catch per-record
    /// instead of calling this directly.
    pub fn replay(&self, bytes: &[u8]) -> anyhow::Result<()> {
        for record in read_records(bytes)? {
            self.replay_record(&record.payload)?;
        }
        Ok(())
    }

    fn replay_record(&self, payload: &[u8]) -> anyhow::Result<()> {
        let mut dec = Decoder::new(payload.to_vec());
        let op = dec.read_u32()?;
        match op as u64 {
            OPCODE_MEMORY_UPDATE => self.replay_memory_update(&mut dec),
            _ => match op {
                opcode::CREATE_INSTANCE => self.replay_create_instance(&mut dec),
                opcode::DESTROY_INSTANCE => self.replay_destroy_instance(&mut dec),
                opcode::ENUMERATE_PHYSICAL_DEVICES => self.replay_enumerate_physical_devices(&mut dec),
                opcode::CREATE_DEVICE => self.replay_create_device(&mut dec),
                opcode::DESTROY_DEVICE => self.replay_destroy_device(&mut dec),
                opcode::ALLOCATE_MEMORY => self.replay_allocate_memory(&mut dec),
                opcode::FREE_MEMORY => self.replay_free_memory(&mut dec),
                opcode::MAP_MEMORY => self.replay_map_memory(&mut dec),
                opcode::UNMAP_MEMORY => self.replay_unmap_memory(&mut dec),
                opcode::CREATE_BUFFER => self.replay_create_buffer(&mut dec),
                opcode::DESTROY_BUFFER => self.replay_destroy_buffer(&mut dec),
                opcode::CREATE_IMAGE => self.replay_create_image(&mut dec),
                opcode::DESTROY_IMAGE => self.replay_destroy_image(&mut dec),
                opcode::CREATE_SHADER_MODULE => self.replay_create_shader_module(&mut dec),
                opcode::DESTROY_SHADER_MODULE => self.replay_destroy_shader_module(&mut dec),
                opcode::CREATE_FENCE => self.replay_create_fence(&mut dec),
                opcode::DESTROY_FENCE => self.replay_destroy_fence(&mut dec),
                opcode::WAIT_FOR_FENCES => self.replay_wait_for_fences(&mut dec),
                opcode::CREATE_SEMAPHORE => self.replay_create_semaphore(&mut dec),
                opcode::DESTROY_SEMAPHORE => self.replay_destroy_semaphore(&mut dec),
                opcode::GET_DEVICE_QUEUE => self.replay_get_device_queue(&mut dec),
                opcode::CREATE_GRAPHICS_PIPELINES => self.replay_create_pipelines(&mut dec, false),
                opcode::CREATE_COMPUTE_PIPELINES => self.replay_create_pipelines(&mut dec, true),
                opcode::DESTROY_PIPELINE => self.replay_destroy_pipeline(&mut dec),
                opcode::QUEUE_SUBMIT => self.replay_queue_submit(&mut dec),
                opcode::QUEUE_PRESENT => {
                    log::warn!("opcode {op} has no replay target (requires a live swapchain/surface this crate does not track), skipping");
                    Ok(())
                }
                _ => Err(Error::Uncategorized("unknown opcode in wire stream").into()),
            },
        }
    }

    /// Looks up the live device a recorded device handle remaps to. `None` means the device was
    /// never recreated during this replay (most likely because its owning physical device had no
    /// match), in which case every call that depends on it is silently skipped rather than
    /// treated as an error -- the gap was already warned about when the mismatch was detected.
    fn live_device(&self, remap: &Remap, recorded: u64) -> Option<vk::Device> {
        remap.devices.get(&recorded).map(|h| vk::Device::from_raw(*h))
    }

    fn replay_create_instance(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded = dec.read_handle()?;
        let instance = self.driver.create_instance(&vk::InstanceCreateInfo::default())?;
        self.remap.lock().unwrap().instances.insert(recorded, instance.as_raw());
        Ok(())
    }

    fn replay_destroy_instance(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        if let Some(live) = remap.instances.remove(&recorded) {
            self.driver.destroy_instance(vk::Instance::from_raw(live))?;
        }
        Ok(())
    }

    /// Enumerates the live instance's physical devices once, then matches each recorded entry
    /// against them by `{vendorID, deviceID, driverVersion}` (component M).
    fn replay_enumerate_physical_devices(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_instance = dec.read_handle()?;
        let count = dec.read_u64()?;
        let mut recorded_entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let recorded_pd = dec.read_handle()?;
            let tuple = dec.read_option(|d| {
                let device_id = d.read_u32()?;
                let vendor_id = d.read_u32()?;
                let driver_version = d.read_u32()?;
                Ok(RecordedPhysicalDevice { device_id, vendor_id, driver_version })
            })?;
            recorded_entries.push((recorded_pd, tuple));
        }

        let mut remap = self.remap.lock().unwrap();
        let Some(&live_instance) = remap.instances.get(&recorded_instance) else { return Ok(()) };
        let live_devices = self.driver.enumerate_physical_devices(vk::Instance::from_raw(live_instance))?;
        let mut candidates = Vec::with_capacity(live_devices.len());
        for pd in &live_devices {
            let props = self.driver.get_physical_device_properties(*pd)?;
            candidates.push((pd.as_raw(), props));
        }

        for (recorded_pd, tuple) in recorded_entries {
            let Some(tuple) = tuple else {
                log::warn!("no identifying tuple recorded for physical device {recorded_pd:#x}, cannot remap");
                continue;
            };
            match match_physical_device(tuple, &candidates) {
                Some(live) => {
                    remap.physical_devices.insert(recorded_pd, live);
                }
                None => log::warn!("{}", Error::NoMatchingPhysicalDevice(recorded_pd as u32)),
            }
        }
        Ok(())
    }

    fn replay_create_device(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_pd = dec.read_handle()?;
        let recorded_device = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(&live_pd) = remap.physical_devices.get(&recorded_pd) else { return Ok(()) };
        let device = self.driver.create_device(vk::PhysicalDevice::from_raw(live_pd), &vk::DeviceCreateInfo::default())?;
        remap.devices.insert(recorded_device, device.as_raw());
        Ok(())
    }

    fn replay_destroy_device(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        if let Some(live) = remap.devices.remove(&recorded) {
            self.driver.destroy_device(vk::Device::from_raw(live))?;
        }
        Ok(())
    }

    fn replay_allocate_memory(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let size = dec.read_u64()?;
        let memory_type_index = dec.read_u32()?;
        let recorded_memory = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let info = vk::MemoryAllocateInfo { allocation_size: size, memory_type_index, ..Default::default() };
        let memory = self.driver.allocate_memory(live_device, &info)?;
        remap.device_memories.insert(recorded_memory, memory.as_raw());
        Ok(())
    }

    fn replay_free_memory(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_memory = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.device_memories.remove(&recorded_memory) {
            remap.mapped_pointers.remove(&recorded_memory);
            self.driver.free_memory(live_device, vk::DeviceMemory::from_raw(live))?;
        }
        Ok(())
    }

    fn replay_map_memory(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_memory = dec.read_handle()?;
        let offset = dec.read_u64()?;
        let size = dec.read_u64()?;
        let recorded_ptr = dec.read_option(|d| d.read_u64())?;
        if recorded_ptr.is_none() {
            return Ok(());
        }
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let Some(&live_memory) = remap.device_memories.get(&recorded_memory) else { return Ok(()) };
        let ptr = self.driver.map_memory(live_device, vk::DeviceMemory::from_raw(live_memory), offset, size)?;
        remap.mapped_pointers.insert(recorded_memory, ptr);
        Ok(())
    }

    fn replay_unmap_memory(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_memory = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        remap.mapped_pointers.remove(&recorded_memory);
        if let Some(&live_memory) = remap.device_memories.get(&recorded_memory) {
            self.driver.unmap_memory(live_device, vk::DeviceMemory::from_raw(live_memory))?;
        }
        Ok(())
    }

    /// Writes the captured bytes directly into the live mapped pointer recorded by a prior
    /// `MAP_MEMORY` replay. A memory-update record for a memory never successfully mapped during
    /// this replay is silently dropped -- it can only mean the owning instance's physical device
    /// had no match, which was already warned about at enumeration time.
    fn replay_memory_update(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_memory = dec.read_handle()?;
        let absolute_offset = dec.read_u64()?;
        let len = dec.read_u64()? as usize;
        let bytes = dec.read_bytes(len)?;
        let remap = self.remap.lock().unwrap();
        let Some(&ptr) = remap.mapped_pointers.get(&recorded_memory) else { return Ok(()) };
        // SAFETY: `ptr` is a live driver mapping obtained from a successful `vkMapMemory` replay
        // and still held in `mapped_pointers`, which is cleared on unmap/free.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), (ptr as *mut u8).add(absolute_offset as usize), len) };
        Ok(())
    }

    fn replay_create_buffer(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let size = dec.read_u64()?;
        let usage = dec.read_u32()?;
        let recorded_buffer = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let info = vk::BufferCreateInfo { size, usage: vk::BufferUsageFlags::from_raw(usage), ..Default::default() };
        let buffer = self.driver.create_buffer(live_device, &info)?;
        remap.buffers.insert(recorded_buffer, buffer.as_raw());
        Ok(())
    }

    fn replay_destroy_buffer(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_buffer = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.buffers.remove(&recorded_buffer) {
            self.driver.destroy_buffer(live_device, vk::Buffer::from_raw(live))?;
        }
        Ok(())
    }

    fn replay_create_image(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let image_type = dec.read_i32()?;
        let format = dec.read_i32()?;
        let width = dec.read_u32()?;
        let height = dec.read_u32()?;
        let depth = dec.read_u32()?;
        let usage = dec.read_u32()?;
        let recorded_image = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let info = vk::ImageCreateInfo {
            image_type: vk::ImageType::from_raw(image_type),
            format: vk::Format::from_raw(format),
            extent: vk::Extent3D { width, height, depth },
            usage: vk::ImageUsageFlags::from_raw(usage),
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let image = self.driver.create_image(live_device, &info)?;
        remap.images.insert(recorded_image, image.as_raw());
        Ok(())
    }

    fn replay_destroy_image(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_image = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.images.remove(&recorded_image) {
            self.driver.destroy_image(live_device, vk::Image::from_raw(live))?;
        }
        Ok(())
    }

    fn replay_create_shader_module(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let words = dec.read_counted_primitive_array::<u32>()?;
        let recorded_module = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let info = vk::ShaderModuleCreateInfo { code_size: words.len() * 4, p_code: words.as_ptr(), ..Default::default() };
        let module = self.driver.create_shader_module(live_device, &info)?;
        remap.shader_modules.insert(recorded_module, module.as_raw());
        Ok(())
    }

    fn replay_destroy_shader_module(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_module = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.shader_modules.remove(&recorded_module) {
            self.driver.destroy_shader_module(live_device, vk::ShaderModule::from_raw(live))?;
        }
        Ok(())
    }

    fn replay_create_fence(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let flags = dec.read_u32()?;
        let recorded_fence = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let info = vk::FenceCreateInfo { flags: vk::FenceCreateFlags::from_raw(flags), ..Default::default() };
        let fence = self.driver.create_fence(live_device, &info)?;
        remap.fences.insert(recorded_fence, fence.as_raw());
        Ok(())
    }

    fn replay_destroy_fence(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_fence = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.fences.remove(&recorded_fence) {
            self.driver.destroy_fence(live_device, vk::Fence::from_raw(live))?;
        }
        Ok(())
    }

    /// Waits only on the fences the capture recorded as having actually signaled, with an
    /// infinite timeout -- replay has no real-time deadline to honor.
    fn replay_wait_for_fences(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_fences = dec.read_counted_primitive_array::<u64>()?;
        let _wait_all = dec.read_bool()?;
        let _timeout = dec.read_u64()?;
        let signaled = dec.read_counted_primitive_array::<u8>()?;
        let remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let live_fences: Vec<vk::Fence> = recorded_fences
            .iter()
            .zip(signaled.iter())
            .filter(|(_, signaled)| **signaled != 0)
            .filter_map(|(f, _)| remap.fences.get(f).map(|h| vk::Fence::from_raw(*h)))
            .collect();
        drop(remap);
        if live_fences.is_empty() {
            return Ok(());
        }
        self.driver.wait_for_fences(live_device, &live_fences, true, u64::MAX)
    }

    fn replay_create_semaphore(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let flags = dec.read_u32()?;
        let recorded_semaphore = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let info = vk::SemaphoreCreateInfo { flags: vk::SemaphoreCreateFlags::from_raw(flags), ..Default::default() };
        let semaphore = self.driver.create_semaphore(live_device, &info)?;
        remap.semaphores.insert(recorded_semaphore, semaphore.as_raw());
        Ok(())
    }

    fn replay_destroy_semaphore(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_semaphore = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.semaphores.remove(&recorded_semaphore) {
            self.driver.destroy_semaphore(live_device, vk::Semaphore::from_raw(live))?;
        }
        Ok(())
    }

    fn replay_get_device_queue(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let family_index = dec.read_u32()?;
        let queue_index = dec.read_u32()?;
        let recorded_queue = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        let queue = self.driver.get_device_queue(live_device, family_index, queue_index)?;
        remap.queues.insert(recorded_queue, queue.as_raw());
        Ok(())
    }

    /// Shared by `CREATE_GRAPHICS_PIPELINES`/`CREATE_COMPUTE_PIPELINES`: both encode
    /// `{device, cache, requested_count, result_pipeline_handles}` (component L.5), matching
    /// whichever of the two the MEC generator emits for a given bind point.
    fn replay_create_pipelines(&self, dec: &mut Decoder, is_compute: bool) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let _recorded_cache = dec.read_handle()?;
        let _requested_count = dec.read_u64()?;
        let recorded_pipelines = dec.read_counted_primitive_array::<u64>()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        // Neither the live Spy path nor the MEC prologue puts a full create-info (shader stages,
        // vertex input, render pass) on the wire, so the pipeline this creates is a placeholder
        // that exists only to give later `CmdBindPipeline` records a live handle to resolve
        // against -- the same placeholder-create-info scope already accepted for buffers/images.
        for recorded_pipeline in recorded_pipelines {
            let live = if is_compute {
                self.driver.create_compute_pipelines(live_device, vk::PipelineCache::null(), &[vk::ComputePipelineCreateInfo::default()])?
            } else {
                self.driver.create_graphics_pipelines(live_device, vk::PipelineCache::null(), &[vk::GraphicsPipelineCreateInfo::default()])?
            };
            if let Some(pipeline) = live.first() {
                remap.pipelines.insert(recorded_pipeline, pipeline.as_raw());
            }
        }
        Ok(())
    }

    fn replay_destroy_pipeline(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_device = dec.read_handle()?;
        let recorded_pipeline = dec.read_handle()?;
        let mut remap = self.remap.lock().unwrap();
        let Some(live_device) = self.live_device(&remap, recorded_device) else { return Ok(()) };
        if let Some(live) = remap.pipelines.remove(&recorded_pipeline) {
            self.driver.destroy_pipeline(live_device, vk::Pipeline::from_raw(live))?;
        }
        Ok(())
    }

    /// The Spy only records `{queue, submit_count, fence}` (component K) -- no command buffer or
    /// semaphore handles, since re-issuing a submit's actual work depends on data this crate
    /// doesn't put on the wire (`DESIGN.md`). Replay still performs a real `vkQueueSubmit` with
    /// `submit_count` empty submits so the fence (if remapped) gets signaled and the queue's
    /// timeline advances, rather than silently skipping the call altogether.
    fn replay_queue_submit(&self, dec: &mut Decoder) -> anyhow::Result<()> {
        let recorded_queue = dec.read_handle()?;
        let submit_count = dec.read_u64()? as usize;
        let recorded_fence = dec.read_handle()?;
        let remap = self.remap.lock().unwrap();
        let Some(&live_queue) = remap.queues.get(&recorded_queue) else { return Ok(()) };
        let live_fence = if recorded_fence == 0 {
            vk::Fence::null()
        } else {
            match remap.fences.get(&recorded_fence) {
                Some(&live) => vk::Fence::from_raw(live),
                None => return Ok(()),
            }
        };
        drop(remap);
        let submits = vec![vk::SubmitInfo::default(); submit_count];
        self.driver.queue_submit(vk::Queue::from_raw(live_queue), &submits, live_fence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spy::serializer::SpySerializer;
    use std::sync::Arc;

    /// A fake driver that just hands out incrementing handles, so replay tests can exercise the
    /// remap bookkeeping without a real Vulkan loader.
    struct FakeDriver {
        next_handle: Mutex<u64>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self { next_handle: Mutex::new(1000) }
        }

        fn fresh(&self) -> u64 {
            let mut n = self.next_handle.lock().unwrap();
            *n += 1;
            *n
        }
    }

    impl Transform for FakeDriver {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: crate::transform::Unreachable = crate::transform::Unreachable;
            &UNREACHABLE
        }

        fn create_instance(&self, _info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
            Ok(vk::Instance::from_raw(self.fresh()))
        }

        fn destroy_instance(&self, _instance: vk::Instance) -> anyhow::Result<()> {
            Ok(())
        }

        fn create_device(&self, _pd: vk::PhysicalDevice, _info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
            Ok(vk::Device::from_raw(self.fresh()))
        }

        fn enumerate_physical_devices(&self, _instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
            Ok(vec![vk::PhysicalDevice::from_raw(9999)])
        }

        fn get_physical_device_properties(&self, _physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceProperties> {
            Ok(vk::PhysicalDeviceProperties { device_id: 11, vendor_id: 22, driver_version: 33, ..Default::default() })
        }

        fn create_fence(&self, _device: vk::Device, _info: &vk::FenceCreateInfo) -> anyhow::Result<vk::Fence> {
            Ok(vk::Fence::from_raw(self.fresh()))
        }

        fn get_device_queue(&self, _device: vk::Device, _family_index: u32, _queue_index: u32) -> anyhow::Result<vk::Queue> {
            Ok(vk::Queue::from_raw(self.fresh()))
        }

        fn create_graphics_pipelines(
            &self,
            _device: vk::Device,
            _cache: vk::PipelineCache,
            infos: &[vk::GraphicsPipelineCreateInfo],
        ) -> anyhow::Result<Vec<vk::Pipeline>> {
            Ok(infos.iter().map(|_| vk::Pipeline::from_raw(self.fresh())).collect())
        }

        fn create_compute_pipelines(
            &self,
            _device: vk::Device,
            _cache: vk::PipelineCache,
            infos: &[vk::ComputePipelineCreateInfo],
        ) -> anyhow::Result<Vec<vk::Pipeline>> {
            Ok(infos.iter().map(|_| vk::Pipeline::from_raw(self.fresh())).collect())
        }

        fn destroy_pipeline(&self, _device: vk::Device, _pipeline: vk::Pipeline) -> anyhow::Result<()> {
            Ok(())
        }

        fn queue_submit(&self, _queue: vk::Queue, _submits: &[vk::SubmitInfo], _fence: vk::Fence) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn record_stream(build: impl FnOnce(&Arc<SpySerializer>)) -> Vec<u8> {
        let sink = Arc::new(crate::sink::MemorySink::new());
        let serializer = Arc::new(SpySerializer::new(sink.clone()));
        serializer.enable();
        build(&serializer);
        sink.bytes()
    }

    #[test]
    fn create_and_destroy_instance_remap_round_trips() {
        let bytes = record_stream(|serializer| {
            let guard = serializer.get_encoder(opcode::CREATE_INSTANCE);
            guard.write(|e| e.write_handle(0xAAu64));
            drop(guard);
            let guard = serializer.get_encoder(opcode::DESTROY_INSTANCE);
            guard.write(|e| e.write_handle(0xAAu64));
        });

        let replayer = Replayer::new(Box::new(FakeDriver::new()));
        replayer.replay(&bytes).unwrap();
        assert!(replayer.remap.lock().unwrap().instances.is_empty());
    }

    #[test]
    fn create_fence_populates_remap_table() {
        let bytes = record_stream(|serializer| {
            let guard = serializer.get_encoder(opcode::CREATE_INSTANCE);
            guard.write(|e| e.write_handle(1u64));
            drop(guard);
            let guard = serializer.get_encoder(opcode::CREATE_DEVICE);
            guard.write(|e| {
                e.write_handle(2u64);
                e.write_handle(3u64);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::CREATE_FENCE);
            guard.write(|e| {
                e.write_handle(3u64);
                e.write_u32(0);
                e.write_handle(9u64);
            });
        });

        let replayer = Replayer::new(Box::new(FakeDriver::new()));
        replayer.replay(&bytes).unwrap();
        // CREATE_DEVICE requires a physical-device remap entry, which this stream never
        // populates (no ENUMERATE_PHYSICAL_DEVICES record) -- so the device, and the fence that
        // depends on it, are both legitimately skipped rather than replayed.
        assert!(replayer.remap.lock().unwrap().devices.is_empty());
        assert!(replayer.remap.lock().unwrap().fences.is_empty());
    }

    #[test]
    fn queue_submit_for_an_unremapped_queue_is_skipped_not_an_error() {
        let bytes = record_stream(|serializer| {
            let guard = serializer.get_encoder(opcode::QUEUE_SUBMIT);
            guard.write(|e| {
                e.write_handle(1u64);
                e.write_u64(0);
                e.write_handle(0u64);
            });
        });
        let replayer = Replayer::new(Box::new(FakeDriver::new()));
        assert!(replayer.replay(&bytes).is_ok());
    }

    #[test]
    fn get_device_queue_then_queue_submit_drives_a_real_submit() {
        let bytes = record_stream(|serializer| {
            let guard = serializer.get_encoder(opcode::CREATE_INSTANCE);
            guard.write(|e| e.write_handle(1u64));
            drop(guard);
            let guard = serializer.get_encoder(opcode::ENUMERATE_PHYSICAL_DEVICES);
            guard.write(|e| {
                e.write_handle(1u64);
                e.write_u64(1);
                e.write_handle(2u64);
                e.write_bool(true);
                e.write_u32(11);
                e.write_u32(22);
                e.write_u32(33);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::CREATE_DEVICE);
            guard.write(|e| {
                e.write_handle(2u64);
                e.write_handle(3u64);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::GET_DEVICE_QUEUE);
            guard.write(|e| {
                e.write_handle(3u64);
                e.write_u32(0);
                e.write_u32(0);
                e.write_handle(4u64);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::QUEUE_SUBMIT);
            guard.write(|e| {
                e.write_handle(4u64);
                e.write_u64(1);
                e.write_handle(0u64);
            });
        });

        let replayer = Replayer::new(Box::new(FakeDriver::new()));
        replayer.replay(&bytes).unwrap();
        assert!(replayer.remap.lock().unwrap().queues.contains_key(&4));
    }

    #[test]
    fn create_graphics_pipelines_populates_remap_and_destroy_clears_it() {
        let bytes = record_stream(|serializer| {
            let guard = serializer.get_encoder(opcode::CREATE_INSTANCE);
            guard.write(|e| e.write_handle(1u64));
            drop(guard);
            let guard = serializer.get_encoder(opcode::ENUMERATE_PHYSICAL_DEVICES);
            guard.write(|e| {
                e.write_handle(1u64);
                e.write_u64(1);
                e.write_handle(2u64);
                e.write_bool(true);
                e.write_u32(11);
                e.write_u32(22);
                e.write_u32(33);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::CREATE_DEVICE);
            guard.write(|e| {
                e.write_handle(2u64);
                e.write_handle(3u64);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::CREATE_GRAPHICS_PIPELINES);
            guard.write(|e| {
                e.write_handle(3u64);
                e.write_handle(0u64);
                e.write_u64(1);
                e.write_primitive_array(&[7u64]);
            });
            drop(guard);
            let guard = serializer.get_encoder(opcode::DESTROY_PIPELINE);
            guard.write(|e| {
                e.write_handle(3u64);
                e.write_handle(7u64);
            });
        });

        let replayer = Replayer::new(Box::new(FakeDriver::new()));
        replayer.replay(&bytes).unwrap();
        assert!(replayer.remap.lock().unwrap().pipelines.is_empty());
    }

    #[test]
    fn memory_update_with_no_matching_mapped_pointer_is_a_no_op() {
        let bytes = record_stream(|serializer| {
            serializer.write_auxiliary_record(OPCODE_MEMORY_UPDATE as u32, |e| {
                e.write_handle(42u64);
                e.write_u64(0);
                e.write_primitive_array(&[1u8, 2, 3]);
            });
        });
        let replayer = Replayer::new(Box::new(FakeDriver::new()));
        assert!(replayer.replay(&bytes).is_ok());
    }
}
