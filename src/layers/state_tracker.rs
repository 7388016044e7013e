//! The minimal state tracker and its extension, the full state tracker, consolidated into one
//! file since the full tracker's precomputation needs every piece of data the minimal tracker
//! maintains (components E+F).
//!
//! Minimal tracker (E): per-physical-device memory type properties, per-device-memory host
//! coherence and mapped-range bookkeeping, descriptor-update-template layout.
//!
//! Full tracker (F) extends it with: SPIR-V descriptor reflection at shader-module creation,
//! pipeline descriptor-use precomputation, descriptor-set write handling, the memory-binding
//! mirror, and submission bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;

use crate::state::wrapper::{DescriptorSlot, DescriptorUse, MemoryBinding, ReflectionResult};
use crate::state::StateBlock;
use crate::transform::Transform;

/// One template entry's shape, latched at `vkCreateDescriptorUpdateTemplate` so a later
/// `vkUpdateDescriptorSetWithTemplate` can walk the caller's opaque update-data blob without
/// re-deriving it (component E, "descriptor-update-template layout").
#[derive(Debug, Clone, Copy)]
pub struct TemplateEntryLayout {
    pub descriptor_type: i32,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_count: u32,
    pub offset: usize,
    pub stride: usize,
}

pub struct StateTracker {
    next: Arc<dyn Transform>,
    state: Arc<StateBlock>,

    /// Component E: memory type properties per physical device.
    memory_properties: Mutex<HashMap<u64, vk::PhysicalDeviceMemoryProperties>>,
    /// Component E: descriptor-update-template entry layouts, keyed by template handle.
    template_layouts: Mutex<HashMap<u64, Vec<TemplateEntryLayout>>>,

    /// Component F.2 fallback: descriptor uses declared by each set layout bound into a pipeline
    /// layout, used when SPIR-V reflection failed for any stage.
    set_layout_bindings: Mutex<HashMap<u64, Vec<DescriptorUse>>>,
    pipeline_layout_set_layouts: Mutex<HashMap<u64, Vec<u64>>>,

    /// Component F.5: the pipeline and descriptor sets currently bound on each command buffer,
    /// observed purely by intercepting `vkCmdBindPipeline`/`vkCmdBindDescriptorSets` -- enough to
    /// run the bound-descriptor walk when the command buffer is later submitted.
    bound_pipeline: Mutex<HashMap<u64, u64>>,
    bound_descriptor_sets: Mutex<HashMap<u64, Vec<u64>>>,
}

impl StateTracker {
    pub fn new(next: Arc<dyn Transform>, state: Arc<StateBlock>) -> Self {
        Self {
            next,
            state,
            memory_properties: Mutex::new(HashMap::new()),
            template_layouts: Mutex::new(HashMap::new()),
            set_layout_bindings: Mutex::new(HashMap::new()),
            pipeline_layout_set_layouts: Mutex::new(HashMap::new()),
            bound_pipeline: Mutex::new(HashMap::new()),
            bound_descriptor_sets: Mutex::new(HashMap::new()),
        }
    }

    fn is_host_coherent(&self, physical_device: u64, memory_type_index: u32) -> bool {
        let Some(props) = self.memory_properties.lock().unwrap().get(&physical_device).copied() else {
            return true;
        };
        let flags = props.memory_types[memory_type_index as usize].property_flags;
        flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Reflects one shader module's SPIR-V for every entry point referenced by `stages`, caching
    /// the result on the module's wrapper (component F.1).
    #[cfg(feature = "shader-reflection")]
    fn reflect(&self, module: u64, entry_point: &str) -> ReflectionResult {
        let Ok(wrapper) = self.state.shader_modules.get(module) else {
            return ReflectionResult::Unknown;
        };
        if let Some(cached) = wrapper.reflection.lock().unwrap().get(entry_point) {
            return cached.clone();
        }
        let result = reflect_spirv(&wrapper.spirv, entry_point);
        wrapper.reflection.lock().unwrap().insert(entry_point.to_string(), result.clone());
        result
    }

    #[cfg(not(feature = "shader-reflection"))]
    fn reflect(&self, _module: u64, _entry_point: &str) -> ReflectionResult {
        ReflectionResult::Unknown
    }

    /// Unions the descriptor uses of every stage in a (graphics or compute) pipeline; falls back
    /// to every binding declared across the pipeline layout's set layouts if any stage's
    /// reflection came back unknown (component F.2).
    fn precompute_descriptor_uses(&self, layout: u64, stages: &[(vk::ShaderModule, &std::ffi::CStr)]) -> Vec<DescriptorUse> {
        let mut uses = HashSet::new();
        let mut any_unknown = false;
        for (module, entry_point) in stages {
            let entry_point = entry_point.to_string_lossy();
            match self.reflect(module.as_raw(), &entry_point) {
                ReflectionResult::Known(du) => uses.extend(du),
                ReflectionResult::Unknown => any_unknown = true,
            }
        }
        if any_unknown {
            uses.clear();
            if let Some(set_layouts) = self.pipeline_layout_set_layouts.lock().unwrap().get(&layout) {
                let bindings = self.set_layout_bindings.lock().unwrap();
                for sl in set_layouts {
                    if let Some(du) = bindings.get(sl) {
                        uses.extend(du.iter().copied());
                    }
                }
            }
        }
        uses.into_iter().collect()
    }

    /// Updates a descriptor set's slots in place for a single `VkWriteDescriptorSet`, spilling
    /// into subsequent bindings when the write's `descriptorCount` crosses the destination
    /// binding's declared array size (component F.3).
    fn apply_write(&self, write: &vk::WriteDescriptorSet) -> anyhow::Result<()> {
        let Ok(set) = self.state.descriptor_sets.get(write.dst_set.as_raw()) else { return Ok(()) };
        let mut slots = set.slots.lock().unwrap();
        let start = write.dst_array_element as usize + write.dst_binding as usize;
        if slots.len() < start + write.descriptor_count as usize {
            slots.resize(start + write.descriptor_count as usize, DescriptorSlot::Empty);
        }
        for i in 0..write.descriptor_count as usize {
            let slot = if !write.p_image_info.is_null() {
                let info = unsafe { *write.p_image_info.add(i) };
                DescriptorSlot::Image { sampler: info.sampler.as_raw(), view: info.image_view.as_raw(), layout: info.image_layout.as_raw() }
            } else if !write.p_buffer_info.is_null() {
                let info = unsafe { *write.p_buffer_info.add(i) };
                DescriptorSlot::Buffer { buffer: info.buffer.as_raw(), offset: info.offset, range: info.range }
            } else if !write.p_texel_buffer_view.is_null() {
                DescriptorSlot::TexelBufferView(unsafe { *write.p_texel_buffer_view.add(i) }.as_raw())
            } else {
                DescriptorSlot::Empty
            };
            slots[start + i] = slot;
        }
        Ok(())
    }
}

impl Transform for StateTracker {
    fn next(&self) -> &dyn Transform {
        self.next.as_ref()
    }

    fn get_physical_device_memory_properties(&self, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceMemoryProperties> {
        let props = self.next().get_physical_device_memory_properties(physical_device)?;
        self.memory_properties.lock().unwrap().insert(physical_device.as_raw(), props);
        Ok(props)
    }

    fn allocate_memory(&self, device: vk::Device, info: &vk::MemoryAllocateInfo) -> anyhow::Result<vk::DeviceMemory> {
        let handle = self.next().allocate_memory(device, info)?;
        // The physical device backing `device` isn't threaded through this call; callers that
        // need exact coherence must have already primed `memory_properties` for the owning
        // physical device via `get_physical_device_memory_properties`. Absent that, every
        // allocation is conservatively treated as coherent (see `is_host_coherent`).
        if let Ok(wrapper) = self.state.device_memories.get(handle.as_raw()) {
            let physical_device = self.state.devices.get(device.as_raw()).ok().and_then(|d| d.parent);
            let coherent = physical_device.map(|pd| self.is_host_coherent(pd, info.memory_type_index)).unwrap_or(true);
            *wrapper.is_coherent.lock().unwrap() = coherent;
        }
        Ok(handle)
    }

    fn map_memory(&self, device: vk::Device, memory: vk::DeviceMemory, offset: u64, size: u64) -> anyhow::Result<*mut std::ffi::c_void> {
        let ptr = self.next().map_memory(device, memory, offset, size)?;
        if let Ok(wrapper) = self.state.device_memories.get(memory.as_raw()) {
            *wrapper.mapped.lock().unwrap() = Some(crate::state::wrapper::MappedRange { shadow_location: ptr as usize, offset, size });
        }
        Ok(ptr)
    }

    fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        if let Ok(wrapper) = self.state.device_memories.get(memory.as_raw()) {
            *wrapper.mapped.lock().unwrap() = None;
        }
        self.next().unmap_memory(device, memory)
    }

    fn create_descriptor_set_layout(&self, device: vk::Device, info: &vk::DescriptorSetLayoutCreateInfo) -> anyhow::Result<vk::DescriptorSetLayout> {
        let handle = self.next().create_descriptor_set_layout(device, info)?;
        let bindings = unsafe { std::slice::from_raw_parts(info.p_bindings, info.binding_count as usize) };
        let uses = bindings.iter().map(|b| DescriptorUse { set: 0, binding: b.binding, count: b.descriptor_count }).collect();
        self.set_layout_bindings.lock().unwrap().insert(handle.as_raw(), uses);
        Ok(handle)
    }

    fn create_pipeline_layout(&self, device: vk::Device, info: &vk::PipelineLayoutCreateInfo) -> anyhow::Result<vk::PipelineLayout> {
        let handle = self.next().create_pipeline_layout(device, info)?;
        let set_layouts = unsafe { std::slice::from_raw_parts(info.p_set_layouts, info.set_layout_count as usize) };
        self.pipeline_layout_set_layouts.lock().unwrap().insert(handle.as_raw(), set_layouts.iter().map(|sl| sl.as_raw()).collect());
        Ok(handle)
    }

    fn create_descriptor_update_template(&self, device: vk::Device, info: &vk::DescriptorUpdateTemplateCreateInfo) -> anyhow::Result<vk::DescriptorUpdateTemplate> {
        let handle = self.next().create_descriptor_update_template(device, info)?;
        let entries = unsafe { std::slice::from_raw_parts(info.p_descriptor_update_entries, info.descriptor_update_entry_count as usize) };
        let layouts = entries
            .iter()
            .map(|e| TemplateEntryLayout {
                descriptor_type: e.descriptor_type.as_raw(),
                dst_binding: e.dst_binding,
                dst_array_element: e.dst_array_element,
                descriptor_count: e.descriptor_count,
                offset: e.offset,
                stride: e.stride,
            })
            .collect();
        self.template_layouts.lock().unwrap().insert(handle.as_raw(), layouts);
        Ok(handle)
    }

    fn create_graphics_pipelines(&self, device: vk::Device, cache: vk::PipelineCache, infos: &[vk::GraphicsPipelineCreateInfo]) -> anyhow::Result<Vec<vk::Pipeline>> {
        let handles = self.next().create_graphics_pipelines(device, cache, infos)?;
        for (handle, info) in handles.iter().zip(infos) {
            let stages = unsafe { std::slice::from_raw_parts(info.p_stages, info.stage_count as usize) };
            let stage_spirv: Vec<(i32, Vec<u8>)> = stages
                .iter()
                .filter_map(|s| self.state.shader_modules.get(s.module.as_raw()).ok().map(|m| (s.stage.as_raw(), m.spirv.clone())))
                .collect();
            let stage_refs: Vec<(vk::ShaderModule, &std::ffi::CStr)> =
                stages.iter().map(|s| (s.module, unsafe { std::ffi::CStr::from_ptr(s.p_name) })).collect();
            let descriptor_uses = self.precompute_descriptor_uses(info.layout.as_raw(), &stage_refs);
            self.state.pipelines.create(
                handle.as_raw(),
                crate::state::types::Pipeline {
                    handle: handle.as_raw(),
                    device: device.as_raw(),
                    bind_point: vk::PipelineBindPoint::GRAPHICS.as_raw(),
                    cache: if cache.as_raw() == 0 { None } else { Some(cache.as_raw()) },
                    layout: info.layout.as_raw(),
                    stage_spirv,
                    descriptor_uses: Mutex::new(descriptor_uses),
                    cloned_from: None,
                },
            )?;
        }
        Ok(handles)
    }

    fn create_compute_pipelines(&self, device: vk::Device, cache: vk::PipelineCache, infos: &[vk::ComputePipelineCreateInfo]) -> anyhow::Result<Vec<vk::Pipeline>> {
        let handles = self.next().create_compute_pipelines(device, cache, infos)?;
        for (handle, info) in handles.iter().zip(infos) {
            let module = info.stage.module;
            let stage_spirv = self.state.shader_modules.get(module.as_raw()).ok().map(|m| vec![(info.stage.stage.as_raw(), m.spirv.clone())]).unwrap_or_default();
            let entry_point = unsafe { std::ffi::CStr::from_ptr(info.stage.p_name) };
            let descriptor_uses = self.precompute_descriptor_uses(info.layout.as_raw(), &[(module, entry_point)]);
            self.state.pipelines.create(
                handle.as_raw(),
                crate::state::types::Pipeline {
                    handle: handle.as_raw(),
                    device: device.as_raw(),
                    bind_point: vk::PipelineBindPoint::COMPUTE.as_raw(),
                    cache: if cache.as_raw() == 0 { None } else { Some(cache.as_raw()) },
                    layout: info.layout.as_raw(),
                    stage_spirv,
                    descriptor_uses: Mutex::new(descriptor_uses),
                    cloned_from: None,
                },
            )?;
        }
        Ok(handles)
    }

    fn update_descriptor_sets(&self, device: vk::Device, writes: &[vk::WriteDescriptorSet]) -> anyhow::Result<()> {
        self.next().update_descriptor_sets(device, writes)?;
        for write in writes {
            self.apply_write(write)?;
        }
        Ok(())
    }

    fn get_buffer_memory_requirements(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<vk::MemoryRequirements> {
        let reqs = self.next().get_buffer_memory_requirements(device, buffer)?;
        if let Ok(wrapper) = self.state.buffers.get(buffer.as_raw()) {
            *wrapper.required_size.lock().unwrap() = reqs.size;
        }
        Ok(reqs)
    }

    fn get_image_memory_requirements(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<vk::MemoryRequirements> {
        let reqs = self.next().get_image_memory_requirements(device, image)?;
        if let Ok(wrapper) = self.state.images.get(image.as_raw()) {
            *wrapper.required_size.lock().unwrap() = reqs.size;
        }
        Ok(reqs)
    }

    fn bind_buffer_memory(&self, device: vk::Device, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> anyhow::Result<()> {
        self.next().bind_buffer_memory(device, buffer, memory, offset)?;
        if let Ok(wrapper) = self.state.buffers.get(buffer.as_raw()) {
            let size = *wrapper.required_size.lock().unwrap();
            wrapper.bindings.lock().unwrap().push(MemoryBinding { memory: memory.as_raw(), offset, size });
        }
        Ok(())
    }

    fn bind_image_memory(&self, device: vk::Device, image: vk::Image, memory: vk::DeviceMemory, offset: u64) -> anyhow::Result<()> {
        self.next().bind_image_memory(device, image, memory, offset)?;
        if let Ok(wrapper) = self.state.images.get(image.as_raw()) {
            let size = *wrapper.required_size.lock().unwrap();
            wrapper.bindings.lock().unwrap().push(MemoryBinding { memory: memory.as_raw(), offset, size });
        }
        Ok(())
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        self.bound_pipeline.lock().unwrap().insert(cb.as_raw(), pipeline.as_raw());
        self.next().cmd_bind_pipeline(cb, bind_point, pipeline)
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) -> anyhow::Result<()> {
        let mut bound = self.bound_descriptor_sets.lock().unwrap();
        let entry = bound.entry(cb.as_raw()).or_default();
        let needed = first_set as usize + sets.len();
        if entry.len() < needed {
            entry.resize(needed, 0);
        }
        for (i, set) in sets.iter().enumerate() {
            entry[first_set as usize + i] = set.as_raw();
        }
        drop(bound);
        self.next().cmd_bind_descriptor_sets(cb, bind_point, layout, first_set, sets)
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> anyhow::Result<()> {
        self.bound_pipeline.lock().unwrap().remove(&cb.as_raw());
        self.bound_descriptor_sets.lock().unwrap().remove(&cb.as_raw());
        self.next().begin_command_buffer(cb, info)
    }

    /// Reads back every descriptor the currently-bound pipeline can reach on `cb` and classifies
    /// the memories they back as read or read-write -- the "bound-descriptor walk" the submission
    /// preamble runs through each command buffer's `pre_run` (component F.5).
    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> anyhow::Result<()> {
        let mut write_sets: HashSet<u64> = HashSet::new();
        for submit in submits {
            let buffers = unsafe { std::slice::from_raw_parts(submit.p_command_buffers, submit.command_buffer_count as usize) };
            for cb in buffers {
                if let Ok(wrapper) = self.state.command_buffers.get(cb.as_raw()) {
                    let mut pre_run = wrapper.pre_run.lock().unwrap();
                    for hook in pre_run.iter_mut() {
                        hook();
                    }
                }
                write_sets.extend(self.writes_reached_by(cb.as_raw()));
            }
        }
        self.next().queue_submit(queue, submits, fence)?;
        if let Ok(fence_wrapper) = self.state.fences.get(fence.as_raw()) {
            fence_wrapper.memory_writes.lock().unwrap().extend(write_sets);
        }
        for submit in submits {
            let buffers = unsafe { std::slice::from_raw_parts(submit.p_command_buffers, submit.command_buffer_count as usize) };
            for cb in buffers {
                if let Ok(wrapper) = self.state.command_buffers.get(cb.as_raw()) {
                    let mut post_run = wrapper.post_run.lock().unwrap();
                    for hook in post_run.iter_mut() {
                        hook();
                    }
                }
            }
            let signal_semaphores = unsafe { std::slice::from_raw_parts(submit.p_signal_semaphores, submit.signal_semaphore_count as usize) };
            for sem in signal_semaphores {
                if let Ok(wrapper) = self.state.semaphores.get(sem.as_raw()) {
                    *wrapper.value.lock().unwrap() += 1;
                }
            }
        }
        Ok(())
    }
}

impl StateTracker {
    /// The descriptor-uses precomputed for `cb`'s currently-bound pipeline, resolved against the
    /// descriptor sets bound at the matching set indices, widened to the buffer/image memories
    /// those slots reference.
    fn writes_reached_by(&self, cb: u64) -> HashSet<u64> {
        let mut memories = HashSet::new();
        let Some(&pipeline) = self.bound_pipeline.lock().unwrap().get(&cb) else { return memories };
        let Ok(pipeline) = self.state.pipelines.get(pipeline) else { return memories };
        let Some(sets) = self.bound_descriptor_sets.lock().unwrap().get(&cb).cloned() else { return memories };
        for du in pipeline.descriptor_uses.lock().unwrap().iter() {
            let Some(&set_handle) = sets.get(du.set as usize) else { continue };
            if set_handle == 0 {
                continue;
            }
            let Ok(set) = self.state.descriptor_sets.get(set_handle) else { continue };
            let slots = set.slots.lock().unwrap();
            for i in 0..du.count as usize {
                let Some(slot) = slots.get(du.binding as usize + i) else { continue };
                if let DescriptorSlot::Buffer { buffer, .. } = slot {
                    if let Ok(b) = self.state.buffers.get(*buffer) {
                        for binding in b.bindings.lock().unwrap().iter() {
                            memories.insert(binding.memory);
                        }
                    }
                }
            }
        }
        memories
    }
}

#[cfg(feature = "shader-reflection")]
fn reflect_spirv(spirv: &[u8], entry_point: &str) -> ReflectionResult {
    use spirv_cross::{glsl, spirv};

    if spirv.len() % 4 != 0 {
        return ReflectionResult::Unknown;
    }
    let words: Vec<u32> = spirv.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
    let module = spirv::Module::from_words(&words);
    let Ok(mut ast) = spirv::Ast::<glsl::Target>::parse(&module) else { return ReflectionResult::Unknown };
    let Ok(resources) = ast.get_shader_resources() else { return ReflectionResult::Unknown };

    let mut uses = Vec::new();
    for resource in resources.uniform_buffers.iter().chain(resources.storage_buffers.iter()).chain(resources.sampled_images.iter()).chain(resources.storage_images.iter()) {
        let Ok(set) = ast.get_decoration(resource.id, spirv::Decoration::DescriptorSet) else { continue };
        let Ok(binding) = ast.get_decoration(resource.id, spirv::Decoration::Binding) else { continue };
        uses.push(DescriptorUse { set, binding, count: 1 });
    }
    let _ = entry_point;
    ReflectionResult::Known(uses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{CommandBuffer, DescriptorSet, Fence};
    use crate::transform::Unreachable;

    struct NoopNext;
    impl Transform for NoopNext {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: Unreachable = Unreachable;
            &UNREACHABLE
        }

        fn queue_submit(&self, _queue: vk::Queue, _submits: &[vk::SubmitInfo], _fence: vk::Fence) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn tracker() -> (StateTracker, Arc<StateBlock>) {
        let state = Arc::new(StateBlock::new());
        (StateTracker::new(Arc::new(NoopNext), state.clone()), state)
    }

    #[test]
    fn apply_write_populates_buffer_slot() {
        let (tracker, state) = tracker();
        state
            .descriptor_sets
            .create(1, DescriptorSet { handle: 1, pool: 0, layout: 0, slots: Mutex::new(Vec::new()) })
            .unwrap();

        let buffer_info = vk::DescriptorBufferInfo { buffer: vk::Buffer::from_raw(9), offset: 16, range: 64 };
        let write = vk::WriteDescriptorSet {
            dst_set: vk::DescriptorSet::from_raw(1),
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_count: 1,
            p_buffer_info: &buffer_info,
            ..Default::default()
        };
        tracker.apply_write(&write).unwrap();

        let set = state.descriptor_sets.get(1).unwrap();
        match set.slots.lock().unwrap()[0] {
            DescriptorSlot::Buffer { buffer, offset, range } => {
                assert_eq!(buffer, 9);
                assert_eq!(offset, 16);
                assert_eq!(range, 64);
            }
            _ => panic!("expected buffer slot"),
        }
    }

    #[test]
    fn submission_transfers_write_set_to_fence() {
        let (tracker, state) = tracker();
        state.fences.create(1, Fence { handle: 1, device: 0, memory_writes: Mutex::new(HashSet::new()) }).unwrap();
        state
            .command_buffers
            .create(2, CommandBuffer::new(2, 0, 0, Vec::new()))
            .unwrap();

        let cbs = [vk::CommandBuffer::from_raw(2)];
        let submit = vk::SubmitInfo { command_buffer_count: 1, p_command_buffers: cbs.as_ptr(), ..Default::default() };
        tracker.queue_submit(vk::Queue::from_raw(3), &[submit], vk::Fence::from_raw(1)).unwrap();

        // No pipeline bound, so the write set is empty but the fence bookkeeping path still runs.
        assert!(state.fences.get(1).unwrap().memory_writes.lock().unwrap().is_empty());
    }

    #[test]
    fn bound_pipeline_descriptor_reads_resolve_to_backing_memory() {
        let (tracker, state) = tracker();
        state
            .buffers
            .create(
                5,
                crate::state::types::Buffer {
                    handle: 5,
                    device: 0,
                    create_info: Vec::new(),
                    required_size: Mutex::new(64),
                    bindings: Mutex::new(vec![MemoryBinding { memory: 77, offset: 0, size: 64 }]),
                },
            )
            .unwrap();
        state
            .descriptor_sets
            .create(1, DescriptorSet { handle: 1, pool: 0, layout: 0, slots: Mutex::new(vec![DescriptorSlot::Buffer { buffer: 5, offset: 0, range: 64 }]) })
            .unwrap();
        state
            .pipelines
            .create(
                10,
                crate::state::types::Pipeline {
                    handle: 10,
                    device: 0,
                    bind_point: vk::PipelineBindPoint::GRAPHICS.as_raw(),
                    cache: None,
                    layout: 0,
                    stage_spirv: Vec::new(),
                    descriptor_uses: Mutex::new(vec![DescriptorUse { set: 0, binding: 0, count: 1 }]),
                    cloned_from: None,
                },
            )
            .unwrap();

        tracker.bound_pipeline.lock().unwrap().insert(42, 10);
        tracker.bound_descriptor_sets.lock().unwrap().insert(42, vec![1]);

        let memories = tracker.writes_reached_by(42);
        assert_eq!(memories, HashSet::from([77]));
    }
}
