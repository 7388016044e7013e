//! The `Transform` trait: the unit of composition for interception logic (component A/J, §9
//! "Dynamic dispatch").
//!
//! Every transform exposes the full Vulkan entry-point surface and forwards to its successor by
//! default; a transform overrides only the entry points it cares about. This file spells out the
//! subset of the surface exercised by the rest of this crate (creation/destruction of the core
//! object types, memory mapping, command recording, submission, and presentation) -- the
//! remaining few hundred `vkCmd*`/`vkCreate*` entry points are generated the same way and are
//! omitted here for brevity, per the scoping note in `DESIGN.md`.

use std::sync::Arc;

use ash::vk;

/// A transform that panics if reached; used as the synthetic terminus of a transform whose
/// `next` was never meant to be called (i.e. the base caller, which must override every entry
/// point it participates in).
pub struct Unreachable;

impl Transform for Unreachable {
    fn next(&self) -> &dyn Transform {
        panic!("Unreachable::next() called")
    }
}

/// A Vulkan call as it flows through the pipeline. Each method takes the arguments of the
/// corresponding entry point and returns the driver's result; a transform may inspect or mutate
/// state before and after calling `self.next().$entry_point(..)`.
pub trait Transform: Send + Sync {
    fn next(&self) -> &dyn Transform;

    fn create_instance(&self, info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
        self.next().create_instance(info)
    }

    fn destroy_instance(&self, instance: vk::Instance) -> anyhow::Result<()> {
        self.next().destroy_instance(instance)
    }

    fn enumerate_physical_devices(&self, instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        self.next().enumerate_physical_devices(instance)
    }

    fn create_device(&self, physical_device: vk::PhysicalDevice, info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
        self.next().create_device(physical_device, info)
    }

    fn destroy_device(&self, device: vk::Device) -> anyhow::Result<()> {
        self.next().destroy_device(device)
    }

    fn get_device_queue(&self, device: vk::Device, family_index: u32, queue_index: u32) -> anyhow::Result<vk::Queue> {
        self.next().get_device_queue(device, family_index, queue_index)
    }

    fn allocate_memory(&self, device: vk::Device, info: &vk::MemoryAllocateInfo) -> anyhow::Result<vk::DeviceMemory> {
        self.next().allocate_memory(device, info)
    }

    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        self.next().free_memory(device, memory)
    }

    fn map_memory(&self, device: vk::Device, memory: vk::DeviceMemory, offset: u64, size: u64) -> anyhow::Result<*mut std::ffi::c_void> {
        self.next().map_memory(device, memory, offset, size)
    }

    fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        self.next().unmap_memory(device, memory)
    }

    fn flush_mapped_memory_ranges(&self, device: vk::Device, ranges: &[vk::MappedMemoryRange]) -> anyhow::Result<()> {
        self.next().flush_mapped_memory_ranges(device, ranges)
    }

    fn create_buffer(&self, device: vk::Device, info: &vk::BufferCreateInfo) -> anyhow::Result<vk::Buffer> {
        self.next().create_buffer(device, info)
    }

    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<()> {
        self.next().destroy_buffer(device, buffer)
    }

    fn get_buffer_memory_requirements(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<vk::MemoryRequirements> {
        self.next().get_buffer_memory_requirements(device, buffer)
    }

    fn bind_buffer_memory(&self, device: vk::Device, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> anyhow::Result<()> {
        self.next().bind_buffer_memory(device, buffer, memory, offset)
    }

    fn create_image(&self, device: vk::Device, info: &vk::ImageCreateInfo) -> anyhow::Result<vk::Image> {
        self.next().create_image(device, info)
    }

    fn destroy_image(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<()> {
        self.next().destroy_image(device, image)
    }

    fn bind_image_memory(&self, device: vk::Device, image: vk::Image, memory: vk::DeviceMemory, offset: u64) -> anyhow::Result<()> {
        self.next().bind_image_memory(device, image, memory, offset)
    }

    fn get_image_memory_requirements(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<vk::MemoryRequirements> {
        self.next().get_image_memory_requirements(device, image)
    }

    fn get_physical_device_memory_properties(&self, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceMemoryProperties> {
        self.next().get_physical_device_memory_properties(physical_device)
    }

    /// Used by the Spy to emit the `{deviceID, vendorID, driverVersion}` tuple that lets replay
    /// remap physical devices (component K).
    fn get_physical_device_properties(&self, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceProperties> {
        self.next().get_physical_device_properties(physical_device)
    }

    fn create_shader_module(&self, device: vk::Device, info: &vk::ShaderModuleCreateInfo) -> anyhow::Result<vk::ShaderModule> {
        self.next().create_shader_module(device, info)
    }

    fn destroy_shader_module(&self, device: vk::Device, module: vk::ShaderModule) -> anyhow::Result<()> {
        self.next().destroy_shader_module(device, module)
    }

    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo],
    ) -> anyhow::Result<Vec<vk::Pipeline>> {
        self.next().create_graphics_pipelines(device, cache, infos)
    }

    fn destroy_pipeline(&self, device: vk::Device, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        self.next().destroy_pipeline(device, pipeline)
    }

    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo],
    ) -> anyhow::Result<Vec<vk::Pipeline>> {
        self.next().create_compute_pipelines(device, cache, infos)
    }

    fn create_pipeline_layout(&self, device: vk::Device, info: &vk::PipelineLayoutCreateInfo) -> anyhow::Result<vk::PipelineLayout> {
        self.next().create_pipeline_layout(device, info)
    }

    fn destroy_pipeline_layout(&self, device: vk::Device, layout: vk::PipelineLayout) -> anyhow::Result<()> {
        self.next().destroy_pipeline_layout(device, layout)
    }

    fn create_descriptor_set_layout(&self, device: vk::Device, info: &vk::DescriptorSetLayoutCreateInfo) -> anyhow::Result<vk::DescriptorSetLayout> {
        self.next().create_descriptor_set_layout(device, info)
    }

    fn create_descriptor_update_template(&self, device: vk::Device, info: &vk::DescriptorUpdateTemplateCreateInfo) -> anyhow::Result<vk::DescriptorUpdateTemplate> {
        self.next().create_descriptor_update_template(device, info)
    }

    fn destroy_descriptor_update_template(&self, device: vk::Device, template: vk::DescriptorUpdateTemplate) -> anyhow::Result<()> {
        self.next().destroy_descriptor_update_template(device, template)
    }

    fn create_descriptor_pool(&self, device: vk::Device, info: &vk::DescriptorPoolCreateInfo) -> anyhow::Result<vk::DescriptorPool> {
        self.next().create_descriptor_pool(device, info)
    }

    fn allocate_descriptor_sets(&self, device: vk::Device, info: &vk::DescriptorSetAllocateInfo) -> anyhow::Result<Vec<vk::DescriptorSet>> {
        self.next().allocate_descriptor_sets(device, info)
    }

    fn free_descriptor_sets(&self, device: vk::Device, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> anyhow::Result<()> {
        self.next().free_descriptor_sets(device, pool, sets)
    }

    fn update_descriptor_sets(&self, device: vk::Device, writes: &[vk::WriteDescriptorSet]) -> anyhow::Result<()> {
        self.next().update_descriptor_sets(device, writes)
    }

    fn create_command_pool(&self, device: vk::Device, info: &vk::CommandPoolCreateInfo) -> anyhow::Result<vk::CommandPool> {
        self.next().create_command_pool(device, info)
    }

    fn allocate_command_buffers(&self, device: vk::Device, info: &vk::CommandBufferAllocateInfo) -> anyhow::Result<Vec<vk::CommandBuffer>> {
        self.next().allocate_command_buffers(device, info)
    }

    fn free_command_buffers(&self, device: vk::Device, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) -> anyhow::Result<()> {
        self.next().free_command_buffers(device, pool, buffers)
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> anyhow::Result<()> {
        self.next().begin_command_buffer(cb, info)
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
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
        self.next().cmd_bind_descriptor_sets(cb, bind_point, layout, first_set, sets)
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> anyhow::Result<()> {
        self.next().end_command_buffer(cb)
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents) -> anyhow::Result<()> {
        self.next().cmd_begin_render_pass(cb, info, contents)
    }

    fn cmd_next_subpass(&self, cb: vk::CommandBuffer, contents: vk::SubpassContents) -> anyhow::Result<()> {
        self.next().cmd_next_subpass(cb, contents)
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) -> anyhow::Result<()> {
        self.next().cmd_end_render_pass(cb)
    }

    fn cmd_update_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        self.next().cmd_update_buffer(cb, buffer, offset, data)
    }

    fn cmd_push_constants(&self, cb: vk::CommandBuffer, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        self.next().cmd_push_constants(cb, layout, stages, offset, data)
    }

    fn cmd_draw(&self, cb: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> anyhow::Result<()> {
        self.next().cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance)
    }

    fn create_fence(&self, device: vk::Device, info: &vk::FenceCreateInfo) -> anyhow::Result<vk::Fence> {
        self.next().create_fence(device, info)
    }

    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence) -> anyhow::Result<()> {
        self.next().destroy_fence(device, fence)
    }

    fn wait_for_fences(&self, device: vk::Device, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> anyhow::Result<()> {
        self.next().wait_for_fences(device, fences, wait_all, timeout)
    }

    /// Used by the Spy after a multi-fence `vkWaitForFences` to record which fences actually
    /// signaled, so replay only waits on those (component K).
    fn get_fence_status(&self, device: vk::Device, fence: vk::Fence) -> anyhow::Result<bool> {
        self.next().get_fence_status(device, fence)
    }

    fn create_semaphore(&self, device: vk::Device, info: &vk::SemaphoreCreateInfo) -> anyhow::Result<vk::Semaphore> {
        self.next().create_semaphore(device, info)
    }

    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) -> anyhow::Result<()> {
        self.next().destroy_semaphore(device, semaphore)
    }

    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> anyhow::Result<()> {
        self.next().queue_submit(queue, submits, fence)
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> anyhow::Result<()> {
        self.next().queue_present(queue, info)
    }
}

/// A chain of transforms, innermost-first, terminated implicitly by whichever transform's
/// `next()` is never called because it overrides every method it is reached through.
pub type TransformChain = Arc<dyn Transform>;
