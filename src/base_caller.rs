//! Resolves and invokes real driver entry points (component A).
//!
//! Holds three dispatch-table maps -- instance, physical-device (mirrors its owning instance's
//! table), and device -- plus mirrors for queue and command buffer that forward to their owning
//! device's table. Everything is `RwLock`-guarded so concurrent application threads can resolve
//! calls without contending on a single global lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ash::vk;
use ash::vk::Handle;

use crate::error::Error;

#[derive(Default)]
pub struct BaseCaller {
    entry: Option<ash::Entry>,
    instances: RwLock<HashMap<u64, Arc<ash::Instance>>>,
    physical_device_instance: RwLock<HashMap<u64, u64>>,
    devices: RwLock<HashMap<u64, Arc<ash::Device>>>,
    queue_device: RwLock<HashMap<u64, u64>>,
    command_buffer_device: RwLock<HashMap<u64, u64>>,
}

impl BaseCaller {
    /// Loads the platform Vulkan loader. Must be called once before any instance is created.
    pub fn load() -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(Error::LoadFailed)?;
        Ok(Self { entry: Some(entry), ..Self::default() })
    }

    pub fn entry(&self) -> &ash::Entry {
        self.entry.as_ref().expect("BaseCaller::load was not called")
    }

    /// Resolves every instance-scope function via `vkGetInstanceProcAddr`, i.e. simply records
    /// the already-loaded `ash::Instance` dispatch table under its handle.
    pub fn on_instance_created(&self, handle: vk::Instance, instance: ash::Instance) -> anyhow::Result<()> {
        self.instances.write()?.insert(handle.as_raw(), Arc::new(instance));
        Ok(())
    }

    pub fn on_physical_device_enumerated(&self, handle: vk::PhysicalDevice, instance: vk::Instance) -> anyhow::Result<()> {
        self.physical_device_instance.write()?.insert(handle.as_raw(), instance.as_raw());
        Ok(())
    }

    /// Resolves device-scope functions via `vkGetDeviceProcAddr` obtained from the physical
    /// device's owning instance.
    pub fn on_device_created(&self, handle: vk::Device, device: ash::Device) -> anyhow::Result<()> {
        self.devices.write()?.insert(handle.as_raw(), Arc::new(device));
        Ok(())
    }

    pub fn on_queue_retrieved(&self, handle: vk::Queue, device: vk::Device) -> anyhow::Result<()> {
        self.queue_device.write()?.insert(handle.as_raw(), device.as_raw());
        Ok(())
    }

    pub fn on_command_buffer_allocated(&self, handle: vk::CommandBuffer, device: vk::Device) -> anyhow::Result<()> {
        self.command_buffer_device.write()?.insert(handle.as_raw(), device.as_raw());
        Ok(())
    }

    pub fn instance_table(&self, handle: vk::Instance) -> anyhow::Result<Arc<ash::Instance>> {
        self.instances
            .read()?
            .get(&handle.as_raw())
            .cloned()
            .ok_or(Error::UnknownHandle("VkInstance", "instance_table").into())
    }

    pub fn instance_table_for_physical_device(&self, handle: vk::PhysicalDevice) -> anyhow::Result<Arc<ash::Instance>> {
        let instance = *self
            .physical_device_instance
            .read()?
            .get(&handle.as_raw())
            .ok_or(Error::UnknownHandle("VkPhysicalDevice", "instance_table_for_physical_device"))?;
        self.instance_table(vk::Instance::from_raw(instance))
    }

    pub fn device_table(&self, handle: vk::Device) -> anyhow::Result<Arc<ash::Device>> {
        self.devices
            .read()?
            .get(&handle.as_raw())
            .cloned()
            .ok_or(Error::UnknownHandle("VkDevice", "device_table").into())
    }

    pub fn device_table_for_queue(&self, handle: vk::Queue) -> anyhow::Result<Arc<ash::Device>> {
        let device = *self
            .queue_device
            .read()?
            .get(&handle.as_raw())
            .ok_or(Error::UnknownHandle("VkQueue", "device_table_for_queue"))?;
        self.device_table(vk::Device::from_raw(device))
    }

    pub fn device_table_for_command_buffer(&self, handle: vk::CommandBuffer) -> anyhow::Result<Arc<ash::Device>> {
        let device = *self
            .command_buffer_device
            .read()?
            .get(&handle.as_raw())
            .ok_or(Error::UnknownHandle("VkCommandBuffer", "device_table_for_command_buffer"))?;
        self.device_table(vk::Device::from_raw(device))
    }

    /// Destroying an instance purges its physical devices' table mirror (component A, §4.A).
    pub fn on_instance_destroyed(&self, handle: vk::Instance) -> anyhow::Result<()> {
        self.instances.write()?.remove(&handle.as_raw());
        self.physical_device_instance.write()?.retain(|_, v| *v != handle.as_raw());
        Ok(())
    }

    /// Destroying a device purges its queues' and command buffers' table mirrors.
    pub fn on_device_destroyed(&self, handle: vk::Device) -> anyhow::Result<()> {
        self.devices.write()?.remove(&handle.as_raw());
        self.queue_device.write()?.retain(|_, v| *v != handle.as_raw());
        self.command_buffer_device.write()?.retain(|_, v| *v != handle.as_raw());
        Ok(())
    }
}

/// The transform that actually talks to the driver, terminating the pipeline (component A).
/// Every entry point it participates in resolves its dispatch table through the [`BaseCaller`]
/// maps above and records newly-created handles back into them.
pub struct DriverTransform {
    caller: Arc<BaseCaller>,
}

impl DriverTransform {
    pub fn new(caller: Arc<BaseCaller>) -> Self {
        Self { caller }
    }
}

impl crate::transform::Transform for DriverTransform {
    fn next(&self) -> &dyn crate::transform::Transform {
        static UNREACHABLE: crate::transform::Unreachable = crate::transform::Unreachable;
        &UNREACHABLE
    }

    fn create_instance(&self, info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
        let instance = unsafe { self.caller.entry().create_instance(info, None) }.map_err(Error::VkError)?;
        let handle = instance.handle();
        self.caller.on_instance_created(handle, instance)?;
        Ok(handle)
    }

    fn destroy_instance(&self, instance: vk::Instance) -> anyhow::Result<()> {
        let table = self.caller.instance_table(instance)?;
        unsafe { table.destroy_instance(None) };
        self.caller.on_instance_destroyed(instance)
    }

    fn enumerate_physical_devices(&self, instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        let table = self.caller.instance_table(instance)?;
        let devices = unsafe { table.enumerate_physical_devices() }.map_err(Error::VkError)?;
        for pd in &devices {
            self.caller.on_physical_device_enumerated(*pd, instance)?;
        }
        Ok(devices)
    }

    fn create_device(&self, physical_device: vk::PhysicalDevice, info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
        let instance_table = self.caller.instance_table_for_physical_device(physical_device)?;
        let device = unsafe { instance_table.create_device(physical_device, info, None) }.map_err(Error::VkError)?;
        let handle = device.handle();
        self.caller.on_device_created(handle, device)?;
        Ok(handle)
    }

    fn destroy_device(&self, device: vk::Device) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_device(None) };
        self.caller.on_device_destroyed(device)
    }

    fn get_device_queue(&self, device: vk::Device, family_index: u32, queue_index: u32) -> anyhow::Result<vk::Queue> {
        let table = self.caller.device_table(device)?;
        let queue = unsafe { table.get_device_queue(family_index, queue_index) };
        self.caller.on_queue_retrieved(queue, device)?;
        Ok(queue)
    }

    fn allocate_memory(&self, device: vk::Device, info: &vk::MemoryAllocateInfo) -> anyhow::Result<vk::DeviceMemory> {
        let table = self.caller.device_table(device)?;
        unsafe { table.allocate_memory(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.free_memory(memory, None) };
        Ok(())
    }

    fn map_memory(&self, device: vk::Device, memory: vk::DeviceMemory, offset: u64, size: u64) -> anyhow::Result<*mut std::ffi::c_void> {
        let table = self.caller.device_table(device)?;
        unsafe { table.map_memory(memory, offset, size, vk::MemoryMapFlags::empty()) }.map_err(|e| Error::VkError(e).into())
    }

    fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.unmap_memory(memory) };
        Ok(())
    }

    fn flush_mapped_memory_ranges(&self, device: vk::Device, ranges: &[vk::MappedMemoryRange]) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.flush_mapped_memory_ranges(ranges) }.map_err(|e| Error::VkError(e).into())
    }

    fn create_buffer(&self, device: vk::Device, info: &vk::BufferCreateInfo) -> anyhow::Result<vk::Buffer> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_buffer(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_buffer(buffer, None) };
        Ok(())
    }

    fn get_buffer_memory_requirements(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<vk::MemoryRequirements> {
        let table = self.caller.device_table(device)?;
        Ok(unsafe { table.get_buffer_memory_requirements(buffer) })
    }

    fn bind_buffer_memory(&self, device: vk::Device, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: u64) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.bind_buffer_memory(buffer, memory, offset) }.map_err(|e| Error::VkError(e).into())
    }

    fn create_image(&self, device: vk::Device, info: &vk::ImageCreateInfo) -> anyhow::Result<vk::Image> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_image(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_image(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_image(image, None) };
        Ok(())
    }

    fn bind_image_memory(&self, device: vk::Device, image: vk::Image, memory: vk::DeviceMemory, offset: u64) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.bind_image_memory(image, memory, offset) }.map_err(|e| Error::VkError(e).into())
    }

    fn get_image_memory_requirements(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<vk::MemoryRequirements> {
        let table = self.caller.device_table(device)?;
        Ok(unsafe { table.get_image_memory_requirements(image) })
    }

    fn get_physical_device_memory_properties(&self, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceMemoryProperties> {
        let table = self.caller.instance_table_for_physical_device(physical_device)?;
        Ok(unsafe { table.get_physical_device_memory_properties(physical_device) })
    }

    fn get_physical_device_properties(&self, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceProperties> {
        let table = self.caller.instance_table_for_physical_device(physical_device)?;
        Ok(unsafe { table.get_physical_device_properties(physical_device) })
    }

    fn create_shader_module(&self, device: vk::Device, info: &vk::ShaderModuleCreateInfo) -> anyhow::Result<vk::ShaderModule> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_shader_module(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_shader_module(&self, device: vk::Device, module: vk::ShaderModule) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_shader_module(module, None) };
        Ok(())
    }

    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo],
    ) -> anyhow::Result<Vec<vk::Pipeline>> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_graphics_pipelines(cache, infos, None) }.map_err(|(_, e)| Error::VkError(e).into())
    }

    fn destroy_pipeline(&self, device: vk::Device, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_pipeline(pipeline, None) };
        Ok(())
    }

    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo],
    ) -> anyhow::Result<Vec<vk::Pipeline>> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_compute_pipelines(cache, infos, None) }.map_err(|(_, e)| Error::VkError(e).into())
    }

    fn create_pipeline_layout(&self, device: vk::Device, info: &vk::PipelineLayoutCreateInfo) -> anyhow::Result<vk::PipelineLayout> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_pipeline_layout(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_pipeline_layout(&self, device: vk::Device, layout: vk::PipelineLayout) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_pipeline_layout(layout, None) };
        Ok(())
    }

    fn create_descriptor_set_layout(&self, device: vk::Device, info: &vk::DescriptorSetLayoutCreateInfo) -> anyhow::Result<vk::DescriptorSetLayout> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_descriptor_set_layout(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn create_descriptor_update_template(&self, device: vk::Device, info: &vk::DescriptorUpdateTemplateCreateInfo) -> anyhow::Result<vk::DescriptorUpdateTemplate> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_descriptor_update_template(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_descriptor_update_template(&self, device: vk::Device, template: vk::DescriptorUpdateTemplate) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_descriptor_update_template(template, None) };
        Ok(())
    }

    fn create_descriptor_pool(&self, device: vk::Device, info: &vk::DescriptorPoolCreateInfo) -> anyhow::Result<vk::DescriptorPool> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_descriptor_pool(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn allocate_descriptor_sets(&self, device: vk::Device, info: &vk::DescriptorSetAllocateInfo) -> anyhow::Result<Vec<vk::DescriptorSet>> {
        let table = self.caller.device_table(device)?;
        unsafe { table.allocate_descriptor_sets(info) }.map_err(|e| Error::VkError(e).into())
    }

    fn free_descriptor_sets(&self, device: vk::Device, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.free_descriptor_sets(pool, sets) }.map_err(|e| Error::VkError(e).into())
    }

    fn update_descriptor_sets(&self, device: vk::Device, writes: &[vk::WriteDescriptorSet]) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.update_descriptor_sets(writes, &[]) };
        Ok(())
    }

    fn create_command_pool(&self, device: vk::Device, info: &vk::CommandPoolCreateInfo) -> anyhow::Result<vk::CommandPool> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_command_pool(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn allocate_command_buffers(&self, device: vk::Device, info: &vk::CommandBufferAllocateInfo) -> anyhow::Result<Vec<vk::CommandBuffer>> {
        let table = self.caller.device_table(device)?;
        let buffers = unsafe { table.allocate_command_buffers(info) }.map_err(Error::VkError)?;
        for cb in &buffers {
            self.caller.on_command_buffer_allocated(*cb, device)?;
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, device: vk::Device, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.free_command_buffers(pool, buffers) };
        Ok(())
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.begin_command_buffer(cb, info) }.map_err(|e| Error::VkError(e).into())
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.end_command_buffer(cb) }.map_err(|e| Error::VkError(e).into())
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_bind_pipeline(cb, bind_point, pipeline) };
        Ok(())
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_bind_descriptor_sets(cb, bind_point, layout, first_set, sets, &[]) };
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_begin_render_pass(cb, info, contents) };
        Ok(())
    }

    fn cmd_next_subpass(&self, cb: vk::CommandBuffer, contents: vk::SubpassContents) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_next_subpass(cb, contents) };
        Ok(())
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_end_render_pass(cb) };
        Ok(())
    }

    fn cmd_update_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_update_buffer(cb, buffer, offset, data) };
        Ok(())
    }

    fn cmd_push_constants(&self, cb: vk::CommandBuffer, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_push_constants(cb, layout, stages, offset, data) };
        Ok(())
    }

    fn cmd_draw(&self, cb: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_command_buffer(cb)?;
        unsafe { table.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance) };
        Ok(())
    }

    fn create_fence(&self, device: vk::Device, info: &vk::FenceCreateInfo) -> anyhow::Result<vk::Fence> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_fence(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_fence(fence, None) };
        Ok(())
    }

    fn wait_for_fences(&self, device: vk::Device, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.wait_for_fences(fences, wait_all, timeout) }.map_err(|e| Error::VkError(e).into())
    }

    fn get_fence_status(&self, device: vk::Device, fence: vk::Fence) -> anyhow::Result<bool> {
        let table = self.caller.device_table(device)?;
        unsafe { table.get_fence_status(fence) }.map_err(|e| Error::VkError(e).into())
    }

    fn create_semaphore(&self, device: vk::Device, info: &vk::SemaphoreCreateInfo) -> anyhow::Result<vk::Semaphore> {
        let table = self.caller.device_table(device)?;
        unsafe { table.create_semaphore(info, None) }.map_err(|e| Error::VkError(e).into())
    }

    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) -> anyhow::Result<()> {
        let table = self.caller.device_table(device)?;
        unsafe { table.destroy_semaphore(semaphore, None) };
        Ok(())
    }

    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo], fence: vk::Fence) -> anyhow::Result<()> {
        let table = self.caller.device_table_for_queue(queue)?;
        unsafe { table.queue_submit(queue, submits, fence) }.map_err(|e| Error::VkError(e).into())
    }

    // `queue_present` needs the `VK_KHR_swapchain` device extension loader, which this crate
    // does not instantiate per-device; left to the default forwarding behavior (component A's
    // scoping note in `DESIGN.md`).
}
