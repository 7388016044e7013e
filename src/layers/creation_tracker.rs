//! Intercepts `vkCreate*`/`vkAllocate*`/`vkGet*` and `vkDestroy*`/`vkFree*` to keep the state
//! block in sync with the driver (component D).

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use crate::state::wrapper::Generic;
use crate::state::StateBlock;
use crate::transform::Transform;
use crate::wire::Encoder;

pub struct CreationTracker {
    next: Arc<dyn Transform>,
    state: Arc<StateBlock>,
}

impl CreationTracker {
    pub fn new(next: Arc<dyn Transform>, state: Arc<StateBlock>) -> Self {
        Self { next, state }
    }
}

#[cfg(feature = "log-objects")]
macro_rules! log_create {
    ($kind:expr, $handle:expr) => {
        log::trace!("created {} {:#x}", $kind, $handle)
    };
}
#[cfg(not(feature = "log-objects"))]
macro_rules! log_create {
    ($kind:expr, $handle:expr) => {};
}

#[cfg(feature = "log-objects")]
macro_rules! log_destroy {
    ($kind:expr, $handle:expr) => {
        log::trace!("destroyed {} {:#x}", $kind, $handle)
    };
}
#[cfg(not(feature = "log-objects"))]
macro_rules! log_destroy {
    ($kind:expr, $handle:expr) => {};
}

impl Transform for CreationTracker {
    fn next(&self) -> &dyn Transform {
        self.next.as_ref()
    }

    fn create_instance(&self, info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
        let handle = self.next().create_instance(info)?;
        self.state.instances.create(handle.as_raw(), Generic { kind: "VkInstance", handle: handle.as_raw(), parent: None, create_info: Vec::new() })?;
        log_create!("VkInstance", handle.as_raw());
        Ok(handle)
    }

    fn destroy_instance(&self, instance: vk::Instance) -> anyhow::Result<()> {
        self.next().destroy_instance(instance)?;
        self.state.instances.erase(instance.as_raw())?;
        self.state.purge_instance(instance.as_raw())?;
        log_destroy!("VkInstance", instance.as_raw());
        Ok(())
    }

    fn enumerate_physical_devices(&self, instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        let devices = self.next().enumerate_physical_devices(instance)?;
        for pd in &devices {
            self.state.physical_devices.get_or_create(pd.as_raw(), || Generic {
                kind: "VkPhysicalDevice",
                handle: pd.as_raw(),
                parent: Some(instance.as_raw()),
                create_info: Vec::new(),
            })?;
        }
        Ok(devices)
    }

    fn create_device(&self, physical_device: vk::PhysicalDevice, info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
        let handle = self.next().create_device(physical_device, info)?;
        self.state.devices.create(handle.as_raw(), Generic { kind: "VkDevice", handle: handle.as_raw(), parent: Some(physical_device.as_raw()), create_info: Vec::new() })?;
        log_create!("VkDevice", handle.as_raw());
        Ok(handle)
    }

    fn destroy_device(&self, device: vk::Device) -> anyhow::Result<()> {
        self.next().destroy_device(device)?;
        self.state.devices.erase(device.as_raw())?;
        self.state.purge_device(device.as_raw())?;
        log_destroy!("VkDevice", device.as_raw());
        Ok(())
    }

    fn get_device_queue(&self, device: vk::Device, family_index: u32, queue_index: u32) -> anyhow::Result<vk::Queue> {
        let handle = self.next().get_device_queue(device, family_index, queue_index)?;
        self.state.queues.get_or_create(handle.as_raw(), || Generic {
            kind: "VkQueue",
            handle: handle.as_raw(),
            parent: Some(device.as_raw()),
            create_info: Vec::new(),
        })?;
        Ok(handle)
    }

    fn allocate_memory(&self, device: vk::Device, info: &vk::MemoryAllocateInfo) -> anyhow::Result<vk::DeviceMemory> {
        let handle = self.next().allocate_memory(device, info)?;
        self.state.device_memories.create(
            handle.as_raw(),
            crate::state::types::DeviceMemory {
                handle: handle.as_raw(),
                device: device.as_raw(),
                allocate_info: Vec::new(),
                size: info.allocation_size,
                memory_type_index: info.memory_type_index,
                is_coherent: std::sync::Mutex::new(true),
                mapped: std::sync::Mutex::new(None),
            },
        )?;
        log_create!("VkDeviceMemory", handle.as_raw());
        Ok(handle)
    }

    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory) -> anyhow::Result<()> {
        self.next().free_memory(device, memory)?;
        self.state.device_memories.erase(memory.as_raw())?;
        log_destroy!("VkDeviceMemory", memory.as_raw());
        Ok(())
    }

    fn create_buffer(&self, device: vk::Device, info: &vk::BufferCreateInfo) -> anyhow::Result<vk::Buffer> {
        let handle = self.next().create_buffer(device, info)?;
        self.state.buffers.create(
            handle.as_raw(),
            crate::state::types::Buffer {
                handle: handle.as_raw(),
                device: device.as_raw(),
                create_info: encode_buffer_create_info(info),
                required_size: std::sync::Mutex::new(0),
                bindings: std::sync::Mutex::new(Vec::new()),
            },
        )?;
        log_create!("VkBuffer", handle.as_raw());
        Ok(handle)
    }

    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<()> {
        self.next().destroy_buffer(device, buffer)?;
        self.state.buffers.erase(buffer.as_raw())?;
        log_destroy!("VkBuffer", buffer.as_raw());
        Ok(())
    }

    fn create_image(&self, device: vk::Device, info: &vk::ImageCreateInfo) -> anyhow::Result<vk::Image> {
        let handle = self.next().create_image(device, info)?;
        self.state.images.create(
            handle.as_raw(),
            crate::state::types::Image {
                handle: handle.as_raw(),
                device: device.as_raw(),
                create_info: encode_image_create_info(info),
                required_size: std::sync::Mutex::new(0),
                bindings: std::sync::Mutex::new(Vec::new()),
                subresources: std::sync::Mutex::new(Vec::new()),
                swapchain: None,
            },
        )?;
        log_create!("VkImage", handle.as_raw());
        Ok(handle)
    }

    fn destroy_image(&self, device: vk::Device, image: vk::Image) -> anyhow::Result<()> {
        self.next().destroy_image(device, image)?;
        self.state.images.erase(image.as_raw())?;
        log_destroy!("VkImage", image.as_raw());
        Ok(())
    }

    fn create_shader_module(&self, device: vk::Device, info: &vk::ShaderModuleCreateInfo) -> anyhow::Result<vk::ShaderModule> {
        let handle = self.next().create_shader_module(device, info)?;
        let spirv = unsafe { std::slice::from_raw_parts(info.p_code as *const u8, info.code_size) }.to_vec();
        self.state.shader_modules.create(
            handle.as_raw(),
            crate::state::types::ShaderModule {
                handle: handle.as_raw(),
                device: device.as_raw(),
                spirv,
                reflection: std::sync::Mutex::new(std::collections::HashMap::new()),
            },
        )?;
        log_create!("VkShaderModule", handle.as_raw());
        Ok(handle)
    }

    fn destroy_shader_module(&self, device: vk::Device, module: vk::ShaderModule) -> anyhow::Result<()> {
        self.next().destroy_shader_module(device, module)?;
        self.state.shader_modules.erase(module.as_raw())?;
        log_destroy!("VkShaderModule", module.as_raw());
        Ok(())
    }

    fn destroy_pipeline(&self, device: vk::Device, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        self.next().destroy_pipeline(device, pipeline)?;
        self.state.pipelines.erase(pipeline.as_raw())?;
        log_destroy!("VkPipeline", pipeline.as_raw());
        Ok(())
    }

    fn create_pipeline_layout(&self, device: vk::Device, info: &vk::PipelineLayoutCreateInfo) -> anyhow::Result<vk::PipelineLayout> {
        let handle = self.next().create_pipeline_layout(device, info)?;
        self.state.pipeline_layouts.create(
            handle.as_raw(),
            Generic { kind: "VkPipelineLayout", handle: handle.as_raw(), parent: Some(device.as_raw()), create_info: Vec::new() },
        )?;
        Ok(handle)
    }

    fn destroy_pipeline_layout(&self, device: vk::Device, layout: vk::PipelineLayout) -> anyhow::Result<()> {
        self.next().destroy_pipeline_layout(device, layout)?;
        self.state.pipeline_layouts.erase(layout.as_raw())?;
        Ok(())
    }

    fn create_descriptor_update_template(&self, device: vk::Device, info: &vk::DescriptorUpdateTemplateCreateInfo) -> anyhow::Result<vk::DescriptorUpdateTemplate> {
        let handle = self.next().create_descriptor_update_template(device, info)?;
        self.state.descriptor_update_templates.create(
            handle.as_raw(),
            Generic { kind: "VkDescriptorUpdateTemplate", handle: handle.as_raw(), parent: Some(device.as_raw()), create_info: Vec::new() },
        )?;
        Ok(handle)
    }

    fn destroy_descriptor_update_template(&self, device: vk::Device, template: vk::DescriptorUpdateTemplate) -> anyhow::Result<()> {
        self.next().destroy_descriptor_update_template(device, template)?;
        self.state.descriptor_update_templates.erase(template.as_raw())?;
        Ok(())
    }

    fn create_descriptor_set_layout(&self, device: vk::Device, info: &vk::DescriptorSetLayoutCreateInfo) -> anyhow::Result<vk::DescriptorSetLayout> {
        let handle = self.next().create_descriptor_set_layout(device, info)?;
        self.state.descriptor_set_layouts.create(
            handle.as_raw(),
            Generic { kind: "VkDescriptorSetLayout", handle: handle.as_raw(), parent: Some(device.as_raw()), create_info: Vec::new() },
        )?;
        Ok(handle)
    }

    fn create_descriptor_pool(&self, device: vk::Device, info: &vk::DescriptorPoolCreateInfo) -> anyhow::Result<vk::DescriptorPool> {
        let handle = self.next().create_descriptor_pool(device, info)?;
        self.state.descriptor_pools.create(
            handle.as_raw(),
            Generic { kind: "VkDescriptorPool", handle: handle.as_raw(), parent: Some(device.as_raw()), create_info: Vec::new() },
        )?;
        Ok(handle)
    }

    fn allocate_descriptor_sets(&self, device: vk::Device, info: &vk::DescriptorSetAllocateInfo) -> anyhow::Result<Vec<vk::DescriptorSet>> {
        let handles = self.next().allocate_descriptor_sets(device, info)?;
        for (i, set) in handles.iter().enumerate() {
            let layout = unsafe { *info.p_set_layouts.add(i) };
            self.state.descriptor_sets.create(
                set.as_raw(),
                crate::state::types::DescriptorSet {
                    handle: set.as_raw(),
                    pool: info.descriptor_pool.as_raw(),
                    layout: layout.as_raw(),
                    slots: std::sync::Mutex::new(Vec::new()),
                },
            )?;
        }
        Ok(handles)
    }

    fn free_descriptor_sets(&self, device: vk::Device, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) -> anyhow::Result<()> {
        self.next().free_descriptor_sets(device, pool, sets)?;
        for set in sets {
            self.state.descriptor_sets.erase(set.as_raw())?;
        }
        Ok(())
    }

    fn create_command_pool(&self, device: vk::Device, info: &vk::CommandPoolCreateInfo) -> anyhow::Result<vk::CommandPool> {
        let handle = self.next().create_command_pool(device, info)?;
        self.state.command_pools.create(
            handle.as_raw(),
            Generic { kind: "VkCommandPool", handle: handle.as_raw(), parent: Some(device.as_raw()), create_info: Vec::new() },
        )?;
        Ok(handle)
    }

    fn allocate_command_buffers(&self, device: vk::Device, info: &vk::CommandBufferAllocateInfo) -> anyhow::Result<Vec<vk::CommandBuffer>> {
        let handles = self.next().allocate_command_buffers(device, info)?;
        for cb in &handles {
            self.state.command_buffers.create(
                cb.as_raw(),
                crate::state::types::CommandBuffer::new(cb.as_raw(), info.command_pool.as_raw(), device.as_raw(), Vec::new()),
            )?;
        }
        Ok(handles)
    }

    fn free_command_buffers(&self, device: vk::Device, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) -> anyhow::Result<()> {
        self.next().free_command_buffers(device, pool, buffers)?;
        for cb in buffers {
            self.state.command_buffers.erase(cb.as_raw())?;
        }
        Ok(())
    }

    fn create_fence(&self, device: vk::Device, info: &vk::FenceCreateInfo) -> anyhow::Result<vk::Fence> {
        let handle = self.next().create_fence(device, info)?;
        self.state.fences.create(
            handle.as_raw(),
            crate::state::types::Fence { handle: handle.as_raw(), device: device.as_raw(), memory_writes: std::sync::Mutex::new(std::collections::HashSet::new()) },
        )?;
        Ok(handle)
    }

    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence) -> anyhow::Result<()> {
        self.next().destroy_fence(device, fence)?;
        self.state.fences.erase(fence.as_raw())?;
        Ok(())
    }

    fn create_semaphore(&self, device: vk::Device, info: &vk::SemaphoreCreateInfo) -> anyhow::Result<vk::Semaphore> {
        let handle = self.next().create_semaphore(device, info)?;
        self.state.semaphores.create(
            handle.as_raw(),
            crate::state::types::Semaphore { handle: handle.as_raw(), device: device.as_raw(), value: std::sync::Mutex::new(0) },
        )?;
        Ok(handle)
    }

    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) -> anyhow::Result<()> {
        self.next().destroy_semaphore(device, semaphore)?;
        self.state.semaphores.erase(semaphore.as_raw())?;
        Ok(())
    }
}

/// Byte layout mirrors `Spy::create_buffer`'s live wire encoding exactly (everything after the
/// device handle), so `mec::McGenerator` can splice it straight into a `CREATE_BUFFER` record.
fn encode_buffer_create_info(info: &vk::BufferCreateInfo) -> Vec<u8> {
    let mut e = Encoder::new();
    e.write_u64(info.size);
    e.write_u32(info.usage.as_raw());
    e.into_bytes()
}

/// Byte layout mirrors `Spy::create_image`'s live wire encoding exactly (everything after the
/// device handle), so `mec::McGenerator` can splice it straight into a `CREATE_IMAGE` record.
fn encode_image_create_info(info: &vk::ImageCreateInfo) -> Vec<u8> {
    let mut e = Encoder::new();
    e.write_i32(info.image_type.as_raw());
    e.write_i32(info.format.as_raw());
    e.write_u32(info.extent.width);
    e.write_u32(info.extent.height);
    e.write_u32(info.extent.depth);
    e.write_u32(info.usage.as_raw());
    e.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Unreachable;

    fn tracker() -> (CreationTracker, Arc<StateBlock>) {
        let state = Arc::new(StateBlock::new());
        (CreationTracker::new(Arc::new(TestDriver), state.clone()), state)
    }

    /// Fakes the driver side of creation calls with deterministic handle values, since no real
    /// Vulkan instance is available in unit tests.
    struct TestDriver;
    impl Transform for TestDriver {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: Unreachable = Unreachable;
            &UNREACHABLE
        }

        fn create_instance(&self, _info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
            Ok(vk::Instance::from_raw(0xAAAA))
        }

        fn destroy_instance(&self, _instance: vk::Instance) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn create_then_destroy_instance_balances_state_block() {
        let (tracker, state) = tracker();
        let info = vk::InstanceCreateInfo::default();
        let handle = tracker.create_instance(&info).unwrap();
        assert!(!state.instances.is_empty());
        tracker.destroy_instance(handle).unwrap();
        assert!(state.instances.is_empty());
    }
}
