//! The state block: a collection of `handle -> wrapper` maps, one per Vulkan handle type
//! (component C).

pub mod handle_map;
pub mod types;
pub mod wrapper;

use handle_map::HandleMap;
use types::{Buffer, CommandBuffer, DescriptorSet, DeviceMemory, Fence, Image, Pipeline, Semaphore, ShaderModule};
use wrapper::Generic;

/// One map per handle type named in the data model (§3). Instance, physical device, device,
/// queue, and the handle types with no representative live fields beyond create-info use
/// [`Generic`]; the rest use their dedicated wrapper struct.
#[derive(Default)]
pub struct StateBlock {
    pub instances: HandleMap<Generic>,
    pub physical_devices: HandleMap<Generic>,
    pub devices: HandleMap<Generic>,
    pub queues: HandleMap<Generic>,
    pub command_pools: HandleMap<Generic>,
    pub command_buffers: HandleMap<CommandBuffer>,
    pub buffers: HandleMap<Buffer>,
    pub buffer_views: HandleMap<Generic>,
    pub images: HandleMap<Image>,
    pub image_views: HandleMap<Generic>,
    pub samplers: HandleMap<Generic>,
    pub shader_modules: HandleMap<ShaderModule>,
    pub pipelines: HandleMap<Pipeline>,
    pub pipeline_caches: HandleMap<Generic>,
    pub pipeline_layouts: HandleMap<Generic>,
    pub descriptor_set_layouts: HandleMap<Generic>,
    pub descriptor_pools: HandleMap<Generic>,
    pub descriptor_sets: HandleMap<DescriptorSet>,
    pub framebuffers: HandleMap<Generic>,
    pub render_passes: HandleMap<Generic>,
    pub fences: HandleMap<Fence>,
    pub semaphores: HandleMap<Semaphore>,
    pub events: HandleMap<Generic>,
    pub query_pools: HandleMap<Generic>,
    pub device_memories: HandleMap<DeviceMemory>,
    pub ycbcr_conversions: HandleMap<Generic>,
    pub descriptor_update_templates: HandleMap<Generic>,
    pub surfaces: HandleMap<Generic>,
    pub swapchains: HandleMap<Generic>,
}

impl StateBlock {
    pub fn new() -> Self {
        Self {
            instances: HandleMap::new("VkInstance"),
            physical_devices: HandleMap::new("VkPhysicalDevice"),
            devices: HandleMap::new("VkDevice"),
            queues: HandleMap::new("VkQueue"),
            command_pools: HandleMap::new("VkCommandPool"),
            command_buffers: HandleMap::new("VkCommandBuffer"),
            buffers: HandleMap::new("VkBuffer"),
            buffer_views: HandleMap::new("VkBufferView"),
            images: HandleMap::new("VkImage"),
            image_views: HandleMap::new("VkImageView"),
            samplers: HandleMap::new("VkSampler"),
            shader_modules: HandleMap::new("VkShaderModule"),
            pipelines: HandleMap::new("VkPipeline"),
            pipeline_caches: HandleMap::new("VkPipelineCache"),
            pipeline_layouts: HandleMap::new("VkPipelineLayout"),
            descriptor_set_layouts: HandleMap::new("VkDescriptorSetLayout"),
            descriptor_pools: HandleMap::new("VkDescriptorPool"),
            descriptor_sets: HandleMap::new("VkDescriptorSet"),
            framebuffers: HandleMap::new("VkFramebuffer"),
            render_passes: HandleMap::new("VkRenderPass"),
            fences: HandleMap::new("VkFence"),
            semaphores: HandleMap::new("VkSemaphore"),
            events: HandleMap::new("VkEvent"),
            query_pools: HandleMap::new("VkQueryPool"),
            device_memories: HandleMap::new("VkDeviceMemory"),
            ycbcr_conversions: HandleMap::new("VkSamplerYcbcrConversion"),
            descriptor_update_templates: HandleMap::new("VkDescriptorUpdateTemplate"),
            surfaces: HandleMap::new("VkSurfaceKHR"),
            swapchains: HandleMap::new("VkSwapchainKHR"),
        }
    }

    /// Property 2: after capture ends, the state block is empty iff every created handle was
    /// destroyed.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
            && self.physical_devices.is_empty()
            && self.devices.is_empty()
            && self.queues.is_empty()
            && self.command_pools.is_empty()
            && self.command_buffers.is_empty()
            && self.buffers.is_empty()
            && self.buffer_views.is_empty()
            && self.images.is_empty()
            && self.image_views.is_empty()
            && self.samplers.is_empty()
            && self.shader_modules.is_empty()
            && self.pipelines.is_empty()
            && self.pipeline_caches.is_empty()
            && self.pipeline_layouts.is_empty()
            && self.descriptor_set_layouts.is_empty()
            && self.descriptor_pools.is_empty()
            && self.descriptor_sets.is_empty()
            && self.framebuffers.is_empty()
            && self.render_passes.is_empty()
            && self.fences.is_empty()
            && self.semaphores.is_empty()
            && self.events.is_empty()
            && self.query_pools.is_empty()
            && self.device_memories.is_empty()
            && self.ycbcr_conversions.is_empty()
            && self.descriptor_update_templates.is_empty()
            && self.surfaces.is_empty()
            && self.swapchains.is_empty()
    }

    /// Cascades the destruction of an instance to its physical devices (invariant 1).
    pub fn purge_instance(&self, instance: u64) -> anyhow::Result<()> {
        self.physical_devices.erase_if(|pd: &Generic| pd.parent == Some(instance))?;
        Ok(())
    }

    /// Cascades the destruction of a device to its queues (invariant 1).
    pub fn purge_device(&self, device: u64) -> anyhow::Result<()> {
        self.queues.erase_if(|q: &Generic| q.parent == Some(device))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_block_reports_empty() {
        let state = StateBlock::new();
        assert!(state.is_empty());
    }

    #[test]
    fn create_destroy_balance_holds() {
        let state = StateBlock::new();
        state
            .instances
            .create(1, Generic { kind: "VkInstance", handle: 1, parent: None, create_info: vec![] })
            .unwrap();
        assert!(!state.is_empty());
        state.instances.erase(1).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn purge_instance_removes_physical_devices() {
        let state = StateBlock::new();
        state
            .instances
            .create(1, Generic { kind: "VkInstance", handle: 1, parent: None, create_info: vec![] })
            .unwrap();
        state
            .physical_devices
            .create(2, Generic { kind: "VkPhysicalDevice", handle: 2, parent: Some(1), create_info: vec![] })
            .unwrap();
        state.instances.erase(1).unwrap();
        state.purge_instance(1).unwrap();
        assert!(state.physical_devices.is_empty());
    }
}
