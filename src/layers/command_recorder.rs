//! Re-serializes `vkCmd*` calls into the issuing command buffer's own wrapper (component H).
//!
//! The recorded stream is reset at `vkBeginCommandBuffer` and grows with every intercepted
//! `vkCmd*` call until `vkEndCommandBuffer`. [`rerecord_command_buffer`] plays that stream back
//! through an arbitrary transform, invoking a hook before each command -- the primitive the
//! command-buffer splitter (component I) builds on to rewrite renderpasses mid-stream.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use crate::state::StateBlock;
use crate::transform::Transform;
use crate::wire::custom::{decode_clear_value, encode_clear_value};
use crate::wire::{Decoder, Encoder};

const OP_BEGIN_RENDER_PASS: u8 = 0;
const OP_NEXT_SUBPASS: u8 = 1;
const OP_END_RENDER_PASS: u8 = 2;
const OP_UPDATE_BUFFER: u8 = 3;
const OP_PUSH_CONSTANTS: u8 = 4;
const OP_DRAW: u8 = 5;
const OP_BIND_PIPELINE: u8 = 6;

pub struct CommandRecorder {
    next: Arc<dyn Transform>,
    state: Arc<StateBlock>,
}

impl CommandRecorder {
    pub fn new(next: Arc<dyn Transform>, state: Arc<StateBlock>) -> Self {
        Self { next, state }
    }

    fn append(&self, cb: vk::CommandBuffer, bytes: &[u8]) {
        if let Ok(wrapper) = self.state.command_buffers.get(cb.as_raw()) {
            wrapper.recorded.lock().unwrap().extend_from_slice(bytes);
        }
    }
}

impl Transform for CommandRecorder {
    fn next(&self) -> &dyn Transform {
        self.next.as_ref()
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> anyhow::Result<()> {
        if let Ok(wrapper) = self.state.command_buffers.get(cb.as_raw()) {
            wrapper.reset_recording();
        }
        self.next().begin_command_buffer(cb, info)
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_BEGIN_RENDER_PASS);
        enc.write_handle(info.render_pass.as_raw());
        enc.write_handle(info.framebuffer.as_raw());
        enc.write_i32(info.render_area.offset.x);
        enc.write_i32(info.render_area.offset.y);
        enc.write_u32(info.render_area.extent.width);
        enc.write_u32(info.render_area.extent.height);
        // SAFETY: `p_clear_values` is valid for `clear_value_count` elements per the Vulkan spec
        // contract for a live `RenderPassBeginInfo`.
        let clear_values = unsafe { std::slice::from_raw_parts(info.p_clear_values, info.clear_value_count as usize) };
        enc.write_u64(clear_values.len() as u64);
        for cv in clear_values {
            // VkClearValue is a union; reading it through its `color.uint32` member recovers the
            // raw bits regardless of which member the application actually wrote.
            let words = unsafe { cv.color.uint32 };
            encode_clear_value(&mut enc, words);
        }
        enc.write_u32(contents.as_raw() as u32);
        self.append(cb, enc.as_bytes());
        self.next().cmd_begin_render_pass(cb, info, contents)
    }

    fn cmd_next_subpass(&self, cb: vk::CommandBuffer, contents: vk::SubpassContents) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_NEXT_SUBPASS);
        enc.write_u32(contents.as_raw() as u32);
        self.append(cb, enc.as_bytes());
        self.next().cmd_next_subpass(cb, contents)
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_END_RENDER_PASS);
        self.append(cb, enc.as_bytes());
        self.next().cmd_end_render_pass(cb)
    }

    fn cmd_update_buffer(&self, cb: vk::CommandBuffer, buffer: vk::Buffer, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_UPDATE_BUFFER);
        enc.write_handle(buffer.as_raw());
        enc.write_u64(offset);
        enc.write_u64(data.len() as u64);
        enc.write_bytes(data);
        self.append(cb, enc.as_bytes());
        self.next().cmd_update_buffer(cb, buffer, offset, data)
    }

    fn cmd_push_constants(&self, cb: vk::CommandBuffer, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_PUSH_CONSTANTS);
        enc.write_handle(layout.as_raw());
        enc.write_u32(stages.as_raw());
        enc.write_u32(offset);
        enc.write_u64(data.len() as u64);
        enc.write_bytes(data);
        self.append(cb, enc.as_bytes());
        self.next().cmd_push_constants(cb, layout, stages, offset, data)
    }

    fn cmd_draw(&self, cb: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_DRAW);
        enc.write_u32(vertex_count);
        enc.write_u32(instance_count);
        enc.write_u32(first_vertex);
        enc.write_u32(first_instance);
        self.append(cb, enc.as_bytes());
        self.next().cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance)
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        let mut enc = Encoder::new();
        enc.write_u8(OP_BIND_PIPELINE);
        enc.write_u32(bind_point.as_raw() as u32);
        enc.write_handle(pipeline.as_raw());
        self.append(cb, enc.as_bytes());
        self.next().cmd_bind_pipeline(cb, bind_point, pipeline)
    }
}

/// Replays a recorded command stream through `target`, calling `hook(command_index)` before each
/// decoded command is issued. `command_index` counts every decoded command, including the ones a
/// hook chooses not to act on, so a caller can match against indices recorded elsewhere (e.g. a
/// split point chosen by the command-buffer splitter).
pub fn rerecord_command_buffer(cb: vk::CommandBuffer, stream: &[u8], target: &dyn Transform, mut hook: impl FnMut(usize)) -> anyhow::Result<()> {
    let mut dec = Decoder::new(stream.to_vec());
    let mut index = 0usize;
    while dec.has_data_left() {
        hook(index);
        match dec.read_u8()? {
            OP_BEGIN_RENDER_PASS => {
                let render_pass = vk::RenderPass::from_raw(dec.read_handle()?);
                let framebuffer = vk::Framebuffer::from_raw(dec.read_handle()?);
                let x = dec.read_i32()?;
                let y = dec.read_i32()?;
                let width = dec.read_u32()?;
                let height = dec.read_u32()?;
                let count = dec.read_u64()? as usize;
                let mut clear_values = Vec::with_capacity(count);
                for _ in 0..count {
                    let words = decode_clear_value(&mut dec)?;
                    clear_values.push(vk::ClearValue { color: vk::ClearColorValue { uint32: words } });
                }
                let contents_raw = dec.read_u32()?;
                let info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D { offset: vk::Offset2D { x, y }, extent: vk::Extent2D { width, height } })
                    .clear_values(&clear_values)
                    .build();
                target.cmd_begin_render_pass(cb, &info, vk::SubpassContents::from_raw(contents_raw as i32))?;
            }
            OP_NEXT_SUBPASS => {
                let contents_raw = dec.read_u32()?;
                target.cmd_next_subpass(cb, vk::SubpassContents::from_raw(contents_raw as i32))?;
            }
            OP_END_RENDER_PASS => {
                target.cmd_end_render_pass(cb)?;
            }
            OP_UPDATE_BUFFER => {
                let buffer = vk::Buffer::from_raw(dec.read_handle()?);
                let offset = dec.read_u64()?;
                let len = dec.read_u64()? as usize;
                let data = dec.read_bytes(len)?;
                target.cmd_update_buffer(cb, buffer, offset, &data)?;
            }
            OP_PUSH_CONSTANTS => {
                let layout = vk::PipelineLayout::from_raw(dec.read_handle()?);
                let stages = vk::ShaderStageFlags::from_raw(dec.read_u32()?);
                let offset = dec.read_u32()?;
                let len = dec.read_u64()? as usize;
                let data = dec.read_bytes(len)?;
                target.cmd_push_constants(cb, layout, stages, offset, &data)?;
            }
            OP_DRAW => {
                let vertex_count = dec.read_u32()?;
                let instance_count = dec.read_u32()?;
                let first_vertex = dec.read_u32()?;
                let first_instance = dec.read_u32()?;
                target.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance)?;
            }
            OP_BIND_PIPELINE => {
                let bind_point = vk::PipelineBindPoint::from_raw(dec.read_u32()? as i32);
                let pipeline = vk::Pipeline::from_raw(dec.read_handle()?);
                target.cmd_bind_pipeline(cb, bind_point, pipeline)?;
            }
            _ => return Err(crate::error::Error::Uncategorized("unknown command opcode while rerecording").into()),
        }
        index += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::CommandBuffer as CommandBufferState;
    use crate::transform::Unreachable;
    use std::sync::Mutex;

    struct RecordingTarget {
        draws: Mutex<Vec<(u32, u32, u32, u32)>>,
    }

    impl Transform for RecordingTarget {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: Unreachable = Unreachable;
            &UNREACHABLE
        }

        fn cmd_draw(&self, _cb: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> anyhow::Result<()> {
            self.draws.lock().unwrap().push((vertex_count, instance_count, first_vertex, first_instance));
            Ok(())
        }
    }

    #[test]
    fn recorded_draw_replays_with_same_arguments() {
        let state = Arc::new(StateBlock::new());
        state.command_buffers.create(1, CommandBufferState::new(1, 0, 0, vec![])).unwrap();
        let target = Arc::new(RecordingTarget { draws: Mutex::new(Vec::new()) });
        let recorder = CommandRecorder::new(target.clone(), state.clone());

        let cb = vk::CommandBuffer::from_raw(1);
        recorder.cmd_draw(cb, 3, 1, 0, 0).unwrap();
        recorder.cmd_draw(cb, 6, 2, 3, 1).unwrap();

        let stream = state.command_buffers.get(1).unwrap().recorded.lock().unwrap().clone();
        let mut hooked = Vec::new();
        rerecord_command_buffer(cb, &stream, target.as_ref(), |i| hooked.push(i)).unwrap();

        assert_eq!(hooked, vec![0, 1]);
        assert_eq!(*target.draws.lock().unwrap(), vec![(3, 1, 0, 0), (6, 2, 3, 1)]);
    }

    #[test]
    fn begin_command_buffer_resets_recorded_stream() {
        let state = Arc::new(StateBlock::new());
        state.command_buffers.create(1, CommandBufferState::new(1, 0, 0, vec![])).unwrap();
        let target = Arc::new(RecordingTarget { draws: Mutex::new(Vec::new()) });
        let recorder = CommandRecorder::new(target, state.clone());

        let cb = vk::CommandBuffer::from_raw(1);
        recorder.cmd_draw(cb, 3, 1, 0, 0).unwrap();
        assert!(!state.command_buffers.get(1).unwrap().recorded.lock().unwrap().is_empty());

        recorder.begin_command_buffer(cb, &vk::CommandBufferBeginInfo::default()).unwrap();
        assert!(state.command_buffers.get(1).unwrap().recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn recorded_bind_pipeline_replays_with_same_handle() {
        struct BindTarget {
            bound: Mutex<Vec<(vk::PipelineBindPoint, u64)>>,
        }
        impl Transform for BindTarget {
            fn next(&self) -> &dyn Transform {
                static UNREACHABLE: Unreachable = Unreachable;
                &UNREACHABLE
            }
            fn cmd_bind_pipeline(&self, _cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
                self.bound.lock().unwrap().push((bind_point, pipeline.as_raw()));
                Ok(())
            }
        }

        let state = Arc::new(StateBlock::new());
        state.command_buffers.create(1, CommandBufferState::new(1, 0, 0, vec![])).unwrap();
        let target = Arc::new(BindTarget { bound: Mutex::new(Vec::new()) });
        let recorder = CommandRecorder::new(target.clone(), state.clone());

        let cb = vk::CommandBuffer::from_raw(1);
        recorder.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, vk::Pipeline::from_raw(42)).unwrap();

        let stream = state.command_buffers.get(1).unwrap().recorded.lock().unwrap().clone();
        rerecord_command_buffer(cb, &stream, target.as_ref(), |_| {}).unwrap();

        assert_eq!(*target.bound.lock().unwrap(), vec![(vk::PipelineBindPoint::GRAPHICS, 42), (vk::PipelineBindPoint::GRAPHICS, 42)]);
    }
}
