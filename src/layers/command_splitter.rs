//! Pauses and resumes a command buffer at chosen command indices, rewriting any renderpass the
//! split point falls inside into pre-split / post-split / end variants (component I).
//!
//! Building on the recorder (component H), every original renderpass is replayed as a sequence of
//! single-subpass renderpasses -- one pre-split instance per original subpass, and, for whichever
//! subpass a split point lands in, a three-way pre/post/end split around it (`Begin(pre)...End,
//! Begin(post), hook, End, Begin(end)...End`, then the next subpass's own `Begin(pre)`). A split
//! outside any renderpass just calls the hook directly. Because every rewritten renderpass has
//! exactly one subpass (subpass 0), a pipeline originally bound against a non-zero subpass is
//! rebound through its subpass-0 clone ([`CommandBufferSplitter::pipeline_for_subpass0`]) so it
//! stays compatible with the renderpass it's now recorded against. Materializing a rewritten
//! renderpass or a subpass-0 pipeline clone as a live Vulkan object is left to the caller via
//! [`RenderPassFactory`]/[`PipelineCloner`]: the splitter owns the rewriting *rules*, not the
//! struct-level deep clone of a `VkRenderPassCreateInfo` (that clone follows the same
//! wire-encoder-shaped walk as every other create-info, per the state-block module's create-info
//! convention).

use std::collections::HashMap;

use ash::vk;
use ash::vk::Handle;

use crate::transform::Transform;

/// Owned mirror of the handful of `VkAttachmentDescription` fields the splitter needs to
/// rewrite. `format`/`samples` never change across variants and are carried through unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDescription {
    pub format: i32,
    pub samples: u32,
    pub load_op: i32,
    pub store_op: i32,
    pub initial_layout: i32,
    pub final_layout: i32,
}

/// Owned mirror of the subpass references the splitter needs: which attachment indices the
/// subpass reads/writes and what layout it expects them in.
#[derive(Debug, Clone, Default)]
pub struct SubpassDescription {
    pub input_attachments: Vec<(u32, i32)>,
    pub color_attachments: Vec<(u32, i32)>,
    pub depth_attachment: Option<(u32, i32)>,
    pub resolve_attachments: Vec<(u32, i32)>,
    pub preserve_attachments: Vec<u32>,
}

impl SubpassDescription {
    fn referenced_attachments(&self) -> impl Iterator<Item = (u32, i32)> + '_ {
        self.input_attachments
            .iter()
            .chain(self.color_attachments.iter())
            .chain(self.depth_attachment.iter())
            .copied()
    }
}

#[derive(Debug, Clone)]
pub struct RenderPassDescription {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
}

/// Rewrites subpass `index` (and only that subpass) into the "pre-split" variant: each
/// attachment's *current* layout becomes its new initial layout, load ops are preserved from the
/// original, and final layout follows the subpass's own references.
pub fn rewrite_pre_split(original: &RenderPassDescription, index: usize, current_layouts: &[i32]) -> RenderPassDescription {
    let subpass = &original.subpasses[index];
    let mut attachments = original.attachments.clone();
    for (i, att) in attachments.iter_mut().enumerate() {
        att.initial_layout = current_layouts[i];
    }
    for (att_index, layout) in subpass.referenced_attachments() {
        attachments[att_index as usize].final_layout = layout;
    }
    RenderPassDescription { attachments, subpasses: vec![strip_resolve_and_preserve(subpass)] }
}

/// Rewrites subpass `index` into the "post-split" variant: `loadOp = LOAD`, `storeOp = STORE`,
/// and the current layout is latched as both initial and final layout so the break is lossless.
pub fn rewrite_post_split(original: &RenderPassDescription, index: usize, current_layouts: &[i32]) -> RenderPassDescription {
    let subpass = &original.subpasses[index];
    let mut attachments = original.attachments.clone();
    for (i, att) in attachments.iter_mut().enumerate() {
        att.load_op = LOAD_OP_LOAD;
        att.store_op = STORE_OP_STORE;
        att.initial_layout = current_layouts[i];
        att.final_layout = current_layouts[i];
    }
    RenderPassDescription { attachments, subpasses: vec![strip_resolve_and_preserve(subpass)] }
}

/// Rewrites subpass `index` into the "end" variant: `loadOp = LOAD`; `storeOp = STORE` is kept
/// for attachments still referenced by a later subpass in `original`, and left as the original
/// store op for attachments this is the last use of.
pub fn rewrite_end(original: &RenderPassDescription, index: usize) -> RenderPassDescription {
    let subpass = &original.subpasses[index];
    let mut attachments = original.attachments.clone();
    for (att_index, _) in subpass.referenced_attachments() {
        let att = &mut attachments[att_index as usize];
        att.load_op = LOAD_OP_LOAD;
        if attachment_used_after(original, index, att_index) {
            att.store_op = STORE_OP_STORE;
        }
    }
    RenderPassDescription { attachments, subpasses: vec![strip_resolve_and_preserve(subpass)] }
}

fn attachment_used_after(original: &RenderPassDescription, index: usize, att_index: u32) -> bool {
    original.subpasses[index + 1..].iter().any(|s| s.referenced_attachments().any(|(i, _)| i == att_index))
}

fn strip_resolve_and_preserve(subpass: &SubpassDescription) -> SubpassDescription {
    SubpassDescription {
        input_attachments: subpass.input_attachments.clone(),
        color_attachments: subpass.color_attachments.clone(),
        depth_attachment: subpass.depth_attachment,
        resolve_attachments: Vec::new(),
        preserve_attachments: Vec::new(),
    }
}

pub const LOAD_OP_LOAD: i32 = 0;
pub const STORE_OP_STORE: i32 = 0;

/// Builds the live `VkRenderPass` for a rewritten [`RenderPassDescription`]; supplied by whatever
/// layer holds the full original create-info (the creation tracker or the replayer).
pub trait RenderPassFactory {
    fn build(&mut self, description: &RenderPassDescription) -> anyhow::Result<vk::RenderPass>;
}

/// Clones a pipeline so it targets subpass 0 of `render_pass`; supplied by the same layer as
/// [`RenderPassFactory`] since it needs the pipeline's full create-info too.
pub trait PipelineCloner {
    fn clone_for_subpass0(&mut self, pipeline: u64, render_pass: vk::RenderPass) -> anyhow::Result<vk::Pipeline>;
}

/// Drives a split replay of one command buffer's recorded stream through `target`, inserting
/// `on_split` at each requested index and rewriting any renderpass a split point lands inside.
/// Any renderpass/pipeline creation failure while rewriting is a bug in the caller's factories,
/// not a recoverable condition -- it panics rather than returning a partially-rewritten stream.
/// Every field is behind a `Mutex` so the splitter can be shared (not just mutably borrowed) by
/// [`TrackingTransform`], which needs to build renderpasses and clone pipelines from inside
/// `&self` `Transform` methods.
pub struct CommandBufferSplitter<'a> {
    render_pass_factory: std::sync::Mutex<&'a mut dyn RenderPassFactory>,
    pipeline_cloner: std::sync::Mutex<&'a mut dyn PipelineCloner>,
    pipeline_cache: std::sync::Mutex<HashMap<(u64, u64), vk::Pipeline>>,
}

impl<'a> CommandBufferSplitter<'a> {
    pub fn new(render_pass_factory: &'a mut dyn RenderPassFactory, pipeline_cloner: &'a mut dyn PipelineCloner) -> Self {
        Self {
            render_pass_factory: std::sync::Mutex::new(render_pass_factory),
            pipeline_cloner: std::sync::Mutex::new(pipeline_cloner),
            pipeline_cache: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn build_render_pass(&self, description: &RenderPassDescription) -> vk::RenderPass {
        self.render_pass_factory.lock().unwrap().build(description).expect("rewritten renderpass creation must succeed")
    }

    /// Returns the subpass-0 clone of `pipeline` against `render_pass`, creating and caching it
    /// on first use.
    pub fn pipeline_for_subpass0(&self, pipeline: u64, render_pass: vk::RenderPass) -> vk::Pipeline {
        let mut cache = self.pipeline_cache.lock().unwrap();
        *cache
            .entry((pipeline, render_pass.as_raw()))
            .or_insert_with(|| self.pipeline_cloner.lock().unwrap().clone_for_subpass0(pipeline, render_pass).expect("pipeline clone for subpass 0 must succeed"))
    }
}

/// Issues a `cmd_begin_render_pass` for `render_pass` with one zeroed clear value per attachment
/// -- splitter-rewritten renderpasses only ever run already-in-flight work, so the application's
/// original clear values (consumed by the subpass this replaces) don't need to be threaded through.
fn begin_render_pass(target: &dyn Transform, cb: vk::CommandBuffer, render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, attachment_count: usize) -> anyhow::Result<()> {
    let clear_values = vec![vk::ClearValue::default(); attachment_count];
    let info = vk::RenderPassBeginInfo::builder().render_pass(render_pass).framebuffer(framebuffer).clear_values(&clear_values).build();
    target.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE)
}

/// Renderpass/subpass bookkeeping for one currently-open (possibly rewritten) render pass.
#[derive(Clone, Copy)]
struct ActiveRenderPass {
    original: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    /// Index into the *original* renderpass's subpass list -- every rewritten variant has exactly
    /// one subpass (subpass 0), so this is the only place the original index still lives.
    subpass_index: usize,
    current: vk::RenderPass,
}

/// Wraps `target`, rewriting every renderpass into single-subpass pre-split/post-split/end
/// variants as it is replayed, and remapping any pipeline bound against a non-zero original
/// subpass to its subpass-0 clone so it stays compatible with the rewritten renderpass it now
/// runs under. `describe`/`current_layouts` are the same lookups `split_command_buffer` is given.
struct TrackingTransform<'a, 'b, 'c> {
    target: &'a dyn Transform,
    splitter: &'b CommandBufferSplitter<'c>,
    describe: &'a dyn Fn(vk::RenderPass) -> RenderPassDescription,
    current_layouts: &'a dyn Fn(vk::RenderPass, usize) -> Vec<i32>,
    active: std::sync::Mutex<Option<ActiveRenderPass>>,
}

impl<'a, 'b, 'c> TrackingTransform<'a, 'b, 'c> {
    fn begin_subpass(&self, cb: vk::CommandBuffer, original: vk::RenderPass, framebuffer: vk::Framebuffer, subpass_index: usize) -> anyhow::Result<()> {
        let description = (self.describe)(original);
        let layouts = (self.current_layouts)(original, subpass_index);
        let pre = rewrite_pre_split(&description, subpass_index, &layouts);
        let rp = self.splitter.build_render_pass(&pre);
        *self.active.lock().unwrap() = Some(ActiveRenderPass { original, framebuffer, subpass_index, current: rp });
        begin_render_pass(self.target, cb, rp, framebuffer, pre.attachments.len())
    }

    /// Performs the `End, Begin(post-split), hook, End, Begin(end)` dance for a split landing
    /// inside the currently active subpass. No-op (beyond invoking `on_split`) outside a
    /// renderpass, since there is nothing to rewrite there.
    fn split_at(&self, cb: vk::CommandBuffer, index: usize, mut on_split: impl FnMut(usize)) {
        let snapshot = *self.active.lock().unwrap();
        let Some(state) = snapshot else {
            on_split(index);
            return;
        };

        self.target.cmd_end_render_pass(cb).expect("EndRenderPass for split point must succeed");

        let description = (self.describe)(state.original);
        let layouts = (self.current_layouts)(state.original, state.subpass_index);

        let post = rewrite_post_split(&description, state.subpass_index, &layouts);
        let post_rp = self.splitter.build_render_pass(&post);
        begin_render_pass(self.target, cb, post_rp, state.framebuffer, post.attachments.len()).expect("BeginRenderPass(post-split) must succeed");

        on_split(index);

        self.target.cmd_end_render_pass(cb).expect("EndRenderPass(post-split) must succeed");

        let end = rewrite_end(&description, state.subpass_index);
        let end_rp = self.splitter.build_render_pass(&end);
        begin_render_pass(self.target, cb, end_rp, state.framebuffer, end.attachments.len()).expect("BeginRenderPass(end) must succeed");

        *self.active.lock().unwrap() = Some(ActiveRenderPass { current: end_rp, ..state });
    }
}

impl<'a, 'b, 'c> Transform for TrackingTransform<'a, 'b, 'c> {
    fn next(&self) -> &dyn Transform {
        self.target
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, _contents: vk::SubpassContents) -> anyhow::Result<()> {
        self.begin_subpass(cb, info.render_pass, info.framebuffer, 0)
    }

    fn cmd_next_subpass(&self, cb: vk::CommandBuffer, _contents: vk::SubpassContents) -> anyhow::Result<()> {
        self.target.cmd_end_render_pass(cb)?;
        let Some(state) = *self.active.lock().unwrap() else { return Ok(()) };
        self.begin_subpass(cb, state.original, state.framebuffer, state.subpass_index + 1)
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) -> anyhow::Result<()> {
        *self.active.lock().unwrap() = None;
        self.target.cmd_end_render_pass(cb)
    }

    fn cmd_bind_pipeline(&self, cb: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
        let current = self.active.lock().unwrap().as_ref().filter(|s| s.subpass_index != 0).map(|s| s.current);
        match current {
            Some(render_pass) => self.target.cmd_bind_pipeline(cb, bind_point, self.splitter.pipeline_for_subpass0(pipeline.as_raw(), render_pass)),
            None => self.target.cmd_bind_pipeline(cb, bind_point, pipeline),
        }
    }
}

/// Splits `stream` (as produced by the command recorder) at every index in `split_at`, replaying
/// through `target` and invoking `on_split` at each one. `describe`/`current_layouts` look up the
/// original renderpass description and each attachment's layout at the moment of the split,
/// respectively -- the information the state tracker/creation tracker already hold.
pub fn split_command_buffer(
    splitter: &CommandBufferSplitter,
    cb: vk::CommandBuffer,
    stream: &[u8],
    target: &dyn Transform,
    describe: &dyn Fn(vk::RenderPass) -> RenderPassDescription,
    current_layouts: &dyn Fn(vk::RenderPass, usize) -> Vec<i32>,
    split_at: &[usize],
    mut on_split: impl FnMut(usize),
) -> anyhow::Result<()> {
    use std::collections::BTreeSet;
    let split_at: BTreeSet<usize> = split_at.iter().copied().collect();
    let tracking = TrackingTransform { target, splitter, describe, current_layouts, active: std::sync::Mutex::new(None) };

    super::command_recorder::rerecord_command_buffer(cb, stream, &tracking, |index| {
        if split_at.contains(&index) {
            tracking.split_at(cb, index, &mut on_split);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_description() -> RenderPassDescription {
        RenderPassDescription {
            attachments: vec![
                AttachmentDescription { format: 1, samples: 1, load_op: 1, store_op: 1, initial_layout: 0, final_layout: 2 },
                AttachmentDescription { format: 2, samples: 1, load_op: 1, store_op: 1, initial_layout: 0, final_layout: 3 },
            ],
            subpasses: vec![
                SubpassDescription { color_attachments: vec![(0, 2)], depth_attachment: Some((1, 3)), ..Default::default() },
                SubpassDescription { color_attachments: vec![(0, 2)], ..Default::default() },
            ],
        }
    }

    #[test]
    fn pre_split_latches_current_layout_as_initial() {
        let original = sample_description();
        let rewritten = rewrite_pre_split(&original, 0, &[5, 6]);
        assert_eq!(rewritten.attachments[0].initial_layout, 5);
        assert_eq!(rewritten.attachments[1].initial_layout, 6);
        assert_eq!(rewritten.attachments[0].final_layout, 2);
        assert_eq!(rewritten.subpasses.len(), 1);
    }

    #[test]
    fn post_split_forces_load_store_and_latches_both_layouts() {
        let original = sample_description();
        let rewritten = rewrite_post_split(&original, 0, &[5, 6]);
        assert_eq!(rewritten.attachments[0].load_op, LOAD_OP_LOAD);
        assert_eq!(rewritten.attachments[0].store_op, STORE_OP_STORE);
        assert_eq!(rewritten.attachments[0].initial_layout, 5);
        assert_eq!(rewritten.attachments[0].final_layout, 5);
    }

    #[test]
    fn end_variant_keeps_store_only_for_attachments_used_later() {
        let original = sample_description();
        let rewritten = rewrite_end(&original, 0);
        // attachment 0 is referenced by subpass 1, attachment 1 is not.
        assert_eq!(rewritten.attachments[0].load_op, LOAD_OP_LOAD);
        assert_eq!(rewritten.attachments[0].store_op, STORE_OP_STORE);
        assert_eq!(rewritten.attachments[1].load_op, LOAD_OP_LOAD);
    }

    #[test]
    fn resolve_and_preserve_attachments_are_dropped_from_variants() {
        let mut original = sample_description();
        original.subpasses[0].resolve_attachments.push((0, 2));
        original.subpasses[0].preserve_attachments.push(1);
        let rewritten = rewrite_pre_split(&original, 0, &[0, 0]);
        assert!(rewritten.subpasses[0].resolve_attachments.is_empty());
        assert!(rewritten.subpasses[0].preserve_attachments.is_empty());
    }

    use crate::layers::command_recorder::CommandRecorder;
    use crate::state::types::CommandBuffer as CommandBufferState;
    use crate::state::StateBlock;
    use crate::transform::Unreachable;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Begin(u64),
        End,
        Bind(u64),
    }

    struct RecordingTarget {
        events: StdMutex<Vec<Event>>,
    }

    impl Transform for RecordingTarget {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: Unreachable = Unreachable;
            &UNREACHABLE
        }
        fn cmd_begin_render_pass(&self, _cb: vk::CommandBuffer, info: &vk::RenderPassBeginInfo, _contents: vk::SubpassContents) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(Event::Begin(info.render_pass.as_raw()));
            Ok(())
        }
        fn cmd_end_render_pass(&self, _cb: vk::CommandBuffer) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(Event::End);
            Ok(())
        }
        fn cmd_bind_pipeline(&self, _cb: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(Event::Bind(pipeline.as_raw()));
            Ok(())
        }
        fn cmd_draw(&self, _cb: vk::CommandBuffer, _v: u32, _i: u32, _fv: u32, _fi: u32) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct SequentialRenderPassFactory {
        next_id: u64,
    }
    impl RenderPassFactory for SequentialRenderPassFactory {
        fn build(&mut self, _description: &RenderPassDescription) -> anyhow::Result<vk::RenderPass> {
            self.next_id += 1;
            Ok(vk::RenderPass::from_raw(self.next_id))
        }
    }

    struct OffsetPipelineCloner;
    impl PipelineCloner for OffsetPipelineCloner {
        fn clone_for_subpass0(&mut self, pipeline: u64, _render_pass: vk::RenderPass) -> anyhow::Result<vk::Pipeline> {
            Ok(vk::Pipeline::from_raw(pipeline + 1000))
        }
    }

    fn record_stream(build: impl FnOnce(&CommandRecorder, vk::CommandBuffer)) -> (Arc<StateBlock>, Vec<u8>) {
        let state = Arc::new(StateBlock::new());
        state.command_buffers.create(1, CommandBufferState::new(1, 0, 0, vec![])).unwrap();
        struct NoopTransform;
        impl Transform for NoopTransform {
            fn next(&self) -> &dyn Transform {
                static UNREACHABLE: Unreachable = Unreachable;
                &UNREACHABLE
            }
        }
        let recorder = CommandRecorder::new(Arc::new(NoopTransform), state.clone());
        let cb = vk::CommandBuffer::from_raw(1);
        build(&recorder, cb);
        let stream = state.command_buffers.get(1).unwrap().recorded.lock().unwrap().clone();
        (state, stream)
    }

    /// A split landing inside a non-last subpass produces the four-renderpass sequence:
    /// pre-split (subpass 0) / post-split (the hook) / end (rest of subpass 0) / pre-split
    /// (subpass 1), each its own `Begin`/`End` pair.
    #[test]
    fn split_inside_non_last_subpass_produces_pre_post_end_pre_sequence() {
        let original_rp = vk::RenderPass::from_raw(1);
        let fb = vk::Framebuffer::from_raw(2);
        let (_state, stream) = record_stream(|recorder, cb| {
            let clear = vec![vk::ClearValue::default(); 2];
            let info = vk::RenderPassBeginInfo::builder().render_pass(original_rp).framebuffer(fb).clear_values(&clear).build();
            recorder.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE).unwrap();
            recorder.cmd_draw(cb, 3, 1, 0, 0).unwrap();
            recorder.cmd_draw(cb, 3, 1, 0, 0).unwrap();
            recorder.cmd_next_subpass(cb, vk::SubpassContents::INLINE).unwrap();
            recorder.cmd_draw(cb, 3, 1, 0, 0).unwrap();
            recorder.cmd_end_render_pass(cb).unwrap();
        });

        let mut factory = SequentialRenderPassFactory { next_id: 100 };
        let mut cloner = OffsetPipelineCloner;
        let splitter = CommandBufferSplitter::new(&mut factory, &mut cloner);
        let target = RecordingTarget { events: StdMutex::new(Vec::new()) };

        let describe = |_rp: vk::RenderPass| sample_description();
        let current_layouts = |_rp: vk::RenderPass, _subpass: usize| vec![0, 0];
        let mut splits = Vec::new();

        split_command_buffer(&splitter, vk::CommandBuffer::from_raw(1), &stream, &target, &describe, &current_layouts, &[2], |i| splits.push(i)).unwrap();

        assert_eq!(splits, vec![2]);
        assert_eq!(
            *target.events.lock().unwrap(),
            vec![
                Event::Begin(101), // pre-split, subpass 0
                Event::End,
                Event::Begin(102), // post-split (the hook runs here)
                Event::End,
                Event::Begin(103), // end variant, rest of subpass 0
                Event::End,
                Event::Begin(104), // pre-split, subpass 1
                Event::End,
            ]
        );
    }

    /// A pipeline bound while the active (rewritten, single-subpass) renderpass corresponds to a
    /// non-zero original subpass is rebound through its subpass-0 clone; a bind in subpass 0 needs
    /// no remapping since the rewritten renderpass already targets subpass 0.
    #[test]
    fn bind_pipeline_in_non_zero_subpass_uses_subpass0_clone() {
        let original_rp = vk::RenderPass::from_raw(1);
        let fb = vk::Framebuffer::from_raw(2);
        let (_state, stream) = record_stream(|recorder, cb| {
            let clear = vec![vk::ClearValue::default(); 2];
            let info = vk::RenderPassBeginInfo::builder().render_pass(original_rp).framebuffer(fb).clear_values(&clear).build();
            recorder.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE).unwrap();
            recorder.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, vk::Pipeline::from_raw(5)).unwrap();
            recorder.cmd_next_subpass(cb, vk::SubpassContents::INLINE).unwrap();
            recorder.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, vk::Pipeline::from_raw(7)).unwrap();
            recorder.cmd_end_render_pass(cb).unwrap();
        });

        let mut factory = SequentialRenderPassFactory { next_id: 200 };
        let mut cloner = OffsetPipelineCloner;
        let splitter = CommandBufferSplitter::new(&mut factory, &mut cloner);
        let target = RecordingTarget { events: StdMutex::new(Vec::new()) };

        let describe = |_rp: vk::RenderPass| sample_description();
        let current_layouts = |_rp: vk::RenderPass, _subpass: usize| vec![0, 0];

        split_command_buffer(&splitter, vk::CommandBuffer::from_raw(1), &stream, &target, &describe, &current_layouts, &[], |_| {}).unwrap();

        let binds: Vec<u64> = target
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| if let Event::Bind(p) = e { Some(*p) } else { None })
            .collect();
        assert_eq!(binds, vec![5, 1007]);
    }
}
