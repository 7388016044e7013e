//! Vulkan call interception, capture, and replay.
//!
//! An application (or a test harness standing in for one) drives a pipeline of [`Transform`]s.
//! Calls flow from the outermost transform down to [`base_caller::DriverTransform`], the
//! terminus that actually invokes the platform driver through `ash`. Built top to bottom, the
//! default pipeline is:
//!
//! ```text
//! Spy -> Layerer -> StateTracker -> CreationTracker -> CommandRecorder -> MemoryTracker -> DriverTransform
//! ```
//!
//! [`spy::Spy`] is the capture boundary: every call it sees is serialized to a [`sink::StreamSink`]
//! through [`spy::serializer::SpySerializer`] in the wire format defined by [`wire`]. User layers
//! loaded by [`layers::layerer::Layerer`] splice in ahead of the state trackers so a layer sees
//! calls before this crate's own bookkeeping runs. [`layers::creation_tracker::CreationTracker`]
//! and [`layers::state_tracker::StateTracker`] keep [`state::StateBlock`] in sync with the
//! driver; [`layers::command_recorder::CommandRecorder`] mirrors each command buffer's `vkCmd*`
//! stream onto its own wrapper so [`mec`] can re-issue it during mid-execution capture, and
//! [`layers::command_splitter`] can rewrite a single render pass into two around an arbitrary
//! injected point. [`layers::memory_tracker::MemoryTracker`] watches host-coherent mapped memory
//! for writes via guard-page faults so `Spy` can emit memory-update records ahead of each submit
//! without requiring the application to call `vkFlushMappedMemoryRanges`.
//!
//! A captured stream is read back by [`replay::Replayer`], which dispatches wire records by the
//! same opcode table [`spy::opcode`] and [`mec::McGenerator`] write against, so a trace doesn't
//! care whether a given record came from live capture or mid-execution capture.

pub mod base_caller;
pub mod config;
pub mod error;
pub mod layers;
pub mod mec;
pub mod replay;
pub mod sink;
pub mod spy;
pub mod state;
pub mod transform;
pub mod wire;

use std::sync::Arc;

use base_caller::{BaseCaller, DriverTransform};
use config::EnvConfig;
use layers::command_recorder::CommandRecorder;
use layers::creation_tracker::CreationTracker;
use layers::layerer::Layerer;
use layers::memory_tracker::MemoryTracker;
use layers::state_tracker::StateTracker;
use sink::StreamSink;
use spy::serializer::SpySerializer;
use spy::Spy;
use state::StateBlock;
use transform::Transform;

/// Owns every piece of a capture session: the state block, the memory tracker, the serializer,
/// and the outermost transform an application should actually call into.
///
/// Constructed once per captured process. Dropping a `Session` does not flush its sink; callers
/// that need a guaranteed-complete trace should call [`Session::serializer`] and flush its sink
/// explicitly before exiting.
pub struct Session {
    outermost: Arc<dyn Transform>,
    state: Arc<StateBlock>,
    serializer: Arc<SpySerializer>,
    memory_tracker: Arc<MemoryTracker>,
    layerer: Layerer,
}

impl Session {
    /// Assembles the default pipeline over a freshly loaded driver, reading layer configuration
    /// from the environment (`GAPID2_LAYERS`/`GAPID2_USER_CONFIG`, component J/§4.O).
    pub fn start(sink: Arc<dyn StreamSink>) -> anyhow::Result<Self> {
        Self::start_with_config(sink, EnvConfig::from_env())
    }

    /// As [`Session::start`], but with an explicitly supplied configuration instead of reading
    /// the environment -- the entry point test harnesses use to avoid depending on process-wide
    /// environment variables.
    pub fn start_with_config(sink: Arc<dyn StreamSink>, config: EnvConfig) -> anyhow::Result<Self> {
        let state = Arc::new(StateBlock::new());
        let driver: Arc<dyn Transform> = Arc::new(DriverTransform::new(Arc::new(BaseCaller::load()?)));

        let memory_tracker = Arc::new(MemoryTracker::new(driver));
        memory_tracker.install();
        let next: Arc<dyn Transform> = memory_tracker.clone();

        let next: Arc<dyn Transform> = Arc::new(CommandRecorder::new(next, state.clone()));
        let next: Arc<dyn Transform> = Arc::new(CreationTracker::new(next, state.clone()));
        let next: Arc<dyn Transform> = Arc::new(StateTracker::new(next, state.clone()));

        let layerer = Layerer::load(&config.layers, next, config.user_config.as_deref());

        let serializer = Arc::new(SpySerializer::new(sink));
        serializer.enable();
        let outermost: Arc<dyn Transform> = Arc::new(Spy::new(layerer.outermost(), serializer.clone(), state.clone(), Some(memory_tracker.clone())));

        Ok(Self { outermost, state, serializer, memory_tracker, layerer })
    }

    /// The transform an intercepted entry point should call into -- the outermost of the
    /// assembled pipeline (`Spy`, unless a loaded layer wraps it).
    pub fn transform(&self) -> &dyn Transform {
        self.outermost.as_ref()
    }

    pub fn state(&self) -> &Arc<StateBlock> {
        &self.state
    }

    pub fn serializer(&self) -> &Arc<SpySerializer> {
        &self.serializer
    }

    pub fn memory_tracker(&self) -> &Arc<MemoryTracker> {
        &self.memory_tracker
    }

    /// Runs mid-execution capture: emits a prologue reconstructing every live object, then
    /// resumes normal recording. Intended for attaching to a process already running (component L).
    pub fn capture_mid_execution(&self) -> anyhow::Result<()> {
        let generator = mec::McGenerator::new(self.state.clone(), self.serializer.clone());
        generator.generate(self.transform())
    }

    pub fn loaded_layer_count(&self) -> usize {
        self.layerer.loaded_count()
    }
}
