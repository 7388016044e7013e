//! End-to-end exercises of the full pipeline: a fake driver stands in for the real loader, calls
//! flow down through the creation/state trackers and the Spy into a `MemorySink`, and the
//! resulting wire stream is fed back through a `Replayer` pointed at a second fake driver.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use vkcapture::layers::command_recorder::CommandRecorder;
use vkcapture::layers::creation_tracker::CreationTracker;
use vkcapture::replay::Replayer;
use vkcapture::sink::MemorySink;
use vkcapture::spy::serializer::SpySerializer;
use vkcapture::spy::Spy;
use vkcapture::state::StateBlock;
use vkcapture::transform::{Transform, Unreachable};
use vkcapture::wire::{read_records, Encoder};

const FIXED_DEVICE_ID: u32 = 0x1234;
const FIXED_VENDOR_ID: u32 = 0x10DE;
const FIXED_DRIVER_VERSION: u32 = 7;

/// Mirrors the numbering in `spy::opcode`, which is crate-private -- a hand-built wire stream
/// has to tag its records with the same numbers the real `Spy` would have written.
mod opcode {
    pub const CREATE_INSTANCE: u32 = 1;
    pub const ENUMERATE_PHYSICAL_DEVICES: u32 = 3;
    pub const CREATE_DEVICE: u32 = 4;
    pub const CREATE_BUFFER: u32 = 10;
}

/// Hands out incrementing handles and records how many times each entry point ran, standing in
/// for a real Vulkan loader on both the capture and the replay side of a round trip.
struct CountingDriver {
    next_handle: AtomicU64,
    instances_created: AtomicUsize,
    instances_destroyed: AtomicUsize,
    devices_created: AtomicUsize,
    devices_destroyed: AtomicUsize,
    buffers_created: AtomicUsize,
    buffers_destroyed: AtomicUsize,
}

impl CountingDriver {
    fn new(base: u64) -> Self {
        Self {
            next_handle: AtomicU64::new(base),
            instances_created: AtomicUsize::new(0),
            instances_destroyed: AtomicUsize::new(0),
            devices_created: AtomicUsize::new(0),
            devices_destroyed: AtomicUsize::new(0),
            buffers_created: AtomicUsize::new(0),
            buffers_destroyed: AtomicUsize::new(0),
        }
    }

    fn fresh(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }
}

impl Transform for CountingDriver {
    fn next(&self) -> &dyn Transform {
        static UNREACHABLE: Unreachable = Unreachable;
        &UNREACHABLE
    }

    fn create_instance(&self, _info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
        self.instances_created.fetch_add(1, Ordering::SeqCst);
        Ok(vk::Instance::from_raw(self.fresh()))
    }

    fn destroy_instance(&self, _instance: vk::Instance) -> anyhow::Result<()> {
        self.instances_destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enumerate_physical_devices(&self, _instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        Ok(vec![vk::PhysicalDevice::from_raw(self.fresh())])
    }

    fn get_physical_device_properties(&self, _physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceProperties> {
        Ok(vk::PhysicalDeviceProperties {
            device_id: FIXED_DEVICE_ID,
            vendor_id: FIXED_VENDOR_ID,
            driver_version: FIXED_DRIVER_VERSION,
            ..Default::default()
        })
    }

    fn create_device(&self, _physical_device: vk::PhysicalDevice, _info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
        self.devices_created.fetch_add(1, Ordering::SeqCst);
        Ok(vk::Device::from_raw(self.fresh()))
    }

    fn destroy_device(&self, _device: vk::Device) -> anyhow::Result<()> {
        self.devices_destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_buffer(&self, _device: vk::Device, _info: &vk::BufferCreateInfo) -> anyhow::Result<vk::Buffer> {
        self.buffers_created.fetch_add(1, Ordering::SeqCst);
        Ok(vk::Buffer::from_raw(self.fresh()))
    }

    fn destroy_buffer(&self, _device: vk::Device, _buffer: vk::Buffer) -> anyhow::Result<()> {
        self.buffers_destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Forwards to a shared [`CountingDriver`] so a test can hand a `Box<dyn Transform>` to
/// [`Replayer::new`] while keeping its own `Arc` to read the counters back afterward.
struct SharedDriver(Arc<CountingDriver>);

impl Transform for SharedDriver {
    fn next(&self) -> &dyn Transform {
        static UNREACHABLE: Unreachable = Unreachable;
        &UNREACHABLE
    }

    fn create_instance(&self, info: &vk::InstanceCreateInfo) -> anyhow::Result<vk::Instance> {
        self.0.create_instance(info)
    }

    fn destroy_instance(&self, instance: vk::Instance) -> anyhow::Result<()> {
        self.0.destroy_instance(instance)
    }

    fn enumerate_physical_devices(&self, instance: vk::Instance) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
        self.0.enumerate_physical_devices(instance)
    }

    fn get_physical_device_properties(&self, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::PhysicalDeviceProperties> {
        self.0.get_physical_device_properties(physical_device)
    }

    fn create_device(&self, physical_device: vk::PhysicalDevice, info: &vk::DeviceCreateInfo) -> anyhow::Result<vk::Device> {
        self.0.create_device(physical_device, info)
    }

    fn destroy_device(&self, device: vk::Device) -> anyhow::Result<()> {
        self.0.destroy_device(device)
    }

    fn create_buffer(&self, device: vk::Device, info: &vk::BufferCreateInfo) -> anyhow::Result<vk::Buffer> {
        self.0.create_buffer(device, info)
    }

    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer) -> anyhow::Result<()> {
        self.0.destroy_buffer(device, buffer)
    }
}

/// Wires up creation-tracker + command-recorder + Spy over `driver`, the same shape
/// `vkcapture::Session` assembles minus the state tracker and memory tracker (neither of which
/// the scenario below exercises).
fn build_capture_chain(driver: Arc<dyn Transform>, state: Arc<StateBlock>, serializer: Arc<SpySerializer>) -> Arc<dyn Transform> {
    let next: Arc<dyn Transform> = Arc::new(CommandRecorder::new(driver, state.clone()));
    let next: Arc<dyn Transform> = Arc::new(CreationTracker::new(next, state.clone()));
    Arc::new(Spy::new(next, serializer, state, None))
}

#[test]
fn captured_instance_device_buffer_lifecycle_replays_against_a_second_driver() {
    let capture_driver = Arc::new(CountingDriver::new(1));
    let state = Arc::new(StateBlock::new());
    let sink = Arc::new(MemorySink::new());
    let serializer = Arc::new(SpySerializer::new(sink.clone()));
    serializer.enable();
    let spy = build_capture_chain(capture_driver.clone(), state, serializer);

    let instance = spy.create_instance(&vk::InstanceCreateInfo::default()).unwrap();
    let pds = spy.enumerate_physical_devices(instance).unwrap();
    let device = spy.create_device(pds[0], &vk::DeviceCreateInfo::default()).unwrap();
    let buffer = spy.create_buffer(device, &vk::BufferCreateInfo { size: 256, ..Default::default() }).unwrap();
    spy.destroy_buffer(device, buffer).unwrap();
    spy.destroy_device(device).unwrap();
    spy.destroy_instance(instance).unwrap();

    assert_eq!(capture_driver.instances_created.load(Ordering::SeqCst), 1);
    assert_eq!(capture_driver.buffers_created.load(Ordering::SeqCst), 1);

    let bytes = sink.bytes();
    assert!(!read_records(&bytes).unwrap().is_empty());

    // Replay against a driver whose handle numbering starts somewhere else entirely -- the
    // replayer must never assume recorded and live handles coincide.
    let replay_driver = Arc::new(CountingDriver::new(90_000));
    let replayer = Replayer::new(Box::new(SharedDriver(replay_driver.clone())));
    replayer.replay(&bytes).unwrap();

    assert_eq!(replay_driver.instances_created.load(Ordering::SeqCst), 1);
    assert_eq!(replay_driver.instances_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(replay_driver.devices_created.load(Ordering::SeqCst), 1);
    assert_eq!(replay_driver.devices_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(replay_driver.buffers_created.load(Ordering::SeqCst), 1);
    assert_eq!(replay_driver.buffers_destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn unmatched_physical_device_skips_every_dependent_record_without_erroring() {
    // Hand-build a stream: an instance, one physical device tuple that matches no vendor this
    // driver ever reports, then a device and buffer that both depend on it.
    let mut enc = Encoder::new();
    enc.write_u32(opcode::CREATE_INSTANCE);
    enc.write_handle(1u64);
    let mut stream = wrap_record(enc);

    let mut enc = Encoder::new();
    enc.write_u32(opcode::ENUMERATE_PHYSICAL_DEVICES);
    enc.write_handle(1u64);
    enc.write_u64(1);
    enc.write_handle(2u64);
    enc.write_bool(true);
    enc.write_u32(0xFFFF); // device_id that will never match
    enc.write_u32(0xFFFF); // vendor_id that will never match
    enc.write_u32(0);
    stream.extend(wrap_record(enc));

    let mut enc = Encoder::new();
    enc.write_u32(opcode::CREATE_DEVICE);
    enc.write_handle(2u64);
    enc.write_handle(3u64);
    stream.extend(wrap_record(enc));

    let mut enc = Encoder::new();
    enc.write_u32(opcode::CREATE_BUFFER);
    enc.write_handle(3u64);
    enc.write_u64(64);
    enc.write_u32(0);
    enc.write_handle(4u64);
    stream.extend(wrap_record(enc));

    let driver = Arc::new(CountingDriver::new(1));
    let replayer = Replayer::new(Box::new(SharedDriver(driver.clone())));
    replayer.replay(&stream).unwrap();

    assert_eq!(driver.instances_created.load(Ordering::SeqCst), 1);
    assert_eq!(driver.devices_created.load(Ordering::SeqCst), 0);
    assert_eq!(driver.buffers_created.load(Ordering::SeqCst), 0);
}

/// Frames one already-opcode-tagged payload as a `{length, flags, payload}` record with the
/// `NORMAL` flag, matching `SpySerializer`'s own framing.
fn wrap_record(enc: Encoder) -> Vec<u8> {
    let payload = enc.into_bytes();
    let mut out = (payload.len() as u64).to_le_bytes().to_vec();
    out.extend_from_slice(&vkcapture::wire::flags::NORMAL.to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

#[test]
fn mid_execution_capture_reconstructs_a_live_instance_before_normal_recording_resumes() {
    let state = Arc::new(StateBlock::new());
    state
        .instances
        .create(1, vkcapture::state::wrapper::Generic { kind: "VkInstance", handle: 1, parent: None, create_info: Vec::new() })
        .unwrap();

    let sink = Arc::new(MemorySink::new());
    let serializer = Arc::new(SpySerializer::new(sink.clone()));
    let generator = vkcapture::mec::McGenerator::new(state, serializer.clone());

    struct NoopTransform;
    impl Transform for NoopTransform {
        fn next(&self) -> &dyn Transform {
            static UNREACHABLE: Unreachable = Unreachable;
            &UNREACHABLE
        }
    }
    generator.generate(&NoopTransform).unwrap();

    let bytes = sink.bytes();
    let records = read_records(&bytes).unwrap();
    assert!(records.iter().any(|r| r.flags == vkcapture::wire::flags::MID_EXECUTION));

    let replay_driver = Arc::new(CountingDriver::new(500));
    let replayer = Replayer::new(Box::new(SharedDriver(replay_driver.clone())));
    replayer.replay(&bytes).unwrap();

    assert_eq!(replay_driver.instances_created.load(Ordering::SeqCst), 1);
}

#[test]
fn decode_underflow_from_a_truncated_record_is_reported_not_panicked() {
    let mut enc = Encoder::new();
    enc.write_u32(opcode::CREATE_INSTANCE);
    // No handle payload follows, unlike a real CREATE_INSTANCE record.
    let stream = wrap_record(enc);

    let replayer = Replayer::new(Box::new(CountingDriver::new(1)));
    assert!(replayer.replay(&stream).is_err());
}

