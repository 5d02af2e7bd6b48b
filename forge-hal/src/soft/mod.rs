/*!
# Software backend

Executes command buffers on the host, at submission time, on the submitting
thread. Buffers have real storage so transfers can be observed, and fences
are real timelines that other threads can block on.

## Completion

In [`CompletionMode::Immediate`] a submission signals its fence right after
execution. In [`CompletionMode::Manual`] the signal is deferred until
[`Device::complete_pending`] is called, which lets callers hold work
"in flight" for as long as they need.

## Descriptors

Heaps are carved from a device-wide address space. Descriptor contents are
tracked per address, so copies between heaps can be inspected with
[`Device::read_descriptor`].

## Queue waits

A fence wait recorded with `wait_for_fence` holds back the next submission
on that queue. There is no device timeline to park the work on, so the
submitting thread blocks until every awaited fence reaches its value, or
the device is lost.
*/

mod command;
mod device;

pub use command::{CommandBuffer, CommandPool};

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use arrayvec::ArrayVec;
use parking_lot::{Condvar, Mutex};

use crate::{DescriptorAddress, FenceValue};

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Instance = Instance;
    type Device = Device;
    type Queue = Queue;

    type CommandPool = CommandPool;
    type CommandBuffer = CommandBuffer;
    type Fence = Fence;
    type DescriptorHeap = DescriptorHeap;

    type Buffer = Buffer;
    type Texture = Texture;
    type Sampler = Sampler;
    type ShaderModule = ShaderModule;
    type ComputePipeline = ComputePipeline;
    type GraphicsPipeline = GraphicsPipeline;
    type RenderTarget = RenderTarget;
    type Swapchain = Swapchain;
}

/// Base of the GPU view of shader-visible heaps.
const GPU_ADDRESS_BASE: DescriptorAddress = 1 << 48;
/// First address handed out to descriptor heaps.
const CPU_ADDRESS_BASE: DescriptorAddress = 0x1000;
/// How often a blocked queue wait checks for device loss.
const WAIT_SLICE_US: u64 = 10_000;

fn descriptor_increment(ty: crate::DescriptorType) -> u32 {
    match ty {
        crate::DescriptorType::ShaderResource => 32,
        crate::DescriptorType::Sampler => 16,
        crate::DescriptorType::RenderTarget | crate::DescriptorType::DepthStencil => 8,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Fences are signaled as soon as a submission executes.
    Immediate,
    /// Fences are signaled by [`Device::complete_pending`].
    Manual,
}

/// Kinds of objects whose lifetime the device tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Queue,
    Buffer,
    Texture,
    Sampler,
    ShaderModule,
    ComputePipeline,
    GraphicsPipeline,
    RenderTarget,
    Swapchain,
    CommandPool,
    CommandBuffer,
    DescriptorHeap,
    Fence,
}

impl ObjectKind {
    const COUNT: usize = 13;
}

#[derive(Default)]
struct ObjectCounters {
    live: [AtomicUsize; ObjectKind::COUNT],
    created: [AtomicUsize; ObjectKind::COUNT],
}

impl ObjectCounters {
    fn add(&self, kind: ObjectKind) {
        self.live[kind as usize].fetch_add(1, Ordering::Relaxed);
        self.created[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn remove(&self, kind: ObjectKind) {
        self.live[kind as usize].fetch_sub(1, Ordering::Relaxed);
    }
}

/// What a descriptor in the soft address space points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorContents {
    Buffer(u64),
    Texture(u64),
    Sampler(u64),
    ColorTarget(u64, u32),
    DepthTarget(u64),
}

struct DeviceShared {
    flags: crate::InstanceFlags,
    next_id: AtomicU64,
    next_address: AtomicU64,
    descriptors: Mutex<fxhash::FxHashMap<DescriptorAddress, DescriptorContents>>,
    mode: Mutex<CompletionMode>,
    pending: Mutex<Vec<(Fence, FenceValue)>>,
    counters: ObjectCounters,
    submissions: AtomicU64,
    fail_next_submit: AtomicBool,
    lost: AtomicBool,
    markers: Mutex<Vec<String>>,
}

impl fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeviceShared")
            .field("flags", &self.flags)
            .finish()
    }
}

impl DeviceShared {
    fn new(flags: crate::InstanceFlags) -> Self {
        DeviceShared {
            flags,
            next_id: AtomicU64::new(1),
            next_address: AtomicU64::new(CPU_ADDRESS_BASE),
            descriptors: Mutex::new(Default::default()),
            mode: Mutex::new(CompletionMode::Immediate),
            pending: Mutex::new(Vec::new()),
            counters: ObjectCounters::default(),
            submissions: AtomicU64::new(0),
            fail_next_submit: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            markers: Mutex::new(Vec::new()),
        }
    }

    fn make_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn validate(&self, severity: crate::MessageSeverity, message: &str) {
        if self.flags.contains(crate::InstanceFlags::VALIDATION) {
            crate::report_message(crate::Backend::Soft, severity, message);
        }
    }

    fn check_lost(&self) -> Result<(), crate::DeviceError> {
        if self.lost.load(Ordering::Acquire) {
            Err(crate::DeviceError::Lost)
        } else {
            Ok(())
        }
    }
}

pub struct Instance {
    flags: crate::InstanceFlags,
}

impl crate::Instance<Api> for Instance {
    unsafe fn init(desc: &crate::InstanceDescriptor) -> Result<Self, crate::InstanceError> {
        log::info!("Initializing soft instance {:?}", desc.name);
        Ok(Instance { flags: desc.flags })
    }

    unsafe fn open(&self, desc: &crate::OpenDescriptor) -> Result<Device, crate::DeviceError> {
        log::info!("Opening soft device {:?}", desc.label);
        Ok(Device {
            shared: Arc::new(DeviceShared::new(self.flags)),
        })
    }
}

pub struct Device {
    shared: Arc<DeviceShared>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device")
            .field("submissions", &self.submission_count())
            .finish()
    }
}

impl Device {
    pub fn set_completion_mode(&self, mode: CompletionMode) {
        *self.shared.mode.lock() = mode;
        if mode == CompletionMode::Immediate {
            self.complete_pending();
        }
    }

    /// Signal every fence whose signal was deferred. Returns how many were signaled.
    pub fn complete_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.shared.pending.lock());
        for &(ref fence, value) in pending.iter() {
            fence.signal(value);
        }
        pending.len()
    }

    /// Make the next queue submission fail with [`crate::DeviceError::Lost`].
    pub fn fail_next_submit(&self) {
        self.shared.fail_next_submit.store(true, Ordering::Release);
    }

    /// Mark the device as lost. Every later creation or submission fails.
    pub fn lose(&self) {
        self.shared.lost.store(true, Ordering::Release);
    }

    pub fn submission_count(&self) -> u64 {
        self.shared.submissions.load(Ordering::Acquire)
    }

    pub fn live_objects(&self, kind: ObjectKind) -> usize {
        self.shared.counters.live[kind as usize].load(Ordering::Relaxed)
    }

    pub fn created_objects(&self, kind: ObjectKind) -> usize {
        self.shared.counters.created[kind as usize].load(Ordering::Relaxed)
    }

    pub fn read_descriptor(&self, address: DescriptorAddress) -> Option<DescriptorContents> {
        self.shared.descriptors.lock().get(&address).copied()
    }

    /// Debug markers of every executed command buffer, in execution order.
    pub fn executed_markers(&self) -> Vec<String> {
        self.shared.markers.lock().clone()
    }
}

pub struct Queue {
    shared: Arc<DeviceShared>,
    ty: crate::QueueType,
    priority: crate::QueuePriority,
    waits: Vec<(Fence, FenceValue)>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Queue")
            .field("ty", &self.ty)
            .field("priority", &self.priority)
            .finish()
    }
}

impl crate::Queue<Api> for Queue {
    unsafe fn submit(
        &mut self,
        command_buffers: &[&CommandBuffer],
        signal_fence: Option<(&Fence, FenceValue)>,
    ) -> Result<(), crate::DeviceError> {
        profiling::scope!("soft::Queue::submit");
        self.shared.check_lost()?;
        if self.shared.fail_next_submit.swap(false, Ordering::AcqRel) {
            self.shared.lost.store(true, Ordering::Release);
            return Err(crate::DeviceError::Lost);
        }

        for (fence, value) in self.waits.drain(..) {
            if fence.value() < value {
                log::debug!("Soft queue {:?} is blocked on fence value {}", self.ty, value);
            }
            while !fence.wait(value, WAIT_SLICE_US) {
                self.shared.check_lost()?;
            }
        }

        for cmd_buf in command_buffers {
            cmd_buf.execute(&self.shared);
        }
        self.shared.submissions.fetch_add(1, Ordering::AcqRel);

        if let Some((fence, value)) = signal_fence {
            match *self.shared.mode.lock() {
                CompletionMode::Immediate => fence.signal(value),
                CompletionMode::Manual => self.shared.pending.lock().push((fence.clone(), value)),
            }
        }
        Ok(())
    }

    unsafe fn wait_for_fence(
        &mut self,
        fence: &Fence,
        value: FenceValue,
    ) -> Result<(), crate::DeviceError> {
        self.waits.push((fence.clone(), value));
        Ok(())
    }

    unsafe fn present(&mut self, swapchain: &mut Swapchain) -> Result<(), crate::SurfaceError> {
        self.shared.check_lost()?;
        swapchain.current = (swapchain.current + 1) % swapchain.buffer_count;
        swapchain.presented += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct FenceInner {
    value: Mutex<FenceValue>,
    cvar: Condvar,
}

/// A timeline fence. Clones refer to the same timeline.
#[derive(Clone, Debug)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    fn new() -> Self {
        Fence {
            inner: Arc::new(FenceInner {
                value: Mutex::new(0),
                cvar: Condvar::new(),
            }),
        }
    }

    pub fn value(&self) -> FenceValue {
        *self.inner.value.lock()
    }

    /// Advance the timeline to `value`. Lower values are ignored.
    pub fn signal(&self, value: FenceValue) {
        let mut current = self.inner.value.lock();
        if value > *current {
            *current = value;
            self.inner.cvar.notify_all();
        }
    }

    fn wait(&self, value: FenceValue, timeout_us: u64) -> bool {
        let mut current = self.inner.value.lock();
        if timeout_us == crate::TIMEOUT_INFINITE {
            while *current < value {
                self.inner.cvar.wait(&mut current);
            }
            return true;
        }
        let deadline = Instant::now() + Duration::from_micros(timeout_us);
        while *current < value {
            if self.inner.cvar.wait_until(&mut current, deadline).timed_out() {
                return *current >= value;
            }
        }
        true
    }
}

#[derive(Debug)]
pub struct DescriptorHeap {
    ty: crate::DescriptorType,
    cpu_start: DescriptorAddress,
    gpu_start: Option<DescriptorAddress>,
    increment: u32,
    capacity: u32,
}

impl crate::DescriptorHeap for DescriptorHeap {
    fn cpu_start(&self) -> DescriptorAddress {
        self.cpu_start
    }
    fn gpu_start(&self) -> Option<DescriptorAddress> {
        self.gpu_start
    }
    fn increment_size(&self) -> u32 {
        self.increment
    }
    fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl DescriptorHeap {
    pub fn ty(&self) -> crate::DescriptorType {
        self.ty
    }
}

type Storage = Arc<Mutex<Vec<u8>>>;

#[derive(Debug)]
pub struct Buffer {
    id: u64,
    usage: crate::BufferUses,
    data: Storage,
}

impl Buffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn usage(&self) -> crate::BufferUses {
        self.usage
    }

    pub fn size(&self) -> crate::BufferAddress {
        self.data.lock().len() as crate::BufferAddress
    }

    /// Snapshot of the buffer contents.
    pub fn read(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Host write into the buffer. Bytes past the end are dropped.
    pub fn write(&self, offset: crate::BufferAddress, bytes: &[u8]) {
        let mut data = self.data.lock();
        let start = (offset as usize).min(data.len());
        let end = (start + bytes.len()).min(data.len());
        data[start..end].copy_from_slice(&bytes[..end - start]);
    }
}

#[derive(Debug)]
pub struct Texture {
    id: u64,
    format: crate::TextureFormat,
    size: crate::Extent3d,
}

impl Texture {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn format(&self) -> crate::TextureFormat {
        self.format
    }
    pub fn size(&self) -> crate::Extent3d {
        self.size
    }
}

#[derive(Debug)]
pub struct Sampler {
    id: u64,
    filter: crate::FilterMode,
}

impl Sampler {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn filter(&self) -> crate::FilterMode {
        self.filter
    }
}

#[derive(Debug)]
pub struct ShaderModule {
    id: u64,
    stage: crate::ShaderStage,
    entry_point: String,
}

impl ShaderModule {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn stage(&self) -> crate::ShaderStage {
        self.stage
    }
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

#[derive(Debug)]
pub struct ComputePipeline {
    id: u64,
    entry_point: String,
}

impl ComputePipeline {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

#[derive(Debug)]
pub struct GraphicsPipeline {
    id: u64,
    color_formats: ArrayVec<crate::TextureFormat, { crate::MAX_COLOR_TARGETS }>,
}

impl GraphicsPipeline {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn color_formats(&self) -> &[crate::TextureFormat] {
        &self.color_formats
    }
}

#[derive(Debug)]
pub struct RenderTarget {
    id: u64,
    width: u32,
    height: u32,
    color_formats: ArrayVec<crate::TextureFormat, { crate::MAX_COLOR_TARGETS }>,
    depth_format: Option<crate::TextureFormat>,
}

impl RenderTarget {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
    pub fn color_count(&self) -> u32 {
        self.color_formats.len() as u32
    }
    pub fn has_depth(&self) -> bool {
        self.depth_format.is_some()
    }
}

#[derive(Debug)]
pub struct Swapchain {
    id: u64,
    buffer_count: u32,
    current: u32,
    presented: u64,
}

impl Swapchain {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn current_index(&self) -> u32 {
        self.current
    }
    pub fn presented_frames(&self) -> u64 {
        self.presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CommandBuffer as _, CommandPool as _, Device as _, Instance as _, Queue as _,
    };
    use std::thread;

    fn open() -> Device {
        let _ = env_logger::try_init();
        let desc = crate::InstanceDescriptor {
            name: "soft-test",
            flags: crate::InstanceFlags::VALIDATION,
        };
        unsafe {
            let instance = Instance::init(&desc).unwrap();
            instance.open(&crate::OpenDescriptor::default()).unwrap()
        }
    }

    fn queue(device: &Device) -> Queue {
        unsafe {
            device
                .create_queue(&crate::QueueDescriptor {
                    label: None,
                    ty: crate::QueueType::Graphics,
                    priority: crate::QueuePriority::Normal,
                })
                .unwrap()
        }
    }

    #[test]
    fn fence_wait_times_out() {
        let device = open();
        let fence = unsafe { device.create_fence().unwrap() };
        let reached = unsafe { device.wait(&fence, 1, 1_000).unwrap() };
        assert!(!reached);
        fence.signal(1);
        assert!(unsafe { device.wait(&fence, 1, 0).unwrap() });
        unsafe { device.destroy_fence(fence) };
    }

    #[test]
    fn fence_wakes_other_thread() {
        let device = open();
        let fence = unsafe { device.create_fence().unwrap() };
        let remote = fence.clone();
        let waiter = thread::spawn(move || remote.wait(5, crate::TIMEOUT_INFINITE));
        fence.signal(3);
        fence.signal(5);
        assert!(waiter.join().unwrap());
        // signals never move the timeline backwards
        fence.signal(2);
        assert_eq!(fence.value(), 5);
    }

    #[test]
    fn submit_executes_transfers() {
        let device = open();
        let mut queue = queue(&device);
        let desc = crate::BufferDescriptor {
            label: None,
            size: 8,
            usage: crate::BufferUses::COPY_SRC | crate::BufferUses::COPY_DST,
        };
        let src = unsafe { device.create_buffer(&desc).unwrap() };
        let dst = unsafe { device.create_buffer(&desc).unwrap() };
        let mut pool = unsafe {
            device
                .create_command_pool(&crate::CommandPoolDescriptor {
                    label: None,
                    queue_type: crate::QueueType::Graphics,
                })
                .unwrap()
        };
        let fence = unsafe { device.create_fence().unwrap() };
        unsafe {
            let mut cmd = pool.allocate(None).unwrap();
            cmd.begin(None).unwrap();
            cmd.fill_buffer(&src, 0..4, 7);
            cmd.copy_buffer_to_buffer(
                &src,
                &dst,
                &[crate::BufferCopy {
                    src_offset: 0,
                    dst_offset: 4,
                    size: 4,
                }],
            );
            cmd.insert_debug_marker("transfer");
            cmd.end().unwrap();
            queue.submit(&[&cmd], Some((&fence, 1))).unwrap();
            pool.free(cmd);
        }
        assert_eq!(dst.read(), vec![0, 0, 0, 0, 7, 7, 7, 7]);
        assert_eq!(fence.value(), 1);
        assert_eq!(device.executed_markers(), vec!["transfer".to_string()]);
        assert_eq!(device.live_objects(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn manual_completion_defers_signal() {
        let device = open();
        device.set_completion_mode(CompletionMode::Manual);
        let mut queue = queue(&device);
        let fence = unsafe { device.create_fence().unwrap() };
        unsafe { queue.submit(&[], Some((&fence, 4))).unwrap() };
        assert_eq!(fence.value(), 0);
        assert_eq!(device.complete_pending(), 1);
        assert_eq!(fence.value(), 4);
    }

    #[test]
    fn queue_wait_holds_back_submission() {
        let device = open();
        let mut queue = queue(&device);
        let foreign = unsafe { device.create_fence().unwrap() };
        let done = unsafe { device.create_fence().unwrap() };
        let remote = foreign.clone();

        unsafe { queue.wait_for_fence(&foreign, 2).unwrap() };
        let submitter = thread::spawn(move || {
            unsafe { queue.submit(&[], Some((&done, 1))).unwrap() };
            done
        });
        thread::sleep(Duration::from_millis(30));
        assert_eq!(device.submission_count(), 0);
        remote.signal(1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(device.submission_count(), 0);
        remote.signal(2);
        let done = submitter.join().unwrap();
        assert_eq!(device.submission_count(), 1);
        assert_eq!(done.value(), 1);
    }

    #[test]
    fn lost_device_releases_queue_wait() {
        let device = open();
        let mut queue = queue(&device);
        let never = unsafe { device.create_fence().unwrap() };
        unsafe { queue.wait_for_fence(&never, 1).unwrap() };
        let submitter = thread::spawn(move || unsafe { queue.submit(&[], None) });
        thread::sleep(Duration::from_millis(30));
        device.lose();
        assert_eq!(submitter.join().unwrap(), Err(crate::DeviceError::Lost));
    }

    #[test]
    fn failed_submit_loses_device() {
        let device = open();
        let mut queue = queue(&device);
        device.fail_next_submit();
        assert_eq!(
            unsafe { queue.submit(&[], None) },
            Err(crate::DeviceError::Lost)
        );
        assert_eq!(unsafe { queue.submit(&[], None) }, Err(crate::DeviceError::Lost));
        assert_eq!(device.submission_count(), 0);
    }

    #[test]
    fn descriptor_copy_between_heaps() {
        let device = open();
        let heap = |flags| unsafe {
            device
                .create_descriptor_heap(&crate::DescriptorHeapDescriptor {
                    label: None,
                    ty: crate::DescriptorType::Sampler,
                    capacity: 4,
                    flags,
                })
                .unwrap()
        };
        let cpu = heap(crate::DescriptorHeapFlags::empty());
        let gpu = heap(crate::DescriptorHeapFlags::SHADER_VISIBLE);
        use crate::DescriptorHeap as _;
        assert!(cpu.gpu_start().is_none());
        assert!(gpu.gpu_start().is_some());
        assert_ne!(cpu.cpu_start(), gpu.cpu_start());

        let sampler = unsafe {
            device
                .create_sampler(&crate::SamplerDescriptor::uniform(crate::FilterMode::Linear))
                .unwrap()
        };
        let src = cpu.cpu_start() + cpu.increment_size() as u64;
        let dst = gpu.cpu_start() + 2 * gpu.increment_size() as u64;
        unsafe {
            device.write_descriptor(crate::DescriptorSource::Sampler(&sampler), src);
            device.copy_descriptors(crate::DescriptorType::Sampler, src, dst, 1);
        }
        assert_eq!(
            device.read_descriptor(dst),
            Some(DescriptorContents::Sampler(sampler.id()))
        );
        unsafe { device.destroy_descriptor_heap(gpu) };
        assert_eq!(device.read_descriptor(dst), None);
    }
}
