/*! This library describes the internal unsafe GPU abstraction used by forge.
 *  Backends implement the traits below with the following rules:
 *  - Fully unsafe: zero overhead, zero validation.
 *  - Compile-time backend selection via traits.
 *  - Objects are passed by references and returned by value. No IDs.
 *  - Fences are timelines: a monotonically increasing 64-bit value
 *    signaled by the queue and observed by the host.
 *  - Descriptors live in heaps that are addressed as `start + index * increment`.
 */

#![allow(
    // We use loops for getting early-out of scope without closures.
    clippy::never_loop,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod empty;
pub mod soft;

pub mod api {
    pub use super::empty::Api as Empty;
    pub use super::soft::Api as Soft;
}

use std::{borrow::Cow, fmt, ops::Range, str::FromStr};

use bitflags::bitflags;
use thiserror::Error;

/// Maximum number of color attachments in a render target.
pub const MAX_COLOR_TARGETS: usize = 8;

pub type Label<'a> = Option<&'a str>;
pub type BufferAddress = u64;
pub type MemoryRange = Range<BufferAddress>;
pub type FenceValue = u64;
/// Address of a descriptor in a heap's address space.
pub type DescriptorAddress = u64;

/// Timeout value meaning "wait forever".
pub const TIMEOUT_INFINITE: u64 = u64::MAX;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum InstanceError {
    #[error("backend {0} is not available on this platform")]
    NotSupported(Backend),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ShaderError {
    #[error("compilation failed: {0:?}")]
    Compilation(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum PipelineError {
    #[error("linkage failed for stage {0:?}: {1}")]
    Linkage(ShaderStage, String),
    #[error("pipeline expects stage {expected:?}, shader is {actual:?}")]
    StageMismatch {
        expected: ShaderStage,
        actual: ShaderStage,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SurfaceError {
    #[error("surface is lost")]
    Lost,
    #[error("swapchain is outdated")]
    Outdated,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("other reason: {0}")]
    Other(&'static str),
}

pub trait Api: Clone + fmt::Debug + Sized + Send + Sync + 'static {
    type Instance: Instance<Self>;
    type Device: Device<Self>;
    type Queue: Queue<Self>;

    type CommandPool: CommandPool<Self>;
    type CommandBuffer: CommandBuffer<Self>;
    type Fence: fmt::Debug + Send + Sync;
    type DescriptorHeap: DescriptorHeap;

    type Buffer: fmt::Debug + Send + Sync + 'static;
    type Texture: fmt::Debug + Send + Sync + 'static;
    type Sampler: fmt::Debug + Send + Sync;
    type ShaderModule: fmt::Debug + Send + Sync;
    type ComputePipeline: fmt::Debug + Send + Sync;
    type GraphicsPipeline: fmt::Debug + Send + Sync;
    type RenderTarget: fmt::Debug + Send + Sync;
    type Swapchain: fmt::Debug + Send + Sync;
}

pub trait Instance<A: Api>: Sized + Send + Sync {
    unsafe fn init(desc: &InstanceDescriptor) -> Result<Self, InstanceError>;
    unsafe fn open(&self, desc: &OpenDescriptor) -> Result<A::Device, DeviceError>;
}

pub trait Device<A: Api>: Send + Sync {
    /// Exit connection to this logical device.
    unsafe fn exit(self);

    unsafe fn create_queue(&self, desc: &QueueDescriptor) -> Result<A::Queue, DeviceError>;
    unsafe fn destroy_queue(&self, queue: A::Queue);

    unsafe fn create_buffer(&self, desc: &BufferDescriptor) -> Result<A::Buffer, DeviceError>;
    unsafe fn destroy_buffer(&self, buffer: A::Buffer);

    unsafe fn create_texture(&self, desc: &TextureDescriptor) -> Result<A::Texture, DeviceError>;
    unsafe fn destroy_texture(&self, texture: A::Texture);

    unsafe fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<A::Sampler, DeviceError>;
    unsafe fn destroy_sampler(&self, sampler: A::Sampler);

    unsafe fn create_shader_module(
        &self,
        desc: &ShaderModuleDescriptor,
    ) -> Result<A::ShaderModule, ShaderError>;
    unsafe fn destroy_shader_module(&self, module: A::ShaderModule);

    unsafe fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<A>,
    ) -> Result<A::ComputePipeline, PipelineError>;
    unsafe fn destroy_compute_pipeline(&self, pipeline: A::ComputePipeline);

    unsafe fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor<A>,
    ) -> Result<A::GraphicsPipeline, PipelineError>;
    unsafe fn destroy_graphics_pipeline(&self, pipeline: A::GraphicsPipeline);

    unsafe fn create_render_target(
        &self,
        desc: &RenderTargetDescriptor,
    ) -> Result<A::RenderTarget, DeviceError>;
    unsafe fn destroy_render_target(&self, target: A::RenderTarget);

    unsafe fn create_swapchain(
        &self,
        queue: &A::Queue,
        desc: &SwapchainDescriptor,
    ) -> Result<A::Swapchain, SurfaceError>;
    unsafe fn destroy_swapchain(&self, swapchain: A::Swapchain);

    unsafe fn create_command_pool(
        &self,
        desc: &CommandPoolDescriptor,
    ) -> Result<A::CommandPool, DeviceError>;
    unsafe fn destroy_command_pool(&self, pool: A::CommandPool);

    unsafe fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDescriptor,
    ) -> Result<A::DescriptorHeap, DeviceError>;
    unsafe fn destroy_descriptor_heap(&self, heap: A::DescriptorHeap);

    /// Write a descriptor describing `source` at the CPU address `dst`.
    unsafe fn write_descriptor(&self, source: DescriptorSource<A>, dst: DescriptorAddress);
    /// Copy `count` contiguous descriptors of type `ty` from `src` to `dst`.
    unsafe fn copy_descriptors(
        &self,
        ty: DescriptorType,
        src: DescriptorAddress,
        dst: DescriptorAddress,
        count: u32,
    );

    unsafe fn create_fence(&self) -> Result<A::Fence, DeviceError>;
    unsafe fn destroy_fence(&self, fence: A::Fence);
    unsafe fn get_fence_value(&self, fence: &A::Fence) -> Result<FenceValue, DeviceError>;
    /// Block until `fence` reaches `value`.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first. A timeout of
    /// [`TIMEOUT_INFINITE`] waits forever.
    unsafe fn wait(
        &self,
        fence: &A::Fence,
        value: FenceValue,
        timeout_us: u64,
    ) -> Result<bool, DeviceError>;
}

pub trait Queue<A: Api>: Send + Sync {
    /// Submit command buffers, in order, and optionally signal `signal_fence`
    /// with the given value once they complete.
    ///
    /// All command buffers must be in the executable state.
    unsafe fn submit(
        &mut self,
        command_buffers: &[&A::CommandBuffer],
        signal_fence: Option<(&A::Fence, FenceValue)>,
    ) -> Result<(), DeviceError>;
    /// Make subsequent submissions on this queue wait on the device until
    /// `fence` reaches `value`. Does not block the host, except on backends
    /// without a device timeline, where the next `submit` blocks instead.
    unsafe fn wait_for_fence(
        &mut self,
        fence: &A::Fence,
        value: FenceValue,
    ) -> Result<(), DeviceError>;
    unsafe fn present(&mut self, swapchain: &mut A::Swapchain) -> Result<(), SurfaceError>;
}

/// A pool that command buffers are allocated from.
///
/// Pools are externally synchronized: a pool and every buffer allocated from it
/// must only be used by one thread at a time.
pub trait CommandPool<A: Api>: fmt::Debug + Send + Sync {
    unsafe fn allocate(&mut self, label: Label) -> Result<A::CommandBuffer, DeviceError>;
    unsafe fn free(&mut self, command_buffer: A::CommandBuffer);
}

pub trait CommandBuffer<A: Api>: fmt::Debug + Send + Sync {
    /// Reset the buffer and open it for recording.
    unsafe fn begin(&mut self, label: Label) -> Result<(), DeviceError>;
    /// Close the buffer, making it executable.
    unsafe fn end(&mut self) -> Result<(), DeviceError>;

    unsafe fn fill_buffer(&mut self, buffer: &A::Buffer, range: MemoryRange, value: u8);
    unsafe fn copy_buffer_to_buffer(
        &mut self,
        src: &A::Buffer,
        dst: &A::Buffer,
        regions: &[BufferCopy],
    );

    unsafe fn begin_render_pass(&mut self, target: &A::RenderTarget, clear: Option<[f32; 4]>);
    unsafe fn end_render_pass(&mut self);

    unsafe fn set_compute_pipeline(&mut self, pipeline: &A::ComputePipeline);
    unsafe fn set_graphics_pipeline(&mut self, pipeline: &A::GraphicsPipeline);
    /// Bind a shader-visible descriptor table starting at `base`.
    unsafe fn set_descriptor_table(&mut self, ty: DescriptorType, base: DescriptorAddress);

    unsafe fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);
    unsafe fn dispatch(&mut self, count: [u32; 3]);

    unsafe fn insert_debug_marker(&mut self, label: &str);
}

pub trait DescriptorHeap: fmt::Debug + Send + Sync {
    /// Address of the first descriptor in the CPU address space.
    fn cpu_start(&self) -> DescriptorAddress;
    /// Address of the first descriptor in the GPU address space, if the heap
    /// is shader-visible.
    fn gpu_start(&self) -> Option<DescriptorAddress>;
    /// Distance in bytes between two adjacent descriptors.
    fn increment_size(&self) -> u32;
    fn capacity(&self) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Backend {
    Empty = 0,
    Vulkan = 1,
    Metal = 2,
    Dx12 = 3,
    Dx11 = 4,
    Gl = 5,
    Soft = 6,
}

impl Backend {
    pub const ALL: [Backend; 7] = [
        Backend::Empty,
        Backend::Vulkan,
        Backend::Metal,
        Backend::Dx12,
        Backend::Dx11,
        Backend::Gl,
        Backend::Soft,
    ];

    pub fn to_str(self) -> &'static str {
        match self {
            Backend::Empty => "empty",
            Backend::Vulkan => "vulkan",
            Backend::Metal => "metal",
            Backend::Dx12 => "dx12",
            Backend::Dx11 => "dx11",
            Backend::Gl => "gl",
            Backend::Soft => "soft",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown backend name {0:?}")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "empty" | "noop" => Backend::Empty,
            "vulkan" | "vk" => Backend::Vulkan,
            "metal" | "mtl" => Backend::Metal,
            "dx12" | "d3d12" => Backend::Dx12,
            "dx11" | "d3d11" => Backend::Dx11,
            "gl" | "gles" | "opengl" => Backend::Gl,
            "soft" | "software" => Backend::Soft,
            other => return Err(UnknownBackend(other.to_string())),
        })
    }
}

bitflags! {
    /// Set of backends an instance is allowed to initialize.
    #[repr(transparent)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Backends: u32 {
        const EMPTY = 1 << Backend::Empty as u32;
        const VULKAN = 1 << Backend::Vulkan as u32;
        const METAL = 1 << Backend::Metal as u32;
        const DX12 = 1 << Backend::Dx12 as u32;
        const DX11 = 1 << Backend::Dx11 as u32;
        const GL = 1 << Backend::Gl as u32;
        const SOFT = 1 << Backend::Soft as u32;
        /// Backends that can drive real hardware.
        const PRIMARY = Self::VULKAN.bits | Self::METAL.bits | Self::DX12.bits;
        const SECONDARY = Self::GL.bits | Self::DX11.bits;
    }
}

impl From<Backend> for Backends {
    fn from(backend: Backend) -> Self {
        Self::from_bits_truncate(1 << backend as u32)
    }
}

impl Backends {
    pub fn iter(self) -> impl Iterator<Item = Backend> {
        Backend::ALL
            .iter()
            .copied()
            .filter(move |&b| self.contains(Backends::from(b)))
    }
}

bitflags! {
    pub struct InstanceFlags: u16 {
        /// Generate debug information in shaders and objects.
        const DEBUG = 1 << 0;
        /// Enable validation, and forward backend messages to the log.
        const VALIDATION = 1 << 1;
    }
}

#[derive(Clone, Debug)]
pub struct InstanceDescriptor<'a> {
    pub name: &'a str,
    pub flags: InstanceFlags,
}

#[derive(Clone, Debug, Default)]
pub struct OpenDescriptor<'a> {
    pub label: Label<'a>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
    VideoDecode,
    VideoEncode,
}

impl Default for QueueType {
    fn default() -> Self {
        QueueType::Graphics
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueuePriority {
    Normal,
    High,
    Realtime,
}

impl Default for QueuePriority {
    fn default() -> Self {
        QueuePriority::Normal
    }
}

#[derive(Clone, Debug)]
pub struct QueueDescriptor<'a> {
    pub label: Label<'a>,
    pub ty: QueueType,
    pub priority: QueuePriority,
}

#[derive(Clone, Debug)]
pub struct CommandPoolDescriptor<'a> {
    pub label: Label<'a>,
    pub queue_type: QueueType,
}

/// Kind of descriptor stored in a heap.
///
/// Each type has its own heaps, and descriptors of different types can't be
/// copied into each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorType {
    /// Constant buffer, shader resource and unordered access views.
    ShaderResource,
    Sampler,
    RenderTarget,
    DepthStencil,
}

impl DescriptorType {
    pub const COUNT: usize = 4;
    pub const ALL: [DescriptorType; Self::COUNT] = [
        DescriptorType::ShaderResource,
        DescriptorType::Sampler,
        DescriptorType::RenderTarget,
        DescriptorType::DepthStencil,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether descriptors of this type may live in a shader-visible heap.
    pub fn can_be_shader_visible(self) -> bool {
        match self {
            DescriptorType::ShaderResource | DescriptorType::Sampler => true,
            DescriptorType::RenderTarget | DescriptorType::DepthStencil => false,
        }
    }
}

bitflags! {
    pub struct DescriptorHeapFlags: u8 {
        /// The heap can be bound to command buffers and read by shaders.
        const SHADER_VISIBLE = 1 << 0;
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorHeapDescriptor<'a> {
    pub label: Label<'a>,
    pub ty: DescriptorType,
    pub capacity: u32,
    pub flags: DescriptorHeapFlags,
}

/// What a descriptor written with [`Device::write_descriptor`] refers to.
pub enum DescriptorSource<'a, A: Api> {
    Buffer(&'a A::Buffer),
    Texture(&'a A::Texture),
    Sampler(&'a A::Sampler),
    ColorTarget(&'a A::RenderTarget, u32),
    DepthTarget(&'a A::RenderTarget),
}

impl<A: Api> DescriptorSource<'_, A> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match *self {
            DescriptorSource::Buffer(_) | DescriptorSource::Texture(_) => {
                DescriptorType::ShaderResource
            }
            DescriptorSource::Sampler(_) => DescriptorType::Sampler,
            DescriptorSource::ColorTarget(..) => DescriptorType::RenderTarget,
            DescriptorSource::DepthTarget(_) => DescriptorType::DepthStencil,
        }
    }
}

bitflags! {
    pub struct BufferUses: u16 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const STORAGE = 1 << 7;
        const INDIRECT = 1 << 8;
        /// The combination of usages that can be used together read-only.
        const READ_ALL = Self::MAP_READ.bits | Self::COPY_SRC.bits |
            Self::INDEX.bits | Self::VERTEX.bits | Self::UNIFORM.bits | Self::INDIRECT.bits;
        /// Usages that need a shader resource descriptor.
        const SHADER_BOUND = Self::UNIFORM.bits | Self::STORAGE.bits;
    }
}

bitflags! {
    pub struct TextureUses: u16 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const COLOR_TARGET = 1 << 3;
        const DEPTH_STENCIL = 1 << 4;
        const STORAGE = 1 << 5;
        /// Usages that need a shader resource descriptor.
        const SHADER_BOUND = Self::SAMPLED.bits | Self::STORAGE.bits;
    }
}

#[derive(Clone, Debug)]
pub struct BufferDescriptor<'a> {
    pub label: Label<'a>,
    pub size: BufferAddress,
    pub usage: BufferUses,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        match self {
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8 => true,
            _ => false,
        }
    }

    /// Size of one texel in bytes.
    pub fn block_size(self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D1,
    D2,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

impl Default for Extent3d {
    fn default() -> Self {
        Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: Label<'a>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUses,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirrorRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Debug)]
pub struct SamplerDescriptor<'a> {
    pub label: Label<'a>,
    pub address_modes: [AddressMode; 3],
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub lod_clamp: Option<Range<f32>>,
    pub compare: Option<CompareFunction>,
}

impl SamplerDescriptor<'_> {
    /// A repeating sampler using `filter` for every filtering stage.
    pub fn uniform(filter: FilterMode) -> Self {
        SamplerDescriptor {
            label: None,
            address_modes: [AddressMode::Repeat; 3],
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            lod_clamp: None,
            compare: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Clone, Debug)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Label<'a>,
    pub stage: ShaderStage,
    pub entry_point: Cow<'a, str>,
    /// Backend-specific shader code.
    pub code: Cow<'a, [u8]>,
}

/// Number of descriptors of each type a pipeline binds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorLayout {
    counts: [u32; DescriptorType::COUNT],
}

impl DescriptorLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ty: DescriptorType, count: u32) -> Self {
        self.counts[ty.index()] = count;
        self
    }

    pub fn count(&self, ty: DescriptorType) -> u32 {
        self.counts[ty.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }
}

#[derive(Debug)]
pub struct ComputePipelineDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub layout: &'a DescriptorLayout,
    pub shader: &'a A::ShaderModule,
}

#[derive(Debug)]
pub struct GraphicsPipelineDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub layout: &'a DescriptorLayout,
    pub vertex: &'a A::ShaderModule,
    pub fragment: Option<&'a A::ShaderModule>,
    pub color_formats: &'a [TextureFormat],
    pub depth_format: Option<TextureFormat>,
}

#[derive(Clone, Debug)]
pub struct RenderTargetDescriptor<'a> {
    pub label: Label<'a>,
    pub width: u32,
    pub height: u32,
    pub color_formats: &'a [TextureFormat],
    pub depth_format: Option<TextureFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
}

#[derive(Clone, Debug)]
pub struct SwapchainDescriptor<'a> {
    pub label: Label<'a>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub buffer_count: u32,
    pub present_mode: PresentMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: BufferAddress,
    pub dst_offset: BufferAddress,
    pub size: BufferAddress,
}

/// Severity of a message reported by a backend's validation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
    Corruption,
}

impl MessageSeverity {
    pub fn log_level(self) -> log::Level {
        match self {
            MessageSeverity::Info => log::Level::Info,
            MessageSeverity::Warning => log::Level::Warn,
            MessageSeverity::Error | MessageSeverity::Corruption => log::Level::Error,
        }
    }
}

/// Forward a backend validation message to the log, mapping its severity.
pub fn report_message(backend: Backend, severity: MessageSeverity, message: &str) {
    log::log!(severity.log_level(), "[{}] {:?}: {}", backend, severity, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for &backend in Backend::ALL.iter() {
            assert_eq!(backend.to_str().parse::<Backend>(), Ok(backend));
        }
        assert_eq!("D3D12".parse::<Backend>(), Ok(Backend::Dx12));
        assert!("glide".parse::<Backend>().is_err());
    }

    #[test]
    fn backends_iter() {
        let set = Backends::SOFT | Backends::EMPTY;
        let list: Vec<_> = set.iter().collect();
        assert_eq!(list, vec![Backend::Empty, Backend::Soft]);
        assert_eq!(Backends::PRIMARY.iter().count(), 3);
    }

    #[test]
    fn descriptor_layout() {
        let layout = DescriptorLayout::new()
            .with(DescriptorType::ShaderResource, 3)
            .with(DescriptorType::Sampler, 1);
        assert_eq!(layout.count(DescriptorType::ShaderResource), 3);
        assert_eq!(layout.count(DescriptorType::RenderTarget), 0);
        assert!(!layout.is_empty());
        assert!(DescriptorLayout::new().is_empty());
    }
}
