/*! This library safely drives GPU work submission on native backends.
 *  Producers hand work to a [`TaskQueue`], whose dedicated worker thread owns
 *  command buffer recording and submission, while [`Device`] hands out
 *  descriptors from pooled heaps and owns every backend object.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
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
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod allocator;
pub mod any_device;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod hal_api;
mod hash_utils;
pub mod instance;
mod pool;
pub mod queue;
pub mod resource;
pub mod sync;

pub use any_device::AnyDevice;
pub use command::CommandBuffer;
pub use config::{DescriptorPoolConfig, DeviceDescriptor, InstanceDescriptor, TaskQueueDescriptor};
pub use device::{Descriptor, DescriptorAllocation, Device, Queue};
pub use error::{
    ConfigError, CreateDeviceError, CreateResourceError, CreateTaskQueueError, WaitIdleError,
};
pub use hal::{
    api, Backend, Backends, DescriptorHeapFlags, DescriptorLayout, DescriptorType, DeviceError,
    FilterMode, QueuePriority, QueueType,
};
pub use hal_api::HalApi;
pub use instance::Instance;
pub use queue::{Task, TaskKind, TaskQueue};
pub use resource::{
    BindingResource, Buffer, ComputePipeline, ComputePipelineDescriptor, DescriptorSet,
    GraphicsPipeline, GraphicsPipelineDescriptor, RenderTarget, Sampler, ShaderModule, Swapchain,
    Texture,
};
pub use sync::SyncPoint;

pub(crate) use hash_utils::FastHashMap;

/// The index of a queue submission.
///
/// These are the values a task queue signals its sync points with. The first
/// submission of every queue has index 1, so a value of 0 is always complete.
pub type SubmissionIndex = hal::FenceValue;

/// Log a message about the lifetime of a backend object.
#[macro_export]
macro_rules! resource_log {
    ($($arg:tt)+) => (log::trace!($($arg)+))
}
