pub mod descriptor;
mod queue;

pub use descriptor::{BucketKey, Descriptor, DescriptorAllocation};
pub use queue::Queue;

use std::{fmt, mem::ManuallyDrop, sync::Arc};

use arrayvec::ArrayVec;
use hal::Device as _;

use crate::{
    command::{CommandAllocator, CommandBuffer},
    config::{DeviceDescriptor, TaskQueueDescriptor},
    error::{ConfigError, CreateResourceError, CreateTaskQueueError},
    hal_api::HalApi,
    pool::ResourcePool,
    queue::TaskQueue,
    resource::{
        Buffer, ComputePipeline, ComputePipelineDescriptor, DescriptorSet, GraphicsPipeline,
        GraphicsPipelineDescriptor, RenderTarget, Sampler, ShaderModule, Swapchain, Texture,
    },
    resource_log,
    sync::SyncPoint,
    Backend, DescriptorHeapFlags, DescriptorLayout, DescriptorType, DeviceError, FilterMode,
    QueueType,
};

use self::descriptor::DescriptorAllocator;

fn label_or<'a>(label: hal::Label<'a>, default: &'a str) -> String {
    label.unwrap_or(default).to_string()
}

/// Structure describing a logical device.
///
/// Every object created through a device keeps it alive, so the backend
/// device is only torn down once the last of them is dropped.
pub struct Device<A: HalApi> {
    raw: ManuallyDrop<A::Device>,
    label: String,
    pub(crate) descriptors: DescriptorAllocator<A>,
    pub(crate) command_allocator: CommandAllocator<A>,
    samplers: ResourcePool<FilterMode, Sampler<A>>,
}

impl<A: HalApi> fmt::Debug for Device<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device")
            .field("backend", &A::VARIANT)
            .field("label", &self.label)
            .finish()
    }
}

impl<A: HalApi> Device<A> {
    /// Wrap an opened hal device.
    ///
    /// On a configuration error the hal device is closed again.
    pub fn from_hal(raw: A::Device, desc: &DeviceDescriptor) -> Result<Arc<Self>, ConfigError> {
        if let Err(err) = desc.descriptor_pools.validate() {
            unsafe { raw.exit() };
            return Err(err);
        }
        let label = label_or(desc.label.as_deref(), "device");
        log::info!("Create {} device {:?}", A::VARIANT, label);
        Ok(Arc::new(Device {
            raw: ManuallyDrop::new(raw),
            label,
            descriptors: DescriptorAllocator::new(desc.descriptor_pools.clone()),
            command_allocator: CommandAllocator::new(),
            samplers: ResourcePool::new(),
        }))
    }

    pub fn raw(&self) -> &A::Device {
        &self.raw
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn backend(&self) -> Backend {
        A::VARIANT
    }

    pub fn descriptor_pool_config(&self) -> &crate::DescriptorPoolConfig {
        self.descriptors.config()
    }

    /// Number of heaps the pool for `key` has grown to.
    pub fn descriptor_block_count(&self, key: BucketKey) -> usize {
        self.descriptors.block_count(key)
    }

    /// Number of command pools created so far, one per (thread, queue type).
    pub fn command_pool_count(&self) -> usize {
        self.command_allocator.pool_count()
    }

    pub fn create_queue(
        self: &Arc<Self>,
        desc: &hal::QueueDescriptor,
    ) -> Result<Arc<Queue<A>>, DeviceError> {
        let label = match desc.label {
            Some(label) => label.to_string(),
            None => format!("{:?} queue", desc.ty),
        };
        log::info!("Create {:?} queue {:?} ({:?})", desc.ty, label, desc.priority);
        let raw = unsafe { self.raw.create_queue(desc)? };
        Ok(Arc::new(Queue::new(
            raw,
            Arc::clone(self),
            desc.ty,
            desc.priority,
            label,
        )))
    }

    /// Spawn a task queue worker bound to this device.
    ///
    /// The worker has no hardware queue until a `SetQueue` task is executed.
    pub fn create_task_queue(
        self: &Arc<Self>,
        desc: &TaskQueueDescriptor,
    ) -> Result<TaskQueue<A>, CreateTaskQueueError> {
        TaskQueue::new(Arc::clone(self), desc)
    }

    pub fn create_buffer(
        self: &Arc<Self>,
        desc: &hal::BufferDescriptor,
    ) -> Result<Buffer<A>, DeviceError> {
        profiling::scope!("Device::create_buffer");
        let raw = unsafe { self.raw.create_buffer(desc)? };
        let mut buffer = Buffer {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "buffer"),
            size: desc.size,
            usage: desc.usage,
            descriptors: ArrayVec::new(),
        };
        resource_log!("Created buffer {:?}", buffer);
        if desc.usage.intersects(hal::BufferUses::SHADER_BOUND) {
            let allocation = self.allocate_descriptor(
                DescriptorType::ShaderResource,
                1,
                DescriptorHeapFlags::empty(),
            )?;
            unsafe {
                self.raw.write_descriptor(
                    hal::DescriptorSource::Buffer(&*buffer.raw),
                    allocation.cpu().ptr(),
                );
            }
            buffer.descriptors.push(allocation);
        }
        Ok(buffer)
    }

    pub fn create_texture(
        self: &Arc<Self>,
        desc: &hal::TextureDescriptor,
    ) -> Result<Texture<A>, DeviceError> {
        profiling::scope!("Device::create_texture");
        let raw = unsafe { self.raw.create_texture(desc)? };
        let mut texture = Texture {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "texture"),
            format: desc.format,
            size: desc.size,
            descriptors: ArrayVec::new(),
        };
        resource_log!("Created texture {:?}", texture);
        if desc.usage.intersects(hal::TextureUses::SHADER_BOUND) {
            let allocation = self.allocate_descriptor(
                DescriptorType::ShaderResource,
                1,
                DescriptorHeapFlags::empty(),
            )?;
            unsafe {
                self.raw.write_descriptor(
                    hal::DescriptorSource::Texture(&*texture.raw),
                    allocation.cpu().ptr(),
                );
            }
            texture.descriptors.push(allocation);
        }
        Ok(texture)
    }

    pub fn create_sampler(
        self: &Arc<Self>,
        desc: &hal::SamplerDescriptor,
    ) -> Result<Sampler<A>, DeviceError> {
        let raw = unsafe { self.raw.create_sampler(desc)? };
        let mut sampler = Sampler {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "sampler"),
            descriptors: ArrayVec::new(),
        };
        let allocation =
            self.allocate_descriptor(DescriptorType::Sampler, 1, DescriptorHeapFlags::empty())?;
        unsafe {
            self.raw.write_descriptor(
                hal::DescriptorSource::Sampler(&*sampler.raw),
                allocation.cpu().ptr(),
            );
        }
        sampler.descriptors.push(allocation);
        Ok(sampler)
    }

    /// The shared repeating sampler for `filter`.
    ///
    /// It is created on first use and kept for as long as someone holds it.
    pub fn sampler(self: &Arc<Self>, filter: FilterMode) -> Result<Arc<Sampler<A>>, DeviceError> {
        self.samplers.get_or_init(filter, |filter| {
            log::debug!("Create shared {:?} sampler", filter);
            let label = match filter {
                FilterMode::Nearest => "nearest sampler",
                FilterMode::Linear => "linear sampler",
            };
            let desc = hal::SamplerDescriptor {
                label: Some(label),
                ..hal::SamplerDescriptor::uniform(filter)
            };
            self.create_sampler(&desc).map(Arc::new)
        })
    }

    /// Number of shared samplers that are currently alive.
    pub fn cached_sampler_count(&self) -> usize {
        self.samplers.live_count()
    }

    pub fn create_shader(
        self: &Arc<Self>,
        desc: &hal::ShaderModuleDescriptor,
    ) -> Result<ShaderModule<A>, CreateResourceError> {
        let raw = unsafe { self.raw.create_shader_module(desc)? };
        Ok(ShaderModule {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "shader"),
            stage: desc.stage,
            descriptors: ArrayVec::new(),
        })
    }

    fn assert_owned(&self, shader: &ShaderModule<A>) {
        assert!(
            std::ptr::eq(Arc::as_ptr(&shader.device), self),
            "shader {:?} belongs to another device",
            shader.label
        );
    }

    pub fn create_compute_pipeline(
        self: &Arc<Self>,
        desc: &ComputePipelineDescriptor<A>,
    ) -> Result<ComputePipeline<A>, CreateResourceError> {
        profiling::scope!("Device::create_compute_pipeline");
        self.assert_owned(desc.shader);
        let raw = unsafe {
            self.raw
                .create_compute_pipeline(&hal::ComputePipelineDescriptor {
                    label: desc.label,
                    layout: &desc.layout,
                    shader: desc.shader.raw(),
                })?
        };
        Ok(ComputePipeline {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "compute pipeline"),
            layout: desc.layout,
            descriptors: ArrayVec::new(),
        })
    }

    pub fn create_graphics_pipeline(
        self: &Arc<Self>,
        desc: &GraphicsPipelineDescriptor<A>,
    ) -> Result<GraphicsPipeline<A>, CreateResourceError> {
        profiling::scope!("Device::create_graphics_pipeline");
        self.assert_owned(desc.vertex);
        if let Some(fragment) = desc.fragment {
            self.assert_owned(fragment);
        }
        assert!(
            desc.color_formats.len() <= hal::MAX_COLOR_TARGETS,
            "pipeline has {} color targets, at most {} are supported",
            desc.color_formats.len(),
            hal::MAX_COLOR_TARGETS
        );
        let raw = unsafe {
            self.raw
                .create_graphics_pipeline(&hal::GraphicsPipelineDescriptor {
                    label: desc.label,
                    layout: &desc.layout,
                    vertex: desc.vertex.raw(),
                    fragment: desc.fragment.map(|fragment| fragment.raw()),
                    color_formats: desc.color_formats,
                    depth_format: desc.depth_format,
                })?
        };
        Ok(GraphicsPipeline {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "graphics pipeline"),
            layout: desc.layout,
            descriptors: ArrayVec::new(),
        })
    }

    /// Allocate shader-visible tables for every descriptor type `layout` uses.
    ///
    /// # Panics
    ///
    /// Panics if the layout counts render target or depth stencil
    /// descriptors, which can't be shader visible.
    pub fn create_descriptor_set(
        self: &Arc<Self>,
        layout: &DescriptorLayout,
    ) -> Result<DescriptorSet<A>, DeviceError> {
        profiling::scope!("Device::create_descriptor_set");
        let mut set = DescriptorSet {
            device: Arc::clone(self),
            layout: *layout,
            tables: ArrayVec::new(),
        };
        for &ty in DescriptorType::ALL.iter() {
            let count = layout.count(ty);
            if count == 0 {
                continue;
            }
            assert!(
                ty.can_be_shader_visible(),
                "descriptor sets can't hold {:?} descriptors",
                ty
            );
            let table = self.allocate_descriptor(ty, count, DescriptorHeapFlags::SHADER_VISIBLE)?;
            set.tables.push(table);
        }
        Ok(set)
    }

    /// Allocate a command buffer from the calling thread's pool for `queue_type`.
    pub fn create_command_buffer(
        self: &Arc<Self>,
        queue_type: QueueType,
        label: &str,
    ) -> Result<CommandBuffer<A>, DeviceError> {
        let (raw, owner) = self
            .command_allocator
            .acquire(&self.raw, queue_type, Some(label))?;
        log::info!("Allocated {:?} command buffer {:?}", queue_type, label);
        Ok(CommandBuffer::new(
            raw,
            Arc::clone(self),
            queue_type,
            owner,
            label.to_string(),
        ))
    }

    pub fn create_sync_point(self: &Arc<Self>, label: &str) -> Result<SyncPoint<A>, DeviceError> {
        let raw = unsafe { self.raw.create_fence()? };
        resource_log!("Created sync point {:?}", label);
        Ok(SyncPoint::new(raw, Arc::clone(self), label.to_string()))
    }

    pub fn create_swapchain(
        self: &Arc<Self>,
        queue: &Queue<A>,
        desc: &hal::SwapchainDescriptor,
    ) -> Result<Swapchain<A>, CreateResourceError> {
        let raw = unsafe { self.raw.create_swapchain(&queue.raw(), desc)? };
        log::info!(
            "Create swapchain {:?} {}x{} with {} buffers",
            desc.label,
            desc.width,
            desc.height,
            desc.buffer_count
        );
        Ok(Swapchain {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "swapchain"),
            buffer_count: desc.buffer_count,
            descriptors: ArrayVec::new(),
        })
    }

    /// Create color and depth attachments, with one render target descriptor
    /// per color attachment and a depth stencil descriptor if there is depth.
    pub fn create_render_target(
        self: &Arc<Self>,
        desc: &hal::RenderTargetDescriptor,
    ) -> Result<RenderTarget<A>, DeviceError> {
        profiling::scope!("Device::create_render_target");
        assert!(
            desc.color_formats.len() <= hal::MAX_COLOR_TARGETS,
            "render target has {} color attachments, at most {} are supported",
            desc.color_formats.len(),
            hal::MAX_COLOR_TARGETS
        );
        let raw = unsafe { self.raw.create_render_target(desc)? };
        let color_count = desc.color_formats.len() as u32;
        let mut target = RenderTarget {
            raw: ManuallyDrop::new(raw),
            device: Arc::clone(self),
            label: label_or(desc.label, "render target"),
            extent: (desc.width, desc.height),
            color_count,
            descriptors: ArrayVec::new(),
        };
        if color_count != 0 {
            let colors = self.allocate_descriptor(
                DescriptorType::RenderTarget,
                color_count,
                DescriptorHeapFlags::empty(),
            )?;
            for index in 0..color_count {
                unsafe {
                    self.raw.write_descriptor(
                        hal::DescriptorSource::ColorTarget(&*target.raw, index),
                        colors.cpu().at(index),
                    );
                }
            }
            target.descriptors.push(colors);
        }
        if desc.depth_format.is_some() {
            let depth = self.allocate_descriptor(
                DescriptorType::DepthStencil,
                1,
                DescriptorHeapFlags::empty(),
            )?;
            unsafe {
                self.raw.write_descriptor(
                    hal::DescriptorSource::DepthTarget(&*target.raw),
                    depth.cpu().ptr(),
                );
            }
            target.descriptors.push(depth);
        }
        Ok(target)
    }

    /// Allocate `count` contiguous descriptors of type `ty`.
    ///
    /// Requests are pooled by (type, count, visibility); requests above the
    /// configured pooled count get a heap of their own.
    pub fn allocate_descriptor(
        &self,
        ty: DescriptorType,
        count: u32,
        flags: DescriptorHeapFlags,
    ) -> Result<DescriptorAllocation<A>, DeviceError> {
        self.descriptors.allocate(&self.raw, ty, count, flags)
    }

    pub fn free_descriptor(&self, allocation: DescriptorAllocation<A>) {
        self.descriptors.free(&self.raw, allocation)
    }
}

impl<A: HalApi> Drop for Device<A> {
    fn drop(&mut self) {
        resource_log!("Destroy raw device {:?}", self.label);
        self.descriptors.dispose(&self.raw);
        self.command_allocator.dispose(&self.raw);
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        unsafe {
            raw.exit();
        }
        log::info!("Device {:?} is destroyed", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BindingResource;
    use hal::{soft::ObjectKind, Instance as _};
    use std::borrow::Cow;

    type Api = hal::api::Soft;

    fn device() -> Arc<Device<Api>> {
        let raw = unsafe {
            let instance = hal::soft::Instance::init(&hal::InstanceDescriptor {
                name: "device-test",
                flags: hal::InstanceFlags::VALIDATION,
            })
            .unwrap();
            instance.open(&hal::OpenDescriptor::default()).unwrap()
        };
        Device::from_hal(raw, &DeviceDescriptor::default()).unwrap()
    }

    fn buffer_desc(usage: hal::BufferUses) -> hal::BufferDescriptor<'static> {
        hal::BufferDescriptor {
            label: Some("test buffer"),
            size: 256,
            usage,
        }
    }

    #[test]
    fn bound_buffers_get_a_descriptor() {
        let device = device();
        let storage = device
            .create_buffer(&buffer_desc(hal::BufferUses::STORAGE))
            .unwrap();
        let staging = device
            .create_buffer(&buffer_desc(hal::BufferUses::COPY_SRC))
            .unwrap();
        let (ty, descriptor) = storage.binding_descriptor().unwrap();
        assert_eq!(ty, DescriptorType::ShaderResource);
        assert_eq!(
            device.raw().read_descriptor(descriptor.ptr()),
            Some(hal::soft::DescriptorContents::Buffer(storage.raw().id()))
        );
        assert!(staging.descriptors.is_empty());
    }

    #[test]
    fn render_target_descriptors() {
        let device = device();
        let formats = [hal::TextureFormat::Rgba8Unorm, hal::TextureFormat::Rgba16Float];
        let target = device
            .create_render_target(&hal::RenderTargetDescriptor {
                label: None,
                width: 64,
                height: 32,
                color_formats: &formats,
                depth_format: Some(hal::TextureFormat::Depth32Float),
            })
            .unwrap();
        let id = target.raw().id();
        for index in 0..2 {
            let address = target.color_descriptor(index).unwrap();
            assert_eq!(
                device.raw().read_descriptor(address),
                Some(hal::soft::DescriptorContents::ColorTarget(id, index))
            );
        }
        assert_eq!(target.color_descriptor(2), None);
        assert_eq!(
            device.raw().read_descriptor(target.depth_descriptor().unwrap()),
            Some(hal::soft::DescriptorContents::DepthTarget(id))
        );
    }

    #[test]
    fn shared_samplers_are_deduplicated() {
        let device = device();
        let a = device.sampler(FilterMode::Linear).unwrap();
        let b = device.sampler(FilterMode::Linear).unwrap();
        let c = device.sampler(FilterMode::Nearest).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(device.cached_sampler_count(), 2);
        assert_eq!(device.raw().live_objects(ObjectKind::Sampler), 2);
        drop((a, b, c));
        assert_eq!(device.cached_sampler_count(), 0);
        assert_eq!(device.raw().live_objects(ObjectKind::Sampler), 0);
    }

    #[test]
    fn shader_errors_are_returned() {
        let device = device();
        let err = device
            .create_shader(&hal::ShaderModuleDescriptor {
                label: None,
                stage: hal::ShaderStage::Compute,
                entry_point: "main".into(),
                code: Cow::Borrowed(&[]),
            })
            .unwrap_err();
        assert!(matches!(err, CreateResourceError::Shader(_)));
    }

    #[test]
    fn invalid_pool_config_is_rejected() {
        let raw = unsafe {
            let instance = hal::soft::Instance::init(&hal::InstanceDescriptor {
                name: "device-test",
                flags: hal::InstanceFlags::empty(),
            })
            .unwrap();
            instance.open(&hal::OpenDescriptor::default()).unwrap()
        };
        let desc = DeviceDescriptor {
            descriptor_pools: crate::DescriptorPoolConfig {
                max_units_per_block: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            Device::<Api>::from_hal(raw, &desc).unwrap_err(),
            ConfigError::BlockCapacity(0)
        );
    }

    #[test]
    #[should_panic(expected = "can't hold")]
    fn render_targets_in_descriptor_sets_panic() {
        let device = device();
        let layout = DescriptorLayout::new().with(DescriptorType::RenderTarget, 1);
        let _ = device.create_descriptor_set(&layout);
    }
}
