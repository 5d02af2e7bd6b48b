use super::{
    Buffer, CommandPool, ComputePipeline, DescriptorContents, DescriptorHeap, Device, Fence,
    GraphicsPipeline, ObjectKind, Queue, RenderTarget, Sampler, ShaderModule, Swapchain, Texture,
};
use crate::{DescriptorAddress, FenceValue, MessageSeverity};

use std::sync::{atomic::Ordering, Arc};

use parking_lot::Mutex;

type DeviceResult<T> = Result<T, crate::DeviceError>;

impl crate::Device<super::Api> for Device {
    unsafe fn exit(self) {
        let live = self.shared.counters.live.iter().enumerate().filter(|&(_, count)| {
            count.load(Ordering::Relaxed) != 0
        });
        for (kind, count) in live {
            log::warn!(
                "Soft device exits with {} live objects of kind #{}",
                count.load(Ordering::Relaxed),
                kind
            );
        }
        self.complete_pending();
    }

    unsafe fn create_queue(&self, desc: &crate::QueueDescriptor) -> DeviceResult<Queue> {
        self.shared.check_lost()?;
        self.shared.counters.add(ObjectKind::Queue);
        Ok(Queue {
            shared: Arc::clone(&self.shared),
            ty: desc.ty,
            priority: desc.priority,
            waits: Vec::new(),
        })
    }
    unsafe fn destroy_queue(&self, _queue: Queue) {
        self.shared.counters.remove(ObjectKind::Queue);
    }

    unsafe fn create_buffer(&self, desc: &crate::BufferDescriptor) -> DeviceResult<Buffer> {
        self.shared.check_lost()?;
        if desc.size > isize::MAX as u64 {
            return Err(crate::DeviceError::OutOfMemory);
        }
        self.shared.counters.add(ObjectKind::Buffer);
        Ok(Buffer {
            id: self.shared.make_id(),
            usage: desc.usage,
            data: Arc::new(Mutex::new(vec![0; desc.size as usize])),
        })
    }
    unsafe fn destroy_buffer(&self, _buffer: Buffer) {
        self.shared.counters.remove(ObjectKind::Buffer);
    }

    unsafe fn create_texture(&self, desc: &crate::TextureDescriptor) -> DeviceResult<Texture> {
        self.shared.check_lost()?;
        self.shared.counters.add(ObjectKind::Texture);
        Ok(Texture {
            id: self.shared.make_id(),
            format: desc.format,
            size: desc.size,
        })
    }
    unsafe fn destroy_texture(&self, _texture: Texture) {
        self.shared.counters.remove(ObjectKind::Texture);
    }

    unsafe fn create_sampler(&self, desc: &crate::SamplerDescriptor) -> DeviceResult<Sampler> {
        self.shared.check_lost()?;
        self.shared.counters.add(ObjectKind::Sampler);
        Ok(Sampler {
            id: self.shared.make_id(),
            filter: desc.min_filter,
        })
    }
    unsafe fn destroy_sampler(&self, _sampler: Sampler) {
        self.shared.counters.remove(ObjectKind::Sampler);
    }

    unsafe fn create_shader_module(
        &self,
        desc: &crate::ShaderModuleDescriptor,
    ) -> Result<ShaderModule, crate::ShaderError> {
        self.shared.check_lost()?;
        if desc.code.is_empty() {
            return Err(crate::ShaderError::Compilation(format!(
                "shader {:?} has no code",
                desc.label
            )));
        }
        self.shared.counters.add(ObjectKind::ShaderModule);
        Ok(ShaderModule {
            id: self.shared.make_id(),
            stage: desc.stage,
            entry_point: desc.entry_point.to_string(),
        })
    }
    unsafe fn destroy_shader_module(&self, _module: ShaderModule) {
        self.shared.counters.remove(ObjectKind::ShaderModule);
    }

    unsafe fn create_compute_pipeline(
        &self,
        desc: &crate::ComputePipelineDescriptor<super::Api>,
    ) -> Result<ComputePipeline, crate::PipelineError> {
        self.shared.check_lost()?;
        check_stage(desc.shader, crate::ShaderStage::Compute)?;
        self.shared.counters.add(ObjectKind::ComputePipeline);
        Ok(ComputePipeline {
            id: self.shared.make_id(),
            entry_point: desc.shader.entry_point.clone(),
        })
    }
    unsafe fn destroy_compute_pipeline(&self, _pipeline: ComputePipeline) {
        self.shared.counters.remove(ObjectKind::ComputePipeline);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        desc: &crate::GraphicsPipelineDescriptor<super::Api>,
    ) -> Result<GraphicsPipeline, crate::PipelineError> {
        self.shared.check_lost()?;
        check_stage(desc.vertex, crate::ShaderStage::Vertex)?;
        if let Some(fragment) = desc.fragment {
            check_stage(fragment, crate::ShaderStage::Fragment)?;
        }
        if desc.color_formats.len() > crate::MAX_COLOR_TARGETS {
            return Err(crate::PipelineError::Linkage(
                crate::ShaderStage::Fragment,
                format!("{} color targets", desc.color_formats.len()),
            ));
        }
        self.shared.counters.add(ObjectKind::GraphicsPipeline);
        Ok(GraphicsPipeline {
            id: self.shared.make_id(),
            color_formats: desc.color_formats.iter().copied().collect(),
        })
    }
    unsafe fn destroy_graphics_pipeline(&self, _pipeline: GraphicsPipeline) {
        self.shared.counters.remove(ObjectKind::GraphicsPipeline);
    }

    unsafe fn create_render_target(
        &self,
        desc: &crate::RenderTargetDescriptor,
    ) -> DeviceResult<RenderTarget> {
        self.shared.check_lost()?;
        self.shared.counters.add(ObjectKind::RenderTarget);
        Ok(RenderTarget {
            id: self.shared.make_id(),
            width: desc.width,
            height: desc.height,
            color_formats: desc
                .color_formats
                .iter()
                .copied()
                .take(crate::MAX_COLOR_TARGETS)
                .collect(),
            depth_format: desc.depth_format,
        })
    }
    unsafe fn destroy_render_target(&self, _target: RenderTarget) {
        self.shared.counters.remove(ObjectKind::RenderTarget);
    }

    unsafe fn create_swapchain(
        &self,
        _queue: &Queue,
        desc: &crate::SwapchainDescriptor,
    ) -> Result<Swapchain, crate::SurfaceError> {
        self.shared.check_lost()?;
        if desc.buffer_count == 0 {
            return Err(crate::SurfaceError::Other("swapchain needs at least one buffer"));
        }
        self.shared.counters.add(ObjectKind::Swapchain);
        Ok(Swapchain {
            id: self.shared.make_id(),
            buffer_count: desc.buffer_count,
            current: 0,
            presented: 0,
        })
    }
    unsafe fn destroy_swapchain(&self, _swapchain: Swapchain) {
        self.shared.counters.remove(ObjectKind::Swapchain);
    }

    unsafe fn create_command_pool(
        &self,
        desc: &crate::CommandPoolDescriptor,
    ) -> DeviceResult<CommandPool> {
        self.shared.check_lost()?;
        self.shared.counters.add(ObjectKind::CommandPool);
        Ok(CommandPool::new(Arc::clone(&self.shared), desc.queue_type))
    }
    unsafe fn destroy_command_pool(&self, pool: CommandPool) {
        if pool.outstanding() != 0 {
            self.shared.validate(
                MessageSeverity::Error,
                &format!(
                    "command pool destroyed with {} buffers still allocated",
                    pool.outstanding()
                ),
            );
        }
        self.shared.counters.remove(ObjectKind::CommandPool);
    }

    unsafe fn create_descriptor_heap(
        &self,
        desc: &crate::DescriptorHeapDescriptor,
    ) -> DeviceResult<DescriptorHeap> {
        self.shared.check_lost()?;
        let shader_visible = desc
            .flags
            .contains(crate::DescriptorHeapFlags::SHADER_VISIBLE);
        if shader_visible && !desc.ty.can_be_shader_visible() {
            self.shared.validate(
                MessageSeverity::Error,
                &format!("{:?} heaps can't be shader visible", desc.ty),
            );
        }
        let increment = super::descriptor_increment(desc.ty);
        let span = desc.capacity as u64 * increment as u64;
        let cpu_start = self.shared.next_address.fetch_add(span, Ordering::Relaxed);
        self.shared.counters.add(ObjectKind::DescriptorHeap);
        Ok(DescriptorHeap {
            ty: desc.ty,
            cpu_start,
            gpu_start: if shader_visible {
                Some(super::GPU_ADDRESS_BASE + cpu_start)
            } else {
                None
            },
            increment,
            capacity: desc.capacity,
        })
    }
    unsafe fn destroy_descriptor_heap(&self, heap: DescriptorHeap) {
        let mut descriptors = self.shared.descriptors.lock();
        for index in 0..heap.capacity as u64 {
            descriptors.remove(&(heap.cpu_start + index * heap.increment as u64));
        }
        self.shared.counters.remove(ObjectKind::DescriptorHeap);
    }

    unsafe fn write_descriptor(
        &self,
        source: crate::DescriptorSource<super::Api>,
        dst: DescriptorAddress,
    ) {
        let contents = match source {
            crate::DescriptorSource::Buffer(buffer) => DescriptorContents::Buffer(buffer.id),
            crate::DescriptorSource::Texture(texture) => DescriptorContents::Texture(texture.id),
            crate::DescriptorSource::Sampler(sampler) => DescriptorContents::Sampler(sampler.id),
            crate::DescriptorSource::ColorTarget(target, index) => {
                DescriptorContents::ColorTarget(target.id, index)
            }
            crate::DescriptorSource::DepthTarget(target) => {
                DescriptorContents::DepthTarget(target.id)
            }
        };
        self.shared.descriptors.lock().insert(dst, contents);
    }

    unsafe fn copy_descriptors(
        &self,
        ty: crate::DescriptorType,
        src: DescriptorAddress,
        dst: DescriptorAddress,
        count: u32,
    ) {
        let increment = super::descriptor_increment(ty) as u64;
        let mut descriptors = self.shared.descriptors.lock();
        for index in 0..count as u64 {
            let offset = index * increment;
            match descriptors.get(&(src + offset)).copied() {
                Some(contents) => {
                    descriptors.insert(dst + offset, contents);
                }
                None => {
                    self.shared.validate(
                        MessageSeverity::Warning,
                        &format!("copying uninitialized descriptor at {:#x}", src + offset),
                    );
                    descriptors.remove(&(dst + offset));
                }
            }
        }
    }

    unsafe fn create_fence(&self) -> DeviceResult<Fence> {
        self.shared.check_lost()?;
        self.shared.counters.add(ObjectKind::Fence);
        Ok(Fence::new())
    }
    unsafe fn destroy_fence(&self, _fence: Fence) {
        self.shared.counters.remove(ObjectKind::Fence);
    }
    unsafe fn get_fence_value(&self, fence: &Fence) -> DeviceResult<FenceValue> {
        Ok(fence.value())
    }
    unsafe fn wait(&self, fence: &Fence, value: FenceValue, timeout_us: u64) -> DeviceResult<bool> {
        Ok(fence.wait(value, timeout_us))
    }
}

fn check_stage(
    module: &ShaderModule,
    expected: crate::ShaderStage,
) -> Result<(), crate::PipelineError> {
    if module.stage == expected {
        Ok(())
    } else {
        Err(crate::PipelineError::StageMismatch {
            expected,
            actual: module.stage,
        })
    }
}
