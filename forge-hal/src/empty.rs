#![allow(unused_variables)]

//! Backend that accepts everything and does nothing.
//!
//! Every submission is considered complete as soon as it is made.

use std::ops::Range;

#[derive(Clone, Debug)]
pub struct Api;
#[derive(Debug)]
pub struct Context;
#[derive(Debug)]
pub struct Encoder;
#[derive(Debug)]
pub struct Resource;
#[derive(Debug)]
pub struct Heap {
    capacity: u32,
    flags: crate::DescriptorHeapFlags,
}

type DeviceResult<T> = Result<T, crate::DeviceError>;

impl crate::Api for Api {
    type Instance = Context;
    type Device = Context;
    type Queue = Context;

    type CommandPool = Context;
    type CommandBuffer = Encoder;
    type Fence = Resource;
    type DescriptorHeap = Heap;

    type Buffer = Resource;
    type Texture = Resource;
    type Sampler = Resource;
    type ShaderModule = Resource;
    type ComputePipeline = Resource;
    type GraphicsPipeline = Resource;
    type RenderTarget = Resource;
    type Swapchain = Resource;
}

impl crate::Instance<Api> for Context {
    unsafe fn init(_desc: &crate::InstanceDescriptor) -> Result<Self, crate::InstanceError> {
        Ok(Context)
    }
    unsafe fn open(&self, _desc: &crate::OpenDescriptor) -> DeviceResult<Context> {
        Ok(Context)
    }
}

impl crate::Queue<Api> for Context {
    unsafe fn submit(
        &mut self,
        command_buffers: &[&Encoder],
        signal_fence: Option<(&Resource, crate::FenceValue)>,
    ) -> DeviceResult<()> {
        Ok(())
    }
    unsafe fn wait_for_fence(&mut self, fence: &Resource, value: crate::FenceValue) -> DeviceResult<()> {
        Ok(())
    }
    unsafe fn present(&mut self, swapchain: &mut Resource) -> Result<(), crate::SurfaceError> {
        Ok(())
    }
}

impl crate::CommandPool<Api> for Context {
    unsafe fn allocate(&mut self, label: crate::Label) -> DeviceResult<Encoder> {
        Ok(Encoder)
    }
    unsafe fn free(&mut self, command_buffer: Encoder) {}
}

impl crate::DescriptorHeap for Heap {
    fn cpu_start(&self) -> crate::DescriptorAddress {
        0
    }
    fn gpu_start(&self) -> Option<crate::DescriptorAddress> {
        if self.flags.contains(crate::DescriptorHeapFlags::SHADER_VISIBLE) {
            Some(0)
        } else {
            None
        }
    }
    fn increment_size(&self) -> u32 {
        0
    }
    fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl crate::Device<Api> for Context {
    unsafe fn exit(self) {}

    unsafe fn create_queue(&self, desc: &crate::QueueDescriptor) -> DeviceResult<Context> {
        Ok(Context)
    }
    unsafe fn destroy_queue(&self, queue: Context) {}

    unsafe fn create_buffer(&self, desc: &crate::BufferDescriptor) -> DeviceResult<Resource> {
        Ok(Resource)
    }
    unsafe fn destroy_buffer(&self, buffer: Resource) {}

    unsafe fn create_texture(&self, desc: &crate::TextureDescriptor) -> DeviceResult<Resource> {
        Ok(Resource)
    }
    unsafe fn destroy_texture(&self, texture: Resource) {}

    unsafe fn create_sampler(&self, desc: &crate::SamplerDescriptor) -> DeviceResult<Resource> {
        Ok(Resource)
    }
    unsafe fn destroy_sampler(&self, sampler: Resource) {}

    unsafe fn create_shader_module(
        &self,
        desc: &crate::ShaderModuleDescriptor,
    ) -> Result<Resource, crate::ShaderError> {
        Ok(Resource)
    }
    unsafe fn destroy_shader_module(&self, module: Resource) {}

    unsafe fn create_compute_pipeline(
        &self,
        desc: &crate::ComputePipelineDescriptor<Api>,
    ) -> Result<Resource, crate::PipelineError> {
        Ok(Resource)
    }
    unsafe fn destroy_compute_pipeline(&self, pipeline: Resource) {}

    unsafe fn create_graphics_pipeline(
        &self,
        desc: &crate::GraphicsPipelineDescriptor<Api>,
    ) -> Result<Resource, crate::PipelineError> {
        Ok(Resource)
    }
    unsafe fn destroy_graphics_pipeline(&self, pipeline: Resource) {}

    unsafe fn create_render_target(
        &self,
        desc: &crate::RenderTargetDescriptor,
    ) -> DeviceResult<Resource> {
        Ok(Resource)
    }
    unsafe fn destroy_render_target(&self, target: Resource) {}

    unsafe fn create_swapchain(
        &self,
        queue: &Context,
        desc: &crate::SwapchainDescriptor,
    ) -> Result<Resource, crate::SurfaceError> {
        Ok(Resource)
    }
    unsafe fn destroy_swapchain(&self, swapchain: Resource) {}

    unsafe fn create_command_pool(
        &self,
        desc: &crate::CommandPoolDescriptor,
    ) -> DeviceResult<Context> {
        Ok(Context)
    }
    unsafe fn destroy_command_pool(&self, pool: Context) {}

    unsafe fn create_descriptor_heap(
        &self,
        desc: &crate::DescriptorHeapDescriptor,
    ) -> DeviceResult<Heap> {
        Ok(Heap {
            capacity: desc.capacity,
            flags: desc.flags,
        })
    }
    unsafe fn destroy_descriptor_heap(&self, heap: Heap) {}

    unsafe fn write_descriptor(
        &self,
        source: crate::DescriptorSource<Api>,
        dst: crate::DescriptorAddress,
    ) {
    }
    unsafe fn copy_descriptors(
        &self,
        ty: crate::DescriptorType,
        src: crate::DescriptorAddress,
        dst: crate::DescriptorAddress,
        count: u32,
    ) {
    }

    unsafe fn create_fence(&self) -> DeviceResult<Resource> {
        Ok(Resource)
    }
    unsafe fn destroy_fence(&self, fence: Resource) {}
    unsafe fn get_fence_value(&self, fence: &Resource) -> DeviceResult<crate::FenceValue> {
        Ok(crate::FenceValue::MAX)
    }
    unsafe fn wait(
        &self,
        fence: &Resource,
        value: crate::FenceValue,
        timeout_us: u64,
    ) -> DeviceResult<bool> {
        Ok(true)
    }
}

impl crate::CommandBuffer<Api> for Encoder {
    unsafe fn begin(&mut self, label: crate::Label) -> DeviceResult<()> {
        Ok(())
    }
    unsafe fn end(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    unsafe fn fill_buffer(&mut self, buffer: &Resource, range: crate::MemoryRange, value: u8) {}
    unsafe fn copy_buffer_to_buffer(
        &mut self,
        src: &Resource,
        dst: &Resource,
        regions: &[crate::BufferCopy],
    ) {
    }

    unsafe fn begin_render_pass(&mut self, target: &Resource, clear: Option<[f32; 4]>) {}
    unsafe fn end_render_pass(&mut self) {}

    unsafe fn set_compute_pipeline(&mut self, pipeline: &Resource) {}
    unsafe fn set_graphics_pipeline(&mut self, pipeline: &Resource) {}
    unsafe fn set_descriptor_table(
        &mut self,
        ty: crate::DescriptorType,
        base: crate::DescriptorAddress,
    ) {
    }

    unsafe fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {}
    unsafe fn dispatch(&mut self, count: [u32; 3]) {}

    unsafe fn insert_debug_marker(&mut self, label: &str) {}
}
