use std::{fmt, mem::ManuallyDrop, sync::Arc};

use arrayvec::ArrayVec;
use hal::Device as _;

use crate::{
    device::{Descriptor, DescriptorAllocation, Device},
    hal_api::HalApi,
    resource_log, DescriptorLayout, DescriptorType,
};

/// Implements `Debug`, `label()`, `raw()` and a destroying `Drop` for a
/// resource wrapper with `raw`, `device` and `label` fields.
macro_rules! impl_resource {
    ($name:ident, $raw:ident, $destroy:ident) => {
        impl<A: HalApi> $name<A> {
            pub fn label(&self) -> &str {
                &self.label
            }

            pub fn raw(&self) -> &A::$raw {
                &self.raw
            }

            pub fn device(&self) -> &Arc<Device<A>> {
                &self.device
            }
        }

        impl<A: HalApi> fmt::Debug for $name<A> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("label", &self.label)
                    .finish()
            }
        }

        impl<A: HalApi> Drop for $name<A> {
            fn drop(&mut self) {
                resource_log!("Destroy raw {} {:?}", stringify!($name), self.label);
                for allocation in self.descriptors.drain(..) {
                    self.device.free_descriptor(allocation);
                }
                let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
                unsafe {
                    self.device.raw().$destroy(raw);
                }
            }
        }
    };
}

/// A resource whose descriptor can be copied into a [`DescriptorSet`].
pub trait BindingResource<A: HalApi> {
    /// The device the resource was created on.
    fn device(&self) -> &Arc<Device<A>>;
    /// The CPU descriptor of the resource, if it has one.
    fn binding_descriptor(&self) -> Option<(DescriptorType, Descriptor)>;
}

fn first_descriptor<A: HalApi>(
    descriptors: &[DescriptorAllocation<A>],
) -> Option<(DescriptorType, Descriptor)> {
    descriptors
        .first()
        .map(|allocation| (allocation.ty(), allocation.cpu()))
}

pub struct Buffer<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::Buffer>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) size: hal::BufferAddress,
    pub(crate) usage: hal::BufferUses,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 1>,
}

impl_resource!(Buffer, Buffer, destroy_buffer);

impl<A: HalApi> Buffer<A> {
    pub fn size(&self) -> hal::BufferAddress {
        self.size
    }

    pub fn usage(&self) -> hal::BufferUses {
        self.usage
    }
}

impl<A: HalApi> BindingResource<A> for Buffer<A> {
    fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }
    fn binding_descriptor(&self) -> Option<(DescriptorType, Descriptor)> {
        first_descriptor(&self.descriptors)
    }
}

pub struct Texture<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::Texture>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) format: hal::TextureFormat,
    pub(crate) size: hal::Extent3d,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 1>,
}

impl_resource!(Texture, Texture, destroy_texture);

impl<A: HalApi> Texture<A> {
    pub fn format(&self) -> hal::TextureFormat {
        self.format
    }

    pub fn size(&self) -> hal::Extent3d {
        self.size
    }
}

impl<A: HalApi> BindingResource<A> for Texture<A> {
    fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }
    fn binding_descriptor(&self) -> Option<(DescriptorType, Descriptor)> {
        first_descriptor(&self.descriptors)
    }
}

pub struct Sampler<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::Sampler>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 1>,
}

impl_resource!(Sampler, Sampler, destroy_sampler);

impl<A: HalApi> BindingResource<A> for Sampler<A> {
    fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }
    fn binding_descriptor(&self) -> Option<(DescriptorType, Descriptor)> {
        first_descriptor(&self.descriptors)
    }
}

pub struct ShaderModule<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::ShaderModule>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) stage: hal::ShaderStage,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 0>,
}

impl_resource!(ShaderModule, ShaderModule, destroy_shader_module);

impl<A: HalApi> ShaderModule<A> {
    pub fn stage(&self) -> hal::ShaderStage {
        self.stage
    }
}

pub struct ComputePipeline<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::ComputePipeline>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) layout: DescriptorLayout,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 0>,
}

impl_resource!(ComputePipeline, ComputePipeline, destroy_compute_pipeline);

impl<A: HalApi> ComputePipeline<A> {
    pub fn layout(&self) -> &DescriptorLayout {
        &self.layout
    }
}

pub struct GraphicsPipeline<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::GraphicsPipeline>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) layout: DescriptorLayout,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 0>,
}

impl_resource!(GraphicsPipeline, GraphicsPipeline, destroy_graphics_pipeline);

impl<A: HalApi> GraphicsPipeline<A> {
    pub fn layout(&self) -> &DescriptorLayout {
        &self.layout
    }
}

/// Color and depth attachments with their render target descriptors.
///
/// The first descriptor run holds one RTV per color attachment, the optional
/// second one the DSV.
pub struct RenderTarget<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::RenderTarget>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) extent: (u32, u32),
    pub(crate) color_count: u32,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 2>,
}

impl_resource!(RenderTarget, RenderTarget, destroy_render_target);

impl<A: HalApi> RenderTarget<A> {
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn color_count(&self) -> u32 {
        self.color_count
    }

    pub fn color_descriptor(&self, index: u32) -> Option<hal::DescriptorAddress> {
        self.descriptors
            .iter()
            .find(|allocation| allocation.ty() == DescriptorType::RenderTarget)
            .filter(|_| index < self.color_count)
            .map(|allocation| allocation.cpu().at(index))
    }

    pub fn depth_descriptor(&self) -> Option<hal::DescriptorAddress> {
        self.descriptors
            .iter()
            .find(|allocation| allocation.ty() == DescriptorType::DepthStencil)
            .map(|allocation| allocation.cpu().ptr())
    }
}

pub struct Swapchain<A: HalApi> {
    pub(crate) raw: ManuallyDrop<A::Swapchain>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) label: String,
    pub(crate) buffer_count: u32,
    pub(crate) descriptors: ArrayVec<DescriptorAllocation<A>, 0>,
}

impl_resource!(Swapchain, Swapchain, destroy_swapchain);

impl<A: HalApi> Swapchain<A> {
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub(crate) fn raw_mut(&mut self) -> &mut A::Swapchain {
        &mut self.raw
    }
}

/// Shader-visible descriptor tables matching a pipeline's layout.
pub struct DescriptorSet<A: HalApi> {
    pub(crate) device: Arc<Device<A>>,
    pub(crate) layout: DescriptorLayout,
    pub(crate) tables: ArrayVec<DescriptorAllocation<A>, { DescriptorType::COUNT }>,
}

impl<A: HalApi> fmt::Debug for DescriptorSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("layout", &self.layout)
            .finish()
    }
}

impl<A: HalApi> DescriptorSet<A> {
    pub fn layout(&self) -> &DescriptorLayout {
        &self.layout
    }

    /// GPU start of every table, for binding.
    pub fn tables(&self) -> impl Iterator<Item = (DescriptorType, Descriptor)> + '_ {
        self.tables
            .iter()
            .filter_map(|allocation| allocation.gpu().map(|gpu| (allocation.ty(), gpu)))
    }

    pub fn table(&self, ty: DescriptorType) -> Option<&DescriptorAllocation<A>> {
        self.tables.iter().find(|allocation| allocation.ty() == ty)
    }

    /// Copy the descriptor of `resource` into `slot` of the matching table.
    ///
    /// # Panics
    ///
    /// Panics if the resource belongs to another device, has no descriptor,
    /// or `slot` is outside of the layout.
    pub fn set(&self, slot: u32, resource: &impl BindingResource<A>) {
        assert!(
            Arc::ptr_eq(resource.device(), &self.device),
            "resource bound to slot {} belongs to another device",
            slot
        );
        let (ty, src) = match resource.binding_descriptor() {
            Some(descriptor) => descriptor,
            None => panic!("resource bound to slot {} has no descriptor", slot),
        };
        assert!(
            slot < self.layout.count(ty),
            "slot {} is outside of the {} {:?} slots of the layout",
            slot,
            self.layout.count(ty),
            ty
        );
        let table = match self.table(ty) {
            Some(table) => table,
            None => panic!("descriptor set has no {:?} table", ty),
        };
        unsafe {
            self.device
                .raw()
                .copy_descriptors(ty, src.ptr(), table.cpu().at(slot), 1);
        }
    }
}

impl<A: HalApi> Drop for DescriptorSet<A> {
    fn drop(&mut self) {
        resource_log!("Free descriptor set {:?}", self.layout);
        for allocation in self.tables.drain(..) {
            self.device.free_descriptor(allocation);
        }
    }
}

#[derive(Debug)]
pub struct ComputePipelineDescriptor<'a, A: HalApi> {
    pub label: hal::Label<'a>,
    pub layout: DescriptorLayout,
    pub shader: &'a ShaderModule<A>,
}

#[derive(Debug)]
pub struct GraphicsPipelineDescriptor<'a, A: HalApi> {
    pub label: hal::Label<'a>,
    pub layout: DescriptorLayout,
    pub vertex: &'a ShaderModule<A>,
    pub fragment: Option<&'a ShaderModule<A>>,
    pub color_formats: &'a [hal::TextureFormat],
    pub depth_format: Option<hal::TextureFormat>,
}
