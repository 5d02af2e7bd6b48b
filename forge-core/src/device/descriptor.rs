use std::{fmt, sync::Arc};

use hal::{DescriptorHeap as _, Device as _};
use parking_lot::Mutex;

use crate::{
    allocator::{PoolAllocator, PoolSlot},
    config::DescriptorPoolConfig,
    hal_api::HalApi,
    resource_log, DescriptorHeapFlags, DescriptorType, DeviceError, FastHashMap,
};

/// One run of descriptors inside a heap.
///
/// Descriptor `i` of the run lives at `heap + (offset + i) * increment`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub heap: hal::DescriptorAddress,
    pub offset: u32,
    pub increment: u32,
}

impl Descriptor {
    /// Address of the first descriptor.
    pub fn ptr(&self) -> hal::DescriptorAddress {
        self.at(0)
    }

    pub fn at(&self, index: u32) -> hal::DescriptorAddress {
        self.heap + (self.offset as u64 + index as u64) * self.increment as u64
    }
}

/// Identifies the pool a descriptor request is served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub ty: DescriptorType,
    pub count: u32,
    pub flags: DescriptorHeapFlags,
}

enum Backing<A: HalApi> {
    Pooled(PoolSlot),
    Dedicated(A::DescriptorHeap),
}

/// A run of `count` descriptors of one type.
///
/// Allocations are handed out by [`crate::Device::allocate_descriptor`] and
/// must be given back with [`crate::Device::free_descriptor`].
pub struct DescriptorAllocation<A: HalApi> {
    key: BucketKey,
    cpu: Descriptor,
    gpu: Option<Descriptor>,
    backing: Backing<A>,
}

impl<A: HalApi> fmt::Debug for DescriptorAllocation<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DescriptorAllocation")
            .field("key", &self.key)
            .field("cpu", &self.cpu)
            .field("gpu", &self.gpu)
            .field("dedicated", &self.is_dedicated())
            .finish()
    }
}

impl<A: HalApi> DescriptorAllocation<A> {
    pub fn ty(&self) -> DescriptorType {
        self.key.ty
    }

    pub fn count(&self) -> u32 {
        self.key.count
    }

    pub fn flags(&self) -> DescriptorHeapFlags {
        self.key.flags
    }

    /// The descriptors in the CPU address space, used for writes and copies.
    pub fn cpu(&self) -> Descriptor {
        self.cpu
    }

    /// The descriptors in the GPU address space, for shader-visible allocations.
    pub fn gpu(&self) -> Option<Descriptor> {
        self.gpu
    }

    pub fn is_dedicated(&self) -> bool {
        match self.backing {
            Backing::Dedicated(_) => true,
            Backing::Pooled(_) => false,
        }
    }

    pub(crate) fn slot(&self) -> Option<PoolSlot> {
        match self.backing {
            Backing::Pooled(slot) => Some(slot),
            Backing::Dedicated(_) => None,
        }
    }
}

fn describe<A: HalApi>(heap: &A::DescriptorHeap, offset: u32) -> (Descriptor, Option<Descriptor>) {
    let increment = heap.increment_size();
    let cpu = Descriptor {
        heap: heap.cpu_start(),
        offset,
        increment,
    };
    let gpu = heap.gpu_start().map(|start| Descriptor {
        heap: start,
        offset,
        increment,
    });
    (cpu, gpu)
}

/// Pool serving requests of one [`BucketKey`].
///
/// Every heap is divided into units of `key.count` descriptors, and each
/// allocation takes one unit.
struct DescriptorPool<A: HalApi> {
    key: BucketKey,
    units: PoolAllocator<A::DescriptorHeap>,
}

impl<A: HalApi> DescriptorPool<A> {
    fn allocate(&self, device: &A::Device) -> Result<DescriptorAllocation<A>, DeviceError> {
        let key = self.key;
        self.units.allocate(
            1,
            |units| {
                let capacity = units * key.count;
                log::info!(
                    "Growing {:?} descriptor pool for runs of {} ({:?}) by {} descriptors",
                    key.ty,
                    key.count,
                    key.flags,
                    capacity
                );
                unsafe {
                    device.create_descriptor_heap(&hal::DescriptorHeapDescriptor {
                        label: Some("pooled descriptors"),
                        ty: key.ty,
                        capacity,
                        flags: key.flags,
                    })
                }
            },
            |heap, slot| {
                let (cpu, gpu) = describe::<A>(heap, slot.index * key.count);
                DescriptorAllocation {
                    key,
                    cpu,
                    gpu,
                    backing: Backing::Pooled(slot),
                }
            },
        )
    }
}

/// Routes descriptor requests to lazily created per-bucket pools.
///
/// The bucket map is only locked to find or create a pool; each pool has its
/// own lock, so requests for different buckets don't contend.
pub(crate) struct DescriptorAllocator<A: HalApi> {
    config: DescriptorPoolConfig,
    pools: Mutex<FastHashMap<BucketKey, Arc<DescriptorPool<A>>>>,
}

impl<A: HalApi> DescriptorAllocator<A> {
    pub(crate) fn new(config: DescriptorPoolConfig) -> Self {
        DescriptorAllocator {
            config,
            pools: Mutex::new(FastHashMap::default()),
        }
    }

    pub(crate) fn config(&self) -> &DescriptorPoolConfig {
        &self.config
    }

    fn pool(&self, key: BucketKey) -> Arc<DescriptorPool<A>> {
        let mut pools = self.pools.lock();
        let units_per_block = self.config.units_per_block(key.count);
        let pool = pools.entry(key).or_insert_with(|| {
            resource_log!("Create descriptor bucket {:?}", key);
            Arc::new(DescriptorPool {
                key,
                units: PoolAllocator::new(units_per_block),
            })
        });
        Arc::clone(pool)
    }

    pub(crate) fn allocate(
        &self,
        device: &A::Device,
        ty: DescriptorType,
        count: u32,
        flags: DescriptorHeapFlags,
    ) -> Result<DescriptorAllocation<A>, DeviceError> {
        profiling::scope!("DescriptorAllocator::allocate");
        assert!(count > 0, "descriptor allocations need at least one descriptor");
        assert!(
            !flags.contains(DescriptorHeapFlags::SHADER_VISIBLE) || ty.can_be_shader_visible(),
            "{:?} descriptors can't be shader visible",
            ty
        );
        let key = BucketKey { ty, count, flags };

        if !self.config.is_pooled(count) {
            log::info!("Dedicated {:?} descriptor heap for {} descriptors", ty, count);
            let heap = unsafe {
                device.create_descriptor_heap(&hal::DescriptorHeapDescriptor {
                    label: Some("dedicated descriptors"),
                    ty,
                    capacity: count,
                    flags,
                })?
            };
            let (cpu, gpu) = describe::<A>(&heap, 0);
            return Ok(DescriptorAllocation {
                key,
                cpu,
                gpu,
                backing: Backing::Dedicated(heap),
            });
        }

        self.pool(key).allocate(device)
    }

    pub(crate) fn free(&self, device: &A::Device, allocation: DescriptorAllocation<A>) {
        match allocation.backing {
            Backing::Pooled(slot) => {
                let pool = self.pools.lock().get(&allocation.key).cloned();
                match pool {
                    Some(pool) => pool.units.free(slot),
                    None => log::error!("Descriptor bucket {:?} is gone", allocation.key),
                }
            }
            Backing::Dedicated(heap) => unsafe {
                device.destroy_descriptor_heap(heap);
            },
        }
    }

    /// Number of heaps created for a bucket so far.
    pub(crate) fn block_count(&self, key: BucketKey) -> usize {
        self.pools
            .lock()
            .get(&key)
            .map_or(0, |pool| pool.units.block_count())
    }

    /// Destroy every pooled heap.
    ///
    /// This is only called when the `Device` is dropped.
    pub(crate) fn dispose(&self, device: &A::Device) {
        let pools = std::mem::take(&mut *self.pools.lock());
        for (key, pool) in pools {
            let heaps = pool.units.drain_blocks();
            resource_log!("Destroy descriptor bucket {:?}: {} heaps", key, heaps.len());
            for heap in heaps {
                unsafe {
                    device.destroy_descriptor_heap(heap);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::Instance as _;

    type Api = hal::api::Soft;

    fn device() -> hal::soft::Device {
        unsafe {
            let instance = hal::soft::Instance::init(&hal::InstanceDescriptor {
                name: "descriptor-test",
                flags: hal::InstanceFlags::empty(),
            })
            .unwrap();
            instance.open(&hal::OpenDescriptor::default()).unwrap()
        }
    }

    #[test]
    fn runs_are_unit_aligned() {
        let device = device();
        let allocator = DescriptorAllocator::<Api>::new(DescriptorPoolConfig::default());
        let flags = DescriptorHeapFlags::empty();
        let a = allocator
            .allocate(&device, DescriptorType::ShaderResource, 8, flags)
            .unwrap();
        let b = allocator
            .allocate(&device, DescriptorType::ShaderResource, 8, flags)
            .unwrap();
        assert_eq!(a.cpu().heap, b.cpu().heap);
        assert_eq!(a.cpu().offset, 0);
        assert_eq!(b.cpu().offset, 8);
        assert_eq!(b.cpu().ptr() - a.cpu().ptr(), 8 * a.cpu().increment as u64);
        assert!(a.gpu().is_none());
        allocator.free(&device, a);
        allocator.free(&device, b);
        allocator.dispose(&device);
        assert_eq!(device.live_objects(hal::soft::ObjectKind::DescriptorHeap), 0);
    }

    #[test]
    fn visibility_splits_buckets() {
        let device = device();
        let allocator = DescriptorAllocator::<Api>::new(DescriptorPoolConfig::default());
        let cpu = allocator
            .allocate(&device, DescriptorType::Sampler, 1, DescriptorHeapFlags::empty())
            .unwrap();
        let gpu = allocator
            .allocate(
                &device,
                DescriptorType::Sampler,
                1,
                DescriptorHeapFlags::SHADER_VISIBLE,
            )
            .unwrap();
        assert_ne!(cpu.cpu().heap, gpu.cpu().heap);
        assert!(gpu.gpu().is_some());
        assert_eq!(device.live_objects(hal::soft::ObjectKind::DescriptorHeap), 2);
        allocator.free(&device, cpu);
        allocator.free(&device, gpu);
        allocator.dispose(&device);
    }

    #[test]
    fn oversized_requests_are_dedicated() {
        let device = device();
        let allocator = DescriptorAllocator::<Api>::new(DescriptorPoolConfig::default());
        let big = allocator
            .allocate(
                &device,
                DescriptorType::ShaderResource,
                100,
                DescriptorHeapFlags::empty(),
            )
            .unwrap();
        assert!(big.is_dedicated());
        assert_eq!(big.cpu().offset, 0);
        let key = BucketKey {
            ty: DescriptorType::ShaderResource,
            count: 100,
            flags: DescriptorHeapFlags::empty(),
        };
        assert_eq!(allocator.block_count(key), 0);
        allocator.free(&device, big);
        assert_eq!(device.live_objects(hal::soft::ObjectKind::DescriptorHeap), 0);
    }

    #[test]
    fn pool_grows_on_exhaustion() {
        let device = device();
        let config = DescriptorPoolConfig {
            descriptors_per_block: 4,
            max_units_per_block: 4,
            max_pooled_count: 4,
        };
        let allocator = DescriptorAllocator::<Api>::new(config);
        let flags = DescriptorHeapFlags::empty();
        let key = BucketKey {
            ty: DescriptorType::RenderTarget,
            count: 2,
            flags,
        };
        let allocations: Vec<_> = (0..5)
            .map(|_| {
                allocator
                    .allocate(&device, DescriptorType::RenderTarget, 2, flags)
                    .unwrap()
            })
            .collect();
        // two units of two descriptors per heap
        assert_eq!(allocator.block_count(key), 3);
        for allocation in allocations {
            allocator.free(&device, allocation);
        }
        let again = allocator
            .allocate(&device, DescriptorType::RenderTarget, 2, flags)
            .unwrap();
        assert_eq!(again.slot().map(|slot| (slot.block, slot.index)), Some((0, 0)));
        assert_eq!(allocator.block_count(key), 3);
        allocator.free(&device, again);
        allocator.dispose(&device);
    }

    #[test]
    #[should_panic(expected = "can't be shader visible")]
    fn shader_visible_render_targets_panic() {
        let device = device();
        let allocator = DescriptorAllocator::<Api>::new(DescriptorPoolConfig::default());
        let _ = allocator.allocate(
            &device,
            DescriptorType::RenderTarget,
            1,
            DescriptorHeapFlags::SHADER_VISIBLE,
        );
    }
}
