use std::{
    sync::Arc,
    thread::{self, ThreadId},
};

use hal::{CommandPool as _, Device as _};
use parking_lot::Mutex;

use crate::{hal_api::HalApi, resource_log, DeviceError, FastHashMap, QueueType};

type PoolKey = (ThreadId, QueueType);

/// The command pools of a `Device`, one per (thread, queue type).
///
/// A raw [`CommandPool`][cp] must not be used from two threads at once, so
/// every recording thread gets pools of its own. The map lock is only held to
/// find or create a pool; allocating from it takes the pool's own lock, which
/// is uncontended unless a buffer is released from a foreign thread.
///
/// [cp]: hal::CommandPool
pub(crate) struct CommandAllocator<A: HalApi> {
    pools: Mutex<FastHashMap<PoolKey, Arc<Mutex<A::CommandPool>>>>,
}

impl<A: HalApi> CommandAllocator<A> {
    pub(crate) fn new() -> Self {
        Self {
            pools: Mutex::new(FastHashMap::default()),
        }
    }

    fn pool(
        &self,
        device: &A::Device,
        key: PoolKey,
    ) -> Result<Arc<Mutex<A::CommandPool>>, DeviceError> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&key) {
            return Ok(Arc::clone(pool));
        }
        let current = thread::current();
        log::info!("Create {:?} command pool for thread {:?}", key.1, current.name());
        let raw = unsafe {
            device.create_command_pool(&hal::CommandPoolDescriptor {
                label: current.name(),
                queue_type: key.1,
            })?
        };
        let pool = Arc::new(Mutex::new(raw));
        pools.insert(key, Arc::clone(&pool));
        Ok(pool)
    }

    /// Allocate a raw command buffer from the calling thread's pool.
    pub(crate) fn acquire(
        &self,
        device: &A::Device,
        queue_type: QueueType,
        label: hal::Label,
    ) -> Result<(A::CommandBuffer, ThreadId), DeviceError> {
        let owner = thread::current().id();
        let pool = self.pool(device, (owner, queue_type))?;
        let raw = unsafe { pool.lock().allocate(label)? };
        Ok((raw, owner))
    }

    /// Give `raw` back to the pool it was allocated from.
    pub(crate) fn release(&self, owner: ThreadId, queue_type: QueueType, raw: A::CommandBuffer) {
        let pool = self.pools.lock().get(&(owner, queue_type)).cloned();
        match pool {
            Some(pool) => unsafe { pool.lock().free(raw) },
            None => log::error!(
                "Command pool of thread {:?} is gone, leaking a command buffer",
                owner
            ),
        }
    }

    pub(crate) fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Free the command pools.
    ///
    /// This is only called when the `Device` is dropped.
    pub(crate) fn dispose(&self, device: &A::Device) {
        let pools = std::mem::take(&mut *self.pools.lock());
        resource_log!("CommandAllocator::dispose pools {}", pools.len());
        for ((owner, _), pool) in pools {
            match Arc::try_unwrap(pool) {
                Ok(pool) => unsafe {
                    device.destroy_command_pool(pool.into_inner());
                },
                Err(_) => log::error!("Command pool of thread {:?} is still in use", owner),
            }
        }
    }
}
