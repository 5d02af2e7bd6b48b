use std::{fmt, mem::ManuallyDrop, sync::Arc};

use hal::{Device as _, Queue as _};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    command::CommandBuffer, device::Device, hal_api::HalApi, resource::Swapchain, resource_log,
    sync::SyncPoint, DeviceError, QueuePriority, QueueType, SubmissionIndex,
};

/// A hardware queue.
///
/// The raw queue is externally synchronized, so every operation on it goes
/// through one lock.
pub struct Queue<A: HalApi> {
    raw: ManuallyDrop<Mutex<A::Queue>>,
    device: Arc<Device<A>>,
    ty: QueueType,
    priority: QueuePriority,
    label: String,
}

impl<A: HalApi> fmt::Debug for Queue<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Queue")
            .field("label", &self.label)
            .field("ty", &self.ty)
            .field("priority", &self.priority)
            .finish()
    }
}

impl<A: HalApi> Queue<A> {
    pub(super) fn new(
        raw: A::Queue,
        device: Arc<Device<A>>,
        ty: QueueType,
        priority: QueuePriority,
        label: String,
    ) -> Self {
        Queue {
            raw: ManuallyDrop::new(Mutex::new(raw)),
            device,
            ty,
            priority,
            label,
        }
    }

    pub fn ty(&self) -> QueueType {
        self.ty
    }

    pub fn priority(&self) -> QueuePriority {
        self.priority
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    pub(crate) fn raw(&self) -> MutexGuard<A::Queue> {
        self.raw.lock()
    }

    fn assert_signal_value(sync_point: &SyncPoint<A>, value: SubmissionIndex) {
        assert!(
            value > sync_point.sync_point(),
            "sync point {:?} is already signaled up to {}, can't signal {}",
            sync_point.label(),
            sync_point.sync_point(),
            value
        );
    }

    /// Submit a closed command buffer, signaling `sync_point` with `value`
    /// once it completes.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not closed, was allocated for another queue
    /// type, or `value` does not advance the sync point.
    pub fn submit(
        &self,
        cmd_buf: &mut CommandBuffer<A>,
        sync_point: &SyncPoint<A>,
        value: SubmissionIndex,
    ) -> Result<(), DeviceError> {
        profiling::scope!("Queue::submit");
        assert!(
            cmd_buf.is_executable(),
            "command buffer {:?} is not closed",
            cmd_buf.label()
        );
        assert_eq!(
            cmd_buf.queue_type(),
            self.ty,
            "command buffer {:?} was allocated for another queue type",
            cmd_buf.label()
        );
        Self::assert_signal_value(sync_point, value);
        unsafe {
            self.raw
                .lock()
                .submit(&[cmd_buf.raw()], Some((sync_point.raw(), value)))?;
        }
        sync_point.signal(value);
        cmd_buf.mark_submitted();
        Ok(())
    }

    /// Signal `sync_point` with `value` once all prior work on this queue
    /// completes.
    pub fn signal(&self, sync_point: &SyncPoint<A>, value: SubmissionIndex) -> Result<(), DeviceError> {
        Self::assert_signal_value(sync_point, value);
        unsafe {
            self.raw.lock().submit(&[], Some((sync_point.raw(), value)))?;
        }
        sync_point.signal(value);
        Ok(())
    }

    /// Make later submissions on this queue wait on the device until
    /// `sync_point` reaches `value`. The host is not blocked.
    pub fn wait(&self, sync_point: &SyncPoint<A>, value: SubmissionIndex) -> Result<(), DeviceError> {
        unsafe { self.raw.lock().wait_for_fence(sync_point.raw(), value) }
    }

    pub fn present(&self, swapchain: &mut Swapchain<A>) -> Result<(), hal::SurfaceError> {
        profiling::scope!("Queue::present");
        unsafe { self.raw.lock().present(swapchain.raw_mut()) }
    }
}

impl<A: HalApi> Drop for Queue<A> {
    fn drop(&mut self) {
        resource_log!("Destroy raw queue {:?}", self.label);
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) }.into_inner();
        unsafe {
            self.device.raw().destroy_queue(raw);
        }
    }
}
