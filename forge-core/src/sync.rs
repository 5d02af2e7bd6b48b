use std::{
    convert::TryFrom,
    fmt,
    mem::ManuallyDrop,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use hal::Device as _;

use crate::{device::Device, hal_api::HalApi, resource_log, DeviceError, SubmissionIndex};

/// A GPU timeline, backed by a backend fence.
///
/// The signaled value is advanced by whoever submits work against the sync
/// point, and the completion value by the device once that work finishes.
/// Both only ever grow.
pub struct SyncPoint<A: HalApi> {
    raw: ManuallyDrop<A::Fence>,
    device: Arc<Device<A>>,
    label: String,
    signaled: AtomicU64,
    completed: AtomicU64,
}

impl<A: HalApi> fmt::Debug for SyncPoint<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SyncPoint")
            .field("label", &self.label)
            .field("signaled", &self.signaled.load(Ordering::Relaxed))
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<A: HalApi> SyncPoint<A> {
    pub(crate) fn new(raw: A::Fence, device: Arc<Device<A>>, label: String) -> Self {
        SyncPoint {
            raw: ManuallyDrop::new(raw),
            device,
            label,
            signaled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    pub fn raw(&self) -> &A::Fence {
        &self.raw
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Record that `value` will be reached once the work submitted with it
    /// completes.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not above the last signaled value.
    pub fn signal(&self, value: SubmissionIndex) {
        let previous = self.signaled.fetch_max(value, Ordering::AcqRel);
        assert!(
            value > previous,
            "sync point {:?} signaled with {} after {}",
            self.label,
            value,
            previous
        );
    }

    /// The last value passed to [`SyncPoint::signal`].
    pub fn sync_point(&self) -> SubmissionIndex {
        self.signaled.load(Ordering::Acquire)
    }

    /// Poll the value the device has reached. Never blocks.
    pub fn completion_value(&self) -> SubmissionIndex {
        match unsafe { self.device.raw().get_fence_value(&self.raw) } {
            Ok(value) => self.observe(value),
            Err(err) => {
                log::warn!("Failed to query sync point {:?}: {}", self.label, err);
                self.completed.load(Ordering::Acquire)
            }
        }
    }

    pub fn is_complete(&self, value: SubmissionIndex) -> bool {
        value <= self.completed.load(Ordering::Acquire) || value <= self.completion_value()
    }

    /// Block until the device reaches `value`, or until `timeout` elapses.
    ///
    /// Returns whether `value` was reached. `None` waits forever.
    pub fn wait(
        &self,
        value: SubmissionIndex,
        timeout: Option<Duration>,
    ) -> Result<bool, DeviceError> {
        profiling::scope!("SyncPoint::wait");
        if value <= self.completed.load(Ordering::Acquire) {
            return Ok(true);
        }
        let timeout_us = match timeout {
            Some(duration) => {
                u64::try_from(duration.as_micros()).unwrap_or(hal::TIMEOUT_INFINITE - 1)
            }
            None => hal::TIMEOUT_INFINITE,
        };
        let reached = unsafe { self.device.raw().wait(&self.raw, value, timeout_us)? };
        if reached {
            self.observe(value);
        }
        Ok(reached)
    }

    fn observe(&self, value: SubmissionIndex) -> SubmissionIndex {
        let previous = self.completed.fetch_max(value, Ordering::AcqRel);
        previous.max(value)
    }
}

impl<A: HalApi> Drop for SyncPoint<A> {
    fn drop(&mut self) {
        resource_log!("Destroy raw sync point {:?}", self.label);
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        unsafe {
            self.device.raw().destroy_fence(raw);
        }
    }
}
