/// The `AnyDevice` type: a pointer to a `Device<A>` for any backend `A`.
use crate::{device::Device, hal_api::HalApi, Backend};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A pointer to a `Device<A>`, for any backend `A`.
///
/// Any `AnyDevice` is just like an `Arc<Device<A>>`, except that the
/// `A` type parameter is erased. To access the `Device`, you must
/// downcast to a particular backend with the [`downcast_ref`] or
/// [`downcast_clone`] methods, or dispatch on [`AnyDevice::backend`].
///
/// [`downcast_ref`]: AnyDevice::downcast_ref
/// [`downcast_clone`]: AnyDevice::downcast_clone
#[derive(Clone)]
pub struct AnyDevice {
    backend: Backend,
    device: Arc<dyn Any + Send + Sync + 'static>,
}

impl AnyDevice {
    /// Return an `AnyDevice` that holds an owning `Arc` pointer to `device`.
    pub fn new<A: HalApi>(device: Arc<Device<A>>) -> AnyDevice {
        AnyDevice {
            backend: A::VARIANT,
            device,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// If `self` is an `Arc<Device<A>>`, return a reference to the
    /// device.
    pub fn downcast_ref<A: HalApi>(&self) -> Option<&Device<A>> {
        self.device.downcast_ref::<Device<A>>()
    }

    /// If `self` is an `Arc<Device<A>>`, return a clone of that.
    pub fn downcast_clone<A: HalApi>(&self) -> Option<Arc<Device<A>>> {
        Arc::clone(&self.device).downcast::<Device<A>>().ok()
    }
}

impl fmt::Debug for AnyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyDevice({})", self.backend)
    }
}
