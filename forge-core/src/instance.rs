use std::sync::Arc;

use hal::Instance as _;

use crate::{
    any_device::AnyDevice,
    config::{DeviceDescriptor, InstanceDescriptor},
    device::Device,
    error::CreateDeviceError,
    hal_api::HalApi,
    Backend, Backends,
};

type HalInstance<A> = <A as hal::Api>::Instance;

/// Order in which [`Instance::request_device`] tries backends when the
/// descriptor doesn't name one.
const PREFERENCE: [Backend; 2] = [Backend::Soft, Backend::Empty];

/// Entry point that opens devices on the backends compiled into this build.
pub struct Instance {
    name: String,
    requested: Backends,
    pub(crate) empty: Option<HalInstance<hal::api::Empty>>,
    pub(crate) soft: Option<HalInstance<hal::api::Soft>>,
}

impl Instance {
    pub fn new(desc: &InstanceDescriptor) -> Self {
        let hal_desc = hal::InstanceDescriptor {
            name: &desc.name,
            flags: desc.flags,
        };

        fn init<A: HalApi>(
            requested: Backends,
            hal_desc: &hal::InstanceDescriptor,
        ) -> Option<HalInstance<A>> {
            if !requested.contains(A::VARIANT.into()) {
                return None;
            }
            match unsafe { <A::Instance as hal::Instance<A>>::init(hal_desc) } {
                Ok(instance) => Some(instance),
                Err(err) => {
                    log::warn!("Failed to initialize {} backend: {}", A::VARIANT, err);
                    None
                }
            }
        }

        let unavailable = desc.backends - (Backends::EMPTY | Backends::SOFT);
        for backend in unavailable.iter() {
            log::info!("Backend {} is not available in this build", backend);
        }

        Self {
            name: desc.name.clone(),
            requested: desc.backends,
            empty: init::<hal::api::Empty>(desc.backends, &hal_desc),
            soft: init::<hal::api::Soft>(desc.backends, &hal_desc),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backends that were requested and initialized.
    pub fn enabled_backends(&self) -> Backends {
        let mut backends = Backends::empty();
        if self.empty.is_some() {
            backends |= Backends::EMPTY;
        }
        if self.soft.is_some() {
            backends |= Backends::SOFT;
        }
        backends
    }

    /// Open a device on backend `A`.
    pub fn open<A: HalApi>(
        &self,
        desc: &DeviceDescriptor,
    ) -> Result<Arc<Device<A>>, CreateDeviceError> {
        profiling::scope!("Instance::open");
        let instance = match A::instance_as_hal(self) {
            Some(instance) => instance,
            None if self.requested.contains(A::VARIANT.into()) => {
                return Err(CreateDeviceError::UnsupportedBackend(A::VARIANT))
            }
            None => return Err(CreateDeviceError::BackendDisabled(A::VARIANT)),
        };
        let raw = unsafe {
            instance.open(&hal::OpenDescriptor {
                label: desc.label.as_deref(),
            })?
        };
        Ok(Device::from_hal(raw, desc)?)
    }

    /// Open a device on the backend `desc` names, or on the first enabled one
    /// in order of preference.
    pub fn request_device(&self, desc: &DeviceDescriptor) -> Result<AnyDevice, CreateDeviceError> {
        match desc.backend {
            Some(backend) => self.open_backend(backend, desc),
            None => {
                let enabled = self.enabled_backends();
                let backend = PREFERENCE
                    .iter()
                    .copied()
                    .find(|&backend| enabled.contains(backend.into()))
                    .ok_or(CreateDeviceError::NoBackend)?;
                log::info!("Selected backend {}", backend);
                self.open_backend(backend, desc)
            }
        }
    }

    fn open_backend(
        &self,
        backend: Backend,
        desc: &DeviceDescriptor,
    ) -> Result<AnyDevice, CreateDeviceError> {
        match backend {
            Backend::Empty => self.open::<hal::api::Empty>(desc).map(AnyDevice::new),
            Backend::Soft => self.open::<hal::api::Soft>(desc).map(AnyDevice::new),
            other if self.requested.contains(other.into()) => {
                Err(CreateDeviceError::UnsupportedBackend(other))
            }
            other => Err(CreateDeviceError::BackendDisabled(other)),
        }
    }
}
