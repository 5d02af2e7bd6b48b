use crate::{instance::Instance, Backend};

pub trait HalApi: hal::Api + 'static {
    const VARIANT: Backend;
    fn instance_as_hal(instance: &Instance) -> Option<&Self::Instance>;
}

impl HalApi for hal::api::Empty {
    const VARIANT: Backend = Backend::Empty;
    fn instance_as_hal(instance: &Instance) -> Option<&Self::Instance> {
        instance.empty.as_ref()
    }
}

impl HalApi for hal::api::Soft {
    const VARIANT: Backend = Backend::Soft;
    fn instance_as_hal(instance: &Instance) -> Option<&Self::Instance> {
        instance.soft.as_ref()
    }
}
