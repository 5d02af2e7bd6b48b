use thiserror::Error;

use crate::{Backend, DeviceError};

#[derive(Clone, Debug, Error)]
pub enum CreateDeviceError {
    #[error("backend {0} is not enabled on this instance")]
    BackendDisabled(Backend),
    #[error("backend {0} is not supported by this build")]
    UnsupportedBackend(Backend),
    #[error("no enabled backend could open a device")]
    NoBackend,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Instance(#[from] hal::InstanceError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    UnknownBackend(#[from] hal::UnknownBackend),
    #[error("descriptor pool needs at least one descriptor per block")]
    EmptyBlocks,
    #[error("descriptor pool block capacity {0} is outside of 1..=64")]
    BlockCapacity(u32),
    #[error("pooled descriptor count {max} exceeds the block size {block}")]
    PooledCount { max: u32, block: u32 },
}

#[derive(Debug, Error)]
pub enum CreateTaskQueueError {
    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum WaitIdleError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("task queue worker has exited with {0} tasks unprocessed")]
    WorkerExited(u64),
    #[error("timed out waiting for the task queue to become idle")]
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum CreateResourceError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Shader(#[from] hal::ShaderError),
    #[error(transparent)]
    Pipeline(#[from] hal::PipelineError),
    #[error(transparent)]
    Surface(#[from] hal::SurfaceError),
}
