//! Configuration descriptors.
//!
//! Every descriptor has a `Default` that matches what the runtime was tuned
//! for, so most callers only override the fields they care about.

use std::{env, time::Duration};

use crate::{error::ConfigError, Backend, Backends};

/// Environment variable listing the backends an instance may use,
/// as a comma separated list of names (`"soft,vulkan"`).
pub const BACKEND_ENV: &str = "FORGE_BACKEND";

/// Parse a comma separated backend list.
pub fn parse_backends(list: &str) -> Result<Backends, ConfigError> {
    let mut backends = Backends::empty();
    for name in list.split(',').filter(|name| !name.trim().is_empty()) {
        backends |= Backends::from(name.parse::<Backend>()?);
    }
    Ok(backends)
}

/// Read the backend list from [`BACKEND_ENV`], if it is set.
pub fn backend_bits_from_env() -> Result<Option<Backends>, ConfigError> {
    match env::var(BACKEND_ENV) {
        Ok(list) => parse_backends(&list).map(Some),
        Err(_) => Ok(None),
    }
}

#[derive(Clone, Debug)]
pub struct InstanceDescriptor {
    pub name: String,
    pub backends: Backends,
    pub flags: hal::InstanceFlags,
}

impl Default for InstanceDescriptor {
    fn default() -> Self {
        InstanceDescriptor {
            name: "forge".to_string(),
            backends: Backends::SOFT | Backends::EMPTY,
            flags: if cfg!(debug_assertions) {
                hal::InstanceFlags::VALIDATION
            } else {
                hal::InstanceFlags::empty()
            },
        }
    }
}

impl InstanceDescriptor {
    /// Default descriptor, with the backend list overridden by [`BACKEND_ENV`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut desc = Self::default();
        if let Some(backends) = backend_bits_from_env()? {
            log::info!("Backends from {}: {:?}", BACKEND_ENV, backends);
            desc.backends = backends;
        }
        Ok(desc)
    }
}

/// Sizing of the pooled descriptor heaps.
///
/// Requests for `count` descriptors are grouped into units of `count`
/// descriptors. Each pooled heap holds
/// `clamp(descriptors_per_block / count, 1, max_units_per_block)` units.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorPoolConfig {
    /// Target number of descriptors in one pooled heap.
    pub descriptors_per_block: u32,
    /// Upper bound on the units in one heap. Never above 64.
    pub max_units_per_block: u32,
    /// Requests above this many descriptors get a dedicated heap.
    pub max_pooled_count: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        DescriptorPoolConfig {
            descriptors_per_block: 256,
            max_units_per_block: crate::allocator::BLOCK_SLOTS,
            max_pooled_count: crate::allocator::BLOCK_SLOTS,
        }
    }
}

impl DescriptorPoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.descriptors_per_block == 0 {
            return Err(ConfigError::EmptyBlocks);
        }
        if self.max_units_per_block == 0 || self.max_units_per_block > crate::allocator::BLOCK_SLOTS
        {
            return Err(ConfigError::BlockCapacity(self.max_units_per_block));
        }
        if self.max_pooled_count > self.descriptors_per_block {
            return Err(ConfigError::PooledCount {
                max: self.max_pooled_count,
                block: self.descriptors_per_block,
            });
        }
        Ok(())
    }

    /// Number of units a pooled heap for `count`-descriptor requests holds.
    pub fn units_per_block(&self, count: u32) -> u32 {
        (self.descriptors_per_block / count.max(1)).clamp(1, self.max_units_per_block)
    }

    pub fn is_pooled(&self, count: u32) -> bool {
        count <= self.max_pooled_count
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescriptor {
    pub label: Option<String>,
    /// Backend to open. `None` picks the first enabled one.
    pub backend: Option<Backend>,
    pub descriptor_pools: DescriptorPoolConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskQueueDescriptor {
    /// Name of the worker thread.
    pub label: String,
    /// How long the worker blocks on a submission before logging that the
    /// device is slow. `None` waits silently.
    pub completion_timeout: Option<Duration>,
    /// Execution units created up front when a queue is bound. Zero keeps
    /// allocation fully lazy.
    pub prewarm_units: u32,
}

impl Default for TaskQueueDescriptor {
    fn default() -> Self {
        TaskQueueDescriptor {
            label: "forge-task-queue".to_string(),
            completion_timeout: Some(Duration::from_secs(5)),
            prewarm_units: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend_list() {
        assert_eq!(
            parse_backends("soft, vulkan").unwrap(),
            Backends::SOFT | Backends::VULKAN
        );
        assert_eq!(parse_backends("").unwrap(), Backends::empty());
        assert!(matches!(
            parse_backends("soft,glide"),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn unit_sizing() {
        let config = DescriptorPoolConfig::default();
        assert_eq!(config.units_per_block(1), 64);
        assert_eq!(config.units_per_block(4), 64);
        assert_eq!(config.units_per_block(8), 32);
        assert_eq!(config.units_per_block(64), 4);
        assert_eq!(config.units_per_block(300), 1);
        assert!(config.is_pooled(64));
        assert!(!config.is_pooled(65));
    }

    #[test]
    fn validation() {
        assert_eq!(DescriptorPoolConfig::default().validate(), Ok(()));
        let config = DescriptorPoolConfig {
            max_units_per_block: 65,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::BlockCapacity(65)));
        let config = DescriptorPoolConfig {
            descriptors_per_block: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyBlocks));
    }
}
