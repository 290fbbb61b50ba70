//! Runtime instance: the set of registered drivers.

use crate::hal::{Device, LOCAL_QUEUED_DRIVER, LOCAL_SYNC_DRIVER, LocalQueuedDevice, LocalSyncDevice};
use crate::{Result, RuntimeError};
use std::sync::Arc;

/// Drivers compiled into this runtime.
pub const AVAILABLE_DRIVERS: [&str; 2] = [LOCAL_SYNC_DRIVER, LOCAL_QUEUED_DRIVER];

#[derive(Debug, Clone, Default)]
pub struct InstanceOptions {
    drivers: Vec<String>,
}

impl InstanceOptions {
    /// Options with no drivers registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_all_available_drivers(&mut self) -> &mut Self {
        self.drivers = AVAILABLE_DRIVERS.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_driver(&mut self, driver: impl Into<String>) -> &mut Self {
        let driver = driver.into();
        if !self.drivers.contains(&driver) {
            self.drivers.push(driver);
        }
        self
    }

    pub fn drivers(&self) -> &[String] {
        &self.drivers
    }
}

#[derive(Debug)]
pub struct Instance {
    options: InstanceOptions,
}

impl Instance {
    pub fn create(options: InstanceOptions) -> Result<Self> {
        if let Some(unknown) = options
            .drivers
            .iter()
            .find(|d| !AVAILABLE_DRIVERS.contains(&d.as_str()))
        {
            return Err(RuntimeError::NotFound(format!(
                "driver '{}' is not available in this runtime",
                unknown
            )));
        }
        tracing::debug!(drivers = ?options.drivers, "created runtime instance");
        Ok(Self { options })
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }

    /// Create the default device for `uri`, e.g. `local-sync` or
    /// `local-queued://0`. Only the scheme selects the driver.
    pub fn try_create_default_device(&self, uri: &str) -> Result<Arc<dyn Device>> {
        let driver = uri.split_once("://").map_or(uri, |(scheme, _)| scheme);
        if !self.options.drivers.iter().any(|d| d == driver) {
            return Err(RuntimeError::NotFound(format!(
                "no driver registered for device '{}'",
                uri
            )));
        }
        let device: Arc<dyn Device> = match driver {
            LOCAL_SYNC_DRIVER => Arc::new(LocalSyncDevice::new()),
            LOCAL_QUEUED_DRIVER => Arc::new(LocalQueuedDevice::new()?),
            other => {
                return Err(RuntimeError::NotFound(format!(
                    "driver '{}' has no default device",
                    other
                )));
            }
        };
        tracing::debug!(uri, driver, "created device");
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        let mut options = InstanceOptions::new();
        options.use_all_available_drivers();
        Instance::create(options).unwrap()
    }

    #[test]
    fn test_default_devices() {
        let instance = instance();
        assert_eq!(
            instance.try_create_default_device("local-sync").unwrap().id(),
            "local-sync"
        );
        let queued = instance
            .try_create_default_device("local-queued://0")
            .unwrap();
        assert!(!queued.capabilities().host_mappable_memory);
    }

    #[test]
    fn test_unknown_device() {
        let err = instance().try_create_default_device("cuda").unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
        assert!(err.to_string().starts_with("NOT_FOUND;"));
    }

    #[test]
    fn test_unregistered_driver() {
        let mut options = InstanceOptions::new();
        options.with_driver(LOCAL_SYNC_DRIVER);
        let instance = Instance::create(options).unwrap();
        assert!(instance.try_create_default_device("local-queued").is_err());

        let mut options = InstanceOptions::new();
        options.with_driver("vulkan");
        assert!(Instance::create(options).is_err());
    }
}
