use crate::Result;
use kiln_runtime::InstanceOptions;
use kiln_runtime::hal::Device;
use std::sync::Arc;

/// Runtime instance shared by every session of a provider.
#[derive(Debug)]
pub struct Instance {
    instance: kiln_runtime::Instance,
    device: Option<Arc<dyn Device>>,
}

impl Instance {
    /// Create an instance with every driver this runtime was built with.
    pub fn new() -> Result<Self> {
        let mut options = InstanceOptions::new();
        options.use_all_available_drivers();
        Ok(Self {
            instance: kiln_runtime::Instance::create(options)?,
            device: None,
        })
    }

    /// Create the default device for `device_uri`.
    pub fn initialize(&mut self, device_uri: &str) -> Result<()> {
        let device = self.instance.try_create_default_device(device_uri)?;
        tracing::info!(device = device.id(), "initialized runtime device");
        self.device = Some(device);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }

    pub(crate) fn runtime(&self) -> &kiln_runtime::Instance {
        &self.instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_known_device() {
        let mut instance = Instance::new().unwrap();
        assert!(!instance.is_initialized());
        instance.initialize("local-queued://0").unwrap();
        assert_eq!(instance.device().unwrap().id(), "local-queued");
    }

    #[test]
    fn test_unknown_device() {
        let mut instance = Instance::new().unwrap();
        let err = instance.initialize("cuda").unwrap_err();
        assert!(err.to_string().starts_with("Runtime Error: NOT_FOUND; "));
        assert!(!instance.is_initialized());
    }
}
