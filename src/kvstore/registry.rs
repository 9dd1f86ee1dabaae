use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use super::error::KvError;
use super::types::Driver;

pub type DriverOpenFn = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Driver>, KvError>> + Send>>
        + Send
        + Sync,
>;

/// Maps driver ids (the `driver` member of a JSON config) to async openers.
pub struct DriverRegistry {
    openers: DashMap<String, DriverOpenFn>,
}

impl DriverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            openers: DashMap::new(),
        })
    }

    pub fn register<F, Fut>(&self, driver_id: &str, opener: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Driver>, KvError>> + Send + 'static,
    {
        let open_fn: DriverOpenFn = Arc::new(move |config: serde_json::Value| {
            Box::pin(opener(config))
                as Pin<Box<dyn Future<Output = Result<Arc<dyn Driver>, KvError>> + Send>>
        });

        self.openers.insert(driver_id.to_string(), open_fn);

        tracing::info!("Registered kvstore driver: {}", driver_id);
    }

    /// Opens a store from a JSON config. The `driver` member selects the
    /// registered opener; everything else is interpreted by that driver.
    pub async fn open(&self, config: serde_json::Value) -> Result<Arc<dyn Driver>, KvError> {
        let driver_id = config
            .get("driver")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                KvError::InvalidArgument("config requires a string \"driver\" member".to_string())
            })?;

        let opener = self
            .openers
            .get(driver_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                KvError::InvalidArgument(format!("unknown kvstore driver: {}", driver_id))
            })?;

        opener(config).await
    }

    pub fn has_driver(&self, driver_id: &str) -> bool {
        self.openers.contains_key(driver_id)
    }

    pub fn driver_count(&self) -> usize {
        self.openers.len()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self {
            openers: DashMap::new(),
        }
    }
}
