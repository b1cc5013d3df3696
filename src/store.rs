//! Selection persistence through the app config file.

use async_trait::async_trait;
use parking_lot::RwLock;
use sotto_core::{Config, ConfigManager};
use sotto_devices::{DeviceError, Result, SelectionStore};
use tracing::debug;

/// `SelectionStore` backed by the config file. Holds the loaded config in
/// memory and rewrites the whole file on every change, so other settings
/// survive selection updates.
pub struct ConfigSelectionStore {
    manager: ConfigManager,
    config: RwLock<Config>,
}

impl ConfigSelectionStore {
    pub fn new(manager: ConfigManager, config: Config) -> Self {
        Self {
            manager,
            config: RwLock::new(config),
        }
    }
}

#[async_trait]
impl SelectionStore for ConfigSelectionStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.config.read().input_device().map(str::to_string))
    }

    async fn save(&self, id: Option<&str>) -> Result<()> {
        let config = {
            let mut config = self.config.write();
            config.input_device = id.map(str::to_string);
            config.clone()
        };
        self.manager
            .save(&config)
            .map_err(|e| DeviceError::Persistence(e.to_string()))?;
        debug!(device = ?id, "Selection persisted");
        Ok(())
    }
}
