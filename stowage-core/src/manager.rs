/*!
Named adapter registry.
*/

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::storage::StorageAdapter;
use crate::store::{PersistentStore, StoreOptions};
use crate::{Result, StowageError};

/// Adapters by name, plus which one is the default
///
/// The first adapter registered becomes the default until another is chosen.
#[derive(Default)]
pub struct StorageManager {
    adapters: RwLock<BTreeMap<String, Arc<dyn StorageAdapter>>>,
    default_adapter: RwLock<Option<String>>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("adapters", &self.adapter_names())
            .field("default_adapter", &*self.default_adapter.read())
            .finish()
    }
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any with the same name
    pub fn register_adapter<S: Into<String>>(&self, name: S, adapter: Arc<dyn StorageAdapter>) {
        let name = name.into();
        self.adapters.write().insert(name.clone(), adapter);

        let mut default = self.default_adapter.write();
        if default.is_none() {
            *default = Some(name.clone());
        }
        info!(adapter = %name, "Registered storage adapter");
    }

    /// Remove an adapter; removing the default leaves no default set
    pub fn unregister_adapter(&self, name: &str) -> Option<Arc<dyn StorageAdapter>> {
        let removed = self.adapters.write().remove(name);
        let mut default = self.default_adapter.write();
        if default.as_deref() == Some(name) {
            *default = None;
        }
        removed
    }

    /// Look up an adapter by name, or the default when no name is given
    pub fn get_adapter(&self, name: Option<&str>) -> Result<Arc<dyn StorageAdapter>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .default_adapter
                .read()
                .clone()
                .ok_or_else(|| StowageError::validation("No default storage adapter is set"))?,
        };
        self.adapters.read().get(&name).cloned().ok_or_else(|| {
            StowageError::validation(format!("No storage adapter registered as '{name}'"))
        })
    }

    pub fn set_default_adapter(&self, name: &str) -> Result<()> {
        if !self.adapters.read().contains_key(name) {
            return Err(StowageError::validation(format!(
                "Cannot make unknown adapter '{name}' the default"
            )));
        }
        *self.default_adapter.write() = Some(name.to_string());
        Ok(())
    }

    pub fn default_adapter_name(&self) -> Option<String> {
        self.default_adapter.read().clone()
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.read().keys().cloned().collect()
    }

    /// Bind a store to `key` on the named (or default) adapter
    pub fn create_store<T>(
        &self,
        key: &str,
        adapter_name: Option<&str>,
        options: StoreOptions,
    ) -> Result<PersistentStore<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let adapter = self.get_adapter(adapter_name)?;
        Ok(PersistentStore::new(adapter, key, options))
    }

    /// Clear every adapter
    ///
    /// Every adapter is attempted; the first failure is returned afterwards.
    pub async fn clear_all(&self) -> Result<()> {
        let adapters: Vec<(String, Arc<dyn StorageAdapter>)> = self
            .adapters
            .read()
            .iter()
            .map(|(name, adapter)| (name.clone(), adapter.clone()))
            .collect();

        let mut first_error = None;
        for (name, adapter) in adapters {
            if let Err(e) = adapter.clear().await {
                error!(adapter = %name, error = %e, "Failed to clear adapter");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
