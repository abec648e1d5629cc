// In-process store, used by tests and embedders that persist elsewhere

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use crate::error::{FedError, FedResult};
use crate::persistence::model_format::{deserialize_model, serialize_model};
use crate::persistence::{ModelMetadata, PersistencePort, StoredModel};
use crate::reinforcement::ActionValueTable;

/// Keeps serialized payloads in memory, so everything passes through the
/// same format as on disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<String>>,
    exports: Mutex<Vec<String>>,
    pending_import: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the payload returned by the next `import`
    pub fn queue_import(&self, payload: impl Into<String>) {
        *lock(&self.pending_import) = Some(payload.into());
    }

    /// Raw payload of the working copy
    pub fn saved_payload(&self) -> Option<String> {
        lock(&self.saved).clone()
    }

    pub fn export_count(&self) -> usize {
        lock(&self.exports).len()
    }

    pub fn exports(&self) -> Vec<String> {
        lock(&self.exports).clone()
    }
}

#[async_trait]
impl PersistencePort for MemoryStore {
    fn save(&self, table: &ActionValueTable, metadata: &ModelMetadata) -> bool {
        match serialize_model(table, metadata) {
            Some(json) => {
                *lock(&self.saved) = Some(json);
                true
            }
            None => false,
        }
    }

    fn load(&self) -> Option<StoredModel> {
        let saved = lock(&self.saved);
        saved.as_deref().and_then(deserialize_model)
    }

    fn export(&self, table: &ActionValueTable, metadata: &ModelMetadata) -> bool {
        match serialize_model(table, metadata) {
            Some(json) => {
                lock(&self.exports).push(json);
                true
            }
            None => false,
        }
    }

    async fn import(&self) -> FedResult<StoredModel> {
        let payload = lock(&self.pending_import)
            .take()
            .ok_or_else(|| FedError::persistence("no model queued for import"))?;
        deserialize_model(&payload)
            .ok_or_else(|| FedError::persistence("imported payload is not a valid model"))
    }
}
