// Model persistence behind a narrow port
// The engine only knows these four operations; the storage medium is up to the store

pub mod file_store;
pub mod memory_store;
pub mod model_format;

use async_trait::async_trait;

use crate::error::FedResult;
use crate::reinforcement::ActionValueTable;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use model_format::{
    deserialize_model, serialize_model, ModelMetadata, StoredModel, MODEL_FORMAT_VERSION,
};

/// Storage for trained models.
///
/// `save`/`load` manage the working copy the engine restores from;
/// `export`/`import` move models in and out of the system. Failures of the
/// first three are reported as `false`/`None` and never interrupt training.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    fn save(&self, table: &ActionValueTable, metadata: &ModelMetadata) -> bool;

    fn load(&self) -> Option<StoredModel>;

    fn export(&self, table: &ActionValueTable, metadata: &ModelMetadata) -> bool;

    /// Obtain an externally supplied model
    async fn import(&self) -> FedResult<StoredModel>;
}
