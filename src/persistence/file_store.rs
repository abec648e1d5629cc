// JSON files on the local filesystem

use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{map_io_err, FedError, FedResult};
use crate::persistence::model_format::{deserialize_model, serialize_model};
use crate::persistence::{ModelMetadata, PersistencePort, StoredModel};
use crate::reinforcement::ActionValueTable;

const MODEL_FILE: &str = "model.json";
const EXPORT_PREFIX: &str = "fedrl-model-";

/// Stores the working model as `model.json` and exports as timestamped files
/// in one directory
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
    import_path: Option<PathBuf>,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            import_path: None,
        }
    }

    /// Import from this file instead of the newest export
    pub fn with_import_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_path = Some(path.into());
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn model_path(&self) -> PathBuf {
        self.directory.join(MODEL_FILE)
    }

    /// Write `contents` to a temporary file, then rename it over `path`
    fn write_atomic(&self, path: &Path, contents: &str) -> FedResult<()> {
        fs::create_dir_all(&self.directory).map_err(map_io_err(&self.directory))?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).map_err(map_io_err(&temp_path))?;
        file.write_all(contents.as_bytes())
            .map_err(map_io_err(&temp_path))?;
        file.sync_all().map_err(map_io_err(&temp_path))?;
        drop(file);

        fs::rename(&temp_path, path).map_err(map_io_err(path))?;
        Ok(())
    }

    fn write_model(&self, path: &Path, table: &ActionValueTable, metadata: &ModelMetadata) -> bool {
        let Some(json) = serialize_model(table, metadata) else {
            return false;
        };
        match self.write_atomic(path, &json) {
            Ok(()) => {
                info!("Saved model with {} states to {}", table.len(), path.display());
                true
            }
            Err(e) => {
                warn!("Failed to write model to {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Most recent export in the directory, by file name
    fn latest_export(&self) -> FedResult<PathBuf> {
        let entries = fs::read_dir(&self.directory).map_err(map_io_err(&self.directory))?;
        entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(EXPORT_PREFIX) && n.ends_with(".json"))
            })
            .max()
            .ok_or_else(|| {
                FedError::persistence(format!(
                    "no exported model found in {}",
                    self.directory.display()
                ))
            })
    }
}

#[async_trait]
impl PersistencePort for FileStore {
    fn save(&self, table: &ActionValueTable, metadata: &ModelMetadata) -> bool {
        self.write_model(&self.model_path(), table, metadata)
    }

    fn load(&self) -> Option<StoredModel> {
        let path = self.model_path();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                debug!("No stored model at {}: {}", path.display(), e);
                return None;
            }
        };
        deserialize_model(&json)
    }

    fn export(&self, table: &ActionValueTable, metadata: &ModelMetadata) -> bool {
        let name = format!(
            "{}{}.json",
            EXPORT_PREFIX,
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        );
        self.write_model(&self.directory.join(name), table, metadata)
    }

    async fn import(&self) -> FedResult<StoredModel> {
        let path = match &self.import_path {
            Some(path) => path.clone(),
            None => self.latest_export()?,
        };

        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(map_io_err(&path))?;

        let stored = deserialize_model(&json).ok_or_else(|| {
            FedError::persistence(format!("{} does not contain a valid model", path.display()))
        })?;
        info!(
            "Imported model with {} states from {}",
            stored.table.len(),
            path.display()
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table() -> ActionValueTable {
        ActionValueTable::from_rows(2, [("s".to_string(), vec![1.0, 2.0])]).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("models"));

        assert!(store.load().is_none());
        assert!(store.save(&table(), &ModelMetadata::default()));
        assert!(store.model_path().exists());
        assert!(!dir.path().join("models/model.json.tmp").exists());

        let stored = store.load().unwrap();
        assert_eq!(stored.table, table());
    }

    #[test]
    fn test_corrupt_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(store.model_path(), "{\"model\": {}}").unwrap();
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_export_then_import_latest() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.import().await.is_err());

        assert!(store.export(&table(), &ModelMetadata::default().with("note", "first")));
        let stored = store.import().await.unwrap();
        assert_eq!(stored.table, table());
        assert_eq!(stored.metadata.extra["note"], "first");
    }

    #[tokio::test]
    async fn test_import_from_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("external.json");
        fs::write(&path, r#"{"version": "1.0", "model": {"x": [0.5]}}"#).unwrap();

        let store = FileStore::new(dir.path().join("store")).with_import_path(&path);
        let stored = store.import().await.unwrap();
        assert_eq!(stored.table.value("x", 0), 0.5);

        fs::write(&path, "garbage").unwrap();
        assert!(matches!(
            store.import().await,
            Err(FedError::Persistence { .. })
        ));
    }
}
