//! On-disk record of simulated resources

use crate::error::{LocalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_core::Attributes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// A simulated resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    resources: BTreeMap<String, RemoteResource>,
}

/// JSON file of every simulated resource, keyed by provider id
///
/// Each operation is a read-modify-write of the whole file under an
/// in-process mutex.
#[derive(Debug)]
pub struct ResourceStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl ResourceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, id: &str) -> Result<Option<RemoteResource>> {
        let _guard = self.guard.lock().await;
        Ok(self.load().await?.resources.remove(id))
    }

    pub async fn list(&self) -> Result<BTreeMap<String, RemoteResource>> {
        let _guard = self.guard.lock().await;
        Ok(self.load().await?.resources)
    }

    pub async fn insert(&self, id: &str, resource: RemoteResource) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut file = self.load().await?;
        file.resources.insert(id.to_string(), resource);
        self.save(&file).await
    }

    /// Replace the attributes of an existing resource
    pub async fn update(&self, id: &str, attributes: Attributes) -> Result<RemoteResource> {
        let _guard = self.guard.lock().await;
        let mut file = self.load().await?;
        let resource = file
            .resources
            .get_mut(id)
            .ok_or_else(|| LocalError::ResourceNotFound(id.to_string()))?;
        resource.attributes = attributes;
        let updated = resource.clone();
        self.save(&file).await?;
        Ok(updated)
    }

    /// Remove a resource; `false` if it did not exist
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.guard.lock().await;
        let mut file = self.load().await?;
        let existed = file.resources.remove(id).is_some();
        if existed {
            self.save(&file).await?;
        }
        Ok(existed)
    }

    async fn load(&self) -> Result<StoreFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, file: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(file)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), resources = file.resources.len(), "Saved resource store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(resource_type: &str) -> RemoteResource {
        let mut attributes = Attributes::new();
        attributes.insert("cidr_block".to_string(), json!("10.0.0.0/16"));
        RemoteResource {
            resource_type: resource_type.to_string(),
            attributes,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::new(dir.path().join("resources.json"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get("vpc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_update_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("resources.json");
        let store = ResourceStore::new(&path);

        store.insert("vpc-1", resource("aws_vpc")).await.unwrap();
        assert!(path.exists());

        let mut attributes = Attributes::new();
        attributes.insert("cidr_block".to_string(), json!("10.1.0.0/16"));
        let updated = store.update("vpc-1", attributes).await.unwrap();
        assert_eq!(updated.attributes["cidr_block"], json!("10.1.0.0/16"));

        // A fresh handle sees the persisted data
        let reopened = ResourceStore::new(&path);
        assert_eq!(reopened.get("vpc-1").await.unwrap(), Some(updated));

        assert!(store.remove("vpc-1").await.unwrap());
        assert!(!store.remove("vpc-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::new(dir.path().join("resources.json"));
        assert!(matches!(
            store.update("nope", Attributes::new()).await,
            Err(LocalError::ResourceNotFound(_))
        ));
    }
}
