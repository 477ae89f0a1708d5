//! In-memory artifact store.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::ids::{ArtifactId, RunId};
use gantry_core::ports::{ArtifactMeta, ArtifactStore};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct StoredArtifact {
    meta: ArtifactMeta,
    files: Vec<(String, Vec<u8>)>,
}

/// Keeps artifacts per run, keyed by name. Publishing under an existing
/// name replaces the previous artifact.
#[derive(Clone, Default)]
pub struct MemArtifactStore {
    artifacts: Arc<RwLock<HashMap<RunId, HashMap<String, StoredArtifact>>>>,
}

impl MemArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemArtifactStore {
    async fn publish(
        &self,
        run_id: RunId,
        name: &str,
        files: Vec<(String, Vec<u8>)>,
        retention_days: u32,
    ) -> Result<ArtifactMeta> {
        let size_bytes = files.iter().map(|(_, data)| data.len() as u64).sum();
        let meta = ArtifactMeta {
            id: ArtifactId::new(),
            run_id,
            name: name.to_string(),
            size_bytes,
            retention_days,
            created_at: Utc::now(),
        };

        self.artifacts
            .write()
            .await
            .entry(run_id)
            .or_default()
            .insert(
                name.to_string(),
                StoredArtifact {
                    meta: meta.clone(),
                    files,
                },
            );

        Ok(meta)
    }

    async fn download(
        &self,
        run_id: RunId,
        name: &str,
    ) -> Result<(ArtifactMeta, Vec<(String, Vec<u8>)>)> {
        self.artifacts
            .read()
            .await
            .get(&run_id)
            .and_then(|by_name| by_name.get(name))
            .map(|a| (a.meta.clone(), a.files.clone()))
            .ok_or_else(|| Error::ArtifactNotFound(name.to_string()))
    }

    async fn list(&self, run_id: RunId) -> Result<Vec<ArtifactMeta>> {
        let artifacts = self.artifacts.read().await;
        let mut metas: Vec<ArtifactMeta> = artifacts
            .get(&run_id)
            .map(|by_name| by_name.values().map(|a| a.meta.clone()).collect())
            .unwrap_or_default();
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_replaces_same_name() {
        let store = MemArtifactStore::new();
        let run_id = RunId::new();

        store
            .publish(run_id, "wheel", vec![("a.whl".into(), vec![1])], 30)
            .await
            .unwrap();
        store
            .publish(run_id, "wheel", vec![("b.whl".into(), vec![2, 3])], 30)
            .await
            .unwrap();

        let (meta, files) = store.download(run_id, "wheel").await.unwrap();
        assert_eq!(meta.size_bytes, 2);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "b.whl");
        assert_eq!(store.list(run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_download_missing_artifact() {
        let store = MemArtifactStore::new();
        assert!(store.download(RunId::new(), "wheel").await.is_err());
    }
}
