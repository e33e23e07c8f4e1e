//! Filesystem delivery destination.
//!
//! Copies the artifact into a target directory. Doubles as the reference
//! adapter implementation and as the on-prem "network share" destination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Delivery, DestinationAdapter};
use crate::pipeline::error::StageError;

/// Delivers documents into a local (or mounted) directory.
pub struct DirectoryDestination {
    target_dir: PathBuf,
}

impl DirectoryDestination {
    pub fn new(target_dir: PathBuf) -> Self {
        Self { target_dir }
    }
}

#[async_trait]
impl DestinationAdapter for DirectoryDestination {
    async fn deliver(
        &self,
        path: &Path,
        metadata: &serde_json::Value,
    ) -> Result<Delivery, StageError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| StageError::permanent("payload has no file name"))?;

        tokio::fs::create_dir_all(&self.target_dir).await?;
        let target = self.target_dir.join(file_name);
        tokio::fs::copy(path, &target).await?;

        // Ship the metadata alongside the document when there is any.
        if metadata.as_object().is_some_and(|m| !m.is_empty()) {
            let sidecar = target.with_extension("metadata.json");
            let body = serde_json::to_vec_pretty(metadata)
                .map_err(|e| StageError::permanent(format!("unserializable metadata: {e}")))?;
            tokio::fs::write(&sidecar, body).await?;
        }

        Ok(Delivery {
            remote_path: target.display().to_string(),
        })
    }
}
