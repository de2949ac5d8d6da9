use async_trait::async_trait;
use slug::slugify;
use std::path::{Path, PathBuf};
use tracing::info;

use super::DocumentStore;
use crate::error::Result;

/// Files POs into a directory tree on local disk.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: String,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Folder name used on disk for a vendor or other free-text name.
    pub fn folder_name(name: &str) -> String {
        let slug = slugify(name);
        if slug.is_empty() {
            "unnamed".to_string()
        } else {
            slug
        }
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn root(&self) -> &str {
        &self.root
    }

    async fn folder(&self, parent: &str, name: &str) -> Result<String> {
        let path = PathBuf::from(parent).join(Self::folder_name(name));
        tokio::fs::create_dir_all(&path).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        _mime: &str,
    ) -> Result<String> {
        let path = PathBuf::from(folder).join(file_name);
        tokio::fs::write(&path, bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "Stored file locally");
        Ok(path.to_string_lossy().into_owned())
    }
}
