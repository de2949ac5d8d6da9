// src/storage/mod.rs

mod drive;
mod local;

pub use drive::{DriveClient, DriveCounter};
pub use local::LocalStore;

use async_trait::async_trait;

use crate::error::Result;

pub const PDF_MIME: &str = "application/pdf";

/// A folder tree that issued POs are filed into.
///
/// Folder and file handles are opaque strings: drive IDs for the cloud
/// store, paths for the local one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Handle of the top-level "Purchase Orders" folder.
    fn root(&self) -> &str;

    /// Looks up `name` under `parent`, creating it when absent.
    async fn folder(&self, parent: &str, name: &str) -> Result<String>;

    /// Stores `bytes` as `file_name` in `folder` and returns the new file's handle.
    async fn upload(&self, folder: &str, file_name: &str, bytes: &[u8], mime: &str)
    -> Result<String>;
}
