//! Directory-backed document store.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{DocumentStore, Result};
use crate::error::RemoteError;
use crate::models::receipt::SourceItem;

/// A document store rooted at a local directory.
///
/// Folders are subdirectories of the root; entry ids are `folder/name` paths
/// relative to the root.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative id, refusing anything that could leave the root.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        let contained = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if relative.is_empty() || !contained {
            return Err(RemoteError::NotFound(relative.to_string()));
        }
        Ok(self.root.join(path))
    }
}

fn map_io(err: std::io::Error, id: &str) -> RemoteError {
    if err.kind() == IoErrorKind::NotFound {
        RemoteError::NotFound(id.to_string())
    } else {
        RemoteError::Io(err)
    }
}

fn mime_for(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        let Ok(path) = self.resolve(name) else {
            return Ok(None);
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(name.to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(RemoteError::Io(e)),
        }
    }

    async fn list(&self, folder_id: &str) -> Result<Vec<SourceItem>> {
        let dir = self.resolve(folder_id)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io(e, folder_id))?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let mut item = SourceItem::new(format!("{}/{}", folder_id, name), name.as_str());
            if let Some(mime) = mime_for(&name) {
                item = item.with_mime_type(mime);
            }
            items.push(item);
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} entries in {}", items.len(), dir.display());
        Ok(items)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(id)?;
        tokio::fs::read(&path).await.map_err(|e| map_io(e, id))
    }

    async fn upload(
        &self,
        name: &str,
        _mime_type: &str,
        data: &[u8],
        folder_id: &str,
    ) -> Result<String> {
        let id = format!("{}/{}", folder_id, name);
        // The name must be a single path component
        if Path::new(name).components().count() != 1 {
            return Err(RemoteError::NotFound(id));
        }

        let path = self.resolve(&id)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| map_io(e, &id))?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.resolve(id)?;
        tokio::fs::remove_file(&path).await.map_err(|e| map_io(e, id))
    }
}
