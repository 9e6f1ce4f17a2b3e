//! Best-effort thumbnail downloads.
//!
//! Files are named after a hash of the source URL, so a URL is only ever
//! downloaded once per media directory.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::remote::CatalogApi;

#[derive(Debug, Clone, Default)]
pub struct ThumbnailStore {
    dir: Option<PathBuf>,
}

impl ThumbnailStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Path a URL is stored under, or `None` when downloads are disabled.
    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(file_name(url)))
    }

    /// Make sure the image at `url` is on disk and return where it lives.
    pub async fn ensure(
        &self,
        api: &dyn CatalogApi,
        url: &str,
    ) -> Result<Option<PathBuf>, SyncError> {
        let Some(path) = self.path_for(url) else {
            return Ok(None);
        };

        if tokio::fs::try_exists(&path).await? {
            return Ok(Some(path));
        }

        let bytes = api.download_image(url).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomically(&path, &bytes).await?;

        tracing::debug!(url, path = %path.display(), bytes = bytes.len(), "Thumbnail stored");
        Ok(Some(path))
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

fn file_name(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let extension = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif"))
        .unwrap_or_else(|| "img".to_string());
    format!("{}.{extension}", &digest[..32])
}
