use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use futures::future::BoxFuture;
use tokio::fs;
use tracing::debug;

use crate::dao::{
    file_store::FileStore,
    storage::{StorageError, StorageResult},
};

/// File backend storing each logical file inside one configuration directory.
#[derive(Clone, Debug)]
pub struct YamlDirStore {
    root: Arc<PathBuf>,
}

impl YamlDirStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    /// Directory holding the logical files.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl FileStore for YamlDirStore {
    fn read(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let path = self.path_for(key);
        Box::pin(async move {
            match fs::read_to_string(&path).await {
                Ok(contents) => Ok(Some(contents)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(source) => Err(StorageError::Read { path, source }),
            }
        })
    }

    fn write(&self, key: &str, contents: String) -> BoxFuture<'static, StorageResult<()>> {
        let root = self.root.clone();
        let path = self.path_for(key);
        Box::pin(async move {
            fs::create_dir_all(root.as_ref())
                .await
                .map_err(|source| StorageError::Write {
                    path: root.as_ref().clone(),
                    source,
                })?;

            // Write to a sibling temp file first so a crash never leaves a truncated shard.
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, contents.as_bytes())
                .await
                .map_err(|source| StorageError::Write {
                    path: tmp.clone(),
                    source,
                })?;
            fs::rename(&tmp, &path)
                .await
                .map_err(|source| StorageError::Write {
                    path: path.clone(),
                    source,
                })?;

            debug!(path = %path.display(), bytes = contents.len(), "file written");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlDirStore::new(dir.path());
        assert!(store.read("absent.yml").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_creates_directory_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlDirStore::new(dir.path().join("nested"));

        store
            .write("3-servers.yml", "servers: []\n".to_string())
            .await
            .unwrap();

        let contents = store.read("3-servers.yml").await.unwrap();
        assert_eq!(contents.as_deref(), Some("servers: []\n"));
        assert!(!dir.path().join("nested/3-servers.tmp").exists());
    }
}
