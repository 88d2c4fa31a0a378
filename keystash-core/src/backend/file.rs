//! Directory-backed backend: one file per key.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::fs;
use tracing::trace;

use super::{Capabilities, DurableBackend, ValueCodec};
use crate::error::BackendResult;

/// Extension of a fully written entry.
const ENTRY_EXT: &str = "val";

/// Suffix of an entry that is still being written.
const TEMP_SUFFIX: &str = ".tmp";

/// Durable backend that keeps every key in its own file under `root`.
///
/// File names are the hex encoding of the key, so any string is a valid key.
/// Writes go to a uniquely named temporary sibling first and are renamed
/// into place, so a reader never observes a half-written entry and
/// concurrent writers never share a temporary file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    codec: ValueCodec,
}

impl FileBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl AsRef<Path>) -> BackendResult<Self> {
        Self::open_with_codec(root, ValueCodec::default()).await
    }

    pub async fn open_with_codec(root: impl AsRef<Path>, codec: ValueCodec) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, codec })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXT}", hex::encode(key.as_bytes())))
    }

    async fn read_bytes(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        match fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_bytes(&self, key: &str, bytes: Vec<u8>) -> BackendResult<()> {
        let root = self.root.clone();
        let target = self.entry_path(key);
        let len = bytes.len();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut temp = tempfile::Builder::new()
                .suffix(TEMP_SUFFIX)
                .tempfile_in(&root)?;
            temp.write_all(&bytes)?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        trace!(key, len, "file entry written");
        Ok(())
    }
}

impl DurableBackend for FileBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Value>>> {
        async move {
            match self.read_bytes(key).await? {
                Some(bytes) => self.codec.decode(&bytes).map(Some),
                None => Ok(None),
            }
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            let bytes = self.codec.encode(&value)?;
            self.write_bytes(key, bytes).await
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            match fs::remove_file(self.entry_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn get_raw<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Vec<u8>>>> {
        self.read_bytes(key).boxed()
    }

    fn set_raw<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, BackendResult<()>> {
        self.write_bytes(key, bytes).boxed()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { raw_native: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn values_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();

        let backend = FileBackend::open(dir.path()).await.unwrap();
        backend
            .set("settings/theme", json!({ "mode": "dark" }))
            .await
            .unwrap();
        drop(backend);

        let reopened = FileBackend::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("settings/theme").await.unwrap(),
            Some(json!({ "mode": "dark" }))
        );
    }

    #[tokio::test]
    async fn keys_with_path_separators_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        backend.set("../escape", json!(1)).await.unwrap();

        let expected = dir.path().join(format!("{}.val", hex::encode("../escape")));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        backend.set("k", json!("v")).await.unwrap();

        backend.remove("k").await.unwrap();
        backend.remove("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_to_one_key_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileBackend::open(dir.path()).await.unwrap();
        let b = FileBackend::open(dir.path()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let backend = if i % 2 == 0 { a.clone() } else { b.clone() };
            tasks.push(tokio::spawn(async move {
                backend.set("shared", json!(i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = a.get("shared").await.unwrap().unwrap();
        assert!(stored.as_i64().is_some_and(|n| (0..32).contains(&n)));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn message_pack_entries_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open_with_codec(dir.path(), ValueCodec::MessagePack)
            .await
            .unwrap();
        let value = json!([1, "two", { "three": 3 }]);
        backend.set("list", value.clone()).await.unwrap();
        assert_eq!(backend.get("list").await.unwrap(), Some(value));
    }
}
