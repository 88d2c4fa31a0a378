//! In-memory backend.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use super::{Capabilities, DurableBackend, ValueCodec};
use crate::error::BackendResult;

/// Process-local backend over a shared concurrent map of encoded bytes.
///
/// Cloning the handle shares the underlying map, so a clone behaves like a
/// second writer (another tab, another process) that bypasses every store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, Vec<u8>>>,
    codec: ValueCodec,
}

impl MemoryBackend {
    /// Create an empty backend that encodes values as JSON.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend with the given value encoding.
    #[must_use]
    pub fn with_codec(codec: ValueCodec) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            codec,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl DurableBackend for MemoryBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Value>>> {
        async move {
            // Clone the bytes out so the shard lock is not held while decoding.
            let bytes = self.entries.get(key).map(|entry| entry.value().clone());
            bytes.map(|bytes| self.codec.decode(&bytes)).transpose()
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            let bytes = self.codec.encode(&value)?;
            self.entries.insert(key.to_string(), bytes);
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.entries.remove(key);
            Ok(())
        }
        .boxed()
    }

    fn get_raw<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Vec<u8>>>> {
        async move { Ok(self.entries.get(key).map(|entry| entry.value().clone())) }.boxed()
    }

    fn set_raw<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.entries.insert(key.to_string(), bytes);
            Ok(())
        }
        .boxed()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { raw_native: true }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.len())
            .field("codec", &self.codec)
            .finish()
    }
}
