//! Durable Backends
//!
//! A backend is the asynchronous key/value map a store persists to and polls
//! from. Every backend is consumed through the same object-safe
//! [`DurableBackend`] trait, so the store engine is written once regardless of
//! the storage medium.
//!
//! # Value and raw paths
//!
//! `get`/`set` exchange decoded [`serde_json::Value`]s and leave the on-disk
//! representation to the backend. `get_raw`/`set_raw` exchange bytes that the
//! backend stores verbatim. A backend advertises through
//! [`Capabilities::raw_native`] whether the raw path is its native format; the
//! store then encodes values itself with its configured [`ValueCodec`] and
//! skips the backend's own encoding step.

mod codec;
mod file;
mod memory;

pub use codec::ValueCodec;
pub use file::FileBackend;
pub use memory::MemoryBackend;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::BackendResult;

/// What a backend declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Bytes given to `set_raw` are stored as-is and are the backend's
    /// native representation.
    pub raw_native: bool,
}

/// Asynchronous key/value storage consumed by the store engine.
///
/// Implementations must be safe to share between every store and caller in
/// the process; no store assumes exclusive access.
pub trait DurableBackend: Send + Sync {
    /// Read the value stored under `key`, `None` if absent.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Value>>>;

    /// Store `value` under `key`, replacing any previous entry.
    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, BackendResult<()>>;

    /// Delete the entry under `key`. Removing an absent key is not an error.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<()>>;

    /// Read the stored bytes without decoding them.
    fn get_raw<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Vec<u8>>>>;

    /// Store bytes without any additional encoding.
    fn set_raw<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, BackendResult<()>>;

    /// Declared capabilities. Defaults to none.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}
