//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use keystash_core::{BackendError, BackendResult, Capabilities, DurableBackend, MemoryBackend};

/// Pause point inside a backend call.
///
/// `entered` fires once the call has done its work; the call returns only
/// after `release` is notified.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Backend wrapper that records writes and can be told to fail.
#[derive(Clone)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    raw_native: bool,
    writes: Arc<Mutex<Vec<Value>>>,
    removes: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    read_gate: Arc<Mutex<Option<Gate>>>,
}

impl RecordingBackend {
    /// A backend that only offers the value path.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A backend that declares raw bytes as its native format.
    pub fn raw_native() -> Self {
        Self::build(true)
    }

    fn build(raw_native: bool) -> Self {
        Self {
            inner: MemoryBackend::new(),
            raw_native,
            writes: Arc::new(Mutex::new(Vec::new())),
            removes: Arc::new(AtomicUsize::new(0)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            read_gate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn shared(&self) -> Arc<dyn DurableBackend> {
        Arc::new(self.clone())
    }

    /// Direct handle that bypasses the recording, like another process would.
    pub fn external(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn writes(&self) -> Vec<Value> {
        self.writes.lock().clone()
    }

    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold the next read after it has fetched its value.
    pub fn pause_next_read(&self) -> Gate {
        let gate = Gate::default();
        *self.read_gate.lock() = Some(gate.clone());
        gate
    }

    async fn after_read(&self) {
        let gate = self.read_gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }

    fn check_read(&self) -> BackendResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> BackendResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl DurableBackend for RecordingBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Value>>> {
        async move {
            self.check_read()?;
            let value = self.inner.get(key).await;
            self.after_read().await;
            value
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_write()?;
            self.writes.lock().push(value.clone());
            self.inner.set(key, value).await
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_write()?;
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(key).await
        }
        .boxed()
    }

    fn get_raw<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Option<Vec<u8>>>> {
        async move {
            self.check_read()?;
            let bytes = self.inner.get_raw(key).await;
            self.after_read().await;
            bytes
        }
        .boxed()
    }

    fn set_raw<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_write()?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| BackendError::Codec(e.to_string()))?;
            self.writes.lock().push(value);
            self.inner.set_raw(key, bytes).await
        }
        .boxed()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            raw_native: self.raw_native,
        }
    }
}

/// Route store logs to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Error handler that collects every error it sees.
pub fn collecting_handler() -> (keystash_core::ErrorHandler, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let handler: keystash_core::ErrorHandler = Arc::new(move |err: &keystash_core::StoreError| {
        seen_clone.lock().push(err.to_string());
    });
    (handler, seen)
}
