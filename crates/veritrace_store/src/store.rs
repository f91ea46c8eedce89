//! Trace store implementations.

use crate::error::StoreError;
use crate::format::{FILE_EXTENSION, decode_trace, encode_trace};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use veritrace_core::TraceId;
use veritrace_trace::TraceRecord;

/// Append-only trace storage shared across jobs.
///
/// Implementations never overwrite an existing id. Methods block on
/// storage I/O; async callers run them through `spawn_blocking`.
pub trait TraceStore: Send + Sync {
    /// Store `trace` under `id`
    ///
    /// # Errors
    ///
    /// Returns `IdCollision` if `id` is taken
    fn insert(&self, id: TraceId, trace: &TraceRecord) -> Result<(), StoreError>;

    /// Read a trace
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a decoding error for file-backed stores
    fn read(&self, id: &TraceId) -> Result<TraceRecord, StoreError>;

    /// Whether `id` is stored
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be queried
    fn contains(&self, id: &TraceId) -> Result<bool, StoreError>;

    /// All stored ids, sorted
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be listed
    fn list(&self) -> Result<Vec<TraceId>, StoreError>;

    /// Store `trace` under a fresh id
    ///
    /// # Errors
    ///
    /// Returns any [`TraceStore::insert`] error
    fn write(&self, trace: &TraceRecord) -> Result<TraceId, StoreError> {
        let id = TraceId::new();
        self.insert(id, trace)?;
        Ok(id)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryTraceStore {
    traces: RwLock<BTreeMap<TraceId, Arc<TraceRecord>>>,
}

impl MemoryTraceStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored traces
    ///
    /// # Errors
    ///
    /// Returns `Poisoned` if a writer panicked
    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.traces.read().map_err(|_| StoreError::Poisoned)?.len())
    }
}

impl TraceStore for MemoryTraceStore {
    fn insert(&self, id: TraceId, trace: &TraceRecord) -> Result<(), StoreError> {
        let mut traces = self.traces.write().map_err(|_| StoreError::Poisoned)?;
        if traces.contains_key(&id) {
            return Err(StoreError::IdCollision { id });
        }
        traces.insert(id, Arc::new(trace.clone()));
        debug!(%id, events = trace.len(), "trace stored in memory");
        Ok(())
    }

    fn read(&self, id: &TraceId) -> Result<TraceRecord, StoreError> {
        let traces = self.traces.read().map_err(|_| StoreError::Poisoned)?;
        traces
            .get(id)
            .map(|t| t.as_ref().clone())
            .ok_or(StoreError::NotFound { id: *id })
    }

    fn contains(&self, id: &TraceId) -> Result<bool, StoreError> {
        let traces = self.traces.read().map_err(|_| StoreError::Poisoned)?;
        Ok(traces.contains_key(id))
    }

    fn list(&self) -> Result<Vec<TraceId>, StoreError> {
        let traces = self.traces.read().map_err(|_| StoreError::Poisoned)?;
        Ok(traces.keys().copied().collect())
    }
}

/// One file per trace under a directory: `<trace-id>.vtrace`.
///
/// Files are written under a temporary name and hard-linked into place, so
/// readers never see a partial file and an existing id is never replaced.
#[derive(Debug, Clone)]
pub struct FsTraceStore {
    root: PathBuf,
}

impl FsTraceStore {
    /// Open a store, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for an id
    #[must_use]
    pub fn path_for(&self, id: &TraceId) -> PathBuf {
        self.root.join(format!("{id}.{FILE_EXTENSION}"))
    }
}

impl TraceStore for FsTraceStore {
    fn insert(&self, id: TraceId, trace: &TraceRecord) -> Result<(), StoreError> {
        let bytes = encode_trace(trace)?;
        let target = self.path_for(&id);

        let mut staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&self.root)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;

        match std::fs::hard_link(staged.path(), &target) {
            Ok(()) => {
                debug!(%id, path = %target.display(), bytes = bytes.len(), "trace stored");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(%id, "trace id collision");
                Err(StoreError::IdCollision { id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, id: &TraceId) -> Result<TraceRecord, StoreError> {
        match std::fs::read(self.path_for(id)) {
            Ok(bytes) => decode_trace(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound { id: *id })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, id: &TraceId) -> Result<bool, StoreError> {
        Ok(self.path_for(id).try_exists()?)
    }

    fn list(&self) -> Result<Vec<TraceId>, StoreError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<TraceId>) {
                Some(Ok(id)) => ids.push(id),
                _ => debug!(path = %path.display(), "ignoring foreign file in store"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
