use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use hwpolicy_core::{PolicySnapshot, PolicyState, PolicyWeights};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-disk form of a policy state: `{"v": .., "w": {..}, "h": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPolicy {
    #[serde(rename = "v")]
    pub version: u64,
    #[serde(rename = "w")]
    pub weights: PolicyWeights,
    #[serde(rename = "h", default)]
    pub history: Vec<PolicySnapshot>,
}

impl PersistedPolicy {
    /// Rebuilds the in-memory state; the flag reports whether repairs were needed.
    pub fn into_state(self) -> (PolicyState, bool) {
        PolicyState::restore(self.version, self.weights, self.history)
    }
}

impl From<&PolicyState> for PersistedPolicy {
    fn from(state: &PolicyState) -> Self {
        Self {
            version: state.current_version(),
            weights: state.current_weights(),
            history: state.history().to_vec(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt persisted state at {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("persistence timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("persistence worker exited without reporting")]
    WorkerLost,
}

/// Durable home for the policy state. Implementations must be safe to call
/// from several threads; callers serialize writes themselves.
pub trait PolicyStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means nothing has been stored yet.
    fn load(&self) -> Result<Option<PersistedPolicy>, StorageError>;

    fn save(&self, policy: &PersistedPolicy) -> Result<(), StorageError>;

    /// Drops whatever is stored so the next `load` returns `None`.
    fn clear(&self) -> Result<(), StorageError>;
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(1);

/// Single JSON document replaced atomically: every save writes a sibling
/// temp file, syncs it, and renames it over the target.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "policy-state.json".to_string());
        self.path
            .with_file_name(format!(".{file_name}.{}.{seq}.tmp", std::process::id()))
    }
}

impl PolicyStore for JsonFileStore {
    fn name(&self) -> &'static str {
        "json-file"
    }

    fn load(&self) -> Result<Option<PersistedPolicy>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StorageError::Corrupt {
                path: self.path.display().to_string(),
                reason: err.to_string(),
            })
    }

    fn save(&self, policy: &PersistedPolicy) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(policy)?;
        let tmp = self.temp_path();
        let written = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        tracing::debug!(
            path = %self.path.display(),
            version = policy.version,
            bytes = bytes.len(),
            "policy state written"
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Process-local store for tests and embedders that manage durability elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<PersistedPolicy>>,
    saves: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<PersistedPolicy> {
        self.slot.lock().clone()
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

impl PolicyStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<Option<PersistedPolicy>, StorageError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, policy: &PersistedPolicy) -> Result<(), StorageError> {
        *self.slot.lock() = Some(policy.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock() = None;
        Ok(())
    }
}
