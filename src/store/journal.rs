// src/store/journal.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::store::run_store::StoreSnapshot;
use crate::types::StorageMode;

/// File name (inside the state directory) of the persisted run store.
///
/// The effective path on disk is `<state_dir>/runs.json`.
pub const RUNS_FILE_NAME: &str = "runs.json";

/// Abstract storage for run store snapshots.
pub trait RunJournal: Send + Sync {
    /// Load the last saved snapshot, if any.
    fn load(&self) -> Result<Option<StoreSnapshot>>;
    /// Replace the saved snapshot.
    fn save(&self, snapshot: &StoreSnapshot) -> Result<()>;
}

/// Keeps nothing; runs are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryJournal;

impl MemoryJournal {
    pub fn new() -> Self {
        Self
    }
}

impl RunJournal for MemoryJournal {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        Ok(None)
    }

    fn save(&self, _snapshot: &StoreSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Stores the snapshot as JSON in `<state_dir>/runs.json`.
#[derive(Debug)]
pub struct FileJournal {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl FileJournal {
    pub fn new(fs: Arc<dyn FileSystem>, state_dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            path: state_dir.as_ref().join(RUNS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunJournal for FileJournal {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.fs.exists(&self.path) {
            info!(path = ?self.path, "no saved runs found; starting empty");
            return Ok(None);
        }

        let contents = self.fs.read_to_string(&self.path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&contents)?;
        info!(
            path = ?self.path,
            runs = snapshot.runs.len(),
            commands = snapshot.commands.len(),
            "loaded saved runs"
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        self.fs.write(&self.path, &bytes)?;
        debug!(path = ?self.path, runs = snapshot.runs.len(), "saved runs");
        Ok(())
    }
}

/// Pick the journal for a storage mode.
pub fn journal_for(
    mode: StorageMode,
    state_dir: impl AsRef<Path>,
    fs: Arc<dyn FileSystem>,
) -> Box<dyn RunJournal> {
    match mode {
        StorageMode::Memory => Box::new(MemoryJournal::new()),
        StorageMode::File => Box::new(FileJournal::new(fs, state_dir)),
    }
}
