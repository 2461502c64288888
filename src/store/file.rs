use super::*;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Checkpoints stored as one JSON file per room, so a restarted process can resume rounds
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create the store, making sure the directory exists
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, room_id: &str) -> PathBuf {
        // Room ids come from outside; keep them from escaping the directory
        let safe: String = room_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_checkpoint(&self, machine: &PhaseMachine) -> StoreResult<()> {
        let path = self.path_for(&machine.room_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(machine)?;

        // Write-then-rename so a crash never leaves a half-written checkpoint
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_checkpoint(&self, room_id: &str) -> StoreResult<Option<PhaseMachine>> {
        match tokio::fs::read(self.path_for(room_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_checkpoint(&self, room_id: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(room_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
