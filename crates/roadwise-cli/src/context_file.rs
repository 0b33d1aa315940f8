//! File-backed [`ContextSource`]: a JSON snapshot plus an optional JPEG
//! frame, both re-read on every tick so an external process can keep them
//! current.  Reads go through `tokio::fs` so a slow disk stalls only this
//! tick's future, not the runtime worker.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use roadwise_runtime::ContextSource;
use roadwise_types::{ContextSnapshot, Frame, RoadwiseError};
use tokio::fs;
use tracing::debug;

pub struct FileContextSource {
    snapshot_path: PathBuf,
    frame_path: Option<PathBuf>,
}

impl FileContextSource {
    pub fn new(snapshot_path: PathBuf, frame_path: Option<PathBuf>) -> Self {
        Self {
            snapshot_path,
            frame_path,
        }
    }

    async fn read_frame(&self) -> Option<Frame> {
        let path = self.frame_path.as_ref()?;
        match fs::read(path).await {
            Ok(jpeg) if !jpeg.is_empty() => Some(Frame { jpeg }),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no camera frame");
                None
            }
        }
    }
}

#[async_trait]
impl ContextSource for FileContextSource {
    async fn snapshot(&self) -> Result<ContextSnapshot, RoadwiseError> {
        let raw = fs::read_to_string(&self.snapshot_path).await.map_err(|e| {
            RoadwiseError::ContextUnavailable(format!(
                "cannot read {}: {e}",
                self.snapshot_path.display()
            ))
        })?;
        let mut snapshot: ContextSnapshot = serde_json::from_str(&raw).map_err(|e| {
            RoadwiseError::ContextUnavailable(format!(
                "malformed snapshot {}: {e}",
                self.snapshot_path.display()
            ))
        })?;
        snapshot.captured_at = Utc::now();
        snapshot.frame = self.read_frame().await;
        Ok(snapshot)
    }
}
