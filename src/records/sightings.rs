use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Append-only `"<timestamp>\t<count>\n"` log of bird sightings.
#[derive(Debug, Clone)]
pub struct SightingsLog {
    path: PathBuf,
}

impl SightingsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, timestamp: &str, count: usize) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\t{}\n", timestamp, count).as_bytes())
            .await?;
        file.flush().await
    }
}
