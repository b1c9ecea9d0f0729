//! Dock Route File
//!
//! A newline-free JSON array of dock records. The metadata store is the
//! source of truth; this file only seeds the registry at startup and
//! receives a flush at teardown. Single writer, no external locking.

use crate::domain::model::Dock;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_DOCK_ROUTE_FILE: &str = "/etc/opensds/dock_route.json";

/// Handle to the dock route seed file
#[derive(Debug, Clone)]
pub struct DockRouteFile {
    path: PathBuf,
}

impl DockRouteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the seed; a missing or empty file yields no docks
    pub async fn load(&self) -> Result<Vec<Dock>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Dock route file {} not present", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let docks: Vec<Dock> = serde_json::from_slice(&raw)?;
        info!(
            "Loaded {} dock(s) from {}",
            docks.len(),
            self.path.display()
        );
        Ok(docks)
    }

    /// Overwrite the file with `docks`
    pub async fn save(&self, docks: &[Dock]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_vec(docks)?;
        tokio::fs::write(&self.path, raw).await?;
        debug!("Wrote {} dock(s) to {}", docks.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::DockStatus;
    use chrono::Utc;

    fn dock(id: &str, endpoint: &str) -> Dock {
        Dock {
            id: id.into(),
            endpoint: endpoint.into(),
            availability_zone: "default".into(),
            backends: vec!["lvm".into()],
            status: DockStatus::Available,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = DockRouteFile::new(dir.path().join("absent.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = DockRouteFile::new(dir.path().join("nested").join("dock_route.json"));

        let docks = vec![dock("d1", "10.0.0.1:50050"), dock("d2", "10.0.0.2:50050")];
        file.save(&docks).await.unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(!raw.contains('\n'));
        assert!(raw.starts_with('['));

        assert_eq!(file.load().await.unwrap(), docks);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dock_route.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(DockRouteFile::new(path).load().await.is_err());
    }
}
