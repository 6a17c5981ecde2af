//! Full-state graph snapshots and crash-safe snapshot files.
//!
//! A snapshot file is replaced by writing a temporary sibling, syncing it to
//! disk, and renaming it over the target. A crash at any point leaves either
//! the previous file or the new one, never a truncated mix.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{GraphEntity, GraphError, GraphResult, TemporalRelation};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub entities: Vec<GraphEntity>,
    pub relations: Vec<TemporalRelation>,
}

impl Default for GraphSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entities: Vec::new(),
            relations: Vec::new(),
        }
    }
}

impl GraphSnapshot {
    /// Encode as JSON bytes.
    pub fn to_json(&self) -> GraphResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| GraphError::InvalidSnapshot {
            message: format!("failed to encode snapshot: {e}"),
        })
    }

    /// Decode from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> GraphResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| GraphError::InvalidSnapshot {
            message: format!("failed to decode snapshot: {e}"),
        })
    }

    /// Read a snapshot file.
    pub fn read_file(path: &Path) -> GraphResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| GraphError::SnapshotIo {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&bytes)
    }

    /// Atomically replace `path` with this snapshot.
    pub fn write_file(&self, path: &Path) -> GraphResult<()> {
        let bytes = self.to_json()?;
        let io_err = |source: std::io::Error| GraphError::SnapshotIo {
            path: path.display().to_string(),
            source,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".into());
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));

        {
            let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        // Make the rename itself durable.
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "graph: snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Properties;

    fn sample() -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            entities: vec![
                GraphEntity {
                    id: "patient-1".into(),
                    label: "Patient".into(),
                    properties: Properties::new(),
                },
                GraphEntity {
                    id: "drugX".into(),
                    label: "Drug".into(),
                    properties: Properties::new(),
                },
            ],
            relations: vec![TemporalRelation::new(
                "patient-1",
                "drugX",
                "TOOK",
                "2022-01-01".parse().unwrap(),
                Some("2022-06-01".parse().unwrap()),
            )],
        }
    }

    #[test]
    fn file_replace_keeps_latest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graph.json");

        GraphSnapshot::default().write_file(&path).unwrap();
        sample().write_file(&path).unwrap();

        assert_eq!(GraphSnapshot::read_file(&path).unwrap(), sample());
        // No temporary file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_write_preserves_previous_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        sample().write_file(&path).unwrap();

        // Renaming onto a directory fails; the original file must survive.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("occupied"), b"x").unwrap();
        assert!(GraphSnapshot::default().write_file(&blocked).is_err());

        assert_eq!(GraphSnapshot::read_file(&path).unwrap(), sample());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            GraphSnapshot::from_json(b"{not json"),
            Err(GraphError::InvalidSnapshot { .. })
        ));
    }
}
