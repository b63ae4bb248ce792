use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::now_rfc3339;
use crate::types::{ScanInput, ScanResult, ScanStatus, SessionSnapshot};

/// Downloadable summary of the last completed file scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileScanReport {
    pub file: String,
    pub size: u64,
    pub detections: u8,
    pub clean: u8,
    pub timestamp: String,
}

impl FileScanReport {
    /// Build a report from a completed file-scan snapshot, stamped now.
    pub fn from_snapshot(snap: &SessionSnapshot) -> Option<Self> {
        if snap.status != ScanStatus::Completed {
            return None;
        }
        match (&snap.input, &snap.result) {
            (Some(ScanInput::File(f)), Some(ScanResult::File(v))) => Some(Self {
                file: f.name.clone(),
                size: f.size,
                detections: v.detections,
                clean: v.clean,
                timestamp: now_rfc3339(),
            }),
            _ => None,
        }
    }

    /// `sample.exe` becomes `sample-report.json`.
    pub fn download_name(&self) -> String {
        format!("{}-report.json", strip_extension(&self.file))
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !ext.contains('/') => stem,
        _ => name,
    }
}

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("failed to write JSON to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileVerdict, ScanKind};

    fn completed() -> SessionSnapshot {
        SessionSnapshot {
            status: ScanStatus::Completed,
            progress: 100.0,
            input: Some(ScanInput::file("sample.exe", 1024)),
            result: Some(ScanResult::File(FileVerdict {
                detections: 9,
                clean: 91,
            })),
            ..SessionSnapshot::idle(ScanKind::File)
        }
    }

    #[test]
    fn report_from_completed_file_scan() {
        let r = FileScanReport::from_snapshot(&completed()).unwrap();
        assert_eq!(r.file, "sample.exe");
        assert_eq!(r.size, 1024);
        assert_eq!(r.detections + r.clean, 100);
        assert_eq!(r.download_name(), "sample-report.json");
    }

    #[test]
    fn no_report_before_completion() {
        let mut snap = completed();
        snap.status = ScanStatus::Running;
        assert!(FileScanReport::from_snapshot(&snap).is_none());
        assert!(FileScanReport::from_snapshot(&SessionSnapshot::idle(ScanKind::File)).is_none());
    }

    #[test]
    fn download_name_strips_only_last_extension() {
        assert_eq!(strip_extension("archive.tar.gz"), "archive.tar");
        assert_eq!(strip_extension("README"), "README");
        assert_eq!(strip_extension("trailing."), "trailing.");
    }

    #[test]
    fn writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let r = FileScanReport::from_snapshot(&completed()).unwrap();
        write_json(&path, &r).unwrap();
        let back: FileScanReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, r);
    }
}
