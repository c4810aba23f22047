//! Read-only driver inventory: classify every descriptor under a directory.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::classifier::{Classifier, DriverCategory};
use super::package::{driver_description, find_descriptors, read_descriptor};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    /// Path relative to the scanned directory, `/`-separated.
    pub path: String,
    pub name: String,
    /// Name of the directory holding the descriptor.
    pub directory: String,
    pub description: Option<String>,
    pub category: DriverCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub root: PathBuf,
    pub entries: Vec<ScanEntry>,
    /// Descriptors that could not be read.
    pub unreadable: usize,
}

impl ScanReport {
    pub fn scan(dir: &Path, classifier: &Classifier) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::missing("driver directory", dir));
        }

        let mut entries = Vec::new();
        let mut unreadable = 0;
        for path in find_descriptors(dir) {
            let text = match read_descriptor(&path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("skipping unreadable {}: {}", path.display(), e);
                    unreadable += 1;
                    continue;
                }
            };
            let relative = path.strip_prefix(dir).unwrap_or(&path);
            entries.push(ScanEntry {
                path: relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                name: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                directory: path
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                description: driver_description(&text),
                category: classifier.classify(&text),
            });
        }
        entries.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.path.cmp(&b.path)));

        Ok(Self {
            root: dir.to_path_buf(),
            entries,
            unreadable,
        })
    }

    pub fn in_category(&self, category: DriverCategory) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    pub fn count(&self, category: DriverCategory) -> usize {
        self.in_category(category).count()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Driver scan report");
        let _ = writeln!(out, "Directory: {}", self.root.display());
        let _ = writeln!(out, "{}", rule);

        for category in DriverCategory::all() {
            let entries: Vec<_> = self.in_category(*category).collect();
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n[{}] {} found", category, entries.len());
            for (i, entry) in entries.iter().enumerate() {
                let _ = writeln!(out, "  [{:3}] {}", i + 1, entry.path);
                if let Some(desc) = &entry.description {
                    let _ = writeln!(out, "        Description: {}", desc);
                }
                let _ = writeln!(out, "        Directory: {}", entry.directory);
            }
        }

        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "Total: {} descriptor files", self.entries.len());
        for category in DriverCategory::all() {
            let _ = writeln!(out, "  {:<13} {}", format!("{}:", category), self.count(*category));
        }
        if self.unreadable > 0 {
            let _ = writeln!(out, "  Unreadable:   {}", self.unreadable);
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let raid = dir.path().join("iaStor");
        let net = dir.path().join("e1d");
        fs::create_dir_all(&raid).unwrap();
        fs::create_dir_all(&net).unwrap();
        fs::write(
            raid.join("iaStorVD.inf"),
            "Class=SCSIAdapter\nDriverDesc = \"Intel RST VMD Controller\"\n",
        )
        .unwrap();
        fs::write(
            net.join("e1d.inf"),
            "DriverDesc=\"Intel(R) Ethernet Connection I219-V\"",
        )
        .unwrap();
        fs::write(dir.path().join("readme.inf"), "[Version]").unwrap();
        dir
    }

    #[test]
    fn test_scan_groups_by_category() {
        let dir = fixture();
        let report = ScanReport::scan(dir.path(), Classifier::builtin()).unwrap();

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.count(DriverCategory::Raid), 1);
        assert_eq!(report.count(DriverCategory::Network), 1);
        assert_eq!(report.count(DriverCategory::Unclassified), 1);

        let raid = report.in_category(DriverCategory::Raid).next().unwrap();
        assert_eq!(raid.path, "iaStor/iaStorVD.inf");
        assert_eq!(raid.directory, "iaStor");
        assert_eq!(raid.description.as_deref(), Some("Intel RST VMD Controller"));
    }

    #[test]
    fn test_text_and_json_output() {
        let dir = fixture();
        let report = ScanReport::scan(dir.path(), Classifier::builtin()).unwrap();

        let text = report.render_text();
        assert!(text.contains("[RAID] 1 found"));
        assert!(text.contains("Total: 3 descriptor files"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["entries"][0]["category"], "RAID");
    }

    #[test]
    fn test_missing_directory() {
        let err =
            ScanReport::scan(Path::new("/nonexistent/drivers"), Classifier::builtin()).unwrap_err();
        assert!(err.is_prerequisite());
    }
}
