//! Vendor driver archive extraction.
//!
//! Each archive is unpacked into its own scratch directory, every package in
//! it is classified, and classified packages are copied whole into
//! `<output>/<Category>/<archive key>/<path inside archive>`. The scratch
//! directory is removed whether or not the archive was processed cleanly.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use super::classifier::{Classifier, DriverCategory};
use super::package::{discover_packages, read_descriptor};
use crate::cancel::CancelToken;
use crate::common::{copy_dir_recursive, ScratchDir};
use crate::error::{Error, IoContext, Result};
use crate::process::{self, Cmd, Executor, OutputMode, StreamTarget};
use crate::progress::ProgressEvent;

const WINRAR_PATHS: &[&str] = &[
    r"C:\Program Files\WinRAR\WinRAR.exe",
    r"C:\Program Files (x86)\WinRAR\WinRAR.exe",
];

const SEVEN_ZIP_PATHS: &[&str] = &[
    r"C:\Program Files\7-Zip\7z.exe",
    r"C:\Program Files (x86)\7-Zip\7z.exe",
];

const ARCHIVE_EXTENSIONS: &[&str] = &["7z", "zip", "rar"];

/// Archive names accepted when no filter is configured.
pub const DEFAULT_ARCHIVE_PATTERNS: &[&str] = &["DP_MassStorage", "DP_LAN", "DP_Chipset"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTool {
    SevenZip(PathBuf),
    WinRar(PathBuf),
}

impl ArchiveTool {
    /// Find an installed decompressor. Call once per run.
    pub fn resolve() -> Option<Self> {
        if let Some(path) = first_existing(WINRAR_PATHS) {
            return Some(Self::WinRar(path));
        }
        if let Some(path) = process::which("7z") {
            return Some(Self::SevenZip(path));
        }
        first_existing(SEVEN_ZIP_PATHS).map(Self::SevenZip)
    }

    /// The configured program, if it can be found.
    pub fn configured(program: &Path) -> Option<Self> {
        process::locate(&program.to_string_lossy()).map(|found| Self::from_program(&found))
    }

    /// Pick the flavour from an explicitly configured program path.
    pub fn from_program(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if stem.contains("winrar") || stem == "rar" {
            Self::WinRar(path.to_path_buf())
        } else {
            Self::SevenZip(path.to_path_buf())
        }
    }

    pub fn program(&self) -> &Path {
        match self {
            Self::SevenZip(p) | Self::WinRar(p) => p,
        }
    }

    pub fn extract_cmd(&self, archive: &Path, dest: &Path) -> Cmd {
        match self {
            Self::SevenZip(program) => Cmd::new(program.to_string_lossy())
                .arg("x")
                .arg_path(archive)
                .arg(format!("-o{}", dest.display()))
                .arg("-y")
                .error_msg("7z extract"),
            // WinRAR treats a destination with a trailing separator as a folder.
            Self::WinRar(program) => Cmd::new(program.to_string_lossy())
                .args(["x", "-ibck"])
                .arg_path(archive)
                .arg(format!("{}{}", dest.display(), MAIN_SEPARATOR))
                .error_msg("WinRAR extract"),
        }
    }
}

impl fmt::Display for ArchiveTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenZip(p) => write!(f, "7-Zip ({})", p.display()),
            Self::WinRar(p) => write!(f, "WinRAR ({})", p.display()),
        }
    }
}

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(PathBuf::from).find(|p| p.is_file())
}

/// Which archives to open at all, by file-name substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFilter {
    patterns: Vec<String>,
}

impl Default for ArchiveFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_PATTERNS.iter().map(|s| s.to_string()).collect())
    }
}

impl ArchiveFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Accept every archive.
    pub fn accept_all() -> Self {
        Self::new(Vec::new())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| file_name.contains(p.as_str()))
    }

    /// Accepted archives directly inside `dir`, sorted by name.
    pub fn select(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::missing("driver archive directory", dir));
        }
        let mut archives = Vec::new();
        for entry in fs::read_dir(dir).at(dir)? {
            let path = entry.at(dir)?.path();
            if !path.is_file() || !is_archive(&path) {
                continue;
            }
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            if self.accepts(&name) {
                archives.push(path);
            }
        }
        archives.sort();
        Ok(archives)
    }
}

/// Directory name for one archive's scratch tree and output prefix: the
/// file stem, or `<stem>_<ext>` when another archive beside it has the same
/// stem.
fn archive_key(archive: &Path) -> String {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let Some(dir) = archive.parent() else {
        return stem;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return stem;
    };

    let collides = entries.filter_map(|e| e.ok()).map(|e| e.path()).any(|other| {
        other != archive
            && is_archive(&other)
            && other.file_stem().is_some_and(|s| s.to_string_lossy() == stem)
    });
    if !collides {
        return stem;
    }
    match archive.extension() {
        Some(ext) => format!("{}_{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Packages filed per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub raid: usize,
    pub network: usize,
    pub storage: usize,
    /// Packages that matched no category and were left behind.
    pub unclassified: usize,
    /// Destinations that already existed, counted in their category too.
    pub already_present: usize,
    pub copy_failures: usize,
}

impl CategoryCounts {
    pub fn record(&mut self, category: DriverCategory) {
        match category {
            DriverCategory::Raid => self.raid += 1,
            DriverCategory::Network => self.network += 1,
            DriverCategory::Storage => self.storage += 1,
            DriverCategory::Unclassified => self.unclassified += 1,
        }
    }

    pub fn get(&self, category: DriverCategory) -> usize {
        match category {
            DriverCategory::Raid => self.raid,
            DriverCategory::Network => self.network,
            DriverCategory::Storage => self.storage,
            DriverCategory::Unclassified => self.unclassified,
        }
    }

    pub fn filed(&self) -> usize {
        self.raid + self.network + self.storage
    }

    pub fn merge(&mut self, other: &CategoryCounts) {
        self.raid += other.raid;
        self.network += other.network;
        self.storage += other.storage;
        self.unclassified += other.unclassified;
        self.already_present += other.already_present;
        self.copy_failures += other.copy_failures;
    }
}

impl fmt::Display for CategoryCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RAID {}, Network {}, Storage {}, other {}",
            self.raid, self.network, self.storage, self.unclassified
        )
    }
}

/// Outcome of extracting a whole directory of archives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub archives: usize,
    pub failed: usize,
    pub counts: CategoryCounts,
    pub cancelled: bool,
}

pub struct Extractor<'a> {
    tool: ArchiveTool,
    classifier: &'a Classifier,
}

impl<'a> Extractor<'a> {
    pub fn new(tool: ArchiveTool, classifier: &'a Classifier) -> Self {
        Self { tool, classifier }
    }

    pub fn tool(&self) -> &ArchiveTool {
        &self.tool
    }

    /// Unpack one archive and file its packages under `output_root`.
    pub fn extract_and_classify(
        &self,
        exec: &dyn Executor,
        archive: &Path,
        scratch_root: &Path,
        output_root: &Path,
    ) -> Result<CategoryCounts> {
        if !archive.is_file() {
            return Err(Error::missing("driver archive", archive));
        }
        let key = archive_key(archive);
        let scratch = ScratchDir::create(scratch_root, &key)?;
        self.tool
            .extract_cmd(archive, scratch.path())
            .run_with(exec, OutputMode::Captured)?;

        let mut counts = CategoryCounts::default();
        for package in discover_packages(scratch.path()) {
            let categories: BTreeSet<DriverCategory> = package
                .descriptors
                .iter()
                .filter_map(|d| match read_descriptor(d) {
                    Ok(text) => Some(self.classifier.classify(&text)),
                    Err(e) => {
                        tracing::debug!("unreadable descriptor {}: {}", d.display(), e);
                        None
                    }
                })
                .filter(DriverCategory::is_classified)
                .collect();

            if categories.is_empty() {
                counts.record(DriverCategory::Unclassified);
                continue;
            }

            let relative = package
                .root
                .strip_prefix(scratch_root)
                .unwrap_or(&package.root);
            for category in categories {
                let dest = output_root.join(category.as_str()).join(relative);
                if dest.exists() {
                    counts.already_present += 1;
                    counts.record(category);
                    continue;
                }
                match copy_dir_recursive(&package.root, &dest) {
                    Ok(_) => counts.record(category),
                    Err(e) => {
                        tracing::warn!("copy of {} failed: {}", package.root.display(), e);
                        counts.copy_failures += 1;
                    }
                }
            }
        }

        tracing::debug!("{}: {}", archive.display(), counts);
        Ok(counts)
    }

    /// Run every accepted archive in `source_dir`. A failing archive is
    /// reported and skipped. Cancellation is honoured between archives.
    #[allow(clippy::too_many_arguments)]
    pub fn extract_dir(
        &self,
        exec: &dyn Executor,
        source_dir: &Path,
        filter: &ArchiveFilter,
        scratch_root: &Path,
        output_root: &Path,
        target: StreamTarget<'_>,
        cancel: &CancelToken,
    ) -> Result<BatchSummary> {
        let archives = filter.select(source_dir)?;
        let emit = |event: ProgressEvent| target.sink.emit(event.in_step(target.step));

        if archives.is_empty() {
            emit(ProgressEvent::warning(format!(
                "No matching driver archives in {}",
                source_dir.display()
            )));
            return Ok(BatchSummary::default());
        }

        for category in DriverCategory::classified() {
            let dir = output_root.join(category.as_str());
            fs::create_dir_all(&dir).at(&dir)?;
        }

        let mut summary = BatchSummary::default();
        let total = archives.len();
        for (i, archive) in archives.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let name = archive.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            emit(ProgressEvent::info(format!("[{}/{}] Extracting {}", i + 1, total, name)));

            summary.archives += 1;
            match self.extract_and_classify(exec, archive, scratch_root, output_root) {
                Ok(counts) => {
                    emit(ProgressEvent::success(format!("{}: {}", name, counts)));
                    summary.counts.merge(&counts);
                }
                Err(e) => {
                    emit(ProgressEvent::warning(format!("{}: {}", name, e)));
                    summary.failed += 1;
                }
            }
        }

        // Only the per-archive subdirectories were removed; drop the root if empty.
        let _ = fs::remove_dir(scratch_root);
        Ok(summary)
    }
}
