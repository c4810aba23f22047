//! Driver package discovery and descriptor decoding.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

static DRIVER_DESC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)driverdesc\s*=\s*["']([^"']+)["']"#).unwrap());

/// A directory holding one or more descriptor files plus their binaries.
/// Copies and installs always act on `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPackage {
    pub root: PathBuf,
    /// Sorted descriptor paths directly inside `root`.
    pub descriptors: Vec<PathBuf>,
}

pub fn is_descriptor(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("inf"))
}

/// Every descriptor file under `dir`, sorted by path.
pub fn find_descriptors(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_descriptor(e.path()))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

/// Group descriptors under `dir` by their containing directory.
pub fn discover_packages(dir: &Path) -> Vec<DriverPackage> {
    let mut by_root: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for descriptor in find_descriptors(dir) {
        if let Some(parent) = descriptor.parent() {
            by_root
                .entry(parent.to_path_buf())
                .or_default()
                .push(descriptor);
        }
    }
    by_root
        .into_iter()
        .map(|(root, descriptors)| DriverPackage { root, descriptors })
        .collect()
}

/// Read a descriptor file as text, whatever its encoding.
pub fn read_descriptor(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(decode(&bytes))
}

/// Descriptors ship as UTF-16 (with or without BOM) or as 8-bit text.
pub fn decode(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ if looks_like_utf16le(bytes) => utf16(bytes, u16::from_le_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn utf16(bytes: &[u8], from: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| from([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// ASCII text in UTF-16 LE has a zero in most odd positions.
fn looks_like_utf16le(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(512)];
    if sample.len() < 4 {
        return false;
    }
    let pairs = sample.len() / 2;
    let zero_high = sample
        .chunks_exact(2)
        .filter(|pair| pair[1] == 0 && pair[0] != 0)
        .count();
    zero_high * 4 >= pairs * 3
}

/// The `DriverDesc = "..."` string, when the descriptor declares one.
pub fn driver_description(text: &str) -> Option<String> {
    DRIVER_DESC_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
