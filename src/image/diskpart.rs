//! Partitioning script for the USB publish path.
//!
//! The partitioning tool reads a command list from a file. The script is a
//! pure function of the plan so the same plan always produces the same bytes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::write_file_with_dirs;
use crate::error::{Error, Result};

/// FAT32 volume labels are limited to 11 characters.
const MAX_FAT_LABEL: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PartitionScheme {
    Gpt,
    Mbr,
}

impl PartitionScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Mbr => "mbr",
        }
    }
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileSystem {
    Fat32,
    Ntfs,
}

impl FileSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fat32 => "fat32",
            Self::Ntfs => "ntfs",
        }
    }
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target disk layout: one primary partition spanning the whole disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionPlan {
    /// Disk index as listed by the partitioning tool.
    pub disk: u32,
    pub scheme: PartitionScheme,
    pub filesystem: FileSystem,
    pub letter: char,
    pub label: String,
    /// Disk 0 is normally the system disk; `clean` on it wipes the host.
    pub allow_system_disk: bool,
}

impl Default for PartitionPlan {
    fn default() -> Self {
        Self {
            disk: 1,
            scheme: PartitionScheme::Gpt,
            filesystem: FileSystem::Fat32,
            letter: 'U',
            label: "WINPE".to_string(),
            allow_system_disk: false,
        }
    }
}

impl PartitionPlan {
    pub fn validate(&self) -> Result<()> {
        if self.disk == 0 && !self.allow_system_disk {
            return Err(Error::Config(
                "refusing to clean disk 0 without allow_system_disk".into(),
            ));
        }
        if !self.letter.is_ascii_alphabetic() {
            return Err(Error::Config(format!(
                "drive letter must be A-Z, got '{}'",
                self.letter
            )));
        }
        if self.filesystem == FileSystem::Fat32 && self.label.chars().count() > MAX_FAT_LABEL {
            return Err(Error::Config(format!(
                "FAT32 label '{}' is longer than {} characters",
                self.label, MAX_FAT_LABEL
            )));
        }
        if self.label.contains('"') {
            return Err(Error::Config("volume label may not contain quotes".into()));
        }
        Ok(())
    }

    pub fn drive(&self) -> String {
        format!("{}:", self.letter.to_ascii_uppercase())
    }

    /// Render the command list.
    pub fn script(&self) -> String {
        let mut lines = vec![
            format!("select disk {}", self.disk),
            "clean".to_string(),
            format!("convert {}", self.scheme),
            "create partition primary".to_string(),
        ];
        // BIOS firmware only boots from an active MBR partition.
        if self.scheme == PartitionScheme::Mbr {
            lines.push("active".to_string());
        }
        lines.push(format!(
            "format fs={} quick label=\"{}\"",
            self.filesystem, self.label
        ));
        lines.push(format!("assign letter={}", self.letter.to_ascii_uppercase()));
        lines.push("exit".to_string());

        let mut script = lines.join("\r\n");
        script.push_str("\r\n");
        script
    }

    /// Write the script into `dir` and return its path.
    pub fn write_script(&self, dir: &Path) -> Result<PathBuf> {
        self.validate()?;
        let path = dir.join(format!("diskpart-disk{}.txt", self.disk));
        write_file_with_dirs(&path, self.script())?;
        Ok(path)
    }
}
