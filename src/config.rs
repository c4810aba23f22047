//! Configuration management for pebuild.
//!
//! Settings live in a TOML document (`pebuild.toml`). An optional `.env`
//! file and the process environment override the paths; environment
//! variables take precedence over `.env`. A run never reads the document
//! directly: it gets an immutable [`BuildConfiguration`] snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::write_file_with_dirs;
use crate::drivers::extract::{ArchiveFilter, DEFAULT_ARCHIVE_PATTERNS};
use crate::error::{Error, IoContext, Result};
use crate::image::{ImageLayout, PartitionPlan, ToolKit};
use crate::pipeline::StepName;

pub const CONFIG_FILE: &str = "pebuild.toml";

/// Default location of the optional-component packages in the deployment kit.
pub const DEFAULT_TOOL_ROOT: &str = "C:/Program Files (x86)/Windows Kits/10/Assessment and Deployment Kit/Windows Preinstallation Environment/amd64/WinPE_OCs";

const FEATURE_PACKAGES: &[(&str, &str)] = &[
    ("WinPE-WMI", "Windows Management Instrumentation"),
    ("WinPE-NetFx", ".NET Framework"),
    ("WinPE-Scripting", "Script host"),
    ("WinPE-HTA", "HTML applications"),
    ("WinPE-PowerShell", "PowerShell"),
    ("WinPE-DismCmdlets", "DISM PowerShell module"),
    ("WinPE-SecureBootCmdlets", "Secure Boot PowerShell module"),
    ("WinPE-StorageWMI", "Storage management WMI"),
    ("WinPE-EnhancedStorage", "Enhanced storage"),
    ("WinPE-SecureStartup", "BitLocker"),
    ("WinPE-PPPoE", "PPPoE dial-up"),
    ("WinPE-dot3svc", "Wired 802.1X"),
    ("WinPE-FMAPI", "File management API"),
    ("WinPE-MDAC", "Data access components"),
    ("WinPE-Setup", "Setup core"),
    ("WinPE-Setup-Client", "Client setup"),
    ("WinPE-Setup-Server", "Server setup"),
    ("WinPE-RNDIS", "USB networking"),
    ("WinPE-WDS-Tools", "Deployment services tools"),
    ("WinPE-LegacySetup", "Legacy setup"),
    ("WinPE-SRT", "System recovery tools"),
    ("WinPE-Rejuv", "Recovery environment"),
];

/// Components that ship a language resource package.
const LOCALIZED_COMPONENTS: &[&str] = &[
    "WinPE-WMI",
    "WinPE-NetFx",
    "WinPE-Scripting",
    "WinPE-HTA",
    "WinPE-PowerShell",
    "WinPE-DismCmdlets",
    "WinPE-SecureBootCmdlets",
    "WinPE-StorageWMI",
    "WinPE-EnhancedStorage",
    "WinPE-SecureStartup",
    "WinPE-PPPoE",
    "WinPE-dot3svc",
    "WinPE-MDAC",
];

const REGIONAL_SETTINGS: &[(&str, &str)] = &[
    ("Set-UILang:zh-cn", "User interface language"),
    ("Set-SysLocale:zh-cn", "System locale"),
    ("Set-UserLocale:zh-cn", "User locale"),
    ("Set-InputLocale:0804:00000804", "Input method"),
    ("Set-TimeZone:China Standard Time", "Time zone"),
    ("Set-SKUIntlDefaults:zh-cn", "International defaults"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl PackageSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalSetting {
    /// Servicing option without the leading slash, e.g. `Set-UILang:zh-cn`.
    pub setting: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalApp {
    /// Relative to the apps directory.
    pub source: String,
    /// Relative to the mounted image root.
    pub destination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub image_dir: PathBuf,
    pub tool_root: PathBuf,
    pub driver_dir: PathBuf,
    /// Vendor driver archives to extract into `driver_dir` before installing.
    pub driver_archives: Option<PathBuf>,
    pub apps_dir: PathBuf,
    pub output: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("D:/WinPE_amd64"),
            tool_root: PathBuf::from(DEFAULT_TOOL_ROOT),
            driver_dir: PathBuf::from("drivers"),
            driver_archives: None,
            apps_dir: PathBuf::from("apps"),
            output: PathBuf::from("MyCustomWinPE.iso"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSection {
    pub index: u32,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self { index: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesSection {
    /// Subdirectory of the tool root holding language resources.
    pub language: String,
    pub feature: Vec<PackageSpec>,
    pub language_packs: Vec<PackageSpec>,
    pub fonts: Vec<PackageSpec>,
}

impl Default for PackagesSection {
    fn default() -> Self {
        let language = "zh-cn".to_string();
        Self {
            feature: FEATURE_PACKAGES
                .iter()
                .map(|(n, d)| PackageSpec::new(n, d))
                .collect(),
            language_packs: LOCALIZED_COMPONENTS
                .iter()
                .map(|n| PackageSpec::new(&format!("{}_{}", n, language), ""))
                .collect(),
            fonts: vec![
                PackageSpec::new("WinPE-FontSupport-ZH-CN", "Font support"),
                PackageSpec::new(&format!("{}/lp", language), "Core language pack"),
            ],
            language,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriversSection {
    /// File-name substrings selecting which archives to open. Empty accepts all.
    pub archive_patterns: Vec<String>,
    /// Explicit decompressor; probed for when absent.
    pub archive_tool: Option<PathBuf>,
    pub scratch_dir: PathBuf,
}

impl Default for DriversSection {
    fn default() -> Self {
        Self {
            archive_patterns: DEFAULT_ARCHIVE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            archive_tool: None,
            scratch_dir: PathBuf::from("temp_extract"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PublishTarget {
    #[default]
    Iso,
    Usb,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    pub target: PublishTarget,
    pub usb: PartitionPlan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub stall_warning_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            stall_warning_secs: 300,
        }
    }
}

/// Custom directories are opt-in; every other step is on unless configured off.
fn enabled_by_default(step: StepName) -> bool {
    step != StepName::CustomDirs
}

fn default_steps() -> BTreeMap<String, bool> {
    StepName::all()
        .iter()
        .filter(|s| s.is_toggleable())
        .map(|s| (s.as_str().to_string(), enabled_by_default(*s)))
        .collect()
}

/// The editable document. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    /// Directories created under the mounted image root.
    pub custom_dirs: Vec<String>,
    pub paths: PathsSection,
    pub image: ImageSection,
    pub steps: BTreeMap<String, bool>,
    pub packages: PackagesSection,
    pub regional: Vec<RegionalSetting>,
    pub external_apps: Vec<ExternalApp>,
    pub drivers: DriversSection,
    pub publish: PublishSection,
    pub tools: ToolKit,
    pub relay: RelaySection,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            custom_dirs: vec!["Tools".into(), "Temp/Logs".into(), "Data/Backup".into()],
            paths: PathsSection::default(),
            image: ImageSection::default(),
            steps: default_steps(),
            packages: PackagesSection::default(),
            regional: REGIONAL_SETTINGS
                .iter()
                .map(|(s, d)| RegionalSetting {
                    setting: s.to_string(),
                    description: d.to_string(),
                })
                .collect(),
            external_apps: vec![ExternalApp {
                source: "DiskGenius.exe".into(),
                destination: "Windows/System32".into(),
                description: "Partition tool".into(),
            }],
            drivers: DriversSection::default(),
            publish: PublishSection::default(),
            tools: ToolKit::default(),
            relay: RelaySection::default(),
        }
    }
}

impl ConfigDocument {
    /// Read a document. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).at(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// `.env` in `base_dir`, then the document, then environment overrides.
    pub fn load_layered(base_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let env_path = base_dir.join(".env");
        if env_path.exists() {
            if let Err(e) = dotenvy::from_path(&env_path) {
                tracing::warn!("ignoring {}: {}", env_path.display(), e);
            }
        }

        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.join(CONFIG_FILE));
        let mut doc = Self::load(&path)?;
        doc.apply_env();
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        write_file_with_dirs(path, text)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    /// Apply `PEBUILD_*` path overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let paths = &mut self.paths;
        if let Some(v) = lookup("PEBUILD_IMAGE_DIR") {
            paths.image_dir = v.into();
        }
        if let Some(v) = lookup("PEBUILD_TOOL_ROOT") {
            paths.tool_root = v.into();
        }
        if let Some(v) = lookup("PEBUILD_DRIVER_DIR") {
            paths.driver_dir = v.into();
        }
        if let Some(v) = lookup("PEBUILD_DRIVER_ARCHIVES") {
            paths.driver_archives = Some(v.into());
        }
        if let Some(v) = lookup("PEBUILD_APPS_DIR") {
            paths.apps_dir = v.into();
        }
        if let Some(v) = lookup("PEBUILD_OUTPUT") {
            paths.output = v.into();
        }
    }

    pub fn set_step(&mut self, step: StepName, enabled: bool) -> Result<()> {
        if !step.is_toggleable() {
            return Err(Error::Config(format!("step '{}' always runs", step)));
        }
        self.steps.insert(step.as_str().to_string(), enabled);
        Ok(())
    }

    /// Turn every optional customization step on or off. Publish is untouched.
    pub fn set_optional_steps(&mut self, enabled: bool) {
        for step in StepName::all().iter().filter(|s| s.is_optional()) {
            self.steps.insert(step.as_str().to_string(), enabled);
        }
    }

    fn step_flags(&self) -> Result<BTreeMap<StepName, bool>> {
        let mut flags: BTreeMap<StepName, bool> = StepName::all()
            .iter()
            .filter(|s| s.is_toggleable())
            .map(|s| (*s, enabled_by_default(*s)))
            .collect();
        for (key, enabled) in &self.steps {
            let step = StepName::parse(key)
                .ok_or_else(|| Error::Config(format!("unknown step '{}' in [steps]", key)))?;
            if !step.is_toggleable() {
                return Err(Error::Config(format!(
                    "step '{}' always runs and cannot be set in [steps]",
                    key
                )));
            }
            flags.insert(step, *enabled);
        }
        Ok(flags)
    }

    /// Validate and freeze the document for one run. Relative paths are
    /// resolved against `base_dir`.
    pub fn snapshot(&self, base_dir: &Path) -> Result<BuildConfiguration> {
        let steps = self.step_flags()?;
        if self.image.index == 0 {
            return Err(Error::Config("[image] index starts at 1".into()));
        }
        if self.publish.target == PublishTarget::Usb {
            self.publish.usb.validate()?;
        }
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };

        Ok(BuildConfiguration {
            image_dir: resolve(&self.paths.image_dir),
            tool_root: resolve(&self.paths.tool_root),
            driver_dir: resolve(&self.paths.driver_dir),
            driver_archives: self.paths.driver_archives.as_deref().map(resolve),
            apps_dir: resolve(&self.paths.apps_dir),
            output: resolve(&self.paths.output),
            image_index: self.image.index,
            steps,
            language: self.packages.language.clone(),
            feature_packages: self.packages.feature.clone(),
            language_packages: self.packages.language_packs.clone(),
            font_packages: self.packages.fonts.clone(),
            regional_settings: self.regional.clone(),
            custom_dirs: self.custom_dirs.clone(),
            external_apps: self.external_apps.clone(),
            archive_filter: ArchiveFilter::new(self.drivers.archive_patterns.clone()),
            archive_tool: self.drivers.archive_tool.as_deref().map(resolve),
            scratch_dir: resolve(&self.drivers.scratch_dir),
            publish_target: self.publish.target,
            usb: self.publish.usb.clone(),
            tools: self.tools.clone(),
            stall_warning: Duration::from_secs(self.relay.stall_warning_secs),
        })
    }
}

/// Immutable inputs of one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    pub image_dir: PathBuf,
    pub tool_root: PathBuf,
    pub driver_dir: PathBuf,
    pub driver_archives: Option<PathBuf>,
    pub apps_dir: PathBuf,
    pub output: PathBuf,
    pub image_index: u32,
    steps: BTreeMap<StepName, bool>,
    pub language: String,
    pub feature_packages: Vec<PackageSpec>,
    pub language_packages: Vec<PackageSpec>,
    pub font_packages: Vec<PackageSpec>,
    pub regional_settings: Vec<RegionalSetting>,
    pub custom_dirs: Vec<String>,
    pub external_apps: Vec<ExternalApp>,
    pub archive_filter: ArchiveFilter,
    pub archive_tool: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub publish_target: PublishTarget,
    pub usb: PartitionPlan,
    pub tools: ToolKit,
    pub stall_warning: Duration,
}

impl BuildConfiguration {
    /// Provision and mount are always enabled.
    pub fn is_enabled(&self, step: StepName) -> bool {
        if !step.is_toggleable() {
            return true;
        }
        self.steps.get(&step).copied().unwrap_or(false)
    }

    pub fn layout(&self) -> ImageLayout {
        ImageLayout::new(&self.image_dir)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  image_dir:   {}", self.image_dir.display());
        println!("  tool_root:   {}", self.tool_root.display());
        println!("  driver_dir:  {}", self.driver_dir.display());
        if let Some(archives) = &self.driver_archives {
            println!("  archives:    {}", archives.display());
        }
        println!("  apps_dir:    {}", self.apps_dir.display());
        println!("  output:      {}", self.output.display());
        println!("  publish:     {:?}", self.publish_target);
        println!("Steps:");
        for step in StepName::all() {
            let state = if self.is_enabled(*step) { "on" } else { "off" };
            println!("  {:<18} {}", step.as_str(), state);
        }
        if self.layout().is_provisioned() {
            println!("  Base image: FOUND");
        } else {
            println!("  Base image: NOT FOUND (the build will provision it)");
        }
    }
}
