//! Shared test utilities for pebuild tests.
//!
//! `FakeTools` stands in for the deployment kit. It keeps the "committed"
//! image as a directory next to `boot.wim`, copies it into the mount
//! directory on mount and back on commit, so tests can observe exactly
//! what a real commit or discard would persist.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pebuild::cancel::CancelToken;
use pebuild::common::copy_dir_recursive;
use pebuild::config::{BuildConfiguration, ConfigDocument, ExternalApp, PackageSpec};
use pebuild::error::{Error, Result};
use pebuild::process::{Cmd, CommandResult, Executor, OutputMode};
use pebuild::progress::{MemorySink, ProgressEvent, ProgressSink};
use tempfile::TempDir;

/// Scripted replacement for dism, copype, MakeWinPEMedia, diskpart and 7z.
#[derive(Default)]
pub struct FakeTools {
    calls: Mutex<Vec<String>>,
    mounted_wim: Mutex<Option<PathBuf>>,
    /// Package file stems whose install exits non-zero.
    failing_packages: Mutex<Vec<String>>,
    /// Command-line substrings that fail to launch at all.
    unavailable: Mutex<Vec<String>>,
    /// Cancel this token once a command containing the needle has run.
    cancel_after: Mutex<Option<(String, CancelToken)>>,
    /// Mount exits non-zero.
    fail_mount: bool,
    /// Mount exits zero but never populates the mount directory.
    hollow_mount: bool,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_mount() -> Self {
        Self {
            fail_mount: true,
            ..Default::default()
        }
    }

    pub fn hollow_mount() -> Self {
        Self {
            hollow_mount: true,
            ..Default::default()
        }
    }

    pub fn fail_package(&self, stem: &str) {
        self.failing_packages.lock().unwrap().push(stem.to_string());
    }

    pub fn make_unavailable(&self, needle: &str) {
        self.unavailable.lock().unwrap().push(needle.to_string());
    }

    pub fn cancel_after(&self, needle: &str, token: &CancelToken) {
        *self.cancel_after.lock().unwrap() = Some((needle.to_string(), token.clone()));
    }

    /// Every command line run so far, program first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn position(&self, needle: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(needle))
    }

    fn simulate(&self, program: &str, args: &[String]) -> i32 {
        match program {
            "copype.cmd" => {
                let root = PathBuf::from(&args[1]);
                let wim = root.join("media/sources/boot.wim");
                fs::create_dir_all(wim.parent().unwrap()).unwrap();
                fs::write(&wim, "WIM").unwrap();
                fs::create_dir_all(content_dir(&wim).join("Windows/System32")).unwrap();
                fs::create_dir_all(root.join("mount")).unwrap();
                0
            }
            "dism" => self.dism(args),
            "MakeWinPEMedia.cmd" => {
                if args[0] == "/ISO" {
                    let out = PathBuf::from(&args[3]);
                    fs::write(out, vec![0u8; 4096]).unwrap();
                }
                0
            }
            "diskpart" => {
                assert!(Path::new(&args[1]).is_file(), "diskpart script missing");
                0
            }
            "7z" => seven_zip(args),
            other => panic!("unexpected program {}", other),
        }
    }

    fn dism(&self, args: &[String]) -> i32 {
        let value = |prefix: &str| {
            args.iter()
                .find_map(|a| a.strip_prefix(prefix))
                .map(PathBuf::from)
        };

        match args.iter().find(|a| a.starts_with('/') && !a.starts_with("/Image:")) {
            Some(op) if op == "/Mount-Wim" => {
                if self.fail_mount {
                    return 5;
                }
                let wim = value("/WimFile:").unwrap();
                let mount = value("/MountDir:").unwrap();
                if !self.hollow_mount {
                    copy_dir_recursive(&content_dir(&wim), &mount).unwrap();
                }
                *self.mounted_wim.lock().unwrap() = Some(wim);
                0
            }
            Some(op) if op == "/Unmount-Wim" => {
                let mount = value("/MountDir:").unwrap();
                let wim = self.mounted_wim.lock().unwrap().take().unwrap();
                if args.iter().any(|a| a == "/Commit") {
                    let content = content_dir(&wim);
                    fs::remove_dir_all(&content).unwrap();
                    copy_dir_recursive(&mount, &content).unwrap();
                }
                fs::remove_dir_all(&mount).unwrap();
                fs::create_dir_all(&mount).unwrap();
                0
            }
            Some(op) if op == "/Add-Package" => {
                let image = value("/Image:").unwrap();
                let package = value("/PackagePath:").unwrap();
                let stem = package.file_stem().unwrap().to_string_lossy().into_owned();
                if self.failing_packages.lock().unwrap().contains(&stem) {
                    return 2;
                }
                let marker = image.join("Windows/servicing/Packages").join(format!("{}.mum", stem));
                fs::create_dir_all(marker.parent().unwrap()).unwrap();
                fs::write(marker, "").unwrap();
                0
            }
            Some(op) if op == "/Add-Driver" => {
                let image = value("/Image:").unwrap();
                let driver = value("/Driver:").unwrap();
                let name = driver.file_name().unwrap().to_string_lossy().into_owned();
                let marker = image.join("Windows/INF").join(format!("{}.added", name));
                fs::create_dir_all(marker.parent().unwrap()).unwrap();
                fs::write(marker, "").unwrap();
                0
            }
            Some(op) if op.starts_with("/Set-") => {
                let image = value("/Image:").unwrap();
                let log = image.join("Windows/intl.log");
                let mut text = fs::read_to_string(&log).unwrap_or_default();
                text.push_str(op);
                text.push('\n');
                fs::write(log, text).unwrap();
                0
            }
            Some(op) if op == "/Cleanup-Wim" => 0,
            other => panic!("unexpected dism invocation {:?}", other),
        }
    }
}

impl Executor for FakeTools {
    fn execute(&self, cmd: &Cmd, mode: OutputMode<'_>) -> Result<CommandResult> {
        let line = cmd.display();
        self.calls.lock().unwrap().push(line.clone());

        if self.unavailable.lock().unwrap().iter().any(|n| line.contains(n.as_str())) {
            return Err(Error::ToolUnavailable {
                program: cmd.program().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }

        let program = Path::new(cmd.program())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let code = self.simulate(&program, cmd.get_args());

        if let OutputMode::Streaming(target) = mode {
            target.relay_line("[==========================50.0%                          ]");
            target.relay_line("[==========================100.0%==========================]");
            target.relay_line("The operation completed successfully.");
        }

        if let Some((needle, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if line.contains(needle.as_str()) {
                token.cancel();
            }
        }

        Ok(CommandResult {
            code,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Where the fake keeps the committed image contents.
pub fn content_dir(wim: &Path) -> PathBuf {
    wim.with_extension("wim.content")
}

/// Fake archives are text manifests: one `relative/path=content` per line.
/// A first line of `CORRUPT` writes one file and then fails.
fn seven_zip(args: &[String]) -> i32 {
    let archive = PathBuf::from(&args[1]);
    let dest = PathBuf::from(args[2].strip_prefix("-o").unwrap());
    let text = fs::read_to_string(archive).unwrap();

    if text.starts_with("CORRUPT") {
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("partial.inf"), "truncated").unwrap();
        return 2;
    }
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (path, content) = line.split_once('=').unwrap();
        let file = dest.join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }
    0
}

pub fn write_archive(path: &Path, entries: &[(&str, &str)]) {
    let text: String = entries
        .iter()
        .map(|(p, c)| format!("{}={}\n", p, c))
        .collect();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

pub fn inf(desc: &str) -> String {
    format!("[Strings] DriverDesc = \"{}\"", desc)
}

/// Sink that cancels a token when it sees an event containing `needle`.
pub struct CancelOnEvent {
    pub inner: MemorySink,
    needle: String,
    token: CancelToken,
}

impl CancelOnEvent {
    pub fn new(needle: &str, token: &CancelToken) -> Self {
        Self {
            inner: MemorySink::new(),
            needle: needle.to_string(),
            token: token.clone(),
        }
    }
}

impl ProgressSink for CancelOnEvent {
    fn emit(&self, event: ProgressEvent) {
        if event.message.contains(self.needle.as_str()) {
            self.token.cancel();
        }
        self.inner.emit(event);
    }
}

/// Test environment with a temporary workspace laid out like a real one.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub tool_root: PathBuf,
    pub driver_dir: PathBuf,
    pub apps_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let tool_root = base_dir.join("adk");
        let driver_dir = base_dir.join("drivers");
        let apps_dir = base_dir.join("apps");
        fs::create_dir_all(&tool_root).expect("Failed to create tool root");

        Self {
            _temp_dir: temp_dir,
            base_dir,
            tool_root,
            driver_dir,
            apps_dir,
        }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.base_dir.join("pe")
    }

    pub fn iso(&self) -> PathBuf {
        self.base_dir.join("out/pe.iso")
    }

    /// Small document pointing at the workspace, every step enabled.
    pub fn doc(&self) -> ConfigDocument {
        let mut doc = ConfigDocument::default();
        doc.paths.image_dir = "pe".into();
        doc.paths.tool_root = "adk".into();
        doc.paths.driver_dir = "drivers".into();
        doc.paths.apps_dir = "apps".into();
        doc.paths.output = "out/pe.iso".into();
        doc.packages.feature = vec![
            PackageSpec::new("WinPE-WMI", "WMI"),
            PackageSpec::new("WinPE-NetFx", ".NET"),
            PackageSpec::new("WinPE-PowerShell", "PowerShell"),
        ];
        doc.packages.language_packs = vec![PackageSpec::new("WinPE-WMI_zh-cn", "WMI resources")];
        doc.packages.fonts = vec![PackageSpec::new("WinPE-FontSupport-ZH-CN", "Fonts")];
        doc.external_apps = vec![ExternalApp {
            source: "DiskGenius.exe".into(),
            destination: "Windows/System32".into(),
            description: "Partition tool".into(),
        }];
        doc.custom_dirs = vec!["Tools".into()];
        doc.drivers.scratch_dir = "scratch".into();
        doc.set_optional_steps(true);
        doc
    }

    pub fn config(&self, doc: &ConfigDocument) -> BuildConfiguration {
        doc.snapshot(&self.base_dir).expect("valid configuration")
    }

    /// Package file under the tool root, e.g. `WinPE-WMI` or `zh-cn/WinPE-WMI_zh-cn`.
    pub fn add_package(&self, name: &str) {
        let path = self.tool_root.join(format!("{}.cab", name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "cab").unwrap();
    }

    pub fn add_driver_dir(&self, name: &str) {
        let dir = self.driver_dir.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("driver.inf"), inf(name)).unwrap();
    }

    pub fn add_app(&self, name: &str) {
        fs::create_dir_all(&self.apps_dir).unwrap();
        fs::write(self.apps_dir.join(name), "MZ").unwrap();
    }

    /// Everything a default run would install.
    pub fn populate(&self) {
        for name in ["WinPE-WMI", "WinPE-NetFx", "WinPE-PowerShell", "WinPE-FontSupport-ZH-CN"] {
            self.add_package(name);
        }
        self.add_package("zh-cn/WinPE-WMI_zh-cn");
        self.add_driver_dir("RAID");
        self.add_driver_dir("Network");
        self.add_app("DiskGenius.exe");
    }

    /// Provision the working image up front, outside any run.
    pub fn provision(&self, tools: &FakeTools) {
        let cmd = pebuild::image::ToolKit::default().provision(&self.image_dir());
        tools.execute(&cmd, OutputMode::Captured).unwrap();
    }

    /// Committed image contents as the fake servicing tool keeps them.
    pub fn committed(&self) -> PathBuf {
        content_dir(&self.image_dir().join("media/sources/boot.wim"))
    }
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a path does not exist.
pub fn assert_absent(path: &Path) {
    assert!(!path.exists(), "Expected {} to be absent", path.display());
}
