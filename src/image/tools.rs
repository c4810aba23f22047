//! Command lines for the external image tools.
//!
//! Program names are configurable (`[tools]` in the config file) so a kit
//! installed off `PATH` can be addressed by full path.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::process::Cmd;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolKit {
    /// Image servicing tool (mount, unmount, packages, drivers, settings).
    pub dism: String,
    /// Working-directory provisioning script.
    pub copype: String,
    /// Media authoring script.
    pub make_media: String,
    pub diskpart: String,
    /// Architecture passed to the provisioning script.
    pub arch: String,
}

impl Default for ToolKit {
    fn default() -> Self {
        Self {
            dism: "dism".to_string(),
            copype: "copype.cmd".to_string(),
            make_media: "MakeWinPEMedia.cmd".to_string(),
            diskpart: "diskpart".to_string(),
            arch: "amd64".to_string(),
        }
    }
}

fn image_arg(mount_dir: &Path) -> String {
    format!("/Image:{}", mount_dir.display())
}

impl ToolKit {
    /// Programs a full build needs.
    pub fn required_programs(&self) -> [&str; 3] {
        [&self.dism, &self.copype, &self.make_media]
    }

    pub fn provision(&self, image_dir: &Path) -> Cmd {
        Cmd::new(&self.copype)
            .arg(&self.arch)
            .arg_path(image_dir)
            .error_msg("copype")
    }

    pub fn mount(&self, image_file: &Path, index: u32, mount_dir: &Path) -> Cmd {
        Cmd::new(&self.dism)
            .arg("/Mount-Wim")
            .arg(format!("/WimFile:{}", image_file.display()))
            .arg(format!("/Index:{}", index))
            .arg(format!("/MountDir:{}", mount_dir.display()))
            .error_msg("dism /Mount-Wim")
    }

    pub fn unmount(&self, mount_dir: &Path, commit: bool) -> Cmd {
        Cmd::new(&self.dism)
            .arg("/Unmount-Wim")
            .arg(format!("/MountDir:{}", mount_dir.display()))
            .arg(if commit { "/Commit" } else { "/Discard" })
            .error_msg("dism /Unmount-Wim")
    }

    pub fn add_package(&self, mount_dir: &Path, package: &Path) -> Cmd {
        Cmd::new(&self.dism)
            .arg(image_arg(mount_dir))
            .arg("/Add-Package")
            .arg(format!("/PackagePath:{}", package.display()))
            .error_msg("dism /Add-Package")
    }

    pub fn add_driver(&self, mount_dir: &Path, driver_dir: &Path) -> Cmd {
        Cmd::new(&self.dism)
            .arg(image_arg(mount_dir))
            .arg("/Add-Driver")
            .arg(format!("/Driver:{}", driver_dir.display()))
            .arg("/Recurse")
            .error_msg("dism /Add-Driver")
    }

    /// International setting such as `Set-UILang:zh-cn`.
    pub fn intl_setting(&self, mount_dir: &Path, setting: &str) -> Cmd {
        let setting = setting.trim_start_matches('/');
        Cmd::new(&self.dism)
            .arg(image_arg(mount_dir))
            .arg(format!("/{}", setting))
            .error_msg(format!("dism /{}", setting))
    }

    /// Release mounts left behind by crashed or interrupted runs.
    pub fn cleanup_mounts(&self) -> Cmd {
        Cmd::new(&self.dism)
            .arg("/Cleanup-Wim")
            .error_msg("dism /Cleanup-Wim")
    }

    pub fn make_iso(&self, image_dir: &Path, output: &Path) -> Cmd {
        Cmd::new(&self.make_media)
            .args(["/ISO", "/F"])
            .arg_path(image_dir)
            .arg_path(output)
            .error_msg("MakeWinPEMedia /ISO")
    }

    pub fn make_ufd(&self, image_dir: &Path, drive: &str) -> Cmd {
        Cmd::new(&self.make_media)
            .args(["/UFD", "/F"])
            .arg_path(image_dir)
            .arg(drive)
            .error_msg("MakeWinPEMedia /UFD")
    }

    pub fn run_diskpart(&self, script: &Path) -> Cmd {
        Cmd::new(&self.diskpart)
            .arg("/s")
            .arg_path(script)
            .error_msg("diskpart")
    }
}
