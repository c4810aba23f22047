//! The fixed, ordered step table.

use std::fmt;

use serde::Serialize;

use super::actions;
use super::controller::{StepContext, StepOutcome};
use crate::config::BuildConfiguration;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    Provision,
    Mount,
    FeaturePackages,
    LanguagePackages,
    Fonts,
    RegionalSettings,
    Drivers,
    ExternalApps,
    CustomDirs,
    Publish,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Mount => "mount",
            Self::FeaturePackages => "feature-packages",
            Self::LanguagePackages => "language-packages",
            Self::Fonts => "fonts",
            Self::RegionalSettings => "regional-settings",
            Self::Drivers => "drivers",
            Self::ExternalApps => "external-apps",
            Self::CustomDirs => "custom-dirs",
            Self::Publish => "publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|step| step.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Provision => "Provision base image",
            Self::Mount => "Mount image",
            Self::FeaturePackages => "Install feature packages",
            Self::LanguagePackages => "Install language packages",
            Self::Fonts => "Install fonts",
            Self::RegionalSettings => "Apply regional settings",
            Self::Drivers => "Install drivers",
            Self::ExternalApps => "Copy external applications",
            Self::CustomDirs => "Create custom directories",
            Self::Publish => "Commit and publish media",
        }
    }

    /// Every step in execution order.
    pub fn all() -> &'static [StepName] {
        &[
            Self::Provision,
            Self::Mount,
            Self::FeaturePackages,
            Self::LanguagePackages,
            Self::Fonts,
            Self::RegionalSettings,
            Self::Drivers,
            Self::ExternalApps,
            Self::CustomDirs,
            Self::Publish,
        ]
    }

    /// Provision and mount always run; everything else has a flag.
    pub fn is_toggleable(&self) -> bool {
        !matches!(self, Self::Provision | Self::Mount)
    }

    /// The customization steps between mount and publish.
    pub fn is_optional(&self) -> bool {
        self.is_toggleable() && *self != Self::Publish
    }

    /// A failure here ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Provision | Self::Mount | Self::Publish)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type StepAction = fn(&mut StepContext<'_>) -> Result<StepOutcome>;

pub struct StepDescriptor {
    pub name: StepName,
    pub ordinal: usize,
    pub enabled: fn(&BuildConfiguration, StepName) -> bool,
    pub action: StepAction,
}

impl StepDescriptor {
    pub fn is_enabled(&self, config: &BuildConfiguration) -> bool {
        (self.enabled)(config, self.name)
    }
}

fn always(_: &BuildConfiguration, _: StepName) -> bool {
    true
}

fn flag(config: &BuildConfiguration, step: StepName) -> bool {
    config.is_enabled(step)
}

pub const STEPS: &[StepDescriptor] = &[
    StepDescriptor {
        name: StepName::Provision,
        ordinal: 0,
        enabled: always,
        action: actions::provision,
    },
    StepDescriptor {
        name: StepName::Mount,
        ordinal: 1,
        enabled: always,
        action: actions::mount,
    },
    StepDescriptor {
        name: StepName::FeaturePackages,
        ordinal: 2,
        enabled: flag,
        action: actions::feature_packages,
    },
    StepDescriptor {
        name: StepName::LanguagePackages,
        ordinal: 3,
        enabled: flag,
        action: actions::language_packages,
    },
    StepDescriptor {
        name: StepName::Fonts,
        ordinal: 4,
        enabled: flag,
        action: actions::fonts,
    },
    StepDescriptor {
        name: StepName::RegionalSettings,
        ordinal: 5,
        enabled: flag,
        action: actions::regional_settings,
    },
    StepDescriptor {
        name: StepName::Drivers,
        ordinal: 6,
        enabled: flag,
        action: actions::drivers,
    },
    StepDescriptor {
        name: StepName::ExternalApps,
        ordinal: 7,
        enabled: flag,
        action: actions::external_apps,
    },
    StepDescriptor {
        name: StepName::CustomDirs,
        ordinal: 8,
        enabled: flag,
        action: actions::custom_dirs,
    },
    StepDescriptor {
        name: StepName::Publish,
        ordinal: 9,
        enabled: flag,
        action: actions::publish,
    },
];
