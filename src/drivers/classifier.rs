//! Driver classification by descriptor content.
//!
//! Each category owns a keyword group. Groups are tried in priority order
//! (RAID, Network, Storage) and the first group with any hit wins, so a
//! combined RAID/storage controller never lands in the generic Storage tree.

use std::fmt;
use std::sync::LazyLock;

use regex::RegexSet;
use serde::Serialize;

const RAID_PATTERNS: &[&str] = &[
    "RAID",
    "MegaRAID",
    "RAIDXpert",
    "NVMe RAID",
    "Intel.*RST",
    "RapidStorage",
    "RST",
    "VROC",
    "SATA RAID",
    "SAS RAID",
    "PERC",
    "LSI",
    "Avago",
    "Broadcom.*RAID",
    "Adaptec",
    "Microsemi",
    "HighPoint",
    "RocketRAID",
    "Promise",
    "FastTrak",
    "Marvell.*RAID",
    "Arrays",
    "Smart ?Array",
    "RSTe",
    "VMD",
    r"iaStor\w*",
    "mrsas",
    "rcraid",
];

const NETWORK_PATTERNS: &[&str] = &[
    "Ethernet",
    "Network",
    "LAN",
    "NIC",
    "Wireless",
    "WiFi",
    "WLAN",
    r"802\.11",
    "Gigabit",
    "10GbE",
    "10Gigabit",
    "Intel.*Network",
    "Realtek.*Network",
    "Broadcom.*Network",
    "Qualcomm.*Network",
];

const STORAGE_PATTERNS: &[&str] = &[
    "AHCI",
    "SATA",
    "SAS",
    "NVMe",
    "IDE",
    "ATAPI",
    "SCSI",
    "Storage Controller",
    "Host Controller",
    "Disk Controller",
    "storahci",
    "stornvme",
];

static BUILTIN: LazyLock<Classifier> = LazyLock::new(|| {
    Classifier::new(RAID_PATTERNS, NETWORK_PATTERNS, STORAGE_PATTERNS).unwrap()
});

/// Output bucket for a driver package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DriverCategory {
    #[serde(rename = "RAID")]
    Raid,
    Network,
    Storage,
    Unclassified,
}

impl DriverCategory {
    /// Directory name under the output root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raid => "RAID",
            Self::Network => "Network",
            Self::Storage => "Storage",
            Self::Unclassified => "Unclassified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raid" => Some(Self::Raid),
            "network" => Some(Self::Network),
            "storage" => Some(Self::Storage),
            "unclassified" => Some(Self::Unclassified),
            _ => None,
        }
    }

    /// Categories that get copied somewhere, in priority order.
    pub fn classified() -> &'static [DriverCategory] {
        &[Self::Raid, Self::Network, Self::Storage]
    }

    pub fn all() -> &'static [DriverCategory] {
        &[Self::Raid, Self::Network, Self::Storage, Self::Unclassified]
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unclassified)
    }
}

impl fmt::Display for DriverCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered keyword groups, compiled once.
pub struct Classifier {
    groups: Vec<(DriverCategory, RegexSet)>,
}

impl Classifier {
    /// Build a classifier from raw patterns. Matching is case-insensitive and
    /// anchored on word boundaries.
    pub fn new(raid: &[&str], network: &[&str], storage: &[&str]) -> Result<Self, regex::Error> {
        let groups = vec![
            (DriverCategory::Raid, compile(raid)?),
            (DriverCategory::Network, compile(network)?),
            (DriverCategory::Storage, compile(storage)?),
        ];
        Ok(Self { groups })
    }

    /// The built-in keyword set.
    pub fn builtin() -> &'static Classifier {
        &BUILTIN
    }

    pub fn classify(&self, text: &str) -> DriverCategory {
        self.groups
            .iter()
            .find(|(_, set)| set.is_match(text))
            .map(|(category, _)| *category)
            .unwrap_or(DriverCategory::Unclassified)
    }
}

fn compile(patterns: &[&str]) -> Result<RegexSet, regex::Error> {
    RegexSet::new(patterns.iter().map(|p| format!(r"(?i)\b(?:{})\b", p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> DriverCategory {
        Classifier::builtin().classify(text)
    }

    #[test]
    fn test_single_category_matches() {
        assert_eq!(
            classify("DriverDesc = \"Intel(R) Ethernet Connection\""),
            DriverCategory::Network
        );
        assert_eq!(classify("Standard NVMe Express Controller"), DriverCategory::Storage);
        assert_eq!(classify("LSI MegaRAID SAS 9361"), DriverCategory::Raid);
        assert_eq!(classify("USB Audio Device"), DriverCategory::Unclassified);
    }

    #[test]
    fn test_service_names() {
        assert_eq!(classify("ServiceBinary = %12%\\iaStorAC.sys"), DriverCategory::Raid);
        assert_eq!(classify("AddService = mrsas, 0x00000002"), DriverCategory::Raid);
        assert_eq!(classify("AddService = rcraid"), DriverCategory::Raid);
        assert_eq!(classify("HPE Smart Array P408i"), DriverCategory::Raid);
        assert_eq!(classify("Intel VMD controller"), DriverCategory::Raid);
        assert_eq!(classify("AddService = stornvme"), DriverCategory::Storage);
        assert_eq!(classify("AddService = storahci"), DriverCategory::Storage);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            classify("realtek pcie gbe family controller, wireless lan"),
            DriverCategory::Network
        );
        assert_eq!(classify("ahci"), DriverCategory::Storage);
    }

    #[test]
    fn test_word_boundaries() {
        // "ide" inside "provider" must not count as IDE.
        assert_eq!(classify("Provider = Contoso"), DriverCategory::Unclassified);
        assert_eq!(classify("Standard Dual Channel PCI IDE Controller"), DriverCategory::Storage);
    }

    #[test]
    fn test_raid_outranks_storage_in_any_order() {
        assert_eq!(classify("SATA AHCI controller with RAID mode"), DriverCategory::Raid);
        assert_eq!(classify("RAID mode for SATA AHCI controller"), DriverCategory::Raid);
    }

    #[test]
    fn test_raid_outranks_network() {
        assert_eq!(classify("Combined RAID and Ethernet iSCSI adapter"), DriverCategory::Raid);
    }

    #[test]
    fn test_network_outranks_storage() {
        assert_eq!(classify("Network SCSI offload"), DriverCategory::Network);
    }

    #[test]
    fn test_category_names_roundtrip() {
        for category in DriverCategory::all() {
            assert_eq!(DriverCategory::parse(category.as_str()), Some(*category));
        }
    }

    #[test]
    fn test_custom_groups() {
        let classifier = Classifier::new(&["Foo"], &["Bar"], &["Baz"]).unwrap();
        assert_eq!(classifier.classify("bar baz"), DriverCategory::Network);
        assert_eq!(classifier.classify("nothing"), DriverCategory::Unclassified);
        assert!(Classifier::new(&["("], &[], &[]).is_err());
    }
}
