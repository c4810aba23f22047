//! Driver classification, archive extraction and inventory.

mod helpers;

use std::fs;
use std::path::{Path, PathBuf};

use helpers::{assert_absent, assert_file_exists, inf, write_archive, FakeTools, TestEnv};
use pebuild::cancel::CancelToken;
use pebuild::drivers::{
    ArchiveFilter, ArchiveTool, Classifier, DriverCategory, Extractor, ScanReport,
};
use pebuild::process::StreamTarget;
use pebuild::progress::MemorySink;

fn extractor() -> Extractor<'static> {
    Extractor::new(ArchiveTool::SevenZip(PathBuf::from("7z")), Classifier::builtin())
}

fn mixed_archive(path: &Path) {
    write_archive(
        path,
        &[
            ("RAID/megasas/megasas.inf", inf("LSI MegaRAID SAS 9361").as_str()),
            ("RAID/megasas/megasas.sys", "bin"),
            ("LAN/e1d/e1d.inf", inf("Intel(R) Ethernet Connection I219-V").as_str()),
            ("NVMe/stornvme/stornvme.inf", inf("Standard NVMe Express Controller").as_str()),
            ("Audio/hda/hda.inf", inf("High Definition Audio Device").as_str()),
        ],
    );
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn test_raid_wins_over_storage_in_any_order() {
    let classifier = Classifier::builtin();
    for text in [
        "SATA AHCI RAID Controller",
        "RAID controller with SATA ports",
        "NVMe RAID",
        "Storage Controller (RAID mode)",
    ] {
        assert_eq!(classifier.classify(text), DriverCategory::Raid, "{}", text);
    }
}

#[test]
fn test_classification_is_deterministic() {
    let classifier = Classifier::builtin();
    let texts = [
        inf("Intel(R) Rapid Storage Technology RST VMD Controller"),
        inf("Realtek PCIe GbE Family Controller Network"),
        inf("Standard SATA AHCI Controller"),
        inf("USB Mass Storage"),
    ];
    let first: Vec<DriverCategory> = texts.iter().map(|t| classifier.classify(t)).collect();
    for _ in 0..1000 {
        let again: Vec<DriverCategory> = texts.iter().map(|t| classifier.classify(t)).collect();
        assert_eq!(again, first);
    }
    assert_eq!(
        first,
        [
            DriverCategory::Raid,
            DriverCategory::Network,
            DriverCategory::Storage,
            DriverCategory::Unclassified
        ]
    );
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn test_extract_files_whole_packages_by_category() {
    let env = TestEnv::new();
    let tools = FakeTools::new();
    let archive = env.base_dir.join("archives/DP_MassStorage_test.7z");
    mixed_archive(&archive);
    let scratch = env.base_dir.join("scratch");
    let out = env.base_dir.join("sorted");

    let counts = extractor()
        .extract_and_classify(&tools, &archive, &scratch, &out)
        .unwrap();

    assert_eq!(counts.get(DriverCategory::Raid), 1);
    assert_eq!(counts.get(DriverCategory::Network), 1);
    assert_eq!(counts.get(DriverCategory::Storage), 1);
    assert_eq!(counts.get(DriverCategory::Unclassified), 1);

    // The binary next to the descriptor travels with it.
    assert_file_exists(&out.join("RAID/DP_MassStorage_test/RAID/megasas/megasas.sys"));
    assert_file_exists(&out.join("Network/DP_MassStorage_test/LAN/e1d/e1d.inf"));
    assert_file_exists(&out.join("Storage/DP_MassStorage_test/NVMe/stornvme/stornvme.inf"));
    assert_absent(&out.join("Unclassified"));
    assert_absent(&scratch.join("DP_MassStorage_test"));
}

#[test]
fn test_rerun_skips_existing_destinations() {
    let env = TestEnv::new();
    let tools = FakeTools::new();
    let archive = env.base_dir.join("DP_LAN_test.7z");
    mixed_archive(&archive);
    let scratch = env.base_dir.join("scratch");
    let out = env.base_dir.join("sorted");

    extractor()
        .extract_and_classify(&tools, &archive, &scratch, &out)
        .unwrap();
    let marker = out.join("RAID/DP_LAN_test/RAID/megasas/local-edit.txt");
    fs::write(&marker, "edited").unwrap();

    let counts = extractor()
        .extract_and_classify(&tools, &archive, &scratch, &out)
        .unwrap();
    assert_eq!(counts.already_present, 3);
    assert_file_exists(&marker);
}

#[test]
fn test_scratch_removed_when_extraction_fails() {
    let env = TestEnv::new();
    let tools = FakeTools::new();
    let archive = env.base_dir.join("DP_LAN_broken.7z");
    fs::write(&archive, "CORRUPT").unwrap();
    let scratch = env.base_dir.join("scratch");

    let out = env.base_dir.join("out");
    let result = extractor().extract_and_classify(&tools, &archive, &scratch, &out);

    assert!(result.is_err());
    assert_eq!(tools.count("7z x"), 1);
    assert_absent(&scratch.join("DP_LAN_broken"));
}

#[test]
fn test_archives_sharing_a_stem_are_filed_separately() {
    let env = TestEnv::new();
    let tools = FakeTools::new();
    let source = env.base_dir.join("archives");
    write_archive(
        &source.join("DP_LAN_x.7z"),
        &[("e1d/e1d.inf", inf("Intel(R) Ethernet Connection").as_str())],
    );
    write_archive(
        &source.join("DP_LAN_x.zip"),
        &[("e1d/e1d.inf", inf("Intel(R) Ethernet Connection I225").as_str())],
    );
    let scratch = env.base_dir.join("scratch");
    let out = env.base_dir.join("sorted");
    let sink = MemorySink::new();
    let cancel = CancelToken::new();

    let summary = extractor()
        .extract_dir(
            &tools,
            &source,
            &ArchiveFilter::default(),
            &scratch,
            &out,
            StreamTarget::new(&sink, None, &cancel),
            &cancel,
        )
        .unwrap();

    assert_eq!(summary.archives, 2);
    assert_eq!(summary.counts.get(DriverCategory::Network), 2);
    assert_eq!(summary.counts.already_present, 0);
    assert_file_exists(&out.join("Network/DP_LAN_x_7z/e1d/e1d.inf"));
    assert_file_exists(&out.join("Network/DP_LAN_x_zip/e1d/e1d.inf"));
    assert_absent(&scratch);
}

#[test]
fn test_batch_continues_past_a_bad_archive() {
    let env = TestEnv::new();
    let tools = FakeTools::new();
    let source = env.base_dir.join("archives");
    mixed_archive(&source.join("DP_MassStorage_a.7z"));
    write_archive(
        &source.join("DP_LAN_b.7z"),
        &[("wifi/net.inf", inf("Wireless LAN 802.11ac").as_str())],
    );
    fs::write(source.join("DP_LAN_c.7z"), "CORRUPT").unwrap();
    write_archive(&source.join("DP_Sound_d.7z"), &[("x/x.inf", inf("Ethernet").as_str())]);
    let scratch = env.base_dir.join("scratch");
    let out = env.base_dir.join("sorted");
    let sink = MemorySink::new();
    let cancel = CancelToken::new();

    let summary = extractor()
        .extract_dir(
            &tools,
            &source,
            &ArchiveFilter::default(),
            &scratch,
            &out,
            StreamTarget::new(&sink, None, &cancel),
            &cancel,
        )
        .unwrap();

    assert_eq!(summary.archives, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.counts.get(DriverCategory::Network), 2);
    assert!(!summary.cancelled);
    // Filtered out by name.
    assert_eq!(tools.count("DP_Sound"), 0);
    assert_absent(&scratch);
    assert!(sink.messages().iter().any(|m| m.contains("[3/3]")));
}

#[test]
fn test_batch_stops_between_archives_on_cancel() {
    let env = TestEnv::new();
    let tools = FakeTools::new();
    let source = env.base_dir.join("archives");
    mixed_archive(&source.join("DP_LAN_1.7z"));
    mixed_archive(&source.join("DP_LAN_2.7z"));
    let sink = MemorySink::new();
    let cancel = CancelToken::new();
    tools.cancel_after("DP_LAN_1", &cancel);

    let summary = extractor()
        .extract_dir(
            &tools,
            &source,
            &ArchiveFilter::default(),
            &env.base_dir.join("scratch"),
            &env.base_dir.join("sorted"),
            StreamTarget::new(&sink, None, &cancel),
            &cancel,
        )
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.archives, 1);
    assert_eq!(tools.count("DP_LAN_2"), 0);
}

// =============================================================================
// Inventory
// =============================================================================

#[test]
fn test_scan_reports_sorted_by_category() {
    let env = TestEnv::new();
    let dir = &env.driver_dir;
    for (path, desc) in [
        ("b/net.inf", "Killer Wireless WiFi"),
        ("a/raid.inf", "Intel RST Premium"),
        ("c/usb.inf", "USB Hub"),
        ("d/ahci.inf", "Standard SATA AHCI Controller"),
    ] {
        let file = dir.join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, inf(desc)).unwrap();
    }
    // UTF-16 LE with BOM, as many vendor descriptors ship.
    let mut utf16 = vec![0xFF, 0xFE];
    for unit in inf("Broadcom NetXtreme Gigabit Ethernet").encode_utf16() {
        utf16.extend(unit.to_le_bytes());
    }
    fs::create_dir_all(dir.join("e")).unwrap();
    fs::write(dir.join("e/b57.inf"), utf16).unwrap();

    let report = ScanReport::scan(dir, Classifier::builtin()).unwrap();

    let order: Vec<(&str, DriverCategory)> = report
        .entries
        .iter()
        .map(|e| (e.path.as_str(), e.category))
        .collect();
    assert_eq!(
        order,
        [
            ("a/raid.inf", DriverCategory::Raid),
            ("b/net.inf", DriverCategory::Network),
            ("e/b57.inf", DriverCategory::Network),
            ("d/ahci.inf", DriverCategory::Storage),
            ("c/usb.inf", DriverCategory::Unclassified),
        ]
    );
    assert_eq!(
        report.entries[2].description.as_deref(),
        Some("Broadcom NetXtreme Gigabit Ethernet")
    );

    let json = report.to_json().unwrap();
    assert!(json.contains("\"RAID\""));
}

#[test]
fn test_scan_missing_directory() {
    let env = TestEnv::new();
    let err = ScanReport::scan(&env.base_dir.join("nope"), Classifier::builtin()).unwrap_err();
    assert!(err.is_prerequisite());
}
