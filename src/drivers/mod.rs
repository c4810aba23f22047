//! Driver discovery, classification and archive extraction.

pub mod classifier;
pub mod extract;
pub mod package;
pub mod scan;

pub use classifier::{Classifier, DriverCategory};
pub use extract::{ArchiveFilter, ArchiveTool, BatchSummary, CategoryCounts, Extractor};
pub use package::{discover_packages, read_descriptor, DriverPackage};
pub use scan::{ScanEntry, ScanReport};
