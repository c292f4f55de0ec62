//! Bounded size measurement for quarantine candidates.

use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Item and byte ceilings a candidate must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureLimits {
    pub max_items: u64,
    pub max_bytes: u64,
}

impl MeasureLimits {
    fn exceeded_by(&self, items: u64, bytes: u64) -> bool {
        items > self.max_items || bytes > self.max_bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measurement {
    /// Fully measured and within limits.
    Within { items: u64, bytes: u64 },
    /// A limit was crossed; the walk stopped at that point.
    TooLarge,
    /// The walk hit an error before it could finish.
    Unknown(String),
}

/// Measure one file against the byte ceiling. A file counts as a single
/// item but the item ceiling only applies to folders.
pub fn measure_file(path: &Path, limits: MeasureLimits) -> Measurement {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.len() > limits.max_bytes => Measurement::TooLarge,
        Ok(metadata) => Measurement::Within {
            items: 1,
            bytes: metadata.len(),
        },
        Err(e) => Measurement::Unknown(e.to_string()),
    }
}

/// Walk `path` recursively, counting every entry below it and summing file
/// sizes. Returns as soon as either ceiling is exceeded, so a huge tree
/// costs no more than `max_items` entries.
pub fn measure_dir(path: &Path, limits: MeasureLimits) -> Measurement {
    let mut items = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Measurement::Unknown(e.to_string()),
        };
        items += 1;
        if entry.file_type().is_file() {
            match entry.metadata() {
                Ok(metadata) => bytes = bytes.saturating_add(metadata.len()),
                Err(e) => return Measurement::Unknown(e.to_string()),
            }
        }
        if limits.exceeded_by(items, bytes) {
            tracing::debug!(path = %path.display(), items, bytes, "Measurement stopped at limit");
            return Measurement::TooLarge;
        }
    }
    Measurement::Within { items, bytes }
}
