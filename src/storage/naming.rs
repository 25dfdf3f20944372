//! Artifact file naming.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::pipeline::TaskUnit;

/// Extension of every persisted artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Wall-clock format with microsecond precision, e.g. `20260102_030405_123456`.
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

const MAX_SLUG_LEN: usize = 48;

/// How artifact file names are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// `<timestamp>.png`.
    ///
    /// Unique only if no two writes in a batch share a microsecond. Collisions
    /// are possible under fast concurrent writes and surface as
    /// `FetchError::ArtifactExists`.
    Timestamp,
    /// `<timestamp>_<sequence>_<slug>.png` with a per-batch counter.
    ///
    /// Unique within a batch directory for the lifetime of the store.
    #[default]
    Sequenced,
}

impl NamingScheme {
    /// File name for an artifact written at `at`.
    ///
    /// `sequence` is only used by [`NamingScheme::Sequenced`].
    pub fn file_name(&self, at: DateTime<Local>, sequence: u64, unit: &TaskUnit) -> String {
        let timestamp = at.format(ARTIFACT_TIMESTAMP_FORMAT);
        match self {
            NamingScheme::Timestamp => format!("{}.{}", timestamp, ARTIFACT_EXTENSION),
            NamingScheme::Sequenced => format!(
                "{}_{:04}_{}.{}",
                timestamp,
                sequence,
                unit_slug(unit),
                ARTIFACT_EXTENSION
            ),
        }
    }
}

impl std::fmt::Display for NamingScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingScheme::Timestamp => write!(f, "timestamp"),
            NamingScheme::Sequenced => write!(f, "sequenced"),
        }
    }
}

impl FromStr for NamingScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "timestamp" => Ok(NamingScheme::Timestamp),
            "sequenced" | "sequence" => Ok(NamingScheme::Sequenced),
            other => Err(format!(
                "unknown naming scheme '{}', expected 'timestamp' or 'sequenced'",
                other
            )),
        }
    }
}

/// Slug identifying a unit: its subject plus the reference file stem.
pub fn unit_slug(unit: &TaskUnit) -> String {
    let stem = unit
        .reference_file()
        .and_then(|name| Path::new(name).file_stem())
        .map(|s| s.to_string_lossy().to_string());

    match stem {
        Some(stem) => slugify(&format!("{}-{}", unit.subject(), stem)),
        None => slugify(unit.subject()),
    }
}

/// Reduces text to a file-name-safe slug.
///
/// Alphanumerics (any script) are kept and lowercased, every other run of
/// characters becomes a single `-`. Empty results become `task`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug.to_string()
    }
}
