//! Core data model for a generation batch.
//!
//! A batch is a set of [`TaskUnit`]s sharing a [`BatchTag`]. Each unit
//! resolves to exactly one [`TaskOutcome`].

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::{BatchError, FailureKind};
use crate::storage::PersistedArtifact;

/// Format used for batch tags derived from the orchestration start time.
pub const BATCH_TAG_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Directory-safe name grouping every artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BatchTag(String);

impl BatchTag {
    /// Creates a tag, rejecting anything that is not a single path segment.
    pub fn new(tag: impl Into<String>) -> Result<Self, BatchError> {
        let tag = tag.into();
        let invalid = |reason: &str| BatchError::InvalidBatchTag {
            tag: tag.clone(),
            reason: reason.to_string(),
        };

        if tag.trim().is_empty() {
            return Err(invalid("tag cannot be empty"));
        }
        if tag == "." || tag == ".." {
            return Err(invalid("tag cannot be a relative path marker"));
        }
        if tag.contains(['/', '\\', '\0']) {
            return Err(invalid("tag cannot contain path separators"));
        }

        Ok(Self(tag))
    }

    /// Tag for a batch started at the given time, e.g. `20260102_030405`.
    pub fn from_start_time(started_at: DateTime<Local>) -> Self {
        Self(started_at.format(BATCH_TAG_FORMAT).to_string())
    }

    /// Tag derived from a reference file name: its stem, e.g. `scarf` for `scarf.jpg`.
    pub fn from_reference(file_name: &str) -> Result<Self, BatchError> {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::new(stem)
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One independent (subject, reference) work item.
///
/// Immutable once built: fields are only readable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskUnit {
    sequence: u64,
    subject: String,
    prompt: String,
    reference_file: Option<String>,
    batch_tag: BatchTag,
}

impl TaskUnit {
    /// Creates a task unit.
    pub fn new(
        sequence: u64,
        subject: impl Into<String>,
        prompt: impl Into<String>,
        reference_file: Option<String>,
        batch_tag: BatchTag,
    ) -> Self {
        Self {
            sequence,
            subject: subject.into(),
            prompt: prompt.into(),
            reference_file,
            batch_tag,
        }
    }

    /// Position of this unit in its batch plan.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Subject the prompt was built for.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Fully rendered prompt text.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Reference file name relative to the input root, if any.
    pub fn reference_file(&self) -> Option<&str> {
        self.reference_file.as_deref()
    }

    /// Batch this unit belongs to.
    pub fn batch_tag(&self) -> &BatchTag {
        &self.batch_tag
    }
}

/// Terminal state of a task unit.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// An artifact was written.
    Completed(PersistedArtifact),
    /// No artifact was produced.
    Failed { kind: FailureKind, message: String },
}

/// Result of driving one task unit through the pipeline.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// The unit that was run.
    pub unit: TaskUnit,
    /// Final status.
    pub status: TaskStatus,
    /// A reference was requested but could not be loaded, so generation ran without it.
    pub reference_missing: bool,
    /// Wall-clock time spent on the unit.
    pub duration: Duration,
}

impl TaskOutcome {
    pub(crate) fn completed(
        unit: TaskUnit,
        artifact: PersistedArtifact,
        reference_missing: bool,
        duration: Duration,
    ) -> Self {
        Self {
            unit,
            status: TaskStatus::Completed(artifact),
            reference_missing,
            duration,
        }
    }

    pub(crate) fn failed(
        unit: TaskUnit,
        kind: FailureKind,
        message: impl Into<String>,
        reference_missing: bool,
        duration: Duration,
    ) -> Self {
        Self {
            unit,
            status: TaskStatus::Failed {
                kind,
                message: message.into(),
            },
            reference_missing,
            duration,
        }
    }

    /// Whether an artifact was produced.
    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Completed(_))
    }

    /// The persisted artifact, if the unit succeeded.
    pub fn artifact(&self) -> Option<&PersistedArtifact> {
        match &self.status {
            TaskStatus::Completed(artifact) => Some(artifact),
            TaskStatus::Failed { .. } => None,
        }
    }

    /// The failure kind, if the unit failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            TaskStatus::Completed(_) => None,
            TaskStatus::Failed { kind, .. } => Some(*kind),
        }
    }

    /// The failure message, if the unit failed.
    pub fn failure_message(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Completed(_) => None,
            TaskStatus::Failed { message, .. } => Some(message),
        }
    }
}
