//! Batch orchestrator: fan out task units, fan in outcomes.
//!
//! The orchestrator expands a [`BatchSpec`] into [`TaskUnit`]s, prepares the
//! batch directories, launches every unit at once and waits for all of them.
//! Actual parallelism is bounded by the generation client's admission gate,
//! not here.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::runner::TaskRunner;
use super::types::{BatchTag, TaskOutcome, TaskStatus, TaskUnit};
use crate::error::{BatchError, FailureKind};
use crate::storage::{ArtifactStore, PersistedArtifact};

/// Builds the prompt for a (subject, reference) pair.
pub type PromptBuilder = dyn Fn(&str, Option<&str>) -> Result<String, BatchError> + Send + Sync;

/// How units are grouped into output directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    /// One directory for the whole run, named after the start time.
    #[default]
    Shared,
    /// One directory per reference file, named after its stem.
    PerReference,
}

/// Declarative description of a batch.
pub struct BatchSpec {
    /// Subjects to generate for.
    pub subjects: Vec<String>,
    /// Reference file names under the input root.
    pub reference_files: Vec<String>,
    /// Directory grouping.
    pub tag_mode: TagMode,
    prompt_builder: Box<PromptBuilder>,
}

impl BatchSpec {
    /// Creates a spec with a shared batch tag.
    pub fn new<F>(subjects: Vec<String>, reference_files: Vec<String>, prompt_builder: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Result<String, BatchError> + Send + Sync + 'static,
    {
        Self {
            subjects,
            reference_files,
            tag_mode: TagMode::Shared,
            prompt_builder: Box::new(prompt_builder),
        }
    }

    /// Sets the tag mode.
    pub fn with_tag_mode(mut self, tag_mode: TagMode) -> Self {
        self.tag_mode = tag_mode;
        self
    }

    /// Builds the prompt for one pair.
    pub fn build_prompt(&self, subject: &str, reference: Option<&str>) -> Result<String, BatchError> {
        (self.prompt_builder)(subject, reference)
    }
}

impl std::fmt::Debug for BatchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSpec")
            .field("subjects", &self.subjects)
            .field("reference_files", &self.reference_files)
            .field("tag_mode", &self.tag_mode)
            .finish_non_exhaustive()
    }
}

/// Aggregated result of one batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Every batch tag used by the run, in first-seen order.
    pub batch_tags: Vec<BatchTag>,
    /// One outcome per unit, in plan order.
    pub outcomes: Vec<TaskOutcome>,
    /// Wall-clock time of the whole run.
    pub duration: Duration,
}

impl BatchReport {
    /// Number of units in the batch.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of units that produced an artifact.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of units that produced nothing.
    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// Whether every unit produced an artifact.
    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Artifacts written by the run.
    pub fn artifacts(&self) -> impl Iterator<Item = &PersistedArtifact> {
        self.outcomes.iter().filter_map(TaskOutcome::artifact)
    }

    /// Outcomes of failed units.
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Units that ran without their requested reference.
    pub fn degraded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.reference_missing).count()
    }

    /// Failure counts per kind.
    pub fn failure_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.failures().filter_map(TaskOutcome::failure_kind) {
            *counts.entry(kind.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of failures of one kind.
    pub fn count_of(&self, kind: FailureKind) -> usize {
        self.failures()
            .filter(|o| o.failure_kind() == Some(kind))
            .count()
    }

    /// Machine-readable summary.
    pub fn to_json(&self) -> serde_json::Value {
        let tasks: Vec<serde_json::Value> = self
            .outcomes
            .iter()
            .map(|o| {
                let mut entry = serde_json::json!({
                    "sequence": o.unit.sequence(),
                    "batch": o.unit.batch_tag(),
                    "subject": o.unit.subject(),
                    "reference": o.unit.reference_file(),
                    "reference_missing": o.reference_missing,
                    "duration_ms": o.duration.as_millis() as u64,
                });
                match &o.status {
                    TaskStatus::Completed(artifact) => {
                        entry["status"] = "completed".into();
                        entry["artifact"] = artifact.path.display().to_string().into();
                    }
                    TaskStatus::Failed { kind, message } => {
                        entry["status"] = "failed".into();
                        entry["failure_kind"] = kind.to_string().into();
                        entry["error"] = message.clone().into();
                    }
                }
                entry
            })
            .collect();

        serde_json::json!({
            "batches": self.batch_tags,
            "total": self.total(),
            "succeeded": self.succeeded(),
            "failed": self.failed(),
            "degraded_references": self.degraded(),
            "failure_counts": self.failure_counts(),
            "duration_ms": self.duration.as_millis() as u64,
            "tasks": tasks,
        })
    }
}

/// Runs batches against a shared runner and store.
pub struct BatchOrchestrator {
    runner: Arc<TaskRunner>,
    store: Arc<ArtifactStore>,
}

impl BatchOrchestrator {
    /// Creates an orchestrator. The runner and store are built once per
    /// process and shared by every unit.
    pub fn new(runner: Arc<TaskRunner>, store: Arc<ArtifactStore>) -> Self {
        Self { runner, store }
    }

    /// The shared task runner.
    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    /// Expands a spec into task units.
    ///
    /// Units are the cross product subjects x references in subject-major
    /// order. With no references, each subject yields one text-only unit.
    ///
    /// # Errors
    ///
    /// Returns `BatchError` if a tag is invalid or a prompt cannot be built.
    pub fn plan(spec: &BatchSpec, started_at: DateTime<Local>) -> Result<Vec<TaskUnit>, BatchError> {
        let shared_tag = BatchTag::from_start_time(started_at);
        let references: Vec<Option<&str>> = if spec.reference_files.is_empty() {
            vec![None]
        } else {
            spec.reference_files.iter().map(|r| Some(r.as_str())).collect()
        };

        let mut units = Vec::with_capacity(spec.subjects.len() * references.len());
        for subject in &spec.subjects {
            for reference in &references {
                let batch_tag = match (spec.tag_mode, reference) {
                    (TagMode::PerReference, Some(name)) => BatchTag::from_reference(name)?,
                    _ => shared_tag.clone(),
                };
                let prompt = spec.build_prompt(subject, *reference)?;
                units.push(TaskUnit::new(
                    units.len() as u64,
                    subject.clone(),
                    prompt,
                    reference.map(str::to_string),
                    batch_tag,
                ));
            }
        }

        Ok(units)
    }

    /// Plans and runs a batch, returning once every unit has resolved.
    ///
    /// # Errors
    ///
    /// Only setup failures are returned: planning errors and batch
    /// directories that cannot be created. Per-unit failures are reported
    /// in the [`BatchReport`].
    pub async fn run(&self, spec: &BatchSpec) -> Result<BatchReport, BatchError> {
        let start = Instant::now();
        let units = Self::plan(spec, Local::now())?;

        let mut batch_tags: Vec<BatchTag> = Vec::new();
        for unit in &units {
            if !batch_tags.contains(unit.batch_tag()) {
                batch_tags.push(unit.batch_tag().clone());
            }
        }

        for tag in &batch_tags {
            self.store
                .prepare_batch(tag)
                .await
                .map_err(|source| BatchError::OutputDirectory {
                    path: self.store.batch_dir(tag),
                    source,
                })?;
        }

        if units.is_empty() {
            warn!("Batch has no tasks, nothing to run");
        }
        info!(
            tasks = units.len(),
            batches = batch_tags.len(),
            max_in_flight = self.runner.client().gate().capacity(),
            "Launching batch"
        );

        let outcomes = self.run_units(units).await;
        let report = BatchReport {
            batch_tags,
            outcomes,
            duration: start.elapsed(),
        };

        info!(
            total = report.total(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            degraded = report.degraded(),
            duration_ms = report.duration.as_millis() as u64,
            "All tasks finished"
        );

        Ok(report)
    }

    /// Runs already planned units concurrently and collects their outcomes in order.
    pub async fn run_units(&self, units: Vec<TaskUnit>) -> Vec<TaskOutcome> {
        let futures: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let fallback = unit.clone();
                let started = Instant::now();
                AssertUnwindSafe(self.runner.run(unit))
                    .catch_unwind()
                    .map(move |result| match result {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!(
                                batch = %fallback.batch_tag(),
                                sequence = fallback.sequence(),
                                "Task panicked"
                            );
                            TaskOutcome::failed(
                                fallback,
                                FailureKind::Panicked,
                                "task panicked",
                                false,
                                started.elapsed(),
                            )
                        }
                    })
            })
            .collect();

        futures::future::join_all(futures).await
    }
}
