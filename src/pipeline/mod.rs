//! Batch pipeline: planning, per-unit execution and aggregation.
//!
//! # Pipeline Flow
//!
//! 1. **Planning**: a [`BatchSpec`] (usually built from a [`BatchPlan`]) is
//!    expanded into one [`TaskUnit`] per (subject, reference) pair
//! 2. **Preparation**: every batch directory is created before any work starts
//! 3. **Execution**: all units run concurrently; only the generation step
//!    is throttled by the admission gate
//! 4. **Aggregation**: each unit yields exactly one [`TaskOutcome`], collected
//!    into a [`BatchReport`]
//!
//! # Example
//!
//! ```rust,ignore
//! use image_forge::pipeline::{BatchOrchestrator, BatchPlan};
//!
//! let plan = BatchPlan::from_yaml_str("subjects: [Alice, Bob]\nreferences: [scarf.jpg]")?;
//! let references = plan.resolve_references(config.input_dir.as_path())?;
//! let spec = plan.into_spec(references)?;
//!
//! let report = orchestrator.run(&spec).await?;
//! println!("{}/{} succeeded", report.succeeded(), report.total());
//! ```

pub mod config;
pub mod orchestrator;
pub mod plan;
pub mod runner;
pub mod types;

// Re-export main types for convenience
pub use config::{ConfigError, ForgeConfig};
pub use orchestrator::{BatchOrchestrator, BatchReport, BatchSpec, PromptBuilder, TagMode};
pub use plan::{BatchPlan, PlanError, PromptTemplate, DEFAULT_PROMPT_TEMPLATE};
pub use runner::TaskRunner;
pub use types::{BatchTag, TaskOutcome, TaskStatus, TaskUnit, BATCH_TAG_FORMAT};
