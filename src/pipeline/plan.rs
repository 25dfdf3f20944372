//! Batch plan files and prompt templates.
//!
//! A plan is a small YAML document naming the subjects, the reference
//! images and the prompt template of a batch:
//!
//! ```yaml
//! subjects: ["Alice", "Bob"]
//! references: ["grey scarf.jpeg"]
//! discover_references: false
//! prompt_template: "{{ subject }} wearing the scarf from the reference image, {{ background }}"
//! variations:
//!   background: ["in a snowy street", "in a cafe"]
//! seed: 7
//! tag_mode: shared
//! ```
//!
//! Templates are rendered with Tera. The context holds `subject`,
//! `reference`, `reference_stem` and one randomly picked entry per
//! variation list.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::seq::IndexedRandom;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::orchestrator::{BatchSpec, TagMode};
use crate::error::{BatchError, EncodeError};
use crate::reference::discover_references;

/// Template used when a plan does not name one.
pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "{{ subject }}{% if reference %} wearing the item shown in the reference image{% endif %}";

const RESERVED_KEYS: &[&str] = &["subject", "reference", "reference_stem"];

/// Errors that can occur while loading or expanding a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid plan: {0}")]
    Invalid(String),

    #[error("Invalid prompt template: {0}")]
    Template(String),

    #[error("Reference discovery failed: {0}")]
    Discovery(#[from] EncodeError),
}

/// Declarative batch description loaded from YAML or built from CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    /// Subjects to generate for.
    pub subjects: Vec<String>,
    /// Reference file names under the input root.
    #[serde(default)]
    pub references: Vec<String>,
    /// Also use every image file found directly under the input root.
    #[serde(default)]
    pub discover_references: bool,
    /// Tera template for prompts.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// Named phrase lists; one entry of each is picked per unit.
    #[serde(default)]
    pub variations: BTreeMap<String, Vec<String>>,
    /// Seed for variation picks. Unseeded plans differ between runs.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Directory grouping.
    #[serde(default)]
    pub tag_mode: TagMode,
}

fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            references: Vec::new(),
            discover_references: false,
            prompt_template: default_prompt_template(),
            variations: BTreeMap::new(),
            seed: None,
            tag_mode: TagMode::default(),
        }
    }
}

impl BatchPlan {
    /// Parses a plan from YAML and validates it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PlanError> {
        let plan: Self = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Loads a plan file.
    pub fn from_file(path: &Path) -> Result<Self, PlanError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Checks the plan for structural problems.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.subjects.is_empty() {
            return Err(PlanError::Invalid(
                "at least one subject is required".to_string(),
            ));
        }

        if self.subjects.iter().any(|s| s.trim().is_empty()) {
            return Err(PlanError::Invalid("subjects cannot be blank".to_string()));
        }

        if self.prompt_template.trim().is_empty() {
            return Err(PlanError::Invalid(
                "prompt_template cannot be empty".to_string(),
            ));
        }

        for (name, phrases) in &self.variations {
            if RESERVED_KEYS.contains(&name.as_str()) {
                return Err(PlanError::Invalid(format!(
                    "variation name '{}' is reserved",
                    name
                )));
            }
            if phrases.is_empty() {
                return Err(PlanError::Invalid(format!(
                    "variation '{}' has no phrases",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Final reference list: explicit references followed by discovered
    /// ones, without duplicates.
    pub fn resolve_references(&self, input_root: &Path) -> Result<Vec<String>, PlanError> {
        let mut references = Vec::new();
        for name in &self.references {
            if !references.contains(name) {
                references.push(name.clone());
            }
        }

        if self.discover_references {
            for name in discover_references(input_root)? {
                if !references.contains(&name) {
                    references.push(name);
                }
            }
        }

        Ok(references)
    }

    /// Turns the plan into a runnable spec over the given references.
    pub fn into_spec(self, references: Vec<String>) -> Result<BatchSpec, PlanError> {
        self.validate()?;
        let template = PromptTemplate::new(self.prompt_template, self.variations, self.seed)?;

        Ok(
            BatchSpec::new(self.subjects, references, move |subject, reference| {
                template
                    .render(subject, reference)
                    .map_err(|e| BatchError::Prompt {
                        subject: subject.to_string(),
                        message: e.to_string(),
                    })
            })
            .with_tag_mode(self.tag_mode),
        )
    }
}

/// Tera prompt template with random phrase variations.
pub struct PromptTemplate {
    template: String,
    variations: BTreeMap<String, Vec<String>>,
    rng: Mutex<ChaCha8Rng>,
}

impl PromptTemplate {
    /// Compiles a template. Syntax errors are caught here, not at render time.
    pub fn new(
        template: impl Into<String>,
        variations: BTreeMap<String, Vec<String>>,
        seed: Option<u64>,
    ) -> Result<Self, PlanError> {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        let prompt_template = Self {
            template: template.into(),
            variations,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        };

        let probe = prompt_template.context(
            "subject",
            Some("reference.jpg"),
            &mut ChaCha8Rng::seed_from_u64(0),
        );
        tera::Tera::one_off(&prompt_template.template, &probe, false)
            .map_err(|e| PlanError::Template(describe_tera_error(&e)))?;

        Ok(prompt_template)
    }

    fn context(
        &self,
        subject: &str,
        reference: Option<&str>,
        rng: &mut ChaCha8Rng,
    ) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("subject", subject);
        context.insert("reference", &reference);
        let stem = reference
            .and_then(|r| Path::new(r).file_stem())
            .map(|s| s.to_string_lossy().to_string());
        context.insert("reference_stem", &stem);

        for (name, phrases) in &self.variations {
            if let Some(phrase) = phrases.choose(rng) {
                context.insert(name.as_str(), phrase);
            }
        }
        context
    }

    /// Renders the prompt for one (subject, reference) pair.
    pub fn render(&self, subject: &str, reference: Option<&str>) -> Result<String, PlanError> {
        let context = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.context(subject, reference, &mut rng)
        };

        tera::Tera::one_off(&self.template, &context, false)
            .map(|prompt| prompt.trim().to_string())
            .map_err(|e| PlanError::Template(describe_tera_error(&e)))
    }
}

/// Tera nests the useful message in the error source chain.
fn describe_tera_error(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BatchOrchestrator;
    use chrono::Local;
    use tempfile::TempDir;

    const PLAN_YAML: &str = r#"
subjects: ["Alice", "Bob"]
references: ["scarf.jpg"]
prompt_template: "{{ subject }} wearing {{ reference_stem }}, {{ background }}"
variations:
  background: ["in the snow", "at the beach"]
seed: 42
tag_mode: per_reference
"#;

    #[test]
    fn test_parse_plan() {
        let plan = BatchPlan::from_yaml_str(PLAN_YAML).expect("parse");
        assert_eq!(plan.subjects, vec!["Alice", "Bob"]);
        assert_eq!(plan.references, vec!["scarf.jpg"]);
        assert_eq!(plan.seed, Some(42));
        assert_eq!(plan.tag_mode, TagMode::PerReference);
        assert_eq!(plan.variations["background"].len(), 2);
    }

    #[test]
    fn test_parse_minimal_plan_uses_defaults() {
        let plan = BatchPlan::from_yaml_str("subjects: [Alice]").expect("parse");
        assert_eq!(plan.prompt_template, DEFAULT_PROMPT_TEMPLATE);
        assert!(plan.references.is_empty());
        assert!(!plan.discover_references);
        assert_eq!(plan.tag_mode, TagMode::Shared);
    }

    #[test]
    fn test_validate_rejects_bad_plans() {
        assert!(matches!(
            BatchPlan::from_yaml_str("subjects: []"),
            Err(PlanError::Invalid(_))
        ));
        assert!(matches!(
            BatchPlan::from_yaml_str("subjects: ['  ']"),
            Err(PlanError::Invalid(_))
        ));
        assert!(matches!(
            BatchPlan::from_yaml_str("subjects: [A]\nvariations:\n  pose: []"),
            Err(PlanError::Invalid(_))
        ));
        assert!(matches!(
            BatchPlan::from_yaml_str("subjects: [A]\nvariations:\n  subject: [x]"),
            Err(PlanError::Invalid(_))
        ));
        assert!(matches!(
            BatchPlan::from_yaml_str("subjects: [A"),
            Err(PlanError::Parse(_))
        ));
    }

    #[test]
    fn test_default_template_render() {
        let template =
            PromptTemplate::new(DEFAULT_PROMPT_TEMPLATE, BTreeMap::new(), Some(1)).expect("compile");

        assert_eq!(
            template.render("Alice", Some("scarf.jpg")).expect("render"),
            "Alice wearing the item shown in the reference image"
        );
        assert_eq!(template.render("Alice", None).expect("render"), "Alice");
    }

    #[test]
    fn test_template_syntax_error_detected_early() {
        let result = PromptTemplate::new("{{ subject ", BTreeMap::new(), Some(1));
        assert!(matches!(result, Err(PlanError::Template(_))));
    }

    #[test]
    fn test_template_unknown_variable_detected_early() {
        let result = PromptTemplate::new("{{ subject }} {{ pose }}", BTreeMap::new(), Some(1));
        assert!(matches!(result, Err(PlanError::Template(_))));
    }

    #[test]
    fn test_seeded_variations_are_reproducible() {
        let mut variations = BTreeMap::new();
        variations.insert(
            "background".to_string(),
            vec!["in the snow".to_string(), "at the beach".to_string(), "indoors".to_string()],
        );

        let render_all = || {
            let template = PromptTemplate::new("{{ subject }} {{ background }}", variations.clone(), Some(9))
                .expect("compile");
            (0..10)
                .map(|_| template.render("Alice", None).expect("render"))
                .collect::<Vec<_>>()
        };

        let first = render_all();
        assert_eq!(first, render_all());
        assert!(first.iter().all(|p| p.starts_with("Alice ")));
        assert!(first.iter().all(|p| {
            ["in the snow", "at the beach", "indoors"]
                .iter()
                .any(|b| p.ends_with(b))
        }));
    }

    #[test]
    fn test_into_spec_builds_units() {
        let plan = BatchPlan::from_yaml_str(PLAN_YAML).expect("parse");
        let references = plan.references.clone();
        let spec = plan.into_spec(references).expect("spec");

        let units = BatchOrchestrator::plan(&spec, Local::now()).expect("plan");
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.batch_tag().as_str() == "scarf"));
        assert!(units[0].prompt().starts_with("Alice wearing scarf, "));
        assert!(units[1].prompt().starts_with("Bob wearing scarf, "));
    }

    #[test]
    fn test_resolve_references_with_discovery() {
        let input = TempDir::new().expect("temp dir");
        std::fs::write(input.path().join("a.png"), b"a").expect("write");
        std::fs::write(input.path().join("b.jpg"), b"b").expect("write");
        std::fs::write(input.path().join("readme.md"), b"r").expect("write");

        let plan = BatchPlan {
            subjects: vec!["Alice".to_string()],
            references: vec!["b.jpg".to_string(), "extra.jpg".to_string()],
            discover_references: true,
            ..Default::default()
        };

        let references = plan.resolve_references(input.path()).expect("resolve");
        assert_eq!(references, vec!["b.jpg", "extra.jpg", "a.png"]);

        let plan = BatchPlan {
            discover_references: false,
            ..plan
        };
        assert_eq!(
            plan.resolve_references(input.path()).expect("resolve"),
            vec!["b.jpg", "extra.jpg"]
        );
    }

    #[test]
    fn test_from_file_missing() {
        let dir = TempDir::new().expect("temp dir");
        let result = BatchPlan::from_file(&dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(PlanError::Read { .. })));
    }
}
