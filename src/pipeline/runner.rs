//! Task runner: drives one unit through encode, generate and fetch.
//!
//! [`TaskRunner::run`] is total. Whatever goes wrong inside a unit is
//! turned into a [`TaskOutcome`] so that siblings are never affected.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::types::{TaskOutcome, TaskUnit};
use crate::error::FailureKind;
use crate::generation::GenerationClient;
use crate::reference::ReferenceEncoder;
use crate::storage::RemoteFetcher;

/// Composes the encoder, generation client and fetcher for single units.
pub struct TaskRunner {
    encoder: Arc<ReferenceEncoder>,
    client: Arc<GenerationClient>,
    fetcher: Arc<RemoteFetcher>,
}

impl TaskRunner {
    /// Creates a runner from shared pipeline components.
    pub fn new(
        encoder: Arc<ReferenceEncoder>,
        client: Arc<GenerationClient>,
        fetcher: Arc<RemoteFetcher>,
    ) -> Self {
        Self {
            encoder,
            client,
            fetcher,
        }
    }

    /// The generation client, including its admission gate.
    pub fn client(&self) -> &Arc<GenerationClient> {
        &self.client
    }

    /// Runs one unit to completion.
    ///
    /// A missing reference downgrades to a text-only generation; a failed
    /// generation skips the download. At most one artifact is written.
    pub async fn run(&self, unit: TaskUnit) -> TaskOutcome {
        let start = Instant::now();

        info!(
            batch = %unit.batch_tag(),
            sequence = unit.sequence(),
            subject = unit.subject(),
            reference = unit.reference_file().unwrap_or("-"),
            prompt = unit.prompt(),
            "Starting task"
        );

        let reference = unit
            .reference_file()
            .and_then(|name| self.encoder.encode(name));
        let reference_missing = unit.reference_file().is_some() && reference.is_none();

        let locator = match self.client.generate(unit.prompt(), reference.as_ref()).await {
            Ok(locator) => locator,
            Err(e) => {
                let kind = FailureKind::from(&e);
                warn!(
                    batch = %unit.batch_tag(),
                    sequence = unit.sequence(),
                    kind = %kind,
                    error = %e,
                    "Task failed during generation"
                );
                return TaskOutcome::failed(
                    unit,
                    kind,
                    e.to_string(),
                    reference_missing,
                    start.elapsed(),
                );
            }
        };
        drop(reference);

        match self.fetcher.fetch(&locator, &unit).await {
            Ok(artifact) => {
                TaskOutcome::completed(unit, artifact, reference_missing, start.elapsed())
            }
            Err(e) => {
                let kind = FailureKind::from(&e);
                warn!(
                    batch = %unit.batch_tag(),
                    sequence = unit.sequence(),
                    kind = %kind,
                    url = %locator,
                    error = %e,
                    "Task failed during download"
                );
                TaskOutcome::failed(
                    unit,
                    kind,
                    e.to_string(),
                    reference_missing,
                    start.elapsed(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, GenerationError};
    use crate::generation::{
        AdmissionGate, GeneratedImage, ImageGenerationRequest, ImageGenerationResponse,
        ImageGenerator, ResultLocator,
    };
    use crate::pipeline::BatchTag;
    use crate::storage::{ArtifactStore, Downloader, NamingScheme};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockGenerator {
        fail: bool,
        saw_image: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        async fn generate(
            &self,
            request: ImageGenerationRequest,
        ) -> Result<ImageGenerationResponse, GenerationError> {
            self.saw_image
                .lock()
                .expect("lock not poisoned")
                .push(request.image.is_some());
            if self.fail {
                return Err(GenerationError::Api {
                    status: 429,
                    code: "RateLimitExceeded".to_string(),
                    message: "slow down".to_string(),
                });
            }
            Ok(ImageGenerationResponse {
                data: vec![GeneratedImage {
                    url: Some("https://cdn/result.png".to_string()),
                    size: None,
                }],
                ..Default::default()
            })
        }
    }

    struct CountingDownloader {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for CountingDownloader {
        async fn download(&self, locator: &ResultLocator) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::RequestFailed(format!("timeout fetching {}", locator)));
            }
            Ok(b"png".to_vec())
        }
    }

    struct Harness {
        _input: TempDir,
        output: TempDir,
        generator: Arc<MockGenerator>,
        downloader: Arc<CountingDownloader>,
        runner: TaskRunner,
    }

    fn harness(generation_fails: bool, download_fails: bool) -> Harness {
        let input = TempDir::new().expect("temp dir");
        std::fs::write(input.path().join("scarf.jpg"), b"jpeg").expect("write");
        let output = TempDir::new().expect("temp dir");

        let generator = Arc::new(MockGenerator {
            fail: generation_fails,
            saw_image: Mutex::new(Vec::new()),
        });
        let downloader = Arc::new(CountingDownloader {
            fail: download_fails,
            calls: AtomicUsize::new(0),
        });

        let client = GenerationClient::new(
            Arc::clone(&generator) as Arc<dyn ImageGenerator>,
            Arc::new(AdmissionGate::new(2)),
            "seedream",
        );
        let store = Arc::new(ArtifactStore::new(output.path(), NamingScheme::Sequenced));
        let fetcher = RemoteFetcher::new(Arc::clone(&downloader) as Arc<dyn Downloader>, store);
        let runner = TaskRunner::new(
            Arc::new(ReferenceEncoder::new(input.path())),
            Arc::new(client),
            Arc::new(fetcher),
        );

        Harness {
            _input: input,
            output,
            generator,
            downloader,
            runner,
        }
    }

    fn unit(reference: Option<&str>) -> TaskUnit {
        TaskUnit::new(
            0,
            "Alice",
            "Alice wearing the scarf",
            reference.map(str::to_string),
            BatchTag::new("b1").expect("tag"),
        )
    }

    #[tokio::test]
    async fn test_run_success_with_reference() {
        let h = harness(false, false);

        let outcome = h.runner.run(unit(Some("scarf.jpg"))).await;

        assert!(outcome.is_success());
        assert!(!outcome.reference_missing);
        let artifact = outcome.artifact().expect("artifact");
        assert!(artifact.path.starts_with(h.output.path().join("b1")));
        assert_eq!(
            *h.generator.saw_image.lock().expect("lock not poisoned"),
            vec![true]
        );
    }

    #[tokio::test]
    async fn test_run_missing_reference_degrades() {
        let h = harness(false, false);

        let outcome = h.runner.run(unit(Some("missing.jpg"))).await;

        assert!(outcome.is_success());
        assert!(outcome.reference_missing);
        assert_eq!(
            *h.generator.saw_image.lock().expect("lock not poisoned"),
            vec![false]
        );
    }

    #[tokio::test]
    async fn test_run_generation_failure_skips_fetch() {
        let h = harness(true, false);

        let outcome = h.runner.run(unit(Some("scarf.jpg"))).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::ServiceFault));
        assert!(outcome
            .failure_message()
            .is_some_and(|m| m.contains("RateLimitExceeded")));
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);
        assert!(!h.output.path().join("b1").exists());
    }

    #[tokio::test]
    async fn test_run_download_failure() {
        let h = harness(false, true);

        let outcome = h.runner.run(unit(None)).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::TransferFault));
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.reference_missing);
    }

    #[tokio::test]
    async fn test_run_releases_gate_after_failure() {
        let h = harness(true, false);

        for _ in 0..4 {
            h.runner.run(unit(None)).await;
        }

        assert_eq!(h.runner.client().gate().in_flight(), 0);
        assert_eq!(h.runner.client().gate().available_permits(), 2);
    }
}
