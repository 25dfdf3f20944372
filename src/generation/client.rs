//! Gated generation client.
//!
//! [`GenerationClient`] is the only path to the remote service. Every call
//! holds an [`AdmissionGate`] permit for its full duration, and every
//! failure comes back as a [`GenerationError`] rather than a panic.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::ark::{ImageGenerationRequest, ImageGenerator, DEFAULT_IMAGE_SIZE};
use super::gate::AdmissionGate;
use crate::error::GenerationError;
use crate::reference::EncodedReference;

/// Opaque handle to a remotely generated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLocator(String);

impl ResultLocator {
    /// Wraps a locator string.
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    /// Returns the locator as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation client shared by every task of a process.
pub struct GenerationClient {
    generator: Arc<dyn ImageGenerator>,
    gate: Arc<AdmissionGate>,
    model: String,
    size: String,
    watermark: bool,
}

impl GenerationClient {
    /// Creates a client that sends requests for `model` through `gate`.
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        gate: Arc<AdmissionGate>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            gate,
            model: model.into(),
            size: DEFAULT_IMAGE_SIZE.to_string(),
            watermark: true,
        }
    }

    /// Sets the resolution class.
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Enables or disables the watermark.
    pub fn with_watermark(mut self, watermark: bool) -> Self {
        self.watermark = watermark;
        self
    }

    /// The admission gate in front of the service.
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Builds the request for a prompt and optional reference.
    pub fn build_request(
        &self,
        prompt: &str,
        reference: Option<&EncodedReference>,
    ) -> ImageGenerationRequest {
        let request = ImageGenerationRequest::new(&self.model, prompt)
            .with_size(&self.size)
            .with_watermark(self.watermark);

        match reference {
            Some(reference) => request.with_reference(reference),
            None => request,
        }
    }

    /// Generates one image and returns its locator.
    pub async fn generate(
        &self,
        prompt: &str,
        reference: Option<&EncodedReference>,
    ) -> Result<ResultLocator, GenerationError> {
        let request = self.build_request(prompt, reference);

        let response = {
            let _permit = self.gate.acquire().await?;
            debug!(
                in_flight = self.gate.in_flight(),
                capacity = self.gate.capacity(),
                "Generation call admitted"
            );
            self.generator.generate(request).await
        };

        response?
            .first_url()
            .map(ResultLocator::new)
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ark::{GeneratedImage, ImageGenerationResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockGenerator {
        url: Option<String>,
        fail: bool,
        requests: Mutex<Vec<ImageGenerationRequest>>,
    }

    impl MockGenerator {
        fn returning(url: Option<&str>) -> Self {
            Self {
                url: url.map(str::to_string),
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                url: None,
                fail: true,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        async fn generate(
            &self,
            request: ImageGenerationRequest,
        ) -> Result<ImageGenerationResponse, GenerationError> {
            self.requests.lock().expect("lock not poisoned").push(request);
            if self.fail {
                return Err(GenerationError::RequestFailed("connection reset".to_string()));
            }
            Ok(ImageGenerationResponse {
                model: Some("mock".to_string()),
                created: None,
                data: vec![GeneratedImage {
                    url: self.url.clone(),
                    size: None,
                }],
            })
        }
    }

    fn client_for(generator: Arc<MockGenerator>) -> GenerationClient {
        GenerationClient::new(generator, Arc::new(AdmissionGate::new(2)), "seedream")
    }

    #[tokio::test]
    async fn test_generate_returns_locator() {
        let generator = Arc::new(MockGenerator::returning(Some("https://cdn/a.png")));
        let client = client_for(Arc::clone(&generator));

        let reference = EncodedReference::new(b"ref".to_vec(), "image/jpeg");
        let locator = client
            .generate("a cat", Some(&reference))
            .await
            .expect("should generate");
        assert_eq!(locator.as_str(), "https://cdn/a.png");

        let requests = generator.requests.lock().expect("lock not poisoned");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "seedream");
        assert!(requests[0]
            .image
            .as_deref()
            .is_some_and(|i| i.starts_with("data:image/jpeg;base64,")));
    }

    #[tokio::test]
    async fn test_generate_without_reference() {
        let generator = Arc::new(MockGenerator::returning(Some("https://cdn/b.png")));
        let client = client_for(Arc::clone(&generator)).with_size("4K").with_watermark(false);

        client.generate("a dog", None).await.expect("should generate");

        let requests = generator.requests.lock().expect("lock not poisoned");
        assert!(requests[0].image.is_none());
        assert_eq!(requests[0].size, "4K");
        assert!(!requests[0].watermark);
    }

    #[tokio::test]
    async fn test_empty_response_is_failure() {
        let client = client_for(Arc::new(MockGenerator::returning(None)));
        let result = client.generate("a cat", None).await;
        assert!(matches!(result, Err(GenerationError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_failure_releases_permit() {
        let client = client_for(Arc::new(MockGenerator::failing()));

        for _ in 0..5 {
            let result = client.generate("a cat", None).await;
            assert!(matches!(result, Err(GenerationError::RequestFailed(_))));
        }

        assert_eq!(client.gate().in_flight(), 0);
        assert_eq!(client.gate().available_permits(), 2);
    }
}
