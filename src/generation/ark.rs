//! Client for the Volcengine Ark images API.
//!
//! The wire format follows the OpenAI-style `images/generations` endpoint
//! that Ark exposes for its Seedream models.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::reference::EncodedReference;

/// Default API base URL.
pub const DEFAULT_ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// Default image model.
pub const DEFAULT_ARK_MODEL: &str = "doubao-seedream-4-5-251128";

/// Default resolution class.
pub const DEFAULT_IMAGE_SIZE: &str = "2K";

/// Default timeout for one generation request.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Request body for an image generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    /// Model identifier.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Inline reference image as a `data:` URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Multi-image ("sequential") output mode; always `disabled` here.
    pub sequential_image_generation: String,
    /// Response delivery; always `url`.
    pub response_format: String,
    /// Resolution class, e.g. `2K`.
    pub size: String,
    /// Streaming responses; always off.
    pub stream: bool,
    /// Whether the service adds its watermark.
    pub watermark: bool,
}

impl ImageGenerationRequest {
    /// Creates a request with the fixed single-image, URL-response shape.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            image: None,
            sequential_image_generation: "disabled".to_string(),
            response_format: "url".to_string(),
            size: DEFAULT_IMAGE_SIZE.to_string(),
            stream: false,
            watermark: true,
        }
    }

    /// Attaches a reference image.
    pub fn with_reference(mut self, reference: &EncodedReference) -> Self {
        self.image = Some(reference.to_data_url());
        self
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
}

/// One generated image entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Download URL for the image.
    #[serde(default)]
    pub url: Option<String>,
    /// Pixel size reported by the service, e.g. `2048x2048`.
    #[serde(default)]
    pub size: Option<String>,
}

/// Response body of a successful generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    /// Model that served the request.
    #[serde(default)]
    pub model: Option<String>,
    /// Unix timestamp of creation.
    #[serde(default)]
    pub created: Option<i64>,
    /// Generated images.
    #[serde(default)]
    pub data: Vec<GeneratedImage>,
}

impl ImageGenerationResponse {
    /// URL of the first generated image, if present and non-empty.
    pub fn first_url(&self) -> Option<&str> {
        self.data
            .first()
            .and_then(|image| image.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// Anything that can turn a generation request into a response.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Performs one generation call.
    async fn generate(
        &self,
        request: ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse, GenerationError>;
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// HTTP client for the Ark images API.
pub struct ArkImageClient {
    api_key: String,
    base_url: String,
    http_client: Client,
}

impl ArkImageClient {
    /// Creates a client with its own HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns `GenerationError::MissingApiKey` for an empty key and
    /// `GenerationError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed(format!("HTTP client setup: {}", e)))?;
        Self::with_http_client(api_key, base_url, http_client)
    }

    /// Creates a client on top of an existing `reqwest::Client`.
    pub fn with_http_client(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        http_client: Client,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// API key for logs: first and last four characters, or all stars for
    /// short keys.
    pub fn api_key_masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }

        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

#[async_trait]
impl ImageGenerator for ArkImageClient {
    async fn generate(
        &self,
        request: ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse, GenerationError> {
        let url = format!("{}/images/generations", self.base_url);

        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                return Err(GenerationError::Api {
                    status: status_code,
                    code: error_response
                        .error
                        .code
                        .unwrap_or_else(|| "unknown".to_string()),
                    message: error_response.error.message,
                });
            }

            return Err(GenerationError::Api {
                status: status_code,
                code: "unknown".to_string(),
                message: error_text,
            });
        }

        http_response
            .json::<ImageGenerationResponse>()
            .await
            .map_err(|e| GenerationError::ParseError(e.to_string()))
    }
}
