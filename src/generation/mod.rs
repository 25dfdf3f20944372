//! Remote image generation.
//!
//! - [`ark`]: wire types and the reqwest client for the Ark images API
//! - [`gate`]: the admission gate bounding in-flight calls
//! - [`client`]: the gated client tasks actually call
//!
//! ```ignore
//! use image_forge::generation::{AdmissionGate, ArkImageClient, GenerationClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let ark = ArkImageClient::new(api_key, DEFAULT_ARK_BASE_URL, Duration::from_secs(120))?;
//! let client = GenerationClient::new(Arc::new(ark), Arc::new(AdmissionGate::new(5)), "doubao-seedream-4-5-251128");
//! let locator = client.generate("a red scarf on a mannequin", None).await?;
//! ```

pub mod ark;
pub mod client;
pub mod gate;

pub use ark::{
    ArkImageClient, GeneratedImage, ImageGenerationRequest, ImageGenerationResponse,
    ImageGenerator, DEFAULT_ARK_BASE_URL, DEFAULT_ARK_MODEL, DEFAULT_IMAGE_SIZE,
    REQUEST_TIMEOUT_SECS,
};
pub use client::{GenerationClient, ResultLocator};
pub use gate::{AdmissionGate, AdmissionPermit, DEFAULT_MAX_CONCURRENT_GENERATIONS};
