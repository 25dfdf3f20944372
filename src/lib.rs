//! image-forge: concurrent batch image generation from subjects and
//! reference images.
//!
//! The pipeline reads reference images from an input directory, sends one
//! generation request per (subject, reference) pair to the image service
//! and downloads every result into a per-batch output directory.

// Core modules
pub mod cli;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod reference;
pub mod storage;

// Re-export commonly used error types
pub use error::{BatchError, EncodeError, FailureKind, FetchError, GenerationError};
