//! Artifact download and on-disk layout.
//!
//! # Layout
//!
//! ```text
//! <output_root>/
//!   <batch_tag>/
//!     20260102_030405_123456_0001_alice-scarf.png
//!     ...
//! ```
//!
//! One directory per batch, flat files inside, no manifest.

pub mod fetcher;
pub mod naming;
pub mod store;

pub use fetcher::{Downloader, HttpDownloader, RemoteFetcher, DOWNLOAD_TIMEOUT_SECS};
pub use naming::{
    slugify, unit_slug, NamingScheme, ARTIFACT_EXTENSION, ARTIFACT_TIMESTAMP_FORMAT,
};
pub use store::{ArtifactStore, PersistedArtifact};
