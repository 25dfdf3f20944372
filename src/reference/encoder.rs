//! Reference image loading and inline encoding.

use std::path::{Component, Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EncodeError;

/// Media type used when the extension is not a known image type.
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

/// Extensions picked up by reference discovery.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// A reference image held in memory for the duration of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedReference {
    bytes: Vec<u8>,
    media_type: &'static str,
}

impl EncodedReference {
    /// Wraps raw image bytes with their media type.
    pub fn new(bytes: Vec<u8>, media_type: &'static str) -> Self {
        Self { bytes, media_type }
    }

    /// Raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Media type tag, e.g. `image/png`.
    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// Renders the payload as a self-describing `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            BASE64.encode(&self.bytes)
        )
    }
}

/// Maps a file extension to an image media type.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => DEFAULT_MEDIA_TYPE,
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Loads reference files from a fixed input root.
#[derive(Debug, Clone)]
pub struct ReferenceEncoder {
    input_root: PathBuf,
}

impl ReferenceEncoder {
    /// Creates an encoder rooted at `input_root`.
    pub fn new(input_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
        }
    }

    /// Resolves a file name to a path that is guaranteed to live under the input root.
    ///
    /// Absolute paths and `..` components are rejected outright; symlinks that
    /// lead outside the root are caught by comparing canonical paths.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, EncodeError> {
        if file_name.trim().is_empty() {
            return Err(EncodeError::EmptyName);
        }

        let relative = Path::new(file_name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(EncodeError::OutsideRoot(file_name.to_string()));
        }

        let candidate = self.input_root.join(relative);
        if !candidate.exists() {
            return Err(EncodeError::NotFound(candidate));
        }

        let root = self
            .input_root
            .canonicalize()
            .map_err(|source| EncodeError::Read {
                path: self.input_root.clone(),
                source,
            })?;
        let resolved = candidate
            .canonicalize()
            .map_err(|source| EncodeError::Read {
                path: candidate.clone(),
                source,
            })?;
        if !resolved.starts_with(&root) {
            return Err(EncodeError::OutsideRoot(file_name.to_string()));
        }

        Ok(resolved)
    }

    /// Loads and encodes a reference file, reporting why it failed.
    pub fn try_encode(&self, file_name: &str) -> Result<EncodedReference, EncodeError> {
        let path = self.resolve(file_name)?;
        let bytes = std::fs::read(&path).map_err(|source| EncodeError::Read {
            path: path.clone(),
            source,
        })?;

        debug!(
            path = %path.display(),
            bytes = bytes.len(),
            "Encoded reference image"
        );
        Ok(EncodedReference::new(bytes, media_type_for(&path)))
    }

    /// Loads and encodes a reference file.
    ///
    /// Never fails: a missing or unreadable file is logged and yields `None`,
    /// which callers treat as "generate without a reference".
    pub fn encode(&self, file_name: &str) -> Option<EncodedReference> {
        match self.try_encode(file_name) {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(file = file_name, error = %e, "Reference unavailable, continuing without it");
                None
            }
        }
    }
}

/// Lists image files directly under `input_root`, sorted by name.
pub fn discover_references(input_root: &Path) -> Result<Vec<String>, EncodeError> {
    let mut names = Vec::new();

    for entry in WalkDir::new(input_root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| EncodeError::Discovery {
            path: input_root.to_path_buf(),
            message: e.to_string(),
        })?;

        // `Path::is_file` follows symlinks; a dangling link is skipped.
        if !entry.path().is_file() || !is_image_file(entry.path()) {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) => names.push(name.to_string()),
            None => warn!(
                path = %entry.path().display(),
                "Skipping reference with non UTF-8 name"
            ),
        }
    }

    names.sort();
    Ok(names)
}
