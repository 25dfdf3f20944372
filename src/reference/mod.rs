//! Reference images: loading from the input root and inline encoding.
//!
//! The encoder is deliberately forgiving. A reference that cannot be read
//! turns into `None` and the task generates without it.

pub mod encoder;

pub use encoder::{
    discover_references, media_type_for, EncodedReference, ReferenceEncoder, DEFAULT_MEDIA_TYPE,
    IMAGE_EXTENSIONS,
};
