//! rollcall-core — Face embedding math and gallery matching.
//!
//! Holds the embedding type with its cosine-distance metric, the
//! nearest-gallery matching engine, and the boundary to the external
//! embedding model (ONNX via ort).

pub mod extractor;
pub mod matcher;
pub mod types;

pub use extractor::{ExtractError, Extractor, OnnxExtractor};
pub use matcher::{EnrolledGallery, MatchDecision, Matcher, NearestGalleryMatcher};
pub use types::{DimensionMismatch, Embedding};
