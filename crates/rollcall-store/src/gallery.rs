//! Per-person embedding gallery files.
//!
//! One JSON file per enrolled person, keyed by roll number, holding an
//! ordered sequence of same-length float vectors. Writes go to a temp file
//! in the same directory and are renamed into place, so a reader never
//! observes a half-written gallery.

use rollcall_core::Embedding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery payload unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("gallery dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid gallery key {0:?}: keys must not contain path separators")]
    InvalidKey(String),
}

/// On-disk payload. `dim` is recorded explicitly so an empty gallery and a
/// corrupted vector list stay distinguishable on read.
#[derive(Serialize, Deserialize)]
struct GalleryFile {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

/// Directory of gallery files, one per enrolled person.
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Stable handle for a person's gallery.
    pub fn gallery_path(&self, roll_number: &str) -> PathBuf {
        self.root.join(format!("{roll_number}.json"))
    }

    /// Serialize `embeddings` (in order) and atomically replace the gallery
    /// for `roll_number`. An empty slice writes a valid empty gallery.
    pub fn write(
        &self,
        roll_number: &str,
        embeddings: &[Embedding],
    ) -> Result<PathBuf, GalleryError> {
        if roll_number.contains(['/', '\\']) || roll_number.contains("..") {
            return Err(GalleryError::InvalidKey(roll_number.to_string()));
        }

        let dim = embeddings.first().map(Embedding::dim).unwrap_or(0);
        for embedding in embeddings {
            if embedding.dim() != dim {
                return Err(GalleryError::DimensionMismatch {
                    expected: dim,
                    got: embedding.dim(),
                });
            }
        }

        let payload = GalleryFile {
            dim,
            vectors: embeddings.iter().map(|e| e.values.clone()).collect(),
        };

        let path = self.gallery_path(roll_number);
        // Temp file lives in the same directory so the rename stays on one
        // filesystem; the UUID suffix keeps concurrent writers to different
        // persons from colliding.
        let tmp = self
            .root
            .join(format!(".{roll_number}.{}.tmp", Uuid::new_v4()));

        fs::write(&tmp, serde_json::to_vec(&payload)?)?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        tracing::debug!(
            roll_number,
            vectors = payload.vectors.len(),
            dim,
            path = %path.display(),
            "gallery written"
        );
        Ok(path)
    }

    /// Load the gallery at `path`, validating that every stored vector
    /// matches the recorded dimensionality.
    pub fn read(&self, path: &Path) -> Result<Vec<Embedding>, GalleryError> {
        let bytes = fs::read(path)?;
        let payload: GalleryFile = serde_json::from_slice(&bytes)?;

        let mut embeddings = Vec::with_capacity(payload.vectors.len());
        for values in payload.vectors {
            if values.len() != payload.dim {
                return Err(GalleryError::DimensionMismatch {
                    expected: payload.dim,
                    got: values.len(),
                });
            }
            embeddings.push(Embedding::new(values));
        }
        Ok(embeddings)
    }
}
