//! Language model loading.
//!
//! The model is a spaCy-style package on disk:
//!
//! ```text
//! <model_dir>/<model_name>/meta.json          {"lang", "name", "version", "pipeline"}
//! <model_dir>/<model_name>/vocab/strings.json ["the", "of", ...]
//! ```
//!
//! Loading is blocking and happens once per process. The loaded `SharedModel`
//! is never mutated afterwards.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model package not found at {}", path.display())]
    Missing { path: PathBuf },

    #[error("model package at {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("model package is incompatible: expected '{expected}', found '{found}'")]
    Incompatible { expected: String, found: String },
}

/// The expensive in-memory resource shared read-only by request handlers.
#[derive(Debug)]
pub struct SharedModel {
    name: String,
    version: String,
    pipeline: Vec<String>,
    vocab: HashSet<String>,
}

impl SharedModel {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        pipeline: Vec<String>,
        vocab: HashSet<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            pipeline,
            vocab,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn pipeline(&self) -> &[String] {
        &self.pipeline
    }

    pub fn vocab_len(&self) -> usize {
        self.vocab.len()
    }
}

/// Source of the shared model. `load` blocks and is called at most once.
pub trait ModelLoader: Send + 'static {
    /// Name of the model this loader produces, used in diagnostics.
    fn model_name(&self) -> &str;

    fn load(&self) -> Result<SharedModel, ModelLoadError>;
}

#[derive(Debug, Deserialize)]
struct PackageMeta {
    lang: String,
    name: String,
    version: String,
    #[serde(default)]
    pipeline: Vec<String>,
}

/// Loads a model package from `<model_dir>/<model_name>`.
#[derive(Debug, Clone)]
pub struct PackageModelLoader {
    model_dir: PathBuf,
    model_name: String,
}

impl PackageModelLoader {
    pub fn new(model_dir: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            model_name: model_name.into(),
        }
    }

    pub fn package_dir(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }

    fn read_meta(&self, package: &Path) -> Result<PackageMeta, ModelLoadError> {
        let path = package.join("meta.json");
        if !path.is_file() {
            return Err(ModelLoadError::Missing { path });
        }
        let raw = fs::read_to_string(&path).map_err(|e| ModelLoadError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ModelLoadError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }

    fn read_vocab(&self, package: &Path) -> Result<HashSet<String>, ModelLoadError> {
        let path = package.join("vocab").join("strings.json");
        let raw = fs::read_to_string(&path).map_err(|e| ModelLoadError::Corrupt {
            path: path.clone(),
            reason: format!("vocabulary unreadable: {e}"),
        })?;
        let strings: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| ModelLoadError::Corrupt {
                path,
                reason: e.to_string(),
            })?;
        Ok(strings.into_iter().collect())
    }
}

impl ModelLoader for PackageModelLoader {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn load(&self) -> Result<SharedModel, ModelLoadError> {
        let package = self.package_dir();
        if !package.is_dir() {
            return Err(ModelLoadError::Missing { path: package });
        }

        let meta = self.read_meta(&package)?;
        let found = format!("{}_{}", meta.lang, meta.name);
        if found != self.model_name {
            return Err(ModelLoadError::Incompatible {
                expected: self.model_name.clone(),
                found,
            });
        }
        if meta.pipeline.is_empty() {
            return Err(ModelLoadError::Corrupt {
                path: package,
                reason: "meta.json declares no pipeline components".to_string(),
            });
        }
        debug!("Model {} v{} pipeline: {:?}", found, meta.version, meta.pipeline);

        let vocab = self.read_vocab(&package)?;
        info!(
            "Loaded model {} v{} ({} vocabulary strings)",
            found,
            meta.version,
            vocab.len()
        );

        Ok(SharedModel::new(found, meta.version, meta.pipeline, vocab))
    }
}
