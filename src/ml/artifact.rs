//! Persisted model bundle and its human-readable metadata.
//!
//! Bundle layout: `ESTM` magic, format version (u32 LE), SHA-256 of the payload,
//! then the JSON payload. The model and the fitted feature encoder live in the same
//! payload and are only ever loaded together.

use crate::ml::features::{FEATURE_COLUMNS, FeatureEngineer};
use crate::ml::gbdt::GradientBoostedModel;
use crate::ml::metrics::EvaluationMetrics;
use crate::model::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

pub const MODEL_TYPE: &str = "GradientBoostedTrees";
pub const FORMAT_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"ESTM";
const HEADER_LEN: usize = 4 + 4 + 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub trained_at: DateTime<Utc>,
    pub model_type: String,
    pub metrics: EvaluationMetrics,
    /// Top entries only, highest first.
    pub feature_importance: Vec<FeatureImportance>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub feature_columns: Vec<String>,
    pub model: GradientBoostedModel,
    pub features: FeatureEngineer,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    pub fn new(model: GradientBoostedModel, features: FeatureEngineer, metadata: ModelMetadata) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            model,
            features,
            metadata,
        }
    }

    /// Version string stamped on every prediction made with this artifact.
    pub fn model_version(&self) -> String {
        self.metadata.trained_at.to_rfc3339()
    }
}

pub fn write_artifact(path: &Path, artifact: &ModelArtifact) -> Result<(), PipelineError> {
    let payload = serde_json::to_vec(artifact)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&Sha256::digest(&payload));
    bytes.extend_from_slice(&payload);

    publish_atomically(path, &bytes)?;
    info!("Model artifact saved: {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<ModelArtifact, PipelineError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PipelineError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: &str| PipelineError::CorruptArtifact {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(corrupt("not a model bundle"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", version)));
    }
    let (checksum, payload) = bytes[8..].split_at(32);
    if Sha256::digest(payload).as_slice() != checksum {
        return Err(corrupt("checksum mismatch"));
    }

    let artifact: ModelArtifact =
        serde_json::from_slice(payload).map_err(|e| corrupt(&format!("invalid payload: {}", e)))?;
    if artifact.feature_columns.iter().map(String::as_str).ne(FEATURE_COLUMNS.iter().copied()) {
        return Err(corrupt("feature columns do not match this build"));
    }
    Ok(artifact)
}

pub fn write_metadata(path: &Path, metadata: &ModelMetadata) -> Result<(), PipelineError> {
    let json = serde_json::to_vec_pretty(metadata)?;
    publish_atomically(path, &json)?;
    info!("Model metadata saved: {}", path.display());
    Ok(())
}

/// `Ok(None)` when no model has been trained yet.
pub fn read_metadata(path: &Path) -> Result<Option<ModelMetadata>, PipelineError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes to a temp file next to `path`, syncs it, then renames over `path`.
fn publish_atomically(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
