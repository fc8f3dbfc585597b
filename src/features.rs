//! Feature measurement seam
//!
//! The adjustment loop consumes scalar image features (brightness,
//! saturation, ...) normalized to [0, 1]. Where those numbers come from
//! is behind `FeatureExtractor`; the daemon ships a JSON file source so
//! an external analysis process can drop per-camera measurements into a
//! watched directory.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One round of measured features for a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub values: HashMap<String, f64>,
    /// Fraction of the frame the analysis mask covered, if reported
    #[serde(default)]
    pub mask_coverage: Option<f64>,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl FeatureSnapshot {
    pub fn value(&self, feature: &str) -> Option<f64> {
        self.values.get(feature).copied()
    }
}

/// Source of per-camera feature measurements
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn measure(&self, camera_id: &str) -> Result<FeatureSnapshot>;
}

/// Reads `<dir>/<camera_id>.json` written by an external analyzer
pub struct JsonFileFeatureSource {
    dir: PathBuf,
}

impl JsonFileFeatureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FeatureExtractor for JsonFileFeatureSource {
    async fn measure(&self, camera_id: &str) -> Result<FeatureSnapshot> {
        let path = self.dir.join(format!("{}.json", camera_id));
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            Error::NotFound(format!(
                "no feature snapshot for {} at {}: {}",
                camera_id,
                path.display(),
                e
            ))
        })?;
        let snapshot: FeatureSnapshot = serde_json::from_slice(&raw)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_snapshot_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cam1.json");
        tokio::fs::write(
            &path,
            r#"{"values": {"brightness": 0.52, "saturation": 0.41}, "mask_coverage": 0.8}"#,
        )
        .await
        .expect("write");

        let source = JsonFileFeatureSource::new(dir.path());
        let snapshot = source.measure("cam1").await.expect("measure");
        assert_eq!(snapshot.value("brightness"), Some(0.52));
        assert_eq!(snapshot.value("saturation"), Some(0.41));
        assert_eq!(snapshot.mask_coverage, Some(0.8));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = JsonFileFeatureSource::new(dir.path());
        let err = source.measure("cam9").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
