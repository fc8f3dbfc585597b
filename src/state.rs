//! Application state
//!
//! Holds all shared components and state

use crate::concurrency::ConcurrencyController;
use crate::config_store::ConfigStore;
use crate::engine::AdjustmentEngine;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Control configuration file (cameras, features, rules)
    pub config_path: PathBuf,
    /// Directory the external analyzer drops feature snapshots into
    pub features_dir: PathBuf,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: std::env::var("CAMTUNED_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/camtuned/config.json")),
            features_dir: std::env::var("CAMTUNED_FEATURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/camtuned/features")),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub config_store: Arc<ConfigStore>,
    /// Per-camera controllers, keyed by camera_id
    pub controllers: HashMap<String, Arc<ConcurrencyController>>,
    /// Per-camera engines, keyed by camera_id
    pub engines: HashMap<String, Arc<AdjustmentEngine>>,
}
