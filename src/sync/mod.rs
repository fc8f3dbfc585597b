//! Sync - Master/Slave Target Distribution
//!
//! ## Responsibilities
//!
//! - Master camera publishes its per-feature targets after each cycle
//! - Slave cameras cache received targets and recenter their gates on
//!   them, falling back to configured bands when a target goes stale
//!
//! ## Design
//!
//! - Transport is a trait so the in-process broadcast used here can be
//!   swapped for a networked bus without touching the engine
//! - The cache is written only by its listener task, readers take the
//!   lock briefly per feature lookup

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Topic prefix, full topic is `features.target.<feature_name>`
pub const TARGET_TOPIC_PREFIX: &str = "features.target.";

/// Buffered messages per subscriber before lag drops the oldest
const CHANNEL_CAPACITY: usize = 64;

/// One published feature target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFeature {
    pub feature_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source_camera_id: String,
}

/// Message bus seam between cameras
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
    /// Open a subscription covering all target topics
    async fn subscribe(&self) -> Result<mpsc::Receiver<(String, Vec<u8>)>>;
}

/// In-process transport over a tokio broadcast channel
pub struct BroadcastSyncTransport {
    tx: broadcast::Sender<(String, Vec<u8>)>,
}

impl BroadcastSyncTransport {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for BroadcastSyncTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for BroadcastSyncTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // No subscribers is fine, targets are advisory
        let _ = self.tx.send((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<(String, Vec<u8>)>> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if out_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "sync subscriber lagged, targets dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out_rx)
    }
}

/// Publishes the master's targets after each adjustment cycle
pub struct TargetPublisher {
    transport: Arc<dyn SyncTransport>,
    camera_id: String,
}

impl TargetPublisher {
    pub fn new(transport: Arc<dyn SyncTransport>, camera_id: impl Into<String>) -> Self {
        Self {
            transport,
            camera_id: camera_id.into(),
        }
    }

    pub async fn publish_target(&self, feature_name: &str, value: f64) -> Result<()> {
        let target = TargetFeature {
            feature_name: feature_name.to_string(),
            value,
            timestamp: Utc::now(),
            source_camera_id: self.camera_id.clone(),
        };
        let topic = format!("{}{}", TARGET_TOPIC_PREFIX, feature_name);
        let payload = serde_json::to_vec(&target)?;
        self.transport.publish(&topic, payload).await?;
        tracing::debug!(
            camera_id = %self.camera_id,
            feature = %feature_name,
            value,
            "published feature target"
        );
        Ok(())
    }
}

/// Slave-side cache of the most recent target per feature
pub struct TargetCache {
    targets: Arc<RwLock<HashMap<String, TargetFeature>>>,
    staleness: Duration,
}

impl TargetCache {
    pub fn new(staleness: Duration) -> Self {
        Self {
            targets: Arc::new(RwLock::new(HashMap::new())),
            staleness,
        }
    }

    /// Spawn the listener task feeding this cache from the transport
    pub async fn start(&self, transport: Arc<dyn SyncTransport>) -> Result<()> {
        let mut rx = transport.subscribe().await?;
        let targets = Arc::clone(&self.targets);
        tokio::spawn(async move {
            while let Some((topic, payload)) = rx.recv().await {
                if !topic.starts_with(TARGET_TOPIC_PREFIX) {
                    continue;
                }
                match serde_json::from_slice::<TargetFeature>(&payload) {
                    Ok(target) => {
                        targets
                            .write()
                            .await
                            .insert(target.feature_name.clone(), target);
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "undecodable target payload");
                    }
                }
            }
        });
        Ok(())
    }

    /// Latest target for a feature, None when absent or stale
    pub async fn fresh_target(&self, feature_name: &str) -> Option<f64> {
        let targets = self.targets.read().await;
        let target = targets.get(feature_name)?;
        let age = Utc::now().signed_duration_since(target.timestamp);
        if age.num_milliseconds() < 0 || age.to_std().ok()? > self.staleness {
            tracing::debug!(feature = %feature_name, "cached target is stale, ignoring");
            return None;
        }
        Some(target.value)
    }

    /// Test and bootstrap hook, inserts a target directly
    pub async fn insert(&self, target: TargetFeature) {
        self.targets
            .write()
            .await
            .insert(target.feature_name.clone(), target);
    }
}

/// Parse the feature name back out of a target topic
pub fn feature_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix(TARGET_TOPIC_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_cache() {
        let transport: Arc<dyn SyncTransport> = Arc::new(BroadcastSyncTransport::new());
        let cache = TargetCache::new(Duration::from_secs(30));
        cache.start(Arc::clone(&transport)).await.expect("start");
        // Listener task must be subscribed before the publish lands
        tokio::task::yield_now().await;

        let publisher = TargetPublisher::new(Arc::clone(&transport), "cam1");
        publisher
            .publish_target("brightness", 0.55)
            .await
            .expect("publish");

        let mut value = None;
        for _ in 0..50 {
            value = cache.fresh_target("brightness").await;
            if value.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(value, Some(0.55));
    }

    #[tokio::test]
    async fn test_stale_target_is_ignored() {
        let cache = TargetCache::new(Duration::from_secs(30));
        cache
            .insert(TargetFeature {
                feature_name: "brightness".to_string(),
                value: 0.55,
                timestamp: Utc::now() - chrono::Duration::seconds(120),
                source_camera_id: "cam1".to_string(),
            })
            .await;
        assert_eq!(cache.fresh_target("brightness").await, None);
    }

    #[tokio::test]
    async fn test_unknown_feature_is_none() {
        let cache = TargetCache::new(Duration::from_secs(30));
        assert_eq!(cache.fresh_target("saturation").await, None);
    }

    #[test]
    fn test_topic_round_trip() {
        assert_eq!(
            feature_from_topic("features.target.brightness"),
            Some("brightness")
        );
        assert_eq!(feature_from_topic("other.topic"), None);
    }
}
