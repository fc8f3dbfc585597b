//! End-to-end control loop tests against a scripted protocol and a
//! file-based feature source.

use async_trait::async_trait;
use camtuned::concurrency::ConcurrencyController;
use camtuned::config_store::{
    CameraEndpoint, ConcurrencyConfig, ConfigStore, ControlConfig, FeatureConfig,
    HysteresisConfig, ProtocolConfig, SyncConfig,
};
use camtuned::engine::AdjustmentEngine;
use camtuned::features::JsonFileFeatureSource;
use camtuned::protocol::{CameraProtocol, CommandResult};
use camtuned::sync::{BroadcastSyncTransport, SyncTransport, TargetCache, TargetPublisher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Protocol double: every GET answers the stored value, every SET is
/// applied and logged.
struct ScriptedProtocol {
    values: Mutex<HashMap<String, i64>>,
    set_log: Mutex<Vec<(String, i64)>>,
}

impl ScriptedProtocol {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(HashMap::new()),
            set_log: Mutex::new(Vec::new()),
        })
    }

    fn sets(&self) -> Vec<(String, i64)> {
        self.set_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl CameraProtocol for ScriptedProtocol {
    async fn connect(&self) -> camtuned::Result<()> {
        Ok(())
    }
    async fn disconnect(&self) -> camtuned::Result<()> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        true
    }
    async fn get_parameter(&self, name: &str) -> CommandResult {
        let value = *self
            .values
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(8);
        CommandResult::read(name, value)
    }
    async fn set_parameter(&self, name: &str, value: i64) -> CommandResult {
        self.set_log
            .lock()
            .unwrap()
            .push((name.to_string(), value));
        self.values.lock().unwrap().insert(name.to_string(), value);
        CommandResult::applied(name, value)
    }
    async fn apply_preset(&self, _pairs: &[(String, String)]) -> camtuned::Result<()> {
        Ok(())
    }
}

fn fleet_config() -> ControlConfig {
    ControlConfig {
        cameras: vec![
            CameraEndpoint {
                camera_id: "cam1".to_string(),
                cam_id: 1,
                venue_number: 1,
                host: Some("127.0.0.1".to_string()),
                username: "admin".to_string(),
                password: "admin".to_string(),
                protocol: None,
            },
            CameraEndpoint {
                camera_id: "cam2".to_string(),
                cam_id: 2,
                venue_number: 1,
                host: Some("127.0.0.2".to_string()),
                username: "admin".to_string(),
                password: "admin".to_string(),
                protocol: None,
            },
        ],
        protocol: ProtocolConfig::default(),
        concurrency: ConcurrencyConfig::default(),
        cost_weights: HashMap::new(),
        hysteresis: HysteresisConfig::default(),
        features: vec![FeatureConfig {
            name: "brightness".to_string(),
            acceptable_low: 0.25,
            acceptable_high: 0.5,
            hysteresis: None,
        }],
        adjustment_rules: Vec::new(),
        parameter_ranges: HashMap::new(),
        sync: SyncConfig {
            master_camera_id: Some("cam1".to_string()),
            staleness_secs: 30,
        },
        cycle_interval_ms: 50,
        initial_preset: HashMap::new(),
    }
}

async fn write_brightness(dir: &Path, camera_id: &str, value: f64) {
    let body = format!(r#"{{"values": {{"brightness": {}}}}}"#, value);
    tokio::fs::write(dir.join(format!("{}.json", camera_id)), body)
        .await
        .expect("write snapshot");
}

fn build_engine(
    camera_id: &str,
    protocol: Arc<ScriptedProtocol>,
    features_dir: &Path,
    store: &ConfigStore,
    publisher: Option<TargetPublisher>,
    cache: Option<Arc<TargetCache>>,
) -> AdjustmentEngine {
    let controller = Arc::new(ConcurrencyController::new(
        camera_id,
        protocol as Arc<dyn CameraProtocol>,
        store.config().concurrency.clone(),
    ));
    AdjustmentEngine::new(
        camera_id,
        controller,
        Arc::new(JsonFileFeatureSource::new(features_dir)),
        store.config(),
        publisher,
        cache,
    )
}

#[tokio::test]
async fn test_master_target_steers_slave() {
    let store = ConfigStore::from_config(fleet_config()).expect("config");
    let dir = tempfile::tempdir().expect("tempdir");
    let transport: Arc<dyn SyncTransport> = Arc::new(BroadcastSyncTransport::new());

    let master_protocol = ScriptedProtocol::new();
    let slave_protocol = ScriptedProtocol::new();

    let slave_cache = Arc::new(TargetCache::new(Duration::from_secs(30)));
    slave_cache
        .start(Arc::clone(&transport))
        .await
        .expect("cache start");
    tokio::task::yield_now().await;

    let master = build_engine(
        "cam1",
        master_protocol.clone(),
        dir.path(),
        &store,
        Some(TargetPublisher::new(Arc::clone(&transport), "cam1")),
        None,
    );
    let slave = build_engine(
        "cam2",
        slave_protocol.clone(),
        dir.path(),
        &store,
        None,
        Some(Arc::clone(&slave_cache)),
    );

    write_brightness(dir.path(), "cam1", 0.375).await;
    write_brightness(dir.path(), "cam2", 0.35).await;

    // Master inside its band adjusts nothing but still publishes its target
    let master_report = master.run_cycle().await;
    assert!(master_report.measured);
    assert_eq!(master_report.adjustments_applied, 0);

    let mut target = None;
    for _ in 0..50 {
        target = slave_cache.fresh_target("brightness").await;
        if target.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(target, Some(0.375));

    // 0.35 is within thresholds of the master's 0.375 target
    let slave_report = slave.run_cycle().await;
    assert_eq!(slave_report.adjustments_applied, 0);
    assert!(slave_protocol.sets().is_empty());

    // A dark slave frame drives a single cheapest-parameter correction
    write_brightness(dir.path(), "cam2", 0.15).await;
    let slave_report = slave.run_cycle().await;
    assert_eq!(slave_report.adjustments_applied, 1);
    assert_eq!(slave_protocol.sets(), vec![("ExposureIris".to_string(), 9)]);
}

#[tokio::test]
async fn test_cycle_without_snapshot_is_a_no_op() {
    let store = ConfigStore::from_config(fleet_config()).expect("config");
    let dir = tempfile::tempdir().expect("tempdir");
    let protocol = ScriptedProtocol::new();
    let engine = build_engine("cam1", protocol.clone(), dir.path(), &store, None, None);

    let report = engine.run_cycle().await;
    assert!(!report.measured);
    assert_eq!(report.adjustments_applied, 0);
    assert!(protocol.sets().is_empty());
}

#[tokio::test]
async fn test_repeated_cycles_converge_into_the_band() {
    let store = ConfigStore::from_config(fleet_config()).expect("config");
    let dir = tempfile::tempdir().expect("tempdir");
    let protocol = ScriptedProtocol::new();
    let engine = build_engine("cam1", protocol.clone(), dir.path(), &store, None, None);

    write_brightness(dir.path(), "cam1", 0.15).await;
    for cycle in 0..4 {
        // Each iris step brightens the simulated scene
        write_brightness(dir.path(), "cam1", 0.15 + 0.08 * cycle as f64).await;
        engine.run_cycle().await;
    }
    // 0.378 is within the inner threshold of the 0.375 center, the
    // gate closes and no further sets are issued
    write_brightness(dir.path(), "cam1", 0.378).await;
    let before = protocol.sets().len();
    let report = engine.run_cycle().await;
    assert_eq!(report.adjustments_applied, 0);
    assert_eq!(protocol.sets().len(), before);

    let snapshot = engine.snapshot().await;
    assert!(!snapshot.recent_adjustments.is_empty());
}
