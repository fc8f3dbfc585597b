//! Initial preset application
//!
//! Cameras come up in whatever state the previous operator left them.
//! Before the first adjustment cycle each camera gets the configured
//! initial preset pushed so the loop starts from a known baseline.

use crate::error::Result;
use crate::protocol::CameraProtocol;
use std::collections::HashMap;
use std::sync::Arc;

/// Order preset entries deterministically by parameter name
pub fn ordered_pairs(preset: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = preset
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

/// Push the initial preset to one camera. Failures are returned so the
/// caller can retry on the next cycle, a preset push never aborts the
/// daemon.
pub async fn apply_initial_preset(
    camera_id: &str,
    protocol: &Arc<dyn CameraProtocol>,
    preset: &HashMap<String, String>,
) -> Result<()> {
    if preset.is_empty() {
        return Ok(());
    }
    let pairs = ordered_pairs(preset);
    tracing::info!(
        camera_id = %camera_id,
        entries = pairs.len(),
        "applying initial preset"
    );
    protocol.apply_preset(&pairs).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_sorted_by_parameter_name() {
        let mut preset = HashMap::new();
        preset.insert("ExposureGain".to_string(), "3".to_string());
        preset.insert("DigitalBrightLevel".to_string(), "7".to_string());
        preset.insert("ExposureIris".to_string(), "11".to_string());
        let pairs = ordered_pairs(&preset);
        let names: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["DigitalBrightLevel", "ExposureGain", "ExposureIris"]
        );
    }
}
