use chrono::{DateTime, Duration, Utc};

use crate::config::PipelineConfig;
use crate::error::AppResult;
use crate::ingest;
use crate::model::{Detection, ForecastPoint, Inventory, Observation, SignalSnapshot};
use crate::store::{self, Store};

/// Below this, predicted output counts as "no production expected".
const PREDICTED_FLOOR_KW: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct DetectParams {
    pub window_min: i64,
    pub severity_threshold: f64,
    pub since: Option<DateTime<Utc>>,
}

impl DetectParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            window_min: config.window_min,
            severity_threshold: config.severity_threshold,
            since: None,
        }
    }
}

/// Slides fixed windows over the observation series of one asset (or every
/// inventory asset) and persists a Detection per anomalous window. Detection
/// ids derive from (asset, window), so re-running over the same data rewrites
/// identical documents.
pub fn run(
    store: &Store,
    config: &PipelineConfig,
    inventory: &Inventory,
    asset_id: Option<&str>,
    params: &DetectParams,
) -> AppResult<Vec<Detection>> {
    let targets: Vec<&str> = match asset_id {
        Some(id) => {
            ingest::find_asset(inventory, id)?;
            vec![id]
        }
        None => inventory.assets.iter().map(|asset| asset.id.as_str()).collect(),
    };

    let since = params
        .since
        .unwrap_or_else(|| Utc::now() - Duration::minutes(params.window_min));

    let mut detections = Vec::new();
    for target in targets {
        let observations = ingest::load_observations(config, target, since)?;
        if observations.is_empty() {
            tracing::debug!(asset_id = %target, "no observations in range; skipping");
            continue;
        }
        let forecast = ingest::load_forecast(config, target)?;
        let found = scan_asset(
            target,
            since,
            &observations,
            &forecast,
            params.window_min,
            config.deviation_normalization,
            params.severity_threshold,
        );
        for detection in &found {
            store.put(store::DETECTIONS, &detection.id.to_string(), detection)?;
        }
        tracing::info!(
            asset_id = %target,
            detections = found.len(),
            "detection scan complete"
        );
        detections.extend(found);
    }

    Ok(detections)
}

pub fn list(store: &Store, since: Option<DateTime<Utc>>) -> AppResult<Vec<Detection>> {
    let mut detections: Vec<Detection> = store.list(store::DETECTIONS)?;
    if let Some(since) = since {
        detections.retain(|detection| detection.window_start >= since);
    }
    detections.sort_by_key(|detection| detection.window_start);
    Ok(detections)
}

pub fn detections_for_asset(store: &Store, asset_id: &str) -> AppResult<Vec<Detection>> {
    let mut detections: Vec<Detection> = store.list(store::DETECTIONS)?;
    detections.retain(|detection| detection.asset_id == asset_id);
    detections.sort_by_key(|detection| detection.window_start);
    Ok(detections)
}

fn scan_asset(
    asset_id: &str,
    since: DateTime<Utc>,
    observations: &[Observation],
    forecast: &[ForecastPoint],
    window_min: i64,
    normalization: f64,
    severity_threshold: f64,
) -> Vec<Detection> {
    let window = Duration::minutes(window_min.max(1));
    let last_ts = match observations.last() {
        Some(row) => row.timestamp,
        None => return Vec::new(),
    };

    let mut detections = Vec::new();
    let mut window_start = since;
    while window_start <= last_ts {
        let window_end = window_start + window;
        let in_window: Vec<&Observation> = observations
            .iter()
            .filter(|row| row.timestamp >= window_start && row.timestamp < window_end)
            .collect();
        let predicted: Vec<f64> = forecast
            .iter()
            .filter(|point| point.timestamp >= window_start && point.timestamp < window_end)
            .map(|point| point.predicted_power_kw)
            .collect();

        if let Some(detection) = evaluate_window(
            asset_id,
            window_start,
            window_end,
            &in_window,
            &predicted,
            normalization,
            severity_threshold,
        ) {
            detections.push(detection);
        }
        window_start = window_end;
    }
    detections
}

/// Deviation scoring for one window. Missing observations or a missing
/// forecast yield no Detection: absence of data is not evidence of fault.
fn evaluate_window(
    asset_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    observations: &[&Observation],
    predicted: &[f64],
    normalization: f64,
    severity_threshold: f64,
) -> Option<Detection> {
    let actual = mean(observations.iter().filter_map(|row| row.power_kw))?;
    let predicted = mean(predicted.iter().copied())?;

    let (deviation, severity) = if predicted.abs() < PREDICTED_FLOOR_KW {
        if actual.abs() < PREDICTED_FLOOR_KW {
            return None;
        }
        // producing while zero output was forecast: total mismatch
        (1.0, 1.0)
    } else {
        let deviation = (actual - predicted).abs() / predicted;
        (deviation, (deviation / normalization).min(1.0))
    };

    if severity < severity_threshold {
        return None;
    }

    Some(Detection {
        id: Detection::deterministic_id(asset_id, window_start, window_end),
        asset_id: asset_id.to_string(),
        window_start,
        window_end,
        severity,
        deviation,
        snapshot: SignalSnapshot {
            temperature_c: mean(observations.iter().filter_map(|row| row.temperature_c)),
            voltage_v: mean(observations.iter().filter_map(|row| row.voltage_v)),
            power_kw: actual,
            predicted_power_kw: predicted,
        },
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        if value.is_finite() {
            sum += value;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(ts: DateTime<Utc>, power_kw: Option<f64>, temperature_c: Option<f64>) -> Observation {
        Observation {
            timestamp: ts,
            asset_id: "INV-001".to_string(),
            temperature_c,
            voltage_v: Some(705.0),
            power_kw,
        }
    }

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn scan_is_deterministic() {
        let since = t(0);
        let observations = vec![obs(t(2), Some(6.0), Some(61.0)), obs(t(7), Some(6.0), Some(63.0))];
        let forecast = vec![ForecastPoint {
            timestamp: t(5),
            predicted_power_kw: 15.0,
        }];

        let first = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        let second = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        // deviation = |6 - 15| / 15 = 0.6 => severity = min(1, 0.6 / 0.5) = 1.0
        assert!((first[0].deviation - 0.6).abs() < 1e-9);
        assert!((first[0].severity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn nominal_output_stays_quiet() {
        let since = t(0);
        let observations = vec![obs(t(2), Some(14.8), None)];
        let forecast = vec![ForecastPoint {
            timestamp: t(5),
            predicted_power_kw: 15.0,
        }];

        let found = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        assert!(found.is_empty());
    }

    #[test]
    fn missing_forecast_yields_no_detection() {
        let since = t(0);
        let observations = vec![obs(t(2), Some(0.0), Some(80.0))];

        let found = scan_asset("INV-001", since, &observations, &[], 15, 0.5, 0.5);
        assert!(found.is_empty());
    }

    #[test]
    fn missing_power_samples_yield_no_detection() {
        let since = t(0);
        let observations = vec![obs(t(2), None, Some(80.0))];
        let forecast = vec![ForecastPoint {
            timestamp: t(5),
            predicted_power_kw: 15.0,
        }];

        let found = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        assert!(found.is_empty());
    }

    #[test]
    fn production_against_zero_forecast_saturates() {
        let since = t(0);
        let observations = vec![obs(t(2), Some(4.0), None)];
        let forecast = vec![ForecastPoint {
            timestamp: t(5),
            predicted_power_kw: 0.0,
        }];

        let found = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        assert_eq!(found.len(), 1);
        assert!((found[0].severity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn idle_against_zero_forecast_stays_quiet() {
        let since = t(0);
        let observations = vec![obs(t(2), Some(0.0), None)];
        let forecast = vec![ForecastPoint {
            timestamp: t(5),
            predicted_power_kw: 0.0,
        }];

        let found = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        assert!(found.is_empty());
    }

    #[test]
    fn windows_do_not_overlap() {
        let since = t(0);
        // two windows, both far under forecast
        let observations = vec![obs(t(2), Some(1.0), None), obs(t(20), Some(1.0), None)];
        let forecast = vec![
            ForecastPoint {
                timestamp: t(5),
                predicted_power_kw: 15.0,
            },
            ForecastPoint {
                timestamp: t(20),
                predicted_power_kw: 15.0,
            },
        ];

        let found = scan_asset("INV-001", since, &observations, &forecast, 15, 0.5, 0.5);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].window_end, found[1].window_start);
    }
}
