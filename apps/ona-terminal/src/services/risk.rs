use chrono::Utc;

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Asset, RiskEstimate};
use crate::services::diagnoser;
use crate::store::{self, Store};

const HOURS_PER_DAY: f64 = 24.0;
/// Confidence interval half-width per day of horizon, as a fraction of EAR.
const INTERVAL_FRACTION_PER_DAY: f64 = 0.05;

/// Energy-at-Risk per horizon for one asset. Horizons are independent
/// estimates; a healthy asset (no open Findings) carries EAR 0, which is a
/// valid result, not an error.
pub fn calc(
    store: &Store,
    config: &PipelineConfig,
    asset: &Asset,
    horizons: &[i64],
) -> AppResult<Vec<RiskEstimate>> {
    let capacity_kw = asset
        .capacity_kw
        .filter(|value| value.is_finite() && *value > 0.0)
        .ok_or_else(|| {
            AppError::validation(format!(
                "asset {} has missing or non-positive capacity_kw",
                asset.id
            ))
        })?;
    if horizons.is_empty() {
        return Err(AppError::validation("at least one horizon is required"));
    }
    if let Some(bad) = horizons.iter().find(|horizon| **horizon <= 0) {
        return Err(AppError::validation(format!(
            "horizon must be positive, got {bad}"
        )));
    }

    let fault_severity_factor = diagnoser::open_findings_for_asset(store, &asset.id)?
        .iter()
        .map(|finding| finding.severity)
        .fold(0.0_f64, f64::max);
    let capacity_factor = config.capacity_factor_for(asset.location.as_deref());

    let mut estimates = Vec::with_capacity(horizons.len());
    for &horizon_hours in horizons {
        let estimate = compute_estimate(
            &asset.id,
            capacity_kw,
            capacity_factor,
            config.energy_price_usd_per_kwh,
            fault_severity_factor,
            horizon_hours,
        );
        store.put(
            store::RISKS,
            &format!("{}-{horizon_hours}", asset.id),
            &estimate,
        )?;
        estimates.push(estimate);
    }

    tracing::info!(
        asset_id = %asset.id,
        fault_severity_factor,
        horizons = ?horizons,
        "energy-at-risk computed"
    );
    Ok(estimates)
}

/// Most recent stored estimate for (asset, horizon), if any.
pub fn stored_estimate(
    store: &Store,
    asset_id: &str,
    horizon_hours: i64,
) -> AppResult<Option<RiskEstimate>> {
    store.get(store::RISKS, &format!("{asset_id}-{horizon_hours}"))
}

fn compute_estimate(
    asset_id: &str,
    capacity_kw: f64,
    capacity_factor: f64,
    energy_price_usd_per_kwh: f64,
    fault_severity_factor: f64,
    horizon_hours: i64,
) -> RiskEstimate {
    let ear_usd_day = capacity_kw
        * capacity_factor
        * HOURS_PER_DAY
        * energy_price_usd_per_kwh
        * fault_severity_factor;

    // longer horizon, wider interval
    let half_width = ear_usd_day * INTERVAL_FRACTION_PER_DAY * (horizon_hours as f64 / HOURS_PER_DAY);
    RiskEstimate {
        asset_id: asset_id.to_string(),
        horizon_hours,
        ear_usd_day,
        confidence_low: (ear_usd_day - half_width).max(0.0),
        confidence_high: ear_usd_day + half_width,
        computed_at: Utc::now(),
    }
}
