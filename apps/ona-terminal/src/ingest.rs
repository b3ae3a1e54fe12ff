use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Asset, ForecastPoint, Inventory, Observation};
use crate::store::read_file_bounded;

pub fn load_inventory(config: &PipelineConfig) -> AppResult<Inventory> {
    if !config.inventory_path.exists() {
        return Err(AppError::config(format!(
            "asset inventory not found at {}",
            config.inventory_path.display()
        )));
    }
    let contents = read_file_bounded(&config.inventory_path, config.io_timeout())?;
    let inventory: Inventory = serde_json::from_str(&contents).map_err(|err| {
        AppError::config(format!(
            "malformed asset inventory {}: {err}",
            config.inventory_path.display()
        ))
    })?;
    Ok(inventory)
}

pub fn find_asset<'a>(inventory: &'a Inventory, asset_id: &str) -> AppResult<&'a Asset> {
    inventory
        .assets
        .iter()
        .find(|asset| asset.id == asset_id)
        .ok_or_else(|| AppError::not_found(format!("unknown asset {asset_id}")))
}

/// Observations for one asset since the cutoff, oldest first. A missing file
/// means no telemetry has been ingested yet; that is an empty result, not an
/// error.
pub fn load_observations(
    config: &PipelineConfig,
    asset_id: &str,
    since: DateTime<Utc>,
) -> AppResult<Vec<Observation>> {
    let path = config.observations_path(asset_id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = read_file_bounded(&path, config.io_timeout())?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let mut rows: Vec<Observation> = Vec::new();
    for record in reader.deserialize() {
        let row: Observation = record.map_err(|err| {
            AppError::validation(format!(
                "malformed observation row in {}: {err}",
                path.display()
            ))
        })?;
        if row.timestamp >= since {
            rows.push(row);
        }
    }
    rows.sort_by_key(|row| row.timestamp);
    Ok(rows)
}

/// Forecast series for one asset, oldest first. Missing file ⇒ empty series.
pub fn load_forecast(config: &PipelineConfig, asset_id: &str) -> AppResult<Vec<ForecastPoint>> {
    let path = config.forecast_path(asset_id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = read_file_bounded(&path, config.io_timeout())?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let mut rows: Vec<ForecastPoint> = Vec::new();
    for record in reader.deserialize() {
        let row: ForecastPoint = record.map_err(|err| {
            AppError::validation(format!(
                "malformed forecast row in {}: {err}",
                path.display()
            ))
        })?;
        if row.predicted_power_kw.is_finite() {
            rows.push(row);
        }
    }
    rows.sort_by_key(|row| row.timestamp);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn write_fixture(config: &PipelineConfig) {
        fs::create_dir_all(&config.observations_root).unwrap();
        fs::create_dir_all(&config.forecasts_root).unwrap();
        fs::write(
            config.observations_path("INV-001"),
            "timestamp,asset_id,temperature_c,voltage_v,power_kw\n\
             2026-03-01T10:05:00Z,INV-001,41.0,710.0,12.0\n\
             2026-03-01T09:00:00Z,INV-001,40.0,705.0,14.5\n\
             2026-03-01T10:10:00Z,INV-001,,,\n",
        )
        .unwrap();
        fs::write(
            config.forecast_path("INV-001"),
            "timestamp,predicted_power_kw\n2026-03-01T10:00:00Z,15.0\n",
        )
        .unwrap();
    }

    #[test]
    fn observations_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_data_root(dir.path().to_path_buf());
        write_fixture(&config);

        let since = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let rows = load_observations(&config, "INV-001", since).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].timestamp < rows[1].timestamp);
        // blank cells parse as missing metrics, not as errors
        assert!(rows[1].power_kw.is_none());
    }

    #[test]
    fn missing_series_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_data_root(dir.path().to_path_buf());
        fs::create_dir_all(&config.observations_root).unwrap();
        fs::create_dir_all(&config.forecasts_root).unwrap();

        let since = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert!(load_observations(&config, "INV-404", since).unwrap().is_empty());
        assert!(load_forecast(&config, "INV-404").unwrap().is_empty());
    }

    #[test]
    fn missing_inventory_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_data_root(dir.path().to_path_buf());
        let err = load_inventory(&config).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
