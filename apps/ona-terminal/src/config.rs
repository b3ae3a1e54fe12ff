use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_ROOT: &str = "./ona-data";

fn pipeline_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("ONA_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(state_dir) = env::var("ONA_STATE_DIR") {
        let trimmed = state_dir.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("config.json"));
        }
    }
    None
}

#[derive(Debug, Clone, Deserialize)]
struct PipelineConfigOverrides {
    #[serde(default)]
    data_root: Option<String>,
    #[serde(default)]
    inventory_path: Option<String>,
    #[serde(default)]
    observations_root: Option<String>,
    #[serde(default)]
    forecasts_root: Option<String>,
    #[serde(default)]
    taxonomy_path: Option<String>,
    #[serde(default)]
    weights_path: Option<String>,
    #[serde(default)]
    catalog_path: Option<String>,
    #[serde(default)]
    deviation_normalization: Option<f64>,
    #[serde(default)]
    severity_threshold: Option<f64>,
    #[serde(default)]
    window_min: Option<i64>,
    #[serde(default)]
    capacity_factor_default: Option<f64>,
    #[serde(default)]
    site_capacity_factors: Option<HashMap<String, f64>>,
    #[serde(default)]
    energy_price_usd_per_kwh: Option<f64>,
    #[serde(default)]
    crews_available: Option<u32>,
    #[serde(default)]
    hours_per_day: Option<f64>,
    #[serde(default)]
    io_timeout_seconds: Option<u64>,
}

fn load_pipeline_overrides() -> Option<PipelineConfigOverrides> {
    let path = pipeline_config_path()?;
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read pipeline config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse pipeline config; using env defaults"
            );
            None
        }
    }
}

fn apply_pipeline_overrides(config: &mut PipelineConfig, overrides: &PipelineConfigOverrides) {
    let env_allows = |key: &str| {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .is_none()
    };

    if env_allows("ONA_DATA_ROOT") {
        if let Some(path) = overrides
            .data_root
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            config.rebase(PathBuf::from(path));
        }
    }
    if let Some(path) = overrides
        .inventory_path
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.inventory_path = PathBuf::from(path);
    }
    if let Some(path) = overrides
        .observations_root
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.observations_root = PathBuf::from(path);
    }
    if let Some(path) = overrides
        .forecasts_root
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.forecasts_root = PathBuf::from(path);
    }
    if let Some(path) = overrides
        .taxonomy_path
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.taxonomy_path = PathBuf::from(path);
    }
    if let Some(path) = overrides
        .weights_path
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.weights_path = PathBuf::from(path);
    }
    if let Some(path) = overrides
        .catalog_path
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.catalog_path = PathBuf::from(path);
    }

    if let Some(value) = overrides
        .deviation_normalization
        .filter(|v| v.is_finite() && *v > 0.0)
    {
        config.deviation_normalization = value;
    }
    if let Some(value) = overrides
        .severity_threshold
        .filter(|v| v.is_finite() && (0.0..=1.0).contains(v))
    {
        config.severity_threshold = value;
    }
    if let Some(value) = overrides.window_min.filter(|v| *v > 0) {
        config.window_min = value;
    }
    if let Some(value) = overrides
        .capacity_factor_default
        .filter(|v| v.is_finite() && *v > 0.0)
    {
        config.capacity_factor_default = value;
    }
    if let Some(map) = overrides.site_capacity_factors.as_ref() {
        config.site_capacity_factors = map
            .iter()
            .filter(|(_, factor)| factor.is_finite() && **factor > 0.0)
            .map(|(site, factor)| (site.trim().to_string(), *factor))
            .collect();
    }
    if let Some(value) = overrides
        .energy_price_usd_per_kwh
        .filter(|v| v.is_finite() && *v > 0.0)
    {
        config.energy_price_usd_per_kwh = value;
    }
    if let Some(value) = overrides.crews_available.filter(|v| *v != 0) {
        config.crews_available = value;
    }
    if let Some(value) = overrides.hours_per_day.filter(|v| v.is_finite() && *v > 0.0) {
        config.hours_per_day = value;
    }
    if let Some(value) = overrides.io_timeout_seconds.filter(|v| *v != 0) {
        config.io_timeout_seconds = value;
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub inventory_path: PathBuf,
    pub observations_root: PathBuf,
    pub forecasts_root: PathBuf,
    pub taxonomy_path: PathBuf,
    pub weights_path: PathBuf,
    pub catalog_path: PathBuf,
    /// Deviation at which severity saturates to 1.0.
    pub deviation_normalization: f64,
    pub severity_threshold: f64,
    pub window_min: i64,
    pub capacity_factor_default: f64,
    pub site_capacity_factors: HashMap<String, f64>,
    pub energy_price_usd_per_kwh: f64,
    pub crews_available: u32,
    pub hours_per_day: f64,
    pub io_timeout_seconds: u64,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let data_root = env::var("ONA_DATA_ROOT")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT));

        let deviation_normalization = env::var("ONA_DEVIATION_NORMALIZATION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.5);
        let severity_threshold = env::var("ONA_SEVERITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && (0.0..=1.0).contains(v))
            .unwrap_or(0.5);
        let window_min = env::var("ONA_WINDOW_MIN")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(15);
        let capacity_factor_default = env::var("ONA_CAPACITY_FACTOR")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.2);
        let energy_price_usd_per_kwh = env::var("ONA_ENERGY_PRICE_USD_PER_KWH")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.15);
        let crews_available = env::var("ONA_CREWS_AVAILABLE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(2);
        let hours_per_day = env::var("ONA_CREW_HOURS_PER_DAY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(8.0);
        let io_timeout_seconds = env::var("ONA_IO_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(10);

        let mut config = Self {
            inventory_path: data_root.join("inventory.json"),
            observations_root: data_root.join("observations"),
            forecasts_root: data_root.join("forecasts"),
            taxonomy_path: data_root.join("config").join("categories.yaml"),
            weights_path: data_root.join("config").join("loss_weights.yaml"),
            catalog_path: data_root.join("catalog.json"),
            data_root,
            deviation_normalization,
            severity_threshold,
            window_min,
            capacity_factor_default,
            site_capacity_factors: HashMap::new(),
            energy_price_usd_per_kwh,
            crews_available,
            hours_per_day,
            io_timeout_seconds,
        };

        if let Some(overrides) = load_pipeline_overrides() {
            apply_pipeline_overrides(&mut config, &overrides);
        }

        config
    }

    /// Rebase all default-derived paths onto a new data root. Paths that were
    /// explicitly overridden afterwards keep their override.
    pub fn rebase(&mut self, data_root: PathBuf) {
        self.inventory_path = data_root.join("inventory.json");
        self.observations_root = data_root.join("observations");
        self.forecasts_root = data_root.join("forecasts");
        self.taxonomy_path = data_root.join("config").join("categories.yaml");
        self.weights_path = data_root.join("config").join("loss_weights.yaml");
        self.catalog_path = data_root.join("catalog.json");
        self.data_root = data_root;
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }

    pub fn observations_path(&self, asset_id: &str) -> PathBuf {
        self.observations_root.join(format!("{asset_id}.csv"))
    }

    pub fn forecast_path(&self, asset_id: &str) -> PathBuf {
        self.forecasts_root.join(format!("{asset_id}.csv"))
    }

    pub fn capacity_factor_for(&self, location: Option<&str>) -> f64 {
        location
            .map(str::trim)
            .filter(|site| !site.is_empty())
            .and_then(|site| self.site_capacity_factors.get(site).copied())
            .unwrap_or(self.capacity_factor_default)
    }

    /// Defaults with every path derived from the given data root. Used by
    /// embedders and tests that do not want env-driven configuration.
    pub fn with_data_root(data_root: PathBuf) -> Self {
        let mut config = Self {
            inventory_path: PathBuf::new(),
            observations_root: PathBuf::new(),
            forecasts_root: PathBuf::new(),
            taxonomy_path: PathBuf::new(),
            weights_path: PathBuf::new(),
            catalog_path: PathBuf::new(),
            data_root: PathBuf::new(),
            deviation_normalization: 0.5,
            severity_threshold: 0.5,
            window_min: 15,
            capacity_factor_default: 0.2,
            site_capacity_factors: HashMap::new(),
            energy_price_usd_per_kwh: 0.15,
            crews_available: 2,
            hours_per_day: 8.0,
            io_timeout_seconds: 10,
        };
        config.rebase(data_root);
        config
    }
}
