use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Detection, Finding, FindingStatus, UNKNOWN_CATEGORY, UNKNOWN_SUBCATEGORY};
use crate::services::detector;
use crate::store::{self, Store};

const CONFIDENCE_MATCHED: f64 = 0.9;
const CONFIDENCE_UNKNOWN: f64 = 0.3;

const DEFAULT_REPAIR_COST_USD: f64 = 500.0;
const DEFAULT_MTTR_HOURS: f64 = 24.0;
const DEFAULT_WORK_HOURS: f64 = 8.0;

/// Declarative category taxonomy: ordered categories, each with ordered
/// subcategory rules. The first rule whose predicate matches a detection's
/// signal snapshot wins.
#[derive(Debug, Clone, Deserialize)]
pub struct Taxonomy {
    pub categories: Vec<CategoryRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<SubcategoryRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubcategoryRule {
    pub name: String,
    #[serde(default)]
    pub when: Option<SignalPredicate>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default = "default_repair_cost")]
    pub repair_cost_usd: f64,
    #[serde(default = "default_mttr_hours")]
    pub mttr_hours: f64,
    #[serde(default = "default_work_hours")]
    pub work_hours: f64,
    #[serde(default)]
    pub component_type: Option<String>,
}

fn default_repair_cost() -> f64 {
    DEFAULT_REPAIR_COST_USD
}

fn default_mttr_hours() -> f64 {
    DEFAULT_MTTR_HOURS
}

fn default_work_hours() -> f64 {
    DEFAULT_WORK_HOURS
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalPredicate {
    pub metric: SignalMetric,
    pub op: CompareOp,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalMetric {
    TemperatureC,
    VoltageV,
    PowerKw,
    Deviation,
    Severity,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

pub fn compare(value: f64, op: CompareOp, threshold: f64) -> bool {
    match op {
        CompareOp::Lt => value < threshold,
        CompareOp::Lte => value <= threshold,
        CompareOp::Gt => value > threshold,
        CompareOp::Gte => value >= threshold,
    }
}

/// Per-subcategory maintenance parameters consumed by the scheduler and the
/// BOM builder. Unknown findings get conservative defaults.
#[derive(Debug, Clone)]
pub struct MaintenanceParams {
    pub repair_cost_usd: f64,
    pub mttr_hours: f64,
    pub work_hours: f64,
    pub component_type: Option<String>,
}

impl Default for MaintenanceParams {
    fn default() -> Self {
        Self {
            repair_cost_usd: DEFAULT_REPAIR_COST_USD,
            mttr_hours: DEFAULT_MTTR_HOURS,
            work_hours: DEFAULT_WORK_HOURS,
            component_type: None,
        }
    }
}

/// A missing or empty taxonomy is fatal for diagnosis, not a silent "Unknown".
pub fn load_taxonomy(config: &PipelineConfig) -> AppResult<Taxonomy> {
    if !config.taxonomy_path.exists() {
        return Err(AppError::config(format!(
            "category taxonomy not found at {}",
            config.taxonomy_path.display()
        )));
    }
    let contents = store::read_file_bounded(&config.taxonomy_path, config.io_timeout())?;
    let taxonomy: Taxonomy = serde_yaml::from_str(&contents).map_err(|err| {
        AppError::config(format!(
            "malformed category taxonomy {}: {err}",
            config.taxonomy_path.display()
        ))
    })?;
    if taxonomy.categories.is_empty() {
        return Err(AppError::config(format!(
            "category taxonomy {} declares no categories",
            config.taxonomy_path.display()
        )));
    }
    Ok(taxonomy)
}

impl Taxonomy {
    /// First matching (category, subcategory) pair in declaration order.
    pub fn classify(&self, detection: &Detection) -> Option<(&CategoryRule, &SubcategoryRule)> {
        for category in &self.categories {
            for subcategory in &category.subcategories {
                let Some(predicate) = &subcategory.when else {
                    continue;
                };
                let Some(value) = signal_value(detection, predicate.metric) else {
                    continue;
                };
                if compare(value, predicate.op, predicate.value) {
                    return Some((category, subcategory));
                }
            }
        }
        None
    }

    pub fn maintenance_params(&self, category: &str, subcategory: &str) -> MaintenanceParams {
        self.categories
            .iter()
            .find(|rule| rule.name == category)
            .and_then(|rule| {
                rule.subcategories
                    .iter()
                    .find(|sub| sub.name == subcategory)
            })
            .map(|sub| MaintenanceParams {
                repair_cost_usd: sub.repair_cost_usd,
                mttr_hours: sub.mttr_hours,
                work_hours: sub.work_hours,
                component_type: sub.component_type.clone(),
            })
            .unwrap_or_default()
    }
}

fn signal_value(detection: &Detection, metric: SignalMetric) -> Option<f64> {
    match metric {
        SignalMetric::TemperatureC => detection.snapshot.temperature_c,
        SignalMetric::VoltageV => detection.snapshot.voltage_v,
        SignalMetric::PowerKw => Some(detection.snapshot.power_kw),
        SignalMetric::Deviation => Some(detection.deviation),
        SignalMetric::Severity => Some(detection.severity),
    }
}

/// Diagnoses every Detection of the asset that has no Finding yet. Unmatched
/// detections classify to the Unknown category; that is a valid outcome.
pub fn run(store: &Store, taxonomy: &Taxonomy, asset_id: &str) -> AppResult<Vec<Finding>> {
    let detections = detector::detections_for_asset(store, asset_id)?;
    let existing: Vec<Finding> = store.list(store::FINDINGS)?;
    let diagnosed: Vec<Uuid> = existing.iter().map(|finding| finding.detection_id).collect();

    let mut findings = Vec::new();
    for detection in detections {
        if diagnosed.contains(&detection.id) {
            continue;
        }
        let finding = diagnose_detection(taxonomy, &detection);
        store.put(store::FINDINGS, &finding.id.to_string(), &finding)?;
        findings.push(finding);
    }

    tracing::info!(
        asset_id = %asset_id,
        findings = findings.len(),
        "diagnosis complete"
    );
    Ok(findings)
}

pub fn list(store: &Store) -> AppResult<Vec<Finding>> {
    let mut findings: Vec<Finding> = store.list(store::FINDINGS)?;
    findings.sort_by_key(|finding| finding.diagnosed_at);
    Ok(findings)
}

pub fn open_findings_for_asset(store: &Store, asset_id: &str) -> AppResult<Vec<Finding>> {
    let mut findings: Vec<Finding> = store.list(store::FINDINGS)?;
    findings.retain(|finding| finding.asset_id == asset_id && finding.is_open());
    Ok(findings)
}

fn diagnose_detection(taxonomy: &Taxonomy, detection: &Detection) -> Finding {
    let (category, subcategory, actions, confidence) = match taxonomy.classify(detection) {
        Some((category, subcategory)) => (
            category.name.clone(),
            subcategory.name.clone(),
            subcategory.recommended_actions.clone(),
            CONFIDENCE_MATCHED,
        ),
        None => (
            UNKNOWN_CATEGORY.to_string(),
            UNKNOWN_SUBCATEGORY.to_string(),
            vec!["Dispatch a technician for on-site inspection".to_string()],
            CONFIDENCE_UNKNOWN,
        ),
    };

    Finding {
        id: Finding::deterministic_id(detection.id),
        detection_id: detection.id,
        asset_id: detection.asset_id.clone(),
        category,
        subcategory,
        severity: detection.severity,
        confidence,
        recommended_actions: actions,
        status: FindingStatus::Open,
        diagnosed_at: Utc::now(),
    }
}
