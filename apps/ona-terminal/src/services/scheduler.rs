use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::ingest;
use crate::model::{Inventory, ScheduleEntry, ScheduleStatus, StatusChange, WorkOrder};
use crate::services::detector;
use crate::services::diagnoser::{self, Taxonomy};
use crate::services::risk;
use crate::store::{self, Store};

const EAR_HORIZON_HOURS: i64 = 24;

/// Loss-function weights for priority ranking. Higher loss means higher
/// priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossWeights {
    #[serde(default = "default_w_energy")]
    pub w_energy: f64,
    #[serde(default = "default_w_cost")]
    pub w_cost: f64,
    #[serde(default = "default_w_mttr")]
    pub w_mttr: f64,
}

fn default_w_energy() -> f64 {
    1.0
}

fn default_w_cost() -> f64 {
    0.3
}

fn default_w_mttr() -> f64 {
    0.2
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            w_energy: default_w_energy(),
            w_cost: default_w_cost(),
            w_mttr: default_w_mttr(),
        }
    }
}

impl LossWeights {
    fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("w_energy", self.w_energy),
            ("w_cost", self.w_cost),
            ("w_mttr", self.w_mttr),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::config(format!(
                    "loss weight {name} must be finite and >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Weights from the configured weights file; defaults when no file has been
/// installed yet. A present-but-malformed file is fatal.
pub fn load_weights(config: &PipelineConfig) -> AppResult<LossWeights> {
    if !config.weights_path.exists() {
        return Ok(LossWeights::default());
    }
    let contents = store::read_file_bounded(&config.weights_path, config.io_timeout())?;
    let weights: LossWeights = serde_yaml::from_str(&contents).map_err(|err| {
        AppError::config(format!(
            "malformed loss weights {}: {err}",
            config.weights_path.display()
        ))
    })?;
    weights.validate()?;
    Ok(weights)
}

/// `schedule set-loss`: installs the given weights file as the configured
/// weights, replacing any previous override.
pub fn set_weights(config: &PipelineConfig, source: &Path) -> AppResult<LossWeights> {
    if !source.exists() {
        return Err(AppError::config(format!(
            "loss weights file not found at {}",
            source.display()
        )));
    }
    let contents = store::read_file_bounded(source, config.io_timeout())?;
    let weights: LossWeights = serde_yaml::from_str(&contents).map_err(|err| {
        AppError::config(format!("malformed loss weights {}: {err}", source.display()))
    })?;
    weights.validate()?;

    if let Some(parent) = config.weights_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            AppError::config(format!("failed to create {}: {err}", parent.display()))
        })?;
    }
    let rendered = serde_yaml::to_string(&weights)?;
    std::fs::write(&config.weights_path, rendered).map_err(|err| {
        AppError::config(format!(
            "failed to persist loss weights {}: {err}",
            config.weights_path.display()
        ))
    })?;
    tracing::info!(
        w_energy = weights.w_energy,
        w_cost = weights.w_cost,
        w_mttr = weights.w_mttr,
        "loss weights updated"
    );
    Ok(weights)
}

#[derive(Debug, Clone)]
struct Candidate {
    asset_id: String,
    loss: f64,
    work_hours: f64,
    earliest_detection: DateTime<Utc>,
}

/// Ranks the candidate assets by weighted loss and admits them greedily under
/// the crew-hours budget for the horizon. Assets that do not fit are recorded
/// as deferred, never dropped; re-invoking with them picks them up.
pub fn create(
    store: &Store,
    config: &PipelineConfig,
    taxonomy: &Taxonomy,
    weights: &LossWeights,
    inventory: &Inventory,
    asset_ids: &[String],
    horizon_hours: i64,
    note: Option<String>,
) -> AppResult<ScheduleEntry> {
    if asset_ids.is_empty() {
        return Err(AppError::validation("at least one asset id is required"));
    }
    if horizon_hours <= 0 {
        return Err(AppError::validation(format!(
            "horizon must be positive, got {horizon_hours}"
        )));
    }

    let mut unique_ids: Vec<&str> = Vec::new();
    for id in asset_ids {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("blank asset id in schedule request"));
        }
        ingest::find_asset(inventory, trimmed)?;
        if !unique_ids.contains(&trimmed) {
            unique_ids.push(trimmed);
        }
    }

    let mut candidates = Vec::with_capacity(unique_ids.len());
    for asset_id in unique_ids {
        candidates.push(build_candidate(store, taxonomy, weights, asset_id)?);
    }
    rank_candidates(&mut candidates);

    let budget_hours =
        config.crews_available as f64 * config.hours_per_day * (horizon_hours as f64 / 24.0);
    let mut admitted: Vec<String> = Vec::new();
    let mut deferred: Vec<String> = Vec::new();
    let mut used_hours = 0.0;
    let mut priority = 0.0_f64;
    for candidate in &candidates {
        if used_hours + candidate.work_hours <= budget_hours {
            used_hours += candidate.work_hours;
            if admitted.is_empty() {
                priority = candidate.loss;
            }
            admitted.push(candidate.asset_id.clone());
        } else {
            tracing::warn!(
                asset_id = %candidate.asset_id,
                work_hours = candidate.work_hours,
                budget_hours,
                "crew capacity exceeded; deferring asset to a later schedule run"
            );
            deferred.push(candidate.asset_id.clone());
        }
    }

    let now = Utc::now();
    let entry = ScheduleEntry {
        schedule_id: Uuid::new_v4(),
        assets: admitted,
        deferred_assets: deferred,
        priority,
        horizon_hours,
        note,
        status: ScheduleStatus::Proposed,
        created_at: now,
        status_history: vec![StatusChange {
            status: ScheduleStatus::Proposed,
            changed_at: now,
        }],
    };
    store.put(store::SCHEDULES, &entry.schedule_id.to_string(), &entry)?;
    tracing::info!(
        schedule_id = %entry.schedule_id,
        admitted = entry.assets.len(),
        deferred = entry.deferred_assets.len(),
        used_hours,
        budget_hours,
        "schedule created"
    );
    Ok(entry)
}

fn build_candidate(
    store: &Store,
    taxonomy: &Taxonomy,
    weights: &LossWeights,
    asset_id: &str,
) -> AppResult<Candidate> {
    let ear_usd_day = risk::stored_estimate(store, asset_id, EAR_HORIZON_HOURS)?
        .map(|estimate| estimate.ear_usd_day)
        .unwrap_or(0.0);

    let findings = diagnoser::open_findings_for_asset(store, asset_id)?;
    let top_finding = findings.iter().max_by(|a, b| {
        a.severity
            .partial_cmp(&b.severity)
            .unwrap_or(Ordering::Equal)
    });
    let params = top_finding
        .map(|finding| taxonomy.maintenance_params(&finding.category, &finding.subcategory))
        .unwrap_or_default();

    let earliest_detection = detector::detections_for_asset(store, asset_id)?
        .first()
        .map(|detection| detection.window_start)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let mttr_term = if params.mttr_hours > 0.0 {
        weights.w_mttr / params.mttr_hours
    } else {
        0.0
    };
    let loss = weights.w_energy * ear_usd_day + weights.w_cost * params.repair_cost_usd - mttr_term;

    Ok(Candidate {
        asset_id: asset_id.to_string(),
        loss,
        work_hours: params.work_hours,
        earliest_detection,
    })
}

/// Highest loss first; equal-loss assets go FIFO by earliest detection, then
/// by id so the ordering is total.
fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.loss
            .partial_cmp(&a.loss)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.earliest_detection.cmp(&b.earliest_detection))
            .then_with(|| a.asset_id.cmp(&b.asset_id))
    });
}

pub fn list(store: &Store) -> AppResult<Vec<ScheduleEntry>> {
    let mut schedules: Vec<ScheduleEntry> = store.list(store::SCHEDULES)?;
    schedules.sort_by_key(|entry| entry.created_at);
    Ok(schedules)
}

/// Applies a status transition. Completion is gated on a completed work order
/// for the schedule; `rejected` is terminal.
pub fn set_status(
    store: &Store,
    schedule_id: Uuid,
    next: ScheduleStatus,
) -> AppResult<ScheduleEntry> {
    let mut entry: ScheduleEntry = store.require(store::SCHEDULES, &schedule_id.to_string())?;
    if !entry.status.can_transition(next) {
        return Err(AppError::validation(format!(
            "schedule {schedule_id} cannot move from {} to {}",
            entry.status.as_str(),
            next.as_str()
        )));
    }
    if next == ScheduleStatus::Completed && !has_completed_order(store, schedule_id)? {
        return Err(AppError::validation(format!(
            "schedule {schedule_id} has no completed work order"
        )));
    }

    entry.status = next;
    entry.status_history.push(StatusChange {
        status: next,
        changed_at: Utc::now(),
    });
    store.put(store::SCHEDULES, &schedule_id.to_string(), &entry)?;
    tracing::info!(schedule_id = %schedule_id, status = next.as_str(), "schedule status changed");
    Ok(entry)
}

fn has_completed_order(store: &Store, schedule_id: Uuid) -> AppResult<bool> {
    let orders: Vec<WorkOrder> = store.list(store::ORDERS)?;
    Ok(orders.iter().any(|order| {
        order.bom_id == schedule_id && order.status == crate::model::OrderStatus::Completed
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Asset, Detection, Finding, FindingStatus, OrderStatus, RiskEstimate, SignalSnapshot,
    };
    use chrono::TimeZone;
    use std::time::Duration;

    fn inventory(ids: &[&str]) -> Inventory {
        Inventory {
            assets: ids
                .iter()
                .map(|id| Asset {
                    id: id.to_string(),
                    name: id.to_string(),
                    kind: "inverter".to_string(),
                    capacity_kw: Some(20.0),
                    location: None,
                    components: Vec::new(),
                })
                .collect(),
        }
    }

    fn taxonomy() -> Taxonomy {
        serde_yaml::from_str(
            r#"
categories:
  - name: OEM Fault
    subcategories:
      - name: inverter_overtemp
        when: { metric: temperature_c, op: gt, value: 60.0 }
        repair_cost_usd: 1200.0
        mttr_hours: 6.0
        work_hours: 8.0
        component_type: inverter
"#,
        )
        .unwrap()
    }

    fn harness() -> (tempfile::TempDir, Store, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), Duration::from_secs(5)).unwrap();
        let mut config = PipelineConfig::with_data_root(dir.path().to_path_buf());
        config.crews_available = 1;
        config.hours_per_day = 8.0;
        (dir, store, config)
    }

    fn seed_fault(store: &Store, asset_id: &str, severity: f64, ear_usd_day: f64, minute: u32) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap();
        let end = start + chrono::Duration::minutes(15);
        let detection = Detection {
            id: Detection::deterministic_id(asset_id, start, end),
            asset_id: asset_id.to_string(),
            window_start: start,
            window_end: end,
            severity,
            deviation: 0.6,
            snapshot: SignalSnapshot {
                temperature_c: Some(72.0),
                voltage_v: None,
                power_kw: 5.0,
                predicted_power_kw: 15.0,
            },
        };
        store
            .put(store::DETECTIONS, &detection.id.to_string(), &detection)
            .unwrap();
        let finding = Finding {
            id: Finding::deterministic_id(detection.id),
            detection_id: detection.id,
            asset_id: asset_id.to_string(),
            category: "OEM Fault".to_string(),
            subcategory: "inverter_overtemp".to_string(),
            severity,
            confidence: 0.9,
            recommended_actions: Vec::new(),
            status: FindingStatus::Open,
            diagnosed_at: Utc::now(),
        };
        store
            .put(store::FINDINGS, &finding.id.to_string(), &finding)
            .unwrap();
        let estimate = RiskEstimate {
            asset_id: asset_id.to_string(),
            horizon_hours: 24,
            ear_usd_day,
            confidence_low: ear_usd_day * 0.95,
            confidence_high: ear_usd_day * 1.05,
            computed_at: Utc::now(),
        };
        store
            .put(store::RISKS, &format!("{asset_id}-24"), &estimate)
            .unwrap();
    }

    #[test]
    fn crew_capacity_defers_lower_priority_asset() {
        let (_dir, store, config) = harness();
        let taxonomy = taxonomy();
        let inventory = inventory(&["INV-001", "INV-002"]);
        seed_fault(&store, "INV-001", 0.9, 150.0, 0);
        seed_fault(&store, "INV-002", 0.5, 40.0, 5);

        // budget = 1 crew * 8 h/day * 24/24 = 8 h; each job needs 8 h
        let entry = create(
            &store,
            &config,
            &taxonomy,
            &LossWeights::default(),
            &inventory,
            &["INV-001".to_string(), "INV-002".to_string()],
            24,
            None,
        )
        .unwrap();

        assert_eq!(entry.assets, vec!["INV-001"]);
        assert_eq!(entry.deferred_assets, vec!["INV-002"]);

        // the deferred asset schedules cleanly on a follow-up run
        let rerun = create(
            &store,
            &config,
            &taxonomy,
            &LossWeights::default(),
            &inventory,
            &["INV-002".to_string()],
            24,
            None,
        )
        .unwrap();
        assert_eq!(rerun.assets, vec!["INV-002"]);
        assert!(rerun.deferred_assets.is_empty());
    }

    #[test]
    fn admitted_work_hours_respect_budget() {
        let (_dir, store, mut config) = harness();
        config.crews_available = 2;
        let taxonomy = taxonomy();
        let ids: Vec<String> = (1..=5).map(|n| format!("INV-00{n}")).collect();
        let inventory = inventory(&["INV-001", "INV-002", "INV-003", "INV-004", "INV-005"]);
        for (idx, id) in ids.iter().enumerate() {
            seed_fault(&store, id, 0.9, 100.0 - idx as f64, idx as u32);
        }

        let entry = create(
            &store,
            &config,
            &taxonomy,
            &LossWeights::default(),
            &inventory,
            &ids,
            24,
            None,
        )
        .unwrap();

        // budget = 2 crews * 8 h = 16 h; jobs are 8 h each => at most 2 admitted
        assert_eq!(entry.assets.len(), 2);
        assert_eq!(entry.deferred_assets.len(), 3);
        assert!(entry.assets.len() as f64 * 8.0 <= 16.0);
    }

    #[test]
    fn equal_loss_ties_break_fifo_by_detection() {
        let mut candidates = vec![
            Candidate {
                asset_id: "INV-002".to_string(),
                loss: 100.0,
                work_hours: 8.0,
                earliest_detection: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            },
            Candidate {
                asset_id: "INV-001".to_string(),
                loss: 100.0,
                work_hours: 8.0,
                earliest_detection: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            },
        ];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].asset_id, "INV-002");
    }

    #[test]
    fn unknown_asset_is_not_found() {
        let (_dir, store, config) = harness();
        let err = create(
            &store,
            &config,
            &taxonomy(),
            &LossWeights::default(),
            &inventory(&["INV-001"]),
            &["INV-404".to_string()],
            24,
            None,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn rejected_is_terminal() {
        let (_dir, store, config) = harness();
        let taxonomy = taxonomy();
        let inventory = inventory(&["INV-001"]);
        seed_fault(&store, "INV-001", 0.9, 150.0, 0);
        let entry = create(
            &store,
            &config,
            &taxonomy,
            &LossWeights::default(),
            &inventory,
            &["INV-001".to_string()],
            24,
            None,
        )
        .unwrap();

        set_status(&store, entry.schedule_id, ScheduleStatus::Rejected).unwrap();
        let err = set_status(&store, entry.schedule_id, ScheduleStatus::Approved).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn completion_requires_completed_order() {
        let (_dir, store, config) = harness();
        let taxonomy = taxonomy();
        let inventory = inventory(&["INV-001"]);
        seed_fault(&store, "INV-001", 0.9, 150.0, 0);
        let entry = create(
            &store,
            &config,
            &taxonomy,
            &LossWeights::default(),
            &inventory,
            &["INV-001".to_string()],
            24,
            None,
        )
        .unwrap();
        set_status(&store, entry.schedule_id, ScheduleStatus::Approved).unwrap();

        let err = set_status(&store, entry.schedule_id, ScheduleStatus::Completed).unwrap_err();
        assert_eq!(err.exit_code(), 1);

        let order = WorkOrder {
            order_id: Uuid::new_v4(),
            bom_id: entry.schedule_id,
            asset_id: "INV-001".to_string(),
            status: OrderStatus::Completed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store
            .put(store::ORDERS, &order.order_id.to_string(), &order)
            .unwrap();
        let updated = set_status(&store, entry.schedule_id, ScheduleStatus::Completed).unwrap();
        assert_eq!(updated.status, ScheduleStatus::Completed);
        assert_eq!(updated.status_history.len(), 3);
    }

    #[test]
    fn weights_default_when_file_absent() {
        let (_dir, _store, config) = harness();
        let weights = load_weights(&config).unwrap();
        assert!((weights.w_energy - 1.0).abs() < 1e-12);
        assert!((weights.w_cost - 0.3).abs() < 1e-12);
        assert!((weights.w_mttr - 0.2).abs() < 1e-12);
    }

    #[test]
    fn set_weights_installs_override() {
        let (dir, _store, config) = harness();
        let source = dir.path().join("weights.yaml");
        std::fs::write(&source, "w_energy: 2.0\nw_cost: 0.5\n").unwrap();

        let installed = set_weights(&config, &source).unwrap();
        assert!((installed.w_energy - 2.0).abs() < 1e-12);
        // unspecified weights keep their defaults
        assert!((installed.w_mttr - 0.2).abs() < 1e-12);

        let loaded = load_weights(&config).unwrap();
        assert!((loaded.w_energy - 2.0).abs() < 1e-12);
    }
}
