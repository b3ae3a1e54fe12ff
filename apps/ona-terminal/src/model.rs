use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const UNKNOWN_CATEGORY: &str = "Unknown Needs Further Investigation";
pub const UNKNOWN_SUBCATEGORY: &str = "unclassified";

/// Static reference inventory, `{ "assets": [...] }` on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub capacity_kw: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub components: Vec<AssetComponent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetComponent {
    pub component_type: String,
    pub oem: String,
    pub model: String,
    #[serde(default)]
    pub serial: Option<String>,
}

/// One CSV row of ingested telemetry. Immutable once written; ordered by
/// timestamp per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub asset_id: String,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub voltage_v: Option<f64>,
    #[serde(default)]
    pub power_kw: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_power_kw: f64,
}

/// Mean signal values over a detection window, kept with the Detection so
/// diagnosis can run without re-reading the raw series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalSnapshot {
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub voltage_v: Option<f64>,
    pub power_kw: f64,
    pub predicted_power_kw: f64,
}

/// An anomalous window. The id is derived from (asset, window), so re-running
/// detection over the same data reproduces the same Detection byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub id: Uuid,
    pub asset_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub severity: f64,
    pub deviation: f64,
    pub snapshot: SignalSnapshot,
}

impl Detection {
    pub fn deterministic_id(asset_id: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Uuid {
        let name = format!(
            "detection:{asset_id}:{}:{}",
            window_start.to_rfc3339(),
            window_end.to_rfc3339()
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub detection_id: Uuid,
    pub asset_id: String,
    pub category: String,
    pub subcategory: String,
    /// Carried from the originating Detection.
    pub severity: f64,
    pub confidence: f64,
    pub recommended_actions: Vec<String>,
    pub status: FindingStatus,
    pub diagnosed_at: DateTime<Utc>,
}

impl Finding {
    pub fn deterministic_id(detection_id: Uuid) -> Uuid {
        let name = format!("finding:{detection_id}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    pub fn is_open(&self) -> bool {
        self.status == FindingStatus::Open
    }
}

/// Expected USD/day loss for one (asset, horizon) pair. Horizons are
/// independent estimates, not cumulative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub asset_id: String,
    pub horizon_hours: i64,
    pub ear_usd_day: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Proposed,
    Approved,
    Rejected,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    /// `proposed -> {approved, rejected}`; `approved -> completed`;
    /// `rejected` and `completed` are terminal.
    pub fn can_transition(self, next: ScheduleStatus) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Approved)
                | (Self::Proposed, Self::Rejected)
                | (Self::Approved, Self::Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ScheduleStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub schedule_id: Uuid,
    /// Admitted assets, highest loss first.
    pub assets: Vec<String>,
    /// Assets that did not fit the crew budget this run. Never dropped; a
    /// later `schedule create` picks them up.
    #[serde(default)]
    pub deferred_assets: Vec<String>,
    /// Loss score of the most urgent admitted asset; larger means more urgent.
    pub priority: f64,
    pub horizon_hours: i64,
    #[serde(default)]
    pub note: Option<String>,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    /// Append-only audit of status transitions.
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
}

impl ScheduleEntry {
    pub fn primary_asset(&self) -> Option<&str> {
        self.assets.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionMetrics {
    pub ear_usd_day: f64,
    pub total_cost_ear: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BomItem {
    pub sku: String,
    pub oem: String,
    pub model: String,
    pub component_type: String,
    pub qty: u32,
    pub price_usd: f64,
    pub lead_time_days: f64,
    pub recommended: bool,
    pub selection: SelectionMetrics,
}

/// One BOM per schedule entry; rebuilding overwrites, never merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bom {
    pub schedule_id: Uuid,
    pub asset_id: String,
    pub built_at: DateTime<Utc>,
    pub items: Vec<BomItem>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Dispatched,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Dispatched => "dispatched",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition(self, next: OrderStatus) -> bool {
        match (self, next) {
            (Self::Created, Self::Dispatched)
            | (Self::Dispatched, Self::InProgress)
            | (Self::InProgress, Self::Completed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub order_id: Uuid,
    pub bom_id: Uuid,
    pub asset_id: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub subscribed_at: DateTime<Utc>,
}

/// Notification subscriptions for one job (work order). Many emails per job;
/// adding the same email twice is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubscriptions {
    pub job_id: Uuid,
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn detection_ids_are_deterministic() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();

        let a = Detection::deterministic_id("INV-001", start, end);
        let b = Detection::deterministic_id("INV-001", start, end);
        let other = Detection::deterministic_id("INV-002", start, end);

        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn schedule_status_machine() {
        assert!(ScheduleStatus::Proposed.can_transition(ScheduleStatus::Approved));
        assert!(ScheduleStatus::Proposed.can_transition(ScheduleStatus::Rejected));
        assert!(ScheduleStatus::Approved.can_transition(ScheduleStatus::Completed));
        // rejected is terminal: operator must create a new schedule instead
        assert!(!ScheduleStatus::Rejected.can_transition(ScheduleStatus::Proposed));
        assert!(!ScheduleStatus::Rejected.can_transition(ScheduleStatus::Approved));
        assert!(!ScheduleStatus::Proposed.can_transition(ScheduleStatus::Completed));
    }

    #[test]
    fn order_status_machine() {
        assert!(OrderStatus::Created.can_transition(OrderStatus::Dispatched));
        assert!(OrderStatus::Dispatched.can_transition(OrderStatus::InProgress));
        assert!(OrderStatus::InProgress.can_transition(OrderStatus::Completed));
        assert!(OrderStatus::Created.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition(OrderStatus::Dispatched));
        assert!(!OrderStatus::Created.can_transition(OrderStatus::Completed));
    }
}
