use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use crate::model::{OrderStatus, ScheduleStatus};

#[derive(Parser)]
#[command(name = "ona-terminal", version, about = "Solar maintenance pipeline CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan observations against forecasts for anomalous windows
    Detect(DetectArgs),
    /// Classify detections against the category taxonomy
    Diagnose(DiagnoseArgs),
    /// Energy-at-Risk estimates
    Ear(EarArgs),
    /// Maintenance scheduling
    Schedule(ScheduleArgs),
    /// Bill-of-materials sourcing
    Bom(BomArgs),
    /// Work-order lifecycle
    Order(OrderArgs),
    /// Job status subscriptions
    Track(TrackArgs),
}

#[derive(Args)]
pub struct DetectArgs {
    #[command(subcommand)]
    pub command: DetectCommands,
}

#[derive(Subcommand)]
pub enum DetectCommands {
    Run(DetectRunArgs),
    List(DetectListArgs),
}

#[derive(Args)]
pub struct DetectRunArgs {
    /// Scan a single asset instead of the whole inventory.
    #[arg(long)]
    pub asset: Option<String>,
    /// Start of the scan range (RFC 3339); defaults to one window ago.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    #[arg(long)]
    pub window_min: Option<i64>,
    #[arg(long)]
    pub severity_threshold: Option<f64>,
}

#[derive(Args)]
pub struct DetectListArgs {
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Args)]
pub struct DiagnoseArgs {
    #[command(subcommand)]
    pub command: DiagnoseCommands,
}

#[derive(Subcommand)]
pub enum DiagnoseCommands {
    Run(DiagnoseRunArgs),
    List,
}

#[derive(Args)]
pub struct DiagnoseRunArgs {
    #[arg(long)]
    pub asset: String,
}

#[derive(Args)]
pub struct EarArgs {
    #[command(subcommand)]
    pub command: EarCommands,
}

#[derive(Subcommand)]
pub enum EarCommands {
    Calc(EarCalcArgs),
}

#[derive(Args)]
pub struct EarCalcArgs {
    #[arg(long)]
    pub asset: String,
    /// Comma-separated horizons in hours.
    #[arg(long, default_value = "24,72", value_delimiter = ',')]
    pub horizons: Vec<i64>,
}

#[derive(Args)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommands,
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    Create(ScheduleCreateArgs),
    SetLoss(ScheduleSetLossArgs),
    List,
    SetStatus(ScheduleSetStatusArgs),
}

#[derive(Args)]
pub struct ScheduleCreateArgs {
    /// Comma-separated asset ids to consider.
    #[arg(long, value_delimiter = ',', required = true)]
    pub assets: Vec<String>,
    #[arg(long, default_value_t = 72)]
    pub horizon: i64,
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args)]
pub struct ScheduleSetLossArgs {
    /// YAML file with loss-function weights to install.
    #[arg(long)]
    pub metrics: PathBuf,
}

#[derive(Args)]
pub struct ScheduleSetStatusArgs {
    #[arg(long)]
    pub schedule_id: Uuid,
    #[arg(long, value_enum)]
    pub status: ScheduleStatus,
}

#[derive(Args)]
pub struct BomArgs {
    #[command(subcommand)]
    pub command: BomCommands,
}

#[derive(Subcommand)]
pub enum BomCommands {
    Build(BomBuildArgs),
}

#[derive(Args)]
pub struct BomBuildArgs {
    #[arg(long)]
    pub schedule_id: Uuid,
    /// Source replacement candidates from the parts catalog instead of
    /// reordering the installed components like-for-like.
    #[arg(long, default_value_t = false)]
    pub from_catalog: bool,
    #[arg(long, default_value_t = 1)]
    pub variants_per_type: usize,
    /// Override the stored 24 h Energy-at-Risk estimate.
    #[arg(long)]
    pub ear_usd_day: Option<f64>,
}

#[derive(Args)]
pub struct OrderArgs {
    #[command(subcommand)]
    pub command: OrderCommands,
}

#[derive(Subcommand)]
pub enum OrderCommands {
    Create(OrderCreateArgs),
    SetStatus(OrderSetStatusArgs),
    List,
}

#[derive(Args)]
pub struct OrderCreateArgs {
    #[arg(long)]
    pub bom_id: Uuid,
    /// Defaults to the asset the BOM was built for.
    #[arg(long)]
    pub asset: Option<String>,
}

#[derive(Args)]
pub struct OrderSetStatusArgs {
    #[arg(long)]
    pub order_id: Uuid,
    #[arg(long, value_enum)]
    pub status: OrderStatus,
}

#[derive(Args)]
pub struct TrackArgs {
    #[command(subcommand)]
    pub command: TrackCommands,
}

#[derive(Subcommand)]
pub enum TrackCommands {
    Subscribe(TrackSubscribeArgs),
    List(TrackListArgs),
}

#[derive(Args)]
pub struct TrackSubscribeArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub job: Uuid,
}

#[derive(Args)]
pub struct TrackListArgs {
    #[arg(long)]
    pub job: Uuid,
}
