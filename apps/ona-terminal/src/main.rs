use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ona_terminal::cli::{
    BomCommands, Cli, Commands, DetectCommands, DiagnoseCommands, EarCommands, OrderCommands,
    ScheduleCommands, TrackCommands,
};
use ona_terminal::config::PipelineConfig;
use ona_terminal::error::{AppError, AppResult};
use ona_terminal::ingest;
use ona_terminal::services::{bom, detector, diagnoser, orders, risk, scheduler};
use ona_terminal::store::Store;

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ona_terminal=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    // a second init (e.g. under a test harness) is harmless
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> AppResult<()> {
    let config = PipelineConfig::from_env();
    let store = Store::open(&config.data_root, config.io_timeout())?;

    match cli.command {
        Commands::Detect(args) => match args.command {
            DetectCommands::Run(args) => {
                let inventory = ingest::load_inventory(&config)?;
                let mut params = detector::DetectParams::from_config(&config);
                if let Some(window_min) = args.window_min {
                    if window_min <= 0 {
                        return Err(AppError::validation(format!(
                            "window must be positive, got {window_min}"
                        )));
                    }
                    params.window_min = window_min;
                }
                if let Some(threshold) = args.severity_threshold {
                    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                        return Err(AppError::validation(format!(
                            "severity threshold must be in [0, 1], got {threshold}"
                        )));
                    }
                    params.severity_threshold = threshold;
                }
                params.since = args.since;

                let detections =
                    detector::run(&store, &config, &inventory, args.asset.as_deref(), &params)?;
                for detection in &detections {
                    println!(
                        "{}  {}  {} .. {}  severity={:.2} deviation={:.2}",
                        detection.id,
                        detection.asset_id,
                        detection.window_start.to_rfc3339(),
                        detection.window_end.to_rfc3339(),
                        detection.severity,
                        detection.deviation
                    );
                }
                println!("{} detection(s)", detections.len());
            }
            DetectCommands::List(args) => {
                let detections = detector::list(&store, args.since)?;
                for detection in &detections {
                    println!(
                        "{}  {}  {} .. {}  severity={:.2}",
                        detection.id,
                        detection.asset_id,
                        detection.window_start.to_rfc3339(),
                        detection.window_end.to_rfc3339(),
                        detection.severity
                    );
                }
            }
        },
        Commands::Diagnose(args) => match args.command {
            DiagnoseCommands::Run(args) => {
                let taxonomy = diagnoser::load_taxonomy(&config)?;
                let findings = diagnoser::run(&store, &taxonomy, &args.asset)?;
                for finding in &findings {
                    println!(
                        "{}  {}  {} / {}  severity={:.2} confidence={:.2}",
                        finding.id,
                        finding.asset_id,
                        finding.category,
                        finding.subcategory,
                        finding.severity,
                        finding.confidence
                    );
                }
                println!("{} finding(s)", findings.len());
            }
            DiagnoseCommands::List => {
                for finding in diagnoser::list(&store)? {
                    println!(
                        "{}  {}  {} / {}  [{}]",
                        finding.id,
                        finding.asset_id,
                        finding.category,
                        finding.subcategory,
                        if finding.is_open() { "open" } else { "resolved" }
                    );
                }
            }
        },
        Commands::Ear(args) => match args.command {
            EarCommands::Calc(args) => {
                let inventory = ingest::load_inventory(&config)?;
                let asset = ingest::find_asset(&inventory, &args.asset)?;
                let estimates = risk::calc(&store, &config, asset, &args.horizons)?;
                for estimate in &estimates {
                    println!(
                        "{}  horizon={}h  ear={:.2} USD/day  ci=[{:.2}, {:.2}]",
                        estimate.asset_id,
                        estimate.horizon_hours,
                        estimate.ear_usd_day,
                        estimate.confidence_low,
                        estimate.confidence_high
                    );
                }
            }
        },
        Commands::Schedule(args) => match args.command {
            ScheduleCommands::Create(args) => {
                let inventory = ingest::load_inventory(&config)?;
                let taxonomy = diagnoser::load_taxonomy(&config)?;
                let weights = scheduler::load_weights(&config)?;
                let entry = scheduler::create(
                    &store,
                    &config,
                    &taxonomy,
                    &weights,
                    &inventory,
                    &args.assets,
                    args.horizon,
                    args.note,
                )?;
                println!(
                    "schedule {}  priority={:.2}  horizon={}h  assets=[{}]  deferred=[{}]",
                    entry.schedule_id,
                    entry.priority,
                    entry.horizon_hours,
                    entry.assets.join(", "),
                    entry.deferred_assets.join(", ")
                );
            }
            ScheduleCommands::SetLoss(args) => {
                let weights = scheduler::set_weights(&config, &args.metrics)?;
                println!(
                    "loss weights: energy={} cost={} mttr={}",
                    weights.w_energy, weights.w_cost, weights.w_mttr
                );
            }
            ScheduleCommands::List => {
                for entry in scheduler::list(&store)? {
                    println!(
                        "{}  [{}]  priority={:.2}  assets=[{}]  deferred=[{}]",
                        entry.schedule_id,
                        entry.status.as_str(),
                        entry.priority,
                        entry.assets.join(", "),
                        entry.deferred_assets.join(", ")
                    );
                }
            }
            ScheduleCommands::SetStatus(args) => {
                let entry = scheduler::set_status(&store, args.schedule_id, args.status)?;
                println!("schedule {}  [{}]", entry.schedule_id, entry.status.as_str());
            }
        },
        Commands::Bom(args) => match args.command {
            BomCommands::Build(args) => {
                let inventory = ingest::load_inventory(&config)?;
                let taxonomy = diagnoser::load_taxonomy(&config)?;
                let catalog = if args.from_catalog {
                    Some(bom::load_catalog(&config)?)
                } else {
                    None
                };
                let options = bom::BuildOptions {
                    from_catalog: args.from_catalog,
                    variants_per_type: args.variants_per_type,
                    ear_usd_day: args.ear_usd_day,
                };
                let built = bom::build(
                    &store,
                    &taxonomy,
                    &inventory,
                    catalog.as_ref(),
                    args.schedule_id,
                    &options,
                )?;
                for item in &built.items {
                    println!(
                        "{}  {} {} ({})  qty={}  {:.2} USD  lead={:.0}d  total_cost_ear={:.2}{}",
                        item.sku,
                        item.oem,
                        item.model,
                        item.component_type,
                        item.qty,
                        item.price_usd,
                        item.lead_time_days,
                        item.selection.total_cost_ear,
                        if item.recommended { "  *recommended*" } else { "" }
                    );
                }
                println!(
                    "BOM for schedule {} ({}): {} item(s)",
                    built.schedule_id,
                    built.asset_id,
                    built.items.len()
                );
            }
        },
        Commands::Order(args) => match args.command {
            OrderCommands::Create(args) => {
                let order = orders::create(&store, args.bom_id, args.asset.as_deref())?;
                println!(
                    "order {}  bom={}  asset={}  [{}]",
                    order.order_id,
                    order.bom_id,
                    order.asset_id,
                    order.status.as_str()
                );
            }
            OrderCommands::SetStatus(args) => {
                let order = orders::set_status(&store, args.order_id, args.status)?;
                println!("order {}  [{}]", order.order_id, order.status.as_str());
            }
            OrderCommands::List => {
                for order in orders::list(&store)? {
                    println!(
                        "{}  bom={}  asset={}  [{}]  updated={}",
                        order.order_id,
                        order.bom_id,
                        order.asset_id,
                        order.status.as_str(),
                        order.updated_at.to_rfc3339()
                    );
                }
            }
        },
        Commands::Track(args) => match args.command {
            TrackCommands::Subscribe(args) => {
                let subscriptions = orders::subscribe(&store, args.job, &args.email)?;
                println!(
                    "job {}: {} subscriber(s)",
                    subscriptions.job_id,
                    subscriptions.subscribers.len()
                );
            }
            TrackCommands::List(args) => {
                let subscriptions = orders::list_subscriptions(&store, args.job)?;
                for subscriber in &subscriptions.subscribers {
                    println!(
                        "{}  since {}",
                        subscriber.email,
                        subscriber.subscribed_at.to_rfc3339()
                    );
                }
            }
        },
    }

    Ok(())
}
