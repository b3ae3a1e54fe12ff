use chrono::{TimeZone, Utc};
use std::fs;
use std::time::Duration;

use ona_terminal::config::PipelineConfig;
use ona_terminal::ingest;
use ona_terminal::model::{FindingStatus, OrderStatus, ScheduleStatus};
use ona_terminal::services::{bom, detector, diagnoser, orders, risk, scheduler};
use ona_terminal::store::Store;

fn write_fixtures(config: &PipelineConfig) {
    fs::create_dir_all(&config.observations_root).unwrap();
    fs::create_dir_all(&config.forecasts_root).unwrap();
    fs::create_dir_all(config.taxonomy_path.parent().unwrap()).unwrap();

    fs::write(
        &config.inventory_path,
        r#"{
  "assets": [
    {
      "id": "INV-001",
      "name": "Inverter 1",
      "type": "inverter",
      "capacity_kw": 20.0,
      "components": [
        { "component_type": "inverter", "oem": "SunGrow", "model": "SG-5K", "serial": "SN-1" }
      ]
    },
    {
      "id": "INV-002",
      "name": "Inverter 2",
      "type": "inverter",
      "capacity_kw": 20.0,
      "components": [
        { "component_type": "inverter", "oem": "SunGrow", "model": "SG-5K", "serial": "SN-2" }
      ]
    }
  ]
}"#,
    )
    .unwrap();

    // INV-001 produces a third of its forecast and runs hot; INV-002 is nominal
    fs::write(
        config.observations_path("INV-001"),
        "timestamp,asset_id,temperature_c,voltage_v,power_kw\n\
         2026-03-01T10:02:00Z,INV-001,71.0,702.0,5.0\n\
         2026-03-01T10:07:00Z,INV-001,73.0,701.0,5.0\n",
    )
    .unwrap();
    fs::write(
        config.observations_path("INV-002"),
        "timestamp,asset_id,temperature_c,voltage_v,power_kw\n\
         2026-03-01T10:02:00Z,INV-002,41.0,705.0,14.9\n",
    )
    .unwrap();
    for asset in ["INV-001", "INV-002"] {
        fs::write(
            config.forecast_path(asset),
            "timestamp,predicted_power_kw\n2026-03-01T10:05:00Z,15.0\n",
        )
        .unwrap();
    }

    fs::write(
        &config.taxonomy_path,
        r#"categories:
  - name: OEM Fault
    subcategories:
      - name: inverter_overtemp
        when: { metric: temperature_c, op: gt, value: 60.0 }
        recommended_actions: ["Replace inverter cooling fan"]
        repair_cost_usd: 1200.0
        mttr_hours: 6.0
        work_hours: 8.0
        component_type: inverter
"#,
    )
    .unwrap();

    fs::write(
        &config.catalog_path,
        r#"{
  "parts": [
    { "sku": "P-CHEAP-SLOW", "oem": "Acme", "model": "AC-100", "component_type": "inverter",
      "price_usd": 800.0, "lead_time_days": 20.0, "compatible_models": ["SG-5K"] },
    { "sku": "P-FAST", "oem": "Acme", "model": "AC-200", "component_type": "inverter",
      "price_usd": 1000.0, "lead_time_days": 2.0, "compatible_models": ["SG-5K"] },
    { "sku": "P-OTHER", "oem": "Acme", "model": "AC-900", "component_type": "inverter",
      "price_usd": 100.0, "lead_time_days": 1.0, "compatible_models": ["XX-9K"] }
  ]
}"#,
    )
    .unwrap();
}

#[test]
fn full_pipeline_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::with_data_root(dir.path().to_path_buf());
    config.crews_available = 1;
    config.hours_per_day = 8.0;
    write_fixtures(&config);

    let store = Store::open(&config.data_root, Duration::from_secs(5)).unwrap();
    let inventory = ingest::load_inventory(&config).unwrap();
    let taxonomy = diagnoser::load_taxonomy(&config).unwrap();

    // detect: only the underperforming inverter trips
    let mut params = detector::DetectParams::from_config(&config);
    params.since = Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    let detections = detector::run(&store, &config, &inventory, None, &params).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].asset_id, "INV-001");
    // deviation = |5 - 15| / 15 = 0.667 => severity saturates at 1.0
    assert!((detections[0].severity - 1.0).abs() < 1e-9);

    // re-running over the same data rewrites the same documents
    let rerun = detector::run(&store, &config, &inventory, None, &params).unwrap();
    assert_eq!(rerun, detections);

    // diagnose: overtemp rule matches on the snapshot temperature
    let findings = diagnoser::run(&store, &taxonomy, "INV-001").unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].subcategory, "inverter_overtemp");

    // ear: 20 kW * 0.2 * 24 h * 0.15 $/kWh * 1.0 = 14.40 $/day
    let asset = ingest::find_asset(&inventory, "INV-001").unwrap();
    let estimates = risk::calc(&store, &config, asset, &[24, 72]).unwrap();
    assert!((estimates[0].ear_usd_day - 14.4).abs() < 1e-9);
    let width_24 = estimates[0].confidence_high - estimates[0].confidence_low;
    let width_72 = estimates[1].confidence_high - estimates[1].confidence_low;
    assert!(width_72 > width_24);

    // schedule: one crew-day of budget fits only the faulted inverter
    let weights = scheduler::load_weights(&config).unwrap();
    let entry = scheduler::create(
        &store,
        &config,
        &taxonomy,
        &weights,
        &inventory,
        &["INV-001".to_string(), "INV-002".to_string()],
        24,
        Some("weekly triage".to_string()),
    )
    .unwrap();
    assert_eq!(entry.assets, vec!["INV-001"]);
    assert_eq!(entry.deferred_assets, vec!["INV-002"]);
    scheduler::set_status(&store, entry.schedule_id, ScheduleStatus::Approved).unwrap();

    // bom: compatible catalog parts ranked by price + lead-time downtime
    let catalog = bom::load_catalog(&config).unwrap();
    let built = bom::build(
        &store,
        &taxonomy,
        &inventory,
        Some(&catalog),
        entry.schedule_id,
        &bom::BuildOptions {
            from_catalog: true,
            variants_per_type: 2,
            ear_usd_day: None,
        },
    )
    .unwrap();
    // P-FAST: 1000 + 14.4 * 2 = 1028.8 beats P-CHEAP-SLOW: 800 + 14.4 * 20 = 1088
    let skus: Vec<&str> = built.items.iter().map(|item| item.sku.as_str()).collect();
    assert_eq!(skus, vec!["P-FAST", "P-CHEAP-SLOW"]);
    assert!(built.items[0].recommended);

    // order lifecycle closes the loop: findings resolve, schedule completes
    let order = orders::create(&store, entry.schedule_id, None).unwrap();
    assert_eq!(order.asset_id, "INV-001");
    orders::set_status(&store, order.order_id, OrderStatus::Dispatched).unwrap();
    orders::set_status(&store, order.order_id, OrderStatus::InProgress).unwrap();
    orders::set_status(&store, order.order_id, OrderStatus::Completed).unwrap();

    let findings = diagnoser::list(&store).unwrap();
    assert!(findings
        .iter()
        .all(|finding| finding.status == FindingStatus::Resolved));
    let schedules = scheduler::list(&store).unwrap();
    assert_eq!(schedules[0].status, ScheduleStatus::Completed);

    // with the fault resolved the asset carries no Energy-at-Risk
    let estimates = risk::calc(&store, &config, asset, &[24]).unwrap();
    assert_eq!(estimates[0].ear_usd_day, 0.0);

    // tracking: duplicate subscribe is a no-op
    orders::subscribe(&store, order.order_id, "Ops@Example.com").unwrap();
    let subs = orders::subscribe(&store, order.order_id, "ops@example.com").unwrap();
    assert_eq!(subs.subscribers.len(), 1);

    // the deferred inverter schedules cleanly on its own
    let rerun = scheduler::create(
        &store,
        &config,
        &taxonomy,
        &weights,
        &inventory,
        &["INV-002".to_string()],
        24,
        None,
    )
    .unwrap();
    assert_eq!(rerun.assets, vec!["INV-002"]);
    assert!(rerun.deferred_assets.is_empty());
}
