use chrono::Utc;
use serde::Deserialize;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::ingest;
use crate::model::{Asset, Bom, BomItem, Inventory, ScheduleEntry, SelectionMetrics};
use crate::services::diagnoser::{self, Taxonomy};
use crate::services::risk;
use crate::store::{self, Store};

const EAR_HORIZON_HOURS: i64 = 24;
const DEFAULT_VARIANTS_PER_TYPE: usize = 1;

/// Replacement-part catalog, `{ "parts": [...] }` on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub parts: Vec<CatalogPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPart {
    pub sku: String,
    pub oem: String,
    pub model: String,
    pub component_type: String,
    pub price_usd: f64,
    pub lead_time_days: f64,
    /// Installed component models this part may replace. Empty means
    /// universal within its component type.
    #[serde(default)]
    pub compatible_models: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub from_catalog: bool,
    pub variants_per_type: usize,
    /// Overrides the stored 24 h estimate when set.
    pub ear_usd_day: Option<f64>,
}

impl Default for BuildOptions {
    /// Like-for-like sourcing with a single line per component type; catalog
    /// sourcing is opt-in.
    fn default() -> Self {
        Self {
            from_catalog: false,
            variants_per_type: DEFAULT_VARIANTS_PER_TYPE,
            ear_usd_day: None,
        }
    }
}

pub fn load_catalog(config: &PipelineConfig) -> AppResult<Catalog> {
    if !config.catalog_path.exists() {
        return Err(AppError::config(format!(
            "parts catalog not found at {}",
            config.catalog_path.display()
        )));
    }
    let contents = store::read_file_bounded(&config.catalog_path, config.io_timeout())?;
    let catalog: Catalog = serde_json::from_str(&contents).map_err(|err| {
        AppError::config(format!(
            "malformed parts catalog {}: {err}",
            config.catalog_path.display()
        ))
    })?;
    Ok(catalog)
}

/// Builds the bill of materials for a schedule's primary asset and persists it
/// keyed by schedule id. Rebuilding replaces the previous BOM wholesale.
pub fn build(
    store: &Store,
    taxonomy: &Taxonomy,
    inventory: &Inventory,
    catalog: Option<&Catalog>,
    schedule_id: Uuid,
    options: &BuildOptions,
) -> AppResult<Bom> {
    let schedule: ScheduleEntry = store.require(store::SCHEDULES, &schedule_id.to_string())?;
    let Some(asset_id) = schedule.primary_asset() else {
        return Err(AppError::validation(format!(
            "schedule {schedule_id} admitted no assets; nothing to source"
        )));
    };
    let asset = ingest::find_asset(inventory, asset_id)?;

    let component_types = required_component_types(store, taxonomy, asset)?;
    if component_types.is_empty() {
        tracing::warn!(
            schedule_id = %schedule_id,
            asset_id = %asset.id,
            "no component types implicated; producing an empty BOM"
        );
    }

    let ear_usd_day = match options.ear_usd_day {
        Some(value) => value,
        None => risk::stored_estimate(store, &asset.id, EAR_HORIZON_HOURS)?
            .map(|estimate| estimate.ear_usd_day)
            .unwrap_or(0.0),
    };

    let mut items = Vec::new();
    for component_type in &component_types {
        let installed = asset
            .components
            .iter()
            .find(|component| component.component_type == *component_type);
        if options.from_catalog {
            let Some(catalog) = catalog else {
                return Err(AppError::config(
                    "catalog sourcing requested but no catalog is loaded",
                ));
            };
            items.extend(rank_catalog_variants(
                catalog,
                component_type,
                installed.map(|component| component.model.as_str()),
                ear_usd_day,
                options.variants_per_type,
            ));
        } else if let Some(component) = installed {
            // like-for-like: reorder exactly what is installed
            items.push(BomItem {
                sku: format!("LFL-{}", component.model),
                oem: component.oem.clone(),
                model: component.model.clone(),
                component_type: component.component_type.clone(),
                qty: 1,
                price_usd: 0.0,
                lead_time_days: 0.0,
                recommended: true,
                selection: SelectionMetrics {
                    ear_usd_day,
                    total_cost_ear: 0.0,
                    rank: 1,
                },
            });
        } else {
            tracing::warn!(
                asset_id = %asset.id,
                component_type = %component_type,
                "no installed component of this type; skipping like-for-like line"
            );
        }
    }

    let bom = Bom {
        schedule_id,
        asset_id: asset.id.clone(),
        built_at: Utc::now(),
        items,
    };
    store.put(store::BOMS, &schedule_id.to_string(), &bom)?;
    tracing::info!(
        schedule_id = %schedule_id,
        asset_id = %asset.id,
        items = bom.items.len(),
        "BOM built"
    );
    Ok(bom)
}

pub fn get(store: &Store, schedule_id: Uuid) -> AppResult<Bom> {
    store.require(store::BOMS, &schedule_id.to_string())
}

/// Component types implicated by the asset's open findings; falls back to the
/// asset's installed component types when no finding names one.
fn required_component_types(
    store: &Store,
    taxonomy: &Taxonomy,
    asset: &Asset,
) -> AppResult<Vec<String>> {
    let mut types: Vec<String> = Vec::new();
    for finding in diagnoser::open_findings_for_asset(store, &asset.id)? {
        let params = taxonomy.maintenance_params(&finding.category, &finding.subcategory);
        if let Some(component_type) = params.component_type {
            if !types.contains(&component_type) {
                types.push(component_type);
            }
        }
    }
    if types.is_empty() {
        for component in &asset.components {
            if !types.contains(&component.component_type) {
                types.push(component.component_type.clone());
            }
        }
    }
    Ok(types)
}

/// Candidates compatible with the installed model, ranked by price plus the
/// downtime cost accrued over the part's lead time. Rank 1 is the
/// recommendation; the rest are fallbacks for procurement.
fn rank_catalog_variants(
    catalog: &Catalog,
    component_type: &str,
    installed_model: Option<&str>,
    ear_usd_day: f64,
    variants_per_type: usize,
) -> Vec<BomItem> {
    let mut candidates: Vec<&CatalogPart> = catalog
        .parts
        .iter()
        .filter(|part| part.component_type == component_type)
        .filter(|part| match installed_model {
            Some(model) => {
                part.compatible_models.is_empty()
                    || part.compatible_models.iter().any(|m| m == model)
                    || part.model == model
            }
            None => true,
        })
        .collect();

    candidates.sort_by(|a, b| {
        total_cost_ear(a, ear_usd_day)
            .partial_cmp(&total_cost_ear(b, ear_usd_day))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.price_usd.partial_cmp(&b.price_usd).unwrap_or(Ordering::Equal))
            .then_with(|| a.sku.cmp(&b.sku))
    });

    candidates
        .into_iter()
        .take(variants_per_type.max(1))
        .enumerate()
        .map(|(index, part)| BomItem {
            sku: part.sku.clone(),
            oem: part.oem.clone(),
            model: part.model.clone(),
            component_type: part.component_type.clone(),
            qty: 1,
            price_usd: part.price_usd,
            lead_time_days: part.lead_time_days,
            recommended: index == 0,
            selection: SelectionMetrics {
                ear_usd_day,
                total_cost_ear: total_cost_ear(part, ear_usd_day),
                rank: index as u32 + 1,
            },
        })
        .collect()
}

fn total_cost_ear(part: &CatalogPart, ear_usd_day: f64) -> f64 {
    part.price_usd + ear_usd_day * part.lead_time_days
}
