use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::model::{
    Bom, Finding, FindingStatus, JobSubscriptions, OrderStatus, ScheduleEntry, ScheduleStatus,
    StatusChange, Subscriber, WorkOrder,
};
use crate::store::{self, Store};

/// Opens a work order against an existing BOM. The asset defaults to the one
/// the BOM was built for; naming a different one is an operator error, not a
/// lookup miss.
pub fn create(store: &Store, bom_id: Uuid, asset_id: Option<&str>) -> AppResult<WorkOrder> {
    let bom: Bom = store.require(store::BOMS, &bom_id.to_string())?;
    let asset_id = asset_id.unwrap_or(&bom.asset_id);
    if bom.asset_id != asset_id {
        return Err(AppError::validation(format!(
            "BOM {bom_id} was built for asset {}, not {asset_id}",
            bom.asset_id
        )));
    }

    let now = Utc::now();
    let order = WorkOrder {
        order_id: Uuid::new_v4(),
        bom_id,
        asset_id: asset_id.to_string(),
        status: OrderStatus::Created,
        created_at: now,
        updated_at: now,
    };
    store.put(store::ORDERS, &order.order_id.to_string(), &order)?;
    tracing::info!(order_id = %order.order_id, bom_id = %bom_id, asset_id = %asset_id, "work order created");
    Ok(order)
}

pub fn list(store: &Store) -> AppResult<Vec<WorkOrder>> {
    let mut orders: Vec<WorkOrder> = store.list(store::ORDERS)?;
    orders.sort_by_key(|order| order.created_at);
    Ok(orders)
}

/// Advances an order through `created -> dispatched -> in_progress ->
/// completed`, with cancellation allowed from any non-terminal state.
/// Completing an order resolves the asset's open findings and completes the
/// approved schedule the order was cut from.
pub fn set_status(store: &Store, order_id: Uuid, next: OrderStatus) -> AppResult<WorkOrder> {
    let mut order: WorkOrder = store.require(store::ORDERS, &order_id.to_string())?;
    if !order.status.can_transition(next) {
        return Err(AppError::validation(format!(
            "order {order_id} cannot move from {} to {}",
            order.status.as_str(),
            next.as_str()
        )));
    }

    order.status = next;
    order.updated_at = Utc::now();
    store.put(store::ORDERS, &order_id.to_string(), &order)?;
    tracing::info!(order_id = %order_id, status = next.as_str(), "order status changed");

    if next == OrderStatus::Completed {
        resolve_open_findings(store, &order.asset_id)?;
        complete_schedule(store, order.bom_id)?;
    }
    Ok(order)
}

fn resolve_open_findings(store: &Store, asset_id: &str) -> AppResult<()> {
    let findings: Vec<Finding> = store.list(store::FINDINGS)?;
    for mut finding in findings {
        if finding.asset_id == asset_id && finding.is_open() {
            finding.status = FindingStatus::Resolved;
            store.put(store::FINDINGS, &finding.id.to_string(), &finding)?;
            tracing::info!(finding_id = %finding.id, asset_id = %asset_id, "finding resolved");
        }
    }
    Ok(())
}

/// BOMs are keyed by schedule id, so the order's `bom_id` is also the schedule
/// to close out. A schedule that was never approved stays where it is.
fn complete_schedule(store: &Store, schedule_id: Uuid) -> AppResult<()> {
    let Some(mut schedule) =
        store.get::<ScheduleEntry>(store::SCHEDULES, &schedule_id.to_string())?
    else {
        return Ok(());
    };
    if !schedule.status.can_transition(ScheduleStatus::Completed) {
        tracing::warn!(
            schedule_id = %schedule_id,
            status = schedule.status.as_str(),
            "order completed but schedule is not approved; leaving schedule untouched"
        );
        return Ok(());
    }
    schedule.status = ScheduleStatus::Completed;
    schedule.status_history.push(StatusChange {
        status: ScheduleStatus::Completed,
        changed_at: Utc::now(),
    });
    store.put(store::SCHEDULES, &schedule_id.to_string(), &schedule)?;
    tracing::info!(schedule_id = %schedule_id, "schedule completed");
    Ok(())
}

/// Subscribes an email to status updates for one job. Re-subscribing the same
/// address is a no-op.
pub fn subscribe(store: &Store, job_id: Uuid, email: &str) -> AppResult<JobSubscriptions> {
    store.require::<WorkOrder>(store::ORDERS, &job_id.to_string())?;
    let email = normalize_email(email)?;

    let mut subscriptions = store
        .get::<JobSubscriptions>(store::SUBSCRIPTIONS, &job_id.to_string())?
        .unwrap_or(JobSubscriptions {
            job_id,
            subscribers: Vec::new(),
        });
    if subscriptions
        .subscribers
        .iter()
        .any(|subscriber| subscriber.email == email)
    {
        tracing::debug!(job_id = %job_id, email = %email, "already subscribed");
        return Ok(subscriptions);
    }

    subscriptions.subscribers.push(Subscriber {
        email: email.clone(),
        subscribed_at: Utc::now(),
    });
    store.put(store::SUBSCRIPTIONS, &job_id.to_string(), &subscriptions)?;
    tracing::info!(job_id = %job_id, email = %email, "subscription added");
    Ok(subscriptions)
}

pub fn list_subscriptions(store: &Store, job_id: Uuid) -> AppResult<JobSubscriptions> {
    store.require::<WorkOrder>(store::ORDERS, &job_id.to_string())?;
    Ok(store
        .get::<JobSubscriptions>(store::SUBSCRIPTIONS, &job_id.to_string())?
        .unwrap_or(JobSubscriptions {
            job_id,
            subscribers: Vec::new(),
        }))
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    };
    if !valid {
        return Err(AppError::validation(format!(
            "invalid email address: {email:?}"
        )));
    }
    Ok(email)
}
