//! Read-only operation listings for a scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cli::{GetOperationArgs, GetOperationsArgs, OperationColumns};
use crate::client::{AppContext, ApiClient, CliResult};
use crate::output::{format_age, render_table, surface_remote_error};

const NONE_MARKER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Lease {
    #[serde(default)]
    pub(crate) ttl: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExecutionEvent {
    #[serde(default)]
    pub(crate) created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) event: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationEntry {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default, rename = "definitionName", alias = "name")]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) lease: Option<Lease>,
    #[serde(default)]
    pub(crate) input: Option<Value>,
    #[serde(default)]
    pub(crate) execution_history: Vec<ExecutionEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationsResponse {
    #[serde(default)]
    pending_operations: Vec<OperationEntry>,
    #[serde(default)]
    active_operations: Vec<OperationEntry>,
    #[serde(default)]
    finished_operations: Vec<OperationEntry>,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    operation: OperationEntry,
}

/// Display values for the lease columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeaseDisplay {
    pub(crate) ttl: String,
    pub(crate) expired: String,
}

/// Evaluate a lease at `now`.
///
/// No lease yields `-` for both columns. An unparseable TTL is still shown,
/// with `-` for the expiry column.
pub(crate) fn evaluate_lease(lease: Option<&Lease>, now: DateTime<Utc>) -> LeaseDisplay {
    let Some(lease) = lease else {
        return LeaseDisplay {
            ttl: NONE_MARKER.to_string(),
            expired: NONE_MARKER.to_string(),
        };
    };

    let expired = DateTime::parse_from_rfc3339(&lease.ttl).map_or_else(
        |_| NONE_MARKER.to_string(),
        |ttl| {
            if now > ttl.with_timezone(&Utc) {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        },
    );
    LeaseDisplay {
        ttl: lease.ttl.clone(),
        expired,
    }
}

/// Merge pending, active, and finished operations, oldest first.
fn merge_operations(response: OperationsResponse) -> Vec<OperationEntry> {
    let mut merged = response.pending_operations;
    merged.extend(response.active_operations);
    merged.extend(response.finished_operations);
    merged.sort_by_key(|entry| entry.created_at);
    merged
}

fn headers(columns: OperationColumns) -> Vec<&'static str> {
    let mut headers = vec!["ID", "NAME", "STATUS", "AGE", "LEASE_TTL", "LEASE_EXPIRED"];
    if columns.input {
        headers.push("INPUT");
    }
    if columns.execution_history {
        headers.push("EXEC. HIST.");
    }
    headers
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrintableEvent<'a> {
    created_at: String,
    event: &'a str,
}

fn operation_row(entry: &OperationEntry, columns: OperationColumns, now: DateTime<Utc>) -> Vec<String> {
    let age = entry
        .created_at
        .map_or_else(|| NONE_MARKER.to_string(), |created| format_age(now - created));
    let lease = evaluate_lease(entry.lease.as_ref(), now);

    let mut row = vec![
        entry.id.clone(),
        entry.name.to_uppercase(),
        entry.status.to_uppercase(),
        age,
        lease.ttl,
        lease.expired,
    ];
    if columns.input {
        row.push(json_cell(entry.input.as_ref()));
    }
    if columns.execution_history {
        let history: Vec<PrintableEvent<'_>> = entry
            .execution_history
            .iter()
            .map(|event| PrintableEvent {
                created_at: event
                    .created_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                event: &event.event,
            })
            .collect();
        row.push(serde_json::to_string(&history).unwrap_or_default());
    }
    row
}

fn json_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => NONE_MARKER.to_string(),
        Some(value) => value.to_string(),
    }
}

pub(crate) fn render_operations(
    entries: &[OperationEntry],
    columns: OperationColumns,
    now: DateTime<Utc>,
) -> String {
    if entries.is_empty() {
        return "no operations found".to_string();
    }
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|entry| operation_row(entry, columns, now))
        .collect();
    render_table(&headers(columns), &rows)
}

async fn list_operations(api: &ApiClient, scheduler: &str) -> CliResult<Vec<OperationEntry>> {
    let url = api.endpoint(&["schedulers", scheduler, "operations"])?;
    let response: OperationsResponse = api.get_json(url).await?;
    Ok(merge_operations(response))
}

async fn get_operation(api: &ApiClient, scheduler: &str, id: &str) -> CliResult<OperationEntry> {
    let url = api.endpoint(&["schedulers", scheduler, "operations", id])?;
    let response: OperationResponse = api.get_json(url).await?;
    Ok(response.operation)
}

pub(crate) async fn handle_get_operations(ctx: &AppContext, args: GetOperationsArgs) -> CliResult<()> {
    let api = ctx.api()?;
    let entries = list_operations(&api, &args.scheduler)
        .await
        .map_err(surface_remote_error)?;
    debug!(scheduler = %args.scheduler, count = entries.len(), "operations listed");
    println!("{}", render_operations(&entries, args.columns, Utc::now()));
    Ok(())
}

pub(crate) async fn handle_get_operation(ctx: &AppContext, args: GetOperationArgs) -> CliResult<()> {
    let api = ctx.api()?;
    let entry = get_operation(&api, &args.scheduler, &args.operation_id)
        .await
        .map_err(surface_remote_error)?;
    println!(
        "{}",
        render_operations(std::slice::from_ref(&entry), args.columns, Utc::now())
    );
    Ok(())
}
