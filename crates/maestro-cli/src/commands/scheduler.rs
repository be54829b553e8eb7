//! Scheduler mutations and status: rollback, operation cancel, and status.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::cli::{CancelArgs, RollbackArgs, StatusArgs};
use crate::client::{AppContext, ApiClient, CliResult, decode_json};
use crate::commands::progress::{OperationKey, track_operation};
use crate::output::{pretty_json, surface_remote_error, titled_block};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsyncOperationResponse {
    operation_key: String,
}

async fn request_rollback(api: &ApiClient, scheduler: &str, version: &str) -> CliResult<OperationKey> {
    let mut url = api.endpoint(&["scheduler", scheduler, "rollback"])?;
    url.query_pairs_mut().append_pair("async", "true");
    let builder = api
        .request(Method::PUT, url.clone())
        .json(&json!({ "version": version }));
    let response = api.execute_with(builder, url).await?;
    let target = response.url.clone();
    let body = response.into_ok_body()?;
    let decoded: AsyncOperationResponse = decode_json(&target, &body)?;
    OperationKey::parse(&decoded.operation_key)
}

async fn request_cancel(api: &ApiClient, key: &OperationKey) -> CliResult<String> {
    let url = api.endpoint(&[
        "scheduler",
        key.scheduler(),
        "operations",
        key.as_str(),
        "cancel",
    ])?;
    api.execute(Method::PUT, url).await?.into_ok_body()
}

async fn fetch_status(api: &ApiClient, scheduler: &str) -> CliResult<String> {
    let url = api.endpoint(&["scheduler", scheduler])?;
    api.execute(Method::GET, url).await?.into_ok_body()
}

pub(crate) async fn handle_rollback(ctx: &AppContext, args: RollbackArgs) -> CliResult<()> {
    let api = ctx.api()?;
    let key = request_rollback(&api, &args.scheduler, &args.version)
        .await
        .map_err(surface_remote_error)?;
    info!(scheduler = %args.scheduler, key = %key, "rollback accepted");

    println!("Rolling back scheduler '{}'", args.scheduler);
    println!();
    println!("{}", titled_block("OperationKey", key.as_str()));

    if args.no_wait {
        return Ok(());
    }
    track_operation(api, &key, args.deadline_secs.map(Duration::from_secs)).await?;
    Ok(())
}

pub(crate) async fn handle_cancel(ctx: &AppContext, args: CancelArgs) -> CliResult<()> {
    let key = OperationKey::parse(&args.operation_key)?;
    let api = ctx.api()?;
    let body = request_cancel(&api, &key)
        .await
        .map_err(surface_remote_error)?;
    info!(key = %key, "operation cancel requested");
    println!("{}", pretty_json(&body));
    Ok(())
}

pub(crate) async fn handle_status(ctx: &AppContext, args: StatusArgs) -> CliResult<()> {
    let api = ctx.api()?;
    let body = fetch_status(&api, &args.scheduler)
        .await
        .map_err(surface_remote_error)?;
    println!("{}", pretty_json(&body));
    Ok(())
}
