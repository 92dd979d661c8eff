//! # Subscription API Smoke Test
//!
//! Drives a running `server_subs` instance through one subscriber's lifecycle
//! using the workspace's own `ApiClient`. Point it at a server started with
//! `--in-memory` (or a disposable topic); it leaves no record behind.
//!
//! ```text
//! cargo run -p servers --bin server_subs -- --in-memory --topic-id t --table-name subs
//! cargo run -p project_tests --bin test_subs_api -- --base-url http://127.0.0.1:3000
//! ```

use std::time::Duration;

use anyhow::{Context, ensure};
use chrono::Utc;
use clap::Parser;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use lib_common::retrieve::ky_http::{ApiClient, ApiResponse};

#[derive(Parser, Debug)]
#[clap(about = "Smoke test for a running subscription registry server.")]
struct Args {
    #[clap(long, env = "SUBS_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[clap(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubscriberRow {
    email: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ListBody {
    subscribers: Vec<SubscriberRow>,
}

async fn post_email(
    api: &ApiClient,
    path: &str,
    email: &str,
) -> anyhow::Result<ApiResponse<MessageBody>> {
    api.request::<MessageBody, _>(Method::POST, &[path], &[], Some(&EmailBody { email }))
        .await
        .with_context(|| format!("POST /{}", path))
}

async fn list(api: &ApiClient) -> anyhow::Result<Vec<SubscriberRow>> {
    let resp = api
        .request::<ListBody, ()>(Method::GET, &["subscribers"], &[], None)
        .await?
        .error_for_status()?;
    Ok(resp.data.map(|b| b.subscribers).unwrap_or_default())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let api = ApiClient::new(&args.base_url, None, Duration::from_secs(args.timeout_secs))?;
    let email = format!("smoke-{}@example.com", Utc::now().timestamp_millis());

    println!("--- Subscription API smoke test against {} ---", api.base_url());

    // [1] Preflight
    let preflight = api.send::<()>(Method::OPTIONS, &["subscribe"], None).await?;
    ensure!(preflight.status == 204, "preflight returned {}", preflight.status);
    println!("✅ [1] OPTIONS /subscribe -> 204");

    // [2] Validation
    let bad = post_email(&api, "subscribe", "not-an-email").await?;
    ensure!(bad.status == 400, "invalid email returned {}", bad.status);
    println!("✅ [2] invalid email -> 400 {}", bad.error_body.unwrap_or_default());

    // [3] Subscribe, twice
    let first = post_email(&api, "subscribe", &email).await?;
    if first.status == 409 {
        println!("⚠️  registry is full, skipping lifecycle checks: {:?}", first.error_body);
        return Ok(());
    }
    let first = first.error_for_status()?;
    println!("✅ [3] {}", first.data.map(|m| m.message).unwrap_or_default());

    let second = post_email(&api, "subscribe", &email).await?.error_for_status()?;
    let message = second.data.map(|m| m.message).unwrap_or_default();
    ensure!(message.contains("was already"), "repeat subscribe said: {}", message);
    println!("✅ [3] {}", message);

    // [4] Listing is sorted and contains the new subscriber
    let rows = list(&api).await?;
    ensure!(
        rows.windows(2).all(|w| w[0].email <= w[1].email),
        "listing is not sorted by email"
    );
    let row = rows
        .iter()
        .find(|r| r.email == email)
        .context("new subscriber missing from listing")?;
    println!("✅ [4] listed {} as {} ({} total)", row.email, row.status, rows.len());

    // [5] Unsubscribe, twice
    let gone = post_email(&api, "unsubscribe", &email).await?.error_for_status()?;
    println!("✅ [5] {}", gone.data.map(|m| m.message).unwrap_or_default());
    let again = post_email(&api, "unsubscribe", &email).await?.error_for_status()?;
    println!("✅ [5] {}", again.data.map(|m| m.message).unwrap_or_default());

    ensure!(
        list(&api).await?.iter().all(|r| r.email != email),
        "subscriber still listed after unsubscribe"
    );

    // [6] Unknown route
    let missing = api.send::<()>(Method::GET, &["nope"], None).await?;
    ensure!(missing.status == 404, "unknown route returned {}", missing.status);
    println!("✅ [6] GET /nope -> 404");

    println!("--- All checks passed ---");
    Ok(())
}
