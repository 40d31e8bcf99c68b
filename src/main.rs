mod aggregate;
mod api;
mod config;
mod error;
mod fetcher;
mod format;
mod merge;
mod pricing;
mod refresh;
mod sorter;
mod stripe;
mod types;

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregate::{aggregate, duplicate_currencies, render_yaml, ExportMetadata, JsonExport, RowSummary};
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::http_client;
use crate::pricing::compute_rows;
use crate::refresh::{load_mapping, write_string, Refresher};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Rate rows: fresh fetch + merge, or the previous output ---
    let rows = Refresher::new(cfg.clone())?.run().await?;

    // --- Pricing + exports ---
    let computed = compute_rows(&rows, &cfg.pricing);
    let summary = RowSummary::from_rows(&computed);
    info!(
        total = summary.total,
        adjusted = summary.adjusted,
        capped = summary.capped,
        missing = summary.missing,
        currencies = summary.currencies,
        "Priced {} rows at ${} (floor ${}, cap {}x)",
        summary.total,
        cfg.pricing.usd_price,
        cfg.pricing.usd_floor,
        cfg.pricing.usd_cap_multiplier,
    );
    let duplicates = duplicate_currencies(&computed);
    if !duplicates.is_empty() {
        info!(
            "Shared currencies ({}, aggregated by {}): {}",
            duplicates.len(),
            cfg.aggregation_policy,
            duplicates.join(", ")
        );
    }

    let generated_at = Utc::now();
    if let Some(path) = &cfg.export_yaml_path {
        let agg = aggregate(
            &computed,
            cfg.aggregation_policy,
            ExportMetadata {
                generated_at,
                params: cfg.pricing,
                source_url: cfg.source_url.clone(),
            },
        );
        write_string(path, &render_yaml(&agg))?;
        info!(currencies = agg.entries.len(), path = %path.display(), "Currency mapping exported");
    }
    if let Some(path) = &cfg.export_json_path {
        let body = JsonExport::new(&computed, &cfg.pricing, generated_at).to_json_string()?;
        write_string(path, &body)?;
        info!(rows = computed.len(), path = %path.display(), "Computed rows exported");
    }

    // --- Stripe currency comparison (optional) ---
    if cfg.stripe.enabled() {
        let client = http_client(cfg.fetch_timeout)?;
        let mapping = load_mapping(&cfg.mapping_path)?;
        stripe::run(&cfg.stripe, &client, &mapping).await?;
    }

    // --- HTTP API (optional) ---
    let Some(port) = cfg.api_port else {
        return Ok(());
    };
    if rows.is_empty() {
        warn!("Serving an empty row set");
    }
    let app = router(ApiState {
        rows: Arc::new(rows),
        defaults: cfg.pricing,
        policy: cfg.aggregation_policy,
        source_url: cfg.source_url.clone(),
    });
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
