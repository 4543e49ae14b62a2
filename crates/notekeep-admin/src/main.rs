//! Operator CLI for notekeep attachment storage.
//!
//! Every command prints a JSON document on stdout. Logs go to stderr (or to
//! `LOG_FILE`) so the output stays machine-readable.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notekeep_db::{
    log_pool_metrics, retention_from_days, AttachmentLifecycle, Database, FilesystemBackend,
    PoolConfig, StorageConfig,
};

use cli::{CliOpts, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let opts = CliOpts::parse();
    let _file_guard = init_logging(opts.debug);

    let db = Database::connect_with_config(&opts.database_url, PoolConfig::from_env())
        .await
        .context("connecting to database")?;
    log_pool_metrics(db.pool());

    let output = match opts.command {
        Command::Migrate => {
            db.migrate().await.context("running migrations")?;
            json!({ "migrated": true })
        }
        Command::Quota { user_id } => {
            let ledger = db.quota.get(user_id).await?;
            let limit_bytes = StorageConfig::from_env().max_user_storage;
            let remaining_bytes = ledger.remaining(limit_bytes);
            json!({
                "ledger": ledger,
                "limit_bytes": limit_bytes,
                "remaining_bytes": remaining_bytes,
            })
        }
        Command::Reconcile { user_id, all } => {
            let lifecycle = lifecycle(&db).await?;
            match (user_id, all) {
                (_, true) => json!({ "changed": lifecycle.reconcile_all().await? }),
                (Some(user_id), false) => json!({ "ledger": lifecycle.reconcile(user_id).await? }),
                (None, false) => anyhow::bail!("reconcile needs a user id or --all"),
            }
        }
        Command::Purge { attachment_id } => {
            let lifecycle = lifecycle(&db).await?;
            lifecycle.purge(attachment_id).await?;
            json!({ "purged": attachment_id })
        }
        Command::PurgeExpired { days } => {
            let lifecycle = lifecycle(&db).await?;
            let retention = match days {
                Some(days) => retention_from_days(days)?,
                None => lifecycle.config().purge_retention()?,
            };
            let report = lifecycle.purge_expired(retention).await?;
            json!({
                "retention_days": retention.num_days(),
                "report": report,
            })
        }
        Command::ListDeleted { user_id } => {
            let lifecycle = lifecycle(&db).await?;
            json!({ "attachments": lifecycle.list_deleted(user_id).await? })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Build the lifecycle engine from `StorageConfig::from_env`, refusing to
/// start on an unusable upload directory.
async fn lifecycle(db: &Database) -> anyhow::Result<AttachmentLifecycle> {
    let config = StorageConfig::from_env();
    let backend = FilesystemBackend::new(&config.upload_path);
    backend
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("upload directory {:?} unusable: {}", config.upload_path, e))?;

    info!(
        subsystem = "admin",
        upload_path = %config.upload_path.display(),
        quota_policy = %config.quota_policy,
        max_user_storage = config.max_user_storage,
        "Storage configured"
    );
    Ok(db.lifecycle(Arc::new(backend), config))
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "notekeep_admin=info,notekeep_db=info")
fn init_logging(debug: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let default_filter = match debug {
        true => "notekeep_admin=debug,notekeep_db=debug",
        false => "notekeep_admin=info,notekeep_db=info",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("notekeep-admin.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
        None
    } else {
        let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}
