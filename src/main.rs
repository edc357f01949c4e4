//! db-access - Main entry point.
//!
//! Command-line front end for the access layer: describe a table, select
//! rows, merge a staging table or run a SQL file against one database.

use db_access::config::{Command, Config};
use db_access::db::{ConnectionRegistry, Database, SelectOptions};
use db_access::models::{MergeSpec, Predicate, TableRef, mask_connection_string};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the JSON results
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Print one value as a JSON line.
fn emit<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn run(db: &Database, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Describe { table, schema } => {
            let handle = db
                .reflect(TableRef::new(table).in_schema(schema.as_deref()))
                .await?;
            emit(&*handle)?;
        }
        Command::Select {
            table,
            schema,
            filters,
            columns,
            order_by,
            limit,
        } => {
            let mut options = SelectOptions::new().predicate(filters.into_iter().collect::<Predicate>());
            if !columns.is_empty() {
                options = options.columns(columns);
            }
            for term in order_by {
                options = options.order_by(term);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            let rows = db
                .select(TableRef::new(table).in_schema(schema.as_deref()), &options)
                .await?;
            for row in &rows {
                emit(row)?;
            }
            info!(rows = rows.len(), "Select finished");
        }
        Command::Merge {
            source,
            target,
            schema,
            keys,
            update_columns,
        } => {
            let mut spec = MergeSpec::new(
                TableRef::new(source).in_schema(schema.as_deref()),
                TableRef::new(target).in_schema(schema.as_deref()),
            );
            if !keys.is_empty() {
                spec = spec.with_keys(keys);
            }
            if !update_columns.is_empty() {
                spec = spec.with_update_columns(update_columns);
            }
            let outcome = db.merge(&spec).await?;
            emit(&outcome)?;
        }
        Command::ExecFile { path } => {
            let counts = db.run_script_file(&path).await?;
            emit(&counts)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        url = %mask_connection_string(&config.database_url),
        "Starting db-access v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = ConnectionRegistry::new();
    let db = Database::connect_with(&registry, &config.database_url, config.pool_options()).await?;

    let result = run(&db, config.command).await;
    registry.close_all().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
