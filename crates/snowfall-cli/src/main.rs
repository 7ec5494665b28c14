#![doc = include_str!("../README.md")]

mod config;

use clap::Parser;
use config::{Cli, Command, CreateSchemaGroupConfig};
use snowfall::manifest::relational::RelationalStore;
use snowfall::{Error, Properties, SystemClock, bootstrap_schema_group};
use sqlx::PgPool;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Cli {
        command: Command::CreateSchemaGroup(args),
    } = Cli::parse();

    let config = match CreateSchemaGroupConfig::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("invalid configuration: {err}");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            tracing::info!("schema group bootstrapped successfully");
            ExitCode::SUCCESS
        }
        Err(Error::SchemaGroupExists { schema_group }) => {
            tracing::error!("schema group {schema_group} already exists");
            ExitCode::from(2)
        }
        Err(err @ (Error::EpochInFuture { .. } | Error::ValidationError { .. })) => {
            tracing::error!("invalid bootstrap arguments: {err}");
            ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!("failed to bootstrap schema group: {err}");
            ExitCode::from(3)
        }
    }
}

async fn run(config: CreateSchemaGroupConfig) -> snowfall::Result<()> {
    let pool = PgPool::connect(&config.engine_url)
        .await
        .map_err(snowfall::Error::from)?;
    let store = RelationalStore::new(pool);
    let clock = SystemClock::new();

    let properties = Properties {
        liveliness_probe_s: config.liveliness_probe_s,
        epoch_start_ms: config.epoch_start_ms,
        max_claim_retries: config.max_claim_retries,
        min_ms_between_claim_retries: config.min_ms_between_claim_retries,
        max_ms_between_claim_retries: config.max_ms_between_claim_retries,
    };

    bootstrap_schema_group(&store, &clock, &config.schema_group_name, properties).await
}
