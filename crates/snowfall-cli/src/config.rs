use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

/// Administrative entry point for the `snowfall` ID generation system.
#[derive(Parser, Debug, Clone)]
#[command(name = "snowfall-cli", version, about = "Administers snowfall schema groups")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Creates a schema group's manifest and properties tables.
    ///
    /// One-time setup: run before any `Syncer` attempts to claim a generator
    /// id within the named schema group. Fails loudly if either table
    /// already exists rather than behaving idempotently.
    CreateSchemaGroup(CreateSchemaGroupArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CreateSchemaGroupArgs {
    /// Name of the schema group to create. Used verbatim to derive the
    /// manifest and properties table names.
    #[arg(long = "schema-group-name", env = "SCHEMA_GROUP_NAME")]
    pub schema_group_name: String,

    /// Postgres connection string for the relational manifest store.
    ///
    /// Environment variable: `ENGINE_URL`
    #[arg(long = "engine-url", env = "ENGINE_URL")]
    pub engine_url: String,

    /// Custom epoch origin, as an ISO-8601 date or date-time. Must not be
    /// later than the current wall-clock time. Accepts either a bare date
    /// (`2024-01-01`, taken as midnight UTC) or a full RFC 3339 timestamp
    /// (`2024-01-01T00:00:00Z`).
    ///
    /// Environment variable: `EPOCH_START_DATE`
    ///
    /// Default: the Unix epoch.
    #[arg(long = "epoch-start-date", env = "EPOCH_START_DATE", default_value = "1970-01-01")]
    pub epoch_start_date: String,

    /// Renewal period, in whole seconds, that every Syncer in this schema
    /// group is expected to honor. A lease becomes reclaimable after two
    /// consecutive missed renewals.
    ///
    /// Environment variable: `LIVELINESS_PROBE_S`
    ///
    /// Default: `5`
    #[arg(long = "liveliness-probe-s", env = "LIVELINESS_PROBE_S", default_value_t = 5)]
    pub liveliness_probe_s: u32,

    /// Maximum number of claim retries before giving up with persistent
    /// contention.
    ///
    /// Environment variable: `MAX_CLAIM_RETRIES`
    ///
    /// Default: `3`
    #[arg(long = "max-claim-retries", env = "MAX_CLAIM_RETRIES", default_value_t = 3)]
    pub max_claim_retries: u32,

    /// Lower bound, in milliseconds, of the uniform claim-retry backoff
    /// window.
    ///
    /// Environment variable: `MIN_MS_BETWEEN_CLAIM_RETRIES`
    ///
    /// Default: `10`
    #[arg(
        long = "min-ms-between-claim-retries",
        env = "MIN_MS_BETWEEN_CLAIM_RETRIES",
        default_value_t = 10
    )]
    pub min_ms_between_claim_retries: u32,

    /// Upper bound, in milliseconds, of the uniform claim-retry backoff
    /// window.
    ///
    /// Environment variable: `MAX_MS_BETWEEN_CLAIM_RETRIES`
    ///
    /// Default: `200`
    #[arg(
        long = "max-ms-between-claim-retries",
        env = "MAX_MS_BETWEEN_CLAIM_RETRIES",
        default_value_t = 200
    )]
    pub max_ms_between_claim_retries: u32,
}

#[derive(Debug, Clone)]
pub struct CreateSchemaGroupConfig {
    pub schema_group_name: String,
    pub engine_url: String,
    pub epoch_start_ms: i64,
    pub liveliness_probe_s: u32,
    pub max_claim_retries: u32,
    pub min_ms_between_claim_retries: u32,
    pub max_ms_between_claim_retries: u32,
}

/// Parses an ISO-8601 date or date-time into ms since the Unix epoch.
fn parse_epoch_start_date(raw: &str) -> anyhow::Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("EPOCH_START_DATE {raw:?} is not a valid ISO-8601 date or date-time"))?;
    let dt = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    Ok(dt.timestamp_millis())
}

impl TryFrom<CreateSchemaGroupArgs> for CreateSchemaGroupConfig {
    type Error = anyhow::Error;

    fn try_from(args: CreateSchemaGroupArgs) -> Result<Self, Self::Error> {
        if args.schema_group_name.trim().is_empty() {
            bail!("SCHEMA_GROUP_NAME must not be empty");
        }
        if args.liveliness_probe_s == 0 {
            bail!("LIVELINESS_PROBE_S must be greater than 0");
        }
        if args.min_ms_between_claim_retries > args.max_ms_between_claim_retries {
            bail!(
                "MIN_MS_BETWEEN_CLAIM_RETRIES ({}) must not exceed MAX_MS_BETWEEN_CLAIM_RETRIES ({})",
                args.min_ms_between_claim_retries,
                args.max_ms_between_claim_retries
            );
        }
        let epoch_start_ms = parse_epoch_start_date(&args.epoch_start_date)?;

        Ok(Self {
            schema_group_name: args.schema_group_name,
            engine_url: args.engine_url,
            epoch_start_ms,
            liveliness_probe_s: args.liveliness_probe_s,
            max_claim_retries: args.max_claim_retries,
            min_ms_between_claim_retries: args.min_ms_between_claim_retries,
            max_ms_between_claim_retries: args.max_ms_between_claim_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_date_as_utc_midnight() {
        assert_eq!(parse_epoch_start_date("1970-01-01").unwrap(), 0);
        assert_eq!(parse_epoch_start_date("1970-01-02").unwrap(), 86_400_000);
    }

    #[test]
    fn parses_rfc3339_datetime() {
        assert_eq!(
            parse_epoch_start_date("1970-01-01T00:00:00Z").unwrap(),
            0
        );
    }

    #[test]
    fn rejects_malformed_date() {
        assert!(parse_epoch_start_date("not-a-date").is_err());
    }

    #[test]
    fn rejects_backoff_bounds_out_of_order() {
        let args = CreateSchemaGroupArgs {
            schema_group_name: "orders".into(),
            engine_url: "postgres://localhost/snowfall".into(),
            epoch_start_date: "1970-01-01".into(),
            liveliness_probe_s: 5,
            max_claim_retries: 3,
            min_ms_between_claim_retries: 500,
            max_ms_between_claim_retries: 10,
        };
        assert!(CreateSchemaGroupConfig::try_from(args).is_err());
    }
}
