//! Loader configuration.
//!
//! Every field maps to one environment variable; unset variables fall back
//! to the defaults module.

use std::time::Duration;

use crate::index_writer::BulkConfig;
use crate::run::WriterMode;

pub mod defaults {
    pub const FQ_DIR: &str = "/var/spool/kaijs";
    pub const SCHEMAS_DIR: &str = "/var/lib/kaijs/schemas.git";
    pub const SCHEMAS_REFRESH_HOURS: u64 = 12;
    pub const DB_ENDPOINT: &str = "mem://";
    pub const DB_NAMESPACE: &str = "kaijs";
    pub const DB_DATABASE: &str = "artifacts";
    pub const INDEX_PREFIX: &str = "kaijs-";
    pub const BULK_MAX_UPDATES: usize = 100;
    pub const BULK_MAX_BYTES: usize = 50 * 1024 * 1024;
    pub const BULK_IDLE_SECS: u64 = 3;
}

/// Runtime configuration of the `loader` executable.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub fq_dir: String,
    /// Remote of the schemas repository; no remote means a plain-directory
    /// catalog at `schemas_dir` (offline fallback).
    pub schemas_remote: Option<String>,
    pub schemas_dir: String,
    pub schemas_refresh_hours: u64,
    pub db_endpoint: String,
    pub db_namespace: String,
    pub db_database: String,
    pub db_username: Option<String>,
    pub db_password: Option<String>,
    pub index_prefix: String,
    pub bulk_max_updates: usize,
    pub bulk_max_bytes: usize,
    pub bulk_idle_secs: u64,
    pub writer: WriterMode,
}

impl LoaderConfig {
    /// Load from `KAIJS_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let writer = match var("KAIJS_WRITER") {
            Some(raw) => raw
                .parse::<WriterMode>()
                .map_err(|e| anyhow::anyhow!("KAIJS_WRITER: {e}"))?,
            None => WriterMode::Db,
        };
        Ok(LoaderConfig {
            fq_dir: var("KAIJS_FQ_DIR").unwrap_or_else(|| defaults::FQ_DIR.to_string()),
            schemas_remote: var("KAIJS_SCHEMAS_REMOTE"),
            schemas_dir: var("KAIJS_SCHEMAS_DIR")
                .unwrap_or_else(|| defaults::SCHEMAS_DIR.to_string()),
            schemas_refresh_hours: parse_or(
                var("KAIJS_SCHEMAS_REFRESH_HOURS"),
                defaults::SCHEMAS_REFRESH_HOURS,
            )?,
            db_endpoint: var("KAIJS_DB_ENDPOINT")
                .unwrap_or_else(|| defaults::DB_ENDPOINT.to_string()),
            db_namespace: var("KAIJS_DB_NAMESPACE")
                .unwrap_or_else(|| defaults::DB_NAMESPACE.to_string()),
            db_database: var("KAIJS_DB_DATABASE")
                .unwrap_or_else(|| defaults::DB_DATABASE.to_string()),
            db_username: var("KAIJS_DB_USERNAME"),
            db_password: var("KAIJS_DB_PASSWORD"),
            index_prefix: var("KAIJS_INDEX_PREFIX")
                .unwrap_or_else(|| defaults::INDEX_PREFIX.to_string()),
            bulk_max_updates: parse_or(
                var("KAIJS_BULK_MAX_UPDATES"),
                defaults::BULK_MAX_UPDATES,
            )?,
            bulk_max_bytes: parse_or(var("KAIJS_BULK_MAX_BYTES"), defaults::BULK_MAX_BYTES)?,
            bulk_idle_secs: parse_or(var("KAIJS_BULK_IDLE_SECS"), defaults::BULK_IDLE_SECS)?,
            writer,
        })
    }

    pub fn bulk(&self) -> BulkConfig {
        BulkConfig {
            max_updates: self.bulk_max_updates,
            max_bytes: self.bulk_max_bytes,
            idle: Duration::from_secs(self.bulk_idle_secs),
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, fallback: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid numeric configuration value {raw}: {e}")),
        None => Ok(fallback),
    }
}
