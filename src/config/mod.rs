mod types;

pub use types::*;

use crate::backup::retention::RetentionPolicy;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DB_TYPE: &str = "DB_TYPE";
pub const DB_HOST: &str = "DB_HOST";
pub const DB_PORT: &str = "DB_PORT";
pub const DB_NAME: &str = "DB_NAME";
pub const DB_USER: &str = "DB_USER";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const S3_ENDPOINT: &str = "S3_ENDPOINT";
pub const S3_REGION: &str = "S3_REGION";
pub const S3_BUCKET: &str = "S3_BUCKET";
pub const S3_ACCESS_KEY: &str = "S3_ACCESS_KEY";
pub const S3_SECRET_KEY: &str = "S3_SECRET_KEY";
pub const S3_USE_SSL: &str = "S3_USE_SSL";
pub const CRON_EXPRESSION: &str = "CRON_EXPRESSION";
pub const KEEP_LAST: &str = "KEEP_LAST";
pub const BACKUP_PREFIX: &str = "BACKUP_PREFIX";
pub const BACKUP_TIMEOUT_SECS: &str = "BACKUP_TIMEOUT_SECS";

/// Loads configuration from the environment, layered over an optional TOML file.
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_values = match path {
        Some(path) => load_file(path)?.into_values(),
        None => HashMap::new(),
    };
    from_lookup(layered(|key| env::var(key).ok(), file_values))
}

pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    info!("Loading configuration from {:?}", path);
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Environment first, file second. Empty environment values count as unset.
fn layered<E>(env_lookup: E, file_values: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
{
    move |key| {
        env_lookup(key)
            .filter(|v| !v.is_empty())
            .or_else(|| file_values.get(key).cloned())
    }
}

/// Validates every setting and applies defaults.
pub fn from_lookup<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

    let engine = match get(DB_TYPE) {
        Some(value) => value.parse::<DatabaseEngine>()?,
        None => DatabaseEngine::MySQL,
    };
    let host = require(DB_HOST)?;
    let port = match get(DB_PORT) {
        Some(value) => value.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
            field: DB_PORT,
            value,
            reason: e.to_string(),
        })?,
        None => engine.default_port(),
    };
    let database = DatabaseConfig {
        engine,
        host,
        port,
        name: require(DB_NAME)?,
        user: require(DB_USER)?,
        password: require(DB_PASSWORD)?,
    };

    let endpoint = require(S3_ENDPOINT)?;
    let region = get(S3_REGION).unwrap_or_else(|| "us-east-1".to_string());
    let bucket = require(S3_BUCKET)?;
    let access_key = require(S3_ACCESS_KEY)?;
    let secret_key = require(S3_SECRET_KEY)?;
    let use_ssl = match get(S3_USE_SSL) {
        Some(value) => parse_bool(S3_USE_SSL, value)?,
        None => true,
    };
    let storage = StorageConfig {
        endpoint,
        region,
        bucket,
        access_key,
        secret_key,
        use_ssl,
    };

    let defaults = BackupSettings::default();
    let retention = match get(KEEP_LAST) {
        Some(value) => parse_keep_last(value)?,
        None => defaults.retention,
    };
    let timeout = match get(BACKUP_TIMEOUT_SECS) {
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            Ok(_) => {
                return Err(ConfigError::Invalid {
                    field: BACKUP_TIMEOUT_SECS,
                    value,
                    reason: "must be greater than zero".to_string(),
                })
            }
            Err(e) => {
                return Err(ConfigError::Invalid {
                    field: BACKUP_TIMEOUT_SECS,
                    value,
                    reason: e.to_string(),
                })
            }
        },
        None => defaults.timeout,
    };
    let backup = BackupSettings {
        cron_expression: get(CRON_EXPRESSION).unwrap_or(defaults.cron_expression),
        retention,
        prefix: get(BACKUP_PREFIX)
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.prefix),
        timeout,
    };

    debug!(?database, ?storage, ?backup, "Configuration loaded");
    Ok(AppConfig {
        database,
        storage,
        backup,
    })
}

fn parse_bool(field: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field,
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_keep_last(value: String) -> Result<RetentionPolicy, ConfigError> {
    let parsed = value.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
        field: KEEP_LAST,
        value: value.clone(),
        reason: e.to_string(),
    })?;
    usize::try_from(parsed)
        .ok()
        .and_then(RetentionPolicy::new)
        .ok_or(ConfigError::Invalid {
            field: KEEP_LAST,
            value,
            reason: "must be at least 1".to_string(),
        })
}

impl FileConfig {
    /// Flattens the file into the same keys the environment uses.
    fn into_values(self) -> HashMap<&'static str, String> {
        let mut values = HashMap::new();
        let mut put = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                values.insert(key, value);
            }
        };

        put(DB_TYPE, self.database.engine);
        put(DB_HOST, self.database.host);
        put(DB_PORT, self.database.port.map(|p| p.to_string()));
        put(DB_NAME, self.database.name);
        put(DB_USER, self.database.user);
        put(DB_PASSWORD, self.database.password);
        put(S3_ENDPOINT, self.storage.endpoint);
        put(S3_REGION, self.storage.region);
        put(S3_BUCKET, self.storage.bucket);
        put(S3_ACCESS_KEY, self.storage.access_key);
        put(S3_SECRET_KEY, self.storage.secret_key);
        put(S3_USE_SSL, self.storage.use_ssl.map(|b| b.to_string()));
        put(CRON_EXPRESSION, self.backup.cron_expression);
        put(KEEP_LAST, self.backup.keep_last.map(|n| n.to_string()));
        put(BACKUP_PREFIX, self.backup.prefix);
        put(BACKUP_TIMEOUT_SECS, self.backup.timeout_secs.map(|n| n.to_string()));

        values
    }
}
