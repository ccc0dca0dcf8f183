use crate::backup::retention::RetentionPolicy;
use crate::error::UnsupportedEngine;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    MySQL,
    Postgres,
}

impl DatabaseEngine {
    /// Lowercase name used in object keys and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::MySQL => "mysql",
            DatabaseEngine::Postgres => "postgres",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::MySQL => 3306,
            DatabaseEngine::Postgres => 5432,
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseEngine {
    type Err = UnsupportedEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseEngine::MySQL),
            "postgres" => Ok(DatabaseEngine::Postgres),
            _ => Err(UnsupportedEngine(s.to_string())),
        }
    }
}

/// The database a run dumps. Built once at startup and shared by every run.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
}

impl StorageConfig {
    /// Endpoint with a scheme, as the S3 client expects it.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            return self.endpoint.clone();
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}", scheme, self.endpoint)
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub cron_expression: String,
    pub retention: RetentionPolicy,
    pub prefix: String,
    pub timeout: Duration,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            cron_expression: "0 0 * * *".to_string(),
            retention: RetentionPolicy::default(),
            prefix: "backup".to_string(),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub backup: BackupSettings,
}

/// Optional TOML file. Every value may be overridden from the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database: FileDatabase,
    pub storage: FileStorage,
    pub backup: FileBackup,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileDatabase {
    #[serde(rename = "type")]
    pub engine: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileStorage {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub use_ssl: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileBackup {
    pub cron_expression: Option<String>,
    pub keep_last: Option<i64>,
    pub prefix: Option<String>,
    pub timeout_secs: Option<u64>,
}
