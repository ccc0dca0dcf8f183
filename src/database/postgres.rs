use super::driver::{DumpCommand, DumpTool};
use crate::config::DatabaseConfig;

pub struct PgDump;

impl DumpTool for PgDump {
    // pg_dump always runs inside one repeatable-read transaction, so the
    // snapshot is consistent without blocking writers. The password only
    // travels through PGPASSWORD.
    fn build_command(&self, config: &DatabaseConfig) -> DumpCommand {
        DumpCommand::new(self.executable())
            .arg("--host")
            .arg(&config.host)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--username")
            .arg(&config.user)
            .arg("--dbname")
            .arg(&config.name)
            .arg("--format")
            .arg("plain")
            .arg("--no-owner")
            .arg("--no-acl")
            .arg("--no-password")
            .env("PGPASSWORD", &config.password)
    }

    fn executable(&self) -> &'static str {
        "pg_dump"
    }
}
