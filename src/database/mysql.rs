use super::driver::{DumpCommand, DumpTool};
use crate::config::DatabaseConfig;

pub struct MysqlDump;

impl DumpTool for MysqlDump {
    // --single-transaction takes a consistent InnoDB snapshot without locking
    // writers; --quick streams rows instead of buffering whole tables.
    fn build_command(&self, config: &DatabaseConfig) -> DumpCommand {
        DumpCommand::new(self.executable())
            .arg("--host")
            .arg(&config.host)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--user")
            .arg(&config.user)
            .arg(format!("--password={}", config.password))
            .arg("--single-transaction")
            .arg("--quick")
            .arg("--lock-tables=false")
            .arg(&config.name)
    }

    fn executable(&self) -> &'static str {
        "mysqldump"
    }
}
