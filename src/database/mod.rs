mod driver;
mod mysql;
mod postgres;
pub mod runner;

pub use driver::{DumpCommand, DumpTool};
pub use mysql::MysqlDump;
pub use postgres::PgDump;
pub use runner::run_dump;

use crate::config::{DatabaseConfig, DatabaseEngine};
use std::path::PathBuf;

pub fn create_tool(engine: DatabaseEngine) -> Box<dyn DumpTool> {
    match engine {
        DatabaseEngine::MySQL => Box::new(MysqlDump),
        DatabaseEngine::Postgres => Box::new(PgDump),
    }
}

pub fn build_command(config: &DatabaseConfig) -> DumpCommand {
    create_tool(config.engine).build_command(config)
}

/// Where the engine's dump tool lives on `PATH`, if anywhere.
pub fn locate_tool(engine: DatabaseEngine) -> Option<PathBuf> {
    which::which(create_tool(engine).executable()).ok()
}
