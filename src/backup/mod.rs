pub mod bridge;
pub mod job;
pub mod retention;
pub mod scheduler;

pub use job::{BackupReport, BackupService};
pub use scheduler::Scheduler;
