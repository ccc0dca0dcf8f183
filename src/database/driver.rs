use crate::config::DatabaseConfig;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;

/// A fully materialized dump-tool invocation: program, ordered arguments and
/// an environment overlay for secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl DumpCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The process is killed if the handle is dropped before it exits, so an
    /// abandoned run never leaves a dump tool writing into nothing.
    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl fmt::Debug for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&str> = self
            .args
            .iter()
            .map(|a| {
                if a.starts_with("--password=") {
                    "--password=<redacted>"
                } else {
                    a.as_str()
                }
            })
            .collect();
        let env: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("DumpCommand")
            .field("program", &self.program)
            .field("args", &args)
            .field("env", &env)
            .finish()
    }
}

/// Builds the dump invocation for one engine's native tooling.
pub trait DumpTool: Send + Sync {
    fn build_command(&self, config: &DatabaseConfig) -> DumpCommand;
    fn executable(&self) -> &'static str;
}
