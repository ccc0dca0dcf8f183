use super::driver::DumpCommand;
use crate::backup::bridge::BridgeWriter;
use crate::error::{BackupError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::ChildStdout;
use tracing::{debug, error, info};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub struct DumpStats {
    pub bytes: u64,
    pub diagnostics: String,
}

enum PumpError {
    Read(std::io::Error),
    ReaderGone,
}

/// Runs the dump to completion, streaming stdout into `writer`.
///
/// The stream is only marked complete after the process has exited
/// successfully; any failure is pushed into the stream so the upload side
/// aborts instead of finalizing a truncated dump.
pub async fn run_dump(command: &DumpCommand, writer: BridgeWriter) -> Result<DumpStats> {
    debug!(?command, "Spawning dump process");

    let mut child = match command.to_command().spawn() {
        Ok(child) => child,
        Err(e) => {
            let reason = format!("failed to start {}: {}", command.program, e);
            return Err(fail(writer, reason, String::new()).await);
        }
    };
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.start_kill();
        let reason = "dump process output was not captured".to_string();
        return Err(fail(writer, reason, String::new()).await);
    };
    // Drained on its own task so a chatty stderr can never stall the dump.
    let stderr_task = tokio::spawn(read_all(stderr));

    let pumped = pump(stdout, &writer).await;
    if pumped.is_err() {
        let _ = child.start_kill();
    }
    let status = child.wait().await;
    let diagnostics = match stderr_task.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(_) => String::new(),
    };

    let bytes = match pumped {
        Ok(bytes) => bytes,
        Err(PumpError::ReaderGone) => {
            return Err(BackupError::DumpFailed {
                reason: "upload stopped reading the dump output".to_string(),
                diagnostics,
            });
        }
        Err(PumpError::Read(e)) => {
            let reason = format!("failed to read {} output: {}", command.program, e);
            return Err(fail(writer, reason, diagnostics).await);
        }
    };

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            error!("Database dump error output: {}", diagnostics);
            let reason = format!("{} exited with {}", command.program, status);
            return Err(fail(writer, reason, diagnostics).await);
        }
        Err(e) => {
            let reason = format!("failed to wait for {}: {}", command.program, e);
            return Err(fail(writer, reason, diagnostics).await);
        }
    }

    if writer.finish().await.is_err() {
        return Err(BackupError::DumpFailed {
            reason: "upload stopped reading the dump output".to_string(),
            diagnostics,
        });
    }

    info!("{} finished, {} bytes produced", command.program, bytes);
    Ok(DumpStats { bytes, diagnostics })
}

async fn pump(mut stdout: ChildStdout, writer: &BridgeWriter) -> std::result::Result<u64, PumpError> {
    let mut total = 0u64;
    loop {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let bytes_read = stdout.read(&mut buffer).await.map_err(PumpError::Read)?;
        if bytes_read == 0 {
            return Ok(total);
        }
        buffer.truncate(bytes_read);
        total += bytes_read as u64;
        writer.write(buffer).await.map_err(|_| PumpError::ReaderGone)?;
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    let _ = reader.read_to_end(&mut buffer).await;
    buffer
}

async fn fail(writer: BridgeWriter, reason: String, diagnostics: String) -> BackupError {
    let err = BackupError::DumpFailed {
        reason,
        diagnostics,
    };
    writer.fail(err.to_string()).await;
    err
}
