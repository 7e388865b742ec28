//! Child process management for engine runs.
//!
//! Provides [`run_command`]: spawn, pipe a payload to stdin, capture
//! stdout/stderr, and enforce the timeout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::executor::{EngineError, EngineOutput};

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Spawn `cmd`, write `stdin_payload` to its stdin, and wait up to `timeout`.
///
/// The caller sets program, arguments, environment and working directory.
pub async fn run_command(
    cmd: &mut Command,
    stdin_payload: Vec<u8>,
    timeout: Duration,
) -> Result<EngineOutput, EngineError> {
    // `kill_on_drop(true)` kills the child when it is dropped on timeout.
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(EngineError::IoError)?;

    if let Some(mut stdin) = child.stdin.take() {
        // The engine may never read stdin; a closed pipe is not an error.
        let _ = stdin.write_all(&stdin_payload).await;
        drop(stdin);
    }

    // Read both streams in their own tasks so `child.wait()` can borrow
    // `&mut child` and a chatty engine cannot fill a pipe and stall.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();

            Ok(EngineOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Ok(Err(e)) => Err(EngineError::IoError(e)),
        Err(_elapsed) => {
            stdout_task.abort();
            stderr_task.abort();
            Err(EngineError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
