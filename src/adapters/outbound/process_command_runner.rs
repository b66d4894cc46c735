//! Shell Command Runner
//!
//! Runs transfer commands through `sh -c`. Input is streamed to the child's
//! stdin while its stderr is drained concurrently, so a child that writes a
//! lot of diagnostics before reading its input cannot deadlock the pair.

use crate::domain::invocation::Invocation;
use crate::domain::ports::CommandExecutor;
use crate::error::CommandError;
use crate::infrastructure::config_watcher::ConfigHandle;
use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// Size of each write to the child's stdin.
const INPUT_CHUNK: usize = 8192;
/// Upper bound on captured stderr kept for error reports.
const STDERR_CAP: usize = 64 * 1024;

/// Command executor backed by a shell subprocess.
///
/// Accepted exit statuses, dry-run and verbosity are read from the current
/// configuration snapshot on every run. Dropping a run in progress does not
/// kill the child; it is left to finish on its own.
pub struct ProcessCommandRunner {
    config: ConfigHandle,
}

impl ProcessCommandRunner {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommandExecutor for ProcessCommandRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<(), CommandError> {
        let (accept_status, dry_run, verbose) = {
            let cfg = self.config.borrow();
            (cfg.accept_status.clone(), cfg.dry_run, cfg.log_debug)
        };
        let command = invocation.render();

        if dry_run {
            tracing::info!("dry run, not executing: {}", command);
            return Ok(());
        }
        tracing::debug!("executing: {}", command);

        let input = invocation.stdin().cloned();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(if verbose { Stdio::inherit() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let feed = async {
            match (stdin, input) {
                (Some(mut pipe), Some(data)) => {
                    let written = feed_input(&mut pipe, &data).await;
                    // Dropping the pipe signals end of input
                    drop(pipe);
                    written
                }
                _ => Ok(0),
            }
        };
        let drain = async {
            match stderr {
                Some(pipe) => drain_capped(pipe, STDERR_CAP).await,
                None => Ok(String::new()),
            }
        };

        let (written, stderr_text) = tokio::join!(feed, drain);
        let io_err = |source| CommandError::Io {
            command: command.clone(),
            source,
        };
        let written = written.map_err(io_err)?;
        let stderr_text = stderr_text.map_err(io_err)?;
        let status = child.wait().await.map_err(io_err)?;

        let code = status.code();
        if !code.is_some_and(|c| accept_status.contains(&c)) {
            return Err(CommandError::Rejected {
                command,
                status: code,
                input_size: invocation.input_len(),
                stderr: stderr_text.trim_end().to_string(),
            });
        }

        // Only the exit status decides success
        let expected = invocation.input_len();
        if written != expected {
            tracing::error!(
                "length mismatch: '{}' consumed {} of {} input bytes",
                command,
                written,
                expected
            );
        }

        if !stderr_text.is_empty() {
            tracing::debug!("command stderr: {}", stderr_text.trim_end());
        }
        Ok(())
    }
}

/// Write `data` in chunks; returns how much the child accepted.
///
/// A child that exits without reading all of its input shows up as a short
/// count rather than an error.
async fn feed_input<W>(pipe: &mut W, data: &Bytes) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    for chunk in data.chunks(INPUT_CHUNK) {
        match pipe.write_all(chunk).await {
            Ok(()) => written += chunk.len(),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(written),
            Err(e) => return Err(e),
        }
    }
    match pipe.shutdown().await {
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
        _ => Ok(written),
    }
}

/// Read a stream to its end, keeping at most `cap` bytes.
async fn drain_capped<R>(mut pipe: R, cap: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut buf = [0u8; INPUT_CHUNK];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(String::from_utf8_lossy(&kept).into_owned())
}
