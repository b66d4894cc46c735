//! Integration tests for the shell command runner
//!
//! Runs real `sh -c` children to check input streaming, exit status
//! handling and dry-run behaviour.

use sfs_sync::adapters::outbound::ProcessCommandRunner;
use sfs_sync::domain::invocation::{Invocation, DEST_PLACEHOLDER};
use sfs_sync::error::CommandError;
use sfs_sync::{CommandExecutor, Config};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

fn runner(cfg: Config) -> ProcessCommandRunner {
    let (_tx, rx) = watch::channel(Arc::new(cfg));
    ProcessCommandRunner::new(rx)
}

/// A child that fills its stderr pipe before reading any input must not
/// deadlock against a writer feeding it a large payload.
#[tokio::test]
async fn test_large_input_with_chatty_child() {
    let dir = TempDir::new().unwrap();
    let count = dir.path().join("count");
    let input = vec![b'x'; 10 * 1024 * 1024];

    let inv = Invocation::new("yes e | head -c 204800 >&2; wc -c > %d")
        .arg(DEST_PLACEHOLDER, count.to_string_lossy())
        .input(input);

    tokio::time::timeout(Duration::from_secs(60), runner(Config::default()).execute(&inv))
        .await
        .expect("runner stalled")
        .unwrap();

    let written: usize = std::fs::read_to_string(&count).unwrap().trim().parse().unwrap();
    assert_eq!(written, 10 * 1024 * 1024);
}

/// Slow interleaved output while input is still being consumed.
#[tokio::test]
async fn test_trickling_output() {
    let inv = Invocation::new(
        "i=0; while [ $i -lt 5 ]; do echo tick >&2; sleep 0.05; i=$((i+1)); done; cat > /dev/null",
    )
    .input(vec![b'y'; 2 * 1024 * 1024]);

    tokio::time::timeout(Duration::from_secs(30), runner(Config::default()).execute(&inv))
        .await
        .expect("runner stalled")
        .unwrap();
}

#[tokio::test]
async fn test_partial_success_status_accepted() {
    let cfg = Config {
        accept_status: vec![0, 24],
        ..Config::default()
    };
    runner(cfg).execute(&Invocation::new("exit 24")).await.unwrap();
}

#[tokio::test]
async fn test_failure_report_includes_stderr() {
    let err = runner(Config::default())
        .execute(&Invocation::new("echo 'connection refused' >&2; exit 255"))
        .await
        .unwrap_err();
    let report = err.to_string();
    assert!(report.contains("connection refused"), "{report}");
    assert!(report.contains("255"), "{report}");
}

#[tokio::test]
async fn test_missing_program_is_a_failure() {
    let err = runner(Config::default())
        .execute(&Invocation::new("/nonexistent/sfs-transfer"))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Rejected { status: Some(127), .. }));
}

#[tokio::test]
async fn test_values_are_shell_escaped() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("it's a file; rm -rf x");
    let inv = Invocation::new("touch %d").arg(DEST_PLACEHOLDER, target.to_string_lossy());
    runner(Config::default()).execute(&inv).await.unwrap();
    assert!(target.exists());
}

/// Abandoning a run, as teardown does after its drain timeout, leaves the
/// command running to completion.
#[tokio::test]
async fn test_abandoned_command_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("finished");
    let inv = Invocation::new("sleep 1; touch %d").arg(DEST_PLACEHOLDER, marker.to_string_lossy());

    let run = tokio::spawn(async move { runner(Config::default()).execute(&inv).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    for _ in 0..40 {
        if marker.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(marker.exists());
}

#[tokio::test]
async fn test_dry_run_spawns_nothing() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let cfg = Config {
        dry_run: true,
        ..Config::default()
    };
    let inv = Invocation::new("touch %d").arg(DEST_PLACEHOLDER, marker.to_string_lossy());
    runner(cfg).execute(&inv).await.unwrap();
    assert!(!marker.exists());
}
