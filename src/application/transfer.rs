//! Transfer Invocations
//!
//! Turns a bulk into the external command that moves its files between the
//! local data directory and a peer.

use crate::adapters::outbound::FsBatchStore;
use crate::config::Config;
use crate::domain::entities::{BatchName, Bulk};
use crate::domain::invocation::{Invocation, BATCH_PLACEHOLDER, DEST_PLACEHOLDER, SOURCE_PLACEHOLDER};
use crate::domain::value_objects::Mode;
use crate::error::{ConfigError, StoreError, SyncError};
use std::collections::HashSet;

/// `%b` value telling the command to read the file list from stdin.
pub const STDIN_MARKER: &str = "-";

/// Fail unless the check file is configured and exists.
pub fn ensure_check_file(cfg: &Config) -> Result<(), SyncError> {
    match &cfg.check_file {
        None => Err(SyncError::CheckFileUnset),
        Some(path) if !path.exists() => Err(SyncError::CheckFileMissing(path.clone())),
        Some(_) => Ok(()),
    }
}

/// Build the transfer command for a bulk.
///
/// A single batch is passed by path. Several batches are merged into one
/// deduplicated file list fed on stdin, with `%b` set to `-`.
pub async fn transfer_invocation(
    cfg: &Config,
    store: &FsBatchStore,
    mode: Mode,
    bulk: &Bulk,
) -> Result<Invocation, SyncError> {
    for batch in &bulk.batches {
        if BatchName::parse(batch).is_none() {
            return Err(StoreError::InvalidBatchName(batch.clone()).into());
        }
    }
    ensure_check_file(cfg)?;

    let peer_data = cfg
        .node(&bulk.node)
        .and_then(|n| n.data.clone())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ConfigError::MissingNodeData {
            node: bulk.node.clone(),
        })?;
    let (source, dest) = match mode {
        Mode::Push => (cfg.data_dir.clone(), peer_data),
        Mode::Pull => (peer_data, cfg.data_dir.clone()),
    };

    let invocation = Invocation::new(cfg.sync_command(&bulk.node, bulk.kind))
        .arg(SOURCE_PLACEHOLDER, source)
        .arg(DEST_PLACEHOLDER, dest);

    match bulk.batches.as_slice() {
        [single] => {
            let path = store.batch_path(mode, &bulk.node, single);
            Ok(invocation.arg(BATCH_PLACEHOLDER, path.to_string_lossy()))
        }
        batches => {
            let mut contents = Vec::with_capacity(batches.len());
            for batch in batches {
                contents.push(store.read_batch(mode, &bulk.node, batch).await?);
            }
            Ok(invocation
                .arg(BATCH_PLACEHOLDER, STDIN_MARKER)
                .input(merge_file_lists(&contents)))
        }
    }
}

/// Command that harvests a peer's batches into its pull queue.
///
/// `None` when pulling from the node is not configured.
pub fn pull_batches_invocation(cfg: &Config, store: &FsBatchStore, node: &str) -> Option<Invocation> {
    if !cfg.pulls_from(node) {
        return None;
    }
    let template = cfg.pull_batches.as_deref()?;
    let remote = cfg.node(node)?.batches.as_deref()?;
    let local = store.queue_dir(Mode::Pull, node);
    Some(
        Invocation::new(template)
            .arg(SOURCE_PLACEHOLDER, remote)
            .arg(DEST_PLACEHOLDER, local.to_string_lossy()),
    )
}

/// Merge file lists: trimmed lines, blanks dropped, first occurrence kept.
pub fn merge_file_lists(contents: &[String]) -> String {
    let mut seen = HashSet::new();
    let mut merged = String::new();
    for line in contents.iter().flat_map(|c| c.lines()).map(str::trim) {
        if line.is_empty() || !seen.insert(line) {
            continue;
        }
        merged.push_str(line);
        merged.push('\n');
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::domain::value_objects::BatchKind;
    use std::fs;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> Config {
        let mounted = root.join("mounted");
        fs::write(&mounted, "").unwrap();
        Config {
            nodes: vec![
                NodeConfig::new("a").data("a:/data"),
                NodeConfig::new("b").data("b:/data").batches("b:/batches"),
                NodeConfig::new("c"),
            ],
            sync_data_rec: "rsync -r --files-from=%b %s %d".to_string(),
            sync_data_norec: "rsync --files-from=%b %s %d".to_string(),
            pull_batches: Some("rsync %s/ %d/".to_string()),
            batch_dir: root.to_path_buf(),
            data_dir: "/srv/data".to_string(),
            check_file: Some(mounted),
            ..Config::default()
        }
    }

    fn bulk(node: &str, batches: &[&str]) -> Bulk {
        Bulk {
            node: node.to_string(),
            kind: BatchKind::Rec,
            batches: batches.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[test]
    fn test_merge_file_lists() {
        let merged = merge_file_lists(&[
            "/a\n  /b \n\n".to_string(),
            "/b\n/c".to_string(),
            "/a\n".to_string(),
        ]);
        assert_eq!(merged, "/a\n/b\n/c\n");
        assert_eq!(merge_file_lists(&[]), "");
    }

    #[tokio::test]
    async fn test_single_batch_push() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let store = FsBatchStore::new(dir.path());

        let inv = transfer_invocation(&cfg, &store, Mode::Push, &bulk("b", &["0001_a_rec.batch"]))
            .await
            .unwrap();
        let expected_path = store.batch_path(Mode::Push, "b", "0001_a_rec.batch");
        assert_eq!(
            inv.render(),
            format!("rsync -r --files-from={} /srv/data b:/data", expected_path.display())
        );
        assert!(inv.stdin().is_none());
    }

    #[tokio::test]
    async fn test_multi_batch_pull_uses_stdin() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let store = FsBatchStore::new(dir.path());
        let names = ["0001_b_rec.batch", "0002_b_rec.batch"];
        for (name, body) in names.iter().zip(["/x\n/y\n", "/y\n/z\n"]) {
            let path = store.batch_path(Mode::Pull, "b", name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }

        let inv = transfer_invocation(&cfg, &store, Mode::Pull, &bulk("b", &names))
            .await
            .unwrap();
        assert_eq!(inv.render(), "rsync -r --files-from=- b:/data /srv/data");
        assert_eq!(&inv.stdin().unwrap()[..], b"/x\n/y\n/z\n");
    }

    #[tokio::test]
    async fn test_missing_node_data() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let store = FsBatchStore::new(dir.path());
        let err = transfer_invocation(&cfg, &store, Mode::Push, &bulk("c", &["0001_a_rec.batch"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::MissingNodeData { .. })));
    }

    #[tokio::test]
    async fn test_invalid_batch_name() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let store = FsBatchStore::new(dir.path());
        let err = transfer_invocation(&cfg, &store, Mode::Push, &bulk("b", &["junk"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::InvalidBatchName(_))));
    }

    #[tokio::test]
    async fn test_missing_check_file() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.check_file = Some(dir.path().join("gone"));
        let store = FsBatchStore::new(dir.path());

        let err = transfer_invocation(&cfg, &store, Mode::Push, &bulk("b", &["0001_a_rec.batch"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CheckFileMissing(_)));

        fs::write(dir.path().join("gone"), "").unwrap();
        assert!(ensure_check_file(&cfg).is_ok());
    }

    #[test]
    fn test_unset_check_file_fails_gate() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.check_file = None;
        assert!(matches!(ensure_check_file(&cfg), Err(SyncError::CheckFileUnset)));
        assert!(matches!(
            ensure_check_file(&Config::default()),
            Err(SyncError::CheckFileUnset)
        ));
    }

    #[test]
    fn test_pull_batches_invocation() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let store = FsBatchStore::new(dir.path());

        let inv = pull_batches_invocation(&cfg, &store, "b").unwrap();
        assert_eq!(
            inv.render(),
            format!("rsync b:/batches/ {}/", store.queue_dir(Mode::Pull, "b").display())
        );
        assert!(pull_batches_invocation(&cfg, &store, "a").is_none());
    }
}
