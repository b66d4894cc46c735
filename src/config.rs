use crate::domain::value_objects::BatchKind;
use crate::error::ConfigError;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "SFS_SYNC_CONFIG";

/// Per-node settings. Every field except the name is an optional override.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct NodeConfig {
    #[serde(skip)]
    pub name: String,
    /// Remote batch source, substituted as `%s` into `PULL_BATCHES`
    #[serde(rename = "BATCHES")]
    pub batches: Option<String>,
    /// Remote data path, the push destination and the pull source
    #[serde(rename = "DATA")]
    pub data: Option<String>,
    #[serde(rename = "SYNC_DATA_REC")]
    pub sync_data_rec: Option<String>,
    #[serde(rename = "SYNC_DATA_NOREC")]
    pub sync_data_norec: Option<String>,
    #[serde(rename = "BULK_MAX_BATCHES")]
    pub bulk_max_batches: Option<usize>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the remote data path.
    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the remote batch source used by the pull-batches command.
    pub fn batches(mut self, batches: impl Into<String>) -> Self {
        self.batches = Some(batches.into());
        self
    }
}

/// Immutable configuration snapshot shared by every role.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Fleet
    #[serde(rename = "NODES", deserialize_with = "deserialize_nodes")]
    pub nodes: Vec<NodeConfig>,

    // Commands
    #[serde(rename = "SYNC_DATA_REC")]
    pub sync_data_rec: String,
    #[serde(rename = "SYNC_DATA_NOREC")]
    pub sync_data_norec: String,
    #[serde(rename = "PULL_BATCHES")]
    pub pull_batches: Option<String>,
    #[serde(rename = "ACCEPT_STATUS")]
    pub accept_status: Vec<i32>,

    // Paths
    #[serde(rename = "BATCHDIR")]
    pub batch_dir: PathBuf,
    #[serde(rename = "DATADIR")]
    pub data_dir: String,
    #[serde(rename = "BACKUPBATCHES")]
    pub backup_batches: Option<PathBuf>,
    #[serde(rename = "CHECKFILE")]
    pub check_file: Option<PathBuf>,

    // Scheduling
    #[serde(rename = "BULK_MAX_BATCHES")]
    pub bulk_max_batches: usize,
    #[serde(rename = "BULK_OLDER_THAN")]
    pub bulk_older_than: f64,
    #[serde(rename = "SCANTIME")]
    pub scan_time: f64,
    #[serde(rename = "FAILTIME")]
    pub fail_time: f64,
    #[serde(rename = "PUSHPROCS")]
    pub push_procs: usize,
    #[serde(rename = "PULLPROCS")]
    pub pull_procs: usize,
    #[serde(rename = "PUSHCOUNT")]
    pub push_count: Option<usize>,
    #[serde(rename = "PULLCOUNT")]
    pub pull_count: Option<usize>,
    #[serde(rename = "DRYRUN")]
    pub dry_run: bool,

    // Logging
    #[serde(rename = "LOG_IDENT")]
    pub log_ident: String,
    #[serde(rename = "LOG_DEBUG")]
    pub log_debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            sync_data_rec: String::new(),
            sync_data_norec: String::new(),
            pull_batches: None,
            accept_status: vec![0],
            batch_dir: PathBuf::new(),
            data_dir: String::new(),
            backup_batches: None,
            check_file: None,
            bulk_max_batches: 50,
            bulk_older_than: 0.0,
            scan_time: 1.0,
            fail_time: 10.0,
            push_procs: 2,
            pull_procs: 1,
            push_count: None,
            pull_count: None,
            dry_run: false,
            log_ident: "sfs-sync %n".to_string(),
            log_debug: false,
        }
    }
}

impl Config {
    /// Parse a snapshot from its JSON representation.
    pub fn from_json(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Validate the snapshot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_data_rec.trim().is_empty() {
            return Err(ConfigError::MissingSyncCommand("SYNC_DATA_REC"));
        }
        if self.sync_data_norec.trim().is_empty() {
            return Err(ConfigError::MissingSyncCommand("SYNC_DATA_NOREC"));
        }
        if self.batch_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("BATCHDIR"));
        }
        if self.data_dir.is_empty() {
            return Err(ConfigError::MissingField("DATADIR"));
        }
        if self.push_procs < 1 {
            return Err(ConfigError::OutOfRange { field: "PUSHPROCS", min: 1 });
        }
        if self.pull_procs < 1 {
            return Err(ConfigError::OutOfRange { field: "PULLPROCS", min: 1 });
        }
        if self.bulk_max_batches < 1 {
            return Err(ConfigError::OutOfRange { field: "BULK_MAX_BATCHES", min: 1 });
        }
        Ok(())
    }

    /// Check whether `candidate` may replace this snapshot at runtime.
    ///
    /// The node set is fixed for the lifetime of the process because the
    /// per-node locks and queue directories are derived from it.
    pub fn check_reload(&self, candidate: &Config) -> Result<(), ConfigError> {
        candidate.validate()?;
        if self.node_names() != candidate.node_names() {
            return Err(ConfigError::NodesChanged);
        }
        Ok(())
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Maximum bulk size for a node, honouring its override.
    pub fn bulk_max_for(&self, node: &str) -> usize {
        self.node(node)
            .and_then(|n| n.bulk_max_batches)
            .filter(|max| *max > 0)
            .unwrap_or(self.bulk_max_batches)
    }

    /// Transfer command template for a node and batch type.
    pub fn sync_command(&self, node: &str, kind: BatchKind) -> &str {
        let overridden = self.node(node).and_then(|n| match kind {
            BatchKind::Rec => n.sync_data_rec.as_deref(),
            BatchKind::Norec => n.sync_data_norec.as_deref(),
        });
        match overridden.filter(|c| !c.is_empty()) {
            Some(command) => command,
            None => match kind {
                BatchKind::Rec => &self.sync_data_rec,
                BatchKind::Norec => &self.sync_data_norec,
            },
        }
    }

    pub fn push_count(&self) -> usize {
        self.push_count.unwrap_or(self.push_procs)
    }

    pub fn pull_count(&self) -> usize {
        self.pull_count.unwrap_or(self.pull_procs)
    }

    pub fn scan_interval(&self) -> Duration {
        secs(self.scan_time)
    }

    pub fn fail_interval(&self) -> Duration {
        secs(self.fail_time)
    }

    pub fn staleness(&self) -> Duration {
        secs(self.bulk_older_than)
    }

    /// Log identity for a role, `%n` replaced by the role name.
    pub fn role_ident(&self, role: &str) -> String {
        self.log_ident.replace("%n", role)
    }

    /// Whether pulling batches from `node` is configured at all.
    pub fn pulls_from(&self, node: &str) -> bool {
        self.pull_batches.as_deref().is_some_and(|c| !c.is_empty())
            && self
                .node(node)
                .and_then(|n| n.batches.as_deref())
                .is_some_and(|b| !b.is_empty())
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Deserialize `NODES` keeping the document's key order.
fn deserialize_nodes<'de, D>(deserializer: D) -> Result<Vec<NodeConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NodesVisitor;

    impl<'de> Visitor<'de> for NodesVisitor {
        type Value = Vec<NodeConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of node name to node settings")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut nodes: Vec<NodeConfig> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, node)) = map.next_entry::<String, Option<NodeConfig>>()? {
                let node = NodeConfig {
                    name: name.clone(),
                    ..node.unwrap_or_default()
                };
                match nodes.iter_mut().find(|n| n.name == name) {
                    Some(existing) => *existing = node,
                    None => nodes.push(node),
                }
            }
            Ok(nodes)
        }
    }

    deserializer.deserialize_map(NodesVisitor)
}

/// Path of the configuration file, from the environment.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"))
}

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut cfg = Config::from_json(path, &text)?;
    if std::env::var("DEBUG").is_ok() {
        cfg.log_debug = true;
    }
    cfg.validate()?;
    Ok(cfg)
}
