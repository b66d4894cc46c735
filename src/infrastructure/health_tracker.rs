//! Node Health Tracker
//!
//! Per-node backoff state. A node in backoff is skipped by whichever role
//! owns the tracker until its cooldown window has passed.
//!
//! The tracker is deliberately not shared: the scheduler and the enqueue
//! loop each own one, so no locking is needed.

use crate::config::Config;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Cooldown after a failure
    pub fail_time: Duration,
    /// Short cooldown for a node that already has work outstanding
    pub scan_time: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            fail_time: Duration::from_secs(10),
            scan_time: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Cooldowns from a configuration snapshot.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            fail_time: cfg.fail_interval(),
            scan_time: cfg.scan_interval(),
        }
    }
}

/// Tracks which nodes are usable.
#[derive(Debug, Default)]
pub struct NodeHealthTracker {
    config: BackoffConfig,
    /// Ready-at instant per node; absent means ready
    ready_at: HashMap<String, Instant>,
}

impl NodeHealthTracker {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            ready_at: HashMap::new(),
        }
    }

    /// Replace the cooldown durations (after a config reload).
    pub fn set_config(&mut self, config: BackoffConfig) {
        self.config = config;
    }

    /// Check whether a node is usable now.
    pub fn is_ready(&mut self, node: &str) -> bool {
        self.is_ready_at(node, Instant::now())
    }

    /// Check whether a node is usable at `now`, clearing an expired backoff.
    pub fn is_ready_at(&mut self, node: &str, now: Instant) -> bool {
        match self.ready_at.get(node) {
            Some(until) if now <= *until => false,
            Some(_) => {
                self.ready_at.remove(node);
                tracing::debug!("node {} backoff expired", node);
                true
            }
            None => true,
        }
    }

    /// Put a node in backoff for the failure interval.
    pub fn set_failing(&mut self, node: &str) {
        self.set_failing_at(node, Instant::now());
    }

    pub fn set_failing_at(&mut self, node: &str, now: Instant) {
        let until = now + self.config.fail_time;
        self.ready_at.insert(node.to_string(), until);
        tracing::warn!(
            "node {} marked failing, will retry in {:?}",
            node,
            self.config.fail_time
        );
    }

    /// Put a node in the shorter scan-interval backoff.
    pub fn set_waiting(&mut self, node: &str) {
        self.set_waiting_at(node, Instant::now());
    }

    pub fn set_waiting_at(&mut self, node: &str, now: Instant) {
        self.ready_at
            .insert(node.to_string(), now + self.config.scan_time);
    }
}
