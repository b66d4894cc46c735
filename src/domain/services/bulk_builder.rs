//! Bulk Builder Service
//!
//! Pure domain logic for grouping queued batches into a bulk.
//! This service has NO external dependencies - it's pure Rust.

use crate::domain::entities::{Bulk, Candidate};
use std::time::{Duration, SystemTime};

/// Groups the head of a node's queue into one bulk.
///
/// Growth stops at the first batch that:
/// 1. has a different type than the bulk so far,
/// 2. is younger than the staleness threshold (or has no readable mtime),
/// 3. would exceed the maximum bulk size.
///
/// Nothing after the stopping point is considered, so per-node FIFO order
/// is preserved even when that yields a short or empty bulk.
pub struct BulkBuilder;

impl BulkBuilder {
    /// Build the bulk for `node` from `candidates` (oldest first).
    ///
    /// Returns `None` when the head of the queue is not eligible.
    pub fn build(
        node: &str,
        candidates: &[Candidate],
        staleness: Duration,
        max_size: usize,
        now: SystemTime,
    ) -> Option<Bulk> {
        let mut bulk: Option<Bulk> = None;

        for candidate in candidates {
            if bulk.as_ref().map_or(0, Bulk::len) >= max_size {
                break;
            }

            let Some(modified) = candidate.modified else {
                tracing::warn!(
                    "cannot get mtime of {} for node {}, assuming new bulk",
                    candidate.batch.name,
                    node
                );
                break;
            };

            // A modification time in the future counts as brand new.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < staleness {
                break;
            }

            match bulk.as_mut() {
                Some(b) if b.kind != candidate.batch.kind => break,
                Some(b) => b.batches.push(candidate.batch.name.clone()),
                None => {
                    bulk = Some(Bulk {
                        node: node.to_string(),
                        kind: candidate.batch.kind,
                        batches: vec![candidate.batch.name.clone()],
                    })
                }
            }
        }

        bulk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use crate::domain::entities::BatchName;
    use crate::domain::value_objects::BatchKind;

    fn candidate(name: &str, age_secs: u64, now: SystemTime) -> Candidate {
        Candidate {
            batch: BatchName::parse(name).unwrap(),
            modified: Some(now - Duration::from_secs(age_secs)),
        }
    }

    #[test]
    fn test_staleness_gate_stops_growth() {
        let now = SystemTime::now();
        let candidates = vec![
            candidate("0001_a_norec.batch", 100, now),
            candidate("0002_a_norec.batch", 90, now),
            candidate("0003_a_norec.batch", 1, now),
            candidate("0004_a_norec.batch", 100, now),
        ];

        let bulk = BulkBuilder::build("b", &candidates, Duration::from_secs(10), 5, now).unwrap();
        assert_eq!(bulk.batches, vec!["0001_a_norec.batch", "0002_a_norec.batch"]);
        assert_eq!(bulk.kind, BatchKind::Norec);
        assert_eq!(bulk.node, "b");
    }

    #[test]
    fn test_type_boundary_stops_growth() {
        let now = SystemTime::now();
        let candidates = vec![
            candidate("0001_a_rec.batch", 100, now),
            candidate("0002_a_norec.batch", 100, now),
            candidate("0003_a_rec.batch", 100, now),
        ];

        let bulk = BulkBuilder::build("b", &candidates, Duration::ZERO, 5, now).unwrap();
        assert_eq!(bulk.batches, vec!["0001_a_rec.batch"]);
        assert_eq!(bulk.kind, BatchKind::Rec);
    }

    #[test]
    fn test_young_head_yields_no_bulk() {
        let now = SystemTime::now();
        let candidates = vec![
            candidate("0001_a_rec.batch", 0, now),
            candidate("0002_a_rec.batch", 100, now),
        ];

        assert!(BulkBuilder::build("b", &candidates, Duration::from_secs(5), 5, now).is_none());
    }

    #[test]
    fn test_max_size_bounds_bulk() {
        let now = SystemTime::now();
        let candidates: Vec<Candidate> = (1..=10)
            .map(|i| candidate(&format!("{:04}_a_rec.batch", i), 100, now))
            .collect();

        let bulk = BulkBuilder::build("b", &candidates, Duration::ZERO, 3, now).unwrap();
        assert_eq!(bulk.len(), 3);
        assert_eq!(bulk.batches[0], "0001_a_rec.batch");
        assert_eq!(bulk.batches[2], "0003_a_rec.batch");
    }

    #[traced_test]
    #[test]
    fn test_unreadable_mtime_stops_growth() {
        let now = SystemTime::now();
        let mut unreadable = candidate("0002_a_rec.batch", 100, now);
        unreadable.modified = None;
        let candidates = vec![
            candidate("0001_a_rec.batch", 100, now),
            unreadable,
            candidate("0003_a_rec.batch", 100, now),
        ];

        let bulk = BulkBuilder::build("b", &candidates, Duration::ZERO, 5, now).unwrap();
        assert_eq!(bulk.batches, vec!["0001_a_rec.batch"]);
        assert!(logs_contain("cannot get mtime of 0002_a_rec.batch"));
    }

    #[test]
    fn test_future_mtime_is_young() {
        let now = SystemTime::now();
        let candidates = vec![Candidate {
            batch: BatchName::parse("0001_a_rec.batch").unwrap(),
            modified: Some(now + Duration::from_secs(60)),
        }];

        assert!(BulkBuilder::build("b", &candidates, Duration::from_secs(1), 5, now).is_none());
        assert!(BulkBuilder::build("b", &candidates, Duration::ZERO, 5, now).is_some());
    }

    #[test]
    fn test_empty_candidates() {
        assert!(BulkBuilder::build("b", &[], Duration::ZERO, 5, SystemTime::now()).is_none());
    }

    #[test]
    fn test_bulk_is_always_homogeneous() {
        let now = SystemTime::now();
        let kinds = ["rec", "rec", "norec", "rec", "norec", "norec", "rec"];
        for start in 0..kinds.len() {
            let candidates: Vec<Candidate> = kinds[start..]
                .iter()
                .enumerate()
                .map(|(i, k)| candidate(&format!("{:04}_a_{}.batch", i, k), 100, now))
                .collect();
            if let Some(bulk) = BulkBuilder::build("b", &candidates, Duration::ZERO, 10, now) {
                assert!(bulk
                    .batches
                    .iter()
                    .all(|n| BatchName::parse(n).unwrap().kind == bulk.kind));
            }
        }
    }
}
