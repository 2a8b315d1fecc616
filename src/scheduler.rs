//! Concurrent fan-out of node probes.
//!
//! Probes run on a bounded worker pool sized independently of the node
//! count. Workers own their node's data; results are merged only at join
//! time into a disjoint-key map, so no locking is involved. A crashing
//! worker degrades to an UNKNOWN record for its node and never aborts the
//! batch.

use crate::config::HealthConfig;
use crate::models::HealthRecord;
use crate::probe;
use futures::{stream, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Concurrent node probes. Fixed: large clusters must not translate into
/// thousands of in-flight ssh sessions.
pub const PROBE_POOL: usize = 16;

/// Probe every node, returning exactly one record per input node.
pub async fn probe_all(
    nodes: &[String],
    health: &HealthConfig,
) -> BTreeMap<String, HealthRecord> {
    probe_all_with(nodes, health, |node, health| async move {
        probe::probe(&node, &health).await
    })
    .await
}

/// Fan a probe function across the pool. Split out from [`probe_all`] so the
/// crash-isolation contract is testable with a synthetic prober.
async fn probe_all_with<F, Fut>(
    nodes: &[String],
    health: &HealthConfig,
    probe_fn: F,
) -> BTreeMap<String, HealthRecord>
where
    F: Fn(String, Arc<HealthConfig>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = HealthRecord> + Send + 'static,
{
    let health = Arc::new(health.clone());

    stream::iter(nodes.iter().cloned().map(|node| {
        let health = Arc::clone(&health);
        let probe_fn = probe_fn.clone();
        async move {
            let worker = tokio::spawn(probe_fn(node.clone(), health));
            let record = match worker.await {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(node = %node, error = %e, "probe worker crashed");
                    HealthRecord::internal_fault("health", format!("probe worker failed: {}", e))
                }
            };
            (node, record)
        }
    }))
    .buffer_unordered(PROBE_POOL)
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn health() -> HealthConfig {
        HealthConfig {
            timeout: 1,
            mounts: Default::default(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_every_node_gets_exactly_one_record() {
        let input = nodes(&["a.invalid", "b.invalid", "c.invalid"]);
        let records = probe_all_with(&input, &health(), |node, _| async move {
            let mut record = HealthRecord::new("health");
            record.status = format!("probed-{}", node);
            record
        })
        .await;

        assert_eq!(records.len(), 3);
        for node in &input {
            assert_eq!(records[node].status, format!("probed-{}", node));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_worker_degrades_to_unknown_record() {
        let input = nodes(&["good1", "bad", "good2"]);
        let records = probe_all_with(&input, &health(), |node, _| async move {
            if node == "bad" {
                panic!("synthetic probe failure");
            }
            let mut record = HealthRecord::new("health");
            record.status = "OK".to_string();
            record
        })
        .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records["good1"].status, "OK");
        assert_eq!(records["good2"].status, "OK");

        let crashed = &records["bad"];
        assert_eq!(crashed.category, Category::Unknown);
        assert_eq!(crashed.status, "UNKN");
        assert!(crashed.details.contains("probe worker failed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_node_set_yields_empty_map() {
        let records = probe_all(&[], &health()).await;
        assert!(records.is_empty());
    }
}
