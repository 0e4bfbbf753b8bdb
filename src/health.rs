//! Cluster health derived from the mirrored caches and node metrics.

use std::time::Duration;

use futures::Future;
use serde::Serialize;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    client::NodeUsage,
    record::{EventType, PodPhase, Record},
};

/// A point-in-time, never mutated summary of a watch group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub nodes_ready: usize,
    pub nodes_total: usize,
    pub pods_running: usize,
    pub pods_pending: usize,
    pub pods_failed: usize,
    pub pods_total: usize,
    pub deployments_healthy: usize,
    pub deployments_total: usize,
    pub warning_events: usize,
    pub cpu_avg_percent: Option<f64>,
    pub memory_avg_percent: Option<f64>,
    pub metrics_available: bool,
}

impl HealthSummary {
    /// Kinds missing from `records` count as empty. `usage` is `None` when
    /// the metrics source could not be queried.
    pub fn compute<'a>(
        records: impl IntoIterator<Item = &'a Record>,
        usage: Option<&[NodeUsage]>,
    ) -> Self {
        let mut summary = HealthSummary::default();

        for record in records {
            match record {
                Record::Node(node) => {
                    summary.nodes_total += 1;
                    summary.nodes_ready += usize::from(node.ready);
                }
                Record::Pod(pod) => {
                    summary.pods_total += 1;
                    match pod.phase {
                        PodPhase::Running => summary.pods_running += 1,
                        PodPhase::Pending => summary.pods_pending += 1,
                        PodPhase::Failed => summary.pods_failed += 1,
                        PodPhase::Succeeded | PodPhase::Unknown => {}
                    }
                }
                Record::Deployment(deployment) => {
                    summary.deployments_total += 1;
                    summary.deployments_healthy += usize::from(deployment.is_healthy());
                }
                Record::Event(event) => {
                    summary.warning_events += usize::from(event.event_type == EventType::Warning);
                }
            }
        }

        if let Some(usage) = usage {
            summary.metrics_available = true;
            summary.cpu_avg_percent = average_percent(
                usage
                    .iter()
                    .map(|node| (node.cpu_used_millis, node.cpu_capacity_millis)),
            );
            summary.memory_avg_percent = average_percent(
                usage
                    .iter()
                    .map(|node| (node.memory_used_bytes, node.memory_capacity_bytes)),
            );
        }

        summary
    }
}

fn average_percent(samples: impl Iterator<Item = (u64, u64)>) -> Option<f64> {
    let (sum, count) = samples
        .filter(|(_, capacity)| *capacity > 0)
        .fold((0.0, 0usize), |(sum, count), (used, capacity)| {
            (sum + used as f64 * 100.0 / capacity as f64, count + 1)
        });
    (count > 0).then(|| sum / count as f64)
}

/// A restartable one-shot timer.
///
/// Every [`arm`](Self::arm) supersedes the previous one; only the latest
/// generation may [`claim`](Self::claim) its firing.
#[derive(Debug, Default)]
pub(crate) struct Debounce {
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Debounce {
    pub(crate) fn arm<F, Fut>(&mut self, runtime: &Handle, delay: Duration, fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        self.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation).await;
        }));
    }

    /// Called by a fired timer before doing its work. A later `arm` no longer
    /// aborts the claimed run.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.timer.is_none() {
            return false;
        }
        self.timer = None;
        true
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
