//! An in-memory cluster whose watch streams are fed by the test.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{channel::mpsc as stream_channel, future::BoxFuture, FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    client::{
        ClusterApi, Connector, EventStream, MetricsClient, MetricsError, NodeUsage, RawEvent,
        StreamClient, StreamError, WatchRequest,
    },
    ClusterId, Credentials, WatchEvent,
};

/// One call to [`StreamClient::watch`] as seen by the fake.
pub(crate) struct OpenedStream {
    pub(crate) request: WatchRequest,
    pub(crate) at: Instant,
    /// The open was answered with an error.
    pub(crate) failed: bool,
    events: stream_channel::UnboundedSender<Result<RawEvent, StreamError>>,
}

impl OpenedStream {
    pub(crate) fn send(&self, event: RawEvent) {
        let _ = self.events.unbounded_send(Ok(event));
    }

    /// Sends an error item. Anything but `StreamError::Decode` ends the stream.
    pub(crate) fn fail(&self, err: StreamError) {
        let _ = self.events.unbounded_send(Err(err));
    }

    /// Ends the stream without an error, like a server-side timeout.
    pub(crate) fn close(&self) {
        self.events.close_channel();
    }

    /// The watch dropped its end of the stream.
    pub(crate) fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

struct FakeInner {
    opened: mpsc::UnboundedSender<OpenedStream>,
    open_failures: Mutex<VecDeque<StreamError>>,
    metrics: Mutex<Result<Vec<NodeUsage>, MetricsError>>,
    metrics_delays: Mutex<VecDeque<Duration>>,
    metrics_calls: AtomicUsize,
    connects: AtomicUsize,
}

#[derive(Clone)]
pub(crate) struct FakeCluster {
    inner: Arc<FakeInner>,
}

impl FakeCluster {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<OpenedStream>) {
        let (opened, opened_rx) = mpsc::unbounded_channel();
        let cluster = Self {
            inner: Arc::new(FakeInner {
                opened,
                open_failures: Mutex::new(VecDeque::new()),
                metrics: Mutex::new(Ok(Vec::new())),
                metrics_delays: Mutex::new(VecDeque::new()),
                metrics_calls: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
            }),
        };
        (cluster, opened_rx)
    }

    pub(crate) fn fail_next_open(&self, err: StreamError) {
        self.inner.open_failures.lock().push_back(err);
    }

    pub(crate) fn set_metrics(&self, metrics: Result<Vec<NodeUsage>, MetricsError>) {
        *self.inner.metrics.lock() = metrics;
    }

    /// Makes the next metrics query answer only after `delay`.
    pub(crate) fn delay_next_metrics(&self, delay: Duration) {
        self.inner.metrics_delays.lock().push_back(delay);
    }

    pub(crate) fn metrics_calls(&self) -> usize {
        self.inner.metrics_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }
}

impl StreamClient for FakeCluster {
    fn watch(&self, request: WatchRequest) -> BoxFuture<'static, Result<EventStream, StreamError>> {
        let inner = Arc::clone(&self.inner);
        async move {
            let (events, stream) = stream_channel::unbounded();
            let failure = inner.open_failures.lock().pop_front();
            let _ = inner.opened.send(OpenedStream {
                request,
                at: Instant::now(),
                failed: failure.is_some(),
                events,
            });
            match failure {
                Some(err) => Err(err),
                None => Ok(stream.boxed()),
            }
        }
        .boxed()
    }
}

impl MetricsClient for FakeCluster {
    fn node_usage(&self) -> BoxFuture<'static, Result<Vec<NodeUsage>, MetricsError>> {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.metrics_calls.fetch_add(1, Ordering::SeqCst);
            let delay = inner.metrics_delays.lock().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            inner.metrics.lock().clone()
        }
        .boxed()
    }
}

impl Connector for FakeCluster {
    fn connect(&self, _cluster: &ClusterId, _credentials: &Credentials) -> Arc<dyn ClusterApi> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Arc::new(self.clone())
    }
}

pub(crate) fn pod(name: &str, phase: &str, resource_version: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": "default", "resourceVersion": resource_version},
        "spec": {"containers": [{"name": "app"}]},
        "status": {"phase": phase},
    })
}

pub(crate) fn node(name: &str, ready: bool, resource_version: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {"name": name, "resourceVersion": resource_version},
        "status": {
            "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}],
            "capacity": {"cpu": "4", "memory": "8Gi"},
        },
    })
}

/// The next event that is not a health summary.
pub(crate) async fn next_change(rx: &mut mpsc::UnboundedReceiver<WatchEvent>) -> WatchEvent {
    loop {
        match rx.recv().await {
            Some(WatchEvent::Health(_)) => continue,
            Some(event) => return event,
            None => panic!("subscriber channel closed"),
        }
    }
}

/// Everything delivered so far.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<WatchEvent>) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
