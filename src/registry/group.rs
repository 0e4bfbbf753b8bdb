//! The watches and subscribers of one `(cluster, namespace scope)` pair.

use std::{
    collections::{hash_map, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{
    watch::{self, ResourceWatch, WatchPhase},
    SubscriberId,
};
use crate::{
    client::{ClusterApi, MetricsClient, RawEvent, StreamError, WatchRequest},
    health::Debounce,
    Config, GroupKey, HealthSummary, Mapper, QualifiedName, Record, ResourceKind, Subscriber,
    WatchEvent, WatchTarget,
};

/// State shared by every group of a registry.
pub(super) struct Shared {
    pub(super) mapper: Arc<dyn Mapper>,
    pub(super) config: Config,
    pub(super) runtime: Handle,
}

struct Interest {
    kinds: BTreeSet<ResourceKind>,
    sink: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct GroupState {
    closed: bool,
    next_watch_id: u64,
    watches: HashMap<ResourceKind, ResourceWatch>,
    subscribers: HashMap<SubscriberId, Interest>,
    health: Debounce,
    /// Generation of `last_health`. Recomputes finishing behind it are discarded.
    delivered: u64,
    last_health: Option<Arc<HealthSummary>>,
}

impl GroupState {
    /// The watch a stream task belongs to, unless it has been stopped or replaced.
    fn live_watch(&mut self, kind: ResourceKind, id: u64) -> Option<&mut ResourceWatch> {
        if self.closed {
            return None;
        }
        self.watches.get_mut(&kind).filter(|watch| watch.id == id)
    }

    fn broadcast(&self, event: &WatchEvent, kind: Option<ResourceKind>) {
        for interest in self.subscribers.values() {
            if kind.map_or(true, |kind| interest.kinds.contains(&kind)) {
                interest.sink.on_event(event.clone());
            }
        }
    }
}

pub(super) struct WatchGroup {
    key: GroupKey,
    api: Arc<dyn ClusterApi>,
    shared: Arc<Shared>,
    state: Mutex<GroupState>,
}

impl WatchGroup {
    pub(super) fn new(key: GroupKey, api: Arc<dyn ClusterApi>, shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            key,
            api,
            shared,
            state: Mutex::new(GroupState::default()),
        })
    }

    /// Registers a subscriber, starting watches for newly demanded kinds and
    /// replaying the cache of kinds that are already being watched.
    pub(super) fn add_subscriber(
        self: &Arc<Self>,
        id: SubscriberId,
        kinds: &[ResourceKind],
        sink: Arc<dyn Subscriber>,
    ) {
        let mut state = self.state.lock();
        let kinds: BTreeSet<_> = kinds.iter().copied().collect();

        for &kind in &kinds {
            if let Some(watch) = state.watches.get_mut(&kind) {
                watch.refs += 1;
                sink.on_event(watch.snapshot());
            } else {
                self.start_watch(&mut state, kind);
            }
        }
        if let Some(health) = &state.last_health {
            sink.on_event(WatchEvent::Health(Arc::clone(health)));
        }

        state.subscribers.insert(id, Interest { kinds, sink });
    }

    fn start_watch(self: &Arc<Self>, state: &mut GroupState, kind: ResourceKind) {
        state.next_watch_id += 1;
        let id = state.next_watch_id;
        let token = CancellationToken::new();

        let target = WatchTarget::new(kind, &self.key.scope);
        log::info!("Starting watch on {} for {}", target.path(), self.key);
        let mut watch = ResourceWatch::new(id, target, &self.shared.config);
        watch.refs = 1;
        watch.start(token.clone());
        state.watches.insert(kind, watch);

        self.shared
            .runtime
            .spawn(watch::run(Arc::downgrade(self), kind, id, token));
    }

    /// Returns `Some(true)` if the group has no subscribers left and was closed.
    pub(super) fn remove_subscriber(&self, id: SubscriberId) -> Option<bool> {
        let mut state = self.state.lock();
        let interest = state.subscribers.remove(&id)?;

        for kind in interest.kinds {
            if let hash_map::Entry::Occupied(mut entry) = state.watches.entry(kind) {
                let watch = entry.get_mut();
                watch.refs = watch.refs.saturating_sub(1);
                if watch.refs == 0 {
                    entry.remove().stop();
                }
            }
        }

        if state.subscribers.is_empty() {
            Self::close_locked(&mut state);
            return Some(true);
        }
        Some(false)
    }

    /// Stops every watch and the health timer. Later callbacks are ignored.
    pub(super) fn close(&self) {
        Self::close_locked(&mut self.state.lock());
    }

    fn close_locked(state: &mut GroupState) {
        state.closed = true;
        for (_, mut watch) in state.watches.drain() {
            watch.stop();
        }
        state.subscribers.clear();
        state.health.cancel();
    }

    pub(super) fn begin_connect(
        &self,
        kind: ResourceKind,
        id: u64,
    ) -> Option<(Arc<dyn ClusterApi>, WatchRequest)> {
        let mut state = self.state.lock();
        let watch = state.live_watch(kind, id)?;
        let request = watch.request(self.shared.config.watch_params());
        Some((Arc::clone(&self.api), request))
    }

    pub(super) fn mark_streaming(&self, kind: ResourceKind, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.live_watch(kind, id) {
            Some(watch) => {
                watch.streaming();
                true
            }
            None => false,
        }
    }

    /// Applies a stream event and fans the result out. Returns `false` once the
    /// watch is gone and its task should exit.
    pub(super) fn apply(self: &Arc<Self>, kind: ResourceKind, id: u64, event: RawEvent) -> bool {
        let mut state = self.state.lock();
        let Some(watch) = state.live_watch(kind, id) else {
            return false;
        };
        let Some(event) = watch.apply(event, &*self.shared.mapper) else {
            return true;
        };

        state.broadcast(&event, Some(kind));
        self.schedule_health(&mut state);
        true
    }

    pub(super) fn stream_ended(
        &self,
        kind: ResourceKind,
        id: u64,
        error: Option<StreamError>,
    ) -> Option<Duration> {
        let mut state = self.state.lock();
        let watch = state.live_watch(kind, id)?;
        Some(watch.stream_ended(error.as_ref()))
    }

    fn schedule_health(self: &Arc<Self>, state: &mut GroupState) {
        let group = Arc::downgrade(self);
        state.health.arm(
            &self.shared.runtime,
            self.shared.config.health_debounce,
            move |generation| async move {
                if let Some(group) = group.upgrade() {
                    group.refresh_health(generation).await;
                }
            },
        );
    }

    async fn refresh_health(&self, generation: u64) {
        let records: Vec<Arc<Record>> = {
            let mut state = self.state.lock();
            if state.closed || !state.health.claim(generation) {
                return;
            }
            state.watches.values().flat_map(ResourceWatch::records).collect()
        };

        let usage = match tokio::time::timeout(
            self.shared.config.metrics_timeout,
            self.api.node_usage(),
        )
        .await
        {
            Ok(Ok(usage)) => Some(usage),
            Ok(Err(err)) => {
                log::debug!("Health of {} computed without metrics: {err}", self.key);
                None
            }
            Err(_) => {
                log::debug!("Metrics query for {} timed out", self.key);
                None
            }
        };

        let summary = Arc::new(HealthSummary::compute(
            records.iter().map(Arc::as_ref),
            usage.as_deref(),
        ));

        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if generation < state.delivered {
            log::debug!("Discarding stale health summary for {}", self.key);
            return;
        }
        state.delivered = generation;
        state.last_health = Some(Arc::clone(&summary));
        state.broadcast(&WatchEvent::Health(summary), None);
    }

    pub(super) fn objects(&self, kind: ResourceKind) -> Option<Vec<(QualifiedName, Arc<Record>)>> {
        self.state.lock().watches.get(&kind).map(ResourceWatch::objects)
    }

    pub(super) fn phase(&self, kind: ResourceKind) -> Option<WatchPhase> {
        self.state.lock().watches.get(&kind).map(ResourceWatch::phase)
    }

    pub(super) fn last_health(&self) -> Option<Arc<HealthSummary>> {
        self.state.lock().last_health.clone()
    }
}
