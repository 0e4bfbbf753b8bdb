//! A single watch stream, its reconnect state machine and its object cache.

use std::{
    collections::BTreeMap,
    mem,
    sync::{Arc, Weak},
    time::Duration,
};

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::StreamExt;
use kube_core::params::WatchParams;
use tokio_util::sync::CancellationToken;

use super::group::WatchGroup;
use crate::{
    client::{Phase, RawEvent, StreamClient, StreamError, WatchRequest},
    Action, Config, Mapper, QualifiedName, Record, ResourceKind, WatchEvent, WatchTarget,
};

/// Where a watch is in its connect/stream/reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    Connecting,
    Streaming,
    ReconnectWait,
    Stopped,
}

enum Lifecycle {
    NotStarted,
    Running(CancellationToken),
    Stopped,
}

pub(super) struct ResourceWatch {
    /// Distinguishes this watch from an earlier one of the same kind, so
    /// callbacks of a stopped task can be recognized and discarded.
    pub(super) id: u64,
    pub(super) refs: usize,
    target: WatchTarget,
    lifecycle: Lifecycle,
    phase: WatchPhase,
    /// Empty means the next connect relists.
    cursor: String,
    backoff: ExponentialBackoff,
    cache: BTreeMap<QualifiedName, Arc<Record>>,
}

impl ResourceWatch {
    pub(super) fn new(id: u64, target: WatchTarget, config: &Config) -> Self {
        Self {
            id,
            refs: 0,
            target,
            lifecycle: Lifecycle::NotStarted,
            phase: WatchPhase::Idle,
            cursor: String::new(),
            backoff: config.backoff(),
            cache: BTreeMap::new(),
        }
    }

    pub(super) fn kind(&self) -> ResourceKind {
        self.target.kind
    }

    pub(super) fn phase(&self) -> WatchPhase {
        self.phase
    }

    #[cfg(test)]
    pub(super) fn cursor(&self) -> &str {
        &self.cursor
    }

    #[cfg(test)]
    pub(super) fn current_backoff(&self) -> Duration {
        self.backoff.current_interval
    }

    /// Hands the watch the token its stream task runs under. Only the first call takes effect.
    pub(super) fn start(&mut self, token: CancellationToken) -> bool {
        if !matches!(self.lifecycle, Lifecycle::NotStarted) {
            return false;
        }
        self.lifecycle = Lifecycle::Running(token);
        true
    }

    /// Cancels the stream task, which also cancels a pending reconnect. Idempotent.
    pub(super) fn stop(&mut self) {
        if let Lifecycle::Running(token) = mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            token.cancel();
            log::info!("Stopped watch on {}", self.target.path());
        }
        self.phase = WatchPhase::Stopped;
    }

    pub(super) fn request(&mut self, params: WatchParams) -> WatchRequest {
        self.phase = WatchPhase::Connecting;
        WatchRequest {
            target: self.target.clone(),
            params,
            resource_version: (!self.cursor.is_empty()).then(|| self.cursor.clone()),
        }
    }

    pub(super) fn streaming(&mut self) {
        self.phase = WatchPhase::Streaming;
    }

    /// Folds one stream event into the cache. Returns the event to fan out, if any.
    pub(super) fn apply(&mut self, event: RawEvent, mapper: &dyn Mapper) -> Option<WatchEvent> {
        if let Some(version) = &event.resource_version {
            self.cursor.clone_from(version);
        }

        let action = match event.phase {
            Phase::Bookmark => return None,
            Phase::Added => Action::Added,
            Phase::Modified => Action::Modified,
            Phase::Deleted => Action::Deleted,
        };

        let (key, record) = match mapper.map(self.kind(), &event.object) {
            Ok(mapped) => mapped,
            Err(err) => {
                log::debug!("Dropping {} event from {}: {err}", self.kind(), self.target.path());
                return None;
            }
        };
        let record = Arc::new(record);

        if action == Action::Deleted {
            self.cache.remove(&key);
        } else {
            self.cache.insert(key.clone(), Arc::clone(&record));
        }
        self.backoff.reset();

        Some(WatchEvent::Changed {
            kind: self.kind(),
            action,
            key,
            record,
            resource_version: event.resource_version,
        })
    }

    /// Records the end of a stream and returns how long to wait before reconnecting.
    pub(super) fn stream_ended(&mut self, error: Option<&StreamError>) -> Duration {
        if error.is_some_and(StreamError::is_gone) {
            log::info!(
                "Resource version {:?} of {} expired, relisting",
                self.cursor,
                self.target.path()
            );
            self.cursor.clear();
            self.cache.clear();
        }
        self.phase = WatchPhase::ReconnectWait;
        self.backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval)
    }

    pub(super) fn objects(&self) -> Vec<(QualifiedName, Arc<Record>)> {
        self.cache
            .iter()
            .map(|(key, record)| (key.clone(), Arc::clone(record)))
            .collect()
    }

    pub(super) fn records(&self) -> impl Iterator<Item = Arc<Record>> + '_ {
        self.cache.values().cloned()
    }

    pub(super) fn snapshot(&self) -> WatchEvent {
        WatchEvent::Snapshot {
            kind: self.kind(),
            objects: self.objects(),
        }
    }
}

fn upgrade<T>(group: &Weak<WatchGroup>, f: impl FnOnce(&Arc<WatchGroup>) -> T) -> Option<T> {
    group.upgrade().map(|group| f(&group))
}

/// Drives one watch until its token is cancelled or its group goes away.
///
/// The group is only referenced weakly, and every callback names the watch
/// generation it belongs to, so nothing this task does can touch a watch
/// that has since been stopped or replaced.
pub(super) async fn run(
    group: Weak<WatchGroup>,
    kind: ResourceKind,
    id: u64,
    token: CancellationToken,
) {
    loop {
        let Some((api, request)) = upgrade(&group, |g| g.begin_connect(kind, id)).flatten() else {
            return;
        };
        let path = request.target.path();

        let opened = tokio::select! {
            _ = token.cancelled() => return,
            opened = api.watch(request) => opened,
        };

        let failure = match opened {
            Ok(mut stream) => {
                if upgrade(&group, |g| g.mark_streaming(kind, id)) != Some(true) {
                    return;
                }
                log::debug!("Streaming {path}");
                loop {
                    let item = tokio::select! {
                        _ = token.cancelled() => return,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => {
                            if upgrade(&group, |g| g.apply(kind, id, event)) != Some(true) {
                                return;
                            }
                        }
                        Some(Err(StreamError::Decode(err))) => {
                            log::debug!("Skipping undecodable event from {path}: {err}");
                        }
                        Some(Err(err)) => break Some(err),
                        None => break None,
                    }
                }
            }
            Err(err) => Some(err),
        };

        match &failure {
            Some(err) => log::warn!("Watch on {path} ended: {err}"),
            None => log::debug!("Watch on {path} closed by server"),
        }

        let Some(delay) = upgrade(&group, |g| g.stream_ended(kind, id, failure)).flatten() else {
            return;
        };
        log::debug!("Reconnecting {path} in {delay:?}");

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::{record::PodPhase, KubeMapper, NamespaceScope};

    fn pod(name: &str, phase: &str, version: &str) -> Value {
        json!({
            "metadata": {"name": name, "namespace": "default", "resourceVersion": version},
            "spec": {"containers": [{"name": "app"}]},
            "status": {"phase": phase},
        })
    }

    fn watch() -> ResourceWatch {
        ResourceWatch::new(
            1,
            WatchTarget::new(ResourceKind::Pods, &NamespaceScope::namespace("default")),
            &Config::default().with_backoff(Duration::from_secs(1), Duration::from_secs(8)),
        )
    }

    fn phase_of(record: &Record) -> PodPhase {
        match record {
            Record::Pod(pod) => pod.phase,
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn cache_folds_events() {
        let mut watch = watch();
        let events = [
            RawEvent::new(Phase::Added, pod("pod-a", "Pending", "1")),
            RawEvent::new(Phase::Added, pod("pod-b", "Pending", "2")),
            RawEvent::new(Phase::Modified, pod("pod-a", "Running", "3")),
            RawEvent::new(Phase::Deleted, pod("pod-b", "Pending", "4")),
        ];
        for event in events {
            assert!(watch.apply(event, &KubeMapper).is_some());
        }

        let objects = watch.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].0.to_string(), "default/pod-a");
        assert_eq!(phase_of(&objects[0].1), PodPhase::Running);
        assert_eq!(watch.cursor(), "4");
    }

    #[test]
    fn cache_matches_last_write_fold() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        const NAMES: [&str; 4] = ["a", "b", "c", "d"];
        const PHASES: [&str; 3] = ["Pending", "Running", "Failed"];

        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut watch = watch();
            let mut expected: BTreeMap<String, PodPhase> = BTreeMap::new();

            // Deleting a key that was never added, then re-adding after a delete.
            let mut events = vec![
                (Phase::Deleted, "ghost", "Running"),
                (Phase::Added, "a", "Pending"),
                (Phase::Deleted, "a", "Pending"),
                (Phase::Added, "a", "Running"),
            ];
            for _ in 0..rng.gen_range(0..40) {
                let phase = match rng.gen_range(0..3) {
                    0 => Phase::Added,
                    1 => Phase::Modified,
                    _ => Phase::Deleted,
                };
                let name = NAMES[rng.gen_range(0..NAMES.len())];
                let status = PHASES[rng.gen_range(0..PHASES.len())];
                events.push((phase, name, status));
            }

            for (version, (phase, name, status)) in events.into_iter().enumerate() {
                let raw = RawEvent::new(phase, pod(name, status, &version.to_string()));
                assert!(watch.apply(raw, &KubeMapper).is_some());
                if phase == Phase::Deleted {
                    expected.remove(name);
                } else {
                    expected.insert(name.to_owned(), PodPhase::parse(Some(status)));
                }
            }

            let cached: BTreeMap<String, PodPhase> = watch
                .objects()
                .into_iter()
                .map(|(key, record)| (key.name, phase_of(&record)))
                .collect();
            assert_eq!(cached, expected, "seed {seed}");
        }
    }

    #[test]
    fn deleted_event_carries_last_state() {
        let mut watch = watch();
        watch.apply(RawEvent::new(Phase::Added, pod("a", "Running", "1")), &KubeMapper);
        let event = watch
            .apply(RawEvent::new(Phase::Deleted, pod("a", "Succeeded", "2")), &KubeMapper)
            .unwrap();
        assert_eq!(event.action(), Action::Deleted);
        assert!(matches!(
            event,
            WatchEvent::Changed { ref key, ref resource_version, .. }
                if key.name == "a" && resource_version.as_deref() == Some("2")
        ));
        assert!(watch.objects().is_empty());
    }

    #[test]
    fn bookmark_only_moves_cursor() {
        let mut watch = watch();
        watch.apply(RawEvent::new(Phase::Added, pod("a", "Running", "1")), &KubeMapper);
        assert!(watch.apply(RawEvent::bookmark("9"), &KubeMapper).is_none());
        assert_eq!(watch.cursor(), "9");
        assert_eq!(watch.objects().len(), 1);
    }

    #[test]
    fn unmappable_event_is_dropped() {
        let mut watch = watch();
        watch.apply(RawEvent::new(Phase::Added, pod("a", "Running", "1")), &KubeMapper);
        let broken = RawEvent::new(
            Phase::Added,
            json!({"metadata": {"namespace": "default", "resourceVersion": "2"}}),
        );
        assert!(watch.apply(broken, &KubeMapper).is_none());
        assert_eq!(watch.objects().len(), 1);
        assert_eq!(watch.cursor(), "2");
    }

    #[test]
    fn backoff_grows_then_resets_on_event() {
        let mut watch = watch();
        let err = StreamError::Transport("connection reset".into());
        let delays: Vec<_> = (0..5).map(|_| watch.stream_ended(Some(&err))).collect();
        assert_eq!(delays, [1, 2, 4, 8, 8].map(Duration::from_secs).to_vec());
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));

        watch.apply(RawEvent::new(Phase::Added, pod("a", "Running", "1")), &KubeMapper);
        assert_eq!(watch.current_backoff(), Duration::from_secs(1));
        assert_eq!(watch.stream_ended(None), Duration::from_secs(1));
    }

    #[test]
    fn gone_resets_cursor_and_cache() {
        let mut watch = watch();
        watch.apply(RawEvent::new(Phase::Added, pod("a", "Running", "5")), &KubeMapper);

        watch.stream_ended(Some(&StreamError::Transport("eof".into())));
        assert_eq!(watch.cursor(), "5");
        assert_eq!(watch.objects().len(), 1);
        assert_eq!(
            watch.request(WatchParams::default()).resource_version.as_deref(),
            Some("5")
        );

        watch.stream_ended(Some(&StreamError::Gone));
        assert_eq!(watch.cursor(), "");
        assert!(watch.objects().is_empty());
        assert_eq!(watch.request(WatchParams::default()).resource_version, None);
        assert_eq!(watch.phase(), WatchPhase::Connecting);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut watch = watch();
        let token = CancellationToken::new();
        assert!(watch.start(token.clone()));
        assert!(!watch.start(CancellationToken::new()));

        watch.stop();
        assert!(token.is_cancelled());
        assert_eq!(watch.phase(), WatchPhase::Stopped);
        watch.stop();
        assert!(!watch.start(CancellationToken::new()));
        assert_eq!(watch.phase(), WatchPhase::Stopped);
    }
}
