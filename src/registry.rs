//! The process-wide table of watch groups.
//!
//! Subscribers interested in the same kinds of the same `(cluster, scope)`
//! pair share one watch stream per kind. A stream starts when its kind is
//! first demanded and stops when the last subscriber needing it leaves.

use std::{
    collections::HashMap,
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::{
    client::Connector, ClusterId, Config, Credentials, GroupKey, HealthSummary, KubeMapper,
    Mapper, NamespaceScope, QualifiedName, Record, ResourceKind, Subscriber, Subscription,
};

mod group;
mod watch;

use self::group::{Shared, WatchGroup};
pub use self::watch::WatchPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriberId(u64);

/// Subscribing to live cluster state.
///
/// [`Registry`] is the implementation; consumers should depend on this trait
/// so they can be handed a fake.
pub trait WatchHub: Send + Sync {
    /// Starts delivering events for `kinds` to `subscriber`.
    ///
    /// Kinds that are already watched are replayed to the new subscriber as a
    /// [`WatchEvent::Snapshot`](crate::WatchEvent::Snapshot) before this returns.
    fn subscribe(
        &self,
        cluster: ClusterId,
        credentials: Credentials,
        kinds: &[ResourceKind],
        scope: NamespaceScope,
        subscriber: Arc<dyn Subscriber>,
    ) -> Subscription;

    /// Tears down every group and watch. Subscriptions made afterwards are inert.
    fn shutdown(&self);
}

/// Builds a [`Registry`].
pub struct Builder {
    connector: Arc<dyn Connector>,
    mapper: Arc<dyn Mapper>,
    config: Config,
    runtime: Option<Handle>,
}

impl Builder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    /// Runtime to spawn watch tasks on. Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// # Panics
    ///
    /// Panics if no runtime was given and this is called outside a tokio runtime.
    pub fn build(self) -> Registry {
        Registry {
            inner: Arc::new(Inner {
                connector: self.connector,
                shared: Arc::new(Shared {
                    mapper: self.mapper,
                    config: self.config,
                    runtime: self.runtime.unwrap_or_else(Handle::current),
                }),
                groups: Mutex::new(Groups::default()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }
}

/// Shares watch streams between subscribers and keeps their caches.
///
/// Meant to be created once by the application and shut down on exit;
/// dropping it shuts it down as well.
pub struct Registry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Groups {
    closed: bool,
    by_key: HashMap<GroupKey, Arc<WatchGroup>>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    groups: Mutex<Groups>,
    next_subscriber: AtomicU64,
}

impl Registry {
    pub fn builder(connector: impl Connector + 'static) -> Builder {
        Builder {
            connector: Arc::new(connector),
            mapper: Arc::new(KubeMapper),
            config: Config::default(),
            runtime: None,
        }
    }

    /// A registry with the default config and mapper.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::builder(connector).build()
    }

    fn group(&self, key: &GroupKey) -> Option<Arc<WatchGroup>> {
        self.inner.groups.lock().by_key.get(key).cloned()
    }

    /// Current cache contents of a watched kind, ordered by key.
    pub fn snapshot(
        &self,
        key: &GroupKey,
        kind: ResourceKind,
    ) -> Option<Vec<(QualifiedName, Arc<Record>)>> {
        self.group(key)?.objects(kind)
    }

    pub fn watch_phase(&self, key: &GroupKey, kind: ResourceKind) -> Option<WatchPhase> {
        self.group(key)?.phase(kind)
    }

    /// The most recent health summary delivered for a group.
    pub fn last_health(&self, key: &GroupKey) -> Option<Arc<HealthSummary>> {
        self.group(key)?.last_health()
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.lock().by_key.len()
    }
}

impl WatchHub for Registry {
    fn subscribe(
        &self,
        cluster: ClusterId,
        credentials: Credentials,
        kinds: &[ResourceKind],
        scope: NamespaceScope,
        subscriber: Arc<dyn Subscriber>,
    ) -> Subscription {
        let key = GroupKey { cluster, scope };
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));

        {
            let mut groups = self.inner.groups.lock();
            if groups.closed {
                log::warn!("Ignoring subscription to {key} after shutdown");
                return Subscription::detached();
            }
            let group = groups.by_key.entry(key.clone()).or_insert_with(|| {
                log::info!("Creating watch group {key}");
                let api = self.inner.connector.connect(&key.cluster, &credentials);
                WatchGroup::new(key.clone(), api, Arc::clone(&self.inner.shared))
            });
            group.add_subscriber(id, kinds, subscriber);
        }

        let registry = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.unsubscribe(&key, id);
            }
        })
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Inner {
    fn unsubscribe(&self, key: &GroupKey, id: SubscriberId) {
        let mut groups = self.groups.lock();
        let Some(group) = groups.by_key.get(key) else {
            return;
        };
        if group.remove_subscriber(id) == Some(true) {
            groups.by_key.remove(key);
            log::info!("Removed watch group {key}");
        }
    }

    fn shutdown(&self) {
        let groups = {
            let mut groups = self.groups.lock();
            groups.closed = true;
            mem::take(&mut groups.by_key)
        };
        if groups.is_empty() {
            return;
        }
        log::info!("Shutting down {} watch groups", groups.len());
        for group in groups.into_values() {
            group.close();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
