//! kube-watchhub multiplexes Kubernetes watch streams between many
//! subscribers and keeps a live in-memory mirror of the watched kinds,
//! e.g. to back the resource tables of a cluster dashboard.
//!
//! Subscribers register with a [`Registry`] for a set of [`ResourceKind`]s in
//! a `(cluster, namespace scope)` pair. Each kind is watched by one stream per
//! pair, no matter how many subscribers need it. Streams resume from their
//! last resource version, relist after the apiserver reports it expired, and
//! reconnect with exponential backoff forever. Every burst of changes also
//! yields a debounced [`HealthSummary`] of the group.
//!
//! ```no_run
//! use std::sync::Arc;
//! use kube_watchhub::{
//!     Credentials, KubeConnector, NamespaceScope, Registry, ResourceKind, WatchEvent, WatchHub,
//! };
//!
//! # async fn demo() {
//! let registry = Registry::new(KubeConnector);
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WatchEvent>();
//! let _subscription = registry.subscribe(
//!     "local".into(),
//!     Credentials::Infer,
//!     &[ResourceKind::Pods, ResourceKind::Nodes],
//!     NamespaceScope::namespace("default"),
//!     Arc::new(tx),
//! );
//! while let Some(event) = rx.recv().await {
//!     if let WatchEvent::Health(health) = event {
//!         println!("{}/{} nodes ready", health.nodes_ready, health.nodes_total);
//!     }
//! }
//! # }
//! ```

pub mod client;
mod cluster;
pub mod config;
mod error;
mod event;
mod health;
mod kind;
pub mod mapper;
pub mod quantity;
pub mod record;
mod registry;
pub mod subscriber;

#[cfg(test)]
mod testing;

pub use client::{Connector, KubeConnector};
pub use cluster::{ClusterId, Credentials, GroupKey};
pub use config::Config;
pub use error::Error;
pub use event::{Action, WatchEvent};
pub use health::HealthSummary;
pub use kind::{NamespaceScope, ResourceKind, WatchTarget};
pub use mapper::{KubeMapper, Mapper};
pub use record::{QualifiedName, Record};
pub use registry::{Builder, Registry, WatchHub, WatchPhase};
pub use subscriber::{Subscriber, Subscription};
