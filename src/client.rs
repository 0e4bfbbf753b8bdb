//! The seams between the hub and a cluster: watch streams, node metrics,
//! and the connector producing both for a group.

use std::sync::Arc;

use futures::{future::BoxFuture, stream::BoxStream};
use kube_core::params::WatchParams;
use serde_json::Value;

use crate::{ClusterId, Credentials, WatchTarget};

pub mod kube;
pub use self::kube::{KubeCluster, KubeConnector};

/// HTTP status the apiserver answers with once a resource version is compacted away.
pub const GONE: u16 = 410;

/// The change type of one line in a watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Added,
    Modified,
    Deleted,
    Bookmark,
}

/// One decoded event off a watch stream, before mapping.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub phase: Phase,
    pub object: Value,
    pub resource_version: Option<String>,
}

impl RawEvent {
    /// Takes the resource version from `object.metadata.resourceVersion`.
    pub fn new(phase: Phase, object: Value) -> Self {
        let resource_version = object
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Self {
            phase,
            object,
            resource_version,
        }
    }

    pub fn bookmark(resource_version: impl Into<String>) -> Self {
        Self {
            phase: Phase::Bookmark,
            object: Value::Null,
            resource_version: Some(resource_version.into()),
        }
    }
}

/// Why a watch stream could not be opened or stopped early.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("resource version is too old")]
    Gone,
    #[error("apiserver responded {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    /// A single stream item could not be decoded. The stream itself carries on.
    #[error("cannot decode watch event: {0}")]
    Decode(String),
    #[error("cannot connect to cluster: {0}")]
    Connect(String),
}

impl StreamError {
    /// The stream cursor can no longer be resumed and the kind must be relisted.
    pub fn is_gone(&self) -> bool {
        match self {
            StreamError::Gone => true,
            StreamError::Api { code, .. } => *code == GONE,
            _ => false,
        }
    }
}

/// Parameters for opening one watch stream.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub target: WatchTarget,
    pub params: WatchParams,
    /// `None` asks for the current state followed by live changes.
    pub resource_version: Option<String>,
}

pub type EventStream = BoxStream<'static, Result<RawEvent, StreamError>>;

/// Opens watch streams. The stream ending, with or without an error item, ends the watch.
pub trait StreamClient: Send + Sync {
    fn watch(&self, request: WatchRequest) -> BoxFuture<'static, Result<EventStream, StreamError>>;
}

/// Current usage of one node against its capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUsage {
    pub name: String,
    pub cpu_used_millis: u64,
    pub cpu_capacity_millis: u64,
    pub memory_used_bytes: u64,
    pub memory_capacity_bytes: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
    #[error("metrics query timed out")]
    Timeout,
}

/// Queries the auxiliary metrics source of a cluster.
pub trait MetricsClient: Send + Sync {
    fn node_usage(&self) -> BoxFuture<'static, Result<Vec<NodeUsage>, MetricsError>>;
}

/// Everything a watch group needs from its cluster.
pub trait ClusterApi: StreamClient + MetricsClient {}

impl<T: StreamClient + MetricsClient> ClusterApi for T {}

/// Resolves credentials into a cluster handle, once per watch group.
///
/// Must not block; any network work belongs in the returned handle's futures.
pub trait Connector: Send + Sync {
    fn connect(&self, cluster: &ClusterId, credentials: &Credentials) -> Arc<dyn ClusterApi>;
}
