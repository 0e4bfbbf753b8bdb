//! [`ClusterApi`] backed by `kube-client`.

use std::{collections::HashMap, fmt, sync::Arc};

use futures::{future::BoxFuture, FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kube_client::{
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use kube_core::{
    params::ListParams, ApiResource, DynamicObject, ErrorResponse, GroupVersionKind, WatchEvent,
};
use serde_json::Value;
use tokio::sync::OnceCell;

use super::{
    ClusterApi, Connector, EventStream, MetricsClient, MetricsError, NodeUsage, Phase, RawEvent,
    StreamClient, StreamError, WatchRequest, GONE,
};
use crate::{quantity, ClusterId, Credentials};

/// Creates a [`KubeCluster`] per watch group.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

impl Connector for KubeConnector {
    fn connect(&self, cluster: &ClusterId, credentials: &Credentials) -> Arc<dyn ClusterApi> {
        Arc::new(KubeCluster::new(cluster.clone(), credentials.clone()))
    }
}

/// A lazily connected cluster client.
///
/// The `kube_client::Client` is built on first use; if that fails the next
/// watch attempt tries again.
#[derive(Clone)]
pub struct KubeCluster {
    inner: Arc<Inner>,
}

struct Inner {
    cluster: ClusterId,
    credentials: Credentials,
    client: OnceCell<Client>,
}

impl KubeCluster {
    pub fn new(cluster: ClusterId, credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(Inner {
                cluster,
                credentials,
                client: OnceCell::new(),
            }),
        }
    }

    /// Uses an already configured client.
    pub fn with_client(cluster: ClusterId, client: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                cluster,
                credentials: Credentials::Infer,
                client: OnceCell::new_with(Some(client)),
            }),
        }
    }
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster")
            .field("cluster", &self.inner.cluster)
            .field("credentials", &self.inner.credentials)
            .field("connected", &self.inner.client.initialized())
            .finish()
    }
}

impl Inner {
    async fn client(&self) -> Result<Client, StreamError> {
        self.client
            .get_or_try_init(|| build_client(&self.credentials))
            .await
            .cloned()
    }
}

fn connect_error(err: impl fmt::Display) -> StreamError {
    StreamError::Connect(err.to_string())
}

async fn build_client(credentials: &Credentials) -> Result<Client, StreamError> {
    let config = match credentials {
        Credentials::Infer => Config::infer().await.map_err(connect_error)?,
        Credentials::InCluster => Config::incluster().map_err(connect_error)?,
        Credentials::Kubeconfig { yaml, context } => {
            let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(connect_error)?;
            let options = KubeConfigOptions {
                context: context.clone(),
                ..KubeConfigOptions::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(connect_error)?
        }
    };
    Client::try_from(config).map_err(connect_error)
}

impl From<ErrorResponse> for StreamError {
    fn from(err: ErrorResponse) -> Self {
        if err.code == GONE {
            StreamError::Gone
        } else {
            StreamError::Api {
                code: err.code,
                message: err.message,
            }
        }
    }
}

impl From<kube_client::Error> for StreamError {
    fn from(err: kube_client::Error) -> Self {
        match err {
            kube_client::Error::Api(response) => response.into(),
            kube_client::Error::SerdeError(err) => StreamError::Decode(err.to_string()),
            other => StreamError::Transport(other.to_string()),
        }
    }
}

fn raw_event(phase: Phase, object: DynamicObject) -> RawEvent {
    let resource_version = object.metadata.resource_version.clone();
    RawEvent {
        phase,
        // an unserializable object cannot be mapped either; the watch drops it
        object: serde_json::to_value(object).unwrap_or(Value::Null),
        resource_version,
    }
}

fn translate(event: WatchEvent<DynamicObject>) -> Result<RawEvent, StreamError> {
    match event {
        WatchEvent::Added(object) => Ok(raw_event(Phase::Added, object)),
        WatchEvent::Modified(object) => Ok(raw_event(Phase::Modified, object)),
        WatchEvent::Deleted(object) => Ok(raw_event(Phase::Deleted, object)),
        WatchEvent::Bookmark(bookmark) => Ok(RawEvent::bookmark(bookmark.metadata.resource_version)),
        WatchEvent::Error(err) => Err(err.into()),
    }
}

impl StreamClient for KubeCluster {
    fn watch(&self, request: WatchRequest) -> BoxFuture<'static, Result<EventStream, StreamError>> {
        let inner = Arc::clone(&self.inner);
        async move {
            let client = inner.client().await?;
            let resource = request.target.kind.api_resource();
            let api: Api<DynamicObject> = match &request.target.namespace {
                Some(ns) => Api::namespaced_with(client, ns, &resource),
                None => Api::all_with(client, &resource),
            };
            let version = request.resource_version.unwrap_or_default();
            log::debug!(
                "Opening watch on {} {} at resource version {version:?}",
                inner.cluster,
                request.target.path()
            );

            let stream = api.watch(&request.params, &version).await?;
            Ok(stream
                .map(|item| item.map_err(StreamError::from).and_then(translate))
                .boxed())
        }
        .boxed()
    }
}

fn node_metrics_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics"),
        "nodes",
    )
}

fn unavailable(err: impl fmt::Display) -> MetricsError {
    MetricsError::Unavailable(err.to_string())
}

async fn fetch_node_usage(inner: &Inner) -> Result<Vec<NodeUsage>, MetricsError> {
    let client = inner.client().await.map_err(unavailable)?;
    let params = ListParams::default();

    let metrics = Api::<DynamicObject>::all_with(client.clone(), &node_metrics_resource())
        .list(&params)
        .await
        .map_err(unavailable)?;
    let nodes = Api::<Node>::all(client)
        .list(&params)
        .await
        .map_err(unavailable)?;

    let capacity: HashMap<String, (u64, u64)> = nodes
        .items
        .iter()
        .filter_map(|node| {
            let name = node.metadata.name.clone()?;
            let capacity = node.status.as_ref()?.capacity.as_ref()?;
            let cpu = capacity.get("cpu").and_then(|q| quantity::cpu_millis(&q.0))?;
            let memory = capacity.get("memory").and_then(|q| quantity::bytes(&q.0))?;
            Some((name, (cpu, memory)))
        })
        .collect();

    Ok(metrics
        .items
        .iter()
        .filter_map(|sample| {
            let name = sample.metadata.name.clone()?;
            let usage = sample.data.get("usage")?;
            let (cpu_capacity_millis, memory_capacity_bytes) = *capacity.get(&name)?;
            Some(NodeUsage {
                cpu_used_millis: usage
                    .get("cpu")
                    .and_then(Value::as_str)
                    .and_then(quantity::cpu_millis)?,
                memory_used_bytes: usage
                    .get("memory")
                    .and_then(Value::as_str)
                    .and_then(quantity::bytes)?,
                name,
                cpu_capacity_millis,
                memory_capacity_bytes,
            })
        })
        .collect())
}

impl MetricsClient for KubeCluster {
    fn node_usage(&self) -> BoxFuture<'static, Result<Vec<NodeUsage>, MetricsError>> {
        let inner = Arc::clone(&self.inner);
        async move { fetch_node_usage(&inner).await }.boxed()
    }
}
