//! Translation of raw apiserver objects into keyed [`Record`]s.

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Event, Node, Pod},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    quantity,
    record::{
        DeploymentRecord, EventRecord, EventType, NodeRecord, PodPhase, PodRecord, QualifiedName,
        Record,
    },
    ResourceKind,
};

const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Failure to map a single object. The object is dropped; the stream carries on.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("cannot decode object: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("object has no metadata.name")]
    MissingName,
    #[error("object has no metadata.namespace")]
    MissingNamespace,
}

/// Maps a raw object of a given kind to its cache key and record.
pub trait Mapper: Send + Sync {
    fn map(&self, kind: ResourceKind, raw: &Value) -> Result<(QualifiedName, Record), MapError>;
}

/// Decodes objects through the `k8s-openapi` types.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeMapper;

impl Mapper for KubeMapper {
    fn map(&self, kind: ResourceKind, raw: &Value) -> Result<(QualifiedName, Record), MapError> {
        match kind {
            ResourceKind::Nodes => map_node(raw),
            ResourceKind::Pods => map_pod(raw),
            ResourceKind::Deployments => map_deployment(raw),
            ResourceKind::Events => map_event(raw),
        }
    }
}

fn namespace_of(key: &QualifiedName) -> Result<String, MapError> {
    key.namespace.clone().ok_or(MapError::MissingNamespace)
}

pub fn map_node(raw: &Value) -> Result<(QualifiedName, Record), MapError> {
    let node = Node::deserialize(raw)?;
    let key = QualifiedName::from_resource(&node)?;

    let roles = node
        .metadata
        .labels
        .iter()
        .flatten()
        .filter_map(|(label, _)| label.strip_prefix(ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
        .map(str::to_owned)
        .collect();

    let status = node.status.as_ref();
    let ready = status
        .and_then(|status| status.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|cond| cond.type_ == "Ready" && cond.status == "True");
    let capacity = status.and_then(|status| status.capacity.as_ref());

    let record = NodeRecord {
        name: key.name.clone(),
        ready,
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false),
        roles,
        kubelet_version: status
            .and_then(|status| status.node_info.as_ref())
            .map(|info| info.kubelet_version.clone()),
        cpu_capacity_millis: capacity
            .and_then(|cap| cap.get("cpu"))
            .and_then(|q| quantity::cpu_millis(&q.0)),
        memory_capacity_bytes: capacity
            .and_then(|cap| cap.get("memory"))
            .and_then(|q| quantity::bytes(&q.0)),
    };
    Ok((key, Record::Node(record)))
}

pub fn map_pod(raw: &Value) -> Result<(QualifiedName, Record), MapError> {
    let pod = Pod::deserialize(raw)?;
    let key = QualifiedName::from_resource(&pod)?;

    let status = pod.status.as_ref();
    let container_statuses = status
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or_default();

    let record = PodRecord {
        namespace: namespace_of(&key)?,
        name: key.name.clone(),
        phase: PodPhase::parse(status.and_then(|status| status.phase.as_deref())),
        node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        ready_containers: container_statuses.iter().filter(|c| c.ready).count() as u32,
        total_containers: pod
            .spec
            .as_ref()
            .map_or(container_statuses.len(), |spec| spec.containers.len())
            as u32,
        restarts: container_statuses
            .iter()
            .map(|c| c.restart_count.max(0) as u32)
            .sum(),
    };
    Ok((key, Record::Pod(record)))
}

pub fn map_deployment(raw: &Value) -> Result<(QualifiedName, Record), MapError> {
    let deployment = Deployment::deserialize(raw)?;
    let key = QualifiedName::from_resource(&deployment)?;

    let status = deployment.status.as_ref();
    let record = DeploymentRecord {
        namespace: namespace_of(&key)?,
        name: key.name.clone(),
        // an unset spec.replicas defaults to 1 on the apiserver
        desired_replicas: deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        updated_replicas: status.and_then(|s| s.updated_replicas).unwrap_or(0),
    };
    Ok((key, Record::Deployment(record)))
}

pub fn map_event(raw: &Value) -> Result<(QualifiedName, Record), MapError> {
    let event = Event::deserialize(raw)?;
    let key = QualifiedName::from_resource(&event)?;

    let involved = &event.involved_object;
    let involved_object = match (&involved.kind, &involved.name) {
        (Some(kind), Some(name)) => Some(format!("{kind}/{name}")),
        (None, Some(name)) => Some(name.clone()),
        _ => None,
    };

    let record = EventRecord {
        namespace: namespace_of(&key)?,
        name: key.name.clone(),
        event_type: match event.type_.as_deref() {
            Some("Warning") => EventType::Warning,
            _ => EventType::Normal,
        },
        reason: event.reason.clone(),
        message: event.message.clone(),
        involved_object,
        count: event.count.unwrap_or(1),
    };
    Ok((key, Record::Event(record)))
}
