//! Flat, display-oriented records produced by the [`Mapper`](crate::Mapper).

use std::fmt;

use kube_core::Resource;
use serde::Serialize;

use crate::{mapper::MapError, ResourceKind};

/// Uniquely identifies an object of a known kind by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn from_resource<K: Resource>(resource: &K) -> Result<Self, MapError> {
        let meta = resource.meta();
        Ok(Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().ok_or(MapError::MissingName)?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Record {
    Node(NodeRecord),
    Pod(PodRecord),
    Deployment(DeploymentRecord),
    Event(EventRecord),
}

impl Record {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Record::Node(_) => ResourceKind::Nodes,
            Record::Pod(_) => ResourceKind::Pods,
            Record::Deployment(_) => ResourceKind::Deployments,
            Record::Event(_) => ResourceKind::Events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub name: String,
    pub ready: bool,
    pub unschedulable: bool,
    pub roles: Vec<String>,
    pub kubelet_version: Option<String>,
    pub cpu_capacity_millis: Option<u64>,
    pub memory_capacity_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            // the apiserver leaves phase unset until the pod is scheduled
            None => PodPhase::Pending,
            Some(_) => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    pub node_name: Option<String>,
    pub ready_containers: u32,
    pub total_containers: u32,
    pub restarts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub namespace: String,
    pub name: String,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub updated_replicas: i32,
}

impl DeploymentRecord {
    /// Every desired replica reports ready.
    pub fn is_healthy(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub namespace: String,
    pub name: String,
    pub event_type: EventType,
    pub reason: Option<String>,
    pub message: Option<String>,
    /// `Kind/name` of the object the event is about.
    pub involved_object: Option<String>,
    pub count: i32,
}
