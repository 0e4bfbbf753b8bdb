//! Resource kinds mirrored by the hub and the scopes they are watched in.

use std::{fmt, str::FromStr};

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Event, Node, Pod},
};
use kube_core::ApiResource;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A category of cluster object the hub can mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Nodes,
    Pods,
    Deployments,
    Events,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Nodes,
        ResourceKind::Pods,
        ResourceKind::Deployments,
        ResourceKind::Events,
    ];

    /// The plural resource name used in REST paths.
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Nodes => "nodes",
            ResourceKind::Pods => "pods",
            ResourceKind::Deployments => "deployments",
            ResourceKind::Events => "events",
        }
    }

    fn api_prefix(self) -> &'static str {
        match self {
            ResourceKind::Deployments => "/apis/apps/v1",
            _ => "/api/v1",
        }
    }

    /// Whether objects of this kind live inside a namespace.
    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::Nodes)
    }

    pub fn api_resource(self) -> ApiResource {
        match self {
            ResourceKind::Nodes => ApiResource::erase::<Node>(&()),
            ResourceKind::Pods => ApiResource::erase::<Pod>(&()),
            ResourceKind::Deployments => ApiResource::erase::<Deployment>(&()),
            ResourceKind::Events => ApiResource::erase::<Event>(&()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nodes" | "node" | "no" => Ok(ResourceKind::Nodes),
            "pods" | "pod" | "po" => Ok(ResourceKind::Pods),
            "deployments" | "deployment" | "deploy" => Ok(ResourceKind::Deployments),
            "events" | "event" | "ev" => Ok(ResourceKind::Events),
            _ => Err(Error::UnknownKind(s.to_owned())),
        }
    }
}

/// Either every namespace or a single one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum NamespaceScope {
    #[default]
    All,
    Namespace(String),
}

impl NamespaceScope {
    pub fn namespace(name: impl Into<String>) -> Self {
        NamespaceScope::Namespace(name.into())
    }

    pub fn as_namespace(&self) -> Option<&str> {
        match self {
            NamespaceScope::All => None,
            NamespaceScope::Namespace(ns) => Some(ns),
        }
    }
}

impl From<Option<String>> for NamespaceScope {
    fn from(value: Option<String>) -> Self {
        value.map_or(NamespaceScope::All, NamespaceScope::Namespace)
    }
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceScope::All => f.write_str("*"),
            NamespaceScope::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// The collection a single watch stream is opened against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    pub kind: ResourceKind,
    /// `None` for cluster-wide collections.
    pub namespace: Option<String>,
}

impl WatchTarget {
    /// Cluster-scoped kinds ignore the namespace scope.
    pub fn new(kind: ResourceKind, scope: &NamespaceScope) -> Self {
        let namespace = if kind.is_namespaced() {
            scope.as_namespace().map(str::to_owned)
        } else {
            None
        };
        Self { kind, namespace }
    }

    /// The REST collection path, e.g. `/api/v1/namespaces/default/pods`.
    pub fn path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!(
                "{}/namespaces/{ns}/{}",
                self.kind.api_prefix(),
                self.kind.plural()
            ),
            None => format!("{}/{}", self.kind.api_prefix(), self.kind.plural()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_scope() {
        let ns = NamespaceScope::namespace("default");
        assert_eq!(
            WatchTarget::new(ResourceKind::Pods, &ns).path(),
            "/api/v1/namespaces/default/pods"
        );
        assert_eq!(
            WatchTarget::new(ResourceKind::Deployments, &NamespaceScope::All).path(),
            "/apis/apps/v1/deployments"
        );
        assert_eq!(
            WatchTarget::new(ResourceKind::Events, &ns).path(),
            "/api/v1/namespaces/default/events"
        );
    }

    #[test]
    fn nodes_are_always_cluster_scoped() {
        let target = WatchTarget::new(ResourceKind::Nodes, &NamespaceScope::namespace("kube-system"));
        assert_eq!(target.namespace, None);
        assert_eq!(target.path(), "/api/v1/nodes");
    }

    #[test]
    fn parse_kinds() {
        assert_eq!("Pod".parse::<ResourceKind>().unwrap(), ResourceKind::Pods);
        assert_eq!("deploy".parse::<ResourceKind>().unwrap(), ResourceKind::Deployments);
        assert!(matches!(
            "ingresses".parse::<ResourceKind>(),
            Err(Error::UnknownKind(kind)) if kind == "ingresses"
        ));
    }

    #[test]
    fn api_resource_matches_kind() {
        let ar = ResourceKind::Deployments.api_resource();
        assert_eq!(ar.group, "apps");
        assert_eq!(ar.plural, "deployments");
    }
}
