//! Cluster identity and the credentials a group connects with.

use std::fmt;

use crate::NamespaceScope;

/// Caller-chosen identifier of a cluster endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(pub String);

impl From<&str> for ClusterId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ClusterId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one watch group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub cluster: ClusterId,
    pub scope: NamespaceScope,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.scope)
    }
}

/// How to reach a cluster. Only the [`Connector`](crate::client::Connector) interprets this.
#[derive(Clone, Default)]
pub enum Credentials {
    /// Kubeconfig from the environment, falling back to in-cluster config.
    #[default]
    Infer,
    /// The service account mounted into the current pod.
    InCluster,
    /// A kubeconfig document, optionally selecting a context.
    Kubeconfig { yaml: String, context: Option<String> },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Infer => f.write_str("Infer"),
            Credentials::InCluster => f.write_str("InCluster"),
            Credentials::Kubeconfig { context, .. } => f
                .debug_struct("Kubeconfig")
                .field("yaml", &"<redacted>")
                .field("context", context)
                .finish(),
        }
    }
}
