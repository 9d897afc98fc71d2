//! Per-invocation reconcile context
//!
//! Every reconcile gets a fresh [`ReconcileScope`] carrying a correlation id
//! and an absolute deadline. Components receive the scope explicitly instead
//! of reaching for process-wide state.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info_span, Span};

use crate::crd::ResourceKind;

/// Namespaced name of a desired-state resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ResourceKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Correlation id, deadline and tracing span of one reconcile invocation
#[derive(Debug)]
pub struct ReconcileScope {
    correlation_id: String,
    deadline: Instant,
    span: Span,
}

impl ReconcileScope {
    /// Open a scope for `key` that expires after `timeout`
    pub fn new(kind: ResourceKind, key: &ResourceKey, timeout: Duration) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "reconcile_scope",
            kind = %kind,
            namespace = %key.namespace,
            name = %key.name,
            correlation_id = %correlation_id,
        );
        Self {
            correlation_id,
            deadline: Instant::now() + timeout,
            span,
        }
    }

    /// Correlation id attached to every log line of this invocation
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Absolute deadline of this invocation
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once the deadline passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Span that component work is instrumented under
    pub fn span(&self) -> &Span {
        &self.span
    }
}
