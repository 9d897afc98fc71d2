//! Status sub-resource writes and credential publication

use kube::api::ObjectMeta;
use tracing::{info, warn};

use super::context::KubeClient;
use crate::crd::{
    CredentialsStatus, GcpCredentials, GcpCredentialsSpec, ProjectStatus, ReconciliationStatus,
    ResourceKind,
};
use crate::scope::ResourceKey;
use crate::Error;

/// Writes the status sub-resource of one project resource
///
/// Only the status is touched; concurrent spec edits are unaffected.
pub struct StatusWriter<'a> {
    kube: &'a dyn KubeClient,
    kind: ResourceKind,
    key: &'a ResourceKey,
    generation: Option<i64>,
}

impl<'a> StatusWriter<'a> {
    /// Create a writer for the resource at `key`
    pub fn new(
        kube: &'a dyn KubeClient,
        kind: ResourceKind,
        key: &'a ResourceKey,
        generation: Option<i64>,
    ) -> Self {
        Self {
            kube,
            kind,
            key,
            generation,
        }
    }

    /// Write `status` stamped with the observed generation and time
    pub async fn set(&self, status: ProjectStatus) -> Result<(), Error> {
        let status = status.observed_generation(self.generation).stamped();
        self.kube
            .patch_project_status(self.kind, self.key, &status)
            .await?;
        info!(status = %status.status, "updated status");
        Ok(())
    }

    /// Remote changes are in flight
    pub async fn pending(&self, dependents_provisioned: bool) -> Result<(), Error> {
        self.set(
            ProjectStatus::with_status(ReconciliationStatus::Pending)
                .dependents_provisioned(dependents_provisioned),
        )
        .await
    }

    /// Remote state matches the desired state
    pub async fn success(&self, dependents_provisioned: bool) -> Result<(), Error> {
        self.set(
            ProjectStatus::with_status(ReconciliationStatus::Success)
                .dependents_provisioned(dependents_provisioned),
        )
        .await
    }

    /// Reconciliation failed with an error that needs a spec change
    pub async fn failed(&self, message: &str, dependents_provisioned: bool) -> Result<(), Error> {
        let result = self
            .set(
                ProjectStatus::with_status(ReconciliationStatus::Failed)
                    .message(message)
                    .dependents_provisioned(dependents_provisioned),
            )
            .await;
        if result.is_ok() {
            warn!(message, "marked resource Failed");
        }
        result
    }
}

/// Materializes GCPCredentials resources for downstream consumers
pub struct CredentialPublisher<'a> {
    kube: &'a dyn KubeClient,
}

impl<'a> CredentialPublisher<'a> {
    /// Create a publisher
    pub fn new(kube: &'a dyn KubeClient) -> Self {
        Self { kube }
    }

    /// Create a brand-new credential resource
    ///
    /// Fails non-retryably with `AlreadyExists` if the name is taken.
    pub async fn publish(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        project_id: &str,
        organization_id: &str,
    ) -> Result<(), Error> {
        let credentials = GcpCredentials {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: GcpCredentialsSpec {
                key: key.to_string(),
                project_id: project_id.to_string(),
                organization_id: organization_id.to_string(),
            },
            status: None,
        };

        self.kube.create_credentials(&credentials).await?;
        self.kube
            .patch_credentials_status(
                namespace,
                name,
                &CredentialsStatus {
                    verified: false,
                    status: ReconciliationStatus::Success,
                },
            )
            .await?;

        info!(namespace, name, project_id, "published credentials");
        Ok(())
    }

    /// True if a credential with this name exists
    pub async fn exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        Ok(self.kube.get_credentials(namespace, name).await?.is_some())
    }

    /// Record that a credential authenticated a provider call
    ///
    /// Only the status is written; key material is never touched.
    pub async fn mark_verified(&self, credentials: &GcpCredentials) -> Result<(), Error> {
        let already = credentials.status.as_ref().is_some_and(|s| s.verified);
        if already {
            return Ok(());
        }

        let namespace = credentials.metadata.namespace.as_deref().unwrap_or_default();
        let name = credentials.metadata.name.as_deref().unwrap_or_default();
        let status = CredentialsStatus {
            verified: true,
            status: credentials
                .status
                .as_ref()
                .map(|s| s.status)
                .unwrap_or(ReconciliationStatus::Success),
        };
        self.kube
            .patch_credentials_status(namespace, name, &status)
            .await?;
        info!(namespace, name, "credentials verified");
        Ok(())
    }
}
