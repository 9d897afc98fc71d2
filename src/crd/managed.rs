//! Typed view over the desired-state project kinds
//!
//! Both project CRDs implement [`ManagedProject`], which normalizes their spec
//! into a [`DesiredProject`] and declares which dependent steps the kind runs.
//! The reconciler only ever sees these normalized types.

use std::fmt::Debug;

use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{
    billing_account_resource, validate_project_id, validate_project_name,
    validate_service_account_name, CredentialRef, ParentType, ProjectStatus,
};
use crate::{Error, CREDENTIAL_SUFFIX};

/// Tag identifying which desired-state kind a reconcile targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A child project (`GCPProject`)
    Project,
    /// The admin bootstrap project (`GCPAdminProject`)
    AdminProject,
}

impl ResourceKind {
    /// Kubernetes kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Project => "GCPProject",
            Self::AdminProject => "GCPAdminProject",
        }
    }

    /// Post-creation steps this kind runs
    pub fn plan(&self) -> ProvisioningPlan {
        match self {
            Self::Project => ProvisioningPlan {
                enable_services: true,
                provision_identity: true,
            },
            Self::AdminProject => ProvisioningPlan {
                enable_services: true,
                provision_identity: false,
            },
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Which parts of the dependent provisioning chain a kind runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvisioningPlan {
    /// Enable the fixed set of provider APIs
    pub enable_services: bool,
    /// Create a service account, mint its key, bind IAM and publish a credential
    pub provision_identity: bool,
}

impl ProvisioningPlan {
    /// True if the plan has any dependent step at all
    pub fn has_dependents(&self) -> bool {
        self.enable_services || self.provision_identity
    }
}

/// Normalized desired state of a project, independent of its CRD kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredProject {
    /// Stable remote identifier
    pub project_id: String,
    /// Display name
    pub project_name: String,
    /// Parent resource type
    pub parent_type: ParentType,
    /// Parent resource id
    pub parent_id: String,
    /// Billing account as given in the spec (bare or prefixed)
    pub billing_account_id: String,
    /// Service account to create (child projects only)
    pub service_account_name: Option<String>,
    /// Credential to authenticate with, namespace resolved
    pub credential: CredentialRef,
}

impl DesiredProject {
    /// Desired billing account in `billingAccounts/<id>` form
    pub fn billing_account(&self) -> String {
        billing_account_resource(&self.billing_account_id)
    }

    /// Name of the credential resource published for this project
    pub fn published_credential_name(&self) -> String {
        format!("{}{}", self.project_id, CREDENTIAL_SUFFIX)
    }

    /// Check field-level rules before any remote call is made
    pub fn validate(&self, resource: &str) -> Result<(), Error> {
        let field = |f: &str, msg: String| Error::validation_for_field(resource, f, msg);

        validate_project_id(&self.project_id).map_err(|m| field("spec.projectId", m))?;
        validate_project_name(&self.project_name).map_err(|m| field("spec.projectName", m))?;

        if self.parent_id.trim().is_empty() {
            return Err(field("spec.parentId", "parent id must not be empty".into()));
        }
        if self.billing_account_id.trim().is_empty() {
            return Err(field(
                "spec.billingAccountId",
                "billing account id must not be empty".into(),
            ));
        }
        if self.credential.name.trim().is_empty() {
            return Err(field(
                "spec.credentialRef.name",
                "credential reference must name a GCPCredentials resource".into(),
            ));
        }
        if let Some(sa) = &self.service_account_name {
            validate_service_account_name(sa)
                .map_err(|m| field("spec.serviceAccountName", m))?;
        }
        Ok(())
    }
}

/// A snapshot of a project resource as read from the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectObservation {
    /// Normalized desired state
    pub desired: DesiredProject,
    /// Last written status, if any
    pub status: Option<ProjectStatus>,
    /// `metadata.generation`
    pub generation: Option<i64>,
}

/// Implemented by every desired-state project kind
pub trait ManagedProject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// Kind tag used for dispatch
    const KIND: ResourceKind;

    /// Normalize the spec, resolving defaults against `namespace`
    fn desired_in(&self, namespace: &str) -> DesiredProject;

    /// Current status sub-resource
    fn project_status(&self) -> Option<&ProjectStatus>;

    /// Snapshot this resource for the reconciler
    fn observe(&self) -> ProjectObservation {
        let namespace = self.namespace().unwrap_or_default();
        ProjectObservation {
            desired: self.desired_in(&namespace),
            status: self.project_status().cloned(),
            generation: self.meta().generation,
        }
    }
}

/// Resolve an empty credential namespace to the owning resource's namespace
pub(crate) fn resolve_credential(reference: &CredentialRef, namespace: &str) -> CredentialRef {
    let ns = reference.namespace.trim();
    CredentialRef {
        namespace: if ns.is_empty() {
            namespace.to_string()
        } else {
            ns.to_string()
        },
        name: reference.name.trim().to_string(),
    }
}
