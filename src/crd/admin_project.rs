//! GCPAdminProject Custom Resource Definition
//!
//! The admin project is bootstrapped with an operator-seeded credential and
//! only has its APIs enabled after creation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::managed::{resolve_credential, DesiredProject, ManagedProject, ResourceKind};
use super::types::{CredentialRef, ParentType, ProjectStatus};

/// Desired state of a GCPAdminProject
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gcp.hub.appvia.io",
    version = "v1alpha1",
    kind = "GCPAdminProject",
    root = "GcpAdminProject",
    plural = "gcpadminprojects",
    shortname = "gcpap",
    status = "ProjectStatus",
    namespaced,
    printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.projectId"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GcpAdminProjectSpec {
    /// Remote project id, immutable once created
    pub project_id: String,

    /// Display name
    pub project_name: String,

    /// Type of the parent resource
    #[serde(default)]
    pub parent_type: ParentType,

    /// Id of the parent resource
    pub parent_id: String,

    /// Billing account, bare or as `billingAccounts/<id>`
    #[serde(alias = "billingAccountName")]
    pub billing_account_id: String,

    /// Bootstrap credential
    #[serde(alias = "use")]
    pub credential_ref: CredentialRef,
}

impl ManagedProject for GcpAdminProject {
    const KIND: ResourceKind = ResourceKind::AdminProject;

    fn desired_in(&self, namespace: &str) -> DesiredProject {
        DesiredProject {
            project_id: self.spec.project_id.trim().to_string(),
            project_name: self.spec.project_name.clone(),
            parent_type: self.spec.parent_type,
            parent_id: self.spec.parent_id.trim().to_string(),
            billing_account_id: self.spec.billing_account_id.trim().to_string(),
            service_account_name: None,
            credential: resolve_credential(&self.spec.credential_ref, namespace),
        }
    }

    fn project_status(&self) -> Option<&ProjectStatus> {
        self.status.as_ref()
    }
}
