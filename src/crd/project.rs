//! GCPProject Custom Resource Definition
//!
//! A child project provisioned under an organization, folder or project,
//! with its own service account whose key is published as a GCPCredentials
//! resource once the project is created.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::managed::{resolve_credential, DesiredProject, ManagedProject, ResourceKind};
use super::types::{CredentialRef, ParentType, ProjectStatus};

/// Desired state of a GCPProject
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gcp.hub.appvia.io",
    version = "v1alpha1",
    kind = "GCPProject",
    root = "GcpProject",
    plural = "gcpprojects",
    shortname = "gcpp",
    status = "ProjectStatus",
    namespaced,
    printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.projectId"}"#,
    printcolumn = r#"{"name":"Parent","type":"string","jsonPath":".spec.parentId"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GcpProjectSpec {
    /// Remote project id, immutable once created
    pub project_id: String,

    /// Display name
    pub project_name: String,

    /// Type of the parent resource
    #[serde(default)]
    pub parent_type: ParentType,

    /// Id of the parent resource
    pub parent_id: String,

    /// Billing account, bare (`012345-ABCDEF`) or as `billingAccounts/<id>`
    #[serde(alias = "billingAccountName")]
    pub billing_account_id: String,

    /// Service account created inside the project
    pub service_account_name: String,

    /// Credential used to talk to the provider
    #[serde(alias = "use")]
    pub credential_ref: CredentialRef,
}

impl ManagedProject for GcpProject {
    const KIND: ResourceKind = ResourceKind::Project;

    fn desired_in(&self, namespace: &str) -> DesiredProject {
        DesiredProject {
            project_id: self.spec.project_id.trim().to_string(),
            project_name: self.spec.project_name.clone(),
            parent_type: self.spec.parent_type,
            parent_id: self.spec.parent_id.trim().to_string(),
            billing_account_id: self.spec.billing_account_id.trim().to_string(),
            service_account_name: Some(self.spec.service_account_name.trim().to_string()),
            credential: resolve_credential(&self.spec.credential_ref, namespace),
        }
    }

    fn project_status(&self) -> Option<&ProjectStatus> {
        self.status.as_ref()
    }
}
