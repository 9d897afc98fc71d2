//! GCPCredentials Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ReconciliationStatus;

/// Desired state of a GCPCredentials resource
///
/// Key material is never rewritten by the operator once the resource exists.
#[derive(CustomResource, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gcp.hub.appvia.io",
    version = "v1alpha1",
    kind = "GCPCredentials",
    root = "GcpCredentials",
    plural = "gcpcredentials",
    shortname = "gcpc",
    status = "CredentialsStatus",
    namespaced,
    printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.projectId"}"#,
    printcolumn = r#"{"name":"Verified","type":"boolean","jsonPath":".status.verified"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GcpCredentialsSpec {
    /// Base64 encoded service account JSON key, or a raw bearer token
    pub key: String,

    /// Project the key was minted under
    pub project_id: String,

    /// Organization the key is scoped to
    #[serde(default)]
    pub organization_id: String,
}

impl std::fmt::Debug for GcpCredentialsSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpCredentialsSpec")
            .field("key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Status of a GCPCredentials resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsStatus {
    /// True once the key has authenticated a provider call
    #[serde(default)]
    pub verified: bool,

    /// Lifecycle status
    #[serde(default)]
    pub status: ReconciliationStatus,
}
