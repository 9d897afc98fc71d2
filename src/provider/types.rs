//! Provider resource models
//!
//! Field names follow the provider's JSON wire format (camelCase). Only the
//! fields the operator reads or writes are modelled.

use serde::{Deserialize, Serialize};

use crate::crd::DesiredProject;

/// Typed parent reference as carried by a project
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceId {
    /// `organization`, `folder` or `project`
    #[serde(rename = "type")]
    pub type_: String,
    /// Parent id
    pub id: String,
}

/// A project as returned by the resource manager
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProject {
    /// Project id
    pub project_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Parent resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ResourceId>,
    /// Lifecycle state (`ACTIVE`, `DELETE_REQUESTED`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_state: Option<String>,
    /// Numeric project number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_number: Option<String>,
}

impl RemoteProject {
    /// Body submitted on create or update for the desired state
    pub fn from_desired(desired: &DesiredProject) -> Self {
        Self {
            project_id: desired.project_id.clone(),
            name: desired.project_name.clone(),
            parent: Some(ResourceId {
                type_: desired.parent_type.as_str().to_string(),
                id: desired.parent_id.clone(),
            }),
            lifecycle_state: None,
            project_number: None,
        }
    }

    /// True when name and parent exactly equal the desired values
    pub fn matches(&self, desired: &DesiredProject) -> bool {
        self.name == desired.project_name
            && self.parent.as_ref().is_some_and(|p| {
                p.type_ == desired.parent_type.as_str() && p.id == desired.parent_id
            })
    }
}

/// Service that issued an operation, which decides where it is polled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationService {
    /// Resource manager (project create/update)
    ResourceManager,
    /// Service usage (API enablement)
    ServiceUsage,
}

/// `google.rpc.Status` carried by a failed operation
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct OperationStatus {
    /// RPC status code
    #[serde(default)]
    pub code: i32,
    /// Error detail
    #[serde(default)]
    pub message: String,
}

impl OperationStatus {
    /// DEADLINE_EXCEEDED, ABORTED, INTERNAL and UNAVAILABLE may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self.code, 4 | 10 | 13 | 14)
    }
}

/// Handle to a long-running provider operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationHandle {
    /// Provider-assigned operation name (e.g. `operations/cp.123`)
    pub name: String,
    /// Service the operation belongs to
    pub service: OperationService,
    /// True once the operation finished
    pub done: bool,
    /// Failure detail if the operation finished with an error
    pub error: Option<OperationStatus>,
}

impl OperationHandle {
    /// A handle for work the provider completed synchronously
    pub fn completed(name: impl Into<String>, service: OperationService) -> Self {
        Self {
            name: name.into(),
            service,
            done: true,
            error: None,
        }
    }
}

/// Billing linkage of a project
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    /// `projects/<id>/billingInfo`
    #[serde(default)]
    pub name: String,
    /// Project id
    #[serde(default)]
    pub project_id: String,
    /// `billingAccounts/<id>`, empty when billing is detached
    #[serde(default)]
    pub billing_account_name: String,
    /// Whether billing is enabled
    #[serde(default)]
    pub billing_enabled: bool,
}

/// A service account
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// `projects/<project>/serviceAccounts/<email>`
    pub name: String,
    /// Account email
    pub email: String,
    /// Owning project
    #[serde(default)]
    pub project_id: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
}

/// A minted service account key
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKey {
    /// Key resource name
    pub name: String,
    /// Base64 encoded JSON key file
    #[serde(default)]
    pub private_key_data: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("name", &self.name)
            .field("private_key_data", &"<redacted>")
            .finish()
    }
}

/// Conditional expression on an IAM binding
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Expr {
    /// CEL expression
    pub expression: String,
    /// Short title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A role granted to a set of members
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Binding {
    /// Role name (e.g. `roles/owner`)
    pub role: String,
    /// Principals (e.g. `serviceAccount:x@y.iam.gserviceaccount.com`)
    #[serde(default)]
    pub members: Vec<String>,
    /// Optional condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
}

/// An IAM policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Policy {
    /// Policy schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    /// Role bindings
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Concurrency token echoed back on write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Resource an IAM policy is attached to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IamResource {
    /// A project by id
    Project(String),
    /// An organization by numeric id
    Organization(String),
}

impl IamResource {
    /// Resource path (`projects/<id>` or `organizations/<id>`)
    pub fn path(&self) -> String {
        match self {
            Self::Project(id) => format!("projects/{id}"),
            Self::Organization(id) => {
                let id = id.strip_prefix("organizations/").unwrap_or(id);
                format!("organizations/{id}")
            }
        }
    }
}
