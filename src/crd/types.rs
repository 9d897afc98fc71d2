//! Supporting types shared by the project CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Prefix the provider uses for billing account resource names
pub const BILLING_ACCOUNT_PREFIX: &str = "billingAccounts/";

/// Kind of remote resource a project is parented under
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParentType {
    /// An organization node
    #[default]
    Organization,
    /// A folder inside an organization
    Folder,
    /// Another project
    Project,
}

impl ParentType {
    /// Wire representation used by the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Folder => "folder",
            Self::Project => "project",
        }
    }
}

impl std::fmt::Display for ParentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "organization" => Ok(Self::Organization),
            "folder" => Ok(Self::Folder),
            "project" => Ok(Self::Project),
            _ => Err(Error::validation(format!(
                "invalid parent type: {s}, expected one of: organization, folder, project"
            ))),
        }
    }
}

/// Reference to a GcpCredentials resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CredentialRef {
    /// Namespace of the credential; defaults to the referencing resource's namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Name of the credential
    pub name: String,
}

/// Observable reconciliation status of a project resource
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReconciliationStatus {
    /// Never reconciled
    #[default]
    Unknown,
    /// Remote changes are in flight
    Pending,
    /// Remote state matches the desired state
    Success,
    /// Reconciliation failed with an error that needs a spec change
    Failed,
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Pending => write!(f, "Pending"),
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status sub-resource shared by GcpProject and GcpAdminProject
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    /// Current reconciliation status
    #[serde(default)]
    pub status: ReconciliationStatus,

    /// Human-readable detail, set on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// True once the one-time dependent provisioning chain has completed
    #[serde(default)]
    pub dependents_provisioned: bool,

    /// When the status was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
}

impl ProjectStatus {
    /// Create a status with the given value
    pub fn with_status(status: ReconciliationStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Set the dependent chain flag and return self for chaining
    pub fn dependents_provisioned(mut self, done: bool) -> Self {
        self.dependents_provisioned = done;
        self
    }

    /// Stamp the write time and return self for chaining
    pub fn stamped(mut self) -> Self {
        self.last_reconciled = Some(Utc::now());
        self
    }
}

/// Normalize a billing account id into the provider's `billingAccounts/<id>` form
///
/// Accepts either the bare id or an already-prefixed resource name.
pub fn billing_account_resource(id: &str) -> String {
    let id = id.trim();
    if id.starts_with(BILLING_ACCOUNT_PREFIX) {
        id.to_string()
    } else {
        format!("{BILLING_ACCOUNT_PREFIX}{id}")
    }
}

/// Validate a provider project id
///
/// 6 to 30 characters of lowercase letters, digits and hyphens, starting
/// with a letter and not ending with a hyphen.
pub fn validate_project_id(id: &str) -> Result<(), String> {
    if !(6..=30).contains(&id.len()) {
        return Err(format!("project id '{id}' must be 6 to 30 characters"));
    }
    if !id.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(format!("project id '{id}' must start with a lowercase letter"));
    }
    if id.ends_with('-') {
        return Err(format!("project id '{id}' must not end with a hyphen"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "project id '{id}' may only contain lowercase letters, digits and hyphens"
        ));
    }
    Ok(())
}

/// Validate a project display name
pub fn validate_project_name(name: &str) -> Result<(), String> {
    if !(4..=30).contains(&name.chars().count()) {
        return Err(format!("project name '{name}' must be 4 to 30 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '\'' | '"' | '!'))
    {
        return Err(format!("project name '{name}' contains invalid characters"));
    }
    Ok(())
}

/// Validate a service account id (the part before `@`)
pub fn validate_service_account_name(name: &str) -> Result<(), String> {
    if !(6..=30).contains(&name.len()) {
        return Err(format!(
            "service account name '{name}' must be 6 to 30 characters"
        ));
    }
    let valid = name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(format!(
            "service account name '{name}' must match [a-z][a-z0-9-]*[a-z0-9]"
        ));
    }
    Ok(())
}
