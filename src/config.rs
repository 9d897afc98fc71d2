//! Operator configuration
//!
//! Populated from command-line flags (with environment fallbacks) in the
//! binary. `Default` matches the documented flag defaults so tests and
//! library users get the same behavior without going through clap.

use std::time::Duration;

use crate::retry::RetryConfig;

/// Default role granted to a child project's service account on its project
pub const DEFAULT_PROJECT_ROLE: &str = "roles/owner";

/// Organization-level roles granted when organization grants are enabled
pub const ORGANIZATION_ROLES: &[&str] = &[
    "roles/billing.user",
    "roles/resourcemanager.projectCreator",
];

/// Provider APIs enabled on every newly created project
pub const REQUIRED_SERVICES: &[&str] = &[
    "cloudresourcemanager.googleapis.com",
    "cloudbilling.googleapis.com",
    "iam.googleapis.com",
    "compute.googleapis.com",
    "serviceusage.googleapis.com",
];

/// Base URLs of the provider REST services
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Cloud Resource Manager
    pub resource_manager: String,
    /// Cloud Billing
    pub billing: String,
    /// Service Usage
    pub service_usage: String,
    /// IAM (service accounts and keys)
    pub iam: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            resource_manager: "https://cloudresourcemanager.googleapis.com".to_string(),
            billing: "https://cloudbilling.googleapis.com".to_string(),
            service_usage: "https://serviceusage.googleapis.com".to_string(),
            iam: "https://iam.googleapis.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Point every service at one base URL (used with a local mock server)
    pub fn single(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            resource_manager: base.clone(),
            billing: base.clone(),
            service_usage: base.clone(),
            iam: base,
        }
    }
}

/// Operation polling parameters
#[derive(Clone, Debug)]
pub struct WaitConfig {
    /// First poll delay
    pub initial_interval: Duration,
    /// Upper bound on the poll delay
    pub max_interval: Duration,
    /// Growth factor applied after every poll that is not done
    pub multiplier: f64,
    /// Give up on a single operation after this long
    pub timeout: Duration,
    /// Retry policy for transport errors on an individual poll
    pub poll_retry: RetryConfig,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 1.5,
            timeout: Duration::from_secs(300),
            poll_retry: RetryConfig::with_max_attempts(3),
        }
    }
}

/// Full operator configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Provider endpoints
    pub endpoints: ProviderEndpoints,
    /// Operation polling
    pub wait: WaitConfig,
    /// Deadline attached to each reconcile invocation
    pub reconcile_timeout: Duration,
    /// Requeue interval after a successful reconcile (drift re-check)
    pub success_requeue: Duration,
    /// Requeue interval after a retryable failure
    pub error_requeue: Duration,
    /// Provider requests per second per credential
    pub rate_limit_per_second: u32,
    /// Token bucket burst size per credential
    pub rate_limit_burst: u32,
    /// Role granted to a child project's service account
    pub project_role: String,
    /// Grant organization-level billing/project-creator roles
    pub grant_organization_roles: bool,
    /// Field manager used for status patches
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            endpoints: ProviderEndpoints::default(),
            wait: WaitConfig::default(),
            reconcile_timeout: Duration::from_secs(600),
            success_requeue: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            project_role: DEFAULT_PROJECT_ROLE.to_string(),
            grant_organization_roles: false,
            field_manager: "gcp-project-operator".to_string(),
        }
    }
}
