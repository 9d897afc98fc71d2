//! Remote provider abstraction layer
//!
//! [`GcpApi`] is the logical surface the reconciler consumes: projects,
//! operations, billing, service enablement, service accounts and IAM. The
//! production implementation is [`HttpGcpClient`]; tests substitute mocks or
//! the in-memory fake.
//!
//! A [`GcpApiFactory`] turns a credential's key material into an
//! authenticated client once per reconcile.

mod auth;
mod http;
mod throttle;
mod types;

pub use auth::{BearerSource, ServiceAccountKeyFile, CLOUD_PLATFORM_SCOPE};
pub use http::{HttpGcpClient, HttpGcpClientFactory};
pub use throttle::ProviderRateLimiter;
pub use types::{
    BillingInfo, Binding, Expr, IamResource, OperationHandle, OperationService, OperationStatus,
    Policy, RemoteProject, ResourceId, ServiceAccount, ServiceAccountKey,
};

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Logical provider operations used by the reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GcpApi: Send + Sync {
    /// List projects whose id equals `project_id`
    async fn list_projects(&self, project_id: &str) -> Result<Vec<RemoteProject>>;

    /// Fetch a project's canonical attributes
    async fn get_project(&self, project_id: &str) -> Result<RemoteProject>;

    /// Start creating a project
    async fn create_project(&self, project: &RemoteProject) -> Result<OperationHandle>;

    /// Re-submit a project's name and parent
    async fn update_project(&self, project: &RemoteProject) -> Result<OperationHandle>;

    /// Refresh an operation handle
    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationHandle>;

    /// Read a project's billing linkage
    async fn get_billing_info(&self, project_id: &str) -> Result<BillingInfo>;

    /// Link a project to `billing_account` (`billingAccounts/<id>`)
    async fn update_billing_info(
        &self,
        project_id: &str,
        billing_account: &str,
    ) -> Result<BillingInfo>;

    /// Start enabling a service API on a project
    async fn enable_service(&self, project_id: &str, service: &str) -> Result<OperationHandle>;

    /// Create a service account
    async fn create_service_account(
        &self,
        project_id: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount>;

    /// Fetch an existing service account by account id
    async fn get_service_account(&self, project_id: &str, account_id: &str)
        -> Result<ServiceAccount>;

    /// Mint a new key for a service account
    async fn create_service_account_key(
        &self,
        account: &ServiceAccount,
    ) -> Result<ServiceAccountKey>;

    /// Read the IAM policy of a resource
    async fn get_iam_policy(&self, resource: &IamResource) -> Result<Policy>;

    /// Replace the IAM policy of a resource
    async fn set_iam_policy(&self, resource: &IamResource, policy: &Policy) -> Result<Policy>;
}

/// Builds authenticated provider clients from credential key material
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GcpApiFactory: Send + Sync {
    /// Authenticate with `key`; requests are throttled under `limiter_key`
    async fn connect(&self, limiter_key: &str, key: &str) -> Result<Arc<dyn GcpApi>>;
}
