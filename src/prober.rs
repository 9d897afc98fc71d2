//! Live remote state probes
//!
//! Nothing here is cached: the provider is the source of truth and every
//! reconcile re-reads it.

use tracing::debug;

use crate::provider::{GcpApi, RemoteProject};
use crate::Result;

/// Reads the remote project and its billing linkage
pub struct RemoteStateProber<'a> {
    api: &'a dyn GcpApi,
}

impl<'a> RemoteStateProber<'a> {
    /// Create a prober reading through `api`
    pub fn new(api: &'a dyn GcpApi) -> Self {
        Self { api }
    }

    /// True if a project with exactly this id exists
    ///
    /// Zero matches is a normal answer, not an error.
    pub async fn exists(&self, project_id: &str) -> Result<bool> {
        let projects = self.api.list_projects(project_id).await?;
        let found = projects.iter().any(|p| p.project_id == project_id);
        debug!(project_id, found, "probed project existence");
        Ok(found)
    }

    /// Canonical attributes of an existing project
    ///
    /// Fails with a retryable `NotFound` if the project vanished since the
    /// existence probe.
    pub async fn get(&self, project_id: &str) -> Result<RemoteProject> {
        self.api.get_project(project_id).await
    }

    /// Billing account currently linked (`billingAccounts/<id>`, empty if none)
    pub async fn billing_account(&self, project_id: &str) -> Result<String> {
        let info = self.api.get_billing_info(project_id).await?;
        Ok(info.billing_account_name)
    }
}
