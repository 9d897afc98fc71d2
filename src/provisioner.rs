//! Project create/update and billing linkage

use tracing::info;

use crate::crd::DesiredProject;
use crate::provider::{GcpApi, OperationHandle, RemoteProject};
use crate::Result;

/// Issues mutating calls for the project resource itself
pub struct ProjectProvisioner<'a> {
    api: &'a dyn GcpApi,
}

impl<'a> ProjectProvisioner<'a> {
    /// Create a provisioner writing through `api`
    pub fn new(api: &'a dyn GcpApi) -> Self {
        Self { api }
    }

    /// Start creating the project
    pub async fn create(&self, desired: &DesiredProject) -> Result<OperationHandle> {
        info!(
            project_id = %desired.project_id,
            parent_type = %desired.parent_type,
            parent_id = %desired.parent_id,
            "creating project"
        );
        self.api
            .create_project(&RemoteProject::from_desired(desired))
            .await
    }

    /// Re-submit the whole project with the desired name and parent
    pub async fn update(&self, desired: &DesiredProject) -> Result<OperationHandle> {
        info!(project_id = %desired.project_id, "updating project attributes");
        self.api
            .update_project(&RemoteProject::from_desired(desired))
            .await
    }

    /// Link the project to the desired billing account
    pub async fn set_billing(&self, desired: &DesiredProject) -> Result<()> {
        let account = desired.billing_account();
        info!(project_id = %desired.project_id, billing_account = %account, "linking billing account");
        self.api
            .update_billing_info(&desired.project_id, &account)
            .await?;
        Ok(())
    }
}

/// True if the linked account equals the desired one in canonical form
pub fn billing_matches(current: &str, desired: &DesiredProject) -> bool {
    current == desired.billing_account()
}
