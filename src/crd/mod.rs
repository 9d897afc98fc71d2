//! Custom Resource Definitions for the GCP project operator
//!
//! This module contains all CRD definitions used by the operator along with
//! the typed [`ManagedProject`] view the reconciler dispatches on.

mod admin_project;
mod credentials;
mod managed;
mod project;
mod types;

pub use admin_project::{GcpAdminProject, GcpAdminProjectSpec};
pub use credentials::{CredentialsStatus, GcpCredentials, GcpCredentialsSpec};
pub use managed::{
    DesiredProject, ManagedProject, ProjectObservation, ProvisioningPlan, ResourceKind,
};
pub use project::{GcpProject, GcpProjectSpec};
pub use types::{
    billing_account_resource, CredentialRef, ParentType, ProjectStatus, ReconciliationStatus,
    BILLING_ACCOUNT_PREFIX,
};
