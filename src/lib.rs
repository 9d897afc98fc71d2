//! GCP project operator - reconciles project, billing and IAM state
//!
//! The operator watches GCPProject and GCPAdminProject resources and drives
//! the cloud provider towards them: it creates or updates the remote
//! project, links billing and, for newly created projects, enables the
//! required APIs, provisions a service account with a key and IAM bindings,
//! and publishes that key as a GCPCredentials resource for other namespaces
//! to consume.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (GCPProject, GCPAdminProject, GCPCredentials)
//! - [`controller`] - Reconcile state machine, status writes and credential publication
//! - [`provider`] - Provider REST client, authentication and rate limiting
//! - [`prober`] - Read-only remote state lookups
//! - [`provisioner`] - Project create/update and billing linkage
//! - [`dependents`] - API enablement, service account, key and IAM bindings
//! - [`operation`] - Long-running operation polling
//! - [`scope`] - Per-reconcile deadline, correlation id and tracing span
//! - [`retry`] - Exponential backoff for transient failures
//! - [`config`] - Operator configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod dependents;
pub mod error;
pub mod operation;
pub mod prober;
pub mod provider;
pub mod provisioner;
pub mod retry;
pub mod scope;

#[cfg(test)]
mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Suffix appended to a project id to name its published credentials
pub const CREDENTIAL_SUFFIX: &str = "-gcpcreds";
