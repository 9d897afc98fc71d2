//! Controllers for the GCP project CRDs
//!
//! GCPProject and GCPAdminProject share one reconcile state machine and
//! differ only in which dependent resources they provision.

mod context;
mod reconciler;
mod status;

pub use context::{Context, ContextBuilder, KubeClient, KubeClientImpl};
pub use reconciler::{error_policy, reconcile_admin_project, reconcile_project, Reconciler};
pub use status::{CredentialPublisher, StatusWriter};
