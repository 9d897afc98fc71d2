//! Project reconciliation state machine
//!
//! Every invocation restarts from a live probe of the provider:
//!
//! ```text
//! Fetch -> ResolveCredential -> Probe -> {Create | Update | NoOp}
//!       -> EnableAPIs -> ProvisionIdentity/BindIAM -> SetBilling
//!       -> PublishCredential -> Success
//! ```
//!
//! Nothing is resumed from saved progress. The only remembered fact is the
//! `dependentsProvisioned` status flag, which tells a later pass whether the
//! one-time dependent chain of a project this operator created still owes
//! work after a failure.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::context::Context;
use super::status::{CredentialPublisher, StatusWriter};
use crate::crd::{
    DesiredProject, GcpAdminProject, GcpCredentials, GcpProject, ManagedProject, ParentType,
    ProjectObservation, ReconciliationStatus, ResourceKind,
};
use crate::dependents::DependentResourceProvisioner;
use crate::operation::OperationWaiter;
use crate::prober::RemoteStateProber;
use crate::provider::GcpApi;
use crate::provisioner::{billing_matches, ProjectProvisioner};
use crate::scope::{ReconcileScope, ResourceKey};
use crate::Error;

/// Drives one desired-state resource towards its remote counterpart
pub struct Reconciler {
    ctx: Arc<Context>,
}

impl Reconciler {
    /// Create a reconciler over the shared context
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run one reconcile pass for the resource at `key`
    ///
    /// A vanished resource ends the pass successfully. Retryable errors are
    /// returned without touching status; any other error marks the resource
    /// Failed before it is returned.
    #[instrument(skip(self, kind, key), fields(kind = %kind, resource = %key))]
    pub async fn reconcile(&self, kind: ResourceKind, key: &ResourceKey) -> Result<Action, Error> {
        let Some(observed) = self.ctx.kube.get_project(kind, key).await? else {
            debug!("resource no longer exists, nothing to reconcile");
            return Ok(Action::await_change());
        };

        let scope = ReconcileScope::new(kind, key, self.ctx.config.reconcile_timeout);
        let span = scope.span().clone();
        debug!(
            correlation_id = %scope.correlation_id(),
            budget_secs = scope.remaining().as_secs(),
            "starting reconcile"
        );
        let mut run = ReconcileRun::new(&self.ctx, kind, key, &scope, observed);

        match run.converge().instrument(span.clone()).await {
            Ok(()) => Ok(Action::requeue(self.ctx.config.success_requeue)),
            Err(e) if e.is_retryable() => {
                warn!(parent: &span, error = %e, "reconcile failed, will retry");
                Err(e)
            }
            Err(e) => {
                run.fail(&e).instrument(span).await;
                Err(e)
            }
        }
    }
}

/// State of a single reconcile invocation
struct ReconcileRun<'a> {
    ctx: &'a Context,
    kind: ResourceKind,
    key: &'a ResourceKey,
    scope: &'a ReconcileScope,
    observed: ProjectObservation,
    status: StatusWriter<'a>,
    dependents_done: bool,
}

impl<'a> ReconcileRun<'a> {
    fn new(
        ctx: &'a Context,
        kind: ResourceKind,
        key: &'a ResourceKey,
        scope: &'a ReconcileScope,
        observed: ProjectObservation,
    ) -> Self {
        // only the Pending(false) written before a create marks the chain owed
        let dependents_done = observed
            .status
            .as_ref()
            .map_or(true, |s| s.dependents_provisioned);
        Self {
            ctx,
            kind,
            key,
            scope,
            status: StatusWriter::new(ctx.kube.as_ref(), kind, key, observed.generation),
            observed,
            dependents_done,
        }
    }

    fn current_status(&self) -> ReconciliationStatus {
        self.observed
            .status
            .as_ref()
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// The chain is owed only by a project this operator created whose chain
    /// has not completed, which is always recorded as Pending or Failed
    fn dependents_owed(&self) -> bool {
        self.kind.plan().has_dependents()
            && !self.dependents_done
            && matches!(
                self.current_status(),
                ReconciliationStatus::Pending | ReconciliationStatus::Failed
            )
    }

    fn status_is_current(&self) -> bool {
        self.observed.status.as_ref().is_some_and(|s| {
            s.status == ReconciliationStatus::Success
                && s.observed_generation == self.observed.generation
        })
    }

    async fn converge(&mut self) -> Result<(), Error> {
        let desired = self.observed.desired.clone();
        desired.validate(&self.key.to_string())?;

        let credentials = self.resolve_credentials(&desired).await?;
        let limiter_key = format!(
            "{}/{}",
            desired.credential.namespace, desired.credential.name
        );
        let api = self
            .ctx
            .gcp
            .connect(&limiter_key, &credentials.spec.key)
            .await?;
        let api = api.as_ref();

        let exists = RemoteStateProber::new(api)
            .exists(&desired.project_id)
            .await?;
        CredentialPublisher::new(self.ctx.kube.as_ref())
            .mark_verified(&credentials)
            .await?;

        if exists {
            self.converge_existing(api, &desired, &credentials).await
        } else {
            self.create(api, &desired, &credentials).await
        }
    }

    async fn resolve_credentials(&self, desired: &DesiredProject) -> Result<GcpCredentials, Error> {
        let reference = &desired.credential;
        self.ctx
            .kube
            .get_credentials(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| Error::CredentialMissing {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
            })
    }

    async fn create(
        &mut self,
        api: &dyn GcpApi,
        desired: &DesiredProject,
        credentials: &GcpCredentials,
    ) -> Result<(), Error> {
        info!(project_id = %desired.project_id, "project does not exist, creating");

        // Pending goes first so a crash after the create call still leaves
        // the chain owed
        self.dependents_done = false;
        self.status.pending(false).await?;

        let handle = ProjectProvisioner::new(api).create(desired).await?;
        OperationWaiter::new(api, &self.ctx.config.wait)
            .wait(self.scope, handle)
            .await?;
        info!(project_id = %desired.project_id, "project created");

        self.provision_dependents(api, desired, credentials, true)
            .await?;
        self.status.success(self.dependents_done).await
    }

    async fn converge_existing(
        &mut self,
        api: &dyn GcpApi,
        desired: &DesiredProject,
        credentials: &GcpCredentials,
    ) -> Result<(), Error> {
        let prober = RemoteStateProber::new(api);
        let remote = prober.get(&desired.project_id).await?;
        let billing = prober.billing_account(&desired.project_id).await?;

        let owed = self.dependents_owed();
        if !owed {
            self.dependents_done = true;
        }

        let mut changed = false;

        if !remote.matches(desired) {
            info!(
                project_id = %desired.project_id,
                remote_name = %remote.name,
                "project attributes drifted, updating"
            );
            let handle = ProjectProvisioner::new(api).update(desired).await?;
            self.status.pending(self.dependents_done).await?;
            OperationWaiter::new(api, &self.ctx.config.wait)
                .wait(self.scope, handle)
                .await?;
            changed = true;
        }

        let billing_ok = billing_matches(&billing, desired);
        if owed {
            info!(project_id = %desired.project_id, "resuming dependent provisioning");
            self.provision_dependents(api, desired, credentials, !billing_ok)
                .await?;
            changed = true;
        } else if !billing_ok {
            info!(
                project_id = %desired.project_id,
                current = %billing,
                desired = %desired.billing_account(),
                "billing account drifted"
            );
            ProjectProvisioner::new(api).set_billing(desired).await?;
            changed = true;
        }

        if changed || !self.status_is_current() {
            self.status.success(self.dependents_done).await?;
        } else {
            debug!(project_id = %desired.project_id, "no drift detected");
        }
        Ok(())
    }

    async fn provision_dependents(
        &mut self,
        api: &dyn GcpApi,
        desired: &DesiredProject,
        credentials: &GcpCredentials,
        set_billing: bool,
    ) -> Result<(), Error> {
        let plan = self.kind.plan();
        let dependents = DependentResourceProvisioner::new(api, &self.ctx.config);
        let publisher = CredentialPublisher::new(self.ctx.kube.as_ref());
        let published_name = desired.published_credential_name();

        if plan.enable_services {
            dependents
                .enable_services(self.scope, &desired.project_id)
                .await?;
        }

        let identity = if plan.provision_identity {
            if publisher
                .exists(&self.key.namespace, &published_name)
                .await?
            {
                info!(
                    credentials = %published_name,
                    "credentials already published, skipping identity steps"
                );
                None
            } else {
                Some(dependents.provision_identity(desired).await?)
            }
        } else {
            None
        };

        if set_billing {
            ProjectProvisioner::new(api).set_billing(desired).await?;
        }

        if let Some(identity) = identity {
            publisher
                .publish(
                    &self.key.namespace,
                    &published_name,
                    &identity.key.private_key_data,
                    &desired.project_id,
                    &organization_for(desired, credentials),
                )
                .await?;
        }

        self.dependents_done = true;
        Ok(())
    }

    async fn fail(&self, error: &Error) {
        if let Err(e) = self
            .status
            .failed(&error.to_string(), self.dependents_done)
            .await
        {
            warn!(error = %e, "failed to record Failed status");
        }
    }
}

/// Organization a published credential is scoped to
fn organization_for(desired: &DesiredProject, credentials: &GcpCredentials) -> String {
    match desired.parent_type {
        ParentType::Organization => desired.parent_id.clone(),
        _ => credentials.spec.organization_id.clone(),
    }
}

async fn reconcile_resource<K: ManagedProject>(obj: &K, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ResourceKey::new(obj.namespace().unwrap_or_default(), obj.name_any());
    Reconciler::new(ctx).reconcile(K::KIND, &key).await
}

/// Reconcile a GCPProject resource
#[instrument(skip(project, ctx), fields(project = %project.name_any()))]
pub async fn reconcile_project(project: Arc<GcpProject>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_resource(project.as_ref(), ctx).await
}

/// Reconcile a GCPAdminProject resource
#[instrument(skip(project, ctx), fields(project = %project.name_any()))]
pub async fn reconcile_admin_project(
    project: Arc<GcpAdminProject>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    reconcile_resource(project.as_ref(), ctx).await
}

/// Error policy shared by both project controllers
///
/// Retryable errors requeue after the configured backoff. Anything else has
/// already been recorded as Failed and waits for the resource to change.
pub fn error_policy<K: ManagedProject>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            error = %error,
            kind = %K::KIND,
            resource = %obj.name_any(),
            "reconciliation failed, requeueing"
        );
        Action::requeue(ctx.config.error_requeue)
    } else {
        error!(
            error = %error,
            kind = %K::KIND,
            resource = %obj.name_any(),
            "reconciliation failed permanently, waiting for a spec change"
        );
        Action::await_change()
    }
}
