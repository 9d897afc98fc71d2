//! In-memory provider and cluster fakes for multi-pass reconcile tests
//!
//! Mocks pin down single calls; these fakes keep state between reconciles so
//! convergence and resumption can be observed across several passes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::controller::KubeClient;
use crate::crd::{
    CredentialsStatus, GcpCredentials, GcpCredentialsSpec, ProjectObservation, ProjectStatus,
    ResourceKind,
};
use crate::provider::{
    BillingInfo, GcpApi, GcpApiFactory, IamResource, OperationHandle, OperationService, Policy,
    RemoteProject, ServiceAccount, ServiceAccountKey,
};
use crate::scope::ResourceKey;
use crate::{Error, Result};

/// Calls that change remote state
const MUTATING: &[&str] = &[
    "create_project",
    "update_project",
    "update_billing_info",
    "enable_service",
    "create_service_account",
    "create_service_account_key",
    "set_iam_policy",
];

#[derive(Default)]
struct GcpState {
    projects: BTreeMap<String, RemoteProject>,
    billing: BTreeMap<String, String>,
    enabled: BTreeMap<String, BTreeSet<String>>,
    accounts: BTreeMap<String, ServiceAccount>,
    policies: BTreeMap<String, Policy>,
    pending_operations: BTreeMap<String, u32>,
    keys_minted: u32,
    operation_seq: u32,
    calls: Vec<String>,
    enable_failures: Option<(usize, u32)>,
}

/// Stateful in-memory provider
#[derive(Default)]
pub struct FakeGcp {
    state: Mutex<GcpState>,
}

impl FakeGcp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed an existing project with its billing account
    pub fn with_project(self: Arc<Self>, project: RemoteProject, billing: &str) -> Arc<Self> {
        {
            let mut state = self.state.lock().unwrap();
            state
                .billing
                .insert(project.project_id.clone(), billing.to_string());
            state.projects.insert(project.project_id.clone(), project);
        }
        self
    }

    /// Fail the next `times` enable calls once `succeed_first` calls have succeeded
    pub fn fail_enable_after(&self, succeed_first: usize, times: u32) {
        self.state.lock().unwrap().enable_failures = Some((succeed_first, times));
    }

    pub fn project(&self, project_id: &str) -> Option<RemoteProject> {
        self.state.lock().unwrap().projects.get(project_id).cloned()
    }

    pub fn billing_account(&self, project_id: &str) -> Option<String> {
        self.state.lock().unwrap().billing.get(project_id).cloned()
    }

    pub fn enabled_services(&self, project_id: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .enabled
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn policy(&self, resource: &IamResource) -> Policy {
        self.state
            .lock()
            .unwrap()
            .policies
            .get(&resource.path())
            .cloned()
            .unwrap_or_default()
    }

    pub fn keys_minted(&self) -> u32 {
        self.state.lock().unwrap().keys_minted
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| MUTATING.contains(&c.as_str()))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: &str) -> std::sync::MutexGuard<'_, GcpState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        state
    }
}

fn next_operation(state: &mut GcpState, service: OperationService, polls: u32) -> OperationHandle {
    state.operation_seq += 1;
    let name = format!("operations/fake.{}", state.operation_seq);
    if polls == 0 {
        return OperationHandle::completed(name, service);
    }
    state.pending_operations.insert(name.clone(), polls);
    OperationHandle {
        name,
        service,
        done: false,
        error: None,
    }
}

#[async_trait]
impl GcpApi for FakeGcp {
    async fn list_projects(&self, project_id: &str) -> Result<Vec<RemoteProject>> {
        let state = self.record("list_projects");
        Ok(state.projects.get(project_id).cloned().into_iter().collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<RemoteProject> {
        let state = self.record("get_project");
        state
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                resource: format!("projects/{project_id}"),
            })
    }

    async fn create_project(&self, project: &RemoteProject) -> Result<OperationHandle> {
        let mut state = self.record("create_project");
        if state.projects.contains_key(&project.project_id) {
            return Err(Error::AlreadyExists {
                resource: format!("projects/{}", project.project_id),
            });
        }
        let mut created = project.clone();
        created.lifecycle_state = Some("ACTIVE".to_string());
        state.projects.insert(project.project_id.clone(), created);
        Ok(next_operation(&mut state, OperationService::ResourceManager, 1))
    }

    async fn update_project(&self, project: &RemoteProject) -> Result<OperationHandle> {
        let mut state = self.record("update_project");
        let existing = state
            .projects
            .get_mut(&project.project_id)
            .ok_or_else(|| Error::NotFound {
                resource: format!("projects/{}", project.project_id),
            })?;
        existing.name = project.name.clone();
        existing.parent = project.parent.clone();
        Ok(OperationHandle::completed(
            format!("projects/{}", project.project_id),
            OperationService::ResourceManager,
        ))
    }

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationHandle> {
        let mut state = self.record("get_operation");
        let remaining = state.pending_operations.entry(handle.name.clone()).or_insert(0);
        *remaining = remaining.saturating_sub(1);
        Ok(OperationHandle {
            done: *remaining == 0,
            ..handle.clone()
        })
    }

    async fn get_billing_info(&self, project_id: &str) -> Result<BillingInfo> {
        let state = self.record("get_billing_info");
        let account = state.billing.get(project_id).cloned().unwrap_or_default();
        Ok(BillingInfo {
            name: format!("projects/{project_id}/billingInfo"),
            project_id: project_id.to_string(),
            billing_enabled: !account.is_empty(),
            billing_account_name: account,
        })
    }

    async fn update_billing_info(
        &self,
        project_id: &str,
        billing_account: &str,
    ) -> Result<BillingInfo> {
        let mut state = self.record("update_billing_info");
        state
            .billing
            .insert(project_id.to_string(), billing_account.to_string());
        Ok(BillingInfo {
            name: format!("projects/{project_id}/billingInfo"),
            project_id: project_id.to_string(),
            billing_account_name: billing_account.to_string(),
            billing_enabled: true,
        })
    }

    async fn enable_service(&self, project_id: &str, service: &str) -> Result<OperationHandle> {
        let mut state = self.record("enable_service");
        if let Some((succeed_first, times)) = state.enable_failures {
            let attempted = state.calls.iter().filter(|c| *c == "enable_service").count();
            if attempted > succeed_first && times > 0 {
                state.enable_failures = Some((succeed_first, times - 1));
                return Err(Error::provider_transient("EnableService", "backend unavailable"));
            }
        }
        state
            .enabled
            .entry(project_id.to_string())
            .or_default()
            .insert(service.to_string());
        Ok(next_operation(&mut state, OperationService::ServiceUsage, 1))
    }

    async fn create_service_account(
        &self,
        project_id: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        let mut state = self.record("create_service_account");
        let id = format!("{project_id}/{account_id}");
        if state.accounts.contains_key(&id) {
            return Err(Error::AlreadyExists { resource: id });
        }
        let email = format!("{account_id}@{project_id}.iam.gserviceaccount.com");
        let account = ServiceAccount {
            name: format!("projects/{project_id}/serviceAccounts/{email}"),
            email,
            project_id: project_id.to_string(),
            display_name: display_name.to_string(),
        };
        state.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_service_account(
        &self,
        project_id: &str,
        account_id: &str,
    ) -> Result<ServiceAccount> {
        let state = self.record("get_service_account");
        let id = format!("{project_id}/{account_id}");
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound { resource: id })
    }

    async fn create_service_account_key(
        &self,
        account: &ServiceAccount,
    ) -> Result<ServiceAccountKey> {
        let mut state = self.record("create_service_account_key");
        state.keys_minted += 1;
        Ok(ServiceAccountKey {
            name: format!("{}/keys/{}", account.name, state.keys_minted),
            private_key_data: format!("a2V5LXt{}", state.keys_minted),
        })
    }

    async fn get_iam_policy(&self, resource: &IamResource) -> Result<Policy> {
        let state = self.record("get_iam_policy");
        Ok(state
            .policies
            .get(&resource.path())
            .cloned()
            .unwrap_or_else(|| Policy {
                version: Some(1),
                bindings: Vec::new(),
                etag: Some("etag-0".to_string()),
            }))
    }

    async fn set_iam_policy(&self, resource: &IamResource, policy: &Policy) -> Result<Policy> {
        let mut state = self.record("set_iam_policy");
        let mut stored = policy.clone();
        stored.etag = Some(format!("etag-{}", state.calls.len()));
        state.policies.insert(resource.path(), stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl GcpApiFactory for Arc<FakeGcp> {
    async fn connect(&self, _limiter_key: &str, _key: &str) -> Result<Arc<dyn GcpApi>> {
        Ok(self.clone())
    }
}

#[derive(Default)]
struct KubeState {
    projects: BTreeMap<(String, String), ProjectObservation>,
    credentials: BTreeMap<(String, String), GcpCredentials>,
    status_history: Vec<ProjectStatus>,
}

/// Stateful in-memory cluster
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<KubeState>,
}

fn slot(key: &ResourceKey) -> (String, String) {
    (key.namespace.clone(), key.name.clone())
}

impl FakeKube {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_project(&self, key: &ResourceKey, observation: ProjectObservation) {
        self.state
            .lock()
            .unwrap()
            .projects
            .insert(slot(key), observation);
    }

    pub fn put_credentials(&self, namespace: &str, name: &str, key: &str, organization_id: &str) {
        let mut credentials = GcpCredentials::new(
            name,
            GcpCredentialsSpec {
                key: key.to_string(),
                project_id: "hub-admin-1".to_string(),
                organization_id: organization_id.to_string(),
            },
        );
        credentials.metadata.namespace = Some(namespace.to_string());
        self.state
            .lock()
            .unwrap()
            .credentials
            .insert((namespace.to_string(), name.to_string()), credentials);
    }

    pub fn project_status(&self, key: &ResourceKey) -> Option<ProjectStatus> {
        self.state
            .lock()
            .unwrap()
            .projects
            .get(&slot(key))
            .and_then(|o| o.status.clone())
    }

    pub fn credentials(&self, namespace: &str, name: &str) -> Option<GcpCredentials> {
        self.state
            .lock()
            .unwrap()
            .credentials
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_history.len()
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_project(
        &self,
        _kind: ResourceKind,
        key: &ResourceKey,
    ) -> std::result::Result<Option<ProjectObservation>, Error> {
        Ok(self.state.lock().unwrap().projects.get(&slot(key)).cloned())
    }

    async fn patch_project_status(
        &self,
        _kind: ResourceKind,
        key: &ResourceKey,
        status: &ProjectStatus,
    ) -> std::result::Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.status_history.push(status.clone());
        match state.projects.get_mut(&slot(key)) {
            Some(observation) => {
                observation.status = Some(status.clone());
                Ok(())
            }
            None => Err(Error::internal_with_context("fake-kube", "status patch on missing resource")),
        }
    }

    async fn get_credentials(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<GcpCredentials>, Error> {
        Ok(self.credentials(namespace, name))
    }

    async fn create_credentials(
        &self,
        credentials: &GcpCredentials,
    ) -> std::result::Result<(), Error> {
        let namespace = credentials.metadata.namespace.clone().unwrap_or_default();
        let name = credentials.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        let slot = (namespace.clone(), name.clone());
        if state.credentials.contains_key(&slot) {
            return Err(Error::AlreadyExists {
                resource: format!("{namespace}/{name}"),
            });
        }
        state.credentials.insert(slot, credentials.clone());
        Ok(())
    }

    async fn patch_credentials_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CredentialsStatus,
    ) -> std::result::Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        match state
            .credentials
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            Some(credentials) => {
                credentials.status = Some(status.clone());
                Ok(())
            }
            None => Err(Error::internal_with_context("fake-kube", "status patch on missing credentials")),
        }
    }
}
