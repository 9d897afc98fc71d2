//! Post-creation provisioning chain
//!
//! Enables the required APIs, creates the project's service account, mints a
//! key for it and grants it IAM roles. Every step tolerates being repeated:
//! enabling an enabled API is a no-op remotely, an existing service account
//! is fetched instead of created, and IAM bindings are merged with
//! deduplication. Completed steps are never rolled back.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};

use crate::config::{OperatorConfig, ORGANIZATION_ROLES, REQUIRED_SERVICES};
use crate::crd::{DesiredProject, ParentType};
use crate::operation::OperationWaiter;
use crate::provider::{Binding, Expr, GcpApi, IamResource, Policy, ServiceAccount, ServiceAccountKey};
use crate::scope::ReconcileScope;
use crate::{Error, Result};

/// Service account and key produced by the identity steps
#[derive(Clone, Debug)]
pub struct ProvisionedIdentity {
    /// The project's service account
    pub account: ServiceAccount,
    /// Freshly minted key for the account
    pub key: ServiceAccountKey,
}

/// Runs the dependent steps against one project
pub struct DependentResourceProvisioner<'a> {
    api: &'a dyn GcpApi,
    config: &'a OperatorConfig,
    waiter: OperationWaiter<'a>,
}

impl<'a> DependentResourceProvisioner<'a> {
    /// Create a provisioner writing through `api`
    pub fn new(api: &'a dyn GcpApi, config: &'a OperatorConfig) -> Self {
        Self {
            api,
            config,
            waiter: OperationWaiter::new(api, &config.wait),
        }
    }

    /// Enable every required API, in order, waiting on each
    ///
    /// The first failure aborts the remaining services.
    pub async fn enable_services(&self, scope: &ReconcileScope, project_id: &str) -> Result<()> {
        for (index, service) in REQUIRED_SERVICES.iter().enumerate() {
            let handle = self.api.enable_service(project_id, service).await?;
            self.waiter.wait(scope, handle).await?;
            info!(
                project_id,
                service,
                step = index + 1,
                of = REQUIRED_SERVICES.len(),
                "service enabled"
            );
        }
        Ok(())
    }

    /// Create the service account, mint its key and bind its roles
    pub async fn provision_identity(&self, desired: &DesiredProject) -> Result<ProvisionedIdentity> {
        let account_id = desired.service_account_name.as_deref().ok_or_else(|| {
            Error::validation_for_field(
                desired.project_id.as_str(),
                "spec.serviceAccountName",
                "service account name is required",
            )
        })?;

        let account = self
            .ensure_service_account(&desired.project_id, account_id)
            .await?;
        let key = self.api.create_service_account_key(&account).await?;
        info!(project_id = %desired.project_id, account = %account.email, "minted service account key");

        self.bind_iam(desired, &account).await?;
        Ok(ProvisionedIdentity { account, key })
    }

    /// Create the service account, or fetch it if it already exists
    pub async fn ensure_service_account(
        &self,
        project_id: &str,
        account_id: &str,
    ) -> Result<ServiceAccount> {
        match self
            .api
            .create_service_account(project_id, account_id, account_id)
            .await
        {
            Ok(account) => {
                info!(project_id, account = %account.email, "created service account");
                Ok(account)
            }
            Err(e) if e.is_already_exists() => {
                debug!(project_id, account_id, "service account exists, reusing it");
                self.api.get_service_account(project_id, account_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Grant the account its project role and, when enabled, organization roles
    pub async fn bind_iam(&self, desired: &DesiredProject, account: &ServiceAccount) -> Result<()> {
        let member = format!("serviceAccount:{}", account.email);

        let project = IamResource::Project(desired.project_id.clone());
        self.grant(&project, &[self.config.project_role.as_str()], &member)
            .await?;

        if self.config.grant_organization_roles && desired.parent_type == ParentType::Organization
        {
            let organization = IamResource::Organization(desired.parent_id.clone());
            self.grant(&organization, ORGANIZATION_ROLES, &member).await?;
        }
        Ok(())
    }

    async fn grant(&self, resource: &IamResource, roles: &[&str], member: &str) -> Result<()> {
        let policy = self.api.get_iam_policy(resource).await?;
        let additions = roles
            .iter()
            .map(|role| Binding {
                role: role.to_string(),
                members: vec![member.to_string()],
                condition: None,
            })
            .collect();

        match merge_bindings(&policy, additions) {
            Some(updated) => {
                self.api.set_iam_policy(resource, &updated).await?;
                info!(resource = %resource.path(), member, "updated IAM policy");
            }
            None => debug!(resource = %resource.path(), member, "IAM policy already grants roles"),
        }
        Ok(())
    }
}

type BindingKey = (String, BTreeSet<String>, Option<Expr>);

fn binding_key(binding: &Binding) -> BindingKey {
    (
        binding.role.clone(),
        binding.members.iter().cloned().collect(),
        binding.condition.clone(),
    )
}

fn covered_by(existing: &Binding, candidate: &Binding) -> bool {
    existing.role == candidate.role
        && existing.condition == candidate.condition
        && candidate.members.iter().all(|m| existing.members.contains(m))
}

/// Append `additions` to a policy, deduplicating bindings
///
/// Bindings are equal when role, member set and condition match. An addition
/// whose members are all already granted the same role under the same
/// condition is dropped. Returns `None` when the policy would not change,
/// otherwise the new policy with its version and etag preserved.
pub fn merge_bindings(policy: &Policy, additions: Vec<Binding>) -> Option<Policy> {
    let mut seen: HashSet<BindingKey> = HashSet::new();
    let mut bindings: Vec<Binding> = Vec::with_capacity(policy.bindings.len() + additions.len());

    for binding in policy.bindings.iter().cloned().chain(additions) {
        if !seen.insert(binding_key(&binding)) {
            continue;
        }
        if bindings.iter().any(|existing| covered_by(existing, &binding)) {
            continue;
        }
        bindings.push(binding);
    }

    if bindings == policy.bindings {
        return None;
    }
    Some(Policy {
        version: policy.version,
        bindings,
        etag: policy.etag.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CredentialRef, ResourceKind};
    use crate::provider::{MockGcpApi, OperationHandle, OperationService};
    use crate::scope::ResourceKey;
    use mockall::predicate::eq;
    use std::time::Duration;

    const MEMBER: &str = "serviceAccount:hub-deployer@proj-1.iam.gserviceaccount.com";

    fn desired(parent_type: ParentType) -> DesiredProject {
        DesiredProject {
            project_id: "proj-1".to_string(),
            project_name: "Proj One".to_string(),
            parent_type,
            parent_id: "42".to_string(),
            billing_account_id: "012345-ABCDEF".to_string(),
            service_account_name: Some("hub-deployer".to_string()),
            credential: CredentialRef::default(),
        }
    }

    fn account() -> ServiceAccount {
        ServiceAccount {
            name: "projects/proj-1/serviceAccounts/hub-deployer@proj-1.iam.gserviceaccount.com"
                .to_string(),
            email: "hub-deployer@proj-1.iam.gserviceaccount.com".to_string(),
            project_id: "proj-1".to_string(),
            display_name: "hub-deployer".to_string(),
        }
    }

    fn owner(members: &[&str]) -> Binding {
        Binding {
            role: "roles/owner".to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            condition: None,
        }
    }

    fn scope() -> ReconcileScope {
        ReconcileScope::new(
            ResourceKind::Project,
            &ResourceKey::new("team-a", "proj"),
            Duration::from_secs(600),
        )
    }

    // =========================================================================
    // IAM merge
    // =========================================================================

    /// Story: re-granting an existing binding leaves exactly one copy of it
    #[test]
    fn story_existing_binding_is_not_duplicated() {
        let policy = Policy {
            version: Some(1),
            bindings: vec![owner(&[MEMBER])],
            etag: Some("BwX=".to_string()),
        };
        assert!(merge_bindings(&policy, vec![owner(&[MEMBER])]).is_none());
    }

    #[test]
    fn duplicates_already_in_the_policy_are_collapsed() {
        let policy = Policy {
            version: Some(1),
            bindings: vec![owner(&[MEMBER, "user:a@x.com"]), owner(&["user:a@x.com", MEMBER])],
            etag: Some("BwX=".to_string()),
        };
        let merged = merge_bindings(&policy, vec![owner(&[MEMBER])]).unwrap();
        assert_eq!(merged.bindings.len(), 1);
        assert_eq!(merged.etag.as_deref(), Some("BwX="));
    }

    #[test]
    fn member_covered_by_a_wider_binding_is_not_appended() {
        let policy = Policy {
            bindings: vec![owner(&["user:a@x.com", MEMBER])],
            ..Default::default()
        };
        assert!(merge_bindings(&policy, vec![owner(&[MEMBER])]).is_none());
    }

    #[test]
    fn conditional_bindings_are_distinct() {
        let conditional = Binding {
            condition: Some(Expr {
                expression: "request.time < timestamp(\"2030-01-01T00:00:00Z\")".to_string(),
                title: Some("expiry".to_string()),
                description: None,
            }),
            ..owner(&[MEMBER])
        };
        let policy = Policy {
            bindings: vec![conditional],
            ..Default::default()
        };
        let merged = merge_bindings(&policy, vec![owner(&[MEMBER])]).unwrap();
        assert_eq!(merged.bindings.len(), 2);
    }

    #[test]
    fn new_binding_is_appended_after_existing_ones() {
        let policy = Policy {
            version: Some(3),
            bindings: vec![owner(&["user:a@x.com"])],
            etag: Some("etag-1".to_string()),
        };
        let merged = merge_bindings(&policy, vec![owner(&[MEMBER])]).unwrap();
        assert_eq!(merged.bindings, vec![owner(&["user:a@x.com"]), owner(&[MEMBER])]);
        assert_eq!(merged.version, Some(3));
        assert_eq!(merged.etag.as_deref(), Some("etag-1"));
    }

    // =========================================================================
    // Chain steps
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn all_required_services_are_enabled_in_order() {
        let mut api = MockGcpApi::new();
        let mut seq = mockall::Sequence::new();
        for service in REQUIRED_SERVICES.iter().copied() {
            api.expect_enable_service()
                .withf(move |p, s| p == "proj-1" && s == service)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, s| {
                    Ok(OperationHandle::completed(
                        format!("operations/{s}"),
                        OperationService::ServiceUsage,
                    ))
                });
        }

        let config = OperatorConfig::default();
        DependentResourceProvisioner::new(&api, &config)
            .enable_services(&scope(), "proj-1")
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn enable_failure_aborts_remaining_services() {
        let mut api = MockGcpApi::new();
        let mut calls = 0;
        api.expect_enable_service().times(3).returning(move |_, s| {
            calls += 1;
            if calls == 3 {
                Err(Error::provider_transient("EnableService", "503"))
            } else {
                Ok(OperationHandle::completed(
                    format!("operations/{s}"),
                    OperationService::ServiceUsage,
                ))
            }
        });

        let config = OperatorConfig::default();
        let err = DependentResourceProvisioner::new(&api, &config)
            .enable_services(&scope(), "proj-1")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn existing_service_account_is_reused() {
        let mut api = MockGcpApi::new();
        api.expect_create_service_account().returning(|p, a, _| {
            Err(Error::AlreadyExists {
                resource: format!("projects/{p}/serviceAccounts/{a}"),
            })
        });
        api.expect_get_service_account()
            .withf(|p, a| p == "proj-1" && a == "hub-deployer")
            .times(1)
            .returning(|_, _| Ok(account()));

        let config = OperatorConfig::default();
        let found = DependentResourceProvisioner::new(&api, &config)
            .ensure_service_account("proj-1", "hub-deployer")
            .await
            .unwrap();
        assert_eq!(found.email, account().email);
    }

    #[tokio::test]
    async fn identity_chain_creates_account_mints_key_and_binds_owner() {
        let mut api = MockGcpApi::new();
        api.expect_create_service_account()
            .times(1)
            .returning(|_, _, _| Ok(account()));
        api.expect_create_service_account_key().times(1).returning(|a| {
            Ok(ServiceAccountKey {
                name: format!("{}/keys/1", a.name),
                private_key_data: "a2V5".to_string(),
            })
        });
        api.expect_get_iam_policy()
            .with(eq(IamResource::Project("proj-1".to_string())))
            .times(1)
            .returning(|_| Ok(Policy::default()));
        api.expect_set_iam_policy()
            .withf(|r, p| {
                *r == IamResource::Project("proj-1".to_string()) && p.bindings == vec![owner(&[MEMBER])]
            })
            .times(1)
            .returning(|_, p| Ok(p.clone()));

        let config = OperatorConfig::default();
        let identity = DependentResourceProvisioner::new(&api, &config)
            .provision_identity(&desired(ParentType::Folder))
            .await
            .unwrap();
        assert_eq!(identity.key.private_key_data, "a2V5");
    }

    #[tokio::test]
    async fn unchanged_policy_is_not_written() {
        let mut api = MockGcpApi::new();
        api.expect_get_iam_policy().returning(|_| {
            Ok(Policy {
                bindings: vec![owner(&[MEMBER])],
                ..Default::default()
            })
        });
        api.expect_set_iam_policy().never();

        let config = OperatorConfig::default();
        DependentResourceProvisioner::new(&api, &config)
            .bind_iam(&desired(ParentType::Organization), &account())
            .await
            .unwrap();
    }

    /// Story: organization roles go to the organization's own policy when enabled
    #[tokio::test]
    async fn story_organization_roles_are_gated() {
        let mut api = MockGcpApi::new();
        api.expect_get_iam_policy().times(2).returning(|_| Ok(Policy::default()));
        api.expect_set_iam_policy()
            .withf(|r, _| *r == IamResource::Project("proj-1".to_string()))
            .times(1)
            .returning(|_, p| Ok(p.clone()));
        api.expect_set_iam_policy()
            .withf(|r, p| {
                *r == IamResource::Organization("42".to_string())
                    && p.bindings.iter().map(|b| b.role.as_str()).collect::<Vec<_>>()
                        == ORGANIZATION_ROLES
            })
            .times(1)
            .returning(|_, p| Ok(p.clone()));

        let config = OperatorConfig {
            grant_organization_roles: true,
            ..OperatorConfig::default()
        };
        let provisioner = DependentResourceProvisioner::new(&api, &config);
        provisioner
            .bind_iam(&desired(ParentType::Organization), &account())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn organization_roles_skip_folder_parents() {
        let mut api = MockGcpApi::new();
        api.expect_get_iam_policy()
            .with(eq(IamResource::Project("proj-1".to_string())))
            .times(1)
            .returning(|_| Ok(Policy::default()));
        api.expect_set_iam_policy().times(1).returning(|_, p| Ok(p.clone()));

        let config = OperatorConfig {
            grant_organization_roles: true,
            ..OperatorConfig::default()
        };
        DependentResourceProvisioner::new(&api, &config)
            .bind_iam(&desired(ParentType::Folder), &account())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_service_account_name_is_fatal() {
        let api = MockGcpApi::new();
        let config = OperatorConfig::default();
        let mut d = desired(ParentType::Folder);
        d.service_account_name = None;
        let err = DependentResourceProvisioner::new(&api, &config)
            .provision_identity(&d)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
