//! Controller context and the Kubernetes client seam

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::crd::{
    CredentialsStatus, GcpAdminProject, GcpCredentials, GcpProject, ManagedProject,
    ProjectObservation, ProjectStatus, ResourceKind,
};
use crate::provider::{GcpApiFactory, HttpGcpClientFactory, ProviderRateLimiter};
use crate::scope::ResourceKey;
use crate::Error;

/// Trait abstracting Kubernetes client operations for the project controllers
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a project resource of `kind`, `None` if it does not exist
    async fn get_project(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
    ) -> Result<Option<ProjectObservation>, Error>;

    /// Patch the status sub-resource of a project resource
    async fn patch_project_status(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
        status: &ProjectStatus,
    ) -> Result<(), Error>;

    /// Fetch a GCPCredentials resource, `None` if it does not exist
    async fn get_credentials(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GcpCredentials>, Error>;

    /// Create a GCPCredentials resource
    ///
    /// Fails with `AlreadyExists` if one with that name exists.
    async fn create_credentials(&self, credentials: &GcpCredentials) -> Result<(), Error>;

    /// Patch the status sub-resource of a GCPCredentials resource
    async fn patch_credentials_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CredentialsStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn fetch<K: ManagedProject>(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<ProjectObservation>, Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?.map(|obj| obj.observe()))
    }

    async fn patch<K: ManagedProject>(
        &self,
        key: &ResourceKey,
        status: &ProjectStatus,
    ) -> Result<(), Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);

        let mut status_value = serde_json::to_value(status)
            .map_err(|e| Error::serialization_for_kind("ProjectStatus", e.to_string()))?;
        // a merge patch keeps omitted keys, so a cleared message must be an explicit null
        if status.message.is_none() {
            status_value["message"] = serde_json::Value::Null;
        }
        let status_patch = serde_json::json!({ "status": status_value });

        api.patch_status(
            &key.name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_project(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
    ) -> Result<Option<ProjectObservation>, Error> {
        match kind {
            ResourceKind::Project => self.fetch::<GcpProject>(key).await,
            ResourceKind::AdminProject => self.fetch::<GcpAdminProject>(key).await,
        }
    }

    async fn patch_project_status(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
        status: &ProjectStatus,
    ) -> Result<(), Error> {
        match kind {
            ResourceKind::Project => self.patch::<GcpProject>(key, status).await,
            ResourceKind::AdminProject => self.patch::<GcpAdminProject>(key, status).await,
        }
    }

    async fn get_credentials(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GcpCredentials>, Error> {
        let api: Api<GcpCredentials> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_credentials(&self, credentials: &GcpCredentials) -> Result<(), Error> {
        let namespace = credentials.namespace().unwrap_or_default();
        let api: Api<GcpCredentials> = Api::namespaced(self.client.clone(), &namespace);

        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        match api.create(&params, credentials).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::AlreadyExists {
                resource: format!("{}/{}", namespace, credentials.name_any()),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_credentials_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CredentialsStatus,
    ) -> Result<(), Error> {
        let api: Api<GcpCredentials> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }
}

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds
/// resources that are expensive to create: the Kubernetes client, the
/// provider client factory with its connection pool, and the shared
/// per-credential rate limiter.
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(config)
///     .build()?;
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Builds authenticated provider clients
    pub gcp: Arc<dyn GcpApiFactory>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom clients
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        gcp: Arc<dyn GcpApiFactory>,
        config: OperatorConfig,
    ) -> Self {
        Self { kube, gcp, config }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    gcp: Option<Arc<dyn GcpApiFactory>>,
    config: OperatorConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            gcp: None,
            config: OperatorConfig::default(),
        }
    }

    /// Set the operator configuration
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the provider client factory
    pub fn gcp_factory(mut self, gcp: Arc<dyn GcpApiFactory>) -> Self {
        self.gcp = Some(gcp);
        self
    }

    /// Build the Context
    pub fn build(self) -> Result<Context, Error> {
        let kube = match self.kube {
            Some(kube) => kube,
            None => Arc::new(KubeClientImpl::new(
                self.client.clone(),
                self.config.field_manager.clone(),
            )),
        };

        let gcp = match self.gcp {
            Some(gcp) => gcp,
            None => {
                let limiter = Arc::new(ProviderRateLimiter::new(
                    self.config.rate_limit_per_second,
                    self.config.rate_limit_burst,
                ));
                Arc::new(HttpGcpClientFactory::new(
                    self.config.endpoints.clone(),
                    limiter,
                )?)
            }
        };

        Ok(Context {
            kube,
            gcp,
            config: self.config,
        })
    }
}
