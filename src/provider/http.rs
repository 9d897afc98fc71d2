//! REST transport for the provider APIs
//!
//! Every request is throttled per credential, carries the bearer token and
//! has its response status mapped onto the operator's error taxonomy before
//! the body is decoded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::auth::BearerSource;
use super::throttle::ProviderRateLimiter;
use super::types::{
    BillingInfo, IamResource, OperationHandle, OperationService, OperationStatus, Policy,
    RemoteProject, ServiceAccount, ServiceAccountKey,
};
use super::{GcpApi, GcpApiFactory};
use crate::config::ProviderEndpoints;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct OperationBody {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationStatus>,
}

#[derive(Deserialize)]
struct ListProjectsResponse {
    #[serde(default)]
    projects: Vec<RemoteProject>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateServiceAccountRequest<'a> {
    account_id: &'a str,
    service_account: ServiceAccountFields<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountFields<'a> {
    display_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBillingRequest<'a> {
    billing_account_name: &'a str,
}

#[derive(Serialize)]
struct SetIamPolicyRequest<'a> {
    policy: &'a Policy,
}

/// Builds [`HttpGcpClient`]s sharing one connection pool and rate limiter
pub struct HttpGcpClientFactory {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    limiter: Arc<ProviderRateLimiter>,
}

impl HttpGcpClientFactory {
    /// Create a factory for the given endpoints
    pub fn new(endpoints: ProviderEndpoints, limiter: Arc<ProviderRateLimiter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::internal_with_context("http", format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            endpoints,
            limiter,
        })
    }
}

#[async_trait]
impl GcpApiFactory for HttpGcpClientFactory {
    async fn connect(&self, limiter_key: &str, key: &str) -> Result<Arc<dyn GcpApi>> {
        let source = BearerSource::from_key(key)?;
        let token = source.access_token(&self.http).await?;
        Ok(Arc::new(HttpGcpClient::new(
            self.http.clone(),
            self.endpoints.clone(),
            token,
            self.limiter.clone(),
            limiter_key,
        )))
    }
}

/// Authenticated provider client for one credential
pub struct HttpGcpClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    token: String,
    limiter: Arc<ProviderRateLimiter>,
    limiter_key: String,
}

impl HttpGcpClient {
    /// Create a client that authenticates with `token`
    pub fn new(
        http: reqwest::Client,
        endpoints: ProviderEndpoints,
        token: impl Into<String>,
        limiter: Arc<ProviderRateLimiter>,
        limiter_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoints,
            token: token.into(),
            limiter,
            limiter_key: limiter_key.into(),
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        resource: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.limiter.until_ready(&self.limiter_key).await;

        debug!(operation, resource, "provider request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(Error::from_status(operation, resource, status.as_u16(), body));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::serialization_for_kind(operation, e.to_string()))
    }

    async fn send_operation(
        &self,
        operation: &str,
        resource: &str,
        service: OperationService,
        request: RequestBuilder,
    ) -> Result<OperationHandle> {
        let body: OperationBody = self.send(operation, resource, request).await?;
        Ok(OperationHandle {
            name: body.name,
            service,
            done: body.done,
            error: body.error,
        })
    }

    fn operation_base(&self, service: OperationService) -> &str {
        match service {
            OperationService::ResourceManager => &self.endpoints.resource_manager,
            OperationService::ServiceUsage => &self.endpoints.service_usage,
        }
    }
}

#[async_trait]
impl GcpApi for HttpGcpClient {
    async fn list_projects(&self, project_id: &str) -> Result<Vec<RemoteProject>> {
        let url = format!("{}/v1/projects", self.endpoints.resource_manager);
        let request = self
            .request(Method::GET, url)
            .query(&[("filter", format!("id:{project_id}"))]);
        let list: ListProjectsResponse = self.send("ListProjects", project_id, request).await?;
        Ok(list.projects)
    }

    async fn get_project(&self, project_id: &str) -> Result<RemoteProject> {
        let resource = format!("projects/{project_id}");
        let url = format!("{}/v1/{resource}", self.endpoints.resource_manager);
        // a project missing right after the existence probe is a race, not a rejection
        let result = self
            .send("GetProject", &resource, self.request(Method::GET, url))
            .await;
        match result {
            Err(e) if e.is_http_status(404) => Err(Error::NotFound { resource }),
            other => other,
        }
    }

    async fn create_project(&self, project: &RemoteProject) -> Result<OperationHandle> {
        let url = format!("{}/v1/projects", self.endpoints.resource_manager);
        let request = self.request(Method::POST, url).json(project);
        self.send_operation(
            "CreateProject",
            &project.project_id,
            OperationService::ResourceManager,
            request,
        )
        .await
    }

    async fn update_project(&self, project: &RemoteProject) -> Result<OperationHandle> {
        let resource = format!("projects/{}", project.project_id);
        let url = format!("{}/v1/{resource}", self.endpoints.resource_manager);
        let request = self.request(Method::PUT, url).json(project);
        // v1 applies the update synchronously and answers with the project
        let _updated: RemoteProject = self.send("UpdateProject", &resource, request).await?;
        Ok(OperationHandle::completed(
            resource,
            OperationService::ResourceManager,
        ))
    }

    async fn get_operation(&self, handle: &OperationHandle) -> Result<OperationHandle> {
        let url = format!("{}/v1/{}", self.operation_base(handle.service), handle.name);
        self.send_operation(
            "GetOperation",
            &handle.name,
            handle.service,
            self.request(Method::GET, url),
        )
        .await
    }

    async fn get_billing_info(&self, project_id: &str) -> Result<BillingInfo> {
        let resource = format!("projects/{project_id}/billingInfo");
        let url = format!("{}/v1/{resource}", self.endpoints.billing);
        self.send("GetBillingInfo", &resource, self.request(Method::GET, url))
            .await
    }

    async fn update_billing_info(
        &self,
        project_id: &str,
        billing_account: &str,
    ) -> Result<BillingInfo> {
        let resource = format!("projects/{project_id}/billingInfo");
        let url = format!("{}/v1/{resource}", self.endpoints.billing);
        let request = self.request(Method::PUT, url).json(&UpdateBillingRequest {
            billing_account_name: billing_account,
        });
        self.send("UpdateBillingInfo", &resource, request).await
    }

    async fn enable_service(&self, project_id: &str, service: &str) -> Result<OperationHandle> {
        let resource = format!("projects/{project_id}/services/{service}");
        let url = format!("{}/v1/{resource}:enable", self.endpoints.service_usage);
        let request = self
            .request(Method::POST, url)
            .json(&serde_json::json!({}));
        self.send_operation(
            "EnableService",
            &resource,
            OperationService::ServiceUsage,
            request,
        )
        .await
    }

    async fn create_service_account(
        &self,
        project_id: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount> {
        let url = format!(
            "{}/v1/projects/{project_id}/serviceAccounts",
            self.endpoints.iam
        );
        let request = self
            .request(Method::POST, url)
            .json(&CreateServiceAccountRequest {
                account_id,
                service_account: ServiceAccountFields { display_name },
            });
        let resource = format!("projects/{project_id}/serviceAccounts/{account_id}");
        self.send("CreateServiceAccount", &resource, request).await
    }

    async fn get_service_account(
        &self,
        project_id: &str,
        account_id: &str,
    ) -> Result<ServiceAccount> {
        let resource = format!(
            "projects/{project_id}/serviceAccounts/{account_id}@{project_id}.iam.gserviceaccount.com"
        );
        let url = format!("{}/v1/{resource}", self.endpoints.iam);
        self.send("GetServiceAccount", &resource, self.request(Method::GET, url))
            .await
    }

    async fn create_service_account_key(
        &self,
        account: &ServiceAccount,
    ) -> Result<ServiceAccountKey> {
        let url = format!("{}/v1/{}/keys", self.endpoints.iam, account.name);
        let request = self
            .request(Method::POST, url)
            .json(&serde_json::json!({}));
        self.send("CreateServiceAccountKey", &account.name, request)
            .await
    }

    async fn get_iam_policy(&self, resource: &IamResource) -> Result<Policy> {
        let path = resource.path();
        let url = format!(
            "{}/v1/{path}:getIamPolicy",
            self.endpoints.resource_manager
        );
        let request = self
            .request(Method::POST, url)
            .json(&serde_json::json!({}));
        self.send("GetIamPolicy", &path, request).await
    }

    async fn set_iam_policy(&self, resource: &IamResource, policy: &Policy) -> Result<Policy> {
        let path = resource.path();
        let url = format!(
            "{}/v1/{path}:setIamPolicy",
            self.endpoints.resource_manager
        );
        let request = self
            .request(Method::POST, url)
            .json(&SetIamPolicyRequest { policy });
        self.send("SetIamPolicy", &path, request).await
    }
}
