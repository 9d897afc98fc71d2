//! Bearer credentials for provider calls
//!
//! A GCPCredentials `key` is base64. If it decodes to a service account JSON
//! key file the key signs a JWT assertion that is exchanged for an access
//! token. Anything else is an operator-seeded bearer token used verbatim.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// OAuth scope requested for exchanged tokens
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Service account JSON key file
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceAccountKeyFile {
    /// Always `service_account`
    #[serde(rename = "type")]
    pub kind: String,
    /// Project the account belongs to
    #[serde(default)]
    pub project_id: String,
    /// Key id, sent as the JWT `kid`
    #[serde(default)]
    pub private_key_id: String,
    /// PEM encoded RSA private key
    pub private_key: String,
    /// Account email, the assertion issuer
    pub client_email: String,
    /// Token endpoint
    #[serde(default)]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKeyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKeyFile")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// Where the bearer token for a credential comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BearerSource {
    /// Exchange a signed assertion for an access token
    ServiceAccount(Box<ServiceAccountKeyFile>),
    /// Use the key as the token
    Token(String),
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl BearerSource {
    /// Classify credential key material
    pub fn from_key(key: &str) -> Result<Self> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(Error::validation_for_field(
                "credential",
                "spec.key",
                "credential key is empty",
            ));
        }

        let key_file = STANDARD
            .decode(trimmed)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ServiceAccountKeyFile>(&bytes).ok())
            .filter(|file| file.kind == "service_account");

        Ok(match key_file {
            Some(file) => Self::ServiceAccount(Box::new(file)),
            None => Self::Token(trimmed.to_string()),
        })
    }

    /// Resolve to a bearer token, exchanging an assertion if needed
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String> {
        match self {
            Self::Token(token) => Ok(token.clone()),
            Self::ServiceAccount(file) => exchange_assertion(http, file).await,
        }
    }
}

/// Build the signed JWT assertion for a key file
pub(crate) fn sign_assertion(file: &ServiceAccountKeyFile, now: i64) -> Result<String> {
    let audience = token_uri(file);
    let claims = AssertionClaims {
        iss: &file.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: audience,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    if !file.private_key_id.is_empty() {
        header.kid = Some(file.private_key_id.clone());
    }

    let key = EncodingKey::from_rsa_pem(file.private_key.as_bytes()).map_err(|e| {
        Error::validation_for_field(
            file.client_email.as_str(),
            "spec.key",
            format!("invalid service account private key: {e}"),
        )
    })?;

    encode(&header, &claims, &key)
        .map_err(|e| Error::internal_with_context("auth", format!("failed to sign assertion: {e}")))
}

fn token_uri(file: &ServiceAccountKeyFile) -> &str {
    if file.token_uri.is_empty() {
        DEFAULT_TOKEN_URI
    } else {
        &file.token_uri
    }
}

async fn exchange_assertion(http: &reqwest::Client, file: &ServiceAccountKeyFile) -> Result<String> {
    let assertion = sign_assertion(file, chrono::Utc::now().timestamp())?;
    let uri = token_uri(file);

    debug!(client_email = %file.client_email, "exchanging service account assertion");

    let response = http
        .post(uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        return Err(Error::from_status("TokenExchange", uri, status.as_u16(), body));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::serialization_for_kind("TokenResponse", e.to_string()))?;
    Ok(token.access_token)
}
