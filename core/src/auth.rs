//! Credential resolution.
//!
//! The bearer token is minted once at startup from whichever credential
//! material the configuration provides. There is no background refresh: a
//! process that outlives its token has to be restarted.

use crate::errors::{ChatError, ChatResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Service account key, as found in a downloaded JSON key file or inlined
/// as a table in the config file.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// `gcloud auth application-default login` credentials
#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

/// Where the bearer token comes from
#[derive(Clone)]
pub enum CredentialSource {
    AccessToken(String),
    ServiceAccount(ServiceAccountKey),
    CredentialsFile(PathBuf),
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            CredentialSource::ServiceAccount(key) => {
                f.debug_tuple("ServiceAccount").field(key).finish()
            }
            CredentialSource::CredentialsFile(path) => {
                f.debug_tuple("CredentialsFile").field(path).finish()
            }
        }
    }
}

impl CredentialSource {
    /// Picks the first available credential: explicit token, inline key,
    /// key file, then the gcloud application-default credentials file.
    pub fn select(
        access_token: Option<&str>,
        service_account: Option<&ServiceAccountKey>,
        credentials_file: Option<&Path>,
    ) -> ChatResult<Self> {
        if let Some(token) = access_token.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(CredentialSource::AccessToken(token.to_string()));
        }
        if let Some(key) = service_account {
            return Ok(CredentialSource::ServiceAccount(key.clone()));
        }
        if let Some(path) = credentials_file {
            return Ok(CredentialSource::CredentialsFile(path.to_path_buf()));
        }

        match well_known_adc_file() {
            Some(path) if path.exists() => Ok(CredentialSource::CredentialsFile(path)),
            _ => Err(ChatError::ConfigError(
                "No credentials found: set GOOGLE_ACCESS_TOKEN, GOOGLE_APPLICATION_CREDENTIALS, \
                 a [gcp_service_account] table, or run `gcloud auth application-default login`"
                    .to_string(),
            )),
        }
    }
}

fn well_known_adc_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| {
        dir.join("gcloud")
            .join("application_default_credentials.json")
    })
}

/// A minted bearer token
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Builds the signed RS256 assertion exchanged for a service account token.
pub fn build_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> ChatResult<String> {
    let claims = assertion_claims(key, now);

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
        ChatError::AuthError(format!(
            "Invalid private key for {}: {}",
            key.client_email, e
        ))
    })?;

    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

fn assertion_claims(key: &ServiceAccountKey, now: DateTime<Utc>) -> AssertionClaims {
    let iat = now.timestamp();
    AssertionClaims {
        iss: key.client_email.clone(),
        scope: CLOUD_PLATFORM_SCOPE.to_string(),
        aud: key.token_uri.clone(),
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    }
}

/// Resolves the credential source into a bearer token.
pub async fn fetch_access_token(
    http: &Client,
    source: &CredentialSource,
) -> ChatResult<AccessToken> {
    match source {
        CredentialSource::AccessToken(token) => {
            debug!("Using access token from configuration");
            Ok(AccessToken {
                token: token.clone(),
                expires_at: None,
            })
        }
        CredentialSource::ServiceAccount(key) => exchange_service_account(http, key).await,
        CredentialSource::CredentialsFile(path) => {
            let content = fs::read_to_string(path).map_err(|e| {
                ChatError::ConfigError(format!(
                    "Failed to read credentials file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let parsed: CredentialsFile = serde_json::from_str(&content).map_err(|e| {
                ChatError::ConfigError(format!(
                    "Unsupported credentials file {}: {}",
                    path.display(),
                    e
                ))
            })?;

            match parsed {
                CredentialsFile::ServiceAccount(key) => exchange_service_account(http, &key).await,
                CredentialsFile::AuthorizedUser(user) => refresh_authorized_user(http, &user).await,
            }
        }
    }
}

async fn exchange_service_account(
    http: &Client,
    key: &ServiceAccountKey,
) -> ChatResult<AccessToken> {
    info!(client_email = %key.client_email, "Exchanging service account assertion for access token");
    let assertion = build_assertion(key, Utc::now())?;
    let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
    request_token(http, &key.token_uri, &params).await
}

async fn refresh_authorized_user(http: &Client, user: &AuthorizedUser) -> ChatResult<AccessToken> {
    info!("Refreshing application-default user credentials");
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", user.client_id.as_str()),
        ("client_secret", user.client_secret.as_str()),
        ("refresh_token", user.refresh_token.as_str()),
    ];
    request_token(http, &user.token_uri, &params).await
}

async fn request_token(
    http: &Client,
    token_uri: &str,
    params: &[(&str, &str)],
) -> ChatResult<AccessToken> {
    let response = http
        .post(token_uri)
        .form(params)
        .send()
        .await
        .map_err(|e| ChatError::AuthError(format!("Token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::AuthError(format!(
            "Token endpoint returned {}: {}",
            status.as_u16(),
            body
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| ChatError::AuthError(format!("Malformed token response: {}", e)))?;

    Ok(AccessToken {
        token: token.access_token,
        expires_at: token
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ServiceAccountKey {
        ServiceAccountKey {
            key_type: Some("service_account".to_string()),
            project_id: Some("garage-123".to_string()),
            private_key_id: Some("k1".to_string()),
            private_key: "not a pem".to_string(),
            client_email: "chatbot@garage-123.iam.gserviceaccount.com".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        }
    }

    #[test]
    fn test_select_prefers_explicit_token() {
        let k = key();
        let source =
            CredentialSource::select(Some("ya29.abc"), Some(&k), Some(Path::new("/tmp/x.json")))
                .unwrap();
        assert!(matches!(source, CredentialSource::AccessToken(t) if t == "ya29.abc"));

        let source = CredentialSource::select(Some("  "), Some(&k), None).unwrap();
        assert!(matches!(source, CredentialSource::ServiceAccount(_)));

        let source = CredentialSource::select(None, None, Some(Path::new("/tmp/x.json"))).unwrap();
        assert!(matches!(source, CredentialSource::CredentialsFile(_)));
    }

    #[test]
    fn test_assertion_claims() {
        let now = Utc::now();
        let claims = assertion_claims(&key(), now);
        assert_eq!(claims.iss, "chatbot@garage-123.iam.gserviceaccount.com");
        assert_eq!(claims.aud, DEFAULT_TOKEN_URI);
        assert_eq!(claims.scope, CLOUD_PLATFORM_SCOPE);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_bad_private_key_is_auth_error() {
        let result = build_assertion(&key(), Utc::now());
        assert!(matches!(result, Err(ChatError::AuthError(_))));
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let source = CredentialSource::AccessToken("ya29.secret".to_string());
        assert!(!format!("{:?}", source).contains("secret"));
        assert!(!format!("{:?}", key()).contains("not a pem"));
    }

    #[test]
    fn test_credentials_file_variants() {
        let user: CredentialsFile = serde_json::from_str(
            r#"{"type":"authorized_user","client_id":"id","client_secret":"s","refresh_token":"r"}"#,
        )
        .unwrap();
        assert!(matches!(user, CredentialsFile::AuthorizedUser(u) if u.token_uri == DEFAULT_TOKEN_URI));

        let sa: CredentialsFile = serde_json::from_str(
            r#"{"type":"service_account","client_email":"a@b","private_key":"pem","client_id":"1"}"#,
        )
        .unwrap();
        assert!(matches!(sa, CredentialsFile::ServiceAccount(k) if k.client_email == "a@b"));
    }

    #[tokio::test]
    async fn test_static_token_needs_no_network() {
        let token = fetch_access_token(
            &Client::new(),
            &CredentialSource::AccessToken("ya29.abc".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(token.token, "ya29.abc");
        assert!(!token.is_expired());
    }
}
