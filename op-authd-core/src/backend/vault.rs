//! HashiCorp Vault / OpenBao HTTP backend.
//!
//! Resolves `vault://logical_path[#field]` against `GET /v1/{logical_path}`
//! with the `X-Vault-Token` header. The OpenBao variant is definitionally
//! identical: it normalises `bao://` to `vault://` and reports its name as
//! `bao`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::Backend;
use crate::errors::{BackendError, BackendResult};
use crate::reference::parse_vault_ref;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Re-authenticate this long before the token lease actually ends.
const RENEW_MARGIN: Duration = Duration::from_secs(30);
const BODY_EXCERPT_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultAuthMethod {
    /// A pre-issued token; verified against `auth/token/lookup-self`.
    Token(String),
    /// Username/password login against `auth/userpass/login/{username}`.
    Userpass { username: String, password: String },
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Server address, e.g. `https://vault.example.com:8200`.
    pub address: String,
    pub namespace: Option<String>,
    pub auth: VaultAuthMethod,
}

impl VaultConfig {
    /// Reads `VAULT_ADDR`, `VAULT_NAMESPACE` and the auth material
    /// (`VAULT_TOKEN`, or `VAULT_USERNAME`/`VAULT_PASSWORD` when
    /// `VAULT_AUTH_METHOD=userpass`) from the environment.
    pub fn from_env() -> BackendResult<Self> {
        let address = std::env::var("VAULT_ADDR")
            .map_err(|_| BackendError::invalid_input("VAULT_ADDR is not set"))?;
        let namespace = std::env::var("VAULT_NAMESPACE").ok().filter(|v| !v.is_empty());
        let method = std::env::var("VAULT_AUTH_METHOD").unwrap_or_else(|_| "token".to_string());

        let auth = match method.as_str() {
            "token" => VaultAuthMethod::Token(
                std::env::var("VAULT_TOKEN")
                    .map_err(|_| BackendError::invalid_input("VAULT_TOKEN is not set"))?,
            ),
            "userpass" => VaultAuthMethod::Userpass {
                username: std::env::var("VAULT_USERNAME")
                    .map_err(|_| BackendError::invalid_input("VAULT_USERNAME is not set"))?,
                password: std::env::var("VAULT_PASSWORD")
                    .map_err(|_| BackendError::invalid_input("VAULT_PASSWORD is not set"))?,
            },
            other => {
                return Err(BackendError::invalid_input(format!(
                    "unsupported auth method {other:?}"
                )))
            }
        };

        Ok(Self {
            address,
            namespace,
            auth,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Vault,
    Bao,
}

struct AuthState {
    token: Option<String>,
    /// When the current token stops being trustworthy. `None` means the
    /// token does not expire.
    expires_at: Option<Instant>,
}

pub struct VaultBackend {
    config: VaultConfig,
    client: reqwest::Client,
    auth: Mutex<AuthState>,
    flavor: Flavor,
}

impl VaultBackend {
    pub fn new(config: VaultConfig) -> Self {
        Self::with_flavor(config, Flavor::Vault)
    }

    /// OpenBao variant: same wire behaviour, different scheme and name.
    pub fn bao(config: VaultConfig) -> Self {
        Self::with_flavor(config, Flavor::Bao)
    }

    fn with_flavor(config: VaultConfig, flavor: Flavor) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client with static configuration");
        Self {
            config,
            client,
            auth: Mutex::new(AuthState {
                token: None,
                expires_at: None,
            }),
            flavor,
        }
    }

    /// Returns a usable token, re-authenticating when the current one is
    /// missing or within the renewal margin of its lease end.
    async fn ensure_token(&self) -> BackendResult<String> {
        let mut auth = self.auth.lock().await;
        if let Some(token) = &auth.token {
            let fresh = match auth.expires_at {
                Some(expires_at) => Instant::now() + RENEW_MARGIN < expires_at,
                None => true,
            };
            if fresh {
                return Ok(token.clone());
            }
        }

        let (token, lease) = match &self.config.auth {
            VaultAuthMethod::Token(token) => {
                let lease = self.verify_token(token).await?;
                (token.clone(), lease)
            }
            VaultAuthMethod::Userpass { username, password } => {
                self.login_userpass(username, password).await?
            }
        };

        auth.expires_at = lease
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Instant::now() + ttl);
        auth.token = Some(token.clone());
        Ok(token)
    }

    /// `GET auth/token/lookup-self`; returns the remaining lease when the
    /// upstream reports one.
    async fn verify_token(&self, token: &str) -> BackendResult<Option<Duration>> {
        let response = self
            .request(reqwest::Method::GET, "auth/token/lookup-self")
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() != StatusCode::OK {
            return Err(BackendError::upstream(format!(
                "token verification failed with status {}",
                response.status().as_u16()
            )));
        }

        #[derive(Deserialize)]
        struct LookupData {
            #[serde(default)]
            ttl: u64,
        }
        #[derive(Deserialize)]
        struct Lookup {
            data: LookupData,
        }

        let lookup: Lookup = response
            .json()
            .await
            .map_err(|_| BackendError::upstream("failed to decode token lookup response"))?;
        Ok((lookup.data.ttl > 0).then(|| Duration::from_secs(lookup.data.ttl)))
    }

    async fn login_userpass(
        &self,
        username: &str,
        password: &str,
    ) -> BackendResult<(String, Option<Duration>)> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("auth/userpass/login/{username}"),
            )
            .json(&serde_json::json!({ "password": password }))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() != StatusCode::OK {
            return Err(BackendError::upstream(format!(
                "userpass login failed with status {}",
                response.status().as_u16()
            )));
        }

        #[derive(Deserialize)]
        struct AuthBlock {
            client_token: String,
            #[serde(default)]
            lease_duration: u64,
        }
        #[derive(Deserialize)]
        struct Login {
            auth: AuthBlock,
        }

        let login: Login = response
            .json()
            .await
            .map_err(|_| BackendError::upstream("failed to decode login response"))?;
        let lease = (login.auth.lease_duration > 0)
            .then(|| Duration::from_secs(login.auth.lease_duration));
        Ok((login.auth.client_token, lease))
    }

    async fn read_secret(&self, token: &str, path: &str) -> BackendResult<Value> {
        let response = self
            .request(reqwest::Method::GET, path)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BackendError::NotFound(format!(
                "no secret at path {path}"
            ))),
            StatusCode::OK => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|_| BackendError::upstream("failed to decode secret response"))?;
                body.get("data")
                    .cloned()
                    .ok_or_else(|| BackendError::upstream("response missing data field"))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                debug!(%status, body = %excerpt(&body), "upstream error");
                Err(BackendError::upstream(format!(
                    "upstream returned status {}",
                    status.as_u16()
                )))
            }
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut builder = self.client.request(method, url);
        if let Some(namespace) = &self.config.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        builder
    }

    fn normalise<'a>(&self, reference: &'a str) -> std::borrow::Cow<'a, str> {
        match self.flavor {
            Flavor::Bao => match reference.strip_prefix("bao://") {
                Some(rest) => std::borrow::Cow::Owned(format!("vault://{rest}")),
                None => std::borrow::Cow::Borrowed(reference),
            },
            Flavor::Vault => std::borrow::Cow::Borrowed(reference),
        }
    }
}

#[async_trait]
impl Backend for VaultBackend {
    async fn read(&self, reference: &str, _flags: &[String]) -> BackendResult<String> {
        let reference = self.normalise(reference);
        let parsed = parse_vault_ref(&reference)?;

        let token = self.ensure_token().await?;
        let data = self.read_secret(&token, &parsed.path).await?;
        project_field(&data, parsed.field.as_deref())
    }

    fn name(&self) -> &str {
        match self.flavor {
            Flavor::Vault => "vault",
            Flavor::Bao => "bao",
        }
    }
}

/// With no field, the whole `data` object is returned JSON-serialised.
/// With a field, the KV v2 `data.data` object is consulted and scalars are
/// stringified.
fn project_field(data: &Value, field: Option<&str>) -> BackendResult<String> {
    let Some(field) = field else {
        return serde_json::to_string(data)
            .map_err(|_| BackendError::upstream("failed to encode secret data"));
    };
    let container = data
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| BackendError::upstream("secret has no data object"))?;
    match container.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(BackendError::NotFound(format!(
            "field {field} not found in secret"
        ))),
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    // reqwest error displays never include the request body or headers
    BackendError::upstream(format!("transport error: {err}"))
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(address: &str) -> VaultConfig {
        VaultConfig {
            address: address.to_string(),
            namespace: None,
            auth: VaultAuthMethod::Token("test-token".into()),
        }
    }

    #[test]
    fn names_by_flavor() {
        assert_eq!(VaultBackend::new(config("http://v")).name(), "vault");
        assert_eq!(VaultBackend::bao(config("http://v")).name(), "bao");
    }

    #[test]
    fn bao_normalises_scheme() {
        let bao = VaultBackend::bao(config("http://v"));
        assert_eq!(bao.normalise("bao://secret/app"), "vault://secret/app");
        assert_eq!(bao.normalise("vault://secret/app"), "vault://secret/app");

        let vault = VaultBackend::new(config("http://v"));
        assert_eq!(vault.normalise("bao://secret/app"), "bao://secret/app");
    }

    #[tokio::test]
    async fn rejects_malformed_references_before_io() {
        // Unroutable address: validation must fail before any connection.
        let backend = VaultBackend::new(config("http://127.0.0.1:1"));
        let err = backend.read("vault://", &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));

        let err = backend.read("op://x/y/z", &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_upstream_error() {
        let backend = VaultBackend::new(config("http://127.0.0.1:1"));
        let err = backend.read("vault://secret/app", &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::Upstream(_)));
    }

    #[test]
    fn no_field_serialises_the_data_object() {
        let data = serde_json::json!({"data": {"password": "pw"}, "metadata": {"version": 2}});
        let value = project_field(&data, None).unwrap();
        let parsed: Value = serde_json::from_str(&value).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn field_projection_returns_strings_verbatim_and_stringifies_scalars() {
        let data = serde_json::json!({"data": {"password": "pw", "port": 5432}});
        assert_eq!(project_field(&data, Some("password")).unwrap(), "pw");
        assert_eq!(project_field(&data, Some("port")).unwrap(), "5432");
    }

    #[test]
    fn missing_field_is_not_found() {
        let data = serde_json::json!({"data": {"password": "pw"}});
        let err = project_field(&data, Some("user")).unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[test]
    fn field_projection_requires_a_data_object() {
        let data = serde_json::json!({"password": "pw"});
        let err = project_field(&data, Some("password")).unwrap_err();
        assert!(matches!(err, BackendError::Upstream(_)));
    }
}
