//! Credential providers.
//!
//! - [`EnvCredentials`] reads `DB_*` variables (development).
//! - [`VaultCredentials`] authenticates to HashiCorp Vault with a static
//!   token or AppRole and reads a KV v2 secret per product (production).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use onboard_core::credentials::{Credentials, CredentialsProvider, DEFAULT_DB_PORT};
use onboard_core::error::CoreError;

use crate::error::DbError;

/// Fraction of the token lease after which the token is refreshed.
const TOKEN_REFRESH_RATIO: f64 = 0.8;

fn parse_port(raw: Option<&str>) -> Result<u16, DbError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(DEFAULT_DB_PORT),
        Some(s) => s
            .parse()
            .map_err(|_| DbError::MalformedSecret(format!("invalid port '{s}'"))),
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Credentials from `DB_HOST`, `DB_PORT`, `DB_DATABASE`, `DB_USERNAME`,
/// `DB_PASSWORD`. The same credentials serve every product.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    vars: HashMap<String, String>,
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars().filter(|(k, _)| k.starts_with("DB_")))
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn var(&self, key: &str) -> String {
        self.vars.get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CredentialsProvider for EnvCredentials {
    async fn get_credentials(&self, _product: &str) -> Result<Credentials, CoreError> {
        let host = self
            .vars
            .get("DB_HOST")
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        let credentials = Credentials {
            host,
            port: parse_port(self.vars.get("DB_PORT").map(String::as_str))?,
            database: self.var("DB_DATABASE"),
            username: self.var("DB_USERNAME"),
            password: self.var("DB_PASSWORD"),
        };
        credentials.check()?;
        Ok(credentials)
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
    lease_duration: u64,
}

#[derive(Debug, Deserialize)]
struct KvResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: HashMap<String, serde_json::Value>,
}

struct Token {
    value: String,
    refresh_at: Instant,
}

/// How the client authenticates.
#[derive(PartialEq, Eq)]
enum VaultAuth {
    /// Pre-issued token from `VAULT_TOKEN`, used as is.
    Token(String),
    AppRole { role_id: String, secret_id: String },
}

/// Vault client reading one KV v2 secret per product.
///
/// The secret path for product `P` comes from `VAULT_PATH_<P>` and is read
/// under the `VAULT_KV_MOUNT` mount (default `secret`). AppRole tokens are
/// cached and refreshed by logging in again once most of the lease has
/// elapsed.
pub struct VaultCredentials {
    client: reqwest::Client,
    addr: String,
    auth: VaultAuth,
    mount: String,
    paths: HashMap<String, String>,
    token: Mutex<Option<Token>>,
}

impl VaultCredentials {
    /// Build from `VAULT_ADDR`, `VAULT_TOKEN` or `VAULT_ROLE_ID` plus
    /// `VAULT_SECRET_ID`, `VAULT_KV_MOUNT` and every `VAULT_PATH_*`
    /// variable. A token takes precedence over AppRole.
    pub fn from_env(timeout: Duration) -> Result<Self, DbError> {
        Self::from_vars(std::env::vars().filter(|(k, _)| k.starts_with("VAULT_")), timeout)
    }

    pub fn from_vars<I>(vars: I, timeout: Duration) -> Result<Self, DbError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let present = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();
        let required = |key: &str| {
            present(key).ok_or_else(|| DbError::MissingConfig(format!("{key} must be set")))
        };

        let addr = required("VAULT_ADDR")?.trim_end_matches('/').to_string();
        let auth = match (present("VAULT_TOKEN"), present("VAULT_ROLE_ID"), present("VAULT_SECRET_ID")) {
            (Some(token), _, _) => VaultAuth::Token(token),
            (None, None, None) => {
                return Err(DbError::MissingConfig(
                    "VAULT_TOKEN or VAULT_ROLE_ID and VAULT_SECRET_ID must be set".to_string(),
                ))
            }
            (None, _, _) => VaultAuth::AppRole {
                role_id: required("VAULT_ROLE_ID")?,
                secret_id: required("VAULT_SECRET_ID")?,
            },
        };
        let mount = vars
            .get("VAULT_KV_MOUNT")
            .cloned()
            .unwrap_or_else(|| "secret".to_string());
        let paths = vars
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("VAULT_PATH_")
                    .map(|product| (product.to_ascii_uppercase(), v.clone()))
            })
            .collect();

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            addr,
            auth,
            mount,
            paths,
            token: Mutex::new(None),
        })
    }

    /// Configured secret path for `product`.
    pub fn path_for(&self, product: &str) -> Result<&str, DbError> {
        self.paths
            .get(&product.to_ascii_uppercase())
            .map(String::as_str)
            .ok_or_else(|| {
                DbError::MissingConfig(format!(
                    "Vault path not configured for product {product}. Expected environment variable: VAULT_PATH_{}",
                    product.to_ascii_uppercase()
                ))
            })
    }

    async fn login(&self, role_id: &str, secret_id: &str) -> Result<Token, DbError> {
        let body = serde_json::json!({
            "role_id": role_id,
            "secret_id": secret_id,
        });
        let response = self
            .client
            .post(format!("{}/v1/auth/approle/login", self.addr))
            .json(&body)
            .send()
            .await?;
        let login: LoginResponse = Self::parse_response(response).await?;

        let refresh_after = Duration::from_secs_f64(login.auth.lease_duration as f64 * TOKEN_REFRESH_RATIO);
        tracing::info!(lease_secs = login.auth.lease_duration, "Authenticated with Vault");
        Ok(Token {
            value: login.auth.client_token,
            refresh_at: Instant::now() + refresh_after,
        })
    }

    async fn token(&self) -> Result<String, DbError> {
        let (role_id, secret_id) = match &self.auth {
            VaultAuth::Token(value) => return Ok(value.clone()),
            VaultAuth::AppRole { role_id, secret_id } => (role_id, secret_id),
        };
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }
        let token = self.login(role_id, secret_id).await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn read_secret(&self, path: &str) -> Result<HashMap<String, serde_json::Value>, DbError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!(
                "{}/v1/{}/data/{}",
                self.addr,
                self.mount,
                path.trim_start_matches('/')
            ))
            .header("X-Vault-Token", token)
            .send()
            .await?;
        let kv: KvResponse = Self::parse_response(response).await?;
        Ok(kv.data.data)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DbError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DbError::SecretStore {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl CredentialsProvider for VaultCredentials {
    async fn get_credentials(&self, product: &str) -> Result<Credentials, CoreError> {
        let path = self.path_for(product)?;
        let secret = self.read_secret(path).await?;
        let credentials = credentials_from_secret(&secret)?;
        credentials.check()?;
        tracing::debug!(product, "Fetched database credentials from Vault");
        Ok(credentials)
    }
}

/// Map a KV secret into credentials. Values may be strings or numbers.
fn credentials_from_secret(
    secret: &HashMap<String, serde_json::Value>,
) -> Result<Credentials, DbError> {
    let text = |key: &str| -> Option<String> {
        match secret.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    let require = |key: &str| {
        text(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DbError::MalformedSecret(format!("missing '{key}'")))
    };

    Ok(Credentials {
        host: require("host")?,
        port: parse_port(text("port").as_deref())?,
        database: require("database")?,
        username: require("username")?,
        password: require("password")?,
    })
}
