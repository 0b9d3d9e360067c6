//! Authentication sessions
//!
//! This module provides:
//! - JWT token forging and parsing (HS256, claims: tenant, username, roles)
//! - A per-call `Auth` session derived from the caller's token
//! - Store-backed login against tenant/user records
//!
//! Tokens deliberately carry no expiry; sessions live only as long as the
//! call that parsed them.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::store::SharedStore;
use crate::Result;

/// Context-data key the auth token travels under
pub const TOKEN_CONTEXT_KEY: &str = "auth_token";

/// Store key holding the cluster-wide signing secret
pub const SECRET_STORE_KEY: &str = "cluster:secret_key";

/// Fallback when no secret is configured anywhere
const DEFAULT_SECRET: &str = "Default_Secret";

/// Identity claims carried in a token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub tenant_id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Forge a signed token for the given identity
pub fn forge_token(secret: &str, tenant_id: &str, username: &str, roles: &[String]) -> Result<String> {
    let claims = Claims {
        tenant_id: tenant_id.to_string(),
        username: username.to_string(),
        roles: roles.to_vec(),
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation
}

/// Parse a token into claims; invalid tokens yield `None`
pub fn parse_token(secret: &str, token: &str) -> Option<Claims> {
    match decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation()) {
        Ok(data) => Some(data.claims),
        Err(err) => {
            tracing::debug!("unable to parse token: {}", err);
            None
        }
    }
}

/// Per-call auth session
///
/// Constructed once per invocation from the call's context data; the shim
/// pipeline may swap the identity via [`Auth::assume`] (impersonation).
pub struct Auth {
    store: SharedStore,
    secret: String,
    token: Option<String>,
    session: Option<Claims>,
}

impl Auth {
    /// Build a session from an optional caller token.
    ///
    /// Secret resolution order: explicit config value, then the store's
    /// `cluster:secret_key`, then a fixed default (with a warning).
    pub async fn from_context(
        store: SharedStore,
        configured_secret: Option<String>,
        token: Option<String>,
    ) -> Self {
        let secret = match configured_secret {
            Some(secret) => secret,
            None => match store.get_raw(SECRET_STORE_KEY).await {
                Ok(Some(secret)) => secret,
                _ => {
                    tracing::warn!("Unable to retrieve a real secret from the store");
                    DEFAULT_SECRET.to_string()
                }
            },
        };

        let mut auth = Self {
            store,
            secret,
            token: None,
            session: None,
        };
        if let Some(token) = token {
            auth.assume(&token);
        }
        auth
    }

    /// Adopt a token as the current identity
    pub fn assume(&mut self, token: &str) {
        self.session = parse_token(&self.secret, token);
        self.token = Some(token.to_string());
    }

    /// Forge a token with this session's secret
    pub fn forge_token(&self, tenant_id: &str, username: &str, roles: &[String]) -> Result<String> {
        forge_token(&self.secret, tenant_id, username, roles)
    }

    /// Parse a token with this session's secret
    pub fn parse_token(&self, token: &str) -> Option<Claims> {
        parse_token(&self.secret, token)
    }

    /// Authenticate against the store's tenant/user records.
    ///
    /// On success the session assumes a freshly forged token.
    pub async fn login(&mut self, tenant_id: &str, username: &str, password: &str) -> Result<bool> {
        if tenant_id.is_empty() || username.is_empty() {
            return Ok(false);
        }

        let user_key = format!("tenants:{tenant_id}:users:{username}");
        let tenant_enabled = truthy(self.store.get_json(&format!("tenants:{tenant_id}:enabled")).await?);
        let user_enabled = truthy(self.store.get_json(&format!("{user_key}:enabled")).await?);
        let user_password = self
            .store
            .get_json(&format!("{user_key}:password"))
            .await?
            .and_then(|v| v.as_str().map(str::to_string));
        let user_roles: Vec<String> = self
            .store
            .get_json(&format!("{user_key}:roles"))
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if !user_enabled {
            tracing::error!("username is disabled: {} ({})", username, tenant_id);
            return Ok(false);
        }
        if !tenant_enabled {
            tracing::error!("tenant is disabled: {}", tenant_id);
            return Ok(false);
        }

        if user_password.as_deref() == Some(password) {
            tracing::debug!("authenticated as {} ({})", username, tenant_id);
            let token = self.forge_token(tenant_id, username, &user_roles)?;
            self.assume(&token);
            return Ok(true);
        }

        tracing::error!("unsuccessful auth attempt for {} (tenant {})", username, tenant_id);
        Ok(false)
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn session(&self) -> Option<&Claims> {
        self.session.as_ref()
    }

    pub fn authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.username.as_str())
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.tenant_id.as_str())
    }

    pub fn roles(&self) -> &[String] {
        self.session.as_ref().map(|s| s.roles.as_slice()).unwrap_or(&[])
    }

    pub fn user_is(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    pub fn whoami(&self) -> String {
        match self.session.as_ref() {
            Some(session) => format!("{}@{}", session.username, session.tenant_id),
            None => "nobody".to_string(),
        }
    }
}

fn truthy(value: Option<Value>) -> bool {
    value.map(|v| crate::common::utils::json_truthy(&v)).unwrap_or(false)
}
