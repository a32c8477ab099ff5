//! Security context and the authentication middleware.
//!
//! Tokens are 256-bit random values handed out once at issue time. The
//! store keeps only their SHA-256 digest, so a leaked token table cannot be
//! replayed. Validation checks existence, expiry, the `api:call` scope and
//! the module allow-list.

use crate::domain::context::{Authentication, CallContext, AUTHORIZATION_HEADER};
use crate::domain::error::ApiError;
use crate::middleware::{Middleware, Next};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{now, Payload, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scope every token needs to call APIs.
pub const API_CALL_SCOPE: &str = "api:call";

/// Name the security middleware is registered under.
pub const SECURITY_MIDDLEWARE: &str = "Security";

/// Highest priority: runs before every other middleware.
pub const SECURITY_PRIORITY: i32 = 0;

const TOKEN_BYTES: usize = 32;
const BEARER_PREFIX: &str = "Bearer ";

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Lifetime of tokens issued without an explicit expiration
    pub default_token_expiration: Duration,
    /// Reject calls that carry no token
    pub require_authentication: bool,
    /// Modules whose tokens may call APIs (empty = any module)
    pub allowed_modules: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_token_expiration: Duration::from_secs(60 * 60),
            require_authentication: true,
            allowed_modules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenRecord {
    module: String,
    user: String,
    issued_at: Timestamp,
    expires_at: Timestamp,
    scopes: Vec<String>,
}

impl TokenRecord {
    fn info(&self, digest: &str) -> TokenInfo {
        TokenInfo {
            token_id: digest.chars().take(12).collect(),
            module: self.module.clone(),
            user: self.user.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            scopes: self.scopes.clone(),
        }
    }
}

/// A token as seen after issue. The plaintext is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    /// Digest prefix identifying the token in listings.
    pub token_id: String,
    pub module: String,
    pub user: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub scopes: Vec<String>,
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub info: TokenInfo,
}

/// What a revocation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenScope {
    Token(String),
    Module(String),
    User(String),
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Issued tokens and the active security policy.
pub struct SecurityContext {
    config: RwLock<SecurityConfig>,
    tokens: DashMap<String, TokenRecord>,
}

impl SecurityContext {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config: RwLock::new(config),
            tokens: DashMap::new(),
        }
    }

    pub fn config(&self) -> SecurityConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: SecurityConfig) {
        *self.config.write() = config;
    }

    /// Issue a token. Empty `scopes` grants `api:call`.
    pub fn issue_token(
        &self,
        module: &str,
        user: &str,
        expiration: Option<Duration>,
        scopes: Vec<String>,
    ) -> IssuedToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let lifetime = expiration.unwrap_or(self.config.read().default_token_expiration);
        let issued_at = now();
        let expires_at = issued_at
            + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::days(1));
        let scopes = if scopes.is_empty() {
            vec![API_CALL_SCOPE.to_string()]
        } else {
            scopes
        };

        let record = TokenRecord {
            module: module.to_string(),
            user: user.to_string(),
            issued_at,
            expires_at,
            scopes,
        };
        let key = digest(&token);
        let info = record.info(&key);
        self.tokens.insert(key, record);

        info!(module, user, expires_at = %expires_at, "Token issued");
        IssuedToken { token, info }
    }

    /// Validate a token. `module`, when given, must be the token's module.
    pub fn validate_token(&self, token: &str, module: Option<&str>) -> Result<TokenInfo, ApiError> {
        let key = digest(token);
        let record = self
            .tokens
            .get(&key)
            .map(|r| r.value().clone())
            .ok_or_else(|| ApiError::Authentication("invalid token".into()))?;

        if now() >= record.expires_at {
            self.tokens.remove(&key);
            debug!(module = %record.module, "Expired token purged");
            return Err(ApiError::Authentication("token expired".into()));
        }
        if !record.scopes.iter().any(|s| s == API_CALL_SCOPE) {
            return Err(ApiError::Authentication(format!(
                "token lacks required scope {API_CALL_SCOPE}"
            )));
        }
        let allowed = &self.config.read().allowed_modules;
        if !allowed.is_empty() && !allowed.iter().any(|m| m == &record.module) {
            return Err(ApiError::Authentication(format!(
                "module {} is not allowed",
                record.module
            )));
        }
        if let Some(expected) = module {
            if expected != record.module {
                return Err(ApiError::Authentication(format!(
                    "token belongs to {}, not {expected}",
                    record.module
                )));
            }
        }
        Ok(record.info(&key))
    }

    /// Revoke tokens. Bulk scopes need `force` when they match anything.
    pub fn revoke(&self, scope: &TokenScope, force: bool) -> Result<usize, ApiError> {
        let keys: Vec<String> = match scope {
            TokenScope::Token(token) => {
                let key = digest(token);
                if self.tokens.remove(&key).is_none() {
                    return Err(ApiError::TokenNotFound);
                }
                info!("Token revoked");
                return Ok(1);
            }
            TokenScope::Module(module) => self.keys_where(|r| &r.module == module),
            TokenScope::User(user) => self.keys_where(|r| &r.user == user),
        };

        if !keys.is_empty() && !force {
            return Err(ApiError::ConfirmationRequired { count: keys.len() });
        }
        let removed = keys
            .iter()
            .filter(|k| self.tokens.remove(*k).is_some())
            .count();
        info!(?scope, removed, "Tokens revoked");
        Ok(removed)
    }

    fn keys_where(&self, pred: impl Fn(&TokenRecord) -> bool) -> Vec<String> {
        self.tokens
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn list_tokens(&self) -> Vec<TokenInfo> {
        let mut tokens: Vec<TokenInfo> = self
            .tokens
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        tokens.sort_by_key(|t| t.issued_at);
        tokens
    }

    /// Drop expired tokens, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let at = now();
        let mut removed = 0;
        self.tokens.retain(|_, record| {
            let live = record.expires_at > at;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

/// Rejects calls without a valid bearer token and attaches the caller's
/// identity to the context.
pub struct AuthMiddleware {
    security: Arc<SecurityContext>,
}

impl AuthMiddleware {
    pub fn new(security: Arc<SecurityContext>) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        SECURITY_MIDDLEWARE
    }

    async fn handle(&self, mut ctx: CallContext, next: Next) -> Result<Payload, ApiError> {
        if ctx.metadata.skip_security {
            debug!(api = %ctx.api_name(), "Security skipped for call");
            return next.run(ctx).await;
        }

        let header = ctx.header(AUTHORIZATION_HEADER).map(str::to_string);
        let token = match header {
            Some(value) => match value.strip_prefix(BEARER_PREFIX) {
                Some(token) => token.trim().to_string(),
                None => {
                    warn!(api = %ctx.api_name(), "Malformed authorization header");
                    return Err(ApiError::Authentication(
                        "authorization header must be 'Bearer <token>'".into(),
                    ));
                }
            },
            None if !self.security.config().require_authentication => {
                return next.run(ctx).await;
            }
            None => {
                warn!(api = %ctx.api_name(), "Call without bearer token rejected");
                return Err(ApiError::Authentication("missing bearer token".into()));
            }
        };

        let info = self.security.validate_token(&token, None).map_err(|e| {
            warn!(api = %ctx.api_name(), error = %e, "Token rejected");
            e
        })?;
        ctx.authentication = Some(Authentication {
            user: info.user,
            module: info.module,
            scopes: info.scopes,
            expires_at: info.expires_at,
        });
        next.run(ctx).await
    }
}
