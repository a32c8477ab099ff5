//! Per-call context passed through the middleware chain to the handler.

use crate::domain::schema::Parameters;
use serde::Serialize;
use shared_types::{now, Timestamp};
use std::collections::HashMap;
use uuid::Uuid;

/// Header carrying `Bearer <token>`.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Identity attached by the security middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authentication {
    pub user: String,
    pub module: String,
    pub scopes: Vec<String>,
    pub expires_at: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CallMetadata {
    /// Bypass the security middleware for this call.
    pub skip_security: bool,
    /// 1-based attempt number.
    pub attempt: u32,
    pub values: HashMap<String, serde_json::Value>,
}

/// Everything a middleware or handler knows about the call in progress.
#[derive(Debug, Clone, Serialize)]
pub struct CallContext {
    pub call_id: Uuid,
    pub module: String,
    pub operation: String,
    pub parameters: Parameters,
    pub headers: HashMap<String, String>,
    pub metadata: CallMetadata,
    pub authentication: Option<Authentication>,
    pub started_at: Timestamp,
}

impl CallContext {
    pub fn new(module: &str, operation: &str, parameters: Parameters) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            module: module.to_string(),
            operation: operation.to_string(),
            parameters,
            headers: HashMap::new(),
            metadata: CallMetadata {
                attempt: 1,
                ..CallMetadata::default()
            },
            authentication: None,
            started_at: now(),
        }
    }

    /// `Module.Operation`.
    pub fn api_name(&self) -> String {
        format!("{}.{}", self.module, self.operation)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name)
    }
}
