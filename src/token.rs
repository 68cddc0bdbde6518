//! Token grants sent to the identity provider and the token responses it returns.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Grants the engine can exchange for an access token.
#[derive(Debug, Clone)]
pub enum Grant {
    /// Authorization code returned to the redirect URL.
    AuthorizationCode {
        code: String,
    },
    /// Refresh token from an earlier exchange.
    RefreshToken {
        token: String,
    },
    /// Client credentials scoped to one organization.
    Organization {
        org_oid: String,
    },
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
            Grant::Organization { .. } => "client_credentials",
        }
    }
}

/// Full token response of a person token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Unix time one second before the token lapses.
    #[serde(default)]
    pub expires: Option<i64>,
    /// Subject id read from the access token.
    #[serde(default)]
    pub oid: String,
    /// Any other fields of the response.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenData {
    pub(crate) fn from_response(payload: Map<String, Value>, oid: String) -> Result<Self, serde_json::Error> {
        let mut data: TokenData = serde_json::from_value(Value::Object(payload))?;
        data.expires = data.expires_in.map(|secs| Utc::now().timestamp() + secs - 1);
        data.oid = oid;
        Ok(data)
    }

    /// Whether the token has lapsed; `false` when the lifetime is unknown.
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| Utc::now().timestamp() > expires)
    }
}
