//! Client identity, endpoints, signing material and session state.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_PORTAL_URL: &str = "https://esia-portal1.test.gosuslugi.ru/";
pub const DEFAULT_TOKEN_PATH: &str = "aas/oauth2/te";
pub const DEFAULT_CODE_PATH: &str = "aas/oauth2/ac";
pub const DEFAULT_PERSON_PATH: &str = "rs/prns";
pub const DEFAULT_LOGOUT_PATH: &str = "idp/ext/Logout";
pub const DEFAULT_ORGANIZATION_PATH: &str = "rs/orgs";
pub const DEFAULT_ORGANIZATION_SCOPE: &str = "http://esia.gosuslugi.ru/org_inf";
pub const DEFAULT_SCOPE: [&str; 8] = [
    "fullname", "birthdate", "gender", "email", "mobile", "id_doc", "snils", "inn",
];

const RESPONSE_TYPE: &str = "code";
const ACCESS_TYPE: &str = "offline";

/// Raw, unvalidated options. Field names accept both `snake_case` and the
/// `camelCase` keys used by existing ESIA integrations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigOptions {
    #[serde(alias = "clientId")]
    pub client_id: String,
    #[serde(alias = "redirectUrl")]
    pub redirect_url: String,
    #[serde(alias = "portalUrl")]
    pub portal_url: Option<String>,
    #[serde(alias = "tokenUrl")]
    pub token_path: Option<String>,
    #[serde(alias = "codeUrl")]
    pub code_path: Option<String>,
    #[serde(alias = "personUrl")]
    pub person_path: Option<String>,
    #[serde(alias = "logoutUrl")]
    pub logout_path: Option<String>,
    #[serde(alias = "organizationUrl")]
    pub organization_path: Option<String>,
    /// Scope requested for organization tokens, before `?org_oid=`.
    #[serde(alias = "organizationScope")]
    pub organization_scope: Option<String>,
    #[serde(alias = "certPath")]
    pub cert_path: String,
    #[serde(alias = "privateKeyPath")]
    pub private_key_path: String,
    #[serde(alias = "privateKeyPassword")]
    pub private_key_password: Option<String>,
    pub scope: Option<Vec<String>>,
    #[serde(alias = "tmpPath")]
    pub tmp_path: Option<PathBuf>,
    /// Previously obtained bearer token, to resume a session.
    pub token: Option<String>,
    /// Previously obtained subject id, to resume a session.
    pub oid: Option<String>,
    /// Per-request timeout in seconds; unset leaves the transport default.
    #[serde(alias = "timeout")]
    pub timeout_secs: Option<u64>,
}

/// Validated configuration.
///
/// Everything is fixed at construction except `token` and `oid`, which the
/// protocol engine sets after a successful code exchange.
#[derive(Debug, Clone)]
pub struct Config {
    client_id: String,
    redirect_url: String,
    portal_url: String,
    token_path: String,
    code_path: String,
    person_path: String,
    logout_path: String,
    organization_path: String,
    organization_scope: String,
    cert_path: PathBuf,
    private_key_path: PathBuf,
    private_key_password: Option<String>,
    scope: Vec<String>,
    tmp_path: PathBuf,
    token: String,
    oid: String,
    timeout: Option<Duration>,
}

impl Config {
    /// Validates `options` and fills in defaults.
    pub fn new(options: ConfigOptions) -> Result<Self, ConfigError> {
        require("client_id", &options.client_id)?;
        require("redirect_url", &options.redirect_url)?;
        require("cert_path", &options.cert_path)?;
        require("private_key_path", &options.private_key_path)?;

        let scope = match options.scope {
            Some(scope) if scope.is_empty() => return Err(ConfigError::EmptyScope),
            Some(scope) => scope,
            None => DEFAULT_SCOPE.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            client_id: options.client_id,
            redirect_url: options.redirect_url,
            portal_url: options.portal_url.unwrap_or_else(|| DEFAULT_PORTAL_URL.to_string()),
            token_path: options.token_path.unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string()),
            code_path: options.code_path.unwrap_or_else(|| DEFAULT_CODE_PATH.to_string()),
            person_path: options.person_path.unwrap_or_else(|| DEFAULT_PERSON_PATH.to_string()),
            logout_path: options.logout_path.unwrap_or_else(|| DEFAULT_LOGOUT_PATH.to_string()),
            organization_path: options
                .organization_path
                .unwrap_or_else(|| DEFAULT_ORGANIZATION_PATH.to_string()),
            organization_scope: options
                .organization_scope
                .unwrap_or_else(|| DEFAULT_ORGANIZATION_SCOPE.to_string()),
            cert_path: PathBuf::from(options.cert_path),
            private_key_path: PathBuf::from(options.private_key_path),
            private_key_password: options.private_key_password,
            scope,
            tmp_path: options.tmp_path.unwrap_or_else(std::env::temp_dir),
            token: options.token.unwrap_or_default(),
            oid: options.oid.unwrap_or_default(),
            timeout: options.timeout_secs.map(Duration::from_secs),
        })
    }

    /// Deserializes options from any JSON value (parsed file, env map, ...) and validates them.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if let Some(scope) = value.get("scope") {
            let is_string_list = scope
                .as_array()
                .is_some_and(|items| items.iter().all(|item| item.is_string()));
            if !is_string_list {
                return Err(ConfigError::InvalidScope(scope.to_string()));
            }
        }
        let options: ConfigOptions =
            serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Self::new(options)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn portal_url(&self) -> &str {
        &self.portal_url
    }

    pub fn cert_path(&self) -> &PathBuf {
        &self.cert_path
    }

    pub fn private_key_path(&self) -> &PathBuf {
        &self.private_key_path
    }

    pub fn private_key_password(&self) -> Option<&str> {
        self.private_key_password.as_deref()
    }

    pub fn tmp_path(&self) -> &PathBuf {
        &self.tmp_path
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// Scope entries joined by single spaces, in configured order.
    pub fn scope_string(&self) -> String {
        self.scope.join(" ")
    }

    pub fn response_type(&self) -> &str {
        RESPONSE_TYPE
    }

    pub fn access_type(&self) -> &str {
        ACCESS_TYPE
    }

    pub fn token_url(&self) -> String {
        format!("{}{}", self.portal_url, self.token_path)
    }

    pub fn code_url(&self) -> String {
        format!("{}{}", self.portal_url, self.code_path)
    }

    pub fn logout_url(&self) -> String {
        format!("{}{}", self.portal_url, self.logout_path)
    }

    /// Root of the organization resources, without a trailing slash.
    pub fn organization_url(&self) -> String {
        format!("{}{}", self.portal_url, self.organization_path)
    }

    /// Scope asking for the data of organization `org_oid`.
    pub fn organization_scope(&self, org_oid: &str) -> String {
        format!("{}?org_oid={}", self.organization_scope, org_oid)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Profile root of the authenticated person. Requires the subject id.
    pub fn person_url(&self) -> Result<String, ConfigError> {
        if self.oid.is_empty() {
            return Err(ConfigError::OidNotSet);
        }
        Ok(format!("{}{}/{}", self.portal_url, self.person_path, self.oid))
    }

    /// Bearer token; empty until a code exchange succeeds.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Subject id; empty until a code exchange succeeds.
    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub(crate) fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    pub(crate) fn set_oid(&mut self, oid: impl Into<String>) {
        self.oid = oid.into();
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(())
}
