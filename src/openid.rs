//! ESIA protocol engine: signed authorization URLs, code exchange and profile fetching.

use chrono::Local;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::encoding::{decode_base64_lenient, encode_url_owned, form_encode};
use crate::error::{EsiaError, RequestError, Result, SignError};
use crate::http_client::{EsiaHttpClient, HttpRequest};
use crate::signer::Signer;
use crate::token::{Grant, TokenData};

/// Claim carrying the subject id inside the access token payload.
pub const SUBJECT_CLAIM: &str = "urn:esia:sbj_id";

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S %z";

/// Client for one user authentication session.
///
/// Starts without a token; [`OpenId::get_token`] stores the token and subject id in the
/// configuration, after which the profile calls become available.
pub struct OpenId<C: EsiaHttpClient> {
    config: Config,
    client: C,
    signer: Box<dyn Signer>,
    rng: SystemRandom,
    token_data: Option<TokenData>,
}

impl<C: EsiaHttpClient> OpenId<C> {
    pub fn new(config: Config, client: C, signer: impl Signer) -> Self {
        Self { config, client, signer: Box::new(signer), rng: SystemRandom::new(), token_data: None }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Access token, empty before the code exchange.
    pub fn token(&self) -> &str {
        self.config.token()
    }

    /// Subject id, empty before the code exchange.
    pub fn oid(&self) -> &str {
        self.config.oid()
    }

    /// Full response of the last person token exchange or refresh.
    pub fn token_data(&self) -> Option<&TokenData> {
        self.token_data.as_ref()
    }

    pub fn code_url(&self) -> String {
        self.config.code_url()
    }

    pub fn token_url(&self) -> String {
        self.config.token_url()
    }

    pub fn person_url(&self) -> Result<String> {
        Ok(self.config.person_url()?)
    }

    /// Signs `message` with the configured backend.
    pub async fn sign(&self, message: &str) -> Result<String> {
        Ok(self.signer.sign(message).await?)
    }

    /// Builds the login URL the user agent is redirected to.
    ///
    /// Each call signs a fresh timestamp and state, so two URLs never repeat.
    #[instrument(skip(self), level = "debug")]
    pub async fn build_url(&self) -> Result<String> {
        let timestamp = timestamp();
        let state = self.build_state()?;
        let scope = self.config.scope_string();
        let client_secret = self.sign_request_message(&scope, &timestamp, &state).await?;

        let params = [
            ("client_id", self.config.client_id()),
            ("client_secret", client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url()),
            ("scope", scope.as_str()),
            ("response_type", self.config.response_type()),
            ("state", state.as_str()),
            ("access_type", self.config.access_type()),
            ("timestamp", timestamp.as_str()),
        ];
        Ok(format!("{}?{}", self.config.code_url(), form_encode(&params)))
    }

    /// Builds the single-logout URL, optionally sending the user back to `redirect_url`.
    pub fn build_logout_url(&self, redirect_url: Option<&str>) -> String {
        let mut url = format!(
            "{}?client_id={}",
            self.config.logout_url(),
            encode_url_owned(self.config.client_id())
        );
        if let Some(redirect_url) = redirect_url {
            url.push_str("&redirect_url=");
            url.push_str(&encode_url_owned(redirect_url));
        }
        url
    }

    /// Exchanges an authorization code for an access token and records the subject id.
    ///
    /// The state sent here is freshly generated and independent of the one in the
    /// authorization URL.
    #[instrument(skip(self, code), level = "debug")]
    pub async fn get_token(&mut self, code: &str) -> Result<String> {
        let data = self.request_token(&Grant::AuthorizationCode { code: code.to_string() }).await?;
        let token = data.access_token.clone();
        self.token_data = Some(data);
        Ok(token)
    }

    /// Trades a refresh token for a new access token.
    #[instrument(skip(self, refresh_token), level = "debug")]
    pub async fn refresh_token(&mut self, refresh_token: &str) -> Result<String> {
        let data = self.request_token(&Grant::RefreshToken { token: refresh_token.to_string() }).await?;
        let token = data.access_token.clone();
        self.token_data = Some(data);
        Ok(token)
    }

    /// Obtains a token for organization `org_oid` with the client credentials grant.
    ///
    /// The organization token replaces the session token; the full token data of the
    /// person exchange is left untouched.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_org_token(&mut self, org_oid: &str) -> Result<String> {
        let data = self.request_token(&Grant::Organization { org_oid: org_oid.to_string() }).await?;
        Ok(data.access_token)
    }

    /// Signs and posts `grant`, then stores the returned token and its subject id.
    pub async fn request_token(&mut self, grant: &Grant) -> Result<TokenData> {
        let timestamp = timestamp();
        let state = self.build_state()?;
        let scope = match grant {
            Grant::Organization { org_oid } => self.config.organization_scope(org_oid),
            _ => self.config.scope_string(),
        };
        let client_secret = self.sign_request_message(&scope, &timestamp, &state).await?;

        let client_id = self.config.client_id();
        let redirect_uri = self.config.redirect_url();
        let grant_type = grant.grant_type();
        let (url, body) = match grant {
            Grant::AuthorizationCode { code } => (
                self.config.token_url(),
                form_encode(&[
                    ("client_id", client_id),
                    ("code", code.as_str()),
                    ("grant_type", grant_type),
                    ("client_secret", client_secret.as_str()),
                    ("state", state.as_str()),
                    ("redirect_uri", redirect_uri),
                    ("scope", scope.as_str()),
                    ("timestamp", timestamp.as_str()),
                    ("token_type", "Bearer"),
                    ("refresh_token", state.as_str()),
                ]),
            ),
            Grant::RefreshToken { token } => (
                self.config.token_url(),
                form_encode(&[
                    ("client_id", client_id),
                    ("grant_type", grant_type),
                    ("client_secret", client_secret.as_str()),
                    ("state", state.as_str()),
                    ("redirect_uri", redirect_uri),
                    ("scope", scope.as_str()),
                    ("timestamp", timestamp.as_str()),
                    ("token_type", "Bearer"),
                    ("refresh_token", token.as_str()),
                ]),
            ),
            Grant::Organization { .. } => (
                self.config.code_url(),
                form_encode(&[
                    ("client_id", client_id),
                    ("response_type", "token"),
                    ("grant_type", grant_type),
                    ("scope", scope.as_str()),
                    ("state", state.as_str()),
                    ("timestamp", timestamp.as_str()),
                    ("token_type", "Bearer"),
                    ("client_secret", client_secret.as_str()),
                ]),
            ),
        };
        let request = HttpRequest::post(url, body)
            .with_header("Content-Type", "application/x-www-form-urlencoded");
        let payload = self.send_request(request).await?;

        let token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RequestError::UnexpectedShape("no access_token in token response".to_string()))?
            .to_string();
        let oid = subject_id(&token)?;
        let data = TokenData::from_response(payload, oid)
            .map_err(|e| RequestError::UnexpectedShape(format!("token response: {e}")))?;
        debug!(oid = %data.oid, grant_type, "token obtained");

        self.config.set_token(token);
        self.config.set_oid(data.oid.clone());
        Ok(data)
    }

    /// Person record of the authenticated user.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_person_info(&self) -> Result<Value> {
        let url = self.profile_url("")?;
        Ok(Value::Object(self.get_json(&url).await?))
    }

    /// Contacts (phones, e-mails). An array of element bodies, or the envelope as-is when empty.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_contact_info(&self) -> Result<Value> {
        self.fetch_collection(self.profile_url("/ctts")?).await
    }

    /// Addresses. An array of element bodies, or the envelope as-is when empty.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_address_info(&self) -> Result<Value> {
        self.fetch_collection(self.profile_url("/addrs")?).await
    }

    /// Identity documents. An array of element bodies, or the envelope as-is when empty.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_doc_info(&self) -> Result<Value> {
        self.fetch_collection(self.profile_url("/docs")?).await
    }

    /// Organizations the person belongs to, with their roles.
    ///
    /// Role entries are returned as listed in the envelope, without dereferencing.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_org_roles(&self) -> Result<Value> {
        let url = self.profile_url("/roles")?;
        let payload = self.get_json(&url).await?;
        if collection_size(&payload) == 0 {
            return Ok(Value::Object(payload));
        }
        Ok(payload.get("elements").cloned().unwrap_or_else(|| Value::Array(Vec::new())))
    }

    /// Organization record.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_org_info(&self, org_oid: &str) -> Result<Value> {
        let url = self.organization_resource_url(org_oid, "")?;
        Ok(Value::Object(self.get_json(&url).await?))
    }

    /// Employees of the organization.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_org_employees(&self, org_oid: &str) -> Result<Value> {
        self.fetch_collection(self.organization_resource_url(org_oid, "/emps")?).await
    }

    /// Addresses of the organization.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_org_addresses(&self, org_oid: &str) -> Result<Value> {
        self.fetch_collection(self.organization_resource_url(org_oid, "/addrs")?).await
    }

    /// Contacts of the organization.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_org_contacts(&self, org_oid: &str) -> Result<Value> {
        self.fetch_collection(self.organization_resource_url(org_oid, "/ctts")?).await
    }

    fn require_token(&self) -> Result<()> {
        if self.config.token().is_empty() {
            return Err(RequestError::TokenEmpty.into());
        }
        Ok(())
    }

    fn profile_url(&self, suffix: &str) -> Result<String> {
        self.require_token()?;
        Ok(format!("{}{}", self.config.person_url()?, suffix))
    }

    fn organization_resource_url(&self, org_oid: &str, suffix: &str) -> Result<String> {
        self.require_token()?;
        Ok(format!("{}/{}{}", self.config.organization_url(), encode_url_owned(org_oid), suffix))
    }

    async fn fetch_collection(&self, url: String) -> Result<Value> {
        let payload = self.get_json(&url).await?;
        if collection_size(&payload) == 0 {
            return Ok(Value::Object(payload));
        }
        let elements = match payload.get("elements") {
            Some(Value::Array(elements)) => elements.as_slice(),
            _ => &[],
        };
        Ok(Value::Array(self.collect_array_elements(elements).await?))
    }

    /// Dereferences each element URL in order, one request at a time.
    async fn collect_array_elements(&self, elements: &[Value]) -> Result<Vec<Value>> {
        let mut result = Vec::with_capacity(elements.len());
        for element in elements {
            let url = element.as_str().ok_or_else(|| {
                RequestError::UnexpectedShape(format!("collection element is not a URL: {element}"))
            })?;
            result.push(Value::Object(self.get_json(url).await?));
        }
        Ok(result)
    }

    async fn sign_request_message(&self, scope: &str, timestamp: &str, state: &str) -> Result<String> {
        let message = format!("{scope}{timestamp}{}{state}", self.config.client_id());
        Ok(self.signer.sign(&message).await?)
    }

    /// Random UUID v4 from the system CSPRNG.
    fn build_state(&self) -> std::result::Result<String, SignError> {
        let mut bytes = [0u8; 16];
        self.rng.fill(&mut bytes).map_err(|_| SignError::RandomUnavailable)?;
        Ok(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
    }

    /// Bearer-authenticated GET.
    async fn get_json(&self, url: &str) -> Result<Map<String, Value>> {
        let request = HttpRequest::get(url).with_header("Authorization", format!("Bearer {}", self.config.token()));
        self.send_request(request).await
    }

    async fn send_request(&self, mut request: HttpRequest) -> Result<Map<String, Value>> {
        if let Some(timeout) = self.config.timeout() {
            request = request.with_timeout(timeout);
        }
        let (method, url) = (request.method, request.url.clone());

        let response = self.client.execute(request).await.map_err(|e| {
            error!(%method, %url, error = %e, "request failed");
            RequestError::Transport(e)
        })?;

        if response.status == 403 {
            warn!(%method, %url, "forbidden");
            return Err(EsiaError::Forbidden { body: String::from_utf8_lossy(&response.body).into_owned() });
        }
        if response.status >= 400 {
            error!(%method, %url, status = response.status, "request failed");
            return Err(RequestError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }
            .into());
        }

        let body: Value = serde_json::from_slice(&response.body).map_err(|e| {
            error!(%method, %url, error = %e, "cannot decode response body");
            RequestError::InvalidJson(e)
        })?;
        match body {
            Value::Object(map) => Ok(map),
            _ => Err(RequestError::NotAnObject.into()),
        }
    }
}

fn collection_size(payload: &Map<String, Value>) -> u64 {
    payload.get("size").and_then(Value::as_u64).unwrap_or(0)
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Reads the subject id from the token payload. The token signature is not verified:
/// the token comes straight from the issuer over TLS.
pub fn subject_id(token: &str) -> std::result::Result<String, RequestError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| RequestError::MalformedToken("missing payload segment".to_string()))?;
    let decoded = decode_base64_lenient(payload)
        .map_err(|e| RequestError::MalformedToken(format!("payload is not base64: {e}")))?;
    let claims: Value = serde_json::from_slice(&decoded)
        .map_err(|e| RequestError::MalformedToken(format!("payload is not JSON: {e}")))?;
    match claims.get(SUBJECT_CLAIM) {
        Some(Value::String(oid)) if !oid.is_empty() => Ok(oid.clone()),
        Some(Value::Number(oid)) => Ok(oid.to_string()),
        _ => Err(RequestError::MalformedToken(format!("no {SUBJECT_CLAIM} claim"))),
    }
}

/// Whether `value` has the `xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx` state shape.
pub fn is_state_shaped(value: &str) -> bool {
    Uuid::parse_str(value).is_ok_and(|uuid| {
        uuid.get_version_num() == 4
            && uuid.get_variant() == uuid::Variant::RFC4122
            && uuid.hyphenated().to_string() == value
    })
}
