use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tracing::{debug, error, instrument};

use super::Signer;
use crate::encoding::{form_encode, url_safe};
use crate::error::SignError;
use crate::http_client::{EsiaHttpClient, HttpRequest};

/// Connection data for a CryptoPro DSS-style remote signing service.
///
/// The service is protected by its own OAuth2 server; `oauth_form` is the
/// client-credentials (or password) form posted to `oauth_url`, given either as a
/// JSON object or as a list of `[name, value]` pairs.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct DssSignerOptions {
    #[serde(alias = "signUrl")]
    pub sign_url: String,
    #[serde(alias = "certificateId")]
    pub certificate_id: String,
    #[serde(alias = "pinCode")]
    pub pin_code: String,
    #[serde(alias = "oauthUrl")]
    pub oauth_url: String,
    #[serde(alias = "oauthData", deserialize_with = "form_fields")]
    pub oauth_form: Vec<(String, String)>,
    /// Per-request timeout in seconds.
    #[serde(alias = "timeout")]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FormFields {
    Map(IndexMap<String, String>),
    Pairs(Vec<(String, String)>),
}

fn form_fields<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, String)>, D::Error> {
    Ok(match FormFields::deserialize(deserializer)? {
        FormFields::Map(map) => map.into_iter().collect(),
        FormFields::Pairs(pairs) => pairs,
    })
}

impl std::fmt::Debug for DssSignerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DssSignerOptions")
            .field("sign_url", &self.sign_url)
            .field("certificate_id", &self.certificate_id)
            .field("oauth_url", &self.oauth_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Remote CAdES-BES detached signer.
#[derive(Debug, Clone)]
pub struct DssSigner<C: EsiaHttpClient> {
    options: DssSignerOptions,
    client: C,
}

impl<C: EsiaHttpClient> DssSigner<C> {
    /// Use `DssSigner::insecure` when the service runs with a self-issued certificate.
    pub fn new(options: DssSignerOptions, client: C) -> Self {
        Self { options, client }
    }

    fn with_timeout(&self, request: HttpRequest) -> HttpRequest {
        match self.options.timeout_secs {
            Some(secs) => request.with_timeout(Duration::from_secs(secs)),
            None => request,
        }
    }

    fn validate(&self) -> Result<(), SignError> {
        let missing = [
            ("sign_url", self.options.sign_url.is_empty()),
            ("oauth_url", self.options.oauth_url.is_empty()),
            ("oauth_form", self.options.oauth_form.is_empty()),
        ];
        match missing.iter().find(|(_, empty)| *empty) {
            Some((field, _)) => Err(SignError::Service(format!("empty {field}"))),
            None => Ok(()),
        }
    }

    async fn fetch_token(&self) -> Result<String, SignError> {
        let request = self.with_timeout(
            HttpRequest::post(&self.options.oauth_url, form_encode(&self.options.oauth_form))
                .with_header("Content-Type", "application/x-www-form-urlencoded"),
        );
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| SignError::Service(format!("token request failed: {e}")))?;
        if !response.is_success() {
            return Err(SignError::Service(format!("token endpoint answered {}", response.status)));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: Option<String>,
        }
        let token: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| SignError::Service(format!("cannot decode token response: {e}")))?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SignError::Service("token not found".to_string()))
    }

    async fn sign_remote(&self, message: &str) -> Result<String, SignError> {
        let token = self.fetch_token().await?;
        self.request_signature(&token, message).await
    }

    async fn request_signature(&self, token: &str, message: &str) -> Result<String, SignError> {
        let body = json!({
            "Content": STANDARD.encode(message.as_bytes()),
            "Signature": {
                "Type": "CAdES",
                "Parameters": {
                    "Hash": "False",
                    "CADESType": "BES",
                    "IsDetached": "True",
                },
                "CertificateId": self.options.certificate_id,
                "PinCode": self.options.pin_code,
            }
        });
        let request = self.with_timeout(
            HttpRequest::post(&self.options.sign_url, body.to_string())
                .with_header("Authorization", format!("Bearer {token}"))
                .with_header("Content-Type", "application/json"),
        );
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| SignError::Service(format!("sign request failed: {e}")))?;

        let payload: Value = serde_json::from_slice(&response.body)
            .map_err(|e| SignError::Service(format!("cannot decode sign response: {e}")))?;
        match payload {
            Value::String(signature) if !signature.is_empty() => Ok(signature),
            Value::Object(map) if map.contains_key("Message") => {
                let message = map.get("Message").and_then(Value::as_str).unwrap_or("unknown");
                Err(SignError::Service(message.to_string()))
            }
            _ => Err(SignError::Service("wrong response".to_string())),
        }
    }
}

#[cfg(feature = "reqwest")]
impl DssSigner<crate::http_client::ReqwestHttpClient> {
    /// Signer over a reqwest transport that skips TLS certificate validation, as
    /// signing services usually run with self-issued certificates.
    pub fn insecure(options: DssSignerOptions) -> Result<Self, crate::http_client::HttpClientError> {
        Ok(Self::new(options, crate::http_client::ReqwestHttpClient::insecure()?))
    }
}

#[async_trait]
impl<C: EsiaHttpClient> Signer for DssSigner<C> {
    #[instrument(skip(self, message), level = "debug")]
    async fn sign(&self, message: &str) -> Result<String, SignError> {
        self.validate()?;
        match self.sign_remote(message).await {
            Ok(signature) => {
                debug!("sign success");
                Ok(url_safe(&signature))
            }
            Err(e) => {
                error!(error = %e, "sign fail");
                Err(e)
            }
        }
    }
}
