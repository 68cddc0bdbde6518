//! Error taxonomy for the ESIA client: configuration, signing and request failures.

use thiserror::Error;

use crate::http_client::HttpClientError;

/// Invalid or incomplete client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required option is absent or empty.
    #[error("required configuration option `{0}` is missing or empty")]
    MissingField(&'static str),
    /// `scope` was given but is not a list of strings.
    #[error("scope must be a list of strings: {0}")]
    InvalidScope(String),
    /// `scope` was given as an empty list.
    #[error("scope must contain at least one entry")]
    EmptyScope,
    /// Options could not be deserialized.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The person URL needs a subject id, which is only known after token exchange.
    #[error("subject id (oid) is not set; exchange an authorization code first")]
    OidNotSet,
}

/// Failure while producing the detached signature used as `client_secret`.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("certificate file does not exist")]
    CertificateNotFound,
    #[error("certificate file is not readable")]
    CertificateUnreadable,
    #[error("private key file does not exist")]
    PrivateKeyNotFound,
    #[error("private key file is not readable")]
    PrivateKeyUnreadable,
    #[error("temporary directory does not exist")]
    TmpDirNotFound,
    #[error("temporary directory is not a writable directory")]
    TmpDirNotWritable,
    /// The backend rejected the certificate contents.
    #[error("cannot parse the certificate: {0}")]
    CertificateParse(String),
    /// The backend rejected the private key (or its password).
    #[error("cannot parse the private key: {0}")]
    PrivateKeyParse(String),
    /// The signing call itself failed; carries the backend's diagnostic text.
    #[error("signing failed: {0}")]
    SignFailed(String),
    /// The secure random source could not produce a state nonce.
    #[error("could not gather sufficient entropy for the state nonce")]
    RandomUnavailable,
    /// Scratch file handling in the temporary directory failed.
    #[error("temporary file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Remote signing service misconfigured, unreachable or answered unexpectedly.
    #[error("signing service error: {0}")]
    Service(String),
}

/// Failure talking to the identity provider's REST endpoints.
#[derive(Debug, Error)]
pub enum RequestError {
    /// A bearer-authenticated call was attempted before a token was obtained.
    #[error("token is empty; exchange an authorization code first")]
    TokenEmpty,
    /// The transport could not complete the round trip.
    #[error("request failed: {0}")]
    Transport(#[source] HttpClientError),
    /// HTTP error status other than 403.
    #[error("request failed with HTTP status {status}")]
    Status { status: u16, body: String },
    /// The response body is not JSON.
    #[error("cannot decode response body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The response body is JSON but not an object.
    #[error("response body is not a JSON object")]
    NotAnObject,
    /// The access token could not be decoded into a subject id.
    #[error("malformed access token: {0}")]
    MalformedToken(String),
    /// The response is a JSON object of an unexpected shape.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Any failure surfaced by [`crate::OpenId`].
#[derive(Debug, Error)]
pub enum EsiaError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Request(#[from] RequestError),
    /// HTTP 403: the provider rejected the credentials, as opposed to a transient failure.
    #[error("forbidden by the identity provider")]
    Forbidden { body: String },
}

pub type Result<T> = std::result::Result<T, EsiaError>;
