//! Client for the ESIA (Gosuslugi) OpenID flow.
//!
//! [`OpenId`] signs authorization requests with a detached PKCS#7/CAdES signature
//! (see [`signer`]), exchanges authorization codes for access tokens and fetches person and
//! organization data with the obtained bearer token.

pub mod config;
pub mod encoding;
pub mod error;
pub mod http_client;
pub mod openid;
pub mod signer;
pub mod token;

pub use config::{Config, ConfigOptions};
pub use error::{ConfigError, EsiaError, RequestError, SignError};
pub use http_client::{EsiaHttpClient, HttpClientError, HttpMethod, HttpRequest, HttpResponse, InMemoryHttpClient};
#[cfg(feature = "reqwest")]
pub use http_client::ReqwestHttpClient;
pub use openid::OpenId;
pub use signer::{CliSigner, DssSigner, DssSignerOptions, Pkcs7Signer, Signer, SigningMaterial};
pub use token::{Grant, TokenData};
