#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::{X509, X509NameBuilder};
use starberry_esia::{Config, ConfigOptions, SignError, Signer, SigningMaterial};

pub const PORTAL: &str = "https://esia.test/";
pub const CLIENT_ID: &str = "INSP03211";
pub const REDIRECT: &str = "https://my-site.test/response";

/// Writes a throwaway self-signed certificate and its key into `dir`.
pub fn write_key_pair(dir: &Path, password: Option<&str>) -> (PathBuf, PathBuf) {
    let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "esia-test").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let key_pem = match password {
        Some(pw) => pkey
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), pw.as_bytes())
            .unwrap(),
        None => pkey.private_key_to_pem_pkcs8().unwrap(),
    };

    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
    fs::write(&key_path, key_pem).unwrap();
    (cert_path, key_path)
}

/// Key material in `keys_dir`, scratch files in a separate `tmp` subdirectory.
pub fn material(keys_dir: &Path, password: Option<&str>) -> SigningMaterial {
    let (cert, key) = write_key_pair(keys_dir, password);
    let tmp = keys_dir.join("tmp");
    fs::create_dir_all(&tmp).unwrap();
    SigningMaterial::new(cert, key, password.map(str::to_string), tmp)
}

pub fn options() -> ConfigOptions {
    ConfigOptions {
        client_id: CLIENT_ID.to_string(),
        redirect_url: REDIRECT.to_string(),
        portal_url: Some(PORTAL.to_string()),
        cert_path: "/tmp/server.crt".to_string(),
        private_key_path: "/tmp/server.key".to_string(),
        scope: Some(vec!["openid".to_string(), "fullname".to_string()]),
        ..ConfigOptions::default()
    }
}

pub fn config() -> Config {
    Config::new(options()).unwrap()
}

/// Config for a session that already holds a token for subject `1000`.
pub fn authenticated_config() -> Config {
    Config::new(ConfigOptions {
        token: Some("tok".to_string()),
        oid: Some("1000".to_string()),
        ..options()
    })
    .unwrap()
}

/// Signer returning a fixed value and recording what it was asked to sign.
#[derive(Clone, Default)]
pub struct RecordingSigner {
    pub signature: String,
    pub messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSigner {
    pub fn new(signature: &str) -> Self {
        Self { signature: signature.to_string(), messages: Arc::default() }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Signer for RecordingSigner {
    async fn sign(&self, message: &str) -> Result<String, SignError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(self.signature.clone())
    }
}

/// Signer that always fails like a broken backend.
pub struct FailingSigner;

#[async_trait]
impl Signer for FailingSigner {
    async fn sign(&self, _message: &str) -> Result<String, SignError> {
        Err(SignError::SignFailed("backend down".to_string()))
    }
}
