use std::fs;
use std::io::Write;

use async_trait::async_trait;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;
use tracing::{debug, error, instrument};

use super::{Signer, SigningMaterial};
use crate::encoding::{decode_base64_lenient, url_safe};
use crate::error::SignError;

/// Content type of the MIME part carrying the detached signature.
const SIGNATURE_CONTENT_TYPE: &str = "application/x-pkcs7-signature";

/// Tag byte of a DER SEQUENCE, the outer type of a PKCS#7 ContentInfo.
const DER_SEQUENCE: u8 = 0x30;

/// In-process PKCS#7 detached signer backed by OpenSSL.
#[derive(Debug, Clone)]
pub struct Pkcs7Signer {
    material: SigningMaterial,
}

impl Pkcs7Signer {
    pub fn new(material: SigningMaterial) -> Self {
        Self { material }
    }
}

#[async_trait]
impl Signer for Pkcs7Signer {
    #[instrument(skip(self, message), level = "debug")]
    async fn sign(&self, message: &str) -> Result<String, SignError> {
        let material = self.material.clone();
        let message = message.to_owned();
        tokio::task::spawn_blocking(move || sign_detached(&material, &message))
            .await
            .map_err(|e| SignError::SignFailed(e.to_string()))?
    }
}

fn sign_detached(material: &SigningMaterial, message: &str) -> Result<String, SignError> {
    material.check()?;

    let cert_pem = fs::read(&material.cert_path).map_err(|_| SignError::CertificateUnreadable)?;
    let key_pem = fs::read(&material.private_key_path).map_err(|_| SignError::PrivateKeyUnreadable)?;

    let cert = X509::from_pem(&cert_pem).map_err(|e| SignError::CertificateParse(e.to_string()))?;
    debug!("certificate loaded");
    let key = PKey::private_key_from_pem_passphrase(&key_pem, material.password().as_bytes())
        .map_err(|e| SignError::PrivateKeyParse(e.to_string()))?;
    debug!("private key loaded");

    // Both scratch files are removed when the handles go out of scope.
    let mut message_file = material.scratch_file()?;
    message_file.write_all(message.as_bytes())?;
    message_file.flush()?;
    let input = fs::read(message_file.path())?;

    let flags = Pkcs7Flags::DETACHED;
    let extra_certs = Stack::<X509>::new().map_err(|e| SignError::SignFailed(e.to_string()))?;
    let smime = Pkcs7::sign(&cert, &key, &extra_certs, &input, flags)
        .and_then(|pkcs7| pkcs7.to_smime(&input, flags))
        .map_err(|e| {
            error!(ssl_error = %e, "sign fail");
            SignError::SignFailed(e.to_string())
        })?;
    if smime.is_empty() {
        return Err(SignError::SignFailed("backend produced no output".to_string()));
    }

    let mut sign_file = material.scratch_file()?;
    sign_file.write_all(&smime)?;
    sign_file.flush()?;
    let signed = fs::read_to_string(sign_file.path())?;
    debug!("sign success");

    extract_signature(&signed).map(|section| url_safe(&section))
}

/// Pulls the base64 signature block out of an S/MIME `multipart/signed` document.
///
/// The block is the section after the last signature part header, so blank lines in
/// the signed content do not shift it. It must decode to a DER structure.
fn extract_signature(smime: &str) -> Result<String, SignError> {
    let normalized = smime.replace("\r\n", "\n");
    let sections: Vec<&str> = normalized.split("\n\n").collect();
    let header = sections
        .iter()
        .rposition(|section| section.contains(SIGNATURE_CONTENT_TYPE))
        .ok_or_else(|| SignError::SignFailed("no signature part in S/MIME output".to_string()))?;

    let block: String = sections
        .get(header + 1)
        .map(|section| section.split_whitespace().collect())
        .unwrap_or_default();
    let der = decode_base64_lenient(&block)
        .map_err(|e| SignError::SignFailed(format!("signature part is not base64: {e}")))?;
    if der.first() != Some(&DER_SEQUENCE) {
        return Err(SignError::SignFailed("signature part is not a DER structure".to_string()));
    }
    Ok(block)
}
