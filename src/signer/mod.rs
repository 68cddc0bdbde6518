//! Detached-signature backends producing the `client_secret` value.
//!
//! Every backend implements [`Signer`]; the protocol engine picks one at construction.

mod cli;
mod dss;
mod pkcs7;

pub use cli::CliSigner;
pub use dss::{DssSigner, DssSignerOptions};
pub use pkcs7::Pkcs7Signer;

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::SignError;

/// Signs a plaintext message and returns the url-safe encoded detached signature.
#[async_trait]
pub trait Signer: Send + Sync + 'static {
    async fn sign(&self, message: &str) -> Result<String, SignError>;
}

/// Certificate, private key and scratch directory shared by the file-based backends.
#[derive(Clone)]
pub struct SigningMaterial {
    pub cert_path: PathBuf,
    pub private_key_path: PathBuf,
    pub private_key_password: Option<String>,
    pub tmp_path: PathBuf,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("cert_path", &self.cert_path)
            .field("private_key_path", &self.private_key_path)
            .field("private_key_password", &self.private_key_password.as_ref().map(|_| "***"))
            .field("tmp_path", &self.tmp_path)
            .finish()
    }
}

impl SigningMaterial {
    pub fn new(
        cert_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
        private_key_password: Option<String>,
        tmp_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            private_key_path: private_key_path.into(),
            private_key_password,
            tmp_path: tmp_path.into(),
        }
    }

    /// Takes paths and password from a validated [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cert_path().clone(),
            config.private_key_path().clone(),
            config.private_key_password().map(str::to_string),
            config.tmp_path().clone(),
        )
    }

    /// Password with `None` meaning an unencrypted key.
    pub fn password(&self) -> &str {
        self.private_key_password.as_deref().unwrap_or_default()
    }

    /// Verifies the files and the scratch directory before any cryptographic work.
    pub fn check(&self) -> Result<(), SignError> {
        check_readable(&self.cert_path, SignError::CertificateNotFound, SignError::CertificateUnreadable)?;
        check_readable(&self.private_key_path, SignError::PrivateKeyNotFound, SignError::PrivateKeyUnreadable)?;
        if !self.tmp_path.exists() {
            return Err(SignError::TmpDirNotFound);
        }
        if !self.tmp_path.is_dir() {
            return Err(SignError::TmpDirNotWritable);
        }
        // Test write; the file is removed again when the handle drops.
        NamedTempFile::new_in(&self.tmp_path).map_err(|_| SignError::TmpDirNotWritable)?;
        Ok(())
    }

    /// A fresh, uniquely named file in the scratch directory, deleted on drop.
    pub(crate) fn scratch_file(&self) -> Result<NamedTempFile, SignError> {
        Ok(tempfile::Builder::new().prefix("esia-").tempfile_in(&self.tmp_path)?)
    }
}

fn check_readable(path: &Path, missing: SignError, unreadable: SignError) -> Result<(), SignError> {
    if !path.exists() {
        return Err(missing);
    }
    if !path.is_file() || File::open(path).is_err() {
        return Err(unreadable);
    }
    Ok(())
}
