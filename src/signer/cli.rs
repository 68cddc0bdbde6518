use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use super::{Signer, SigningMaterial};
use crate::encoding::url_safe_encode;
use crate::error::SignError;

/// Detached signer that shells out to `openssl smime` (GOST engine by default).
#[derive(Debug, Clone)]
pub struct CliSigner {
    material: SigningMaterial,
    program: OsString,
    engine: Option<String>,
}

impl CliSigner {
    pub fn new(material: SigningMaterial) -> Self {
        Self { material, program: OsString::from("openssl"), engine: Some("gost".to_string()) }
    }

    /// Use another executable with the same command-line contract.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Crypto engine passed as `-engine`; `None` omits the flag.
    pub fn with_engine(mut self, engine: Option<String>) -> Self {
        self.engine = engine;
        self
    }

    fn arguments(&self, message_path: &std::path::Path, sign_path: &std::path::Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["smime".into()];
        if let Some(engine) = &self.engine {
            args.push("-engine".into());
            args.push(engine.into());
        }
        for flag in ["-sign", "-binary", "-outform", "DER", "-noattr"] {
            args.push(flag.into());
        }
        args.push("-signer".into());
        args.push(self.material.cert_path.clone().into());
        args.push("-inkey".into());
        args.push(self.material.private_key_path.clone().into());
        args.push("-passin".into());
        args.push(format!("pass:{}", self.material.password()).into());
        args.push("-in".into());
        args.push(message_path.into());
        args.push("-out".into());
        args.push(sign_path.into());
        args
    }
}

#[async_trait]
impl Signer for CliSigner {
    #[instrument(skip(self, message), level = "debug")]
    async fn sign(&self, message: &str) -> Result<String, SignError> {
        self.material.check()?;

        let mut message_file = self.material.scratch_file()?;
        message_file.write_all(message.as_bytes())?;
        message_file.flush()?;
        let sign_file = self.material.scratch_file()?;

        let output = Command::new(&self.program)
            .args(self.arguments(message_file.path(), sign_file.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SignError::SignFailed(format!("cannot run signing tool: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let diagnostic = if stderr.is_empty() { "unknown".to_string() } else { stderr };
            error!(ssl_error = %diagnostic, status = ?output.status.code(), "sign fail");
            return Err(SignError::SignFailed(diagnostic));
        }
        debug!(stdout_len = output.stdout.len(), "signing tool finished");

        let signed = fs::read(sign_file.path())
            .map_err(|e| SignError::SignFailed(format!("cannot read signature file: {e}")))?;
        if signed.is_empty() {
            return Err(SignError::SignFailed("signing tool produced no output".to_string()));
        }
        Ok(url_safe_encode(&signed))
    }
}
