mod common;

use std::fs;
use std::time::Duration;

use serde_json::json;
use starberry_esia::encoding::url_safe_encode;
use starberry_esia::{
    CliSigner, DssSigner, DssSignerOptions, HttpResponse, InMemoryHttpClient, Pkcs7Signer, SignError, Signer,
    SigningMaterial,
};

fn assert_url_safe(signature: &str) {
    assert!(!signature.is_empty());
    assert!(!signature.contains('+'));
    assert!(!signature.contains('/'));
    assert!(!signature.contains('\n'));
    assert!(!signature.ends_with('='));
}

#[tokio::test]
async fn test_pkcs7_sign_produces_url_safe_signature() {
    let dir = tempfile::tempdir().unwrap();
    let material = common::material(dir.path(), None);
    let tmp = material.tmp_path.clone();
    let signer = Pkcs7Signer::new(material);

    let signature = signer.sign("message").await.unwrap();
    assert_url_safe(&signature);

    // The signature section decodes to a DER SEQUENCE.
    let der = starberry_esia::encoding::decode_base64_lenient(&signature).unwrap();
    assert_eq!(der[0], 0x30);

    // Scratch files are gone.
    assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
}

#[tokio::test]
async fn test_pkcs7_sign_with_encrypted_key() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Pkcs7Signer::new(common::material(dir.path(), Some("test")));
    let signature = signer.sign("scope2024.01.01 00:00:00 +0300clientstate").await.unwrap();
    assert_url_safe(&signature);
}

#[tokio::test]
async fn test_pkcs7_wrong_password_is_key_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut material = common::material(dir.path(), Some("test"));
    material.private_key_password = Some("wrong".to_string());
    let err = Pkcs7Signer::new(material).sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::PrivateKeyParse(_)), "{err:?}");
}

#[tokio::test]
async fn test_pkcs7_garbage_certificate_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let material = common::material(dir.path(), None);
    fs::write(&material.cert_path, b"not a certificate").unwrap();
    let err = Pkcs7Signer::new(material).sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::CertificateParse(_)), "{err:?}");
}

#[tokio::test]
async fn test_pkcs7_signs_message_with_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Pkcs7Signer::new(common::material(dir.path(), None));

    let signature = signer.sign("line1\n\nline2").await.unwrap();
    assert_url_safe(&signature);
    assert!(!signature.contains([' ', '"', ':']));
    let der = starberry_esia::encoding::decode_base64_lenient(&signature).unwrap();
    assert_eq!(der[0], 0x30);
}

#[tokio::test]
async fn test_preconditions_are_checked_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let material = common::material(dir.path(), None);

    let mut no_cert = material.clone();
    no_cert.cert_path = dir.path().join("missing.crt");
    let err = Pkcs7Signer::new(no_cert).sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::CertificateNotFound));

    let mut no_key = material.clone();
    no_key.private_key_path = dir.path().join("missing.key");
    let err = Pkcs7Signer::new(no_key).sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::PrivateKeyNotFound));

    let mut no_tmp = material.clone();
    no_tmp.tmp_path = dir.path().join("nowhere");
    let err = Pkcs7Signer::new(no_tmp).sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::TmpDirNotFound));

    let mut tmp_is_file = material.clone();
    tmp_is_file.tmp_path = material.cert_path.clone();
    let err = Pkcs7Signer::new(tmp_is_file).sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::TmpDirNotWritable));
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_only_tmp_dir_is_not_writable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let material = common::material(dir.path(), None);
    fs::set_permissions(&material.tmp_path, fs::Permissions::from_mode(0o555)).unwrap();

    // Permission bits do not bind a privileged user.
    let privileged = fs::write(material.tmp_path.join("canary"), b"x").is_ok();
    if !privileged {
        let err = Pkcs7Signer::new(material.clone()).sign("message").await.unwrap_err();
        assert!(matches!(err, SignError::TmpDirNotWritable), "{err:?}");
    }
    fs::set_permissions(&material.tmp_path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn test_deleting_certificate_after_setup_fails_signing() {
    let dir = tempfile::tempdir().unwrap();
    let material = common::material(dir.path(), None);
    let signer = Pkcs7Signer::new(material.clone());
    assert!(signer.sign("message").await.is_ok());

    fs::remove_file(&material.cert_path).unwrap();
    let err = signer.sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::CertificateNotFound));
}

#[tokio::test]
async fn test_cli_nonzero_exit_without_stderr_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let signer = CliSigner::new(common::material(dir.path(), None)).with_program("false");
    let err = signer.sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::SignFailed(ref msg) if msg == "unknown"), "{err:?}");
}

#[tokio::test]
async fn test_cli_missing_program_is_sign_failure() {
    let dir = tempfile::tempdir().unwrap();
    let signer = CliSigner::new(common::material(dir.path(), None)).with_program("/nonexistent/esia-signer");
    let err = signer.sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::SignFailed(_)));
}

#[cfg(unix)]
fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_cli_reads_der_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let material = common::material(dir.path(), Some("test"));
    let tmp = material.tmp_path.clone();
    let script = write_script(
        dir.path(),
        "fake-openssl",
        r#"out=""
seen_pass=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -out) out="$2" ;;
    -passin) seen_pass="$2" ;;
  esac
  shift
done
[ "$seen_pass" = "pass:test" ] || { echo "bad password" >&2; exit 2; }
printf '\373\377signature' > "$out"
"#,
    );
    let signer = CliSigner::new(material).with_program(script);

    let signature = signer.sign("message").await.unwrap();
    assert_eq!(signature, url_safe_encode(b"\xfb\xffsignature"));
    assert_url_safe(&signature);
    assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_cli_stderr_is_carried_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "broken-openssl", "echo 'engine \"gost\" not found' >&2\nexit 3\n");
    let signer = CliSigner::new(common::material(dir.path(), None)).with_program(script);
    let err = signer.sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::SignFailed(ref msg) if msg == "engine \"gost\" not found"), "{err:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cli_empty_output_is_sign_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "silent-openssl", "exit 0\n");
    let signer = CliSigner::new(common::material(dir.path(), None)).with_program(script);
    let err = signer.sign("message").await.unwrap_err();
    assert!(matches!(err, SignError::SignFailed(_)));
}

fn dss_options() -> DssSignerOptions {
    DssSignerOptions {
        sign_url: "https://dss.test/SignServer/rest/api/documents".to_string(),
        certificate_id: "7".to_string(),
        pin_code: "0000".to_string(),
        oauth_url: "https://dss.test/STS/oauth/token".to_string(),
        oauth_form: vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), "esia".to_string()),
        ],
        timeout_secs: Some(5),
    }
}

#[tokio::test]
async fn test_dss_sign_flow() {
    let client = InMemoryHttpClient::new();
    let options = dss_options();
    client.insert_response(&options.oauth_url, HttpResponse::json(200, &json!({"access_token": "dss-token"})));
    client.insert_response(&options.sign_url, HttpResponse::json(200, &json!("MIIB+/x==")));

    let signer = DssSigner::new(options.clone(), client.clone());
    let signature = signer.sign("hello").await.unwrap();
    assert_eq!(signature, "MIIB-_x");

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, options.oauth_url);
    assert_eq!(
        String::from_utf8(requests[0].body.clone().unwrap()).unwrap(),
        "grant_type=client_credentials&client_id=esia"
    );
    assert_eq!(requests[1].header("authorization"), Some("Bearer dss-token"));
    let body: serde_json::Value = serde_json::from_slice(requests[1].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["Content"], "aGVsbG8=");
    assert_eq!(body["Signature"]["Type"], "CAdES");
    assert_eq!(body["Signature"]["Parameters"]["IsDetached"], "True");
    assert_eq!(body["Signature"]["CertificateId"], "7");
    assert!(requests.iter().all(|r| r.timeout == Some(Duration::from_secs(5))));
}

#[test]
fn test_dss_options_accept_form_as_object_or_pairs() {
    let from_object: DssSignerOptions = serde_json::from_str(
        r#"{
            "signUrl": "https://dss.test/sign",
            "certificateId": "7",
            "pinCode": "0000",
            "oauthUrl": "https://dss.test/token",
            "oauthData": {"grant_type": "password", "username": "u", "password": "p"}
        }"#,
    )
    .unwrap();
    assert_eq!(
        from_object.oauth_form,
        [
            ("grant_type".to_string(), "password".to_string()),
            ("username".to_string(), "u".to_string()),
            ("password".to_string(), "p".to_string()),
        ]
    );

    let from_pairs: DssSignerOptions =
        serde_json::from_value(json!({"oauth_form": [["grant_type", "client_credentials"]]})).unwrap();
    assert_eq!(from_pairs.oauth_form, [("grant_type".to_string(), "client_credentials".to_string())]);
    assert!(from_pairs.timeout_secs.is_none());
}

#[cfg(feature = "reqwest")]
#[tokio::test]
async fn test_dss_insecure_constructor_validates_before_network() {
    let signer = DssSigner::insecure(DssSignerOptions { oauth_url: String::new(), ..dss_options() }).unwrap();
    let err = signer.sign("hello").await.unwrap_err();
    assert!(matches!(err, SignError::Service(ref msg) if msg == "empty oauth_url"), "{err:?}");
}

#[tokio::test]
async fn test_dss_service_message_is_error() {
    let client = InMemoryHttpClient::new();
    let options = dss_options();
    client.insert_response(&options.oauth_url, HttpResponse::json(200, &json!({"access_token": "dss-token"})));
    client.insert_response(&options.sign_url, HttpResponse::json(400, &json!({"Message": "Invalid PIN"})));

    let err = DssSigner::new(options, client).sign("hello").await.unwrap_err();
    assert!(matches!(err, SignError::Service(ref msg) if msg == "Invalid PIN"), "{err:?}");
}

#[tokio::test]
async fn test_dss_missing_token_and_configuration() {
    let client = InMemoryHttpClient::new();
    let options = dss_options();
    client.insert_response(&options.oauth_url, HttpResponse::json(200, &json!({"error": "invalid_client"})));
    let err = DssSigner::new(options, client.clone()).sign("hello").await.unwrap_err();
    assert!(matches!(err, SignError::Service(ref msg) if msg == "token not found"));

    let err = DssSigner::new(DssSignerOptions { oauth_form: Vec::new(), ..dss_options() }, client)
        .sign("hello")
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::Service(_)));
}

#[test]
fn test_material_debug_hides_password() {
    let material = SigningMaterial::new("/c", "/k", Some("hunter2".to_string()), "/tmp");
    let debug = format!("{material:?}");
    assert!(!debug.contains("hunter2"));
}
