//! Url encoding helpers shared by the signer and the protocol engine.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left untouched by form encoding (RFC 3986 unreserved set).
const FORM_URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Standard alphabet, padding optional on decode.
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Percent-encodes a single query or form component.
///
/// # Example
/// ```
/// use starberry_esia::encoding::encode_url_owned;
/// assert_eq!(encode_url_owned("a b/c"), "a%20b%2Fc");
/// ```
pub fn encode_url_owned(input: &str) -> String {
    utf8_percent_encode(input, FORM_URLENCODE_SET).to_string()
}

/// Joins key/value pairs into an `application/x-www-form-urlencoded` string, keeping order.
pub fn form_encode<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_url_owned(k.as_ref()), encode_url_owned(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Turns standard base64 text into its url-safe form: trimmed, `+` to `-`, `/` to `_`,
/// no trailing `=` and no embedded line breaks.
pub fn url_safe(base64_text: &str) -> String {
    base64_text
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect::<String>()
        .trim_end_matches('=')
        .to_string()
}

/// Url-safe base64 of raw bytes, without padding.
pub fn url_safe_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes base64 in either alphabet, with or without padding.
pub fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let standard: String = input
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    LENIENT_STANDARD.decode(standard)
}
