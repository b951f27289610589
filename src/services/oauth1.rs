//! OAuth 1.0a request signing for the justin.tv channel API
//!
//! The platform predates OAuth 2.0: every API call carries HMAC-SHA1 signed
//! `oauth_*` parameters built from a consumer pair and (once authorized) an
//! access token.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Application credentials registered with the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    pub key: String,
    pub secret: String,
}

/// A request or access token pair issued by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub key: String,
    pub secret: String,
}

/// Percent-encode per RFC 3986 (unreserved: ALPHA / DIGIT / '-' / '.' /
/// '_' / '~'), as OAuth 1.0a signatures require.
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Build the signature base string: method, base URL, and the sorted,
/// encoded parameter set joined with '&'.
fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&param_string)
    )
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sign a request. Returns the full parameter list (caller params plus the
/// `oauth_*` set) ready to serialize into a query string or form body.
pub fn sign_request(
    method: &str,
    url: &str,
    extra_params: &[(String, String)],
    consumer: &Consumer,
    token: Option<&Token>,
) -> Vec<(String, String)> {
    sign_request_at(
        method,
        url,
        extra_params,
        consumer,
        token,
        unix_timestamp(),
        generate_nonce(),
    )
}

/// Signing with caller-supplied timestamp and nonce. Split out so tests can
/// produce deterministic signatures.
pub fn sign_request_at(
    method: &str,
    url: &str,
    extra_params: &[(String, String)],
    consumer: &Consumer,
    token: Option<&Token>,
    timestamp: u64,
    nonce: String,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = extra_params.to_vec();
    params.push(("oauth_consumer_key".to_string(), consumer.key.clone()));
    params.push(("oauth_nonce".to_string(), nonce));
    params.push(("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()));
    params.push(("oauth_timestamp".to_string(), timestamp.to_string()));
    params.push(("oauth_version".to_string(), "1.0".to_string()));
    if let Some(token) = token {
        params.push(("oauth_token".to_string(), token.key.clone()));
    }

    let base = signature_base_string(method, url, &params);
    let signing_key = format!(
        "{}&{}",
        encode(&consumer.secret),
        encode(token.map(|t| t.secret.as_str()).unwrap_or(""))
    );

    let digest = hmac_sha1(signing_key.as_bytes(), base.as_bytes());
    let signature = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, digest);

    params.push(("oauth_signature".to_string(), signature));
    params
}

/// Render signed parameters as a query string.
pub fn query_string(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
