//! justin.tv channel API client
//!
//! Wraps the platform's OAuth 1.0a flow and the two channel endpoints the
//! plugin uses (account lookup, channel metadata update). Every failure past
//! initial authorization is soft: it is logged and the current streaming
//! session continues untouched.

use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::oauth1::{self, Consumer, Token};

const API_BASE: &str = "http://api.justin.tv";

/// Where the client stands in the OAuth 1.0a handshake.
///
/// The request token is exchanged lazily: `begin_authorization` stops after
/// obtaining it, and the access-token exchange happens on the first API call
/// after the operator has approved the request in their browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AuthState {
    Unauthorized,
    RequestTokenIssued { token: Token },
    Authorized { token: Token },
}

/// Serialized credential blob stored in the configuration record.
#[derive(Serialize, Deserialize)]
struct CredentialBlob {
    consumer: Consumer,
    auth: AuthState,
}

struct ApiInner {
    consumer: Consumer,
    state: AuthState,
    save_callback: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

/// Handle to the channel API. Cloning shares the underlying state, so the
/// lazy access-token exchange happens once no matter who triggers it.
#[derive(Clone)]
pub struct JustinApi {
    inner: Arc<Mutex<ApiInner>>,
    http: reqwest::Client,
}

impl JustinApi {
    /// Start the authorization handshake: obtain a request token and return
    /// the URL the operator must open to approve it. Failure here is the one
    /// operator-facing error in the client; everything later is soft.
    pub async fn begin_authorization(
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<(String, JustinApi), String> {
        let consumer = Consumer {
            key: consumer_key.to_string(),
            secret: consumer_secret.to_string(),
        };
        let http = reqwest::Client::new();

        let url = format!("{API_BASE}/oauth/request_token");
        let params = oauth1::sign_request("GET", &url, &[], &consumer, None);
        let body = http
            .get(format!("{url}?{}", oauth1::query_string(&params)))
            .send()
            .await
            .map_err(|e| format!("Request token call failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("Request token call failed: {e}"))?
            .text()
            .await
            .map_err(|e| format!("Failed to read request token response: {e}"))?;

        let token = parse_token_response(&body)
            .ok_or_else(|| format!("Malformed request token response: {body}"))?;

        let authorize_url = format!("{API_BASE}/oauth/authorize?oauth_token={}", token.key);

        let api = JustinApi {
            inner: Arc::new(Mutex::new(ApiInner {
                consumer,
                state: AuthState::RequestTokenIssued { token },
                save_callback: None,
            })),
            http,
        };
        api.persist();

        Ok((authorize_url, api))
    }

    /// Restore a client from a previously saved credential blob.
    pub fn from_blob(blob: &str) -> Result<JustinApi, String> {
        let parsed: CredentialBlob = serde_json::from_str(blob)
            .map_err(|e| format!("Failed to parse stored platform credentials: {e}"))?;

        Ok(JustinApi {
            inner: Arc::new(Mutex::new(ApiInner {
                consumer: parsed.consumer,
                state: parsed.auth,
                save_callback: None,
            })),
            http: reqwest::Client::new(),
        })
    }

    /// Serialize the current credentials for storage.
    pub fn to_blob(&self) -> Result<String, String> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| "Platform client state poisoned".to_string())?;
        serde_json::to_string(&CredentialBlob {
            consumer: inner.consumer.clone(),
            auth: inner.state.clone(),
        })
        .map_err(|e| format!("Failed to serialize platform credentials: {e}"))
    }

    /// Register the persistence callback. It fires immediately with the
    /// current blob, then again after every state change.
    pub fn set_save_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if let Ok(mut inner) = self.inner.lock() {
            inner.save_callback = Some(Box::new(callback));
        }
        self.persist();
    }

    fn persist(&self) {
        let blob = match self.to_blob() {
            Ok(blob) => blob,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };
        if let Ok(inner) = self.inner.lock() {
            if let Some(ref callback) = inner.save_callback {
                callback(&blob);
            }
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner
            .lock()
            .map(|inner| inner.state.clone())
            .unwrap_or(AuthState::Unauthorized)
    }

    /// Drop back to Unauthorized. Called when the platform rejects our
    /// access token; the operator has to re-authorize from the settings
    /// panel.
    pub fn mark_token_expired(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            warn!("Platform access token rejected, re-authorization required");
            inner.state = AuthState::Unauthorized;
        }
        self.persist();
    }

    /// Return the access token, performing the lazy request-token exchange
    /// if the operator has approved but we never traded up. None means the
    /// client cannot make authorized calls right now.
    async fn ensure_access_token(&self) -> Option<Token> {
        let (consumer, pending) = {
            let inner = self.inner.lock().ok()?;
            match &inner.state {
                AuthState::Authorized { token } => return Some(token.clone()),
                AuthState::RequestTokenIssued { token } => {
                    (inner.consumer.clone(), token.clone())
                }
                AuthState::Unauthorized => return None,
            }
        };

        let url = format!("{API_BASE}/oauth/access_token");
        let params = oauth1::sign_request("GET", &url, &[], &consumer, Some(&pending));
        let response = self
            .http
            .get(format!("{url}?{}", oauth1::query_string(&params)))
            .send()
            .await;

        let body = match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to read access token response: {e}");
                    return None;
                }
            },
            Ok(resp) => {
                warn!("Access token exchange refused: HTTP {}", resp.status());
                return None;
            }
            Err(e) => {
                warn!("Access token exchange failed: {e}");
                return None;
            }
        };

        let token = match parse_token_response(&body) {
            Some(token) => token,
            None => {
                warn!("Malformed access token response");
                return None;
            }
        };

        if let Ok(mut inner) = self.inner.lock() {
            inner.state = AuthState::Authorized {
                token: token.clone(),
            };
        }
        self.persist();
        info!("Platform access token obtained");

        Some(token)
    }

    /// Signed GET against an API endpoint. None on any failure.
    pub async fn get_data(&self, endpoint: &str) -> Option<Value> {
        let token = self.ensure_access_token().await?;
        let consumer = self.inner.lock().ok()?.consumer.clone();

        let url = format!("{API_BASE}/api/{endpoint}");
        let params = oauth1::sign_request("GET", &url, &[], &consumer, Some(&token));

        let response = self
            .http
            .get(format!("{url}?{}", oauth1::query_string(&params)))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
                self.mark_token_expired();
                None
            }
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Failed to parse response from {endpoint}: {e}");
                    None
                }
            },
            Ok(resp) => {
                warn!("API call to {endpoint} refused: HTTP {}", resp.status());
                None
            }
            Err(e) => {
                warn!("API call to {endpoint} failed: {e}");
                None
            }
        }
    }

    /// Signed POST against an API endpoint with form parameters. None on
    /// any failure.
    pub async fn set_data(&self, endpoint: &str, fields: &[(String, String)]) -> Option<()> {
        let token = self.ensure_access_token().await?;
        let consumer = self.inner.lock().ok()?.consumer.clone();

        let url = format!("{API_BASE}/api/{endpoint}");
        let params = oauth1::sign_request("POST", &url, fields, &consumer, Some(&token));

        let response = self
            .http
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(oauth1::query_string(&params))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
                self.mark_token_expired();
                None
            }
            Ok(resp) if resp.status().is_success() => Some(()),
            Ok(resp) => {
                warn!("API call to {endpoint} refused: HTTP {}", resp.status());
                None
            }
            Err(e) => {
                warn!("API call to {endpoint} failed: {e}");
                None
            }
        }
    }

    /// Update the channel's title card: look up the authorized account's
    /// login, then push the status line and description.
    pub async fn push_channel_status(&self, status: &str, description: &str) -> Option<()> {
        let whoami = self.get_data("account/whoami.json").await?;
        let login = whoami.get("login")?.as_str()?.to_string();

        // Current metadata, logged for the session record only
        if let Some(channel) = self.get_data(&format!("channel/show/{login}.json")).await {
            info!(
                "Channel {login} before update: status={:?}",
                channel.get("status")
            );
        }

        let fields = vec![
            ("title".to_string(), status.to_string()),
            ("status".to_string(), status.to_string()),
            ("description".to_string(), description.to_string()),
        ];
        self.set_data("channel/update.json", &fields).await?;

        info!("Channel {login} status updated to {status:?}");
        Some(())
    }
}

/// Parse `oauth_token=...&oauth_token_secret=...` token responses.
/// Fragments that are not `name=value` pairs are skipped.
fn parse_token_response(body: &str) -> Option<Token> {
    let mut key = None;
    let mut secret = None;
    for pair in body.trim().split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        match name {
            "oauth_token" => key = Some(value.to_string()),
            "oauth_token_secret" => secret = Some(value.to_string()),
            _ => {}
        }
    }
    Some(Token {
        key: key?,
        secret: secret?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn authorized_api() -> JustinApi {
        JustinApi {
            inner: Arc::new(Mutex::new(ApiInner {
                consumer: Consumer {
                    key: "ck".to_string(),
                    secret: "cs".to_string(),
                },
                state: AuthState::Authorized {
                    token: Token {
                        key: "ak".to_string(),
                        secret: "as".to_string(),
                    },
                },
                save_callback: None,
            })),
            http: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_parse_token_response() {
        let token = parse_token_response("oauth_token=abc&oauth_token_secret=xyz").unwrap();
        assert_eq!(token.key, "abc");
        assert_eq!(token.secret, "xyz");

        assert!(parse_token_response("oauth_token=abc").is_none());
        assert!(parse_token_response("garbage").is_none());
    }

    #[test]
    fn test_parse_token_response_skips_bare_fragments() {
        // Trailing separators or bare flags must not reject a response
        // that carries both required tokens.
        let token =
            parse_token_response("confirmed&oauth_token=abc&oauth_token_secret=xyz&").unwrap();
        assert_eq!(token.key, "abc");
        assert_eq!(token.secret, "xyz");
    }

    #[test]
    fn test_blob_round_trip() {
        let api = authorized_api();
        let blob = api.to_blob().unwrap();
        let restored = JustinApi::from_blob(&blob).unwrap();
        match restored.auth_state() {
            AuthState::Authorized { token } => {
                assert_eq!(token.key, "ak");
                assert_eq!(token.secret, "as");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_from_blob_rejects_garbage() {
        assert!(JustinApi::from_blob("not json").is_err());
    }

    #[test]
    fn test_mark_token_expired_transitions_to_unauthorized() {
        let api = authorized_api();
        api.mark_token_expired();
        assert!(matches!(api.auth_state(), AuthState::Unauthorized));
    }

    #[test]
    fn test_save_callback_fires_on_registration_and_state_change() {
        let api = authorized_api();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        api.set_save_callback(move |blob| {
            assert!(blob.contains("\"state\""));
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        api.mark_token_expired();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_client_makes_no_calls() {
        let api = authorized_api();
        api.mark_token_expired();
        // No access token, no network traffic: returns None immediately.
        assert!(api.get_data("account/whoami.json").await.is_none());
        assert!(api.push_channel_status("live", "desc").await.is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let api = authorized_api();
        let clone = api.clone();
        api.mark_token_expired();
        assert!(matches!(clone.auth_state(), AuthState::Unauthorized));
    }
}
