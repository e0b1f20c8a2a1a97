//! IAM API-key to bearer-token exchange.
//!
//! The token endpoint takes a form-encoded POST of
//! `apikey`, `response_type` and `grant_type` and answers with a JSON body
//! carrying `access_token`.  Tokens are fetched fresh for every download;
//! nothing is cached and nothing is retried.

use metrics::counter;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::EngineError;
use crate::metrics::IAM_EXCHANGES_TOTAL;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Exchanges IAM API keys for bearer tokens.
pub struct IamTokenExchanger {
    client: reqwest::Client,
}

impl IamTokenExchanger {
    /// Create an exchanger whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }

    /// Exchange `api_key` for a bearer token at `url`.
    ///
    /// An empty key fails before any request is made.  `response_type` and
    /// `grant_type` are sent only when declared.
    pub async fn exchange(
        &self,
        api_key: &str,
        url: &str,
        response_type: Option<&str>,
        grant_type: Option<&str>,
    ) -> Result<String, EngineError> {
        let result = self.exchange_inner(api_key, url, response_type, grant_type).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(IAM_EXCHANGES_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn exchange_inner(
        &self,
        api_key: &str,
        url: &str,
        response_type: Option<&str>,
        grant_type: Option<&str>,
    ) -> Result<String, EngineError> {
        let auth_error = |message: String| EngineError::UpstreamAuth {
            url: url.to_string(),
            message,
        };

        if api_key.is_empty() {
            return Err(auth_error(
                "no valid api key to authenticate against iam".to_string(),
            ));
        }

        let mut form: Vec<(&str, &str)> = vec![("apikey", api_key)];
        if let Some(rt) = response_type {
            form.push(("response_type", rt));
        }
        if let Some(gt) = grant_type {
            form.push(("grant_type", gt));
        }

        debug!("Requesting IAM token from {}", url);
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| auth_error(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(auth_error(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| auth_error(format!("malformed token response: {e}")))?;

        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_error("no access_token in token response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchanger() -> IamTokenExchanger {
        IamTokenExchanger::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_exchange_posts_form_and_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string(
                "apikey=my-key&response_type=cloud_iam&grant_type=urn%3Aibm%3Aparams%3Aoauth%3Agrant-type%3Aapikey",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-123",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = exchanger()
            .exchange(
                "my-key",
                &format!("{}/identity/token", server.uri()),
                Some("cloud_iam"),
                Some("urn:ibm:params:oauth:grant-type:apikey"),
            )
            .await
            .unwrap();
        assert_eq!(token, "tok-123");
    }

    #[tokio::test]
    async fn test_empty_api_key_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = exchanger()
            .exchange("", &server.uri(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UpstreamAuthError");
    }

    #[tokio::test]
    async fn test_non_success_is_upstream_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad apikey"))
            .mount(&server)
            .await;

        let err = exchanger()
            .exchange("k", &server.uri(), None, None)
            .await
            .unwrap_err();
        match err {
            EngineError::UpstreamAuth { message, .. } => {
                assert!(message.contains("400"));
                assert!(message.contains("bad apikey"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_upstream_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"expires_in": 1})),
            )
            .mount(&server)
            .await;

        let err = exchanger()
            .exchange("k", &server.uri(), None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no access_token"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_upstream_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = exchanger()
            .exchange("k", &server.uri(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UpstreamAuthError");
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = IamTokenExchanger::new(Duration::from_millis(50))
            .unwrap()
            .exchange("k", &server.uri(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UpstreamAuthError");
    }
}
