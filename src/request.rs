//! HTTP request templates.
//!
//! A [`RequestTemplate`] is the option block declared under
//! `spec.requests[].options`.  The engine only touches a handful of fields
//! (URL, `qs`, `headers.Authorization`, `aws.key`, `aws.secret`); every other
//! option is carried through untouched so it survives expansion and
//! write-back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::credentials::ResolvedCredential;

/// Header the bearer overlay writes.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Access key / secret pair handed to the signing layer.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsOptions {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for AwsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsOptions")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Declared HTTP request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Query string parameters appended to the URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub qs: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// When `false`, server certificates are not verified.
    #[serde(rename = "strictSSL", default, skip_serializing_if = "Option::is_none")]
    pub strict_ssl: Option<bool>,

    /// Extra PEM-encoded root certificate(s) to trust.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsOptions>,

    /// Options the engine does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RequestTemplate {
    /// Template for a plain GET of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// The request URL; `uri` wins over `url` when both are declared.
    pub fn target_url(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }

    /// Copy of this template pointing at `new_url`.
    ///
    /// The URL is written back to whichever field declared it.
    pub fn with_url(&self, new_url: impl Into<String>) -> Self {
        let mut next = self.clone();
        if next.uri.is_some() {
            next.uri = Some(new_url.into());
        } else {
            next.url = Some(new_url.into());
        }
        next
    }

    /// Copy of this template without the `name` query parameter.
    pub fn without_query_param(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.qs.remove(name);
        next
    }

    /// Copy of this template with `credential` overlaid.
    ///
    /// HMAC credentials replace `aws.key` and `aws.secret`; bearer tokens
    /// replace `headers.Authorization`.  Nothing else changes.
    pub fn with_credential(&self, credential: &ResolvedCredential) -> Self {
        let mut next = self.clone();
        match credential {
            ResolvedCredential::Hmac {
                access_key_id,
                secret_access_key,
            } => {
                next.aws = Some(AwsOptions {
                    key: access_key_id.clone(),
                    secret: secret_access_key.clone(),
                });
            }
            ResolvedCredential::Bearer(token) => {
                next.headers
                    .insert(AUTHORIZATION_HEADER.to_string(), format!("bearer {token}"));
            }
        }
        next
    }

    /// Whether this request names a directory (URL path ends in `/`).
    ///
    /// URLs that do not parse are never directories; they pass through and
    /// fail when fetched.
    pub fn is_directory(&self) -> bool {
        self.target_url()
            .and_then(|u| url::Url::parse(u).ok())
            .map(|u| u.path().ends_with('/'))
            .unwrap_or(false)
    }

    /// Query parameters rendered as string pairs.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.qs
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}
