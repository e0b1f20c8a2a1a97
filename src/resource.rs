//! Declared resource shape.
//!
//! The custom resource carries an optional `auth` block and a list of
//! `requests`.  Credential fields have accumulated several spellings over
//! time (`access_key_id`, `accessKeyId`, `accessKeyIdRef`, ...); each
//! spelling is kept as its own field here and the precedence between them
//! lives in [`crate::credentials`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::request::RequestTemplate;

/// `valueFrom.secretKeyRef` target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueFrom {
    #[serde(
        rename = "secretKeyRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// Object form of a credential field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialObject {
    #[serde(rename = "valueFrom", default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A credential field as declared: a literal, an object, or anything else.
///
/// Numbers and booleans are taken as literals in their textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "serde_json::Value")]
pub enum CredentialValue {
    Literal(String),
    Object(CredentialObject),
    Other(serde_json::Value),
}

impl From<serde_json::Value> for CredentialValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => CredentialValue::Literal(s),
            serde_json::Value::Number(n) => CredentialValue::Literal(n.to_string()),
            serde_json::Value::Bool(b) => CredentialValue::Literal(b.to_string()),
            serde_json::Value::Object(_) => match serde_json::from_value(value.clone()) {
                Ok(obj) => CredentialValue::Object(obj),
                Err(_) => CredentialValue::Other(value),
            },
            other => CredentialValue::Other(other),
        }
    }
}

impl CredentialValue {
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            CredentialValue::Literal(s) => Some(s),
            _ => None,
        }
    }

    /// The secret reference, if this is an object carrying one.
    pub fn as_secret_ref(&self) -> Option<&SecretKeyRef> {
        match self {
            CredentialValue::Object(obj) => obj
                .value_from
                .as_ref()
                .and_then(|v| v.secret_key_ref.as_ref()),
            _ => None,
        }
    }
}

/// `auth.hmac`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HmacSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<CredentialValue>,
    #[serde(rename = "accessKeyId", default, skip_serializing_if = "Option::is_none")]
    pub access_key_id_camel: Option<CredentialValue>,
    #[serde(rename = "accessKeyIdRef", default, skip_serializing_if = "Option::is_none")]
    pub access_key_id_ref: Option<CredentialValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<CredentialValue>,
    #[serde(
        rename = "secretAccessKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_access_key_camel: Option<CredentialValue>,
    #[serde(
        rename = "secretAccessKeyRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_access_key_ref: Option<CredentialValue>,
}

/// `auth.iam`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<CredentialValue>,
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key_camel: Option<CredentialValue>,
    #[serde(rename = "apiKeyRef", default, skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<CredentialValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    #[serde(rename = "responseType", default, skip_serializing_if = "Option::is_none")]
    pub response_type_camel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
    #[serde(rename = "grantType", default, skip_serializing_if = "Option::is_none")]
    pub grant_type_camel: Option<String>,
}

impl IamSpec {
    /// `response_type`, falling back to `responseType`.
    pub fn response_type(&self) -> Option<&str> {
        self.response_type
            .as_deref()
            .or(self.response_type_camel.as_deref())
    }

    /// `grant_type`, falling back to `grantType`.
    pub fn grant_type(&self) -> Option<&str> {
        self.grant_type.as_deref().or(self.grant_type_camel.as_deref())
    }
}

/// `spec.auth`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<HmacSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam: Option<IamSpec>,
}

/// One entry of `spec.requests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub options: RequestTemplate,

    /// Failure to download an optional request does not fail the pass.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DownloadRequest {
    /// Copy of this entry with its options replaced.
    pub fn with_options(&self, options: RequestTemplate) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    #[serde(default)]
    pub requests: Vec<DownloadRequest>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A `RemoteResourceS3` custom resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: RemoteResourceSpec,
}

impl RemoteResource {
    /// Namespace the resource lives in, or `default` when unset.
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.metadata.namespace.as_deref().unwrap_or(default)
    }

    /// Display name used in logs.
    pub fn display_name(&self) -> String {
        match (&self.metadata.namespace, &self.metadata.name) {
            (Some(ns), Some(name)) => format!("{ns}/{name}"),
            (None, Some(name)) => name.clone(),
            _ => "<unnamed>".to_string(),
        }
    }
}

/// Load a resource manifest (YAML or JSON) from `path`.
pub fn load_resource<P: AsRef<Path>>(path: P) -> anyhow::Result<RemoteResource> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let resource: RemoteResource = serde_yaml::from_str(&contents)?;
    Ok(resource)
}
