//! Secret stores and secret resolution.
//!
//! Credential fields may point at a Kubernetes `Secret` instead of carrying
//! a literal.  A [`SecretStore`] returns the raw `data` map of a secret
//! (values still base64-encoded); [`resolve_secret`] picks one key and
//! decodes it.  There is no caching: every resolution re-fetches.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use metrics::counter;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::debug;

use crate::config::KubeConfig;
use crate::errors::EngineError;
use crate::metrics::SECRET_LOOKUPS_TOTAL;

/// Key to base64-encoded value, as found under a secret's `data`.
pub type SecretData = BTreeMap<String, String>;

/// Namespaced secret lookup.
pub trait SecretStore: Send + Sync + 'static {
    /// Fetch the `data` map of secret `name` in `namespace`.
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SecretData, EngineError>> + Send + '_>>;
}

/// Resolve `key` of secret `name` in `namespace` to its decoded value.
///
/// A key that is absent from the secret resolves to the empty string; the
/// caller decides whether that is fatal.
pub async fn resolve_secret(
    store: &dyn SecretStore,
    name: &str,
    key: &str,
    namespace: &str,
) -> Result<String, EngineError> {
    let data = match store.get_secret(namespace, name).await {
        Ok(data) => {
            counter!(SECRET_LOOKUPS_TOTAL, "outcome" => "ok").increment(1);
            data
        }
        Err(e) => {
            counter!(SECRET_LOOKUPS_TOTAL, "outcome" => "error").increment(1);
            return Err(e);
        }
    };

    let Some(encoded) = data.get(key) else {
        debug!("Secret {}/{} has no key {}", namespace, name, key);
        return Ok(String::new());
    };

    let lookup_error = |message: String| EngineError::SecretLookup {
        namespace: namespace.to_string(),
        name: name.to_string(),
        message,
    };
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| lookup_error(format!("key {key} is not valid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| lookup_error(format!("key {key} is not utf-8: {e}")))
}

// -- Kubernetes API -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SecretObject {
    #[serde(default)]
    metadata: SecretMeta,
    #[serde(default)]
    data: Option<SecretData>,
}

#[derive(Debug, Default, Deserialize)]
struct SecretMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

/// Secret store backed by the Kubernetes API server.
pub struct KubeSecretStore {
    client: reqwest::Client,
    api_server: String,
    token: Option<String>,
}

impl KubeSecretStore {
    /// Build a store from the `kube` config section.
    ///
    /// The service-account token and CA bundle are read once here; missing
    /// files are tolerated so the store also works against an
    /// unauthenticated local API proxy.
    pub fn new(config: &KubeConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds));

        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Ok(pem) = std::fs::read(&config.ca_file) {
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                anyhow::anyhow!("Invalid cluster CA bundle {}: {e}", config.ca_file)
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let token = std::fs::read_to_string(&config.token_file)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self::with_client(client, config.api_server.clone(), token))
    }

    /// Build a store from an existing client.
    pub fn with_client(client: reqwest::Client, api_server: String, token: Option<String>) -> Self {
        Self {
            client,
            api_server: api_server.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn secret_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.api_server, namespace, name
        )
    }
}

impl SecretStore for KubeSecretStore {
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SecretData, EngineError>> + Send + '_>> {
        let namespace = namespace.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let url = self.secret_url(&namespace, &name);
            let lookup_error = |message: String| EngineError::SecretLookup {
                namespace: namespace.clone(),
                name: name.clone(),
                message,
            };

            let mut req = self.client.get(&url);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| lookup_error(format!("request failed: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(lookup_error(format!("api server returned {status}: {body}")));
            }

            let secret: SecretObject = resp
                .json()
                .await
                .map_err(|e| lookup_error(format!("malformed secret: {e}")))?;
            Ok(secret.data.unwrap_or_default())
        })
    }
}

// -- Local stores -------------------------------------------------------------

/// In-process secret store keyed by `(namespace, name)`.
#[derive(Debug, Default, Clone)]
pub struct MemorySecretStore {
    secrets: HashMap<(String, String), SecretData>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a secret whose values are given in plain text.
    pub fn insert_plain(&mut self, namespace: &str, name: &str, values: &[(&str, &str)]) {
        let data = values
            .iter()
            .map(|(k, v)| (k.to_string(), BASE64_STANDARD.encode(v.as_bytes())))
            .collect();
        self.insert_encoded(namespace, name, data);
    }

    /// Insert a secret whose values are already base64-encoded.
    pub fn insert_encoded(&mut self, namespace: &str, name: &str, data: SecretData) {
        self.secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SecretData, EngineError>> + Send + '_>> {
        let found = self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::SecretLookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: "secret not found".to_string(),
            });
        Box::pin(async move { found })
    }
}

/// Secret store loaded from Kubernetes `Secret` manifests on disk.
///
/// The file may hold several YAML documents.  Manifests without a
/// namespace land in `default_namespace`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    inner: MemorySecretStore,
}

impl FileSecretStore {
    pub fn load<P: AsRef<Path>>(path: P, default_namespace: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("Failed to read secrets file {}: {e}", path.as_ref().display())
        })?;
        Self::from_yaml(&contents, default_namespace)
    }

    pub fn from_yaml(contents: &str, default_namespace: &str) -> anyhow::Result<Self> {
        let mut inner = MemorySecretStore::new();
        for document in serde_yaml::Deserializer::from_str(contents) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let secret: SecretObject = serde_yaml::from_value(value)?;
            let name = secret
                .metadata
                .name
                .ok_or_else(|| anyhow::anyhow!("Secret manifest without metadata.name"))?;
            let namespace = secret
                .metadata
                .namespace
                .unwrap_or_else(|| default_namespace.to_string());
            inner.insert_encoded(&namespace, &name, secret.data.unwrap_or_default());
        }
        Ok(Self { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl SecretStore for FileSecretStore {
    fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SecretData, EngineError>> + Send + '_>> {
        self.inner.get_secret(namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_resolve_decodes_base64() {
        let mut store = MemorySecretStore::new();
        store.insert_plain("ns", "creds", &[("key", "s3cr3t")]);
        let value = resolve_secret(&store, "creds", "key", "ns").await.unwrap();
        assert_eq!(value, "s3cr3t");
    }

    #[tokio::test]
    async fn test_resolve_missing_key_is_empty() {
        let mut store = MemorySecretStore::new();
        store.insert_plain("ns", "creds", &[("other", "x")]);
        let value = resolve_secret(&store, "creds", "key", "ns").await.unwrap();
        assert_eq!(value, "");
    }

    #[tokio::test]
    async fn test_resolve_missing_secret_fails() {
        let store = MemorySecretStore::new();
        let err = resolve_secret(&store, "creds", "key", "ns").await.unwrap_err();
        assert_eq!(err.code(), "SecretLookupError");
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_base64() {
        let mut store = MemorySecretStore::new();
        let mut data = SecretData::new();
        data.insert("key".into(), "!!not base64!!".into());
        store.insert_encoded("ns", "creds", data);
        let err = resolve_secret(&store, "creds", "key", "ns").await.unwrap_err();
        assert!(matches!(err, EngineError::SecretLookup { .. }));
    }

    #[tokio::test]
    async fn test_kube_store_fetches_namespaced_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/team-a/secrets/s3-creds"))
            .and(header("authorization", "Bearer sa-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "Secret",
                "metadata": {"name": "s3-creds", "namespace": "team-a"},
                "data": {"secret": BASE64_STANDARD.encode("abc123")}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = KubeSecretStore::with_client(
            reqwest::Client::new(),
            format!("{}/", server.uri()),
            Some("sa-token".into()),
        );
        let value = resolve_secret(&store, "s3-creds", "secret", "team-a")
            .await
            .unwrap();
        assert_eq!(value, "abc123");
    }

    #[tokio::test]
    async fn test_kube_store_propagates_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let store = KubeSecretStore::with_client(reqwest::Client::new(), server.uri(), None);
        let err = store.get_secret("team-a", "s3-creds").await.unwrap_err();
        match err {
            EngineError::SecretLookup {
                namespace,
                name,
                message,
            } => {
                assert_eq!(namespace, "team-a");
                assert_eq!(name, "s3-creds");
                assert!(message.contains("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_store_reads_multi_document_yaml() {
        let yaml = format!(
            r#"
apiVersion: v1
kind: Secret
metadata:
  name: first
  namespace: team-a
data:
  key: {}
---
apiVersion: v1
kind: Secret
metadata:
  name: second
data:
  token: {}
"#,
            BASE64_STANDARD.encode("one"),
            BASE64_STANDARD.encode("two")
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        std::fs::write(&path, yaml).unwrap();

        let store = FileSecretStore::load(&path, "default").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            resolve_secret(&store, "first", "key", "team-a").await.unwrap(),
            "one"
        );
        assert_eq!(
            resolve_secret(&store, "second", "token", "default")
                .await
                .unwrap(),
            "two"
        );
        assert!(resolve_secret(&store, "second", "token", "team-a")
            .await
            .is_err());
    }
}
