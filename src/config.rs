//! Configuration loading and types.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct.  Every section has defaults, so an empty file (or
//! no file at all) yields a working in-cluster configuration.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Kubernetes API access used by the secret store.
    #[serde(default)]
    pub kube: KubeConfig,

    /// Which secret store backs secret references.
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Outbound HTTP settings for listing and object fetches.
    #[serde(default)]
    pub http: HttpConfig,

    /// IAM token exchange settings.
    #[serde(default)]
    pub iam: IamConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Kubernetes API access.
#[derive(Debug, Clone, Deserialize)]
pub struct KubeConfig {
    /// API server base URL.
    #[serde(default = "default_api_server")]
    pub api_server: String,

    /// Service-account token file.
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Cluster CA bundle.
    #[serde(default = "default_ca_file")]
    pub ca_file: String,

    /// File holding the namespace this process runs in.
    #[serde(default = "default_namespace_file")]
    pub namespace_file: String,

    /// Namespace used when neither the resource nor `namespace_file` names one.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Skip API server certificate verification.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Timeout for secret lookups in seconds.
    #[serde(default = "default_kube_timeout")]
    pub timeout_seconds: u64,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            token_file: default_token_file(),
            ca_file: default_ca_file(),
            namespace_file: default_namespace_file(),
            default_namespace: default_namespace(),
            insecure_skip_tls_verify: false,
            timeout_seconds: default_kube_timeout(),
        }
    }
}

impl KubeConfig {
    /// The namespace this process runs in.
    ///
    /// Reads `namespace_file` (present inside a pod) and falls back to
    /// `default_namespace`.
    pub fn current_namespace(&self) -> String {
        std::fs::read_to_string(&self.namespace_file)
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.default_namespace.clone())
    }
}

/// Secret store selection.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Backend type: `kube` or `file`.
    #[serde(default = "default_secrets_backend")]
    pub backend: String,

    /// Path to a YAML file of `Secret` manifests (for `backend: file`).
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: default_secrets_backend(),
            file: None,
        }
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Default request timeout in seconds (requests may override it).
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,

    /// User-Agent header sent on every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// IAM token exchange settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IamConfig {
    /// Token exchange timeout in seconds.
    #[serde(default = "default_iam_timeout")]
    pub timeout_seconds: u64,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_iam_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Write the Prometheus exposition text here after each pass
    /// (node-exporter textfile collector format).
    #[serde(default)]
    pub metrics_textfile: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_textfile: None,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_api_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_token_file() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}

fn default_ca_file() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string()
}

fn default_namespace_file() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_kube_timeout() -> u64 {
    30
}

fn default_secrets_backend() -> String {
    "kube".to_string()
}

fn default_http_timeout() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("remote-resource-s3/{}", env!("CARGO_PKG_VERSION"))
}

fn default_iam_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Apply in-cluster environment overrides.
///
/// When `KUBERNETES_SERVICE_HOST` is set the API server address is taken
/// from it (and `KUBERNETES_SERVICE_PORT`, default 443).
pub fn apply_env_overrides(config: &mut Config) {
    apply_service_env(
        config,
        std::env::var("KUBERNETES_SERVICE_HOST").ok(),
        std::env::var("KUBERNETES_SERVICE_PORT").ok(),
    );
}

fn apply_service_env(config: &mut Config, host: Option<String>, port: Option<String>) {
    let Some(host) = host.filter(|h| !h.is_empty()) else {
        return;
    };
    let port = port.filter(|p| !p.is_empty()).unwrap_or_else(|| "443".to_string());
    // IPv6 service hosts need brackets.
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host
    };
    config.kube.api_server = format!("https://{host}:{port}");
}
