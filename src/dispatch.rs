//! Request building and dispatch.
//!
//! [`S3Engine`] turns a [`RequestTemplate`] into an HTTP call.  Credentials
//! declared on the owning resource are resolved fresh for every call and
//! overlaid on a copy of the template; the caller's template is never
//! modified.  The full response is returned whatever its status, so callers
//! decide for themselves what a 404 or a 403 means.

use bytes::Bytes;
use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::credentials::{CredentialAssembler, ResolvedCredential};
use crate::errors::EngineError;
use crate::iam::IamTokenExchanger;
use crate::metrics::{status_class, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::request::{AwsOptions, RequestTemplate};
use crate::resource::AuthSpec;
use crate::secrets::SecretStore;

/// A complete HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What a dispatched request is for; used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Listing,
    Object,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Listing => "listing",
            RequestKind::Object => "object",
        }
    }
}

/// Applies an access key / secret pair to an outgoing request.
///
/// Installed signers receive the built request just before it is sent and
/// may add or rewrite headers (e.g. an S3 signature).
pub trait RequestSigner: Send + Sync + 'static {
    fn sign(&self, request: &mut reqwest::Request, aws: &AwsOptions) -> anyhow::Result<()>;
}

/// Resolves credentials and dispatches requests.
pub struct S3Engine {
    client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
    iam: IamTokenExchanger,
    signer: Option<Arc<dyn RequestSigner>>,
    timeout: Duration,
    user_agent: String,
    basic_auth_warned: AtomicBool,
}

impl S3Engine {
    /// Create an engine from the `http` and `iam` configuration sections.
    pub fn new(config: &Config, secrets: Arc<dyn SecretStore>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.http.timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.http.user_agent.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        let iam = IamTokenExchanger::new(Duration::from_secs(config.iam.timeout_seconds))?;
        Ok(Self {
            client,
            secrets,
            iam,
            signer: None,
            timeout,
            user_agent: config.http.user_agent.clone(),
            basic_auth_warned: AtomicBool::new(false),
        })
    }

    /// Install a signer for HMAC credentials.
    ///
    /// Without one, HMAC pairs are sent as HTTP basic credentials.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the shared HTTP client.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Resolve the credentials declared in `auth`.
    pub async fn resolve_credentials(
        &self,
        auth: Option<&AuthSpec>,
        namespace: &str,
    ) -> Result<Option<ResolvedCredential>, EngineError> {
        CredentialAssembler::new(self.secrets.as_ref(), &self.iam, namespace)
            .resolve(auth)
            .await
    }

    /// Fetch one object with the resource's credentials.
    pub async fn download(
        &self,
        auth: Option<&AuthSpec>,
        namespace: &str,
        template: &RequestTemplate,
    ) -> Result<HttpResponse, EngineError> {
        self.download_as(auth, namespace, template, RequestKind::Object)
            .await
    }

    /// Resolve credentials, overlay them on a copy of `template` and send it.
    pub async fn download_as(
        &self,
        auth: Option<&AuthSpec>,
        namespace: &str,
        template: &RequestTemplate,
        kind: RequestKind,
    ) -> Result<HttpResponse, EngineError> {
        let authed = match self.resolve_credentials(auth, namespace).await? {
            Some(credential) => template.with_credential(&credential),
            None => template.clone(),
        };
        self.dispatch(&authed, kind).await
    }

    /// Send `template` as-is and return the full response.
    pub async fn dispatch(
        &self,
        template: &RequestTemplate,
        kind: RequestKind,
    ) -> Result<HttpResponse, EngineError> {
        let url = template
            .target_url()
            .ok_or(EngineError::MissingField {
                field: "options.url",
            })?
            .to_string();
        debug!("Download {}", url);

        let client = self.client_for(template)?;
        let request = self.build_request(&client, template, &url)?;

        let start = Instant::now();
        let result = send(&client, request, &url).await;
        histogram!(REQUEST_DURATION_SECONDS, "kind" => kind.as_str())
            .record(start.elapsed().as_secs_f64());

        let status = match &result {
            Ok(resp) => status_class(resp.status.as_u16()),
            Err(_) => "error",
        };
        counter!(REQUESTS_TOTAL, "kind" => kind.as_str(), "status" => status).increment(1);

        if let Ok(resp) = &result {
            debug!("Download {} {}", resp.status.as_u16(), url);
        }
        result
    }

    /// The shared client, or a one-off client when the template changes TLS
    /// settings.
    fn client_for(&self, template: &RequestTemplate) -> Result<reqwest::Client, EngineError> {
        let insecure = template.strict_ssl == Some(false);
        if !insecure && template.ca.is_none() {
            return Ok(self.client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .danger_accept_invalid_certs(insecure);
        if let Some(ca) = &template.ca {
            let cert = reqwest::Certificate::from_pem(ca.as_bytes()).map_err(|e| {
                EngineError::InvalidOption {
                    option: "ca",
                    reason: e.to_string(),
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }
        builder.build().map_err(|e| EngineError::InvalidOption {
            option: "ca",
            reason: format!("unable to build TLS client: {e}"),
        })
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        template: &RequestTemplate,
        url: &str,
    ) -> Result<reqwest::Request, EngineError> {
        let mut target = url::Url::parse(url).map_err(|e| EngineError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !template.qs.is_empty() {
            target.query_pairs_mut().extend_pairs(template.query_pairs());
        }

        let method = match template.method.as_deref() {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                EngineError::InvalidOption {
                    option: "method",
                    reason: e.to_string(),
                }
            })?,
            None => Method::GET,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &template.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| EngineError::InvalidOption {
                    option: "headers",
                    reason: format!("{name}: {e}"),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| EngineError::InvalidOption {
                    option: "headers",
                    reason: format!("{name}: {e}"),
                })?;
            headers.insert(header_name, header_value);
        }

        let mut builder = client.request(method, target).headers(headers);
        if let Some(body) = &template.body {
            builder = builder.body(body.clone());
        }
        if let Some(ms) = template.timeout {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let (Some(aws), None) = (&template.aws, &self.signer) {
            if !self.basic_auth_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    "No request signer installed; sending HMAC credentials for {} as HTTP basic auth",
                    url
                );
            }
            builder = builder.basic_auth(&aws.key, Some(&aws.secret));
        }

        let mut request = builder.build().map_err(|source| EngineError::Http {
            url: url.to_string(),
            source,
        })?;
        if let (Some(aws), Some(signer)) = (&template.aws, &self.signer) {
            signer
                .sign(&mut request, aws)
                .map_err(|e| EngineError::Signing {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(request)
    }
}

async fn send(
    client: &reqwest::Client,
    request: reqwest::Request,
    url: &str,
) -> Result<HttpResponse, EngineError> {
    let http_error = |source: reqwest::Error| EngineError::Http {
        url: url.to_string(),
        source,
    };
    let resp = client.execute(request).await.map_err(http_error)?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.bytes().await.map_err(http_error)?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
