//! The download-controller contract.
//!
//! A lifecycle driver owns one controller per resource and calls
//! [`DownloadController::added`] once per pass, then
//! [`DownloadController::download`] for every request left in the
//! resource's request list.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use crate::dispatch::{HttpResponse, S3Engine};
use crate::errors::EngineError;
use crate::lister;
use crate::request::RequestTemplate;
use crate::resource::{DownloadRequest, RemoteResource};

/// Operations a lifecycle driver invokes on a resource controller.
pub trait DownloadController: Send + Sync {
    /// Fetch one request with the resource's credentials.
    fn download<'a>(
        &'a self,
        request: &'a RequestTemplate,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, EngineError>> + Send + 'a>>;

    /// Prepare the request list for downloading.
    fn added(&mut self) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + '_>>;

    /// The current request list.
    fn requests(&self) -> &[DownloadRequest];
}

/// Controller for `RemoteResourceS3` objects.
pub struct S3Controller {
    engine: Arc<S3Engine>,
    resource: RemoteResource,
    namespace: String,
}

impl S3Controller {
    /// `default_namespace` applies when the resource does not name one.
    pub fn new(engine: Arc<S3Engine>, resource: RemoteResource, default_namespace: &str) -> Self {
        let namespace = resource.namespace_or(default_namespace).to_string();
        Self {
            engine,
            resource,
            namespace,
        }
    }

    pub fn resource(&self) -> &RemoteResource {
        &self.resource
    }

    pub fn into_resource(self) -> RemoteResource {
        self.resource
    }

    /// Replace every directory request with its expansion, in place.
    async fn expand_directories(&mut self) -> Result<(), EngineError> {
        let auth = self.resource.spec.auth.as_ref();
        let mut expanded = Vec::with_capacity(self.resource.spec.requests.len());
        for request in &self.resource.spec.requests {
            if !request.options.is_directory() {
                expanded.push(request.clone());
                continue;
            }
            let objects =
                lister::list(&self.engine, auth, &self.namespace, &request.options).await?;
            debug!(
                "Directory {} expanded to {} requests",
                request.options.target_url().unwrap_or_default(),
                objects.len()
            );
            expanded.extend(objects.into_iter().map(|o| request.with_options(o)));
        }
        info!(
            "Resource {}: {} declared requests, {} after expansion",
            self.resource.display_name(),
            self.resource.spec.requests.len(),
            expanded.len()
        );
        self.resource.spec.requests = expanded;
        Ok(())
    }
}

impl DownloadController for S3Controller {
    fn download<'a>(
        &'a self,
        request: &'a RequestTemplate,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.engine
                .download(self.resource.spec.auth.as_ref(), &self.namespace, request)
                .await
        })
    }

    fn added(&mut self) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + '_>> {
        Box::pin(self.expand_directories())
    }

    fn requests(&self) -> &[DownloadRequest] {
        &self.resource.spec.requests
    }
}
