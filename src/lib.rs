//! remote-resource-s3 library: resolution engine for S3-backed remote
//! resources.
//!
//! A `RemoteResourceS3` object declares a list of HTTP requests plus
//! optional HMAC or IAM credentials.  This crate resolves those
//! credentials (literal values or Kubernetes secret references), expands
//! directory requests into one request per listed object, and dispatches
//! the resulting requests.  Driving reconciliation is left to the caller;
//! [`reconcile::reconcile`] is a minimal sequential driver.

pub mod addressing;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod dispatch;
pub mod errors;
pub mod iam;
pub mod lister;
pub mod metrics;
pub mod reconcile;
pub mod request;
pub mod resource;
pub mod secrets;
pub mod xml;

pub use controller::{DownloadController, S3Controller};
pub use dispatch::{HttpResponse, RequestSigner, S3Engine};
pub use errors::EngineError;
