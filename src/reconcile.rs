//! One reconciliation pass over a resource.
//!
//! Expands directories, then downloads every request sequentially in
//! declaration order.  A failed required request aborts the pass; a failed
//! optional request is recorded and skipped.  Nothing is retried.

use metrics::counter;
use tracing::{info, warn};

use crate::controller::DownloadController;
use crate::dispatch::HttpResponse;
use crate::errors::EngineError;
use crate::metrics::RECONCILE_TOTAL;

/// A request that was fetched successfully.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub url: String,
    pub response: HttpResponse,
}

/// An optional request that failed.
#[derive(Debug, Clone)]
pub struct SkippedRequest {
    pub url: String,
    pub reason: String,
}

/// Outcome of a successful pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Successful downloads, in request order.
    pub fetched: Vec<FetchedObject>,
    pub skipped: Vec<SkippedRequest>,
}

/// Run one pass: `added()`, then `download()` each request in order.
pub async fn reconcile<C>(controller: &mut C) -> Result<ReconcileReport, EngineError>
where
    C: DownloadController + ?Sized,
{
    let result = run_pass(controller).await;
    let outcome = if result.is_ok() { "ok" } else { "error" };
    counter!(RECONCILE_TOTAL, "outcome" => outcome).increment(1);
    result
}

async fn run_pass<C>(controller: &mut C) -> Result<ReconcileReport, EngineError>
where
    C: DownloadController + ?Sized,
{
    controller.added().await?;

    let mut report = ReconcileReport::default();
    for request in controller.requests() {
        let url = request.options.target_url().unwrap_or_default().to_string();
        let failure = match controller.download(&request.options).await {
            Ok(response) if response.is_success() => {
                report.fetched.push(FetchedObject { url, response });
                continue;
            }
            Ok(response) => EngineError::UpstreamFetch {
                status: response.status,
                url: url.clone(),
            },
            Err(e) => e,
        };
        if !request.optional {
            return Err(failure);
        }
        warn!("Skipping optional request {}: {}", url, failure);
        report.skipped.push(SkippedRequest {
            url,
            reason: failure.to_string(),
        });
    }

    info!(
        "Reconciled {} objects ({} optional requests skipped)",
        report.fetched.len(),
        report.skipped.len()
    );
    Ok(report)
}
