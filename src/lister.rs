//! Directory expansion.
//!
//! A directory request is rewritten into a ListObjects call on its bucket;
//! every key in the listing becomes a copy of the original request pointing
//! at that object.  Only the first page of a listing is read.

use metrics::counter;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::addressing::{normalize_listing_url, object_url};
use crate::dispatch::{RequestKind, S3Engine};
use crate::errors::EngineError;
use crate::metrics::{EXPANDED_OBJECTS_TOTAL, EXPANSIONS_TOTAL};
use crate::request::RequestTemplate;
use crate::resource::AuthSpec;
use crate::xml::{parse_list_bucket_result, S3_XML_NAMESPACE};

/// Query parameter carrying the listing prefix.
const PREFIX_PARAM: &str = "prefix";

/// Expand the directory request `template` into one request per object.
///
/// The returned requests keep every option of `template` (headers, TLS
/// settings, timeouts) except the URL and the `prefix` query parameter.
/// Any failure fails the whole expansion; no partial list is returned.
pub async fn list(
    engine: &S3Engine,
    auth: Option<&AuthSpec>,
    namespace: &str,
    template: &RequestTemplate,
) -> Result<Vec<RequestTemplate>, EngineError> {
    let result = expand(engine, auth, namespace, template).await;
    match &result {
        Ok(objects) => {
            counter!(EXPANSIONS_TOTAL, "outcome" => "ok").increment(1);
            counter!(EXPANDED_OBJECTS_TOTAL).increment(objects.len() as u64);
        }
        Err(_) => counter!(EXPANSIONS_TOTAL, "outcome" => "error").increment(1),
    }
    result
}

async fn expand(
    engine: &S3Engine,
    auth: Option<&AuthSpec>,
    namespace: &str,
    template: &RequestTemplate,
) -> Result<Vec<RequestTemplate>, EngineError> {
    let directory_url = template.target_url().ok_or(EngineError::MissingField {
        field: "options.url",
    })?;
    let target = normalize_listing_url(directory_url)?;
    let listing_url = target.url.to_string();
    debug!(
        "Listing bucket={} prefix='{}' from {}",
        target.bucket, target.prefix, directory_url
    );

    // The listing URL carries the whole query.
    let listing = RequestTemplate {
        qs: BTreeMap::new(),
        ..template.with_url(listing_url.clone())
    };
    let resp = engine
        .download_as(auth, namespace, &listing, RequestKind::Listing)
        .await?;
    if !resp.is_success() {
        return Err(EngineError::UpstreamFetch {
            status: resp.status,
            url: listing_url,
        });
    }

    let parsed =
        parse_list_bucket_result(&resp.body).map_err(|message| EngineError::ListingParse {
            url: listing_url.clone(),
            message,
        })?;
    if !parsed.has_expected_namespace() {
        warn!(
            "Listing from {} declares namespace {:?}, expected {}",
            listing_url, parsed.namespace, S3_XML_NAMESPACE
        );
    }
    if parsed.is_truncated {
        warn!(
            "Listing from {} is truncated; only the first {} keys are used",
            listing_url,
            parsed.keys.len()
        );
    }

    let bucket = if parsed.name.is_empty() {
        target.bucket.as_str()
    } else {
        parsed.name.as_str()
    };
    let objects = parsed
        .keys
        .iter()
        .map(|key| {
            template
                .with_url(object_url(&target.url, bucket, key).to_string())
                .without_query_param(PREFIX_PARAM)
        })
        .collect::<Vec<_>>();
    debug!("Expanded {} into {} objects", directory_url, objects.len());
    Ok(objects)
}
