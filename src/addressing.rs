//! S3 URL addressing.
//!
//! Directory requests arrive in one of two styles:
//!
//! - path-style: `https://s3.example.com/{bucket}/{prefix}/`
//! - virtual-hosted-style: `https://{bucket}.s3.example.com/{prefix}/`
//!
//! Both are rewritten to the path-style bucket root with the prefix moved
//! into the query string, which is what a ListObjects call expects.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::errors::EngineError;

/// Characters escaped in a path segment (everything outside RFC 3986
/// `pchar`).
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'/');

/// Characters escaped in the `prefix` query value; `/` stays literal.
const QUERY_VALUE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'`');

/// A directory URL rewritten for listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingTarget {
    /// `{scheme}://{host}/{bucket}?prefix={prefix}`
    pub url: Url,
    pub bucket: String,
    pub prefix: String,
}

/// Whether `url` addresses the S3 endpoint directly (path-style).
///
/// IP literals and single-label hosts cannot carry a bucket label, so they
/// are always path-style.
fn is_path_style(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(host)) => host.starts_with("s3.") || !host.contains('.'),
        Some(_) => true,
        None => false,
    }
}

/// Rewrite a directory URL into a bucket-listing URL.
pub fn normalize_listing_url(directory_url: &str) -> Result<ListingTarget, EngineError> {
    let mut url = Url::parse(directory_url).map_err(|e| EngineError::InvalidUrl {
        url: directory_url.to_string(),
        reason: e.to_string(),
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| EngineError::InvalidUrl {
            url: directory_url.to_string(),
            reason: "url has no host".to_string(),
        })?
        .to_string();

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let (bucket, prefix) = if is_path_style(&url) {
        let mut segments = segments.into_iter();
        let bucket = segments.next().unwrap_or_default();
        (bucket, segments.collect::<Vec<_>>().join("/"))
    } else {
        let Some((bucket, rest)) = host.split_once('.') else {
            return Err(EngineError::BucketNotFound {
                url: directory_url.to_string(),
            });
        };
        url.set_host(Some(rest)).map_err(|e| EngineError::InvalidUrl {
            url: directory_url.to_string(),
            reason: e.to_string(),
        })?;
        (bucket.to_string(), segments.join("/"))
    };

    if bucket.is_empty() {
        return Err(EngineError::BucketNotFound {
            url: directory_url.to_string(),
        });
    }

    // Segments come straight from the parsed URL and are already escaped.
    url.set_path(&format!("/{bucket}"));
    url.set_fragment(None);
    let decoded_prefix = percent_encoding::percent_decode_str(&prefix)
        .decode_utf8_lossy()
        .into_owned();
    url.set_query(Some(&format!(
        "prefix={}",
        utf8_percent_encode(&decoded_prefix, QUERY_VALUE_ENCODE_SET)
    )));

    let bucket = percent_encoding::percent_decode_str(&bucket)
        .decode_utf8_lossy()
        .into_owned();

    Ok(ListingTarget {
        url,
        bucket,
        prefix: decoded_prefix,
    })
}

/// Build the URL of object `key` in `bucket` on the listing endpoint.
///
/// Each `/`-separated segment of the key is percent-encoded; the query is
/// dropped.
pub fn object_url(listing_url: &Url, bucket: &str, key: &str) -> Url {
    let mut url = listing_url.clone();
    let encoded_key = key
        .split('/')
        .map(|seg| utf8_percent_encode(seg, PATH_SEGMENT_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/");
    let encoded_bucket = utf8_percent_encode(bucket, PATH_SEGMENT_ENCODE_SET);
    url.set_path(&format!("/{encoded_bucket}/{encoded_key}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}
