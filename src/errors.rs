//! Engine error types.
//!
//! Every variant belongs to one of four failure classes: configuration
//! problems on the declared resource, upstream auth failures, upstream
//! fetch failures and secret-store failures.  Nothing in the engine retries;
//! errors are surfaced to whoever drives the reconciliation pass.

use reqwest::StatusCode;
use thiserror::Error;

/// Which HMAC / IAM credential field could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    AccessKeyId,
    SecretAccessKey,
    ApiKey,
}

impl std::fmt::Display for CredentialField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CredentialField::AccessKeyId => "access key id",
            CredentialField::SecretAccessKey => "secret access key",
            CredentialField::ApiKey => "iam api key",
        };
        f.write_str(name)
    }
}

/// Errors produced while resolving credentials, listing buckets or
/// dispatching requests.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A mandatory credential field was absent or resolved to an empty value.
    #[error("missing {field}: no usable value found under any accepted field name")]
    MissingCredential { field: CredentialField },

    /// A required field on the declared resource is absent.
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    /// A directory URL did not contain a bucket name.
    #[error("unable to determine bucket name from url {url}")]
    BucketNotFound { url: String },

    /// A URL on the declared resource could not be parsed.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A request option could not be turned into an HTTP request.
    #[error("invalid request option `{option}`: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    /// The IAM token exchange failed or returned no token.
    #[error("iam token exchange against {url} failed: {message}")]
    UpstreamAuth { url: String, message: String },

    /// The installed request signer rejected the request.
    #[error("signing request to {url} failed: {message}")]
    Signing { url: String, message: String },

    /// A listing or object fetch returned a non-success status.
    #[error("fetch of {url} returned status {status}")]
    UpstreamFetch { status: StatusCode, url: String },

    /// A listing response body was not a valid bucket listing.
    #[error("unable to parse bucket listing from {url}: {message}")]
    ListingParse { url: String, message: String },

    /// The secret store call failed or returned undecodable data.
    #[error("secret lookup {namespace}/{name} failed: {message}")]
    SecretLookup {
        namespace: String,
        name: String,
        message: String,
    },

    /// Transport-level HTTP failure (connect, TLS, timeout, body read).
    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl EngineError {
    /// Return the failure class this error belongs to.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MissingCredential { .. }
            | EngineError::MissingField { .. }
            | EngineError::BucketNotFound { .. }
            | EngineError::InvalidUrl { .. }
            | EngineError::InvalidOption { .. } => "ConfigurationError",
            EngineError::UpstreamAuth { .. } | EngineError::Signing { .. } => "UpstreamAuthError",
            EngineError::UpstreamFetch { .. }
            | EngineError::ListingParse { .. }
            | EngineError::Http { .. } => "UpstreamFetchError",
            EngineError::SecretLookup { .. } => "SecretLookupError",
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            EngineError::UpstreamFetch { status, .. } => Some(*status),
            EngineError::Http { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        let missing = EngineError::MissingCredential {
            field: CredentialField::AccessKeyId,
        };
        assert_eq!(missing.code(), "ConfigurationError");
        assert_eq!(
            EngineError::BucketNotFound {
                url: "https://s3.example.com/".into()
            }
            .code(),
            "ConfigurationError"
        );
        assert_eq!(
            EngineError::UpstreamAuth {
                url: "u".into(),
                message: "m".into()
            }
            .code(),
            "UpstreamAuthError"
        );
        assert_eq!(
            EngineError::SecretLookup {
                namespace: "ns".into(),
                name: "n".into(),
                message: "m".into()
            }
            .code(),
            "SecretLookupError"
        );
    }

    #[test]
    fn test_missing_credential_message_names_field() {
        let err = EngineError::MissingCredential {
            field: CredentialField::SecretAccessKey,
        };
        assert!(err.to_string().contains("secret access key"));
        let err = EngineError::MissingCredential {
            field: CredentialField::AccessKeyId,
        };
        assert!(err.to_string().contains("missing access key id"));
    }

    #[test]
    fn test_upstream_fetch_carries_status() {
        let err = EngineError::UpstreamFetch {
            status: StatusCode::FORBIDDEN,
            url: "https://s3.example.com/b?prefix=".into(),
        };
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("https://s3.example.com/b?prefix="));
        assert_eq!(err.code(), "UpstreamFetchError");
    }
}
