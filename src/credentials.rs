//! Credential assembly.
//!
//! Each logical credential field can be declared under up to three names.
//! Candidates are evaluated in a fixed order and the first match wins:
//!
//! 1. a literal string under the primary name (`access_key_id`)
//! 2. a literal string under the secondary name (`accessKeyId`)
//! 3. a secret reference under the primary name
//! 4. a secret reference under the `*Ref` name (`accessKeyIdRef`)
//!
//! No match, or a match that resolves to an empty value, is a hard error.

use crate::errors::{CredentialField, EngineError};
use crate::iam::IamTokenExchanger;
use crate::resource::{AuthSpec, CredentialValue, HmacSpec, IamSpec, SecretKeyRef};
use crate::secrets::{resolve_secret, SecretStore};

/// Credentials resolved for one `download` call.
#[derive(Clone, PartialEq)]
pub enum ResolvedCredential {
    Hmac {
        access_key_id: String,
        secret_access_key: String,
    },
    Bearer(String),
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedCredential::Hmac { access_key_id, .. } => f
                .debug_struct("Hmac")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            ResolvedCredential::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// The three declared spellings of one logical field.
#[derive(Debug, Clone, Copy)]
pub struct AliasedField<'a> {
    pub primary: Option<&'a CredentialValue>,
    pub secondary: Option<&'a CredentialValue>,
    pub reference: Option<&'a CredentialValue>,
}

/// The winning representation of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Candidate<'a> {
    Literal(&'a str),
    SecretRef(&'a SecretKeyRef),
}

/// Pick the representation to use for a field.
pub fn select_candidate<'a>(field: &AliasedField<'a>) -> Option<Candidate<'a>> {
    if let Some(s) = field.primary.and_then(CredentialValue::as_literal) {
        return Some(Candidate::Literal(s));
    }
    if let Some(s) = field.secondary.and_then(CredentialValue::as_literal) {
        return Some(Candidate::Literal(s));
    }
    if let Some(r) = field.primary.and_then(CredentialValue::as_secret_ref) {
        return Some(Candidate::SecretRef(r));
    }
    field
        .reference
        .and_then(CredentialValue::as_secret_ref)
        .map(Candidate::SecretRef)
}

impl HmacSpec {
    pub fn access_key_id_field(&self) -> AliasedField<'_> {
        AliasedField {
            primary: self.access_key_id.as_ref(),
            secondary: self.access_key_id_camel.as_ref(),
            reference: self.access_key_id_ref.as_ref(),
        }
    }

    pub fn secret_access_key_field(&self) -> AliasedField<'_> {
        AliasedField {
            primary: self.secret_access_key.as_ref(),
            secondary: self.secret_access_key_camel.as_ref(),
            reference: self.secret_access_key_ref.as_ref(),
        }
    }
}

impl IamSpec {
    pub fn api_key_field(&self) -> AliasedField<'_> {
        AliasedField {
            primary: self.api_key.as_ref(),
            secondary: self.api_key_camel.as_ref(),
            reference: self.api_key_ref.as_ref(),
        }
    }
}

/// Resolves declared auth blocks into concrete credentials.
pub struct CredentialAssembler<'a> {
    secrets: &'a dyn SecretStore,
    iam: &'a IamTokenExchanger,
    namespace: &'a str,
}

impl<'a> CredentialAssembler<'a> {
    /// `namespace` is used for secret references that do not name one.
    pub fn new(secrets: &'a dyn SecretStore, iam: &'a IamTokenExchanger, namespace: &'a str) -> Self {
        Self {
            secrets,
            iam,
            namespace,
        }
    }

    /// Resolve one field; empty results are an error.
    pub async fn resolve_field(
        &self,
        field: &AliasedField<'_>,
        which: CredentialField,
    ) -> Result<String, EngineError> {
        let value = match select_candidate(field) {
            Some(Candidate::Literal(s)) => s.to_string(),
            Some(Candidate::SecretRef(r)) => {
                let namespace = r.namespace.as_deref().unwrap_or(self.namespace);
                resolve_secret(self.secrets, &r.name, &r.key, namespace).await?
            }
            None => String::new(),
        };
        if value.is_empty() {
            return Err(EngineError::MissingCredential { field: which });
        }
        Ok(value)
    }

    /// Resolve both halves of an HMAC key pair.
    pub async fn assemble_hmac(&self, hmac: &HmacSpec) -> Result<ResolvedCredential, EngineError> {
        let access_key_id = self
            .resolve_field(&hmac.access_key_id_field(), CredentialField::AccessKeyId)
            .await?;
        let secret_access_key = self
            .resolve_field(&hmac.secret_access_key_field(), CredentialField::SecretAccessKey)
            .await?;
        Ok(ResolvedCredential::Hmac {
            access_key_id,
            secret_access_key,
        })
    }

    /// Resolve the API key and exchange it for a bearer token.
    pub async fn assemble_iam(&self, iam: &IamSpec) -> Result<ResolvedCredential, EngineError> {
        let api_key = self
            .resolve_field(&iam.api_key_field(), CredentialField::ApiKey)
            .await?;
        let url = iam
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(EngineError::MissingField { field: "auth.iam.url" })?;
        let token = self
            .iam
            .exchange(&api_key, url, iam.response_type(), iam.grant_type())
            .await?;
        Ok(ResolvedCredential::Bearer(token))
    }

    /// Resolve whichever auth block is declared; `hmac` wins over `iam`.
    ///
    /// Returns `None` when no auth is declared.
    pub async fn resolve(
        &self,
        auth: Option<&AuthSpec>,
    ) -> Result<Option<ResolvedCredential>, EngineError> {
        let Some(auth) = auth else {
            return Ok(None);
        };
        if let Some(hmac) = &auth.hmac {
            return self.assemble_hmac(hmac).await.map(Some);
        }
        if let Some(iam) = &auth.iam {
            return self.assemble_iam(iam).await.map(Some);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store() -> MemorySecretStore {
        let mut store = MemorySecretStore::new();
        store.insert_plain("team-a", "s3", &[("id", "FROM_SECRET"), ("secret", "SK")]);
        store.insert_plain("other", "s3", &[("id", "FROM_OTHER_NS")]);
        store
    }

    fn exchanger() -> IamTokenExchanger {
        IamTokenExchanger::new(std::time::Duration::from_secs(5)).unwrap()
    }

    fn hmac_from_yaml(yaml: &str) -> HmacSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    const SECRET_REF: &str = "{valueFrom: {secretKeyRef: {name: s3, key: id}}}";

    #[tokio::test]
    async fn test_every_representation_resolves_access_key() {
        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let cases = [
            ("access_key_id: LITERAL\nsecretAccessKey: SK".to_string(), "LITERAL"),
            ("accessKeyId: CAMEL\nsecretAccessKey: SK".to_string(), "CAMEL"),
            (format!("access_key_id: {SECRET_REF}\nsecretAccessKey: SK"), "FROM_SECRET"),
            (format!("accessKeyIdRef: {SECRET_REF}\nsecretAccessKey: SK"), "FROM_SECRET"),
        ];
        for (yaml, expected) in cases {
            let cred = assembler.assemble_hmac(&hmac_from_yaml(&yaml)).await.unwrap();
            match cred {
                ResolvedCredential::Hmac { access_key_id, .. } => {
                    assert_eq!(access_key_id, expected, "case {yaml}")
                }
                other => panic!("unexpected credential {other:?}"),
            }
        }
    }

    #[test]
    fn test_precedence_order() {
        let hmac = hmac_from_yaml(&format!(
            "access_key_id: {SECRET_REF}\naccessKeyId: CAMEL\naccessKeyIdRef: {SECRET_REF}"
        ));
        // A literal under the secondary name beats an object under the primary one.
        assert_eq!(
            select_candidate(&hmac.access_key_id_field()),
            Some(Candidate::Literal("CAMEL"))
        );

        let hmac = hmac_from_yaml(&format!(
            "access_key_id: PRIMARY\naccessKeyId: CAMEL\naccessKeyIdRef: {SECRET_REF}"
        ));
        assert_eq!(
            select_candidate(&hmac.access_key_id_field()),
            Some(Candidate::Literal("PRIMARY"))
        );

        let hmac = hmac_from_yaml(
            "access_key_id: {valueFrom: {secretKeyRef: {name: a, key: k}}}\n\
             accessKeyIdRef: {valueFrom: {secretKeyRef: {name: b, key: k}}}",
        );
        match select_candidate(&hmac.access_key_id_field()) {
            Some(Candidate::SecretRef(r)) => assert_eq!(r.name, "a"),
            other => panic!("unexpected candidate {other:?}"),
        }

        // An object without a secret reference is not a candidate.
        let hmac = hmac_from_yaml("access_key_id: {foo: bar}");
        assert_eq!(select_candidate(&hmac.access_key_id_field()), None);
    }

    #[tokio::test]
    async fn test_numeric_literal_is_used_as_is() {
        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let hmac = hmac_from_yaml("accessKeyId: 12345\nsecret_access_key: true");
        let cred = assembler.assemble_hmac(&hmac).await.unwrap();
        assert_eq!(
            cred,
            ResolvedCredential::Hmac {
                access_key_id: "12345".into(),
                secret_access_key: "true".into()
            }
        );
    }

    #[tokio::test]
    async fn test_secret_ref_namespace_override() {
        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let hmac = hmac_from_yaml(
            "accessKeyIdRef: {valueFrom: {secretKeyRef: {name: s3, key: id, namespace: other}}}\n\
             secret_access_key: SK",
        );
        let cred = assembler.assemble_hmac(&hmac).await.unwrap();
        assert_eq!(
            cred,
            ResolvedCredential::Hmac {
                access_key_id: "FROM_OTHER_NS".into(),
                secret_access_key: "SK".into()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_access_key_fails_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let auth: AuthSpec = serde_yaml::from_str(&format!(
            "hmac:\n  secretAccessKey: SK\niam:\n  apiKey: KEY\n  url: {}/token",
            server.uri()
        ))
        .unwrap();
        let err = assembler.resolve(Some(&auth)).await.unwrap_err();
        assert!(err.to_string().contains("missing access key id"));
        assert!(matches!(
            err,
            EngineError::MissingCredential {
                field: CredentialField::AccessKeyId
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_values_are_errors() {
        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");

        let hmac = hmac_from_yaml("access_key_id: ''\nsecret_access_key: SK");
        let err = assembler.assemble_hmac(&hmac).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingCredential {
                field: CredentialField::AccessKeyId
            }
        ));

        // Secret exists but lacks the key.
        let hmac = hmac_from_yaml(
            "access_key_id: AK\nsecretAccessKeyRef: {valueFrom: {secretKeyRef: {name: s3, key: nope}}}",
        );
        let err = assembler.assemble_hmac(&hmac).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingCredential {
                field: CredentialField::SecretAccessKey
            }
        ));
    }

    #[tokio::test]
    async fn test_secret_store_failure_propagates() {
        let secrets = MemorySecretStore::new();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let hmac = hmac_from_yaml(&format!("accessKeyIdRef: {SECRET_REF}\nsecret_access_key: SK"));
        let err = assembler.assemble_hmac(&hmac).await.unwrap_err();
        assert_eq!(err.code(), "SecretLookupError");
    }

    #[tokio::test]
    async fn test_no_auth_declared() {
        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        assert_eq!(assembler.resolve(None).await.unwrap(), None);
        assert_eq!(
            assembler.resolve(Some(&AuthSpec::default())).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_iam_missing_api_key_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let spec: IamSpec = serde_yaml::from_str(&format!("url: {}/token", server.uri())).unwrap();
        let err = assembler.assemble_iam(&spec).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingCredential {
                field: CredentialField::ApiKey
            }
        ));
    }

    #[tokio::test]
    async fn test_iam_missing_url_is_configuration_error() {
        let secrets = store();
        let iam = exchanger();
        let assembler = CredentialAssembler::new(&secrets, &iam, "team-a");
        let spec: IamSpec = serde_yaml::from_str("api_key: KEY").unwrap();
        let err = assembler.assemble_iam(&spec).await.unwrap_err();
        assert_eq!(err.code(), "ConfigurationError");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = ResolvedCredential::Hmac {
            access_key_id: "AKID".into(),
            secret_access_key: "hunter2".into(),
        };
        assert!(!format!("{cred:?}").contains("hunter2"));
        let cred = ResolvedCredential::Bearer("tok-123".into());
        assert!(!format!("{cred:?}").contains("tok-123"));
    }
}
