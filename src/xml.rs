//! S3 `ListBucketResult` parsing.
//!
//! Only the parts of the listing the engine needs are extracted: the root
//! namespace, the bucket `Name`, each `Contents/Key` in document order and
//! `IsTruncated`.  Everything else (`CommonPrefixes`, `Owner`, sizes, ETags)
//! is skipped.

use quick_xml::events::Event;
use quick_xml::Reader;

/// Namespace S3 declares on listing documents.
pub const S3_XML_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// The extracted listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListBucketResult {
    /// `xmlns` declared on the root element, if any.
    pub namespace: Option<String>,
    /// Bucket name from `<Name>`; empty when absent.
    pub name: String,
    /// Object keys in document order.
    pub keys: Vec<String>,
    /// Whether the listing was cut off at one page.
    pub is_truncated: bool,
}

impl ListBucketResult {
    /// Whether the document declares the expected S3 namespace.
    pub fn has_expected_namespace(&self) -> bool {
        self.namespace.as_deref() == Some(S3_XML_NAMESPACE)
    }
}

/// Strip a namespace prefix (e.g. `s3:Key` -> `Key`).
fn local_name(raw: &[u8]) -> String {
    let tag = String::from_utf8_lossy(raw);
    tag.rsplit(':').next().unwrap_or(&tag).to_string()
}

/// Record character data found at element path `stack`.
///
/// A key may arrive in several pieces (text and CDATA sections), so its
/// pieces are concatenated.
fn apply_text(
    stack: &[String],
    text: &str,
    result: &mut ListBucketResult,
    current_key: &mut Option<String>,
) {
    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
    match path.as_slice() {
        ["ListBucketResult", "Name"] => result.name.push_str(text.trim()),
        ["ListBucketResult", "IsTruncated"] => {
            result.is_truncated = text.trim().eq_ignore_ascii_case("true")
        }
        ["ListBucketResult", "Contents", "Key"] => {
            current_key.get_or_insert_with(String::new).push_str(text)
        }
        _ => {}
    }
}

/// Parse a `<ListBucketResult>` document.
///
/// Returns an error message when the body is not well-formed XML or the
/// root element is something else (an `<Error>` document, say).
pub fn parse_list_bucket_result(body: &[u8]) -> Result<ListBucketResult, String> {
    // Key text is kept byte-exact; S3 keys may begin or end with spaces.
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();

    let mut result = ListBucketResult::default();
    // Element path from the root, namespace prefixes stripped.
    let mut stack: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut current_key: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = local_name(e.name().as_ref());
                if stack.is_empty() {
                    if saw_root {
                        return Err("multiple root elements".to_string());
                    }
                    if tag != "ListBucketResult" {
                        return Err(format!("unexpected root element <{tag}>"));
                    }
                    saw_root = true;
                    // The namespace that applies to the root is the default
                    // one, or the one bound to the root's own prefix.
                    let raw = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let ns_attr = match raw.split_once(':') {
                        Some((prefix, _)) => format!("xmlns:{prefix}"),
                        None => "xmlns".to_string(),
                    };
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == ns_attr.as_bytes() {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| e.to_string())?
                                .to_string();
                            result.namespace = Some(value);
                        }
                    }
                }
                if tag == "Contents" && stack.len() == 1 {
                    current_key = None;
                }
                stack.push(tag);
            }
            Ok(Event::Empty(ref e)) => {
                let tag = local_name(e.name().as_ref());
                if stack.is_empty() {
                    if tag != "ListBucketResult" {
                        return Err(format!("unexpected root element <{tag}>"));
                    }
                    saw_root = true;
                }
            }
            Ok(Event::End(_)) => {
                let closed = stack.pop();
                if closed.as_deref() == Some("Contents") && stack.len() == 1 {
                    if let Some(key) = current_key.take() {
                        result.keys.push(key);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                apply_text(&stack, &text, &mut result, &mut current_key);
            }
            Ok(Event::CData(ref e)) => {
                let text = std::str::from_utf8(e).map_err(|e| e.to_string())?;
                apply_text(&stack, text, &mut result, &mut current_key);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "error at position {}: {e}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err("document has no root element".to_string());
    }
    if !stack.is_empty() {
        return Err(format!("unclosed element <{}>", stack.join("/")));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>mybucket</Name>
  <Prefix></Prefix>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>a.txt</Key>
    <LastModified>2019-10-12T17:50:30.000Z</LastModified>
    <ETag>&quot;abc&quot;</ETag>
    <Size>12</Size>
  </Contents>
  <Contents>
    <Key>b/c.txt</Key>
    <Size>3</Size>
  </Contents>
  <CommonPrefixes>
    <Prefix>d/</Prefix>
  </CommonPrefixes>
</ListBucketResult>"#;

    #[test]
    fn test_parse_listing_in_document_order() {
        let result = parse_list_bucket_result(LISTING.as_bytes()).unwrap();
        assert_eq!(result.name, "mybucket");
        assert_eq!(result.keys, vec!["a.txt", "b/c.txt"]);
        assert!(!result.is_truncated);
        assert!(result.has_expected_namespace());
    }

    #[test]
    fn test_keys_are_not_sorted() {
        let xml = "<ListBucketResult><Name>b</Name>\
                   <Contents><Key>z.yaml</Key></Contents>\
                   <Contents><Key>a.yaml</Key></Contents></ListBucketResult>";
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert_eq!(result.keys, vec!["z.yaml", "a.yaml"]);
        assert!(result.namespace.is_none());
        assert!(!result.has_expected_namespace());
    }

    #[test]
    fn test_escaped_keys_are_unescaped() {
        let xml = "<ListBucketResult><Name>b</Name>\
                   <Contents><Key>a&amp;b &lt;1&gt;.txt</Key></Contents></ListBucketResult>";
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert_eq!(result.keys, vec!["a&b <1>.txt"]);
    }

    #[test]
    fn test_other_namespace_is_reported() {
        let xml = r#"<ListBucketResult xmlns="urn:example:other"><Name>b</Name><IsTruncated>true</IsTruncated></ListBucketResult>"#;
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert_eq!(result.namespace.as_deref(), Some("urn:example:other"));
        assert!(!result.has_expected_namespace());
        assert!(result.is_truncated);
        assert!(result.keys.is_empty());
    }

    #[test]
    fn test_prefixed_elements() {
        let xml = r#"<s3:ListBucketResult xmlns:s3="http://s3.amazonaws.com/doc/2006-03-01/"><s3:Name>b</s3:Name><s3:Contents><s3:Key>k</s3:Key></s3:Contents></s3:ListBucketResult>"#;
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert_eq!(result.name, "b");
        assert_eq!(result.keys, vec!["k"]);
        assert!(result.has_expected_namespace());
    }

    #[test]
    fn test_unrelated_namespace_bindings_are_ignored() {
        let xml = r#"<ListBucketResult xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>b</Name></ListBucketResult>"#;
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert!(result.has_expected_namespace());
    }

    #[test]
    fn test_key_whitespace_is_preserved() {
        let xml = "<ListBucketResult>\n  <Name> b </Name>\n  <IsTruncated>\n false\n </IsTruncated>\n\
                   <Contents>\n    <Key>  spaced.txt </Key>\n  </Contents>\n</ListBucketResult>\n";
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert_eq!(result.name, "b");
        assert!(!result.is_truncated);
        assert_eq!(result.keys, vec!["  spaced.txt "]);
    }

    #[test]
    fn test_cdata_keys() {
        let xml = "<ListBucketResult><Name>b</Name>\
                   <Contents><Key><![CDATA[a&b <c>.txt]]></Key></Contents>\
                   <Contents><Key>dir/<![CDATA[x y]]>.yaml</Key></Contents></ListBucketResult>";
        let result = parse_list_bucket_result(xml.as_bytes()).unwrap();
        assert_eq!(result.keys, vec!["a&b <c>.txt", "dir/x y.yaml"]);
    }

    #[test]
    fn test_error_document_is_rejected() {
        let xml = "<Error><Code>AccessDenied</Code></Error>";
        let err = parse_list_bucket_result(xml.as_bytes()).unwrap_err();
        assert!(err.contains("Error"));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        assert!(parse_list_bucket_result(b"<ListBucketResult><Name>b</Nme>").is_err());
        assert!(parse_list_bucket_result(b"<ListBucketResult><Name>b</Name>").is_err());
        assert!(parse_list_bucket_result(b"not xml at all").is_err());
        assert!(parse_list_bucket_result(b"").is_err());
    }
}
