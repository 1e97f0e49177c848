//! Deterministic serialization of the instance configuration.
//!
//! The config document is an INI-style text: section headers followed by
//! `key = value` lines. Sections and keys are sorted before emission, so
//! the text and its hash are pure functions of semantic content and do not
//! depend on the iteration order of the source maps.
//!
//! The hash is stored as an annotation on the config ConfigMap and
//! mirrored into the workload environment; a changed hash makes the pod
//! template differ byte-for-byte, which forces a rolling update. It has no
//! security purpose.

use sha2::{Digest, Sha256};
use vigil_common::crd::ConfigSections;
use vigil_common::Error;

/// Serialized configuration plus its content hash
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigDocument {
    /// Section-delimited key=value text
    pub text: String,
    /// SHA-256 hex digest of `text`
    pub hash: String,
}

/// Serialize configuration sections into a deterministic document.
///
/// Absent sections are omitted entirely; a present-but-empty section still
/// emits its header with no keys. Keys and values must be single-line.
pub fn serialize(sections: &ConfigSections) -> Result<ConfigDocument, Error> {
    let mut section_names: Vec<&String> = sections.keys().collect();
    section_names.sort();

    let mut text = String::new();
    for section in section_names {
        validate_token(section, "section name")?;
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("[{section}]\n"));

        let body = &sections[section];
        let mut keys: Vec<&String> = body.keys().collect();
        keys.sort();
        for key in keys {
            validate_token(key, "key")?;
            let value = &body[key];
            if value.contains('\n') {
                return Err(Error::serialization(format!(
                    "value for {section}.{key} contains a newline"
                )));
            }
            text.push_str(&format!("{key} = {value}\n"));
        }
    }

    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Ok(ConfigDocument { text, hash })
}

fn validate_token(token: &str, what: &str) -> Result<(), Error> {
    if token.is_empty() {
        return Err(Error::serialization(format!("empty {what}")));
    }
    if token.contains(['\n', '[', ']', '=']) {
        return Err(Error::serialization(format!(
            "{what} '{token}' contains a reserved character"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sections(entries: &[(&str, &[(&str, &str)])]) -> ConfigSections {
        entries
            .iter()
            .map(|(name, body)| {
                (
                    name.to_string(),
                    body.iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn sections_and_keys_are_sorted() {
        let cfg = sections(&[
            ("server", &[("root_url", "https://viz"), ("http_port", "3000")]),
            ("auth", &[("disable_login_form", "true")]),
        ]);
        let doc = serialize(&cfg).unwrap();
        assert_eq!(
            doc.text,
            "[auth]\n\
             disable_login_form = true\n\
             \n\
             [server]\n\
             http_port = 3000\n\
             root_url = https://viz\n"
        );
    }

    #[test]
    fn hash_is_invariant_under_insertion_order() {
        // HashMap iteration order varies between instances; build the same
        // semantic config twice with keys inserted in opposite orders.
        let mut a_body = HashMap::new();
        a_body.insert("x".to_string(), "1".to_string());
        a_body.insert("y".to_string(), "2".to_string());
        let mut a = HashMap::new();
        a.insert("server".to_string(), a_body);
        a.insert("auth".to_string(), HashMap::new());

        let mut b_body = HashMap::new();
        b_body.insert("y".to_string(), "2".to_string());
        b_body.insert("x".to_string(), "1".to_string());
        let mut b = HashMap::new();
        b.insert("auth".to_string(), HashMap::new());
        b.insert("server".to_string(), b_body);

        let doc_a = serialize(&a).unwrap();
        let doc_b = serialize(&b).unwrap();
        assert_eq!(doc_a.text, doc_b.text);
        assert_eq!(doc_a.hash, doc_b.hash);
    }

    #[test]
    fn hash_changes_with_semantic_content() {
        let doc_a = serialize(&sections(&[("server", &[("http_port", "3000")])])).unwrap();
        let doc_b = serialize(&sections(&[("server", &[("http_port", "3001")])])).unwrap();
        assert_ne!(doc_a.hash, doc_b.hash);
    }

    #[test]
    fn empty_section_emits_header_only() {
        let doc = serialize(&sections(&[("alerting", &[])])).unwrap();
        assert_eq!(doc.text, "[alerting]\n");
    }

    #[test]
    fn absent_config_serializes_to_empty_document() {
        let doc = serialize(&ConfigSections::new()).unwrap();
        assert!(doc.text.is_empty());
        // SHA-256 of the empty string
        assert_eq!(
            doc.hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn multiline_values_are_rejected() {
        let err = serialize(&sections(&[("server", &[("motd", "a\nb")])])).unwrap_err();
        assert!(err.to_string().contains("newline"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn reserved_characters_in_keys_are_rejected() {
        assert!(serialize(&sections(&[("ser]ver", &[])])).is_err());
        assert!(serialize(&sections(&[("server", &[("a=b", "1")])])).is_err());
    }
}
