//! ConfigMaps carrying the instance configuration and datasource
//! provisioning files.
//!
//! The config ConfigMap carries the serialized document under a single key
//! and the content hash as an annotation; the datasource ConfigMap holds
//! one provisioning file per registered datasource spec, keyed by file
//! name.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use vigil_common::ANNOTATION_CONFIG_HASH;

use super::{config_map_name, datasource_config_map_name, object_meta};
use crate::inifile::ConfigDocument;

/// File name of the configuration document inside the config ConfigMap
pub const CONFIG_FILE: &str = "vigil.ini";

/// Desired config ConfigMap for the given document
pub fn config_map(namespace: &str, instance: &str, doc: &ConfigDocument) -> ConfigMap {
    let mut meta = object_meta(namespace, &config_map_name(instance), instance);
    meta.annotations = Some(BTreeMap::from([(
        ANNOTATION_CONFIG_HASH.to_string(),
        doc.hash.clone(),
    )]));

    ConfigMap {
        metadata: meta,
        data: Some(BTreeMap::from([(CONFIG_FILE.to_string(), doc.text.clone())])),
        ..ConfigMap::default()
    }
}

/// Desired datasource provisioning ConfigMap.
///
/// `files` maps provisioning file names to rendered payloads; an empty map
/// still yields the ConfigMap so the workload volume mount stays valid.
pub fn datasource_config_map(
    namespace: &str,
    instance: &str,
    files: &BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(namespace, &datasource_config_map_name(instance), instance),
        data: Some(files.clone()),
        ..ConfigMap::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inifile;
    use vigil_common::crd::ConfigSections;

    #[test]
    fn config_map_carries_document_and_hash_annotation() {
        let doc = inifile::serialize(&ConfigSections::new()).unwrap();
        let cm = config_map("monitoring", "main", &doc);

        assert_eq!(cm.metadata.name.as_deref(), Some("main-config"));
        assert_eq!(
            cm.metadata.annotations.unwrap()[ANNOTATION_CONFIG_HASH],
            doc.hash
        );
        assert_eq!(cm.data.unwrap()[CONFIG_FILE], doc.text);
    }

    #[test]
    fn empty_datasource_map_still_materializes() {
        let cm = datasource_config_map("monitoring", "main", &BTreeMap::new());
        assert_eq!(cm.metadata.name.as_deref(), Some("main-datasources"));
        assert_eq!(cm.data, Some(BTreeMap::new()));
    }
}
