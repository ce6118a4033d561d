use crate::errors::InitError;
use crate::services::endpoint::{DescriptorSource, EndpointDescriptor};
use serde::Deserialize;

const EMBEDDED_MANIFEST: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/operations.json"));

#[derive(Debug, Deserialize)]
struct ManifestFile {
    operations: Vec<EndpointDescriptor>,
}

/// Endpoint descriptors compiled into the binary.
#[derive(Debug, Clone)]
pub struct ManifestSchemaStore {
    raw: &'static str,
}

impl ManifestSchemaStore {
    pub fn embedded() -> Self {
        Self {
            raw: EMBEDDED_MANIFEST,
        }
    }

    pub fn from_static(raw: &'static str) -> Self {
        Self { raw }
    }

    pub fn load(&self) -> Result<Vec<EndpointDescriptor>, InitError> {
        let file: ManifestFile = serde_json::from_str(self.raw)?;
        Ok(file
            .operations
            .into_iter()
            .map(|mut descriptor| {
                descriptor.source = DescriptorSource::Manifest;
                descriptor
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::endpoint::{HttpMethod, ResponseShape};
    use crate::services::schema_index::SchemaIndex;

    #[test]
    fn embedded_manifest_builds_a_consistent_index() {
        let descriptors = ManifestSchemaStore::embedded().load().expect("manifest");
        let index = SchemaIndex::from_descriptors(descriptors).expect("index");
        let view = index.resolve("work_packages.view").expect("resolve");
        assert_eq!(view.method, HttpMethod::Get);
        assert_eq!(view.path, "/api/v3/work_packages/{id}");
        let list = index.resolve("work_packages.list").expect("resolve");
        assert_eq!(list.response, ResponseShape::Collection);
        assert!(list.is_paginated());
    }

    #[test]
    fn writes_are_not_retry_safe_unless_marked() {
        let descriptors = ManifestSchemaStore::embedded().load().expect("manifest");
        let index = SchemaIndex::from_descriptors(descriptors).expect("index");
        assert!(!index.resolve("attachments.create").expect("op").retry_safe_by_default());
        assert!(!index.resolve("work_packages.create").expect("op").retry_safe_by_default());
        assert!(index
            .resolve("work_packages.watchers.add")
            .expect("op")
            .retry_safe_by_default());
    }

    #[test]
    fn duplicate_keys_in_a_manifest_are_fatal() {
        let store = ManifestSchemaStore::from_static(
            r#"{"operations": [
                {"key": "a", "method": "GET", "path": "/a"},
                {"key": "a", "method": "GET", "path": "/b"}
            ]}"#,
        );
        let err = SchemaIndex::from_descriptors(store.load().expect("parse")).expect_err("dup");
        assert!(matches!(err, InitError::DuplicateOperation(key) if key == "a"));
    }
}
