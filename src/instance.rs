//! Service instance records and their node paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DiscoveryError, Result};

/// A single running endpoint of a named service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique within the service.
    pub id: String,
    /// Service name.
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Endpoint URLs, e.g. `grpc://10.0.0.1:9000`.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: String::new(),
            metadata: BTreeMap::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Encode as the bytes stored in the instance node.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode the bytes of the node at `path`.
    pub fn decode(path: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DiscoveryError::decode(path, e))
    }
}

/// Check that `segment` can be used as a single path component.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(DiscoveryError::InvalidName("name cannot be empty".to_string()));
    }
    if segment.contains('/') {
        return Err(DiscoveryError::InvalidName(format!(
            "'{segment}' must not contain '/'"
        )));
    }
    Ok(())
}

/// Join a parent path and a child segment.
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// `root/name`
pub fn service_path(root: &str, name: &str) -> Result<String> {
    validate_segment(name)?;
    Ok(join(root, name))
}

/// `root/name/id`
pub fn instance_path(root: &str, instance: &ServiceInstance) -> Result<String> {
    validate_segment(&instance.id)?;
    Ok(join(&service_path(root, &instance.name)?, &instance.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let inst = ServiceInstance::new("a", "svc");
        assert_eq!(service_path("/microservices", "svc").unwrap(), "/microservices/svc");
        assert_eq!(
            instance_path("/microservices", &inst).unwrap(),
            "/microservices/svc/a"
        );
        assert_eq!(join("/", "svc"), "/svc");
    }

    #[test]
    fn test_invalid_segments() {
        assert!(matches!(
            service_path("/root", ""),
            Err(DiscoveryError::InvalidName(_))
        ));
        let inst = ServiceInstance::new("a/b", "svc");
        assert!(matches!(
            instance_path("/root", &inst),
            Err(DiscoveryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_decode_uses_go_style_field_names() {
        let bytes = br#"{"id":"a","name":"svc","endpoints":["http://127.0.0.1:8000"]}"#;
        let inst = ServiceInstance::decode("/microservices/svc/a", bytes).unwrap();
        assert_eq!(inst.id, "a");
        assert_eq!(inst.endpoints, vec!["http://127.0.0.1:8000".to_string()]);
        assert!(inst.metadata.is_empty());
    }

    #[test]
    fn test_encode_decode() {
        let inst = ServiceInstance::new("a", "svc")
            .with_version("v1")
            .with_metadata("zone", "eu-1")
            .with_endpoint("grpc://10.0.0.1:9000");
        let bytes = inst.encode().unwrap();
        assert_eq!(ServiceInstance::decode("/p", &bytes).unwrap(), inst);
    }

    #[test]
    fn test_decode_garbage() {
        let err = ServiceInstance::decode("/microservices/svc/bad", b"{not json").unwrap_err();
        match err {
            DiscoveryError::Decode { path, .. } => assert_eq!(path, "/microservices/svc/bad"),
            other => panic!("expected Decode, got {other:?}"),
        }
    }
}
