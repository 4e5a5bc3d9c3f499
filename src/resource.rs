use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::locator::{ResourceAddress, ResourceKey};

/// One resource instance as recorded in a deployment's state.
///
/// Fields of the state entry this type does not model (`each`,
/// `index_key`, `private`, `dependencies`, `sensitive_attributes`, ...) ride
/// along verbatim so a moved or restored entry matches the original.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManagedResource {
    pub resource_type: String,
    pub name: String,
    pub provider: String,
    pub provider_id: String,
    #[serde(default)]
    pub schema_version: u64,
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub entry_extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub instance_extra: Map<String, Value>,
}

impl ManagedResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.provider_id)
    }

    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(&self.resource_type, &self.name)
    }

    /// Same real-world resource, recorded under a different address.
    pub fn relocated(&self, address: &ResourceAddress) -> Self {
        Self {
            resource_type: address.resource_type.clone(),
            name: address.name.clone(),
            ..self.clone()
        }
    }
}

/// Attributes the provider currently reports for a real-world resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteResource {
    pub resource_type: String,
    pub provider_id: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl RemoteResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ManagedResource {
        ManagedResource {
            resource_type: "aws_instance".to_string(),
            name: "test".to_string(),
            provider: "provider[\"registry.terraform.io/hashicorp/aws\"]".to_string(),
            provider_id: "i-0abc123".to_string(),
            schema_version: 1,
            attributes: serde_json::json!({"id": "i-0abc123", "ami": "ami-123"}),
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_serialization_snake_case() {
        let json = serde_json::to_string(&instance()).unwrap();
        assert!(json.contains("resource_type"));
        assert!(json.contains("provider_id"));
        assert!(json.contains("schema_version"));
        assert!(!json.contains("resourceType"));
        assert!(!json.contains("providerId"));
    }

    #[test]
    fn test_resource_deserialization_defaults_schema_version() {
        let json = r#"{
            "resource_type": "aws_instance",
            "name": "web",
            "provider": "aws",
            "provider_id": "i-1",
            "attributes": {"id": "i-1"}
        }"#;
        let resource: ManagedResource = serde_json::from_str(json).unwrap();
        assert_eq!(resource.schema_version, 0);
        assert_eq!(resource.attributes["id"], "i-1");
    }

    #[test]
    fn test_key_combines_type_and_provider_id() {
        assert_eq!(instance().key().to_string(), "aws_instance/i-0abc123");
    }

    #[test]
    fn test_relocated_keeps_identity() {
        let moved = instance().relocated(&ResourceAddress::new("aws_instance", "promoted"));
        assert_eq!(moved.name, "promoted");
        assert_eq!(moved.provider_id, "i-0abc123");
        assert_eq!(moved.attributes, instance().attributes);
    }

    #[test]
    fn test_relocated_keeps_unmodelled_fields() {
        let mut resource = instance();
        resource
            .instance_extra
            .insert("private".to_string(), serde_json::json!("eyJzY2hlbWEiOjF9"));
        resource
            .entry_extra
            .insert("each".to_string(), serde_json::json!("list"));

        let moved = resource.relocated(&ResourceAddress::new("aws_instance", "promoted"));
        assert_eq!(moved.instance_extra["private"], "eyJzY2hlbWEiOjF9");
        assert_eq!(moved.entry_extra["each"], "list");
    }
}
