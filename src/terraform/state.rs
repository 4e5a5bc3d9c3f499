//! Terraform state (format version 4).
//!
//! Only the parts the coordinator touches are modelled; anything else in
//! the document is carried through untouched on rewrite.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::resource::ManagedResource;

pub const STATE_FORMAT_VERSION: u32 = 4;

const MANAGED_MODE: &str = "managed";

#[derive(Debug, Error)]
pub enum StateFormatError {
    #[error("unsupported state format version {0}, expected 4")]
    UnsupportedVersion(u32),

    #[error("malformed state: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0} is already present in state")]
    Occupied(StateAddress),

    #[error("{0} has no \"id\" attribute")]
    MissingId(StateAddress),

    #[error("{address} has {count} instances; count/for_each resources cannot be moved as one")]
    MultipleInstances { address: StateAddress, count: usize },
}

/// Address of a resource inside one state document, e.g.
/// `component.web.aws_instance.test`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateAddress {
    pub module: Option<String>,
    pub resource_type: String,
    pub name: String,
}

impl fmt::Display for StateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "{}.", module)?;
        }
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    #[serde(default)]
    pub terraform_version: String,
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub resources: Vec<StateResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub mode: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub instances: Vec<StateInstance>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateInstance {
    #[serde(default)]
    pub schema_version: u64,
    pub attributes: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateResource {
    fn matches(&self, address: &StateAddress) -> bool {
        self.mode == MANAGED_MODE
            && self.module == address.module
            && self.resource_type == address.resource_type
            && self.name == address.name
    }

    fn to_managed(&self, address: &StateAddress) -> Result<ManagedResource, StateFormatError> {
        let instance = match self.instances.as_slice() {
            [instance] => instance,
            [] => return Err(StateFormatError::MissingId(address.clone())),
            many => {
                return Err(StateFormatError::MultipleInstances {
                    address: address.clone(),
                    count: many.len(),
                });
            }
        };
        let provider_id = instance
            .attributes
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| StateFormatError::MissingId(address.clone()))?;

        Ok(ManagedResource {
            resource_type: self.resource_type.clone(),
            name: self.name.clone(),
            provider: self.provider.clone(),
            provider_id: provider_id.to_string(),
            schema_version: instance.schema_version,
            attributes: instance.attributes.clone(),
            entry_extra: self.extra.clone(),
            instance_extra: instance.extra.clone(),
        })
    }

    fn address(&self) -> StateAddress {
        StateAddress {
            module: self.module.clone(),
            resource_type: self.resource_type.clone(),
            name: self.name.clone(),
        }
    }
}

impl StateDocument {
    pub fn empty() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        Self {
            version: STATE_FORMAT_VERSION,
            terraform_version: String::new(),
            serial: 0,
            lineage: format!("tsr-{:x}-{:x}", std::process::id(), nanos),
            outputs: Map::new(),
            resources: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, StateFormatError> {
        let document: Self = serde_json::from_str(input)?;
        if document.version != STATE_FORMAT_VERSION {
            return Err(StateFormatError::UnsupportedVersion(document.version));
        }
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String, StateFormatError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn find(&self, address: &StateAddress) -> Result<Option<ManagedResource>, StateFormatError> {
        self.resources
            .iter()
            .find(|r| r.matches(address))
            .map(|r| r.to_managed(address))
            .transpose()
    }

    pub fn contains(&self, address: &StateAddress) -> bool {
        self.resources.iter().any(|r| r.matches(address))
    }

    /// Every managed resource in the document, skipping entries without an id
    /// and multi-instance entries.
    pub fn managed_resources(&self) -> Vec<(StateAddress, ManagedResource)> {
        self.resources
            .iter()
            .filter(|r| r.mode == MANAGED_MODE)
            .filter_map(|r| {
                let address = r.address();
                r.to_managed(&address).ok().map(|m| (address, m))
            })
            .collect()
    }

    pub fn insert(
        &mut self,
        address: &StateAddress,
        resource: &ManagedResource,
    ) -> Result<(), StateFormatError> {
        if self.contains(address) {
            return Err(StateFormatError::Occupied(address.clone()));
        }

        let mut attributes = match &resource.attributes {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        attributes.insert("id".to_string(), Value::String(resource.provider_id.clone()));

        self.resources.push(StateResource {
            module: address.module.clone(),
            mode: MANAGED_MODE.to_string(),
            resource_type: address.resource_type.clone(),
            name: address.name.clone(),
            provider: resource.provider.clone(),
            instances: vec![StateInstance {
                schema_version: resource.schema_version,
                attributes: Value::Object(attributes),
                extra: resource.instance_extra.clone(),
            }],
            extra: resource.entry_extra.clone(),
        });
        Ok(())
    }

    pub fn remove(&mut self, address: &StateAddress) -> Result<Option<ManagedResource>, StateFormatError> {
        let Some(index) = self.resources.iter().position(|r| r.matches(address)) else {
            return Ok(None);
        };
        let managed = self.resources[index].to_managed(address)?;
        self.resources.remove(index);
        Ok(Some(managed))
    }

    pub fn bump_serial(&mut self) {
        self.serial += 1;
    }
}
