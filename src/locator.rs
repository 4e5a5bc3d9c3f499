use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::terraform::state::StateAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorParseError {
    #[error("locator '{0}' must look like [stack/]deployment:component:type.name")]
    Malformed(String),

    #[error("resource address '{0}' must look like type.name")]
    InvalidAddress(String),

    #[error("resource key '{0}' must look like type/id")]
    InvalidKey(String),
}

/// A resource address relative to its component, e.g. `aws_instance.test`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    pub resource_type: String,
    pub name: String,
}

impl ResourceAddress {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for ResourceAddress {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource_type, name) = s
            .split_once('.')
            .ok_or_else(|| LocatorParseError::InvalidAddress(s.to_string()))?;

        if !is_identifier(resource_type) || !is_identifier(name) {
            return Err(LocatorParseError::InvalidAddress(s.to_string()));
        }

        Ok(Self::new(resource_type, name))
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = LocatorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceAddress> for String {
    fn from(value: ResourceAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Storage location of one managed resource across the stack hierarchy.
///
/// Textual form is `[stack/]deployment:component:type.name`. The stack
/// prefix may be omitted when a default stack is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLocator {
    pub stack_id: String,
    pub deployment_id: String,
    pub component_id: String,
    pub resource_address: ResourceAddress,
}

impl ResourceLocator {
    pub fn new(
        stack_id: impl Into<String>,
        deployment_id: impl Into<String>,
        component_id: impl Into<String>,
        resource_address: ResourceAddress,
    ) -> Self {
        Self {
            stack_id: stack_id.into(),
            deployment_id: deployment_id.into(),
            component_id: component_id.into(),
            resource_address,
        }
    }

    pub fn parse(input: &str, default_stack: &str) -> Result<Self, LocatorParseError> {
        let malformed = || LocatorParseError::Malformed(input.to_string());

        let (stack_id, rest) = match input.split_once('/') {
            Some((stack, rest)) if is_identifier(stack) => (stack, rest),
            Some(_) => return Err(malformed()),
            None => (default_stack, input),
        };

        let mut parts = rest.splitn(3, ':');
        let deployment_id = parts.next().filter(|p| is_identifier(p)).ok_or_else(malformed)?;
        let component_id = parts.next().filter(|p| is_identifier(p)).ok_or_else(malformed)?;
        let address = parts.next().ok_or_else(malformed)?;

        if !is_identifier(stack_id) {
            return Err(malformed());
        }

        Ok(Self::new(
            stack_id,
            deployment_id,
            component_id,
            address.parse()?,
        ))
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_address.resource_type
    }

    /// Address of this resource inside its deployment's state.
    pub fn state_address(&self) -> StateAddress {
        StateAddress {
            module: Some(format!("component.{}", self.component_id)),
            resource_type: self.resource_address.resource_type.clone(),
            name: self.resource_address.name.clone(),
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}:{}",
            self.stack_id, self.deployment_id, self.component_id, self.resource_address
        )
    }
}

/// Provider-assigned identity of a shared resource: `<type>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey {
    pub resource_type: String,
    pub provider_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            provider_id: provider_id.into(),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((resource_type, provider_id))
                if is_identifier(resource_type) && !provider_id.is_empty() =>
            {
                Ok(Self::new(resource_type, provider_id))
            }
            _ => Err(LocatorParseError::InvalidKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = LocatorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.provider_id)
    }
}
