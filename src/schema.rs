//! Typed declared configuration per resource kind.
//!
//! A destination declaration is compared against what the provider
//! reports for the real resource. Only fields that force replacement when
//! changed take part: a mismatch there means the destination would plan a
//! destroy/create instead of adopting the resource.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::RemoteResource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceConfig {
    AwsInstance(AwsInstanceConfig),
    AwsSecurityGroup(AwsSecurityGroupConfig),
    AwsS3Bucket(AwsS3BucketConfig),
    Generic(GenericConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsInstanceConfig {
    pub ami: String,
    pub instance_type: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsSecurityGroupConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsS3BucketConfig {
    pub bucket: String,
}

/// Any other resource type, with its force-new attributes spelled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericConfig {
    pub resource_type: String,
    #[serde(default)]
    pub immutable: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub field: String,
    pub declared: Value,
    pub actual: Value,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (declared {}, actual {})",
            self.field, self.declared, self.actual
        )
    }
}

impl ResourceConfig {
    pub fn resource_type(&self) -> &str {
        match self {
            ResourceConfig::AwsInstance(_) => "aws_instance",
            ResourceConfig::AwsSecurityGroup(_) => "aws_security_group",
            ResourceConfig::AwsS3Bucket(_) => "aws_s3_bucket",
            ResourceConfig::Generic(config) => &config.resource_type,
        }
    }

    /// Declared values of the fields that cannot change in place.
    pub fn immutable_fields(&self) -> Vec<(String, Value)> {
        let mut fields = Vec::new();
        let mut push = |name: &str, value: Option<&String>| {
            if let Some(value) = value {
                fields.push((name.to_string(), Value::String(value.clone())));
            }
        };

        match self {
            ResourceConfig::AwsInstance(c) => {
                push("ami", Some(&c.ami));
                push("subnet_id", c.subnet_id.as_ref());
                push("availability_zone", c.availability_zone.as_ref());
            }
            ResourceConfig::AwsSecurityGroup(c) => {
                push("name", c.name.as_ref());
                push("vpc_id", c.vpc_id.as_ref());
                push("description", c.description.as_ref());
            }
            ResourceConfig::AwsS3Bucket(c) => push("bucket", Some(&c.bucket)),
            ResourceConfig::Generic(c) => {
                return c
                    .immutable
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
            }
        }
        fields
    }

    /// Plan-time validation of the declaration on its own.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ResourceConfig::AwsInstance(c) => {
                if !c.ami.starts_with("ami-") {
                    return Err(format!("ami '{}' must start with 'ami-'", c.ami));
                }
                if c.instance_type.is_empty() {
                    return Err("instance_type must not be empty".to_string());
                }
            }
            ResourceConfig::AwsSecurityGroup(c) => {
                if let Some(vpc) = &c.vpc_id
                    && !vpc.starts_with("vpc-")
                {
                    return Err(format!("vpc_id '{}' must start with 'vpc-'", vpc));
                }
            }
            ResourceConfig::AwsS3Bucket(c) => {
                let valid_chars = c
                    .bucket
                    .chars()
                    .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.');
                if !(3..=63).contains(&c.bucket.len()) || !valid_chars {
                    return Err(format!("bucket name '{}' is not valid", c.bucket));
                }
            }
            ResourceConfig::Generic(c) => {
                if c.resource_type.is_empty() {
                    return Err("resource_type must not be empty".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Every reason the resource at `destination_type` could not adopt `actual`.
pub fn compatibility_mismatches(
    destination_type: &str,
    declared: Option<&ResourceConfig>,
    actual: &RemoteResource,
) -> Vec<FieldMismatch> {
    let mut mismatches = Vec::new();

    if destination_type != actual.resource_type {
        mismatches.push(FieldMismatch {
            field: "type".to_string(),
            declared: Value::String(destination_type.to_string()),
            actual: Value::String(actual.resource_type.clone()),
        });
    }

    let Some(declared) = declared else {
        return mismatches;
    };

    if declared.resource_type() != destination_type {
        mismatches.push(FieldMismatch {
            field: "type".to_string(),
            declared: Value::String(declared.resource_type().to_string()),
            actual: Value::String(destination_type.to_string()),
        });
    }

    for (field, expected) in declared.immutable_fields() {
        let reported = actual.attributes.get(&field).cloned().unwrap_or(Value::Null);
        if reported != expected {
            mismatches.push(FieldMismatch {
                field,
                declared: expected,
                actual: reported,
            });
        }
    }

    mismatches
}
