//! Result payload serializers
//!
//! The store never looks inside a payload: it hands values to a [`Serializer`]
//! on write and stores the returned bytes, and hands the bytes back on read.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Encodes result payloads to opaque blobs and back
pub trait Serializer: Send + Sync + 'static {
    /// MIME type of the encoding, used in error reports
    fn content_type(&self) -> &'static str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, StoreError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, StoreError>;
}

/// JSON encoding (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(value).map_err(|e| StoreError::serialization(self.content_type(), e))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::serialization(self.content_type(), e))
    }
}

/// YAML encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn content_type(&self) -> &'static str {
        "application/x-yaml"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, StoreError> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| StoreError::serialization(self.content_type(), e))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, StoreError> {
        serde_yaml::from_slice(bytes).map_err(|e| StoreError::serialization(self.content_type(), e))
    }
}

/// Serializer selected by name in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    #[default]
    Json,
    Yaml,
}

impl SerializerKind {
    pub fn build(self) -> Arc<dyn Serializer> {
        match self {
            Self::Json => Arc::new(JsonSerializer),
            Self::Yaml => Arc::new(YamlSerializer),
        }
    }
}

impl FromStr for SerializerKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(StoreError::Configuration(format!(
                "unknown result serializer: {other}"
            ))),
        }
    }
}
