//! Identifiers for instances, views and view properties

use crate::error::{Error, Result};
use crate::limits::{validate_external_id, validate_space};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Address of a node or edge: a space plus an external id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceId {
    pub space: String,
    pub external_id: String,
}

impl InstanceId {
    pub fn new(space: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
        }
    }

    /// Create an identifier, rejecting empty or oversized parts
    pub fn parse(space: &str, external_id: &str) -> Result<Self> {
        validate_space(space)?;
        validate_external_id(external_id)?;
        Ok(Self::new(space, external_id))
    }

    /// Read an identifier from a `{"space": .., "externalId": ..}` value
    ///
    /// Returns `None` for `null`, for non-objects and for objects missing
    /// either key.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let space = object.get("space")?.as_str()?;
        let external_id = object.get("externalId")?.as_str()?;
        Some(Self::new(space, external_id))
    }

    /// Encode as the `{"space": .., "externalId": ..}` object used in raw mappings
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "space": self.space,
            "externalId": self.external_id,
        })
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.space, self.external_id)
    }
}

impl TryFrom<&Value> for InstanceId {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        Self::from_value(value)
            .ok_or_else(|| Error::InvalidIdentifier(format!("not an instance id: {}", value)))
    }
}

/// Identifier of a versioned view
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewId {
    pub space: String,
    pub external_id: String,
    pub version: String,
}

impl ViewId {
    pub fn new(
        space: impl Into<String>,
        external_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            space: space.into(),
            external_id: external_id.into(),
            version: version.into(),
        }
    }

    /// Identify a property slot on this view
    pub fn property(&self, name: impl Into<String>) -> ViewPropertyId {
        ViewPropertyId::new(self.clone(), name)
    }
}

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.space, self.external_id, self.version)
    }
}

/// A property slot on a named view
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPropertyId {
    pub view: ViewId,
    pub property: String,
}

impl ViewPropertyId {
    pub fn new(view: ViewId, property: impl Into<String>) -> Self {
        Self {
            view,
            property: property.into(),
        }
    }
}

impl std::fmt::Display for ViewPropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.view, self.property)
    }
}
