//! Raw node and edge rows as returned by the service

use crate::identifier::InstanceId;
use crate::view::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property mapping handed to typed-instance constructors
pub type RawMapping = serde_json::Map<String, Value>;

/// A node with the properties projected for one view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    #[serde(flatten)]
    pub id: InstanceId,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub properties: RawMapping,
}

impl NodeRow {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            version: 1,
            properties: RawMapping::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Point direct relation `name` at `target`
    pub fn with_relation(self, name: impl Into<String>, target: &InstanceId) -> Self {
        self.with_property(name, target.to_value())
    }

    pub fn with_relations(self, name: impl Into<String>, targets: &[InstanceId]) -> Self {
        let values: Vec<Value> = targets.iter().map(InstanceId::to_value).collect();
        self.with_property(name, Value::Array(values))
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Identifiers held by direct relation `name`, in property order
    ///
    /// A missing or `null` property yields no ids. List values skip entries
    /// that are not identifiers.
    pub fn referenced_ids(&self, name: &str) -> Vec<InstanceId> {
        match self.properties.get(name) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().filter_map(InstanceId::from_value).collect(),
            Some(value) => InstanceId::from_value(value).into_iter().collect(),
        }
    }

    /// Identity fields plus every projected property
    pub fn to_mapping(&self) -> RawMapping {
        let mut mapping = identity_mapping(&self.id);
        mapping.insert("version".to_string(), Value::from(self.version));
        for (key, value) in &self.properties {
            mapping.insert(key.clone(), value.clone());
        }
        mapping
    }
}

/// An edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRow {
    #[serde(flatten)]
    pub id: InstanceId,
    #[serde(rename = "type")]
    pub edge_type: InstanceId,
    pub start_node: InstanceId,
    pub end_node: InstanceId,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub properties: RawMapping,
}

impl EdgeRow {
    pub fn new(
        id: InstanceId,
        edge_type: InstanceId,
        start_node: InstanceId,
        end_node: InstanceId,
    ) -> Self {
        Self {
            id,
            edge_type,
            start_node,
            end_node,
            version: 1,
            properties: RawMapping::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// The node this edge was reached from when traversed in `direction`
    pub fn near_end(&self, direction: Direction) -> &InstanceId {
        match direction {
            Direction::Outgoing => &self.start_node,
            Direction::Incoming => &self.end_node,
        }
    }

    /// The node this edge leads to when traversed in `direction`
    pub fn far_end(&self, direction: Direction) -> &InstanceId {
        match direction {
            Direction::Outgoing => &self.end_node,
            Direction::Incoming => &self.start_node,
        }
    }

    pub fn to_mapping(&self) -> RawMapping {
        let mut mapping = identity_mapping(&self.id);
        mapping.insert("version".to_string(), Value::from(self.version));
        mapping.insert("type".to_string(), self.edge_type.to_value());
        mapping.insert("startNode".to_string(), self.start_node.to_value());
        mapping.insert("endNode".to_string(), self.end_node.to_value());
        for (key, value) in &self.properties {
            mapping.insert(key.clone(), value.clone());
        }
        mapping
    }
}

/// `{"space": .., "externalId": ..}` as a mapping
pub fn identity_mapping(id: &InstanceId) -> RawMapping {
    let mut mapping = RawMapping::new();
    mapping.insert("space".to_string(), Value::String(id.space.clone()));
    mapping.insert("externalId".to_string(), Value::String(id.external_id.clone()));
    mapping
}
