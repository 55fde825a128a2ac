//! View definitions: the property slots the query engine may select or hop through

use crate::error::{Error, Result};
use crate::identifier::{InstanceId, ViewId, ViewPropertyId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction of an edge relative to the entity it is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }
}

/// What a view property holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PropertyKind {
    /// Plain value stored on the node
    Scalar,
    /// Identifier (or list of identifiers) of another node
    DirectRelation {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<ViewId>,
        #[serde(default)]
        list: bool,
    },
    /// Nodes of another view whose direct relation `through` points here
    ReverseDirectRelation { through: ViewPropertyId },
    /// Edges of `edge_type` connected to this node
    EdgeConnection {
        edge_type: InstanceId,
        direction: Direction,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<ViewId>,
    },
}

impl PropertyKind {
    /// Whether the service returns this property as part of a node row
    pub fn is_stored(&self) -> bool {
        matches!(self, PropertyKind::Scalar | PropertyKind::DirectRelation { .. })
    }

    pub fn is_relation(&self) -> bool {
        !matches!(self, PropertyKind::Scalar)
    }

    /// Short label used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            PropertyKind::Scalar => "scalar",
            PropertyKind::DirectRelation { .. } => "direct relation",
            PropertyKind::ReverseDirectRelation { .. } => "reverse direct relation",
            PropertyKind::EdgeConnection { .. } => "edge connection",
        }
    }
}

/// A named property on a view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewProperty {
    pub name: String,
    #[serde(flatten)]
    pub kind: PropertyKind,
}

/// Schema of one view, with properties in declaration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub id: ViewId,
    #[serde(default)]
    pub properties: Vec<ViewProperty>,
}

impl ViewDefinition {
    pub fn new(id: ViewId) -> Self {
        Self {
            id,
            properties: Vec::new(),
        }
    }

    /// Add or replace a property
    pub fn with_property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.kind = kind,
            None => self.properties.push(ViewProperty { name, kind }),
        }
        self
    }

    pub fn with_scalar(self, name: impl Into<String>) -> Self {
        self.with_property(name, PropertyKind::Scalar)
    }

    pub fn with_direct_relation(self, name: impl Into<String>, target: Option<ViewId>) -> Self {
        self.with_property(name, PropertyKind::DirectRelation { target, list: false })
    }

    pub fn with_direct_relation_list(
        self,
        name: impl Into<String>,
        target: Option<ViewId>,
    ) -> Self {
        self.with_property(name, PropertyKind::DirectRelation { target, list: true })
    }

    pub fn with_reverse_relation(self, name: impl Into<String>, through: ViewPropertyId) -> Self {
        self.with_property(name, PropertyKind::ReverseDirectRelation { through })
    }

    pub fn with_edge(
        self,
        name: impl Into<String>,
        edge_type: InstanceId,
        direction: Direction,
        target: Option<ViewId>,
    ) -> Self {
        self.with_property(
            name,
            PropertyKind::EdgeConnection {
                edge_type,
                direction,
                target,
            },
        )
    }

    pub fn property(&self, name: &str) -> Option<&ViewProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Names of properties the service returns on node rows
    pub fn stored_properties(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| p.kind.is_stored())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Names of direct relation properties
    pub fn direct_relations(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| matches!(p.kind, PropertyKind::DirectRelation { .. }))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            if property.name.is_empty() {
                return Err(Error::InvalidView(format!("{} has an unnamed property", self.id)));
            }
            if !seen.insert(property.name.as_str()) {
                return Err(Error::InvalidView(format!(
                    "{} declares '{}' twice",
                    self.id, property.name
                )));
            }
        }
        Ok(())
    }
}

/// The set of views known to a query
#[derive(Debug, Clone, Default)]
pub struct ViewCatalog {
    views: HashMap<ViewId, ViewDefinition>,
}

impl ViewCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, view: ViewDefinition) -> Result<()> {
        view.validate()?;
        self.views.insert(view.id.clone(), view);
        Ok(())
    }

    pub fn with_view(mut self, view: ViewDefinition) -> Result<Self> {
        self.insert(view)?;
        Ok(self)
    }

    pub fn get(&self, id: &ViewId) -> Option<&ViewDefinition> {
        self.views.get(id)
    }

    pub fn require(&self, id: &ViewId) -> Result<&ViewDefinition> {
        self.views
            .get(id)
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_view() -> ViewDefinition {
        let operator = ViewId::new("core", "Operator", "v1");
        ViewDefinition::new(ViewId::new("core", "Well", "v1"))
            .with_scalar("name")
            .with_direct_relation("operator", Some(operator))
            .with_edge(
                "documents",
                InstanceId::new("core", "Well.documents"),
                Direction::Outgoing,
                None,
            )
    }

    #[test]
    fn test_stored_properties_skip_edges() {
        let view = well_view();
        assert_eq!(view.stored_properties(), vec!["name", "operator"]);
        assert_eq!(view.direct_relations(), vec!["operator"]);
    }

    #[test]
    fn test_with_property_replaces() {
        let view = well_view().with_scalar("operator");
        assert_eq!(view.properties.len(), 3);
        assert_eq!(view.property("operator").map(|p| &p.kind), Some(&PropertyKind::Scalar));
    }

    #[test]
    fn test_catalog_require() {
        let catalog = ViewCatalog::new().with_view(well_view()).unwrap();
        assert!(catalog.require(&ViewId::new("core", "Well", "v1")).is_ok());
        assert!(matches!(
            catalog.require(&ViewId::new("core", "Pump", "v1")),
            Err(Error::ViewNotFound(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut view = well_view();
        view.properties.push(ViewProperty {
            name: "name".into(),
            kind: PropertyKind::Scalar,
        });
        assert!(view.validate().is_err());
    }
}
