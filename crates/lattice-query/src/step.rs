//! Query steps: one request unit of a plan

use lattice_client::{EdgeTypeFilter, ProjectionSource};
use lattice_core::{Direction, Predicate, SortSpec, ViewId, ViewPropertyId};
use serde::{Deserialize, Serialize};

/// How many rows a step may return in total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrieveLimit {
    #[default]
    Unbounded,
    AtMost(usize),
}

impl RetrieveLimit {
    /// Rows still allowed after `received`; `None` when unbounded
    pub fn remaining(&self, received: usize) -> Option<usize> {
        match self {
            RetrieveLimit::Unbounded => None,
            RetrieveLimit::AtMost(max) => Some(max.saturating_sub(received)),
        }
    }

    pub fn is_satisfied(&self, received: usize) -> bool {
        self.remaining(received) == Some(0)
    }
}

impl From<Option<usize>> for RetrieveLimit {
    fn from(limit: Option<usize>) -> Self {
        match limit {
            Some(max) => RetrieveLimit::AtMost(max),
            None => RetrieveLimit::Unbounded,
        }
    }
}

/// Whether a step yields nodes or edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Node,
    Edge,
}

/// View and properties projected for a node step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Select {
    pub view: ViewId,
    pub properties: Vec<String>,
    /// Subset of `properties` holding direct relations
    #[serde(default)]
    pub relations: Vec<String>,
    pub source: ProjectionSource,
}

impl Select {
    pub fn new(view: ViewId, properties: Vec<String>, has_container_fields: bool) -> Self {
        Self {
            view,
            properties,
            relations: Vec::new(),
            source: ProjectionSource::from_container_fields(has_container_fields),
        }
    }

    pub fn with_relations(mut self, relations: Vec<String>) -> Self {
        for relation in &relations {
            if !self.properties.contains(relation) {
                self.properties.push(relation.clone());
            }
        }
        self.relations = relations;
        self
    }

    pub fn is_relation(&self, property: &str) -> bool {
        self.relations.iter().any(|r| r == property)
    }
}

/// What a step fetches and where its source identifiers come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepExpression {
    /// Entities of the selected view matching `filter`
    Root {
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Predicate>,
        #[serde(default)]
        sort: Vec<SortSpec>,
    },
    /// Nodes referenced by direct relation `via` on the source step's rows
    DirectRelationHop {
        source: String,
        via: String,
        /// `via` holds a list of identifiers
        #[serde(default)]
        list: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Predicate>,
    },
    /// Nodes whose direct relation `through` points at the source step's rows
    ReverseRelationHop {
        source: String,
        through: ViewPropertyId,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Predicate>,
    },
    /// Edges touching the source step's rows
    EdgeTraversalHop {
        source: String,
        edge_filter: EdgeTypeFilter,
        direction: Direction,
    },
    /// Far-end nodes of the source edge step's rows
    EdgeEndpoints {
        source: String,
        direction: Direction,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Predicate>,
    },
}

impl StepExpression {
    /// Name of the step this one depends on
    pub fn source(&self) -> Option<&str> {
        match self {
            StepExpression::Root { .. } => None,
            StepExpression::DirectRelationHop { source, .. }
            | StepExpression::ReverseRelationHop { source, .. }
            | StepExpression::EdgeTraversalHop { source, .. }
            | StepExpression::EdgeEndpoints { source, .. } => Some(source),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, StepExpression::Root { .. })
    }

    /// The caller-supplied node predicate, if this expression carries one
    pub fn filter(&self) -> Option<&Predicate> {
        match self {
            StepExpression::Root { filter, .. }
            | StepExpression::DirectRelationHop { filter, .. }
            | StepExpression::ReverseRelationHop { filter, .. }
            | StepExpression::EdgeEndpoints { filter, .. } => filter.as_ref(),
            StepExpression::EdgeTraversalHop { edge_filter, .. } => edge_filter.filter.as_ref(),
        }
    }

    /// Kind of rows the source step must produce
    pub fn source_kind(&self) -> Option<ResultKind> {
        match self {
            StepExpression::Root { .. } => None,
            StepExpression::EdgeEndpoints { .. } => Some(ResultKind::Edge),
            _ => Some(ResultKind::Node),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepExpression::Root { .. } => "root",
            StepExpression::DirectRelationHop { .. } => "direct relation",
            StepExpression::ReverseRelationHop { .. } => "reverse relation",
            StepExpression::EdgeTraversalHop { .. } => "edges",
            StepExpression::EdgeEndpoints { .. } => "edge endpoints",
        }
    }
}

/// One unit of a query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStep {
    pub name: String,
    pub expression: StepExpression,
    /// Projection for node steps; `None` for edge steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Select>,
    pub max_retrieve_limit: RetrieveLimit,
    pub result_kind: ResultKind,
    /// Key under which this step's rows attach to a parent mapping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_property: Option<String>,
}

impl QueryStep {
    pub fn node(name: impl Into<String>, expression: StepExpression, select: Select) -> Self {
        Self {
            name: name.into(),
            expression,
            select: Some(select),
            max_retrieve_limit: RetrieveLimit::Unbounded,
            result_kind: ResultKind::Node,
            connection_property: None,
        }
    }

    pub fn edge(name: impl Into<String>, expression: StepExpression) -> Self {
        Self {
            name: name.into(),
            expression,
            select: None,
            max_retrieve_limit: RetrieveLimit::Unbounded,
            result_kind: ResultKind::Edge,
            connection_property: None,
        }
    }

    pub fn with_limit(mut self, limit: RetrieveLimit) -> Self {
        self.max_retrieve_limit = limit;
        self
    }

    pub fn with_connection(mut self, property: impl Into<String>) -> Self {
        self.connection_property = Some(property.into());
        self
    }

    /// Replace the predicate applied to this step's rows
    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        match &mut self.expression {
            StepExpression::Root { filter, .. }
            | StepExpression::DirectRelationHop { filter, .. }
            | StepExpression::ReverseRelationHop { filter, .. }
            | StepExpression::EdgeEndpoints { filter, .. } => *filter = Some(predicate),
            StepExpression::EdgeTraversalHop { edge_filter, .. } => {
                edge_filter.filter = Some(predicate)
            }
        }
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.expression.source()
    }

    pub fn is_root(&self) -> bool {
        self.expression.is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::InstanceId;

    #[test]
    fn test_retrieve_limit_remaining() {
        assert_eq!(RetrieveLimit::AtMost(10).remaining(4), Some(6));
        assert_eq!(RetrieveLimit::AtMost(10).remaining(12), Some(0));
        assert!(RetrieveLimit::AtMost(3).is_satisfied(3));
        assert_eq!(RetrieveLimit::Unbounded.remaining(1_000_000), None);
        assert_eq!(RetrieveLimit::from(Some(5)), RetrieveLimit::AtMost(5));
    }

    #[test]
    fn test_select_with_relations_appends_missing() {
        let select = Select::new(ViewId::new("s", "Well", "v1"), vec!["name".into()], true)
            .with_relations(vec!["operator".into()]);
        assert_eq!(select.properties, vec!["name", "operator"]);
        assert!(select.is_relation("operator"));
        assert!(!select.is_relation("name"));
        assert_eq!(select.source, ProjectionSource::Container);
    }

    #[test]
    fn test_with_filter_on_edge_step() {
        let step = QueryStep::edge(
            "docs",
            StepExpression::EdgeTraversalHop {
                source: "well".into(),
                edge_filter: EdgeTypeFilter::new(InstanceId::new("s", "Well.documents")),
                direction: Direction::Outgoing,
            },
        )
        .with_filter(Predicate::exists("weight"));
        assert_eq!(step.expression.filter(), Some(&Predicate::exists("weight")));
        assert_eq!(step.source(), Some("well"));
        assert_eq!(step.expression.source_kind(), Some(ResultKind::Node));
    }

    #[test]
    fn test_step_serializes_expression_tag() {
        let step = QueryStep::node(
            "well",
            StepExpression::Root {
                filter: None,
                sort: vec![],
            },
            Select::new(ViewId::new("s", "Well", "v1"), vec![], false),
        );
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["expression"]["type"], "root");
        assert_eq!(json["resultKind"], "node");
    }
}
