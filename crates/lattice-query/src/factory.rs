//! Turn "root plus relation hops" requests into query steps
//!
//! The factory resolves property names against a [`ViewCatalog`], so every
//! misuse (no root yet, unknown property, wrong property kind) is reported
//! before a single network call is made.

use std::collections::HashMap;

use lattice_client::EdgeTypeFilter;
use lattice_core::{
    Direction, Predicate, PropertyKind, SortSpec, ViewCatalog, ViewDefinition, ViewId,
    ViewProperty,
};

use crate::builder::QueryBuilder;
use crate::error::{QueryError, QueryResult};
use crate::step::{QueryStep, ResultKind, RetrieveLimit, Select, StepExpression};
use crate::unpack::far_end_key;

/// Whether an edge hop also fetches the nodes at the far end of each edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expansion {
    #[default]
    EdgesOnly,
    WithEndpoints { has_container_fields: bool },
}

/// A step hops may start from
#[derive(Debug, Clone)]
struct Terminal {
    name: String,
    view: Option<ViewId>,
    kind: ResultKind,
}

/// Builds steps for one query rooted at `root_view`
///
/// Hops start from the terminal step, which is the root until
/// [`set_terminal`](Self::set_terminal) moves it. Steps are returned, not
/// appended; pass them to [`QueryBuilder::extend`].
pub struct QueryStepFactory<'a> {
    catalog: &'a ViewCatalog,
    root_view: ViewId,
    root_properties: Option<Vec<String>>,
    hop_limit: RetrieveLimit,
    terminal: Option<Terminal>,
    built: HashMap<String, Terminal>,
}

impl<'a> QueryStepFactory<'a> {
    pub fn new(catalog: &'a ViewCatalog, root_view: ViewId) -> Self {
        Self {
            catalog,
            root_view,
            root_properties: None,
            hop_limit: RetrieveLimit::Unbounded,
            terminal: None,
            built: HashMap::new(),
        }
    }

    /// Project only these root properties (direct relations are always added)
    pub fn with_properties(mut self, properties: Vec<String>) -> Self {
        self.root_properties = Some(properties);
        self
    }

    /// Row limit applied to every hop step
    pub fn with_hop_limit(mut self, limit: RetrieveLimit) -> Self {
        self.hop_limit = limit;
        self
    }

    pub fn terminal(&self) -> Option<&str> {
        self.terminal.as_ref().map(|t| t.name.as_str())
    }

    /// Make a previously built step the source of subsequent hops
    pub fn set_terminal(&mut self, name: &str) -> QueryResult<()> {
        let terminal = self.built.get(name).cloned().ok_or_else(|| {
            QueryError::BuilderState(format!("no step named '{}' was built by this factory", name))
        })?;
        self.terminal = Some(terminal);
        Ok(())
    }

    pub fn root(
        &mut self,
        builder: &mut QueryBuilder,
        filter: Option<Predicate>,
        sort: Vec<SortSpec>,
        limit: RetrieveLimit,
        has_container_fields: bool,
    ) -> QueryResult<QueryStep> {
        if let Some(existing) = &self.terminal {
            return Err(QueryError::BuilderState(format!(
                "root step already built (terminal is '{}')",
                existing.name
            )));
        }
        let catalog = self.catalog;
        let view = catalog.require(&self.root_view)?;
        let select = select_for(view, self.root_properties.as_deref(), has_container_fields)?;
        for spec in &sort {
            require_property(view, &spec.property)?;
        }

        let name = builder.create_name(&view.id.external_id);
        let step = QueryStep::node(name, StepExpression::Root { filter, sort }, select)
            .with_limit(limit);
        self.record(&step, Some(view.id.clone()), true);
        Ok(step)
    }

    /// One step fetching the nodes `via` points at on each terminal row
    pub fn from_direct_relation(
        &mut self,
        builder: &mut QueryBuilder,
        target_view: &ViewId,
        via: &str,
        has_container_fields: bool,
    ) -> QueryResult<Vec<QueryStep>> {
        let (terminal, source_view, property) = self.relation(via)?;
        let PropertyKind::DirectRelation { target, list } = &property.kind else {
            return Err(not_a(source_view, property, "direct relation"));
        };
        if let Some(declared) = target {
            if declared != target_view {
                return Err(QueryError::BuilderState(format!(
                    "'{}' on {} points at {}, not {}",
                    via, source_view.id, declared, target_view
                )));
            }
        }
        let view = self.catalog.require(target_view)?;

        let name = builder.create_name(&format!("{}_{}", terminal.name, via));
        let step = QueryStep::node(
            name,
            StepExpression::DirectRelationHop {
                source: terminal.name,
                via: via.to_string(),
                list: *list,
                filter: None,
            },
            select_for(view, None, has_container_fields)?,
        )
        .with_limit(self.hop_limit)
        .with_connection(via);
        self.record(&step, Some(view.id.clone()), false);
        Ok(vec![step])
    }

    /// One step fetching the nodes whose relation `through` points back at
    /// each terminal row
    pub fn from_reverse_direct_relation(
        &mut self,
        builder: &mut QueryBuilder,
        via: &str,
        has_container_fields: bool,
    ) -> QueryResult<Vec<QueryStep>> {
        let (terminal, source_view, property) = self.relation(via)?;
        let PropertyKind::ReverseDirectRelation { through } = &property.kind else {
            return Err(not_a(source_view, property, "reverse direct relation"));
        };
        let view = self.catalog.require(&through.view)?;
        let back = require_property(view, &through.property)?;
        if !matches!(back.kind, PropertyKind::DirectRelation { .. }) {
            return Err(not_a(view, back, "direct relation"));
        }

        let name = builder.create_name(&format!("{}_{}", terminal.name, via));
        let step = QueryStep::node(
            name,
            StepExpression::ReverseRelationHop {
                source: terminal.name,
                through: through.clone(),
                filter: None,
            },
            select_for(view, None, has_container_fields)?,
        )
        .with_limit(self.hop_limit)
        .with_connection(via);
        self.record(&step, Some(view.id.clone()), false);
        Ok(vec![step])
    }

    /// An edge step for the edge property `via`, plus a far-end node step
    /// when `expansion` asks for one
    pub fn from_edges(
        &mut self,
        builder: &mut QueryBuilder,
        via: &str,
        edge_filter: Option<Predicate>,
        direction: Direction,
        expansion: Expansion,
    ) -> QueryResult<Vec<QueryStep>> {
        let (terminal, source_view, property) = self.relation(via)?;
        let PropertyKind::EdgeConnection {
            edge_type,
            direction: declared,
            target,
        } = &property.kind
        else {
            return Err(not_a(source_view, property, "edge connection"));
        };
        if *declared != direction {
            return Err(QueryError::BuilderState(format!(
                "'{}' on {} is declared {:?}, cannot traverse it {:?}",
                via, source_view.id, declared, direction
            )));
        }

        let mut filter = EdgeTypeFilter::new(edge_type.clone());
        filter.filter = edge_filter;
        let edge_name = builder.create_name(&format!("{}_{}", terminal.name, via));
        let edges = QueryStep::edge(
            edge_name.clone(),
            StepExpression::EdgeTraversalHop {
                source: terminal.name,
                edge_filter: filter,
                direction,
            },
        )
        .with_limit(self.hop_limit)
        .with_connection(via);

        let Expansion::WithEndpoints {
            has_container_fields,
        } = expansion
        else {
            self.record(&edges, None, false);
            return Ok(vec![edges]);
        };

        let target = target.as_ref().ok_or_else(|| {
            QueryError::BuilderState(format!(
                "'{}' on {} declares no target view to expand edges into",
                via, source_view.id
            ))
        })?;
        let view = self.catalog.require(target)?;
        let endpoint_name = builder.create_name(&format!("{}_{}", edge_name, view.id.external_id));
        let endpoints = QueryStep::node(
            endpoint_name,
            StepExpression::EdgeEndpoints {
                source: edge_name,
                direction,
                filter: None,
            },
            select_for(view, None, has_container_fields)?,
        )
        .with_limit(self.hop_limit)
        .with_connection(far_end_key(direction));

        self.record(&edges, None, false);
        self.record(&endpoints, Some(view.id.clone()), false);
        Ok(vec![edges, endpoints])
    }

    /// Terminal node step and the relation property `via` on its view
    fn relation(&self, via: &str) -> QueryResult<(Terminal, &'a ViewDefinition, &'a ViewProperty)> {
        let terminal = self.terminal.clone().ok_or_else(|| {
            QueryError::BuilderState(format!("cannot hop through '{}' before a root step exists", via))
        })?;
        let view_id = match (&terminal.view, terminal.kind) {
            (Some(view), ResultKind::Node) => view.clone(),
            _ => {
                return Err(QueryError::BuilderState(format!(
                    "terminal step '{}' yields edges; hop from a node step",
                    terminal.name
                )))
            }
        };
        let catalog = self.catalog;
        let view = catalog.require(&view_id)?;
        let property = require_property(view, via)?;
        Ok((terminal, view, property))
    }

    fn record(&mut self, step: &QueryStep, view: Option<ViewId>, make_terminal: bool) {
        let terminal = Terminal {
            name: step.name.clone(),
            view,
            kind: step.result_kind,
        };
        if make_terminal {
            self.terminal = Some(terminal.clone());
        }
        self.built.insert(step.name.clone(), terminal);
    }
}

fn require_property<'v>(view: &'v ViewDefinition, name: &str) -> QueryResult<&'v ViewProperty> {
    view.property(name).ok_or_else(|| QueryError::UnknownProperty {
        view: view.id.to_string(),
        property: name.to_string(),
    })
}

fn not_a(view: &ViewDefinition, property: &ViewProperty, expected: &'static str) -> QueryError {
    QueryError::NotARelation {
        view: view.id.to_string(),
        property: property.name.clone(),
        expected,
    }
}

/// Projection for a node step; direct relations are always selected so
/// hops and unpacking can resolve them
fn select_for(
    view: &ViewDefinition,
    properties: Option<&[String]>,
    has_container_fields: bool,
) -> QueryResult<Select> {
    let properties = match properties {
        None => view.stored_properties(),
        Some(requested) => {
            let mut stored = Vec::with_capacity(requested.len());
            for name in requested {
                if require_property(view, name)?.kind.is_stored() {
                    stored.push(name.clone());
                }
            }
            stored
        }
    };
    Ok(Select::new(view.id.clone(), properties, has_container_fields)
        .with_relations(view.direct_relations()))
}
