//! Service client trait definitions

use crate::error::ServiceResult;
use async_trait::async_trait;
use lattice_core::{Direction, EdgeRow, InstanceId, NodeRow, Predicate, SortSpec, ViewId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a node projection reads its properties from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionSource {
    /// The view maps scalar properties onto containers
    #[default]
    Container,
    /// The view is a projection without container-backed fields
    View,
}

impl ProjectionSource {
    pub fn from_container_fields(has_container_fields: bool) -> Self {
        if has_container_fields {
            ProjectionSource::Container
        } else {
            ProjectionSource::View
        }
    }
}

/// One page request for nodes of a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    pub view: ViewId,
    /// Properties to project (empty = every stored property)
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub source: ProjectionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub limit: usize,
}

impl NodeRequest {
    pub fn new(view: ViewId, limit: usize) -> Self {
        Self {
            view,
            properties: Vec::new(),
            source: ProjectionSource::default(),
            filter: None,
            sort: Vec::new(),
            cursor: None,
            limit,
        }
    }
}

/// Which edges an edge request matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTypeFilter {
    pub edge_type: InstanceId,
    /// Extra predicate over the edge's own properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
}

impl EdgeTypeFilter {
    pub fn new(edge_type: InstanceId) -> Self {
        Self {
            edge_type,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One page request for edges touching a set of nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRequest {
    pub edge_filter: EdgeTypeFilter,
    pub direction: Direction,
    /// Start nodes (outgoing) or end nodes (incoming) the edges must touch
    pub node_ids: Vec<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub limit: usize,
}

/// A page of rows plus the cursor for the next page, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub rows: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(rows: Vec<T>) -> Self {
        Self {
            rows,
            next_cursor: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// The remote data-modeling service
///
/// Implementations are shared across queries, so every method takes `&self`.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Fetch one page of nodes
    async fn fetch_nodes(&self, request: &NodeRequest) -> ServiceResult<Page<NodeRow>>;

    /// Fetch one page of edges
    async fn fetch_edges(&self, request: &EdgeRequest) -> ServiceResult<Page<EdgeRow>>;
}

#[async_trait]
impl<T: ServiceClient + ?Sized> ServiceClient for Arc<T> {
    async fn fetch_nodes(&self, request: &NodeRequest) -> ServiceResult<Page<NodeRow>> {
        (**self).fetch_nodes(request).await
    }

    async fn fetch_edges(&self, request: &EdgeRequest) -> ServiceResult<Page<EdgeRow>> {
        (**self).fetch_edges(request).await
    }
}
