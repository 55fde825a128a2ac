//! In-memory data-modeling service
//!
//! Evaluates predicates, sorts and paginates over nodes and edges held in
//! memory. Every call is recorded so tests can assert on the requests the
//! query engine issued, and failures can be injected per call or per view.

use crate::error::{ServiceError, ServiceResult};
use crate::traits::{EdgeRequest, NodeRequest, Page, ServiceClient};
use async_trait::async_trait;
use lattice_core::limits::MAX_PAGE_SIZE;
use lattice_core::{EdgeRow, InstanceId, NodeRow, Predicate, RawMapping, SortDirection, SortSpec, ViewId};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::RwLock;

/// A request seen by the service
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Nodes(NodeRequest),
    Edges(EdgeRequest),
}

impl RecordedCall {
    pub fn limit(&self) -> usize {
        match self {
            RecordedCall::Nodes(r) => r.limit,
            RecordedCall::Edges(r) => r.limit,
        }
    }

    pub fn as_nodes(&self) -> Option<&NodeRequest> {
        match self {
            RecordedCall::Nodes(r) => Some(r),
            RecordedCall::Edges(_) => None,
        }
    }

    pub fn as_edges(&self) -> Option<&EdgeRequest> {
        match self {
            RecordedCall::Edges(r) => Some(r),
            RecordedCall::Nodes(_) => None,
        }
    }
}

/// When the service should fail instead of answering
#[derive(Debug, Clone, PartialEq)]
pub enum FailureRule {
    /// The n-th call overall (1-based)
    OnCall(usize),
    /// Every node request for this view
    OnView(ViewId),
    /// Every edge request
    OnEdges,
}

#[derive(Debug, Clone)]
struct StoredNode {
    view: ViewId,
    row: NodeRow,
}

/// In-memory service backend
///
/// Useful for testing and offline query runs.
pub struct MemoryService {
    nodes: RwLock<Vec<StoredNode>>,
    edges: RwLock<Vec<EdgeRow>>,
    calls: RwLock<Vec<RecordedCall>>,
    failures: RwLock<Vec<FailureRule>>,
    page_ceiling: usize,
}

fn lock_error(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Transport(format!("Lock error: {}", e))
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            edges: RwLock::new(Vec::new()),
            calls: RwLock::new(Vec::new()),
            failures: RwLock::new(Vec::new()),
            page_ceiling: MAX_PAGE_SIZE,
        }
    }

    /// Cap the rows returned per call regardless of the requested limit
    pub fn with_page_ceiling(mut self, ceiling: usize) -> Self {
        self.page_ceiling = ceiling.max(1);
        self
    }

    pub fn with_node(mut self, view: &ViewId, row: NodeRow) -> Self {
        let nodes = self.nodes.get_mut().unwrap_or_else(|e| e.into_inner());
        upsert_node(nodes, view, row);
        self
    }

    pub fn with_nodes(self, view: &ViewId, rows: impl IntoIterator<Item = NodeRow>) -> Self {
        rows.into_iter().fold(self, |service, row| service.with_node(view, row))
    }

    pub fn with_edge(mut self, edge: EdgeRow) -> Self {
        self.edges
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(edge);
        self
    }

    pub fn with_failure(mut self, rule: FailureRule) -> Self {
        self.failures
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(rule);
        self
    }

    /// Store a node under `view`, replacing an earlier row with the same id
    pub fn insert_node(&self, view: &ViewId, row: NodeRow) -> ServiceResult<()> {
        let mut nodes = self.nodes.write().map_err(lock_error)?;
        upsert_node(&mut nodes, view, row);
        Ok(())
    }

    pub fn insert_edge(&self, edge: EdgeRow) -> ServiceResult<()> {
        let mut edges = self.edges.write().map_err(lock_error)?;
        edges.retain(|e| e.id != edge.id);
        edges.push(edge);
        Ok(())
    }

    pub fn add_failure(&self, rule: FailureRule) -> ServiceResult<()> {
        self.failures.write().map_err(lock_error)?.push(rule);
        Ok(())
    }

    pub fn clear_failures(&self) -> ServiceResult<()> {
        self.failures.write().map_err(lock_error)?.clear();
        Ok(())
    }

    /// Every request received so far, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .read()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().map(|calls| calls.len()).unwrap_or_default()
    }

    pub fn node_calls_for(&self, view: &ViewId) -> Vec<NodeRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Nodes(request) if &request.view == view => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn edge_calls(&self) -> Vec<EdgeRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Edges(request) => Some(request),
                RecordedCall::Nodes(_) => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) -> ServiceResult<()> {
        self.calls.write().map_err(lock_error)?.clear();
        Ok(())
    }

    /// Record the call and apply failure rules
    fn admit(&self, call: RecordedCall) -> ServiceResult<()> {
        let number = {
            let mut calls = self.calls.write().map_err(lock_error)?;
            calls.push(call.clone());
            calls.len()
        };

        let failures = self.failures.read().map_err(lock_error)?;
        for rule in failures.iter() {
            let hit = match (rule, &call) {
                (FailureRule::OnCall(n), _) => *n == number,
                (FailureRule::OnView(view), RecordedCall::Nodes(request)) => &request.view == view,
                (FailureRule::OnEdges, RecordedCall::Edges(_)) => true,
                _ => false,
            };
            if hit {
                tracing::debug!("Injecting failure on call {}: {:?}", number, rule);
                return Err(ServiceError::Injected(format!("call {} matched {:?}", number, rule)));
            }
        }
        Ok(())
    }

    fn has_data(&self, nodes: &[StoredNode], id: &InstanceId, views: &[ViewId]) -> bool {
        views
            .iter()
            .all(|view| nodes.iter().any(|n| &n.view == view && &n.row.id == id))
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_node(nodes: &mut Vec<StoredNode>, view: &ViewId, row: NodeRow) {
    match nodes
        .iter_mut()
        .find(|n| &n.view == view && n.row.id == row.id)
    {
        Some(existing) => existing.row = row,
        None => nodes.push(StoredNode {
            view: view.clone(),
            row,
        }),
    }
}

/// Decode an offset cursor
fn parse_cursor(cursor: Option<&str>) -> ServiceResult<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .strip_prefix("offset:")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| ServiceError::rejected(400, format!("invalid cursor '{}'", raw))),
    }
}

/// Slice one page out of `rows`, returning the next cursor when rows remain
fn paginate<T>(rows: Vec<T>, offset: usize, take: usize) -> Page<T> {
    let total = rows.len();
    let page: Vec<T> = rows.into_iter().skip(offset).take(take).collect();
    let next = offset + page.len();
    Page {
        rows: page,
        next_cursor: (next < total).then(|| format!("offset:{}", next)),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn present(properties: &RawMapping, name: &str) -> Option<Value> {
    properties.get(name).filter(|v| !v.is_null()).cloned()
}

/// Evaluate `predicate` against one instance
fn evaluate(
    predicate: &Predicate,
    id: &InstanceId,
    properties: &RawMapping,
    has_data: &dyn Fn(&[ViewId]) -> bool,
) -> bool {
    match predicate {
        Predicate::And { all } => all.iter().all(|p| evaluate(p, id, properties, has_data)),
        Predicate::Or { any } => any.iter().any(|p| evaluate(p, id, properties, has_data)),
        Predicate::Not { inner } => !evaluate(inner, id, properties, has_data),
        Predicate::Equals { property, value } => properties.get(property) == Some(value),
        Predicate::In { property, values } => properties
            .get(property)
            .map(|v| values.contains(v))
            .unwrap_or(false),
        Predicate::Range {
            property,
            gt,
            gte,
            lt,
            lte,
        } => {
            let Some(value) = present(properties, property) else {
                return false;
            };
            let check = |bound: &Option<Value>, accept: &dyn Fn(Ordering) -> bool| match bound {
                None => true,
                Some(bound) => compare_values(&value, bound).map(accept).unwrap_or(false),
            };
            check(gt, &|o| o == Ordering::Greater)
                && check(gte, &|o| o != Ordering::Less)
                && check(lt, &|o| o == Ordering::Less)
                && check(lte, &|o| o != Ordering::Greater)
        }
        Predicate::Prefix { property, value } => properties
            .get(property)
            .and_then(Value::as_str)
            .map(|s| s.starts_with(value.as_str()))
            .unwrap_or(false),
        Predicate::Exists { property } => present(properties, property).is_some(),
        Predicate::HasData { views } => has_data(views),
        Predicate::IdIn { ids } => ids.contains(id),
        Predicate::References { property, targets } => {
            let referenced: Vec<InstanceId> = match properties.get(property) {
                Some(Value::Array(items)) => items.iter().filter_map(InstanceId::from_value).collect(),
                Some(value) => InstanceId::from_value(value).into_iter().collect(),
                None => Vec::new(),
            };
            referenced.iter().any(|r| targets.contains(r))
        }
    }
}

fn sort_rows(rows: &mut [NodeRow], sort: &[SortSpec]) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for spec in sort {
            let left = present(&a.properties, &spec.property);
            let right = present(&b.properties, &spec.property);
            let ordering = match (left, right) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) if spec.nulls_first => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) if spec.nulls_first => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(l), Some(r)) => {
                    let ordering = compare_values(&l, &r).unwrap_or(Ordering::Equal);
                    match spec.direction {
                        SortDirection::Ascending => ordering,
                        SortDirection::Descending => ordering.reverse(),
                    }
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(row: &NodeRow, properties: &[String]) -> NodeRow {
    if properties.is_empty() {
        return row.clone();
    }
    let mut projected = NodeRow::new(row.id.clone());
    projected.version = row.version;
    for name in properties {
        if let Some(value) = row.properties.get(name) {
            projected.properties.insert(name.clone(), value.clone());
        }
    }
    projected
}

#[async_trait]
impl ServiceClient for MemoryService {
    async fn fetch_nodes(&self, request: &NodeRequest) -> ServiceResult<Page<NodeRow>> {
        self.admit(RecordedCall::Nodes(request.clone()))?;
        if request.limit == 0 {
            return Err(ServiceError::rejected(400, "limit must be positive"));
        }
        let offset = parse_cursor(request.cursor.as_deref())?;

        let nodes = self.nodes.read().map_err(lock_error)?;
        let mut matched: Vec<NodeRow> = nodes
            .iter()
            .filter(|n| n.view == request.view)
            .filter(|n| match &request.filter {
                Some(filter) => {
                    let has_data = |views: &[ViewId]| self.has_data(&nodes, &n.row.id, views);
                    evaluate(filter, &n.row.id, &n.row.properties, &has_data)
                }
                None => true,
            })
            .map(|n| n.row.clone())
            .collect();
        sort_rows(&mut matched, &request.sort);

        let projected: Vec<NodeRow> = matched
            .iter()
            .map(|row| project(row, &request.properties))
            .collect();
        let page = paginate(projected, offset, request.limit.min(self.page_ceiling));

        tracing::debug!(
            "fetch_nodes view={} offset={} returned={} more={}",
            request.view,
            offset,
            page.rows.len(),
            page.next_cursor.is_some()
        );
        Ok(page)
    }

    async fn fetch_edges(&self, request: &EdgeRequest) -> ServiceResult<Page<EdgeRow>> {
        self.admit(RecordedCall::Edges(request.clone()))?;
        if request.limit == 0 {
            return Err(ServiceError::rejected(400, "limit must be positive"));
        }
        let offset = parse_cursor(request.cursor.as_deref())?;

        let wanted: HashSet<&InstanceId> = request.node_ids.iter().collect();
        let edges = self.edges.read().map_err(lock_error)?;
        let no_views = |_: &[ViewId]| false;

        let matched: Vec<EdgeRow> = edges
            .iter()
            .filter(|e| e.edge_type == request.edge_filter.edge_type)
            .filter(|e| wanted.is_empty() || wanted.contains(e.near_end(request.direction)))
            .filter(|e| match &request.edge_filter.filter {
                Some(filter) => evaluate(filter, &e.id, &e.properties, &no_views),
                None => true,
            })
            .cloned()
            .collect();
        let page = paginate(matched, offset, request.limit.min(self.page_ceiling));

        tracing::debug!(
            "fetch_edges type={} offset={} returned={} more={}",
            request.edge_filter.edge_type,
            offset,
            page.rows.len(),
            page.next_cursor.is_some()
        );
        Ok(page)
    }
}
