//! Plan execution: paginated fetches in parent-before-child order

use std::collections::HashSet;
use std::future::Future;

use futures::future::try_join_all;
use lattice_client::{EdgeRequest, NodeRequest, Page, ServiceClient, ServiceError, ServiceResult};
use lattice_core::{InstanceId, NodeRow, Predicate};

use crate::config::EngineConfig;
use crate::error::{QueryError, QueryResult};
use crate::results::{StepRows, StepStats, StepTable};
use crate::step::{QueryStep, Select, StepExpression};

/// Drives the service calls for one plan
///
/// Steps are resolved level by level: every step at depth `d` only reads
/// tables of depth `d - 1`, so a whole level can be fetched before the next
/// one starts. Tables are returned only when every step succeeded.
pub(crate) struct Executor<'a, C: ServiceClient + ?Sized> {
    client: &'a C,
    config: &'a EngineConfig,
    steps: &'a [QueryStep],
    parents: &'a [Option<usize>],
}

impl<'a, C: ServiceClient + ?Sized> Executor<'a, C> {
    pub(crate) fn new(
        client: &'a C,
        config: &'a EngineConfig,
        steps: &'a [QueryStep],
        parents: &'a [Option<usize>],
    ) -> Self {
        Self {
            client,
            config,
            steps,
            parents,
        }
    }

    pub(crate) async fn run(&self) -> QueryResult<Vec<StepTable>> {
        let mut tables: Vec<Option<StepTable>> = vec![None; self.steps.len()];

        for level in self.levels() {
            tracing::debug!(
                "Resolving {} step(s): {:?}",
                level.len(),
                level.iter().map(|&i| &self.steps[i].name).collect::<Vec<_>>()
            );
            let resolved = if self.config.parallel_siblings && level.len() > 1 {
                try_join_all(level.iter().map(|&i| self.resolve(i, &tables))).await?
            } else {
                let mut resolved = Vec::with_capacity(level.len());
                for &i in &level {
                    resolved.push(self.resolve(i, &tables).await?);
                }
                resolved
            };
            for (&i, table) in level.iter().zip(resolved) {
                tables[i] = Some(table);
            }
        }

        tables
            .into_iter()
            .zip(self.steps)
            .map(|(table, step)| {
                table.ok_or_else(|| {
                    QueryError::BuilderState(format!("step '{}' was never resolved", step.name))
                })
            })
            .collect()
    }

    /// Step indices grouped by depth, plan order preserved inside a level
    fn levels(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.steps.len()];
        let mut levels: Vec<Vec<usize>> = Vec::new();
        for index in 0..self.steps.len() {
            if let Some(parent) = self.parents[index] {
                depth[index] = depth[parent] + 1;
            }
            let d = depth[index];
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(index);
        }
        levels
    }

    async fn resolve(&self, index: usize, tables: &[Option<StepTable>]) -> QueryResult<StepTable> {
        let step = &self.steps[index];
        let parent_rows = match self.parents[index] {
            Some(parent) => Some(&tables[parent].as_ref().ok_or_else(|| {
                QueryError::BuilderState(format!(
                    "step '{}' resolved before its parent",
                    step.name
                ))
            })?.rows),
            None => None,
        };

        let mut stats = StepStats::default();
        let rows = match (&step.expression, parent_rows) {
            (StepExpression::Root { filter, sort }, _) => {
                let select = require_select(step)?;
                let mut request = self.node_request(select);
                request.filter = filter.clone();
                request.sort = sort.clone();
                StepRows::Nodes(self.fetch_nodes(step, request, &mut stats).await?)
            }
            (StepExpression::DirectRelationHop { via, filter, .. }, Some(parent)) => {
                let ids = unique(parent.nodes().iter().flat_map(|row| row.referenced_ids(via)));
                let select = require_select(step)?;
                let make = |chunk: Vec<InstanceId>| {
                    let mut request = self.node_request(select);
                    request.filter = Some(Predicate::and_optional(filter.as_ref(), Predicate::id_in(chunk)));
                    request
                };
                StepRows::Nodes(self.fetch_node_chunks(step, ids, make, &mut stats).await?)
            }
            (StepExpression::ReverseRelationHop { through, filter, .. }, Some(parent)) => {
                let ids = unique(parent.nodes().iter().map(|row| row.id.clone()));
                let select = require_select(step)?;
                let make = |chunk: Vec<InstanceId>| {
                    let mut request = self.node_request(select);
                    request.filter = Some(Predicate::and_optional(
                        filter.as_ref(),
                        Predicate::references(through.property.clone(), chunk),
                    ));
                    request
                };
                StepRows::Nodes(self.fetch_node_chunks(step, ids, make, &mut stats).await?)
            }
            (StepExpression::EdgeEndpoints { direction, filter, .. }, Some(parent)) => {
                let ids = unique(parent.edges().iter().map(|edge| edge.far_end(*direction).clone()));
                let select = require_select(step)?;
                let make = |chunk: Vec<InstanceId>| {
                    let mut request = self.node_request(select);
                    request.filter = Some(Predicate::and_optional(filter.as_ref(), Predicate::id_in(chunk)));
                    request
                };
                StepRows::Nodes(self.fetch_node_chunks(step, ids, make, &mut stats).await?)
            }
            (
                StepExpression::EdgeTraversalHop {
                    edge_filter,
                    direction,
                    ..
                },
                Some(parent),
            ) => {
                let ids = unique(parent.nodes().iter().map(|row| row.id.clone()));
                let mut edges = Vec::new();
                if ids.is_empty() {
                    stats.skipped = true;
                    stats.exhausted = true;
                }
                for chunk in ids.chunks(self.config.max_ids_per_request) {
                    if step.max_retrieve_limit.is_satisfied(stats.received) {
                        break;
                    }
                    let base = EdgeRequest {
                        edge_filter: edge_filter.clone(),
                        direction: *direction,
                        node_ids: chunk.to_vec(),
                        cursor: None,
                        limit: 0,
                    };
                    let fetch = |cursor: Option<String>, limit: usize| {
                        let mut request = base.clone();
                        request.cursor = cursor;
                        request.limit = limit;
                        async move { self.client.fetch_edges(&request).await }
                    };
                    edges.extend(self.paginate(step, &mut stats, fetch).await?);
                }
                StepRows::Edges(edges)
            }
            (_, None) => {
                return Err(QueryError::DanglingReference {
                    step: step.name.clone(),
                    parent: step.source().unwrap_or_default().to_string(),
                })
            }
        };

        tracing::debug!(
            "Step '{}' ({}): {} row(s) in {} call(s){}",
            step.name,
            step.expression.label(),
            rows.len(),
            stats.calls,
            if stats.skipped { ", skipped" } else { "" }
        );
        Ok(StepTable::new(step.name.clone(), rows, stats))
    }

    fn node_request(&self, select: &Select) -> NodeRequest {
        let mut request = NodeRequest::new(select.view.clone(), self.config.max_page_size);
        request.properties = select.properties.clone();
        request.source = select.source;
        request
    }

    async fn fetch_nodes(
        &self,
        step: &QueryStep,
        base: NodeRequest,
        stats: &mut StepStats,
    ) -> QueryResult<Vec<NodeRow>> {
        let fetch = |cursor: Option<String>, limit: usize| {
            let mut request = base.clone();
            request.cursor = cursor;
            request.limit = limit;
            async move { self.client.fetch_nodes(&request).await }
        };
        self.paginate(step, stats, fetch).await
    }

    /// Fetch nodes for a source-id set, one chunk of ids at a time
    async fn fetch_node_chunks<F>(
        &self,
        step: &QueryStep,
        ids: Vec<InstanceId>,
        make_request: F,
        stats: &mut StepStats,
    ) -> QueryResult<Vec<NodeRow>>
    where
        F: Fn(Vec<InstanceId>) -> NodeRequest,
    {
        if ids.is_empty() {
            stats.skipped = true;
            stats.exhausted = true;
            return Ok(Vec::new());
        }
        let mut rows = Vec::new();
        for chunk in ids.chunks(self.config.max_ids_per_request) {
            if step.max_retrieve_limit.is_satisfied(stats.received) {
                break;
            }
            let request = make_request(chunk.to_vec());
            rows.extend(self.fetch_nodes(step, request, stats).await?);
        }
        Ok(rows)
    }

    /// Page through one request until the step limit or the service runs out
    ///
    /// Each call asks for `min(max_page_size, remaining)` rows. A cursor seen
    /// twice within the same pagination run is a protocol error.
    async fn paginate<T, F, Fut>(
        &self,
        step: &QueryStep,
        stats: &mut StepStats,
        mut fetch: F,
    ) -> QueryResult<Vec<T>>
    where
        F: FnMut(Option<String>, usize) -> Fut,
        Fut: Future<Output = ServiceResult<Page<T>>>,
    {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        stats.exhausted = false;

        loop {
            let page_size = match step.max_retrieve_limit.remaining(stats.received) {
                Some(0) => break,
                Some(remaining) => remaining.min(self.config.max_page_size),
                None => self.config.max_page_size,
            };

            let page = fetch(cursor.take(), page_size)
                .await
                .map_err(|e| QueryError::execution(&step.name, e))?;
            stats.calls += 1;

            let mut page_rows = page.rows;
            if page_rows.len() > page_size {
                tracing::warn!(
                    "Step '{}': service returned {} rows for a page of {}",
                    step.name,
                    page_rows.len(),
                    page_size
                );
                page_rows.truncate(page_size);
            }
            stats.received += page_rows.len();
            rows.extend(page_rows);

            match page.next_cursor {
                None => {
                    stats.exhausted = true;
                    break;
                }
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(QueryError::execution(
                            &step.name,
                            ServiceError::Pagination(format!("cursor '{}' repeated", next)),
                        ));
                    }
                    cursor = Some(next);
                }
            }
        }
        Ok(rows)
    }
}

fn require_select(step: &QueryStep) -> QueryResult<&Select> {
    step.select.as_ref().ok_or_else(|| {
        QueryError::BuilderState(format!("node step '{}' has no projection", step.name))
    })
}

/// Deduplicate while keeping first-seen order
fn unique(ids: impl Iterator<Item = InstanceId>) -> Vec<InstanceId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}
