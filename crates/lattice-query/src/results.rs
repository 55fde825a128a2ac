//! Raw per-step result tables

use std::collections::{HashMap, HashSet};

use lattice_core::{EdgeRow, InstanceId, NodeRow};
use serde::Serialize;

use crate::error::{QueryError, QueryResult};
use crate::step::{QueryStep, ResultKind, StepExpression};
use crate::unpack::{QueryUnpacker, UnpackEdges};

/// Rows fetched for one step, in service order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepRows {
    Nodes(Vec<NodeRow>),
    Edges(Vec<EdgeRow>),
}

impl StepRows {
    pub fn kind(&self) -> ResultKind {
        match self {
            StepRows::Nodes(_) => ResultKind::Node,
            StepRows::Edges(_) => ResultKind::Edge,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StepRows::Nodes(rows) => rows.len(),
            StepRows::Edges(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> &[NodeRow] {
        match self {
            StepRows::Nodes(rows) => rows,
            StepRows::Edges(_) => &[],
        }
    }

    pub fn edges(&self) -> &[EdgeRow] {
        match self {
            StepRows::Edges(rows) => rows,
            StepRows::Nodes(_) => &[],
        }
    }

    /// Identifier of the row at `index`
    pub fn id(&self, index: usize) -> Option<&InstanceId> {
        match self {
            StepRows::Nodes(rows) => rows.get(index).map(|r| &r.id),
            StepRows::Edges(rows) => rows.get(index).map(|r| &r.id),
        }
    }

    fn retain_indices(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        match self {
            StepRows::Nodes(rows) => rows.retain(|_| flags.next().copied().unwrap_or(true)),
            StepRows::Edges(rows) => rows.retain(|_| flags.next().copied().unwrap_or(true)),
        }
    }
}

/// Pagination bookkeeping for one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepStats {
    /// Service calls issued
    pub calls: usize,
    /// Rows received across all calls
    pub received: usize,
    /// The service reported no further rows
    pub exhausted: bool,
    /// No source identifiers, so no call was made
    pub skipped: bool,
    /// Rows removed because they were not connected to a parent row
    pub pruned: usize,
}

/// Rows and bookkeeping for one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTable {
    pub name: String,
    pub rows: StepRows,
    pub stats: StepStats,
}

impl StepTable {
    pub fn new(name: impl Into<String>, rows: StepRows, stats: StepStats) -> Self {
        Self {
            name: name.into(),
            rows,
            stats,
        }
    }
}

/// Everything one execute call produced
#[derive(Debug, Clone)]
pub struct QueryResults {
    steps: Vec<QueryStep>,
    parents: Vec<Option<usize>>,
    tables: Vec<StepTable>,
    remove_not_connected: bool,
}

impl QueryResults {
    /// Assemble results from a plan and one table per step, in plan order
    pub fn new(
        steps: Vec<QueryStep>,
        tables: Vec<StepTable>,
        remove_not_connected: bool,
    ) -> QueryResult<Self> {
        if steps.len() != tables.len() {
            return Err(QueryError::BuilderState(format!(
                "{} steps but {} result tables",
                steps.len(),
                tables.len()
            )));
        }
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut parents = Vec::with_capacity(steps.len());
        for (index, (step, table)) in steps.iter().zip(&tables).enumerate() {
            if step.name != table.name {
                return Err(QueryError::BuilderState(format!(
                    "table '{}' does not match step '{}'",
                    table.name, step.name
                )));
            }
            if step.result_kind != table.rows.kind() {
                return Err(QueryError::BuilderState(format!(
                    "step '{}' yields {:?} rows but its table holds {:?} rows",
                    step.name,
                    step.result_kind,
                    table.rows.kind()
                )));
            }
            let parent = match step.source() {
                None => None,
                Some(source) => Some(*positions.get(source).ok_or_else(|| {
                    QueryError::DanglingReference {
                        step: step.name.clone(),
                        parent: source.to_string(),
                    }
                })?),
            };
            parents.push(parent);
            positions.insert(step.name.as_str(), index);
        }
        Ok(Self {
            steps,
            parents,
            tables,
            remove_not_connected,
        })
    }

    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    pub fn tables(&self) -> &[StepTable] {
        &self.tables
    }

    pub fn remove_not_connected(&self) -> bool {
        self.remove_not_connected
    }

    pub(crate) fn parent_of(&self, index: usize) -> Option<usize> {
        self.parents.get(index).copied().flatten()
    }

    /// Direct children of step `index`, in plan order
    pub(crate) fn children_of(&self, index: usize) -> Vec<usize> {
        (0..self.steps.len())
            .filter(|&i| self.parents[i] == Some(index))
            .collect()
    }

    pub(crate) fn depth_of(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = index;
        while let Some(parent) = self.parent_of(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&StepTable> {
        self.position(name).map(|i| &self.tables[i])
    }

    /// Node rows of step `name` (empty for unknown or edge steps)
    pub fn nodes(&self, name: &str) -> &[NodeRow] {
        self.table(name).map(|t| t.rows.nodes()).unwrap_or(&[])
    }

    pub fn edges(&self, name: &str) -> &[EdgeRow] {
        self.table(name).map(|t| t.rows.edges()).unwrap_or(&[])
    }

    pub fn stats(&self) -> impl Iterator<Item = (&str, &StepStats)> {
        self.tables.iter().map(|t| (t.name.as_str(), &t.stats))
    }

    pub fn total_calls(&self) -> usize {
        self.tables.iter().map(|t| t.stats.calls).sum()
    }

    pub fn unpacker(&self) -> QueryUnpacker<'_> {
        QueryUnpacker::new(self)
    }

    pub fn unpack(&self, edges: UnpackEdges) -> QueryResult<Vec<lattice_core::RawMapping>> {
        self.unpacker().unpack(edges)
    }

    /// Which rows of every step are reachable from the root
    ///
    /// Steps deeper than `max_depth` are kept whole and not checked. An
    /// unreachable row is dropped when `drop_orphans` is set and reported as
    /// `DanglingRow` otherwise.
    pub(crate) fn connected_rows(
        &self,
        max_depth: Option<usize>,
        drop_orphans: bool,
    ) -> QueryResult<Vec<Vec<bool>>> {
        let mut keep: Vec<Vec<bool>> = self
            .tables
            .iter()
            .map(|t| vec![true; t.rows.len()])
            .collect();

        for index in 0..self.steps.len() {
            let Some(parent) = self.parent_of(index) else {
                continue;
            };
            if max_depth.is_some_and(|max| self.depth_of(index) > max) {
                continue;
            }
            let step = &self.steps[index];
            let parent_keys = parent_keys(&step.expression, &self.tables[parent].rows, &keep[parent]);

            let rows = &self.tables[index].rows;
            for row in 0..rows.len() {
                let connected = child_keys(&step.expression, rows, row)
                    .iter()
                    .any(|key| parent_keys.contains(key));
                if connected {
                    continue;
                }
                let id = rows.id(row).cloned().unwrap_or_else(|| InstanceId::new("", ""));
                if !drop_orphans {
                    return Err(QueryError::DanglingRow {
                        step: step.name.clone(),
                        row: id,
                        parent: self.steps[parent].name.clone(),
                    });
                }
                tracing::warn!(
                    "Dropping row {} in step '{}': no connected row in '{}'",
                    id,
                    step.name,
                    self.steps[parent].name
                );
                keep[index][row] = false;
            }
        }
        Ok(keep)
    }

    /// Remove every row not reachable from the root; returns rows removed
    pub(crate) fn prune_not_connected(&mut self) -> QueryResult<usize> {
        let keep = self.connected_rows(None, true)?;
        let mut removed = 0;
        for (table, flags) in self.tables.iter_mut().zip(keep) {
            let dropped = flags.iter().filter(|k| !**k).count();
            if dropped > 0 {
                table.rows.retain_indices(&flags);
                table.stats.pruned += dropped;
                removed += dropped;
            }
        }
        Ok(removed)
    }
}

/// Keys a parent step offers to its children, from kept parent rows
pub(crate) fn parent_keys(
    expression: &StepExpression,
    parent_rows: &StepRows,
    keep: &[bool],
) -> HashSet<InstanceId> {
    let kept = |i: &usize| keep.get(*i).copied().unwrap_or(true);
    match expression {
        StepExpression::Root { .. } => HashSet::new(),
        StepExpression::DirectRelationHop { via, .. } => parent_rows
            .nodes()
            .iter()
            .enumerate()
            .filter(|(i, _)| kept(i))
            .flat_map(|(_, row)| row.referenced_ids(via))
            .collect(),
        StepExpression::ReverseRelationHop { .. } | StepExpression::EdgeTraversalHop { .. } => {
            parent_rows
                .nodes()
                .iter()
                .enumerate()
                .filter(|(i, _)| kept(i))
                .map(|(_, row)| row.id.clone())
                .collect()
        }
        StepExpression::EdgeEndpoints { direction, .. } => parent_rows
            .edges()
            .iter()
            .enumerate()
            .filter(|(i, _)| kept(i))
            .map(|(_, edge)| edge.far_end(*direction).clone())
            .collect(),
    }
}

/// Keys a child row matches against its parent's keys
pub(crate) fn child_keys(
    expression: &StepExpression,
    rows: &StepRows,
    index: usize,
) -> Vec<InstanceId> {
    match expression {
        StepExpression::Root { .. } => Vec::new(),
        StepExpression::DirectRelationHop { .. } | StepExpression::EdgeEndpoints { .. } => {
            rows.id(index).cloned().into_iter().collect()
        }
        StepExpression::ReverseRelationHop { through, .. } => rows
            .nodes()
            .get(index)
            .map(|row| row.referenced_ids(&through.property))
            .unwrap_or_default(),
        StepExpression::EdgeTraversalHop { direction, .. } => rows
            .edges()
            .get(index)
            .map(|edge| vec![edge.near_end(*direction).clone()])
            .unwrap_or_default(),
    }
}
