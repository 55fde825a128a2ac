//! Reassemble flat per-step tables into nested raw mappings

use std::collections::HashMap;
use std::str::FromStr;

use lattice_core::{Direction, EdgeRow, InstanceId, NodeRow, RawMapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::results::{child_keys, QueryResults};
use crate::step::{QueryStep, StepExpression};

/// How relation branches appear in unpacked mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnpackEdges {
    /// Omit relation properties; scalar fields only
    Skip,
    /// Attach `{space, externalId}` of each connected entity, one level deep
    #[default]
    Identifier,
    /// Attach full nested mappings, recursively
    Include,
}

impl FromStr for UnpackEdges {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(UnpackEdges::Skip),
            "identifier" => Ok(UnpackEdges::Identifier),
            "include" => Ok(UnpackEdges::Include),
            other => Err(QueryError::BuilderState(format!(
                "unknown unpack mode '{}' (expected skip, identifier or include)",
                other
            ))),
        }
    }
}

/// Turns [`QueryResults`] into one nested mapping per root row
///
/// Unpacking is a pure function of the result tables: calling it twice
/// yields equal output, and mappings shared by several parents are built
/// once and copied into each parent.
pub struct QueryUnpacker<'r> {
    results: &'r QueryResults,
}

impl<'r> QueryUnpacker<'r> {
    pub fn new(results: &'r QueryResults) -> Self {
        Self { results }
    }

    pub fn unpack(&self, edges: UnpackEdges) -> QueryResult<Vec<RawMapping>> {
        let steps = self.results.steps();
        let Some(root) = steps.first() else {
            return Ok(Vec::new());
        };
        if !root.is_root() {
            return Err(QueryError::BuilderState(format!(
                "first step '{}' is not a root step",
                root.name
            )));
        }

        let max_depth = match edges {
            UnpackEdges::Skip => Some(0),
            UnpackEdges::Identifier => Some(1),
            UnpackEdges::Include => None,
        };
        let keep = self
            .results
            .connected_rows(max_depth, self.results.remove_not_connected())?;

        let mut context = UnpackContext::new(self.results, keep, edges);
        let root_rows = self.results.tables()[0].rows.nodes().len();
        let mut output = Vec::with_capacity(root_rows);
        for row in 0..root_rows {
            if context.keep[0][row] {
                output.push(context.node_mapping(0, row, 0)?);
            }
        }
        tracing::debug!(
            "Unpacked {} root mapping(s) with edges={:?}, {} distinct sub-mapping(s) built",
            output.len(),
            edges,
            context.built.len()
        );
        Ok(output)
    }
}

/// State for one unpack call
///
/// `built` memoizes the mapping of every (step, row) already assembled so a
/// child reachable from several parents is built once and cloned.
struct UnpackContext<'r> {
    results: &'r QueryResults,
    keep: Vec<Vec<bool>>,
    /// Per step: parent-side key -> kept row indices, in row order
    indexes: Vec<HashMap<InstanceId, Vec<usize>>>,
    built: HashMap<(usize, usize), RawMapping>,
    mode: UnpackEdges,
}

impl<'r> UnpackContext<'r> {
    fn new(results: &'r QueryResults, keep: Vec<Vec<bool>>, mode: UnpackEdges) -> Self {
        let indexes = results
            .steps()
            .iter()
            .zip(results.tables())
            .enumerate()
            .map(|(step, (query_step, table))| {
                let mut index: HashMap<InstanceId, Vec<usize>> = HashMap::new();
                if !query_step.is_root() {
                    for row in 0..table.rows.len() {
                        if !keep[step][row] {
                            continue;
                        }
                        for key in child_keys(&query_step.expression, &table.rows, row) {
                            index.entry(key).or_default().push(row);
                        }
                    }
                }
                index
            })
            .collect();
        Self {
            results,
            keep,
            indexes,
            built: HashMap::new(),
            mode,
        }
    }

    fn lookup(&self, step: usize, key: &InstanceId) -> Vec<usize> {
        self.indexes[step].get(key).cloned().unwrap_or_default()
    }

    /// Whether children of a row at `depth` are expanded
    fn expands(&self, depth: usize) -> bool {
        match self.mode {
            UnpackEdges::Skip => false,
            UnpackEdges::Identifier => depth == 0,
            UnpackEdges::Include => true,
        }
    }

    fn node_row(&self, step: usize, row: usize) -> QueryResult<&'r NodeRow> {
        let results = self.results;
        results.tables()[step]
            .rows
            .nodes()
            .get(row)
            .ok_or_else(|| missing_row(&results.steps()[step], row))
    }

    fn edge_row(&self, step: usize, row: usize) -> QueryResult<&'r EdgeRow> {
        let results = self.results;
        results.tables()[step]
            .rows
            .edges()
            .get(row)
            .ok_or_else(|| missing_row(&results.steps()[step], row))
    }

    /// Mapping of one node row
    ///
    /// Relation properties are stripped from the raw row; a relation key
    /// only reappears when a child step attaches a value under it.
    fn node_mapping(&mut self, step: usize, row: usize, depth: usize) -> QueryResult<RawMapping> {
        if let Some(mapping) = self.built.get(&(step, row)) {
            return Ok(mapping.clone());
        }
        let results = self.results;
        let query_step = &results.steps()[step];
        let node = self.node_row(step, row)?;
        let mut mapping = node.to_mapping();

        if let Some(select) = &query_step.select {
            for relation in &select.relations {
                mapping.remove(relation);
            }
        }

        if self.expands(depth) {
            for child in results.children_of(step) {
                self.attach_children(&mut mapping, node, child, depth)?;
            }
        }

        self.built.insert((step, row), mapping.clone());
        Ok(mapping)
    }

    fn attach_children(
        &mut self,
        mapping: &mut RawMapping,
        node: &NodeRow,
        child: usize,
        depth: usize,
    ) -> QueryResult<()> {
        let results = self.results;
        let child_step = &results.steps()[child];
        let key = attach_key(child_step);

        match &child_step.expression {
            StepExpression::DirectRelationHop { via, list, .. } => {
                let is_list = *list || node.property(via).is_some_and(Value::is_array);
                let mut values = Vec::new();
                for target in node.referenced_ids(via) {
                    if let Some(&row) = self.lookup(child, &target).first() {
                        values.push(self.node_value(child, row, depth + 1)?);
                    }
                }
                if is_list {
                    mapping.insert(key, Value::Array(values));
                } else if let Some(value) = values.into_iter().next() {
                    mapping.insert(key, value);
                } else {
                    mapping.remove(&key);
                }
            }
            StepExpression::ReverseRelationHop { .. } => {
                let values = self
                    .lookup(child, &node.id)
                    .into_iter()
                    .map(|row| self.node_value(child, row, depth + 1))
                    .collect::<QueryResult<Vec<Value>>>()?;
                mapping.insert(key, Value::Array(values));
            }
            StepExpression::EdgeTraversalHop { direction, .. } => {
                let values = self
                    .lookup(child, &node.id)
                    .into_iter()
                    .map(|row| self.edge_value(child, row, *direction, depth + 1))
                    .collect::<QueryResult<Vec<Value>>>()?;
                mapping.insert(key, Value::Array(values));
            }
            StepExpression::Root { .. } | StepExpression::EdgeEndpoints { .. } => {}
        }
        Ok(())
    }

    fn node_value(&mut self, step: usize, row: usize, depth: usize) -> QueryResult<Value> {
        match self.mode {
            UnpackEdges::Include => Ok(Value::Object(self.node_mapping(step, row, depth)?)),
            _ => Ok(self.node_row(step, row)?.id.to_value()),
        }
    }

    fn edge_value(
        &mut self,
        step: usize,
        row: usize,
        direction: Direction,
        depth: usize,
    ) -> QueryResult<Value> {
        let results = self.results;
        let edge = self.edge_row(step, row)?;
        if self.mode != UnpackEdges::Include {
            return Ok(edge.far_end(direction).to_value());
        }
        if let Some(mapping) = self.built.get(&(step, row)) {
            return Ok(Value::Object(mapping.clone()));
        }

        let mut mapping = edge.to_mapping();
        let far_end = edge.far_end(direction);
        for endpoint in results.children_of(step) {
            let endpoint_step = &results.steps()[endpoint];
            if !matches!(endpoint_step.expression, StepExpression::EdgeEndpoints { .. }) {
                continue;
            }
            if let Some(&node_row) = self.lookup(endpoint, far_end).first() {
                let node = self.node_mapping(endpoint, node_row, depth + 1)?;
                mapping.insert(attach_key(endpoint_step), Value::Object(node));
            }
        }

        self.built.insert((step, row), mapping.clone());
        Ok(Value::Object(mapping))
    }
}

fn missing_row(step: &QueryStep, row: usize) -> QueryError {
    QueryError::BuilderState(format!(
        "step '{}' has no {:?} row at index {}",
        step.name, step.result_kind, row
    ))
}

/// Key under which a child step's rows attach to their parent's mapping
fn attach_key(step: &QueryStep) -> String {
    if let Some(property) = &step.connection_property {
        return property.clone();
    }
    match &step.expression {
        StepExpression::DirectRelationHop { via, .. } => via.clone(),
        StepExpression::EdgeEndpoints { direction, .. } => far_end_key(*direction).to_string(),
        _ => step.name.clone(),
    }
}

/// Edge mapping key holding the node an edge leads to
pub fn far_end_key(direction: Direction) -> &'static str {
    match direction {
        Direction::Outgoing => "endNode",
        Direction::Incoming => "startNode",
    }
}
