//! Ordered step chain, its validation, and the execute entry point

use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use lattice_client::ServiceClient;
use lattice_core::limits::validate_step_count;
use lattice_core::RawMapping;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::construct::{construct, Validation};
use crate::error::{QueryError, QueryResult};
use crate::executor::Executor;
use crate::naming::NameGenerator;
use crate::results::{QueryResults, StepTable};
use crate::step::QueryStep;
use crate::unpack::UnpackEdges;

/// A query plan: steps in parent-before-child order, root first
///
/// The builder owns its name generator, so names are unique within one
/// builder and deterministic for a given sequence of calls. Results of the
/// last successful execute are stored on the builder for unpacking.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    steps: Vec<QueryStep>,
    parents: Vec<Option<usize>>,
    index: HashMap<String, usize>,
    names: NameGenerator,
    config: EngineConfig,
    results: Option<QueryResults>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A step name not yet handed out by this builder, derived from `hint`
    pub fn create_name(&mut self, hint: &str) -> String {
        self.names.create(hint)
    }

    /// Add a step to the end of the chain, returning its position
    ///
    /// The step's source must already be in the chain and produce the row
    /// kind the step reads from.
    pub fn append(&mut self, step: QueryStep) -> QueryResult<usize> {
        if step.name.is_empty() {
            return Err(QueryError::BuilderState("step name cannot be empty".into()));
        }
        if self.index.contains_key(&step.name) {
            return Err(QueryError::BuilderState(format!(
                "step '{}' is already in the chain",
                step.name
            )));
        }
        validate_step_count(self.steps.len() + 1).map_err(lattice_core::Error::from)?;

        let parent = match step.source() {
            None => {
                if let Some(root) = self.root() {
                    return Err(QueryError::BuilderState(format!(
                        "step '{}' is a second root; '{}' is already the root",
                        step.name, root.name
                    )));
                }
                None
            }
            Some(source) => {
                let parent = *self.index.get(source).ok_or_else(|| QueryError::DanglingReference {
                    step: step.name.clone(),
                    parent: source.to_string(),
                })?;
                let expected = step.expression.source_kind();
                if expected != Some(self.steps[parent].result_kind) {
                    return Err(QueryError::BuilderState(format!(
                        "step '{}' ({}) cannot read from '{}', which yields {:?} rows",
                        step.name,
                        step.expression.label(),
                        source,
                        self.steps[parent].result_kind
                    )));
                }
                Some(parent)
            }
        };

        tracing::debug!(
            "Appending step '{}' ({}) under {:?}",
            step.name,
            step.expression.label(),
            step.source()
        );
        self.names.reserve(&step.name);
        self.index.insert(step.name.clone(), self.steps.len());
        self.parents.push(parent);
        self.steps.push(step);
        Ok(self.steps.len() - 1)
    }

    /// Append several steps; on error none of them are kept
    pub fn extend(&mut self, steps: impl IntoIterator<Item = QueryStep>) -> QueryResult<()> {
        let checkpoint = self.steps.len();
        for step in steps {
            if let Err(e) = self.append(step) {
                self.truncate(checkpoint);
                return Err(e);
            }
        }
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        for step in self.steps.drain(len..) {
            self.index.remove(&step.name);
        }
        self.parents.truncate(len);
    }

    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    pub fn get(&self, name: &str) -> Option<&QueryStep> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn root(&self) -> Option<&QueryStep> {
        self.steps.first().filter(|s| s.is_root())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the plan against `client` and store the result tables
    ///
    /// All-or-nothing: on any error the builder holds no results, including
    /// results of an earlier execute.
    pub async fn execute<C>(
        &mut self,
        client: &C,
        remove_not_connected: bool,
    ) -> QueryResult<&QueryResults>
    where
        C: ServiceClient + ?Sized,
    {
        self.results = None;
        self.check_plan()?;
        let started = Instant::now();
        let tables = self.run_tables(client, started).await?;
        self.finish(tables, remove_not_connected, started)
    }

    /// Execute with the orphan policy from the builder's config
    pub async fn execute_default<C>(&mut self, client: &C) -> QueryResult<&QueryResults>
    where
        C: ServiceClient + ?Sized,
    {
        let remove_not_connected = self.config.remove_not_connected;
        self.execute(client, remove_not_connected).await
    }

    /// Execute, abandoning the run as soon as `signal` completes
    ///
    /// In-flight calls are dropped and no tables are stored on cancellation.
    pub async fn execute_with_cancel<C, S>(
        &mut self,
        client: &C,
        remove_not_connected: bool,
        signal: S,
    ) -> QueryResult<&QueryResults>
    where
        C: ServiceClient + ?Sized,
        S: Future<Output = ()>,
    {
        self.results = None;
        self.check_plan()?;
        let started = Instant::now();
        let tables = tokio::select! {
            biased;
            _ = signal => {
                tracing::info!("Query cancelled after {:?}", started.elapsed());
                return Err(QueryError::Cancelled);
            }
            result = self.run_tables(client, started) => result?,
        };
        self.finish(tables, remove_not_connected, started)
    }

    fn check_plan(&self) -> QueryResult<()> {
        self.config.validate()?;
        match self.steps.first() {
            None => Err(QueryError::BuilderState("query has no steps".into())),
            Some(first) if !first.is_root() => Err(QueryError::BuilderState(format!(
                "first step '{}' is not a root step",
                first.name
            ))),
            Some(_) => Ok(()),
        }
    }

    async fn run_tables<C>(&self, client: &C, started: Instant) -> QueryResult<Vec<StepTable>>
    where
        C: ServiceClient + ?Sized,
    {
        let executor = Executor::new(client, &self.config, &self.steps, &self.parents);
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, executor.run())
                .await
                .map_err(|_| {
                    tracing::warn!("Query timed out after {:?}", limit);
                    QueryError::Timeout {
                        elapsed: started.elapsed(),
                    }
                })?,
            None => executor.run().await,
        }
    }

    fn finish(
        &mut self,
        tables: Vec<StepTable>,
        remove_not_connected: bool,
        started: Instant,
    ) -> QueryResult<&QueryResults> {
        let mut results = QueryResults::new(self.steps.clone(), tables, remove_not_connected)?;
        let pruned = if remove_not_connected {
            results.prune_not_connected()?
        } else {
            0
        };
        tracing::info!(
            "Executed {} step(s) with {} call(s) in {:?}, {} row(s) pruned",
            self.steps.len(),
            results.total_calls(),
            started.elapsed(),
            pruned
        );
        let stored: &QueryResults = self.results.insert(results);
        Ok(stored)
    }

    pub fn results(&self) -> Option<&QueryResults> {
        self.results.as_ref()
    }

    pub fn take_results(&mut self) -> Option<QueryResults> {
        self.results.take()
    }

    /// Nested raw mappings, one per root row
    pub fn unpack(&self, edges: UnpackEdges) -> QueryResult<Vec<RawMapping>> {
        self.results
            .as_ref()
            .ok_or(QueryError::NotExecuted)?
            .unpack(edges)
    }

    /// Unpack and convert every mapping into `T`
    pub fn unpack_into<T: DeserializeOwned>(
        &self,
        edges: UnpackEdges,
        validation: Validation,
    ) -> QueryResult<Vec<T>> {
        construct(self.unpack(edges)?, validation)
    }

    /// The step chain as JSON, parents by name
    pub fn describe(&self) -> QueryResult<Value> {
        let steps = self
            .steps
            .iter()
            .zip(&self.parents)
            .map(|(step, parent)| -> QueryResult<Value> {
                Ok(json!({
                    "name": step.name,
                    "parent": parent.map(|p| self.steps[p].name.clone()),
                    "kind": step.expression.label(),
                    "step": serde_json::to_value(step)?,
                }))
            })
            .collect::<QueryResult<Vec<Value>>>()?;
        Ok(json!({ "steps": steps, "config": serde_json::to_value(&self.config)? }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{RetrieveLimit, Select, StepExpression};
    use async_trait::async_trait;
    use lattice_client::{
        EdgeRequest, EdgeTypeFilter, FailureRule, MemoryService, NodeRequest, Page, ServiceError,
        ServiceResult,
    };
    use lattice_core::{Direction, EdgeRow, InstanceId, NodeRow, ViewId};
    use serde::Deserialize;
    use std::time::Duration;

    fn id(xid: &str) -> InstanceId {
        InstanceId::new("s", xid)
    }

    fn well_view() -> ViewId {
        ViewId::new("core", "Well", "v1")
    }

    fn operator_view() -> ViewId {
        ViewId::new("core", "Operator", "v1")
    }

    fn document_view() -> ViewId {
        ViewId::new("core", "Document", "v1")
    }

    fn root_step(limit: RetrieveLimit) -> QueryStep {
        QueryStep::node(
            "well",
            StepExpression::Root {
                filter: None,
                sort: vec![],
            },
            Select::new(well_view(), vec!["name".into()], true)
                .with_relations(vec!["operator".into()]),
        )
        .with_limit(limit)
    }

    fn operator_step() -> QueryStep {
        QueryStep::node(
            "well_operator",
            StepExpression::DirectRelationHop {
                source: "well".into(),
                via: "operator".into(),
                list: false,
                filter: None,
            },
            Select::new(operator_view(), vec!["name".into()], true),
        )
        .with_connection("operator")
    }

    fn documents_step() -> QueryStep {
        QueryStep::edge(
            "well_documents",
            StepExpression::EdgeTraversalHop {
                source: "well".into(),
                edge_filter: EdgeTypeFilter::new(id("Well.documents")),
                direction: Direction::Outgoing,
            },
        )
        .with_connection("documents")
    }

    fn wells_service() -> MemoryService {
        MemoryService::new()
            .with_node(
                &well_view(),
                NodeRow::new(id("well-1"))
                    .with_property("name", "Alpha")
                    .with_relation("operator", &id("op-1")),
            )
            .with_node(
                &well_view(),
                NodeRow::new(id("well-2"))
                    .with_property("name", "Bravo")
                    .with_relation("operator", &id("op-2")),
            )
            .with_node(&well_view(), NodeRow::new(id("well-3")).with_property("name", "Charlie"))
            .with_node(&operator_view(), NodeRow::new(id("op-1")).with_property("name", "Acme"))
            .with_node(&operator_view(), NodeRow::new(id("op-2")).with_property("name", "Borealis"))
            .with_node(&operator_view(), NodeRow::new(id("op-3")).with_property("name", "Unused"))
            .with_edge(EdgeRow::new(id("e1"), id("Well.documents"), id("well-1"), id("doc-1")))
            .with_edge(EdgeRow::new(id("e2"), id("Well.documents"), id("well-1"), id("doc-2")))
            .with_edge(EdgeRow::new(id("e3"), id("Well.documents"), id("well-9"), id("doc-3")))
    }

    fn plan(steps: Vec<QueryStep>) -> QueryBuilder {
        let mut builder = QueryBuilder::new();
        builder.extend(steps).unwrap();
        builder
    }

    #[test]
    fn test_create_name_never_collides_with_steps() {
        let mut builder = QueryBuilder::new();
        builder.append(root_step(RetrieveLimit::Unbounded)).unwrap();
        let name = builder.create_name("well");
        assert_ne!(name, "well");
        assert!(builder.get(&name).is_none());
        assert_ne!(builder.create_name("well"), name);
    }

    #[test]
    fn test_append_rejects_dangling_parent() {
        let mut builder = QueryBuilder::new();
        let err = builder.append(operator_step()).unwrap_err();
        assert!(matches!(err, QueryError::DanglingReference { ref parent, .. } if parent == "well"));
        assert!(err.is_build_error());
        assert!(builder.is_empty());
    }

    #[test]
    fn test_append_rejects_second_root_and_duplicates() {
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let mut second = root_step(RetrieveLimit::Unbounded);
        second.name = "other".into();
        assert!(matches!(builder.append(second), Err(QueryError::BuilderState(_))));
        assert!(matches!(
            builder.append(root_step(RetrieveLimit::Unbounded)),
            Err(QueryError::BuilderState(_))
        ));
    }

    #[test]
    fn test_append_rejects_endpoints_under_node_step() {
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let endpoints = QueryStep::node(
            "docs",
            StepExpression::EdgeEndpoints {
                source: "well".into(),
                direction: Direction::Outgoing,
                filter: None,
            },
            Select::new(document_view(), vec![], true),
        );
        assert!(matches!(builder.append(endpoints), Err(QueryError::BuilderState(_))));
    }

    #[test]
    fn test_extend_is_all_or_nothing() {
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let mut orphan = documents_step();
        orphan.name = "orphan".into();
        if let StepExpression::EdgeTraversalHop { source, .. } = &mut orphan.expression {
            *source = "missing".into();
        }
        assert!(builder.extend(vec![operator_step(), orphan]).is_err());
        assert_eq!(builder.len(), 1);
        assert!(builder.get("well_operator").is_none());
        builder.append(operator_step()).unwrap();
    }

    #[tokio::test]
    async fn test_execute_empty_plan_fails_before_any_call() {
        let service = wells_service();
        let mut builder = QueryBuilder::new();
        assert!(matches!(
            builder.execute(&service, true).await,
            Err(QueryError::BuilderState(_))
        ));
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_root_only_round_trip() {
        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        builder.execute(&service, true).await.unwrap();

        let rows = builder.results().unwrap().nodes("well").to_vec();
        for mode in [UnpackEdges::Skip, UnpackEdges::Identifier, UnpackEdges::Include] {
            let output = builder.unpack(mode).unwrap();
            assert_eq!(output.len(), 3);
            for (mapping, row) in output.iter().zip(&rows) {
                let mut expected = row.to_mapping();
                expected.remove("operator");
                assert_eq!(mapping, &expected, "{:?}", mode);
            }
            assert_eq!(builder.unpack(mode).unwrap(), output);
        }
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_call() {
        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)])
            .with_config(EngineConfig::default().with_page_size(0));
        let err = builder.execute(&service, true).await.unwrap_err();
        assert!(matches!(err, QueryError::Config(_)));
        assert!(err.is_build_error());
        assert!(!err.is_execution_error());
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pagination_honors_limit_and_page_size() {
        let mut service = MemoryService::new();
        for i in 0..25 {
            service = service.with_node(&well_view(), NodeRow::new(id(&format!("w{:02}", i))));
        }
        let mut builder = plan(vec![root_step(RetrieveLimit::AtMost(12))])
            .with_config(EngineConfig::default().with_page_size(5));
        builder.execute(&service, true).await.unwrap();

        assert_eq!(builder.unpack(UnpackEdges::Skip).unwrap().len(), 12);
        let limits: Vec<usize> = service.calls().iter().map(|c| c.limit()).collect();
        assert_eq!(limits, vec![5, 5, 2]);
        let stats = &builder.results().unwrap().table("well").unwrap().stats;
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.received, 12);
        assert!(!stats.exhausted);
    }

    #[tokio::test]
    async fn test_unbounded_root_reads_until_exhausted() {
        let mut service = MemoryService::new().with_page_ceiling(4);
        for i in 0..10 {
            service = service.with_node(&well_view(), NodeRow::new(id(&format!("w{}", i))));
        }
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let results = builder.execute(&service, true).await.unwrap();
        assert_eq!(results.nodes("well").len(), 10);
        assert_eq!(results.total_calls(), 3);
        assert!(results.table("well").unwrap().stats.exhausted);
    }

    #[tokio::test]
    async fn test_well_operator_identifier_scenario() {
        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step()]);
        builder.execute(&service, true).await.unwrap();

        let output = builder.unpack(UnpackEdges::Identifier).unwrap();
        assert_eq!(output.len(), 3);
        assert_eq!(output[0]["operator"], id("op-1").to_value());
        assert_eq!(output[1]["operator"], id("op-2").to_value());
        assert!(!output[2].contains_key("operator"));

        let request = &service.node_calls_for(&operator_view())[0];
        assert_eq!(
            request.filter,
            Some(lattice_core::Predicate::id_in(vec![id("op-1"), id("op-2")]))
        );
        assert_eq!(builder.results().unwrap().nodes("well_operator").len(), 2);
    }

    #[tokio::test]
    async fn test_list_relation_identifier_and_include() {
        let service = MemoryService::new()
            .with_node(
                &well_view(),
                NodeRow::new(id("well-1")).with_relations("operators", &[id("op-1"), id("op-2")]),
            )
            .with_node(&well_view(), NodeRow::new(id("well-2")).with_relations("operators", &[]))
            .with_node(&well_view(), NodeRow::new(id("well-3")))
            .with_node(&operator_view(), NodeRow::new(id("op-1")).with_property("name", "Acme"))
            .with_node(&operator_view(), NodeRow::new(id("op-2")).with_property("name", "Borealis"));
        let root = QueryStep::node(
            "well",
            StepExpression::Root {
                filter: None,
                sort: vec![],
            },
            Select::new(well_view(), vec![], true).with_relations(vec!["operators".into()]),
        );
        let operators = QueryStep::node(
            "well_operators",
            StepExpression::DirectRelationHop {
                source: "well".into(),
                via: "operators".into(),
                list: true,
                filter: None,
            },
            Select::new(operator_view(), vec!["name".into()], true),
        )
        .with_connection("operators");
        let mut builder = plan(vec![root, operators]);
        builder.execute(&service, true).await.unwrap();

        let identifiers = builder.unpack(UnpackEdges::Identifier).unwrap();
        assert_eq!(
            identifiers[0]["operators"],
            json!([id("op-1").to_value(), id("op-2").to_value()])
        );
        assert_eq!(identifiers[1]["operators"], json!([]));
        assert_eq!(identifiers[2]["operators"], json!([]));

        let included = builder.unpack(UnpackEdges::Include).unwrap();
        assert_eq!(included[0]["operators"][0]["name"], "Acme");
        assert_eq!(included[0]["operators"][1]["name"], "Borealis");
        assert_eq!(included[1]["operators"], json!([]));

        let skipped = builder.unpack(UnpackEdges::Skip).unwrap();
        assert!(skipped.iter().all(|m| !m.contains_key("operators")));
    }

    #[tokio::test]
    async fn test_unrequested_row_is_pruned_at_execute() {
        let service = StrayRowService::new(wells_service(), operator_view(), NodeRow::new(id("op-9")));
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step()]);
        let results = builder.execute(&service, true).await.unwrap();

        let operators = results.nodes("well_operator");
        assert_eq!(operators.len(), 2);
        assert!(operators.iter().all(|row| row.id != id("op-9")));
        assert_eq!(results.table("well_operator").unwrap().stats.pruned, 1);
        assert_eq!(results.table("well").unwrap().stats.pruned, 0);
    }

    #[tokio::test]
    async fn test_unrequested_row_kept_then_reported_on_unpack() {
        let service = StrayRowService::new(wells_service(), operator_view(), NodeRow::new(id("op-9")));
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step()]);
        let results = builder.execute(&service, false).await.unwrap();
        assert_eq!(results.nodes("well_operator").len(), 3);

        assert!(builder.unpack(UnpackEdges::Skip).is_ok());
        match builder.unpack(UnpackEdges::Identifier) {
            Err(QueryError::DanglingRow { step, row, parent }) => {
                assert_eq!(step, "well_operator");
                assert_eq!(row, id("op-9"));
                assert_eq!(parent, "well");
            }
            other => panic!("expected DanglingRow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edge_scenario_skip_and_identifier() {
        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), documents_step()]);
        builder.execute(&service, true).await.unwrap();

        let skipped = builder.unpack(UnpackEdges::Skip).unwrap();
        assert!(skipped.iter().all(|m| !m.contains_key("documents")));

        let identifiers = builder.unpack(UnpackEdges::Identifier).unwrap();
        assert_eq!(
            identifiers[0]["documents"],
            json!([id("doc-1").to_value(), id("doc-2").to_value()])
        );
        assert_eq!(service.edge_calls()[0].node_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_source_set_skips_call() {
        let service = MemoryService::new()
            .with_node(&well_view(), NodeRow::new(id("well-1")).with_property("name", "Alpha"));
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step()]);
        let results = builder.execute(&service, true).await.unwrap();

        let stats = &results.table("well_operator").unwrap().stats;
        assert!(stats.skipped);
        assert_eq!(stats.calls, 0);
        assert!(results.nodes("well_operator").is_empty());
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_aborts_with_step_name() {
        let service = wells_service().with_failure(FailureRule::OnEdges);
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), documents_step()]);
        let err = builder.execute(&service, true).await.unwrap_err();
        assert!(err.is_execution_error());
        assert_eq!(err.step(), Some("well_documents"));
        assert!(matches!(err, QueryError::Execution { cause: ServiceError::Injected(_), .. }));
        assert!(builder.results().is_none());
        assert!(matches!(builder.unpack(UnpackEdges::Skip), Err(QueryError::NotExecuted)));
    }

    #[tokio::test]
    async fn test_failed_execute_clears_earlier_results() {
        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        builder.execute(&service, true).await.unwrap();
        service.add_failure(FailureRule::OnView(well_view())).unwrap();
        assert!(builder.execute(&service, true).await.is_err());
        assert!(builder.results().is_none());
    }

    #[tokio::test]
    async fn test_id_chunking_shares_limit() {
        let mut service = MemoryService::new();
        for i in 0..5 {
            let op = id(&format!("op-{}", i));
            service = service
                .with_node(&well_view(), NodeRow::new(id(&format!("w{}", i))).with_relation("operator", &op))
                .with_node(&operator_view(), NodeRow::new(op));
        }
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step()])
            .with_config(EngineConfig::default().with_ids_per_request(2));
        let results = builder.execute(&service, true).await.unwrap();

        assert_eq!(results.nodes("well_operator").len(), 5);
        let chunks: Vec<usize> = service
            .node_calls_for(&operator_view())
            .iter()
            .map(|r| match &r.filter {
                Some(lattice_core::Predicate::IdIn { ids }) => ids.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(chunks, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_parallel_siblings_match_sequential() {
        let service = wells_service();
        let steps = vec![root_step(RetrieveLimit::Unbounded), operator_step(), documents_step()];

        let mut sequential = plan(steps.clone());
        sequential.execute(&service, true).await.unwrap();
        let mut parallel =
            plan(steps).with_config(EngineConfig::default().with_parallel_siblings(true));
        parallel.execute(&service, true).await.unwrap();

        assert_eq!(
            sequential.unpack(UnpackEdges::Include).unwrap(),
            parallel.unpack(UnpackEdges::Include).unwrap()
        );
    }

    #[tokio::test]
    async fn test_parallel_sibling_failure_is_fail_fast() {
        let service = wells_service().with_failure(FailureRule::OnView(operator_view()));
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step(), documents_step()])
            .with_config(EngineConfig::default().with_parallel_siblings(true));
        let err = builder.execute(&service, true).await.unwrap_err();
        assert_eq!(err.step(), Some("well_operator"));
        assert!(builder.results().is_none());
    }

    /// Serves the same cursor forever
    struct LoopingService;

    #[async_trait]
    impl ServiceClient for LoopingService {
        async fn fetch_nodes(&self, _request: &NodeRequest) -> ServiceResult<Page<NodeRow>> {
            Ok(Page {
                rows: vec![NodeRow::new(id("w"))],
                next_cursor: Some("again".into()),
            })
        }

        async fn fetch_edges(&self, _request: &EdgeRequest) -> ServiceResult<Page<EdgeRow>> {
            Ok(Page::last(vec![]))
        }
    }

    /// Adds a row nobody asked for to the last page of one view
    struct StrayRowService {
        inner: MemoryService,
        view: ViewId,
        stray: NodeRow,
    }

    impl StrayRowService {
        fn new(inner: MemoryService, view: ViewId, stray: NodeRow) -> Self {
            Self { inner, view, stray }
        }
    }

    #[async_trait]
    impl ServiceClient for StrayRowService {
        async fn fetch_nodes(&self, request: &NodeRequest) -> ServiceResult<Page<NodeRow>> {
            let mut page = self.inner.fetch_nodes(request).await?;
            if request.view == self.view && page.next_cursor.is_none() {
                page.rows.push(self.stray.clone());
            }
            Ok(page)
        }

        async fn fetch_edges(&self, request: &EdgeRequest) -> ServiceResult<Page<EdgeRow>> {
            self.inner.fetch_edges(request).await
        }
    }

    /// Never answers
    struct StalledService;

    #[async_trait]
    impl ServiceClient for StalledService {
        async fn fetch_nodes(&self, _request: &NodeRequest) -> ServiceResult<Page<NodeRow>> {
            std::future::pending().await
        }

        async fn fetch_edges(&self, _request: &EdgeRequest) -> ServiceResult<Page<EdgeRow>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cursor_loop_is_execution_error() {
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let err = builder.execute(&LoopingService, true).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Execution { ref step, cause: ServiceError::Pagination(_) } if step == "well"
        ));
    }

    #[tokio::test]
    async fn test_cancellation_discards_everything() {
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let signal = tokio::time::sleep(Duration::from_millis(20));
        let err = builder
            .execute_with_cancel(&StalledService, true, signal)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert!(err.is_execution_error());
        assert!(builder.results().is_none());
    }

    #[tokio::test]
    async fn test_cancel_signal_that_never_fires() {
        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)]);
        let results = builder
            .execute_with_cancel(&service, true, std::future::pending())
            .await
            .unwrap();
        assert_eq!(results.nodes("well").len(), 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded)])
            .with_config(EngineConfig::default().with_timeout(Duration::from_millis(20)));
        let err = builder.execute(&StalledService, true).await.unwrap_err();
        assert!(matches!(err, QueryError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unpack_into_typed() {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Well {
            external_id: String,
            name: String,
            operator: Option<InstanceId>,
        }

        let service = wells_service();
        let mut builder = plan(vec![root_step(RetrieveLimit::Unbounded), operator_step()]);
        builder.execute(&service, true).await.unwrap();
        let wells: Vec<Well> = builder
            .unpack_into(UnpackEdges::Identifier, Validation::Strict)
            .unwrap();
        assert_eq!(wells.len(), 3);
        assert_eq!(wells[0].external_id, "well-1");
        assert_eq!(wells[0].name, "Alpha");
        assert_eq!(wells[1].operator, Some(id("op-2")));
        assert!(wells[2].operator.is_none());
    }

    #[test]
    fn test_describe_names_parents() {
        let builder = plan(vec![root_step(RetrieveLimit::AtMost(3)), operator_step()]);
        let description = builder.describe().unwrap();
        assert_eq!(description["steps"][0]["parent"], Value::Null);
        assert_eq!(description["steps"][1]["parent"], "well");
        assert_eq!(description["steps"][1]["kind"], "direct relation");
        assert_eq!(description["config"]["max_page_size"], 1000);
    }
}
