//! Request execution.
//!
//! [`QueryEngine`] turns a [`ParsedRequest`] into plans, attaches the RLS
//! conditions of every table the plans read, and runs them through the
//! [`DataAdapter`].
//!
//! Reads run the root statement first, then one statement per embedded
//! relation (siblings concurrently, nesting level by level) bounded by the
//! distinct join keys of the rows already fetched. Results are stitched in
//! memory: to-one relations become an object or `null`, to-many relations
//! an array, possibly empty.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde_json::Value;
use strata_core::{
    AuthContext, BuiltQuery, GuardrailsConfig, PolicyCommand, Relationship, SqlValue, TableSchema,
};
use strata_query::builder::{LINK_COLUMN, key_column_alias, orders_inside_embed};
use strata_query::select::{RESERVED_PREFIX, relations};
use strata_query::{
    ConflictAction, DeletePlan, EmbedPlan, FilterLeaf, FilterNode, InsertPlan, LogicalOp,
    OrderSpec, OrderTerm, Pagination, ParsedRequest, Predicate, QueryError, ReadPlan,
    Resolution, ReturnPreference, ScopedRelation, SelectItem, SqlBuilder, UpdatePlan,
};
use strata_rls::PolicyEngine;

use crate::adapter::{DataAdapter, JsonRow, WriteOutcome, WritePlan};
use crate::error::EngineError;
use crate::resolver::RelationshipResolver;

/// Result of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutput {
    Rows {
        rows: Vec<JsonRow>,
        /// Total matching rows, when a count was requested.
        total: Option<u64>,
    },
    /// Query plan of the root statement.
    Explain(Vec<JsonRow>),
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    pub affected: u64,
    /// Written rows, when `return=representation` was requested.
    pub rows: Option<Vec<JsonRow>>,
}

/// One embedded relation, resolved and scoped.
#[derive(Debug, Clone)]
struct EmbedNode {
    output: String,
    /// `rel()` only takes part in filtering and is never fetched.
    emitted: bool,
    inner: bool,
    /// Column of the parent rows the relation joins on.
    parent_key: String,
    plan: EmbedPlan,
    children: Vec<EmbedNode>,
}

impl EmbedNode {
    /// The EXISTS term that `!inner` adds to the parent statement.
    fn inner_predicate(&self) -> Predicate {
        Predicate::Exists {
            hop: self.plan.hop.clone(),
            filter: conjoin(self.plan.filters.clone()).map(Box::new),
        }
    }

    fn relationship(&self) -> &Relationship {
        &self.plan.hop.relationship
    }
}

/// Executes declarative requests with RLS applied.
pub struct QueryEngine {
    adapter: Arc<dyn DataAdapter>,
    resolver: Arc<RelationshipResolver>,
    policies: PolicyEngine,
    builder: SqlBuilder,
    guardrails: GuardrailsConfig,
}

impl QueryEngine {
    pub fn new(
        adapter: Arc<dyn DataAdapter>,
        resolver: Arc<RelationshipResolver>,
        policies: PolicyEngine,
        guardrails: GuardrailsConfig,
    ) -> Self {
        Self {
            adapter,
            resolver,
            policies,
            builder: SqlBuilder::new(),
            guardrails,
        }
    }

    pub fn resolver(&self) -> &RelationshipResolver {
        &self.resolver
    }

    /// Read rows, with embedded relations.
    pub async fn read(
        &self,
        req: &ParsedRequest,
        ctx: &AuthContext,
    ) -> Result<ReadOutput, EngineError> {
        let (plan, embeds) = self.plan_read(req, ctx).await?;

        if req.modifiers.explain {
            let query = self.builder.build_explain(&plan);
            return Ok(ReadOutput::Explain(self.fetch(&query).await?));
        }

        let rows = self.fetch_tree(&plan, &embeds).await?;
        let total = if req.modifiers.wants_count() {
            Some(self.count(&self.builder.build_count(&plan)).await?)
        } else {
            None
        };

        tracing::debug!(table = %req.table, rows = rows.len(), total = ?total, "Read completed");
        Ok(ReadOutput::Rows { rows, total })
    }

    /// Insert one object or an array of objects.
    ///
    /// With a `resolution` preference this is an upsert: `ignore-duplicates`
    /// skips conflicting rows, `merge-duplicates` updates them, provided
    /// the existing row passes the UPDATE policy.
    pub async fn insert(
        &self,
        req: &ParsedRequest,
        body: &Value,
        ctx: &AuthContext,
    ) -> Result<WriteResult, EngineError> {
        let schema = self.resolver.table_schema(&req.table).await?;
        let objects = body_objects(body)?;
        for object in &objects {
            for column in object.keys() {
                require_column(&schema, column)?;
            }
        }
        if objects.is_empty() {
            return Ok(WriteResult {
                affected: 0,
                rows: wants_representation(req).then(Vec::new),
            });
        }

        let mut checks = vec![
            self.policies
                .effective_condition(&req.table, PolicyCommand::Insert, ctx)
                .await?,
        ];

        let conflict = match req.modifiers.resolution {
            None => None,
            Some(resolution) => {
                let target = if req.modifiers.on_conflict.is_empty() {
                    schema.primary_key.clone()
                } else {
                    req.modifiers.on_conflict.clone()
                };
                if target.is_empty() {
                    return Err(QueryError::InvalidParameter {
                        name: "on_conflict".to_string(),
                        reason: format!("'{}' has no primary key to detect conflicts on", req.table),
                    }
                    .into());
                }
                for column in &target {
                    require_column(&schema, column)?;
                }
                Some((resolution, target))
            }
        };

        let update_rls = match &conflict {
            Some((Resolution::MergeDuplicates, _)) => {
                let update = self
                    .policies
                    .conditions(&req.table, PolicyCommand::Update, ctx)
                    .await?;
                checks.push(update.check);
                update.using
            }
            _ => String::new(),
        };

        let mut statements = Vec::new();
        for (columns, rows) in group_by_columns(&objects) {
            let action = conflict.as_ref().map(|(resolution, target)| match resolution {
                Resolution::IgnoreDuplicates => ConflictAction::DoNothing {
                    target: target.clone(),
                },
                Resolution::MergeDuplicates => ConflictAction::Merge {
                    target: target.clone(),
                    update_columns: columns
                        .iter()
                        .filter(|c| !target.contains(c))
                        .cloned()
                        .collect(),
                    update_rls: update_rls.clone(),
                },
            });

            if columns.is_empty() {
                // DEFAULT VALUES inserts exactly one row per statement.
                for _ in &rows {
                    statements.push(self.builder.build_insert(&InsertPlan {
                        table: req.table.clone(),
                        columns: Vec::new(),
                        rows: Vec::new(),
                        conflict: action.clone(),
                    }));
                }
            } else {
                statements.push(self.builder.build_insert(&InsertPlan {
                    table: req.table.clone(),
                    columns,
                    rows,
                    conflict: action,
                }));
            }
        }

        let check = conjunction(checks);
        let plan = WritePlan::new(&req.table, statements).with_check(self.check_sql(&req.table, &check));
        let (affected, rowids, _) = self.run_write(&plan).await?;

        let rows = if wants_representation(req) {
            Some(self.read_back(req, rowids, ctx).await?)
        } else {
            None
        };
        Ok(WriteResult { affected, rows })
    }

    /// Update the rows matched by the request's filters.
    pub async fn update(
        &self,
        req: &ParsedRequest,
        body: &Value,
        ctx: &AuthContext,
    ) -> Result<WriteResult, EngineError> {
        let schema = self.resolver.table_schema(&req.table).await?;
        let object = body
            .as_object()
            .ok_or_else(|| QueryError::InvalidBody("expected a JSON object".to_string()))?;
        if object.is_empty() {
            return Err(QueryError::InvalidBody("no columns to update".to_string()).into());
        }
        for column in object.keys() {
            require_column(&schema, column)?;
        }

        let assignments = object
            .iter()
            .map(|(column, value)| (column.clone(), SqlValue::from_json(value)))
            .collect();
        let filters = self
            .predicates(&req.table, &req.select, &req.filters, ctx)
            .await?;
        let conditions = self
            .policies
            .conditions(&req.table, PolicyCommand::Update, ctx)
            .await?;

        let statement = self.builder.build_update(&UpdatePlan {
            table: req.table.clone(),
            assignments,
            filters,
            rls: conditions.using,
        });
        let plan = WritePlan::new(&req.table, vec![statement])
            .with_check(self.check_sql(&req.table, &conditions.check))
            .with_max_affected(self.guardrails.max_affected_rows);
        let (affected, rowids, _) = self.run_write(&plan).await?;

        let rows = if wants_representation(req) {
            Some(self.read_back(req, rowids, ctx).await?)
        } else {
            None
        };
        Ok(WriteResult { affected, rows })
    }

    /// Delete the rows matched by the request's filters.
    pub async fn delete(
        &self,
        req: &ParsedRequest,
        ctx: &AuthContext,
    ) -> Result<WriteResult, EngineError> {
        let schema = self.resolver.table_schema(&req.table).await?;
        validate_columns(&schema, &req.select)?;

        let filters = self
            .predicates(&req.table, &req.select, &req.filters, ctx)
            .await?;
        let rls = self
            .policies
            .effective_condition(&req.table, PolicyCommand::Delete, ctx)
            .await?;

        let statement = self.builder.build_delete(&DeletePlan {
            table: req.table.clone(),
            filters,
            rls,
        });
        let plan = WritePlan::new(&req.table, vec![statement])
            .with_max_affected(self.guardrails.max_affected_rows);
        let (affected, _, deleted) = self.run_write(&plan).await?;

        let rows = wants_representation(req)
            .then(|| deleted.iter().map(|row| project(row, &req.select)).collect());
        Ok(WriteResult { affected, rows })
    }

    async fn plan_read(
        &self,
        req: &ParsedRequest,
        ctx: &AuthContext,
    ) -> Result<(ReadPlan, Vec<EmbedNode>), EngineError> {
        let schema = self.resolver.table_schema(&req.table).await?;
        validate_columns(&schema, &req.select)?;

        let rls = self
            .policies
            .effective_condition(&req.table, PolicyCommand::Select, ctx)
            .await?;
        let mut embeds = self
            .plan_embeds(req.table.clone(), &req.select, ctx)
            .await?;

        let mut filters = self
            .predicates(&req.table, &req.select, &req.filters, ctx)
            .await?;
        filters.extend(inner_predicates(&embeds));

        let order = self
            .order_terms(&schema, &req.select, &req.order, &mut embeds, ctx)
            .await?;

        let plan = ReadPlan {
            table: req.table.clone(),
            columns: req.select.clone(),
            key_columns: parent_keys(&embeds),
            filters,
            rls,
            order,
            pagination: req.pagination,
        };
        Ok((plan, embeds))
    }

    /// Resolve every relation in `items`, recursively.
    fn plan_embeds<'a>(
        &'a self,
        table: String,
        items: &'a [SelectItem],
        ctx: &'a AuthContext,
    ) -> BoxFuture<'a, Result<Vec<EmbedNode>, EngineError>> {
        async move {
            let mut nodes = Vec::new();
            for rel in relations(items) {
                let relationship = self
                    .resolver
                    .resolve(&table, &rel.name, rel.hint.as_deref())
                    .await?;
                let foreign = self
                    .resolver
                    .table_schema(&relationship.foreign_table)
                    .await?;
                validate_columns(&foreign, &rel.children)?;

                let hop = self.scope(relationship, ctx).await?;
                let children = self
                    .plan_embeds(hop.relationship.foreign_table.clone(), &rel.children, ctx)
                    .await?;

                let columns = rel
                    .children
                    .iter()
                    .filter(|item| !matches!(item, SelectItem::Relation(_)))
                    .cloned()
                    .collect();

                nodes.push(EmbedNode {
                    output: rel.output_name().to_string(),
                    emitted: !rel.is_filter_only(),
                    inner: rel.inner,
                    parent_key: hop.relationship.local_column.clone(),
                    plan: EmbedPlan {
                        key_columns: parent_keys(&children),
                        filters: inner_predicates(&children),
                        hop,
                        columns,
                        order: Vec::new(),
                    },
                    children,
                });
            }
            Ok(nodes)
        }
        .boxed()
    }

    /// Attach the SELECT conditions of the tables a hop reads.
    async fn scope(
        &self,
        relationship: Relationship,
        ctx: &AuthContext,
    ) -> Result<ScopedRelation, EngineError> {
        let foreign_rls = self
            .policies
            .effective_condition(&relationship.foreign_table, PolicyCommand::Select, ctx)
            .await?;
        let junction_rls = match &relationship.junction {
            Some(junction) => {
                self.policies
                    .effective_condition(&junction.table, PolicyCommand::Select, ctx)
                    .await?
            }
            None => String::new(),
        };
        Ok(ScopedRelation {
            relationship,
            foreign_rls,
            junction_rls,
        })
    }

    async fn predicates(
        &self,
        table: &str,
        select: &[SelectItem],
        filters: &[FilterNode],
        ctx: &AuthContext,
    ) -> Result<Vec<Predicate>, EngineError> {
        let mut out = Vec::with_capacity(filters.len());
        for node in filters {
            out.push(self.predicate(table, select, node, ctx).await?);
        }
        Ok(out)
    }

    fn predicate<'a>(
        &'a self,
        table: &'a str,
        select: &'a [SelectItem],
        node: &'a FilterNode,
        ctx: &'a AuthContext,
    ) -> BoxFuture<'a, Result<Predicate, EngineError>> {
        async move {
            match node {
                FilterNode::Leaf(leaf) => self.leaf_predicate(table, select, leaf, ctx).await,
                FilterNode::Group {
                    op,
                    negated,
                    children,
                } => {
                    let mut predicates = Vec::with_capacity(children.len());
                    for child in children {
                        predicates.push(self.predicate(table, select, child, ctx).await?);
                    }
                    Ok(Predicate::Group {
                        op: *op,
                        negated: *negated,
                        children: predicates,
                    })
                }
            }
        }
        .boxed()
    }

    async fn leaf_predicate(
        &self,
        table: &str,
        select: &[SelectItem],
        leaf: &FilterLeaf,
        ctx: &AuthContext,
    ) -> Result<Predicate, EngineError> {
        let (target, hops) = self.walk(table, select, &leaf.relation_path, ctx).await?;
        let schema = self.resolver.table_schema(&target).await?;
        require_column(&schema, &leaf.column)?;
        Ok(Predicate::compare(leaf).through(hops))
    }

    /// Follow a relation path from `table`. Segments naming a relation of
    /// the selection (by output name or name) reuse its hint.
    async fn walk(
        &self,
        table: &str,
        select: &[SelectItem],
        path: &[String],
        ctx: &AuthContext,
    ) -> Result<(String, Vec<ScopedRelation>), EngineError> {
        let mut current = table.to_string();
        let mut items = Some(select);
        let mut hops = Vec::with_capacity(path.len());

        for segment in path {
            let selected = items.and_then(|items| {
                relations(items).find(|r| r.output_name() == segment || r.name == *segment)
            });
            let (name, hint) = match selected {
                Some(rel) => (rel.name.as_str(), rel.hint.as_deref()),
                None => (segment.as_str(), None),
            };

            let relationship = self.resolver.resolve(&current, name, hint).await?;
            current = relationship.foreign_table.clone();
            items = selected.map(|rel| rel.children.as_slice());
            hops.push(self.scope(relationship, ctx).await?);
        }
        Ok((current, hops))
    }

    /// Root ORDER BY terms. Orderings on a to-many relation sort that
    /// relation's embedded array instead.
    async fn order_terms(
        &self,
        schema: &TableSchema,
        select: &[SelectItem],
        order: &[OrderSpec],
        embeds: &mut [EmbedNode],
        ctx: &AuthContext,
    ) -> Result<Vec<OrderTerm>, EngineError> {
        let mut terms = Vec::with_capacity(order.len());
        for spec in order {
            let Some(relation) = &spec.relation else {
                require_column(schema, &spec.column)?;
                terms.push(OrderTerm::Column(spec.clone()));
                continue;
            };

            let (target, mut hops) = self
                .walk(&schema.name, select, std::slice::from_ref(relation), ctx)
                .await?;
            require_column(&self.resolver.table_schema(&target).await?, &spec.column)?;
            let hop = hops.pop().ok_or_else(|| QueryError::InvalidParameter {
                name: "order".to_string(),
                reason: format!("'{}' is not a relation", relation),
            })?;
            let local = OrderSpec {
                relation: None,
                ..spec.clone()
            };

            if orders_inside_embed(&hop.relationship) {
                let node = embeds
                    .iter_mut()
                    .find(|n| n.emitted && n.relationship() == &hop.relationship)
                    .ok_or_else(|| QueryError::InvalidParameter {
                        name: "order".to_string(),
                        reason: format!(
                            "'{}' is a to-many relation; embed it to order its rows",
                            relation
                        ),
                    })?;
                node.plan.order.push(OrderTerm::Column(local));
            } else {
                terms.push(OrderTerm::Related { hop, spec: local });
            }
        }
        Ok(terms)
    }

    async fn fetch_tree(
        &self,
        plan: &ReadPlan,
        embeds: &[EmbedNode],
    ) -> Result<Vec<JsonRow>, EngineError> {
        let mut rows = self.fetch(&self.builder.build_select(plan)).await?;
        self.embed(&mut rows, embeds).await?;
        for row in &mut rows {
            strip_hidden(row);
        }
        Ok(rows)
    }

    /// Fill `nodes` into `rows`. One statement per node, siblings run
    /// concurrently.
    fn embed<'a>(
        &'a self,
        rows: &'a mut Vec<JsonRow>,
        nodes: &'a [EmbedNode],
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            let active: Vec<&EmbedNode> = nodes.iter().filter(|n| n.emitted).collect();
            if active.is_empty() || rows.is_empty() {
                return Ok(());
            }

            let parents: &[JsonRow] = rows;
            let batches: Vec<_> = active
                .iter()
                .map(|&node| {
                    let keys = distinct_keys(parents, &node.parent_key);
                    self.fetch_related(node, keys)
                })
                .collect();
            let fetched = try_join_all(batches).await?;

            for (node, related) in active.into_iter().zip(fetched) {
                let key_alias = key_column_alias(&node.parent_key);
                let to_one = node.relationship().is_to_one();
                for row in rows.iter_mut() {
                    let matched = row
                        .get(&key_alias)
                        .filter(|key| !key.is_null())
                        .and_then(|key| related.get(&link_key(key)));
                    let value = match (to_one, matched) {
                        (true, Some(found)) => found
                            .first()
                            .cloned()
                            .map(Value::Object)
                            .unwrap_or(Value::Null),
                        (true, None) => Value::Null,
                        (false, Some(found)) => {
                            Value::Array(found.iter().cloned().map(Value::Object).collect())
                        }
                        (false, None) => Value::Array(Vec::new()),
                    };
                    row.insert(node.output.clone(), value);
                }

                if node.inner {
                    rows.retain(|row| is_present(row.get(&node.output)));
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Fetch one relation for all parent `keys`, grouped by parent key.
    async fn fetch_related(
        &self,
        node: &EmbedNode,
        keys: Vec<Value>,
    ) -> Result<HashMap<String, Vec<JsonRow>>, EngineError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let query = self.builder.build_embed(&node.plan, &keys);
        let mut rows = self.fetch(&query).await?;
        tracing::debug!(
            relation = %node.output,
            keys = keys.len(),
            rows = rows.len(),
            "Fetched embedded relation"
        );
        self.embed(&mut rows, &node.children).await?;

        let mut grouped: HashMap<String, Vec<JsonRow>> = HashMap::new();
        for mut row in rows {
            let link = row.remove(LINK_COLUMN).unwrap_or(Value::Null);
            strip_hidden(&mut row);
            grouped.entry(link_key(&link)).or_default().push(row);
        }
        Ok(grouped)
    }

    /// Read written rows back through the SELECT policy.
    async fn read_back(
        &self,
        req: &ParsedRequest,
        rowids: Vec<i64>,
        ctx: &AuthContext,
    ) -> Result<Vec<JsonRow>, EngineError> {
        if rowids.is_empty() {
            return Ok(Vec::new());
        }
        let mut back = req.clone();
        back.filters.clear();
        back.pagination = Pagination::default();

        let (mut plan, embeds) = self.plan_read(&back, ctx).await?;
        plan.filters.push(Predicate::RowIdIn(rowids));
        self.fetch_tree(&plan, &embeds).await
    }

    fn check_sql(&self, table: &str, check: &str) -> Option<String> {
        (!check.is_empty()).then(|| self.builder.build_check(table, check))
    }

    async fn run_write(&self, plan: &WritePlan) -> Result<(u64, Vec<i64>, Vec<JsonRow>), EngineError> {
        let outcome = self.adapter.execute_write(plan).await.map_err(|e| {
            tracing::error!(
                table = %plan.table,
                statements = ?plan.statements,
                error = %e,
                "Write failed"
            );
            EngineError::Exec(e)
        })?;

        match outcome {
            WriteOutcome::Committed {
                rows,
                rowids,
                affected,
            } => {
                tracing::info!(table = %plan.table, affected, "Write committed");
                Ok((affected, rowids, rows))
            }
            WriteOutcome::CheckFailed { violations } => {
                tracing::warn!(table = %plan.table, violations, "Write rejected by row-level security");
                Err(EngineError::RlsViolation {
                    table: plan.table.clone(),
                })
            }
            WriteOutcome::LimitExceeded { affected } => {
                tracing::warn!(table = %plan.table, affected, "Write exceeded affected-row guardrail");
                Err(EngineError::TooManyRows {
                    affected,
                    max: plan.max_affected.unwrap_or(self.guardrails.max_affected_rows),
                })
            }
        }
    }

    async fn fetch(&self, query: &BuiltQuery) -> Result<Vec<JsonRow>, EngineError> {
        self.adapter.fetch_rows(query).await.map_err(|e| {
            tracing::error!(sql = %query.sql, params = ?query.params, error = %e, "Query failed");
            EngineError::Exec(e)
        })
    }

    async fn count(&self, query: &BuiltQuery) -> Result<u64, EngineError> {
        self.adapter.fetch_count(query).await.map_err(|e| {
            tracing::error!(sql = %query.sql, params = ?query.params, error = %e, "Count failed");
            EngineError::Exec(e)
        })
    }
}

fn wants_representation(req: &ParsedRequest) -> bool {
    req.modifiers.returning == ReturnPreference::Representation
}

fn require_column(schema: &TableSchema, column: &str) -> Result<(), EngineError> {
    if schema.has_column(column) {
        Ok(())
    } else {
        Err(EngineError::UnknownColumn {
            table: schema.name.clone(),
            column: column.to_string(),
        })
    }
}

fn validate_columns(schema: &TableSchema, items: &[SelectItem]) -> Result<(), EngineError> {
    for item in items {
        if let SelectItem::Column(col) = item {
            require_column(schema, &col.name)?;
        }
    }
    Ok(())
}

/// Parent columns the emitted `nodes` join on, deduplicated.
fn parent_keys(nodes: &[EmbedNode]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for node in nodes.iter().filter(|n| n.emitted) {
        if !keys.contains(&node.parent_key) {
            keys.push(node.parent_key.clone());
        }
    }
    keys
}

fn inner_predicates(nodes: &[EmbedNode]) -> Vec<Predicate> {
    nodes
        .iter()
        .filter(|n| n.inner)
        .map(EmbedNode::inner_predicate)
        .collect()
}

fn conjoin(mut predicates: Vec<Predicate>) -> Option<Predicate> {
    match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => Some(Predicate::Group {
            op: LogicalOp::And,
            negated: false,
            children: predicates,
        }),
    }
}

/// AND of the non-empty conditions, each parenthesized when there are
/// several.
fn conjunction(conditions: Vec<String>) -> String {
    let terms: Vec<String> = conditions.into_iter().filter(|c| !c.is_empty()).collect();
    match terms.len() {
        0 => String::new(),
        1 => terms.into_iter().collect(),
        _ => terms
            .iter()
            .map(|t| format!("({})", t))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

fn body_objects(body: &Value) -> Result<Vec<&JsonRow>, QueryError> {
    match body {
        Value::Object(object) => Ok(vec![object]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    QueryError::InvalidBody("every array element must be an object".to_string())
                })
            })
            .collect(),
        _ => Err(QueryError::InvalidBody(
            "expected a JSON object or an array of objects".to_string(),
        )),
    }
}

/// Group objects by their column set so each group is one multi-row INSERT.
fn group_by_columns(objects: &[&JsonRow]) -> Vec<(Vec<String>, Vec<Vec<SqlValue>>)> {
    let mut groups: Vec<(Vec<String>, Vec<Vec<SqlValue>>)> = Vec::new();
    for object in objects {
        let mut columns: Vec<String> = object.keys().cloned().collect();
        columns.sort();
        let values = columns
            .iter()
            .map(|c| object.get(c).map(SqlValue::from_json).unwrap_or(SqlValue::Null))
            .collect();
        match groups.iter_mut().find(|(cols, _)| *cols == columns) {
            Some((_, rows)) => rows.push(values),
            None => groups.push((columns, vec![values])),
        }
    }
    groups
}

fn distinct_keys(rows: &[JsonRow], parent_key: &str) -> Vec<Value> {
    let alias = key_column_alias(parent_key);
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(&alias))
        .filter(|key| !key.is_null())
        .filter(|key| seen.insert(link_key(key)))
        .cloned()
        .collect()
}

/// Join keys compare by text so that `1` and `"1"` stitch together.
fn link_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn strip_hidden(row: &mut JsonRow) {
    row.retain(|key, _| !key.starts_with(RESERVED_PREFIX));
}

/// Shape a returned row by a selection, without embeds.
fn project(row: &JsonRow, select: &[SelectItem]) -> JsonRow {
    let mut out = if select.iter().any(|item| matches!(item, SelectItem::Star)) {
        row.clone()
    } else {
        JsonRow::new()
    };
    for item in select {
        if let SelectItem::Column(col) = item {
            let value = row.get(&col.name).cloned().unwrap_or(Value::Null);
            out.insert(col.output_name().to_string(), value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StaticSchema;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use strata_core::{DatabaseSchema, QueryConfig, RlsPolicy};
    use strata_query::RequestHeaders;
    use strata_rls::InMemoryPolicyStore;

    /// Answers reads by the first needle found in the SQL text and records
    /// every statement it sees.
    #[derive(Default)]
    struct ScriptedAdapter {
        responses: Vec<(&'static str, Vec<JsonRow>)>,
        outcome: Option<WriteOutcome>,
        queries: Mutex<Vec<BuiltQuery>>,
        writes: Mutex<Vec<WritePlan>>,
    }

    impl ScriptedAdapter {
        fn with(mut self, needle: &'static str, rows: Value) -> Self {
            let rows = rows
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().unwrap().clone())
                .collect();
            self.responses.push((needle, rows));
            self
        }

        fn outcome(mut self, outcome: WriteOutcome) -> Self {
            self.outcome = Some(outcome);
            self
        }

        fn queries(&self) -> Vec<BuiltQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataAdapter for ScriptedAdapter {
        async fn fetch_rows(&self, query: &BuiltQuery) -> anyhow::Result<Vec<JsonRow>> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self
                .responses
                .iter()
                .find(|(needle, _)| query.sql.contains(needle))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }

        async fn fetch_count(&self, query: &BuiltQuery) -> anyhow::Result<u64> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(42)
        }

        async fn execute_write(&self, plan: &WritePlan) -> anyhow::Result<WriteOutcome> {
            self.writes.lock().unwrap().push(plan.clone());
            Ok(self.outcome.clone().unwrap_or(WriteOutcome::Committed {
                rows: Vec::new(),
                rowids: Vec::new(),
                affected: 0,
            }))
        }
    }

    fn schema() -> DatabaseSchema {
        let mut schema = DatabaseSchema::new();
        schema.add_table(
            TableSchema::new("continents")
                .column("id", "INTEGER")
                .column("name", "TEXT")
                .primary_key(&["id"]),
        );
        schema.add_table(
            TableSchema::new("countries")
                .column("id", "INTEGER")
                .column("name", "TEXT")
                .column("continent_id", "INTEGER")
                .primary_key(&["id"])
                .foreign_key("continent_id", "continents", "id"),
        );
        schema.add_table(
            TableSchema::new("cities")
                .column("id", "INTEGER")
                .column("name", "TEXT")
                .column("country_id", "INTEGER")
                .primary_key(&["id"])
                .foreign_key("country_id", "countries", "id"),
        );
        schema.add_table(
            TableSchema::new("todos")
                .column("id", "INTEGER")
                .column("title", "TEXT")
                .column("user_id", "TEXT")
                .primary_key(&["id"]),
        );
        schema
    }

    fn build_engine(adapter: Arc<ScriptedAdapter>, policies: Vec<RlsPolicy>) -> QueryEngine {
        let resolver = Arc::new(RelationshipResolver::new(Arc::new(StaticSchema::new(
            schema(),
        ))));
        let store = Arc::new(InMemoryPolicyStore::with_policies(policies));
        QueryEngine::new(
            adapter,
            resolver,
            PolicyEngine::new(store),
            GuardrailsConfig::default(),
        )
    }

    fn request(table: &str, query: &str) -> ParsedRequest {
        ParsedRequest::parse(table, query, &RequestHeaders::default(), &QueryConfig::default())
            .unwrap()
    }

    fn rows(output: ReadOutput) -> Vec<JsonRow> {
        match output {
            ReadOutput::Rows { rows, .. } => rows,
            ReadOutput::Explain(_) => panic!("expected rows"),
        }
    }

    #[tokio::test]
    async fn test_many_to_one_embed_is_one_query() {
        let adapter = Arc::new(
            ScriptedAdapter::default()
                .with(
                    r#"FROM "cities""#,
                    json!([
                        {"id": 1, "name": "Paris", "__strata_key_country_id": 10},
                        {"id": 2, "name": "Lyon", "__strata_key_country_id": 10},
                        {"id": 3, "name": "Atlantis", "__strata_key_country_id": null}
                    ]),
                )
                .with(
                    r#"FROM "countries""#,
                    json!([{"name": "France", "__strata_link": 10}]),
                ),
        );
        let engine = build_engine(adapter.clone(), vec![]);

        let out = engine
            .read(&request("cities", "select=id,name,countries(name)"), &AuthContext::anonymous())
            .await
            .unwrap();
        let rows = rows(out);

        let queries = adapter.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].params, vec![SqlValue::Text("[10]".into())]);

        assert_eq!(Value::Object(rows[0].clone()), json!({"id": 1, "name": "Paris", "countries": {"name": "France"}}));
        assert_eq!(rows[1]["countries"], json!({"name": "France"}));
        assert_eq!(rows[2]["countries"], Value::Null);
    }

    #[tokio::test]
    async fn test_nested_embeds_issue_one_query_per_relation() {
        let adapter = Arc::new(
            ScriptedAdapter::default()
                .with(
                    r#"FROM "continents""#,
                    json!([
                        {"name": "Europe", "__strata_key_id": 1},
                        {"name": "Antarctica", "__strata_key_id": 2}
                    ]),
                )
                .with(
                    r#"FROM "countries""#,
                    json!([
                        {"name": "France", "__strata_key_id": 10, "__strata_link": 1},
                        {"name": "Spain", "__strata_key_id": 11, "__strata_link": 1}
                    ]),
                )
                .with(
                    r#"FROM "cities""#,
                    json!([
                        {"name": "Paris", "__strata_link": 10},
                        {"name": "Lyon", "__strata_link": 10}
                    ]),
                ),
        );
        let engine = build_engine(adapter.clone(), vec![]);

        let out = engine
            .read(
                &request("continents", "select=name,countries(name,cities(name))"),
                &AuthContext::anonymous(),
            )
            .await
            .unwrap();
        let rows = rows(out);

        assert_eq!(adapter.queries().len(), 3);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({
                "name": "Europe",
                "countries": [
                    {"name": "France", "cities": [{"name": "Paris"}, {"name": "Lyon"}]},
                    {"name": "Spain", "cities": []}
                ]
            })
        );
        assert_eq!(rows[1]["countries"], json!([]));
    }

    #[tokio::test]
    async fn test_inner_embed_drops_rows_and_filters_root() {
        let adapter = Arc::new(
            ScriptedAdapter::default()
                .with(
                    r#"FROM "countries""#,
                    json!([
                        {"name": "France", "__strata_key_id": 10},
                        {"name": "Nowhere", "__strata_key_id": 20}
                    ]),
                )
                .with(r#"FROM "cities""#, json!([{"name": "Paris", "__strata_link": 10}])),
        );
        let engine = build_engine(adapter.clone(), vec![]);

        let out = engine
            .read(
                &request("countries", "select=name,cities!inner(name)"),
                &AuthContext::anonymous(),
            )
            .await
            .unwrap();
        let rows = rows(out);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("France"));
        let root = &adapter.queries()[0];
        assert!(root.sql.contains(r#"EXISTS (SELECT 1 FROM "cities" AS "__strata_r1""#));
    }

    #[tokio::test]
    async fn test_empty_root_skips_embeds() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let engine = build_engine(adapter.clone(), vec![]);

        let out = engine
            .read(&request("cities", "select=*,countries(*)"), &AuthContext::anonymous())
            .await
            .unwrap();
        assert!(rows(out).is_empty());
        assert_eq!(adapter.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_rls_applied_to_root_and_embeds() {
        let adapter = Arc::new(ScriptedAdapter::default().with(
            r#"FROM "cities""#,
            json!([{"name": "Paris", "__strata_key_country_id": 10}]),
        ));
        let policies = vec![
            RlsPolicy::using("cities", "visible", PolicyCommand::Select, "name <> 'Hidden'"),
            RlsPolicy::using("countries", "members", PolicyCommand::Select, "id IN (SELECT country_id FROM members WHERE user_id = auth.uid())"),
        ];
        let engine = build_engine(adapter.clone(), policies);

        engine
            .read(
                &request("cities", "select=name,countries(name)"),
                &AuthContext::user("u1", "authenticated"),
            )
            .await
            .unwrap();

        let queries = adapter.queries();
        assert!(queries[0].sql.ends_with(r#"WHERE ((name <> 'Hidden'))"#));
        assert!(queries[1].sql.contains(
            r#"FROM (SELECT * FROM "countries" WHERE (id IN (SELECT country_id FROM members WHERE user_id = 'u1'))) AS "__strata_e""#
        ));
    }

    #[tokio::test]
    async fn test_to_many_order_sorts_embedded_array() {
        let adapter = Arc::new(ScriptedAdapter::default().with(
            r#"FROM "countries""#,
            json!([{"name": "France", "__strata_key_id": 10}]),
        ));
        let engine = build_engine(adapter.clone(), vec![]);

        engine
            .read(
                &request("countries", "select=name,cities(name)&order=cities(name).desc"),
                &AuthContext::anonymous(),
            )
            .await
            .unwrap();

        let queries = adapter.queries();
        assert!(!queries[0].sql.contains("ORDER BY"));
        assert!(queries[1].sql.ends_with(r#"ORDER BY "__strata_e"."name" DESC"#));
    }

    #[tokio::test]
    async fn test_count_and_unknown_column() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let engine = build_engine(adapter.clone(), vec![]);

        let mut req = request("todos", "");
        req.modifiers.apply_prefer("count=exact");
        let ReadOutput::Rows { total, .. } =
            engine.read(&req, &AuthContext::anonymous()).await.unwrap()
        else {
            panic!("expected rows");
        };
        assert_eq!(total, Some(42));

        let err = engine
            .read(&request("todos", "secret=eq.1"), &AuthContext::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownColumn { ref column, .. } if column == "secret"));
    }

    #[tokio::test]
    async fn test_insert_with_check_and_violation() {
        let adapter = Arc::new(
            ScriptedAdapter::default().outcome(WriteOutcome::CheckFailed { violations: 1 }),
        );
        let policies = vec![
            RlsPolicy::using("todos", "own", PolicyCommand::All, "user_id = auth.uid()"),
        ];
        let engine = build_engine(adapter.clone(), policies);

        let err = engine
            .insert(
                &request("todos", ""),
                &json!([{"title": "a", "user_id": "u2"}]),
                &AuthContext::user("u1", "authenticated"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RlsViolation { .. }));

        let writes = adapter.writes.lock().unwrap().clone();
        assert_eq!(
            writes[0].statements[0].sql,
            r#"INSERT INTO "todos" ("title", "user_id") VALUES (?, ?) RETURNING rowid AS "__strata_rowid""#
        );
        assert!(writes[0].check.as_ref().unwrap().contains("NOT COALESCE(((user_id = 'u1')), 0)"));
    }

    #[tokio::test]
    async fn test_update_guardrail_and_delete_projection() {
        let adapter = Arc::new(
            ScriptedAdapter::default().outcome(WriteOutcome::LimitExceeded { affected: 5000 }),
        );
        let engine = build_engine(adapter.clone(), vec![]);
        let err = engine
            .update(&request("todos", ""), &json!({"title": "x"}), &AuthContext::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TooManyRows { affected: 5000, max: 1000 }));

        let deleted = json!({"id": 3, "title": "gone", "user_id": "u1"});
        let adapter = Arc::new(ScriptedAdapter::default().outcome(WriteOutcome::Committed {
            rows: vec![deleted.as_object().unwrap().clone()],
            rowids: vec![],
            affected: 1,
        }));
        let engine = build_engine(adapter, vec![]);
        let mut req = request("todos", "select=id,label:title&id=eq.3");
        req.modifiers.apply_prefer("return=representation");
        let result = engine.delete(&req, &AuthContext::anonymous()).await.unwrap();
        assert_eq!(result.affected, 1);
        assert_eq!(
            Value::Object(result.rows.unwrap()[0].clone()),
            json!({"id": 3, "label": "gone"})
        );
    }

    #[test]
    fn test_group_by_columns() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 3, "b": 4});
        let c = json!({"a": 5});
        let objects = vec![
            a.as_object().unwrap(),
            b.as_object().unwrap(),
            c.as_object().unwrap(),
        ];
        let groups = group_by_columns(&objects);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1, vec![vec![SqlValue::Integer(5)]]);
    }

    #[test]
    fn test_conjunction() {
        assert_eq!(conjunction(vec![String::new(), String::new()]), "");
        assert_eq!(conjunction(vec!["(a)".into(), String::new()]), "(a)");
        assert_eq!(conjunction(vec!["(a)".into(), "(b)".into()]), "((a)) AND ((b))");
    }
}
