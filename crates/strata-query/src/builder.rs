//! SQL generation.
//!
//! Identifiers always pass through [`quote_ident_always`]; values are always
//! bound parameters (`?`), pushed in the order they appear in the text. RLS
//! conditions are added as one parenthesized top-level `AND` term, and every
//! table read through a relation is wrapped as
//! `(SELECT * FROM "t" WHERE <rls>)` so its policy applies no matter how the
//! outer statement combines it.

use strata_core::{BuiltQuery, Relationship, RelationshipKind, SqlValue, quote_ident_always};

use crate::filter::{FilterLeaf, FilterOperator, FilterValue, LogicalOp};
use crate::order::OrderSpec;
use crate::pagination::Pagination;
use crate::select::SelectItem;

/// Alias of the embedded table in relation sub-queries.
pub const EMBED_ALIAS: &str = "__strata_e";
/// Alias of the junction table in many-to-many sub-queries.
pub const JUNCTION_ALIAS: &str = "__strata_j";
/// Column carrying the parent join key in relation sub-query results.
pub const LINK_COLUMN: &str = "__strata_link";
/// Column carrying the rowid of rows touched by INSERT/UPDATE.
pub const ROWID_COLUMN: &str = "__strata_rowid";

/// Name of the hidden column that carries `column` for stitching.
pub fn key_column_alias(column: &str) -> String {
    format!("__strata_key_{}", column)
}

/// A relation hop already resolved by the caller, together with the RLS
/// conditions of every table it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedRelation {
    pub relationship: Relationship,
    /// SELECT condition of the foreign table.
    pub foreign_rls: String,
    /// SELECT condition of the junction table (many-to-many only).
    pub junction_rls: String,
}

impl ScopedRelation {
    pub fn new(relationship: Relationship) -> Self {
        Self {
            relationship,
            foreign_rls: String::new(),
            junction_rls: String::new(),
        }
    }
}

/// A filter tree whose relation references have been resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Comparison on a column of the current table.
    Compare {
        column: String,
        operator: FilterOperator,
        negated: bool,
        value: FilterValue,
    },
    /// At least one related row exists (and matches `filter`).
    Exists {
        hop: ScopedRelation,
        filter: Option<Box<Predicate>>,
    },
    Group {
        op: LogicalOp,
        negated: bool,
        children: Vec<Predicate>,
    },
    /// Row is one of the given rowids.
    RowIdIn(Vec<i64>),
}

impl Predicate {
    /// The comparison part of a leaf, ignoring its relation path.
    pub fn compare(leaf: &FilterLeaf) -> Self {
        Predicate::Compare {
            column: leaf.column.clone(),
            operator: leaf.operator,
            negated: leaf.negated,
            value: leaf.value.clone(),
        }
    }

    /// Wrap `self` in EXISTS hops, innermost last.
    pub fn through(self, hops: Vec<ScopedRelation>) -> Self {
        hops.into_iter().rev().fold(self, |inner, hop| Predicate::Exists {
            hop,
            filter: Some(Box::new(inner)),
        })
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderTerm {
    Column(OrderSpec),
    /// Column of a to-one related row.
    Related { hop: ScopedRelation, spec: OrderSpec },
}

/// A root read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPlan {
    pub table: String,
    /// `Star` and `Column` entries are projected; relations are ignored.
    pub columns: Vec<SelectItem>,
    /// Hidden columns needed to stitch embedded relations.
    pub key_columns: Vec<String>,
    /// Implicitly ANDed.
    pub filters: Vec<Predicate>,
    /// SELECT condition of `table`.
    pub rls: String,
    pub order: Vec<OrderTerm>,
    pub pagination: Pagination,
}

impl ReadPlan {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec![SelectItem::Star],
            key_columns: Vec::new(),
            filters: Vec::new(),
            rls: String::new(),
            order: Vec::new(),
            pagination: Pagination::default(),
        }
    }
}

/// A batched read of one relation for many parent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedPlan {
    pub hop: ScopedRelation,
    pub columns: Vec<SelectItem>,
    pub key_columns: Vec<String>,
    pub filters: Vec<Predicate>,
    pub order: Vec<OrderTerm>,
}

/// What an INSERT does on a uniqueness conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    DoNothing {
        target: Vec<String>,
    },
    Merge {
        target: Vec<String>,
        update_columns: Vec<String>,
        /// UPDATE condition that the existing row must satisfy.
        update_rls: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub table: String,
    /// Empty means `DEFAULT VALUES`.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub conflict: Option<ConflictAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub table: String,
    pub assignments: Vec<(String, SqlValue)>,
    pub filters: Vec<Predicate>,
    /// UPDATE condition of `table`.
    pub rls: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    pub table: String,
    pub filters: Vec<Predicate>,
    /// DELETE condition of `table`.
    pub rls: String,
}

/// Compiles plans into parameterized SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlBuilder;

impl SqlBuilder {
    pub fn new() -> Self {
        Self
    }

    /// `SELECT ... FROM "t" WHERE ... ORDER BY ... LIMIT ...`
    pub fn build_select(&self, plan: &ReadPlan) -> BuiltQuery {
        let mut w = SqlWriter::default();
        let table = quote_ident_always(&plan.table);

        w.push("SELECT ");
        let projection = projection(&table, &plan.columns, &plan.key_columns, None);
        w.push(&projection);
        w.push(" FROM ");
        w.push(&table);
        w.where_clause(&table, &plan.filters, &plan.rls);
        w.order_by(&table, &plan.order);
        w.limit(&plan.pagination);
        w.finish()
    }

    /// `SELECT COUNT(*)` over the same rows as [`build_select`](Self::build_select),
    /// ignoring pagination.
    pub fn build_count(&self, plan: &ReadPlan) -> BuiltQuery {
        let mut w = SqlWriter::default();
        let table = quote_ident_always(&plan.table);
        w.push("SELECT COUNT(*) AS \"count\" FROM ");
        w.push(&table);
        w.where_clause(&table, &plan.filters, &plan.rls);
        w.finish()
    }

    /// `EXPLAIN QUERY PLAN` of the root read.
    pub fn build_explain(&self, plan: &ReadPlan) -> BuiltQuery {
        let select = self.build_select(plan);
        BuiltQuery::new(format!("EXPLAIN QUERY PLAN {}", select.sql), select.params)
    }

    /// One query fetching `plan`'s relation for every parent key in `keys`.
    ///
    /// Keys are bound as a single JSON array, so the statement shape does not
    /// depend on how many parents there are. Each result row carries its
    /// parent key in [`LINK_COLUMN`].
    pub fn build_embed(&self, plan: &EmbedPlan, keys: &[serde_json::Value]) -> BuiltQuery {
        let mut w = SqlWriter::default();
        let rel = &plan.hop.relationship;
        let embed = quote_ident_always(EMBED_ALIAS);
        let foreign = scoped_source(&rel.foreign_table, &plan.hop.foreign_rls);

        let (link, key_ref) = match &rel.junction {
            Some(junction) => {
                let junction_alias = quote_ident_always(JUNCTION_ALIAS);
                let local = column_ref(&junction_alias, &junction.local_column);
                (local.clone(), local)
            }
            None => {
                let foreign_col = column_ref(&embed, &rel.foreign_column);
                (foreign_col.clone(), foreign_col)
            }
        };

        w.push("SELECT ");
        let projection = projection(&embed, &plan.columns, &plan.key_columns, Some(&link));
        w.push(&projection);
        w.push(" FROM ");

        match &rel.junction {
            Some(junction) => {
                let junction_alias = quote_ident_always(JUNCTION_ALIAS);
                w.push(&scoped_source(&junction.table, &plan.hop.junction_rls));
                w.push(" AS ");
                w.push(&junction_alias);
                w.push(" JOIN ");
                w.push(&foreign);
                w.push(" AS ");
                w.push(&embed);
                w.push(" ON ");
                w.push(&column_ref(&embed, &rel.foreign_column));
                w.push(" = ");
                w.push(&column_ref(&junction_alias, &junction.foreign_column));
            }
            None => {
                w.push(&foreign);
                w.push(" AS ");
                w.push(&embed);
            }
        }

        w.push(" WHERE ");
        w.push(&key_ref);
        w.push(" IN (SELECT value FROM json_each(?))");
        w.bind(SqlValue::Text(serde_json::Value::from(keys.to_vec()).to_string()));

        for filter in &plan.filters {
            w.push(" AND ");
            w.predicate(&embed, filter);
        }
        w.order_by(&embed, &plan.order);
        w.finish()
    }

    /// `INSERT ... RETURNING rowid`.
    pub fn build_insert(&self, plan: &InsertPlan) -> BuiltQuery {
        let mut w = SqlWriter::default();
        w.push("INSERT INTO ");
        w.push(&quote_ident_always(&plan.table));

        if plan.columns.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            w.push(" (");
            w.push(&join_idents(&plan.columns));
            w.push(") VALUES ");
            for (i, row) in plan.rows.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push("(");
                for (j, value) in row.iter().enumerate() {
                    if j > 0 {
                        w.push(", ");
                    }
                    w.push("?");
                    w.bind(value.clone());
                }
                w.push(")");
            }

            match &plan.conflict {
                Some(ConflictAction::DoNothing { target }) => {
                    w.push(" ON CONFLICT (");
                    w.push(&join_idents(target));
                    w.push(") DO NOTHING");
                }
                Some(ConflictAction::Merge {
                    target,
                    update_columns,
                    update_rls,
                }) => {
                    w.push(" ON CONFLICT (");
                    w.push(&join_idents(target));
                    if update_columns.is_empty() {
                        w.push(") DO NOTHING");
                    } else {
                        w.push(") DO UPDATE SET ");
                        let sets: Vec<String> = update_columns
                            .iter()
                            .map(|c| {
                                let col = quote_ident_always(c);
                                format!("{} = excluded.{}", col, col)
                            })
                            .collect();
                        w.push(&sets.join(", "));
                        if !update_rls.is_empty() {
                            w.push(" WHERE (");
                            w.push(update_rls);
                            w.push(")");
                        }
                    }
                }
                None => {}
            }
        }

        w.push(" RETURNING rowid AS ");
        w.push(&quote_ident_always(ROWID_COLUMN));
        w.finish()
    }

    /// `UPDATE ... WHERE <filters> AND (<rls>) RETURNING rowid`.
    pub fn build_update(&self, plan: &UpdatePlan) -> BuiltQuery {
        let mut w = SqlWriter::default();
        let table = quote_ident_always(&plan.table);
        w.push("UPDATE ");
        w.push(&table);
        w.push(" SET ");
        for (i, (column, value)) in plan.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(&quote_ident_always(column));
            w.push(" = ?");
            w.bind(value.clone());
        }
        w.where_clause(&table, &plan.filters, &plan.rls);
        w.push(" RETURNING rowid AS ");
        w.push(&quote_ident_always(ROWID_COLUMN));
        w.finish()
    }

    /// `DELETE ... WHERE <filters> AND (<rls>) RETURNING *`.
    pub fn build_delete(&self, plan: &DeletePlan) -> BuiltQuery {
        let mut w = SqlWriter::default();
        let table = quote_ident_always(&plan.table);
        w.push("DELETE FROM ");
        w.push(&table);
        w.where_clause(&table, &plan.filters, &plan.rls);
        w.push(" RETURNING *");
        w.finish()
    }

    /// Count rows among `rowids` that fail `check`. A NULL result counts as
    /// a failure.
    pub fn build_check(&self, table: &str, check: &str) -> String {
        format!(
            "SELECT COUNT(*) AS \"violations\" FROM {} WHERE rowid IN (SELECT value FROM json_each(?)) AND NOT COALESCE(({}), 0)",
            quote_ident_always(table),
            check
        )
    }
}

/// `"t"` when unrestricted, `(SELECT * FROM "t" WHERE <rls>)` otherwise.
fn scoped_source(table: &str, rls: &str) -> String {
    let table = quote_ident_always(table);
    if rls.is_empty() {
        table
    } else {
        format!("(SELECT * FROM {} WHERE {})", table, rls)
    }
}

fn column_ref(qualifier: &str, column: &str) -> String {
    format!("{}.{}", qualifier, quote_ident_always(column))
}

fn join_idents(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident_always(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn projection(
    qualifier: &str,
    columns: &[SelectItem],
    key_columns: &[String],
    link: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    for item in columns {
        match item {
            SelectItem::Star => parts.push(format!("{}.*", qualifier)),
            SelectItem::Column(col) => parts.push(format!(
                "{} AS {}",
                column_ref(qualifier, &col.name),
                quote_ident_always(col.output_name())
            )),
            SelectItem::Relation(_) => {}
        }
    }
    for key in key_columns {
        parts.push(format!(
            "{} AS {}",
            column_ref(qualifier, key),
            quote_ident_always(&key_column_alias(key))
        ));
    }
    if let Some(link) = link {
        parts.push(format!("{} AS {}", link, quote_ident_always(LINK_COLUMN)));
    }
    if parts.is_empty() {
        parts.push("NULL AS \"__strata_empty\"".to_string());
    }
    parts.join(", ")
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<SqlValue>,
    aliases: usize,
}

impl SqlWriter {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: SqlValue) {
        self.params.push(value);
    }

    fn next_alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        quote_ident_always(&format!("{}{}", prefix, self.aliases))
    }

    fn finish(self) -> BuiltQuery {
        BuiltQuery::new(self.sql, self.params)
    }

    fn where_clause(&mut self, qualifier: &str, filters: &[Predicate], rls: &str) {
        if filters.is_empty() && rls.is_empty() {
            return;
        }
        self.push(" WHERE ");
        let mut first = true;
        for filter in filters {
            if !first {
                self.push(" AND ");
            }
            first = false;
            self.predicate(qualifier, filter);
        }
        if !rls.is_empty() {
            if !first {
                self.push(" AND ");
            }
            self.push("(");
            self.push(rls);
            self.push(")");
        }
    }

    fn predicate(&mut self, qualifier: &str, predicate: &Predicate) {
        match predicate {
            Predicate::Compare {
                column,
                operator,
                negated,
                value,
            } => {
                if *negated {
                    self.push("NOT (");
                }
                self.comparison(&column_ref(qualifier, column), *operator, value);
                if *negated {
                    self.push(")");
                }
            }
            Predicate::Group {
                op,
                negated,
                children,
            } => {
                if *negated {
                    self.push("NOT ");
                }
                self.push("(");
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.push(" ");
                        self.push(op.as_sql());
                        self.push(" ");
                    }
                    self.predicate(qualifier, child);
                }
                self.push(")");
            }
            Predicate::Exists { hop, filter } => self.exists(qualifier, hop, filter.as_deref()),
            Predicate::RowIdIn(rowids) => {
                self.push(qualifier);
                self.push(".rowid IN (SELECT value FROM json_each(?))");
                self.bind(SqlValue::Text(serde_json::Value::from(rowids.clone()).to_string()));
            }
        }
    }

    fn exists(&mut self, outer: &str, hop: &ScopedRelation, filter: Option<&Predicate>) {
        let rel = &hop.relationship;
        let inner = self.next_alias("__strata_r");
        let foreign = scoped_source(&rel.foreign_table, &hop.foreign_rls);

        self.push("EXISTS (SELECT 1 FROM ");
        match &rel.junction {
            Some(junction) => {
                let junction_alias = self.next_alias("__strata_j");
                self.push(&scoped_source(&junction.table, &hop.junction_rls));
                self.push(" AS ");
                self.push(&junction_alias);
                self.push(" JOIN ");
                self.push(&foreign);
                self.push(" AS ");
                self.push(&inner);
                self.push(" ON ");
                self.push(&column_ref(&inner, &rel.foreign_column));
                self.push(" = ");
                self.push(&column_ref(&junction_alias, &junction.foreign_column));
                self.push(" WHERE ");
                self.push(&column_ref(&junction_alias, &junction.local_column));
            }
            None => {
                self.push(&foreign);
                self.push(" AS ");
                self.push(&inner);
                self.push(" WHERE ");
                self.push(&column_ref(&inner, &rel.foreign_column));
            }
        }
        self.push(" = ");
        self.push(&column_ref(outer, &rel.local_column));

        if let Some(filter) = filter {
            self.push(" AND ");
            self.predicate(&inner, filter);
        }
        self.push(")");
    }

    fn comparison(&mut self, column: &str, operator: FilterOperator, value: &FilterValue) {
        let symbol = match operator {
            FilterOperator::Eq => "=",
            FilterOperator::Neq => "<>",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::Ilike => {
                self.push("lower(");
                self.push(column);
                self.push(") LIKE lower(?)");
                self.bind(scalar(value));
                return;
            }
            FilterOperator::In => {
                let items = match value {
                    FilterValue::List(items) => items.clone(),
                    FilterValue::Scalar(s) => vec![s.clone()],
                    _ => Vec::new(),
                };
                if items.is_empty() {
                    self.push("0 = 1");
                    return;
                }
                self.push(column);
                self.push(" IN (");
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push("?");
                    self.bind(SqlValue::Text(item));
                }
                self.push(")");
                return;
            }
            FilterOperator::Is => {
                self.push(column);
                self.push(match value {
                    FilterValue::True => " IS TRUE",
                    FilterValue::False => " IS FALSE",
                    _ => " IS NULL",
                });
                return;
            }
        };

        self.push(column);
        self.push(" ");
        self.push(symbol);
        self.push(" ?");
        self.bind(scalar(value));
    }

    fn order_by(&mut self, qualifier: &str, order: &[OrderTerm]) {
        if order.is_empty() {
            return;
        }
        self.push(" ORDER BY ");
        for (i, term) in order.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            match term {
                OrderTerm::Column(spec) => {
                    self.push(&column_ref(qualifier, &spec.column));
                    self.push(&spec.sql_suffix());
                }
                OrderTerm::Related { hop, spec } => {
                    let rel = &hop.relationship;
                    let alias = self.next_alias("__strata_o");
                    self.push("(SELECT ");
                    self.push(&column_ref(&alias, &spec.column));
                    self.push(" FROM ");
                    self.push(&scoped_source(&rel.foreign_table, &hop.foreign_rls));
                    self.push(" AS ");
                    self.push(&alias);
                    self.push(" WHERE ");
                    self.push(&column_ref(&alias, &rel.foreign_column));
                    self.push(" = ");
                    self.push(&column_ref(qualifier, &rel.local_column));
                    self.push(" LIMIT 1)");
                    self.push(&spec.sql_suffix());
                }
            }
        }
    }

    fn limit(&mut self, pagination: &Pagination) {
        match (pagination.limit, pagination.offset) {
            (Some(limit), 0) => self.push(&format!(" LIMIT {}", limit)),
            (Some(limit), offset) => self.push(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (None, 0) => {}
            (None, offset) => self.push(&format!(" LIMIT -1 OFFSET {}", offset)),
        }
    }
}

fn scalar(value: &FilterValue) -> SqlValue {
    match value {
        FilterValue::Scalar(s) => SqlValue::Text(s.clone()),
        FilterValue::List(items) => SqlValue::Text(items.join(",")),
        FilterValue::Null => SqlValue::Null,
        FilterValue::True => SqlValue::Integer(1),
        FilterValue::False => SqlValue::Integer(0),
    }
}

/// Whether ordering by `rel` must happen inside the relation's own query
/// rather than on the parent rows.
pub fn orders_inside_embed(rel: &Relationship) -> bool {
    rel.kind != RelationshipKind::ManyToOne
}
