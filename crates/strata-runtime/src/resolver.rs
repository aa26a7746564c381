//! Relationship resolution.
//!
//! Relation names in `select=`, filters and `order=` are resolved against
//! foreign keys in both directions:
//!
//! - outgoing foreign keys are many-to-one candidates, matched by the
//!   referenced table name or by the FK column name;
//! - incoming foreign keys are one-to-many candidates, matched by the
//!   referencing table name;
//! - when no direct candidate matches, junction tables are searched for a
//!   many-to-many path.
//!
//! A self-referencing foreign key is a many-to-one path under its column
//! name and a one-to-many path under the table name.
//!
//! Relationship sets are computed per table and cached until invalidated.
//! Every invalidation starts a new cache generation; sets computed from an
//! older snapshot are returned to their caller but never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strata_core::{
    DatabaseSchema, ForeignKey, Junction, Relationship, RelationshipKind, TableSchema,
};
use tokio::sync::RwLock;

use crate::adapter::SchemaSource;
use crate::error::ResolveError;

/// Every relationship reachable from one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRelationships {
    /// Many-to-one and one-to-many paths.
    pub direct: Vec<Relationship>,
    /// Many-to-many paths through junction tables.
    pub junctions: Vec<Relationship>,
}

impl TableRelationships {
    fn references(&self, table: &str) -> bool {
        self.direct
            .iter()
            .chain(self.junctions.iter())
            .any(|rel| rel.references(table))
    }
}

/// Cached schema snapshot and per-table relationship sets.
#[derive(Debug, Default)]
pub struct RelationshipCache {
    schema: RwLock<Option<Arc<DatabaseSchema>>>,
    tables: RwLock<HashMap<String, Arc<TableRelationships>>>,
    /// Bumped while both locks are held for writing.
    generation: AtomicU64,
}

impl RelationshipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached relationship sets.
    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }

    /// Whether a set for `table` is cached.
    pub async fn contains(&self, table: &str) -> bool {
        self.tables.read().await.contains_key(table)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn advance(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resolves relation references to [`Relationship`]s.
pub struct RelationshipResolver {
    source: Arc<dyn SchemaSource>,
    cache: RelationshipCache,
}

impl RelationshipResolver {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            cache: RelationshipCache::new(),
        }
    }

    /// The cached schema snapshot, loading it on first use.
    pub async fn schema(&self) -> Result<Arc<DatabaseSchema>, ResolveError> {
        if let Some(schema) = self.cache.schema.read().await.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let generation = self.cache.generation();
        let loaded = Arc::new(self.source.load_schema().await.map_err(ResolveError::Schema)?);
        tracing::debug!(tables = loaded.tables.len(), "Loaded schema snapshot");

        let mut slot = self.cache.schema.write().await;
        if self.cache.generation() != generation {
            return Ok(loaded);
        }
        Ok(Arc::clone(slot.get_or_insert(loaded)))
    }

    /// Schema of one table.
    pub async fn table_schema(&self, table: &str) -> Result<TableSchema, ResolveError> {
        self.schema()
            .await?
            .get_table(table)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownTable(table.to_string()))
    }

    /// Every relationship reachable from `table`.
    pub async fn relationships(
        &self,
        table: &str,
    ) -> Result<Arc<TableRelationships>, ResolveError> {
        if let Some(cached) = self.cache.tables.read().await.get(table) {
            return Ok(Arc::clone(cached));
        }

        let generation = self.cache.generation();
        let schema = self.schema().await?;
        let set = Arc::new(build_relationships(&schema, table)?);
        tracing::debug!(
            table = %table,
            direct = set.direct.len(),
            junctions = set.junctions.len(),
            "Computed relationships"
        );

        let mut tables = self.cache.tables.write().await;
        if self.cache.generation() == generation {
            tables.insert(table.to_string(), Arc::clone(&set));
        } else {
            tracing::debug!(table = %table, "Schema invalidated while resolving, not caching");
        }
        Ok(set)
    }

    /// Resolve `name` (optionally disambiguated by `hint`) from `table`.
    pub async fn resolve(
        &self,
        table: &str,
        name: &str,
        hint: Option<&str>,
    ) -> Result<Relationship, ResolveError> {
        let set = self.relationships(table).await?;
        resolve_in(&set, table, name, hint)
    }

    /// Reload the schema snapshot and drop the cached set of `table`, every
    /// set that references it, and the sets of the tables it now references.
    ///
    /// Falls back to [`invalidate_all`](Self::invalidate_all) when the schema
    /// cannot be reloaded.
    pub async fn invalidate(&self, table: &str) {
        let fresh = match self.source.load_schema().await {
            Ok(schema) => Arc::new(schema),
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "Failed to reload schema, clearing relationship cache");
                self.invalidate_all().await;
                return;
            }
        };
        let referenced: Vec<String> = fresh
            .get_table(table)
            .map(|t| t.foreign_keys.iter().map(|fk| fk.foreign_table.clone()).collect())
            .unwrap_or_default();

        let mut schema = self.cache.schema.write().await;
        let mut tables = self.cache.tables.write().await;
        *schema = Some(fresh);
        self.cache.advance();
        tables.retain(|key, set| {
            key != table && !set.references(table) && !referenced.contains(key)
        });
        tracing::info!(table = %table, remaining = tables.len(), "Invalidated relationship cache");
    }

    /// Drop everything.
    pub async fn invalidate_all(&self) {
        let mut schema = self.cache.schema.write().await;
        let mut tables = self.cache.tables.write().await;
        *schema = None;
        self.cache.advance();
        tables.clear();
        tracing::info!("Cleared relationship cache");
    }

    pub fn cache(&self) -> &RelationshipCache {
        &self.cache
    }
}

/// Whether `table` qualifies as a junction: exactly two foreign keys to two
/// distinct tables, both FK columns part of the primary key.
pub fn is_junction(table: &TableSchema) -> bool {
    match table.foreign_keys.as_slice() {
        [a, b] => {
            a.foreign_table != b.foreign_table
                && table.is_primary_key(&a.column)
                && table.is_primary_key(&b.column)
        }
        _ => false,
    }
}

fn build_relationships(
    schema: &DatabaseSchema,
    table: &str,
) -> Result<TableRelationships, ResolveError> {
    let local = schema
        .get_table(table)
        .ok_or_else(|| ResolveError::UnknownTable(table.to_string()))?;

    let mut direct: Vec<Relationship> = local
        .foreign_keys
        .iter()
        .map(|fk| Relationship {
            kind: RelationshipKind::ManyToOne,
            local_table: table.to_string(),
            local_column: fk.column.clone(),
            foreign_table: fk.foreign_table.clone(),
            foreign_column: fk.foreign_column.clone(),
            junction: None,
            constraint_name: Some(fk.constraint_name.clone()),
        })
        .collect();

    let mut junctions = Vec::new();
    for other in schema.iter() {
        for fk in other.foreign_keys.iter().filter(|fk| fk.foreign_table == table) {
            direct.push(Relationship {
                kind: RelationshipKind::OneToMany,
                local_table: table.to_string(),
                local_column: fk.foreign_column.clone(),
                foreign_table: other.name.clone(),
                foreign_column: fk.column.clone(),
                junction: None,
                constraint_name: Some(fk.constraint_name.clone()),
            });
        }

        if other.name != table && is_junction(other) {
            if let Some(rel) = through_junction(other, table) {
                junctions.push(rel);
            }
        }
    }

    Ok(TableRelationships { direct, junctions })
}

fn through_junction(junction: &TableSchema, table: &str) -> Option<Relationship> {
    let (to_local, to_foreign): (&ForeignKey, &ForeignKey) = match junction.foreign_keys.as_slice()
    {
        [a, b] if a.foreign_table == table => (a, b),
        [a, b] if b.foreign_table == table => (b, a),
        _ => return None,
    };

    Some(Relationship {
        kind: RelationshipKind::ManyToMany,
        local_table: table.to_string(),
        local_column: to_local.foreign_column.clone(),
        foreign_table: to_foreign.foreign_table.clone(),
        foreign_column: to_foreign.foreign_column.clone(),
        junction: Some(Junction {
            table: junction.name.clone(),
            local_column: to_local.column.clone(),
            foreign_column: to_foreign.column.clone(),
            local_constraint: to_local.constraint_name.clone(),
            foreign_constraint: to_foreign.constraint_name.clone(),
        }),
        constraint_name: None,
    })
}

fn name_matches(rel: &Relationship, name: &str) -> bool {
    let self_reference = rel.local_table == rel.foreign_table;
    match rel.kind {
        RelationshipKind::ManyToOne => {
            rel.local_column == name || (!self_reference && rel.foreign_table == name)
        }
        RelationshipKind::OneToMany | RelationshipKind::ManyToMany => rel.foreign_table == name,
    }
}

fn resolve_in(
    set: &TableRelationships,
    table: &str,
    name: &str,
    hint: Option<&str>,
) -> Result<Relationship, ResolveError> {
    let direct: Vec<&Relationship> = set.direct.iter().filter(|r| name_matches(r, name)).collect();
    if !direct.is_empty() {
        return pick(table, name, hint, direct, direct_hint_keys, direct_hints);
    }

    let junctions: Vec<&Relationship> =
        set.junctions.iter().filter(|r| name_matches(r, name)).collect();
    if !junctions.is_empty() {
        return pick(table, name, hint, junctions, junction_hint_keys, junction_hints);
    }

    Err(ResolveError::UnknownRelation {
        table: table.to_string(),
        relation: name.to_string(),
    })
}

/// Choose one candidate. Each entry of `keys(rel)` is a tier of hint
/// spellings; tiers are tried in order and the first tier that selects
/// exactly one candidate wins.
fn pick(
    table: &str,
    name: &str,
    hint: Option<&str>,
    candidates: Vec<&Relationship>,
    keys: fn(&Relationship) -> Vec<Vec<String>>,
    hints: fn(&[&Relationship]) -> Vec<String>,
) -> Result<Relationship, ResolveError> {
    let Some(hint) = hint else {
        return match candidates.as_slice() {
            [only] => Ok((*only).clone()),
            _ => Err(ResolveError::Ambiguous {
                table: table.to_string(),
                relation: name.to_string(),
                hints: hints(&candidates),
            }),
        };
    };

    let tiers = candidates.iter().map(|c| keys(c).len()).max().unwrap_or(0);
    let mut any_match = false;
    for tier in 0..tiers {
        let matched: Vec<&&Relationship> = candidates
            .iter()
            .filter(|c| keys(c).get(tier).is_some_and(|k| k.iter().any(|k| k == hint)))
            .collect();
        match matched.as_slice() {
            [only] => return Ok((**only).clone()),
            [] => {}
            _ => any_match = true,
        }
    }

    if candidates.len() == 1 && !any_match {
        return Err(ResolveError::UnknownRelation {
            table: table.to_string(),
            relation: format!("{}!{}", name, hint),
        });
    }
    Err(ResolveError::Ambiguous {
        table: table.to_string(),
        relation: name.to_string(),
        hints: hints(&candidates),
    })
}

fn direct_hint_keys(rel: &Relationship) -> Vec<Vec<String>> {
    vec![
        rel.fk_column().map(str::to_string).into_iter().collect(),
        rel.constraint_name.clone().into_iter().collect(),
    ]
}

fn junction_hint_keys(rel: &Relationship) -> Vec<Vec<String>> {
    match &rel.junction {
        Some(j) => vec![
            vec![j.table.clone()],
            vec![j.local_column.clone(), j.foreign_column.clone()],
            vec![j.local_constraint.clone(), j.foreign_constraint.clone()],
        ],
        None => Vec::new(),
    }
}

/// FK columns, or constraint names when columns collide.
fn direct_hints(candidates: &[&Relationship]) -> Vec<String> {
    let columns: Vec<String> = candidates
        .iter()
        .filter_map(|c| c.fk_column().map(str::to_string))
        .collect();
    if has_duplicates(&columns) {
        candidates
            .iter()
            .filter_map(|c| c.constraint_name.clone())
            .collect()
    } else {
        columns
    }
}

fn junction_hints(candidates: &[&Relationship]) -> Vec<String> {
    candidates
        .iter()
        .filter_map(|c| c.junction.as_ref().map(|j| j.table.clone()))
        .collect()
}

fn has_duplicates(values: &[String]) -> bool {
    values
        .iter()
        .enumerate()
        .any(|(i, v)| values[i + 1..].contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StaticSchema;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture() -> DatabaseSchema {
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
            TableSchema::new("users")
                .column("id", "INTEGER")
                .column("username", "TEXT")
                .primary_key(&["id"]),
        );
        schema.add_table(
            TableSchema::new("messages")
                .column("id", "INTEGER")
                .column("body", "TEXT")
                .column("sender_id", "INTEGER")
                .column("receiver_id", "INTEGER")
                .primary_key(&["id"])
                .foreign_key("sender_id", "users", "id")
                .foreign_key("receiver_id", "users", "id"),
        );
        schema.add_table(
            TableSchema::new("posts")
                .column("id", "INTEGER")
                .column("title", "TEXT")
                .primary_key(&["id"]),
        );
        schema.add_table(
            TableSchema::new("tags")
                .column("id", "INTEGER")
                .column("name", "TEXT")
                .primary_key(&["id"]),
        );
        schema.add_table(
            TableSchema::new("post_tags")
                .column("post_id", "INTEGER")
                .column("tag_id", "INTEGER")
                .primary_key(&["post_id", "tag_id"])
                .foreign_key("post_id", "posts", "id")
                .foreign_key("tag_id", "tags", "id"),
        );
        // Two FKs to distinct tables, but a surrogate key: not a junction.
        schema.add_table(
            TableSchema::new("reviews")
                .column("id", "INTEGER")
                .column("post_id", "INTEGER")
                .column("user_id", "INTEGER")
                .primary_key(&["id"])
                .foreign_key("post_id", "posts", "id")
                .foreign_key("user_id", "users", "id"),
        );
        // Two FKs to distinct tables, only one of them in the key: not a junction.
        schema.add_table(
            TableSchema::new("bookmarks")
                .column("post_id", "INTEGER")
                .column("user_id", "INTEGER")
                .primary_key(&["post_id"])
                .foreign_key("post_id", "posts", "id")
                .foreign_key("user_id", "users", "id"),
        );
        schema.add_table(
            TableSchema::new("employees")
                .column("id", "INTEGER")
                .column("manager_id", "INTEGER")
                .primary_key(&["id"])
                .foreign_key("manager_id", "employees", "id"),
        );
        schema
    }

    fn resolver() -> RelationshipResolver {
        RelationshipResolver::new(Arc::new(StaticSchema::new(fixture())))
    }

    #[tokio::test]
    async fn test_many_to_one_and_one_to_many() {
        let r = resolver();
        let rel = r.resolve("cities", "countries", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
        assert_eq!(rel.local_column, "country_id");
        assert_eq!(rel.foreign_column, "id");

        let rel = r.resolve("cities", "country_id", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);

        let rel = r.resolve("countries", "cities", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
        assert_eq!(rel.local_column, "id");
        assert_eq!(rel.foreign_column, "country_id");
    }

    #[tokio::test]
    async fn test_ambiguous_requires_hint() {
        let r = resolver();
        let err = r.resolve("messages", "users", None).await.unwrap_err();
        match err {
            ResolveError::Ambiguous { hints, .. } => {
                assert_eq!(hints, vec!["sender_id".to_string(), "receiver_id".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        let sender = r.resolve("messages", "users", Some("sender_id")).await.unwrap();
        assert_eq!(sender.local_column, "sender_id");

        let receiver = r
            .resolve("messages", "users", Some("messages_receiver_id_fkey"))
            .await
            .unwrap();
        assert_eq!(receiver.local_column, "receiver_id");

        let err = r.resolve("messages", "users", Some("nope")).await.unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { .. }));
    }

    #[tokio::test]
    async fn test_reverse_ambiguity() {
        let r = resolver();
        assert!(matches!(
            r.resolve("users", "messages", None).await,
            Err(ResolveError::Ambiguous { .. })
        ));
        let rel = r.resolve("users", "messages", Some("receiver_id")).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
        assert_eq!(rel.foreign_column, "receiver_id");
    }

    #[tokio::test]
    async fn test_many_to_many_through_junction() {
        let r = resolver();
        let rel = r.resolve("posts", "tags", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToMany);
        let junction = rel.junction.unwrap();
        assert_eq!(junction.table, "post_tags");
        assert_eq!(junction.local_column, "post_id");
        assert_eq!(junction.foreign_column, "tag_id");

        let rel = r.resolve("tags", "posts", Some("post_tags")).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToMany);
    }

    #[tokio::test]
    async fn test_surrogate_key_table_is_not_a_junction() {
        let r = resolver();
        assert!(!is_junction(&fixture().get_table("reviews").unwrap().clone()));
        assert!(is_junction(&fixture().get_table("post_tags").unwrap().clone()));
        let err = r.resolve("posts", "users", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnknownRelation { .. }));
    }

    #[tokio::test]
    async fn test_partial_key_table_is_not_a_junction() {
        let r = resolver();
        assert!(!is_junction(fixture().get_table("bookmarks").unwrap()));

        let set = r.relationships("users").await.unwrap();
        assert!(set.junctions.is_empty());
        let err = r.resolve("users", "posts", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnknownRelation { .. }));

        // Still reachable as a plain one-to-many path.
        let rel = r.resolve("posts", "bookmarks", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
    }

    #[tokio::test]
    async fn test_self_reference() {
        let r = resolver();
        let parent = r.resolve("employees", "manager_id", None).await.unwrap();
        assert_eq!(parent.kind, RelationshipKind::ManyToOne);
        let reports = r.resolve("employees", "employees", None).await.unwrap();
        assert_eq!(reports.kind, RelationshipKind::OneToMany);
        assert_eq!(reports.foreign_column, "manager_id");
    }

    #[tokio::test]
    async fn test_unknown_table_and_relation() {
        let r = resolver();
        assert!(matches!(
            r.resolve("nope", "cities", None).await,
            Err(ResolveError::UnknownTable(_))
        ));
        assert!(matches!(
            r.resolve("cities", "tags", None).await,
            Err(ResolveError::UnknownRelation { .. })
        ));
        assert!(matches!(
            r.resolve("cities", "countries", Some("wrong")).await,
            Err(ResolveError::UnknownRelation { .. })
        ));
    }

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn load_schema(&self) -> anyhow::Result<DatabaseSchema> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(fixture())
        }
    }

    #[tokio::test]
    async fn test_cache_and_invalidation() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let r = RelationshipResolver::new(source.clone());

        r.resolve("cities", "countries", None).await.unwrap();
        r.resolve("countries", "continents", None).await.unwrap();
        r.resolve("posts", "tags", None).await.unwrap();
        r.resolve("cities", "countries", None).await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(r.cache().len().await, 3);

        // cities and countries reference countries; posts does not.
        r.invalidate("countries").await;
        assert_eq!(r.cache().len().await, 1);

        r.resolve("cities", "countries", None).await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        r.invalidate_all().await;
        assert!(r.cache().is_empty().await);
    }

    /// A schema that can change between loads, like a database under
    /// migration. The first load can be held open until released.
    struct MigratingSource {
        schema: std::sync::Mutex<DatabaseSchema>,
        loads: AtomicUsize,
        hold_first_load: bool,
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl MigratingSource {
        fn new(hold_first_load: bool) -> Self {
            Self {
                schema: std::sync::Mutex::new(fixture()),
                loads: AtomicUsize::new(0),
                hold_first_load,
                started: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            }
        }

        fn add_rivers(&self) {
            self.schema.lock().unwrap().add_table(
                TableSchema::new("rivers")
                    .column("id", "INTEGER")
                    .column("name", "TEXT")
                    .column("country_id", "INTEGER")
                    .primary_key(&["id"])
                    .foreign_key("country_id", "countries", "id"),
            );
        }
    }

    #[async_trait]
    impl SchemaSource for MigratingSource {
        async fn load_schema(&self) -> anyhow::Result<DatabaseSchema> {
            let snapshot = self.schema.lock().unwrap().clone();
            let first = self.loads.fetch_add(1, Ordering::SeqCst) == 0;
            if first && self.hold_first_load {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(snapshot)
        }
    }

    #[tokio::test]
    async fn test_invalidating_new_table_refreshes_referenced_tables() {
        let source = Arc::new(MigratingSource::new(false));
        let r = RelationshipResolver::new(source.clone());

        r.resolve("countries", "cities", None).await.unwrap();
        r.resolve("posts", "tags", None).await.unwrap();
        assert!(r.cache().contains("countries").await);

        source.add_rivers();
        r.invalidate("rivers").await;
        assert!(!r.cache().contains("countries").await);
        assert!(r.cache().contains("posts").await);

        let rel = r.resolve("countries", "rivers", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
        assert_eq!(rel.foreign_column, "country_id");
        let rel = r.resolve("rivers", "countries", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
    }

    #[tokio::test]
    async fn test_invalidation_during_resolution_is_not_overwritten() {
        let source = Arc::new(MigratingSource::new(true));
        let r = Arc::new(RelationshipResolver::new(source.clone()));

        let pending = tokio::spawn({
            let r = Arc::clone(&r);
            async move { r.relationships("countries").await }
        });
        source.started.notified().await;

        source.add_rivers();
        r.invalidate("rivers").await;
        source.release.notify_one();

        // The in-flight request finishes against the snapshot it started with.
        let stale = pending.await.unwrap().unwrap();
        assert!(stale.direct.iter().all(|rel| rel.foreign_table != "rivers"));
        assert!(!r.cache().contains("countries").await);

        let rel = r.resolve("countries", "rivers", None).await.unwrap();
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
    }
}
