//! Schema introspection for SQLite.
//!
//! Tables, columns and primary keys come from `sqlite_master` and
//! `pragma_table_info`. Foreign keys come from `pragma_foreign_key_list`;
//! their constraint names are not exposed by SQLite, so they are recovered
//! from the `CREATE TABLE` text.

use sqlparser::dialect::SQLiteDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use strata_core::schema::default_constraint_name;
use strata_core::{ColumnSchema, DatabaseSchema, ForeignKey, TableSchema};

/// A foreign key row as reported by `pragma_foreign_key_list`.
struct RawForeignKey {
    column: String,
    foreign_table: String,
    /// NULL when the reference targets the parent's primary key implicitly.
    foreign_column: Option<String>,
}

/// Introspect every user table into a schema snapshot.
///
/// Excludes SQLite's internal tables and `hidden`. Composite foreign keys
/// are skipped.
pub async fn introspect_schema(
    pool: &SqlitePool,
    hidden: &[String],
) -> anyhow::Result<DatabaseSchema> {
    let table_rows = sqlx::query(
        r#"
        select name, sql
        from sqlite_master
        where type = 'table'
          and name not like 'sqlite_%'
        order by name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut schema = DatabaseSchema::new();
    let mut pending: Vec<(String, RawForeignKey, String)> = Vec::new();

    for row in table_rows {
        let table_name: String = row.try_get("name")?;
        if hidden.iter().any(|h| h == &table_name) {
            continue;
        }
        let ddl: Option<String> = row.try_get("sql")?;
        let mut table = TableSchema::new(&table_name);

        // Columns
        let col_rows = sqlx::query(
            r#"
            select name, type, "notnull", dflt_value, pk
            from pragma_table_info(?)
            order by cid
            "#,
        )
        .bind(&table_name)
        .fetch_all(pool)
        .await?;

        let mut key_columns: Vec<(i64, String)> = Vec::new();
        for c in col_rows {
            let name: String = c.try_get("name")?;
            let data_type: String = c.try_get("type")?;
            let not_null: i64 = c.try_get("notnull")?;
            let default: Option<String> = c.try_get("dflt_value")?;
            let pk: i64 = c.try_get("pk")?;

            if pk > 0 {
                key_columns.push((pk, name.clone()));
            }
            table.columns.push(ColumnSchema {
                name,
                data_type,
                nullable: not_null == 0 && pk == 0,
                default,
            });
        }
        key_columns.sort();
        table.primary_key = key_columns.into_iter().map(|(_, name)| name).collect();

        // Foreign keys, grouped by constraint id
        let fk_rows = sqlx::query(
            r#"
            select id, "table", "from", "to"
            from pragma_foreign_key_list(?)
            order by id, seq
            "#,
        )
        .bind(&table_name)
        .fetch_all(pool)
        .await?;

        let mut by_id: BTreeMap<i64, Vec<RawForeignKey>> = BTreeMap::new();
        for f in fk_rows {
            let id: i64 = f.try_get("id")?;
            by_id.entry(id).or_default().push(RawForeignKey {
                column: f.try_get("from")?,
                foreign_table: f.try_get("table")?,
                foreign_column: f.try_get("to")?,
            });
        }

        let names = ddl.as_deref().map(constraint_names).unwrap_or_default();
        for (_, mut parts) in by_id {
            if parts.len() != 1 {
                tracing::debug!(
                    table = %table_name,
                    columns = parts.len(),
                    "Skipping composite foreign key"
                );
                continue;
            }
            let fk = parts.remove(0);
            let constraint = names
                .get(&fk.column.to_lowercase())
                .cloned()
                .unwrap_or_else(|| default_constraint_name(&table_name, &fk.column));
            pending.push((table_name.clone(), fk, constraint));
        }

        schema.add_table(table);
    }

    // Implicit references need the parent's primary key, so they resolve
    // once every table is known.
    for (table_name, fk, constraint) in pending {
        let foreign_column = match fk.foreign_column {
            Some(column) => Some(column),
            None => schema
                .get_table(&fk.foreign_table)
                .filter(|parent| parent.primary_key.len() == 1)
                .map(|parent| parent.primary_key[0].clone()),
        };
        let Some(foreign_column) = foreign_column else {
            tracing::debug!(
                table = %table_name,
                column = %fk.column,
                foreign_table = %fk.foreign_table,
                "Skipping foreign key without a single referenced column"
            );
            continue;
        };
        if let Some(table) = schema.tables.get_mut(&table_name) {
            table.foreign_keys.push(
                ForeignKey::new(&table_name, &fk.column, &fk.foreign_table, &foreign_column)
                    .named(constraint),
            );
        }
    }

    tracing::debug!(tables = schema.tables.len(), "Introspected SQLite schema");
    Ok(schema)
}

/// Declared foreign key constraint names from `CREATE TABLE` text, keyed by
/// the lower-cased referencing column.
///
/// Handles table constraints (`CONSTRAINT n FOREIGN KEY (col) REFERENCES ..`)
/// and column constraints (`col INTEGER CONSTRAINT n REFERENCES ..`).
pub fn constraint_names(ddl: &str) -> HashMap<String, String> {
    let dialect = SQLiteDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, ddl).tokenize() else {
        return HashMap::new();
    };
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    let mut names = HashMap::new();
    for item in definitions(&tokens) {
        let Some(pos) = item.iter().position(|t| is_keyword(t, "CONSTRAINT")) else {
            continue;
        };
        let Some(name) = item.get(pos + 1).and_then(identifier) else {
            continue;
        };
        let rest = &item[pos + 2..];

        match rest {
            [foreign, key, Token::LParen, column, Token::RParen, ..]
                if is_keyword(foreign, "FOREIGN") && is_keyword(key, "KEY") =>
            {
                if let Some(column) = identifier(column) {
                    names.insert(column.to_lowercase(), name);
                }
            }
            [references, ..] if pos > 0 && is_keyword(references, "REFERENCES") => {
                if let Some(column) = item.first().and_then(identifier) {
                    names.insert(column.to_lowercase(), name);
                }
            }
            _ => {}
        }
    }
    names
}

/// The comma-separated definitions inside the outermost parentheses.
fn definitions(tokens: &[Token]) -> Vec<&[Token]> {
    let Some(open) = tokens.iter().position(|t| matches!(t, Token::LParen)) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = open + 1;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    items.push(&tokens[start..i]);
                    break;
                }
            }
            Token::Comma if depth == 1 => {
                items.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items
}

fn is_keyword(token: &Token, keyword: &str) -> bool {
    matches!(token, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
}

fn identifier(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) => Some(w.value.clone()),
        Token::SingleQuotedString(s) | Token::DoubleQuotedString(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool(ddl: &[&str]) -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for statement in ddl {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        pool
    }

    #[test]
    fn test_constraint_names() {
        let ddl = r#"CREATE TABLE messages (
            id INTEGER PRIMARY KEY,
            sender_id INTEGER CONSTRAINT fk_sender REFERENCES users(id),
            receiver_id INTEGER,
            body TEXT DEFAULT ('x,y'),
            CONSTRAINT "fk_receiver" FOREIGN KEY (receiver_id) REFERENCES users (id)
        )"#;
        let names = constraint_names(ddl);
        assert_eq!(names.len(), 2);
        assert_eq!(names["sender_id"], "fk_sender");
        assert_eq!(names["receiver_id"], "fk_receiver");
    }

    #[test]
    fn test_unnamed_constraints() {
        let ddl = "CREATE TABLE cities (id INTEGER PRIMARY KEY, country_id INTEGER REFERENCES countries(id))";
        assert!(constraint_names(ddl).is_empty());
    }

    #[tokio::test]
    async fn test_introspect_schema() {
        let pool = pool(&[
            "CREATE TABLE countries (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            "CREATE TABLE cities (id INTEGER PRIMARY KEY, name TEXT, country_id INTEGER REFERENCES countries)",
            "CREATE TABLE users (id INTEGER PRIMARY KEY)",
            "CREATE TABLE messages (id INTEGER PRIMARY KEY, sender_id INTEGER CONSTRAINT fk_sender REFERENCES users(id), receiver_id INTEGER REFERENCES users(id))",
            "CREATE TABLE post_tags (post_id INTEGER, tag_id INTEGER, PRIMARY KEY (post_id, tag_id))",
            "CREATE TABLE strata_policies (table_name TEXT)",
        ])
        .await;

        let schema = introspect_schema(&pool, &["strata_policies".to_string()])
            .await
            .unwrap();

        assert!(schema.get_table("strata_policies").is_none());

        let countries = schema.get_table("countries").unwrap();
        assert_eq!(countries.primary_key, vec!["id"]);
        assert!(!countries.get_column("name").unwrap().nullable);

        let cities = schema.get_table("cities").unwrap();
        assert_eq!(
            cities.foreign_keys,
            vec![ForeignKey::new("cities", "country_id", "countries", "id")]
        );

        let messages = schema.get_table("messages").unwrap();
        let mut constraints: Vec<&str> = messages
            .foreign_keys
            .iter()
            .map(|fk| fk.constraint_name.as_str())
            .collect();
        constraints.sort();
        assert_eq!(constraints, vec!["fk_sender", "messages_receiver_id_fkey"]);

        let post_tags = schema.get_table("post_tags").unwrap();
        assert_eq!(post_tags.primary_key, vec!["post_id", "tag_id"]);
    }

    #[tokio::test]
    async fn test_composite_foreign_keys_are_skipped() {
        let pool = pool(&[
            "CREATE TABLE parents (a INTEGER, b INTEGER, PRIMARY KEY (a, b))",
            "CREATE TABLE children (id INTEGER PRIMARY KEY, a INTEGER, b INTEGER, FOREIGN KEY (a, b) REFERENCES parents (a, b))",
        ])
        .await;

        let schema = introspect_schema(&pool, &[]).await.unwrap();
        assert!(schema.get_table("children").unwrap().foreign_keys.is_empty());
    }
}
