//! Pure SQL statement builders.
//!
//! Every function emits a single statement ending in `;` and is
//! deterministic: identical inputs produce byte-identical output. Table
//! names are split on `.` with each part double-quoted; column names are
//! always double-quoted.

use crate::{CrateDbError, Result, Value};

/// Strictness mode of an OBJECT column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectMode {
    Strict,
    Dynamic,
    Ignored,
}

impl ObjectMode {
    fn keyword(self) -> &'static str {
        match self {
            Self::Strict => "STRICT",
            Self::Dynamic => "DYNAMIC",
            Self::Ignored => "IGNORED",
        }
    }
}

#[derive(Clone, Debug)]
enum ColumnKind {
    Scalar(String),
    Object {
        mode: Option<ObjectMode>,
        properties: Vec<(String, ColumnDef)>,
    },
}

/// A column definition for `create_table`.
#[derive(Clone, Debug)]
pub struct ColumnDef {
    kind: ColumnKind,
    not_null: bool,
    default_value: Option<Value>,
    generated_always: Option<String>,
    stored: bool,
    primary_key: bool,
}

impl ColumnDef {
    /// A scalar column of the given SQL type, e.g. `"TEXT"` or `"BIGINT"`.
    pub fn scalar(sql_type: impl Into<String>) -> Self {
        Self {
            kind: ColumnKind::Scalar(sql_type.into()),
            not_null: false,
            default_value: None,
            generated_always: None,
            stored: false,
            primary_key: false,
        }
    }

    /// An OBJECT column, optionally with a strictness mode.
    pub fn object(mode: Option<ObjectMode>) -> Self {
        Self {
            kind: ColumnKind::Object {
                mode,
                properties: Vec::new(),
            },
            not_null: false,
            default_value: None,
            generated_always: None,
            stored: false,
            primary_key: false,
        }
    }

    /// Adds a nested property to an OBJECT column. No effect on scalars.
    pub fn property(mut self, name: impl Into<String>, def: ColumnDef) -> Self {
        if let ColumnKind::Object { properties, .. } = &mut self.kind {
            properties.push((name.into(), def));
        }
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Marks the column as `GENERATED ALWAYS AS (<expression>)`.
    pub fn generated_always(mut self, expression: impl Into<String>) -> Self {
        self.generated_always = Some(expression.into());
        self
    }

    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Table-level clauses for `create_table`.
#[derive(Clone, Debug, Default)]
pub struct TableOptions {
    pub partitioned_by: Vec<String>,
    pub clustered_by: Option<String>,
    pub shards: Option<u32>,
    pub replicas: Option<String>,
}

/// `CREATE TABLE` with columns, aggregated primary key, and optional
/// partitioning, clustering, and replication clauses.
pub fn create_table(
    table: &str,
    columns: &[(&str, ColumnDef)],
    options: Option<&TableOptions>,
) -> Result<String> {
    let mut parts = Vec::with_capacity(columns.len() + 1);
    let mut primary_keys = Vec::new();
    for (name, def) in columns {
        parts.push(render_column(name, def)?);
        if def.primary_key {
            primary_keys.push(quote_ident(name));
        }
    }
    if !primary_keys.is_empty() {
        parts.push(format!("PRIMARY KEY({})", primary_keys.join(", ")));
    }

    let mut sql = format!("CREATE TABLE {} ({})", quote_table(table), parts.join(", "));
    if let Some(options) = options {
        if !options.partitioned_by.is_empty() {
            let cols: Vec<String> = options
                .partitioned_by
                .iter()
                .map(|name| quote_ident(name))
                .collect();
            sql.push_str(&format!(" PARTITIONED BY ({})", cols.join(", ")));
        }
        match (&options.clustered_by, options.shards) {
            (Some(column), Some(shards)) => {
                sql.push_str(&format!(
                    " CLUSTERED BY ({}) INTO {shards} SHARDS",
                    quote_ident(column)
                ));
            }
            (Some(column), None) => {
                sql.push_str(&format!(" CLUSTERED BY ({})", quote_ident(column)));
            }
            (None, Some(shards)) => {
                sql.push_str(&format!(" CLUSTERED INTO {shards} SHARDS"));
            }
            (None, None) => {}
        }
        if let Some(replicas) = &options.replicas {
            sql.push_str(&format!(
                " WITH (number_of_replicas='{}')",
                escape_single_quotes(replicas)
            ));
        }
    }
    sql.push(';');
    Ok(sql)
}

fn render_column(name: &str, def: &ColumnDef) -> Result<String> {
    if def.default_value.is_some() && def.generated_always.is_some() {
        return Err(CrateDbError::Validation(format!(
            "column '{name}' cannot combine a default value with a generated expression"
        )));
    }
    match &def.kind {
        ColumnKind::Scalar(sql_type) => {
            let mut sql = format!("{} {sql_type}", quote_ident(name));
            if let Some(expression) = &def.generated_always {
                sql.push_str(&format!(" GENERATED ALWAYS AS ({expression})"));
                if def.stored {
                    sql.push_str(" STORED");
                }
            }
            if let Some(default) = &def.default_value {
                sql.push_str(&format!(" DEFAULT {}", sql_literal(default)));
            }
            if def.not_null {
                sql.push_str(" NOT NULL");
            }
            Ok(sql)
        }
        ColumnKind::Object { mode, properties } => {
            let mut sql = format!("{} OBJECT", quote_ident(name));
            if let Some(mode) = mode {
                sql.push_str(&format!("({})", mode.keyword()));
            }
            let children: Vec<String> = properties
                .iter()
                .map(|(child, child_def)| render_column(child, child_def))
                .collect::<Result<_>>()?;
            sql.push_str(&format!(" AS ({})", children.join(", ")));
            if def.not_null {
                sql.push_str(" NOT NULL");
            }
            Ok(sql)
        }
    }
}

/// `INSERT` with either a primary-key upsert clause or a no-op conflict
/// policy when no primary keys are given.
pub fn insert(table: &str, keys: &[&str], primary_keys: Option<&[&str]>) -> String {
    let columns: Vec<String> = keys.iter().map(|key| quote_ident(key)).collect();
    let placeholders: Vec<&str> = keys.iter().map(|_| "?").collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_table(table),
        columns.join(", "),
        placeholders.join(", ")
    );

    let primary_keys = primary_keys.unwrap_or_default();
    let updates: Vec<String> = keys
        .iter()
        .copied()
        .filter(|key| !primary_keys.contains(key))
        .map(|key| format!("{} = excluded.{}", quote_ident(key), quote_ident(key)))
        .collect();

    if primary_keys.is_empty() || updates.is_empty() {
        sql.push_str(" ON CONFLICT DO NOTHING");
    } else {
        let conflict_cols: Vec<String> = primary_keys
            .iter()
            .map(|key| quote_ident(key))
            .collect();
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            conflict_cols.join(", "),
            updates.join(", ")
        ));
    }
    sql.push(';');
    sql
}

/// `UPDATE` with parameter placeholders per column.
///
/// The `where` clause is interpolated verbatim; the caller owns the safety
/// of anything spliced into it.
pub fn update(table: &str, columns: &[&str], where_clause: &str) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .map(|column| format!("{}=?", quote_ident(column)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {where_clause};",
        quote_table(table),
        assignments.join(", ")
    )
}

/// `DELETE` with a verbatim `where` clause (caller owns its safety).
pub fn delete(table: &str, where_clause: &str) -> String {
    format!("DELETE FROM {} WHERE {where_clause};", quote_table(table))
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", quote_table(table))
}

pub fn refresh(table: &str) -> String {
    format!("REFRESH TABLE {};", quote_table(table))
}

/// `OPTIMIZE` with optional `WITH` options and `PARTITION` filters. String
/// values are quoted, numeric values are emitted raw.
pub fn optimize(
    table: &str,
    options: Option<&[(&str, Value)]>,
    partitions: Option<&[(&str, Value)]>,
) -> String {
    let mut sql = format!("OPTIMIZE TABLE {}", quote_table(table));
    if let Some(options) = options.filter(|options| !options.is_empty()) {
        sql.push_str(&format!(" WITH ({})", render_kv_pairs(options)));
    }
    if let Some(partitions) = partitions.filter(|partitions| !partitions.is_empty()) {
        sql.push_str(&format!(" PARTITION ({})", render_kv_pairs(partitions)));
    }
    sql.push(';');
    sql
}

/// Probe for the primary-key column names of a table, ordered by ordinal
/// position. Takes two parameters: schema and table name.
pub fn primary_keys() -> &'static str {
    "SELECT column_name FROM information_schema.key_column_usage \
     WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position;"
}

fn render_kv_pairs(pairs: &[(&str, Value)]) -> String {
    let rendered: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", sql_literal(value)))
        .collect();
    rendered.join(", ")
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(value) => value.to_string(),
        Value::BigInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Text(value) => format!("'{}'", escape_single_quotes(value)),
        Value::Timestamp(value) => value.timestamp_millis().to_string(),
        other => format!("'{}'", escape_single_quotes(&format!("{other:?}"))),
    }
}

fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', "''")
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_quote_each_dotted_part() {
        assert_eq!(quote_table("doc.users"), "\"doc\".\"users\"");
        assert_eq!(quote_table("users"), "\"users\"");
    }

    #[test]
    fn create_table_with_primary_key_and_options() {
        let sql = create_table(
            "doc.readings",
            &[
                ("id", ColumnDef::scalar("BIGINT").primary_key()),
                ("day", ColumnDef::scalar("TIMESTAMP WITH TIME ZONE").not_null()),
                ("value", ColumnDef::scalar("DOUBLE PRECISION")),
            ],
            Some(&TableOptions {
                partitioned_by: vec!["day".to_owned()],
                clustered_by: Some("id".to_owned()),
                shards: Some(6),
                replicas: Some("0-1".to_owned()),
            }),
        )
        .expect("must build");
        assert_eq!(
            sql,
            "CREATE TABLE \"doc\".\"readings\" (\"id\" BIGINT, \
             \"day\" TIMESTAMP WITH TIME ZONE NOT NULL, \
             \"value\" DOUBLE PRECISION, PRIMARY KEY(\"id\")) \
             PARTITIONED BY (\"day\") CLUSTERED BY (\"id\") INTO 6 SHARDS \
             WITH (number_of_replicas='0-1');"
        );
    }

    #[test]
    fn create_table_with_nested_object_columns() {
        let sql = create_table(
            "events",
            &[
                ("id", ColumnDef::scalar("INT").primary_key()),
                (
                    "payload",
                    ColumnDef::object(Some(ObjectMode::Strict))
                        .property("kind", ColumnDef::scalar("TEXT"))
                        .property(
                            "detail",
                            ColumnDef::object(None)
                                .property("note", ColumnDef::scalar("TEXT")),
                        ),
                ),
            ],
            None,
        )
        .expect("must build");
        assert_eq!(
            sql,
            "CREATE TABLE \"events\" (\"id\" INT, \
             \"payload\" OBJECT(STRICT) AS (\"kind\" TEXT, \
             \"detail\" OBJECT AS (\"note\" TEXT)), PRIMARY KEY(\"id\"));"
        );
    }

    #[test]
    fn generated_column_renders_expression_and_stored() {
        let sql = create_table(
            "t",
            &[
                ("ts", ColumnDef::scalar("TIMESTAMP WITH TIME ZONE")),
                (
                    "day",
                    ColumnDef::scalar("TIMESTAMP WITH TIME ZONE")
                        .generated_always("date_trunc('day', ts)")
                        .stored(),
                ),
            ],
            None,
        )
        .expect("must build");
        assert_eq!(
            sql,
            "CREATE TABLE \"t\" (\"ts\" TIMESTAMP WITH TIME ZONE, \
             \"day\" TIMESTAMP WITH TIME ZONE \
             GENERATED ALWAYS AS (date_trunc('day', ts)) STORED);"
        );
    }

    #[test]
    fn default_and_generated_together_are_rejected() {
        let err = create_table(
            "t",
            &[(
                "c",
                ColumnDef::scalar("INT")
                    .default_value(1)
                    .generated_always("1 + 1"),
            )],
            None,
        )
        .expect_err("must fail");
        assert!(matches!(err, CrateDbError::Validation(_)));
    }

    #[test]
    fn default_value_renders_as_literal() {
        let sql = create_table(
            "t",
            &[("name", ColumnDef::scalar("TEXT").default_value("n/a").not_null())],
            None,
        )
        .expect("must build");
        assert_eq!(
            sql,
            "CREATE TABLE \"t\" (\"name\" TEXT DEFAULT 'n/a' NOT NULL);"
        );
    }

    #[test]
    fn insert_with_primary_keys_builds_upsert() {
        let sql = insert("doc.users", &["id", "name", "email"], Some(&["id"]));
        assert_eq!(
            sql,
            "INSERT INTO \"doc\".\"users\" (\"id\", \"name\", \"email\") \
             VALUES (?, ?, ?) ON CONFLICT (\"id\") DO UPDATE SET \
             \"name\" = excluded.\"name\", \"email\" = excluded.\"email\";"
        );
    }

    #[test]
    fn insert_without_primary_keys_is_do_nothing() {
        let expected = "INSERT INTO \"users\" (\"id\") VALUES (?) ON CONFLICT DO NOTHING;";
        assert_eq!(insert("users", &["id"], None), expected);
        assert_eq!(insert("users", &["id"], Some(&[])), expected);
    }

    #[test]
    fn insert_where_every_column_is_a_key_falls_back_to_do_nothing() {
        let sql = insert("users", &["id"], Some(&["id"]));
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\") VALUES (?) ON CONFLICT DO NOTHING;"
        );
    }

    #[test]
    fn update_interpolates_where_verbatim() {
        let sql = update("users", &["name", "age"], "id = 1");
        assert_eq!(sql, "UPDATE \"users\" SET \"name\"=?, \"age\"=? WHERE id = 1;");
    }

    #[test]
    fn delete_drop_refresh() {
        assert_eq!(delete("users", "id = 1"), "DELETE FROM \"users\" WHERE id = 1;");
        assert_eq!(drop_table("doc.users"), "DROP TABLE IF EXISTS \"doc\".\"users\";");
        assert_eq!(refresh("users"), "REFRESH TABLE \"users\";");
    }

    #[test]
    fn optimize_quotes_strings_and_leaves_numbers_raw() {
        let sql = optimize(
            "doc.parted",
            Some(&[("max_num_segments", Value::from(1))]),
            Some(&[("day", Value::from("2023-06-01"))]),
        );
        assert_eq!(
            sql,
            "OPTIMIZE TABLE \"doc\".\"parted\" WITH (max_num_segments=1) \
             PARTITION (day='2023-06-01');"
        );
    }

    #[test]
    fn optimize_without_clauses() {
        assert_eq!(optimize("t", None, None), "OPTIMIZE TABLE \"t\";");
        assert_eq!(optimize("t", Some(&[]), None), "OPTIMIZE TABLE \"t\";");
    }

    #[test]
    fn identifier_quotes_are_escaped() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn string_literals_escape_single_quotes() {
        let sql = optimize("t", None, Some(&[("p", Value::from("it's"))]));
        assert_eq!(sql, "OPTIMIZE TABLE \"t\" PARTITION (p='it''s');");
    }

    #[test]
    fn generators_are_deterministic() {
        let first = insert("doc.users", &["id", "name"], Some(&["id"]));
        let second = insert("doc.users", &["id", "name"], Some(&["id"]));
        assert_eq!(first, second);
    }
}
