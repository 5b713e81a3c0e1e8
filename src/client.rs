use std::{fmt, sync::Arc, time::Instant};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    config::{ClientConfig, RowMode},
    cursor::{self, Cursor, RowStream},
    serializer, statement,
    statement::{ColumnDef, TableOptions},
    transport::{RawExchange, Transport},
    types::{BulkResponse, BulkResult, Durations, QueryResponse, Record, Rows, ServerErrorInfo},
    value::Args,
    wire::SqlRequest,
    CrateDbError, Result, Value,
};

/// Default batch size for [`CrateDbClient::stream_query`].
pub const DEFAULT_STREAM_BATCH_SIZE: u32 = 100;

/// Per-call overlay. Never mutates the client configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecuteOptions {
    pub row_mode: Option<RowMode>,
}

impl ExecuteOptions {
    pub fn row_mode(mode: RowMode) -> Self {
        Self {
            row_mode: Some(mode),
        }
    }
}

/// Client for CrateDB's HTTP SQL endpoint.
///
/// Cheap to clone; all clones share the same connection pool. Multiple
/// concurrent calls are safe, each acquiring a pooled connection
/// independently up to `max_connections`.
#[derive(Clone)]
pub struct CrateDbClient {
    config: Arc<ClientConfig>,
    transport: Arc<Transport>,
}

impl fmt::Debug for CrateDbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrateDbClient")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("user", &self.config.user)
            .field("password", &"<redacted>")
            .field("jwt", &self.config.jwt.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CrateDbClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Transport::new(&config, config.max_connections)?;
        Ok(Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
        })
    }

    /// Connects with defaults, environment variables, and nothing else.
    pub fn connect() -> Result<Self> {
        Self::new(ClientConfig::builder().build()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Executes a single, optionally parameterized statement.
    pub async fn execute<A: Into<Args>>(&self, stmt: &str, args: A) -> Result<QueryResponse> {
        self.execute_with(stmt, args, ExecuteOptions::default())
            .await
    }

    /// Executes a single statement with a per-call options overlay.
    pub async fn execute_with<A: Into<Args>>(
        &self,
        stmt: &str,
        args: A,
        options: ExecuteOptions,
    ) -> Result<QueryResponse> {
        let args = args.into();
        let request = SqlRequest::with_args(stmt, &args.0);
        let exchange = self.transport.send(&request).await?;
        let row_mode = options.row_mode.unwrap_or(self.config.row_mode);
        self.decode_query(exchange, row_mode)
    }

    /// Executes a batched statement. The response is always in array row
    /// mode; failed sub-operations are indexed by `bulk_errors`.
    pub async fn execute_many(
        &self,
        stmt: &str,
        bulk_args: &[Vec<Value>],
    ) -> Result<BulkResponse> {
        let request = SqlRequest::with_bulk_args(stmt, bulk_args);
        let exchange = self.transport.send(&request).await?;
        self.decode_bulk(exchange)
    }

    /// Inserts one record, with primary-key upsert semantics when
    /// `primary_keys` is non-empty and a conflict no-op otherwise.
    pub async fn insert<I, K>(
        &self,
        table: &str,
        record: I,
        primary_keys: Option<&[&str]>,
    ) -> Result<QueryResponse>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        validate_table(table)?;
        let record: Vec<(String, Value)> = record
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        if record.is_empty() {
            return Err(CrateDbError::Validation(
                "insert requires at least one column".to_owned(),
            ));
        }
        let keys: Vec<&str> = record.iter().map(|(key, _)| key.as_str()).collect();
        let sql = statement::insert(table, &keys, primary_keys);
        let args: Vec<Value> = record.into_iter().map(|(_, value)| value).collect();
        self.execute(&sql, args).await
    }

    /// Bulk insert. Computes the union of keys across all records in
    /// first-seen order and aligns each record's positional args with that
    /// union, padding absent keys with null.
    pub async fn insert_many<R, I, K>(
        &self,
        table: &str,
        records: R,
        primary_keys: Option<&[&str]>,
    ) -> Result<BulkResponse>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let started = Instant::now();
        validate_table(table)?;
        let records: Vec<Vec<(String, Value)>> = records
            .into_iter()
            .map(|record| {
                record
                    .into_iter()
                    .map(|(key, value)| (key.into(), value))
                    .collect()
            })
            .collect();
        if records.is_empty() {
            return Err(CrateDbError::Validation(
                "insert_many requires at least one record".to_owned(),
            ));
        }

        let keys = key_union(&records);
        let bulk_args = align_bulk_args(records, &keys);
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let sql = statement::insert(table, &key_refs, primary_keys);

        let mut response = self.execute_many(&sql, &bulk_args).await?;
        let total = started.elapsed().as_secs_f64() * 1_000.0;
        response.durations.total = Some(total);
        response.durations.preparation =
            Some((total - response.durations.request - response.durations.cratedb).max(0.0));
        Ok(response)
    }

    /// Updates rows matching the verbatim `where` clause. The caller owns
    /// the safety of anything interpolated into that clause.
    pub async fn update<I, K>(
        &self,
        table: &str,
        values: I,
        where_clause: &str,
    ) -> Result<QueryResponse>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        validate_table(table)?;
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        if values.is_empty() {
            return Err(CrateDbError::Validation(
                "update requires at least one column".to_owned(),
            ));
        }
        let columns: Vec<&str> = values.iter().map(|(key, _)| key.as_str()).collect();
        let sql = statement::update(table, &columns, where_clause);
        let args: Vec<Value> = values.into_iter().map(|(_, value)| value).collect();
        self.execute(&sql, args).await
    }

    /// Deletes rows matching the verbatim `where` clause (caller-owned).
    pub async fn delete(&self, table: &str, where_clause: &str) -> Result<QueryResponse> {
        validate_table(table)?;
        self.execute(&statement::delete(table, where_clause), ())
            .await
    }

    pub async fn drop_table(&self, table: &str) -> Result<QueryResponse> {
        validate_table(table)?;
        self.execute(&statement::drop_table(table), ()).await
    }

    pub async fn refresh(&self, table: &str) -> Result<QueryResponse> {
        validate_table(table)?;
        self.execute(&statement::refresh(table), ()).await
    }

    pub async fn create_table(
        &self,
        table: &str,
        columns: &[(&str, ColumnDef)],
        options: Option<&TableOptions>,
    ) -> Result<QueryResponse> {
        validate_table(table)?;
        let sql = statement::create_table(table, columns, options)?;
        self.execute(&sql, ()).await
    }

    pub async fn optimize(
        &self,
        table: &str,
        options: Option<&[(&str, Value)]>,
        partitions: Option<&[(&str, Value)]>,
    ) -> Result<QueryResponse> {
        validate_table(table)?;
        self.execute(&statement::optimize(table, options, partitions), ())
            .await
    }

    /// Returns the primary-key column names of `schema.table` in ordinal
    /// position order. The schema defaults to `doc` when the table name has
    /// no dotted prefix.
    pub async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        validate_table(table)?;
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => ("doc", table),
        };
        let response = self
            .execute_with(
                statement::primary_keys(),
                [Value::from(schema), Value::from(name)],
                ExecuteOptions::row_mode(RowMode::Array),
            )
            .await?;
        let rows = match response.rows {
            Rows::Columns(rows) => rows,
            Rows::Keyed(_) => Vec::new(),
        };
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(Value::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }

    /// Lazily streams rows through a server-side cursor with the default
    /// batch size. The cursor is closed on completion, error, or when the
    /// consumer drops the stream.
    pub fn stream_query(&self, sql: &str) -> RowStream {
        self.stream_query_with(sql, DEFAULT_STREAM_BATCH_SIZE)
    }

    /// Same as [`stream_query`](Self::stream_query) with an explicit batch
    /// size.
    pub fn stream_query_with(&self, sql: &str, batch_size: u32) -> RowStream {
        cursor::spawn_stream(Arc::clone(&self.config), sql.to_owned(), batch_size)
    }

    /// Constructs an unopened server-side cursor for `sql`.
    pub fn cursor(&self, sql: &str) -> Cursor {
        Cursor::new(Arc::clone(&self.config), sql.to_owned())
    }

    fn decode_query(&self, exchange: RawExchange, row_mode: RowMode) -> Result<QueryResponse> {
        let envelope = serializer::decode_body(&exchange.body)?;
        let col_types = serializer::parse_col_types(&envelope.col_types)?;
        let rows = serializer::convert_rows(
            envelope.rows,
            &col_types,
            &self.config.deserialization,
        )?;
        let rows = reshape_rows(rows, &envelope.cols, row_mode);
        Ok(QueryResponse {
            cols: envelope.cols,
            col_types,
            rows,
            rowcount: envelope.rowcount.unwrap_or(0),
            duration: envelope.duration,
            durations: durations(envelope.duration, exchange.elapsed_ms),
            sizes: exchange.sizes,
        })
    }

    fn decode_bulk(&self, exchange: RawExchange) -> Result<BulkResponse> {
        let envelope = serializer::decode_body(&exchange.body)?;
        let col_types = serializer::parse_col_types(&envelope.col_types)?;
        let results: Vec<BulkResult> = envelope
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|result| BulkResult {
                rowcount: result.rowcount,
                error: result.error.map(|error| ServerErrorInfo {
                    message: error.message,
                    code: error.code,
                }),
            })
            .collect();
        let bulk_errors = derive_bulk_errors(&results);
        if !bulk_errors.is_empty() {
            debug!(failed = bulk_errors.len(), "bulk statement had failed sub-operations");
        }
        Ok(BulkResponse {
            cols: envelope.cols,
            col_types,
            results,
            bulk_errors,
            duration: envelope.duration,
            durations: durations(envelope.duration, exchange.elapsed_ms),
            sizes: exchange.sizes,
        })
    }
}

fn validate_table(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        return Err(CrateDbError::Validation(
            "table name must not be empty".to_owned(),
        ));
    }
    Ok(())
}

fn durations(server_ms: f64, elapsed_ms: f64) -> Durations {
    Durations {
        cratedb: server_ms,
        request: (elapsed_ms - server_ms).max(0.0),
        preparation: None,
        total: None,
    }
}

/// The server's per-row error sentinel in bulk results.
const BULK_ERROR_ROWCOUNT: i64 = -2;

fn derive_bulk_errors(results: &[BulkResult]) -> Vec<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, result)| result.rowcount == BULK_ERROR_ROWCOUNT)
        .map(|(index, _)| index)
        .collect()
}

fn reshape_rows(rows: Vec<Vec<Value>>, cols: &[String], row_mode: RowMode) -> Rows {
    match row_mode {
        RowMode::Array => Rows::Columns(rows),
        RowMode::Object => Rows::Keyed(rows.into_iter().map(|row| keyed_row(row, cols)).collect()),
    }
}

pub(crate) fn keyed_row(row: Vec<Value>, cols: &[String]) -> Record {
    cols.iter().cloned().zip(row).collect::<IndexMap<_, _>>()
}

/// Union of keys across all records, in first-seen order.
fn key_union(records: &[Vec<(String, Value)>]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for record in records {
        for (key, _) in record {
            if !keys.iter().any(|seen| seen == key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

fn align_bulk_args(records: Vec<Vec<(String, Value)>>, keys: &[String]) -> Vec<Vec<Value>> {
    records
        .into_iter()
        .map(|record| {
            let mut record: IndexMap<String, Value> = record.into_iter().collect();
            keys.iter()
                .map(|key| record.swap_remove(key).unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}
