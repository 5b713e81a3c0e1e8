//! Async HTTP client for CrateDB's `/_sql` endpoint.
//!
//! This crate wraps `POST /_sql?types` with ergonomic methods:
//!
//! - [`CrateDbClient::execute`] for single parameterized statements
//! - [`CrateDbClient::execute_many`] for bulk statements
//! - [`CrateDbClient::stream_query`] and [`Cursor`] for server-side cursors
//! - the [`statement`] module for safe DDL/DML string construction
//!
//! # Quick Start
//!
//! ```no_run
//! use cratedb_http::{ClientConfig, CrateDbClient, Value};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = CrateDbClient::new(
//!     ClientConfig::builder()
//!         .connection_string("http://crate@localhost:4200/")
//!         .build()?,
//! )?;
//!
//! db.insert(
//!     "doc.users",
//!     [("id", Value::from(1)), ("name", Value::from("Kit"))],
//!     Some(&["id"]),
//! )
//! .await?;
//!
//! let result = db
//!     .execute("SELECT id, name FROM doc.users WHERE id = ?", [Value::from(1)])
//!     .await?;
//! println!("rows={}", result.rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! Integer columns keep full 64-bit precision across the JSON hop, and
//! `TIMESTAMP`/`DATE` columns decode to [`chrono`] values per the
//! deserialization policy configured on the client.

mod client;
mod config;
mod cursor;
mod error;
mod serializer;
pub mod statement;
mod transport;
mod types;
mod value;
mod wire;

pub use client::{CrateDbClient, ExecuteOptions, DEFAULT_STREAM_BATCH_SIZE};
pub use config::{
    ClientConfig, ClientConfigBuilder, DeserializationConfig, LongMode, RowMode, TemporalMode,
};
pub use cursor::{Cursor, RowStream};
pub use error::{CrateDbError, Result};
pub use statement::{ColumnDef, ObjectMode, TableOptions};
pub use types::{
    BulkResponse, BulkResult, ColumnType, Durations, QueryResponse, Record, Rows, ServerErrorInfo,
    Sizes,
};
pub use value::{Args, Value};
