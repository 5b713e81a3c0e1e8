use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures_util::{stream, Stream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    client::keyed_row,
    config::ClientConfig,
    serializer,
    transport::Transport,
    types::Record,
    wire::SqlRequest,
    CrateDbError, Result, Value,
};

static CURSOR_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CursorState {
    New,
    Open,
    Closed,
}

/// A named server-side cursor over a query result, scoped to its own
/// transaction.
///
/// The cursor owns a dedicated transport with a pool of exactly one
/// connection, so every `DECLARE`, `FETCH`, and `CLOSE` travels the same
/// backend session. All fetches return rows in keyed (object) mode. The
/// handle is single-consumer: fetches are strictly sequential by `&mut`.
pub struct Cursor {
    config: Arc<ClientConfig>,
    sql: String,
    name: String,
    state: CursorState,
    transport: Option<Transport>,
}

impl Cursor {
    pub(crate) fn new(config: Arc<ClientConfig>, sql: String) -> Self {
        let name = format!("cursor_{}", CURSOR_SEQ.fetch_add(1, Ordering::Relaxed));
        Self {
            config,
            sql,
            name,
            state: CursorState::New,
            transport: None,
        }
    }

    /// The server-side cursor name, unique per process.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.state == CursorState::Open
    }

    /// Begins a transaction on the pinned connection and declares the
    /// cursor.
    pub async fn open(&mut self) -> Result<()> {
        match self.state {
            CursorState::Open => {
                return Err(CrateDbError::Cursor("Cursor is already open".to_owned()))
            }
            CursorState::Closed => {
                return Err(CrateDbError::Cursor("Cursor is closed".to_owned()))
            }
            CursorState::New => {}
        }
        self.transport = Some(Transport::new(&self.config, 1)?);
        self.run("BEGIN").await?;
        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR WITH HOLD FOR {}",
            self.name,
            self.sql.trim().trim_end_matches(';')
        );
        self.run(&declare).await?;
        self.state = CursorState::Open;
        debug!(cursor = %self.name, "cursor opened");
        Ok(())
    }

    /// Fetches the next row, or `None` when the cursor is exhausted.
    pub async fn fetch_one(&mut self) -> Result<Option<Record>> {
        self.ensure_open()?;
        let stmt = format!("FETCH NEXT FROM {}", self.name);
        let mut rows = self.fetch(&stmt).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    /// Fetches up to `count` rows. A count below one returns an empty list
    /// without hitting the server; an exhausted cursor returns an empty
    /// list, never an error.
    pub async fn fetch_many(&mut self, count: u32) -> Result<Vec<Record>> {
        self.ensure_open()?;
        if count < 1 {
            return Ok(Vec::new());
        }
        let stmt = format!("FETCH {count} FROM {}", self.name);
        self.fetch(&stmt).await
    }

    /// Fetches every remaining row.
    pub async fn fetch_all(&mut self) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let stmt = format!("FETCH ALL FROM {}", self.name);
        self.fetch(&stmt).await
    }

    /// Lazily yields the remaining rows, fetching `batch_size` at a time
    /// and terminating on the first empty batch.
    pub fn iterate(&mut self, batch_size: u32) -> impl Stream<Item = Result<Record>> + '_ {
        stream::try_unfold(
            (self, VecDeque::<Record>::new()),
            move |(cursor, mut buffer)| async move {
                if let Some(row) = buffer.pop_front() {
                    return Ok(Some((row, (cursor, buffer))));
                }
                let rows = cursor.fetch_many(batch_size).await?;
                buffer.extend(rows);
                match buffer.pop_front() {
                    Some(row) => Ok(Some((row, (cursor, buffer)))),
                    None => Ok(None),
                }
            },
        )
    }

    /// Closes the cursor, commits its transaction, and releases the pinned
    /// connection.
    pub async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        let close = format!("CLOSE {}", self.name);
        self.run(&close).await?;
        self.run("COMMIT").await?;
        self.state = CursorState::Closed;
        self.transport = None;
        debug!(cursor = %self.name, "cursor closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state != CursorState::Open {
            return Err(CrateDbError::Cursor("Cursor is not open".to_owned()));
        }
        Ok(())
    }

    async fn fetch(&mut self, stmt: &str) -> Result<Vec<Record>> {
        let (cols, rows) = self.run(stmt).await?;
        Ok(rows
            .into_iter()
            .map(|row| keyed_row(row, &cols))
            .collect())
    }

    async fn run(&self, stmt: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| CrateDbError::Cursor("Cursor is not open".to_owned()))?;
        let request = SqlRequest::stmt(stmt);
        let exchange = transport.send(&request).await?;
        let envelope = serializer::decode_body(&exchange.body)?;
        let col_types = serializer::parse_col_types(&envelope.col_types)?;
        let rows =
            serializer::convert_rows(envelope.rows, &col_types, &self.config.deserialization)?;
        Ok((envelope.cols, rows))
    }
}

/// Lazy sequence of rows produced by [`CrateDbClient::stream_query`].
///
/// Dropping the stream early tears down the producer, which closes the
/// underlying cursor before exiting.
///
/// [`CrateDbClient::stream_query`]: crate::CrateDbClient::stream_query
pub struct RowStream {
    rx: mpsc::Receiver<Result<Record>>,
}

impl Stream for RowStream {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum DriveOutcome {
    Finished,
    ConsumerGone,
    Failed(CrateDbError),
}

/// Spawns the producer half of `stream_query`: a driver task that owns the
/// cursor and feeds rows through a bounded channel. The cursor is closed on
/// every exit path, including the consumer dropping the stream.
pub(crate) fn spawn_stream(config: Arc<ClientConfig>, sql: String, batch_size: u32) -> RowStream {
    let (tx, rx) = mpsc::channel(batch_size.max(1) as usize);
    tokio::spawn(async move {
        let mut cursor = Cursor::new(config, sql);
        if let Err(err) = cursor.open().await {
            let _ = tx.send(Err(err)).await;
            return;
        }
        let outcome = drive(&mut cursor, &tx, batch_size).await;
        let close_result = cursor.close().await;
        match outcome {
            DriveOutcome::ConsumerGone => {}
            DriveOutcome::Failed(err) => {
                let _ = tx.send(Err(err)).await;
            }
            DriveOutcome::Finished => {
                if let Err(err) = close_result {
                    let _ = tx.send(Err(err)).await;
                }
            }
        }
    });
    RowStream { rx }
}

async fn drive(
    cursor: &mut Cursor,
    tx: &mpsc::Sender<Result<Record>>,
    batch_size: u32,
) -> DriveOutcome {
    loop {
        let rows = match cursor.fetch_many(batch_size).await {
            Ok(rows) => rows,
            Err(err) => return DriveOutcome::Failed(err),
        };
        if rows.is_empty() {
            return DriveOutcome::Finished;
        }
        for row in rows {
            if tx.send(Ok(row)).await.is_err() {
                debug!(cursor = %cursor.name, "stream consumer went away");
                return DriveOutcome::ConsumerGone;
            }
        }
    }
}
