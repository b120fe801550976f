//! Buffered inserts inside one transaction per imported table.
//!
//! Rows are grouped into multi-row `INSERT` statements of `rows_per_statement`
//! rows. sqlx keeps prepared statements cached per connection keyed by their
//! SQL text, so every full batch reuses the same prepared statement. Only the
//! last partial batch of a table needs a statement of its own.

use sqlx::{sqlite::SqliteArguments, Connection, Sqlite, SqliteConnection, Transaction};

use crate::{
    error::{ImportError, Result},
    schema::TableSpec,
};

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` since 3.32.
const MAX_BIND_PARAMETERS: usize = 32766;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

impl SqlValue {
    fn bind_to<'q>(self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        match self {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(value) => query.bind(value),
            SqlValue::Integer(value) => query.bind(value),
            SqlValue::Real(value) => query.bind(value),
            SqlValue::Bool(value) => query.bind(value),
        }
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Integer)
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Real)
    }
}

impl From<Option<bool>> for SqlValue {
    fn from(value: Option<bool>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Bool)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

fn insert_sql(table: &TableSpec, rows: usize) -> String {
    let placeholders = vec!["?"; table.columns.len()].join(", ");
    let values = vec![format!("({placeholders})"); rows].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.name,
        table.columns.join(", "),
        values
    )
}

struct InsertBuffer {
    table: &'static TableSpec,
    rows_per_statement: usize,
    full_batch_sql: String,
    values: Vec<SqlValue>,
    pending_rows: usize,
    written: u64,
}

impl InsertBuffer {
    fn new(table: &'static TableSpec, rows_per_statement: usize) -> Self {
        let max_rows = (MAX_BIND_PARAMETERS / table.columns.len()).max(1);
        let rows_per_statement = rows_per_statement.clamp(1, max_rows);
        InsertBuffer {
            table,
            rows_per_statement,
            full_batch_sql: insert_sql(table, rows_per_statement),
            values: Vec::with_capacity(rows_per_statement * table.columns.len()),
            pending_rows: 0,
            written: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.pending_rows >= self.rows_per_statement
    }

    async fn flush(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let partial_sql;
        let sql = if self.pending_rows == self.rows_per_statement {
            &self.full_batch_sql
        } else {
            partial_sql = insert_sql(self.table, self.pending_rows);
            &partial_sql
        };

        let mut query = sqlx::query(sql);
        for value in self.values.drain(..) {
            query = value.bind_to(query);
        }
        query
            .execute(conn)
            .await
            .map_err(|err| ImportError::from_write(self.table.name, err))?;

        self.written += self.pending_rows as u64;
        self.pending_rows = 0;
        Ok(())
    }
}

/// Rows committed per destination table, in first-write order.
pub type WrittenRows = Vec<(&'static str, u64)>;

/// All writes for one imported table, applied inside a single transaction.
///
/// A table importer may write to several destination tables (calendar rows and
/// their weekday rows). A buffer that fills is flushed on its own, so every
/// statement before commit is a full batch; references between destination
/// tables of one import are therefore declared deferred and checked on commit.
/// The final flush runs in the order the tables were first written.
pub struct BatchWriter<'c> {
    tx: Transaction<'c, Sqlite>,
    label: &'static str,
    rows_per_statement: usize,
    buffers: Vec<InsertBuffer>,
}

impl<'c> BatchWriter<'c> {
    pub async fn begin(
        conn: &'c mut SqliteConnection,
        label: &'static str,
        rows_per_statement: usize,
    ) -> Result<BatchWriter<'c>> {
        let tx = conn
            .begin()
            .await
            .map_err(|err| ImportError::from_transaction(label, err))?;
        Ok(BatchWriter {
            tx,
            label,
            rows_per_statement,
            buffers: vec![],
        })
    }

    pub async fn write_row(&mut self, table: &'static TableSpec, values: Vec<SqlValue>) -> Result<()> {
        debug_assert_eq!(values.len(), table.columns.len(), "{}", table.name);
        let index = match self.buffers.iter().position(|b| b.table.name == table.name) {
            Some(index) => index,
            None => {
                self.buffers
                    .push(InsertBuffer::new(table, self.rows_per_statement));
                self.buffers.len() - 1
            }
        };
        let buffer = &mut self.buffers[index];
        buffer.values.extend(values);
        buffer.pending_rows += 1;
        if buffer.is_full() {
            buffer.flush(&mut self.tx).await?;
        }
        Ok(())
    }

    async fn flush_all(&mut self) -> Result<()> {
        for buffer in self.buffers.iter_mut() {
            buffer.flush(&mut self.tx).await?;
        }
        Ok(())
    }

    /// Flushes the remaining rows and commits. Nothing is committed if the
    /// final flush fails.
    pub async fn commit(mut self) -> Result<WrittenRows> {
        let flushed = self.flush_all().await;
        if let Err(err) = flushed {
            return Err(self.abort(err).await);
        }
        let written = self
            .buffers
            .iter()
            .map(|buffer| (buffer.table.name, buffer.written))
            .collect();
        let label = self.label;
        self.tx
            .commit()
            .await
            .map_err(|err| ImportError::from_transaction(label, err))?;
        Ok(written)
    }

    /// Rolls back after `err` and returns it. A failing rollback is only
    /// logged so that the row error stays the reported cause.
    pub async fn abort(self, err: ImportError) -> ImportError {
        let label = self.label;
        keep_cause(label, err, self.rollback().await)
    }

    pub async fn rollback(self) -> Result<()> {
        let label = self.label;
        log::warn!("Rolling back {}", label);
        self.tx
            .rollback()
            .await
            .map_err(|source| ImportError::Transaction { table: label, source })
    }
}

fn keep_cause(label: &str, err: ImportError, rolled_back: Result<()>) -> ImportError {
    if let Err(rollback_err) = rolled_back {
        log::error!("Rollback of {} failed: {}", label, rollback_err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{self, AGENCY, CALENDAR, CALENDAR_DAY};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteConnection) {
        let dir = TempDir::new().unwrap();
        let mut conn = schema::open_store(&dir.path().join("data.db")).await.unwrap();
        schema::initialize_schema(&mut conn).await.unwrap();
        (dir, conn)
    }

    fn agency(id: &str) -> Vec<SqlValue> {
        vec![
            id.into(),
            "Metro".into(),
            "https://metro.example".into(),
            "Europe/Berlin".into(),
        ]
    }

    #[test]
    fn insert_sql_repeats_placeholder_groups() {
        assert_eq!(
            insert_sql(&CALENDAR_DAY, 2),
            "INSERT INTO CALENDAR_DAY (calendarDayServiceId, calendarDay) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn rows_per_statement_respects_bind_limit() {
        assert_eq!(InsertBuffer::new(&AGENCY, 0).rows_per_statement, 1);
        assert_eq!(
            InsertBuffer::new(&AGENCY, 1_000_000).rows_per_statement,
            MAX_BIND_PARAMETERS / 4
        );
    }

    #[tokio::test]
    async fn commit_writes_full_and_partial_batches() {
        let (_dir, mut conn) = setup().await;

        let mut writer = BatchWriter::begin(&mut conn, "AGENCY", 3).await.unwrap();
        for i in 0..7 {
            writer.write_row(&AGENCY, agency(&format!("A{i}"))).await.unwrap();
        }
        let written = writer.commit().await.unwrap();

        assert_eq!(written, vec![("AGENCY", 7)]);
        assert_eq!(schema::count_rows(&mut conn, &AGENCY).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn rollback_discards_flushed_rows() {
        let (_dir, mut conn) = setup().await;

        let mut writer = BatchWriter::begin(&mut conn, "AGENCY", 2).await.unwrap();
        for i in 0..5 {
            writer.write_row(&AGENCY, agency(&format!("A{i}"))).await.unwrap();
        }
        writer.rollback().await.unwrap();

        assert_eq!(schema::count_rows(&mut conn, &AGENCY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_key_in_final_flush_rolls_back_everything() {
        let (_dir, mut conn) = setup().await;

        let mut writer = BatchWriter::begin(&mut conn, "AGENCY", 10).await.unwrap();
        writer.write_row(&AGENCY, agency("A")).await.unwrap();
        writer.write_row(&AGENCY, agency("A")).await.unwrap();
        let err = writer.commit().await.unwrap_err();

        assert!(matches!(
            err,
            ImportError::ConstraintViolation { table: "AGENCY", .. }
        ));
        assert_eq!(schema::count_rows(&mut conn, &AGENCY).await.unwrap(), 0);
    }

    fn calendar(id: &str) -> Vec<SqlValue> {
        let mut row: Vec<SqlValue> = vec![id.into()];
        row.extend((0..7).map(|_| SqlValue::Bool(true)));
        row.extend([SqlValue::Null, SqlValue::Null]);
        row
    }

    #[tokio::test]
    async fn full_buffer_is_flushed_without_partial_batches_of_other_tables() {
        let (_dir, mut conn) = setup().await;

        let mut writer = BatchWriter::begin(&mut conn, "CALENDAR", 2).await.unwrap();
        writer.write_row(&CALENDAR, calendar("WEEK")).await.unwrap();
        writer.write_row(&CALENDAR_DAY, vec!["WEEK".into(), SqlValue::Integer(0)]).await.unwrap();
        writer.write_row(&CALENDAR_DAY, vec!["WEEK".into(), SqlValue::Integer(1)]).await.unwrap();

        assert_eq!(writer.buffers[0].pending_rows, 1);
        assert_eq!(writer.buffers[0].written, 0);
        assert_eq!(writer.buffers[1].pending_rows, 0);
        assert_eq!(writer.buffers[1].written, 2);

        let written = writer.commit().await.unwrap();
        assert_eq!(written, vec![("CALENDAR", 1), ("CALENDAR_DAY", 2)]);
        assert_eq!(schema::count_rows(&mut conn, &CALENDAR_DAY).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn day_without_calendar_is_rejected_on_commit() {
        let (_dir, mut conn) = setup().await;

        let mut writer = BatchWriter::begin(&mut conn, "CALENDAR", 1).await.unwrap();
        writer.write_row(&CALENDAR, calendar("WEEK")).await.unwrap();
        writer.write_row(&CALENDAR_DAY, vec!["GHOST".into(), SqlValue::Integer(0)]).await.unwrap();
        let err = writer.commit().await.unwrap_err();

        assert!(matches!(
            err,
            ImportError::ConstraintViolation { table: "CALENDAR", .. }
        ));
        assert_eq!(schema::count_rows(&mut conn, &CALENDAR).await.unwrap(), 0);
        assert_eq!(schema::count_rows(&mut conn, &CALENDAR_DAY).await.unwrap(), 0);
    }

    #[test]
    fn failed_rollback_keeps_the_original_error() {
        let cause = ImportError::malformed("stops.txt", 3, "stop_lat is not a number");
        let rollback = Err(ImportError::Transaction {
            table: "STOP",
            source: sqlx::Error::PoolClosed,
        });

        let err = keep_cause("STOP", cause, rollback);

        assert!(matches!(err, ImportError::MalformedRow { line: 3, .. }));
    }
}
