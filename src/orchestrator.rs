use std::{collections::BTreeMap, path::Path, time::Instant};

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::{
    error::Result,
    progress::ProgressSink,
    row_source::count_data_lines,
    table_importers::{FeedTable, TableImporter},
};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Rows per `INSERT` statement; 1 executes one statement per row.
    pub rows_per_statement: usize,
    /// Count source lines up front to give progress bars a length.
    pub count_rows: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            rows_per_statement: 100,
            count_rows: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: FeedTable,
    pub source_file: &'static str,
    pub records: u64,
    pub rows_written: BTreeMap<&'static str, u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub tables: Vec<TableReport>,
    pub elapsed_secs: f64,
}

impl ImportReport {
    /// Rows committed into the destination table `name` (e.g. `"CALENDAR_DAY"`).
    pub fn rows_written(&self, name: &str) -> u64 {
        self.tables
            .iter()
            .filter_map(|table| table.rows_written.get(name))
            .sum()
    }
}

/// Loads an extracted feed directory table by table, in foreign-key order.
///
/// Owns the only connection to the store for the whole run. The first failing
/// table is rolled back and ends the run; tables committed before it stay.
pub struct FeedImporter {
    conn: SqliteConnection,
    options: ImportOptions,
}

impl FeedImporter {
    pub fn new(conn: SqliteConnection, options: ImportOptions) -> Self {
        FeedImporter { conn, options }
    }

    pub async fn import(
        &mut self,
        feed_dir: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<ImportReport> {
        log::info!("Filling database from {:?}", feed_dir);
        let started = Instant::now();
        let mut report = ImportReport::default();

        for table in FeedTable::IMPORT_ORDER {
            let importer = TableImporter::new(table, feed_dir, self.options.rows_per_statement);
            let total_rows = self.total_rows_hint(table, &importer)?;
            let import = importer.run(&mut self.conn, total_rows, progress).await?;
            report.tables.push(TableReport {
                table,
                source_file: table.file_name(),
                records: import.records,
                rows_written: import.written.into_iter().collect(),
            });
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        log::info!("Import finished in {:.1}s", report.elapsed_secs);
        Ok(report)
    }

    fn total_rows_hint(&self, table: FeedTable, importer: &TableImporter) -> Result<Option<u64>> {
        // Deduplicated files hold many lines per record, so their line count
        // would overstate the total.
        if !self.options.count_rows || table.dedup_column().is_some() {
            return Ok(None);
        }
        count_data_lines(importer.path()).map(Some)
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub fn into_connection(self) -> SqliteConnection {
        self.conn
    }
}
