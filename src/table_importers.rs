use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::{
    batch_writer::{BatchWriter, SqlValue, WrittenRows},
    dedup::ContiguousDedup,
    error::Result,
    progress::ProgressSink,
    row_source::{Row, RowSource},
    schema::{self, TableSpec},
};

/// One feed file and the table(s) it is loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeedTable {
    Agency,
    Calendar,
    CalendarDate,
    Route,
    Shape,
    Stop,
    Trip,
    StopTime,
}

impl FeedTable {
    /// Every table appears after the tables its foreign keys point to.
    pub const IMPORT_ORDER: [FeedTable; 8] = [
        FeedTable::Agency,
        FeedTable::Calendar,
        FeedTable::CalendarDate,
        FeedTable::Route,
        FeedTable::Shape,
        FeedTable::Stop,
        FeedTable::Trip,
        FeedTable::StopTime,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            FeedTable::Agency => "agency.txt",
            FeedTable::Calendar => "calendar.txt",
            FeedTable::CalendarDate => "calendar_dates.txt",
            FeedTable::Route => "routes.txt",
            FeedTable::Shape => "shapes.txt",
            FeedTable::Stop => "stops.txt",
            FeedTable::Trip => "trips.txt",
            FeedTable::StopTime => "stop_times.txt",
        }
    }

    pub fn phase(self) -> &'static str {
        match self {
            FeedTable::Agency => "Agencies",
            FeedTable::Calendar => "Calendars",
            FeedTable::CalendarDate => "Calendar Dates",
            FeedTable::Route => "Routes",
            FeedTable::Shape => "Shapes",
            FeedTable::Stop => "Stops",
            FeedTable::Trip => "Trips",
            FeedTable::StopTime => "StopTimes",
        }
    }

    pub fn target(self) -> &'static TableSpec {
        match self {
            FeedTable::Agency => &schema::AGENCY,
            FeedTable::Calendar => &schema::CALENDAR,
            FeedTable::CalendarDate => &schema::CALENDAR_DATE,
            FeedTable::Route => &schema::ROUTE,
            FeedTable::Shape => &schema::SHAPE,
            FeedTable::Stop => &schema::STOP,
            FeedTable::Trip => &schema::TRIP,
            FeedTable::StopTime => &schema::STOP_TIME,
        }
    }

    /// Column whose contiguous runs form one logical record, if any.
    pub fn dedup_column(self) -> Option<&'static str> {
        match self {
            FeedTable::Shape => Some("shape_id"),
            _ => None,
        }
    }
}

const WEEKDAY_COLUMNS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Outcome of one committed table import.
#[derive(Debug, Clone)]
pub struct TableImport {
    pub records: u64,
    pub written: WrittenRows,
}

pub struct TableImporter {
    table: FeedTable,
    path: PathBuf,
    rows_per_statement: usize,
}

impl TableImporter {
    pub fn new(table: FeedTable, feed_dir: &Path, rows_per_statement: usize) -> Self {
        TableImporter {
            table,
            path: feed_dir.join(table.file_name()),
            rows_per_statement,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams the feed file into its table(s) within one transaction.
    ///
    /// `total_rows` only sizes the progress display; the loop ends when the
    /// file is exhausted. Any failure rolls the whole table back.
    pub async fn run(
        &self,
        conn: &mut SqliteConnection,
        total_rows: Option<u64>,
        progress: &mut dyn ProgressSink,
    ) -> Result<TableImport> {
        let source = RowSource::open(&self.path)?;
        let label = self.table.target().name;

        let mut writer = BatchWriter::begin(conn, label, self.rows_per_statement).await?;
        progress.start_phase(self.table.phase(), total_rows);
        let outcome = match self.write_rows(source, &mut writer, progress).await {
            Ok(records) => writer
                .commit()
                .await
                .map(|written| TableImport { records, written }),
            Err(err) => Err(writer.abort(err).await),
        };

        match &outcome {
            Ok(import) => {
                progress.finish_phase();
                log::info!(
                    "Committed {} records from {}",
                    import.records,
                    self.table.file_name()
                );
            }
            Err(err) => {
                progress.abandon_phase();
                log::error!("Importing {} failed: {}", self.table.file_name(), err);
            }
        }
        outcome
    }

    async fn write_rows(
        &self,
        source: RowSource,
        writer: &mut BatchWriter<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64> {
        let rows: Box<dyn Iterator<Item = Result<Row>> + Send> = match self.table.dedup_column() {
            Some(column) => Box::new(ContiguousDedup::new(source, column)),
            None => Box::new(source),
        };

        let mut records = 0;
        for row in rows {
            let row = row?;
            for (table, values) in transform(self.table, &row)? {
                writer.write_row(table, values).await?;
            }
            records += 1;
            progress.increment(1);
        }
        Ok(records)
    }
}

type TargetRow = (&'static TableSpec, Vec<SqlValue>);

/// Maps one source record to the rows it produces.
pub fn transform(table: FeedTable, row: &Row) -> Result<Vec<TargetRow>> {
    let target = table.target();
    let values: Vec<SqlValue> = match table {
        FeedTable::Agency => vec![
            row.text("agency_id").into(),
            row.text("agency_name").into(),
            row.text("agency_url").into(),
            row.text("agency_timezone").into(),
        ],
        FeedTable::Calendar => return calendar_rows(row),
        FeedTable::CalendarDate => vec![
            row.text("service_id").into(),
            parse_date(row, "date")?.into(),
            row.parse::<i64>("exception_type")?.into(),
        ],
        FeedTable::Route => vec![
            row.text("route_id").into(),
            row.text("route_short_name").into(),
            row.text("route_long_name").into(),
            row.text("route_desc").into(),
            row.parse::<i64>("route_type")?.into(),
            row.text("route_color").into(),
            row.text("route_text_color").into(),
            row.text("agency_id").into(),
        ],
        FeedTable::Shape => vec![row.text("shape_id").into(), "".into()],
        FeedTable::Stop => vec![
            row.text("stop_id").into(),
            row.text("stop_code").into(),
            row.text("stop_name").into(),
            row.text("stop_desc").into(),
            row.parse::<f64>("stop_lat")?.into(),
            row.parse::<f64>("stop_lon")?.into(),
            row.text("zone_id").into(),
            row.parse::<i64>("location_type")?.into(),
            row.text("platform_code").into(),
            row.text("parent_station").into(),
        ],
        FeedTable::Trip => vec![
            row.text("trip_id").into(),
            row.text("service_id").into(),
            row.text("trip_headsign").into(),
            row.parse::<i64>("direction_id")?.into(),
            row.text("shape_id").into(),
            row.text("route_id").into(),
        ],
        FeedTable::StopTime => vec![
            row.text("stop_id").into(),
            row.text("trip_id").into(),
            row.parse::<i64>("stop_sequence")?.into(),
            parse_time(row, "arrival_time")?.into(),
            parse_time(row, "departure_time")?.into(),
        ],
    };
    Ok(vec![(target, values)])
}

/// One CALENDAR row followed by a CALENDAR_DAY row per served weekday,
/// Monday = 0 through Sunday = 6.
fn calendar_rows(row: &Row) -> Result<Vec<TargetRow>> {
    let service_id = row.text("service_id");
    let mut flags = Vec::with_capacity(WEEKDAY_COLUMNS.len());
    for column in WEEKDAY_COLUMNS {
        flags.push(parse_flag(row, column)?);
    }

    let mut calendar: Vec<SqlValue> = vec![service_id.clone().into()];
    calendar.extend(flags.iter().map(|flag| SqlValue::from(*flag)));
    calendar.push(parse_date(row, "start_date")?.into());
    calendar.push(parse_date(row, "end_date")?.into());

    let mut rows = vec![(&schema::CALENDAR, calendar)];
    for (day, flag) in flags.iter().enumerate() {
        if *flag == Some(true) {
            rows.push((
                &schema::CALENDAR_DAY,
                vec![service_id.clone().into(), SqlValue::Integer(day as i64)],
            ));
        }
    }
    Ok(rows)
}

fn parse_flag(row: &Row, column: &str) -> Result<Option<bool>> {
    match row.get(column) {
        None => Ok(None),
        Some("0") => Ok(Some(false)),
        Some("1") => Ok(Some(true)),
        Some(other) => Err(row.malformed(format!("{column} must be 0 or 1, got {other:?}"))),
    }
}

/// `YYYYMMDD` feed dates are stored as ISO `YYYY-MM-DD`.
fn parse_date(row: &Row, column: &str) -> Result<Option<String>> {
    let Some(value) = row.get(column) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map(|date| Some(date.format("%Y-%m-%d").to_string()))
        .map_err(|err| row.malformed(format!("{column} {value:?} is not a YYYYMMDD date: {err}")))
}

/// Validates `H:MM:SS` and pads it to `HH:MM:SS`. Hours past 23 are kept as
/// they are, since trips running past midnight count on from the service day.
fn parse_time(row: &Row, column: &str) -> Result<Option<String>> {
    let Some(value) = row.get(column) else {
        return Ok(None);
    };
    let invalid = || row.malformed(format!("{column} {value:?} is not an H:MM:SS time"));

    let parts = value.split(':').collect::<Vec<_>>();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };
    let (hours, minutes, seconds) = (*hours, *minutes, *seconds);
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(hours) || hours.len() > 2 || minutes.len() != 2 || seconds.len() != 2 {
        return Err(invalid());
    }
    if !all_digits(minutes) || !all_digits(seconds) {
        return Err(invalid());
    }
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    let seconds: u32 = seconds.parse().map_err(|_| invalid())?;
    if minutes > 59 || seconds > 59 {
        return Err(invalid());
    }
    Ok(Some(format!("{hours:02}:{minutes:02}:{seconds:02}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ImportError, progress::SilentProgress};
    use tempfile::TempDir;

    fn single_row(contents: &str) -> (TempDir, Row) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.txt");
        std::fs::write(&path, contents).unwrap();
        let row = RowSource::open(&path).unwrap().next().unwrap().unwrap();
        (dir, row)
    }

    #[test]
    fn calendar_emits_one_day_row_per_served_weekday() {
        let (_dir, row) = single_row(
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
             WE,1,0,0,0,0,0,1,20240101,20241231\n",
        );
        let rows = transform(FeedTable::Calendar, &row).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, &schema::CALENDAR);
        assert_eq!(rows[0].1[1], SqlValue::Bool(true));
        assert_eq!(rows[0].1[2], SqlValue::Bool(false));
        assert_eq!(rows[0].1[8], SqlValue::Text("2024-01-01".into()));
        let days = rows[1..]
            .iter()
            .map(|(table, values)| {
                assert_eq!(*table, &schema::CALENDAR_DAY);
                values[1].clone()
            })
            .collect::<Vec<_>>();
        assert_eq!(days, vec![SqlValue::Integer(0), SqlValue::Integer(6)]);
    }

    #[test]
    fn calendar_without_date_range_columns_stores_nulls() {
        let (_dir, row) = single_row(
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday\n\
             WK,1,1,1,1,1,0,0\n",
        );
        let rows = transform(FeedTable::Calendar, &row).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].1[8], SqlValue::Null);
        assert_eq!(rows[0].1[9], SqlValue::Null);
    }

    #[test]
    fn weekday_flags_other_than_zero_or_one_are_malformed() {
        let (_dir, row) = single_row(
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday\n\
             WK,yes,1,1,1,1,0,0\n",
        );
        let err = transform(FeedTable::Calendar, &row).unwrap_err();
        assert!(matches!(err, ImportError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn empty_optional_fields_become_null() {
        let (_dir, row) = single_row(
            "route_id,agency_id,route_short_name,route_long_name,route_type,route_color\n\
             R1,A,S1,,3,\n",
        );
        let rows = transform(FeedTable::Route, &row).unwrap();
        assert_eq!(
            rows[0].1,
            vec![
                SqlValue::Text("R1".into()),
                SqlValue::Text("S1".into()),
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Integer(3),
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Text("A".into()),
            ]
        );
    }

    #[test]
    fn stop_times_are_padded_and_validated() {
        let (_dir, row) = single_row(
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             T1,8:05:00,25:10:30,S1,1\n",
        );
        let rows = transform(FeedTable::StopTime, &row).unwrap();
        assert_eq!(rows[0].1[3], SqlValue::Text("08:05:00".into()));
        assert_eq!(rows[0].1[4], SqlValue::Text("25:10:30".into()));

        let (_dir, row) = single_row(
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             T1,08:65:00,,S1,1\n",
        );
        assert!(transform(FeedTable::StopTime, &row).is_err());
    }

    #[test]
    fn unparseable_sequence_is_malformed() {
        let (_dir, row) = single_row(
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             T1,08:00:00,08:00:00,S1,first\n",
        );
        let err = transform(FeedTable::StopTime, &row).unwrap_err();
        assert!(err.to_string().contains("stop_sequence"));
    }

    #[tokio::test]
    async fn missing_source_file_fails_before_a_transaction_opens() {
        let dir = TempDir::new().unwrap();
        let mut conn = schema::open_store(&dir.path().join("data.db")).await.unwrap();
        schema::initialize_schema(&mut conn).await.unwrap();

        let importer = TableImporter::new(FeedTable::Agency, dir.path(), 10);
        let err = importer
            .run(&mut conn, None, &mut SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::SourceRead { .. }));
    }

    #[tokio::test]
    async fn shapes_are_written_once_per_run() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("shapes.txt"),
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             S1,52.1,13.1,1\nS1,52.2,13.2,2\nS1,52.3,13.3,3\nS2,48.1,11.5,1\n",
        )
        .unwrap();
        let mut conn = schema::open_store(&dir.path().join("data.db")).await.unwrap();
        schema::initialize_schema(&mut conn).await.unwrap();

        let importer = TableImporter::new(FeedTable::Shape, dir.path(), 1);
        let import = importer
            .run(&mut conn, Some(4), &mut SilentProgress)
            .await
            .unwrap();

        assert_eq!(import.records, 2);
        assert_eq!(import.written, vec![("SHAPE", 2)]);
        let lines: Vec<String> = sqlx::query_scalar("SELECT shapeLine FROM SHAPE")
            .fetch_all(&mut conn)
            .await
            .unwrap();
        assert_eq!(lines, vec!["", ""]);
    }
}
